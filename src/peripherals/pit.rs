//! Intel 8253 programmable interval timer
//!
//! Three 16-bit down-counters clocked at 1.193182 MHz. Channel 0 drives
//! the system timer interrupt (IRQ 0), channel 1 is the DRAM refresh
//! counter on real hardware (not relevant here), channel 2 drives the PC
//! speaker through the 8255 gate.
//!
//! Only binary counting and modes 0, 2 and 3 are implemented; the BCD
//! bit is accepted and ignored.

/// I/O ports decoded by the timer.
pub mod ports {
    /// Data port for channel 0 (system timer).
    pub const CHANNEL0: u16 = 0x40;
    /// Data port for channel 1 (DRAM refresh).
    pub const CHANNEL1: u16 = 0x41;
    /// Data port for channel 2 (PC speaker).
    pub const CHANNEL2: u16 = 0x42;
    /// Control word port.
    pub const CONTROL: u16 = 0x43;
}

/// Input clock frequency in Hz.
pub const TICK_FREQUENCY_HZ: u32 = 1_193_182;

pub const NUM_CHANNELS: usize = 3;

/// Which byte of the 16-bit counter the next data-port access targets,
/// for channels programmed in LSB-then-MSB mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum AccessByte {
    #[default]
    Lsb,
    Msb,
}

/// One timer channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct PitChannel {
    /// Live 16-bit down-counter. A reload value of 0 counts 65 536.
    pub counter: u16,
    /// Snapshot taken by a latch command, read out instead of the counter.
    pub latch: u16,
    pub reload_value: u16,
    /// Operating mode 0-5 (only 0, 2, 3 implemented).
    pub mode: u8,
    /// Access mode: 1 = LSB only, 2 = MSB only, 3 = LSB then MSB.
    pub access_mode: u8,
    /// BCD bit, accepted but counting stays binary.
    pub bcd: bool,
    pub output: bool,
    rw_byte: AccessByte,
    pub latch_active: bool,
}

/// Result of one input clock across the three channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PitTick {
    /// Channel 0 output made a low-to-high transition; raise IRQ 0.
    pub irq0_edge: bool,
}

/// 8253 state.
#[derive(Debug, Clone, Default)]
pub struct Pit {
    pub channels: [PitChannel; NUM_CHANNELS],
}

impl Pit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Speaker frequency for a channel-2 reload, in Hz.
    ///
    /// A reload of 0 denotes 65 536 counts to the counter itself but is
    /// published as literal 0 Hz.
    fn speaker_frequency(reload: u16) -> u32 {
        if reload == 0 {
            0
        } else {
            TICK_FREQUENCY_HZ / reload as u32
        }
    }

    /// Load the counter from the reload value and report the channel-2
    /// frequency when applicable.
    fn load_counter(&mut self, index: usize) -> Option<u32> {
        let channel = &mut self.channels[index];
        // reload 0 wraps to 0 in the 16-bit counter, which stands for
        // the full 65 536 count.
        channel.counter = channel.reload_value;
        if index == 2 {
            Some(Self::speaker_frequency(channel.reload_value))
        } else {
            None
        }
    }

    fn write_data(&mut self, index: usize, value: u8) -> Option<u32> {
        let channel = &mut self.channels[index];
        match channel.access_mode {
            1 => {
                channel.reload_value = value as u16;
                self.load_counter(index)
            }
            2 => {
                channel.reload_value = (value as u16) << 8;
                self.load_counter(index)
            }
            3 => match channel.rw_byte {
                AccessByte::Lsb => {
                    channel.reload_value = (channel.reload_value & 0xFF00) | value as u16;
                    channel.rw_byte = AccessByte::Msb;
                    None
                }
                AccessByte::Msb => {
                    channel.reload_value =
                        (channel.reload_value & 0x00FF) | ((value as u16) << 8);
                    channel.rw_byte = AccessByte::Lsb;
                    self.load_counter(index)
                }
            },
            _ => None,
        }
    }

    /// Handle a write to ports 0x40-0x43.
    ///
    /// Returns the newly published speaker frequency when the write
    /// completed a channel-2 counter load.
    pub fn write_port(&mut self, port: u16, value: u8) -> Option<u32> {
        match port {
            ports::CONTROL => {
                let index = (value >> 6) & 0x03;
                if index > 2 {
                    // Read-back command (8254 only), not supported.
                    return None;
                }
                let channel = &mut self.channels[index as usize];
                let access_mode = (value >> 4) & 0x03;

                if access_mode == 0 {
                    // Latch command: snapshot the counter for reading.
                    channel.latch = channel.counter;
                    channel.latch_active = true;
                } else {
                    channel.access_mode = access_mode;
                    channel.mode = (value >> 1) & 0x07;
                    channel.bcd = value & 0x01 != 0;
                    channel.rw_byte = AccessByte::Lsb;
                    // Initial output level is mode-specific.
                    match channel.mode {
                        0 => channel.output = false,
                        2 | 3 => channel.output = true,
                        _ => {}
                    }
                }
                None
            }
            ports::CHANNEL0..=ports::CHANNEL2 => {
                self.write_data((port - ports::CHANNEL0) as usize, value)
            }
            _ => None,
        }
    }

    /// Handle a read from ports 0x40-0x42.
    ///
    /// Returns the latched value while a latch is active (released after
    /// its final byte is read), otherwise the live counter, honouring the
    /// per-channel byte toggle.
    pub fn read_port(&mut self, port: u16) -> u8 {
        let index = match port {
            ports::CHANNEL0..=ports::CHANNEL2 => (port - ports::CHANNEL0) as usize,
            _ => return 0xFF,
        };
        let channel = &mut self.channels[index];
        let value = if channel.latch_active {
            channel.latch
        } else {
            channel.counter
        };

        match channel.access_mode {
            1 => {
                channel.latch_active = false;
                value as u8
            }
            2 => {
                channel.latch_active = false;
                (value >> 8) as u8
            }
            3 => match channel.rw_byte {
                AccessByte::Lsb => {
                    channel.rw_byte = AccessByte::Msb;
                    value as u8
                }
                AccessByte::Msb => {
                    channel.rw_byte = AccessByte::Lsb;
                    channel.latch_active = false;
                    (value >> 8) as u8
                }
            },
            _ => 0xFF,
        }
    }

    /// Advance all three channels by one input clock.
    ///
    /// Mode 0 counts down once and stops at zero with the output high.
    /// Mode 2 pulses the output low for the tick at count 1 and reloads
    /// at zero. Mode 3 decrements by two and toggles the output at zero.
    /// IRQ 0 is reported only on a channel-0 output rising edge.
    pub fn tick(&mut self) -> PitTick {
        let mut result = PitTick::default();

        for index in 0..NUM_CHANNELS {
            let channel = &mut self.channels[index];

            // A one-shot that has fired stays put.
            if channel.mode == 0 && channel.counter == 0 {
                continue;
            }

            // Mode 2 drops the output for the single tick before reload.
            if channel.mode == 2 && channel.counter == 1 {
                channel.output = false;
            }

            if channel.mode == 3 && channel.counter >= 2 {
                channel.counter -= 2;
            } else {
                channel.counter = channel.counter.wrapping_sub(1);
            }

            if channel.counter == 0 {
                let was_high = channel.output;
                match channel.mode {
                    0 => {
                        channel.output = true;
                        // No reload: one-shot.
                    }
                    2 => {
                        channel.output = true;
                        channel.counter = channel.reload_value;
                    }
                    3 => {
                        channel.output = !channel.output;
                        channel.counter = channel.reload_value;
                    }
                    _ => {}
                }
                if index == 0 && channel.output && !was_high {
                    result.irq0_edge = true;
                }
            }
        }

        result
    }
}
