//! Intel 8255 peripheral interface
//!
//! Configured by the XT BIOS in Mode 0:
//! - Port A (0x60): input - keyboard scancode latch
//! - Port B (0x61): output - system control bits
//! - Port C (0x62): input - DIP switch banks
//! - Control word (0x63): write-only mode setup, ignored here
//!
//! Port B bits wired on the XT:
//! - bit 0: PIT channel-2 gate
//! - bit 1: speaker data (gate AND data must be high for sound)
//! - bit 2: DIP bank select for port C (0 = SW1-4, 1 = SW5-8)
//! - bit 6: keyboard clock (0 holds the clock low, arming reset)
//! - bit 7: keyboard enable/clear (1 clears the latch and inhibits)

/// I/O ports decoded by the chip.
pub mod ports {
    /// Keyboard scancode.
    pub const PORT_A: u16 = 0x60;
    /// System control.
    pub const PORT_B: u16 = 0x61;
    /// DIP switches.
    pub const PORT_C: u16 = 0x62;
    /// Mode control word.
    pub const CONTROL: u16 = 0x63;
}

/// Port B bit assignments.
pub mod port_b {
    pub const TIMER2_GATE: u8 = 1 << 0;
    pub const SPEAKER_DATA: u8 = 1 << 1;
    /// 0 selects SW1-4 on port C, 1 selects SW5-8.
    pub const DIP_SWITCH_SELECT: u8 = 1 << 2;
    /// 0 holds the keyboard clock line low.
    pub const KEYBOARD_CLOCK: u8 = 1 << 6;
    /// 1 clears the scancode latch and inhibits the keyboard.
    pub const KEYBOARD_ENABLE_CLEAR: u8 = 1 << 7;
}

/// Machine configuration surfaced through the DIP switches.
#[derive(Debug, Clone, Copy)]
pub struct PpiSwitches {
    /// Conventional memory size in KiB, encoded onto SW1 bits 2-3 as the
    /// number of 64 KiB banks minus one.
    pub memory_kib: u32,
    /// Number of floppy drives, 1-4.
    pub floppy_drives: u8,
    pub fpu_installed: bool,
    /// Display switch value (SW5-6), e.g. 0b11 for MDA 80x25.
    pub display_switches: u8,
}

impl PpiSwitches {
    fn floppy_drives_clamped(&self) -> u8 {
        self.floppy_drives.clamp(1, 4)
    }

    fn memory_banks_encoding(&self) -> u8 {
        ((self.memory_kib / 64).clamp(1, 4) - 1) as u8
    }
}

/// Keyboard control lines as seen by the keyboard module: bit 7 and bit 6
/// of port B.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyboardControl {
    pub enable_clear: bool,
    /// True when the clock line is released (port B bit 6 set).
    pub clock_line: bool,
}

/// Side effects of a port B write, routed by the platform.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortBEffects {
    /// Speaker enable state changed: the frequency to publish (0 = off).
    pub speaker_frequency: Option<u32>,
    /// Keyboard control bits changed.
    pub keyboard_control: Option<KeyboardControl>,
}

/// 8255 state.
#[derive(Debug, Clone)]
pub struct Ppi {
    /// Last scancode delivered by the keyboard module.
    port_a_latch: u8,
    port_b: u8,
    /// Channel-2 frequency last reported by the timer.
    speaker_frequency_from_pit: u32,
    switches: PpiSwitches,
}

impl Ppi {
    /// Power-on state: keyboard clock released, latch enabled.
    pub fn new(switches: PpiSwitches) -> Self {
        Self {
            port_a_latch: 0,
            port_b: port_b::KEYBOARD_CLOCK,
            speaker_frequency_from_pit: 0,
            switches,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.switches);
    }

    /// Both the timer gate and the data bit must be high for output.
    pub fn speaker_enabled(&self) -> bool {
        self.port_b & port_b::TIMER2_GATE != 0 && self.port_b & port_b::SPEAKER_DATA != 0
    }

    pub fn keyboard_control(&self) -> KeyboardControl {
        KeyboardControl {
            enable_clear: self.port_b & port_b::KEYBOARD_ENABLE_CLEAR != 0,
            clock_line: self.port_b & port_b::KEYBOARD_CLOCK != 0,
        }
    }

    /// Latch a scancode for the next port A read.
    pub fn set_scancode(&mut self, scancode: u8) {
        self.port_a_latch = scancode;
    }

    /// Synthesised DIP switch byte for port C. Bits above the defined
    /// nibble read high.
    fn dip_switches(&self) -> u8 {
        let mut value = 0xF0;
        if self.port_b & port_b::DIP_SWITCH_SELECT == 0 {
            // SW1-4: IPL drive present, FPU, memory banks.
            value |= (self.switches.floppy_drives > 0) as u8;
            value |= (self.switches.fpu_installed as u8) << 1;
            value |= (self.switches.memory_banks_encoding() & 0x03) << 2;
        } else {
            // SW5-8: display switches, drive count minus one.
            value |= self.switches.display_switches & 0x03;
            value |= ((self.switches.floppy_drives_clamped() - 1) & 0x03) << 2;
        }
        value
    }

    pub fn read_port(&mut self, port: u16) -> u8 {
        match port {
            ports::PORT_A => self.port_a_latch,
            ports::PORT_B => self.port_b,
            ports::PORT_C => self.dip_switches(),
            _ => 0xFF,
        }
    }

    /// Handle a write. Only port B has writable state; the control word
    /// is accepted and ignored (the BIOS always programs Mode 0), and
    /// writes to the input ports A and C are discarded.
    pub fn write_port(&mut self, port: u16, value: u8) -> PortBEffects {
        let mut effects = PortBEffects::default();
        match port {
            ports::PORT_B => {
                let old_speaker = self.speaker_enabled();
                let old_keyboard = self.keyboard_control();
                self.port_b = value;

                // Bit 7 high clears the scancode latch.
                if value & port_b::KEYBOARD_ENABLE_CLEAR != 0 {
                    self.port_a_latch = 0;
                }

                if self.speaker_enabled() != old_speaker {
                    effects.speaker_frequency = Some(if self.speaker_enabled() {
                        self.speaker_frequency_from_pit
                    } else {
                        0
                    });
                }

                let keyboard = self.keyboard_control();
                if keyboard != old_keyboard {
                    effects.keyboard_control = Some(keyboard);
                }
            }
            ports::CONTROL => {}
            _ => {
                log::trace!("ppi: write to input port {port:#04x} ignored");
            }
        }
        effects
    }

    /// Record the channel-2 frequency reported by the timer. Returns the
    /// frequency to publish when the speaker is enabled and it changed.
    pub fn set_speaker_frequency_from_pit(&mut self, frequency_hz: u32) -> Option<u32> {
        let old = self.speaker_frequency_from_pit;
        self.speaker_frequency_from_pit = frequency_hz;
        if self.speaker_enabled() && frequency_hz != old {
            Some(frequency_hz)
        } else {
            None
        }
    }
}
