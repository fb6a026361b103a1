//! Intel 8237 DMA controller
//!
//! Four-channel byte transfer engine as wired in the IBM PC/XT, with the
//! external 74LS670 page registers supplying bits 16-19 of the transfer
//! address. Standard channel assignments:
//! - Channel 0: DRAM refresh (not modelled)
//! - Channel 1: unused / expansion
//! - Channel 2: floppy disk controller
//! - Channel 3: hard disk controller
//!
//! Only single-cycle transfers with fixed priority are implemented;
//! demand/block/cascade modes and memory-to-memory transfers are not.

use crate::bus::{DmaDevice, MemoryBus};

/// I/O ports decoded by the controller and its page registers.
pub mod ports {
    /// Channel 0-3 base/current address (even) and count (odd).
    pub const CHANNEL0_ADDRESS: u16 = 0x00;
    pub const CHANNEL0_COUNT: u16 = 0x01;
    pub const CHANNEL1_ADDRESS: u16 = 0x02;
    pub const CHANNEL1_COUNT: u16 = 0x03;
    pub const CHANNEL2_ADDRESS: u16 = 0x04;
    pub const CHANNEL2_COUNT: u16 = 0x05;
    pub const CHANNEL3_ADDRESS: u16 = 0x06;
    pub const CHANNEL3_COUNT: u16 = 0x07;
    /// Read: status register / write: command register.
    pub const COMMAND_STATUS: u16 = 0x08;
    /// Write: request register.
    pub const REQUEST: u16 = 0x09;
    /// Write: set/clear a single channel's mask bit.
    pub const SINGLE_MASK: u16 = 0x0A;
    /// Write: mode register.
    pub const MODE: u16 = 0x0B;
    /// Write: clear the byte-pointer flip-flop.
    pub const FLIP_FLOP_RESET: u16 = 0x0C;
    /// Write: master reset.
    pub const MASTER_RESET: u16 = 0x0D;
    /// Write: all four mask bits at once.
    pub const ALL_MASK: u16 = 0x0F;

    /// Page registers for channels 2, 3, 1, 0 respectively.
    pub const PAGE_CHANNEL2: u16 = 0x81;
    pub const PAGE_CHANNEL3: u16 = 0x82;
    pub const PAGE_CHANNEL1: u16 = 0x83;
    pub const PAGE_CHANNEL0: u16 = 0x87;
}

/// Mode register bits (port 0x0B).
pub mod mode {
    /// Transfer type field (bits 2-3).
    pub const TRANSFER_TYPE: u8 = 0x0C;
    /// Verify transfer: no data moves.
    pub const TRANSFER_VERIFY: u8 = 0x00;
    /// Write to memory (device -> memory).
    pub const TRANSFER_WRITE: u8 = 0x04;
    /// Read from memory (memory -> device).
    pub const TRANSFER_READ: u8 = 0x08;
    /// Reload base address/count at terminal count.
    pub const AUTO_INITIALIZE: u8 = 0x10;
    /// Decrement the address instead of incrementing.
    pub const ADDRESS_DECREMENT: u8 = 0x20;
}

/// Command register bit 2 disables the whole controller.
const COMMAND_CONTROLLER_DISABLE: u8 = 0x04;

pub const NUM_CHANNELS: usize = 4;

/// Which byte of a 16-bit register the next port access targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FlipFlop {
    #[default]
    Lsb,
    Msb,
}

/// Per-channel register state.
#[derive(Debug, Clone, Copy, Default)]
pub struct DmaChannel {
    pub base_address: u16,
    pub current_address: u16,
    pub base_count: u16,
    pub current_count: u16,
    pub mode: u8,
    /// High four bits of the 20-bit transfer address.
    pub page: u8,
}

/// 8237 controller state.
#[derive(Debug, Clone, Default)]
pub struct DmaController {
    pub channels: [DmaChannel; NUM_CHANNELS],
    command: u8,
    /// Bits 0-3 latch terminal count per channel; cleared on read.
    status: u8,
    request: u8,
    /// Bits 0-3; a set bit inhibits transfers on that channel.
    mask: u8,
    /// Single LSB/MSB flip-flop shared by all 16-bit register accesses.
    flip_flop: FlipFlop,
}

impl DmaController {
    /// Power-on state: all channels masked.
    pub fn new() -> Self {
        Self {
            mask: 0x0F,
            ..Default::default()
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Current mask bits (tests and the platform observe these).
    pub fn mask_register(&self) -> u8 {
        self.mask
    }

    /// Current TC latches without the read-clear side effect.
    pub fn status_register(&self) -> u8 {
        self.status
    }

    fn read_register_byte(&mut self, value: u16) -> u8 {
        match self.flip_flop {
            FlipFlop::Lsb => {
                self.flip_flop = FlipFlop::Msb;
                value as u8
            }
            FlipFlop::Msb => {
                self.flip_flop = FlipFlop::Lsb;
                (value >> 8) as u8
            }
        }
    }

    /// Writes land in the base register; the current register mirrors it.
    fn write_register_byte(base: &mut u16, current: &mut u16, flip_flop: &mut FlipFlop, value: u8) {
        match *flip_flop {
            FlipFlop::Lsb => {
                *base = (*base & 0xFF00) | value as u16;
                *flip_flop = FlipFlop::Msb;
            }
            FlipFlop::Msb => {
                *base = (*base & 0x00FF) | ((value as u16) << 8);
                *flip_flop = FlipFlop::Lsb;
            }
        }
        *current = *base;
    }

    pub fn read_port(&mut self, port: u16) -> u8 {
        match port {
            ports::CHANNEL0_ADDRESS..=ports::CHANNEL3_COUNT => {
                let channel = &self.channels[port as usize / 2];
                let value = if port % 2 == 1 {
                    channel.current_count
                } else {
                    channel.current_address
                };
                self.read_register_byte(value)
            }
            ports::COMMAND_STATUS => {
                let status = self.status;
                // Reading status clears the TC latches.
                self.status = 0;
                status
            }
            // All other ports are write-only or unused for reads.
            _ => 0xFF,
        }
    }

    pub fn write_port(&mut self, port: u16, value: u8) {
        match port {
            ports::CHANNEL0_ADDRESS..=ports::CHANNEL3_COUNT => {
                let flip_flop = &mut self.flip_flop;
                let channel = &mut self.channels[port as usize / 2];
                if port % 2 == 1 {
                    Self::write_register_byte(
                        &mut channel.base_count,
                        &mut channel.current_count,
                        flip_flop,
                        value,
                    );
                } else {
                    Self::write_register_byte(
                        &mut channel.base_address,
                        &mut channel.current_address,
                        flip_flop,
                        value,
                    );
                }
            }
            ports::COMMAND_STATUS => self.command = value,
            ports::REQUEST => self.request = value,
            ports::SINGLE_MASK => {
                let channel = value as usize & 0x03;
                if value & 0x04 != 0 {
                    self.mask |= 1 << channel;
                } else {
                    self.mask &= !(1 << channel);
                }
            }
            ports::MODE => {
                let channel = value as usize & 0x03;
                self.channels[channel].mode = value;
            }
            ports::FLIP_FLOP_RESET => self.flip_flop = FlipFlop::Lsb,
            ports::MASTER_RESET => self.reset(),
            ports::ALL_MASK => self.mask = value & 0x0F,
            ports::PAGE_CHANNEL0 => self.channels[0].page = value,
            ports::PAGE_CHANNEL1 => self.channels[1].page = value,
            ports::PAGE_CHANNEL2 => self.channels[2].page = value,
            ports::PAGE_CHANNEL3 => self.channels[3].page = value,
            _ => {
                log::trace!("dma: write to unused port {port:#04x} ignored");
            }
        }
    }

    /// Perform one byte transfer on a channel.
    ///
    /// No-op while the controller is disabled or the channel is masked.
    /// At terminal count the channel's TC bit latches into status, then
    /// the channel either reloads from its base registers (auto-init) or
    /// masks itself off.
    pub fn transfer_byte(
        &mut self,
        channel_index: usize,
        device: &mut dyn DmaDevice,
        memory: &mut dyn MemoryBus,
    ) {
        if channel_index >= NUM_CHANNELS {
            return;
        }
        if self.command & COMMAND_CONTROLLER_DISABLE != 0 {
            return;
        }
        if self.mask & (1 << channel_index) != 0 {
            return;
        }

        let channel = &mut self.channels[channel_index];
        let address = ((channel.page as u32) << 16) | channel.current_address as u32;

        match channel.mode & mode::TRANSFER_TYPE {
            mode::TRANSFER_VERIFY => {}
            mode::TRANSFER_WRITE => {
                let data = device.read(channel_index);
                memory.write(address, data);
            }
            mode::TRANSFER_READ => {
                let data = memory.read(address);
                device.write(channel_index, data);
            }
            _ => {
                // Reserved transfer type: address/count still update.
            }
        }

        if channel.mode & mode::ADDRESS_DECREMENT != 0 {
            channel.current_address = channel.current_address.wrapping_sub(1);
        } else {
            channel.current_address = channel.current_address.wrapping_add(1);
        }

        channel.current_count = channel.current_count.wrapping_sub(1);
        if channel.current_count == 0xFFFF {
            self.status |= 1 << channel_index;
            if channel.mode & mode::AUTO_INITIALIZE != 0 {
                channel.current_address = channel.base_address;
                channel.current_count = channel.base_count;
            } else {
                self.mask |= 1 << channel_index;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Device stub: reads always produce `from_device`, writes are kept.
    struct TestDevice {
        from_device: u8,
        to_device: Vec<u8>,
    }

    impl DmaDevice for TestDevice {
        fn read(&mut self, _channel: usize) -> u8 {
            self.from_device
        }
        fn write(&mut self, _channel: usize, value: u8) {
            self.to_device.push(value);
        }
    }

    struct TestMemory {
        bytes: Vec<u8>,
    }

    impl MemoryBus for TestMemory {
        fn read(&mut self, addr: u32) -> u8 {
            self.bytes[addr as usize]
        }
        fn write(&mut self, addr: u32, value: u8) {
            self.bytes[addr as usize] = value;
        }
    }

    fn test_memory() -> TestMemory {
        TestMemory { bytes: vec![0; 0x100000] }
    }

    /// Program channel 2: page 0x01, address 0x1234, the given count and
    /// mode bits, then unmask it.
    fn setup_channel2(dma: &mut DmaController, mode_bits: u8, count: u16) {
        dma.write_port(ports::MODE, 0x02 | mode_bits);
        dma.write_port(ports::PAGE_CHANNEL2, 0x01);
        dma.write_port(ports::CHANNEL2_ADDRESS, 0x34);
        dma.write_port(ports::CHANNEL2_ADDRESS, 0x12);
        dma.write_port(ports::CHANNEL2_COUNT, ((count - 1) & 0xFF) as u8);
        dma.write_port(ports::CHANNEL2_COUNT, ((count - 1) >> 8) as u8);
        dma.write_port(ports::SINGLE_MASK, 0x02);
    }

    #[test]
    fn test_initial_state() {
        let mut dma = DmaController::new();
        // All channels masked on power-on, status clear, flip-flop at LSB.
        assert_eq!(dma.mask_register(), 0x0F);
        assert_eq!(dma.status_register(), 0x00);
        assert_eq!(dma.read_port(ports::CHANNEL0_ADDRESS), 0x00);
        assert_eq!(dma.flip_flop, FlipFlop::Msb); // the read consumed LSB
    }

    #[test]
    fn test_register_write_read_round_trip() {
        let mut dma = DmaController::new();

        dma.write_port(ports::CHANNEL2_ADDRESS, 0x34);
        dma.write_port(ports::CHANNEL2_ADDRESS, 0x12);

        dma.write_port(ports::FLIP_FLOP_RESET, 0);
        assert_eq!(dma.read_port(ports::CHANNEL2_ADDRESS), 0x34);
        assert_eq!(dma.read_port(ports::CHANNEL2_ADDRESS), 0x12);

        dma.write_port(ports::CHANNEL3_COUNT, 0x78);
        dma.write_port(ports::CHANNEL3_COUNT, 0x56);
        dma.write_port(ports::FLIP_FLOP_RESET, 0);
        assert_eq!(dma.read_port(ports::CHANNEL3_COUNT), 0x78);
        assert_eq!(dma.read_port(ports::CHANNEL3_COUNT), 0x56);
    }

    #[test]
    fn test_single_mask_register() {
        let mut dma = DmaController::new();
        assert_eq!(dma.mask_register(), 0x0F);

        dma.write_port(ports::SINGLE_MASK, 0x02); // clear channel 2
        assert_eq!(dma.mask_register(), 0b1011);

        dma.write_port(ports::SINGLE_MASK, 0x02 | 0x04); // set channel 2
        assert_eq!(dma.mask_register(), 0b1111);

        dma.write_port(ports::ALL_MASK, 0b0101);
        assert_eq!(dma.mask_register(), 0b0101);
    }

    #[test]
    fn test_mode_register_selects_channel() {
        let mut dma = DmaController::new();
        let mode = 0x01 | mode::TRANSFER_READ | mode::AUTO_INITIALIZE | 0x40;
        dma.write_port(ports::MODE, mode);
        assert_eq!(dma.channels[1].mode, mode);
    }

    #[test]
    fn test_status_read_clears_tc_latches() {
        let mut dma = DmaController::new();
        dma.status = 1 << 2;
        assert_eq!(dma.read_port(ports::COMMAND_STATUS), 1 << 2);
        assert_eq!(dma.status_register(), 0x00);
    }

    #[test]
    fn test_master_reset() {
        let mut dma = DmaController::new();
        dma.write_port(ports::ALL_MASK, 0x05);
        dma.write_port(ports::COMMAND_STATUS, 0xFF);

        dma.write_port(ports::MASTER_RESET, 0);
        assert_eq!(dma.mask_register(), 0x0F);
        assert_eq!(dma.command, 0x00);
        assert_eq!(dma.flip_flop, FlipFlop::Lsb);
    }

    #[test]
    fn test_memory_write_transfer() {
        let mut dma = DmaController::new();
        let mut memory = test_memory();
        let mut device = TestDevice { from_device: 0xAB, to_device: Vec::new() };

        setup_channel2(&mut dma, mode::TRANSFER_WRITE, 1);
        dma.transfer_byte(2, &mut device, &mut memory);

        // Page 0x01 | address 0x1234.
        assert_eq!(memory.bytes[0x011234], 0xAB);
        assert_eq!(dma.status_register(), 1 << 2);
        // No auto-init: the channel masked itself.
        assert_eq!(dma.mask_register() & (1 << 2), 1 << 2);
    }

    #[test]
    fn test_memory_read_transfer() {
        let mut dma = DmaController::new();
        let mut memory = test_memory();
        memory.bytes[0x011234] = 0xCD;
        let mut device = TestDevice { from_device: 0, to_device: Vec::new() };

        setup_channel2(&mut dma, mode::TRANSFER_READ, 1);
        dma.transfer_byte(2, &mut device, &mut memory);

        assert_eq!(device.to_device, vec![0xCD]);
    }

    #[test]
    fn test_verify_transfer_moves_no_data() {
        let mut dma = DmaController::new();
        let mut memory = test_memory();
        let mut device = TestDevice { from_device: 0xAB, to_device: Vec::new() };

        setup_channel2(&mut dma, mode::TRANSFER_VERIFY, 2);
        dma.transfer_byte(2, &mut device, &mut memory);

        assert_eq!(memory.bytes[0x011234], 0x00);
        assert!(device.to_device.is_empty());
        // Address and count still update.
        assert_eq!(dma.channels[2].current_address, 0x1235);
        assert_eq!(dma.channels[2].current_count, 0);
    }

    #[test]
    fn test_address_decrement() {
        let mut dma = DmaController::new();
        let mut memory = test_memory();
        let mut device = TestDevice { from_device: 0xAB, to_device: Vec::new() };

        setup_channel2(
            &mut dma,
            mode::TRANSFER_WRITE | mode::ADDRESS_DECREMENT,
            2,
        );
        dma.transfer_byte(2, &mut device, &mut memory);

        assert_eq!(dma.channels[2].current_address, 0x1233);
    }

    #[test]
    fn test_auto_initialize() {
        let mut dma = DmaController::new();
        let mut memory = test_memory();
        let mut device = TestDevice { from_device: 0xAB, to_device: Vec::new() };

        setup_channel2(
            &mut dma,
            mode::TRANSFER_WRITE | mode::AUTO_INITIALIZE,
            1,
        );
        dma.transfer_byte(2, &mut device, &mut memory);

        assert_eq!(dma.status_register(), 1 << 2);
        // Auto-init keeps the channel unmasked and reloads base values.
        assert_eq!(dma.mask_register() & (1 << 2), 0);
        assert_eq!(dma.channels[2].current_address, dma.channels[2].base_address);
        assert_eq!(dma.channels[2].current_count, dma.channels[2].base_count);
    }

    #[test]
    fn test_masked_channel_blocks_transfer() {
        let mut dma = DmaController::new();
        let mut memory = test_memory();
        let mut device = TestDevice { from_device: 0xAB, to_device: Vec::new() };

        setup_channel2(&mut dma, mode::TRANSFER_WRITE, 1);
        dma.write_port(ports::SINGLE_MASK, 0x02 | 0x04); // re-mask
        dma.transfer_byte(2, &mut device, &mut memory);

        assert_eq!(memory.bytes[0x011234], 0x00);
    }

    #[test]
    fn test_disabled_controller_blocks_transfer() {
        let mut dma = DmaController::new();
        let mut memory = test_memory();
        let mut device = TestDevice { from_device: 0xAB, to_device: Vec::new() };

        setup_channel2(&mut dma, mode::TRANSFER_WRITE, 1);
        dma.write_port(ports::COMMAND_STATUS, COMMAND_CONTROLLER_DISABLE);
        dma.transfer_byte(2, &mut device, &mut memory);

        assert_eq!(memory.bytes[0x011234], 0x00);
    }

    #[test]
    fn test_multi_byte_transfer_counts_down() {
        let mut dma = DmaController::new();
        let mut memory = test_memory();
        let mut device = TestDevice { from_device: 0x5A, to_device: Vec::new() };

        setup_channel2(&mut dma, mode::TRANSFER_WRITE, 3);
        for _ in 0..3 {
            dma.transfer_byte(2, &mut device, &mut memory);
        }

        assert_eq!(memory.bytes[0x011234], 0x5A);
        assert_eq!(memory.bytes[0x011235], 0x5A);
        assert_eq!(memory.bytes[0x011236], 0x5A);
        assert_eq!(dma.status_register(), 1 << 2);

        // A fourth call is blocked by the self-mask.
        dma.transfer_byte(2, &mut device, &mut memory);
        assert_eq!(memory.bytes[0x011237], 0x00);
    }
}
