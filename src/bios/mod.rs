//! High-level BIOS interrupt services
//!
//! The CPU reports a software or hardware interrupt whose vector table
//! entry is empty as an unhandled interrupt; the machine hands those to
//! this module instead of executing ROM code. Services operate directly
//! on CPU registers and on the BIOS data area at segment 0x40, exactly
//! as their ROM counterparts would, then return to the caller without an
//! interrupt frame.
//!
//! Implemented vectors:
//! - INT 08h: timer tick (IRQ 0) - advances the BDA tick count
//! - INT 09h: keyboard (IRQ 1) - scancode translation into the BDA ring
//! - INT 10h: video services (`video` module)
//! - INT 11h: equipment word
//! - INT 12h: conventional memory size
//! - INT 16h: keyboard services (`keyboard` module)
//! - INT 1Ah: time of day
//!
//! Disk (13h), serial (14h) and printer (17h) probes fail cleanly with
//! the carry flag set; those devices are host-side collaborators.

pub mod keyboard;
pub mod video;

use crate::bus::Bus;
use crate::cpu::{Cpu, Flags, Register};
use crate::machine::DisplayMode;

/// BIOS data area layout (physical addresses).
pub(crate) mod bda {
    /// Equipment word.
    pub const EQUIPMENT: u32 = 0x410;
    /// Conventional memory size in KiB.
    pub const MEMORY_KIB: u32 = 0x413;
    /// Keyboard shift flags.
    pub const SHIFT_FLAGS: u32 = 0x417;
    /// Keyboard ring head/tail, stored as offsets from segment 0x40.
    pub const KEYBOARD_HEAD: u32 = 0x41A;
    pub const KEYBOARD_TAIL: u32 = 0x41C;
    /// Keyboard ring storage, 16 two-byte slots.
    pub const KEYBOARD_BUFFER: u16 = 0x1E;
    pub const KEYBOARD_BUFFER_END: u16 = 0x3E;
    /// Current video mode number.
    pub const VIDEO_MODE: u32 = 0x449;
    /// Text columns.
    pub const VIDEO_COLUMNS: u32 = 0x44A;
    /// Cursor positions, one word per page (col, row).
    pub const CURSOR_POSITIONS: u32 = 0x450;
    /// Cursor shape (end scan line, start scan line).
    pub const CURSOR_SHAPE: u32 = 0x460;
    /// Active display page.
    pub const ACTIVE_PAGE: u32 = 0x462;
    /// CRTC base I/O port.
    pub const CRTC_BASE: u32 = 0x463;
    /// Timer tick count since midnight (dword).
    pub const TICK_COUNT: u32 = 0x46C;
    /// Set when the tick count wrapped past 24 hours.
    pub const TICK_ROLLOVER: u32 = 0x470;
    /// Set by the Ctrl-Break handler; zeroed at power-on.
    pub const BREAK_FLAG: u32 = 0x471;
}

/// Timer ticks in 24 hours (18.2 Hz).
const TICKS_PER_DAY: u32 = 0x1800B0;

/// Static machine facts the services report.
#[derive(Debug, Clone, Copy)]
pub struct BiosConfig {
    pub memory_kib: u32,
    pub floppy_drives: u8,
    pub fpu_installed: bool,
    pub display: DisplayMode,
}

/// BIOS service state. Everything mutable lives in the BDA; this struct
/// only carries the configuration.
#[derive(Debug, Clone)]
pub struct Bios {
    config: BiosConfig,
}

impl Bios {
    pub fn new(config: BiosConfig) -> Self {
        Self { config }
    }

    fn equipment_word(&self) -> u16 {
        let mut word = 0u16;
        if self.config.floppy_drives > 0 {
            word |= 0x0001; // IPL diskette installed
        }
        if self.config.fpu_installed {
            word |= 0x0002;
        }
        word |= 0x000C; // planar RAM size, always maximum
        word |= (self.config.display.equipment_bits() as u16) << 4;
        word |= ((self.config.floppy_drives.clamp(1, 4) - 1) as u16) << 6;
        word
    }

    /// Populate the BIOS data area with power-on values.
    pub fn setup(&self, bus: &mut impl Bus) {
        bus.write_word(bda::EQUIPMENT, self.equipment_word());
        bus.write_word(bda::MEMORY_KIB, self.config.memory_kib.min(640) as u16);
        bus.write_byte(bda::SHIFT_FLAGS, 0);
        bus.write_word(bda::KEYBOARD_HEAD, bda::KEYBOARD_BUFFER);
        bus.write_word(bda::KEYBOARD_TAIL, bda::KEYBOARD_BUFFER);
        bus.write_byte(bda::VIDEO_MODE, 0x07);
        bus.write_word(bda::VIDEO_COLUMNS, video::COLUMNS as u16);
        for page in 0..8 {
            bus.write_word(bda::CURSOR_POSITIONS + page * 2, 0);
        }
        // Default MDA cursor: scan lines 12-13.
        bus.write_word(bda::CURSOR_SHAPE, 0x0C0D);
        bus.write_byte(bda::ACTIVE_PAGE, 0);
        bus.write_word(bda::CRTC_BASE, 0x3B4);
        bus.write_word(bda::TICK_COUNT, 0);
        bus.write_word(bda::TICK_COUNT + 2, 0);
        bus.write_byte(bda::TICK_ROLLOVER, 0);
        bus.write_byte(bda::BREAK_FLAG, 0);
    }

    /// Dispatch an interrupt vector. Returns false when the vector has no
    /// service here.
    pub fn handle_interrupt(&mut self, cpu: &mut Cpu, bus: &mut impl Bus, vector: u8) -> bool {
        match vector {
            0x08 => self.timer_tick(bus),
            0x09 => self.keyboard_irq(bus),
            0x10 => self.video_service(cpu, bus),
            0x11 => {
                let word = bus.read_word(bda::EQUIPMENT);
                cpu.set_register(Register::Ax, word);
            }
            0x12 => {
                let word = bus.read_word(bda::MEMORY_KIB);
                cpu.set_register(Register::Ax, word);
            }
            0x13 | 0x14 | 0x17 => {
                // No disk, serial or printer hardware behind the core.
                log::debug!("bios: declined int {vector:#04x} ah={:#04x}", cpu.ah());
                cpu.set_ah(0x01);
                cpu.flags.insert(Flags::CARRY);
            }
            0x16 => self.keyboard_service(cpu, bus),
            0x1A => self.time_service(cpu, bus),
            _ => return false,
        }
        true
    }

    /// INT 08h: hardware timer tick.
    fn timer_tick(&mut self, bus: &mut impl Bus) {
        let low = bus.read_word(bda::TICK_COUNT) as u32;
        let high = bus.read_word(bda::TICK_COUNT + 2) as u32;
        let mut count = (high << 16) | low;
        count += 1;
        if count >= TICKS_PER_DAY {
            count = 0;
            bus.write_byte(bda::TICK_ROLLOVER, 1);
        }
        bus.write_word(bda::TICK_COUNT, count as u16);
        bus.write_word(bda::TICK_COUNT + 2, (count >> 16) as u16);
        bus.write_port(0x20, 0x20); // EOI
    }

    /// INT 1Ah: time of day.
    fn time_service(&mut self, cpu: &mut Cpu, bus: &mut impl Bus) {
        match cpu.ah() {
            0x00 => {
                let low = bus.read_word(bda::TICK_COUNT);
                let high = bus.read_word(bda::TICK_COUNT + 2);
                cpu.set_register(Register::Dx, low);
                cpu.set_register(Register::Cx, high);
                let rollover = bus.read_byte(bda::TICK_ROLLOVER);
                cpu.set_al(rollover);
                bus.write_byte(bda::TICK_ROLLOVER, 0);
            }
            0x01 => {
                let low = cpu.register(Register::Dx);
                let high = cpu.register(Register::Cx);
                bus.write_word(bda::TICK_COUNT, low);
                bus.write_word(bda::TICK_COUNT + 2, high);
                bus.write_byte(bda::TICK_ROLLOVER, 0);
            }
            service => {
                log::debug!("bios: int 1ah service {service:#04x} not implemented");
            }
        }
    }
}
