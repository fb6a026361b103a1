//! Machine orchestrator
//!
//! Owns the CPU, the peripherals and the BIOS service layer, routes
//! memory and port traffic between them, and distributes the clock ticks
//! the host pumps in. The host drives everything: instruction cycles,
//! PIT ticks at 1.193182 MHz (or a divided approximation), keyboard
//! millisecond ticks and frame rendering all happen on its schedule.

use crate::bios::{Bios, BiosConfig};
use crate::bus::{Bus, DmaDevice, MemoryBus, PixelSink, SpeakerSink, VramBus};
use crate::cpu::{Cpu, ExecuteError, ExecuteOutcome};
use crate::peripherals::{DmaController, Keyboard, Pic, Pit, Ppi, PpiSwitches};
use crate::video::{Mda, MdaPalette, MDA_VRAM_SIZE};

/// Display adapter selection, as reported on the DIP switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// MDA 80x25 text. The only adapter the core renders.
    Monochrome80x25,
    /// CGA 80x25 switch setting, reported but not rendered.
    Color80x25,
    /// CGA 40x25 switch setting, reported but not rendered.
    Color40x25,
}

impl DisplayMode {
    /// SW5-6 encoding, also used in the equipment word.
    pub(crate) fn equipment_bits(self) -> u8 {
        match self {
            DisplayMode::Monochrome80x25 => 0b11,
            DisplayMode::Color80x25 => 0b10,
            DisplayMode::Color40x25 => 0b01,
        }
    }
}

/// Static machine configuration supplied by the host.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Conventional memory size in KiB, 1-640.
    pub memory_kib: u32,
    /// Number of floppy drives, 1-4.
    pub floppy_drives: u8,
    pub fpu_installed: bool,
    pub display: DisplayMode,
    /// BIOS ROM image, mapped so its last byte lands at 0xFFFFF.
    pub bios_rom: Vec<u8>,
    pub palette: MdaPalette,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            memory_kib: 640,
            floppy_drives: 1,
            fpu_installed: false,
            display: DisplayMode::Monochrome80x25,
            bios_rom: Vec::new(),
            palette: MdaPalette::default(),
        }
    }
}

/// Start of the MDA VRAM window; mirrored through 0xB7FFF.
const VRAM_WINDOW_START: u32 = 0xB0000;
const VRAM_WINDOW_END: u32 = 0xB8000;

/// Result of one instruction cycle at the machine level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// An instruction (or a BIOS service standing in for one) completed.
    Completed,
    /// The CPU is halted waiting for an interrupt; keep pumping ticks.
    Halted,
}

/// Everything on the far side of the CPU pins: peripherals, the host
/// memory callbacks and the ROM image.
pub struct SystemBus {
    memory: Box<dyn MemoryBus>,
    vram: Box<dyn VramBus>,
    speaker: Option<Box<dyn SpeakerSink>>,
    pub dma: DmaController,
    pub pit: Pit,
    pub ppi: Ppi,
    pub pic: Pic,
    pub keyboard: Keyboard,
    pub mda: Mda,
    /// First address beyond conventional RAM.
    memory_limit: u32,
    bios_rom: Vec<u8>,
    rom_base: u32,
}

impl SystemBus {
    fn publish_speaker(&mut self, frequency_hz: u32) {
        if let Some(speaker) = self.speaker.as_mut() {
            speaker.set_frequency(frequency_hz);
        }
    }
}

impl Bus for SystemBus {
    fn read_byte(&mut self, addr: u32) -> u8 {
        let addr = addr & 0xF_FFFF;
        if addr < self.memory_limit {
            self.memory.read(addr)
        } else if (VRAM_WINDOW_START..VRAM_WINDOW_END).contains(&addr) {
            self.vram.read((addr - VRAM_WINDOW_START) & (MDA_VRAM_SIZE - 1))
        } else if addr >= self.rom_base {
            self.bios_rom[(addr - self.rom_base) as usize]
        } else {
            0xFF
        }
    }

    fn write_byte(&mut self, addr: u32, value: u8) {
        let addr = addr & 0xF_FFFF;
        if addr < self.memory_limit {
            self.memory.write(addr, value);
        } else if (VRAM_WINDOW_START..VRAM_WINDOW_END).contains(&addr) {
            self.vram
                .write((addr - VRAM_WINDOW_START) & (MDA_VRAM_SIZE - 1), value);
        }
        // ROM and unmapped writes are discarded.
    }

    fn read_port(&mut self, port: u16) -> u8 {
        match port {
            0x00..=0x0F => self.dma.read_port(port),
            0x20..=0x21 => self.pic.read_port(port),
            0x40..=0x43 => self.pit.read_port(port),
            0x60..=0x63 => self.ppi.read_port(port),
            0x81 | 0x82 | 0x83 | 0x87 => self.dma.read_port(port),
            0x3B0..=0x3BF => self.mda.read_port(port),
            _ => {
                log::trace!("undefined port {port:#05x} read");
                0xFF
            }
        }
    }

    fn write_port(&mut self, port: u16, value: u8) {
        match port {
            0x00..=0x0F => self.dma.write_port(port, value),
            0x20..=0x21 => self.pic.write_port(port, value),
            0x40..=0x43 => {
                // A completed channel-2 load reports its frequency to the
                // 8255, which decides whether the speaker hears it.
                if let Some(hz) = self.pit.write_port(port, value) {
                    if let Some(published) = self.ppi.set_speaker_frequency_from_pit(hz) {
                        self.publish_speaker(published);
                    }
                }
            }
            0x60..=0x63 => {
                let effects = self.ppi.write_port(port, value);
                if let Some(hz) = effects.speaker_frequency {
                    self.publish_speaker(hz);
                }
                if let Some(control) = effects.keyboard_control {
                    self.keyboard
                        .handle_control(control.enable_clear, control.clock_line);
                }
            }
            0x81 | 0x82 | 0x83 | 0x87 => self.dma.write_port(port, value),
            0x3B0..=0x3BF => self.mda.write_port(port, value),
            _ => {
                log::trace!("undefined port {port:#05x} write {value:#04x} discarded");
            }
        }
    }
}

/// A complete XT-class machine.
pub struct Machine {
    cpu: Cpu,
    bus: SystemBus,
    bios: Bios,
}

impl Machine {
    /// Build a machine around host-owned memory and VRAM. The CPU comes
    /// up at the reset vector with interrupts disabled, the BDA is
    /// populated and the text buffer cleared.
    pub fn new(config: MachineConfig, memory: Box<dyn MemoryBus>, vram: Box<dyn VramBus>) -> Self {
        let memory_kib = config.memory_kib.clamp(1, 640);
        let rom_base = 0x100000 - config.bios_rom.len().min(0x10000) as u32;

        let mut bus = SystemBus {
            memory,
            vram,
            speaker: None,
            dma: DmaController::new(),
            pit: Pit::new(),
            ppi: Ppi::new(PpiSwitches {
                memory_kib,
                floppy_drives: config.floppy_drives,
                fpu_installed: config.fpu_installed,
                display_switches: config.display.equipment_bits(),
            }),
            pic: Pic::new(),
            keyboard: Keyboard::new(),
            mda: Mda::new(config.palette),
            memory_limit: memory_kib * 1024,
            bios_rom: config.bios_rom,
            rom_base,
        };

        let bios = Bios::new(BiosConfig {
            memory_kib,
            floppy_drives: config.floppy_drives,
            fpu_installed: config.fpu_installed,
            display: config.display,
        });
        bios.setup(&mut bus);
        bus.mda.init_vram(&mut *bus.vram);

        Self {
            cpu: Cpu::new(),
            bus,
            bios,
        }
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn bus(&self) -> &SystemBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut SystemBus {
        &mut self.bus
    }

    /// Attach the PC speaker output.
    pub fn set_speaker_sink(&mut self, speaker: Box<dyn SpeakerSink>) {
        self.bus.speaker = Some(speaker);
    }

    /// Execute one instruction.
    ///
    /// Pending interrupt-controller requests are offered to the CPU at
    /// the instruction boundary; interrupts whose vectors are empty fall
    /// through to the BIOS service layer. Only an undecodable opcode is
    /// fatal.
    pub fn run_instruction_cycle(&mut self) -> Result<CycleOutcome, ExecuteError> {
        if self.cpu.pending_interrupt.is_none()
            && self.cpu.flags.contains(crate::cpu::Flags::INTERRUPT)
        {
            if let Some(vector) = self.bus.pic.acknowledge() {
                self.cpu.pending_interrupt = Some(vector);
            }
        }

        match self.cpu.step(&mut self.bus)? {
            ExecuteOutcome::Success => Ok(CycleOutcome::Completed),
            ExecuteOutcome::Halted => Ok(CycleOutcome::Halted),
            ExecuteOutcome::UnhandledInterrupt(vector) => {
                if !self
                    .bios
                    .handle_interrupt(&mut self.cpu, &mut self.bus, vector)
                {
                    log::warn!("interrupt {vector:#04x} has no vector and no service");
                }
                Ok(CycleOutcome::Completed)
            }
        }
    }

    /// One 1.193182 MHz input clock to the interval timer.
    pub fn tick_pit(&mut self) {
        if self.bus.pit.tick().irq0_edge {
            self.bus.pic.raise_irq(0);
        }
    }

    /// One millisecond of keyboard time. A delivered scancode lands in
    /// the 8255 port A latch and raises IRQ 1.
    pub fn tick_keyboard_ms(&mut self) {
        if let Some(scancode) = self.bus.keyboard.tick_ms() {
            self.bus.ppi.set_scancode(scancode);
            self.bus.pic.raise_irq(1);
        }
    }

    /// Queue a make code from the host.
    pub fn key_press(&mut self, scancode: u8) {
        self.bus.keyboard.handle_key_press(scancode);
    }

    /// Queue the break code for a make code.
    pub fn key_release(&mut self, scancode: u8) {
        self.bus.keyboard.handle_key_press(scancode | 0x80);
    }

    /// One atomic DMA byte transfer on a channel. No CPU instruction
    /// overlaps it; the device sees the same host memory the CPU does.
    pub fn transfer_dma_byte(&mut self, channel: usize, device: &mut dyn DmaDevice) {
        let SystemBus { dma, memory, .. } = &mut self.bus;
        dma.transfer_byte(channel, device, &mut **memory);
    }

    /// Render a full MDA frame through the pixel sink.
    pub fn render(&mut self, out: &mut dyn PixelSink) {
        let SystemBus { mda, vram, .. } = &mut self.bus;
        mda.render(&mut **vram, out);
    }
}
