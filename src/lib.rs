//! IBM PC/XT Emulator Core
//!
//! This crate provides a platform-agnostic emulator core for an XT-class
//! machine: an Intel 8086 CPU in real mode plus the small set of support
//! chips an XT BIOS expects to find. No OS APIs are used - all I/O crosses
//! the crate boundary through caller-supplied traits.
//!
//! # Architecture
//!
//! The emulator is organized into several modules:
//! - `cpu`: 8086 CPU implementation (fetch, decode, execute, interrupts)
//! - `bus`: address decoding and host memory/port access traits
//! - `peripherals`: 8237 DMA, 8253 PIT, 8255 PPI, 8259 PIC, XT keyboard
//! - `video`: MDA text-mode rasteriser
//! - `bios`: high-level BIOS interrupt services and BIOS data area
//! - `machine`: top-level orchestrator wiring the above together
//!
//! # Memory Map (20-bit physical address space)
//!
//! | Address Range     | Region                         |
//! |-------------------|--------------------------------|
//! | 0x00000 - 0x9FFFF | Conventional RAM (max 640 KiB) |
//! | 0xB0000 - 0xB7FFF | MDA VRAM (4 KiB, mirrored)     |
//! | 0xF0000 - 0xFFFFF | BIOS ROM                       |
//!
//! # Port Map
//!
//! | Ports         | Device                              |
//! |---------------|-------------------------------------|
//! | 0x00 - 0x0F   | 8237 DMA controller                 |
//! | 0x20 - 0x21   | 8259 interrupt controller (partial) |
//! | 0x40 - 0x43   | 8253 interval timer                 |
//! | 0x60 - 0x63   | 8255 peripheral interface           |
//! | 0x81/82/83/87 | DMA page registers                  |
//! | 0x3B0 - 0x3BF | MDA CRTC index/data, control/status |
//!
//! The host drives the core: it calls `Machine::run_instruction_cycle` in
//! a loop of its own choosing, pumps `Machine::tick_pit` at 1.193182 MHz
//! (or a divided approximation such as one PIT tick per four instructions),
//! calls `Machine::tick_keyboard_ms` roughly every millisecond, and pulls
//! frames out with `Machine::render`. The core never blocks and never
//! suspends inside an instruction.

pub mod bios;
pub mod bus;
pub mod cpu;
pub mod machine;
pub mod peripherals;
pub mod video;

pub use bus::{Bus, DmaDevice, MemoryBus, PixelSink, SpeakerSink, VramBus};
pub use cpu::{Cpu, ExecuteError, ExecuteOutcome};
pub use machine::{CycleOutcome, DisplayMode, Machine, MachineConfig};
pub use video::{MdaPalette, Rgb};
