//! XT-class peripheral emulation
//!
//! This module contains the support chips behind the I/O port space:
//! - DMA controller, ports 0x00-0x0F plus page registers (8237)
//! - Interrupt controller, ports 0x20-0x21 (8259, partial)
//! - Interval timer, ports 0x40-0x43 (8253)
//! - Peripheral interface, ports 0x60-0x63 (8255)
//! - XT keyboard pipeline feeding the 8255 and IRQ 1
//!
//! Each chip exposes `read_port`/`write_port` over its own ports and a
//! tick entry point where the hardware has a clock. Port dispatch across
//! chips lives in the `machine` module.

pub mod dma;
pub mod keyboard;
pub mod pic;
pub mod pit;
pub mod ppi;

pub use dma::DmaController;
pub use keyboard::Keyboard;
pub use pic::Pic;
pub use pit::Pit;
pub use ppi::{Ppi, PpiSwitches};
