//! INT 10h video services
//!
//! Text-mode services over the MDA's VRAM window. Cursor state, the
//! current mode and the active page live in the BIOS data area; cell
//! data is read and written straight through the bus at the adapter's
//! memory-mapped window, so everything here is visible to software that
//! pokes VRAM directly.

use super::{bda, Bios};
use crate::bus::Bus;
use crate::cpu::{Cpu, Register};

pub(crate) const COLUMNS: u8 = 80;
pub(crate) const ROWS: u8 = 25;

/// Start of the MDA VRAM window in the physical address space.
const VRAM_BASE: u32 = 0xB0000;

/// Blank cell fill character.
const BLANK: u8 = b' ';

fn cell_address(row: u8, col: u8) -> u32 {
    VRAM_BASE + (row as u32 * COLUMNS as u32 + col as u32) * 2
}

impl Bios {
    fn active_page(&self, bus: &mut impl Bus) -> u8 {
        bus.read_byte(bda::ACTIVE_PAGE) & 0x07
    }

    fn cursor(&self, bus: &mut impl Bus, page: u8) -> (u8, u8) {
        let word = bus.read_word(bda::CURSOR_POSITIONS + (page as u32 & 0x07) * 2);
        ((word >> 8) as u8, word as u8)
    }

    fn set_cursor(&self, bus: &mut impl Bus, page: u8, row: u8, col: u8) {
        let word = ((row as u16) << 8) | col as u16;
        bus.write_word(bda::CURSOR_POSITIONS + (page as u32 & 0x07) * 2, word);
    }

    /// INT 10h dispatch on AH.
    pub(super) fn video_service(&mut self, cpu: &mut Cpu, bus: &mut impl Bus) {
        match cpu.ah() {
            0x00 => self.set_video_mode(cpu.al(), bus),
            0x01 => {
                // CH/CL = cursor start/end scan lines.
                let shape = ((cpu.ch() as u16) << 8) | cpu.cl() as u16;
                bus.write_word(bda::CURSOR_SHAPE, shape);
            }
            0x02 => {
                // Clamp to the current mode bounds.
                let row = cpu.dh().min(ROWS - 1);
                let col = cpu.dl().min(COLUMNS - 1);
                self.set_cursor(bus, cpu.bh(), row, col);
            }
            0x03 => {
                let (row, col) = self.cursor(bus, cpu.bh());
                cpu.set_dh(row);
                cpu.set_dl(col);
                let shape = bus.read_word(bda::CURSOR_SHAPE);
                cpu.set_register(Register::Cx, shape);
            }
            0x05 => {
                // The MDA has a single page; anything else is ignored.
                if cpu.al() == 0 {
                    bus.write_byte(bda::ACTIVE_PAGE, 0);
                }
            }
            0x06 => self.scroll(cpu, bus, true),
            0x07 => self.scroll(cpu, bus, false),
            0x08 => {
                let page = cpu.bh();
                let (row, col) = self.cursor(bus, page);
                let cell = cell_address(row, col);
                let glyph = bus.read_byte(cell);
                let attribute = bus.read_byte(cell + 1);
                cpu.set_al(glyph);
                cpu.set_ah(attribute);
            }
            0x09 => self.write_char_at_cursor(cpu, bus, true),
            0x0A => self.write_char_at_cursor(cpu, bus, false),
            0x0E => self.teletype(cpu, bus),
            0x0F => {
                let mode = bus.read_byte(bda::VIDEO_MODE);
                let columns = bus.read_byte(bda::VIDEO_COLUMNS);
                let page = self.active_page(bus);
                cpu.set_al(mode);
                cpu.set_ah(columns);
                cpu.set_register(
                    Register::Bx,
                    ((page as u16) << 8) | (cpu.register(Register::Bx) & 0xFF),
                );
            }
            service => {
                log::debug!("bios: int 10h service {service:#04x} not implemented");
            }
        }
    }

    /// AH=00h: only the MDA text mode is known; others are ignored.
    fn set_video_mode(&mut self, mode: u8, bus: &mut impl Bus) {
        if mode != 0x07 {
            log::debug!("bios: unsupported video mode {mode:#04x} ignored");
            return;
        }
        bus.write_byte(bda::VIDEO_MODE, mode);
        bus.write_word(bda::VIDEO_COLUMNS, COLUMNS as u16);
        for row in 0..ROWS {
            for col in 0..COLUMNS {
                let cell = cell_address(row, col);
                bus.write_byte(cell, BLANK);
                bus.write_byte(cell + 1, 0x07);
            }
        }
        self.set_cursor(bus, 0, 0, 0);
    }

    /// AH=06h/07h: scroll a rectangle up or down. AL=0 clears it. Exposed
    /// rows are filled with blanks carrying the BH attribute; moved rows
    /// keep their attributes.
    fn scroll(&mut self, cpu: &mut Cpu, bus: &mut impl Bus, up: bool) {
        self.scroll_rect(
            bus,
            cpu.al(),
            cpu.ch(),
            cpu.cl(),
            cpu.dh(),
            cpu.dl(),
            cpu.bh(),
            up,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn scroll_rect(
        &mut self,
        bus: &mut impl Bus,
        lines: u8,
        top: u8,
        left: u8,
        bottom: u8,
        right: u8,
        attribute: u8,
        up: bool,
    ) {
        let bottom = bottom.min(ROWS - 1);
        let right = right.min(COLUMNS - 1);
        if top > bottom || left > right {
            return;
        }

        let height = bottom - top + 1;
        let blank_fill = lines == 0 || lines >= height;
        let lines = if blank_fill { height } else { lines };

        if !blank_fill {
            if up {
                for row in top..=bottom - lines {
                    for col in left..=right {
                        let src = cell_address(row + lines, col);
                        let dst = cell_address(row, col);
                        let glyph = bus.read_byte(src);
                        let attr = bus.read_byte(src + 1);
                        bus.write_byte(dst, glyph);
                        bus.write_byte(dst + 1, attr);
                    }
                }
            } else {
                for row in (top + lines..=bottom).rev() {
                    for col in left..=right {
                        let src = cell_address(row - lines, col);
                        let dst = cell_address(row, col);
                        let glyph = bus.read_byte(src);
                        let attr = bus.read_byte(src + 1);
                        bus.write_byte(dst, glyph);
                        bus.write_byte(dst + 1, attr);
                    }
                }
            }
        }

        let (fill_start, fill_end) = if blank_fill {
            (top, bottom)
        } else if up {
            (bottom - lines + 1, bottom)
        } else {
            (top, top + lines - 1)
        };
        for row in fill_start..=fill_end {
            for col in left..=right {
                let cell = cell_address(row, col);
                bus.write_byte(cell, BLANK);
                bus.write_byte(cell + 1, attribute);
            }
        }
    }

    /// AH=09h/0Ah: repeat AL at the cursor, CX times, without moving the
    /// cursor. AH=09h also writes the BL attribute.
    fn write_char_at_cursor(&mut self, cpu: &mut Cpu, bus: &mut impl Bus, with_attribute: bool) {
        let page = cpu.bh();
        let (row, start_col) = self.cursor(bus, page);
        let count = cpu.register(Register::Cx);
        for i in 0..count {
            let col = start_col as u16 + i;
            if col >= COLUMNS as u16 {
                break;
            }
            let cell = cell_address(row, col as u8);
            bus.write_byte(cell, cpu.al());
            if with_attribute {
                bus.write_byte(cell + 1, cpu.bl());
            }
        }
    }

    /// AH=0Eh: teletype output with CR/LF/BS/BEL handling, line wrap at
    /// the right margin and a one-line scroll at the bottom.
    fn teletype(&mut self, cpu: &mut Cpu, bus: &mut impl Bus) {
        let page = self.active_page(bus);
        let (mut row, mut col) = self.cursor(bus, page);

        match cpu.al() {
            0x0D => col = 0,
            0x0A => row += 1,
            0x08 => col = col.saturating_sub(1),
            0x07 => {} // bell: the speaker path is not driven from here
            glyph => {
                bus.write_byte(cell_address(row, col), glyph);
                col += 1;
                if col >= COLUMNS {
                    col = 0;
                    row += 1;
                }
            }
        }

        if row >= ROWS {
            // Scroll the whole screen up one line.
            self.scroll_rect(bus, 1, 0, 0, ROWS - 1, COLUMNS - 1, 0x07, true);
            row = ROWS - 1;
        }

        self.set_cursor(bus, page, row, col);
    }
}
