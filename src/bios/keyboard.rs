//! INT 09h / INT 16h keyboard services
//!
//! INT 09h is the hardware IRQ-1 path: read the scancode from the 8255,
//! track the shift state, translate make codes to ASCII and push
//! (scancode, ascii) words into the BDA keyboard ring, then pulse the
//! acknowledge bits and EOI the interrupt controller. INT 16h is the
//! software consumer of that ring.

use super::{bda, Bios};
use crate::bus::Bus;
use crate::cpu::{Cpu, Flags, Register};

/// Shift-flag bits at BDA 0x417.
mod shift_flags {
    pub const RIGHT_SHIFT: u8 = 1 << 0;
    pub const LEFT_SHIFT: u8 = 1 << 1;
    pub const CTRL: u8 = 1 << 2;
    pub const ALT: u8 = 1 << 3;
}

/// XT set-1 make codes for the modifier keys.
mod scancodes {
    pub const CTRL: u8 = 0x1D;
    pub const LEFT_SHIFT: u8 = 0x2A;
    pub const RIGHT_SHIFT: u8 = 0x36;
    pub const ALT: u8 = 0x38;
}

/// Bytes originated by the keyboard controller itself, never keystrokes.
/// 0xAA in particular would otherwise alias the left-shift break code.
mod responses {
    /// Self-test passed after a reset.
    pub const SELF_TEST_OK: u8 = 0xAA;
    /// Diagnostic echo reply.
    pub const ECHO: u8 = 0xEE;
    /// Command acknowledge.
    pub const ACK: u8 = 0xFA;
    /// Self-test failed.
    pub const SELF_TEST_FAIL: u8 = 0xFC;
    /// Resend request.
    pub const RESEND: u8 = 0xFE;
}

/// ASCII for make codes 0x00-0x39, unshifted. Zero marks keys with no
/// character (modifiers, function keys).
const ASCII_LOWER: [u8; 0x3A] = [
    0x00, 0x1B, b'1', b'2', b'3', b'4', b'5', b'6', b'7', b'8', b'9', b'0', b'-', b'=', 0x08,
    0x09, b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i', b'o', b'p', b'[', b']', 0x0D, 0x00,
    b'a', b's', b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';', b'\'', b'`', 0x00, b'\\', b'z',
    b'x', b'c', b'v', b'b', b'n', b'm', b',', b'.', b'/', 0x00, b'*', 0x00, b' ',
];

/// ASCII for make codes 0x00-0x39 with shift held.
const ASCII_UPPER: [u8; 0x3A] = [
    0x00, 0x1B, b'!', b'@', b'#', b'$', b'%', b'^', b'&', b'*', b'(', b')', b'_', b'+', 0x08,
    0x09, b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I', b'O', b'P', b'{', b'}', 0x0D, 0x00,
    b'A', b'S', b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':', b'"', b'~', 0x00, b'|', b'Z',
    b'X', b'C', b'V', b'B', b'N', b'M', b'<', b'>', b'?', 0x00, b'*', 0x00, b' ',
];

impl Bios {
    fn buffer_advance(offset: u16) -> u16 {
        let next = offset + 2;
        if next >= bda::KEYBOARD_BUFFER_END {
            bda::KEYBOARD_BUFFER
        } else {
            next
        }
    }

    /// Push a (scancode << 8 | ascii) word; full ring drops the key.
    fn buffer_push(&mut self, bus: &mut impl Bus, key: u16) {
        let head = bus.read_word(bda::KEYBOARD_HEAD);
        let tail = bus.read_word(bda::KEYBOARD_TAIL);
        let next = Self::buffer_advance(tail);
        if next == head {
            log::debug!("bios: keyboard ring full, dropping key {key:#06x}");
            return;
        }
        bus.write_word(0x400 + tail as u32, key);
        bus.write_word(bda::KEYBOARD_TAIL, next);
    }

    fn buffer_pop(&mut self, bus: &mut impl Bus) -> Option<u16> {
        let head = bus.read_word(bda::KEYBOARD_HEAD);
        let tail = bus.read_word(bda::KEYBOARD_TAIL);
        if head == tail {
            return None;
        }
        let key = bus.read_word(0x400 + head as u32);
        bus.write_word(bda::KEYBOARD_HEAD, Self::buffer_advance(head));
        Some(key)
    }

    fn buffer_peek(&self, bus: &mut impl Bus) -> Option<u16> {
        let head = bus.read_word(bda::KEYBOARD_HEAD);
        let tail = bus.read_word(bda::KEYBOARD_TAIL);
        if head == tail {
            None
        } else {
            Some(bus.read_word(0x400 + head as u32))
        }
    }

    /// Modifier bit for a make code, if it is one.
    fn modifier_bit(scancode: u8) -> Option<u8> {
        match scancode {
            scancodes::LEFT_SHIFT => Some(shift_flags::LEFT_SHIFT),
            scancodes::RIGHT_SHIFT => Some(shift_flags::RIGHT_SHIFT),
            scancodes::CTRL => Some(shift_flags::CTRL),
            scancodes::ALT => Some(shift_flags::ALT),
            _ => None,
        }
    }

    /// A controller response byte rather than a key event.
    ///
    /// The self-test reply shares its encoding with the left-shift break
    /// code; it only counts as a key event while a left-shift make is
    /// outstanding. The other response bytes would be break codes of
    /// scancodes past the end of the XT key matrix, so they are always
    /// controller traffic.
    fn is_controller_response(scancode: u8, shift_state: u8) -> bool {
        match scancode {
            responses::SELF_TEST_OK => shift_state & shift_flags::LEFT_SHIFT == 0,
            responses::ECHO
            | responses::ACK
            | responses::SELF_TEST_FAIL
            | responses::RESEND => true,
            _ => false,
        }
    }

    /// INT 09h: consume one scancode from the 8255.
    pub(super) fn keyboard_irq(&mut self, bus: &mut impl Bus) {
        let scancode = bus.read_port(0x60);
        let make_code = scancode & 0x7F;
        let is_break = scancode & 0x80 != 0;
        let shift_state = bus.read_byte(bda::SHIFT_FLAGS);

        if Self::is_controller_response(scancode, shift_state) {
            // Self-test/ack traffic is consumed without touching the
            // shift state or the key ring.
        } else if let Some(bit) = Self::modifier_bit(make_code) {
            let flags = if is_break {
                shift_state & !bit
            } else {
                shift_state | bit
            };
            bus.write_byte(bda::SHIFT_FLAGS, flags);
        } else if !is_break {
            let shifted =
                shift_state & (shift_flags::LEFT_SHIFT | shift_flags::RIGHT_SHIFT) != 0;
            let table = if shifted { &ASCII_UPPER } else { &ASCII_LOWER };
            let ascii = table.get(make_code as usize).copied().unwrap_or(0);
            self.buffer_push(bus, ((make_code as u16) << 8) | ascii as u16);
        }

        // Acknowledge pulse on the 8255 keyboard control bits, then EOI.
        let port_b = bus.read_port(0x61);
        bus.write_port(0x61, port_b | 0x80);
        bus.write_port(0x61, port_b & 0x7F);
        bus.write_port(0x20, 0x20);
    }

    /// INT 16h dispatch on AH.
    pub(super) fn keyboard_service(&mut self, cpu: &mut Cpu, bus: &mut impl Bus) {
        match cpu.ah() {
            0x00 => {
                if let Some(key) = self.buffer_pop(bus) {
                    cpu.set_register(Register::Ax, key);
                } else {
                    // Nothing buffered: back IP up over the INT so the
                    // caller retries after the next keyboard interrupt.
                    cpu.ip = cpu.ip.wrapping_sub(2);
                }
            }
            0x01 => {
                if let Some(key) = self.buffer_peek(bus) {
                    cpu.set_register(Register::Ax, key);
                    cpu.flags.remove(Flags::ZERO);
                } else {
                    cpu.flags.insert(Flags::ZERO);
                }
            }
            0x02 => {
                let flags = bus.read_byte(bda::SHIFT_FLAGS);
                cpu.set_al(flags);
            }
            service => {
                log::debug!("bios: int 16h service {service:#04x} not implemented");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{setup, TestBus};
    use super::*;

    fn press(bios: &mut Bios, bus: &mut TestBus, scancode: u8) {
        bus.port_values.insert(0x60, scancode);
        bus.port_values.insert(0x61, 0x4C);
        bios.keyboard_irq(bus);
    }

    #[test]
    fn test_make_code_translated_and_buffered() {
        let (mut bios, mut cpu, mut bus) = setup();
        press(&mut bios, &mut bus, 0x1E); // 'a'

        cpu.set_ah(0x00);
        assert!(bios.handle_interrupt(&mut cpu, &mut bus, 0x16));
        assert_eq!(cpu.register(Register::Ax), 0x1E61); // scancode | 'a'
    }

    #[test]
    fn test_break_code_ignored() {
        let (mut bios, _, mut bus) = setup();
        press(&mut bios, &mut bus, 0x1E | 0x80);
        assert_eq!(bios.buffer_peek(&mut bus), None);
    }

    #[test]
    fn test_shift_produces_uppercase() {
        let (mut bios, _, mut bus) = setup();
        press(&mut bios, &mut bus, 0x2A); // shift down
        press(&mut bios, &mut bus, 0x1E); // 'A'
        press(&mut bios, &mut bus, 0x2A | 0x80); // shift up
        press(&mut bios, &mut bus, 0x1E); // 'a'

        assert_eq!(bios.buffer_pop(&mut bus), Some(0x1E41));
        assert_eq!(bios.buffer_pop(&mut bus), Some(0x1E61));
    }

    #[test]
    fn test_shift_flags_reported() {
        let (mut bios, mut cpu, mut bus) = setup();
        press(&mut bios, &mut bus, 0x1D); // ctrl down

        cpu.set_ah(0x02);
        bios.handle_interrupt(&mut cpu, &mut bus, 0x16);
        assert_eq!(cpu.al(), shift_flags::CTRL);

        press(&mut bios, &mut bus, 0x1D | 0x80);
        cpu.set_ah(0x02);
        bios.handle_interrupt(&mut cpu, &mut bus, 0x16);
        assert_eq!(cpu.al(), 0);
    }

    #[test]
    fn test_irq_pulses_acknowledge_and_eoi() {
        let (mut bios, _, mut bus) = setup();
        press(&mut bios, &mut bus, 0x39);
        assert_eq!(
            bus.port_writes,
            vec![(0x61, 0xCC), (0x61, 0x4C), (0x20, 0x20)]
        );
    }

    #[test]
    fn test_self_test_byte_not_a_keystroke() {
        let (mut bios, _, mut bus) = setup();
        // Reset-complete with no shift held: consumed without a ring
        // entry and without a phantom shift transition.
        press(&mut bios, &mut bus, 0xAA);
        assert_eq!(bios.buffer_peek(&mut bus), None);
        assert_eq!(bus.read_byte(bda::SHIFT_FLAGS), 0);
    }

    #[test]
    fn test_left_shift_break_still_recognised() {
        let (mut bios, _, mut bus) = setup();
        // The left-shift break code is the same byte as the self-test
        // reply; with a make outstanding it is the key release.
        press(&mut bios, &mut bus, 0x2A);
        assert_eq!(bus.read_byte(bda::SHIFT_FLAGS), shift_flags::LEFT_SHIFT);
        press(&mut bios, &mut bus, 0xAA);
        assert_eq!(bus.read_byte(bda::SHIFT_FLAGS), 0);
    }

    #[test]
    fn test_controller_responses_acknowledged_but_ignored() {
        let (mut bios, _, mut bus) = setup();
        for response in [0xEE, 0xFA, 0xFC, 0xFE] {
            press(&mut bios, &mut bus, response);
        }
        assert_eq!(bios.buffer_peek(&mut bus), None);
        assert_eq!(bus.read_byte(bda::SHIFT_FLAGS), 0);
        // The acknowledge pulse and EOI still run for controller traffic.
        assert_eq!(bus.port_writes.len(), 12);
        assert_eq!(bus.port_writes[..3], [(0x61, 0xCC), (0x61, 0x4C), (0x20, 0x20)]);
    }

    #[test]
    fn test_blocking_read_rewinds_ip() {
        let (mut bios, mut cpu, mut bus) = setup();
        cpu.ip = 0x0102; // as if INT 16h at 0x0100 just executed
        cpu.set_ah(0x00);
        bios.handle_interrupt(&mut cpu, &mut bus, 0x16);
        assert_eq!(cpu.ip, 0x0100);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let (mut bios, mut cpu, mut bus) = setup();
        press(&mut bios, &mut bus, 0x10); // 'q'

        cpu.set_ah(0x01);
        bios.handle_interrupt(&mut cpu, &mut bus, 0x16);
        assert!(!cpu.flags.contains(Flags::ZERO));
        assert_eq!(cpu.register(Register::Ax), 0x1071);

        // Still there for the blocking read.
        cpu.set_ah(0x00);
        bios.handle_interrupt(&mut cpu, &mut bus, 0x16);
        assert_eq!(cpu.register(Register::Ax), 0x1071);
    }

    #[test]
    fn test_peek_empty_sets_zero_flag() {
        let (mut bios, mut cpu, mut bus) = setup();
        cpu.set_ah(0x01);
        bios.handle_interrupt(&mut cpu, &mut bus, 0x16);
        assert!(cpu.flags.contains(Flags::ZERO));
    }

    #[test]
    fn test_ring_order_and_overflow() {
        let (mut bios, _, mut bus) = setup();
        // The ring holds 15 keys (one slot stays open).
        for i in 0..20u8 {
            press(&mut bios, &mut bus, 0x02 + (i % 9));
        }
        let mut count = 0;
        while bios.buffer_pop(&mut bus).is_some() {
            count += 1;
        }
        assert_eq!(count, 15);
    }
}
