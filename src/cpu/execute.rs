//! 8086 instruction execution
//!
//! One handler per semantic group, dispatched from the opcode table's
//! [`Op`] tag. Operand plumbing lives in `operands`; handlers only decide
//! what to compute and which flags to produce.
//!
//! Flag conventions:
//! - CF: carry/borrow out of the high bit for the operand width
//! - OF: signed overflow from the operand sign bits and the result sign
//! - ZF/SF: computed from the width-masked result
//! - PF: even parity of the low 8 bits
//! - AF: carry out of bit 3
//!
//! Shifts and rotates take CF from the last bit shifted out and produce
//! OF only for the single-bit forms.

use super::decode::{AluOp, Dir, Instruction, Op, RepPrefix, ShiftCount, OPCODES};
use super::flags::parity;
use super::operands::{MemoryAddress, OperandAddress, Register, SegmentRegister, Width};
use super::{Cpu, ExecuteError, ExecuteOutcome, Flags};
use crate::bus::Bus;

impl Cpu {
    /// Set ZF, SF and PF from a width-masked result.
    fn set_szp_flags(&mut self, width: Width, result: u32) {
        let masked = result & width.mask();
        self.flags.set(Flags::ZERO, masked == 0);
        self.flags.set(Flags::SIGN, masked & width.sign_bit() != 0);
        self.flags.set(Flags::PARITY, parity(masked as u8));
    }

    /// Perform an ALU operation and produce the canonical 8086 flag set.
    /// Returns the width-masked result (CMP discards it at the call site).
    fn alu(&mut self, op: AluOp, width: Width, dest: u32, src: u32) -> u32 {
        let mask = width.mask();
        let sign = width.sign_bit();
        let dest = dest & mask;
        let src = src & mask;

        let result = match op {
            AluOp::Add | AluOp::Adc => {
                let carry_in = if op == AluOp::Adc && self.flags.contains(Flags::CARRY) {
                    1
                } else {
                    0
                };
                let result = dest + src + carry_in;
                self.flags.set(Flags::CARRY, result > mask);
                self.flags
                    .set(Flags::ADJUST, (dest & 0xF) + (src & 0xF) + carry_in > 0xF);
                self.flags
                    .set(Flags::OVERFLOW, !(dest ^ src) & (dest ^ result) & sign != 0);
                result
            }
            AluOp::Sub | AluOp::Sbb | AluOp::Cmp => {
                let borrow_in = if op == AluOp::Sbb && self.flags.contains(Flags::CARRY) {
                    1
                } else {
                    0
                };
                let subtrahend = src + borrow_in;
                let result = dest.wrapping_sub(subtrahend) & mask;
                self.flags.set(Flags::CARRY, subtrahend > dest);
                self.flags
                    .set(Flags::ADJUST, (src & 0xF) + borrow_in > dest & 0xF);
                self.flags
                    .set(Flags::OVERFLOW, (dest ^ src) & (dest ^ result) & sign != 0);
                result
            }
            AluOp::And | AluOp::Or | AluOp::Xor => {
                let result = match op {
                    AluOp::And => dest & src,
                    AluOp::Or => dest | src,
                    _ => dest ^ src,
                };
                self.flags
                    .remove(Flags::CARRY | Flags::OVERFLOW | Flags::ADJUST);
                result
            }
        };

        let result = result & mask;
        self.set_szp_flags(width, result);
        result
    }

    /// INC/DEC semantics: full ALU flags except CF, which is preserved.
    fn inc_dec(&mut self, width: Width, value: u32, increment: bool) -> u32 {
        let carry = self.flags.contains(Flags::CARRY);
        let result = if increment {
            self.alu(AluOp::Add, width, value, 1)
        } else {
            self.alu(AluOp::Sub, width, value, 1)
        };
        self.flags.set(Flags::CARRY, carry);
        result
    }

    /// Evaluate one of the 16 Jcc condition codes.
    fn condition(&self, code: u8) -> bool {
        let f = &self.flags;
        let result = match code >> 1 {
            0 => f.contains(Flags::OVERFLOW),
            1 => f.contains(Flags::CARRY),
            2 => f.contains(Flags::ZERO),
            3 => f.contains(Flags::CARRY) || f.contains(Flags::ZERO),
            4 => f.contains(Flags::SIGN),
            5 => f.contains(Flags::PARITY),
            6 => f.contains(Flags::SIGN) != f.contains(Flags::OVERFLOW),
            _ => {
                f.contains(Flags::ZERO) || (f.contains(Flags::SIGN) != f.contains(Flags::OVERFLOW))
            }
        };
        // Odd codes negate the even condition.
        result != (code & 1 != 0)
    }

    fn jump_relative_byte(&mut self, offset: u8) {
        self.ip = self.ip.wrapping_add(offset as i8 as u16);
    }

    /// Execute a decoded instruction.
    pub(crate) fn execute(
        &mut self,
        bus: &mut impl Bus,
        instruction: &Instruction,
    ) -> Result<ExecuteOutcome, ExecuteError> {
        let info = &OPCODES[instruction.opcode as usize];
        let width = info.width;

        match info.op {
            Op::Alu(alu_op, dir) => {
                let rm = self.rm_operand_address(instruction, width);
                let reg = self.reg_operand_address(instruction, width);
                let (dest_addr, src_addr) = match dir {
                    Dir::RmReg => (rm, reg),
                    Dir::RegRm => (reg, rm),
                };
                let dest = self.read_operand(bus, &dest_addr, width);
                let src = self.read_operand(bus, &src_addr, width);
                let result = self.alu(alu_op, width, dest, src);
                if alu_op != AluOp::Cmp {
                    self.write_operand(bus, &dest_addr, width, result);
                }
            }
            Op::AluAccImm(alu_op) => {
                let acc = OperandAddress::Register(self.register_address(0, width));
                let dest = self.read_operand(bus, &acc, width);
                let result = self.alu(alu_op, width, dest, instruction.imm);
                if alu_op != AluOp::Cmp {
                    self.write_operand(bus, &acc, width, result);
                }
            }
            Op::AluGroupImm => {
                let alu_op = AluOp::from_index(instruction.reg_bits());
                let rm = self.rm_operand_address(instruction, width);
                let dest = self.read_operand(bus, &rm, width);
                // 0x83 carries a sign-extended 8-bit immediate.
                let src = if instruction.opcode == 0x83 {
                    instruction.imm as u8 as i8 as i16 as u16 as u32
                } else {
                    instruction.imm
                };
                let result = self.alu(alu_op, width, dest, src);
                if alu_op != AluOp::Cmp {
                    self.write_operand(bus, &rm, width, result);
                }
            }
            Op::PushSeg(index) => {
                let value = self.segment(SegmentRegister::from_index(index));
                self.push_word(bus, value);
            }
            Op::PopSeg(index) => {
                let value = self.pop_word(bus);
                self.set_segment(SegmentRegister::from_index(index), value);
            }
            Op::Daa => self.daa(),
            Op::Das => self.das(),
            Op::Aaa => self.ascii_adjust(true),
            Op::Aas => self.ascii_adjust(false),
            Op::IncReg(index) => {
                let value = self.register(Register::from_index(index)) as u32;
                let result = self.inc_dec(Width::Word, value, true);
                self.set_register(Register::from_index(index), result as u16);
            }
            Op::DecReg(index) => {
                let value = self.register(Register::from_index(index)) as u32;
                let result = self.inc_dec(Width::Word, value, false);
                self.set_register(Register::from_index(index), result as u16);
            }
            Op::PushReg(index) => {
                // PUSH SP on the 8086 pushes the already-decremented value.
                if Register::from_index(index) == Register::Sp {
                    let sp = self.register(Register::Sp).wrapping_sub(2);
                    self.push_word(bus, sp);
                } else {
                    let value = self.register(Register::from_index(index));
                    self.push_word(bus, value);
                }
            }
            Op::PopReg(index) => {
                let value = self.pop_word(bus);
                self.set_register(Register::from_index(index), value);
            }
            Op::Jcc(code) => {
                if self.condition(code) {
                    self.jump_relative_byte(instruction.imm as u8);
                }
            }
            Op::TestRmReg => {
                let rm = self.rm_operand_address(instruction, width);
                let reg = self.reg_operand_address(instruction, width);
                let a = self.read_operand(bus, &rm, width);
                let b = self.read_operand(bus, &reg, width);
                self.alu(AluOp::And, width, a, b);
            }
            Op::XchgRmReg => {
                let rm = self.rm_operand_address(instruction, width);
                let reg = self.reg_operand_address(instruction, width);
                let a = self.read_operand(bus, &rm, width);
                let b = self.read_operand(bus, &reg, width);
                self.write_operand(bus, &rm, width, b);
                self.write_operand(bus, &reg, width, a);
            }
            Op::MovRmReg(dir) => {
                let rm = self.rm_operand_address(instruction, width);
                let reg = self.reg_operand_address(instruction, width);
                let (dest, src) = match dir {
                    Dir::RmReg => (rm, reg),
                    Dir::RegRm => (reg, rm),
                };
                let value = self.read_operand(bus, &src, width);
                self.write_operand(bus, &dest, width, value);
            }
            Op::MovSegRm(dir) => {
                let segment = SegmentRegister::from_index(instruction.reg_bits());
                let rm = self.rm_operand_address(instruction, Width::Word);
                match dir {
                    Dir::RmReg => {
                        let value = self.segment(segment) as u32;
                        self.write_operand(bus, &rm, Width::Word, value);
                    }
                    Dir::RegRm => {
                        let value = self.read_operand(bus, &rm, Width::Word);
                        self.set_segment(segment, value as u16);
                    }
                }
            }
            Op::Lea => {
                if instruction.mod_bits() == 3 {
                    return Err(ExecuteError::InvalidOpcode {
                        opcode: instruction.opcode,
                        cs: instruction.cs,
                        ip: instruction.ip,
                    });
                }
                let address = self.memory_operand_address(instruction);
                let reg = self.reg_operand_address(instruction, Width::Word);
                self.write_operand(bus, &reg, Width::Word, address.offset as u32);
            }
            Op::PopRm => {
                let value = self.pop_word(bus);
                let rm = self.rm_operand_address(instruction, Width::Word);
                self.write_operand(bus, &rm, Width::Word, value as u32);
            }
            Op::XchgAxReg(index) => {
                let register = Register::from_index(index);
                let ax = self.register(Register::Ax);
                let other = self.register(register);
                self.set_register(Register::Ax, other);
                self.set_register(register, ax);
            }
            Op::Cbw => {
                let al = self.al() as i8 as i16;
                self.set_register(Register::Ax, al as u16);
            }
            Op::Cwd => {
                let ax = self.register(Register::Ax) as i16;
                let dx = if ax < 0 { 0xFFFF } else { 0x0000 };
                self.set_register(Register::Dx, dx);
            }
            Op::CallFar => {
                let cs = self.segment(SegmentRegister::Cs);
                self.push_word(bus, cs);
                let ip = self.ip;
                self.push_word(bus, ip);
                self.set_segment(SegmentRegister::Cs, (instruction.imm >> 16) as u16);
                self.ip = instruction.imm as u16;
            }
            Op::Wait => {}
            Op::Pushf => {
                let value = self.flags.to_word();
                self.push_word(bus, value);
            }
            Op::Popf => {
                let value = self.pop_word(bus);
                self.flags = Flags::from_word(value);
            }
            Op::Sahf => {
                // SAHF loads SF ZF AF PF CF from AH.
                let low_mask =
                    Flags::SIGN | Flags::ZERO | Flags::ADJUST | Flags::PARITY | Flags::CARRY;
                let loaded = Flags::from_word(self.ah() as u16) & low_mask;
                self.flags = (self.flags - low_mask) | loaded;
            }
            Op::Lahf => {
                let value = (self.flags.to_word() & 0xFF) as u8;
                self.set_ah(value);
            }
            Op::MovAccMem(dir) => {
                let address = OperandAddress::Memory(MemoryAddress {
                    segment: instruction
                        .segment_override
                        .unwrap_or(SegmentRegister::Ds),
                    offset: instruction.imm as u16,
                });
                let acc = OperandAddress::Register(self.register_address(0, width));
                match dir {
                    Dir::RegRm => {
                        let value = self.read_operand(bus, &address, width);
                        self.write_operand(bus, &acc, width, value);
                    }
                    Dir::RmReg => {
                        let value = self.read_operand(bus, &acc, width);
                        self.write_operand(bus, &address, width, value);
                    }
                }
            }
            Op::Movs | Op::Cmps | Op::Stos | Op::Lods | Op::Scas => {
                self.string_op(bus, instruction, width);
            }
            Op::TestAccImm => {
                let acc = OperandAddress::Register(self.register_address(0, width));
                let value = self.read_operand(bus, &acc, width);
                self.alu(AluOp::And, width, value, instruction.imm);
            }
            Op::MovRegImm(index) => {
                let dest = OperandAddress::Register(self.register_address(index, width));
                self.write_operand(bus, &dest, width, instruction.imm);
            }
            Op::RetNear => {
                self.ip = self.pop_word(bus);
            }
            Op::RetNearImm => {
                self.ip = self.pop_word(bus);
                let sp = self.register(Register::Sp);
                self.set_register(Register::Sp, sp.wrapping_add(instruction.imm as u16));
            }
            Op::Les | Op::Lds => {
                if instruction.mod_bits() == 3 {
                    return Err(ExecuteError::InvalidOpcode {
                        opcode: instruction.opcode,
                        cs: instruction.cs,
                        ip: instruction.ip,
                    });
                }
                let address = self.memory_operand_address(instruction);
                let offset_addr = OperandAddress::Memory(address);
                let segment_addr = OperandAddress::Memory(MemoryAddress {
                    segment: address.segment,
                    offset: address.offset.wrapping_add(2),
                });
                let offset = self.read_operand(bus, &offset_addr, Width::Word);
                let segment = self.read_operand(bus, &segment_addr, Width::Word);
                let reg = self.reg_operand_address(instruction, Width::Word);
                self.write_operand(bus, &reg, Width::Word, offset);
                let target = if info.op == Op::Les {
                    SegmentRegister::Es
                } else {
                    SegmentRegister::Ds
                };
                self.set_segment(target, segment as u16);
            }
            Op::MovRmImm => {
                let rm = self.rm_operand_address(instruction, width);
                self.write_operand(bus, &rm, width, instruction.imm);
            }
            Op::RetFar => {
                self.ip = self.pop_word(bus);
                let cs = self.pop_word(bus);
                self.set_segment(SegmentRegister::Cs, cs);
            }
            Op::RetFarImm => {
                self.ip = self.pop_word(bus);
                let cs = self.pop_word(bus);
                self.set_segment(SegmentRegister::Cs, cs);
                let sp = self.register(Register::Sp);
                self.set_register(Register::Sp, sp.wrapping_add(instruction.imm as u16));
            }
            Op::Int3 => return Ok(self.dispatch_interrupt(bus, 3)),
            Op::IntImm => return Ok(self.dispatch_interrupt(bus, instruction.imm as u8)),
            Op::Into => {
                if self.flags.contains(Flags::OVERFLOW) {
                    return Ok(self.dispatch_interrupt(bus, 4));
                }
            }
            Op::Iret => {
                self.ip = self.pop_word(bus);
                let cs = self.pop_word(bus);
                self.set_segment(SegmentRegister::Cs, cs);
                let flags_word = self.pop_word(bus);
                self.flags = Flags::from_word(flags_word);
            }
            Op::ShiftGroup(count) => {
                let count = match count {
                    ShiftCount::One => 1,
                    ShiftCount::Cl => self.cl() as u32,
                };
                let rm = self.rm_operand_address(instruction, width);
                let value = self.read_operand(bus, &rm, width);
                let result = self.shift_rotate(instruction.reg_bits(), width, value, count);
                self.write_operand(bus, &rm, width, result);
            }
            Op::Aam => {
                let divisor = instruction.imm as u8;
                if divisor == 0 {
                    return Ok(self.dispatch_interrupt(bus, 0));
                }
                let al = self.al();
                self.set_ah(al / divisor);
                self.set_al(al % divisor);
                let al = self.al();
                self.set_szp_flags(Width::Byte, al as u32);
            }
            Op::Aad => {
                let factor = instruction.imm as u8;
                let al = self
                    .al()
                    .wrapping_add(self.ah().wrapping_mul(factor));
                self.set_al(al);
                self.set_ah(0);
                self.set_szp_flags(Width::Byte, al as u32);
            }
            Op::Xlat => {
                let address = OperandAddress::Memory(MemoryAddress {
                    segment: instruction
                        .segment_override
                        .unwrap_or(SegmentRegister::Ds),
                    offset: self
                        .register(Register::Bx)
                        .wrapping_add(self.al() as u16),
                });
                let value = self.read_operand(bus, &address, Width::Byte);
                self.set_al(value as u8);
            }
            Op::Esc => {
                // Coprocessor escape: operands already consumed, no FPU.
            }
            Op::Loopne | Op::Loope | Op::Loop => {
                let cx = self.register(Register::Cx).wrapping_sub(1);
                self.set_register(Register::Cx, cx);
                let zero = self.flags.contains(Flags::ZERO);
                let taken = cx != 0
                    && match info.op {
                        Op::Loopne => !zero,
                        Op::Loope => zero,
                        _ => true,
                    };
                if taken {
                    self.jump_relative_byte(instruction.imm as u8);
                }
            }
            Op::Jcxz => {
                if self.register(Register::Cx) == 0 {
                    self.jump_relative_byte(instruction.imm as u8);
                }
            }
            Op::InImm | Op::InDx => {
                let port = if info.op == Op::InImm {
                    instruction.imm as u16
                } else {
                    self.register(Register::Dx)
                };
                let lo = bus.read_port(port);
                self.set_al(lo);
                if width == Width::Word {
                    let hi = bus.read_port(port.wrapping_add(1));
                    self.set_ah(hi);
                }
            }
            Op::OutImm | Op::OutDx => {
                let port = if info.op == Op::OutImm {
                    instruction.imm as u16
                } else {
                    self.register(Register::Dx)
                };
                let al = self.al();
                bus.write_port(port, al);
                if width == Width::Word {
                    let ah = self.ah();
                    bus.write_port(port.wrapping_add(1), ah);
                }
            }
            Op::CallNear => {
                let ip = self.ip;
                self.push_word(bus, ip);
                self.ip = self.ip.wrapping_add(instruction.imm as u16);
            }
            Op::JmpNear => {
                self.ip = self.ip.wrapping_add(instruction.imm as u16);
            }
            Op::JmpFar => {
                self.set_segment(SegmentRegister::Cs, (instruction.imm >> 16) as u16);
                self.ip = instruction.imm as u16;
            }
            Op::JmpShort => {
                self.jump_relative_byte(instruction.imm as u8);
            }
            Op::Hlt => {
                self.halted = true;
                return Ok(ExecuteOutcome::Halted);
            }
            Op::Cmc => self.flags.toggle(Flags::CARRY),
            Op::Group3 => return self.group3(bus, instruction, width),
            Op::Clc => self.flags.remove(Flags::CARRY),
            Op::Stc => self.flags.insert(Flags::CARRY),
            Op::Cli => self.flags.remove(Flags::INTERRUPT),
            Op::Sti => self.flags.insert(Flags::INTERRUPT),
            Op::Cld => self.flags.remove(Flags::DIRECTION),
            Op::Std => self.flags.insert(Flags::DIRECTION),
            Op::Group4 => {
                let rm = self.rm_operand_address(instruction, Width::Byte);
                let value = self.read_operand(bus, &rm, Width::Byte);
                match instruction.reg_bits() {
                    0 => {
                        let result = self.inc_dec(Width::Byte, value, true);
                        self.write_operand(bus, &rm, Width::Byte, result);
                    }
                    1 => {
                        let result = self.inc_dec(Width::Byte, value, false);
                        self.write_operand(bus, &rm, Width::Byte, result);
                    }
                    _ => {
                        return Err(ExecuteError::InvalidOpcode {
                            opcode: instruction.opcode,
                            cs: instruction.cs,
                            ip: instruction.ip,
                        })
                    }
                }
            }
            Op::Group5 => return self.group5(bus, instruction),
            Op::Invalid => {
                return Err(ExecuteError::InvalidOpcode {
                    opcode: instruction.opcode,
                    cs: instruction.cs,
                    ip: instruction.ip,
                })
            }
        }

        Ok(ExecuteOutcome::Success)
    }

    // ========== Decimal Adjust ==========

    fn daa(&mut self) {
        let old_al = self.al();
        let old_carry = self.flags.contains(Flags::CARRY);
        let mut al = old_al;
        if old_al & 0x0F > 9 || self.flags.contains(Flags::ADJUST) {
            al = al.wrapping_add(0x06);
            self.flags.insert(Flags::ADJUST);
        } else {
            self.flags.remove(Flags::ADJUST);
        }
        if old_al > 0x99 || old_carry {
            al = al.wrapping_add(0x60);
            self.flags.insert(Flags::CARRY);
        } else {
            self.flags.remove(Flags::CARRY);
        }
        self.set_al(al);
        self.set_szp_flags(Width::Byte, al as u32);
    }

    fn das(&mut self) {
        let old_al = self.al();
        let old_carry = self.flags.contains(Flags::CARRY);
        let mut al = old_al;
        if old_al & 0x0F > 9 || self.flags.contains(Flags::ADJUST) {
            al = al.wrapping_sub(0x06);
            self.flags.insert(Flags::ADJUST);
        } else {
            self.flags.remove(Flags::ADJUST);
        }
        if old_al > 0x99 || old_carry {
            al = al.wrapping_sub(0x60);
            self.flags.insert(Flags::CARRY);
        } else {
            self.flags.remove(Flags::CARRY);
        }
        self.set_al(al);
        self.set_szp_flags(Width::Byte, al as u32);
    }

    /// AAA (add = true) and AAS (add = false).
    fn ascii_adjust(&mut self, add: bool) {
        if self.al() & 0x0F > 9 || self.flags.contains(Flags::ADJUST) {
            let ax = self.register(Register::Ax);
            let ax = if add {
                ax.wrapping_add(0x106)
            } else {
                ax.wrapping_sub(0x106)
            };
            self.set_register(Register::Ax, ax);
            self.flags.insert(Flags::ADJUST | Flags::CARRY);
        } else {
            self.flags.remove(Flags::ADJUST | Flags::CARRY);
        }
        let al = self.al() & 0x0F;
        self.set_al(al);
    }

    // ========== Shifts and Rotates ==========

    /// The 0xD0-0xD3 group, with the operation selected by the ModR/M reg
    /// field: ROL ROR RCL RCR SHL SHR SHL SAR. Bit-at-a-time; the 8086
    /// does not mask the CL count.
    fn shift_rotate(&mut self, operation: u8, width: Width, value: u32, count: u32) -> u32 {
        if count == 0 {
            return value;
        }
        let mask = width.mask();
        let sign = width.sign_bit();
        let mut value = value & mask;

        for _ in 0..count {
            match operation {
                0 => {
                    // ROL
                    let top = value & sign != 0;
                    value = ((value << 1) | top as u32) & mask;
                    self.flags.set(Flags::CARRY, top);
                }
                1 => {
                    // ROR
                    let bottom = value & 1 != 0;
                    value = (value >> 1) | if bottom { sign } else { 0 };
                    self.flags.set(Flags::CARRY, bottom);
                }
                2 => {
                    // RCL
                    let top = value & sign != 0;
                    let carry = self.flags.contains(Flags::CARRY) as u32;
                    value = ((value << 1) | carry) & mask;
                    self.flags.set(Flags::CARRY, top);
                }
                3 => {
                    // RCR
                    let bottom = value & 1 != 0;
                    let carry = self.flags.contains(Flags::CARRY);
                    value = (value >> 1) | if carry { sign } else { 0 };
                    self.flags.set(Flags::CARRY, bottom);
                }
                4 | 6 => {
                    // SHL (6 is an undocumented alias)
                    let top = value & sign != 0;
                    value = (value << 1) & mask;
                    self.flags.set(Flags::CARRY, top);
                }
                5 => {
                    // SHR
                    let bottom = value & 1 != 0;
                    value >>= 1;
                    self.flags.set(Flags::CARRY, bottom);
                }
                _ => {
                    // SAR
                    let bottom = value & 1 != 0;
                    let top = value & sign;
                    value = (value >> 1) | top;
                    self.flags.set(Flags::CARRY, bottom);
                }
            }
        }

        // Shifts update ZF/SF/PF; rotates touch only CF and OF.
        if operation >= 4 {
            self.set_szp_flags(width, value);
        }

        // OF is defined for single-bit forms only.
        if count == 1 {
            let overflow = match operation {
                0 | 2 | 4 | 6 => {
                    // Left forms: carry out vs new sign bit.
                    self.flags.contains(Flags::CARRY) != (value & sign != 0)
                }
                5 | 1 | 3 => {
                    // Right forms: XOR of the top two result bits.
                    (value & sign != 0) != (value & (sign >> 1) != 0)
                }
                _ => false, // SAR
            };
            self.flags.set(Flags::OVERFLOW, overflow);
        }

        value
    }

    // ========== Group 3: TEST/NOT/NEG/MUL/IMUL/DIV/IDIV ==========

    fn group3(
        &mut self,
        bus: &mut impl Bus,
        instruction: &Instruction,
        width: Width,
    ) -> Result<ExecuteOutcome, ExecuteError> {
        let rm = self.rm_operand_address(instruction, width);
        let value = self.read_operand(bus, &rm, width);

        match instruction.reg_bits() {
            0 | 1 => {
                // TEST r/m, imm
                self.alu(AluOp::And, width, value, instruction.imm);
            }
            2 => {
                // NOT: no flags.
                self.write_operand(bus, &rm, width, !value);
            }
            3 => {
                // NEG: subtract from zero; CF set unless operand was zero.
                let result = self.alu(AluOp::Sub, width, 0, value);
                self.write_operand(bus, &rm, width, result);
            }
            4 => self.mul(width, value),
            5 => self.imul(width, value),
            6 => {
                if !self.div(width, value) {
                    return Ok(self.dispatch_interrupt(bus, 0));
                }
            }
            _ => {
                if !self.idiv(width, value) {
                    return Ok(self.dispatch_interrupt(bus, 0));
                }
            }
        }
        Ok(ExecuteOutcome::Success)
    }

    fn mul(&mut self, width: Width, value: u32) {
        match width {
            Width::Byte => {
                let product = self.al() as u32 * value;
                self.set_register(Register::Ax, product as u16);
                let high = product >> 8 != 0;
                self.flags.set(Flags::CARRY, high);
                self.flags.set(Flags::OVERFLOW, high);
            }
            Width::Word => {
                let product = self.register(Register::Ax) as u32 * value;
                self.set_register(Register::Ax, product as u16);
                self.set_register(Register::Dx, (product >> 16) as u16);
                let high = product >> 16 != 0;
                self.flags.set(Flags::CARRY, high);
                self.flags.set(Flags::OVERFLOW, high);
            }
        }
    }

    fn imul(&mut self, width: Width, value: u32) {
        match width {
            Width::Byte => {
                let product = (self.al() as i8 as i16) * (value as u8 as i8 as i16);
                self.set_register(Register::Ax, product as u16);
                let fits = product == product as i8 as i16;
                self.flags.set(Flags::CARRY, !fits);
                self.flags.set(Flags::OVERFLOW, !fits);
            }
            Width::Word => {
                let product =
                    (self.register(Register::Ax) as i16 as i32) * (value as u16 as i16 as i32);
                self.set_register(Register::Ax, product as u16);
                self.set_register(Register::Dx, (product >> 16) as u16);
                let fits = product == product as i16 as i32;
                self.flags.set(Flags::CARRY, !fits);
                self.flags.set(Flags::OVERFLOW, !fits);
            }
        }
    }

    /// Unsigned divide. Returns false on divide-by-zero or quotient
    /// overflow, in which case the caller synthesises INT 0.
    fn div(&mut self, width: Width, value: u32) -> bool {
        if value == 0 {
            return false;
        }
        match width {
            Width::Byte => {
                let dividend = self.register(Register::Ax) as u32;
                let quotient = dividend / value;
                if quotient > 0xFF {
                    return false;
                }
                self.set_al(quotient as u8);
                self.set_ah((dividend % value) as u8);
            }
            Width::Word => {
                let dividend = ((self.register(Register::Dx) as u32) << 16)
                    | self.register(Register::Ax) as u32;
                let quotient = dividend / value;
                if quotient > 0xFFFF {
                    return false;
                }
                self.set_register(Register::Ax, quotient as u16);
                self.set_register(Register::Dx, (dividend % value) as u16);
            }
        }
        true
    }

    /// Signed divide; same failure contract as [`Cpu::div`].
    fn idiv(&mut self, width: Width, value: u32) -> bool {
        match width {
            Width::Byte => {
                let divisor = value as u8 as i8 as i32;
                if divisor == 0 {
                    return false;
                }
                let dividend = self.register(Register::Ax) as i16 as i32;
                let quotient = dividend / divisor;
                if quotient > 0x7F || quotient < -0x80 {
                    return false;
                }
                self.set_al(quotient as u8);
                self.set_ah((dividend % divisor) as u8);
            }
            Width::Word => {
                let divisor = value as u16 as i16 as i64;
                if divisor == 0 {
                    return false;
                }
                let dividend = (((self.register(Register::Dx) as u32) << 16)
                    | self.register(Register::Ax) as u32) as i32 as i64;
                let quotient = dividend / divisor;
                if quotient > 0x7FFF || quotient < -0x8000 {
                    return false;
                }
                self.set_register(Register::Ax, quotient as u16);
                self.set_register(Register::Dx, (dividend % divisor) as u16);
            }
        }
        true
    }

    // ========== Group 5: INC/DEC/CALL/JMP/PUSH ==========

    fn group5(
        &mut self,
        bus: &mut impl Bus,
        instruction: &Instruction,
    ) -> Result<ExecuteOutcome, ExecuteError> {
        let invalid = ExecuteError::InvalidOpcode {
            opcode: instruction.opcode,
            cs: instruction.cs,
            ip: instruction.ip,
        };

        match instruction.reg_bits() {
            0 => {
                let rm = self.rm_operand_address(instruction, Width::Word);
                let value = self.read_operand(bus, &rm, Width::Word);
                let result = self.inc_dec(Width::Word, value, true);
                self.write_operand(bus, &rm, Width::Word, result);
            }
            1 => {
                let rm = self.rm_operand_address(instruction, Width::Word);
                let value = self.read_operand(bus, &rm, Width::Word);
                let result = self.inc_dec(Width::Word, value, false);
                self.write_operand(bus, &rm, Width::Word, result);
            }
            2 => {
                // CALL near indirect
                let rm = self.rm_operand_address(instruction, Width::Word);
                let target = self.read_operand(bus, &rm, Width::Word);
                let ip = self.ip;
                self.push_word(bus, ip);
                self.ip = target as u16;
            }
            3 => {
                // CALL far indirect; the pointer lives in memory.
                if instruction.mod_bits() == 3 {
                    return Err(invalid);
                }
                let (offset, segment) = self.read_far_pointer(bus, instruction);
                let cs = self.segment(SegmentRegister::Cs);
                self.push_word(bus, cs);
                let ip = self.ip;
                self.push_word(bus, ip);
                self.set_segment(SegmentRegister::Cs, segment);
                self.ip = offset;
            }
            4 => {
                // JMP near indirect
                let rm = self.rm_operand_address(instruction, Width::Word);
                let target = self.read_operand(bus, &rm, Width::Word);
                self.ip = target as u16;
            }
            5 => {
                // JMP far indirect
                if instruction.mod_bits() == 3 {
                    return Err(invalid);
                }
                let (offset, segment) = self.read_far_pointer(bus, instruction);
                self.set_segment(SegmentRegister::Cs, segment);
                self.ip = offset;
            }
            6 => {
                let rm = self.rm_operand_address(instruction, Width::Word);
                let value = self.read_operand(bus, &rm, Width::Word);
                self.push_word(bus, value as u16);
            }
            _ => return Err(invalid),
        }
        Ok(ExecuteOutcome::Success)
    }

    fn read_far_pointer(&mut self, bus: &mut impl Bus, instruction: &Instruction) -> (u16, u16) {
        let address = self.memory_operand_address(instruction);
        let offset_addr = OperandAddress::Memory(address);
        let segment_addr = OperandAddress::Memory(MemoryAddress {
            segment: address.segment,
            offset: address.offset.wrapping_add(2),
        });
        let offset = self.read_operand(bus, &offset_addr, Width::Word);
        let segment = self.read_operand(bus, &segment_addr, Width::Word);
        (offset as u16, segment as u16)
    }

    // ========== String Operations ==========

    /// MOVS/CMPS/STOS/LODS/SCAS with optional REP/REPNE. SI and DI advance
    /// by the operand size, backwards when DF is set. The destination
    /// segment is always ES; only the source segment honours an override.
    fn string_op(&mut self, bus: &mut impl Bus, instruction: &Instruction, width: Width) {
        let op = OPCODES[instruction.opcode as usize].op;
        let step = width.bytes();

        let mut iterations_left = match instruction.rep {
            Some(_) => self.register(Register::Cx),
            None => 1,
        };

        while iterations_left > 0 {
            let source_segment = instruction
                .segment_override
                .unwrap_or(SegmentRegister::Ds);
            let si = self.register(Register::Si);
            let di = self.register(Register::Di);
            let source = OperandAddress::Memory(MemoryAddress {
                segment: source_segment,
                offset: si,
            });
            let dest = OperandAddress::Memory(MemoryAddress {
                segment: SegmentRegister::Es,
                offset: di,
            });

            let mut advance_si = false;
            let mut advance_di = false;

            match op {
                Op::Movs => {
                    let value = self.read_operand(bus, &source, width);
                    self.write_operand(bus, &dest, width, value);
                    advance_si = true;
                    advance_di = true;
                }
                Op::Cmps => {
                    let a = self.read_operand(bus, &source, width);
                    let b = self.read_operand(bus, &dest, width);
                    self.alu(AluOp::Cmp, width, a, b);
                    advance_si = true;
                    advance_di = true;
                }
                Op::Stos => {
                    let acc = OperandAddress::Register(self.register_address(0, width));
                    let value = self.read_operand(bus, &acc, width);
                    self.write_operand(bus, &dest, width, value);
                    advance_di = true;
                }
                Op::Lods => {
                    let value = self.read_operand(bus, &source, width);
                    let acc = OperandAddress::Register(self.register_address(0, width));
                    self.write_operand(bus, &acc, width, value);
                    advance_si = true;
                }
                Op::Scas => {
                    let acc = OperandAddress::Register(self.register_address(0, width));
                    let a = self.read_operand(bus, &acc, width);
                    let b = self.read_operand(bus, &dest, width);
                    self.alu(AluOp::Cmp, width, a, b);
                    advance_di = true;
                }
                _ => {}
            }

            let backwards = self.flags.contains(Flags::DIRECTION);
            if advance_si {
                let si = if backwards {
                    si.wrapping_sub(step)
                } else {
                    si.wrapping_add(step)
                };
                self.set_register(Register::Si, si);
            }
            if advance_di {
                let di = if backwards {
                    di.wrapping_sub(step)
                } else {
                    di.wrapping_add(step)
                };
                self.set_register(Register::Di, di);
            }

            iterations_left -= 1;
            if instruction.rep.is_some() {
                self.set_register(Register::Cx, iterations_left);
                // REPE/REPNE terminate CMPS and SCAS on the flag condition.
                if matches!(op, Op::Cmps | Op::Scas) {
                    let zero = self.flags.contains(Flags::ZERO);
                    let stop = match instruction.rep {
                        Some(RepPrefix::Rep) => !zero,
                        Some(RepPrefix::RepNe) => zero,
                        None => false,
                    };
                    if stop {
                        break;
                    }
                }
            }
        }
    }
}
