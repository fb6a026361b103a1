//! 8086 instruction decoding
//!
//! Instructions are parsed from the byte stream at CS:IP. A prefix loop
//! consumes segment-override, LOCK and REP/REPNE bytes, then a single
//! opcode byte indexes the static 256-entry [`OPCODES`] table. The table
//! entry says whether a ModR/M byte follows, how many immediate bytes the
//! instruction carries, the operand width, and which handler executes it.
//!
//! Effective addresses follow the standard 8086 base/index table:
//! `[BX+SI]`, `[BX+DI]`, `[BP+SI]`, `[BP+DI]`, `[SI]`, `[DI]`,
//! disp16 or `[BP]`, `[BX]`. Any base containing BP defaults to the SS
//! segment, everything else to DS; a segment-override prefix replaces the
//! default.

use super::operands::{MemoryAddress, OperandAddress, SegmentRegister, Width};
use super::{Cpu, ExecuteError};
use crate::bus::Bus;

/// REP/REPNE prefix kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RepPrefix {
    /// REP / REPE (0xF3)
    Rep,
    /// REPNE (0xF2)
    RepNe,
}

/// ALU operations shared by the 0x00-0x3D opcode family and group 0x80.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AluOp {
    Add = 0,
    Or,
    Adc,
    Sbb,
    And,
    Sub,
    Xor,
    Cmp,
}

impl AluOp {
    pub(crate) fn from_index(index: u8) -> AluOp {
        match index & 0x07 {
            0 => AluOp::Add,
            1 => AluOp::Or,
            2 => AluOp::Adc,
            3 => AluOp::Sbb,
            4 => AluOp::And,
            5 => AluOp::Sub,
            6 => AluOp::Xor,
            _ => AluOp::Cmp,
        }
    }
}

/// Operand direction for two-operand r/m forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dir {
    /// Destination is r/m, source is reg (d bit clear).
    RmReg,
    /// Destination is reg, source is r/m (d bit set).
    RegRm,
}

/// Shift/rotate count source for the 0xD0-0xD3 group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShiftCount {
    One,
    Cl,
}

/// Handler tag dispatched by `Cpu::execute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Alu(AluOp, Dir),
    AluAccImm(AluOp),
    /// Group 0x80-0x83: ALU op selected by the ModR/M reg field.
    AluGroupImm,
    PushSeg(u8),
    PopSeg(u8),
    Daa,
    Das,
    Aaa,
    Aas,
    IncReg(u8),
    DecReg(u8),
    PushReg(u8),
    PopReg(u8),
    /// Conditional jump; payload is the low nibble condition code.
    Jcc(u8),
    TestRmReg,
    XchgRmReg,
    MovRmReg(Dir),
    MovSegRm(Dir),
    Lea,
    PopRm,
    XchgAxReg(u8),
    Cbw,
    Cwd,
    CallFar,
    Wait,
    Pushf,
    Popf,
    Sahf,
    Lahf,
    MovAccMem(Dir),
    Movs,
    Cmps,
    Stos,
    Lods,
    Scas,
    TestAccImm,
    MovRegImm(u8),
    RetNearImm,
    RetNear,
    Les,
    Lds,
    MovRmImm,
    RetFarImm,
    RetFar,
    Int3,
    IntImm,
    Into,
    Iret,
    ShiftGroup(ShiftCount),
    Aam,
    Aad,
    Xlat,
    /// 0xD8-0xDF coprocessor escape: ModR/M consumed, no-op.
    Esc,
    Loopne,
    Loope,
    Loop,
    Jcxz,
    InImm,
    OutImm,
    InDx,
    OutDx,
    CallNear,
    JmpNear,
    JmpFar,
    JmpShort,
    Hlt,
    Cmc,
    /// Group 0xF6/0xF7: TEST/NOT/NEG/MUL/IMUL/DIV/IDIV by reg field.
    Group3,
    Clc,
    Stc,
    Cli,
    Sti,
    Cld,
    Std,
    /// Group 0xFE: INC/DEC r/m8.
    Group4,
    /// Group 0xFF: INC/DEC/CALL/CALLF/JMP/JMPF/PUSH r/m16.
    Group5,
    /// Unknown opcode or a prefix byte (prefixes never reach dispatch).
    Invalid,
}

/// One entry in the opcode lookup table.
pub(crate) struct OpcodeInfo {
    /// Instruction has a ModR/M byte.
    pub modrm: bool,
    /// Number of immediate data bytes: 0, 1, 2, or 4.
    pub imm: u8,
    /// Operand width.
    pub width: Width,
    /// Handler tag.
    pub op: Op,
}

const fn op(modrm: bool, imm: u8, width: Width, op: Op) -> OpcodeInfo {
    OpcodeInfo { modrm, imm, width, op }
}

use Width::{Byte, Word};

/// The static 256-entry opcode table, indexed by the opcode byte.
#[rustfmt::skip]
pub(crate) static OPCODES: [OpcodeInfo; 256] = [
    /* 0x00 */ op(true,  0, Byte, Op::Alu(AluOp::Add, Dir::RmReg)),
    /* 0x01 */ op(true,  0, Word, Op::Alu(AluOp::Add, Dir::RmReg)),
    /* 0x02 */ op(true,  0, Byte, Op::Alu(AluOp::Add, Dir::RegRm)),
    /* 0x03 */ op(true,  0, Word, Op::Alu(AluOp::Add, Dir::RegRm)),
    /* 0x04 */ op(false, 1, Byte, Op::AluAccImm(AluOp::Add)),
    /* 0x05 */ op(false, 2, Word, Op::AluAccImm(AluOp::Add)),
    /* 0x06 */ op(false, 0, Word, Op::PushSeg(0)),
    /* 0x07 */ op(false, 0, Word, Op::PopSeg(0)),
    /* 0x08 */ op(true,  0, Byte, Op::Alu(AluOp::Or, Dir::RmReg)),
    /* 0x09 */ op(true,  0, Word, Op::Alu(AluOp::Or, Dir::RmReg)),
    /* 0x0A */ op(true,  0, Byte, Op::Alu(AluOp::Or, Dir::RegRm)),
    /* 0x0B */ op(true,  0, Word, Op::Alu(AluOp::Or, Dir::RegRm)),
    /* 0x0C */ op(false, 1, Byte, Op::AluAccImm(AluOp::Or)),
    /* 0x0D */ op(false, 2, Word, Op::AluAccImm(AluOp::Or)),
    /* 0x0E */ op(false, 0, Word, Op::PushSeg(1)),
    /* 0x0F */ op(false, 0, Word, Op::Invalid),
    /* 0x10 */ op(true,  0, Byte, Op::Alu(AluOp::Adc, Dir::RmReg)),
    /* 0x11 */ op(true,  0, Word, Op::Alu(AluOp::Adc, Dir::RmReg)),
    /* 0x12 */ op(true,  0, Byte, Op::Alu(AluOp::Adc, Dir::RegRm)),
    /* 0x13 */ op(true,  0, Word, Op::Alu(AluOp::Adc, Dir::RegRm)),
    /* 0x14 */ op(false, 1, Byte, Op::AluAccImm(AluOp::Adc)),
    /* 0x15 */ op(false, 2, Word, Op::AluAccImm(AluOp::Adc)),
    /* 0x16 */ op(false, 0, Word, Op::PushSeg(2)),
    /* 0x17 */ op(false, 0, Word, Op::PopSeg(2)),
    /* 0x18 */ op(true,  0, Byte, Op::Alu(AluOp::Sbb, Dir::RmReg)),
    /* 0x19 */ op(true,  0, Word, Op::Alu(AluOp::Sbb, Dir::RmReg)),
    /* 0x1A */ op(true,  0, Byte, Op::Alu(AluOp::Sbb, Dir::RegRm)),
    /* 0x1B */ op(true,  0, Word, Op::Alu(AluOp::Sbb, Dir::RegRm)),
    /* 0x1C */ op(false, 1, Byte, Op::AluAccImm(AluOp::Sbb)),
    /* 0x1D */ op(false, 2, Word, Op::AluAccImm(AluOp::Sbb)),
    /* 0x1E */ op(false, 0, Word, Op::PushSeg(3)),
    /* 0x1F */ op(false, 0, Word, Op::PopSeg(3)),
    /* 0x20 */ op(true,  0, Byte, Op::Alu(AluOp::And, Dir::RmReg)),
    /* 0x21 */ op(true,  0, Word, Op::Alu(AluOp::And, Dir::RmReg)),
    /* 0x22 */ op(true,  0, Byte, Op::Alu(AluOp::And, Dir::RegRm)),
    /* 0x23 */ op(true,  0, Word, Op::Alu(AluOp::And, Dir::RegRm)),
    /* 0x24 */ op(false, 1, Byte, Op::AluAccImm(AluOp::And)),
    /* 0x25 */ op(false, 2, Word, Op::AluAccImm(AluOp::And)),
    /* 0x26 */ op(false, 0, Byte, Op::Invalid), // ES: prefix
    /* 0x27 */ op(false, 0, Byte, Op::Daa),
    /* 0x28 */ op(true,  0, Byte, Op::Alu(AluOp::Sub, Dir::RmReg)),
    /* 0x29 */ op(true,  0, Word, Op::Alu(AluOp::Sub, Dir::RmReg)),
    /* 0x2A */ op(true,  0, Byte, Op::Alu(AluOp::Sub, Dir::RegRm)),
    /* 0x2B */ op(true,  0, Word, Op::Alu(AluOp::Sub, Dir::RegRm)),
    /* 0x2C */ op(false, 1, Byte, Op::AluAccImm(AluOp::Sub)),
    /* 0x2D */ op(false, 2, Word, Op::AluAccImm(AluOp::Sub)),
    /* 0x2E */ op(false, 0, Byte, Op::Invalid), // CS: prefix
    /* 0x2F */ op(false, 0, Byte, Op::Das),
    /* 0x30 */ op(true,  0, Byte, Op::Alu(AluOp::Xor, Dir::RmReg)),
    /* 0x31 */ op(true,  0, Word, Op::Alu(AluOp::Xor, Dir::RmReg)),
    /* 0x32 */ op(true,  0, Byte, Op::Alu(AluOp::Xor, Dir::RegRm)),
    /* 0x33 */ op(true,  0, Word, Op::Alu(AluOp::Xor, Dir::RegRm)),
    /* 0x34 */ op(false, 1, Byte, Op::AluAccImm(AluOp::Xor)),
    /* 0x35 */ op(false, 2, Word, Op::AluAccImm(AluOp::Xor)),
    /* 0x36 */ op(false, 0, Byte, Op::Invalid), // SS: prefix
    /* 0x37 */ op(false, 0, Byte, Op::Aaa),
    /* 0x38 */ op(true,  0, Byte, Op::Alu(AluOp::Cmp, Dir::RmReg)),
    /* 0x39 */ op(true,  0, Word, Op::Alu(AluOp::Cmp, Dir::RmReg)),
    /* 0x3A */ op(true,  0, Byte, Op::Alu(AluOp::Cmp, Dir::RegRm)),
    /* 0x3B */ op(true,  0, Word, Op::Alu(AluOp::Cmp, Dir::RegRm)),
    /* 0x3C */ op(false, 1, Byte, Op::AluAccImm(AluOp::Cmp)),
    /* 0x3D */ op(false, 2, Word, Op::AluAccImm(AluOp::Cmp)),
    /* 0x3E */ op(false, 0, Byte, Op::Invalid), // DS: prefix
    /* 0x3F */ op(false, 0, Byte, Op::Aas),
    /* 0x40 */ op(false, 0, Word, Op::IncReg(0)),
    /* 0x41 */ op(false, 0, Word, Op::IncReg(1)),
    /* 0x42 */ op(false, 0, Word, Op::IncReg(2)),
    /* 0x43 */ op(false, 0, Word, Op::IncReg(3)),
    /* 0x44 */ op(false, 0, Word, Op::IncReg(4)),
    /* 0x45 */ op(false, 0, Word, Op::IncReg(5)),
    /* 0x46 */ op(false, 0, Word, Op::IncReg(6)),
    /* 0x47 */ op(false, 0, Word, Op::IncReg(7)),
    /* 0x48 */ op(false, 0, Word, Op::DecReg(0)),
    /* 0x49 */ op(false, 0, Word, Op::DecReg(1)),
    /* 0x4A */ op(false, 0, Word, Op::DecReg(2)),
    /* 0x4B */ op(false, 0, Word, Op::DecReg(3)),
    /* 0x4C */ op(false, 0, Word, Op::DecReg(4)),
    /* 0x4D */ op(false, 0, Word, Op::DecReg(5)),
    /* 0x4E */ op(false, 0, Word, Op::DecReg(6)),
    /* 0x4F */ op(false, 0, Word, Op::DecReg(7)),
    /* 0x50 */ op(false, 0, Word, Op::PushReg(0)),
    /* 0x51 */ op(false, 0, Word, Op::PushReg(1)),
    /* 0x52 */ op(false, 0, Word, Op::PushReg(2)),
    /* 0x53 */ op(false, 0, Word, Op::PushReg(3)),
    /* 0x54 */ op(false, 0, Word, Op::PushReg(4)),
    /* 0x55 */ op(false, 0, Word, Op::PushReg(5)),
    /* 0x56 */ op(false, 0, Word, Op::PushReg(6)),
    /* 0x57 */ op(false, 0, Word, Op::PushReg(7)),
    /* 0x58 */ op(false, 0, Word, Op::PopReg(0)),
    /* 0x59 */ op(false, 0, Word, Op::PopReg(1)),
    /* 0x5A */ op(false, 0, Word, Op::PopReg(2)),
    /* 0x5B */ op(false, 0, Word, Op::PopReg(3)),
    /* 0x5C */ op(false, 0, Word, Op::PopReg(4)),
    /* 0x5D */ op(false, 0, Word, Op::PopReg(5)),
    /* 0x5E */ op(false, 0, Word, Op::PopReg(6)),
    /* 0x5F */ op(false, 0, Word, Op::PopReg(7)),
    /* 0x60 */ op(false, 0, Byte, Op::Invalid),
    /* 0x61 */ op(false, 0, Byte, Op::Invalid),
    /* 0x62 */ op(false, 0, Byte, Op::Invalid),
    /* 0x63 */ op(false, 0, Byte, Op::Invalid),
    /* 0x64 */ op(false, 0, Byte, Op::Invalid),
    /* 0x65 */ op(false, 0, Byte, Op::Invalid),
    /* 0x66 */ op(false, 0, Byte, Op::Invalid),
    /* 0x67 */ op(false, 0, Byte, Op::Invalid),
    /* 0x68 */ op(false, 0, Byte, Op::Invalid),
    /* 0x69 */ op(false, 0, Byte, Op::Invalid),
    /* 0x6A */ op(false, 0, Byte, Op::Invalid),
    /* 0x6B */ op(false, 0, Byte, Op::Invalid),
    /* 0x6C */ op(false, 0, Byte, Op::Invalid),
    /* 0x6D */ op(false, 0, Byte, Op::Invalid),
    /* 0x6E */ op(false, 0, Byte, Op::Invalid),
    /* 0x6F */ op(false, 0, Byte, Op::Invalid),
    /* 0x70 */ op(false, 1, Byte, Op::Jcc(0x0)),
    /* 0x71 */ op(false, 1, Byte, Op::Jcc(0x1)),
    /* 0x72 */ op(false, 1, Byte, Op::Jcc(0x2)),
    /* 0x73 */ op(false, 1, Byte, Op::Jcc(0x3)),
    /* 0x74 */ op(false, 1, Byte, Op::Jcc(0x4)),
    /* 0x75 */ op(false, 1, Byte, Op::Jcc(0x5)),
    /* 0x76 */ op(false, 1, Byte, Op::Jcc(0x6)),
    /* 0x77 */ op(false, 1, Byte, Op::Jcc(0x7)),
    /* 0x78 */ op(false, 1, Byte, Op::Jcc(0x8)),
    /* 0x79 */ op(false, 1, Byte, Op::Jcc(0x9)),
    /* 0x7A */ op(false, 1, Byte, Op::Jcc(0xA)),
    /* 0x7B */ op(false, 1, Byte, Op::Jcc(0xB)),
    /* 0x7C */ op(false, 1, Byte, Op::Jcc(0xC)),
    /* 0x7D */ op(false, 1, Byte, Op::Jcc(0xD)),
    /* 0x7E */ op(false, 1, Byte, Op::Jcc(0xE)),
    /* 0x7F */ op(false, 1, Byte, Op::Jcc(0xF)),
    /* 0x80 */ op(true,  1, Byte, Op::AluGroupImm),
    /* 0x81 */ op(true,  2, Word, Op::AluGroupImm),
    /* 0x82 */ op(true,  1, Byte, Op::AluGroupImm), // alias of 0x80
    /* 0x83 */ op(true,  1, Word, Op::AluGroupImm), // imm8 sign-extended
    /* 0x84 */ op(true,  0, Byte, Op::TestRmReg),
    /* 0x85 */ op(true,  0, Word, Op::TestRmReg),
    /* 0x86 */ op(true,  0, Byte, Op::XchgRmReg),
    /* 0x87 */ op(true,  0, Word, Op::XchgRmReg),
    /* 0x88 */ op(true,  0, Byte, Op::MovRmReg(Dir::RmReg)),
    /* 0x89 */ op(true,  0, Word, Op::MovRmReg(Dir::RmReg)),
    /* 0x8A */ op(true,  0, Byte, Op::MovRmReg(Dir::RegRm)),
    /* 0x8B */ op(true,  0, Word, Op::MovRmReg(Dir::RegRm)),
    /* 0x8C */ op(true,  0, Word, Op::MovSegRm(Dir::RmReg)),
    /* 0x8D */ op(true,  0, Word, Op::Lea),
    /* 0x8E */ op(true,  0, Word, Op::MovSegRm(Dir::RegRm)),
    /* 0x8F */ op(true,  0, Word, Op::PopRm),
    /* 0x90 */ op(false, 0, Word, Op::XchgAxReg(0)), // NOP
    /* 0x91 */ op(false, 0, Word, Op::XchgAxReg(1)),
    /* 0x92 */ op(false, 0, Word, Op::XchgAxReg(2)),
    /* 0x93 */ op(false, 0, Word, Op::XchgAxReg(3)),
    /* 0x94 */ op(false, 0, Word, Op::XchgAxReg(4)),
    /* 0x95 */ op(false, 0, Word, Op::XchgAxReg(5)),
    /* 0x96 */ op(false, 0, Word, Op::XchgAxReg(6)),
    /* 0x97 */ op(false, 0, Word, Op::XchgAxReg(7)),
    /* 0x98 */ op(false, 0, Word, Op::Cbw),
    /* 0x99 */ op(false, 0, Word, Op::Cwd),
    /* 0x9A */ op(false, 4, Word, Op::CallFar),
    /* 0x9B */ op(false, 0, Byte, Op::Wait),
    /* 0x9C */ op(false, 0, Word, Op::Pushf),
    /* 0x9D */ op(false, 0, Word, Op::Popf),
    /* 0x9E */ op(false, 0, Byte, Op::Sahf),
    /* 0x9F */ op(false, 0, Byte, Op::Lahf),
    /* 0xA0 */ op(false, 2, Byte, Op::MovAccMem(Dir::RegRm)),
    /* 0xA1 */ op(false, 2, Word, Op::MovAccMem(Dir::RegRm)),
    /* 0xA2 */ op(false, 2, Byte, Op::MovAccMem(Dir::RmReg)),
    /* 0xA3 */ op(false, 2, Word, Op::MovAccMem(Dir::RmReg)),
    /* 0xA4 */ op(false, 0, Byte, Op::Movs),
    /* 0xA5 */ op(false, 0, Word, Op::Movs),
    /* 0xA6 */ op(false, 0, Byte, Op::Cmps),
    /* 0xA7 */ op(false, 0, Word, Op::Cmps),
    /* 0xA8 */ op(false, 1, Byte, Op::TestAccImm),
    /* 0xA9 */ op(false, 2, Word, Op::TestAccImm),
    /* 0xAA */ op(false, 0, Byte, Op::Stos),
    /* 0xAB */ op(false, 0, Word, Op::Stos),
    /* 0xAC */ op(false, 0, Byte, Op::Lods),
    /* 0xAD */ op(false, 0, Word, Op::Lods),
    /* 0xAE */ op(false, 0, Byte, Op::Scas),
    /* 0xAF */ op(false, 0, Word, Op::Scas),
    /* 0xB0 */ op(false, 1, Byte, Op::MovRegImm(0)),
    /* 0xB1 */ op(false, 1, Byte, Op::MovRegImm(1)),
    /* 0xB2 */ op(false, 1, Byte, Op::MovRegImm(2)),
    /* 0xB3 */ op(false, 1, Byte, Op::MovRegImm(3)),
    /* 0xB4 */ op(false, 1, Byte, Op::MovRegImm(4)),
    /* 0xB5 */ op(false, 1, Byte, Op::MovRegImm(5)),
    /* 0xB6 */ op(false, 1, Byte, Op::MovRegImm(6)),
    /* 0xB7 */ op(false, 1, Byte, Op::MovRegImm(7)),
    /* 0xB8 */ op(false, 2, Word, Op::MovRegImm(0)),
    /* 0xB9 */ op(false, 2, Word, Op::MovRegImm(1)),
    /* 0xBA */ op(false, 2, Word, Op::MovRegImm(2)),
    /* 0xBB */ op(false, 2, Word, Op::MovRegImm(3)),
    /* 0xBC */ op(false, 2, Word, Op::MovRegImm(4)),
    /* 0xBD */ op(false, 2, Word, Op::MovRegImm(5)),
    /* 0xBE */ op(false, 2, Word, Op::MovRegImm(6)),
    /* 0xBF */ op(false, 2, Word, Op::MovRegImm(7)),
    /* 0xC0 */ op(false, 0, Byte, Op::Invalid),
    /* 0xC1 */ op(false, 0, Byte, Op::Invalid),
    /* 0xC2 */ op(false, 2, Word, Op::RetNearImm),
    /* 0xC3 */ op(false, 0, Word, Op::RetNear),
    /* 0xC4 */ op(true,  0, Word, Op::Les),
    /* 0xC5 */ op(true,  0, Word, Op::Lds),
    /* 0xC6 */ op(true,  1, Byte, Op::MovRmImm),
    /* 0xC7 */ op(true,  2, Word, Op::MovRmImm),
    /* 0xC8 */ op(false, 0, Byte, Op::Invalid),
    /* 0xC9 */ op(false, 0, Byte, Op::Invalid),
    /* 0xCA */ op(false, 2, Word, Op::RetFarImm),
    /* 0xCB */ op(false, 0, Word, Op::RetFar),
    /* 0xCC */ op(false, 0, Byte, Op::Int3),
    /* 0xCD */ op(false, 1, Byte, Op::IntImm),
    /* 0xCE */ op(false, 0, Byte, Op::Into),
    /* 0xCF */ op(false, 0, Word, Op::Iret),
    /* 0xD0 */ op(true,  0, Byte, Op::ShiftGroup(ShiftCount::One)),
    /* 0xD1 */ op(true,  0, Word, Op::ShiftGroup(ShiftCount::One)),
    /* 0xD2 */ op(true,  0, Byte, Op::ShiftGroup(ShiftCount::Cl)),
    /* 0xD3 */ op(true,  0, Word, Op::ShiftGroup(ShiftCount::Cl)),
    /* 0xD4 */ op(false, 1, Byte, Op::Aam),
    /* 0xD5 */ op(false, 1, Byte, Op::Aad),
    /* 0xD6 */ op(false, 0, Byte, Op::Invalid),
    /* 0xD7 */ op(false, 0, Byte, Op::Xlat),
    /* 0xD8 */ op(true,  0, Word, Op::Esc),
    /* 0xD9 */ op(true,  0, Word, Op::Esc),
    /* 0xDA */ op(true,  0, Word, Op::Esc),
    /* 0xDB */ op(true,  0, Word, Op::Esc),
    /* 0xDC */ op(true,  0, Word, Op::Esc),
    /* 0xDD */ op(true,  0, Word, Op::Esc),
    /* 0xDE */ op(true,  0, Word, Op::Esc),
    /* 0xDF */ op(true,  0, Word, Op::Esc),
    /* 0xE0 */ op(false, 1, Byte, Op::Loopne),
    /* 0xE1 */ op(false, 1, Byte, Op::Loope),
    /* 0xE2 */ op(false, 1, Byte, Op::Loop),
    /* 0xE3 */ op(false, 1, Byte, Op::Jcxz),
    /* 0xE4 */ op(false, 1, Byte, Op::InImm),
    /* 0xE5 */ op(false, 1, Word, Op::InImm),
    /* 0xE6 */ op(false, 1, Byte, Op::OutImm),
    /* 0xE7 */ op(false, 1, Word, Op::OutImm),
    /* 0xE8 */ op(false, 2, Word, Op::CallNear),
    /* 0xE9 */ op(false, 2, Word, Op::JmpNear),
    /* 0xEA */ op(false, 4, Word, Op::JmpFar),
    /* 0xEB */ op(false, 1, Byte, Op::JmpShort),
    /* 0xEC */ op(false, 0, Byte, Op::InDx),
    /* 0xED */ op(false, 0, Word, Op::InDx),
    /* 0xEE */ op(false, 0, Byte, Op::OutDx),
    /* 0xEF */ op(false, 0, Word, Op::OutDx),
    /* 0xF0 */ op(false, 0, Byte, Op::Invalid), // LOCK prefix
    /* 0xF1 */ op(false, 0, Byte, Op::Invalid),
    /* 0xF2 */ op(false, 0, Byte, Op::Invalid), // REPNE prefix
    /* 0xF3 */ op(false, 0, Byte, Op::Invalid), // REP prefix
    /* 0xF4 */ op(false, 0, Byte, Op::Hlt),
    /* 0xF5 */ op(false, 0, Byte, Op::Cmc),
    /* 0xF6 */ op(true,  0, Byte, Op::Group3),
    /* 0xF7 */ op(true,  0, Word, Op::Group3),
    /* 0xF8 */ op(false, 0, Byte, Op::Clc),
    /* 0xF9 */ op(false, 0, Byte, Op::Stc),
    /* 0xFA */ op(false, 0, Byte, Op::Cli),
    /* 0xFB */ op(false, 0, Byte, Op::Sti),
    /* 0xFC */ op(false, 0, Byte, Op::Cld),
    /* 0xFD */ op(false, 0, Byte, Op::Std),
    /* 0xFE */ op(true,  0, Byte, Op::Group4),
    /* 0xFF */ op(true,  0, Word, Op::Group5),
];

/// A fully decoded instruction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Instruction {
    /// CS:IP of the first byte, kept for error reporting.
    pub cs: u16,
    pub ip: u16,
    pub opcode: u8,
    pub modrm: Option<u8>,
    pub segment_override: Option<SegmentRegister>,
    pub rep: Option<RepPrefix>,
    #[allow(dead_code)]
    pub lock: bool,
    /// ModR/M displacement; disp8 is sign-extended to 16 bits.
    pub disp: u16,
    /// Immediate bytes, zero-extended. A 4-byte far pointer stores the
    /// offset in the low word and the segment in the high word.
    pub imm: u32,
}

impl Instruction {
    #[inline]
    pub fn mod_bits(&self) -> u8 {
        self.modrm.unwrap_or(0) >> 6
    }

    #[inline]
    pub fn reg_bits(&self) -> u8 {
        (self.modrm.unwrap_or(0) >> 3) & 0x07
    }

    #[inline]
    pub fn rm_bits(&self) -> u8 {
        self.modrm.unwrap_or(0) & 0x07
    }
}

/// Only one prefix from each group is meaningful; a run longer than this
/// is treated as a decode failure rather than looping on bad bytes.
const MAX_PREFIX_BYTES: u32 = 8;

impl Cpu {
    /// Fetch one code byte at CS:IP and advance IP.
    pub(crate) fn fetch_byte(&mut self, bus: &mut impl Bus) -> u8 {
        let address = ((self.segment(SegmentRegister::Cs) as u32) << 4)
            .wrapping_add(self.ip as u32)
            & 0xF_FFFF;
        self.ip = self.ip.wrapping_add(1);
        bus.read_byte(address)
    }

    fn fetch_word(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = self.fetch_byte(bus) as u16;
        let hi = self.fetch_byte(bus) as u16;
        lo | (hi << 8)
    }

    /// Decode the instruction at CS:IP, advancing IP past it.
    pub(crate) fn fetch_instruction(
        &mut self,
        bus: &mut impl Bus,
    ) -> Result<Instruction, ExecuteError> {
        let start_cs = self.segment(SegmentRegister::Cs);
        let start_ip = self.ip;

        let mut segment_override = None;
        let mut rep = None;
        let mut lock = false;

        // Prefix loop: up to one each of segment-override, LOCK, REP/REPNE.
        let mut prefix_count = 0;
        let opcode = loop {
            let byte = self.fetch_byte(bus);
            match byte {
                0x26 => segment_override = Some(SegmentRegister::Es),
                0x2E => segment_override = Some(SegmentRegister::Cs),
                0x36 => segment_override = Some(SegmentRegister::Ss),
                0x3E => segment_override = Some(SegmentRegister::Ds),
                0xF0 => lock = true,
                0xF2 => rep = Some(RepPrefix::RepNe),
                0xF3 => rep = Some(RepPrefix::Rep),
                _ => break byte,
            }
            prefix_count += 1;
            if prefix_count > MAX_PREFIX_BYTES {
                return Err(ExecuteError::InvalidOpcode {
                    opcode: byte,
                    cs: start_cs,
                    ip: start_ip,
                });
            }
        };

        let info = &OPCODES[opcode as usize];
        let mut instruction = Instruction {
            cs: start_cs,
            ip: start_ip,
            opcode,
            modrm: None,
            segment_override,
            rep,
            lock,
            disp: 0,
            imm: 0,
        };

        if info.modrm {
            let modrm = self.fetch_byte(bus);
            instruction.modrm = Some(modrm);
            let mod_bits = modrm >> 6;
            let rm_bits = modrm & 0x07;
            instruction.disp = match (mod_bits, rm_bits) {
                // Direct 16-bit address.
                (0, 6) => self.fetch_word(bus),
                (0, _) | (3, _) => 0,
                (1, _) => self.fetch_byte(bus) as i8 as u16,
                (2, _) => self.fetch_word(bus),
                _ => 0,
            };
        }

        // Group 3 TEST (reg field 0 or 1) carries an immediate the table
        // cannot describe; everything else uses the table's size.
        let imm_size = if matches!(info.op, Op::Group3) && instruction.reg_bits() <= 1 {
            info.width.bytes() as u8
        } else {
            info.imm
        };

        instruction.imm = match imm_size {
            1 => self.fetch_byte(bus) as u32,
            2 => self.fetch_word(bus) as u32,
            4 => {
                let offset = self.fetch_word(bus) as u32;
                let segment = self.fetch_word(bus) as u32;
                offset | (segment << 16)
            }
            _ => 0,
        };

        Ok(instruction)
    }

    /// Effective address of a ModR/M memory operand.
    pub(crate) fn memory_operand_address(&self, instruction: &Instruction) -> MemoryAddress {
        let regs = |r: super::operands::Register| self.register(r);
        use super::operands::Register::{Bp, Bx, Di, Si};

        let (base, default_segment) = match instruction.rm_bits() {
            0 => (regs(Bx).wrapping_add(regs(Si)), SegmentRegister::Ds),
            1 => (regs(Bx).wrapping_add(regs(Di)), SegmentRegister::Ds),
            2 => (regs(Bp).wrapping_add(regs(Si)), SegmentRegister::Ss),
            3 => (regs(Bp).wrapping_add(regs(Di)), SegmentRegister::Ss),
            4 => (regs(Si), SegmentRegister::Ds),
            5 => (regs(Di), SegmentRegister::Ds),
            6 => {
                if instruction.mod_bits() == 0 {
                    // disp16 direct address.
                    (0, SegmentRegister::Ds)
                } else {
                    (regs(Bp), SegmentRegister::Ss)
                }
            }
            _ => (regs(Bx), SegmentRegister::Ds),
        };

        MemoryAddress {
            segment: instruction.segment_override.unwrap_or(default_segment),
            offset: base.wrapping_add(instruction.disp),
        }
    }

    /// Register or memory operand address from the ModR/M byte.
    pub(crate) fn rm_operand_address(
        &self,
        instruction: &Instruction,
        width: Width,
    ) -> OperandAddress {
        if instruction.mod_bits() == 3 {
            OperandAddress::Register(self.register_address(instruction.rm_bits(), width))
        } else {
            OperandAddress::Memory(self.memory_operand_address(instruction))
        }
    }

    /// Register operand address from the ModR/M reg field.
    pub(crate) fn reg_operand_address(
        &self,
        instruction: &Instruction,
        width: Width,
    ) -> OperandAddress {
        OperandAddress::Register(self.register_address(instruction.reg_bits(), width))
    }
}
