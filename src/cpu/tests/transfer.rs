//! Data movement, stack and segment instructions

use super::*;

#[test]
fn test_mov_reg_imm() {
    // MOV AX,0x1234; MOV BL,0x56; MOV BH,0x78
    let (mut cpu, mut bus) = cpu_with_program(&[0xB8, 0x34, 0x12, 0xB3, 0x56, 0xB7, 0x78]);
    for _ in 0..3 {
        step_ok(&mut cpu, &mut bus);
    }
    assert_eq!(cpu.register(Register::Ax), 0x1234);
    assert_eq!(cpu.register(Register::Bx), 0x7856);
}

#[test]
fn test_mov_mem_round_trip() {
    // MOV AX,0xBEEF; MOV [0x0100],AX; MOV BX,[0x0100]
    let (mut cpu, mut bus) = cpu_with_program(&[
        0xB8, 0xEF, 0xBE, 0xA3, 0x00, 0x01, 0x8B, 0x1E, 0x00, 0x01,
    ]);
    for _ in 0..3 {
        step_ok(&mut cpu, &mut bus);
    }
    // DS = 0x3000, so physical 0x30100.
    assert_eq!(bus.memory[0x30100], 0xEF);
    assert_eq!(bus.memory[0x30101], 0xBE);
    assert_eq!(cpu.register(Register::Bx), 0xBEEF);
}

#[test]
fn test_mov_modrm_addressing_modes() {
    // MOV BX,0x0200; MOV SI,0x0010; MOV byte [BX+SI+5],0xAB
    let (mut cpu, mut bus) = cpu_with_program(&[
        0xBB, 0x00, 0x02, 0xBE, 0x10, 0x00, 0xC6, 0x40, 0x05, 0xAB,
    ]);
    for _ in 0..3 {
        step_ok(&mut cpu, &mut bus);
    }
    assert_eq!(bus.memory[0x30215], 0xAB);
}

#[test]
fn test_bp_defaults_to_stack_segment() {
    // MOV BP,0x0100; MOV byte [BP],0x5A
    let (mut cpu, mut bus) = cpu_with_program(&[0xBD, 0x00, 0x01, 0xC6, 0x46, 0x00, 0x5A]);
    step_ok(&mut cpu, &mut bus);
    step_ok(&mut cpu, &mut bus);
    // SS = 0x2000, so physical 0x20100, not DS-relative.
    assert_eq!(bus.memory[0x20100], 0x5A);
    assert_eq!(bus.memory[0x30100], 0x00);
}

#[test]
fn test_segment_override_prefix() {
    // MOV BX,0x0100; ES: MOV byte [BX],0x77
    let (mut cpu, mut bus) = cpu_with_program(&[0xBB, 0x00, 0x01, 0x26, 0xC6, 0x07, 0x77]);
    step_ok(&mut cpu, &mut bus);
    step_ok(&mut cpu, &mut bus);
    // ES = 0x4000.
    assert_eq!(bus.memory[0x40100], 0x77);
}

#[test]
fn test_push_pop() {
    // MOV AX,0x1234; PUSH AX; POP BX
    let (mut cpu, mut bus) = cpu_with_program(&[0xB8, 0x34, 0x12, 0x50, 0x5B]);
    for _ in 0..3 {
        step_ok(&mut cpu, &mut bus);
    }
    assert_eq!(cpu.register(Register::Bx), 0x1234);
    assert_eq!(cpu.register(Register::Sp), 0xFFFE);
}

#[test]
fn test_push_pop_segment() {
    // PUSH DS; POP ES
    let (mut cpu, mut bus) = cpu_with_program(&[0x1E, 0x07]);
    step_ok(&mut cpu, &mut bus);
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.segment(SegmentRegister::Es), 0x3000);
}

#[test]
fn test_pushf_popf() {
    // STC; PUSHF; CLC; POPF -> CF restored
    let (mut cpu, mut bus) = cpu_with_program(&[0xF9, 0x9C, 0xF8, 0x9D]);
    for _ in 0..4 {
        step_ok(&mut cpu, &mut bus);
    }
    assert!(cpu.flags.contains(Flags::CARRY));
}

#[test]
fn test_xchg() {
    // MOV AX,0x1111; MOV BX,0x2222; XCHG AX,BX
    let (mut cpu, mut bus) = cpu_with_program(&[0xB8, 0x11, 0x11, 0xBB, 0x22, 0x22, 0x93]);
    for _ in 0..3 {
        step_ok(&mut cpu, &mut bus);
    }
    assert_eq!(cpu.register(Register::Ax), 0x2222);
    assert_eq!(cpu.register(Register::Bx), 0x1111);
}

#[test]
fn test_nop_is_harmless() {
    let (mut cpu, mut bus) = cpu_with_program(&[0x90]);
    let ax = cpu.register(Register::Ax);
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.register(Register::Ax), ax);
    assert_eq!(cpu.ip, 1);
}

#[test]
fn test_lea() {
    // MOV BX,0x0200; MOV SI,0x0034; LEA AX,[BX+SI+0x12]
    let (mut cpu, mut bus) = cpu_with_program(&[
        0xBB, 0x00, 0x02, 0xBE, 0x34, 0x00, 0x8D, 0x40, 0x12,
    ]);
    for _ in 0..3 {
        step_ok(&mut cpu, &mut bus);
    }
    assert_eq!(cpu.register(Register::Ax), 0x0246);
}

#[test]
fn test_les_loads_pointer() {
    // Far pointer 5678:1234 at DS:0x0100, then LES BX,[0x0100]
    let (mut cpu, mut bus) = cpu_with_program(&[0xC4, 0x1E, 0x00, 0x01]);
    bus.memory[0x30100] = 0x34;
    bus.memory[0x30101] = 0x12;
    bus.memory[0x30102] = 0x78;
    bus.memory[0x30103] = 0x56;
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.register(Register::Bx), 0x1234);
    assert_eq!(cpu.segment(SegmentRegister::Es), 0x5678);
}

#[test]
fn test_mov_segment_to_rm() {
    // MOV AX,DS via 0x8C
    let (mut cpu, mut bus) = cpu_with_program(&[0x8C, 0xD8]);
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.register(Register::Ax), 0x3000);
}

#[test]
fn test_mov_rm_to_segment() {
    // MOV AX,0x5000; MOV ES,AX
    let (mut cpu, mut bus) = cpu_with_program(&[0xB8, 0x00, 0x50, 0x8E, 0xC0]);
    step_ok(&mut cpu, &mut bus);
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.segment(SegmentRegister::Es), 0x5000);
}

#[test]
fn test_xlat() {
    // MOV BX,0x0100; MOV AL,0x05; XLAT
    let (mut cpu, mut bus) = cpu_with_program(&[0xBB, 0x00, 0x01, 0xB0, 0x05, 0xD7]);
    bus.memory[0x30105] = 0x99;
    for _ in 0..3 {
        step_ok(&mut cpu, &mut bus);
    }
    assert_eq!(cpu.al(), 0x99);
}

#[test]
fn test_lahf_sahf_round_trip() {
    // STC; LAHF; CLC; SAHF -> CF restored from AH
    let (mut cpu, mut bus) = cpu_with_program(&[0xF9, 0x9F, 0xF8, 0x9E]);
    for _ in 0..4 {
        step_ok(&mut cpu, &mut bus);
    }
    assert!(cpu.flags.contains(Flags::CARRY));
}

#[test]
fn test_in_out_ports() {
    // MOV DX,0x0061; IN AL,DX; OUT 0x43,AL
    let (mut cpu, mut bus) = cpu_with_program(&[0xBA, 0x61, 0x00, 0xEC, 0xE6, 0x43]);
    bus.port_values.insert(0x61, 0x4C);
    for _ in 0..3 {
        step_ok(&mut cpu, &mut bus);
    }
    assert_eq!(cpu.al(), 0x4C);
    assert_eq!(bus.port_writes, vec![(0x43, 0x4C)]);
}

#[test]
fn test_undefined_port_reads_0xff() {
    // IN AL,0x7F
    let (mut cpu, mut bus) = cpu_with_program(&[0xE4, 0x7F]);
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.al(), 0xFF);
}
