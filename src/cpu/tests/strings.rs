//! String instructions and REP prefixes

use super::*;

#[test]
fn test_movsb() {
    // MOV SI,0x10; MOV DI,0x20; MOVSB
    let (mut cpu, mut bus) = cpu_with_program(&[0xBE, 0x10, 0x00, 0xBF, 0x20, 0x00, 0xA4]);
    bus.memory[0x30010] = 0x5A;
    for _ in 0..3 {
        step_ok(&mut cpu, &mut bus);
    }
    // Source DS:SI, destination ES:DI.
    assert_eq!(bus.memory[0x40020], 0x5A);
    assert_eq!(cpu.register(Register::Si), 0x11);
    assert_eq!(cpu.register(Register::Di), 0x21);
}

#[test]
fn test_rep_movsb_copies_block() {
    // MOV SI,0; MOV DI,0; MOV CX,8; REP MOVSB
    let (mut cpu, mut bus) = cpu_with_program(&[
        0xBE, 0x00, 0x00, 0xBF, 0x00, 0x00, 0xB9, 0x08, 0x00, 0xF3, 0xA4,
    ]);
    for i in 0..8 {
        bus.memory[0x30000 + i] = i as u8 + 1;
    }
    for _ in 0..4 {
        step_ok(&mut cpu, &mut bus);
    }
    for i in 0..8 {
        assert_eq!(bus.memory[0x40000 + i], i as u8 + 1);
    }
    assert_eq!(cpu.register(Register::Cx), 0);
    assert_eq!(cpu.register(Register::Si), 8);
}

#[test]
fn test_rep_with_cx_zero_is_noop() {
    // MOV CX,0; REP MOVSB
    let (mut cpu, mut bus) = cpu_with_program(&[0xB9, 0x00, 0x00, 0xF3, 0xA4]);
    bus.memory[0x30000] = 0xAA;
    step_ok(&mut cpu, &mut bus);
    step_ok(&mut cpu, &mut bus);
    assert_eq!(bus.memory[0x40000], 0x00);
    assert_eq!(cpu.register(Register::Si), 0);
}

#[test]
fn test_movsw_direction_flag() {
    // STD; MOV SI,0x10; MOV DI,0x20; MOVSW
    let (mut cpu, mut bus) = cpu_with_program(&[
        0xFD, 0xBE, 0x10, 0x00, 0xBF, 0x20, 0x00, 0xA5,
    ]);
    bus.memory[0x30010] = 0x34;
    bus.memory[0x30011] = 0x12;
    for _ in 0..4 {
        step_ok(&mut cpu, &mut bus);
    }
    assert_eq!(bus.memory[0x40020], 0x34);
    assert_eq!(bus.memory[0x40021], 0x12);
    // DF set: SI and DI move backwards by the operand size.
    assert_eq!(cpu.register(Register::Si), 0x0E);
    assert_eq!(cpu.register(Register::Di), 0x1E);
}

#[test]
fn test_rep_stosw_fills() {
    // MOV AX,0x0720; MOV DI,0; MOV CX,4; REP STOSW
    let (mut cpu, mut bus) = cpu_with_program(&[
        0xB8, 0x20, 0x07, 0xBF, 0x00, 0x00, 0xB9, 0x04, 0x00, 0xF3, 0xAB,
    ]);
    for _ in 0..4 {
        step_ok(&mut cpu, &mut bus);
    }
    for cell in 0..4 {
        assert_eq!(bus.memory[0x40000 + cell * 2], 0x20);
        assert_eq!(bus.memory[0x40000 + cell * 2 + 1], 0x07);
    }
    assert_eq!(cpu.register(Register::Di), 8);
}

#[test]
fn test_lodsb() {
    // MOV SI,0x40; LODSB
    let (mut cpu, mut bus) = cpu_with_program(&[0xBE, 0x40, 0x00, 0xAC]);
    bus.memory[0x30040] = 0x7E;
    step_ok(&mut cpu, &mut bus);
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.al(), 0x7E);
    assert_eq!(cpu.register(Register::Si), 0x41);
}

#[test]
fn test_repne_scasb_finds_byte() {
    // MOV AL,0x33; MOV DI,0; MOV CX,8; REPNE SCASB
    let (mut cpu, mut bus) = cpu_with_program(&[
        0xB0, 0x33, 0xBF, 0x00, 0x00, 0xB9, 0x08, 0x00, 0xF2, 0xAE,
    ]);
    bus.memory[0x40003] = 0x33;
    for _ in 0..4 {
        step_ok(&mut cpu, &mut bus);
    }
    // Stopped after the match at offset 3.
    assert!(cpu.flags.contains(Flags::ZERO));
    assert_eq!(cpu.register(Register::Di), 4);
    assert_eq!(cpu.register(Register::Cx), 4);
}

#[test]
fn test_repe_cmpsb_stops_on_mismatch() {
    // MOV SI,0; MOV DI,0; MOV CX,4; REPE CMPSB
    let (mut cpu, mut bus) = cpu_with_program(&[
        0xBE, 0x00, 0x00, 0xBF, 0x00, 0x00, 0xB9, 0x04, 0x00, 0xF3, 0xA6,
    ]);
    for i in 0..4 {
        bus.memory[0x30000 + i] = b'A' + i as u8;
        bus.memory[0x40000 + i] = b'A' + i as u8;
    }
    bus.memory[0x40002] = b'X'; // mismatch at index 2
    for _ in 0..4 {
        step_ok(&mut cpu, &mut bus);
    }
    assert!(!cpu.flags.contains(Flags::ZERO));
    assert_eq!(cpu.register(Register::Si), 3);
    assert_eq!(cpu.register(Register::Cx), 1);
}

#[test]
fn test_movs_honours_source_segment_override() {
    // MOV SI,0x10; MOV DI,0x10; ES: MOVSB (source segment becomes ES)
    let (mut cpu, mut bus) = cpu_with_program(&[
        0xBE, 0x10, 0x00, 0xBF, 0x10, 0x00, 0x26, 0xA4,
    ]);
    bus.memory[0x40010] = 0xC3;
    bus.memory[0x30010] = 0x11;
    for _ in 0..3 {
        step_ok(&mut cpu, &mut bus);
    }
    // ES:10 copied onto ES:10 - destination stays ES regardless.
    assert_eq!(bus.memory[0x40010], 0xC3);
}
