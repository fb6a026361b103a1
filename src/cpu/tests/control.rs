//! Control flow: jumps, calls, interrupts, HLT

use super::*;
use super::super::ExecuteError;

#[test]
fn test_conditional_jumps() {
    // XOR AX,AX (ZF set); JZ +2; MOV BL,1 (skipped); MOV BH,2
    let (mut cpu, mut bus) = cpu_with_program(&[
        0x31, 0xC0, 0x74, 0x02, 0xB3, 0x01, 0xB7, 0x02,
    ]);
    for _ in 0..3 {
        step_ok(&mut cpu, &mut bus);
    }
    assert_eq!(cpu.bl(), 0x00);
    assert_eq!(cpu.bh(), 0x02);
}

#[test]
fn test_jnz_not_taken() {
    // XOR AX,AX; JNZ +2; MOV BL,1
    let (mut cpu, mut bus) = cpu_with_program(&[0x31, 0xC0, 0x75, 0x02, 0xB3, 0x01]);
    for _ in 0..3 {
        step_ok(&mut cpu, &mut bus);
    }
    assert_eq!(cpu.bl(), 0x01);
}

#[test]
fn test_signed_condition_codes() {
    // MOV AL,0x80; CMP AL,0x01 (result 0x7F, OF set); JL +2; MOV BL,1
    let (mut cpu, mut bus) = cpu_with_program(&[
        0xB0, 0x80, 0x3C, 0x01, 0x7C, 0x02, 0xB3, 0x01,
    ]);
    for _ in 0..3 {
        step_ok(&mut cpu, &mut bus);
    }
    // -128 < 1, so the jump is taken.
    assert_eq!(cpu.bl(), 0x00);
}

#[test]
fn test_jmp_short_backwards() {
    // JMP +2; (skipped byte); label: HLT at 4; JMP -4 lands on HLT
    let (mut cpu, mut bus) = cpu_with_program(&[0xEB, 0x02, 0x90, 0x90, 0xF4]);
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.ip, 4);
}

#[test]
fn test_jmp_near_and_far() {
    // JMP near +0x10
    let (mut cpu, mut bus) = cpu_with_program(&[0xE9, 0x10, 0x00]);
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.ip, 0x13);

    // JMP FAR 2000:0005
    let (mut cpu, mut bus) = cpu_with_program(&[0xEA, 0x05, 0x00, 0x00, 0x20]);
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.segment(SegmentRegister::Cs), 0x2000);
    assert_eq!(cpu.ip, 0x0005);
}

#[test]
fn test_call_ret_near() {
    // CALL +2; HLT; HLT; MOV AX,7; RET
    let (mut cpu, mut bus) = cpu_with_program(&[
        0xE8, 0x02, 0x00, 0xF4, 0xF4, 0xB8, 0x07, 0x00, 0xC3,
    ]);
    step_ok(&mut cpu, &mut bus); // CALL
    assert_eq!(cpu.ip, 0x0005);
    step_ok(&mut cpu, &mut bus); // MOV
    step_ok(&mut cpu, &mut bus); // RET
    assert_eq!(cpu.ip, 0x0003);
    assert_eq!(cpu.register(Register::Ax), 7);
    assert_eq!(cpu.register(Register::Sp), 0xFFFE);
}

#[test]
fn test_call_far_and_retf() {
    // CALL FAR 1000:0010; target: RETF
    let (mut cpu, mut bus) = cpu_with_program(&[0x9A, 0x10, 0x00, 0x00, 0x10]);
    bus.memory[0x10010] = 0xCB; // RETF
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.ip, 0x0010);
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.segment(SegmentRegister::Cs), 0x1000);
    assert_eq!(cpu.ip, 0x0005);
}

#[test]
fn test_ret_imm_discards_arguments() {
    // MOV AX,0xAAAA; PUSH AX; CALL +0; RET 2 at target
    let (mut cpu, mut bus) = cpu_with_program(&[
        0xB8, 0xAA, 0xAA, 0x50, 0xE8, 0x00, 0x00, 0xF4,
    ]);
    bus.memory[0x10007] = 0xC2; // overwrite HLT with RET 2
    bus.memory[0x10008] = 0x02;
    bus.memory[0x10009] = 0x00;
    for _ in 0..4 {
        step_ok(&mut cpu, &mut bus);
    }
    assert_eq!(cpu.ip, 0x0007);
    // Return address and the pushed word are both gone.
    assert_eq!(cpu.register(Register::Sp), 0xFFFE);
}

#[test]
fn test_loop_decrements_cx() {
    // MOV CX,3; label: LOOP label
    let (mut cpu, mut bus) = cpu_with_program(&[0xB9, 0x03, 0x00, 0xE2, 0xFE]);
    step_ok(&mut cpu, &mut bus);
    step_ok(&mut cpu, &mut bus); // taken, CX=2
    assert_eq!(cpu.ip, 0x0003);
    step_ok(&mut cpu, &mut bus); // taken, CX=1
    step_ok(&mut cpu, &mut bus); // not taken, CX=0
    assert_eq!(cpu.register(Register::Cx), 0);
    assert_eq!(cpu.ip, 0x0005);
}

#[test]
fn test_jcxz() {
    // MOV CX,0; JCXZ +2; MOV BL,1
    let (mut cpu, mut bus) = cpu_with_program(&[0xB9, 0x00, 0x00, 0xE3, 0x02, 0xB3, 0x01]);
    step_ok(&mut cpu, &mut bus);
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.ip, 0x0007);
}

#[test]
fn test_int_through_vector_table() {
    // Vector 0x21 -> 2000:0100, handler is IRET.
    let (mut cpu, mut bus) = cpu_with_program(&[0xCD, 0x21]);
    bus.memory[0x21 * 4] = 0x00;
    bus.memory[0x21 * 4 + 1] = 0x01;
    bus.memory[0x21 * 4 + 2] = 0x00;
    bus.memory[0x21 * 4 + 3] = 0x20;
    bus.memory[0x20100] = 0xCF; // IRET

    cpu.flags.insert(Flags::INTERRUPT);
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.segment(SegmentRegister::Cs), 0x2000);
    assert_eq!(cpu.ip, 0x0100);
    // INT clears IF and TF.
    assert!(!cpu.flags.contains(Flags::INTERRUPT));

    step_ok(&mut cpu, &mut bus); // IRET
    assert_eq!(cpu.segment(SegmentRegister::Cs), 0x1000);
    assert_eq!(cpu.ip, 0x0002);
    assert!(cpu.flags.contains(Flags::INTERRUPT));
}

#[test]
fn test_int_with_empty_vector_reports_unhandled() {
    let (mut cpu, mut bus) = cpu_with_program(&[0xCD, 0x10]);
    let outcome = step_ok(&mut cpu, &mut bus);
    assert_eq!(outcome, ExecuteOutcome::UnhandledInterrupt(0x10));
    // IP has advanced past the instruction so a service layer can return.
    assert_eq!(cpu.ip, 0x0002);
}

#[test]
fn test_into_only_fires_on_overflow() {
    // INTO with OF clear falls through.
    let (mut cpu, mut bus) = cpu_with_program(&[0xCE]);
    let outcome = step_ok(&mut cpu, &mut bus);
    assert_eq!(outcome, ExecuteOutcome::Success);

    let (mut cpu, mut bus) = cpu_with_program(&[0xCE]);
    cpu.flags.insert(Flags::OVERFLOW);
    let outcome = step_ok(&mut cpu, &mut bus);
    assert_eq!(outcome, ExecuteOutcome::UnhandledInterrupt(4));
}

#[test]
fn test_hlt_latches_until_interrupt() {
    let (mut cpu, mut bus) = cpu_with_program(&[0xF4, 0x40]); // HLT; INC AX
    assert_eq!(step_ok(&mut cpu, &mut bus), ExecuteOutcome::Halted);
    assert!(cpu.halted);
    // Still halted on the next step.
    assert_eq!(step_ok(&mut cpu, &mut bus), ExecuteOutcome::Halted);

    // A pending interrupt with IF set breaks the halt.
    bus.memory[8 * 4] = 0x00;
    bus.memory[8 * 4 + 1] = 0x01;
    bus.memory[8 * 4 + 2] = 0x00;
    bus.memory[8 * 4 + 3] = 0x20;
    bus.memory[0x20100] = 0xCF; // IRET
    cpu.flags.insert(Flags::INTERRUPT);
    cpu.pending_interrupt = Some(8);

    assert_eq!(step_ok(&mut cpu, &mut bus), ExecuteOutcome::Success);
    assert!(!cpu.halted);
    assert_eq!(cpu.ip, 0x0100);

    step_ok(&mut cpu, &mut bus); // IRET back to the INC
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.register(Register::Ax), 1);
}

#[test]
fn test_interrupt_held_while_if_clear() {
    let (mut cpu, mut bus) = cpu_with_program(&[0x90, 0x90]);
    cpu.pending_interrupt = Some(8);
    // IF is clear, the interrupt stays queued.
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.pending_interrupt, Some(8));
}

#[test]
fn test_cli_sti() {
    let (mut cpu, mut bus) = cpu_with_program(&[0xFB, 0xFA]);
    step_ok(&mut cpu, &mut bus);
    assert!(cpu.flags.contains(Flags::INTERRUPT));
    step_ok(&mut cpu, &mut bus);
    assert!(!cpu.flags.contains(Flags::INTERRUPT));
}

#[test]
fn test_invalid_opcode_is_fatal() {
    let (mut cpu, mut bus) = cpu_with_program(&[0x0F]);
    let error = cpu.step(&mut bus).unwrap_err();
    assert_eq!(
        error,
        ExecuteError::InvalidOpcode { opcode: 0x0F, cs: 0x1000, ip: 0x0000 }
    );
}

#[test]
fn test_group5_indirect_call() {
    // MOV BX,0x0020; CALL [BX] where [DS:0x20] holds 0x0040; HLT at 0x40
    let (mut cpu, mut bus) = cpu_with_program(&[0xBB, 0x20, 0x00, 0xFF, 0x17]);
    bus.memory[0x30020] = 0x40;
    bus.memory[0x30021] = 0x00;
    bus.memory[0x10040] = 0xF4;
    step_ok(&mut cpu, &mut bus);
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.ip, 0x0040);
    // Return address on the stack points past the CALL.
    let sp = cpu.register(Register::Sp) as usize;
    assert_eq!(bus.memory[0x20000 + sp], 0x05);
}

#[test]
fn test_esc_consumes_modrm() {
    // ESC with a memory operand must skip its ModR/M and displacement.
    let (mut cpu, mut bus) = cpu_with_program(&[0xD8, 0x06, 0x00, 0x01, 0x40]); // FADD-ish; INC AX
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.ip, 0x0004);
    step_ok(&mut cpu, &mut bus);
    assert_eq!(cpu.register(Register::Ax), 1);
}
