//! End-to-end scenarios from `§8` of the format spec (S1-S6), exercised
//! against the public `Interpreter`/`GuestMemory` surface rather than any
//! interpreter-internal handler.

use vm_asm::emitter::Emitter;
use vm_asm::instruction::Instruction;
use vm_asm::opcode::Opcode;
use vm_core::memory::{AllocateOptions, GuestMemory, MemoryType};
use vm_core::{ExceptionState, Interpreter, Mode, StackSizes, StopReason};

fn run_image(image: Vec<u8>, mode: Mode) -> Interpreter {
    let mut interp = Interpreter::new(image, 0x1000, mode, StackSizes::default());
    interp.run(1000);
    interp
}

/// S1: constant folding — `1 + 2 + 3` should leave `6` on top of the stack
/// and stop at the trailing breakpoint.
#[test]
fn s1_constant_folding() {
    let mut emitter = Emitter::new();
    emitter
        .emit_with_immediate(Opcode::LdimmI4, 1u64)
        .emit_with_immediate(Opcode::LdimmI4, 2u64)
        .emit_with_immediate(Opcode::LdimmI4, 3u64)
        .emit(Opcode::AddI4)
        .emit(Opcode::AddI4)
        .emit(Opcode::Bp);

    let mut interp = run_image(emitter.finish(), Mode::with(Mode::STACK_OPER_64_BIT));
    assert_eq!(interp.ctx.exception_state, ExceptionState::Breakpoint);
    assert_eq!(interp.ctx.stack.pop::<i32>().unwrap(), 6);
}

/// S2: dividing by zero raises `IntegerDivideByZero`; the stack top is
/// unchanged from after the two `Ldimm`s, since `Div_I4` must not consume
/// its operands when it raises.
#[test]
fn s2_divide_by_zero_raises_without_mutating_the_stack() {
    let mut emitter = Emitter::new();
    emitter
        .emit_with_immediate(Opcode::LdimmI4, 0x4433_2211u64)
        .emit_with_immediate(Opcode::LdimmI4, 0u64)
        .emit(Opcode::DivI4);

    let mut interp = run_image(emitter.finish(), Mode::with(Mode::STACK_OPER_64_BIT));
    assert_eq!(interp.ctx.exception_state, ExceptionState::IntegerDivideByZero);
    assert_eq!(interp.ctx.stack.pop::<i32>().unwrap(), 0);
    assert_eq!(interp.ctx.stack.pop::<i32>().unwrap(), 0x4433_2211);
    assert!(interp.ctx.stack.is_empty());
}

/// S3: a narrow signed immediate sign-extends to the stack's operand width.
#[test]
fn s3_narrow_load_sign_extends_to_stack_width() {
    let mut emitter = Emitter::new();
    emitter.emit_with_immediate(Opcode::LdimmI1, 0x81u64);

    let mut interp32 = Interpreter::new(emitter.finish(), 0x1000, Mode::empty(), StackSizes::default());
    assert!(interp32.step());
    assert_eq!(interp32.ctx.stack.pop::<u32>().unwrap(), 0xFFFF_FF81);

    let mut emitter64 = Emitter::new();
    emitter64.emit_with_immediate(Opcode::LdimmI1, 0x81u64);
    let mut interp64 = Interpreter::new(emitter64.finish(), 0x1000, Mode::with(Mode::STACK_OPER_64_BIT), StackSizes::default());
    assert!(interp64.step());
    assert_eq!(interp64.ctx.stack.pop::<u64>().unwrap(), 0xFFFF_FFFF_FFFF_FF81);
}

/// S4: an instruction that cannot push onto an already-full stack raises
/// `StackOverflow` and leaves `IP`/the stack pointer exactly where they were.
#[test]
fn s4_stack_overflow_leaves_ip_and_stack_pointer_unchanged() {
    let mut emitter = Emitter::new();
    emitter.emit_with_immediate(Opcode::LdimmI4, 1u64);
    let image = emitter.finish();

    let mut interp = Interpreter::new(image, 0x1000, Mode::with(Mode::STACK_OPER_64_BIT), StackSizes {
        value_stack: 0,
        ..StackSizes::default()
    });
    let ip_before = interp.ctx.ip;
    let top_before = interp.ctx.stack.top_offset();

    assert!(!interp.step());
    assert_eq!(interp.ctx.exception_state, ExceptionState::StackOverflow);
    assert_eq!(interp.ctx.stack.top_offset(), top_before);
    assert_eq!(interp.ctx.ip, ip_before);
}

/// S5: allocate/free/merge on a memory manager — five equal allocations,
/// freed in order, coalesce back into one region large enough to satisfy a
/// single allocation spanning the whole space.
#[test]
fn s5_allocate_free_merge_reclaims_the_whole_space() {
    const SPACE: u64 = 0xA0000;
    const BLOCK: u64 = 0x20000;

    let mut mem = GuestMemory::new(SPACE);
    let mut bases = Vec::new();
    for _ in 0..5 {
        let base = mem
            .allocate(0, BLOCK, MemoryType::Data, 0, AllocateOptions::default())
            .expect("block allocation should succeed");
        bases.push(base);
    }

    for base in bases {
        assert_ne!(mem.free(base, 0), 0);
    }

    let whole = mem
        .allocate(0, SPACE, MemoryType::Data, 0, AllocateOptions::default())
        .expect("the freed space should have fully coalesced");
    assert_eq!(whole, 0);
}

/// S6: every opcode/immediate combination the encoder can produce decodes
/// back to the same opcode, immediate and consumed length.
#[test]
fn s6_bytecode_codec_round_trips() {
    for opcode in Opcode::ALL {
        let width = opcode.operand_width().byte_len();
        let immediate = if width == 0 { 0 } else { u64::MAX >> (64 - width * 8) };
        let inst = Instruction::with_immediate(*opcode, immediate);

        let mut buf = [0u8; vm_asm::instruction::MAX_INSTRUCTION_LEN];
        let written = inst.encode(&mut buf);
        assert_eq!(written, inst.encoded_len());

        let (decoded, consumed) = Instruction::decode(&buf[..written]).unwrap();
        assert_eq!(consumed, written);
        assert_eq!(decoded.opcode(), *opcode);
        assert_eq!(decoded.immediate(), immediate);
    }
}
