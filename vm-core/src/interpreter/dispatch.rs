//! The fetch-decode-execute loop — `§4.H`.
//!
//! [`step`] decodes one instruction from the bytecode image at `ctx.ip`,
//! precomputes `ctx.next_ip` the way every handler in this module expects
//! (so a handler that branches only has to overwrite it, and one that
//! raises only has to leave it alone before [`ExecutionContext::raise`]
//! re-points it), dispatches to the opcode's handler, then advances `ctx.ip`
//! if the handler left the context running.

use tracing::trace;
use vm_asm::instruction::{Instruction, MAX_INSTRUCTION_LEN};
use vm_asm::opcode::Opcode;

use crate::context::ExecutionContext;
use crate::error::ExceptionState;
use crate::memory::{GuestMemory, MemoryType, PageFaultHook};

use super::{arithmetic, comparisons, control, conversions, frames, pointer, shuffle, vmsr};

use crate::checked_int::CheckedInt;

/// Fetches up to `MAX_INSTRUCTION_LEN` bytes starting at `ip` through the
/// memory manager, clamped to whatever is left of the region `ip` falls
/// in — the bytecode region is never over-read into whatever follows it
/// in the address space. `None` means `ip` does not land in mapped memory.
fn fetch<'buf, H: PageFaultHook>(
    mem: &mut GuestMemory<H>,
    ip: u64,
    buf: &'buf mut [u8; MAX_INSTRUCTION_LEN],
) -> Option<&'buf [u8]> {
    let region = mem.query(ip)?;
    if region.ty == MemoryType::Freed {
        return None;
    }
    let remaining = region.base + region.maximum_size - ip;
    let len = remaining.min(MAX_INSTRUCTION_LEN as u64) as usize;
    mem.read(ip, &mut buf[..len]).ok()?;
    Some(&buf[..len])
}

/// Decodes and executes one instruction. Returns `true` if the context is
/// still running afterward; `false` once an exception has been raised
/// (including by this very instruction).
#[tracing::instrument(level = "trace", skip(ctx, mem), fields(ip = ctx.ip))]
pub fn step<H: PageFaultHook>(ctx: &mut ExecutionContext, mem: &mut GuestMemory<H>) -> bool {
    let mut buf = [0u8; MAX_INSTRUCTION_LEN];
    let Some(rest) = fetch(mem, ctx.ip as u64, &mut buf) else {
        ctx.raise(ExceptionState::InvalidAccess);
        return false;
    };
    let (inst, consumed) = match Instruction::decode(rest) {
        Ok(pair) => pair,
        Err(_) => {
            ctx.raise(ExceptionState::InvalidInstruction);
            return false;
        }
    };
    ctx.next_ip = ctx.ip + consumed as u32;
    trace!(opcode = inst.opcode().mnemonic(), "dispatch");

    let ok = execute_one(ctx, mem, inst);
    if ok {
        ctx.ip = ctx.next_ip;
    }
    ok
}

fn execute_one<H: PageFaultHook>(ctx: &mut ExecutionContext, mem: &mut GuestMemory<H>, inst: Instruction) -> bool {
    use Opcode::*;

    let imm = inst.immediate();
    let imm_s = inst.immediate_signed();

    match inst.opcode() {
        Nop => control::nop(ctx),
        Bp => control::bp(ctx),
        Inv => {
            ctx.raise(ExceptionState::InvalidInstruction);
            false
        }

        AddI4 => arithmetic::binary_checked::<i32>(ctx, CheckedInt::<i32>::checked_add),
        AddI8 => arithmetic::binary_checked::<i64>(ctx, CheckedInt::<i64>::checked_add),
        AddU4 => arithmetic::binary_checked::<u32>(ctx, CheckedInt::<u32>::checked_add),
        AddU8 => arithmetic::binary_checked::<u64>(ctx, CheckedInt::<u64>::checked_add),
        AddF4 => arithmetic::add_f4(ctx),
        AddF8 => arithmetic::add_f8(ctx),

        SubI4 => arithmetic::binary_checked::<i32>(ctx, CheckedInt::<i32>::checked_sub),
        SubI8 => arithmetic::binary_checked::<i64>(ctx, CheckedInt::<i64>::checked_sub),
        SubU4 => arithmetic::binary_checked::<u32>(ctx, CheckedInt::<u32>::checked_sub),
        SubU8 => arithmetic::binary_checked::<u64>(ctx, CheckedInt::<u64>::checked_sub),
        SubF4 => arithmetic::sub_f4(ctx),
        SubF8 => arithmetic::sub_f8(ctx),

        MulI4 => arithmetic::binary_checked::<i32>(ctx, CheckedInt::<i32>::checked_mul),
        MulI8 => arithmetic::binary_checked::<i64>(ctx, CheckedInt::<i64>::checked_mul),
        MulU4 => arithmetic::binary_checked::<u32>(ctx, CheckedInt::<u32>::checked_mul),
        MulU8 => arithmetic::binary_checked::<u64>(ctx, CheckedInt::<u64>::checked_mul),
        MulF4 => arithmetic::mul_f4(ctx),
        MulF8 => arithmetic::mul_f8(ctx),

        MulhI4 => arithmetic::binary_checked::<i32>(ctx, CheckedInt::<i32>::mulh),
        MulhI8 => arithmetic::binary_checked::<i64>(ctx, CheckedInt::<i64>::mulh),
        MulhU4 => arithmetic::binary_checked::<u32>(ctx, CheckedInt::<u32>::mulh),
        MulhU8 => arithmetic::binary_checked::<u64>(ctx, CheckedInt::<u64>::mulh),

        DivI4 => arithmetic::binary_checked::<i32>(ctx, CheckedInt::<i32>::checked_div),
        DivI8 => arithmetic::binary_checked::<i64>(ctx, CheckedInt::<i64>::checked_div),
        DivU4 => arithmetic::binary_checked::<u32>(ctx, CheckedInt::<u32>::checked_div),
        DivU8 => arithmetic::binary_checked::<u64>(ctx, CheckedInt::<u64>::checked_div),
        DivF4 => arithmetic::div_f4(ctx),
        DivF8 => arithmetic::div_f8(ctx),
        ModI4 => arithmetic::binary_checked::<i32>(ctx, CheckedInt::<i32>::checked_rem),
        ModI8 => arithmetic::binary_checked::<i64>(ctx, CheckedInt::<i64>::checked_rem),
        ModU4 => arithmetic::binary_checked::<u32>(ctx, CheckedInt::<u32>::checked_rem),
        ModU8 => arithmetic::binary_checked::<u64>(ctx, CheckedInt::<u64>::checked_rem),
        ModF4 => arithmetic::mod_f4(ctx),
        ModF8 => arithmetic::mod_f8(ctx),

        ShlI4 => arithmetic::binary_checked::<i32>(ctx, CheckedInt::<i32>::checked_shl),
        ShlI8 => arithmetic::binary_checked::<i64>(ctx, CheckedInt::<i64>::checked_shl),
        ShlU4 => arithmetic::binary_checked::<u32>(ctx, CheckedInt::<u32>::checked_shl),
        ShlU8 => arithmetic::binary_checked::<u64>(ctx, CheckedInt::<u64>::checked_shl),
        ShrI4 => arithmetic::binary_checked::<i32>(ctx, CheckedInt::<i32>::checked_shr),
        ShrI8 => arithmetic::binary_checked::<i64>(ctx, CheckedInt::<i64>::checked_shr),
        ShrU4 => arithmetic::binary_checked::<u32>(ctx, CheckedInt::<u32>::checked_shr),
        ShrU8 => arithmetic::binary_checked::<u64>(ctx, CheckedInt::<u64>::checked_shr),

        AndX4 => arithmetic::binary_checked::<u32>(ctx, CheckedInt::<u32>::bitand),
        AndX8 => arithmetic::binary_checked::<u64>(ctx, CheckedInt::<u64>::bitand),
        OrX4 => arithmetic::binary_checked::<u32>(ctx, CheckedInt::<u32>::bitor),
        OrX8 => arithmetic::binary_checked::<u64>(ctx, CheckedInt::<u64>::bitor),
        XorX4 => arithmetic::binary_checked::<u32>(ctx, CheckedInt::<u32>::bitxor),
        XorX8 => arithmetic::binary_checked::<u64>(ctx, CheckedInt::<u64>::bitxor),
        NotX4 => arithmetic::unary_checked::<u32>(ctx, CheckedInt::<u32>::bitnot),
        NotX8 => arithmetic::unary_checked::<u64>(ctx, CheckedInt::<u64>::bitnot),
        NegI4 => arithmetic::unary_checked::<i32>(ctx, CheckedInt::<i32>::negate),
        NegI8 => arithmetic::unary_checked::<i64>(ctx, CheckedInt::<i64>::negate),
        NegF4 => arithmetic::neg_f4(ctx),
        NegF8 => arithmetic::neg_f8(ctx),
        AbsI4 => arithmetic::unary_checked::<i32>(ctx, CheckedInt::<i32>::abs),
        AbsI8 => arithmetic::unary_checked::<i64>(ctx, CheckedInt::<i64>::abs),
        AbsF4 => arithmetic::abs_f4(ctx),
        AbsF8 => arithmetic::abs_f8(ctx),

        Cvt2iF4I4 => conversions::cvt2i_f4_i4(ctx),
        Cvt2iF4I8 => conversions::cvt2i_f4_i8(ctx),
        Cvt2iF8I4 => conversions::cvt2i_f8_i4(ctx),
        Cvt2iF8I8 => conversions::cvt2i_f8_i8(ctx),
        Cvt2fI4F4 => conversions::cvt2f_i4_f4(ctx),
        Cvt2fI4F8 => conversions::cvt2f_i4_f8(ctx),
        Cvt2fI8F4 => conversions::cvt2f_i8_f4(ctx),
        Cvt2fI8F8 => conversions::cvt2f_i8_f8(ctx),
        CvtffF4F8 => conversions::cvtff_f4_f8(ctx),
        CvtffF8F4 => conversions::cvtff_f8_f4(ctx),

        CvtI1I4 => conversions::cvt_i1_i4(ctx),
        CvtI2I4 => conversions::cvt_i2_i4(ctx),
        CvtI4I1 => conversions::cvt_i4_i1(ctx),
        CvtI4I2 => conversions::cvt_i4_i2(ctx),
        CvtI4I8 => conversions::cvt_i4_i8(ctx),
        CvtI8I4 => conversions::cvt_i8_i4(ctx),
        CvtU1U4 => conversions::cvt_u1_u4(ctx),
        CvtU2U4 => conversions::cvt_u2_u4(ctx),
        CvtU4U1 => conversions::cvt_u4_u1(ctx),
        CvtU4U2 => conversions::cvt_u4_u2(ctx),
        CvtU4U8 => conversions::cvt_u4_u8(ctx),
        CvtU8U4 => conversions::cvt_u8_u4(ctx),
        CvtI1U1 => conversions::cvt_i1_u1(ctx),
        CvtI2U2 => conversions::cvt_i2_u2(ctx),
        CvtI4U4 => conversions::cvt_i4_u4(ctx),
        CvtI8U8 => conversions::cvt_i8_u8(ctx),
        CvtU1I1 => conversions::cvt_u1_i1(ctx),
        CvtU2I2 => conversions::cvt_u2_i2(ctx),
        CvtU4I4 => conversions::cvt_u4_i4(ctx),
        CvtU8I8 => conversions::cvt_u8_i8(ctx),

        LdimmI1 => shuffle::ldimm::<i8>(ctx, imm_s as i8),
        LdimmI2 => shuffle::ldimm::<i16>(ctx, imm_s as i16),
        LdimmI4 => shuffle::ldimm::<i32>(ctx, imm_s as i32),
        LdimmI8 => shuffle::ldimm::<i64>(ctx, imm_s),

        Ldarg => frames::ldarg(ctx, imm as u32),
        Ldvar => frames::ldvar(ctx, imm as u32),
        Starg => frames::starg(ctx, imm as u32),
        Stvar => frames::stvar(ctx, imm as u32),

        Dup => shuffle::dup(ctx),
        Dup2 => shuffle::dup2(ctx),
        Xch => shuffle::xch(ctx),

        Ldvarp => frames::ldvarp(ctx, imm as u32),
        Ldargp => frames::ldargp(ctx, imm as u32),
        LdpvX1 => pointer::ldpv_x1(ctx, mem),
        LdpvX2 => pointer::ldpv_x2(ctx, mem),
        LdpvX4 => pointer::ldpv_x4(ctx, mem),
        LdpvX8 => pointer::ldpv_x8(ctx, mem),
        StpvX1 => pointer::stpv_x1(ctx, mem),
        StpvX2 => pointer::stpv_x2(ctx, mem),
        StpvX4 => pointer::stpv_x4(ctx, mem),
        StpvX8 => pointer::stpv_x8(ctx, mem),
        Ppcpy => pointer::ppcpy(ctx, mem),
        PvfilX1 => pointer::pvfil_x1(ctx, mem),
        PvfilX2 => pointer::pvfil_x2(ctx, mem),
        PvfilX4 => pointer::pvfil_x4(ctx, mem),
        PvfilX8 => pointer::pvfil_x8(ctx, mem),

        Initarg => frames::initarg(ctx),
        Arg => frames::arg(ctx, imm as u32),
        Var => frames::var(ctx, imm as u32),

        Dcv => shuffle::dcv(ctx),
        Dcvn => shuffle::dcvn(ctx),

        TestEI4 => comparisons::test_e::<i32>(ctx),
        TestEI8 => comparisons::test_e::<i64>(ctx),
        TestEF4 => comparisons::test_e::<f32>(ctx),
        TestEF8 => comparisons::test_e::<f64>(ctx),
        TestNeI4 => comparisons::test_ne::<i32>(ctx),
        TestNeI8 => comparisons::test_ne::<i64>(ctx),
        TestNeF4 => comparisons::test_ne::<f32>(ctx),
        TestNeF8 => comparisons::test_ne::<f64>(ctx),
        TestLeI4 => comparisons::test_le::<i32>(ctx),
        TestLeI8 => comparisons::test_le::<i64>(ctx),
        TestLeU4 => comparisons::test_le::<u32>(ctx),
        TestLeU8 => comparisons::test_le::<u64>(ctx),
        TestLeF4 => comparisons::test_le::<f32>(ctx),
        TestLeF8 => comparisons::test_le::<f64>(ctx),
        TestGeI4 => comparisons::test_ge::<i32>(ctx),
        TestGeI8 => comparisons::test_ge::<i64>(ctx),
        TestGeU4 => comparisons::test_ge::<u32>(ctx),
        TestGeU8 => comparisons::test_ge::<u64>(ctx),
        TestGeF4 => comparisons::test_ge::<f32>(ctx),
        TestGeF8 => comparisons::test_ge::<f64>(ctx),
        TestLI4 => comparisons::test_l::<i32>(ctx),
        TestLI8 => comparisons::test_l::<i64>(ctx),
        TestLU4 => comparisons::test_l::<u32>(ctx),
        TestLU8 => comparisons::test_l::<u64>(ctx),
        TestLF4 => comparisons::test_l::<f32>(ctx),
        TestLF8 => comparisons::test_l::<f64>(ctx),
        TestGI4 => comparisons::test_g::<i32>(ctx),
        TestGI8 => comparisons::test_g::<i64>(ctx),
        TestGU4 => comparisons::test_g::<u32>(ctx),
        TestGU8 => comparisons::test_g::<u64>(ctx),
        TestGF4 => comparisons::test_g::<f32>(ctx),
        TestGF8 => comparisons::test_g::<f64>(ctx),

        BrI1 | BrI2 | BrI4 => control::br(ctx, imm_s as i32),
        BrZI1 | BrZI2 | BrZI4 => control::br_z(ctx, imm_s as i32),
        BrNzI1 | BrNzI2 | BrNzI4 => control::br_nz(ctx, imm_s as i32),

        CallI1 | CallI2 | CallI4 => control::call(ctx, imm_s as i32),
        Ret => control::ret(ctx),

        Ldvmsr => vmsr::ldvmsr(ctx, imm as u8),
        Stvmsr => vmsr::stvmsr(ctx, imm as u8),
        Vmcall | Vmxthrow => {
            ctx.raise(ExceptionState::InvalidInstruction);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Mode;
    use crate::memory::AllocateOptions;
    use vm_asm::emitter::Emitter;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(256, 64, 64, 64, Mode::with(Mode::STACK_OPER_64_BIT))
    }

    fn mem_with_image(image: &[u8]) -> GuestMemory {
        let mut mem = GuestMemory::new(0x1000);
        let base = mem
            .allocate(0, image.len() as u64, MemoryType::Bytecode, 0, AllocateOptions {
                use_preferred_address: true,
                use_preferred_memory_type: true,
            })
            .unwrap();
        mem.write(base, image).unwrap();
        mem
    }

    #[test]
    fn runs_a_small_add_program_to_completion() {
        let mut emitter = Emitter::new();
        emitter
            .emit_with_immediate(Opcode::LdimmI4, 7u64)
            .emit_with_immediate(Opcode::LdimmI4, 35u64)
            .emit(Opcode::AddI4)
            .emit(Opcode::Bp);
        let image = emitter.finish();

        let mut c = ctx();
        let mut mem = mem_with_image(&image);
        while c.is_running() {
            if !step(&mut c, &mut mem) {
                break;
            }
        }
        assert_eq!(c.exception_state, ExceptionState::Breakpoint);
        assert_eq!(c.stack.pop::<i32>().unwrap(), 42);
    }

    #[test]
    fn decoding_past_the_image_end_raises_invalid_access() {
        let mut c = ctx();
        c.ip = 10;
        let mut mem = GuestMemory::new(0x1000);
        assert!(!step(&mut c, &mut mem));
        assert_eq!(c.exception_state, ExceptionState::InvalidAccess);
    }
}
