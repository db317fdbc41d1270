//! Branch, call and breakpoint handlers — `§4.H.5`.
//!
//! All offsets are sign-extended to the width of `IP`/`NextIP` and applied
//! to `NextIP`, which `§4.H`'s fetch step already advanced past the current
//! instruction — so a zero offset falls through and a negative offset can
//! loop back onto the branch itself.

use crate::context::ExecutionContext;
use crate::error::ExceptionState;
use crate::frame::ShadowFrame;

fn apply_branch(ctx: &mut ExecutionContext, offset: i32) {
    ctx.next_ip = ctx.next_ip.wrapping_add(offset as u32);
}

pub(super) fn br(ctx: &mut ExecutionContext, offset: i32) -> bool {
    apply_branch(ctx, offset);
    true
}

fn br_z_t<T: Default + PartialEq + vm_asm::bytes::ByteConvert>(ctx: &mut ExecutionContext, offset: i32) -> bool {
    let Ok(cond) = ctx.stack.pop::<T>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    if cond == T::default() {
        apply_branch(ctx, offset);
    }
    true
}

pub(super) fn br_z(ctx: &mut ExecutionContext, offset: i32) -> bool {
    if ctx.mode.is_stack_oper_64_bit() { br_z_t::<u64>(ctx, offset) } else { br_z_t::<u32>(ctx, offset) }
}

fn br_nz_t<T: Default + PartialEq + vm_asm::bytes::ByteConvert>(ctx: &mut ExecutionContext, offset: i32) -> bool {
    let Ok(cond) = ctx.stack.pop::<T>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    if cond != T::default() {
        apply_branch(ctx, offset);
    }
    true
}

pub(super) fn br_nz(ctx: &mut ExecutionContext, offset: i32) -> bool {
    if ctx.mode.is_stack_oper_64_bit() { br_nz_t::<u64>(ctx, offset) } else { br_nz_t::<u32>(ctx, offset) }
}

/// Pushes the return address, saves a shadow frame, and jumps — the
/// callee establishes its own argument/local-variable tables with
/// `Initarg`/`Arg`/`Var`.
pub(super) fn call(ctx: &mut ExecutionContext, offset: i32) -> bool {
    let return_ip = ctx.next_ip;
    if ctx.stack.push_unsigned(return_ip).is_err() {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    }

    let frame = ShadowFrame {
        xtable_state: 0,
        atp: 0,
        lvtp: ctx.local_variable_stack.top_offset(),
        return_sp: ctx.stack.top_offset(),
        return_ip,
    };
    if ctx.push_shadow_frame(frame).is_err() {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    }

    apply_branch(ctx, offset);
    true
}

/// Pops the return address pushed by `Call` and unwinds the matching
/// shadow frame; a mismatch means the stack was corrupted underneath the
/// call and is reported as `InvalidAccess` rather than silently followed.
pub(super) fn ret(ctx: &mut ExecutionContext) -> bool {
    let Ok(return_ip) = ctx.stack.pop::<u32>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    let Ok(frame) = ctx.pop_shadow_frame() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    if frame.return_ip != return_ip {
        ctx.raise(ExceptionState::InvalidAccess);
        return false;
    }
    ctx.next_ip = return_ip;
    true
}

/// Raises unconditionally; unlike every other handler here this still
/// reports success, since stopping for a breakpoint is not a failure of
/// the instruction itself.
pub(super) fn bp(ctx: &mut ExecutionContext) -> bool {
    ctx.raise(ExceptionState::Breakpoint);
    true
}

pub(super) fn nop(_ctx: &mut ExecutionContext) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Mode;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(256, 64, 64, 64, Mode::with(Mode::STACK_OPER_64_BIT))
    }

    #[test]
    fn call_then_ret_restores_next_ip() {
        let mut c = ctx();
        c.ip = 10;
        c.next_ip = 13;
        assert!(call(&mut c, 100));
        assert_eq!(c.next_ip, 113);
        assert!(ret(&mut c));
        assert_eq!(c.next_ip, 13);
    }

    #[test]
    fn bp_raises_but_reports_success() {
        let mut c = ctx();
        assert!(bp(&mut c));
        assert_eq!(c.exception_state, ExceptionState::Breakpoint);
    }
}
