//! Stack-shuffle and immediate-load handlers — `§4.H.3`.

use vm_asm::bytes::ByteConvert;

use crate::context::ExecutionContext;
use crate::error::ExceptionState;
use crate::stack::PushValue;

/// `Ldimm_*`: pushes an immediate straight onto the value stack.
pub(super) fn ldimm<T: ByteConvert + PushValue>(ctx: &mut ExecutionContext, value: T) -> bool {
    let _ = value.push_onto(&mut ctx.stack).map_err(|_| ctx.raise(ExceptionState::StackOverflow));
    true
}

fn dup_t<T: ByteConvert + Default + Copy + PushValue>(ctx: &mut ExecutionContext) -> bool {
    let Ok(value) = ctx.stack.peek::<T>(0) else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    if value.push_onto(&mut ctx.stack).is_err() || value.push_onto(&mut ctx.stack).is_err() {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    }
    true
}

pub(super) fn dup(ctx: &mut ExecutionContext) -> bool {
    if ctx.mode.is_stack_oper_64_bit() { dup_t::<u64>(ctx) } else { dup_t::<u32>(ctx) }
}

fn dup2_t<T: ByteConvert + Default + Copy + PushValue>(ctx: &mut ExecutionContext) -> bool {
    let Ok(v2) = ctx.stack.pop::<T>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    let Ok(v1) = ctx.stack.pop::<T>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    if v1.push_onto(&mut ctx.stack).is_err()
        || v2.push_onto(&mut ctx.stack).is_err()
        || v1.push_onto(&mut ctx.stack).is_err()
        || v2.push_onto(&mut ctx.stack).is_err()
    {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    }
    true
}

pub(super) fn dup2(ctx: &mut ExecutionContext) -> bool {
    if ctx.mode.is_stack_oper_64_bit() { dup2_t::<u64>(ctx) } else { dup2_t::<u32>(ctx) }
}

fn xch_t<T: ByteConvert + Default + Copy + PushValue>(ctx: &mut ExecutionContext) -> bool {
    let Ok(v1) = ctx.stack.pop::<T>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    let Ok(v2) = ctx.stack.pop::<T>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    if v2.push_onto(&mut ctx.stack).is_err() || v1.push_onto(&mut ctx.stack).is_err() {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    }
    true
}

pub(super) fn xch(ctx: &mut ExecutionContext) -> bool {
    if ctx.mode.is_stack_oper_64_bit() { xch_t::<u64>(ctx) } else { xch_t::<u32>(ctx) }
}

fn dcv_t<T: ByteConvert + Default + Copy>(ctx: &mut ExecutionContext) -> bool {
    if ctx.stack.pop::<T>().is_err() {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    }
    true
}

pub(super) fn dcv(ctx: &mut ExecutionContext) -> bool {
    if ctx.mode.is_stack_oper_64_bit() { dcv_t::<i64>(ctx) } else { dcv_t::<i32>(ctx) }
}

fn dcvn_t<T>(ctx: &mut ExecutionContext) -> bool
where
    T: ByteConvert + Default + Copy + PartialOrd + TryInto<u64>,
{
    let Ok(count) = ctx.stack.pop::<T>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    let count: u64 = count.try_into().unwrap_or(0);
    for _ in 0..count {
        if ctx.stack.pop::<T>().is_err() {
            ctx.raise(ExceptionState::StackOverflow);
            return false;
        }
    }
    true
}

pub(super) fn dcvn(ctx: &mut ExecutionContext) -> bool {
    if ctx.mode.is_stack_oper_64_bit() { dcvn_t::<i64>(ctx) } else { dcvn_t::<i32>(ctx) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Mode;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(256, 64, 64, 64, Mode::empty())
    }

    #[test]
    fn dup_leaves_two_copies() {
        let mut c = ctx();
        c.stack.push_unsigned(7u32).unwrap();
        assert!(dup(&mut c));
        assert_eq!(c.stack.pop::<u32>().unwrap(), 7);
        assert_eq!(c.stack.pop::<u32>().unwrap(), 7);
    }

    #[test]
    fn xch_swaps_top_two() {
        let mut c = ctx();
        c.stack.push_unsigned(1u32).unwrap();
        c.stack.push_unsigned(2u32).unwrap();
        assert!(xch(&mut c));
        assert_eq!(c.stack.pop::<u32>().unwrap(), 1);
        assert_eq!(c.stack.pop::<u32>().unwrap(), 2);
    }
}
