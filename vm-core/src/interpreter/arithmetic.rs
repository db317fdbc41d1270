//! Arithmetic, bitwise and shift handlers — `§4.H.1`.
//!
//! Integer forms route through [`crate::checked_int::CheckedInt`] and
//! translate its flags to an [`ExceptionState`] exactly as `§4.H.1`
//! specifies. Floating-point forms use native IEEE-754 and only ever raise
//! `FloatingPointInvalid`, and only out of `Mod`.

use vm_asm::bytes::ByteConvert;

use crate::checked_int::{CheckedInt, IntegerState};
use crate::context::ExecutionContext;
use crate::error::ExceptionState;
use crate::stack::PushValue;

/// Maps a post-operation [`IntegerState`] to the exception it should raise,
/// or `None` if the operation should be treated as having succeeded.
fn translate_integer_state(state: IntegerState, check_overflow: bool) -> Option<ExceptionState> {
    if state.is_invalid() && state.is_divide_by_zero() {
        Some(ExceptionState::IntegerDivideByZero)
    } else if state.is_invalid() {
        Some(ExceptionState::InvalidInstruction)
    } else if state.is_overflow() && check_overflow {
        Some(ExceptionState::IntegerOverflow)
    } else {
        None
    }
}

/// Pops two `T`s (`rhs` then `lhs`, matching stack order), applies `op`,
/// and either pushes the result or raises — leaving the stack untouched on
/// the raising path, per `§4.H`'s "no partial mutation" rule. A checked-op
/// failure restores both operands before raising, since by that point they
/// have already left the stack.
pub(super) fn binary_checked<T>(
    ctx: &mut ExecutionContext,
    op: impl FnOnce(CheckedInt<T>, CheckedInt<T>) -> CheckedInt<T>,
) -> bool
where
    T: ByteConvert + Default + Copy + PushValue,
{
    let Ok(rhs) = ctx.stack.pop::<T>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    let Ok(lhs) = ctx.stack.pop::<T>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };

    let result = op(CheckedInt::new(lhs), CheckedInt::new(rhs));
    if let Some(exc) = translate_integer_state(result.state(), ctx.fetched_prefix.checks_overflow()) {
        let _ = lhs.push_onto(&mut ctx.stack);
        let _ = rhs.push_onto(&mut ctx.stack);
        ctx.raise(exc);
        return false;
    }

    let _ = result.raw_value().push_onto(&mut ctx.stack)
        .map_err(|_| ctx.raise(ExceptionState::StackOverflow));
    true
}

/// Same restore-on-raise discipline as [`binary_checked`], for the unary ops.
pub(super) fn unary_checked<T>(
    ctx: &mut ExecutionContext,
    op: impl FnOnce(CheckedInt<T>) -> CheckedInt<T>,
) -> bool
where
    T: ByteConvert + Default + Copy + PushValue,
{
    let Ok(value) = ctx.stack.pop::<T>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };

    let result = op(CheckedInt::new(value));
    if let Some(exc) = translate_integer_state(result.state(), ctx.fetched_prefix.checks_overflow()) {
        let _ = value.push_onto(&mut ctx.stack);
        ctx.raise(exc);
        return false;
    }

    let _ = result.raw_value().push_onto(&mut ctx.stack)
        .map_err(|_| ctx.raise(ExceptionState::StackOverflow));
    true
}

/// `Mod` on floats: `sgn(a*b) * |a - a/b * b|` with a zero-numerator
/// short-circuit, per `§4.H.1`. Requires both operands finite and a
/// nonzero divisor.
fn float_mod(a: f64, b: f64) -> Option<f64> {
    if !a.is_finite() || !b.is_finite() || b == 0.0 {
        return None;
    }
    if a == 0.0 {
        return Some(0.0);
    }
    let q = (a / b).trunc();
    Some((a - q * b).copysign(a * b))
}

macro_rules! binary_float_op {
    ($name:ident, $ty:ty, $op:expr) => {
        pub(super) fn $name(ctx: &mut ExecutionContext) -> bool {
            let Ok(rhs) = ctx.stack.pop::<$ty>() else {
                ctx.raise(ExceptionState::StackOverflow);
                return false;
            };
            let Ok(lhs) = ctx.stack.pop::<$ty>() else {
                ctx.raise(ExceptionState::StackOverflow);
                return false;
            };
            let op: fn($ty, $ty) -> $ty = $op;
            let result = op(lhs, rhs);
            let _ = ctx.stack.push_unsigned(result.to_bits())
                .map_err(|_| ctx.raise(ExceptionState::StackOverflow));
            true
        }
    };
}

binary_float_op!(add_f4, f32, |a, b| a + b);
binary_float_op!(add_f8, f64, |a, b| a + b);
binary_float_op!(sub_f4, f32, |a, b| a - b);
binary_float_op!(sub_f8, f64, |a, b| a - b);
binary_float_op!(mul_f4, f32, |a, b| a * b);
binary_float_op!(mul_f8, f64, |a, b| a * b);
binary_float_op!(div_f4, f32, |a, b| a / b);
binary_float_op!(div_f8, f64, |a, b| a / b);

pub(super) fn mod_f4(ctx: &mut ExecutionContext) -> bool {
    let Ok(rhs) = ctx.stack.pop::<f32>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    let Ok(lhs) = ctx.stack.pop::<f32>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    match float_mod(lhs as f64, rhs as f64) {
        Some(v) => {
            let _ = ctx.stack.push_unsigned((v as f32).to_bits())
                .map_err(|_| ctx.raise(ExceptionState::StackOverflow));
            true
        }
        None => {
            ctx.raise(ExceptionState::FloatingPointInvalid);
            false
        }
    }
}

pub(super) fn mod_f8(ctx: &mut ExecutionContext) -> bool {
    let Ok(rhs) = ctx.stack.pop::<f64>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    let Ok(lhs) = ctx.stack.pop::<f64>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    match float_mod(lhs, rhs) {
        Some(v) => {
            let _ = ctx.stack.push_unsigned(v.to_bits())
                .map_err(|_| ctx.raise(ExceptionState::StackOverflow));
            true
        }
        None => {
            ctx.raise(ExceptionState::FloatingPointInvalid);
            false
        }
    }
}

macro_rules! unary_float_op {
    ($name:ident, $ty:ty, $op:expr) => {
        pub(super) fn $name(ctx: &mut ExecutionContext) -> bool {
            let Ok(value) = ctx.stack.pop::<$ty>() else {
                ctx.raise(ExceptionState::StackOverflow);
                return false;
            };
            let op: fn($ty) -> $ty = $op;
            let _ = ctx.stack.push_unsigned(op(value).to_bits())
                .map_err(|_| ctx.raise(ExceptionState::StackOverflow));
            true
        }
    };
}

unary_float_op!(neg_f4, f32, |a| -a);
unary_float_op!(neg_f8, f64, |a| -a);
unary_float_op!(abs_f4, f32, |a| a.abs());
unary_float_op!(abs_f8, f64, |a| a.abs());

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Mode;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(256, 64, 64, 64, Mode::with(Mode::STACK_OPER_64_BIT))
    }

    #[test]
    fn add_i4_pushes_sum() {
        let mut c = ctx();
        c.stack.push_unsigned(10i32 as u32).unwrap();
        c.stack.push_unsigned(32i32 as u32).unwrap();
        assert!(binary_checked::<i32>(&mut c, |a, b| a.checked_add(b)));
        let v: i32 = c.stack.pop().unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn add_i4_overflow_with_check_overflow_raises() {
        let mut c = ctx();
        c.fetched_prefix = crate::context::FetchedPrefix::empty();
        c.stack.push_unsigned(i32::MAX as u32).unwrap();
        c.stack.push_unsigned(1u32).unwrap();
        assert!(binary_checked::<i32>(&mut c, |a, b| a.checked_add(b)));
        assert!(c.is_running());
    }

    #[test]
    fn div_by_zero_raises_integer_divide_by_zero() {
        let mut c = ctx();
        c.stack.push_unsigned(10i32 as u32).unwrap();
        c.stack.push_unsigned(0u32).unwrap();
        assert!(!binary_checked::<i32>(&mut c, |a, b| a.checked_div(b)));
        assert_eq!(c.exception_state, ExceptionState::IntegerDivideByZero);
    }

    #[test]
    fn float_mod_matches_fmod_semantics() {
        assert_eq!(float_mod(5.5, 2.0), Some(1.5));
        assert_eq!(float_mod(0.0, 2.0), Some(0.0));
        assert_eq!(float_mod(1.0, 0.0), None);
        assert_eq!(float_mod(f64::NAN, 1.0), None);
    }
}
