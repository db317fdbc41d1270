//! Relational test handlers — `§4.H.4`. Each pops `rhs` then `lhs` and
//! pushes a `u8` of `0` or `1`; none of these can raise — a failed pop is
//! the only way one of these instructions does not succeed.

use vm_asm::bytes::ByteConvert;

use crate::context::ExecutionContext;
use crate::error::ExceptionState;

fn push_bool(ctx: &mut ExecutionContext, value: bool) -> bool {
    let _ = ctx.stack.push_unsigned(value as u8).map_err(|_| ctx.raise(ExceptionState::StackOverflow));
    true
}

macro_rules! test_op {
    ($name:ident, $bound:path, $op:tt) => {
        pub(super) fn $name<T>(ctx: &mut ExecutionContext) -> bool
        where
            T: ByteConvert + Default + Copy + $bound,
        {
            let Ok(rhs) = ctx.stack.pop::<T>() else {
                ctx.raise(ExceptionState::StackOverflow);
                return false;
            };
            let Ok(lhs) = ctx.stack.pop::<T>() else {
                ctx.raise(ExceptionState::StackOverflow);
                return false;
            };
            push_bool(ctx, lhs $op rhs)
        }
    };
}

test_op!(test_e, PartialEq, ==);
test_op!(test_ne, PartialEq, !=);
test_op!(test_le, PartialOrd, <=);
test_op!(test_ge, PartialOrd, >=);
test_op!(test_l, PartialOrd, <);
test_op!(test_g, PartialOrd, >);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Mode;
    use test_case::test_case;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(256, 64, 64, 64, Mode::with(Mode::STACK_OPER_64_BIT))
    }

    #[test]
    fn equal_values_test_e_true() {
        let mut c = ctx();
        c.stack.push_unsigned(9u32).unwrap();
        c.stack.push_unsigned(9u32).unwrap();
        assert!(test_e::<i32>(&mut c));
        assert_eq!(c.stack.pop::<u8>().unwrap(), 1);
    }

    #[test]
    fn ordering_respects_signedness() {
        let mut c = ctx();
        c.stack.push_unsigned(u32::MAX).unwrap();
        c.stack.push_unsigned(1u32).unwrap();
        assert!(test_l::<i32>(&mut c));
        assert_eq!(c.stack.pop::<u8>().unwrap(), 1);
    }

    #[test_case(-1i32, 1i32 => 1; "negative is less than positive")]
    #[test_case(1i32, -1i32 => 0; "positive is not less than negative")]
    #[test_case(5i32, 5i32 => 0; "equal values are not strictly less")]
    #[test_case(i32::MIN, i32::MAX => 1; "signed extremes compare as signed")]
    fn test_l_i4_sweeps_signed_pairs(lhs: i32, rhs: i32) -> u8 {
        let mut c = ctx();
        c.stack.push_unsigned(lhs as u32).unwrap();
        c.stack.push_unsigned(rhs as u32).unwrap();
        assert!(test_l::<i32>(&mut c));
        c.stack.pop::<u8>().unwrap()
    }
}
