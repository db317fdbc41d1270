//! Numeric conversion handlers — `§4.H.2`.
//!
//! Every conversion here is a single Rust `as` cast: integer-to-integer
//! casts already truncate/extend with the right signedness, and
//! float-to-int casts saturate instead of invoking undefined behaviour the
//! way the reference implementation's `static_cast` would on an
//! out-of-range value. No exception is raised for a lossy conversion;
//! `§4.H.2` only defines these as "convert, don't check".

use vm_asm::bytes::ByteConvert;

use crate::context::ExecutionContext;
use crate::error::ExceptionState;
use crate::stack::PushValue;

macro_rules! cvt_to_pushable {
    ($name:ident, $from:ty, $to:ty) => {
        pub(super) fn $name(ctx: &mut ExecutionContext) -> bool {
            let Ok(value) = ctx.stack.pop::<$from>() else {
                ctx.raise(ExceptionState::StackOverflow);
                return false;
            };
            let converted = value as $to;
            let _ = converted.push_onto(&mut ctx.stack).map_err(|_| ctx.raise(ExceptionState::StackOverflow));
            true
        }
    };
}

macro_rules! cvt_to_float {
    ($name:ident, $from:ty, $to:ty) => {
        pub(super) fn $name(ctx: &mut ExecutionContext) -> bool {
            let Ok(value) = ctx.stack.pop::<$from>() else {
                ctx.raise(ExceptionState::StackOverflow);
                return false;
            };
            let converted: $to = value as $to;
            let _ = ctx.stack.push_unsigned(converted.to_bits()).map_err(|_| ctx.raise(ExceptionState::StackOverflow));
            true
        }
    };
}

// Float -> int (`Cvt2i`).
cvt_to_pushable!(cvt2i_f4_i4, f32, i32);
cvt_to_pushable!(cvt2i_f4_i8, f32, i64);
cvt_to_pushable!(cvt2i_f8_i4, f64, i32);
cvt_to_pushable!(cvt2i_f8_i8, f64, i64);

// Int -> float (`Cvt2f`).
cvt_to_float!(cvt2f_i4_f4, i32, f32);
cvt_to_float!(cvt2f_i4_f8, i32, f64);
cvt_to_float!(cvt2f_i8_f4, i64, f32);
cvt_to_float!(cvt2f_i8_f8, i64, f64);

// Float -> float (`Cvtff`).
cvt_to_float!(cvtff_f4_f8, f32, f64);
cvt_to_float!(cvtff_f8_f4, f64, f32);

// Integer widen/narrow, same signedness (`Cvt`).
cvt_to_pushable!(cvt_i1_i4, i8, i32);
cvt_to_pushable!(cvt_i2_i4, i16, i32);
cvt_to_pushable!(cvt_i4_i1, i32, i8);
cvt_to_pushable!(cvt_i4_i2, i32, i16);
cvt_to_pushable!(cvt_i4_i8, i32, i64);
cvt_to_pushable!(cvt_i8_i4, i64, i32);
cvt_to_pushable!(cvt_u1_u4, u8, u32);
cvt_to_pushable!(cvt_u2_u4, u16, u32);
cvt_to_pushable!(cvt_u4_u1, u32, u8);
cvt_to_pushable!(cvt_u4_u2, u32, u16);
cvt_to_pushable!(cvt_u4_u8, u32, u64);
cvt_to_pushable!(cvt_u8_u4, u64, u32);

// Same-width sign reinterpretation.
cvt_to_pushable!(cvt_i1_u1, i8, u8);
cvt_to_pushable!(cvt_i2_u2, i16, u16);
cvt_to_pushable!(cvt_i4_u4, i32, u32);
cvt_to_pushable!(cvt_i8_u8, i64, u64);
cvt_to_pushable!(cvt_u1_i1, u8, i8);
cvt_to_pushable!(cvt_u2_i2, u16, i16);
cvt_to_pushable!(cvt_u4_i4, u32, i32);
cvt_to_pushable!(cvt_u8_i8, u64, i64);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Mode;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(256, 64, 64, 64, Mode::with(Mode::STACK_OPER_64_BIT))
    }

    #[test]
    fn narrowing_keeps_low_bits() {
        let mut c = ctx();
        c.stack.push_unsigned(0x1234_5678u32).unwrap();
        assert!(cvt_i4_i1(&mut c));
        let v: i8 = c.stack.pop().unwrap();
        assert_eq!(v, 0x78);
    }

    #[test]
    fn float_to_int_saturates_instead_of_ub() {
        let mut c = ctx();
        c.stack.push_unsigned(f32::INFINITY.to_bits()).unwrap();
        assert!(cvt2i_f4_i4(&mut c));
        let v: i32 = c.stack.pop().unwrap();
        assert_eq!(v, i32::MAX);
    }
}
