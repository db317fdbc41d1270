//! Checked integer arithmetic with a flag-based error model instead of
//! exceptions or panics: every operation returns a result plus a small set
//! of state flags, the same shape as `BaseInteger`/`Integer<T>` in the
//! reference implementation. The interpreter turns these flags into VM
//! exceptions in [`crate::interpreter::dispatch`]; this module knows
//! nothing about exceptions.
//!
//! Where the reference implementation hand-rolls half-width cross products
//! to work around the host having no native wider integer, this module
//! reaches for Rust's native `i128`/`u128` and `overflowing_*`/`checked_*`
//! methods instead — same results, no need to reimplement carry
//! propagation by hand.

use std::fmt;

/// Why a [`CheckedInt`] operation did not produce a plain value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntegerState(u8);

impl IntegerState {
    pub const INVALID: IntegerState = IntegerState(1 << 0);
    pub const OVERFLOW: IntegerState = IntegerState(1 << 1);
    pub const DIVIDE_BY_ZERO: IntegerState = IntegerState(1 << 2);

    pub const fn ok() -> Self {
        IntegerState(0)
    }

    pub const fn is_invalid(self) -> bool {
        self.0 & Self::INVALID.0 != 0
    }

    pub const fn is_overflow(self) -> bool {
        self.0 & Self::OVERFLOW.0 != 0
    }

    pub const fn is_divide_by_zero(self) -> bool {
        self.0 & Self::DIVIDE_BY_ZERO.0 != 0
    }

    pub const fn union(self, other: IntegerState) -> IntegerState {
        IntegerState(self.0 | other.0)
    }
}

impl fmt::Display for IntegerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.is_invalid() {
            parts.push("invalid");
        }
        if self.is_overflow() {
            parts.push("overflow");
        }
        if self.is_divide_by_zero() {
            parts.push("divide-by-zero");
        }
        if parts.is_empty() {
            write!(f, "ok")
        } else {
            write!(f, "{}", parts.join("|"))
        }
    }
}

/// An integer value that may have failed to compute cleanly.
///
/// A `CheckedInt` carrying [`IntegerState::INVALID`] has no meaningful
/// `value` — any further operation on it stays invalid, mirroring the
/// reference implementation's NaN-style propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckedInt<T> {
    value: T,
    state: IntegerState,
}

impl<T: Default + Copy> CheckedInt<T> {
    pub const fn new(value: T) -> Self {
        CheckedInt { value, state: IntegerState::ok() }
    }

    pub fn invalid() -> Self {
        CheckedInt { value: T::default(), state: IntegerState::INVALID }
    }

    fn with_state(value: T, state: IntegerState) -> Self {
        CheckedInt { value, state }
    }

    pub const fn state(&self) -> IntegerState {
        self.state
    }

    pub const fn is_invalid(&self) -> bool {
        self.state.is_invalid()
    }

    /// The value if the computation that produced it did not fail.
    pub fn value(&self) -> Option<T> {
        (!self.is_invalid()).then_some(self.value)
    }

    /// The value regardless of state; callers that already checked
    /// [`CheckedInt::is_invalid`] (or don't care) can use this directly.
    pub fn raw_value(&self) -> T {
        self.value
    }
}

impl<T: Default + Copy> From<T> for CheckedInt<T> {
    fn from(value: T) -> Self {
        CheckedInt::new(value)
    }
}

macro_rules! unsigned_ops {
    ($t:ty, $wide:ty) => {
        paste::paste! {
            impl CheckedInt<$t> {
                pub fn checked_add(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    let (v, overflow) = self.value.overflowing_add(rhs.value);
                    let state = if overflow { IntegerState::OVERFLOW } else { IntegerState::ok() };
                    Self::with_state(v, state)
                }

                pub fn checked_sub(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    let (v, overflow) = self.value.overflowing_sub(rhs.value);
                    let state = if overflow { IntegerState::OVERFLOW } else { IntegerState::ok() };
                    Self::with_state(v, state)
                }

                pub fn checked_mul(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    let (v, overflow) = self.value.overflowing_mul(rhs.value);
                    let state = if overflow { IntegerState::OVERFLOW } else { IntegerState::ok() };
                    Self::with_state(v, state)
                }

                /// High word of the full-width unsigned product.
                pub fn mulh(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    let wide = (self.value as $wide) * (rhs.value as $wide);
                    let high = (wide >> (core::mem::size_of::<$t>() * 8)) as $t;
                    Self::with_state(high, IntegerState::ok())
                }

                pub fn checked_div(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    if rhs.value == 0 {
                        return Self::with_state(0, IntegerState::INVALID.union(IntegerState::DIVIDE_BY_ZERO));
                    }
                    Self::with_state(self.value / rhs.value, IntegerState::ok())
                }

                pub fn checked_rem(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    if rhs.value == 0 {
                        return Self::with_state(0, IntegerState::INVALID.union(IntegerState::DIVIDE_BY_ZERO));
                    }
                    Self::with_state(self.value % rhs.value, IntegerState::ok())
                }

                pub fn bitand(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    Self::with_state(self.value & rhs.value, IntegerState::ok())
                }

                pub fn bitor(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    Self::with_state(self.value | rhs.value, IntegerState::ok())
                }

                pub fn bitxor(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    Self::with_state(self.value ^ rhs.value, IntegerState::ok())
                }

                pub fn bitnot(self) -> Self {
                    if self.is_invalid() {
                        return Self::invalid();
                    }
                    Self::with_state(!self.value, IntegerState::ok())
                }

                /// `rhs` is the shift amount; shifting by `>= bit width` is not
                /// undefined behaviour here, it sets [`IntegerState::OVERFLOW`]
                /// and yields zero, matching the reference implementation.
                pub fn checked_shl(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    let bits = (core::mem::size_of::<$t>() * 8) as $t;
                    if rhs.value >= bits {
                        return Self::with_state(0, IntegerState::OVERFLOW);
                    }
                    let vr = self.value << rhs.value;
                    let state = if self.value != (vr >> rhs.value) {
                        IntegerState::OVERFLOW
                    } else {
                        IntegerState::ok()
                    };
                    Self::with_state(vr, state)
                }

                pub fn checked_shr(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    let bits = (core::mem::size_of::<$t>() * 8) as $t;
                    if rhs.value >= bits {
                        return Self::with_state(0, IntegerState::ok());
                    }
                    Self::with_state(self.value >> rhs.value, IntegerState::ok())
                }
            }
        }
    };
}

macro_rules! signed_ops {
    ($t:ty, $wide:ty, $unsigned:ty) => {
        paste::paste! {
            impl CheckedInt<$t> {
                pub fn checked_add(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    let (v, overflow) = self.value.overflowing_add(rhs.value);
                    let state = if overflow { IntegerState::OVERFLOW } else { IntegerState::ok() };
                    Self::with_state(v, state)
                }

                pub fn checked_sub(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    let (v, overflow) = self.value.overflowing_sub(rhs.value);
                    let state = if overflow { IntegerState::OVERFLOW } else { IntegerState::ok() };
                    Self::with_state(v, state)
                }

                pub fn checked_mul(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    let (v, overflow) = self.value.overflowing_mul(rhs.value);
                    let state = if overflow { IntegerState::OVERFLOW } else { IntegerState::ok() };
                    Self::with_state(v, state)
                }

                /// High word of the full-width signed product.
                pub fn mulh(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    let wide = (self.value as $wide) * (rhs.value as $wide);
                    let high = (wide >> (core::mem::size_of::<$t>() * 8)) as $t;
                    Self::with_state(high, IntegerState::ok())
                }

                /// `T::MIN / -1` is the one case where signed division
                /// overflows rather than divides cleanly.
                pub fn checked_div(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    if rhs.value == 0 {
                        return Self::with_state(0, IntegerState::INVALID.union(IntegerState::DIVIDE_BY_ZERO));
                    }
                    if self.value == <$t>::MIN && rhs.value == -1 {
                        return Self::with_state(self.value, IntegerState::OVERFLOW);
                    }
                    Self::with_state(self.value / rhs.value, IntegerState::ok())
                }

                pub fn checked_rem(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    if rhs.value == 0 {
                        return Self::with_state(0, IntegerState::INVALID.union(IntegerState::DIVIDE_BY_ZERO));
                    }
                    if self.value == <$t>::MIN && rhs.value == -1 {
                        return Self::with_state(0, IntegerState::OVERFLOW);
                    }
                    Self::with_state(self.value % rhs.value, IntegerState::ok())
                }

                pub fn bitand(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    Self::with_state(self.value & rhs.value, IntegerState::ok())
                }

                pub fn bitor(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    Self::with_state(self.value | rhs.value, IntegerState::ok())
                }

                pub fn bitxor(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    Self::with_state(self.value ^ rhs.value, IntegerState::ok())
                }

                pub fn bitnot(self) -> Self {
                    if self.is_invalid() {
                        return Self::invalid();
                    }
                    Self::with_state(!self.value, IntegerState::ok())
                }

                pub fn negate(self) -> Self {
                    if self.is_invalid() {
                        return Self::invalid();
                    }
                    if self.value == <$t>::MIN {
                        return Self::with_state(self.value, IntegerState::OVERFLOW);
                    }
                    Self::with_state(-self.value, IntegerState::ok())
                }

                pub fn abs(self) -> Self {
                    if self.is_invalid() {
                        return Self::invalid();
                    }
                    if self.value == <$t>::MIN {
                        return Self::with_state(self.value, IntegerState::OVERFLOW);
                    }
                    Self::with_state(self.value.abs(), IntegerState::ok())
                }

                /// Shift amount is taken from the unsigned bit pattern of
                /// `rhs`; a negative `rhs.value` is therefore never treated
                /// as negative here, matching the reference implementation's
                /// `TUnsigned` reinterpretation.
                pub fn checked_shl(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    let bits = (core::mem::size_of::<$t>() * 8) as u32;
                    let amount = rhs.value as $unsigned as u32;
                    if amount >= bits {
                        return Self::with_state(0, IntegerState::OVERFLOW);
                    }
                    let vr = ((self.value as $unsigned) << amount) as $t;
                    let state = if self.value != (vr >> amount) {
                        IntegerState::OVERFLOW
                    } else {
                        IntegerState::ok()
                    };
                    Self::with_state(vr, state)
                }

                pub fn checked_shr(self, rhs: Self) -> Self {
                    if self.is_invalid() || rhs.is_invalid() {
                        return Self::invalid();
                    }
                    let bits = (core::mem::size_of::<$t>() * 8) as u32;
                    let amount = rhs.value as $unsigned as u32;
                    if amount >= bits {
                        let filled = if self.value < 0 { -1 } else { 0 };
                        return Self::with_state(filled, IntegerState::ok());
                    }
                    Self::with_state(self.value >> amount, IntegerState::ok())
                }
            }
        }
    };
}

unsigned_ops!(u32, u64);
unsigned_ops!(u64, u128);
signed_ops!(i32, i64, u32);
signed_ops!(i64, i128, u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_add_overflow_wraps_and_flags() {
        let r = CheckedInt::new(u32::MAX).checked_add(CheckedInt::new(1));
        assert!(r.state().is_overflow());
        assert_eq!(r.raw_value(), 0);
    }

    #[test]
    fn signed_add_overflow_detected_by_sign_change() {
        let r = CheckedInt::new(i32::MAX).checked_add(CheckedInt::new(1));
        assert!(r.state().is_overflow());
        assert_eq!(r.raw_value(), i32::MIN);
    }

    #[test]
    fn divide_by_zero_is_invalid() {
        let r = CheckedInt::new(10i32).checked_div(CheckedInt::new(0));
        assert!(r.is_invalid());
        assert!(r.state().is_divide_by_zero());
    }

    #[test]
    fn int_min_div_neg_one_overflows_without_panicking() {
        let r = CheckedInt::new(i32::MIN).checked_div(CheckedInt::new(-1));
        assert!(r.state().is_overflow());
        assert_eq!(r.raw_value(), i32::MIN);
    }

    #[test]
    fn int_min_negate_overflows() {
        let r = CheckedInt::new(i32::MIN).negate();
        assert!(r.state().is_overflow());
        assert_eq!(r.raw_value(), i32::MIN);
    }

    #[test]
    fn shift_by_bit_width_or_more_overflows_to_zero() {
        let r = CheckedInt::new(1u32).checked_shl(CheckedInt::new(32));
        assert!(r.state().is_overflow());
        assert_eq!(r.raw_value(), 0);
    }

    #[test]
    fn unsigned_mulh_returns_high_word() {
        let r = CheckedInt::new(u32::MAX).mulh(CheckedInt::new(u32::MAX));
        assert_eq!(r.raw_value(), u32::MAX - 1);
    }

    #[test]
    fn invalid_propagates_through_any_operation() {
        let invalid = CheckedInt::<i32>::invalid();
        let r = invalid.checked_add(CheckedInt::new(1));
        assert!(r.is_invalid());
    }
}
