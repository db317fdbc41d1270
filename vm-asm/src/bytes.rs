//! Endian-safe integer/float byte conversions.
//!
//! Every routine here touches exactly `size_of::<T>()` bytes and makes no
//! assumption about the alignment of the slice it is given.

/// A primitive value that can be losslessly reinterpreted as a little/big
/// endian byte array of its own size.
pub trait ByteConvert: Copy + Sized {
    /// Number of bytes in the wire representation.
    const SIZE: usize;
    /// Owned byte array of `Self::SIZE` bytes.
    type Bytes: AsRef<[u8]> + AsMut<[u8]> + Default;

    fn to_le(self) -> Self::Bytes;
    fn to_be(self) -> Self::Bytes;
    fn from_le(bytes: &Self::Bytes) -> Self;
    fn from_be(bytes: &Self::Bytes) -> Self;
}

macro_rules! impl_byte_convert_int {
    ($($t:ty),* $(,)?) => {
        $(
            impl ByteConvert for $t {
                const SIZE: usize = core::mem::size_of::<$t>();
                type Bytes = [u8; core::mem::size_of::<$t>()];

                fn to_le(self) -> Self::Bytes {
                    <$t>::to_le_bytes(self)
                }

                fn to_be(self) -> Self::Bytes {
                    <$t>::to_be_bytes(self)
                }

                fn from_le(bytes: &Self::Bytes) -> Self {
                    <$t>::from_le_bytes(*bytes)
                }

                fn from_be(bytes: &Self::Bytes) -> Self {
                    <$t>::from_be_bytes(*bytes)
                }
            }
        )*
    };
}

impl_byte_convert_int!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);

impl ByteConvert for f32 {
    const SIZE: usize = 4;
    type Bytes = [u8; 4];

    fn to_le(self) -> Self::Bytes {
        self.to_bits().to_le_bytes()
    }

    fn to_be(self) -> Self::Bytes {
        self.to_bits().to_be_bytes()
    }

    fn from_le(bytes: &Self::Bytes) -> Self {
        f32::from_bits(u32::from_le_bytes(*bytes))
    }

    fn from_be(bytes: &Self::Bytes) -> Self {
        f32::from_bits(u32::from_be_bytes(*bytes))
    }
}

impl ByteConvert for f64 {
    const SIZE: usize = 8;
    type Bytes = [u8; 8];

    fn to_le(self) -> Self::Bytes {
        self.to_bits().to_le_bytes()
    }

    fn to_be(self) -> Self::Bytes {
        self.to_bits().to_be_bytes()
    }

    fn from_le(bytes: &Self::Bytes) -> Self {
        f64::from_bits(u64::from_le_bytes(*bytes))
    }

    fn from_be(bytes: &Self::Bytes) -> Self {
        f64::from_bits(u64::from_be_bytes(*bytes))
    }
}

/// Writes `value` into `buf` as little-endian bytes. Panics if `buf` is
/// shorter than `size_of::<T>()`.
pub fn to_bytes_le<T: ByteConvert>(value: T, buf: &mut [u8]) {
    let bytes = value.to_le();
    buf[..T::SIZE].copy_from_slice(bytes.as_ref());
}

/// Writes `value` into `buf` as big-endian bytes. Panics if `buf` is
/// shorter than `size_of::<T>()`.
pub fn to_bytes_be<T: ByteConvert>(value: T, buf: &mut [u8]) {
    let bytes = value.to_be();
    buf[..T::SIZE].copy_from_slice(bytes.as_ref());
}

/// Reads a little-endian `T` from the front of `buf`. Panics if `buf` is
/// shorter than `size_of::<T>()`.
pub fn from_bytes_le<T: ByteConvert>(buf: &[u8]) -> T {
    let mut bytes = T::Bytes::default();
    bytes.as_mut().copy_from_slice(&buf[..T::SIZE]);
    T::from_le(&bytes)
}

/// Reads a big-endian `T` from the front of `buf`. Panics if `buf` is
/// shorter than `size_of::<T>()`.
pub fn from_bytes_be<T: ByteConvert>(buf: &[u8]) -> T {
    let mut bytes = T::Bytes::default();
    bytes.as_mut().copy_from_slice(&buf[..T::SIZE]);
    T::from_be(&bytes)
}

/// Reverses the byte order of an unsigned integer.
pub trait Bswap {
    fn bswap(self) -> Self;
}

macro_rules! impl_bswap {
    ($($t:ty),* $(,)?) => {
        $(
            impl Bswap for $t {
                fn bswap(self) -> Self {
                    self.swap_bytes()
                }
            }
        )*
    };
}

impl_bswap!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);

/// Reinterprets the bits of `T` as `U` without any conversion. Both types
/// must have the same size; this is checked at compile time by the
/// concrete monomorphizations below rather than generically, since stable
/// Rust has no `size_of::<T>() == size_of::<U>()` trait bound.
pub fn bit_cast_u32_f32(value: u32) -> f32 {
    f32::from_bits(value)
}

pub fn bit_cast_f32_u32(value: f32) -> u32 {
    value.to_bits()
}

pub fn bit_cast_u64_f64(value: u64) -> f64 {
    f64::from_bits(value)
}

pub fn bit_cast_f64_u64(value: f64) -> u64 {
    value.to_bits()
}

/// Sign-extends an `N`-byte two's-complement value held in the low bits of a
/// `u64` out to the full 64 bits, given the source width in bytes.
pub const fn sign_extend_to_i64(value: u64, src_size: usize) -> i64 {
    let shift = (8 - src_size as u32) * 8;
    ((value << shift) as i64) >> shift
}

/// Zero-extends an `N`-byte value held in the low bits of a `u64` out to the
/// full 64 bits, given the source width in bytes.
pub const fn zero_extend_to_u64(value: u64, src_size: usize) -> u64 {
    let shift = (8 - src_size as u32) * 8;
    (value << shift) >> shift
}

/// Casts `value` to `i32`, asserting the cast round-trips exactly.
///
/// Mirrors the source's `IntegerTestCast`: used where a narrowing or
/// sign-changing cast must never silently lose information.
pub fn integer_cast_round_trip<T, U>(value: T) -> Option<U>
where
    T: TryInto<U> + Copy + PartialEq,
    U: TryInto<T> + Copy,
{
    let narrowed: U = value.try_into().ok()?;
    let back: T = narrowed.try_into().ok()?;
    (back == value).then_some(narrowed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_le_be() {
        let mut buf = [0u8; 4];
        to_bytes_le(0x0102_0304u32, &mut buf);
        assert_eq!(buf, [0x04, 0x03, 0x02, 0x01]);
        assert_eq!(from_bytes_le::<u32>(&buf), 0x0102_0304);

        to_bytes_be(0x0102_0304u32, &mut buf);
        assert_eq!(buf, [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(from_bytes_be::<u32>(&buf), 0x0102_0304);
    }

    #[test]
    fn float_round_trip_via_bits() {
        let mut buf = [0u8; 4];
        to_bytes_le(1.5f32, &mut buf);
        let back: f32 = from_bytes_le(&buf);
        assert_eq!(back, 1.5f32);
    }

    #[test]
    fn bswap_matches_manual_reversal() {
        assert_eq!(0x0102_0304u32.bswap(), 0x0403_0201u32);
        assert_eq!(0x01u8.bswap(), 0x01u8);
    }

    #[test]
    fn sign_extend_preserves_negative_values() {
        assert_eq!(sign_extend_to_i64(0x81, 1), -127);
        assert_eq!(zero_extend_to_u64(0x81, 1), 0x81);
        assert_eq!(sign_extend_to_i64(0xFFFF_FFFF, 4), -1);
    }

    #[test]
    fn integer_cast_round_trip_detects_loss() {
        let ok: Option<i32> = integer_cast_round_trip(10i64);
        assert_eq!(ok, Some(10));
        let lossy: Option<i32> = integer_cast_round_trip(i64::MAX);
        assert_eq!(lossy, None);
    }
}
