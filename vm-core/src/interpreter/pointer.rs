//! Guest-memory pointer handlers — `§4.H.7`.
//!
//! Unlike `Ldarg`/`Ldvar`, these route through [`GuestMemory`] and are
//! generic over both a value width (`u8`/`u16`/`u32`/`u64`) and a pointer
//! width picked per-call from `ctx.mode.is_address_64_bit()`.

use vm_asm::bytes::ByteConvert;

use crate::context::ExecutionContext;
use crate::error::ExceptionState;
use crate::memory::{GuestMemory, PageFaultHook};
use crate::stack::PushValue;

fn ldpv_t<TValue, TPointer, H>(ctx: &mut ExecutionContext, mem: &mut GuestMemory<H>) -> bool
where
    TValue: ByteConvert + Default + Copy + PushValue,
    TPointer: ByteConvert + Default + Copy + Into<u64> + PushValue,
    H: PageFaultHook,
{
    let Ok(address) = ctx.stack.pop::<TPointer>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    let mut buf = TValue::Bytes::default();
    if mem.read(address.into(), buf.as_mut()).is_err() {
        let _ = address.push_onto(&mut ctx.stack);
        ctx.raise(ExceptionState::InvalidAccess);
        return false;
    }
    let value = TValue::from_le(&buf);
    if value.push_onto(&mut ctx.stack).is_err() {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    }
    true
}

macro_rules! ldpv_width {
    ($name:ident, $value:ty) => {
        pub(super) fn $name<H: PageFaultHook>(ctx: &mut ExecutionContext, mem: &mut GuestMemory<H>) -> bool {
            if ctx.mode.is_address_64_bit() {
                ldpv_t::<$value, u64, H>(ctx, mem)
            } else {
                ldpv_t::<$value, u32, H>(ctx, mem)
            }
        }
    };
}

ldpv_width!(ldpv_x1, u8);
ldpv_width!(ldpv_x2, u16);
ldpv_width!(ldpv_x4, u32);
ldpv_width!(ldpv_x8, u64);

fn stpv_t<TValue, TPointer, H>(ctx: &mut ExecutionContext, mem: &mut GuestMemory<H>) -> bool
where
    TValue: ByteConvert + Default + Copy + PushValue,
    TPointer: ByteConvert + Default + Copy + Into<u64> + PushValue,
    H: PageFaultHook,
{
    let Ok(address) = ctx.stack.pop::<TPointer>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    let Ok(value) = ctx.stack.pop::<TValue>() else {
        let _ = address.push_onto(&mut ctx.stack);
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };
    let buf = value.to_le();
    if mem.write(address.into(), buf.as_ref()).is_err() {
        let _ = value.push_onto(&mut ctx.stack);
        let _ = address.push_onto(&mut ctx.stack);
        ctx.raise(ExceptionState::InvalidAccess);
        return false;
    }
    true
}

macro_rules! stpv_width {
    ($name:ident, $value:ty) => {
        pub(super) fn $name<H: PageFaultHook>(ctx: &mut ExecutionContext, mem: &mut GuestMemory<H>) -> bool {
            if ctx.mode.is_address_64_bit() {
                stpv_t::<$value, u64, H>(ctx, mem)
            } else {
                stpv_t::<$value, u32, H>(ctx, mem)
            }
        }
    };
}

stpv_width!(stpv_x1, u8);
stpv_width!(stpv_x2, u16);
stpv_width!(stpv_x4, u32);
stpv_width!(stpv_x8, u64);

/// `Ldargp`/`Ldvarp` and `Ldpv`/`Stpv` carry unsigned pointer values, but
/// `Ppcpy`/`Pvfil`'s stack operands are signed — an `i32` pointer's bit
/// pattern must zero-extend, not sign-extend, to the 64-bit guest address,
/// so this is a reinterpretation rather than a numeric widen.
fn signed_pointer_to_address(is_64_bit: bool, bits_32: Option<i32>, bits_64: Option<i64>) -> u64 {
    if is_64_bit { bits_64.unwrap() as u64 } else { bits_32.unwrap() as u32 as u64 }
}

/// `Ppcpy`: copies `count` bytes from `src` to `dst`, both signed pointers
/// of the mode's address width, via a temporary host buffer.
pub(super) fn ppcpy<H: PageFaultHook>(ctx: &mut ExecutionContext, mem: &mut GuestMemory<H>) -> bool {
    let is_64 = ctx.mode.is_address_64_bit();

    if is_64 {
        let Ok(count) = ctx.stack.pop::<u64>() else {
            ctx.raise(ExceptionState::StackOverflow);
            return false;
        };
        let Ok(dst) = ctx.stack.pop::<i64>() else {
            let _ = ctx.stack.push_unsigned(count);
            ctx.raise(ExceptionState::StackOverflow);
            return false;
        };
        let Ok(src) = ctx.stack.pop::<i64>() else {
            let _ = dst.push_onto(&mut ctx.stack);
            let _ = ctx.stack.push_unsigned(count);
            ctx.raise(ExceptionState::StackOverflow);
            return false;
        };

        let dst_addr = signed_pointer_to_address(true, None, Some(dst));
        let src_addr = signed_pointer_to_address(true, None, Some(src));
        let mut buf = vec![0u8; count as usize];
        if mem.read(src_addr, &mut buf).is_err() || mem.write(dst_addr, &buf).is_err() {
            let _ = src.push_onto(&mut ctx.stack);
            let _ = dst.push_onto(&mut ctx.stack);
            let _ = ctx.stack.push_unsigned(count);
            ctx.raise(ExceptionState::InvalidAccess);
            return false;
        }
        true
    } else {
        let Ok(count) = ctx.stack.pop::<u32>() else {
            ctx.raise(ExceptionState::StackOverflow);
            return false;
        };
        let Ok(dst) = ctx.stack.pop::<i32>() else {
            let _ = ctx.stack.push_unsigned(count);
            ctx.raise(ExceptionState::StackOverflow);
            return false;
        };
        let Ok(src) = ctx.stack.pop::<i32>() else {
            let _ = dst.push_onto(&mut ctx.stack);
            let _ = ctx.stack.push_unsigned(count);
            ctx.raise(ExceptionState::StackOverflow);
            return false;
        };

        let dst_addr = signed_pointer_to_address(false, Some(dst), None);
        let src_addr = signed_pointer_to_address(false, Some(src), None);
        let mut buf = vec![0u8; count as usize];
        if mem.read(src_addr, &mut buf).is_err() || mem.write(dst_addr, &buf).is_err() {
            let _ = src.push_onto(&mut ctx.stack);
            let _ = dst.push_onto(&mut ctx.stack);
            let _ = ctx.stack.push_unsigned(count);
            ctx.raise(ExceptionState::InvalidAccess);
            return false;
        }
        true
    }
}

fn pvfil_t<TValue, H>(ctx: &mut ExecutionContext, mem: &mut GuestMemory<H>) -> bool
where
    TValue: ByteConvert + Default + Copy + PushValue,
    H: PageFaultHook,
{
    let is_64 = ctx.mode.is_address_64_bit();

    let Ok(count) = ctx.stack.pop::<u64>() else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };

    if is_64 {
        let Ok(pointer) = ctx.stack.pop::<i64>() else {
            let _ = ctx.stack.push_unsigned(count);
            ctx.raise(ExceptionState::StackOverflow);
            return false;
        };
        let Ok(pattern) = ctx.stack.pop::<TValue>() else {
            let _ = pointer.push_onto(&mut ctx.stack);
            let _ = ctx.stack.push_unsigned(count);
            ctx.raise(ExceptionState::StackOverflow);
            return false;
        };

        let address = signed_pointer_to_address(true, None, Some(pointer));
        let buf = fill_pattern(count, pattern);
        if mem.write(address, &buf).is_err() {
            let _ = pattern.push_onto(&mut ctx.stack);
            let _ = pointer.push_onto(&mut ctx.stack);
            let _ = ctx.stack.push_unsigned(count);
            ctx.raise(ExceptionState::InvalidAccess);
            return false;
        }
        true
    } else {
        let Ok(pointer) = ctx.stack.pop::<i32>() else {
            let _ = ctx.stack.push_unsigned(count);
            ctx.raise(ExceptionState::StackOverflow);
            return false;
        };
        let Ok(pattern) = ctx.stack.pop::<TValue>() else {
            let _ = pointer.push_onto(&mut ctx.stack);
            let _ = ctx.stack.push_unsigned(count);
            ctx.raise(ExceptionState::StackOverflow);
            return false;
        };

        let address = signed_pointer_to_address(false, Some(pointer), None);
        let buf = fill_pattern(count, pattern);
        if mem.write(address, &buf).is_err() {
            let _ = pattern.push_onto(&mut ctx.stack);
            let _ = pointer.push_onto(&mut ctx.stack);
            let _ = ctx.stack.push_unsigned(count);
            ctx.raise(ExceptionState::InvalidAccess);
            return false;
        }
        true
    }
}

fn fill_pattern<TValue: ByteConvert + Copy>(count: u64, pattern: TValue) -> Vec<u8> {
    let pattern_bytes = pattern.to_le();
    let mut buf = Vec::with_capacity(count as usize * TValue::SIZE);
    for _ in 0..count {
        buf.extend_from_slice(pattern_bytes.as_ref());
    }
    buf
}

pub(super) fn pvfil_x1<H: PageFaultHook>(ctx: &mut ExecutionContext, mem: &mut GuestMemory<H>) -> bool {
    pvfil_t::<u8, H>(ctx, mem)
}
pub(super) fn pvfil_x2<H: PageFaultHook>(ctx: &mut ExecutionContext, mem: &mut GuestMemory<H>) -> bool {
    pvfil_t::<u16, H>(ctx, mem)
}
pub(super) fn pvfil_x4<H: PageFaultHook>(ctx: &mut ExecutionContext, mem: &mut GuestMemory<H>) -> bool {
    pvfil_t::<u32, H>(ctx, mem)
}
pub(super) fn pvfil_x8<H: PageFaultHook>(ctx: &mut ExecutionContext, mem: &mut GuestMemory<H>) -> bool {
    pvfil_t::<u64, H>(ctx, mem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Mode;
    use crate::memory::{AllocateOptions, MemoryType};

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(256, 64, 64, 64, Mode::empty())
    }

    #[test]
    fn stpv_then_ldpv_round_trips() {
        let mut c = ctx();
        let mut mem = GuestMemory::new(0x10000);
        let addr = mem.allocate(0, 0x1000, MemoryType::Data, 0, AllocateOptions::default()).unwrap();
        c.stack.push_unsigned(0xCAFEu32).unwrap();
        c.stack.push_unsigned(addr as u32).unwrap();
        assert!(stpv_x4(&mut c, &mut mem));
        c.stack.push_unsigned(addr as u32).unwrap();
        assert!(ldpv_x4(&mut c, &mut mem));
        assert_eq!(c.stack.pop::<u32>().unwrap(), 0xCAFE);
    }

    #[test]
    fn pvfil_x4_fills_a_repeating_pattern() {
        let mut c = ctx();
        let mut mem = GuestMemory::new(0x10000);
        let addr = mem.allocate(0, 0x1000, MemoryType::Data, 0, AllocateOptions::default()).unwrap();
        c.stack.push_unsigned(0x11223344u32).unwrap();
        c.stack.push_signed::<i32>(addr as i32, addr as u32 as u64).unwrap();
        c.stack.push_unsigned(2u64).unwrap();
        assert!(pvfil_x4(&mut c, &mut mem));
        let mut buf = [0u8; 8];
        mem.read(addr, &mut buf).unwrap();
        assert_eq!(buf, [0x44, 0x33, 0x22, 0x11, 0x44, 0x33, 0x22, 0x11]);
    }
}
