//! VM status register access — `§4.H.8`.
//!
//! Every VMSR is read-only. The reference implementation's write path is
//! present only as dead, commented-out code behind an unconditional
//! `InvalidInstruction`; there has never been a writable register to port.

use crate::context::ExecutionContext;
use crate::error::ExceptionState;

pub(super) fn ldvmsr(ctx: &mut ExecutionContext, index: u8) -> bool {
    let Some(value) = ctx.read_vmsr(index) else {
        ctx.raise(ExceptionState::InvalidInstruction);
        return false;
    };
    if ctx.stack.push_unsigned(value).is_err() {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    }
    true
}

pub(super) fn stvmsr(ctx: &mut ExecutionContext, _index: u8) -> bool {
    ctx.raise(ExceptionState::InvalidInstruction);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Mode;

    #[test]
    fn ldvmsr_in_range_reads_the_register() {
        let mut c = ExecutionContext::new(64, 64, 64, 64, Mode::empty());
        c.vmsr[3] = 0xAA;
        assert!(ldvmsr(&mut c, 3));
        assert_eq!(c.stack.pop::<u32>().unwrap(), 0xAA);
    }

    #[test]
    fn ldvmsr_out_of_range_raises_invalid_instruction() {
        let mut c = ExecutionContext::new(64, 64, 64, 64, Mode::empty());
        assert!(!ldvmsr(&mut c, 255));
        assert_eq!(c.exception_state, ExceptionState::InvalidInstruction);
    }

    #[test]
    fn stvmsr_always_raises() {
        let mut c = ExecutionContext::new(64, 64, 64, 64, Mode::empty());
        assert!(!stvmsr(&mut c, 0));
        assert_eq!(c.exception_state, ExceptionState::InvalidInstruction);
    }
}
