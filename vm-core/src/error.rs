//! The guest-visible exception taxonomy and the host-visible error type.
//!
//! `ExceptionState` is the field inspected by the embedder after a run
//! stops (`§7` of the format spec); it is never unwound as a Rust panic or
//! `Result::Err` inside the dispatch loop. `HostError` is the orthogonal
//! "something about the *embedding* is broken" channel — a `MemoryHook`
//! that can't commit a page, a malformed program handed to the loader —
//! styled after `InterpreterError` in `fuel-vm`'s `error.rs`.

use thiserror::Error;

/// Why the interpreter stopped before reaching a natural `Ret`/program end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ExceptionState {
    #[default]
    None = 0,
    StackOverflow = 1,
    InvalidInstruction = 2,
    InvalidAccess = 3,
    IntegerDivideByZero = 4,
    IntegerOverflow = 5,
    FloatingPointInvalid = 6,
    Breakpoint = 7,
    SingleStep = 8,
}

impl ExceptionState {
    pub const fn is_none(self) -> bool {
        matches!(self, ExceptionState::None)
    }
}

/// Errors raised by the embedding rather than the guest program: a bad
/// memory-manager request, an out-of-range host call, a malformed
/// bytecode image handed to the loader.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("address {address:#x} is not mapped")]
    UnmappedAddress { address: u64 },

    #[error("address range [{address:#x}, {address:#x} + {size:#x}) overflows the address space")]
    RangeOverflow { address: u64, size: u64 },

    #[error("memory type mismatch at {address:#x}: expected {expected:?}, found {found:?}")]
    MemoryTypeMismatch {
        address: u64,
        expected: crate::memory::MemoryType,
        found: crate::memory::MemoryType,
    },

    #[error("no free region large enough for {size:#x} bytes")]
    OutOfMemory { size: u64 },

    #[error("page commit hook failed for page at {page_address:#x}")]
    PageCommitFailed { page_address: u64 },

    #[error("bytecode image is malformed: {reason}")]
    MalformedImage { reason: String },

    #[error("register index {0} is out of range")]
    InvalidRegister(u8),
}

pub type HostResult<T> = Result<T, HostError>;
