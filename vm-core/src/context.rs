//! The interpreter's persisted, inspectable execution state.
//!
//! Field layout follows `§6.2` of the format spec: this is the struct an
//! embedder snapshots to suspend/resume a guest, or inspects after a run
//! stops to read `ExceptionState`.

use crate::error::ExceptionState;
use crate::frame::{ShadowFrame, TableEntry};
use crate::stack::DataAreaStack;

pub const VMSR_COUNT: usize = 32;

/// Bits of the instruction prefix the decoder threads through to a
/// handler; today only `CHECK_OVERFLOW` is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchedPrefix(u32);

impl FetchedPrefix {
    pub const CHECK_OVERFLOW: u32 = 1 << 0;

    pub const fn empty() -> Self {
        FetchedPrefix(0)
    }

    pub const fn checks_overflow(self) -> bool {
        self.0 & Self::CHECK_OVERFLOW != 0
    }
}

/// Which of the per-call tables have been set up, tracked so `Ldarg`/
/// `Ldvar` can reject use before `Arg`/`Var` establish the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XTableState(u32);

impl XTableState {
    pub const ARGUMENT_TABLE_READY: u32 = 1 << 0;
    pub const LOCAL_VARIABLE_TABLE_READY: u32 = 1 << 1;

    pub const fn empty() -> Self {
        XTableState(0)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn from_raw(raw: u32) -> Self {
        XTableState(raw)
    }

    pub fn set(&mut self, bit: u32) {
        self.0 |= bit;
    }

    pub fn clear(&mut self, bit: u32) {
        self.0 &= !bit;
    }

    pub const fn is_set(self, bit: u32) -> bool {
        self.0 & bit != 0
    }
}

/// Pointer width and stack-operation width, selected per instruction class
/// rather than by building two interpreters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mode(u32);

impl Mode {
    pub const VM_POINTER_64_BIT: u32 = 1 << 0;
    pub const STACK_OPER_64_BIT: u32 = 1 << 1;

    pub const fn empty() -> Self {
        Mode(0)
    }

    pub const fn with(flags: u32) -> Self {
        Mode(flags)
    }

    pub const fn is_address_64_bit(self) -> bool {
        self.0 & Self::VM_POINTER_64_BIT != 0
    }

    pub const fn is_stack_oper_64_bit(self) -> bool {
        self.0 & Self::STACK_OPER_64_BIT != 0
    }
}

/// The full persisted state of one execution context.
pub struct ExecutionContext {
    pub ip: u32,
    pub xtable_state: XTableState,
    pub stack: DataAreaStack,
    pub shadow_stack: DataAreaStack,
    pub argument_stack: DataAreaStack,
    pub local_variable_stack: DataAreaStack,
    pub exception_state: ExceptionState,
    pub next_ip: u32,
    pub fetched_prefix: FetchedPrefix,
    pub vmsr: [u32; VMSR_COUNT],
    pub mode: Mode,
}

impl ExecutionContext {
    pub fn new(stack_size: u32, shadow_size: u32, arg_table_size: u32, local_table_size: u32, mode: Mode) -> Self {
        let stack_alignment = if mode.is_stack_oper_64_bit() { 8 } else { 4 };
        ExecutionContext {
            ip: 0,
            xtable_state: XTableState::empty(),
            stack: DataAreaStack::new(stack_size, stack_alignment),
            shadow_stack: DataAreaStack::new(shadow_size, 4),
            argument_stack: DataAreaStack::new(arg_table_size, 4),
            local_variable_stack: DataAreaStack::new(local_table_size, 4),
            exception_state: ExceptionState::None,
            next_ip: 0,
            fetched_prefix: FetchedPrefix::empty(),
            vmsr: [0; VMSR_COUNT],
            mode,
        }
    }

    pub fn is_running(&self) -> bool {
        self.exception_state.is_none()
    }

    /// Raises `state`, re-pointing `NextIP` at the current instruction per
    /// `§4.H`'s failure semantics so no partial advance is observable.
    pub fn raise(&mut self, state: ExceptionState) {
        self.exception_state = state;
        self.next_ip = self.ip;
    }

    pub fn read_vmsr(&self, index: u8) -> Option<u32> {
        self.vmsr.get(index as usize).copied()
    }

    pub fn push_shadow_frame(&mut self, frame: ShadowFrame) -> Result<(), crate::stack::StackError> {
        self.shadow_stack.push_bytes(&frame.to_bytes())
    }

    pub fn pop_shadow_frame(&mut self) -> Result<ShadowFrame, crate::stack::StackError> {
        let mut buf = [0u8; ShadowFrame::ENCODED_LEN];
        self.shadow_stack.pop_bytes(&mut buf)?;
        Ok(ShadowFrame::from_bytes(&buf))
    }

    /// Reads the innermost shadow frame without unwinding the call.
    pub fn peek_shadow_frame(&self) -> Result<ShadowFrame, crate::stack::StackError> {
        let mut buf = [0u8; ShadowFrame::ENCODED_LEN];
        self.shadow_stack.peek_bytes(0, &mut buf)?;
        Ok(ShadowFrame::from_bytes(&buf))
    }

    pub fn push_table_entry(table: &mut DataAreaStack, entry: TableEntry) -> Result<(), crate::stack::StackError> {
        table.push_bytes(&entry.to_bytes())
    }

    pub fn peek_table_entry(table: &DataAreaStack, offset_from_current: i64) -> Result<TableEntry, crate::stack::StackError> {
        let mut buf = [0u8; TableEntry::ENCODED_LEN];
        table.peek_bytes(offset_from_current, &mut buf)?;
        Ok(TableEntry::from_bytes(&buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_is_running_with_empty_stacks() {
        let ctx = ExecutionContext::new(256, 256, 256, 256, Mode::with(Mode::STACK_OPER_64_BIT));
        assert!(ctx.is_running());
        assert!(ctx.stack.is_empty());
    }

    #[test]
    fn raise_repoints_next_ip_at_the_current_instruction() {
        let mut ctx = ExecutionContext::new(64, 64, 64, 64, Mode::empty());
        ctx.ip = 40;
        ctx.next_ip = 44;
        ctx.raise(ExceptionState::InvalidInstruction);
        assert_eq!(ctx.next_ip, 40);
        assert!(!ctx.is_running());
    }
}
