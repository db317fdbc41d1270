//! Argument-table and local-variable-table handlers — `§4.H.6`.
//!
//! `Arg`/`Var` reserve space directly on the value stack and record where it
//! landed as a [`TableEntry`] on the argument/local-variable stack; `Ldarg`/
//! `Ldvar`/`Starg`/`Stvar` look that entry up by index and move bytes
//! to/from it. The reference implementation routes these reads and writes
//! through guest memory, but its own `TableEntry.Address` is populated from
//! `Stack.TopOffset()` at reservation time — a value-stack offset, not a
//! guest address — so here the table-entry address is just that offset and
//! `Ldarg`/`Ldvar`/`Starg`/`Stvar` touch `ctx.stack`'s buffer directly.

use crate::consts;
use crate::context::{ExecutionContext, XTableState};
use crate::error::ExceptionState;
use crate::frame::TableEntry;
use crate::stack::DataAreaStack;

/// `Initarg`: resets the argument table to empty for the current call frame
/// and clears its ready bit so a stale `Ldarg` from before the reset fails.
pub(super) fn initarg(ctx: &mut ExecutionContext) -> bool {
    let Ok(frame) = ctx.peek_shadow_frame() else {
        ctx.raise(ExceptionState::InvalidAccess);
        return false;
    };
    if ctx.argument_stack.set_top_offset(frame.atp).is_err() {
        ctx.raise(ExceptionState::InvalidAccess);
        return false;
    }
    ctx.xtable_state.clear(XTableState::ARGUMENT_TABLE_READY);
    true
}

enum Table {
    Argument,
    LocalVariable,
}

fn reserve_entry(ctx: &mut ExecutionContext, table: Table, size: u32, max_single: u32, max_count: u32) -> bool {
    if size == 0 || size > max_single {
        ctx.raise(ExceptionState::InvalidInstruction);
        return false;
    }

    let Ok(address) = ctx.stack.reserve(size) else {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    };

    let entry = TableEntry { size, address };
    let (table_stack, ready_bit) = match table {
        Table::Argument => (&mut ctx.argument_stack, XTableState::ARGUMENT_TABLE_READY),
        Table::LocalVariable => (&mut ctx.local_variable_stack, XTableState::LOCAL_VARIABLE_TABLE_READY),
    };

    let count = (table_stack.size() - table_stack.top_offset()) / TableEntry::ENCODED_LEN as u32;
    if count >= max_count {
        ctx.raise(ExceptionState::InvalidInstruction);
        return false;
    }

    if table_stack.push_bytes(&entry.to_bytes()).is_err() {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    }
    ctx.xtable_state.set(ready_bit);
    true
}

/// `Arg`: reserves `size` bytes for the next positional argument.
pub(super) fn arg(ctx: &mut ExecutionContext, size: u32) -> bool {
    reserve_entry(ctx, Table::Argument, size, consts::MAX_SINGLE_ARG, consts::MAX_ARG_COUNT)
}

/// `Var`: reserves `size` bytes for the next local variable.
pub(super) fn var(ctx: &mut ExecutionContext, size: u32) -> bool {
    reserve_entry(ctx, Table::LocalVariable, size, consts::MAX_SINGLE_LOCAL_VAR, consts::MAX_LOCAL_VAR_COUNT)
}

/// Resolves `index` (0 = most recently reserved) against the live entries
/// between the frame's saved table pointer and the table's current top.
fn resolve_entry(table: &DataAreaStack, frame_base: u32, index: u32) -> Result<TableEntry, ExceptionState> {
    let current = table.top_offset();
    if frame_base < current || (frame_base - current) % TableEntry::ENCODED_LEN as u32 != 0 {
        return Err(ExceptionState::InvalidAccess);
    }
    let entry_count = (frame_base - current) / TableEntry::ENCODED_LEN as u32;
    if index >= entry_count {
        return Err(ExceptionState::InvalidInstruction);
    }
    let slot_from_top = entry_count - 1 - index;
    let offset_from_current = slot_from_top as i64 * TableEntry::ENCODED_LEN as i64;
    ExecutionContext::peek_table_entry(table, offset_from_current).map_err(|_| ExceptionState::InvalidAccess)
}

enum Direction {
    Load,
    Store,
}

fn access_entry(ctx: &mut ExecutionContext, table: Table, index: u32, direction: Direction) -> bool {
    let Ok(frame) = ctx.peek_shadow_frame() else {
        ctx.raise(ExceptionState::InvalidAccess);
        return false;
    };
    let (table_stack, frame_base) = match table {
        Table::Argument => (&ctx.argument_stack, frame.atp),
        Table::LocalVariable => (&ctx.local_variable_stack, frame.lvtp),
    };
    let entry = match resolve_entry(table_stack, frame_base, index) {
        Ok(entry) => entry,
        Err(state) => {
            ctx.raise(state);
            return false;
        }
    };

    let mut buf = vec![0u8; entry.size as usize];
    match direction {
        Direction::Load => {
            if ctx.stack.read_at(entry.address, &mut buf).is_err() {
                ctx.raise(ExceptionState::InvalidAccess);
                return false;
            }
            if ctx.stack.push_bytes(&buf).is_err() {
                ctx.raise(ExceptionState::StackOverflow);
                return false;
            }
        }
        Direction::Store => {
            if ctx.stack.pop_bytes(&mut buf).is_err() {
                ctx.raise(ExceptionState::StackOverflow);
                return false;
            }
            if ctx.stack.write_at(entry.address, &buf).is_err() {
                let _ = ctx.stack.push_bytes(&buf);
                ctx.raise(ExceptionState::InvalidAccess);
                return false;
            }
        }
    }
    true
}

pub(super) fn ldarg(ctx: &mut ExecutionContext, index: u32) -> bool {
    access_entry(ctx, Table::Argument, index, Direction::Load)
}

pub(super) fn ldvar(ctx: &mut ExecutionContext, index: u32) -> bool {
    access_entry(ctx, Table::LocalVariable, index, Direction::Load)
}

pub(super) fn starg(ctx: &mut ExecutionContext, index: u32) -> bool {
    access_entry(ctx, Table::Argument, index, Direction::Store)
}

pub(super) fn stvar(ctx: &mut ExecutionContext, index: u32) -> bool {
    access_entry(ctx, Table::LocalVariable, index, Direction::Store)
}

fn pointer_of(ctx: &mut ExecutionContext, table: Table, index: u32) -> bool {
    let Ok(frame) = ctx.peek_shadow_frame() else {
        ctx.raise(ExceptionState::InvalidAccess);
        return false;
    };
    let (table_stack, frame_base) = match table {
        Table::Argument => (&ctx.argument_stack, frame.atp),
        Table::LocalVariable => (&ctx.local_variable_stack, frame.lvtp),
    };
    let entry = match resolve_entry(table_stack, frame_base, index) {
        Ok(entry) => entry,
        Err(state) => {
            ctx.raise(state);
            return false;
        }
    };
    if ctx.stack.push_unsigned(entry.address).is_err() || ctx.stack.push_unsigned(entry.size).is_err() {
        ctx.raise(ExceptionState::StackOverflow);
        return false;
    }
    true
}

pub(super) fn ldargp(ctx: &mut ExecutionContext, index: u32) -> bool {
    pointer_of(ctx, Table::Argument, index)
}

pub(super) fn ldvarp(ctx: &mut ExecutionContext, index: u32) -> bool {
    pointer_of(ctx, Table::LocalVariable, index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Mode;
    use crate::frame::ShadowFrame;

    fn ctx() -> ExecutionContext {
        let mut c = ExecutionContext::new(256, 64, 256, 256, Mode::with(Mode::STACK_OPER_64_BIT));
        c.push_shadow_frame(ShadowFrame {
            xtable_state: 0,
            atp: c.argument_stack.top_offset(),
            lvtp: c.local_variable_stack.top_offset(),
            return_sp: c.stack.top_offset(),
            return_ip: 0,
        })
        .unwrap();
        c
    }

    #[test]
    fn var_then_stvar_then_ldvar_round_trips() {
        let mut c = ctx();
        assert!(var(&mut c, 8));
        c.stack.push_unsigned(0xdead_beefu32).unwrap();
        assert!(stvar(&mut c, 0));
        assert!(ldvar(&mut c, 0));
        assert_eq!(c.stack.pop::<u32>().unwrap(), 0xdead_beef);
    }

    #[test]
    fn ldarg_out_of_range_raises_invalid_instruction() {
        let mut c = ctx();
        assert!(arg(&mut c, 4));
        assert!(!ldarg(&mut c, 1));
        assert_eq!(c.exception_state, ExceptionState::InvalidInstruction);
    }
}
