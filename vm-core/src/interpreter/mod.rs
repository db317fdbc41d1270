//! The fetch-decode-execute interpreter — `§4.H`.
//!
//! Submodules group handlers by the part of `§4.H` they implement; none of
//! them are public, since the only supported entry point is [`Interpreter`]
//! (or [`dispatch::step`] directly, for embedders that want to drive the
//! loop themselves — e.g. to single-step under a debugger).

mod arithmetic;
mod comparisons;
mod control;
mod conversions;
pub mod dispatch;
mod frames;
mod pointer;
mod shuffle;
mod vmsr;

use tracing::{debug, instrument};

use crate::context::{ExecutionContext, Mode};
use crate::error::ExceptionState;
use crate::memory::{AllocateOptions, AlwaysCommit, GuestMemory, MemoryType, PageFaultHook};

/// Why [`Interpreter::run`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The guest raised an exception (including a deliberate `Bp`).
    Exception(ExceptionState),
    /// The instruction budget passed to [`Interpreter::run`] ran out while
    /// the guest was still running; it can be resumed with another call.
    BudgetExhausted,
}

/// The persisted state needed to execute a bytecode image: an
/// [`ExecutionContext`] for the stacks/registers and a [`GuestMemory`] that
/// holds the image itself (as a [`MemoryType::Bytecode`] region, which is
/// what [`dispatch::step`] fetches instructions from) alongside whatever
/// `Ldpv`/`Stpv`/`Ppcpy`/`Pvfil` address.
pub struct Interpreter<H: PageFaultHook = AlwaysCommit> {
    pub ctx: ExecutionContext,
    pub memory: GuestMemory<H>,
}

impl Interpreter<AlwaysCommit> {
    pub fn new(image: Vec<u8>, memory_size: u64, mode: Mode, stack_sizes: StackSizes) -> Self {
        Interpreter::with_hook(image, memory_size, mode, stack_sizes, AlwaysCommit)
    }
}

/// Sizes (in bytes) of the four data-area stacks an [`ExecutionContext`]
/// owns; broken out of [`ExecutionContext::new`]'s argument list so callers
/// that just want "a VM" don't have to repeat it.
#[derive(Debug, Clone, Copy)]
pub struct StackSizes {
    pub value_stack: u32,
    pub shadow_stack: u32,
    pub argument_table: u32,
    pub local_variable_table: u32,
}

impl Default for StackSizes {
    fn default() -> Self {
        StackSizes { value_stack: 0x1_0000, shadow_stack: 0x1000, argument_table: 0x1000, local_variable_table: 0x1000 }
    }
}

impl<H: PageFaultHook> Interpreter<H> {
    pub fn with_hook(image: Vec<u8>, memory_size: u64, mode: Mode, stack_sizes: StackSizes, hook: H) -> Self {
        let mut memory = GuestMemory::with_hook(memory_size, hook);
        if !image.is_empty() {
            let base = memory
                .allocate(0, image.len() as u64, MemoryType::Bytecode, 0, AllocateOptions {
                    use_preferred_address: true,
                    use_preferred_memory_type: true,
                })
                .expect("bytecode image must fit inside the configured memory size");
            memory.write(base, &image).expect("a freshly allocated region accepts the write");
        }

        let ctx = ExecutionContext::new(
            stack_sizes.value_stack,
            stack_sizes.shadow_stack,
            stack_sizes.argument_table,
            stack_sizes.local_variable_table,
            mode,
        );
        Interpreter { ctx, memory }
    }

    /// Runs until an exception is raised or `max_steps` instructions have
    /// executed, whichever comes first.
    #[instrument(level = "debug", skip(self))]
    pub fn run(&mut self, max_steps: u64) -> StopReason {
        for _ in 0..max_steps {
            if !dispatch::step(&mut self.ctx, &mut self.memory) {
                debug!(exception = ?self.ctx.exception_state, ip = self.ctx.ip, "stopped");
                return StopReason::Exception(self.ctx.exception_state);
            }
        }
        StopReason::BudgetExhausted
    }

    /// Executes exactly one instruction, for embedders driving a debugger.
    pub fn step(&mut self) -> bool {
        dispatch::step(&mut self.ctx, &mut self.memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vm_asm::emitter::Emitter;
    use vm_asm::opcode::Opcode;

    #[test]
    fn run_stops_at_a_breakpoint_with_the_result_on_the_stack() {
        let mut emitter = Emitter::new();
        emitter
            .emit_with_immediate(Opcode::LdimmI4, 7u64)
            .emit_with_immediate(Opcode::LdimmI4, 35u64)
            .emit(Opcode::AddI4)
            .emit(Opcode::Bp);

        let mut interp = Interpreter::new(
            emitter.finish(),
            0x1000,
            Mode::with(Mode::STACK_OPER_64_BIT),
            StackSizes::default(),
        );
        assert_eq!(interp.run(100), StopReason::Exception(ExceptionState::Breakpoint));
        assert_eq!(interp.ctx.stack.pop::<i32>().unwrap(), 42);
    }

    #[test]
    fn run_reports_budget_exhaustion_on_an_infinite_loop() {
        let mut emitter = Emitter::new();
        emitter.emit_with_immediate(Opcode::BrI1, (-1i64) as u64);

        let mut interp = Interpreter::new(
            emitter.finish(),
            0x1000,
            Mode::with(Mode::STACK_OPER_64_BIT),
            StackSizes::default(),
        );
        assert_eq!(interp.run(50), StopReason::BudgetExhausted);
    }
}
