//! A small builder for assembling bytecode from a sequence of instructions.
//!
//! Mirrors `VMBytecodeEmitter`: instructions accumulate in order, then
//! [`Emitter::encoded_len`] reports the exact buffer size a caller needs
//! before [`Emitter::write_into`] commits them, or [`Emitter::finish`] can
//! be used directly when the caller doesn't need to pre-size a buffer.

use crate::instruction::Instruction;
use crate::opcode::Opcode;

/// Accumulates instructions and lowers them to bytecode.
#[derive(Debug, Default, Clone)]
pub struct Emitter {
    instructions: Vec<Instruction>,
}

impl Emitter {
    pub fn new() -> Self {
        Emitter { instructions: Vec::new() }
    }

    /// Appends an instruction with no immediate.
    pub fn emit(&mut self, opcode: Opcode) -> &mut Self {
        self.instructions.push(Instruction::new(opcode));
        self
    }

    /// Appends an instruction carrying an immediate operand.
    pub fn emit_with_immediate(&mut self, opcode: Opcode, immediate: u64) -> &mut Self {
        self.instructions.push(Instruction::with_immediate(opcode, immediate));
        self
    }

    /// Discards everything emitted so far.
    pub fn reset(&mut self) -> &mut Self {
        self.instructions.clear();
        self
    }

    /// Total bytes the buffered instructions will occupy once written.
    pub fn encoded_len(&self) -> usize {
        self.instructions.iter().map(Instruction::encoded_len).sum()
    }

    /// Writes the buffered instructions into `buf`, returning the number of
    /// bytes written, or `None` if `buf` is shorter than
    /// [`Emitter::encoded_len`] (in which case nothing is written).
    pub fn write_into(&self, buf: &mut [u8]) -> Option<usize> {
        let needed = self.encoded_len();
        if buf.len() < needed {
            return None;
        }

        let mut offset = 0;
        for inst in &self.instructions {
            offset += inst.encode(&mut buf[offset..]);
        }
        Some(offset)
    }

    /// Lowers the buffered instructions to a freshly allocated byte vector.
    pub fn finish(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        self.write_into(&mut buf).expect("buffer sized to encoded_len");
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_mixed_instructions_in_order() {
        let mut emitter = Emitter::new();
        emitter
            .emit_with_immediate(Opcode::LdimmI4, 7)
            .emit_with_immediate(Opcode::LdimmI4, 35)
            .emit(Opcode::AddI4)
            .emit(Opcode::Ret);

        let bytes = emitter.finish();
        let mut offset = 0;
        let mut decoded = Vec::new();
        while offset < bytes.len() {
            let (inst, len) = Instruction::decode(&bytes[offset..]).unwrap();
            decoded.push(inst.opcode());
            offset += len;
        }

        assert_eq!(
            decoded,
            vec![Opcode::LdimmI4, Opcode::LdimmI4, Opcode::AddI4, Opcode::Ret]
        );
    }

    #[test]
    fn write_into_rejects_undersized_buffer() {
        let mut emitter = Emitter::new();
        emitter.emit(Opcode::Nop);
        let mut buf = [0u8; 0];
        assert_eq!(emitter.write_into(&mut buf), None);
    }

    #[test]
    fn reset_clears_buffered_instructions() {
        let mut emitter = Emitter::new();
        emitter.emit(Opcode::Nop);
        emitter.reset();
        assert_eq!(emitter.encoded_len(), 0);
    }
}
