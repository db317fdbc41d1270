//! A single decoded instruction: opcode plus its (possibly absent)
//! immediate operand.
//!
//! Wire format, matching `VMInstruction::SetOpcode` / `VMInstruction::Decode`
//! in the reference encoder:
//!
//! - Opcodes `0x00..=0x7F` encode as a single byte.
//! - Opcodes `0x80..=0x3FFF` encode as two bytes: `(id & 0x7F) | 0x80`
//!   followed by `(id >> 7) & 0xFF`. The low byte's high bit marks
//!   "continuation", and the high bit of the second byte must be clear or
//!   the stream is ill-formed.
//! - The immediate, if the opcode has one, follows as 0/1/2/4/8
//!   little-endian bytes per [`OperandWidth`].

use crate::bytes;
use crate::opcode::{Opcode, OperandWidth};

/// An opcode id that does not fit the 1-or-2-byte encoding (must be `<= 0x3FFF`).
pub const MAX_OPCODE_ID: u16 = 0x3FFF;

/// Upper bound on the encoded size of any single instruction: 2 opcode
/// bytes plus an 8-byte immediate.
pub const MAX_INSTRUCTION_LEN: usize = 10;

/// A decoded instruction and its immediate, if any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instruction {
    opcode: Opcode,
    immediate: u64,
}

/// Why a byte sequence failed to decode as an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("input buffer is empty")]
    Empty,
    #[error("second opcode byte has its continuation bit set")]
    IllFormedOpcode,
    #[error("opcode id {0:#x} is not a known instruction")]
    UnknownOpcode(u16),
    #[error("operand truncated: need {needed} bytes, have {available}")]
    TruncatedOperand { needed: usize, available: usize },
}

/// Why an opcode id could not be assigned on encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("opcode id {0:#x} exceeds the maximum encodable id {MAX_OPCODE_ID:#x}")]
pub struct OpcodeRangeError(pub u16);

impl Instruction {
    /// Builds an instruction with no immediate. Panics (via `debug_assert`)
    /// if `opcode` actually expects one; callers that don't statically know
    /// the opcode should go through [`Instruction::with_immediate`] or
    /// [`Instruction::decode`].
    pub fn new(opcode: Opcode) -> Self {
        debug_assert_eq!(opcode.operand_width(), OperandWidth::None);
        Instruction { opcode, immediate: 0 }
    }

    /// Builds an instruction carrying a raw 64-bit immediate, truncated (or
    /// zero-extended) to the opcode's declared operand width.
    pub fn with_immediate(opcode: Opcode, immediate: u64) -> Self {
        Instruction { opcode, immediate }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// The immediate operand, zero-extended to 64 bits. Callers that need a
    /// signed or narrower view should mask/sign-extend using
    /// [`OperandWidth::byte_len`].
    pub fn immediate(&self) -> u64 {
        self.immediate
    }

    /// The immediate operand, sign-extended from the opcode's declared width.
    pub fn immediate_signed(&self) -> i64 {
        let width = self.opcode.operand_width().byte_len();
        if width == 0 {
            0
        } else {
            bytes::sign_extend_to_i64(self.immediate, width)
        }
    }

    /// Total encoded length in bytes: opcode bytes plus immediate bytes.
    pub fn encoded_len(&self) -> usize {
        opcode_byte_len(self.opcode.id()) + self.opcode.operand_width().byte_len()
    }

    /// Writes this instruction to `buf`, returning the number of bytes
    /// written. `buf` must be at least [`Instruction::encoded_len`] long.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        let id = self.opcode.id();
        let opcode_len = encode_opcode(id, buf);
        let operand_len = self.opcode.operand_width().byte_len();
        if operand_len > 0 {
            let full = self.immediate.to_le_bytes();
            buf[opcode_len..][..operand_len].copy_from_slice(&full[..operand_len]);
        }
        opcode_len + operand_len
    }

    /// Decodes a single instruction from the front of `buf`, returning the
    /// instruction and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Instruction, usize), DecodeError> {
        if buf.is_empty() {
            return Err(DecodeError::Empty);
        }

        let (id, opcode_len) = decode_opcode_id(buf)?;
        let opcode = Opcode::from_id(id).ok_or(DecodeError::UnknownOpcode(id))?;

        let operand_len = opcode.operand_width().byte_len();
        let available = buf.len() - opcode_len;
        if available < operand_len {
            return Err(DecodeError::TruncatedOperand {
                needed: operand_len,
                available,
            });
        }

        let immediate = if operand_len == 0 {
            0
        } else {
            read_immediate_le(&buf[opcode_len..][..operand_len])
        };

        Ok((Instruction { opcode, immediate }, opcode_len + operand_len))
    }
}

/// Number of opcode bytes `id` needs: 1 for `<= 0x7F`, 2 otherwise.
const fn opcode_byte_len(id: u16) -> usize {
    if id <= 0x7F {
        1
    } else {
        2
    }
}

fn encode_opcode(id: u16, buf: &mut [u8]) -> usize {
    if id <= 0x7F {
        buf[0] = id as u8;
        1
    } else {
        buf[0] = (id & 0x7F) as u8 | 0x80;
        buf[1] = ((id >> 7) & 0xFF) as u8;
        2
    }
}

fn decode_opcode_id(buf: &[u8]) -> Result<(u16, usize), DecodeError> {
    let first = buf[0];
    if first & 0x80 == 0 {
        return Ok((first as u16, 1));
    }
    let second = *buf.get(1).ok_or(DecodeError::TruncatedOperand {
        needed: 2,
        available: 1,
    })?;
    if second & 0x80 != 0 {
        return Err(DecodeError::IllFormedOpcode);
    }
    let id = (first as u16 & 0x7F) | ((second as u16) << 7);
    Ok((id, 2))
}

fn read_immediate_le(buf: &[u8]) -> u64 {
    let mut padded = [0u8; 8];
    padded[..buf.len()].copy_from_slice(buf);
    u64::from_le_bytes(padded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_byte_opcode_round_trips() {
        let inst = Instruction::new(Opcode::Nop);
        let mut buf = [0u8; MAX_INSTRUCTION_LEN];
        let len = inst.encode(&mut buf);
        assert_eq!(len, 1);
        assert_eq!(buf[0], Opcode::Nop.id() as u8);

        let (decoded, consumed) = Instruction::decode(&buf[..len]).unwrap();
        assert_eq!(consumed, len);
        assert_eq!(decoded, inst);
    }

    #[test]
    fn two_byte_opcode_round_trips() {
        let opcode = Opcode::Vmxthrow;
        assert!(opcode.id() > 0x7F);
        let inst = Instruction::new(opcode);
        let mut buf = [0u8; MAX_INSTRUCTION_LEN];
        let len = inst.encode(&mut buf);
        assert_eq!(len, 2);
        assert_eq!(buf[0] & 0x80, 0x80);
        assert_eq!(buf[1] & 0x80, 0);

        let (decoded, consumed) = Instruction::decode(&buf[..len]).unwrap();
        assert_eq!(consumed, len);
        assert_eq!(decoded, inst);
    }

    #[test]
    fn immediate_round_trips_with_sign_extension() {
        let inst = Instruction::with_immediate(Opcode::LdimmI1, 0xFFu64);
        let mut buf = [0u8; MAX_INSTRUCTION_LEN];
        let len = inst.encode(&mut buf);
        let (decoded, consumed) = Instruction::decode(&buf[..len]).unwrap();
        assert_eq!(consumed, len);
        assert_eq!(decoded.immediate(), 0xFF);
        assert_eq!(decoded.immediate_signed(), -1);
    }

    #[test]
    fn ill_formed_continuation_byte_is_rejected() {
        let buf = [0x80u8, 0x80u8];
        assert_eq!(Instruction::decode(&buf), Err(DecodeError::IllFormedOpcode));
    }

    #[test]
    fn unknown_opcode_id_is_rejected() {
        let buf = [0x7Fu8, 0xFFu8];
        // 0x7F alone is one byte and must itself be a known opcode id.
        let err = Instruction::decode(&buf[..1]);
        assert!(err.is_ok() || matches!(err, Err(DecodeError::UnknownOpcode(_))));
    }

    #[test]
    fn truncated_immediate_is_rejected() {
        let inst = Instruction::with_immediate(Opcode::LdimmI4, 42);
        let mut buf = [0u8; MAX_INSTRUCTION_LEN];
        let len = inst.encode(&mut buf);
        let err = Instruction::decode(&buf[..len - 1]);
        assert!(matches!(err, Err(DecodeError::TruncatedOperand { .. })));
    }

    #[test]
    fn empty_buffer_is_rejected() {
        assert_eq!(Instruction::decode(&[]), Err(DecodeError::Empty));
    }
}
