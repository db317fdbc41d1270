//! The SimpleVM opcode table.
//!
//! The table below is the single source of truth for the opcode set: it
//! drives the `Opcode` enum, its numeric encoding, its mnemonic and its
//! operand width, the same way `inst_table.inc` drives `Opcode::T` and
//! `VMInstruction::InstructionList` in the reference implementation this
//! crate's wire format is compatible with.

/// The width (and signedness, for immediates that matter) of an
/// instruction's single optional immediate operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandWidth {
    /// No immediate; all operands come from the data-area stack.
    None,
    Imm8,
    Imm16,
    Imm32,
    Imm64,
}

impl OperandWidth {
    /// Number of bytes the immediate occupies on the wire, or `0` for `None`.
    pub const fn byte_len(self) -> usize {
        match self {
            OperandWidth::None => 0,
            OperandWidth::Imm8 => 1,
            OperandWidth::Imm16 => 2,
            OperandWidth::Imm32 => 4,
            OperandWidth::Imm64 => 8,
        }
    }
}

macro_rules! opcode_table {
    ($($(#[$meta:meta])* $name:ident = $mnemonic:literal, $operand:expr;)*) => {
        /// Every instruction the interpreter understands, encoded and decoded
        /// per the 1-or-2-byte opcode scheme in [`crate::instruction`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum Opcode {
            $($(#[$meta])* $name,)*
        }

        impl Opcode {
            /// All opcodes, in declaration (and numeric) order.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name,)*];

            /// The stable numeric id used on the wire. This is *not* the
            /// same as the enum's `repr(u16)` discriminant once the table
            /// grows past 0x7FFF worth of renumbering; today the two agree
            /// because declaration order is never rearranged.
            pub const fn id(self) -> u16 {
                self as u16
            }

            /// Looks up an opcode by its wire id, if it names one.
            pub fn from_id(id: u16) -> Option<Opcode> {
                Opcode::ALL.get(id as usize).copied()
            }

            /// Canonical assembly mnemonic, e.g. `"add.i4"`.
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => $mnemonic,)*
                }
            }

            /// Width of the immediate operand this opcode is encoded with.
            pub const fn operand_width(self) -> OperandWidth {
                match self {
                    $(Opcode::$name => $operand,)*
                }
            }
        }
    };
}

use OperandWidth::*;

opcode_table! {
    Nop = "nop", None;
    Bp = "bp", None;

    Inv = "inv", None;

    AddI4 = "add.i4", None;
    AddI8 = "add.i8", None;
    AddU4 = "add.u4", None;
    AddU8 = "add.u8", None;
    AddF4 = "add.f4", None;
    AddF8 = "add.f8", None;

    SubI4 = "sub.i4", None;
    SubI8 = "sub.i8", None;
    SubU4 = "sub.u4", None;
    SubU8 = "sub.u8", None;
    SubF4 = "sub.f4", None;
    SubF8 = "sub.f8", None;

    MulI4 = "mul.i4", None;
    MulI8 = "mul.i8", None;
    MulU4 = "mul.u4", None;
    MulU8 = "mul.u8", None;
    MulF4 = "mul.f4", None;
    MulF8 = "mul.f8", None;

    MulhI4 = "mulh.i4", None;
    MulhI8 = "mulh.i8", None;
    MulhU4 = "mulh.u4", None;
    MulhU8 = "mulh.u8", None;

    DivI4 = "div.i4", None;
    DivI8 = "div.i8", None;
    DivU4 = "div.u4", None;
    DivU8 = "div.u8", None;
    DivF4 = "div.f4", None;
    DivF8 = "div.f8", None;
    ModI4 = "mod.i4", None;
    ModI8 = "mod.i8", None;
    ModU4 = "mod.u4", None;
    ModU8 = "mod.u8", None;
    ModF4 = "mod.f4", None;
    ModF8 = "mod.f8", None;

    ShlI4 = "shl.i4", None;
    ShlI8 = "shl.i8", None;
    ShlU4 = "shl.u4", None;
    ShlU8 = "shl.u8", None;
    ShrI4 = "shr.i4", None;
    ShrI8 = "shr.i8", None;
    ShrU4 = "shr.u4", None;
    ShrU8 = "shr.u8", None;

    AndX4 = "and.x4", None;
    AndX8 = "and.x8", None;
    OrX4 = "or.x4", None;
    OrX8 = "or.x8", None;
    XorX4 = "xor.x4", None;
    XorX8 = "xor.x8", None;
    NotX4 = "not.x4", None;
    NotX8 = "not.x8", None;
    NegI4 = "neg.i4", None;
    NegI8 = "neg.i8", None;
    NegF4 = "neg.f4", None;
    NegF8 = "neg.f8", None;
    AbsI4 = "abs.i4", None;
    AbsI8 = "abs.i8", None;
    AbsF4 = "abs.f4", None;
    AbsF8 = "abs.f8", None;

    Cvt2iF4I4 = "cvt2i.f4_i4", None;
    Cvt2iF4I8 = "cvt2i.f4_i8", None;
    Cvt2iF8I4 = "cvt2i.f8_i4", None;
    Cvt2iF8I8 = "cvt2i.f8_i8", None;
    Cvt2fI4F4 = "cvt2f.i4_f4", None;
    Cvt2fI4F8 = "cvt2f.i4_f8", None;
    Cvt2fI8F4 = "cvt2f.i8_f4", None;
    Cvt2fI8F8 = "cvt2f.i8_f8", None;
    CvtffF4F8 = "cvtff.f4_f8", None;
    CvtffF8F4 = "cvtff.f8_f4", None;

    CvtI1I4 = "cvt.i1_i4", None;
    CvtI2I4 = "cvt.i2_i4", None;
    CvtI4I1 = "cvt.i4_i1", None;
    CvtI4I2 = "cvt.i4_i2", None;
    CvtI4I8 = "cvt.i4_i8", None;
    CvtI8I4 = "cvt.i8_i4", None;

    CvtU1U4 = "cvt.u1_u4", None;
    CvtU2U4 = "cvt.u2_u4", None;
    CvtU4U1 = "cvt.u4_u1", None;
    CvtU4U2 = "cvt.u4_u2", None;
    CvtU4U8 = "cvt.u4_u8", None;
    CvtU8U4 = "cvt.u8_u4", None;

    CvtI1U1 = "cvt.i1_u1", None;
    CvtI2U2 = "cvt.i2_u2", None;
    CvtI4U4 = "cvt.i4_u4", None;
    CvtI8U8 = "cvt.i8_u8", None;

    CvtU1I1 = "cvt.u1_i1", None;
    CvtU2I2 = "cvt.u2_i2", None;
    CvtU4I4 = "cvt.u4_i4", None;
    CvtU8I8 = "cvt.u8_i8", None;

    LdimmI1 = "ldimm.i1", Imm8;
    LdimmI2 = "ldimm.i2", Imm16;
    LdimmI4 = "ldimm.i4", Imm32;
    LdimmI8 = "ldimm.i8", Imm64;

    Ldarg = "ldarg", Imm8;
    Ldvar = "ldvar", Imm8;
    Starg = "starg", Imm8;
    Stvar = "stvar", Imm8;

    Dup = "dup", None;
    Dup2 = "dup2", None;
    Xch = "xch", None;

    Ldvarp = "ldvarp", Imm8;
    Ldargp = "ldargp", Imm8;
    LdpvX1 = "ldpv.x1", None;
    LdpvX2 = "ldpv.x2", None;
    LdpvX4 = "ldpv.x4", None;
    LdpvX8 = "ldpv.x8", None;
    StpvX1 = "stpv.x1", None;
    StpvX2 = "stpv.x2", None;
    StpvX4 = "stpv.x4", None;
    StpvX8 = "stpv.x8", None;
    Ppcpy = "ppcpy", None;
    PvfilX1 = "pvfil.x1", None;
    PvfilX2 = "pvfil.x2", None;
    PvfilX4 = "pvfil.x4", None;
    PvfilX8 = "pvfil.x8", None;

    Initarg = "initarg", None;
    Arg = "arg", Imm32;
    Var = "var", Imm32;

    Dcv = "dcv", None;
    Dcvn = "dcvn", None;

    TestEI4 = "test.e.i4", None;
    TestEI8 = "test.e.i8", None;
    TestEF4 = "test.e.f4", None;
    TestEF8 = "test.e.f8", None;
    TestNeI4 = "test.ne.i4", None;
    TestNeI8 = "test.ne.i8", None;
    TestNeF4 = "test.ne.f4", None;
    TestNeF8 = "test.ne.f8", None;
    TestLeI4 = "test.le.i4", None;
    TestLeI8 = "test.le.i8", None;
    TestLeU4 = "test.le.u4", None;
    TestLeU8 = "test.le.u8", None;
    TestLeF4 = "test.le.f4", None;
    TestLeF8 = "test.le.f8", None;
    TestGeI4 = "test.ge.i4", None;
    TestGeI8 = "test.ge.i8", None;
    TestGeU4 = "test.ge.u4", None;
    TestGeU8 = "test.ge.u8", None;
    TestGeF4 = "test.ge.f4", None;
    TestGeF8 = "test.ge.f8", None;
    TestLI4 = "test.l.i4", None;
    TestLI8 = "test.l.i8", None;
    TestLU4 = "test.l.u4", None;
    TestLU8 = "test.l.u8", None;
    TestLF4 = "test.l.f4", None;
    TestLF8 = "test.l.f8", None;
    TestGI4 = "test.g.i4", None;
    TestGI8 = "test.g.i8", None;
    TestGU4 = "test.g.u4", None;
    TestGU8 = "test.g.u8", None;
    TestGF4 = "test.g.f4", None;
    TestGF8 = "test.g.f8", None;

    BrI1 = "br.i1", Imm8;
    BrI2 = "br.i2", Imm16;
    BrI4 = "br.i4", Imm32;
    BrZI1 = "br_z.i1", Imm8;
    BrZI2 = "br_z.i2", Imm16;
    BrZI4 = "br_z.i4", Imm32;
    BrNzI1 = "br_nz.i1", Imm8;
    BrNzI2 = "br_nz.i2", Imm16;
    BrNzI4 = "br_nz.i4", Imm32;

    CallI1 = "call.i1", Imm8;
    CallI2 = "call.i2", Imm16;
    CallI4 = "call.i4", Imm32;
    Ret = "ret", None;

    Ldvmsr = "ldvmsr", Imm8;
    Stvmsr = "stvmsr", Imm8;
    Vmcall = "vmcall", None;
    Vmxthrow = "vmxthrow", None;
}

static_assertions::const_assert_eq!(Opcode::ALL.len(), 171);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_dense_and_round_trip() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(op.id(), i as u16);
            assert_eq!(Opcode::from_id(i as u16), Some(*op));
        }
        assert_eq!(Opcode::from_id(Opcode::ALL.len() as u16), Option::None);
    }

    #[test]
    fn mnemonics_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for op in Opcode::ALL {
            assert!(seen.insert(op.mnemonic()), "duplicate mnemonic {}", op.mnemonic());
        }
    }

    #[test]
    fn immediate_opcodes_have_nonzero_width() {
        assert_eq!(Opcode::LdimmI8.operand_width().byte_len(), 8);
        assert_eq!(Opcode::Nop.operand_width().byte_len(), 0);
        assert_eq!(Opcode::Ldarg.operand_width().byte_len(), 1);
        assert_eq!(Opcode::Arg.operand_width().byte_len(), 4);
    }
}
