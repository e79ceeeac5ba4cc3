// Opcode table for the AArch64-like target.
//
// An `Opcode` is a plain integer index into a static descriptor table, the
// same shape the host rewriter exposes: every opcode carries a mnemonic, the
// number of leading definition operands, may-load/may-store bits and a
// structural kind. Predicates that the architecture derives from mnemonic
// spelling (memory scale, PC-relative materialization, shift family) live in
// `outline::predicates` and match on the mnemonics below.

/// Structural classification of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeKind {
    Normal,
    Branch { conditional: bool },
    Call { indirect: bool },
    Return,
    Pseudo,
    Cfi,
}

/// Static descriptor for one opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeInfo {
    pub mnemonic: &'static str,
    /// Number of leading operands that are definitions.
    pub num_defs: usize,
    pub may_load: bool,
    pub may_store: bool,
    pub kind: OpcodeKind,
}

/// Opcode of one machine instruction.
///
/// Operand layouts (definitions first, per `num_defs`):
/// - register ALU (`ADDXrr`, …): `[dst, src1, src2]`
/// - immediate ALU and shifts (`ADDXri`, `LSLXri`, …): `[dst, src, imm]`
/// - single load/store (`LDRXui`, `STRXui`, …): `[reg, base, imm]`
/// - pair load/store (`LDPXi`, `STPXi`): `[reg1, reg2, base, imm]`
/// - writeback pairs (`STPXpre`, `LDPXpost`): `[writeback, reg1, reg2, base, imm]`
/// - PC-relative (`ADR`, `ADRP`, `LDRXlit`): `[dst, sym]`
/// - branches/calls: `B [sym]`, `Bcc [cond, sym]`, `CBZX`/`CBNZX [reg, sym]`,
///   `BL [sym]`, `BLR [reg]`, `RET []`
///
/// Displacement immediates of load/store opcodes are stored in scaled
/// immediate-field units, exactly as encoded (a byte offset of 16 on an
/// 8-byte-scaled opcode is stored as 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    Invalid = 0,
    Cfi = 1,
    Nop = 2,

    // Moves and ALU
    MovZXi = 10,
    AddXrr = 11,
    SubXrr = 12,
    AndXrr = 13,
    OrrXrr = 14,
    EorXrr = 15,
    MulXrr = 16,
    AddXri = 17,
    SubXri = 18,

    // Shifts (immediate forms)
    LslXri = 20,
    LsrXri = 21,
    AsrXri = 22,
    RorXri = 23,

    // Single-register loads (scaled unsigned offset)
    LdrXui = 30,
    LdrWui = 31,
    LdrHui = 32,
    LdrBui = 33,
    LdrQui = 34,
    // Unscaled
    LdurXi = 35,

    // Single-register stores
    StrXui = 40,
    StrWui = 41,
    StrHui = 42,
    StrBui = 43,
    StrQui = 44,
    SturXi = 45,

    // Pair loads/stores
    LdpXi = 50,
    LdpWi = 51,
    LdpQi = 52,
    StpXi = 53,
    StpWi = 54,
    StpQi = 55,
    // Writeback forms used by prologues/epilogues
    StpXpre = 56,
    LdpXpost = 57,

    // PC-relative materialization
    Adr = 60,
    Adrp = 61,
    LdrXlit = 62,

    // Control flow
    B = 70,
    BCond = 71,
    Cbzx = 72,
    Cbnzx = 73,
    Bl = 74,
    Blr = 75,
    Ret = 76,
}

impl Opcode {
    /// Look up this opcode's static descriptor.
    #[must_use]
    pub const fn info(self) -> OpcodeInfo {
        const fn entry(
            mnemonic: &'static str,
            num_defs: usize,
            may_load: bool,
            may_store: bool,
            kind: OpcodeKind,
        ) -> OpcodeInfo {
            OpcodeInfo { mnemonic, num_defs, may_load, may_store, kind }
        }

        use OpcodeKind::{Branch, Call, Cfi, Normal, Pseudo, Return};
        match self {
            Self::Invalid => entry("INVALID", 0, false, false, Pseudo),
            Self::Cfi => entry("CFI", 0, false, false, Cfi),
            Self::Nop => entry("NOP", 0, false, false, Normal),

            Self::MovZXi => entry("MOVZXi", 1, false, false, Normal),
            Self::AddXrr => entry("ADDXrr", 1, false, false, Normal),
            Self::SubXrr => entry("SUBXrr", 1, false, false, Normal),
            Self::AndXrr => entry("ANDXrr", 1, false, false, Normal),
            Self::OrrXrr => entry("ORRXrr", 1, false, false, Normal),
            Self::EorXrr => entry("EORXrr", 1, false, false, Normal),
            Self::MulXrr => entry("MULXrr", 1, false, false, Normal),
            Self::AddXri => entry("ADDXri", 1, false, false, Normal),
            Self::SubXri => entry("SUBXri", 1, false, false, Normal),

            Self::LslXri => entry("LSLXri", 1, false, false, Normal),
            Self::LsrXri => entry("LSRXri", 1, false, false, Normal),
            Self::AsrXri => entry("ASRXri", 1, false, false, Normal),
            Self::RorXri => entry("RORXri", 1, false, false, Normal),

            Self::LdrXui => entry("LDRXui", 1, true, false, Normal),
            Self::LdrWui => entry("LDRWui", 1, true, false, Normal),
            Self::LdrHui => entry("LDRHui", 1, true, false, Normal),
            Self::LdrBui => entry("LDRBui", 1, true, false, Normal),
            Self::LdrQui => entry("LDRQui", 1, true, false, Normal),
            Self::LdurXi => entry("LDURXi", 1, true, false, Normal),

            Self::StrXui => entry("STRXui", 0, false, true, Normal),
            Self::StrWui => entry("STRWui", 0, false, true, Normal),
            Self::StrHui => entry("STRHui", 0, false, true, Normal),
            Self::StrBui => entry("STRBui", 0, false, true, Normal),
            Self::StrQui => entry("STRQui", 0, false, true, Normal),
            Self::SturXi => entry("STURXi", 0, false, true, Normal),

            Self::LdpXi => entry("LDPXi", 2, true, false, Normal),
            Self::LdpWi => entry("LDPWi", 2, true, false, Normal),
            Self::LdpQi => entry("LDPQi", 2, true, false, Normal),
            Self::StpXi => entry("STPXi", 0, false, true, Normal),
            Self::StpWi => entry("STPWi", 0, false, true, Normal),
            Self::StpQi => entry("STPQi", 0, false, true, Normal),
            Self::StpXpre => entry("STPXpre", 1, false, true, Normal),
            Self::LdpXpost => entry("LDPXpost", 3, true, false, Normal),

            Self::Adr => entry("ADR", 1, false, false, Normal),
            Self::Adrp => entry("ADRP", 1, false, false, Normal),
            Self::LdrXlit => entry("LDRXlit", 1, true, false, Normal),

            Self::B => entry("B", 0, false, false, Branch { conditional: false }),
            Self::BCond => entry("Bcc", 0, false, false, Branch { conditional: true }),
            Self::Cbzx => entry("CBZX", 0, false, false, Branch { conditional: true }),
            Self::Cbnzx => entry("CBNZX", 0, false, false, Branch { conditional: true }),
            Self::Bl => entry("BL", 0, false, false, Call { indirect: false }),
            Self::Blr => entry("BLR", 0, false, false, Call { indirect: true }),
            Self::Ret => entry("RET", 0, false, false, Return),
        }
    }

    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    #[must_use]
    pub const fn num_defs(self) -> usize {
        self.info().num_defs
    }

    #[must_use]
    pub const fn may_load(self) -> bool {
        self.info().may_load
    }

    #[must_use]
    pub const fn may_store(self) -> bool {
        self.info().may_store
    }

    #[must_use]
    pub const fn is_branch(self) -> bool {
        matches!(self.info().kind, OpcodeKind::Branch { .. })
    }

    #[must_use]
    pub const fn is_unconditional_branch(self) -> bool {
        matches!(self.info().kind, OpcodeKind::Branch { conditional: false })
    }

    #[must_use]
    pub const fn is_conditional_branch(self) -> bool {
        matches!(self.info().kind, OpcodeKind::Branch { conditional: true })
    }

    #[must_use]
    pub const fn is_call(self) -> bool {
        matches!(self.info().kind, OpcodeKind::Call { .. })
    }

    #[must_use]
    pub const fn is_indirect_call(self) -> bool {
        matches!(self.info().kind, OpcodeKind::Call { indirect: true })
    }

    #[must_use]
    pub const fn is_return(self) -> bool {
        matches!(self.info().kind, OpcodeKind::Return)
    }

    #[must_use]
    pub const fn is_pseudo(self) -> bool {
        matches!(self.info().kind, OpcodeKind::Pseudo)
    }

    #[must_use]
    pub const fn is_cfi(self) -> bool {
        matches!(self.info().kind, OpcodeKind::Cfi)
    }

    /// True for instructions that end a basic block.
    #[must_use]
    pub const fn is_terminator(self) -> bool {
        self.is_branch() || self.is_return()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_def_counts() {
        assert_eq!(Opcode::MovZXi.num_defs(), 1);
        assert_eq!(Opcode::StrXui.num_defs(), 0);
        assert_eq!(Opcode::LdpXi.num_defs(), 2);
        // Writeback forms define the base register as well.
        assert_eq!(Opcode::StpXpre.num_defs(), 1);
        assert_eq!(Opcode::LdpXpost.num_defs(), 3);
    }

    #[test]
    fn structural_kinds() {
        assert!(Opcode::B.is_unconditional_branch());
        assert!(Opcode::BCond.is_conditional_branch());
        assert!(Opcode::Cbzx.is_conditional_branch());
        assert!(Opcode::Bl.is_call());
        assert!(!Opcode::Bl.is_indirect_call());
        assert!(Opcode::Blr.is_indirect_call());
        assert!(Opcode::Ret.is_return());
        assert!(Opcode::Ret.is_terminator());
        assert!(!Opcode::Bl.is_terminator());
        assert!(Opcode::Cfi.is_cfi());
        assert!(Opcode::Invalid.is_pseudo());
    }

    #[test]
    fn load_store_bits() {
        assert!(Opcode::LdrXui.may_load());
        assert!(!Opcode::LdrXui.may_store());
        assert!(Opcode::StpXpre.may_store());
        assert!(Opcode::LdpXpost.may_load());
        assert!(!Opcode::AddXrr.may_load());
    }
}
