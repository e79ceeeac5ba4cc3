// Instruction predicate library: per-instruction classification and the
// reject vector that keeps a window call-safe once outlined.
//
// Several predicates (memory scale, PC-relative materialization, shift
// family, push/pop) are derived from mnemonic spelling, matching how the
// host names its opcodes.

use crate::program::{BasicBlock, Instruction, Opcode, Reg};

/// Why an instruction disqualifies its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// Pseudo, CFI or opcode-zero: nothing to encode.
    PseudoOrCfi,
    Return,
    /// Call anywhere but the final position, or with SP-relative argument
    /// stores before it.
    MidWindowCall,
    /// Unconditional branch anywhere; conditional branch anywhere but an
    /// allowed final position.
    MidWindowBranch,
    /// ADR-family or literal-pool load.
    PcRelative,
    /// Any read or write of FP or LR.
    FpLrUse,
    SpDefinition,
    /// Store using SP as a base.
    SpStore,
    /// In short windows, an SP use that is not a load with an immediate
    /// displacement.
    ComplexSpUse,
}

impl RejectReason {
    pub const ALL: [Self; 9] = [
        Self::PseudoOrCfi,
        Self::Return,
        Self::MidWindowCall,
        Self::MidWindowBranch,
        Self::PcRelative,
        Self::FpLrUse,
        Self::SpDefinition,
        Self::SpStore,
        Self::ComplexSpUse,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::PseudoOrCfi => "pseudo/CFI",
            Self::Return => "return",
            Self::MidWindowCall => "mid-window call",
            Self::MidWindowBranch => "branch",
            Self::PcRelative => "PC-relative",
            Self::FpLrUse => "FP/LR use",
            Self::SpDefinition => "SP definition",
            Self::SpStore => "SP store",
            Self::ComplexSpUse => "complex SP use",
        }
    }
}

/// Position of one instruction inside a candidate window.
#[derive(Debug, Clone, Copy)]
pub struct WindowContext<'a> {
    pub window_len: usize,
    /// True when the instruction sits at the final window position.
    pub is_last: bool,
    /// True when a trailing conditional branch is acceptable (cross-block
    /// extension permitted).
    pub allow_branch: bool,
    /// Enclosing block of the window start, for call-argument scanning.
    pub block: Option<&'a BasicBlock>,
    pub window_start: usize,
    pub instr_idx: usize,
}

/// Apply the full reject vector to one instruction of a window.
#[must_use]
pub fn should_reject(inst: &Instruction, ctx: &WindowContext<'_>) -> Option<RejectReason> {
    let opcode = inst.opcode;

    if opcode == Opcode::Invalid || opcode.is_pseudo() || opcode.is_cfi() {
        return Some(RejectReason::PseudoOrCfi);
    }

    if opcode.is_return() {
        return Some(RejectReason::Return);
    }

    if opcode.is_call() {
        if !ctx.is_last {
            return Some(RejectReason::MidWindowCall);
        }
        // A store through SP before the call is argument marshalling beyond
        // the register ABI: the outlined frame would shift those slots.
        if let Some(block) = ctx.block
            && ctx.window_start < ctx.instr_idx
        {
            let end = ctx.instr_idx.min(block.len());
            for prev in &block.instructions[ctx.window_start..end] {
                if prev.opcode.may_store() && prev.mentions_reg(Reg::SP) {
                    return Some(RejectReason::MidWindowCall);
                }
            }
        }
        return None;
    }

    if opcode.is_branch() {
        if ctx.is_last && ctx.allow_branch && opcode.is_conditional_branch() {
            return None;
        }
        return Some(RejectReason::MidWindowBranch);
    }

    if is_pc_relative(opcode) {
        return Some(RejectReason::PcRelative);
    }

    if inst.mentions_reg(Reg::FP) || inst.mentions_reg(Reg::LR) {
        return Some(RejectReason::FpLrUse);
    }

    let uses_sp = inst.mentions_reg(Reg::SP);
    if inst.defines_reg(Reg::SP) {
        return Some(RejectReason::SpDefinition);
    }

    if uses_sp {
        if opcode.may_store() {
            return Some(RejectReason::SpStore);
        }
        if ctx.window_len < 5 {
            if !opcode.may_load() {
                return Some(RejectReason::ComplexSpUse);
            }
            if !inst.has_imm() {
                return Some(RejectReason::ComplexSpUse);
            }
        }
    }

    None
}

/// ADR-family materialization or a literal-pool load.
#[must_use]
pub fn is_pc_relative(opcode: Opcode) -> bool {
    let name = opcode.mnemonic().to_ascii_lowercase();
    name == "adr" || name == "adrp" || (name.starts_with("ldr") && name.contains("lit"))
}

/// Byte unit implied by a load/store opcode's immediate field.
///
/// Pair opcodes scale by the register width (x/d: 8, w/s: 4, q: 16); scaled
/// single-register forms by their access size (x: 8, w: 4, h: 2, b: 1,
/// q: 16); unscaled forms and everything else use byte granularity.
#[must_use]
pub fn memory_scale(opcode: Opcode) -> i64 {
    let name = opcode.mnemonic().to_ascii_lowercase();

    if name.starts_with("ldp") || name.starts_with("stp") {
        if name.contains("xi") || name.contains("di") {
            return 8;
        }
        if name.contains("wi") || name.contains("si") {
            return 4;
        }
        if name.contains("qi") {
            return 16;
        }
    }

    if name.starts_with("ldr") || name.starts_with("str") {
        if name.contains("xui") {
            return 8;
        }
        if name.contains("wui") {
            return 4;
        }
        if name.contains("qui") {
            return 16;
        }
        if name.contains("hui") {
            return 2;
        }
        if name.contains("bui") {
            return 1;
        }
    }

    1
}

/// Pair store with pre-decrement writeback: the prologue/trampoline push.
#[must_use]
pub fn is_push(opcode: Opcode) -> bool {
    let name = opcode.mnemonic().to_ascii_lowercase();
    name.starts_with("stp") && name.contains("pre")
}

/// Pair load with post-increment writeback: the matching pop.
#[must_use]
pub fn is_pop(opcode: Opcode) -> bool {
    let name = opcode.mnemonic().to_ascii_lowercase();
    name.starts_with("ldp") && name.contains("post")
}

/// Add/sub family, the non-memory consumers of SP-relative displacements.
#[must_use]
pub fn is_add_sub(opcode: Opcode) -> bool {
    let name = opcode.mnemonic().to_ascii_lowercase();
    name.starts_with("add") || name.starts_with("sub")
}

/// Shift-immediate family, granted a small tolerance by the immediate
/// compatibility check.
#[must_use]
pub fn is_shift(opcode: Opcode) -> bool {
    let name = opcode.mnemonic().to_ascii_lowercase();
    name.contains("lsl") || name.contains("lsr") || name.contains("asr") || name.contains("ror")
}

/// Whether operand `idx` of two same-shaped instructions carries compatible
/// immediates.
///
/// Displacements of stack-addressed memory accesses must match exactly.
/// Shift amounts tolerate ±1, as do small immediates in [-15, 15].
#[must_use]
pub fn immediates_compatible(a: &Instruction, b: &Instruction, idx: usize) -> bool {
    let (Some(op_a), Some(op_b)) = (a.operands.get(idx), b.operands.get(idx)) else {
        return false;
    };
    let (imm_a, imm_b) = match (op_a.as_imm(), op_b.as_imm()) {
        (Some(x), Some(y)) => (x, y),
        (None, None) => return true,
        _ => return false,
    };

    if imm_a == imm_b {
        return true;
    }

    let accesses_memory = (a.opcode.may_load() || a.opcode.may_store())
        && (b.opcode.may_load() || b.opcode.may_store());
    if accesses_memory && (a.mentions_reg(Reg::SP) || a.mentions_reg(Reg::FP)) {
        return false;
    }

    let diff = (imm_a - imm_b).abs();
    if is_shift(a.opcode) && is_shift(b.opcode) && diff <= 1 {
        return true;
    }

    imm_a.abs() <= 15 && imm_b.abs() <= 15 && diff <= 1
}
