// Duplicate grouper: starting from an anchor window, claims every later
// window that matches it under register normalization and does not overlap
// anything already in the group.

use std::collections::HashSet;

use super::extract::Window;
use super::fingerprint::sequence_hash;
use super::predicates::immediates_compatible;
use crate::program::Operand;

/// Indices of windows already claimed by some anchor during the current
/// per-function sweep.
pub type ClaimSet = HashSet<usize>;

/// One group of matching windows. `members[0]` is the anchor.
#[derive(Debug)]
pub struct Group {
    pub members: Vec<usize>,
    pub frequency: usize,
}

/// Content-based overlap: two windows overlap when any instruction appears
/// (bytewise equal) in both. This makes in-block and cross-block occurrences
/// of the same physical range mutually exclusive.
#[must_use]
pub fn windows_overlap(a: &Window, b: &Window) -> bool {
    a.insts.iter().any(|ia| b.insts.iter().any(|ib| ia == ib))
}

/// Window equality: fingerprint match, or a structural re-check that walks
/// operands pairwise.
#[must_use]
pub fn windows_match(a: &Window, b: &Window) -> bool {
    if sequence_hash(&a.insts) == sequence_hash(&b.insts) {
        return true;
    }
    structurally_equivalent(a, b)
}

/// Position-by-position recheck: same opcode and operand count, special
/// registers pinned, immediates compatible, other operand kinds equal.
fn structurally_equivalent(a: &Window, b: &Window) -> bool {
    if a.len() != b.len() {
        return false;
    }
    for (ia, ib) in a.insts.iter().zip(&b.insts) {
        if ia.opcode != ib.opcode || ia.operands.len() != ib.operands.len() {
            return false;
        }
        for (idx, (op_a, op_b)) in ia.operands.iter().zip(&ib.operands).enumerate() {
            match (op_a, op_b) {
                (Operand::Reg(ra), Operand::Reg(rb)) => {
                    if (ra.is_special() || rb.is_special()) && ra != rb {
                        return false;
                    }
                }
                (Operand::Imm(_), Operand::Imm(_)) => {
                    if !immediates_compatible(ia, ib, idx) {
                        return false;
                    }
                }
                (Operand::Sym(_), Operand::Sym(_)) | (Operand::Float(_), Operand::Float(_)) => {}
                _ => return false,
            }
        }
    }
    true
}

/// Claim the anchor and gather its matches among the later windows.
pub fn collect_group(windows: &[Window], anchor: usize, claims: &mut ClaimSet) -> Group {
    claims.insert(anchor);
    let mut members = vec![anchor];

    for j in anchor + 1..windows.len() {
        if claims.contains(&j) {
            continue;
        }
        if members.iter().any(|&m| windows_overlap(&windows[m], &windows[j])) {
            continue;
        }
        if windows_match(&windows[anchor], &windows[j]) {
            claims.insert(j);
            members.push(j);
        }
    }

    let frequency = members.len();
    Group { members, frequency }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Instruction, SymbolTable, parse_instruction};

    fn window(lines: &[&str]) -> Window {
        let mut symbols = SymbolTable::new();
        let insts: Vec<Instruction> = lines
            .iter()
            .map(|line| parse_instruction(line, &mut symbols).expect("parse"))
            .collect();
        Window { insts }
    }

    #[test]
    fn identical_windows_match() {
        let a = window(&["mov x0, #1", "add x2, x0, x1"]);
        let b = window(&["mov x0, #1", "add x2, x0, x1"]);
        assert!(windows_match(&a, &b));
    }

    #[test]
    fn renamed_windows_match_via_hash() {
        let a = window(&["mov x0, #1", "add x2, x0, x1"]);
        let b = window(&["mov x5, #1", "add x7, x5, x6"]);
        assert!(windows_match(&a, &b));
    }

    #[test]
    fn structural_recheck_tolerates_small_immediates() {
        // Different hash (immediates differ), but structurally compatible.
        let a = window(&["mov x0, #4", "add x2, x0, x1"]);
        let b = window(&["mov x0, #5", "add x2, x0, x1"]);
        assert!(windows_match(&a, &b));
    }

    #[test]
    fn special_registers_must_agree() {
        let a = window(&["ldr x0, [sp, #8]"]);
        let b = window(&["ldr x0, [x1, #8]"]);
        assert!(!windows_match(&a, &b));
    }

    #[test]
    fn stack_displacements_must_agree() {
        let a = window(&["ldr x0, [sp, #8]"]);
        let b = window(&["ldr x0, [sp, #16]"]);
        assert!(!windows_match(&a, &b));
    }

    #[test]
    fn overlap_is_content_based() {
        let a = window(&["mov x0, #1", "mov x1, #2"]);
        let b = window(&["mov x1, #2", "add x2, x0, x1"]);
        let c = window(&["mov x4, #9", "mov x5, #8"]);
        assert!(windows_overlap(&a, &b));
        assert!(!windows_overlap(&a, &c));
    }

    #[test]
    fn grouping_claims_matches_and_skips_overlaps() {
        let windows = vec![
            window(&["mov x0, #1", "add x2, x0, x1"]),
            // Overlaps the anchor (same physical instructions).
            window(&["add x2, x0, x1", "mov x3, #7"]),
            // Renamed copy: claims.
            window(&["mov x5, #1", "add x6, x5, x4"]),
            // Unrelated.
            window(&["mul x1, x2, x3", "sub x4, x1, x2"]),
        ];
        let mut claims = ClaimSet::new();
        let group = collect_group(&windows, 0, &mut claims);
        assert_eq!(group.members, vec![0, 2]);
        assert_eq!(group.frequency, 2);
        assert!(claims.contains(&0));
        assert!(claims.contains(&2));
        assert!(!claims.contains(&1));
        assert!(!claims.contains(&3));
    }

    #[test]
    fn claimed_windows_are_not_regrouped() {
        let windows = vec![
            window(&["mov x0, #1", "add x2, x0, x1"]),
            window(&["mov x5, #1", "add x6, x5, x4"]),
        ];
        let mut claims = ClaimSet::new();
        claims.insert(1);
        let group = collect_group(&windows, 0, &mut claims);
        assert_eq!(group.members, vec![0]);
    }
}
