// Register-normalized window fingerprint.
//
// FNV-1a over the (opcode, operand...) stream. General-purpose registers are
// renamed to sequential ids on first sight so the hash survives arbitrary
// GPR renaming; SP, FP and LR keep their raw ids. Hash equality is only a
// candidate signal — the grouper re-checks structurally.

use std::collections::HashMap;

use crate::program::{Instruction, Operand};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Sentinel mixed in for symbol-reference operands.
const EXPR_SENTINEL: u64 = 0xDEAD_BEEF;

/// First id handed out by the window-local rename map.
const FIRST_NORMALIZED_ID: u64 = 1000;

/// Hash a window, invariant under GPR renaming.
#[must_use]
pub fn sequence_hash(window: &[Instruction]) -> u64 {
    let mut hash = FNV_OFFSET;
    let mut mix = |value: u64| {
        hash ^= value;
        hash = hash.wrapping_mul(FNV_PRIME);
    };

    let mut rename: HashMap<u8, u64> = HashMap::new();
    let mut next_id = FIRST_NORMALIZED_ID;

    for inst in window {
        mix(u64::from(inst.opcode as u16));
        for operand in &inst.operands {
            match operand {
                Operand::Reg(reg) => {
                    let id = if reg.is_special() {
                        u64::from(reg.0)
                    } else {
                        *rename.entry(reg.0).or_insert_with(|| {
                            let id = next_id;
                            next_id += 1;
                            id
                        })
                    };
                    mix(id);
                }
                Operand::Imm(value) => mix(*value as u64),
                Operand::Sym(_) => mix(EXPR_SENTINEL),
                Operand::Float(value) => mix(u64::from(value.to_bits())),
            }
        }
    }

    hash
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::program::{Reg, SymbolTable, parse_instruction};

    fn window(lines: &[&str]) -> Vec<Instruction> {
        let mut symbols = SymbolTable::new();
        lines
            .iter()
            .map(|line| parse_instruction(line, &mut symbols).expect("parse"))
            .collect()
    }

    /// Apply a GPR permutation to every register operand of a window.
    fn rename_window(window: &[Instruction], map: &dyn Fn(u8) -> u8) -> Vec<Instruction> {
        window
            .iter()
            .map(|inst| {
                let mut renamed = inst.clone();
                for op in &mut renamed.operands {
                    if let Operand::Reg(reg) = op
                        && !reg.is_special()
                    {
                        *op = Operand::Reg(Reg(map(reg.0)));
                    }
                }
                renamed
            })
            .collect()
    }

    #[test]
    fn stable_for_identical_windows() {
        let a = window(&["mov x0, #1", "add x2, x0, x1"]);
        let b = window(&["mov x0, #1", "add x2, x0, x1"]);
        assert_eq!(sequence_hash(&a), sequence_hash(&b));
    }

    #[test]
    fn invariant_under_gpr_renaming() {
        let a = window(&["mov x0, #1", "mov x1, #2", "add x2, x0, x1"]);
        let b = window(&["mov x5, #1", "mov x7, #2", "add x9, x5, x7"]);
        assert_eq!(sequence_hash(&a), sequence_hash(&b));
    }

    #[test]
    fn special_registers_resist_renaming() {
        let a = window(&["ldr x0, [sp, #8]"]);
        let b = window(&["ldr x0, [x1, #8]"]);
        assert_ne!(sequence_hash(&a), sequence_hash(&b));
    }

    #[test]
    fn sensitive_to_immediates_and_opcode() {
        let a = window(&["mov x0, #1"]);
        let b = window(&["mov x0, #2"]);
        assert_ne!(sequence_hash(&a), sequence_hash(&b));

        let c = window(&["add x0, x1, x2"]);
        let d = window(&["sub x0, x1, x2"]);
        assert_ne!(sequence_hash(&c), sequence_hash(&d));
    }

    #[test]
    fn rename_order_matters_only_by_first_sight() {
        // x1 and x2 swap roles: first-sight order differs, so these are
        // genuinely different shapes and must not collide.
        let a = window(&["add x1, x2, x1"]);
        let b = window(&["add x1, x1, x2"]);
        assert_ne!(sequence_hash(&a), sequence_hash(&b));
    }

    proptest! {
        /// Any bijective rename of the GPRs that fixes SP/FP/LR preserves
        /// the fingerprint.
        #[test]
        fn prop_rename_invariance(offset in 1u8..28, imm1 in -64i64..64, imm2 in -64i64..64) {
            let mut symbols = SymbolTable::new();
            let base = vec![
                parse_instruction(&format!("mov x0, #{imm1}"), &mut symbols).unwrap(),
                parse_instruction(&format!("mov x1, #{imm2}"), &mut symbols).unwrap(),
                parse_instruction("add x2, x0, x1", &mut symbols).unwrap(),
            ];
            // Rotate the GPR space by a fixed offset: a bijection on 0..=28.
            let renamed = rename_window(&base, &|r| (r + offset) % 29);
            prop_assert_eq!(sequence_hash(&base), sequence_hash(&renamed));
        }
    }

    /// Rename registers to first-sight order so rename-equivalent windows
    /// become textually identical. Hash-equal windows that still differ
    /// after canonicalization are genuine collisions.
    fn canonicalize(window: &[Instruction]) -> Vec<Instruction> {
        let mut map: HashMap<u8, u8> = HashMap::new();
        let mut next = 0u8;
        window
            .iter()
            .map(|inst| {
                let mut out = inst.clone();
                for op in &mut out.operands {
                    if let Operand::Reg(reg) = op
                        && !reg.is_special()
                    {
                        let id = *map.entry(reg.0).or_insert_with(|| {
                            let id = next;
                            next += 1;
                            id
                        });
                        *op = Operand::Reg(Reg(id));
                    }
                }
                out
            })
            .collect()
    }

    #[test]
    fn collision_smoke_over_random_windows() {
        // Deterministic xorshift generator; windows of 4 instructions drawn
        // from a small ALU/load vocabulary.
        let mut state = 0x2545_f491_4f6c_dd1du64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        let mut symbols = SymbolTable::new();
        let mut seen: HashMap<u64, Vec<Instruction>> = HashMap::new();
        let mut collisions = 0usize;
        let total = 100_000usize;

        for _ in 0..total {
            let mut lines = Vec::with_capacity(4);
            for _ in 0..4 {
                let r = next();
                let a = r % 29;
                let b = (r >> 8) % 29;
                let c = (r >> 16) % 29;
                let imm = (r >> 24) % 4096;
                lines.push(match r % 5 {
                    0 => format!("mov x{a}, #{imm}"),
                    1 => format!("add x{a}, x{b}, x{c}"),
                    2 => format!("sub x{a}, x{b}, x{c}"),
                    3 => format!("ldr x{a}, [x{b}, #{}]", (imm % 64) * 8),
                    _ => format!("eor x{a}, x{b}, x{c}"),
                });
            }
            let window: Vec<Instruction> = lines
                .iter()
                .map(|l| parse_instruction(l, &mut symbols).unwrap())
                .collect();
            let canonical = canonicalize(&window);
            let hash = sequence_hash(&window);
            if let Some(prev) = seen.insert(hash, canonical.clone())
                && prev != canonical
            {
                collisions += 1;
            }
        }

        // Tolerance: 0.01% of the corpus.
        assert!(collisions <= total / 10_000, "too many collisions: {collisions}");
    }
}
