// Call-site rewriter: finds the exact occurrences of an admitted window
// inside its home function and replaces each with a call to the outlined
// function — bare, or wrapped in a save/restore sandwich when the caller has
// not preserved LR.

use super::extract::{HOT_BLOCK_THRESHOLD, MAX_CROSS_BLOCKS, Window, next_block_on_path};
use crate::program::{
    BasicBlock, Function, Reg, SymbolId, make_call, make_pop_pair, make_push_pair,
};
use crate::outline::predicates::is_push;

/// Where a window occurs: the starting point plus the ordered
/// `(block, start, count)` ranges that cover its instructions.
#[derive(Debug, Clone)]
pub struct SequenceLocation {
    pub block: usize,
    pub start: usize,
    pub ranges: Vec<(usize, usize, usize)>,
}

impl SequenceLocation {
    #[must_use]
    pub fn is_cross_block(&self) -> bool {
        self.ranges.len() > 1
    }
}

/// A leaf in the caller sense: issues no call of its own.
#[must_use]
pub fn is_leaf_function(function: &Function) -> bool {
    function
        .blocks
        .iter()
        .all(|bb| bb.instructions.iter().all(|inst| !inst.opcode.is_call()))
}

/// Whether LR is known to be saved on entry to the given point.
///
/// Scans the entry block for a push or store naming LR, up to the point
/// itself when the point is in the entry block. A point reachable only
/// after a return instruction is unsafe and reports unsaved.
#[must_use]
pub fn is_lr_saved_at(function: &Function, block_idx: usize, start: usize) -> bool {
    if function.blocks.is_empty() {
        return false;
    }

    // Outlining past a ret means LR may already be clobbered.
    for (idx, bb) in function.blocks.iter().enumerate() {
        let ret_idx = bb.instructions.iter().position(|inst| inst.opcode.is_return());
        if idx == block_idx {
            if let Some(ret_idx) = ret_idx
                && start > ret_idx
            {
                return false;
            }
            break;
        }
        if ret_idx.is_some() {
            return false;
        }
    }

    let entry = &function.blocks[0];
    let is_entry_block = block_idx == 0;
    let limit = if is_entry_block { start.min(entry.len()) } else { entry.len() };

    for inst in &entry.instructions[..limit] {
        if (is_push(inst.opcode) || inst.opcode.may_store()) && inst.mentions_reg(Reg::LR) {
            return true;
        }
        // A terminator or call before any LR save ends the entry scan.
        if (inst.opcode.is_terminator() || inst.opcode.is_call()) && is_entry_block {
            return false;
        }
    }

    false
}

/// Whether this occurrence needs the push/call/pop sandwich.
#[must_use]
pub fn needs_sandwich(function: &Function, loc: &SequenceLocation) -> bool {
    let real_leaf = is_leaf_function(function) && !function.injected;
    real_leaf || !is_lr_saved_at(function, loc.block, loc.start)
}

fn is_hot(block: &BasicBlock) -> bool {
    block.has_profile() && block.known_execution_count() > HOT_BLOCK_THRESHOLD
}

/// Find every exact occurrence of `window` in `function`.
///
/// Blocks large enough are matched in place; smaller blocks attempt a
/// cross-block walk, accepted only when the final matched instruction is a
/// conditional branch. With `skip_hot`, occurrences in profiled-hot blocks
/// are not reported, mirroring the extraction filter.
#[must_use]
pub fn find_locations(
    function: &Function,
    window: &Window,
    skip_hot: bool,
) -> Vec<SequenceLocation> {
    let len = window.len();
    let mut locations = Vec::new();
    if len == 0 {
        return locations;
    }

    for (block_idx, block) in function.blocks.iter().enumerate() {
        if skip_hot && is_hot(block) {
            continue;
        }
        if block.len() >= len {
            for start in 0..=block.len() - len {
                let matches = window
                    .insts
                    .iter()
                    .zip(&block.instructions[start..start + len])
                    .all(|(a, b)| a == b);
                if matches {
                    locations.push(SequenceLocation {
                        block: block_idx,
                        start,
                        ranges: vec![(block_idx, start, len)],
                    });
                }
            }
        } else if !block.is_empty() {
            for start in 0..block.len() {
                if let Some(ranges) =
                    match_cross_block(function, window, block_idx, start, skip_hot)
                {
                    locations.push(SequenceLocation { block: block_idx, start, ranges });
                }
            }
        }
    }

    locations
}

/// Walk successor blocks matching `window` instruction by instruction.
fn match_cross_block(
    function: &Function,
    window: &Window,
    start_block: usize,
    start_idx: usize,
    skip_hot: bool,
) -> Option<Vec<(usize, usize, usize)>> {
    let len = window.len();
    let mut ranges = Vec::new();
    let mut current = start_block;
    let mut idx = start_idx;
    let mut matched = 0usize;
    let mut block_count = 1;

    while matched < len && block_count <= MAX_CROSS_BLOCKS {
        let block = &function.blocks[current];
        if block.is_empty() || idx >= block.len() {
            return None;
        }
        if skip_hot && is_hot(block) {
            return None;
        }

        let range_start = idx;
        while matched < len && idx < block.len() {
            if block.instructions[idx] != window.insts[matched] {
                return None;
            }
            matched += 1;
            idx += 1;
        }
        ranges.push((current, range_start, idx - range_start));

        if matched < len {
            if idx < block.len() {
                return None;
            }
            current = next_block_on_path(function, current)?;
            idx = 0;
            block_count += 1;
        }
    }

    if matched < len {
        return None;
    }
    // Only a trailing conditional branch makes a cross-block match legal.
    window.insts[len - 1].opcode.is_conditional_branch().then_some(ranges)
}

/// Replace one located occurrence with a call to `callee`.
///
/// Returns false when the location no longer fits the function (stale
/// indices after earlier rewrites); such sites are skipped.
pub fn replace_with_call(
    function: &mut Function,
    loc: &SequenceLocation,
    callee: SymbolId,
    sandwich: bool,
) -> bool {
    let Some(&(first_block, first_start, first_count)) = loc.ranges.first() else {
        return false;
    };
    if first_block >= function.blocks.len()
        || first_start >= function.blocks[first_block].len()
    {
        return false;
    }

    let call = make_call(callee);
    {
        let block = &mut function.blocks[first_block];
        if sandwich {
            block.instructions[first_start] = make_push_pair(Reg::FP, Reg::LR);
            block.instructions.insert(first_start + 1, call);
            block.instructions.insert(first_start + 2, make_pop_pair(Reg::FP, Reg::LR));
            erase_at(block, first_start + 3, first_count.saturating_sub(1));
        } else {
            block.instructions[first_start] = call;
            erase_at(block, first_start + 1, first_count.saturating_sub(1));
        }
    }

    for &(block_idx, range_start, count) in &loc.ranges[1..] {
        if block_idx >= function.blocks.len() {
            continue;
        }
        erase_at(&mut function.blocks[block_idx], range_start, count);
    }

    function.recompute_landing_pads();
    true
}

fn erase_at(block: &mut crate::program::BasicBlock, index: usize, count: usize) {
    for _ in 0..count {
        if index < block.instructions.len() {
            block.instructions.remove(index);
        }
    }
}

/// Rewrite order: within a block, higher start indices first, so earlier
/// indices stay valid while the block shrinks.
pub fn sort_for_replacement(locations: &mut [SequenceLocation]) {
    locations.sort_by(|a, b| a.block.cmp(&b.block).then(b.start.cmp(&a.start)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Opcode, parse_program, Program};
    use crate::outline::extract::Window;

    fn window_from(program: &Program, name: &str, block: usize, start: usize, len: usize) -> Window {
        let f = program.function_by_name(name).unwrap();
        Window { insts: f.blocks[block].instructions[start..start + len].to_vec() }
    }

    #[test]
    fn finds_all_in_block_occurrences() {
        let program = parse_program(
            "func f {\n\
               mov x0, #1\n\
               mov x1, #2\n\
               mov x9, #9\n\
               mov x0, #1\n\
               mov x1, #2\n\
             }\n",
        )
        .unwrap();
        let window = window_from(&program, "f", 0, 0, 2);
        let f = program.function_by_name("f").unwrap();
        let locs = find_locations(f, &window, false);
        assert_eq!(locs.len(), 2);
        assert_eq!((locs[0].block, locs[0].start), (0, 0));
        assert_eq!((locs[1].block, locs[1].start), (0, 3));
    }

    #[test]
    fn cross_block_match_requires_trailing_conditional_branch() {
        let program = parse_program(
            "func f {\n\
             a:\n\
               mov x0, #1\n\
               mov x1, #2\n\
             b:\n\
               cbz x0, a\n\
             }\n",
        )
        .unwrap();
        let f = program.function_by_name("f").unwrap();
        let mut insts = f.blocks[0].instructions.clone();
        insts.push(f.blocks[1].instructions[0].clone());
        let window = Window { insts };
        let locs = find_locations(f, &window, false);
        assert_eq!(locs.len(), 1);
        assert!(locs[0].is_cross_block());
        assert_eq!(locs[0].ranges, vec![(0, 0, 2), (1, 0, 1)]);
    }

    #[test]
    fn lr_saved_after_push_in_entry() {
        let program = parse_program(
            "func f {\n\
               stp x29, x30, [sp, #-16]!\n\
               mov x0, #1\n\
               mov x1, #2\n\
               ldp x29, x30, [sp], #16\n\
               ret\n\
             }\n",
        )
        .unwrap();
        let f = program.function_by_name("f").unwrap();
        assert!(is_lr_saved_at(f, 0, 1));
        // At index 0 the push has not executed yet.
        assert!(!is_lr_saved_at(f, 0, 0));
    }

    #[test]
    fn lr_not_saved_in_leaf_shape() {
        let program = parse_program(
            "func f {\n\
               mov x0, #1\n\
               mov x1, #2\n\
               ret\n\
             }\n",
        )
        .unwrap();
        let f = program.function_by_name("f").unwrap();
        assert!(!is_lr_saved_at(f, 0, 1));
    }

    #[test]
    fn sites_after_ret_are_unsafe() {
        let program = parse_program(
            "func f {\n\
             a:\n\
               stp x29, x30, [sp, #-16]!\n\
               ret\n\
             b:\n\
               mov x0, #1\n\
               mov x1, #2\n\
             }\n",
        )
        .unwrap();
        let f = program.function_by_name("f").unwrap();
        assert!(!is_lr_saved_at(f, 1, 0));
    }

    #[test]
    fn bare_call_replacement_removes_whole_window() {
        let mut program = parse_program(
            "func f {\n\
               stp x29, x30, [sp, #-16]!\n\
               mov x0, #1\n\
               mov x1, #2\n\
               add x2, x0, x1\n\
               ldp x29, x30, [sp], #16\n\
               ret\n\
             }\n",
        )
        .unwrap();
        let callee = program.symbols.get_or_create("PLO_outlined_1");
        let window = window_from(&program, "f", 0, 1, 3);
        let f = program
            .functions_mut()
            .iter_mut()
            .find(|f| f.name == "f")
            .unwrap();
        let loc = SequenceLocation { block: 0, start: 1, ranges: vec![(0, 1, 3)] };
        assert!(replace_with_call(f, &loc, callee, false));

        let block = &f.blocks[0];
        assert_eq!(block.len(), 4);
        assert_eq!(block.instructions[1].opcode, Opcode::Bl);
        // No original window instruction survives.
        for inst in &block.instructions {
            assert!(!window.insts[1..].contains(inst));
        }
    }

    #[test]
    fn sandwich_replacement_inserts_push_call_pop() {
        let mut program = parse_program(
            "func f {\n\
               mov x0, #1\n\
               mov x1, #2\n\
               add x2, x0, x1\n\
               ret\n\
             }\n",
        )
        .unwrap();
        let callee = program.symbols.get_or_create("PLO_outlined_1");
        let f = program
            .functions_mut()
            .iter_mut()
            .find(|f| f.name == "f")
            .unwrap();
        let loc = SequenceLocation { block: 0, start: 0, ranges: vec![(0, 0, 3)] };
        assert!(replace_with_call(f, &loc, callee, true));

        let block = &f.blocks[0];
        assert_eq!(block.len(), 4);
        assert_eq!(block.instructions[0].opcode, Opcode::StpXpre);
        assert_eq!(block.instructions[1].opcode, Opcode::Bl);
        assert_eq!(block.instructions[2].opcode, Opcode::LdpXpost);
        assert_eq!(block.instructions[3].opcode, Opcode::Ret);
    }

    #[test]
    fn cross_block_replacement_erases_residue() {
        let mut program = parse_program(
            "func f {\n\
             a:\n\
               stp x29, x30, [sp, #-16]!\n\
               mov x0, #1\n\
               mov x1, #2\n\
             b:\n\
               cbz x0, a\n\
             c:\n\
               ret\n\
             }\n",
        )
        .unwrap();
        let callee = program.symbols.get_or_create("PLO_outlined_1");
        let f = program
            .functions_mut()
            .iter_mut()
            .find(|f| f.name == "f")
            .unwrap();
        let loc = SequenceLocation {
            block: 0,
            start: 1,
            ranges: vec![(0, 1, 2), (1, 0, 1)],
        };
        assert!(replace_with_call(f, &loc, callee, false));
        assert_eq!(f.blocks[0].len(), 2);
        assert_eq!(f.blocks[0].instructions[1].opcode, Opcode::Bl);
        assert!(f.blocks[1].is_empty());
    }

    #[test]
    fn replacement_order_is_descending_within_block() {
        let mut locs = vec![
            SequenceLocation { block: 0, start: 1, ranges: vec![(0, 1, 2)] },
            SequenceLocation { block: 1, start: 0, ranges: vec![(1, 0, 2)] },
            SequenceLocation { block: 0, start: 5, ranges: vec![(0, 5, 2)] },
        ];
        sort_for_replacement(&mut locs);
        let order: Vec<(usize, usize)> = locs.iter().map(|l| (l.block, l.start)).collect();
        assert_eq!(order, vec![(0, 5), (0, 1), (1, 0)]);
    }
}
