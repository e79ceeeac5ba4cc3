// Sequence extractor: enumerates length-L candidate windows per function,
// including windows that continue into successor blocks along the hottest
// path, and applies the predicate reject vector.

use std::collections::HashMap;

use super::OutlineOptions;
use super::predicates::{RejectReason, WindowContext, should_reject};
use crate::program::{Function, Instruction};

/// Cross-block windows walk at most this many blocks.
pub const MAX_CROSS_BLOCKS: usize = 3;

/// Blocks executing more often than this are skipped under profile
/// filtering.
pub const HOT_BLOCK_THRESHOLD: u64 = 1;

/// An owned candidate instruction sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub insts: Vec<Instruction>,
}

impl Window {
    #[must_use]
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}

/// Per-function extraction counters, keyed by reject reason.
#[derive(Debug, Default, Clone)]
pub struct ExtractStats {
    pub extracted: usize,
    pub rejected: usize,
    pub cross_block_rejected: usize,
    pub rejects: HashMap<RejectReason, usize>,
}

impl ExtractStats {
    fn note_reject(&mut self, reason: RejectReason) {
        self.rejected += 1;
        *self.rejects.entry(reason).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: &Self) {
        self.extracted += other.extracted;
        self.rejected += other.rejected;
        self.cross_block_rejected += other.cross_block_rejected;
        for (&reason, &count) in &other.rejects {
            *self.rejects.entry(reason).or_insert(0) += count;
        }
    }
}

/// Pick the block a straight-line walk continues into.
///
/// A conditional branch follows the hottest successor edge; a non-branch
/// terminator follows its sole successor, or the hottest of several. Profile
/// ties keep the first-listed successor. An unconditional branch ends the
/// walk.
#[must_use]
pub fn next_block_on_path(function: &Function, current: usize) -> Option<usize> {
    let block = &function.blocks[current];
    let last = block.instructions.last()?;

    let hottest = || {
        let mut best: Option<(usize, u64)> = None;
        for edge in &block.successors {
            if best.is_none_or(|(_, count)| edge.count > count) {
                best = Some((edge.target, edge.count));
            }
        }
        best.map(|(target, _)| target)
    };

    if last.opcode.is_conditional_branch() {
        hottest()
    } else if !last.opcode.is_branch() && !last.opcode.is_return() {
        match block.successors.len() {
            0 => None,
            1 => Some(block.successors[0].target),
            _ => hottest(),
        }
    } else {
        None
    }
}

fn is_hot(block: &crate::program::BasicBlock) -> bool {
    block.has_profile() && block.known_execution_count() > HOT_BLOCK_THRESHOLD
}

/// Enumerate all admissible windows of exactly `len` instructions.
#[must_use]
pub fn extract_windows(
    function: &Function,
    len: usize,
    opts: &OutlineOptions,
    stats: &mut ExtractStats,
) -> Vec<Window> {
    let mut windows = Vec::new();

    if function.has_eh_ranges() {
        if opts.debug {
            tracing::debug!(function = %function.name, "has EH ranges, skipping");
        }
        return windows;
    }

    for (block_idx, block) in function.blocks.iter().enumerate() {
        if block.is_empty() {
            continue;
        }
        if opts.pgo && is_hot(block) {
            if opts.debug {
                tracing::debug!(
                    function = %function.name,
                    count = block.known_execution_count(),
                    "skipping hot block"
                );
            }
            continue;
        }

        if block.len() >= len {
            for start in 0..=block.len() - len {
                let mut insts = Vec::with_capacity(len);
                let mut rejected = false;
                for offset in 0..len {
                    let inst = &block.instructions[start + offset];
                    let ctx = WindowContext {
                        window_len: len,
                        is_last: offset == len - 1,
                        allow_branch: false,
                        block: Some(block),
                        window_start: start,
                        instr_idx: start + offset,
                    };
                    if let Some(reason) = should_reject(inst, &ctx) {
                        stats.note_reject(reason);
                        rejected = true;
                        break;
                    }
                    insts.push(inst.clone());
                }
                if !rejected {
                    stats.extracted += 1;
                    windows.push(Window { insts });
                }
            }
        } else {
            // Block too small for a full window: try continuing into
            // successor blocks.
            for start in 0..block.len() {
                if let Some(window) =
                    collect_cross_block(function, block_idx, start, len, opts, stats)
                {
                    stats.extracted += 1;
                    windows.push(window);
                }
            }
        }
    }

    if opts.debug {
        tracing::debug!(
            function = %function.name,
            len,
            extracted = stats.extracted,
            rejected = stats.rejected,
            "window extraction"
        );
    }

    windows
}

/// Collect a window starting at `(start_block, start_idx)` across up to
/// `MAX_CROSS_BLOCKS` blocks. Returns `None` when any instruction is
/// rejected or the walk runs out of instructions.
fn collect_cross_block(
    function: &Function,
    start_block: usize,
    start_idx: usize,
    len: usize,
    opts: &OutlineOptions,
    stats: &mut ExtractStats,
) -> Option<Window> {
    if opts.pgo && is_hot(&function.blocks[start_block]) {
        return None;
    }

    let mut insts: Vec<Instruction> = Vec::with_capacity(len);
    let mut current = start_block;
    let mut idx = start_idx;
    let mut block_count = 1;

    while insts.len() < len && block_count <= MAX_CROSS_BLOCKS {
        let block = &function.blocks[current];
        if block.is_empty() || idx >= block.len() {
            break;
        }
        if opts.pgo && is_hot(block) {
            break;
        }

        let window_start = if current == start_block { start_idx } else { 0 };
        while insts.len() < len && idx < block.len() {
            let inst = &block.instructions[idx];
            let ctx = WindowContext {
                window_len: len,
                is_last: insts.len() == len - 1,
                allow_branch: true,
                block: Some(block),
                window_start,
                instr_idx: idx,
            };
            if let Some(reason) = should_reject(inst, &ctx) {
                stats.note_reject(reason);
                stats.cross_block_rejected += 1;
                return None;
            }
            insts.push(inst.clone());
            idx += 1;
        }

        if insts.len() < len && idx >= block.len() {
            let Some(next) = next_block_on_path(function, current) else {
                break;
            };
            current = next;
            idx = 0;
            block_count += 1;
        } else {
            break;
        }
    }

    (insts.len() == len).then_some(Window { insts })
}
