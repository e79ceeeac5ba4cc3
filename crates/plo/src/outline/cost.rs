// Byte-level cost/benefit model: decides whether outlining a group of
// occurrences pays, given the per-site trampoline choice and the purity of
// the body-to-be.

#![allow(clippy::cast_possible_wrap)]

use super::extract::Window;
use super::rewrite::{SequenceLocation, needs_sandwich};
use crate::program::{Function, Reg};

const INST_SIZE: i64 = 4;
const CALL_SIZE: i64 = 4;
const SANDWICH_SIZE: i64 = 12;
const PROLOGUE_SIZE: i64 = 4;
const EPILOGUE_SIZE: i64 = 4;
const RET_SIZE: i64 = 4;

/// Outcome of evaluating one candidate group.
#[derive(Debug, Clone, Copy)]
pub struct CostDecision {
    pub admit: bool,
    pub pure_body: bool,
    /// True when at least one occurrence needs the sandwich trampoline; the
    /// synthesizer then compensates stack displacements by 32 bytes.
    pub any_sandwich: bool,
    pub saved_bytes: i64,
    pub cost_bytes: i64,
    pub threshold: i64,
    pub weighted_frequency: u64,
    pub sandwich_sites: usize,
    pub bare_sites: usize,
}

/// A body is pure when it needs no frame: no calls, no conditional branch
/// (a trailing one included), no SP-addressed memory access and no FP read.
#[must_use]
pub fn body_is_pure(window: &Window) -> bool {
    for inst in &window.insts {
        if inst.opcode.is_call() || inst.opcode.is_conditional_branch() {
            return false;
        }
        if (inst.opcode.may_load() || inst.opcode.may_store()) && inst.mentions_reg(Reg::SP) {
            return false;
        }
        if inst.uses_reg(Reg::FP) {
            return false;
        }
    }
    true
}

/// Evaluate a group of located occurrences of `window` inside `function`.
#[must_use]
pub fn evaluate(
    function: &Function,
    window: &Window,
    locations: &[SequenceLocation],
    pgo: bool,
) -> CostDecision {
    let len = i64::try_from(window.len()).unwrap_or(0);
    let num_sites = locations.len();

    let mut sandwich_sites = 0usize;
    let mut bare_sites = 0usize;
    let mut weighted_frequency = 0u64;
    for loc in locations {
        if needs_sandwich(function, loc) {
            sandwich_sites += 1;
        } else {
            bare_sites += 1;
        }
        let block = &function.blocks[loc.block];
        let site_count = if pgo && block.has_profile() {
            block.known_execution_count().max(1)
        } else {
            1
        };
        weighted_frequency += site_count;
    }
    if !pgo {
        weighted_frequency = num_sites as u64;
    }

    let pure_body = body_is_pure(window);
    let body_bytes = if pure_body {
        len * INST_SIZE + RET_SIZE
    } else {
        PROLOGUE_SIZE + len * INST_SIZE + EPILOGUE_SIZE + RET_SIZE
    };

    let trampoline_bytes =
        SANDWICH_SIZE * sandwich_sites as i64 + CALL_SIZE * bare_sites as i64;
    let saved_bytes = len * INST_SIZE * i64::try_from(weighted_frequency).unwrap_or(i64::MAX);
    let cost_bytes = body_bytes + trampoline_bytes;

    let freq_for_threshold = if pgo { weighted_frequency } else { num_sites as u64 };
    let avg_frequency = freq_for_threshold / num_sites.max(1) as u64;
    let threshold = if pure_body {
        if avg_frequency >= 3 || num_sites >= 3 {
            -4
        } else if avg_frequency >= 2 || num_sites >= 2 {
            0
        } else {
            4
        }
    } else {
        0
    };

    CostDecision {
        admit: saved_bytes - cost_bytes > threshold,
        pure_body,
        any_sandwich: sandwich_sites > 0,
        saved_bytes,
        cost_bytes,
        threshold,
        weighted_frequency,
        sandwich_sites,
        bare_sites,
    }
}
