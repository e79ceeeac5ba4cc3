// Intermediate simplifier: an outlined function that is nothing but a
// forwarded call (stack bookkeeping, one direct call, return) adds a jump
// for no size win. Callers are retargeted at the wrapped callee and the
// wrapper is marked ignored so the host drops it at emission.

use super::predicates::{is_add_sub, is_pop, is_push};
use crate::program::{Function, Program, Reg, SymbolId, make_call};

/// True when the function consists only of pushes/pops, returns,
/// SP-adjusting arithmetic and call instructions.
#[must_use]
pub fn is_pure_call_sequence(function: &Function) -> bool {
    if function.is_empty() {
        return false;
    }
    let mut has_call = false;
    for block in &function.blocks {
        for inst in &block.instructions {
            let opcode = inst.opcode;
            if is_push(opcode) || is_pop(opcode) || opcode.is_return() {
                continue;
            }
            if opcode.is_call() {
                has_call = true;
                continue;
            }
            if is_add_sub(opcode) && inst.defines_reg(Reg::SP) {
                continue;
            }
            return false;
        }
    }
    has_call
}

/// Direct call targets of a function, one entry per call instruction.
fn direct_call_targets(function: &Function) -> Vec<SymbolId> {
    let mut targets = Vec::new();
    for block in &function.blocks {
        for inst in &block.instructions {
            if inst.opcode.is_call()
                && !inst.opcode.is_indirect_call()
                && let Some(target) = inst.target_sym()
            {
                targets.push(target);
            }
        }
    }
    targets
}

/// Inline away every single-call wrapper among the injected functions.
/// Returns the number of wrappers eliminated.
pub fn inline_call_wrappers(program: &mut Program, debug: bool) -> usize {
    // Gather (wrapper index, wrapper symbol, forwarded target) first; the
    // rewrite below walks every function mutably.
    let mut forwards = Vec::new();
    for (idx, function) in program.functions().iter().enumerate() {
        let outlined = function.injected || function.name.starts_with("PLO_outlined_");
        if !outlined || function.ignored || function.is_empty() {
            continue;
        }
        if !is_pure_call_sequence(function) {
            continue;
        }
        let targets = direct_call_targets(function);
        if targets.len() != 1 {
            continue;
        }
        let target = targets[0];
        let Some(wrapper_sym) = program.symbols.get(&function.name) else {
            continue;
        };
        if target == wrapper_sym {
            continue;
        }
        forwards.push((idx, wrapper_sym, target));
    }

    let mut eliminated = 0;
    for (wrapper_idx, wrapper_sym, target) in forwards {
        let mut sites = 0usize;
        for (idx, function) in program.functions_mut().iter_mut().enumerate() {
            if idx == wrapper_idx {
                continue;
            }
            for block in &mut function.blocks {
                for inst in &mut block.instructions {
                    if inst.opcode.is_call()
                        && !inst.opcode.is_indirect_call()
                        && inst.target_sym() == Some(wrapper_sym)
                    {
                        *inst = make_call(target);
                        sites += 1;
                    }
                }
            }
        }
        if sites > 0 {
            program.function_mut(wrapper_idx).ignored = true;
            eliminated += 1;
            if debug {
                tracing::debug!(
                    wrapper = %program.function(wrapper_idx).name,
                    sites,
                    "inlined call wrapper"
                );
            }
        }
    }
    eliminated
}
