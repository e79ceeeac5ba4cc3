// Function synthesizer: materializes an admitted window as a new injected
// function — body copy with branch redirection, stack-displacement fixup,
// minimal prologue/epilogue, tail-call rewriting and the late shrink-wrap
// pass that strips frames made redundant by it.

use super::extract::Window;
use super::predicates::{is_add_sub, is_pop, is_push, memory_scale};
use crate::program::{
    BasicBlock, Function, Operand, Program, Reg, make_pop_pair, make_push_pair, make_return,
    make_unconditional_branch,
};

/// Stack compensation in bytes for bodies reached through a bare call: the
/// callee's own FP/LR frame.
pub const BYTE_FIX_CALL: i64 = 16;
/// Through a sandwich: the caller pushed another pair above it.
pub const BYTE_FIX_SANDWICH: i64 = 32;

/// Build an injected function from `window`. Returns its function index, or
/// `None` when the candidate must be abandoned.
pub fn synthesize(
    program: &mut Program,
    window: &Window,
    any_sandwich: bool,
    counter: &mut u32,
) -> Option<usize> {
    if window.is_empty() {
        tracing::warn!("abandoning empty outlining candidate");
        return None;
    }

    *counter += 1;
    let name = format!("PLO_outlined_{}", *counter);

    let has_cond_branch =
        window.insts.iter().any(|inst| inst.opcode.is_conditional_branch());
    let entry_label = program.symbols.create_named_temp("outlined_bb");
    let return_label =
        has_cond_branch.then(|| program.symbols.create_named_temp("outlined_return"));

    let func_idx = program.add_injected_function(&name);
    let function = program.function_mut(func_idx);

    // Copy the body, skipping pseudos and redirecting the (final)
    // conditional branch to the shared return label.
    let mut entry = BasicBlock::new(Some(entry_label));
    for inst in &window.insts {
        if inst.opcode.is_cfi() || inst.opcode.is_pseudo() {
            continue;
        }
        let mut copied = inst.clone();
        if copied.opcode.is_conditional_branch()
            && let Some(label) = return_label
        {
            for op in &mut copied.operands {
                if matches!(op, Operand::Sym(_)) {
                    *op = Operand::Sym(label);
                }
            }
        }
        entry.instructions.push(copied);
    }

    if let Some(label) = return_label {
        let mut ret_block = BasicBlock::new(Some(label));
        ret_block.instructions.push(make_return());
        entry.successors.push(crate::program::SuccessorEdge { target: 1, count: 0 });
        function.blocks.push(entry);
        function.blocks.push(ret_block);
    } else {
        entry.instructions.push(make_return());
        function.blocks.push(entry);
    }

    // Displacement fixup runs before the prologue exists.
    let byte_fix = if any_sandwich { BYTE_FIX_SANDWICH } else { BYTE_FIX_CALL };
    let fixed = fix_stack_offsets(function, byte_fix);

    let needs_lr = window.insts.iter().any(|inst| inst.opcode.is_call());
    let uses_fp = window.insts.iter().any(|inst| inst.uses_reg(Reg::FP));
    let mid_body_cond_branch = {
        let entry = &function.blocks[0];
        entry
            .instructions
            .iter()
            .enumerate()
            .any(|(i, inst)| {
                inst.opcode.is_conditional_branch() && i + 1 != entry.len()
            })
    };

    // Nothing touches the frame: leave the function as `body; ret`.
    if fixed == 0 && !needs_lr && !uses_fp && !mid_body_cond_branch {
        return Some(func_idx);
    }

    let entry = &mut function.blocks[0];
    entry.instructions.insert(0, make_push_pair(Reg::FP, Reg::LR));

    if try_tail_call(function) {
        return Some(func_idx);
    }

    // Epilogue goes immediately before the first return in layout order, so
    // both the fallthrough and the redirected-branch path restore the pair.
    'insert: for block in &mut function.blocks {
        for idx in 0..block.len() {
            if block.instructions[idx].opcode.is_return() {
                block.instructions.insert(idx, make_pop_pair(Reg::FP, Reg::LR));
                break 'insert;
            }
        }
    }

    Some(func_idx)
}

/// Add `byte_fix / scale` to the displacement of every SP-based memory
/// access and every non-SP-defining add/sub against SP. Returns the number
/// of instructions adjusted.
pub fn fix_stack_offsets(function: &mut Function, byte_fix: i64) -> usize {
    let mut fixed = 0usize;
    for block in &mut function.blocks {
        for inst in &mut block.instructions {
            let is_load_store = inst.opcode.may_load() || inst.opcode.may_store();
            let is_sp_add_sub = !is_load_store
                && is_add_sub(inst.opcode)
                && inst.uses_reg(Reg::SP)
                && !inst.defines_reg(Reg::SP);
            if !is_load_store && !is_sp_add_sub {
                continue;
            }

            let scale = if is_load_store { memory_scale(inst.opcode) } else { 1 };
            if byte_fix % scale != 0 {
                tracing::warn!(
                    mnemonic = inst.opcode.mnemonic(),
                    byte_fix,
                    scale,
                    "stack fix not divisible by access scale"
                );
            }
            let adjustment = byte_fix / scale;

            let Some(sp_idx) = inst
                .operands
                .iter()
                .position(|op| op.as_reg() == Some(Reg::SP))
            else {
                continue;
            };
            if is_load_store {
                if let Some(Operand::Imm(value)) = inst.operands.get_mut(sp_idx + 1) {
                    *value += adjustment;
                    fixed += 1;
                }
            } else if let Some(Operand::Imm(value)) = inst
                .operands
                .iter_mut()
                .skip(sp_idx + 1)
                .find(|op| matches!(op, Operand::Imm(_)))
            {
                *value += adjustment;
                fixed += 1;
            }
        }
    }
    fixed
}

/// Rewrite a trailing `call target; ret` into a direct branch. Fires only
/// when the body has no SP-relative accesses, whose displacements assume
/// the frame stays live across the body.
fn try_tail_call(function: &mut Function) -> bool {
    let entry = &mut function.blocks[0];
    if entry.len() < 2 {
        return false;
    }
    let last = entry.len() - 1;
    if !entry.instructions[last].opcode.is_return()
        || !entry.instructions[last - 1].opcode.is_call()
    {
        return false;
    }
    let touches_stack = entry.instructions[..last]
        .iter()
        .any(|inst| !is_push(inst.opcode) && inst.mentions_reg(Reg::SP));
    if touches_stack {
        return false;
    }

    let call = &entry.instructions[last - 1];
    if call.opcode.is_indirect_call() {
        entry.instructions.remove(last);
        return true;
    }
    let Some(target) = call.target_sym() else {
        return false;
    };
    entry.instructions[last - 1] = make_unconditional_branch(target);
    entry.instructions.remove(last);
    true
}

/// Late shrink-wrap pass: a synthesized function that no longer contains a
/// call does not need its FP/LR frame, unless the body's displacements were
/// rewritten against it.
pub fn shrink_wrap(function: &mut Function) {
    let has_call = function
        .blocks
        .iter()
        .any(|bb| bb.instructions.iter().any(|inst| inst.opcode.is_call()));
    if has_call {
        return;
    }
    let body_uses_sp = function.blocks.iter().any(|bb| {
        bb.instructions.iter().any(|inst| {
            !is_push(inst.opcode) && !is_pop(inst.opcode) && inst.mentions_reg(Reg::SP)
        })
    });
    if body_uses_sp {
        return;
    }

    for block in &mut function.blocks {
        if block.instructions.first().is_some_and(|inst| is_push(inst.opcode)) {
            block.instructions.remove(0);
        }
        if let Some(ret_idx) =
            block.instructions.iter().position(|inst| inst.opcode.is_return())
            && ret_idx > 0
            && is_pop(block.instructions[ret_idx - 1].opcode)
        {
            block.instructions.remove(ret_idx - 1);
        }
    }
}
