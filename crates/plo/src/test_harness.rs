//! Test harness for plo unit and integration tests.
//!
//! Provides fixture parsing, pass invocation shorthands and assertion
//! helpers over listings and instruction sequences.
//!
//! # Example
//!
//! ```rust
//! use plo::test_harness::*;
//! use plo::OutlineOptions;
//!
//! let mut program = fixture(
//!     "func f {\n\
//!        mov x0, #1\n\
//!        mov x1, #2\n\
//!        ret\n\
//!      }\n",
//! );
//! let stats = run_pass(&mut program, OutlineOptions::default());
//! assert_eq!(stats.functions_synthesized, 0);
//! ```

#![allow(clippy::missing_panics_doc, clippy::must_use_candidate)]

use crate::program::{Function, Instruction, Opcode, format_instruction};
use crate::{OutlineOptions, OutliningPass, PassStats, Program};

/// Parse a listing fixture, panicking on malformed input.
pub fn fixture(src: &str) -> Program {
    crate::program::parse_program(src).expect("valid fixture listing")
}

/// Run the outlining pass once over `program`.
pub fn run_pass(program: &mut Program, opts: OutlineOptions) -> PassStats {
    OutliningPass::new(opts).run(program).expect("pass never fails the host")
}

/// The non-ignored injected functions, in creation order.
pub fn outlined_functions(program: &Program) -> Vec<&Function> {
    program.functions().iter().filter(|f| f.injected && !f.ignored).collect()
}

/// Format every instruction of a function, block by block, in layout order.
pub fn listing_of(program: &Program, name: &str) -> Vec<String> {
    let function = program
        .function_by_name(name)
        .unwrap_or_else(|| panic!("no function named '{name}'"));
    function
        .blocks
        .iter()
        .flat_map(|bb| {
            bb.instructions.iter().map(|inst| format_instruction(inst, &program.symbols))
        })
        .collect()
}

/// Number of direct calls to `callee` across the whole program.
pub fn count_calls_to(program: &Program, callee: &str) -> usize {
    let Some(target) = program.symbols.get(callee) else {
        return 0;
    };
    program
        .functions()
        .iter()
        .filter(|f| !f.ignored)
        .flat_map(|f| &f.blocks)
        .flat_map(|bb| &bb.instructions)
        .filter(|inst| {
            inst.opcode.is_call()
                && !inst.opcode.is_indirect_call()
                && inst.target_sym() == Some(target)
        })
        .count()
}

/// Number of instructions with the given opcode in one function.
pub fn count_opcode(function: &Function, opcode: Opcode) -> usize {
    function
        .blocks
        .iter()
        .flat_map(|bb| &bb.instructions)
        .filter(|inst| inst.opcode == opcode)
        .count()
}

/// Total encoded byte size of a function (4 bytes per real instruction).
pub fn byte_size(function: &Function) -> usize {
    function
        .blocks
        .iter()
        .flat_map(|bb| &bb.instructions)
        .filter(|inst| !inst.opcode.is_pseudo() && !inst.opcode.is_cfi())
        .count()
        * 4
}

/// Assert that `haystack` contains `needle` as a contiguous subsequence.
pub fn assert_contains_seq(haystack: &[String], needle: &[&str]) {
    let found = !needle.is_empty()
        && haystack
            .windows(needle.len())
            .any(|w| w.iter().map(String::as_str).eq(needle.iter().copied()));
    assert!(
        found,
        "sequence not found.\nexpected:\n  {}\nactual:\n  {}",
        needle.join("\n  "),
        haystack.join("\n  ")
    );
}

/// Assert that no instruction of `instructions` appears in the function.
pub fn assert_none_remain(program: &Program, name: &str, instructions: &[Instruction]) {
    let function = program
        .function_by_name(name)
        .unwrap_or_else(|| panic!("no function named '{name}'"));
    for block in &function.blocks {
        for inst in &block.instructions {
            assert!(
                !instructions.contains(inst),
                "instruction survived rewriting: {}",
                format_instruction(inst, &program.symbols)
            );
        }
    }
}
