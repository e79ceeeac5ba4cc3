//! End-to-end scenarios for the post-link outlining pass, driven through
//! listing fixtures.

use plo::test_harness::*;
use plo::{Opcode, OutlineOptions};

/// Three exact copies of a pure four-instruction sequence, separated by
/// unique filler so no sliding window straddles two copies with the same
/// shape. The function saves LR up front and calls a helper, so every
/// rewritten site can use a bare call.
const PURE_TRIPLE: &str = "func f {\n\
   stp x29, x30, [sp, #-16]!\n\
   mov x0, #1\n\
   mov x1, #2\n\
   add x2, x0, x1\n\
   mul x3, x0, x1\n\
   mov x4, #77\n\
   mov x0, #1\n\
   mov x1, #2\n\
   add x2, x0, x1\n\
   mul x3, x0, x1\n\
   mov x5, #88\n\
   mov x0, #1\n\
   mov x1, #2\n\
   add x2, x0, x1\n\
   mul x3, x0, x1\n\
   bl helper\n\
   ldp x29, x30, [sp], #16\n\
   ret\n\
 }\n\
 func helper {\n\
   ret\n\
 }\n";

#[test]
fn disabled_pass_leaves_the_program_unchanged() {
    let mut program = fixture(PURE_TRIPLE);
    let before = program.to_listing();
    let opts = OutlineOptions::from_flags("enable-post-link-outlining = false\n").unwrap();
    let stats = run_pass(&mut program, opts);
    assert_eq!(program.to_listing(), before);
    assert_eq!(stats.functions_synthesized, 0);
    assert!(outlined_functions(&program).is_empty());
}

#[test]
fn pure_triple_is_outlined_into_bare_calls() {
    let mut program = fixture(PURE_TRIPLE);
    let window: Vec<plo::Instruction> = {
        let f = program.function_by_name("f").unwrap();
        f.blocks[0].instructions[1..5].to_vec()
    };

    let stats = run_pass(&mut program, OutlineOptions::default());

    let outlined = outlined_functions(&program);
    assert_eq!(outlined.len(), 1);
    assert_eq!(outlined[0].name, "PLO_outlined_1");
    // Pure body: four instructions plus a bare return, 20 bytes.
    assert_eq!(byte_size(outlined[0]), 20);
    assert_eq!(count_opcode(outlined[0], Opcode::StpXpre), 0);

    assert_eq!(count_calls_to(&program, "PLO_outlined_1"), 3);
    assert_eq!(stats.call_sites_rewritten, 3);
    // No instruction of any occurrence survives in the caller.
    assert_none_remain(&program, "f", &window);

    // Net effect shrinks the program.
    let total: usize = program
        .functions()
        .iter()
        .filter(|f| !f.ignored)
        .map(byte_size)
        .sum();
    assert!(total < 19 * 4, "expected a net size win, got {total} bytes");
}

#[test]
fn sp_based_stores_disqualify_a_window() {
    // Same shape as the pure triple, but the last instruction of each copy
    // stores through SP: the safety filter must refuse to outline it.
    let mut program = fixture(
        "func f {\n\
           stp x29, x30, [sp, #-16]!\n\
           mov x0, #1\n\
           mov x1, #2\n\
           add x2, x0, x1\n\
           stp x0, x1, [sp, #16]\n\
           mov x4, #77\n\
           mov x0, #1\n\
           mov x1, #2\n\
           add x2, x0, x1\n\
           stp x0, x1, [sp, #16]\n\
           mov x5, #88\n\
           mov x0, #1\n\
           mov x1, #2\n\
           add x2, x0, x1\n\
           stp x0, x1, [sp, #16]\n\
           bl helper\n\
           ldp x29, x30, [sp], #16\n\
           ret\n\
         }\n\
         func helper {\n\
           ret\n\
         }\n",
    );
    let stats = run_pass(&mut program, OutlineOptions::default());
    // The three-instruction prefix [mov; mov; add] is still fair game, so
    // only assert that no window containing the store was taken.
    for f in outlined_functions(&program) {
        assert_eq!(count_opcode(f, Opcode::StpXi), 0);
    }
    assert!(stats.windows_rejected > 0);
}

#[test]
fn leaf_sites_get_the_sandwich_and_lr_saving_sites_do_not() {
    let mut program = fixture(
        "func leaf {\n\
           mov x0, #1\n\
           mov x1, #2\n\
           mov x2, #3\n\
           mov x3, #4\n\
           add x4, x0, x1\n\
           add x5, x2, x3\n\
           mul x6, x4, x5\n\
           add x7, x6, x6\n\
           mov x9, #77\n\
           mov x0, #1\n\
           mov x1, #2\n\
           mov x2, #3\n\
           mov x3, #4\n\
           add x4, x0, x1\n\
           add x5, x2, x3\n\
           mul x6, x4, x5\n\
           add x7, x6, x6\n\
           ret\n\
         }\n\
         func saver {\n\
           stp x29, x30, [sp, #-16]!\n\
           mov x10, #1\n\
           mov x11, #2\n\
           mov x12, #3\n\
           mov x13, #4\n\
           sub x14, x10, x11\n\
           sub x15, x12, x13\n\
           mul x16, x14, x15\n\
           sub x17, x16, x16\n\
           mov x9, #88\n\
           mov x10, #1\n\
           mov x11, #2\n\
           mov x12, #3\n\
           mov x13, #4\n\
           sub x14, x10, x11\n\
           sub x15, x12, x13\n\
           mul x16, x14, x15\n\
           sub x17, x16, x16\n\
           bl helper\n\
           ldp x29, x30, [sp], #16\n\
           ret\n\
         }\n\
         func helper {\n\
           ret\n\
         }\n",
    );
    run_pass(&mut program, OutlineOptions::default());

    let outlined = outlined_functions(&program);
    assert_eq!(outlined.len(), 2);

    // Leaf caller: every site is wrapped push/call/pop.
    let leaf = listing_of(&program, "leaf");
    assert_contains_seq(
        &leaf,
        &[
            "stp x29, x30, [sp, #-16]!",
            "bl PLO_outlined_1",
            "ldp x29, x30, [sp], #16",
        ],
    );
    let leaf_fn = program.function_by_name("leaf").unwrap();
    assert_eq!(count_opcode(leaf_fn, Opcode::StpXpre), 2);
    assert_eq!(count_opcode(leaf_fn, Opcode::LdpXpost), 2);

    // LR-saving caller: single bare calls, only the original frame pair.
    let saver_fn = program.function_by_name("saver").unwrap();
    assert_eq!(count_calls_to(&program, "PLO_outlined_2"), 2);
    assert_eq!(count_opcode(saver_fn, Opcode::StpXpre), 1);
    assert_eq!(count_opcode(saver_fn, Opcode::LdpXpost), 1);
}

#[test]
fn stack_reading_windows_get_prologue_and_fixed_offsets() {
    let mut program = fixture(
        "func f {\n\
           stp x29, x30, [sp, #-16]!\n\
           ldr x0, [sp, #8]\n\
           ldr x1, [sp, #16]\n\
           add x0, x0, x1\n\
           mul x2, x0, x0\n\
           mov x4, #77\n\
           ldr x0, [sp, #8]\n\
           ldr x1, [sp, #16]\n\
           add x0, x0, x1\n\
           mul x2, x0, x0\n\
           mov x5, #88\n\
           ldr x0, [sp, #8]\n\
           ldr x1, [sp, #16]\n\
           add x0, x0, x1\n\
           mul x2, x0, x0\n\
           bl helper\n\
           ldp x29, x30, [sp], #16\n\
           ret\n\
         }\n\
         func helper {\n\
           ret\n\
         }\n",
    );
    run_pass(&mut program, OutlineOptions::default());

    let outlined = outlined_functions(&program);
    assert_eq!(outlined.len(), 1);
    // Bare-call body: displacements compensate the 16-byte callee frame.
    assert_eq!(
        listing_of(&program, "PLO_outlined_1"),
        vec![
            "stp x29, x30, [sp, #-16]!",
            "ldr x0, [sp, #24]",
            "ldr x1, [sp, #32]",
            "add x0, x0, x1",
            "mul x2, x0, x0",
            "ldp x29, x30, [sp], #16",
            "ret",
        ]
    );
    assert_eq!(count_calls_to(&program, "PLO_outlined_1"), 3);
}

#[test]
fn hot_blocks_are_skipped_under_profile_filtering() {
    let src = "func f {\n\
               entry:\n\
                 stp x29, x30, [sp, #-16]!\n\
                 bl helper\n\
               hot: count=100\n\
                 mov x0, #1\n\
                 mov x1, #2\n\
                 add x2, x0, x1\n\
                 mul x3, x0, x1\n\
               cold: count=1\n\
                 mov x0, #1\n\
                 mov x1, #2\n\
                 add x2, x0, x1\n\
                 mul x3, x0, x1\n\
               exit:\n\
                 ldp x29, x30, [sp], #16\n\
                 ret\n\
               }\n\
               func helper {\n\
                 ret\n\
               }\n";

    // Without PGO both copies are fair game and the pair is profitable.
    let mut program = fixture(src);
    run_pass(&mut program, OutlineOptions::default());
    assert_eq!(outlined_functions(&program).len(), 1);

    // With PGO the hot copy is invisible and the solo cold copy is below
    // the profitability bar.
    let mut program = fixture(src);
    let before = program.to_listing();
    let opts = OutlineOptions { pgo: true, ..OutlineOptions::default() };
    let stats = run_pass(&mut program, opts);
    assert!(outlined_functions(&program).is_empty());
    assert_eq!(program.to_listing(), before);
    assert!(stats.groups_rejected > 0);
}

#[test]
fn hot_functions_are_excluded_under_profile_filtering() {
    let src = "func hotf count=100 {\n\
                 stp x29, x30, [sp, #-16]!\n\
                 mov x0, #1\n\
                 mov x1, #2\n\
                 add x2, x0, x1\n\
                 mul x3, x0, x1\n\
                 mov x4, #77\n\
                 mov x0, #1\n\
                 mov x1, #2\n\
                 add x2, x0, x1\n\
                 mul x3, x0, x1\n\
                 bl helper\n\
                 ldp x29, x30, [sp], #16\n\
                 ret\n\
               }\n\
               func helper {\n\
                 ret\n\
               }\n";
    let mut program = fixture(src);
    let before = program.to_listing();
    let opts = OutlineOptions { pgo: true, ..OutlineOptions::default() };
    run_pass(&mut program, opts);
    assert_eq!(program.to_listing(), before);

    // The unprofiled twin is treated as cold and outlined.
    let mut program = fixture(&src.replace("func hotf count=100", "func coldf"));
    let opts = OutlineOptions { pgo: true, ..OutlineOptions::default() };
    run_pass(&mut program, opts);
    assert_eq!(outlined_functions(&program).len(), 1);
}

#[test]
fn cross_block_occurrences_are_rewritten() {
    let mut program = fixture(
        "func f {\n\
         entry:\n\
           stp x29, x30, [sp, #-16]!\n\
           bl helper\n\
         a:\n\
           mov x0, #1\n\
           mov x1, #2\n\
           mov x2, #3\n\
         b:\n\
           cbz x0, out\n\
         c:\n\
           mov x0, #1\n\
           mov x1, #2\n\
           mov x2, #3\n\
         d:\n\
           cbz x0, out\n\
         e:\n\
           mov x0, #1\n\
           mov x1, #2\n\
           mov x2, #3\n\
         g:\n\
           cbz x0, out\n\
         out:\n\
           ldp x29, x30, [sp], #16\n\
           ret\n\
         }\n\
         func helper {\n\
           ret\n\
         }\n",
    );
    run_pass(&mut program, OutlineOptions::default());

    let outlined = outlined_functions(&program);
    assert_eq!(outlined.len(), 1);
    // Body: three moves plus the branch redirected to a local return label,
    // with a second block holding the shared return.
    assert_eq!(outlined[0].blocks.len(), 2);
    let body = listing_of(&program, "PLO_outlined_1");
    assert_eq!(body.len(), 5);
    assert!(body[3].starts_with("cbz x0, outlined_return"));
    assert_eq!(body[4], "ret");

    assert_eq!(count_calls_to(&program, "PLO_outlined_1"), 3);
    // The covered blocks are emptied of the window's residue.
    let f = program.function_by_name("f").unwrap();
    for label in ["b", "d", "g"] {
        let sym = program.symbols.get(label).unwrap();
        let idx = f.block_by_label(sym).unwrap();
        assert!(f.blocks[idx].is_empty(), "block {label} still has instructions");
    }
}

#[test]
fn trailing_call_windows_become_tail_branches() {
    let mut program = fixture(
        "func f {\n\
           stp x29, x30, [sp, #-16]!\n\
           mov x0, #1\n\
           mov x1, #2\n\
           mov x2, #3\n\
           bl helper\n\
           mov x0, #1\n\
           mov x1, #2\n\
           mov x2, #3\n\
           bl helper\n\
           mov x0, #1\n\
           mov x1, #2\n\
           mov x2, #3\n\
           bl helper\n\
           ldp x29, x30, [sp], #16\n\
           ret\n\
         }\n\
         func helper {\n\
           ret\n\
         }\n",
    );
    run_pass(&mut program, OutlineOptions::default());

    let outlined = outlined_functions(&program);
    assert_eq!(outlined.len(), 1);
    // Tail-call optimization plus shrink-wrap leave a frameless forwarder.
    assert_eq!(
        listing_of(&program, "PLO_outlined_1"),
        vec!["mov x0, #1", "mov x1, #2", "mov x2, #3", "b helper"]
    );
    assert_eq!(count_calls_to(&program, "PLO_outlined_1"), 3);
}

#[test]
fn single_call_wrappers_are_inlined_away() {
    let mut program = fixture(
        "func caller1 {\n\
           bl PLO_outlined_1\n\
           ret\n\
         }\n\
         func caller2 {\n\
           bl PLO_outlined_1\n\
           ret\n\
         }\n\
         func foo {\n\
           ret\n\
         }\n\
         func PLO_outlined_1 {\n\
           stp x29, x30, [sp, #-16]!\n\
           bl foo\n\
           ldp x29, x30, [sp], #16\n\
           ret\n\
         }\n",
    );
    let stats = run_pass(&mut program, OutlineOptions::default());

    assert_eq!(stats.wrappers_inlined, 1);
    assert_eq!(count_calls_to(&program, "foo"), 2);
    assert_eq!(count_calls_to(&program, "PLO_outlined_1"), 0);
    assert!(!program.to_listing().contains("PLO_outlined_1"));
}

#[test]
fn pass_output_is_deterministic() {
    let mut first = fixture(PURE_TRIPLE);
    run_pass(&mut first, OutlineOptions::default());

    let mut second = fixture(PURE_TRIPLE);
    run_pass(&mut second, OutlineOptions::default());

    assert_eq!(first.to_listing(), second.to_listing());
}

#[test]
fn empty_program_is_handled() {
    let mut program = fixture("");
    let stats = run_pass(&mut program, OutlineOptions::default());
    assert_eq!(stats.episodes, 0);
    assert_eq!(program.to_listing(), "");
}

#[test]
fn unprofitable_programs_are_untouched() {
    let mut program = fixture(
        "func f {\n\
           mov x0, #1\n\
           mov x1, #2\n\
           ret\n\
         }\n",
    );
    let before = program.to_listing();
    run_pass(&mut program, OutlineOptions::default());
    assert_eq!(program.to_listing(), before);
}
