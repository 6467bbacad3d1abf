//! End-to-end evaluator behavior: left-to-right arithmetic, enfix
//! discipline, invisibility, barriers, isotopes, and the variadic feed.

mod common;

use common::{IntWordScanner, TestEnv};
use mica_core::{Cell, CellFlags, Kind};
use mica_runtime::{
    FeedComponent, RaiseError, Sigmask, Specifier, apply_action, eval_array, eval_expression,
    eval_feed, reeval, signal,
};
use serial_test::serial;

#[test]
#[serial]
fn test_arithmetic_is_left_to_right_without_precedence() {
    let mut env = TestEnv::new();
    // 1 + 2 * 3 groups as (1 + 2) * 3
    let source = vec![
        Cell::integer(1),
        env.word("+"),
        Cell::integer(2),
        env.word("*"),
        Cell::integer(3),
    ];
    let result = env.eval(source).unwrap();
    assert_eq!(result.as_integer(), Some(9));
}

#[test]
#[serial]
fn test_enfix_completes_inside_a_prefix_argument() {
    let mut env = TestEnv::new();
    // negate 1 + 2 is negate (1 + 2): the operator finishes the
    // expression being gathered for negate's argument.
    let source = vec![
        env.word("negate"),
        Cell::integer(1),
        env.word("+"),
        Cell::integer(2),
    ];
    let result = env.eval(source).unwrap();
    assert_eq!(result.as_integer(), Some(-3));
}

#[test]
#[serial]
fn test_left_associative_chain() {
    let mut env = TestEnv::new();
    // 8 - 4 - 2 groups as (8 - 4) - 2
    let source = vec![
        Cell::integer(8),
        env.word("-"),
        Cell::integer(4),
        env.word("-"),
        Cell::integer(2),
    ];
    assert_eq!(env.eval(source).unwrap().as_integer(), Some(2));
}

#[test]
#[serial]
fn test_right_associative_chain() {
    let mut env = TestEnv::new();
    // 8 -- 4 -- 2 groups as 8 -- (4 -- 2)
    let source = vec![
        Cell::integer(8),
        env.word("--"),
        Cell::integer(4),
        env.word("--"),
        Cell::integer(2),
    ];
    assert_eq!(env.eval(source).unwrap().as_integer(), Some(6));
}

#[test]
#[serial]
fn test_invisible_comment_preserves_enfix_grouping() {
    let mut env = TestEnv::new();
    // 1 + comment "hi" 2 * 3 is still (1 + 2) * 3
    let text = env.m.heap.alloc_text("hi").unwrap();
    let source = vec![
        Cell::integer(1),
        env.word("+"),
        env.word("comment"),
        Cell::series(Kind::Text, text, 0),
        Cell::integer(2),
        env.word("*"),
        Cell::integer(3),
    ];
    let result = env.eval(source).unwrap();
    assert_eq!(result.as_integer(), Some(9));
}

#[test]
#[serial]
fn test_invisible_only_expression_leaves_output_intact() {
    let mut env = TestEnv::new();
    let text = env.m.heap.alloc_text("x").unwrap();
    let comment = env.word("comment");
    let array = env.bind(vec![comment, Cell::series(Kind::Text, text, 0)]);
    let feed = env
        .m
        .push_array_feed(array, 0, Specifier::Specified)
        .unwrap();

    let mut out = Cell::integer(42);
    out.set_flag(CellFlags::NEWLINE_BEFORE);
    let before = out.clone();
    let produced = eval_expression(&mut env.m, feed, &mut out, false).unwrap();
    assert!(!produced);
    assert_eq!(out, before);
    assert_eq!(out.flags(), before.flags());
    env.m.pop_feed(feed);
}

#[test]
#[serial]
fn test_heavy_null_stops_else_from_running() {
    let mut env = TestEnv::new();
    // if true [null] else [10] -- the branch ran, so else must not.
    let null_block = env.block(vec![]);
    let ten_block = env.block(vec![Cell::integer(10)]);
    let source = vec![
        env.word("if"),
        env.word("true"),
        null_block,
        env.word("else"),
        ten_block,
    ];
    let result = env.eval(source).unwrap();
    assert_eq!(result, Cell::nulled());
}

#[test]
#[serial]
fn test_else_runs_after_failed_condition() {
    let mut env = TestEnv::new();
    let one_block = env.block(vec![Cell::integer(1)]);
    let ten_block = env.block(vec![Cell::integer(10)]);
    let source = vec![
        env.word("if"),
        env.word("false"),
        one_block,
        env.word("else"),
        ten_block,
    ];
    let result = env.eval(source).unwrap();
    assert_eq!(result.as_integer(), Some(10));
}

#[test]
#[serial]
fn test_then_chains_on_produced_values() {
    let mut env = TestEnv::new();
    let one_block = env.block(vec![Cell::integer(1)]);
    let twenty_block = env.block(vec![Cell::integer(20)]);
    let source = vec![
        env.word("if"),
        env.word("true"),
        one_block,
        env.word("then"),
        twenty_block,
    ];
    let result = env.eval(source).unwrap();
    assert_eq!(result.as_integer(), Some(20));
}

#[test]
#[serial]
fn test_deferred_enfix_mid_argument_is_an_error() {
    let mut env = TestEnv::new();
    // if true else [...] -- else defers while the condition is being
    // gathered, but the branch argument is still owed.
    let fallback = env.block(vec![Cell::integer(1)]);
    let source = vec![env.word("if"), env.word("true"), env.word("else"), fallback];
    let err = env.eval(source).unwrap_err();
    assert_eq!(err, RaiseError::DeferredEnfix);
}

#[test]
#[serial]
fn test_assignment_decays_branch_isotope() {
    let mut env = TestEnv::new();
    // x: if true [null] -- x holds a plain null afterwards.
    let null_block = env.block(vec![]);
    let source = vec![env.setter("x"), env.word("if"), env.word("true"), null_block];
    let array = {
        // Collect x into the user context so the set-word has a home.
        let x = env.m.heap.intern("x").unwrap();
        env.m.heap.append_key(env.ctx, x, Cell::voided());
        env.bind(source)
    };
    let result = eval_array(&mut env.m, array, Specifier::Specified).unwrap();
    assert!(result.is_heavy_null());

    let x = env.m.heap.intern("x").unwrap();
    let index = env.m.heap.find_index(env.ctx, x).unwrap();
    let stored = env.m.heap.var(env.ctx, index);
    assert!(stored.is_nulled());
    assert!(!stored.is_heavy_null());
}

#[test]
#[serial]
fn test_commas_are_invisible_barriers() {
    let mut env = TestEnv::new();
    let source = vec![
        Cell::integer(1),
        Cell::comma(),
        Cell::integer(2),
        Cell::comma(),
        Cell::integer(3),
    ];
    let result = env.eval(source).unwrap();
    assert_eq!(result.as_integer(), Some(3));
}

#[test]
#[serial]
fn test_barrier_inside_argument_gather_is_missing_argument() {
    let mut env = TestEnv::new();
    // negate , 1 -- the comma stands between negate and its argument.
    let source = vec![env.word("negate"), Cell::comma(), Cell::integer(1)];
    let err = env.eval(source).unwrap_err();
    assert!(matches!(
        err,
        RaiseError::MissingArgument { ref label, ref param }
            if label.as_deref() == Some("negate") && param == "value"
    ));
}

#[test]
#[serial]
fn test_empty_group_is_a_barrier() {
    let mut env = TestEnv::new();
    let empty = env.group(vec![]);
    let source = vec![env.word("negate"), empty, Cell::integer(1)];
    let err = env.eval(source).unwrap_err();
    assert!(matches!(err, RaiseError::MissingArgument { .. }));
}

#[test]
#[serial]
fn test_group_evaluates_and_regroups() {
    let mut env = TestEnv::new();
    // 2 * (3 + 4)
    let plus = env.word("+");
    let inner = env.group(vec![Cell::integer(3), plus, Cell::integer(4)]);
    let source = vec![Cell::integer(2), env.word("*"), inner];
    assert_eq!(env.eval(source).unwrap().as_integer(), Some(14));
}

#[test]
#[serial]
fn test_missing_argument_at_feed_end() {
    let mut env = TestEnv::new();
    let source = vec![Cell::integer(1), env.word("+")];
    let err = env.eval(source).unwrap_err();
    assert!(matches!(err, RaiseError::MissingArgument { .. }));
}

#[test]
#[serial]
fn test_variadic_feed_mixes_text_and_cells() {
    let mut env = TestEnv::new();
    env.m.scanner = Some(Box::new(IntWordScanner));
    // "1" , cell 2 , "3" -- the last value falls out.
    let feed = env
        .m
        .push_variadic_feed(
            vec![
                FeedComponent::Text("1".into()),
                FeedComponent::Cell(Cell::integer(2)),
                FeedComponent::Text("3".into()),
            ],
            Specifier::Specified,
            0,
            None,
        )
        .unwrap();
    let result = eval_feed(&mut env.m, feed).unwrap();
    env.m.pop_feed(feed);
    assert_eq!(result.as_integer(), Some(3));
}

#[test]
#[serial]
fn test_variadic_feed_evaluates_scanned_operators() {
    let mut env = TestEnv::new();
    env.m.scanner = Some(Box::new(IntWordScanner));
    // Text scanned against the user context participates in evaluation.
    let feed = env
        .m
        .push_variadic_feed(
            vec![
                FeedComponent::Cell(Cell::integer(5)),
                FeedComponent::Text("+ 2".into()),
            ],
            Specifier::Specified,
            0,
            Some(env.ctx),
        )
        .unwrap();
    let result = eval_feed(&mut env.m, feed).unwrap();
    env.m.pop_feed(feed);
    assert_eq!(result.as_integer(), Some(7));
}

#[test]
#[serial]
fn test_apply_rejects_residue() {
    let mut env = TestEnv::new();
    let negate = env.m.heap.intern("negate").unwrap();
    let index = env.m.heap.find_index(env.ctx, negate).unwrap();
    let action = env.m.heap.var(env.ctx, index).as_action().unwrap();

    let array = env.bind(vec![Cell::integer(1), Cell::integer(2)]);
    let feed = env
        .m
        .push_array_feed(array, 0, Specifier::Specified)
        .unwrap();
    let err = apply_action(
        &mut env.m,
        feed,
        action,
        mica_core::Binding::Unbound,
        None,
    )
    .unwrap_err();
    env.m.pop_feed(feed);
    assert_eq!(err, RaiseError::ApplyTooMany);
}

#[test]
#[serial]
fn test_reeval_treats_value_as_fetched() {
    let mut env = TestEnv::new();
    // Re-evaluating `2` against a feed holding `+ 3` computes 2 + 3.
    let plus = env.word("+");
    let array = env.bind(vec![plus, Cell::integer(3)]);
    let feed = env
        .m
        .push_array_feed(array, 0, Specifier::Specified)
        .unwrap();
    let mut out = Cell::voided();
    reeval(&mut env.m, feed, &Cell::integer(2), &mut out).unwrap();
    env.m.pop_feed(feed);
    assert_eq!(out.as_integer(), Some(5));
}

#[test]
#[serial]
fn test_runaway_recursion_overflows_cleanly() {
    let mut env = TestEnv::new();
    env.m.config.eval_depth_limit = 32;
    env.install_recur();
    let source = vec![env.word("recur")];
    let err = env.eval(source).unwrap_err();
    assert!(matches!(err, RaiseError::StackOverflow { .. }));
}

#[test]
#[serial]
fn test_halt_signal_interrupts_evaluation() {
    let mut env = TestEnv::new();
    env.m.config.tick_interval = 1;
    signal::take();
    signal::request(Sigmask::HALT);
    let err = env.eval(vec![Cell::integer(1)]).unwrap_err();
    assert_eq!(err, RaiseError::Halted);
    signal::take();
}

#[test]
#[serial]
fn test_quoted_value_sheds_one_level() {
    let mut env = TestEnv::new();
    let mut quoted = Cell::integer(7);
    assert!(quoted.try_quotify_inline(2));
    let result = env.eval(vec![quoted]).unwrap();
    assert_eq!(result.quote_depth(), 1);
    assert_eq!(result.heart(), Kind::Integer);
}

#[test]
#[serial]
fn test_hard_quote_takes_the_cell_verbatim() {
    let mut env = TestEnv::new();
    // quote negate -- the word arrives unevaluated.
    let source = vec![env.word("quote"), env.word("negate")];
    let result = env.eval(source).unwrap();
    let (symbol, _) = result.word_parts().unwrap();
    assert_eq!(env.m.heap.spelling_of(symbol), "negate");
    assert!(result.has_flag(CellFlags::UNEVALUATED));
}

#[test]
#[serial]
fn test_soft_quote_escapes_groups() {
    let mut env = TestEnv::new();
    // lit foo is the word itself; lit (1 + 2) evaluates the group.
    let source = vec![env.word("lit"), env.word("negate")];
    let result = env.eval(source).unwrap();
    assert!(result.word_parts().is_some());

    let plus = env.word("+");
    let group = env.group(vec![Cell::integer(1), plus, Cell::integer(2)]);
    let source = vec![env.word("lit"), group];
    let result = env.eval(source).unwrap();
    assert_eq!(result.as_integer(), Some(3));
}

#[test]
#[serial]
fn test_skippable_left_accepts_matching_kind() {
    let mut env = TestEnv::new();
    env.install_maybe_op();
    let source = vec![Cell::integer(10), env.word("?+"), Cell::integer(2)];
    assert_eq!(env.eval(source).unwrap().as_integer(), Some(12));
}

#[test]
#[serial]
fn test_skippable_left_declines_other_kinds() {
    let mut env = TestEnv::new();
    env.install_maybe_op();
    // A logic left is not accepted: the lookahead is abandoned, and the
    // operator word then heads an expression with no left at all.
    let source = vec![env.word("true"), env.word("?+"), Cell::integer(2)];
    let err = env.eval(source).unwrap_err();
    assert!(matches!(err, RaiseError::MissingArgument { .. }));
}

#[test]
#[serial]
fn test_refinements_fulfill_in_callsite_order() {
    let mut env = TestEnv::new();
    let adjust = env.m.heap.intern("adjust").unwrap();
    let scale = env.m.heap.intern("scale").unwrap();
    let flip = env.m.heap.intern("flip").unwrap();
    let index = env.m.heap.find_index(env.ctx, adjust).unwrap();

    // adjust/scale 10 3 -- declaration order.
    let path_cells = vec![
        Cell::bound_word(Kind::Word, adjust, env.ctx, index),
        Cell::word(Kind::Word, scale),
    ];
    let path_array = env.m.heap.alloc_array(path_cells).unwrap();
    let path = Cell::series(Kind::Path, path_array.series(), 0);
    let result = env
        .eval(vec![path, Cell::integer(10), Cell::integer(3)])
        .unwrap();
    assert_eq!(result.as_integer(), Some(30));

    // adjust/flip/scale 10 3 -- scale is requested out of declaration
    // order and fulfilled in a pickups pass, still from the feed.
    let path_cells = vec![
        Cell::bound_word(Kind::Word, adjust, env.ctx, index),
        Cell::word(Kind::Word, flip),
        Cell::word(Kind::Word, scale),
    ];
    let path_array = env.m.heap.alloc_array(path_cells).unwrap();
    let path = Cell::series(Kind::Path, path_array.series(), 0);
    let result = env
        .eval(vec![path, Cell::integer(10), Cell::integer(3)])
        .unwrap();
    assert_eq!(result.as_integer(), Some(-30));
}

#[test]
#[serial]
fn test_unknown_refinement_is_refused() {
    let mut env = TestEnv::new();
    let adjust = env.m.heap.intern("adjust").unwrap();
    let bogus = env.m.heap.intern("bogus").unwrap();
    let index = env.m.heap.find_index(env.ctx, adjust).unwrap();
    let path_cells = vec![
        Cell::bound_word(Kind::Word, adjust, env.ctx, index),
        Cell::word(Kind::Word, bogus),
    ];
    let path_array = env.m.heap.alloc_array(path_cells).unwrap();
    let path = Cell::series(Kind::Path, path_array.series(), 0);
    let err = env.eval(vec![path, Cell::integer(1)]).unwrap_err();
    assert!(matches!(err, RaiseError::UnboundWord { .. }));
}

#[test]
#[serial]
fn test_bad_branch_type_is_reported() {
    let mut env = TestEnv::new();
    let source = vec![env.word("if"), env.word("true"), Cell::integer(3)];
    let err = env.eval(source).unwrap_err();
    assert!(matches!(
        err,
        RaiseError::BadBranchType { kind: Kind::Integer }
    ));
}
