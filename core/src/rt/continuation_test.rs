use crate::block::{Block, Input};
use crate::error::EvalError;
use crate::val::Val;

use super::context::Continuation;
use super::test_support::*;

fn ring_with_k(body: Vec<Block>) -> Block {
    Block::reporter("reifyScript")
        .lambda_script(body)
        .input(Input::multi(vec![Input::text("k")]))
}

fn resume(target: Block, args: Vec<f64>) -> Block {
    Block::command("doRun")
        .arg(target)
        .input(Input::multi(args.into_iter().map(Input::num).collect()))
}

#[test]
fn command_continuation_exits_early() {
    let mut h = Harness::new();
    let top = green_flag(vec![
        log_text("in"),
        Block::command("doCallCC").arg(ring_with_k(vec![
            resume(Block::var("k"), Vec::new()),
            log_text("skipped"),
        ])),
        log_text("after"),
    ]);
    h.start(&top);
    h.run(10);
    assert_eq!(h.sprite.logged(), vec!["in", "after"]);
}

#[test]
fn command_continuation_not_called_falls_through() {
    let mut h = Harness::new();
    let top = green_flag(vec![
        Block::command("doCallCC").arg(ring_with_k(vec![log_text("body")])),
        log_text("after"),
    ]);
    h.start(&top);
    h.run(10);
    assert_eq!(h.sprite.logged(), vec!["body", "after"]);
}

#[test]
fn reporter_continuation_fills_the_pending_slot() {
    let mut h = Harness::new();
    let callcc = Block::reporter("reportCallCC").arg(ring_with_k(vec![
        resume(Block::var("k"), vec![5.0]),
        Block::command("doReport").num(3.0),
    ]));
    let top = green_flag(vec![log(sum(num(10.0), callcc))]);
    h.start(&top);
    h.run(10);
    assert_eq!(h.sprite.logged(), vec!["15"]);
}

#[test]
fn reporter_continuation_unused_keeps_the_reported_value() {
    let mut h = Harness::new();
    let callcc = Block::reporter("reportCallCC").arg(ring_with_k(vec![Block::command("doReport").num(3.0)]));
    let top = green_flag(vec![log(sum(num(10.0), callcc))]);
    h.start(&top);
    h.run(10);
    assert_eq!(h.sprite.logged(), vec!["13"]);
}

#[test]
fn continuation_resumes_only_once() {
    let mut h = Harness::new();
    h.sprite.variables().add_var("saved", Val::Nil);
    h.sprite.variables().add_var("count", Val::Num(0.0));
    let callcc = Block::reporter("reportCallCC").arg(ring_with_k(vec![
        set_var("saved", Block::var("k")),
        Block::command("doReport").num(1.0),
    ]));
    let top = green_flag(vec![
        log(sum(num(0.0), callcc)),
        change_var("count", 1.0),
        Block::command("doIf")
            .arg(Block::predicate("reportLessThan").arg(Block::var("count")).num(3.0))
            .script(vec![resume(Block::var("saved"), vec![7.0])]),
    ]);
    h.start(&top);
    h.run(20);
    assert_eq!(h.sprite.logged(), vec!["1", "7"]);
    assert_eq!(h.sprite.var("count"), Val::Num(2.0));
    assert_eq!(
        h.stage.error_messages(),
        vec!["ContinuationError\ncontinuation has already been resumed".to_string()]
    );
}

#[test]
fn taking_a_continuation_twice_fails() {
    let cont = Continuation::new(Vec::new(), false);
    assert!(!cont.is_spent());
    assert!(cont.take().is_ok());
    assert!(cont.is_spent());
    let err = cont.take().unwrap_err();
    assert_eq!(err.downcast_ref::<EvalError>(), Some(&EvalError::ContinuationSpent));
}

#[test]
fn continuations_cannot_be_launched() {
    let mut h = Harness::new();
    let top = green_flag(vec![Block::command("doCallCC").arg(ring_with_k(vec![Block::command("doLaunch").arg(Block::var("k"))]))]);
    h.start(&top);
    h.run(10);
    assert_eq!(
        h.stage.error_messages(),
        vec!["Inside: ContinuationError\ncontinuations cannot be forked".to_string()]
    );
    assert_eq!(h.threads.len(), 1);
}

#[test]
fn resuming_a_continuation_outside_a_warp_ends_the_warp() {
    let mut h = Harness::new();
    let top = green_flag(vec![
        Block::command("doCallCC").arg(ring_with_k(vec![Block::command("doWarp").script(vec![
            log_text("warped"),
            resume(Block::var("k"), Vec::new()),
            log_text("skipped"),
        ])])),
        log_text("after"),
    ]);
    h.start(&top);
    h.run(10);
    assert_eq!(h.sprite.logged(), vec!["warped", "after"]);
    assert_eq!(h.sprite.warps_started.get(), 1);
    assert_eq!(h.sprite.warps_ended.get(), 1);
}
