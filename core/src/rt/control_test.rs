use std::time::{Duration, Instant};

use crate::block::{Block, BlockKind, CustomBlockDefinition, ParamDecl, SlotType};
use crate::val::Val;

use super::test_support::*;

fn repeat(times: f64, body: Vec<Block>) -> Block {
    Block::command("doRepeat").num(times).script(body)
}

#[test]
fn repeat_zero_never_runs_its_body() {
    let mut h = Harness::new();
    let top = green_flag(vec![repeat(0.0, vec![log_text("body")]), log_text("done")]);
    h.start(&top);
    h.run(10);
    assert_eq!(h.sprite.logged(), vec!["done"]);
}

#[test]
fn repeat_runs_its_body_exactly_n_times() {
    for n in [1.0, 2.0, 7.0] {
        let mut h = Harness::new();
        let top = green_flag(vec![repeat(n, vec![log_text("body")])]);
        h.start(&top);
        h.run(50);
        assert_eq!(h.sprite.logged().len(), n as usize);
    }
}

#[test]
fn repeat_yields_between_iterations() {
    let mut h = Harness::new();
    let top = green_flag(vec![repeat(3.0, vec![log_text("body")])]);
    h.start(&top);
    h.threads.step().unwrap();
    h.threads.step().unwrap();
    assert_eq!(h.sprite.logged().len(), 1);
    h.threads.step().unwrap();
    assert_eq!(h.sprite.logged().len(), 2);
}

#[test]
fn if_else_picks_one_branch() {
    let mut h = Harness::new();
    let branch = |cond: bool| {
        Block::command("doIfElse")
            .value(Val::Bool(cond))
            .script(vec![log_text("then")])
            .script(vec![log_text("else")])
    };
    let top = green_flag(vec![
        branch(true),
        branch(false),
        Block::command("doIf").value(Val::Bool(false)).script(vec![log_text("skipped")]),
        Block::command("doIf").value(Val::Bool(true)).script(Vec::new()),
        log_text("end"),
    ]);
    h.start(&top);
    h.run(10);
    assert_eq!(h.sprite.logged(), vec!["then", "else", "end"]);
}

#[test]
fn until_reevaluates_its_condition() {
    let mut h = Harness::new();
    h.sprite.variables().add_var("i", Val::Num(0.0));
    let top = green_flag(vec![Block::command("doUntil")
        .arg(Block::predicate("reportEquals").arg(Block::var("i")).num(3.0))
        .script(vec![change_var("i", 1.0), log(Block::var("i"))])]);
    h.start(&top);
    h.run(20);
    assert_eq!(h.sprite.logged(), vec!["1", "2", "3"]);
}

#[test]
fn wait_until_blocks_until_another_script_sets_the_flag() {
    let mut h = Harness::new();
    h.sprite.variables().add_var("ready", Val::Bool(false));
    let waiter = green_flag(vec![Block::command("doWaitUntil").arg(Block::var("ready")), log_text("go")]);
    let setter = green_flag(vec![
        repeat(3.0, vec![log_text("tick")]),
        Block::command("doSetVar").text("ready").value(Val::Bool(true)),
    ]);
    h.start(&waiter);
    h.start(&setter);
    h.run(20);
    assert_eq!(h.sprite.logged(), vec!["tick", "tick", "tick", "go"]);
}

#[test]
fn wait_spans_several_steps() {
    let mut h = Harness::new();
    let top = green_flag(vec![Block::command("doWait").num(0.03), log_text("after")]);
    let started = Instant::now();
    h.start(&top);
    let steps = h.run_paced(5_000);
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert!(steps > 2);
    assert_eq!(h.sprite.logged(), vec!["after"]);
}

#[test]
fn warp_brackets_its_body_and_runs_it_in_one_step() {
    let mut h = Harness::new();
    let top = green_flag(vec![
        Block::command("doWarp").script(vec![repeat(5.0, vec![log_text("fast")])]),
        log_text("after"),
    ]);
    h.start(&top);
    h.threads.step().unwrap();
    h.threads.step().unwrap();
    assert_eq!(h.sprite.logged().len(), 5);
    assert_eq!(h.sprite.warps_started.get(), 1);
    assert_eq!(h.sprite.warps_ended.get(), 1);
    h.run(10);
    assert_eq!(h.sprite.logged().last().map(String::as_str), Some("after"));
}

#[test]
fn nested_warps_exit_once() {
    let mut h = Harness::new();
    let top = green_flag(vec![Block::command("doWarp").script(vec![
        Block::command("doWarp").script(vec![log_text("inner")]),
        log_text("outer"),
    ])]);
    h.start(&top);
    h.run(10);
    assert_eq!(h.sprite.logged(), vec!["inner", "outer"]);
    assert_eq!(h.sprite.warps_started.get(), 1);
    assert_eq!(h.sprite.warps_ended.get(), 1);
}

#[test]
fn report_unwinds_nested_ifs_to_the_custom_block_only() {
    let mut h = Harness::new();
    h.sprite.variables().add_var("result", Val::Nil);
    let pick = CustomBlockDefinition::new(
        "pick",
        BlockKind::Reporter,
        Vec::new(),
        Some(script(vec![
            Block::command("doIf").value(Val::Bool(true)).script(vec![
                Block::command("doIf").value(Val::Bool(true)).script(vec![
                    Block::command("doReport").num(42.0),
                    log_text("unreachable"),
                ]),
                log_text("unreachable"),
            ]),
            log_text("unreachable"),
            Block::command("doReport").num(0.0),
        ])),
    );
    let top = green_flag(vec![
        Block::command("doSetVar").text("result").arg(Block::custom(&pick)),
        log_text("caller continues"),
    ]);
    h.start(&top);
    h.run(10);
    assert_eq!(h.sprite.var("result"), Val::Num(42.0));
    assert_eq!(h.sprite.logged(), vec!["caller continues"]);
}

#[test]
fn report_inside_a_loop_leaves_the_loop() {
    let mut h = Harness::new();
    let first_over = CustomBlockDefinition::new(
        "first over %n",
        BlockKind::Reporter,
        vec![ParamDecl::new("limit", SlotType::Value)],
        None,
    );
    first_over.set_body(Some(script(vec![
        Block::command("doDeclareVariables").input(crate::block::Input::multi(vec![crate::block::Input::text("i")])),
        Block::command("doForever").script(vec![
            change_var("i", 1.0),
            Block::command("doIf")
                .arg(Block::predicate("reportGreaterThan").arg(Block::var("i")).arg(Block::var("limit")))
                .script(vec![Block::command("doReport").arg(Block::var("i"))]),
        ]),
    ])));
    let top = green_flag(vec![log(Block::custom(&first_over).num(3.0)), log_text("end")]);
    h.start(&top);
    h.run(20);
    assert_eq!(h.sprite.logged(), vec!["4", "end"]);
}

#[test]
fn report_exits_warp_on_the_way_out() {
    let mut h = Harness::new();
    let def = CustomBlockDefinition::new(
        "warped",
        BlockKind::Reporter,
        Vec::new(),
        Some(script(vec![Block::command("doWarp").script(vec![Block::command("doReport").num(1.0)])])),
    );
    let top = green_flag(vec![log(Block::custom(&def)), log_text("end")]);
    let id = h.start(&top);
    h.threads.step().unwrap();
    h.threads.step().unwrap();
    assert_eq!(h.sprite.warps_ended.get(), 1);
    assert!(h.threads.process(id).is_none_or(|p| !p.is_atomic()));
    h.run(10);
    assert_eq!(h.sprite.logged(), vec!["1", "end"]);
}

#[test]
fn stop_block_leaves_a_command_block_early() {
    let mut h = Harness::new();
    let def = CustomBlockDefinition::new(
        "early",
        BlockKind::Command,
        Vec::new(),
        Some(script(vec![
            log_text("in"),
            Block::command("doIf").value(Val::Bool(true)).script(vec![Block::command("doStopBlock")]),
            log_text("unreachable"),
        ])),
    );
    let top = green_flag(vec![Block::custom(&def), log_text("out")]);
    h.start(&top);
    h.run(10);
    assert_eq!(h.sprite.logged(), vec!["in", "out"]);
}

#[test]
fn stop_ends_the_script() {
    let mut h = Harness::new();
    let top = green_flag(vec![log_text("a"), Block::command("doStop"), log_text("b")]);
    h.start(&top);
    h.run(10);
    assert_eq!(h.sprite.logged(), vec!["a"]);
    assert!(h.threads.is_empty());
}

#[test]
fn stop_all_stops_every_script_and_clears_the_stage() {
    let mut h = Harness::new();
    let forever = green_flag(vec![Block::command("doForever").script(vec![log_text("spin")])]);
    let stopper = green_flag(vec![repeat(2.0, vec![]), Block::command("doStopAll")]);
    h.start(&forever);
    h.start(&stopper);
    h.run(20);
    assert!(h.threads.is_empty());
    assert_eq!(h.stage.cleared.get(), 1);
}

#[test]
fn broadcast_and_wait_joins_the_listeners() {
    let mut h = Harness::new();
    let listener = script(vec![
        Block::hat("receiveMessage").text("go"),
        Block::command("doWait").num(0.0),
        log_text("listener"),
    ]);
    h.stage.listen("go", &listener, h.sprite.as_receiver());
    let top = green_flag(vec![Block::command("doBroadcastAndWait").text("go"), log_text("main")]);
    h.start(&top);
    h.run(20);
    assert_eq!(h.sprite.logged(), vec!["listener", "main"]);
}

#[test]
fn broadcast_without_listeners_does_not_wait() {
    let mut h = Harness::new();
    let top = green_flag(vec![
        Block::command("doBroadcastAndWait").text("nobody"),
        Block::command("doBroadcast").text(""),
        log_text("main"),
    ]);
    h.start(&top);
    h.run(10);
    assert_eq!(h.sprite.logged(), vec!["main"]);
}

#[test]
fn broadcast_restarts_a_running_listener() {
    let mut h = Harness::new();
    let listener = script(vec![
        Block::hat("receiveMessage").text("ping"),
        log_text("heard"),
        Block::command("doForever").script(vec![]),
    ]);
    h.stage.listen("ping", &listener, h.sprite.as_receiver());
    let top = green_flag(vec![
        Block::command("doBroadcast").text("ping"),
        repeat(4.0, vec![]),
        Block::command("doBroadcast").text("ping"),
        repeat(4.0, vec![]),
    ]);
    h.start(&top);
    for _ in 0..15 {
        h.threads.step().unwrap();
    }
    assert_eq!(h.sprite.logged(), vec!["heard", "heard"]);
    assert!(h.threads.find_process(&listener).is_some());
}

#[test]
fn ask_waits_for_the_answer() {
    let mut h = Harness::new();
    let top = green_flag(vec![
        Block::command("doAsk").text("name?"),
        log(Block::reporter("reportLastAnswer")),
    ]);
    h.start(&top);
    for _ in 0..5 {
        h.threads.step().unwrap();
    }
    assert!(h.sprite.logged().is_empty());
    assert_eq!(h.stage.prompters.borrow().len(), 1);
    h.stage.answer("Ada");
    h.run(10);
    assert_eq!(h.sprite.logged(), vec!["Ada"]);
    assert!(h.stage.prompters.borrow()[0].closed.get());
    assert_eq!(*h.threads.last_answer(), Val::str("Ada"));
}

#[test]
fn only_one_prompter_is_open_at_a_time() {
    let mut h = Harness::new();
    let first = green_flag(vec![Block::command("doAsk").text("one")]);
    let second = green_flag(vec![Block::command("doAsk").text("two")]);
    h.start(&first);
    h.start(&second);
    for _ in 0..4 {
        h.threads.step().unwrap();
    }
    assert_eq!(h.stage.prompters.borrow().len(), 1);
    h.stage.answer("1");
    for _ in 0..3 {
        h.threads.step().unwrap();
    }
    assert_eq!(h.stage.prompters.borrow().len(), 2);
}

#[test]
fn stopping_an_asking_script_closes_its_prompter() {
    let mut h = Harness::new();
    let top = green_flag(vec![Block::command("doAsk").text("?")]);
    h.start(&top);
    h.threads.step().unwrap();
    h.threads.step().unwrap();
    h.threads.stop_process(&top);
    h.threads.step().unwrap();
    assert!(h.stage.prompters.borrow()[0].closed.get());
    assert!(h.threads.is_empty());
}

#[test]
fn glide_ends_at_the_target() {
    let mut h = Harness::new();
    let top = green_flag(vec![Block::command("doGlide").num(0.02).num(10.0).num(-4.0)]);
    h.start(&top);
    h.run_paced(5_000);
    assert_eq!(h.sprite.position.get(), (10.0, -4.0));
}

#[test]
fn say_for_shows_then_clears_the_bubble() {
    let mut h = Harness::new();
    let top = green_flag(vec![Block::command("doSayFor").text("hi").num(0.0)]);
    h.start(&top);
    h.run(10);
    assert_eq!(*h.sprite.bubbles.borrow(), vec![Some("hi".to_string()), None]);
}

#[test]
fn play_sound_until_done_polls_the_sound() {
    let mut h = Harness::new();
    let top = green_flag(vec![Block::command("doPlaySoundUntilDone").text("meow"), log_text("after")]);
    h.start(&top);
    let steps = h.run(20);
    assert!(steps >= 4);
    assert_eq!(h.sprite.logged(), vec!["after"]);
}
