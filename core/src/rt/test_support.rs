//! Headless collaborators for evaluator tests: a sprite that records what it
//! was asked to do and a stage that records what it was asked to show.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::block::{Block, BlockRef, chain};
pub use crate::host::Receiver;
use crate::host::{AudioHandle, Prompter, ReceiverRef, Stage};
use crate::val::Val;
use crate::vars::{FrameRef, VariableFrame};

use super::{ProcessId, SchedulerConfig, ThreadManager};

/// Commands: `log(v)` appends `v` to the log, `forward(n)` moves right,
/// `fail` errors. Reporters: `getX`, `tick` (counts its calls).
pub struct TestSprite {
    name: String,
    vars: FrameRef,
    pub log: RefCell<Vec<String>>,
    pub position: Cell<(f64, f64)>,
    pub bubbles: RefCell<Vec<Option<String>>>,
    pub picked_up: Cell<bool>,
    pub warps_started: Cell<usize>,
    pub warps_ended: Cell<usize>,
    pub ticks: Cell<usize>,
}

impl TestSprite {
    pub fn new(name: &str) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_string(),
            vars: VariableFrame::new(None),
            log: RefCell::new(Vec::new()),
            position: Cell::new((0.0, 0.0)),
            bubbles: RefCell::new(Vec::new()),
            picked_up: Cell::new(false),
            warps_started: Cell::new(0),
            warps_ended: Cell::new(0),
            ticks: Cell::new(0),
        })
    }

    pub fn as_receiver(self: &Rc<Self>) -> ReceiverRef {
        self.clone()
    }

    pub fn logged(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn var(&self, name: &str) -> Val {
        self.vars.own_value(name).unwrap_or_default()
    }
}

impl Receiver for TestSprite {
    fn name(&self) -> &str {
        &self.name
    }

    fn variables(&self) -> FrameRef {
        self.vars.clone()
    }

    fn perform(&self, selector: &str, inputs: &[Val]) -> Result<Val> {
        let first = inputs.first().cloned().unwrap_or_default();
        match selector {
            "log" => {
                self.log.borrow_mut().push(first.to_string());
                Ok(Val::Nil)
            }
            "forward" => {
                let (x, y) = self.position.get();
                self.position.set((x + first.to_number(), y));
                Ok(Val::Nil)
            }
            "getX" => Ok(Val::Num(self.position.get().0)),
            "tick" => {
                self.ticks.set(self.ticks.get() + 1);
                Ok(Val::Num(self.ticks.get() as f64))
            }
            "fail" => Err(anyhow!("sprite refused")),
            other => Err(crate::error::EvalError::UnknownSelector(other.to_string()).into()),
        }
    }

    fn position(&self) -> (f64, f64) {
        self.position.get()
    }

    fn goto_xy(&self, x: f64, y: f64) {
        self.position.set((x, y));
    }

    fn bubble(&self, data: Option<&Val>, _is_thought: bool) {
        self.bubbles.borrow_mut().push(data.map(|v| v.to_string()));
    }

    fn play_sound(&self, name: &Val) -> Option<Rc<dyn AudioHandle>> {
        if name.to_string().is_empty() {
            return None;
        }
        Some(Rc::new(TestSound { remaining: Cell::new(2) }))
    }

    fn start_warp(&self) {
        self.warps_started.set(self.warps_started.get() + 1);
    }

    fn end_warp(&self) {
        self.warps_ended.set(self.warps_ended.get() + 1);
    }

    fn is_picked_up(&self) -> bool {
        self.picked_up.get()
    }
}

/// Ends after being polled a fixed number of times.
pub struct TestSound {
    remaining: Cell<usize>,
}

impl AudioHandle for TestSound {
    fn is_ended(&self) -> bool {
        let left = self.remaining.get();
        if left == 0 {
            return true;
        }
        self.remaining.set(left - 1);
        false
    }
}

pub struct TestPrompter {
    pub done: Cell<bool>,
    pub answer: RefCell<Val>,
    pub closed: Cell<bool>,
}

impl Prompter for TestPrompter {
    fn is_done(&self) -> bool {
        self.done.get()
    }

    fn answer(&self) -> Val {
        self.answer.borrow().clone()
    }

    fn close(&self) {
        self.closed.set(true);
    }
}

#[derive(Default)]
pub struct TestStage {
    pub listeners: RefCell<Vec<(String, BlockRef, ReceiverRef)>>,
    pub errors: RefCell<Vec<(BlockRef, String)>>,
    pub results: RefCell<Vec<Val>>,
    pub highlighted: Cell<usize>,
    pub unhighlighted: Cell<usize>,
    pub prompters: RefCell<Vec<Rc<TestPrompter>>>,
    pub cleared: Cell<usize>,
}

impl TestStage {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn listen(&self, message: &str, hat: &BlockRef, receiver: ReceiverRef) {
        self.listeners
            .borrow_mut()
            .push((message.to_string(), hat.clone(), receiver));
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.borrow().iter().map(|(_, msg)| msg.clone()).collect()
    }

    /// Confirms the most recent prompter with `answer`.
    pub fn answer(&self, answer: &str) {
        if let Some(prompter) = self.prompters.borrow().last() {
            *prompter.answer.borrow_mut() = Val::str(answer);
            prompter.done.set(true);
        }
    }
}

impl Stage for TestStage {
    fn hat_blocks_for(&self, message: &str) -> Vec<(BlockRef, ReceiverRef)> {
        self.listeners
            .borrow()
            .iter()
            .filter(|(msg, _, _)| msg == message)
            .map(|(_, hat, receiver)| (hat.clone(), receiver.clone()))
            .collect()
    }

    fn highlight(&self, _top: &BlockRef) {
        self.highlighted.set(self.highlighted.get() + 1);
    }

    fn unhighlight(&self, _top: &BlockRef) {
        self.unhighlighted.set(self.unhighlighted.get() + 1);
    }

    fn show_result(&self, _top: &BlockRef, value: &Val) {
        self.results.borrow_mut().push(value.clone());
    }

    fn show_error(&self, top: &BlockRef, message: &str) {
        self.errors.borrow_mut().push((top.clone(), message.to_string()));
    }

    fn open_prompter(&self, _question: &Val) -> Rc<dyn Prompter> {
        let prompter = Rc::new(TestPrompter {
            done: Cell::new(false),
            answer: RefCell::new(Val::Nil),
            closed: Cell::new(false),
        });
        self.prompters.borrow_mut().push(prompter.clone());
        prompter
    }

    fn clear_transient_state(&self) {
        self.cleared.set(self.cleared.get() + 1);
    }
}

/// Stage, one sprite and a manager with a generous time slice.
pub struct Harness {
    pub stage: Rc<TestStage>,
    pub sprite: Rc<TestSprite>,
    pub threads: ThreadManager,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default().with_timeout(Duration::from_secs(5)))
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        let stage = TestStage::new();
        let sprite = TestSprite::new("Sprite");
        let threads = ThreadManager::new(stage.clone(), config);
        Self { stage, sprite, threads }
    }

    pub fn start(&mut self, top: &BlockRef) -> ProcessId {
        self.threads.start_process(top, self.sprite.as_receiver(), false)
    }

    /// Steps until no process is running; returns the number of steps taken.
    pub fn run(&mut self, max_steps: usize) -> usize {
        for steps in 0..max_steps {
            if self.threads.is_idle() {
                return steps;
            }
            self.threads.step().expect("step");
        }
        panic!("still running after {} steps", max_steps);
    }

    /// Like [`Harness::run`], sleeping a millisecond between steps.
    pub fn run_paced(&mut self, max_steps: usize) -> usize {
        for steps in 0..max_steps {
            if self.threads.is_idle() {
                return steps;
            }
            self.threads.step().expect("step");
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("still running after {} steps", max_steps);
    }
}

/// A script starting with a green-flag hat.
pub fn green_flag(blocks: Vec<Block>) -> BlockRef {
    let mut all = vec![Block::hat("receiveGo")];
    all.extend(blocks);
    script(all)
}

pub fn script(blocks: Vec<Block>) -> BlockRef {
    chain(blocks).expect("non-empty script")
}

pub fn log(value: Block) -> Block {
    Block::command("log").arg(value)
}

pub fn log_text(text: &str) -> Block {
    Block::command("log").text(text)
}

pub fn set_var(name: &str, value: Block) -> Block {
    Block::command("doSetVar").text(name).arg(value)
}

pub fn change_var(name: &str, delta: f64) -> Block {
    Block::command("doChangeVar").text(name).num(delta)
}

pub fn sum(a: Block, b: Block) -> Block {
    Block::reporter("reportSum").arg(a).arg(b)
}

pub fn num(n: f64) -> Block {
    // `reportSum(n, 0)` stands in for a literal where a block is required.
    Block::reporter("reportSum").num(n).num(0.0)
}
