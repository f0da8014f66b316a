//! Terminal-only sprites and stage. What a sprite says, asks or reports is
//! appended to a shared [`Transcript`] that the tick loop prints.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use anyhow::Result;
use blockrt_core::{
    BlockKind, BlockRef, EvalError, FrameRef, Input, Prompter, Receiver, ReceiverRef, Stage, Val, VariableFrame,
};

use crate::project::Project;

#[derive(Debug, Default)]
pub struct Transcript {
    lines: RefCell<Vec<String>>,
}

impl Transcript {
    pub fn push(&self, line: String) {
        self.lines.borrow_mut().push(line);
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.borrow_mut())
    }
}

pub struct HeadlessSprite {
    name: String,
    vars: FrameRef,
    position: Cell<(f64, f64)>,
    transcript: Rc<Transcript>,
}

impl HeadlessSprite {
    pub fn new(name: &str, globals: &FrameRef, transcript: Rc<Transcript>) -> Rc<Self> {
        Rc::new_cyclic(|me: &Weak<HeadlessSprite>| {
            let owner: Weak<dyn Receiver> = me.clone();
            HeadlessSprite {
                name: name.to_string(),
                vars: VariableFrame::owned_by(owner, Some(globals.clone())),
                position: Cell::new((0.0, 0.0)),
                transcript,
            }
        })
    }
}

impl Receiver for HeadlessSprite {
    fn name(&self) -> &str {
        &self.name
    }

    fn variables(&self) -> FrameRef {
        self.vars.clone()
    }

    fn perform(&self, selector: &str, inputs: &[Val]) -> Result<Val> {
        let arg = |i: usize| inputs.get(i).cloned().unwrap_or_default();
        match selector {
            "bubble" => self.bubble(Some(&arg(0)), false),
            "doThink" => self.bubble(Some(&arg(0)), true),
            "forward" => {
                let (x, y) = self.position.get();
                self.position.set((x + arg(0).to_number(), y));
            }
            "gotoXY" => self.goto_xy(arg(0).to_number(), arg(1).to_number()),
            "xPosition" => return Ok(Val::Num(self.position.get().0)),
            "yPosition" => return Ok(Val::Num(self.position.get().1)),
            other => return Err(EvalError::UnknownSelector(other.to_string()).into()),
        }
        Ok(Val::Nil)
    }

    fn position(&self) -> (f64, f64) {
        self.position.get()
    }

    fn goto_xy(&self, x: f64, y: f64) {
        self.position.set((x, y));
    }

    fn bubble(&self, data: Option<&Val>, is_thought: bool) {
        if let Some(data) = data {
            let verb = if is_thought { " thinks" } else { "" };
            self.transcript.push(format!("{}{}: {}", self.name, verb, data));
        }
    }
}

/// Answers prompts from a fixed queue; an exhausted queue answers empty text.
pub struct CannedPrompter {
    answer: Val,
}

impl Prompter for CannedPrompter {
    fn is_done(&self) -> bool {
        true
    }

    fn answer(&self) -> Val {
        self.answer.clone()
    }
}

pub struct HeadlessStage {
    globals: FrameRef,
    sprites: Vec<Rc<HeadlessSprite>>,
    green_flag: Vec<(BlockRef, ReceiverRef)>,
    listeners: Vec<(String, BlockRef, ReceiverRef)>,
    answers: RefCell<VecDeque<String>>,
    errors: RefCell<Vec<String>>,
    transcript: Rc<Transcript>,
}

impl HeadlessStage {
    pub fn new(project: &Project, answers: Vec<String>) -> Rc<Self> {
        let transcript = Rc::new(Transcript::default());
        let globals = VariableFrame::new(None);
        for (name, value) in &project.variables {
            globals.add_var(name, value.clone());
        }
        let mut sprites = Vec::new();
        let mut green_flag = Vec::new();
        let mut listeners = Vec::new();
        for source in &project.sprites {
            let sprite = HeadlessSprite::new(&source.name, &globals, transcript.clone());
            for (name, value) in &source.variables {
                sprite.vars.add_var(name, value.clone());
            }
            let receiver: ReceiverRef = sprite.clone();
            for top in &source.scripts {
                if top.kind != BlockKind::Hat {
                    continue;
                }
                match &*top.selector {
                    "receiveGo" => green_flag.push((top.clone(), receiver.clone())),
                    "receiveMessage" => {
                        if let Some(Input::Value(message)) = top.inputs.first() {
                            listeners.push((message.to_string(), top.clone(), receiver.clone()));
                        }
                    }
                    _ => {}
                }
            }
            sprites.push(sprite);
        }
        Rc::new(Self {
            globals,
            sprites,
            green_flag,
            listeners,
            answers: RefCell::new(answers.into()),
            errors: RefCell::new(Vec::new()),
            transcript,
        })
    }

    pub fn green_flag_scripts(&self) -> &[(BlockRef, ReceiverRef)] {
        &self.green_flag
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.borrow().clone()
    }

    /// `name = value` lines for every global and sprite variable.
    pub fn variable_report(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for name in self.globals.names() {
            let value = self.globals.own_value(&name).unwrap_or_default();
            lines.push(format!("{} = {}", name, value));
        }
        for sprite in &self.sprites {
            for name in sprite.vars.names() {
                let value = sprite.vars.own_value(&name).unwrap_or_default();
                lines.push(format!("{}.{} = {}", sprite.name, name, value));
            }
        }
        lines
    }
}

impl Stage for HeadlessStage {
    fn hat_blocks_for(&self, message: &str) -> Vec<(BlockRef, ReceiverRef)> {
        self.listeners
            .iter()
            .filter(|(listening, _, _)| listening == message)
            .map(|(_, hat, receiver)| (hat.clone(), receiver.clone()))
            .collect()
    }

    fn show_result(&self, _top: &BlockRef, value: &Val) {
        self.transcript.push(format!("result: {}", value));
    }

    fn show_error(&self, _top: &BlockRef, message: &str) {
        self.errors.borrow_mut().push(message.replace('\n', ": "));
    }

    fn open_prompter(&self, question: &Val) -> Rc<dyn Prompter> {
        let answer = self.answers.borrow_mut().pop_front().unwrap_or_default();
        self.transcript.push(format!("ask: {} -> {}", question, answer));
        Rc::new(CannedPrompter { answer: Val::str(answer) })
    }
}

