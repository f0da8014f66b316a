use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use anyhow::Result;

use crate::block::{BlockRef, Input};
use crate::error::EvalError;
use crate::host::{AudioHandle, ReceiverRef};
use crate::val::Val;
use crate::vars::{FrameRef, UpvarReference};

use super::threads::ProcessId;

/// Binding id reserved for the hole of a reporter continuation. Placeholder
/// ids handed out by reification start at 1.
pub(crate) const HOLE_SLOT: usize = 0;

/// Zero-argument operations the process performs on itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoOp {
    /// Suspension point; ends the current burst unless warped.
    Yield,
    /// Leaves warp (atomic) mode.
    StopWarping,
    /// Forwards the value a command script reported; fails if it reported none.
    ExpectReport,
}

impl PseudoOp {
    pub fn selector(self) -> &'static str {
        match self {
            PseudoOp::Yield => "doYield",
            PseudoOp::StopWarping => "doStopWarping",
            PseudoOp::ExpectReport => "expectReport",
        }
    }
}

/// What a context evaluates.
#[derive(Clone)]
pub enum Expr {
    /// A script; `pc` indexes the next block to run.
    Sequence(Rc<[BlockRef]>),
    Block(BlockRef),
    /// A variadic slot collecting its inputs into a list.
    Multi(Rc<[Input]>),
    /// A placeholder reference resolved through the context's variables.
    Bound(usize),
    Op(PseudoOp),
    Nothing,
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Sequence(seq) => {
                let selectors: Vec<&str> = seq.iter().map(|b| &*b.selector).collect();
                write!(f, "Sequence({:?})", selectors)
            }
            Expr::Block(block) => write!(f, "Block({})", block.selector),
            Expr::Multi(items) => write!(f, "Multi({})", items.len()),
            Expr::Bound(id) => write!(f, "Bound({})", id),
            Expr::Op(op) => f.write_str(op.selector()),
            Expr::Nothing => f.write_str("Nothing"),
        }
    }
}

/// The lexical environment a context was created in: the frame its variables
/// resolve through and the object it runs against. Captured by reified
/// procedures, it outlives the dynamic stack that created it.
#[derive(Clone)]
pub struct Scope {
    pub variables: FrameRef,
    pub receiver: ReceiverRef,
}

/// Call-boundary markers and upvar table carried across context rewrites, so
/// that nested control structures stay transparent to `report` and scoping.
#[derive(Clone, Default)]
pub(crate) struct Markers {
    pub is_lambda: bool,
    pub is_custom_block: bool,
    pub is_inside_custom_block: bool,
    pub upvars: Option<Rc<UpvarReference>>,
}

/// An activation record. A process keeps its contexts on an explicit stack;
/// the entry below a context is its dynamic parent.
#[derive(Clone)]
pub struct Context {
    pub expression: Expr,
    pub variables: FrameRef,
    pub receiver: ReceiverRef,
    pub upvars: Option<Rc<UpvarReference>>,
    /// Evaluated arguments of the call in progress.
    pub inputs: Vec<Val>,
    pub pc: usize,
    pub start_time: Option<Instant>,
    pub start_value: Option<(f64, f64)>,
    pub active_audio: Option<Rc<dyn AudioHandle>>,
    pub active_sends: Option<Vec<ProcessId>>,
    pub is_lambda: bool,
    pub is_custom_block: bool,
    pub is_inside_custom_block: bool,
}

impl Context {
    pub fn new(expression: Expr, outer: &Scope) -> Self {
        Self {
            expression,
            variables: outer.variables.clone(),
            receiver: outer.receiver.clone(),
            upvars: None,
            inputs: Vec::new(),
            pc: 0,
            start_time: None,
            start_value: None,
            active_audio: None,
            active_sends: None,
            is_lambda: false,
            is_custom_block: false,
            is_inside_custom_block: false,
        }
    }

    /// Scope for contexts created underneath this one.
    pub fn scope(&self) -> Scope {
        Scope {
            variables: self.variables.clone(),
            receiver: self.receiver.clone(),
        }
    }

    pub fn add_input(&mut self, value: Val) {
        self.inputs.push(value);
    }

    pub(crate) fn markers(&self) -> Markers {
        Markers {
            is_lambda: self.is_lambda,
            is_custom_block: self.is_custom_block,
            is_inside_custom_block: self.is_inside_custom_block,
            upvars: self.upvars.clone(),
        }
    }

    pub(crate) fn with_markers(mut self, markers: Markers) -> Self {
        self.is_lambda = markers.is_lambda;
        self.is_custom_block = markers.is_custom_block;
        self.is_inside_custom_block = markers.is_inside_custom_block;
        self.upvars = markers.upvars;
        self
    }

    /// True for the frame that `report` unwinds to.
    pub(crate) fn is_boundary(&self, inside_custom_block: bool) -> bool {
        self.is_lambda || (inside_custom_block && self.is_custom_block)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("expression", &self.expression)
            .field("inputs", &self.inputs)
            .field("pc", &self.pc)
            .field("is_lambda", &self.is_lambda)
            .field("is_custom_block", &self.is_custom_block)
            .finish()
    }
}

/// What a reified procedure runs.
#[derive(Debug, Clone)]
pub enum ProcBody {
    Block(BlockRef),
    /// An empty reporter ring: answers its placeholder.
    Slot(usize),
    Nothing,
}

/// A first-class procedure: a detached block together with the lexical
/// scope it was reified in.
pub struct Procedure {
    pub body: ProcBody,
    pub outer: Scope,
    /// Formal parameter names given explicitly by the ring.
    pub params: Vec<std::rc::Rc<str>>,
    /// Number of empty slots tagged as implicit parameters.
    pub empty_slots: usize,
}

impl Procedure {
    pub fn is_command(&self) -> bool {
        matches!(&self.body, ProcBody::Block(block) if !block.kind.is_reporter())
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("body", &self.body)
            .field("params", &self.params)
            .field("empty_slots", &self.empty_slots)
            .finish()
    }
}

/// A captured remainder of a process. Resumable once: the frames are handed
/// over on the first resumption.
pub struct Continuation {
    frames: RefCell<Option<Vec<Context>>>,
    pub is_reporter: bool,
}

impl Continuation {
    pub(crate) fn new(frames: Vec<Context>, is_reporter: bool) -> Self {
        Self {
            frames: RefCell::new(Some(frames)),
            is_reporter,
        }
    }

    pub fn is_spent(&self) -> bool {
        self.frames.borrow().is_none()
    }

    /// Number of captured frames, zero once spent.
    pub fn len(&self) -> usize {
        self.frames.borrow().as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn take(&self) -> Result<Vec<Context>> {
        self.frames
            .borrow_mut()
            .take()
            .ok_or_else(|| EvalError::ContinuationSpent.into())
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("frames", &self.len())
            .field("is_reporter", &self.is_reporter)
            .field("spent", &self.is_spent())
            .finish()
    }
}
