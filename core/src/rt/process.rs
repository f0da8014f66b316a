use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{trace, warn};

use crate::block::{BlockRef, Input, SlotType};
use crate::error::{EvalError, describe};
use crate::host::{Prompter, ReceiverRef};
use crate::val::Val;
use crate::vars::{FrameRef, VariableFrame};

use super::config::SchedulerConfig;
use super::context::{Context, Expr, ProcBody, PseudoOp, Scope};
use super::threads::{ProcessId, ThreadManager};

/// What a primitive did with its context.
pub(crate) enum Outcome {
    /// Deliver the value to the caller's inputs and pop.
    Value(Val),
    /// Pop without a value.
    Done,
    /// The primitive already rearranged the stack.
    Rewired,
}

/// One running script.
///
/// The context stack is the call stack: the last entry is the context being
/// evaluated and the entry below it is its dynamic parent. `home` collects
/// the value the outermost context reports.
pub struct Process {
    id: ProcessId,
    top_block: BlockRef,
    home: Context,
    pub(super) stack: Vec<Context>,
    pub(super) ready_to_yield: bool,
    ready_to_terminate: bool,
    error_flag: bool,
    pub(super) is_atomic: bool,
    pub(super) prompter: Option<Rc<dyn Prompter>>,
    last_yield: Instant,
    timeout: Duration,
    catch_errors: bool,
    frame_count: u64,
}

impl Process {
    /// A process running the script that starts at `top_block`, with a fresh
    /// script-variable frame under the receiver's own variables.
    pub fn new(id: ProcessId, top_block: &BlockRef, receiver: ReceiverRef, config: &SchedulerConfig) -> Self {
        let home = Scope {
            variables: VariableFrame::new(Some(receiver.variables())),
            receiver,
        };
        let mut process = Self::with_home(id, top_block.clone(), home, config);
        let body = Context::new(Expr::Sequence(top_block.sequence()), &process.home.scope());
        process.stack.push(body);
        process.push_context(Expr::Op(PseudoOp::Yield));
        process
    }

    /// A process continuing with an already bound procedure body.
    pub(super) fn forked(
        id: ProcessId,
        top_block: BlockRef,
        home: Scope,
        runnable: Context,
        config: &SchedulerConfig,
    ) -> Self {
        let mut process = Self::with_home(id, top_block, home, config);
        process.stack.push(runnable);
        process.push_context(Expr::Op(PseudoOp::Yield));
        process
    }

    fn with_home(id: ProcessId, top_block: BlockRef, home: Scope, config: &SchedulerConfig) -> Self {
        Self {
            id,
            top_block,
            home: Context::new(Expr::Nothing, &home),
            stack: Vec::new(),
            ready_to_yield: false,
            ready_to_terminate: false,
            error_flag: false,
            is_atomic: false,
            prompter: None,
            last_yield: Instant::now(),
            timeout: config.timeout,
            catch_errors: config.catch_errors,
            frame_count: 0,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn top_block(&self) -> &BlockRef {
        &self.top_block
    }

    pub fn receiver(&self) -> &ReceiverRef {
        &self.home.receiver
    }

    /// Frame holding the script variables of this run.
    pub fn script_variables(&self) -> &FrameRef {
        &self.home.variables
    }

    /// The context evaluated next, `None` once terminated.
    pub fn context(&self) -> Option<&Context> {
        self.stack.last()
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    pub fn is_running(&self) -> bool {
        !self.stack.is_empty() && !self.ready_to_terminate
    }

    pub fn is_atomic(&self) -> bool {
        self.is_atomic
    }

    pub fn error_flag(&self) -> bool {
        self.error_flag
    }

    pub fn has_prompter(&self) -> bool {
        self.prompter.is_some()
    }

    /// Value reported by the outermost context.
    pub fn result(&self) -> Option<&Val> {
        self.home.inputs.first()
    }

    /// Contexts evaluated since the process started.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Runs one burst: evaluates contexts until the process yields, finishes
    /// or exhausts its time budget. At least one context is evaluated.
    pub fn run_step(&mut self, threads: &mut ThreadManager) -> Result<()> {
        self.ready_to_yield = false;
        self.last_yield = Instant::now();
        while !self.ready_to_terminate && !self.ready_to_yield && !self.stack.is_empty() {
            self.evaluate_context(threads)?;
            if threads.take_stop_request(self.id) {
                self.stop();
            }
            if self.last_yield.elapsed() >= self.timeout {
                trace!(target: "blockrt::rt", process = self.id.get(), "time slice exhausted");
                break;
            }
        }
        if self.ready_to_terminate {
            self.unwind();
        }
        Ok(())
    }

    /// Marks the process for termination; the stack is discarded at the end
    /// of its current or next burst.
    pub fn stop(&mut self) {
        self.ready_to_yield = true;
        self.ready_to_terminate = true;
        self.error_flag = false;
    }

    pub(super) fn unwind(&mut self) {
        if self.stack.is_empty() && self.prompter.is_none() {
            return;
        }
        self.stack.clear();
        if let Some(prompter) = self.prompter.take() {
            prompter.close();
            self.home.receiver.stop_talking();
        }
        if self.is_atomic {
            self.is_atomic = false;
            self.home.receiver.end_warp();
        }
    }

    /// Evaluates the top context once.
    pub fn evaluate_context(&mut self, threads: &mut ThreadManager) -> Result<()> {
        let Some(ctx) = self.stack.last() else {
            return Ok(());
        };
        self.frame_count += 1;
        let expression = ctx.expression.clone();
        let result = match expression {
            Expr::Sequence(seq) => {
                self.evaluate_sequence(&seq);
                Ok(())
            }
            Expr::Block(block) => self.evaluate_block(&block, threads),
            Expr::Multi(items) => {
                self.evaluate_multi_slot(&items);
                Ok(())
            }
            Expr::Bound(id) => {
                let value = self.resolve_slot(id);
                self.return_value(value);
                Ok(())
            }
            Expr::Op(op) => self.evaluate_op(op),
            Expr::Nothing => {
                self.pop_context();
                Ok(())
            }
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) => self.fail(err, threads),
        }
    }

    fn evaluate_sequence(&mut self, seq: &Rc<[BlockRef]>) {
        let Some(ctx) = self.stack.last_mut() else {
            return;
        };
        let pc = ctx.pc;
        if pc >= seq.len() {
            self.pop_context();
            return;
        }
        if pc + 1 == seq.len() {
            // Last statement replaces the sequence: the stack does not grow
            // with iteration or tail recursion.
            let last = Context::new(Expr::Block(seq[pc].clone()), &ctx.scope()).with_markers(ctx.markers());
            *ctx = last;
            return;
        }
        ctx.pc += 1;
        self.push_context(Expr::Block(seq[pc].clone()));
    }

    fn evaluate_block(&mut self, block: &BlockRef, threads: &mut ThreadManager) -> Result<()> {
        match &*block.selector {
            "reportAnd" => return self.evaluate_junction(block, false),
            "reportOr" => return self.evaluate_junction(block, true),
            _ => {}
        }
        let Some(ctx) = self.stack.last() else {
            return Ok(());
        };
        let evaluated = ctx.inputs.len();
        if evaluated < block.inputs.len() {
            self.evaluate_next_input(block, evaluated);
            return Ok(());
        }
        let inputs = ctx.inputs.clone();
        let outcome = self.invoke(block, &inputs, threads)?;
        self.apply(outcome);
        Ok(())
    }

    /// `and`/`or` evaluate their second operand only when the first does not
    /// decide the result.
    fn evaluate_junction(&mut self, block: &BlockRef, is_or: bool) -> Result<()> {
        let Some(ctx) = self.stack.last() else {
            return Ok(());
        };
        let first = ctx.inputs.first().map(Val::is_truthy);
        let second = ctx.inputs.get(1).map(Val::is_truthy);
        match (first, second) {
            (None, _) => self.evaluate_next_input(block, 0),
            (Some(first), None) if first == is_or => self.return_value(Val::Bool(is_or)),
            (Some(_), None) => self.evaluate_next_input(block, 1),
            (Some(_), Some(second)) => self.return_value(Val::Bool(second)),
        }
        Ok(())
    }

    fn evaluate_next_input(&mut self, block: &BlockRef, index: usize) {
        let declared = block.definition.as_ref().and_then(|def| def.slot_at(index));
        match block.inputs.get(index) {
            Some(input) if matches!(declared, Some(SlotType::Unevaluated | SlotType::Script)) => {
                self.reify_input(input)
            }
            Some(input) => self.evaluate_input(input, block.is_ring()),
            None => {
                if let Some(ctx) = self.stack.last_mut() {
                    ctx.add_input(Val::Nil);
                }
            }
        }
    }

    /// Evaluates one input slot. Literals land in the current context's
    /// inputs directly; nested reporters get a context of their own.
    fn evaluate_input(&mut self, input: &Input, raw_lambdas: bool) {
        let value = match input {
            Input::Value(value) => value.clone(),
            Input::Empty => Val::Nil,
            Input::Bound(id) => self.resolve_slot(*id),
            Input::Block(block) => {
                self.push_context(Expr::Block(block.clone()));
                return;
            }
            Input::Multi(items) => {
                self.push_context(Expr::Multi(items.clone()));
                return;
            }
            Input::Script(script) => script.clone().map(Val::Script).unwrap_or_default(),
            Input::Lambda(node) if raw_lambdas => node.clone().map(Val::Script).unwrap_or_default(),
            Input::Lambda(None) => Val::Nil,
            Input::Lambda(node) => self.reify(node.as_ref(), Vec::new(), ProcBody::Nothing),
        };
        if let Some(ctx) = self.stack.last_mut() {
            ctx.add_input(value);
        }
    }

    /// Unevaluated and C-slot parameters of a custom block receive their
    /// reporter or script as a procedure instead of its value.
    fn reify_input(&mut self, input: &Input) {
        let value = match input {
            Input::Block(node) | Input::Script(Some(node)) => self.reify(Some(node), Vec::new(), ProcBody::Nothing),
            other => return self.evaluate_input(other, false),
        };
        if let Some(ctx) = self.stack.last_mut() {
            ctx.add_input(value);
        }
    }

    fn evaluate_multi_slot(&mut self, items: &Rc<[Input]>) {
        let Some(ctx) = self.stack.last_mut() else {
            return;
        };
        let index = ctx.inputs.len();
        if index < items.len() {
            self.evaluate_input(&items[index], false);
        } else {
            let values = std::mem::take(&mut ctx.inputs);
            self.return_value(Val::list(values));
        }
    }

    fn evaluate_op(&mut self, op: PseudoOp) -> Result<()> {
        match op {
            PseudoOp::Yield => {
                self.pop_context();
                if !self.is_atomic {
                    self.ready_to_yield = true;
                }
            }
            PseudoOp::StopWarping => self.stop_warping(),
            PseudoOp::ExpectReport => {
                let reported = self.stack.last().and_then(|ctx| ctx.inputs.first().cloned());
                match reported {
                    Some(value) => self.return_value(value),
                    None => return Err(EvalError::MissingReport.into()),
                }
            }
        }
        Ok(())
    }

    pub(super) fn apply(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Value(value) => self.return_value(value),
            Outcome::Done => self.pop_context(),
            Outcome::Rewired => {}
        }
    }

    /// Pops the top context and hands `value` to its parent, or to the home
    /// context when it was the outermost one.
    pub(super) fn return_value(&mut self, value: Val) {
        self.stack.pop();
        match self.stack.last_mut() {
            Some(parent) => parent.add_input(value),
            None => self.home.add_input(value),
        }
    }

    pub(super) fn pop_context(&mut self) {
        self.stack.pop();
    }

    /// Pushes a child of the top context: same lexical scope, same upvars.
    pub(super) fn push_context(&mut self, expression: Expr) {
        let ctx = match self.stack.last() {
            Some(parent) => {
                let mut ctx = Context::new(expression, &parent.scope());
                ctx.upvars = parent.upvars.clone();
                ctx.is_inside_custom_block = parent.is_inside_custom_block;
                ctx
            }
            None => Context::new(expression, &self.home.scope()),
        };
        self.stack.push(ctx);
    }

    pub(super) fn current_scope(&self) -> Scope {
        self.stack.last().map_or_else(|| self.home.scope(), Context::scope)
    }

    pub(super) fn current_receiver(&self) -> ReceiverRef {
        self.stack
            .last()
            .map_or_else(|| self.home.receiver.clone(), |ctx| ctx.receiver.clone())
    }

    pub(super) fn home_receiver(&self) -> &ReceiverRef {
        &self.home.receiver
    }

    fn resolve_slot(&self, id: usize) -> Val {
        self.stack
            .last()
            .and_then(|ctx| ctx.variables.get_slot(id))
            .unwrap_or_default()
    }

    /// Variables of the nearest dynamic caller running in a different frame;
    /// the fallback scope for names the lexical chain does not declare.
    pub(super) fn dynamic_frame(&self) -> Option<FrameRef> {
        let (top, rest) = self.stack.split_last()?;
        rest.iter()
            .rev()
            .find(|ctx| !Rc::ptr_eq(&ctx.variables, &top.variables))
            .map(|ctx| ctx.variables.clone())
    }

    fn fail(&mut self, err: anyhow::Error, threads: &mut ThreadManager) -> Result<()> {
        if !self.catch_errors {
            return Err(err);
        }
        self.handle_error(&err, threads);
        Ok(())
    }

    fn handle_error(&mut self, err: &anyhow::Error, threads: &mut ThreadManager) {
        let nested = self
            .stack
            .iter()
            .any(|ctx| ctx.is_lambda || ctx.is_custom_block || ctx.is_inside_custom_block);
        let text = describe(err);
        let message = if nested { format!("Inside: {}", text) } else { text };
        warn!(
            target: "blockrt::rt::error",
            process = self.id.get(),
            script = %self.top_block.selector,
            "{}",
            message.replace('\n', ": ")
        );
        self.stop();
        self.error_flag = true;
        threads.stage().show_error(&self.top_block, &message);
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("top_block", &self.top_block.selector)
            .field("stack", &self.stack)
            .field("is_atomic", &self.is_atomic)
            .field("error_flag", &self.error_flag)
            .finish()
    }
}
