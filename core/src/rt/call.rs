//! Reified procedures and custom blocks: parameter binding and splicing the
//! callee's body into the context stack.

use std::rc::Rc;

use anyhow::Result;
use tracing::debug;

use crate::block::{BlockRef, SlotType};
use crate::error::EvalError;
use crate::val::Val;
use crate::vars::{FrameRef, UpvarReference, VariableFrame};

use super::context::{Context, Expr, ProcBody, Procedure, PseudoOp, Scope};
use super::process::{Outcome, Process};
use super::threads::ThreadManager;

impl Process {
    /// Detaches `node` into a procedure closing over the current scope.
    ///
    /// Without explicit parameter names, the empty slots of the copied block
    /// become positional placeholders. `when_empty` is the body used for an
    /// empty ring.
    pub(super) fn reify(&self, node: Option<&BlockRef>, params: Vec<Rc<str>>, when_empty: ProcBody) -> Val {
        let (body, empty_slots) = match node {
            None => match when_empty {
                ProcBody::Slot(id) => (ProcBody::Slot(id), 1),
                other => (other, 0),
            },
            Some(block) if params.is_empty() => {
                let (copy, count) = block.tag_empty_slots();
                (ProcBody::Block(copy), count)
            }
            Some(block) => (ProcBody::Block(block.clone()), 0),
        };
        Val::Proc(Rc::new(Procedure {
            body,
            outer: self.current_scope(),
            params,
            empty_slots,
        }))
    }

    /// Calls `target` in place of the current context.
    pub(super) fn evaluate(&mut self, target: &Val, args: Vec<Val>, is_command: bool) -> Result<Outcome> {
        let procedure = match target {
            Val::Nil => return Ok(if is_command { Outcome::Done } else { Outcome::Value(Val::Nil) }),
            Val::Continuation(cont) => return self.run_continuation(cont, args),
            Val::Proc(procedure) => procedure,
            other => return Err(EvalError::NotCallable(other.type_name().to_string()).into()),
        };
        let Some(expression) = body_expression(&procedure.body) else {
            return Ok(if is_command { Outcome::Done } else { Outcome::Value(Val::Nil) });
        };
        let frame = bind_arguments(procedure, &args)?;
        let Some(caller) = self.stack.pop() else {
            return Ok(Outcome::Rewired);
        };
        if !is_command && matches!(expression, Expr::Sequence(_)) {
            self.stack
                .push(Context::new(Expr::Op(PseudoOp::ExpectReport), &caller.scope()).with_markers(caller.markers()));
        }
        let scope = Scope {
            variables: frame,
            receiver: procedure.outer.receiver.clone(),
        };
        let mut runnable = Context::new(expression, &scope);
        runnable.is_lambda = true;
        runnable.upvars = caller.upvars.clone();
        self.stack.push(runnable);
        if is_command {
            self.push_context(Expr::Op(PseudoOp::Yield));
        }
        Ok(Outcome::Rewired)
    }

    /// Starts `target` as an independent process.
    pub(super) fn fork(&mut self, target: &Val, args: Vec<Val>, threads: &mut ThreadManager) -> Result<Outcome> {
        let procedure = match target {
            Val::Nil => return Ok(Outcome::Done),
            Val::Continuation(_) => return Err(EvalError::ForkContinuation.into()),
            Val::Proc(procedure) => procedure,
            other => return Err(EvalError::NotCallable(other.type_name().to_string()).into()),
        };
        let ProcBody::Block(top_block) = &procedure.body else {
            return Ok(Outcome::Done);
        };
        let Some(expression) = body_expression(&procedure.body) else {
            return Ok(Outcome::Done);
        };
        let frame = bind_arguments(procedure, &args)?;
        let scope = Scope {
            variables: frame,
            receiver: procedure.outer.receiver.clone(),
        };
        let mut runnable = Context::new(expression, &scope);
        runnable.is_lambda = true;
        let id = threads.allocate_id();
        let forked = Process::forked(id, top_block.clone(), procedure.outer.clone(), runnable, threads.config());
        debug!(target: "blockrt::rt", parent = self.id().get(), process = id.get(), "fork");
        threads.add_process(forked);
        Ok(Outcome::Done)
    }

    /// Runs a user-defined block. Its body gets a frame under the receiver's
    /// variables holding the formal parameters. Upvar formals are also
    /// published to the caller under the names the caller chose.
    pub(super) fn evaluate_custom_block(&mut self, block: &BlockRef, inputs: &[Val]) -> Result<Outcome> {
        let Some(definition) = block.definition.clone() else {
            return Err(EvalError::UnknownSelector(block.selector.to_string()).into());
        };
        if inputs.len() != definition.declarations.len() {
            return Err(EvalError::InputCount {
                expected: definition.declarations.len(),
                got: inputs.len(),
            }
            .into());
        }
        let is_reporter = definition.kind.is_reporter();
        let Some(body) = definition.body() else {
            return Ok(if is_reporter { Outcome::Value(Val::Nil) } else { Outcome::Done });
        };
        let Some(caller) = self.stack.pop() else {
            return Ok(Outcome::Rewired);
        };
        let frame = VariableFrame::new(Some(caller.receiver.variables()));
        let mut aliases: Option<UpvarReference> = None;
        for (decl, arg) in definition.declarations.iter().zip(inputs) {
            let initial = if decl.default.is_nil() { Val::Num(0.0) } else { decl.default.clone() };
            match decl.slot {
                SlotType::Upvar => {
                    frame.add_var(&decl.name, initial);
                    aliases
                        .get_or_insert_with(|| UpvarReference::new(caller.upvars.clone()))
                        .add_reference(&arg.to_string(), &decl.name, frame.clone());
                }
                SlotType::Unevaluated | SlotType::Script => frame.add_var(&decl.name, arg.clone()),
                SlotType::Value => {
                    let value = if arg.is_nil() { initial } else { arg.clone() };
                    frame.add_var(&decl.name, value);
                }
            }
        }
        let upvars = match aliases {
            Some(table) => {
                let table = Rc::new(table);
                self.publish_upvars(&table);
                Some(table)
            }
            None => caller.upvars.clone(),
        };
        let expression = if body.kind.is_reporter() {
            Expr::Block(body)
        } else {
            Expr::Sequence(body.sequence())
        };
        if is_reporter && matches!(expression, Expr::Sequence(_)) {
            self.stack
                .push(Context::new(Expr::Op(PseudoOp::ExpectReport), &caller.scope()).with_markers(caller.markers()));
        }
        let scope = Scope {
            variables: frame,
            receiver: caller.receiver.clone(),
        };
        let mut runnable = Context::new(expression, &scope);
        runnable.is_custom_block = true;
        runnable.is_inside_custom_block = true;
        runnable.upvars = upvars;
        self.stack.push(runnable);
        if !is_reporter {
            self.push_context(Expr::Op(PseudoOp::Yield));
        }
        Ok(Outcome::Rewired)
    }

    /// Makes the aliases of a call visible to the caller for the rest of its
    /// script: every caller context down to the caller's own call boundary
    /// takes the table, so the aliases outlive enclosing `if` and loop bodies.
    fn publish_upvars(&mut self, table: &Rc<UpvarReference>) {
        for ctx in self.stack.iter_mut().rev() {
            ctx.upvars = Some(table.clone());
            if ctx.is_lambda || ctx.is_custom_block {
                break;
            }
        }
    }
}

fn body_expression(body: &ProcBody) -> Option<Expr> {
    match body {
        ProcBody::Block(block) if block.kind.is_reporter() => Some(Expr::Block(block.clone())),
        ProcBody::Block(block) => Some(Expr::Sequence(block.sequence())),
        ProcBody::Slot(id) => Some(Expr::Bound(*id)),
        ProcBody::Nothing => None,
    }
}

/// Fresh frame under the procedure's captured scope holding the call's
/// arguments: by name when the ring declares parameters, otherwise in its
/// empty slots. A single argument fills every empty slot.
fn bind_arguments(procedure: &Procedure, args: &[Val]) -> Result<FrameRef> {
    let frame = VariableFrame::new(Some(procedure.outer.variables.clone()));
    if args.is_empty() {
        for name in &procedure.params {
            frame.add_var(name, Val::Num(0.0));
        }
        return Ok(frame);
    }
    if !procedure.params.is_empty() {
        if args.len() > procedure.params.len() {
            return Err(EvalError::InputCount {
                expected: procedure.params.len(),
                got: args.len(),
            }
            .into());
        }
        for (i, name) in procedure.params.iter().enumerate() {
            let value = match args.get(i) {
                Some(value) if !value.is_nil() => value.clone(),
                _ => Val::Num(0.0),
            };
            frame.add_var(name, value);
        }
        return Ok(frame);
    }
    if args.len() == 1 {
        for id in 1..=procedure.empty_slots {
            frame.bind_slot(id, args[0].clone());
        }
    } else if args.len() == procedure.empty_slots {
        for (i, value) in args.iter().enumerate() {
            frame.bind_slot(i + 1, value.clone());
        }
    } else {
        return Err(EvalError::InputCount {
            expected: procedure.empty_slots,
            got: args.len(),
        }
        .into());
    }
    Ok(frame)
}
