use std::rc::Rc;

use anyhow::Result;
use tracing::trace;

use crate::block::Input;
use crate::val::Val;
use crate::vars::VariableFrame;

use super::context::{Continuation, Context, Expr, HOLE_SLOT, PseudoOp};
use super::process::{Outcome, Process};

impl Process {
    /// Captures everything below the current call/cc context.
    ///
    /// For a reporter continuation the innermost captured context is the one
    /// waiting for the call's value: its inputs are cleared and the pending
    /// slot is replaced by the hole, so resuming re-evaluates that block with
    /// the passed value in place of the call. Every other captured context
    /// keeps the inputs it had already evaluated.
    pub(super) fn capture_continuation(&self, is_reporter: bool) -> Val {
        let below = self.stack.len().saturating_sub(1);
        let mut frames: Vec<Context> = self.stack[..below].to_vec();
        let mut is_reporter = is_reporter;
        if is_reporter {
            match frames.last_mut() {
                Some(hole) if matches!(hole.expression, Expr::Block(_) | Expr::Multi(_)) => open_hole(hole),
                _ => is_reporter = false,
            }
        }
        trace!(target: "blockrt::rt", process = self.id().get(), frames = frames.len(), "continuation captured");
        Val::Continuation(Rc::new(Continuation::new(frames, is_reporter)))
    }

    /// Abandons the current stack in favour of the captured one.
    pub(super) fn run_continuation(&mut self, cont: &Continuation, args: Vec<Val>) -> Result<Outcome> {
        let mut frames = cont.take()?;
        if cont.is_reporter {
            if let Some(hole) = frames.last_mut() {
                let value = args.into_iter().next().unwrap_or_default();
                let binding = VariableFrame::new(Some(hole.variables.clone()));
                binding.bind_slot(HOLE_SLOT, value);
                hole.variables = binding;
            }
        }
        self.stack = frames;
        let atomic = self
            .stack
            .iter()
            .any(|ctx| matches!(ctx.expression, Expr::Op(PseudoOp::StopWarping)));
        if self.is_atomic && !atomic {
            self.home_receiver().end_warp();
        }
        self.is_atomic = atomic;
        Ok(Outcome::Rewired)
    }
}

fn open_hole(ctx: &mut Context) {
    let index = ctx.inputs.len();
    ctx.expression = match &ctx.expression {
        Expr::Block(block) => Expr::Block(Rc::new(block.with_input(index, Input::Bound(HOLE_SLOT)))),
        Expr::Multi(items) => {
            let mut items: Vec<Input> = items.to_vec();
            if let Some(slot) = items.get_mut(index) {
                *slot = Input::Bound(HOLE_SLOT);
            }
            Expr::Multi(items.into())
        }
        other => other.clone(),
    };
    ctx.inputs.clear();
}
