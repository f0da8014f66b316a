//! Control primitives. Each one edits the context stack directly instead of
//! recursing on the host stack.

use std::time::Instant;

use tracing::debug;

use crate::val::Val;

use super::context::{Context, Expr, PseudoOp};
use super::process::{Outcome, Process};
use super::threads::{ProcessId, ThreadManager};

impl Process {
    /// Replaces the current context with `body`, run in the same scope and
    /// carrying its call-boundary markers.
    fn splice_body(&mut self, body: &Val) {
        let Some(ctx) = self.stack.pop() else {
            return;
        };
        if let Val::Script(script) = body {
            let next = Context::new(Expr::Sequence(script.sequence()), &ctx.scope()).with_markers(ctx.markers());
            self.stack.push(next);
        }
    }

    fn push_body(&mut self, body: &Val) {
        if let Val::Script(script) = body {
            self.push_context(Expr::Sequence(script.sequence()));
        }
    }

    fn pause(&mut self) -> Outcome {
        self.push_context(Expr::Op(PseudoOp::Yield));
        Outcome::Rewired
    }

    fn elapsed_secs(&mut self) -> f64 {
        match self.stack.last_mut() {
            Some(ctx) => ctx.start_time.get_or_insert_with(Instant::now).elapsed().as_secs_f64(),
            None => 0.0,
        }
    }

    pub(super) fn do_if(&mut self, condition: &Val, body: &Val) -> Outcome {
        if condition.is_truthy() {
            self.splice_body(body);
        } else {
            self.pop_context();
        }
        Outcome::Rewired
    }

    pub(super) fn do_if_else(&mut self, condition: &Val, then_body: &Val, else_body: &Val) -> Outcome {
        let chosen = if condition.is_truthy() { then_body } else { else_body };
        self.splice_body(chosen);
        Outcome::Rewired
    }

    pub(super) fn do_forever(&mut self, body: &Val) -> Outcome {
        self.push_context(Expr::Op(PseudoOp::Yield));
        self.push_body(body);
        Outcome::Rewired
    }

    /// The remaining count lives in the context's evaluated input: each
    /// iteration rewrites it to `n - 1` and re-runs the block.
    pub(super) fn do_repeat(&mut self, counter: &Val, body: &Val) -> Outcome {
        let remaining = counter.to_number();
        if !(remaining >= 1.0) {
            return Outcome::Done;
        }
        if let Some(ctx) = self.stack.last_mut() {
            ctx.inputs = vec![Val::Num(remaining - 1.0), body.clone()];
        }
        self.push_context(Expr::Op(PseudoOp::Yield));
        self.push_body(body);
        Outcome::Rewired
    }

    pub(super) fn do_until(&mut self, condition: &Val, body: &Val) -> Outcome {
        if condition.is_truthy() {
            return Outcome::Done;
        }
        if let Some(ctx) = self.stack.last_mut() {
            ctx.inputs.clear();
        }
        self.push_context(Expr::Op(PseudoOp::Yield));
        self.push_body(body);
        Outcome::Rewired
    }

    pub(super) fn do_wait_until(&mut self, condition: &Val) -> Outcome {
        if condition.is_truthy() {
            return Outcome::Done;
        }
        if let Some(ctx) = self.stack.last_mut() {
            ctx.inputs.clear();
        }
        self.pause()
    }

    /// Runs `body` without yielding. Nested warps share the outer warp's
    /// exit point, so the receiver sees one start and one end.
    pub(super) fn do_warp(&mut self, body: &Val) -> Outcome {
        let Some(ctx) = self.stack.pop() else {
            return Outcome::Rewired;
        };
        if let Val::Script(script) = body {
            let resume = Context::new(Expr::Op(PseudoOp::Yield), &ctx.scope()).with_markers(ctx.markers());
            self.stack.push(resume);
            if !self.is_atomic {
                self.home_receiver().start_warp();
                self.push_context(Expr::Op(PseudoOp::StopWarping));
            }
            self.push_context(Expr::Sequence(script.sequence()));
            self.is_atomic = true;
        }
        Outcome::Rewired
    }

    pub(super) fn stop_warping(&mut self) {
        self.pop_context();
        self.is_atomic = false;
        self.home_receiver().end_warp();
    }

    pub(super) fn do_wait(&mut self, secs: &Val) -> Outcome {
        if self.elapsed_secs() >= secs.to_number() {
            return Outcome::Done;
        }
        self.pause()
    }

    pub(super) fn do_glide(&mut self, secs: &Val, end_x: &Val, end_y: &Val) -> Outcome {
        let receiver = self.current_receiver();
        let duration = secs.to_number();
        let elapsed = self.elapsed_secs();
        let (end_x, end_y) = (end_x.to_number(), end_y.to_number());
        if elapsed >= duration {
            receiver.goto_xy(end_x, end_y);
            return Outcome::Done;
        }
        let (start_x, start_y) = match self.stack.last_mut() {
            Some(ctx) => *ctx.start_value.get_or_insert_with(|| receiver.position()),
            None => receiver.position(),
        };
        let fraction = elapsed / duration;
        receiver.goto_xy(start_x + (end_x - start_x) * fraction, start_y + (end_y - start_y) * fraction);
        self.pause()
    }

    /// `say … for … secs` and `think … for … secs`.
    pub(super) fn do_talk_for(&mut self, data: &Val, secs: &Val, is_thought: bool) -> Outcome {
        let receiver = self.current_receiver();
        let first_entry = self.stack.last().is_some_and(|ctx| ctx.start_time.is_none());
        if first_entry {
            receiver.bubble(Some(data), is_thought);
        }
        if self.elapsed_secs() >= secs.to_number() {
            receiver.stop_talking();
            return Outcome::Done;
        }
        self.pause()
    }

    pub(super) fn do_play_sound_until_done(&mut self, name: &Val) -> Outcome {
        let receiver = self.current_receiver();
        let Some(ctx) = self.stack.last_mut() else {
            return Outcome::Rewired;
        };
        if ctx.active_audio.is_none() {
            match receiver.play_sound(name) {
                Some(audio) => ctx.active_audio = Some(audio),
                None => return Outcome::Done,
            }
        }
        if ctx.active_audio.as_ref().is_some_and(|audio| audio.is_ended()) {
            return Outcome::Done;
        }
        self.pause()
    }

    /// Starts every script listening for `message`.
    fn broadcast(message: &Val, threads: &mut ThreadManager) -> Vec<ProcessId> {
        let text = message.to_string();
        if text.is_empty() {
            return Vec::new();
        }
        let thread_safe = threads.config().thread_safe;
        let listeners = threads.stage().hat_blocks_for(&text);
        debug!(target: "blockrt::rt", message = %text, listeners = listeners.len(), "broadcast");
        listeners
            .into_iter()
            .map(|(hat, receiver)| threads.start_process(&hat, receiver, thread_safe))
            .collect()
    }

    pub(super) fn do_broadcast(&mut self, message: &Val, threads: &mut ThreadManager) -> Outcome {
        Self::broadcast(message, threads);
        Outcome::Done
    }

    /// Waits until every script started by the broadcast has finished.
    pub(super) fn do_broadcast_and_wait(&mut self, message: &Val, threads: &mut ThreadManager) -> Outcome {
        let started = self.stack.last().is_some_and(|ctx| ctx.active_sends.is_some());
        if !started {
            let sends = Self::broadcast(message, threads);
            if let Some(ctx) = self.stack.last_mut() {
                ctx.active_sends = Some(sends);
            }
        }
        let Some(ctx) = self.stack.last_mut() else {
            return Outcome::Rewired;
        };
        let sends = ctx.active_sends.get_or_insert_with(Vec::new);
        sends.retain(|id| threads.is_running(*id));
        if sends.is_empty() {
            return Outcome::Done;
        }
        self.pause()
    }

    /// Only one prompter is open at a time; other askers wait their turn.
    pub(super) fn do_ask(&mut self, question: &Val, threads: &mut ThreadManager) -> Outcome {
        let receiver = self.current_receiver();
        match self.prompter.clone() {
            None => {
                if !threads.has_active_prompter() {
                    receiver.bubble(Some(question), false);
                    self.prompter = Some(threads.stage().open_prompter(question));
                }
                self.pause()
            }
            Some(prompter) if prompter.is_done() => {
                threads.set_last_answer(prompter.answer());
                prompter.close();
                self.prompter = None;
                receiver.stop_talking();
                Outcome::Done
            }
            Some(_) => self.pause(),
        }
    }

    pub(super) fn do_stop(&mut self) -> Outcome {
        self.stop();
        Outcome::Rewired
    }

    pub(super) fn do_stop_all(&mut self, threads: &mut ThreadManager) -> Outcome {
        threads.stage().clear_transient_state();
        threads.stop_all();
        self.stop();
        Outcome::Rewired
    }

    /// Unwinds to the nearest call boundary and hands it `value`. Inside a
    /// custom block the block's own body is a boundary; otherwise only
    /// procedure bodies are. Warps left on the way are exited.
    pub(super) fn do_report(&mut self, value: Option<Val>) -> Outcome {
        let inside = self.stack.last().is_some_and(|ctx| ctx.is_inside_custom_block);
        while let Some(ctx) = self.stack.last() {
            if ctx.is_boundary(inside) {
                break;
            }
            if matches!(ctx.expression, Expr::Op(PseudoOp::StopWarping)) {
                self.stop_warping();
            } else {
                self.pop_context();
            }
        }
        match value {
            Some(value) => self.return_value(value),
            None => self.pop_context(),
        }
        Outcome::Rewired
    }
}
