//! Contracts of the collaborators the evaluator drives but does not own:
//! the objects scripts run against, and the world/UI surface that reports
//! results and errors.

use std::rc::Rc;

use anyhow::Result;

use crate::block::BlockRef;
use crate::val::Val;
use crate::vars::FrameRef;

pub type ReceiverRef = Rc<dyn Receiver>;

/// A scriptable object (sprite or stage).
///
/// `perform` handles every selector the process does not implement itself.
/// The remaining hooks back the interpolated primitives and have inert
/// defaults.
pub trait Receiver {
    fn name(&self) -> &str;

    /// Frame holding the object's own variables; the lexical root of every
    /// script it runs.
    fn variables(&self) -> FrameRef;

    fn perform(&self, selector: &str, inputs: &[Val]) -> Result<Val>;

    fn position(&self) -> (f64, f64) {
        (0.0, 0.0)
    }

    fn goto_xy(&self, _x: f64, _y: f64) {}

    /// Shows a speech (or thought) bubble; `None` removes it.
    fn bubble(&self, _data: Option<&Val>, _is_thought: bool) {}

    fn stop_talking(&self) {
        self.bubble(None, false);
    }

    fn play_sound(&self, _name: &Val) -> Option<Rc<dyn AudioHandle>> {
        None
    }

    /// Batched-update hooks bracketing warped (atomic) execution.
    fn start_warp(&self) {}

    fn end_warp(&self) {}

    /// True while the user is dragging the object; its scripts are skipped.
    fn is_picked_up(&self) -> bool {
        false
    }
}

/// A sound started by `play_sound`.
pub trait AudioHandle {
    fn is_ended(&self) -> bool;
}

/// An open "ask" input widget.
pub trait Prompter {
    fn is_done(&self) -> bool;

    fn answer(&self) -> Val;

    fn close(&self) {}
}

/// The world the scheduler runs in, plus the UI report surface.
pub trait Stage {
    /// Hat blocks listening for `message`, with the objects owning them.
    fn hat_blocks_for(&self, message: &str) -> Vec<(BlockRef, ReceiverRef)>;

    fn highlight(&self, _top: &BlockRef) {}

    fn unhighlight(&self, _top: &BlockRef) {}

    /// Final value of a finished reporter script.
    fn show_result(&self, _top: &BlockRef, _value: &Val) {}

    /// Marks `top` as errored and shows `message` next to it.
    fn show_error(&self, _top: &BlockRef, _message: &str) {}

    fn open_prompter(&self, question: &Val) -> Rc<dyn Prompter>;

    /// Clears talk bubbles, pressed keys and similar transient state.
    fn clear_transient_state(&self) {}
}
