//! blockrt core: the script evaluator behind a visual block-programming
//! environment.
//!
//! The evaluator walks trees of [`block::Block`] nodes and advances many
//! independently scheduled [`rt::Process`]es a bounded amount per tick. All
//! interpreter state lives in explicit [`rt::Context`] frames, so a process can
//! be suspended at any point and resumed on a later tick.

pub mod block;
pub mod error;
pub mod host;
pub mod rt;
pub mod util;
pub mod val;
pub mod vars;

pub use block::{Block, BlockKind, BlockRef, CustomBlockDefinition, Input, ParamDecl, SlotType};
pub use error::EvalError;
pub use host::{AudioHandle, Prompter, Receiver, ReceiverRef, Stage};
pub use rt::{Context, Process, ProcessId, SchedulerConfig, ThreadManager};
pub use val::Val;
pub use vars::{FrameRef, UpvarReference, VariableFrame};
