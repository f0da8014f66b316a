//! Scheduler and evaluator.
//!
//! A [`ThreadManager`] owns every running [`Process`] and advances each one a
//! bounded amount per [`ThreadManager::step`]. A process keeps its interpreter
//! state as an explicit stack of [`Context`] frames, never on the host stack,
//! so it can be preempted after any single evaluation and resumed later.

mod call;
mod config;
mod context;
mod continuation;
mod control;
mod primitives;
mod process;
mod threads;

pub use config::{CATCH_ERRORS_ENV, SchedulerConfig, TIMEOUT_ENV, env_toggle_enabled};
pub use context::{Context, Continuation, Expr, ProcBody, Procedure, PseudoOp, Scope};
pub use primitives::is_process_primitive;
pub use process::Process;
pub use threads::{ProcessId, ThreadManager};

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
mod continuation_test;
#[cfg(test)]
mod control_test;
