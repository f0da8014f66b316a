use std::fmt;

/// Failures raised while evaluating blocks.
///
/// The evaluator itself returns `anyhow::Result`; these are the kinds it raises
/// on its own, recoverable with `err.downcast_ref::<EvalError>()`.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// A variable was read or written that no frame in scope declares.
    UndeclaredVariable(String),
    /// A procedure or custom block was called with an incompatible number of inputs.
    InputCount { expected: usize, got: usize },
    /// `launch` was given a captured continuation.
    ForkContinuation,
    /// A continuation was resumed a second time.
    ContinuationSpent,
    /// `run`/`call`/`launch` was given something that is not a procedure.
    NotCallable(String),
    /// Neither the process nor the receiver implements the selector.
    UnknownSelector(String),
    /// A command script called as a reporter finished without reporting.
    MissingReport,
    /// A primitive rejected its inputs.
    Primitive(String),
}

impl EvalError {
    /// Short error class name shown as the first line of an error bubble.
    pub fn name(&self) -> &'static str {
        match self {
            EvalError::UndeclaredVariable(_) => "ReferenceError",
            EvalError::InputCount { .. } => "ArityError",
            EvalError::ForkContinuation | EvalError::ContinuationSpent => "ContinuationError",
            EvalError::NotCallable(_) | EvalError::Primitive(_) => "TypeError",
            EvalError::UnknownSelector(_) => "SelectorError",
            EvalError::MissingReport => "ReportError",
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::UndeclaredVariable(name) => {
                write!(f, "a variable of name '{}' does not exist in this context", name)
            }
            EvalError::InputCount { expected, got } => {
                write!(f, "expecting {} input(s), but getting {}", expected, got)
            }
            EvalError::ForkContinuation => write!(f, "continuations cannot be forked"),
            EvalError::ContinuationSpent => write!(f, "continuation has already been resumed"),
            EvalError::NotCallable(got) => write!(f, "expecting a ring but getting {}", got),
            EvalError::UnknownSelector(selector) => write!(f, "unknown block selector '{}'", selector),
            EvalError::MissingReport => write!(f, "reporter didn't report"),
            EvalError::Primitive(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for EvalError {}

/// Formats any evaluator error as `"<name>\n<message>"`.
pub(crate) fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<EvalError>() {
        Some(eval) => format!("{}\n{}", eval.name(), eval),
        None => format!("Error\n{}", err),
    }
}
