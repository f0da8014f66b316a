use std::{
    cell::RefCell,
    fmt::{self, Debug, Display},
    rc::Rc,
};

use crate::block::BlockRef;
use crate::rt::{Continuation, Procedure};

mod ops;

pub use ops::format_number;

/// Shared, mutable list storage. Lists are reference values: every copy of a
/// `Val::List` observes writes made through any other copy.
pub type ListRef = Rc<RefCell<Vec<Val>>>;

/// Runtime value flowing between blocks.
#[derive(Clone, Default)]
pub enum Val {
    #[default]
    Nil,
    Bool(bool),
    Num(f64),
    Str(Rc<str>),
    List(ListRef),
    /// A reified block or script (first-class procedure).
    Proc(Rc<Procedure>),
    /// A captured, resumable remainder of a process.
    Continuation(Rc<Continuation>),
    /// A raw block node passed through unevaluated (C-slot contents, inputs of
    /// reification primitives).
    Script(BlockRef),
}

impl Val {
    pub fn str<S: AsRef<str>>(s: S) -> Self {
        Val::Str(Rc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Val>) -> Self {
        Val::List(Rc::new(RefCell::new(items)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Nil => "nothing",
            Val::Bool(_) => "Boolean",
            Val::Num(_) => "number",
            Val::Str(_) => "text",
            Val::List(_) => "list",
            Val::Proc(_) => "procedure",
            Val::Continuation(_) => "continuation",
            Val::Script(_) => "script",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Val::Nil)
    }

    /// Truthiness used by conditionals: nothing, `false`, zero, NaN and the
    /// empty text are false; everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Val::Nil => false,
            Val::Bool(b) => *b,
            Val::Num(n) => *n != 0.0 && !n.is_nan(),
            Val::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Numeric coercion: numbers pass through, booleans become 1/0, numeric
    /// text is parsed, nothing and the empty text are 0, anything else is NaN.
    pub fn to_number(&self) -> f64 {
        match self {
            Val::Nil => 0.0,
            Val::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Val::Num(n) => *n,
            Val::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    /// Numeric value when the value is, or reads as, a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Val::Num(n) => Some(*n),
            Val::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ListRef> {
        match self {
            Val::List(list) => Some(list),
            _ => None,
        }
    }
}

impl From<f64> for Val {
    fn from(n: f64) -> Self {
        Val::Num(n)
    }
}

impl From<i64> for Val {
    fn from(n: i64) -> Self {
        Val::Num(n as f64)
    }
}

impl From<bool> for Val {
    fn from(b: bool) -> Self {
        Val::Bool(b)
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::str(s)
    }
}

impl From<String> for Val {
    fn from(s: String) -> Self {
        Val::Str(Rc::from(s))
    }
}

impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Val::Nil, Val::Nil) => true,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Num(a), Val::Num(b)) => a == b,
            (Val::Str(a), Val::Str(b)) => a == b,
            (Val::List(a), Val::List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Val::Proc(a), Val::Proc(b)) => Rc::ptr_eq(a, b),
            (Val::Continuation(a), Val::Continuation(b)) => Rc::ptr_eq(a, b),
            (Val::Script(a), Val::Script(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Nil => Ok(()),
            Val::Bool(b) => write!(f, "{}", b),
            Val::Num(n) => f.write_str(&format_number(*n)),
            Val::Str(s) => f.write_str(s),
            Val::List(list) => {
                let items = list.borrow();
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Val::Proc(_) => f.write_str("<procedure>"),
            Val::Continuation(_) => f.write_str("<continuation>"),
            Val::Script(block) => write!(f, "<script {}>", block.selector),
        }
    }
}

impl Debug for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Nil => f.write_str("Nil"),
            Val::Bool(b) => write!(f, "Bool({})", b),
            Val::Num(n) => write!(f, "Num({})", n),
            Val::Str(s) => write!(f, "Str({:?})", s),
            Val::List(list) => f.debug_tuple("List").field(&*list.borrow()).finish(),
            Val::Proc(p) => write!(f, "Proc({:?})", p),
            Val::Continuation(c) => write!(f, "Continuation({:?})", c),
            Val::Script(block) => write!(f, "Script({})", block.selector),
        }
    }
}
