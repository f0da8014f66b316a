use std::cmp::Ordering;
use std::rc::Rc;

use super::Val;

/// Formats a number the way block scripts display it: integral values have no
/// fractional part, non-finite values use their word form.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl Val {
    /// Loose equality: numeric when both sides read as numbers, otherwise
    /// case-insensitive text comparison. Lists, procedures and scripts compare
    /// by identity.
    pub fn snap_equals(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::List(a), Val::List(b)) => Rc::ptr_eq(a, b),
            (Val::Proc(a), Val::Proc(b)) => Rc::ptr_eq(a, b),
            (Val::Continuation(a), Val::Continuation(b)) => Rc::ptr_eq(a, b),
            (Val::Script(a), Val::Script(b)) => Rc::ptr_eq(a, b),
            (Val::Bool(a), Val::Bool(b)) => a == b,
            _ => {
                if let (Some(x), Some(y)) = (self.as_number(), other.as_number()) {
                    return x == y;
                }
                self.to_string().to_lowercase() == other.to_string().to_lowercase()
            }
        }
    }

    /// Ordering used by `<` and `>`: numeric when both sides read as numbers,
    /// otherwise case-insensitive text ordering.
    pub fn compare(&self, other: &Val) -> Option<Ordering> {
        if let (Some(x), Some(y)) = (self.as_number(), other.as_number()) {
            return x.partial_cmp(&y);
        }
        Some(self.to_string().to_lowercase().cmp(&other.to_string().to_lowercase()))
    }

    /// Remainder whose sign follows the divisor.
    pub fn modulus(&self, other: &Val) -> Val {
        let x = self.to_number();
        let y = other.to_number();
        Val::Num(((x % y) + y) % y)
    }
}
