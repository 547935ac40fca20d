//! Input labels and arity declarations (§3, §4.2)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The label an input connection is made on. A node kind declares how many
/// of each it accepts via [`Arity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputLabel {
    Main,
    Left,
    Right,
}

impl std::fmt::Display for InputLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InputLabel::Main => "main",
            InputLabel::Left => "left",
            InputLabel::Right => "right",
        };
        write!(f, "{s}")
    }
}

/// Minimum/maximum connection count for one input label. `max = None` means
/// unbounded (n-ary concat's `main`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub const fn exactly_one() -> Self {
        Arity { min: 1, max: Some(1) }
    }

    pub const fn none() -> Self {
        Arity { min: 0, max: Some(0) }
    }

    pub const fn unbounded(min: usize) -> Self {
        Arity { min, max: None }
    }

    pub fn accepts(self, count: usize) -> bool {
        count >= self.min && self.max.map(|max| count <= max).unwrap_or(true)
    }
}

/// Full arity declaration for a node kind: a map from label to its
/// `(min, max)`. Labels absent from the map implicitly have `Arity::none()`.
pub type ArityDeclaration = HashMap<InputLabel, Arity>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_rejects_zero_and_two() {
        let a = Arity::exactly_one();
        assert!(!a.accepts(0));
        assert!(a.accepts(1));
        assert!(!a.accepts(2));
    }

    #[test]
    fn unbounded_has_no_ceiling() {
        let a = Arity::unbounded(1);
        assert!(a.accepts(1));
        assert!(a.accepts(1000));
        assert!(!a.accepts(0));
    }
}
