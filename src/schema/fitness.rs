//! Fitness values produced by evaluators.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result of evaluating one candidate.
///
/// Components are opaque to this crate: ordering, dominance and aggregation
/// belong to the caller. Evaluators only guarantee that every component is
/// non-negative.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Fitness {
    /// Fitness components, in evaluator order.
    pub values: Vec<f64>,
    /// Free-text description token reported by the evaluator.
    #[serde(default)]
    pub description: String,
}

impl Fitness {
    /// Create a fitness without description.
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            description: String::new(),
        }
    }

    /// Attach a description token.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Number of components.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Index of the first negative component, if any.
    pub fn first_negative(&self) -> Option<usize> {
        self.values.iter().position(|v| *v < 0.0)
    }
}

impl fmt::Display for Fitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", v)?;
        }
        if !self.description.is_empty() {
            write!(f, " ({})", self.description)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let fitness = Fitness::new(vec![1.0, 2.5]).with_description("ok");
        assert_eq!(fitness.to_string(), "1 2.5 (ok)");
        assert_eq!(Fitness::new(vec![3.0]).to_string(), "3");
    }

    #[test]
    fn test_first_negative() {
        assert_eq!(Fitness::new(vec![1.0, 0.0]).first_negative(), None);
        assert_eq!(Fitness::new(vec![1.0, -0.5, -1.0]).first_negative(), Some(1));
    }
}
