//! Explicit operator registry.
//!
//! Operators are registered once by name and handed to the scheduler through
//! this value, so there is no process-wide operator table.

use crate::schema::{DefaultOperators, SchedulerConfig};

/// Whether an operator participates when no explicit choice is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatorCategory {
    #[default]
    DefaultOn,
    DefaultOff,
}

/// A registered operator and its payload.
#[derive(Debug, Clone)]
pub struct RegisteredOperator<O> {
    pub name: String,
    pub category: OperatorCategory,
    pub operator: O,
}

/// Ordered collection of registered operators.
#[derive(Debug, Clone)]
pub struct OperatorRegistry<O> {
    operators: Vec<RegisteredOperator<O>>,
}

impl<O> Default for OperatorRegistry<O> {
    fn default() -> Self {
        Self {
            operators: Vec::new(),
        }
    }
}

impl<O> OperatorRegistry<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operator under a unique name.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        category: OperatorCategory,
        operator: O,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.contains(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.operators.push(RegisteredOperator {
            name,
            category,
            operator,
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.iter().any(|o| o.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&O> {
        self.operators
            .iter()
            .find(|o| o.name == name)
            .map(|o| &o.operator)
    }

    /// Operator at a scheduler index.
    pub fn by_index(&self, index: usize) -> Option<&RegisteredOperator<O>> {
        self.operators.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredOperator<O>> {
        self.operators.iter()
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Names of the operators enabled under the given configuration, in
    /// registration order.
    ///
    /// Explicit `enable`/`disable` lists win over the default policy.
    pub fn enabled_names(&self, config: &SchedulerConfig) -> Result<Vec<String>, RegistryError> {
        for name in config.enable.iter().chain(config.disable.iter()) {
            if !self.contains(name) {
                return Err(RegistryError::Unknown(name.clone()));
            }
        }

        let names: Vec<String> = self
            .operators
            .iter()
            .filter(|o| {
                if config.disable.contains(&o.name) {
                    return false;
                }
                if config.enable.contains(&o.name) {
                    return true;
                }
                match config.default_operators {
                    DefaultOperators::None => false,
                    DefaultOperators::All => true,
                    DefaultOperators::Smart => o.category == OperatorCategory::DefaultOn,
                }
            })
            .map(|o| o.name.clone())
            .collect();

        if names.is_empty() {
            return Err(RegistryError::NoEnabledOperators);
        }
        Ok(names)
    }
}

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Operator {0} is registered more than once")]
    Duplicate(String),
    #[error("Unknown operator {0}")]
    Unknown(String),
    #[error("No enabled operators")]
    NoEnabledOperators,
}
