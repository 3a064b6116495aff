//! Purpose: Client-side validation contract for values submitted to the store.
//! Exports: `Validate`, `ValidationIssue`.
//! Role: Gate run by `Client::save` before anything is serialized or sent.
//! Invariants: A rejected value never reaches the network.
use std::error::Error as StdError;
use std::fmt;

/// Implemented by every value that can be saved as a configuration item.
pub trait Validate {
    fn validate(&self) -> Result<(), ValidationIssue>;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationIssue {
    pub field: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{field}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl StdError for ValidationIssue {}
