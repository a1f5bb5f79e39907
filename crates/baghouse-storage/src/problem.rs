//! Non-fatal conditions reported alongside results.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Something the caller should know about that did not stop the operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    pub severity: Severity,
    pub message: String,
    /// Underlying error text, if the problem came from an error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Problem {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>, error: &dyn std::error::Error) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            error: Some(error.to_string()),
        }
    }

    /// Attach explanatory text.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.error = Some(detail.into());
        self
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match &self.error {
            Some(error) => write!(f, "{}: {} ({})", label, self.message, error),
            None => write!(f, "{}: {}", label, self.message),
        }
    }
}
