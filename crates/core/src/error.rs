//! Lifecycle errors and the user-facing diagnostics they turn into.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Summary of every serialization failure surfaced to the caller.
pub const SERIALIZATION_SUMMARY: &str = "Could not generate YAML";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Framework-facing diagnostic, optionally pinned to an attribute path such as `spec.rules[0].host`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>) -> Self {
        Self { severity: Severity::Error, summary: summary.into(), detail: None, attribute: None }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn at(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn is_error(&self) -> bool { self.severity == Severity::Error }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(attr) = &self.attribute { write!(f, "{}: ", attr)?; }
        f.write_str(&self.summary)?;
        if let Some(detail) = &self.detail { write!(f, ": {}", detail)?; }
        Ok(())
    }
}

/// Errors of a single lifecycle call. None of them are retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),
    #[error("invalid configuration: {}", join(.0))]
    ConfigurationValidation(Vec<Diagnostic>),
    #[error("Could not generate YAML: {0}")]
    Serialization(String),
    #[error("state store error: {0:#}")]
    Store(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Render this error as framework diagnostics.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            Error::UnknownResourceType(name) => {
                vec![Diagnostic::error("Unknown resource type").with_detail(name.clone())]
            }
            Error::ConfigurationValidation(diags) => diags.clone(),
            Error::Serialization(cause) => {
                vec![Diagnostic::error(SERIALIZATION_SUMMARY).with_detail(cause.clone())]
            }
            Error::Store(e) => vec![Diagnostic::error("Could not write state").with_detail(format!("{:#}", e))],
        }
    }
}

fn join(diags: &[Diagnostic]) -> String {
    diags.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("; ")
}
