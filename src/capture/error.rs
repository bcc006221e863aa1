//! Error types for the capture collaborators

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("missing capability '{name}'. Install with: {hint}")]
    MissingCapability { name: String, hint: String },

    #[error("'{tool}' failed: {detail}")]
    ToolFailed { tool: String, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    pub(crate) fn missing(name: &str, hint: &str) -> Self {
        Self::MissingCapability {
            name: name.to_string(),
            hint: hint.to_string(),
        }
    }
}
