//! Error types for the LSP client facade

use thiserror::Error;

use crate::lsp::transport::TransportError;

#[derive(Debug, Error)]
pub enum LspError {
    #[error("language server not started")]
    NotStarted,

    #[error("language server already started")]
    AlreadyStarted,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot convert path to file URI: {0}")]
    InvalidUri(String),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
