//! LSP protocol client for streaming diagnostics
//!
//! Layered bottom-up:
//!
//! - **framing**: Content-Length wire framing over byte streams
//! - **transport**: the external server process and its stdio pipes
//! - **dispatcher**: the background read loop and the notification handler
//!   registry
//! - **client**: lifecycle facade (start / didOpen / didChange / shutdown)
//! - **diagnostics**: publishDiagnostics payloads as an async FIFO sequence
//!
//! Only the lifecycle exchanges are implemented; inbound response frames are
//! dropped without correlation because nothing here awaits a result.

pub mod client;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod framing;
pub mod transport;

pub use client::LspClient;
pub use diagnostics::{Diagnostic, DiagnosticSession, DiagnosticStream, stream_diagnostics};
pub use error::LspError;
