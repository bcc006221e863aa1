//! Diagnostic stream adapter
//!
//! Subscribes to `textDocument/publishDiagnostics` and turns each payload into
//! [`Diagnostic`] records on an unbounded FIFO queue. The consumer pulls them
//! as an infinite asynchronous sequence: the stream never ends on its own and
//! terminates only through external cancellation (client shutdown), after
//! which the queue drains and `next` returns `None`.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::lsp::client::LspClient;
use crate::lsp::error::LspError;

pub const PUBLISH_DIAGNOSTICS_METHOD: &str = "textDocument/publishDiagnostics";

/// One reported issue for a document. Created only from publishDiagnostics
/// payloads and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub uri: String,
    pub message: String,
    pub severity: i64,
    pub line: u32,
    pub character: u32,
}

// Lenient mirror of the publishDiagnostics params: servers differ in which
// optional fields they send, so everything defaults instead of failing the
// whole payload.

#[derive(Debug, Deserialize)]
struct PublishDiagnosticsParams {
    #[serde(default)]
    uri: String,
    #[serde(default)]
    diagnostics: Vec<RawDiagnostic>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDiagnostic {
    #[serde(default)]
    message: String,
    #[serde(default)]
    severity: i64,
    #[serde(default)]
    range: RawRange,
}

#[derive(Debug, Default, Deserialize)]
struct RawRange {
    #[serde(default)]
    start: RawPosition,
}

#[derive(Debug, Default, Deserialize)]
struct RawPosition {
    #[serde(default)]
    line: u32,
    #[serde(default)]
    character: u32,
}

fn decode_payload(params: Value) -> Vec<Diagnostic> {
    let parsed = match serde_json::from_value::<PublishDiagnosticsParams>(params) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("dropping unparsable publishDiagnostics payload: {}", e);
            return Vec::new();
        }
    };

    parsed
        .diagnostics
        .into_iter()
        .map(|raw| Diagnostic {
            uri: parsed.uri.clone(),
            message: raw.message,
            severity: raw.severity,
            line: raw.range.start.line,
            character: raw.range.start.character,
        })
        .collect()
}

/// Single-consumer sequence of diagnostics in wire arrival order
pub struct DiagnosticStream {
    receiver: mpsc::UnboundedReceiver<Diagnostic>,
}

impl DiagnosticStream {
    /// Register the publishDiagnostics handler on the client and return the
    /// consuming end of the queue.
    ///
    /// The handler itself only enqueues (it runs on the dispatcher's read
    /// loop and must not block), so a slow consumer never stalls frame reads.
    pub fn subscribe(client: &LspClient) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        client.on_notification(PUBLISH_DIAGNOSTICS_METHOD, move |params: Value| {
            for diagnostic in decode_payload(params) {
                // A dropped receiver just means the consumer went away
                let _ = sender.send(diagnostic);
            }
        });
        Self { receiver }
    }

    /// Wait for the next diagnostic. Suspends until one is enqueued; returns
    /// `None` only after the client has shut down and the queue is drained.
    pub async fn next(&mut self) -> Option<Diagnostic> {
        self.receiver.recv().await
    }
}

/// A running diagnostic-streaming session: owns the client so the caller can
/// still shut the server down when done consuming.
pub struct DiagnosticSession {
    client: LspClient,
    stream: DiagnosticStream,
}

impl DiagnosticSession {
    pub async fn next(&mut self) -> Option<Diagnostic> {
        self.stream.next().await
    }

    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }
}

/// Convenience composition: start the server, open the document, and hand back
/// the diagnostic sequence with the lifecycle hidden inside the session.
pub async fn stream_diagnostics(
    command: &[String],
    root_path: &Path,
    file_path: &Path,
    language_id: &str,
) -> Result<DiagnosticSession, LspError> {
    let client = LspClient::new();
    // Subscribe before the handshake so no notification can slip past
    let stream = DiagnosticStream::subscribe(&client);

    client.start(command, root_path).await?;
    client.open_document(file_path, language_id).await?;

    Ok(DiagnosticSession { client, stream })
}

// ============================================================================
// Tests
// ============================================================================
