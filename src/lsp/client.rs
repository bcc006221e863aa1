//! Protocol client facade
//!
//! [`LspClient`] combines the transport and the dispatcher into the lifecycle
//! API: start (spawn + initialize handshake), open/change documents, handler
//! registration, and best-effort shutdown.
//!
//! Responses from the server are never awaited: the lifecycle calls made here
//! do not need the returned values, so requests are fire-and-forget and the
//! dispatcher drops response frames.

use std::path::Path;
use std::sync::{Arc, Mutex};

use lsp_types::{
    ClientCapabilities, ClientInfo, DidChangeTextDocumentParams, DidOpenTextDocumentParams,
    InitializeParams, PublishDiagnosticsClientCapabilities, TextDocumentClientCapabilities,
    TextDocumentContentChangeEvent, TextDocumentItem, TextDocumentSyncClientCapabilities, Uri,
    VersionedTextDocumentIdentifier,
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::lsp::dispatcher::Dispatcher;
use crate::lsp::error::LspError;
use crate::lsp::transport::{StdioTransport, Transport};

/// JSON-RPC request envelope; ids come from the dispatcher's counter.
#[derive(Debug, Serialize)]
struct Request {
    jsonrpc: &'static str,
    id: i64,
    method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl Request {
    fn new(id: i64, method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// JSON-RPC notification envelope (no id, no reply expected).
#[derive(Debug, Serialize)]
struct Notification {
    jsonrpc: &'static str,
    method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl Notification {
    fn new(method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Convert a filesystem path into a `file://` URI.
///
/// Goes through `url::Url` so segments with spaces or non-ASCII characters
/// are percent-encoded instead of rejected.
fn file_uri(path: &Path) -> Result<Uri, LspError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        path.canonicalize()?
    };
    let invalid = || LspError::InvalidUri(absolute.display().to_string());
    let url = url::Url::from_file_path(&absolute).map_err(|_| invalid())?;
    url.as_str().parse().map_err(|_| invalid())
}

fn initialize_params(root_uri: Uri) -> InitializeParams {
    InitializeParams {
        process_id: Some(std::process::id()),
        #[allow(deprecated)]
        root_uri: Some(root_uri),
        capabilities: ClientCapabilities {
            text_document: Some(TextDocumentClientCapabilities {
                synchronization: Some(TextDocumentSyncClientCapabilities {
                    dynamic_registration: Some(false),
                    will_save: Some(false),
                    will_save_wait_until: Some(false),
                    did_save: Some(false),
                }),
                publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
                    related_information: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        client_info: Some(ClientInfo {
            name: "voice-assistant".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        ..Default::default()
    }
}

/// Client for a single language server over stdio
pub struct LspClient {
    /// Present once `start` succeeded; `None` before start and after shutdown
    transport: Mutex<Option<Arc<dyn Transport>>>,

    dispatcher: Arc<Dispatcher>,
}

impl LspClient {
    pub fn new() -> Self {
        Self {
            transport: Mutex::new(None),
            dispatcher: Arc::new(Dispatcher::new()),
        }
    }

    /// Spawn the server, start the dispatcher loop, and run the initialize
    /// handshake (`initialize` request, then `initialized` notification).
    ///
    /// The handshake is issued before this returns, so document operations
    /// made afterwards are correctly ordered behind it on the wire.
    pub async fn start(&self, command: &[String], root_path: &Path) -> Result<(), LspError> {
        let transport: Arc<dyn Transport> = Arc::new(StdioTransport::spawn(command)?);
        self.start_with_transport(transport, root_path).await
    }

    pub(crate) async fn start_with_transport(
        &self,
        transport: Arc<dyn Transport>,
        root_path: &Path,
    ) -> Result<(), LspError> {
        {
            let mut slot = self.transport.lock().unwrap();
            if slot.is_some() {
                return Err(LspError::AlreadyStarted);
            }
            *slot = Some(Arc::clone(&transport));
        }

        self.dispatcher.spawn_read_loop(Arc::clone(&transport));

        // A failed handshake must not leave the server process running or
        // the slot occupied.
        if let Err(e) = self.initialize_handshake(root_path).await {
            self.transport.lock().unwrap().take();
            self.dispatcher.abort_read_loop();
            transport.terminate().await;
            return Err(e);
        }

        Ok(())
    }

    async fn initialize_handshake(&self, root_path: &Path) -> Result<(), LspError> {
        let root_uri = file_uri(root_path)?;
        info!("initializing language server (root: {:?})", root_uri.as_str());

        let params = serde_json::to_value(initialize_params(root_uri))?;
        self.send_request("initialize", Some(params)).await?;
        self.send_notification("initialized", Some(json!({}))).await?;
        Ok(())
    }

    /// Read the document at `path` and announce it with `textDocument/didOpen`
    /// (version 1, full text).
    pub async fn open_document(&self, path: &Path, language_id: &str) -> Result<(), LspError> {
        let text = tokio::fs::read_to_string(path).await?;
        let params = DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: file_uri(path)?,
                language_id: language_id.to_string(),
                version: 1,
                text,
            },
        };
        self.send_notification("textDocument/didOpen", Some(serde_json::to_value(params)?))
            .await
    }

    /// Send the full replacement text with `textDocument/didChange`.
    ///
    /// `version` is taken as-is; keeping it monotonically increasing across
    /// calls is the caller's responsibility, matching the protocol contract.
    pub async fn change_document(
        &self,
        path: &Path,
        text: &str,
        version: i32,
    ) -> Result<(), LspError> {
        let params = DidChangeTextDocumentParams {
            text_document: VersionedTextDocumentIdentifier {
                uri: file_uri(path)?,
                version,
            },
            content_changes: vec![TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: text.to_string(),
            }],
        };
        self.send_notification(
            "textDocument/didChange",
            Some(serde_json::to_value(params)?),
        )
        .await
    }

    /// Register a callback for a server notification method.
    pub fn on_notification<F>(&self, method: &str, callback: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.dispatcher.register(method, Arc::new(callback));
    }

    /// Graceful teardown: `shutdown` request, `exit` notification, cancel the
    /// read loop, terminate the process.
    ///
    /// Best-effort throughout. The server may already be gone, so send errors
    /// are swallowed; transport termination runs unconditionally. Idempotent,
    /// and a no-op when the client was never started.
    pub async fn shutdown(&self) {
        let Some(transport) = self.transport.lock().unwrap().take() else {
            return;
        };

        info!("shutting down language server");

        let shutdown = Request::new(self.dispatcher.next_id(), "shutdown", None);
        if let Ok(frame) = serde_json::to_value(&shutdown) {
            if let Err(e) = transport.write_frame(&frame).await {
                debug!("shutdown request not delivered: {}", e);
            }
        }
        let exit = Notification::new("exit", None);
        if let Ok(frame) = serde_json::to_value(&exit) {
            if let Err(e) = transport.write_frame(&frame).await {
                debug!("exit notification not delivered: {}", e);
            }
        }

        self.dispatcher.abort_read_loop();
        transport.terminate().await;
    }

    fn transport(&self) -> Result<Arc<dyn Transport>, LspError> {
        self.transport
            .lock()
            .unwrap()
            .clone()
            .ok_or(LspError::NotStarted)
    }

    async fn send_request(
        &self,
        method: &'static str,
        params: Option<Value>,
    ) -> Result<(), LspError> {
        let transport = self.transport()?;
        let request = Request::new(self.dispatcher.next_id(), method, params);
        let frame = serde_json::to_value(&request)?;
        debug!("sending request '{}' (id {})", method, request.id);
        Ok(transport.write_frame(&frame).await?)
    }

    async fn send_notification(
        &self,
        method: &'static str,
        params: Option<Value>,
    ) -> Result<(), LspError> {
        let transport = self.transport()?;
        let notification = Notification::new(method, params);
        let frame = serde_json::to_value(&notification)?;
        debug!("sending notification '{}'", method);
        Ok(transport.write_frame(&frame).await?)
    }
}

impl Default for LspClient {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
