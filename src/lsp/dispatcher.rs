//! Dispatcher - routes inbound frames to registered notification handlers
//!
//! Owns the single background read loop over the transport. Each decoded
//! notification is delivered to every handler registered for its method, in
//! registration order. Responses (frames with an `id` and no `method`) are
//! dropped: the lifecycle calls made by this client never need the returned
//! value, so there is no pending-request table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::lsp::transport::Transport;

/// Notification handler callback. Handlers run synchronously on the read loop
/// and must be fast and non-blocking; long-running work hands off internally
/// (the diagnostic stream pushes into a queue, for example).
pub type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Routes notifications by method name and allocates request identifiers
pub struct Dispatcher {
    /// Method name -> handlers in registration order
    handlers: Mutex<HashMap<String, Vec<NotificationHandler>>>,

    /// Next outbound request id; strictly increasing, never reused
    next_id: AtomicI64,

    /// Handle of the background read loop, present while it runs
    read_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            read_loop: Mutex::new(None),
        }
    }

    /// Allocate a fresh request identifier, starting at 1.
    pub fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a handler for a notification method.
    ///
    /// May be called at any time, including while the read loop is running;
    /// messages already dispatched are unaffected.
    pub fn register(&self, method: &str, handler: NotificationHandler) {
        self.handlers
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push(handler);
    }

    /// Start the background read loop over the transport.
    ///
    /// The loop exits cleanly when the transport reports a closed stream.
    /// Recoverable per-frame errors (malformed bodies) are logged and the loop
    /// continues with the next frame.
    pub fn spawn_read_loop(self: &Arc<Self>, transport: Arc<dyn Transport>) {
        let dispatcher = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                match transport.read_next_frame().await {
                    Ok(Some(frame)) => dispatcher.dispatch(frame),
                    Ok(None) => {
                        debug!("language server closed its output stream");
                        break;
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!("dropping malformed frame: {}", e);
                    }
                    Err(e) => {
                        warn!("read loop terminating: {}", e);
                        break;
                    }
                }
            }
            trace!("dispatcher read loop finished");
        });

        *self.read_loop.lock().unwrap() = Some(handle);
    }

    /// Cancel the background read loop. No handler runs after this returns.
    pub fn abort_read_loop(&self) {
        if let Some(handle) = self.read_loop.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Wait for the read loop to finish on its own (stream closed).
    #[cfg(test)]
    pub(crate) async fn join_read_loop(&self) {
        let handle = self.read_loop.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Classify one inbound frame and invoke handlers for notifications.
    fn dispatch(&self, frame: Value) {
        let method = frame.get("method").and_then(Value::as_str);
        let has_id = frame.get("id").is_some();

        match (method, has_id) {
            (Some(method), false) => {
                // Handlers are cloned out so registration never blocks behind
                // a running callback.
                let handlers: Vec<NotificationHandler> = self
                    .handlers
                    .lock()
                    .unwrap()
                    .get(method)
                    .cloned()
                    .unwrap_or_default();

                if handlers.is_empty() {
                    trace!("no handler registered for notification '{}'", method);
                    return;
                }

                let params = frame.get("params").cloned().unwrap_or(Value::Null);
                for handler in handlers {
                    handler(params.clone());
                }
            }
            (None, true) => {
                // Response to a lifecycle request; nothing awaits the value
                trace!("dropping response frame: {}", frame);
            }
            _ => {
                trace!("ignoring frame that is neither notification nor response");
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
