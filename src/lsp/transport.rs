//! Transport layer - owns the language server process and its byte streams
//!
//! [`StdioTransport`] spawns the external server with piped stdin/stdout/stderr
//! and exposes framed read/write primitives on top of the framing layer. The
//! [`Transport`] trait is the seam that lets the dispatcher and client run
//! against a mock in tests.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, trace};

use crate::lsp::framing::{self, FramingError};

/// How long to wait for the server to exit after SIGTERM before force killing
const TERMINATE_TIMEOUT_SECS: u64 = 2;

/// Error types for the transport layer
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport closed")]
    Closed,

    #[error(transparent)]
    Framing(#[from] FramingError),
}

impl TransportError {
    /// Whether the read loop may continue after this error.
    ///
    /// A malformed body is isolated to its frame: the bytes were consumed and
    /// the stream is still aligned on the next header block. Everything else
    /// leaves the stream in an unknown state.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Framing(FramingError::MalformedMessage(_)))
    }
}

/// Bidirectional framed message exchange with a language server
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one framed message and flush it.
    ///
    /// Calls are atomic with respect to each other: two concurrent writers can
    /// never interleave partial frames.
    async fn write_frame(&self, payload: &Value) -> Result<(), TransportError>;

    /// Read the next framed message. `Ok(None)` means the stream is closed
    /// (server exited or its stdout was closed).
    async fn read_next_frame(&self) -> Result<Option<Value>, TransportError>;

    /// Request termination of the server process and wait for it to exit.
    /// Idempotent: calling it on an already-stopped transport is a no-op.
    async fn terminate(&self);
}

// ============================================================================
// Stdio Transport Implementation
// ============================================================================

/// Transport over a spawned child process's stdin/stdout
pub struct StdioTransport {
    child: Mutex<Option<Child>>,
    writer: Mutex<ChildStdin>,
    reader: Mutex<BufReader<ChildStdout>>,
}

impl StdioTransport {
    /// Spawn the language server and capture its stdio streams.
    ///
    /// Stderr is drained by a background task into the log so the child can
    /// never block on a full pipe.
    pub fn spawn(command: &[String]) -> Result<Self, TransportError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| TransportError::SpawnFailed {
                command: String::new(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            })?;

        info!("spawning language server: {} {:?}", program, args);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TransportError::SpawnFailed {
                command: program.clone(),
                source,
            })?;

        // Piped stdio was requested above, so all three handles exist
        let take_err = || TransportError::SpawnFailed {
            command: program.clone(),
            source: std::io::Error::other("child stdio stream not captured"),
        };
        let stdin = child.stdin.take().ok_or_else(take_err)?;
        let stdout = child.stdout.take().ok_or_else(take_err)?;
        let stderr = child.stderr.take().ok_or_else(take_err)?;

        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let content = line.trim();
                        if !content.is_empty() {
                            debug!(target: "language_server", "{}", content);
                        }
                    }
                }
            }
            trace!("stderr drain finished");
        });

        Ok(Self {
            child: Mutex::new(Some(child)),
            writer: Mutex::new(stdin),
            reader: Mutex::new(BufReader::new(stdout)),
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn write_frame(&self, payload: &Value) -> Result<(), TransportError> {
        // The mutex serializes the whole header+body write, keeping frames
        // atomic across concurrent callers.
        let mut writer = self.writer.lock().await;
        framing::write_frame(&mut *writer, payload)
            .await
            .map_err(|e| match e {
                // A write failure on the pipe means the server went away
                FramingError::Io(_) => TransportError::Closed,
                other => other.into(),
            })
    }

    async fn read_next_frame(&self) -> Result<Option<Value>, TransportError> {
        let mut reader = self.reader.lock().await;
        Ok(framing::read_frame(&mut *reader).await?)
    }

    async fn terminate(&self) {
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            debug!("sending SIGTERM to language server (pid {})", pid);
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }

        match tokio::time::timeout(
            Duration::from_secs(TERMINATE_TIMEOUT_SECS),
            child.wait(),
        )
        .await
        {
            Ok(Ok(status)) => info!("language server exited with status: {}", status),
            Ok(Err(e)) => debug!("error waiting for language server exit: {}", e),
            Err(_) => {
                debug!("language server did not exit in time, killing");
                let _ = child.kill().await;
            }
        }
    }
}

// ============================================================================
// Mock Transport Implementation
// ============================================================================

/// Mock transport for tests: scripted inbound frames, recorded outbound frames
#[cfg(test)]
pub(crate) struct MockTransport {
    inbound: Mutex<std::collections::VecDeque<Result<Value, TransportError>>>,
    sent: std::sync::Mutex<Vec<Value>>,
    fail_writes: std::sync::atomic::AtomicBool,
    terminated: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> Self {
        Self {
            inbound: Mutex::new(std::collections::VecDeque::new()),
            sent: std::sync::Mutex::new(Vec::new()),
            fail_writes: std::sync::atomic::AtomicBool::new(false),
            terminated: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Script the frames the read loop will observe, in order. Once the queue
    /// drains, reads report a closed stream.
    pub fn with_inbound(frames: Vec<Result<Value, TransportError>>) -> Self {
        let transport = Self::new();
        transport.inbound.try_lock().unwrap().extend(frames);
        transport
    }

    pub fn sent_frames(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn was_terminated(&self) -> bool {
        self.terminated.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn write_frame(&self, payload: &Value) -> Result<(), TransportError> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push(payload.clone());
        Ok(())
    }

    async fn read_next_frame(&self) -> Result<Option<Value>, TransportError> {
        match self.inbound.lock().await.pop_front() {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn terminate(&self) {
        self.terminated
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spawn_failure_is_spawn_failed() {
        let command = vec!["definitely-not-a-real-binary-xyz".to_string()];
        let result = StdioTransport::spawn(&command);
        match result {
            Err(TransportError::SpawnFailed { command, .. }) => {
                assert_eq!(command, "definitely-not-a-real-binary-xyz");
            }
            _ => panic!("expected SpawnFailed"),
        }
    }

    #[test]
    fn test_spawn_empty_command_is_spawn_failed() {
        assert!(matches!(
            StdioTransport::spawn(&[]),
            Err(TransportError::SpawnFailed { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_transport_reads_frames_from_child() {
        let payload = json!({"jsonrpc": "2.0", "method": "m", "params": {}});
        let body = payload.to_string();
        let script = format!(
            "printf 'Content-Length: {}\\r\\n\\r\\n%s' '{}'",
            body.len(),
            body
        );

        let command = vec!["sh".to_string(), "-c".to_string(), script];
        let transport = StdioTransport::spawn(&command).unwrap();

        let frame = transport.read_next_frame().await.unwrap().unwrap();
        assert_eq!(frame, payload);

        // Child exits after writing; the stream reports closed
        assert!(transport.read_next_frame().await.unwrap().is_none());
        transport.terminate().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let command = vec!["sh".to_string(), "-c".to_string(), "sleep 5".to_string()];
        let transport = StdioTransport::spawn(&command).unwrap();

        transport.terminate().await;
        transport.terminate().await;
    }

    #[tokio::test]
    async fn test_mock_transport_records_writes() {
        let transport = MockTransport::new();
        transport.write_frame(&json!({"id": 1})).await.unwrap();
        transport.write_frame(&json!({"id": 2})).await.unwrap();

        let sent = transport.sent_frames();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["id"], 1);
        assert_eq!(sent[1]["id"], 2);
    }

    #[tokio::test]
    async fn test_mock_transport_scripted_reads() {
        let transport = MockTransport::with_inbound(vec![
            Ok(json!({"id": 1})),
            Err(TransportError::Closed),
        ]);

        assert_eq!(
            transport.read_next_frame().await.unwrap().unwrap()["id"],
            1
        );
        assert!(transport.read_next_frame().await.is_err());
        assert!(transport.read_next_frame().await.unwrap().is_none());
    }
}
