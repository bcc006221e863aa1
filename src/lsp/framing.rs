//! LSP message framing layer
//!
//! Handles the wire framing used by stdio language servers: each message is a
//! header block terminated by an empty line, followed by a JSON body of exactly
//! `Content-Length` bytes.
//!
//! Framing format:
//! Content-Length: <length>\r\n\r\n<content>
//!
//! `Content-Length` counts UTF-8 bytes of the serialized body, not characters.

use std::collections::HashMap;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Maximum message size to prevent memory exhaustion
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Error types for LSP framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid Content-Length value: {0}")]
    InvalidContentLength(String),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("malformed message body: {0}")]
    MalformedMessage(#[source] serde_json::Error),
}

/// Header block of one frame: lower-cased header names mapped to trimmed values.
pub type HeaderBlock = HashMap<String, String>;

/// Write one framed message: `Content-Length` header block plus JSON body.
///
/// The declared length is the UTF-8 byte count of the serialized body. The
/// writer is flushed before returning so a frame is never left sitting in a
/// buffer across calls.
pub async fn write_frame<W>(writer: &mut W, payload: &Value) -> Result<(), FramingError>
where
    W: AsyncWrite + Unpin,
{
    let body = payload.to_string();
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    writer.write_all(header.as_bytes()).await?;
    writer.write_all(body.as_bytes()).await?;
    writer.flush().await?;

    trace!("framing: wrote frame ({} bytes content)", body.len());
    Ok(())
}

/// Read one header block: CRLF-terminated lines until an empty line.
///
/// Each non-empty line is split at the first `:`; names are lower-cased and
/// values trimmed. Lines without a separator are ignored. Returns `Ok(None)`
/// when the stream closes before a complete header block is read.
pub async fn read_headers<R>(reader: &mut R) -> Result<Option<HeaderBlock>, FramingError>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = HeaderBlock::new();
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            // EOF: the stream ended before the empty separator line
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            return Ok(Some(headers));
        }

        if let Some(colon) = trimmed.find(':') {
            let name = trimmed[..colon].to_ascii_lowercase();
            let value = trimmed[colon + 1..].trim().to_string();
            headers.insert(name, value);
        }
    }
}

/// Extract the `content-length` header as a signed integer.
///
/// Returns `Ok(None)` when the header is absent; a present but unparsable
/// value is an error because the body boundary can no longer be located.
pub fn content_length(headers: &HeaderBlock) -> Result<Option<i64>, FramingError> {
    match headers.get("content-length") {
        None => Ok(None),
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| FramingError::InvalidContentLength(raw.clone())),
    }
}

/// Read exactly `length` bytes and parse them as a JSON message.
///
/// A parse failure yields [`FramingError::MalformedMessage`]; the body bytes
/// have already been consumed, so the stream stays aligned on frame
/// boundaries and the caller may continue with the next frame.
pub async fn read_body<R>(reader: &mut R, length: usize) -> Result<Value, FramingError>
where
    R: AsyncBufRead + Unpin,
{
    if length > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge {
            size: length,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    serde_json::from_slice(&body).map_err(FramingError::MalformedMessage)
}

/// Read the next complete frame from the stream.
///
/// Frames whose header block has no `content-length`, or declares a length of
/// zero or less, carry no body and are skipped silently. Returns `Ok(None)`
/// when the stream is closed.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Value>, FramingError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let Some(headers) = read_headers(reader).await? else {
            return Ok(None);
        };

        match content_length(&headers)? {
            Some(length) if length > 0 => {
                return read_body(reader, length as usize).await.map(Some);
            }
            other => {
                trace!("framing: skipping frame with content-length {:?}", other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn encode(payload: &Value) -> Vec<u8> {
        let mut buf = Vec::new();
        write_frame(&mut buf, payload).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_frame_roundtrip() {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": { "uri": "file:///a.py" }
        });

        let buf = encode(&payload).await;
        let decoded = read_frame(&mut buf.as_slice()).await.unwrap().unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn test_multiple_frames() {
        let first = json!({"jsonrpc": "2.0", "id": 1});
        let second = json!({"jsonrpc": "2.0", "id": 2});

        let mut buf = encode(&first).await;
        buf.extend(encode(&second).await);

        let mut reader = buf.as_slice();
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), first);
        assert_eq!(read_frame(&mut reader).await.unwrap().unwrap(), second);
    }

    #[tokio::test]
    async fn test_content_length_counts_bytes_not_chars() {
        // "é" is two bytes in UTF-8
        let payload = json!({"k": "é"});
        let buf = encode(&payload).await;

        let body = payload.to_string();
        assert!(body.len() > body.chars().count());

        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with(&format!("Content-Length: {}\r\n\r\n", body.len())));

        let decoded = read_frame(&mut buf.as_slice()).await.unwrap().unwrap();
        assert_eq!(decoded["k"], "é");
    }

    #[tokio::test]
    async fn test_eof_returns_none() {
        let buf: &[u8] = b"";
        assert!(read_frame(&mut &*buf).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_headers_returns_none() {
        // No empty separator line before the stream closes
        let buf: &[u8] = b"Content-Length: 10\r\n";
        assert!(read_frame(&mut &*buf).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_headers_lowercased_and_trimmed() {
        let buf: &[u8] =
            b"Content-Length: 2\r\nContent-Type:  application/vscode-jsonrpc \r\n\r\n{}";
        let mut reader = &*buf;
        let headers = read_headers(&mut reader).await.unwrap().unwrap();
        assert_eq!(headers.get("content-length").unwrap(), "2");
        assert_eq!(headers.get("content-type").unwrap(), "application/vscode-jsonrpc");
    }

    #[tokio::test]
    async fn test_missing_content_length_skips_frame() {
        let payload = json!({"jsonrpc": "2.0", "id": 7});
        let mut buf = b"Content-Type: application/vscode-jsonrpc\r\n\r\n".to_vec();
        buf.extend(encode(&payload).await);

        let decoded = read_frame(&mut buf.as_slice()).await.unwrap().unwrap();
        assert_eq!(decoded["id"], 7);
    }

    #[tokio::test]
    async fn test_zero_content_length_skips_frame() {
        let payload = json!({"jsonrpc": "2.0", "id": 8});
        let mut buf = b"Content-Length: 0\r\n\r\n".to_vec();
        buf.extend(encode(&payload).await);

        let decoded = read_frame(&mut buf.as_slice()).await.unwrap().unwrap();
        assert_eq!(decoded["id"], 8);
    }

    #[tokio::test]
    async fn test_negative_content_length_skips_frame() {
        let payload = json!({"jsonrpc": "2.0", "id": 9});
        let mut buf = b"Content-Length: -3\r\n\r\n".to_vec();
        buf.extend(encode(&payload).await);

        let decoded = read_frame(&mut buf.as_slice()).await.unwrap().unwrap();
        assert_eq!(decoded["id"], 9);
    }

    #[tokio::test]
    async fn test_unparsable_content_length_is_error() {
        let buf: &[u8] = b"Content-Length: not_a_number\r\n\r\n";
        let result = read_frame(&mut &*buf).await;
        assert!(matches!(
            result.unwrap_err(),
            FramingError::InvalidContentLength(_)
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_keeps_stream_aligned() {
        // A 5-byte unparsable body followed by a well-formed frame: the error
        // is isolated to the first frame and the second still decodes.
        let good = json!({"jsonrpc": "2.0", "method": "m"});
        let mut buf = b"Content-Length: 5\r\n\r\nnotjs".to_vec();
        buf.extend(encode(&good).await);

        let mut reader = buf.as_slice();
        let first = read_frame(&mut reader).await;
        assert!(matches!(
            first.unwrap_err(),
            FramingError::MalformedMessage(_)
        ));

        let second = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(second, good);
    }

    #[tokio::test]
    async fn test_eof_mid_body_is_io_error() {
        let buf: &[u8] = b"Content-Length: 100\r\n\r\nhello";
        let result = read_frame(&mut &*buf).await;
        assert!(matches!(result.unwrap_err(), FramingError::Io(_)));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_MESSAGE_SIZE + 1);
        let result = read_frame(&mut header.as_bytes()).await;
        assert!(matches!(
            result.unwrap_err(),
            FramingError::MessageTooLarge { .. }
        ));
    }
}
