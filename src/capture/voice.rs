//! Speech capture and transcription
//!
//! Records a phrase from the default microphone with an external recorder and
//! hands the WAV to a transcriber command. The transcriber contract: takes the
//! audio path as its last argument and prints either a JSON object
//! `{"text": ..., "confidence": ...}` or the bare transcript on stdout.
//!
//! Capture is fixed-duration (`phrase_limit` seconds); the recorder has no
//! voice activity detection, so `timeout` only bounds how long the recorder
//! may take overall before the capture is abandoned.

use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::capture::error::CaptureError;

/// Default transcriber binary, overridable via `VOICE_ASSISTANT_TRANSCRIBER`
const DEFAULT_TRANSCRIBER: &str = "whisper-cli";

const TRANSCRIBER_ENV: &str = "VOICE_ASSISTANT_TRANSCRIBER";

/// A transcribed voice phrase with confidence in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceCommand {
    pub text: String,
    pub confidence: f64,
}

impl VoiceCommand {
    /// The result for silence or an empty transcription
    fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranscriberOutput {
    #[serde(default)]
    text: String,
    #[serde(default)]
    confidence: f64,
}

fn transcriber_command() -> String {
    std::env::var(TRANSCRIBER_ENV).unwrap_or_else(|_| DEFAULT_TRANSCRIBER.to_string())
}

/// Record a phrase and transcribe it.
///
/// `phrase_limit` caps the recorded duration in seconds; `timeout` caps the
/// whole capture. Returns `{ text: "", confidence: 0.0 }` when nothing was
/// recognized. Fails with [`CaptureError::MissingCapability`] naming the
/// missing binary when the recorder or transcriber is unavailable.
pub async fn recognize_speech(
    timeout: f64,
    phrase_limit: f64,
) -> Result<VoiceCommand, CaptureError> {
    let transcriber = transcriber_command();

    which::which("arecord")
        .map_err(|_| CaptureError::missing("arecord", "apt install alsa-utils"))?;
    which::which(&transcriber).map_err(|_| {
        CaptureError::missing(
            &transcriber,
            &format!("install it or set {TRANSCRIBER_ENV}"),
        )
    })?;

    let dir = tempfile::tempdir()?;
    let wav = dir.path().join("phrase.wav");

    let seconds = phrase_limit.max(1.0).ceil() as u64;
    info!("recording up to {}s of audio", seconds);

    let record = Command::new("arecord")
        .args(["-q", "-f", "S16_LE", "-r", "16000", "-c", "1"])
        .args(["-d", &seconds.to_string()])
        .arg(&wav)
        .output();

    let capture_budget = Duration::from_secs_f64((timeout + phrase_limit).max(1.0) + 5.0);
    let output = tokio::time::timeout(capture_budget, record)
        .await
        .map_err(|_| CaptureError::ToolFailed {
            tool: "arecord".to_string(),
            detail: "recording timed out".to_string(),
        })??;

    if !output.status.success() {
        return Err(CaptureError::ToolFailed {
            tool: "arecord".to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    debug!("transcribing with '{}'", transcriber);
    let output = Command::new(&transcriber)
        .arg(&wav)
        .output()
        .await
        .map_err(|e| CaptureError::ToolFailed {
            tool: transcriber.clone(),
            detail: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(CaptureError::ToolFailed {
            tool: transcriber,
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(parse_transcriber_output(&String::from_utf8_lossy(
        &output.stdout,
    )))
}

/// Interpret transcriber stdout: JSON `{text, confidence}` preferred, bare
/// text (confidence 0.0) as fallback, empty output as silence.
fn parse_transcriber_output(stdout: &str) -> VoiceCommand {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return VoiceCommand::empty();
    }

    if let Ok(parsed) = serde_json::from_str::<TranscriberOutput>(trimmed) {
        if parsed.text.trim().is_empty() {
            return VoiceCommand::empty();
        }
        return VoiceCommand {
            text: parsed.text.trim().to_string(),
            confidence: parsed.confidence.clamp(0.0, 1.0),
        };
    }

    VoiceCommand {
        text: trimmed.to_string(),
        confidence: 0.0,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_output() {
        let result = parse_transcriber_output(r#"{"text": "open the file", "confidence": 0.92}"#);
        assert_eq!(result.text, "open the file");
        assert!((result.confidence - 0.92).abs() < 1e-9);
    }

    #[test]
    fn test_parse_json_without_confidence_defaults_to_zero() {
        let result = parse_transcriber_output(r#"{"text": "hello"}"#);
        assert_eq!(result.text, "hello");
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_parse_plain_text_fallback() {
        let result = parse_transcriber_output("show diagnostics\n");
        assert_eq!(result.text, "show diagnostics");
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_parse_empty_output_is_silence() {
        assert_eq!(parse_transcriber_output("  \n"), VoiceCommand::empty());
    }

    #[test]
    fn test_parse_json_empty_text_is_silence() {
        let result = parse_transcriber_output(r#"{"text": "", "confidence": 0.5}"#);
        assert_eq!(result, VoiceCommand::empty());
    }

    #[test]
    fn test_confidence_clamped_to_unit_interval() {
        let result = parse_transcriber_output(r#"{"text": "x", "confidence": 3.5}"#);
        assert_eq!(result.confidence, 1.0);
    }
}
