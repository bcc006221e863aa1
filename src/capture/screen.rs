//! Screen text recognition
//!
//! Thin wrapper around external capability providers: a screenshot tool grabs
//! the full screen into a temporary PNG and `tesseract` recognizes the text.
//! Per-word confidences from tesseract's TSV output are averaged into a single
//! [0, 1] score.

use tokio::process::Command;
use tracing::{debug, info};

use crate::capture::error::CaptureError;

/// Recognized screen text with an averaged confidence in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenText {
    pub text: String,
    pub confidence: f64,
}

/// Screenshot tools probed in order: (binary, args before the output path)
const SCREENSHOT_TOOLS: &[(&str, &[&str])] = &[
    ("scrot", &["-o"]),
    ("grim", &[]),
    ("import", &["-window", "root"]),
    ("screencapture", &["-x"]),
];

fn find_screenshot_tool() -> Result<(&'static str, &'static [&'static str]), CaptureError> {
    for &(binary, args) in SCREENSHOT_TOOLS {
        if which::which(binary).is_ok() {
            return Ok((binary, args));
        }
    }
    Err(CaptureError::missing(
        "screenshot tool",
        "apt install scrot (or grim / imagemagick)",
    ))
}

fn require_binary(name: &str, hint: &str) -> Result<(), CaptureError> {
    which::which(name)
        .map(|_| ())
        .map_err(|_| CaptureError::missing(name, hint))
}

/// Capture the screen and recognize its text.
///
/// `languages` are tesseract language codes, joined with `+` (defaults to
/// `eng`). Fails with [`CaptureError::MissingCapability`] naming the absent
/// binary when either provider is unavailable. Empty recognition yields
/// `{ text: "", confidence: 0.0 }`.
pub async fn recognize_screen_text(
    languages: Option<&[String]>,
) -> Result<ScreenText, CaptureError> {
    let (screenshot_bin, screenshot_args) = find_screenshot_tool()?;
    require_binary("tesseract", "apt install tesseract-ocr")?;

    let dir = tempfile::tempdir()?;
    let image = dir.path().join("screen.png");

    info!("capturing screen with '{}'", screenshot_bin);
    run_tool(
        Command::new(screenshot_bin)
            .args(screenshot_args)
            .arg(&image),
        screenshot_bin,
    )
    .await?;

    let lang = match languages {
        Some(codes) if !codes.is_empty() => codes.join("+"),
        _ => "eng".to_string(),
    };

    debug!("running tesseract (lang: {})", lang);
    let tsv = run_tool(
        Command::new("tesseract")
            .arg(&image)
            .arg("stdout")
            .args(["-l", &lang, "tsv"]),
        "tesseract",
    )
    .await?;

    Ok(parse_tesseract_tsv(&tsv))
}

async fn run_tool(command: &mut Command, tool: &str) -> Result<String, CaptureError> {
    let output = command.output().await.map_err(|e| CaptureError::ToolFailed {
        tool: tool.to_string(),
        detail: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(CaptureError::ToolFailed {
            tool: tool.to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Extract words and average confidence from tesseract's TSV output.
///
/// Column 11 is the confidence (`-1` for non-word structural rows), column 12
/// the recognized text. Confidences arrive as percentages.
fn parse_tesseract_tsv(tsv: &str) -> ScreenText {
    let mut words = Vec::new();
    let mut confidences = Vec::new();

    for line in tsv.lines().skip(1) {
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() < 12 {
            continue;
        }
        let word = columns[11].trim();
        if word.is_empty() {
            continue;
        }
        let Ok(confidence) = columns[10].parse::<f64>() else {
            continue;
        };
        if confidence < 0.0 {
            continue;
        }
        words.push(word.to_string());
        confidences.push(confidence / 100.0);
    }

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };

    ScreenText {
        text: words.join(" "),
        confidence,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    #[test]
    fn test_parse_tsv_averages_word_confidences() {
        let tsv = format!(
            "{HEADER}\n\
             1\t1\t0\t0\t0\t0\t0\t0\t100\t100\t-1\t\n\
             5\t1\t1\t1\t1\t1\t10\t10\t40\t12\t90\thello\n\
             5\t1\t1\t1\t1\t2\t60\t10\t40\t12\t70\tworld\n"
        );

        let result = parse_tesseract_tsv(&tsv);
        assert_eq!(result.text, "hello world");
        assert!((result.confidence - 0.80).abs() < 1e-9);
    }

    #[test]
    fn test_parse_tsv_skips_structural_rows() {
        // conf -1 rows (pages, blocks, lines) carry no words
        let tsv = format!(
            "{HEADER}\n\
             2\t1\t1\t0\t0\t0\t0\t0\t100\t100\t-1\t\n\
             3\t1\t1\t1\t0\t0\t0\t0\t100\t100\t-1\t\n"
        );

        let result = parse_tesseract_tsv(&tsv);
        assert_eq!(result.text, "");
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_parse_tsv_empty_output() {
        let result = parse_tesseract_tsv("");
        assert_eq!(
            result,
            ScreenText {
                text: String::new(),
                confidence: 0.0
            }
        );
    }

    #[test]
    fn test_parse_tsv_ignores_short_rows() {
        let tsv = format!("{HEADER}\ngarbage line\n");
        assert_eq!(parse_tesseract_tsv(&tsv).text, "");
    }

    #[test]
    fn test_missing_binary_names_capability() {
        let err = require_binary("definitely-not-a-real-binary-xyz", "install it").unwrap_err();
        match err {
            CaptureError::MissingCapability { name, .. } => {
                assert_eq!(name, "definitely-not-a-real-binary-xyz");
            }
            other => panic!("expected MissingCapability, got {other:?}"),
        }
    }
}
