mod capture;
mod logging;
mod lsp;

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use capture::{recognize_screen_text, recognize_speech};
use logging::{LogConfig, init_logging};
use lsp::stream_diagnostics;

/// CLI arguments for the voice assistant
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Language server command and arguments
    #[arg(long, num_args = 1.., value_name = "CMD", default_values_t = vec!["pylsp".to_string()])]
    lsp_command: Vec<String>,

    /// Workspace root passed to the language server (defaults to current directory)
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Document to open for diagnostics
    #[arg(long, value_name = "PATH", default_value = "example.py")]
    file: PathBuf,

    /// Language identifier for the opened document
    #[arg(long, value_name = "ID", default_value = "python")]
    language: String,

    /// Capture the screen and print recognized text, then exit
    #[arg(long)]
    screen_text: bool,

    /// Tesseract language codes for screen capture (repeatable)
    #[arg(long, value_name = "LANG")]
    screen_language: Vec<String>,

    /// Capture a voice phrase and print the transcript, then exit
    #[arg(long)]
    listen: bool,

    /// Seconds to wait for a phrase in listen mode
    #[arg(long, value_name = "SECS", default_value_t = 5.0)]
    listen_timeout: f64,

    /// Maximum phrase duration in listen mode
    #[arg(long, value_name = "SECS", default_value_t = 10.0)]
    phrase_limit: f64,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides VOICE_ASSISTANT_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

async fn run_screen_text(languages: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let languages = (!languages.is_empty()).then_some(languages);
    let result = recognize_screen_text(languages).await?;
    println!("Screen text confidence: {:.2}", result.confidence);
    println!("{}", result.text);
    Ok(())
}

async fn run_listen(timeout: f64, phrase_limit: f64) -> Result<(), Box<dyn std::error::Error>> {
    let command = recognize_speech(timeout, phrase_limit).await?;
    println!("Voice confidence: {:.2}", command.confidence);
    println!("{}", command.text);
    Ok(())
}

/// Stream diagnostics to stdout until interrupted, then shut the server down.
async fn run_diagnostics(args: &Args, root: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let mut session =
        stream_diagnostics(&args.lsp_command, &root, &args.file, &args.language).await?;

    info!(
        "streaming diagnostics for {} (ctrl-c to stop)",
        args.file.display()
    );

    loop {
        tokio::select! {
            maybe = session.next() => match maybe {
                Some(d) => println!(
                    "{}:{}:{} {}",
                    d.uri,
                    d.line + 1,
                    d.character + 1,
                    d.message
                ),
                None => {
                    info!("diagnostic stream ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_config =
        LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if args.screen_text {
        return run_screen_text(&args.screen_language).await;
    }

    if args.listen {
        return run_listen(args.listen_timeout, args.phrase_limit).await;
    }

    let root = match &args.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };

    run_diagnostics(&args, root).await
}
