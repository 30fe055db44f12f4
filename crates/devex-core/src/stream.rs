//! Output stream & input broker (§4.C): scans child stdout/stderr into
//! cleaned, de-progress-spammed lines, fans them out to the log and UI
//! sinks, and brokers password prompts back to the caller.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead};
use tokio::sync::mpsc;

use devex_schema::SecureSecret;

use crate::error::CoreResult;

/// Default timeout for an interactive password-prompt response (§4.C).
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(30);

static ANSI_CSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("static regex"));
static CURSOR_MOTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9]*[ABCD]").expect("static regex"));
static CHARSET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b[()][0-9A-Z]").expect("static regex"));

const PROGRESS_MARKERS: &[&str] = &[
    "Reading database",
    "Readin database",
    "Scanning processes",
    "Scanning candidates",
    "Scanning linux images",
];
const PROGRESS_COMPLETION_MARKERS: &[&str] = &["done", "100%", "... done"];

/// Removes ANSI CSI/cursor-motion/charset sequences, carriage returns, and
/// control characters other than tab/newline, then outer-trims (§4.C).
///
/// Idempotent: `clean_terminal_output(clean_terminal_output(s)) == clean_terminal_output(s)`.
pub fn clean_terminal_output(line: &str) -> String {
    let step = ANSI_CSI_RE.replace_all(line, "");
    let step = CURSOR_MOTION_RE.replace_all(&step, "");
    let step = CHARSET_RE.replace_all(&step, "");
    let step: String = step
        .chars()
        .filter(|&c| c != '\r' && (!c.is_control() || matches!(c, '\t' | '\n')))
        .collect();
    step.trim().to_string()
}

/// Which pipe a line came from, or that it was synthesized by the stream
/// itself (§4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTag {
    /// Raw child stdout.
    Stdout,
    /// Raw child stderr.
    Stderr,
    /// Synthesized informational line.
    Info,
    /// Synthesized error line.
    Error,
}

impl SourceTag {
    /// The uppercase label used in the durable log record.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Info => "INFO",
            Self::Error => "ERROR",
        }
    }
}

/// A cleaned, labeled line ready for the log and UI sinks.
#[derive(Debug, Clone)]
pub struct OutputLine {
    /// Which pipe (or synthesis path) produced this line.
    pub source: SourceTag,
    /// Cleaned text (post [`clean_terminal_output`]).
    pub text: String,
}

/// Caller-supplied handler for interactive password prompts (§4.C).
///
/// Implementations in non-interactive mode should return `Ok(None)` to
/// decline; a returned secret is written to the child's stdin with a
/// trailing newline and the handler is responsible for clearing it.
#[async_trait]
pub trait InputHandler: Send + Sync {
    /// Requests input for `prompt`, waiting up to `timeout`.
    async fn request_input(&self, prompt: &str, timeout: Duration) -> CoreResult<Option<SecureSecret>>;
}

/// An [`InputHandler`] that always declines, matching `DEVEX_NONINTERACTIVE` mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonInteractiveInput;

#[async_trait]
impl InputHandler for NonInteractiveInput {
    async fn request_input(&self, _prompt: &str, _timeout: Duration) -> CoreResult<Option<SecureSecret>> {
        Ok(None)
    }
}

fn looks_like_password_prompt(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("password") && (lower.contains("sudo") || lower.contains("enter") || lower.contains(':'))
}

/// Bounded fan-out channel a slow/absent sink coalesces against rather than
/// blocking the scanner (§4.C, §9 "Stream composition").
pub type LineSender = mpsc::Sender<OutputLine>;

const BUS_CAPACITY: usize = 256;

/// Creates the log-writer and UI-bus channel pair plus their receivers.
pub fn new_bus() -> (LineSender, LineSender, mpsc::Receiver<OutputLine>, mpsc::Receiver<OutputLine>) {
    let (log_tx, log_rx) = mpsc::channel(BUS_CAPACITY);
    let (ui_tx, ui_rx) = mpsc::channel(BUS_CAPACITY);
    (log_tx, ui_tx, log_rx, ui_rx)
}

async fn forward(sinks: &[LineSender], line: OutputLine) {
    for sink in sinks {
        // A full or closed (panicked) sink is dropped silently -- coalescing
        // beats blocking the scanner, per §9.
        let _ = sink.try_send(line.clone());
    }
}

/// Scans a single pipe (stdout or stderr), cleaning and de-spamming lines,
/// forwarding them to `sinks`, and -- for stderr -- brokering password
/// prompts through `input` by writing the response to `stdin`.
///
/// Honors `cancel`; an error reading the pipe after intentional closure
/// ("file already closed") is treated as a normal end-of-stream, per §5.
pub async fn scan_pipe<R: AsyncRead + Unpin>(
    reader: R,
    source: SourceTag,
    sinks: Vec<LineSender>,
    input: Option<(std::sync::Arc<dyn InputHandler>, std::sync::Arc<tokio::sync::Mutex<tokio::process::ChildStdin>>)>,
    cancel: tokio_util::sync::CancellationToken,
) {
    let mut reader = tokio::io::BufReader::new(reader);
    let mut held_progress_line: Option<String> = None;

    loop {
        let next = tokio::select! {
            r = next_token(&mut reader) => r,
            () = cancel.cancelled() => break,
        };
        let raw = match next {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) if e.to_string().to_lowercase().contains("file already closed") => break,
            Err(_) => break,
        };

        let cleaned = clean_terminal_output(&raw);
        if cleaned.is_empty() {
            continue;
        }

        if source == SourceTag::Stderr {
            if let Some((handler, stdin)) = &input {
                if looks_like_password_prompt(&cleaned) {
                    forward(&sinks, OutputLine { source: SourceTag::Info, text: "password prompt detected".into() }).await;
                    if let Ok(Some(mut secret)) = handler.request_input(&cleaned, DEFAULT_PROMPT_TIMEOUT).await {
                        if let Some(text) = secret.reveal() {
                            if !text.is_empty() {
                                let mut guard = stdin.lock().await;
                                let _ = crate::process::write_stdin_line(&mut guard, &text).await;
                            }
                        }
                    }
                    continue;
                }
            }
        }

        if is_suppressible_progress(&cleaned) {
            let is_completion = PROGRESS_COMPLETION_MARKERS.iter().any(|m| cleaned.contains(m));
            if is_completion {
                if let Some(held) = held_progress_line.take() {
                    forward(&sinks, OutputLine { source, text: held }).await;
                }
                forward(&sinks, OutputLine { source, text: cleaned }).await;
            } else {
                held_progress_line = Some(cleaned);
            }
            continue;
        }

        forward(&sinks, OutputLine { source, text: cleaned }).await;
    }
}

fn is_suppressible_progress(line: &str) -> bool {
    PROGRESS_MARKERS.iter().any(|m| line.contains(m))
}

/// Reads the next token up to `\n`, `\r`, or `\r\n`, any of which count as a
/// single line break (§4.C, §8 "line terminators"). `tokio`'s stock
/// `AsyncBufReadExt::lines` only breaks on `\n`, which would hold a whole
/// carriage-return-driven progress bar as one unterminated line.
async fn next_token<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<Option<String>> {
    let mut buf: Vec<u8> = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(if buf.is_empty() { None } else { Some(String::from_utf8_lossy(&buf).into_owned()) });
        }
        if let Some(pos) = available.iter().position(|&b| b == b'\n' || b == b'\r') {
            let terminator = available[pos];
            buf.extend_from_slice(&available[..pos]);
            reader.consume(pos + 1);
            if terminator == b'\r' {
                let next = reader.fill_buf().await?;
                if next.first() == Some(&b'\n') {
                    reader.consume(1);
                }
            }
            return Ok(Some(String::from_utf8_lossy(&buf).into_owned()));
        }
        let len = available.len();
        buf.extend_from_slice(available);
        reader.consume(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_ansi_csi_sequences() {
        assert_eq!(clean_terminal_output("\x1b[31mhello\x1b[0m"), "hello");
    }

    #[test]
    fn cleans_cursor_motion() {
        assert_eq!(clean_terminal_output("a\x1b[2Ab"), "ab");
    }

    #[test]
    fn strips_carriage_returns_and_trims() {
        assert_eq!(clean_terminal_output("  progress...\r  "), "progress...");
    }

    #[test]
    fn clean_is_idempotent() {
        let input = "\x1b[31mhello\x1b[0m\r  world  ";
        let once = clean_terminal_output(input);
        let twice = clean_terminal_output(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn detects_password_prompts() {
        assert!(looks_like_password_prompt("[sudo] password for root:"));
        assert!(looks_like_password_prompt("Enter password: "));
        assert!(!looks_like_password_prompt("Setting up curl (7.81.0)"));
    }

    #[test]
    fn progress_marker_detection() {
        assert!(is_suppressible_progress("Reading database ... 50%"));
        assert!(!is_suppressible_progress("Setting up curl"));
    }

    #[tokio::test]
    async fn next_token_splits_on_lf_cr_and_crlf() {
        use tokio::io::AsyncWriteExt;

        let (mut writer, reader) = tokio::io::duplex(64);
        tokio::spawn(async move {
            writer.write_all(b"one\ntwo\rthree\r\nfour").await.unwrap();
        });
        let mut reader = tokio::io::BufReader::new(reader);
        let mut out = Vec::new();
        while let Some(tok) = next_token(&mut reader).await.unwrap() {
            out.push(tok);
        }
        assert_eq!(out, vec!["one", "two", "three", "four"]);
    }
}
