//! # Speech Backends
//!
//! - [`CommandSynthesizer`]: runs an espeak-ng compatible program, one child
//!   process per utterance. Killing the child is how playback is cancelled.
//! - [`LogSynthesizer`]: writes utterances to the log; used when `speech.engine = "none"`.
//!
//! Voice discovery is async ([`list_voices`]) because it shells out and the
//! router must not wait for it.

use super::voice::Voice;
use super::{SpeechSynthesizer, Utterance};
use crate::config::SpeechConfig;
use crate::error::{ClientError, ClientResult};
use std::io::Write;
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

/// espeak-ng's default speed in words per minute; `rate` scales it.
const BASE_WORDS_PER_MINUTE: f32 = 175.0;

fn words_per_minute(rate: f32) -> u32 {
    (BASE_WORDS_PER_MINUTE * rate).round().max(80.0) as u32
}

/// Speaks by spawning `program --stdin -s <wpm> [-v <voice>]` and writing the text to its stdin.
pub struct CommandSynthesizer {
    program: String,
    child: Option<Child>,
}

impl CommandSynthesizer {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), child: None }
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn speak(&mut self, utterance: &Utterance) -> ClientResult<()> {
        self.cancel();

        let mut command = Command::new(&self.program);
        command
            .arg("--stdin")
            .arg("-s")
            .arg(words_per_minute(utterance.rate).to_string());
        if let Some(voice) = &utterance.voice {
            command.arg("-v").arg(&voice.id);
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ClientError::Speech(format!("Failed to start {}: {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // Dropping stdin closes it, which tells the program the text is complete
            if let Err(e) = stdin.write_all(utterance.text.as_bytes()) {
                stop_child(child);
                return Err(ClientError::Speech(format!("Failed to pass text to {}: {}", self.program, e)));
            }
        }

        debug!(pid = child.id(), chars = utterance.text.len(), "Speech started");
        self.child = Some(child);
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some(child) = self.child.take() {
            stop_child(child);
        }
    }
}

/// Kill a speaking child if it is still running and make sure it gets reaped.
///
/// ## Rust Concepts:
/// - **spawn_blocking**: `Child::wait` blocks, so inside a runtime the wait is
///   moved to tokio's blocking pool and the caller returns right away
/// - Without a runtime (e.g. during shutdown) the wait happens inline
fn stop_child(mut child: Child) {
    match child.try_wait() {
        Ok(Some(_)) => return,
        Ok(None) => {
            let _ = child.kill();
            debug!(pid = child.id(), "Speech cancelled");
        }
        Err(e) => warn!(pid = child.id(), error = %e, "Could not query speech process"),
    }

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(move || {
                let _ = child.wait();
            });
        }
        Err(_) => {
            let _ = child.wait();
        }
    }
}

impl Drop for CommandSynthesizer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Logs instead of speaking.
#[derive(Debug, Default)]
pub struct LogSynthesizer;

impl SpeechSynthesizer for LogSynthesizer {
    fn speak(&mut self, utterance: &Utterance) -> ClientResult<()> {
        info!(
            voice = utterance.voice.as_ref().map(|v| v.name.as_str()).unwrap_or("default"),
            text = %utterance.text,
            "Speak"
        );
        Ok(())
    }

    fn cancel(&mut self) {}
}

/// Build the synthesizer named by `speech.engine`.
pub fn synthesizer_from_config(config: &SpeechConfig) -> Box<dyn SpeechSynthesizer> {
    match config.engine.as_str() {
        "none" => Box::new(LogSynthesizer),
        _ => Box::new(CommandSynthesizer::new(config.program.clone())),
    }
}

/// Ask the synthesizer program which voices it has.
///
/// With `engine = "none"` there are no voices and the list is empty.
pub async fn list_voices(config: &SpeechConfig) -> ClientResult<Vec<Voice>> {
    if config.engine == "none" {
        return Ok(Vec::new());
    }

    let output = tokio::process::Command::new(&config.program)
        .arg("--voices")
        .output()
        .await
        .map_err(|e| ClientError::Speech(format!("Failed to list voices with {}: {}", config.program, e)))?;

    if !output.status.success() {
        return Err(ClientError::Speech(format!(
            "{} --voices exited with {}",
            config.program, output.status
        )));
    }

    let voices = parse_voice_table(&String::from_utf8_lossy(&output.stdout));
    if voices.is_empty() {
        warn!(program = %config.program, "Synthesizer reported no voices");
    }
    Ok(voices)
}

/// Parse espeak-ng's `--voices` table.
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  af              --/M      Afrikaans          gmw/af
///  2  en-us           --/M      English_(America)  gmw/en-US            (en 10)
/// ```
/// The language column doubles as the voice id (`-v en-us`).
pub fn parse_voice_table(table: &str) -> Vec<Voice> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < 4 {
                return None;
            }
            Some(Voice {
                id: columns[1].to_string(),
                name: columns[3].to_string(),
                locale: columns[1].to_string(),
                is_default: false,
            })
        })
        .collect()
}
