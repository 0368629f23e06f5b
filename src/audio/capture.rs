//! # Recording State Machine
//!
//! Drives one microphone recording at a time and turns it into an upload-ready
//! WAV container.
//!
//! ## Recording Lifecycle:
//! 1. **Idle**: no device held
//! 2. **Capturing**: device open, chunks accumulating on the stream's channel
//! 3. **Idle** again once `stop_capture` releases the device
//!
//! ## Transitions:
//! - `start_capture` in Idle → open device → Capturing (or stay Idle on `DeviceUnavailable`)
//! - `start_capture` in Capturing → ignored, the device is not reopened
//! - `stop_capture` in Capturing → release device → decode → encode → Idle
//! - `stop_capture` in Idle → `NotCapturing`

use crate::audio::buffer::decode_interleaved_f32;
use crate::audio::device::{Microphone, MicrophoneStream};
use crate::audio::wav::encode_wav;
use crate::error::{ClientError, ClientResult};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

/// Current state of the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
}

impl CaptureState {
    pub fn as_str(&self) -> &str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Capturing => "capturing",
        }
    }
}

/// A recording in progress: the open stream plus when it started.
struct ActiveRecording {
    stream: MicrophoneStream,
    started_at: DateTime<Utc>,
}

/// Records from a microphone and yields canonical WAV bytes.
///
/// ## Ownership:
/// The capture owns the microphone. While a recording is active nothing else
/// can open it, and a second recording cannot start before the first is stopped.
pub struct AudioCapture {
    microphone: Box<dyn Microphone>,
    active: Option<ActiveRecording>,
}

impl AudioCapture {
    pub fn new(microphone: Box<dyn Microphone>) -> Self {
        Self { microphone, active: None }
    }

    pub fn state(&self) -> CaptureState {
        if self.active.is_some() {
            CaptureState::Capturing
        } else {
            CaptureState::Idle
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.state() == CaptureState::Capturing
    }

    /// Begin recording.
    ///
    /// ## Errors:
    /// - `DeviceUnavailable` if the microphone cannot be opened; the state stays Idle
    pub fn start_capture(&mut self) -> ClientResult<()> {
        if self.active.is_some() {
            warn!(state = self.state().as_str(), "start_capture ignored: already recording");
            return Ok(());
        }

        let stream = self.microphone.open()?;
        info!(
            sample_rate = stream.format.sample_rate,
            channels = stream.format.channels,
            "Recording started"
        );
        self.active = Some(ActiveRecording { stream, started_at: Utc::now() });
        Ok(())
    }

    /// Stop recording and produce the WAV container.
    ///
    /// ## Process:
    /// 1. Release the device (always, before anything that can fail)
    /// 2. Concatenate the chunks in capture order
    /// 3. Decode into an `AudioBuffer`
    /// 4. Encode as 16-bit PCM WAV
    ///
    /// ## Errors:
    /// - `NotCapturing` if no recording is active
    /// - `AudioDecode` if the captured bytes do not form whole frames
    pub fn stop_capture(&mut self) -> ClientResult<Vec<u8>> {
        let recording = self.active.take().ok_or(ClientError::NotCapturing)?;
        let elapsed_ms = (Utc::now() - recording.started_at).num_milliseconds();

        let (format, chunks) = recording.stream.finish();
        debug!(chunks = chunks.len(), elapsed_ms, "Microphone released, decoding capture");

        let joined: Vec<u8> = chunks.concat();
        let buffer = decode_interleaved_f32(&joined, format)?;
        let wav = encode_wav(&buffer);

        info!(
            frames = buffer.frame_count(),
            duration_seconds = buffer.duration_seconds(),
            wav_bytes = wav.len(),
            "Recording encoded"
        );
        Ok(wav)
    }
}
