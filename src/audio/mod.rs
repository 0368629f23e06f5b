//! # Audio Capture Module
//!
//! Records microphone input and turns it into a canonical WAV container that
//! can be uploaded to the backend's `/chat/audio` endpoint.
//!
//! ## Key Components:
//! - **Device**: Opens the microphone and streams raw chunks out of its callback
//! - **Capture**: The `Idle → Capturing → Idle` recording state machine
//! - **Buffer**: Decoded PCM samples, one vector per channel
//! - **WAV Encoder**: 44-byte RIFF header + interleaved 16-bit samples
//!
//! ## Pipeline:
//! device chunks → concatenate → decode into `AudioBuffer` → `encode_wav` → bytes
//!
//! ## Audio Format:
//! - **Captured chunks**: interleaved 32-bit float, little-endian, device rate and channel count
//! - **Uploaded container**: 16-bit PCM WAV, same rate and channel count

pub mod buffer;       // Decoded PCM samples and the chunk decoder
pub mod capture;      // Recording state machine
pub mod device;       // Microphone access
pub mod wav;          // Canonical WAV encoder

pub use capture::AudioCapture;
