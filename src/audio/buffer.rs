//! # Decoded Audio Buffer
//!
//! Holds decoded PCM samples between the capture device and the WAV encoder.
//! An `AudioBuffer` is produced once per recording, consumed once by
//! [`encode_wav`](crate::audio::wav::encode_wav), then dropped.
//!
//! ## Key Features:
//! - **Planar layout**: one `Vec<f32>` per channel, like a decoded media buffer
//! - **Shape validation**: every channel must hold the same number of frames
//! - **Chunk decoding**: turns the device's interleaved little-endian floats into planar samples

use crate::error::{ClientError, ClientResult};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Shape of the raw chunks a microphone delivers.
///
/// ## Rust Concepts:
/// - **Copy**: Two small integers, cheap to pass by value
/// - **u16 channels**: matches the WAV header field width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    /// Samples per second per channel (e.g. 48000)
    pub sample_rate: u32,

    /// Number of interleaved channels in each chunk
    pub channels: u16,
}

impl CaptureFormat {
    /// Bytes occupied by one interleaved frame of 32-bit floats.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * 4
    }
}

/// Decoded PCM audio, one array per channel.
///
/// ## Invariants:
/// - At least one channel
/// - All channels have the same length (the frame count)
/// - `sample_rate` is non-zero
///
/// The fields are private so these invariants can only be established through
/// [`AudioBuffer::new`] or [`decode_interleaved_f32`].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Create a buffer from planar channel data.
    ///
    /// ## Errors:
    /// Returns `AudioDecode` when there are no channels, the sample rate is 0,
    /// or the channels have different lengths.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> ClientResult<Self> {
        if channels.is_empty() {
            return Err(ClientError::AudioDecode("audio buffer needs at least one channel".into()));
        }
        if channels.len() > u16::MAX as usize {
            return Err(ClientError::AudioDecode(format!(
                "too many channels: {}",
                channels.len()
            )));
        }
        if sample_rate == 0 {
            return Err(ClientError::AudioDecode("sample rate cannot be 0".into()));
        }
        let frames = channels[0].len();
        if let Some(bad) = channels.iter().position(|c| c.len() != frames) {
            return Err(ClientError::AudioDecode(format!(
                "channel {} has {} frames, expected {}",
                bad,
                channels[bad].len(),
                frames
            )));
        }
        Ok(Self { channels, sample_rate })
    }

    /// A buffer with `frames` frames of silence on every channel.
    #[cfg(test)]
    pub fn silent(frames: usize, channel_count: u16, sample_rate: u32) -> ClientResult<Self> {
        Self::new(vec![vec![0.0; frames]; channel_count as usize], sample_rate)
    }

    /// Number of frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        self.channels[0].len()
    }

    /// Number of channels.
    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples of one channel.
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Duration of the buffer in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

/// Decode concatenated device chunks into a planar `AudioBuffer`.
///
/// ## Input Format:
/// Interleaved 32-bit float samples, little-endian, in the shape given by `format`.
///
/// ## Errors:
/// - `AudioDecode` if the byte count is not a whole number of frames
/// - `AudioDecode` if `format` itself is unusable (0 channels or 0 Hz)
///
/// An empty input decodes to a zero-frame buffer; a stop right after start is
/// a normal outcome.
pub fn decode_interleaved_f32(bytes: &[u8], format: CaptureFormat) -> ClientResult<AudioBuffer> {
    if format.channels == 0 {
        return Err(ClientError::AudioDecode("capture format has 0 channels".into()));
    }
    let frame_bytes = format.bytes_per_frame();
    if bytes.len() % frame_bytes != 0 {
        return Err(ClientError::AudioDecode(format!(
            "{} bytes is not a whole number of {}-byte frames",
            bytes.len(),
            frame_bytes
        )));
    }

    let frames = bytes.len() / frame_bytes;
    let channel_count = format.channels as usize;
    let mut channels = vec![Vec::with_capacity(frames); channel_count];
    let mut cursor = Cursor::new(bytes);

    for _ in 0..frames {
        for channel in channels.iter_mut() {
            let sample = cursor
                .read_f32::<LittleEndian>()
                .map_err(|e| ClientError::AudioDecode(e.to_string()))?;
            channel.push(sample);
        }
    }

    AudioBuffer::new(channels, format.sample_rate)
}
