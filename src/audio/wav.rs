//! # Canonical WAV Encoder
//!
//! Converts a decoded [`AudioBuffer`] into an uncompressed 16-bit PCM WAV
//! container, the format the backend's transcriber reads.
//!
//! ## Container Layout (44-byte header, all integers little-endian):
//! ```text
//! offset  size  field
//!      0     4  "RIFF"
//!      4     4  36 + data_len
//!      8     4  "WAVE"
//!     12     4  "fmt "
//!     16     4  16            (fmt chunk size)
//!     20     2  1             (PCM)
//!     22     2  channels
//!     24     4  sample_rate
//!     28     4  sample_rate * channels * 2   (byte rate)
//!     32     2  channels * 2                 (block align)
//!     34     2  16            (bits per sample)
//!     36     4  "data"
//!     40     4  data_len = frames * channels * 2
//!     44     …  interleaved i16 samples
//! ```
//!
//! ## Quantization:
//! Each sample is clamped to [-1.0, 1.0]. Negative samples are multiplied by
//! 32768 and non-negative samples by 32767, then truncated toward zero. The two
//! multipliers are deliberately different so that -1.0 reaches `i16::MIN` and
//! 1.0 reaches `i16::MAX`; consumers of the container rely on this exact output.
//!
//! ## Determinism:
//! No timestamps, no metadata chunks: the same buffer always produces the same bytes.

use crate::audio::buffer::AudioBuffer;
use byteorder::{LittleEndian, WriteBytesExt};

/// Size of the canonical RIFF/WAVE header in bytes.
pub const WAV_HEADER_LEN: usize = 44;

/// Fixed output bit depth.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Total container size for a buffer of the given shape.
pub fn encoded_len(frames: usize, channels: u16) -> usize {
    WAV_HEADER_LEN + frames * channels as usize * 2
}

/// Quantize one floating-point sample to signed 16-bit.
///
/// ## Examples:
/// - `1.0` → `32767`
/// - `0.0` → `0`
/// - `-1.0` → `-32768`
/// - `2.5` → clamped to `1.0` → `32767`
/// - `NaN` → `0`
pub fn quantize_sample(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    let scaled = if clamped < 0.0 {
        clamped * 32768.0
    } else {
        clamped * 32767.0
    };
    // `as` truncates toward zero and maps NaN to 0
    scaled as i16
}

/// Encode an audio buffer as a canonical 16-bit PCM WAV container.
///
/// ## Parameters:
/// - **buffer**: decoded samples; consumed logically (the caller drops it afterwards)
///
/// ## Returns:
/// Exactly `44 + frames * channels * 2` bytes.
///
/// ## Rust Concepts:
/// - **Vec<u8> as io::Write**: `WriteBytesExt` appends little-endian integers to the vector
/// - **with_capacity**: the final size is known up front, so there is a single allocation
pub fn encode_wav(buffer: &AudioBuffer) -> Vec<u8> {
    let channels = buffer.channel_count();
    let frames = buffer.frame_count();
    let total_len = encoded_len(frames, channels);
    let data_len = (total_len - WAV_HEADER_LEN) as u32;
    let block_align = channels * (BITS_PER_SAMPLE / 8);
    let byte_rate = buffer.sample_rate() * block_align as u32;

    let mut out = Vec::with_capacity(total_len);

    // Writes into a Vec cannot fail, so the io::Result values are discarded.
    let _ = write_header(&mut out, channels, buffer.sample_rate(), byte_rate, block_align, data_len);

    for frame in 0..frames {
        for channel in 0..channels as usize {
            let _ = out.write_i16::<LittleEndian>(quantize_sample(buffer.channel(channel)[frame]));
        }
    }

    debug_assert_eq!(out.len(), total_len);
    out
}

fn write_header(
    out: &mut Vec<u8>,
    channels: u16,
    sample_rate: u32,
    byte_rate: u32,
    block_align: u16,
    data_len: u32,
) -> std::io::Result<()> {
    out.extend_from_slice(b"RIFF");
    out.write_u32::<LittleEndian>(36 + data_len)?;
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.write_u32::<LittleEndian>(16)?;
    out.write_u16::<LittleEndian>(1)?;
    out.write_u16::<LittleEndian>(channels)?;
    out.write_u32::<LittleEndian>(sample_rate)?;
    out.write_u32::<LittleEndian>(byte_rate)?;
    out.write_u16::<LittleEndian>(block_align)?;
    out.write_u16::<LittleEndian>(BITS_PER_SAMPLE)?;
    out.extend_from_slice(b"data");
    out.write_u32::<LittleEndian>(data_len)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ReadBytesExt;
    use std::io::Cursor;

    fn read_u32_at(bytes: &[u8], offset: usize) -> u32 {
        Cursor::new(&bytes[offset..offset + 4]).read_u32::<LittleEndian>().unwrap()
    }

    fn read_u16_at(bytes: &[u8], offset: usize) -> u16 {
        Cursor::new(&bytes[offset..offset + 2]).read_u16::<LittleEndian>().unwrap()
    }

    fn samples_of(bytes: &[u8]) -> Vec<i16> {
        let mut cursor = Cursor::new(&bytes[WAV_HEADER_LEN..]);
        let mut samples = Vec::new();
        while let Ok(s) = cursor.read_i16::<LittleEndian>() {
            samples.push(s);
        }
        samples
    }

    #[test]
    fn test_quantization_boundaries() {
        assert_eq!(quantize_sample(1.0), 32767);
        assert_eq!(quantize_sample(-1.0), -32768);
        assert_eq!(quantize_sample(0.0), 0);
        assert_eq!(quantize_sample(3.0), 32767);
        assert_eq!(quantize_sample(-3.0), -32768);
        assert_eq!(quantize_sample(f32::NAN), 0);
    }

    #[test]
    fn test_quantization_is_asymmetric_and_truncates() {
        // 0.5 * 32767 = 16383.5 → 16383
        assert_eq!(quantize_sample(0.5), 16383);
        // -0.5 * 32768 = -16384 exactly
        assert_eq!(quantize_sample(-0.5), -16384);
        // -0.25 * 32768 = -8192, 0.25 * 32767 = 8191.75 → 8191
        assert_eq!(quantize_sample(-0.25), -8192);
        assert_eq!(quantize_sample(0.25), 8191);
    }

    #[test]
    fn test_empty_buffer_is_bare_header() {
        let buffer = AudioBuffer::silent(0, 1, 44100).unwrap();
        let wav = encode_wav(&buffer);

        assert_eq!(wav.len(), 44);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(read_u32_at(&wav, 4), 36);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(read_u32_at(&wav, 40), 0);
    }

    #[test]
    fn test_header_fields() {
        let buffer = AudioBuffer::silent(10, 2, 48000).unwrap();
        let wav = encode_wav(&buffer);

        assert_eq!(wav.len(), 44 + 10 * 2 * 2);
        assert_eq!(read_u32_at(&wav, 4), (wav.len() - 8) as u32);
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(read_u32_at(&wav, 16), 16);
        assert_eq!(read_u16_at(&wav, 20), 1);
        assert_eq!(read_u16_at(&wav, 22), 2);
        assert_eq!(read_u32_at(&wav, 24), 48000);
        assert_eq!(read_u32_at(&wav, 28), 48000 * 2 * 2);
        assert_eq!(read_u16_at(&wav, 32), 4);
        assert_eq!(read_u16_at(&wav, 34), 16);
        assert_eq!(read_u32_at(&wav, 40), 40);
    }

    #[test]
    fn test_samples_are_interleaved_in_channel_order() {
        let buffer = AudioBuffer::new(vec![vec![1.0, 0.0], vec![-1.0, 0.5]], 8000).unwrap();
        let wav = encode_wav(&buffer);
        assert_eq!(samples_of(&wav), vec![32767, -32768, 0, 16383]);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let buffer = AudioBuffer::new(
            vec![(0..256).map(|i| (i as f32 / 128.0) - 1.0).collect()],
            22050,
        )
        .unwrap();
        assert_eq!(encode_wav(&buffer), encode_wav(&buffer));
    }

    /// Silent frames read back through an independent WAV reader.
    #[test]
    #[allow(deprecated)]
    fn test_silent_buffer_reads_back_with_reference_parser() {
        let frames = 480;
        let channels = 2;
        let buffer = AudioBuffer::silent(frames, channels, 16000).unwrap();
        let wav_bytes = encode_wav(&buffer);
        assert_eq!(wav_bytes.len(), encoded_len(frames, channels));

        let (header, data) = wav::read(&mut Cursor::new(wav_bytes)).unwrap();
        assert_eq!(header.audio_format, 1);
        assert_eq!(header.channel_count, channels);
        assert_eq!(header.sampling_rate, 16000);
        assert_eq!(header.bits_per_sample, 16);

        let samples = data.try_into_sixteen().unwrap();
        assert_eq!(samples.len(), frames * channels as usize);
        assert!(samples.iter().all(|s| s.abs() <= 1));
    }
}
