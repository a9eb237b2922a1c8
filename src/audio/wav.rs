//! # WAV Container Encoding
//!
//! Serializes an `AudioBuffer` into a canonical 44-byte-header RIFF/WAVE file
//! with a single `fmt ` chunk (integer PCM, 16 bits per sample) followed by a
//! single `data` chunk. All multi-byte fields are little-endian.
//!
//! ## Layout:
//! ```text
//! "RIFF" <36 + data_size> "WAVE"
//! "fmt " <16> <format=1> <channels> <sample_rate> <byte_rate> <block_align> <16>
//! "data" <data_size> <pcm payload>
//! ```

use super::pcm::{self, AudioBuffer};
use super::AudioError;
use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{DateTime, Utc};
use std::io::{self, Write};

/// Size of the RIFF header plus the `fmt ` and `data` chunk headers.
pub const WAV_HEADER_LEN: usize = 44;

const FMT_CHUNK_SIZE: u32 = 16;
const FORMAT_PCM: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

/// A finished RIFF/WAVE file, ready to hand to a download or file sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavBytes(Vec<u8>);

impl WavBytes {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

/// Encode a buffer as a 16-bit PCM WAV file.
///
/// Samples outside `[-1.0, 1.0]` are clamped, never reported. An empty buffer
/// produces a valid silent file whose data chunk is zero bytes long.
///
/// ## Errors:
/// - **MalformedAudio**: the PCM payload or the format's byte rate does not fit
///   the RIFF header fields
pub fn encode_wav(buffer: &AudioBuffer) -> Result<WavBytes, AudioError> {
    let payload = pcm::encode_pcm(buffer);

    let data_size = u32::try_from(payload.len())
        .ok()
        .filter(|size| size.checked_add(36).is_some())
        .ok_or_else(|| {
            AudioError::MalformedAudio(format!("{} bytes of PCM exceeds the WAV size limit", payload.len()))
        })?;

    let block_align = buffer
        .channels()
        .checked_mul(BITS_PER_SAMPLE / 8)
        .ok_or_else(|| AudioError::MalformedAudio(format!("{} channels is too many for WAV", buffer.channels())))?;
    let byte_rate = buffer
        .sample_rate()
        .checked_mul(block_align as u32)
        .ok_or_else(|| AudioError::MalformedAudio(format!("{} Hz is too fast for WAV", buffer.sample_rate())))?;

    let header = FmtChunk {
        channels: buffer.channels(),
        sample_rate: buffer.sample_rate(),
        byte_rate,
        block_align,
    };

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + payload.len());
    write_wav(&mut out, &header, data_size, &payload)
        .map_err(|e| AudioError::MalformedAudio(format!("failed to write WAV: {}", e)))?;

    Ok(WavBytes(out))
}

struct FmtChunk {
    channels: u16,
    sample_rate: u32,
    byte_rate: u32,
    block_align: u16,
}

fn write_wav<W: Write>(out: &mut W, fmt: &FmtChunk, data_size: u32, payload: &[u8]) -> io::Result<()> {
    // RIFF header
    out.write_all(b"RIFF")?;
    out.write_u32::<LittleEndian>(36 + data_size)?;
    out.write_all(b"WAVE")?;

    // fmt sub-chunk
    out.write_all(b"fmt ")?;
    out.write_u32::<LittleEndian>(FMT_CHUNK_SIZE)?;
    out.write_u16::<LittleEndian>(FORMAT_PCM)?;
    out.write_u16::<LittleEndian>(fmt.channels)?;
    out.write_u32::<LittleEndian>(fmt.sample_rate)?;
    out.write_u32::<LittleEndian>(fmt.byte_rate)?;
    out.write_u16::<LittleEndian>(fmt.block_align)?;
    out.write_u16::<LittleEndian>(BITS_PER_SAMPLE)?;

    // data sub-chunk
    out.write_all(b"data")?;
    out.write_u32::<LittleEndian>(data_size)?;
    out.write_all(payload)?;

    Ok(())
}

/// Download name for an exported clip.
///
/// History items are named after their id (`voice-<tag>.wav`); fresh clips use
/// the current time in milliseconds. Characters other than ASCII letters,
/// digits, `-` and `_` are dropped from the tag.
pub fn wav_filename(tag: Option<&str>, now: DateTime<Utc>) -> String {
    let tag: Option<String> = tag
        .map(|t| t.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_').collect())
        .filter(|t: &String| !t.is_empty());

    match tag {
        Some(tag) => format!("voice-{}.wav", tag),
        None => format!("voice-{}.wav", now.timestamp_millis()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::{decode_pcm, AudioFormat};
    use std::io::Cursor;

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
    }

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
    }

    #[test]
    fn test_header_fields_for_mono_buffer() {
        let n = 480;
        let buffer = AudioBuffer::from_samples(AudioFormat::default(), vec![0.1; n]).unwrap();
        let wav = encode_wav(&buffer).unwrap().into_inner();
        let bytes = wav.as_slice();

        assert_eq!(bytes.len(), WAV_HEADER_LEN + 2 * n);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32_at(bytes, 4), 36 + 2 * n as u32);
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[12..16], b"fmt ");
        assert_eq!(u32_at(bytes, 16), 16);
        assert_eq!(u16_at(bytes, 20), 1);
        assert_eq!(u16_at(bytes, 22), 1);
        assert_eq!(u32_at(bytes, 24), 24_000);
        assert_eq!(u32_at(bytes, 28), 48_000);
        assert_eq!(u16_at(bytes, 32), 2);
        assert_eq!(u16_at(bytes, 34), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32_at(bytes, 40), 2 * n as u32);
    }

    #[test]
    fn test_header_fields_for_stereo_buffer() {
        let format = AudioFormat::new(44_100, 2).unwrap();
        let buffer = AudioBuffer::from_samples(format, vec![0.0; 10]).unwrap();
        let wav = encode_wav(&buffer).unwrap().into_inner();
        let bytes = wav.as_slice();

        assert_eq!(u16_at(bytes, 22), 2);
        assert_eq!(u32_at(bytes, 28), 44_100 * 4);
        assert_eq!(u16_at(bytes, 32), 4);
        assert_eq!(u32_at(bytes, 40), 20);
        assert_eq!(u32_at(bytes, 4), 56);
    }

    #[test]
    fn test_empty_buffer_is_minimal_valid_wav() {
        let wav = encode_wav(&AudioBuffer::empty(AudioFormat::default())).unwrap().into_inner();
        let bytes = wav.as_slice();

        assert_eq!(bytes.len(), WAV_HEADER_LEN);
        assert_eq!(u32_at(bytes, 4), 36);
        assert_eq!(u32_at(bytes, 40), 0);
    }

    #[test]
    fn test_exact_bytes_for_known_samples() {
        let buffer = decode_pcm(&[0x00, 0x00, 0x00, 0x40, 0xFF, 0x7F], AudioFormat::default()).unwrap();
        let wav = encode_wav(&buffer).unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(b"RIFF");
        expected.extend_from_slice(&42u32.to_le_bytes());
        expected.extend_from_slice(b"WAVEfmt ");
        expected.extend_from_slice(&16u32.to_le_bytes());
        expected.extend_from_slice(&1u16.to_le_bytes());
        expected.extend_from_slice(&1u16.to_le_bytes());
        expected.extend_from_slice(&24_000u32.to_le_bytes());
        expected.extend_from_slice(&48_000u32.to_le_bytes());
        expected.extend_from_slice(&2u16.to_le_bytes());
        expected.extend_from_slice(&16u16.to_le_bytes());
        expected.extend_from_slice(b"data");
        expected.extend_from_slice(&6u32.to_le_bytes());
        expected.extend_from_slice(&[0x00, 0x00, 0x00, 0x40, 0xFF, 0x7F]);

        assert_eq!(wav.into_inner(), expected);
    }

    #[test]
    fn test_overshoot_is_clamped_not_rejected() {
        let buffer = AudioBuffer::from_samples(AudioFormat::default(), vec![1.5, -1.5]).unwrap();
        let wav = encode_wav(&buffer).unwrap().into_inner();
        let bytes = wav.as_slice();

        assert_eq!(i16::from_le_bytes([bytes[44], bytes[45]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[46], bytes[47]]), -32768);
    }

    #[test]
    fn test_output_is_readable_by_independent_decoder() {
        let samples: Vec<f32> = (0..240).map(|i| (i as f32 / 240.0) * 2.0 - 1.0).collect();
        let buffer = AudioBuffer::from_samples(AudioFormat::default(), samples).unwrap();
        let wav = encode_wav(&buffer).unwrap();

        let (header, data) = wav::read(&mut Cursor::new(wav.into_inner())).unwrap();
        assert_eq!(header.audio_format, 1);
        assert_eq!(header.channel_count, 1);
        assert_eq!(header.sampling_rate, 24_000);
        assert_eq!(header.bits_per_sample, 16);

        let pcm = data.as_sixteen().unwrap();
        assert_eq!(pcm.len(), 240);
        assert_eq!(pcm[0], -32768);
        assert_eq!(pcm[120], 0);
    }

    #[test]
    fn test_filename_uses_sanitized_tag() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(wav_filename(Some("item-42"), now), "voice-item-42.wav");
        assert_eq!(wav_filename(Some("../etc/passwd"), now), "voice-etcpasswd.wav");
        assert_eq!(wav_filename(None, now), "voice-1700000000123.wav");
        assert_eq!(wav_filename(Some("///"), now), "voice-1700000000123.wav");
    }
}
