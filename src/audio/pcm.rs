//! # PCM Decoding and the Canonical Audio Buffer
//!
//! Converts raw signed 16-bit little-endian PCM into normalized float samples
//! and back. The resulting `AudioBuffer` is the canonical in-memory form that
//! both playback and WAV export are derived from.
//!
//! ## Conversion Rules:
//! - **Decode**: each sample `s` becomes `s / 32768.0`, so values land in `[-1.0, 1.0)`
//! - **Encode**: clamp to `[-1.0, 1.0]`, scale by 32768, round half away from zero,
//!   saturate to the i16 range
//! - **Alignment**: byte length must be a multiple of `2 * channels`; nothing is
//!   ever silently truncated

use super::codec::{self, AudioPayload};
use super::AudioError;
use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

/// Sample rate the synthesis service produces unless told otherwise.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Channel count the synthesis service produces unless told otherwise.
pub const DEFAULT_CHANNELS: u16 = 1;

const BYTES_PER_SAMPLE: usize = 2;

/// Full-scale factor between normalized floats and 16-bit integers.
const PCM_SCALE: f32 = 32768.0;

/// Sample rate and channel layout of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    /// Create a format, rejecting a zero sample rate or channel count.
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        if sample_rate == 0 {
            return Err(AudioError::MalformedAudio("sample rate must be positive".to_string()));
        }
        if channels == 0 {
            return Err(AudioError::MalformedAudio("channel count must be positive".to_string()));
        }
        Ok(Self { sample_rate, channels })
    }

    /// Bytes occupied by one frame (one 16-bit sample per channel).
    pub fn block_align(&self) -> usize {
        self.channels as usize * BYTES_PER_SAMPLE
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
        }
    }
}

/// Decoded audio: normalized float samples, frame-major interleaved.
///
/// ## Ownership:
/// Samples live behind an `Arc<[f32]>` and are never mutated after
/// construction. Cloning a buffer hands out another reference to the same
/// samples, so the playback controller and the WAV encoder can work from the
/// same decode concurrently.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    format: AudioFormat,
    samples: Arc<[f32]>,
}

impl AudioBuffer {
    /// Build a buffer from samples that are already normalized.
    ///
    /// The sample count must be a whole number of frames.
    pub fn from_samples(format: AudioFormat, samples: Vec<f32>) -> Result<Self, AudioError> {
        let format = AudioFormat::new(format.sample_rate, format.channels)?;
        if samples.len() % format.channels as usize != 0 {
            return Err(AudioError::MalformedAudio(format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                format.channels
            )));
        }
        Ok(Self {
            format,
            samples: samples.into(),
        })
    }

    /// A zero-length buffer, the decode of an intentionally silent synthesis result.
    pub fn empty(format: AudioFormat) -> Self {
        Self {
            format,
            samples: Arc::from(Vec::new()),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.format.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration at the buffer's declared sample rate.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.format.sample_rate as f64)
    }

    /// Largest absolute sample value, 0.0 for an empty buffer.
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
    }
}

/// Interpret raw bytes as little-endian i16 PCM and normalize to floats.
///
/// ## Errors:
/// - **MalformedAudio**: zero rate/channels, or a byte length that is not a
///   multiple of `2 * channels` (a trailing partial frame is corruption)
///
/// An empty byte sequence yields an empty, valid buffer.
pub fn decode_pcm(bytes: &[u8], format: AudioFormat) -> Result<AudioBuffer, AudioError> {
    let format = AudioFormat::new(format.sample_rate, format.channels)?;
    let block_align = format.block_align();

    if bytes.len() % block_align != 0 {
        return Err(AudioError::MalformedAudio(format!(
            "{} bytes is not a multiple of the {}-byte frame size",
            bytes.len(),
            block_align
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / BYTES_PER_SAMPLE);

    // Length is frame aligned, so every read below succeeds
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / PCM_SCALE);
    }

    Ok(AudioBuffer {
        format,
        samples: samples.into(),
    })
}

/// Convert one normalized sample to 16-bit PCM.
///
/// Out-of-range values are clamped rather than rejected; NaN becomes silence.
pub fn float_to_pcm(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let scaled = (sample.clamp(-1.0, 1.0) * PCM_SCALE).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Serialize a buffer's samples as little-endian i16 PCM bytes.
pub fn encode_pcm(buffer: &AudioBuffer) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(buffer.samples().len() * BYTES_PER_SAMPLE);
    for &sample in buffer.samples() {
        bytes.extend_from_slice(&float_to_pcm(sample).to_le_bytes());
    }
    bytes
}

/// Decode a transport payload straight into a buffer (payload in, buffer out).
pub fn decode_payload(payload: &AudioPayload, format: AudioFormat) -> Result<AudioBuffer, AudioError> {
    let bytes = codec::decode_base64(payload)?;
    decode_pcm(&bytes, format)
}

/// Re-encode a buffer as a transport payload for storage (buffer in, payload out).
pub fn encode_payload(buffer: &AudioBuffer) -> AudioPayload {
    codec::encode_base64(&encode_pcm(buffer))
}
