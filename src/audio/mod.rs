//! # Audio Transport and Playback Module
//!
//! This module owns everything that touches synthesized speech audio after it
//! leaves the speech-synthesis service and before it reaches a speaker or a file.
//!
//! ## Key Components:
//! - **Codec**: Base64 transport encoding of raw PCM payloads
//! - **PCM**: Signed 16-bit little-endian PCM to normalized float buffers and back
//! - **WAV**: Canonical RIFF/WAVE serialization for downloads
//! - **Sink**: The audio output seam (clock-driven or a real output device)
//! - **Playback**: Single-slot playback controller with completion events
//!
//! ## Data Flow:
//! ```text
//! base64 payload -> codec -> raw bytes -> pcm -> AudioBuffer -> { playback, wav }
//! ```
//! The `AudioBuffer` is the only representation playback and export work from,
//! so a payload is decoded exactly once per buffer.
//!
//! ## Audio Format Defaults:
//! - **Sample Rate**: 24kHz (24,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod codec;     // Base64 transport encoding
pub mod pcm;       // PCM decoding and the canonical AudioBuffer
pub mod playback;  // Playback controller and session events
pub mod sink;      // Audio output implementations
pub mod wav;       // WAV container encoding

pub use codec::AudioPayload;
pub use pcm::{AudioBuffer, AudioFormat};
pub use playback::{PlaybackController, PlaybackEvent, PlaybackState, SessionId, StopReason};
pub use sink::{AudioSink, OutputKind};

use std::fmt;

/// Failures produced by the audio core.
///
/// ## Error Categories:
/// - **InvalidEncoding**: The payload is not valid base64. Needs a new payload.
/// - **MalformedAudio**: The bytes or format do not describe whole PCM frames.
///   The input is corrupt and retrying with it will fail again.
/// - **PlaybackUnavailable**: The output device or resource could not be
///   initialized. Safe to retry later; no buffer is affected.
///
/// Decode and encode failures never leave partial state behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    InvalidEncoding(String),
    MalformedAudio(String),
    PlaybackUnavailable(String),
}

impl AudioError {
    /// Whether the same request could succeed later without changing its input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AudioError::PlaybackUnavailable(_))
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::InvalidEncoding(msg) => write!(f, "Invalid payload encoding: {}", msg),
            AudioError::MalformedAudio(msg) => write!(f, "Malformed audio: {}", msg),
            AudioError::PlaybackUnavailable(msg) => write!(f, "Playback unavailable: {}", msg),
        }
    }
}

impl std::error::Error for AudioError {}
