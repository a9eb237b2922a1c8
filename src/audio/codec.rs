//! # Base64 Transport Codec
//!
//! The speech-synthesis service returns audio as base64 text, and history
//! records store that same text. This module converts between the textual
//! transport form and raw PCM bytes. Both directions are pure functions.

use super::AudioError;
use base64::{engine::general_purpose, Engine};
use serde::{Deserialize, Serialize};

/// Base64 text of raw PCM bytes, exactly as received from the synthesis service.
///
/// The core never mutates a payload; it only decodes copies of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioPayload(String);

impl AudioPayload {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length of the textual form in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for AudioPayload {
    fn from(text: String) -> Self {
        Self(text)
    }
}

/// Decode standard (padded) base64 into raw bytes.
///
/// Leading and trailing ASCII whitespace is ignored so that payloads copied
/// out of stored records with a trailing newline still decode. Anything else
/// outside the base64 alphabet, or a wrong padding length, is rejected.
pub fn decode_base64(payload: &AudioPayload) -> Result<Vec<u8>, AudioError> {
    general_purpose::STANDARD
        .decode(payload.as_str().trim_matches(|c: char| c.is_ascii_whitespace()))
        .map_err(|e| AudioError::InvalidEncoding(e.to_string()))
}

/// Encode raw bytes as standard padded base64. Never fails.
pub fn encode_base64(bytes: &[u8]) -> AudioPayload {
    AudioPayload(general_purpose::STANDARD.encode(bytes))
}
