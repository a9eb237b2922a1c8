//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_AUDIO__SAMPLE_RATE`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Sections are separated from field names by a double underscore so that
//! multi-word fields like `max_payload_bytes` survive the mapping.

use crate::audio::pcm::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};
use crate::audio::{AudioFormat, OutputKind};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub playback: PlaybackConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Format assumed for incoming payloads when the request does not declare one,
/// and the request size limit.
///
/// ## Fields:
/// - `sample_rate`: Hz, the synthesis service produces 24000
/// - `channels`: interleaved channel count, the synthesis service produces mono
/// - `max_payload_bytes`: largest accepted base64 payload, checked before decoding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub max_payload_bytes: usize,
}

/// Playback output selection. Changes take effect on restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    pub output: OutputKind,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            audio: AudioConfig {
                sample_rate: DEFAULT_SAMPLE_RATE,
                channels: DEFAULT_CHANNELS,
                max_payload_bytes: 16 * 1024 * 1024, // ~5 minutes of 24kHz mono as base64
            },
            playback: PlaybackConfig {
                output: OutputKind::Clock,
            },
        }
    }
}

impl AudioConfig {
    /// Default format for requests that do not declare one.
    pub fn default_format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_AUDIO__MAX_PAYLOAD_BYTES=1048576`: Tighten the request size limit
    /// - `APP_PLAYBACK__OUTPUT=device`: Play through the sound card
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        // Deployment platforms set these without the APP_ prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate must be greater than 0"));
        }

        if self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Audio channel count must be greater than 0"));
        }

        if self.audio.max_payload_bytes == 0 {
            return Err(anyhow::anyhow!("Max payload size must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial JSON update, e.g. `{"audio": {"sample_rate": 16000}}`.
    ///
    /// Only the fields present are changed. The result is validated before
    /// returning; on error `self` may be partially updated, so callers work on
    /// a copy.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port =
                    u16::try_from(port).map_err(|_| anyhow::anyhow!("Server port {} is out of range", port))?;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(rate) = audio.get("sample_rate").and_then(|v| v.as_u64()) {
                self.audio.sample_rate =
                    u32::try_from(rate).map_err(|_| anyhow::anyhow!("Sample rate {} is out of range", rate))?;
            }
            if let Some(channels) = audio.get("channels").and_then(|v| v.as_u64()) {
                self.audio.channels = u16::try_from(channels)
                    .map_err(|_| anyhow::anyhow!("Channel count {} is out of range", channels))?;
            }
            if let Some(limit) = audio.get("max_payload_bytes").and_then(|v| v.as_u64()) {
                self.audio.max_payload_bytes = limit as usize;
            }
        }

        if let Some(playback) = partial_config.get("playback") {
            if let Some(output) = playback.get("output").and_then(|v| v.as_str()) {
                self.playback.output = output.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            }
        }

        self.validate()?;
        Ok(())
    }
}
