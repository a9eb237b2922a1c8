//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor through
//! `web::Data<AppState>`.
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: many handlers hold a reference to the same data
//! - **RwLock**: many concurrent readers or one writer
//!
//! Configuration and metrics follow that pattern. The playback controller
//! manages its own locking and is shared by cloning it.

use crate::audio::{PlaybackController, PlaybackEvent, StopReason};
use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

/// The main application state that's shared across all HTTP request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and playback counters
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,

    /// The single playback slot of this service
    pub playback: PlaybackController,
}

/// Metrics collected across all HTTP requests and playback sessions.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Key: route pattern (e.g., "POST /api/v1/playback/play")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,

    pub playback: PlaybackMetrics,

    /// WAV files produced by the export endpoint
    pub wav_exports: u64,

    /// Total size of those files
    pub wav_bytes_served: u64,
}

/// Session lifecycle counters, fed from the controller's event stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaybackMetrics {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_cancelled: u64,
}

/// Per-endpoint counters.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, playback: PlaybackController) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            playback,
        }
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_ref(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap_or_else(PoisonError::into_inner) = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    /// Record duration and outcome of one request to `endpoint`.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count one WAV export of `bytes` bytes.
    pub fn record_wav_export(&self, bytes: usize) {
        let mut metrics = self.metrics_mut();
        metrics.wav_exports += 1;
        metrics.wav_bytes_served += bytes as u64;
    }

    /// Update the session counters from one controller event.
    pub fn record_playback_event(&self, event: &PlaybackEvent) {
        let mut metrics = self.metrics_mut();
        match event {
            PlaybackEvent::Started { .. } => metrics.playback.sessions_started += 1,
            PlaybackEvent::Stopped {
                reason: StopReason::Completed,
                ..
            } => metrics.playback.sessions_completed += 1,
            PlaybackEvent::Stopped {
                reason: StopReason::Cancelled,
                ..
            } => metrics.playback.sessions_cancelled += 1,
        }
    }

    /// Follow the controller's events and keep the session counters current.
    ///
    /// The task ends when the controller's event channel closes.
    pub fn spawn_playback_recorder(&self) -> JoinHandle<()> {
        let state = self.clone();
        let mut events = self.playback.subscribe();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => state.record_playback_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Playback metrics lagged behind events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_ref().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate between 0.0 and 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
