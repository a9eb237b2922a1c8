//! # Playback Controller
//!
//! Owns the single playback slot of the service. At most one session is ever
//! `Playing`; starting a new one stops the old one first.
//!
//! ## State Machine:
//! ```text
//!            play                         play (replace)
//!   Idle ────────────► Playing(A) ───────────────────────► Playing(B)
//!    ▲                   │  │                                 │
//!    │    stop(A)        │  │ completion(A)                   │
//!    └───────────────────┘  └──── Stopped{A, Completed} ──────┘
//! ```
//!
//! ## Key Guarantees:
//! - **Replace-before-insert**: the old output is stopped, and its `Cancelled`
//!   event emitted, before the new output starts
//! - **Idempotent stop**: stopping a finished or superseded session is a no-op
//! - **Stale completion suppression**: a completion report for a session that
//!   is no longer current is dropped by comparing session ids
//! - **Failure leaves Idle**: if the sink cannot start, the slot stays empty
//!
//! ## Concurrency:
//! `play`, `stop` and completion handling all go through one mutex around the
//! slot. Sinks report completion over an unbounded channel, drained by a
//! tokio task, so audio threads never contend for that mutex.

use super::sink::{AudioSink, CompletionNotifier, OutputHandle};
use super::{AudioBuffer, AudioError, AudioFormat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Capacity of the event channel. Slow subscribers beyond this lag and skip.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Identity of one playback attempt.
///
/// Allocated from a monotonically increasing counter, so a later session
/// always compares greater than an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle describing a started session. Returned by `play`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSession {
    pub id: SessionId,
    /// Caller label, e.g. the history item the clip belongs to
    pub tag: Option<String>,
    pub format: AudioFormat,
    pub frames: usize,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl PlaybackSession {
    fn new(id: SessionId, tag: Option<String>, buffer: &AudioBuffer) -> Self {
        Self {
            id,
            tag,
            format: buffer.format(),
            frames: buffer.frames(),
            duration_ms: buffer.duration().as_millis() as u64,
            started_at: Utc::now(),
        }
    }
}

/// Why a session left the `Playing` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The sink consumed every frame
    Completed,
    /// Stopped explicitly or replaced by a newer session
    Cancelled,
}

/// Notifications published to subscribers. Each session produces exactly one
/// `Started` followed by exactly one `Stopped`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlaybackEvent {
    Started {
        session: PlaybackSession,
    },
    Stopped {
        session_id: SessionId,
        tag: Option<String>,
        reason: StopReason,
    },
}

/// Snapshot of the controller's slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "session", rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Playing(PlaybackSession),
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing(_))
    }
}

/// Single-slot playback controller. Cheap to clone; clones share the slot.
#[derive(Clone)]
pub struct PlaybackController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    sink: Arc<dyn AudioSink>,
    slot: Mutex<Option<ActiveSession>>,
    next_id: AtomicU64,
    events: broadcast::Sender<PlaybackEvent>,
    completions: mpsc::UnboundedSender<SessionId>,
}

struct ActiveSession {
    session: PlaybackSession,
    output: Box<dyn OutputHandle>,
}

impl PlaybackController {
    /// Create a controller playing through `sink`.
    ///
    /// Must be called from within a tokio runtime: completion reports are
    /// drained by a task spawned here. The task exits once every clone of the
    /// controller has been dropped.
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (completions, completion_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ControllerInner {
            sink,
            slot: Mutex::new(None),
            next_id: AtomicU64::new(1),
            events,
            completions,
        });

        tokio::spawn(drain_completions(Arc::downgrade(&inner), completion_rx));

        Self { inner }
    }

    /// Name of the sink this controller plays through.
    pub fn sink_name(&self) -> &'static str {
        self.inner.sink.name()
    }

    /// Start playing `buffer`, replacing whatever is playing now.
    pub fn play(&self, buffer: AudioBuffer) -> Result<PlaybackSession, AudioError> {
        self.play_tagged(buffer, None)
    }

    /// Like `play`, attaching a caller label to the session and its events.
    ///
    /// ## Errors:
    /// - **PlaybackUnavailable**: the sink could not start. Any session that
    ///   was playing before the call has already been cancelled and the
    ///   controller is `Idle`.
    pub fn play_tagged(&self, buffer: AudioBuffer, tag: Option<String>) -> Result<PlaybackSession, AudioError> {
        let mut slot = self.inner.lock_slot();
        self.inner.cancel_active(&mut slot);
        self.inner.start_locked(&mut slot, buffer, tag)
    }

    /// Play/stop toggle for a clip.
    ///
    /// If the current session carries the same `tag`, it is stopped and
    /// `None` is returned. Untagged clips count as the same clip, so an
    /// untagged toggle stops untagged playback. Otherwise the clip starts
    /// playing as with `play_tagged`, replacing any other session.
    pub fn toggle(&self, buffer: AudioBuffer, tag: Option<String>) -> Result<Option<PlaybackSession>, AudioError> {
        let mut slot = self.inner.lock_slot();

        let same_clip = slot
            .as_ref()
            .map(|active| active.session.tag == tag)
            .unwrap_or(false);

        self.inner.cancel_active(&mut slot);
        if same_clip {
            return Ok(None);
        }

        self.inner.start_locked(&mut slot, buffer, tag).map(Some)
    }

    /// Stop `session_id` if it is the current session.
    ///
    /// Returns whether anything was stopped. Stopping a session that already
    /// finished, or was replaced, is a no-op.
    pub fn stop(&self, session_id: SessionId) -> bool {
        let mut slot = self.inner.lock_slot();

        let is_current = slot
            .as_ref()
            .map(|active| active.session.id == session_id)
            .unwrap_or(false);

        if !is_current {
            debug!(session_id = %session_id, "Stop ignored, session is not current");
            return false;
        }

        self.inner.cancel_active(&mut slot);
        true
    }

    /// Stop whatever is playing. Returns the id of the stopped session.
    pub fn stop_current(&self) -> Option<SessionId> {
        let mut slot = self.inner.lock_slot();
        self.inner.cancel_active(&mut slot)
    }

    pub fn state(&self) -> PlaybackState {
        match self.current() {
            Some(session) => PlaybackState::Playing(session),
            None => PlaybackState::Idle,
        }
    }

    /// The session currently playing, if any.
    pub fn current(&self) -> Option<PlaybackSession> {
        self.inner.lock_slot().as_ref().map(|active| active.session.clone())
    }

    /// Receive every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.inner.events.subscribe()
    }
}

impl fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackController")
            .field("sink", &self.inner.sink.name())
            .field("current", &self.current().map(|s| s.id))
            .finish()
    }
}

impl ControllerInner {
    fn lock_slot(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        // The slot is always left consistent, so a poisoned lock is still usable
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop and release the active session, emitting its `Cancelled` event.
    fn cancel_active(&self, slot: &mut Option<ActiveSession>) -> Option<SessionId> {
        let mut active = slot.take()?;
        active.output.stop();
        drop(active.output);

        info!(session_id = %active.session.id, "Playback cancelled");
        self.emit(PlaybackEvent::Stopped {
            session_id: active.session.id,
            tag: active.session.tag,
            reason: StopReason::Cancelled,
        });

        Some(active.session.id)
    }

    /// Start a new session into an empty slot.
    fn start_locked(
        &self,
        slot: &mut Option<ActiveSession>,
        buffer: AudioBuffer,
        tag: Option<String>,
    ) -> Result<PlaybackSession, AudioError> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let session = PlaybackSession::new(id, tag, &buffer);
        let notifier = CompletionNotifier::new(id, self.completions.clone());

        let output = self.sink.start(buffer, notifier).map_err(|e| {
            warn!(session_id = %id, sink = self.sink.name(), error = %e, "Playback failed to start");
            e
        })?;

        info!(
            session_id = %id,
            tag = ?session.tag,
            frames = session.frames,
            duration_ms = session.duration_ms,
            "Playback started"
        );

        *slot = Some(ActiveSession {
            session: session.clone(),
            output,
        });
        self.emit(PlaybackEvent::Started {
            session: session.clone(),
        });

        Ok(session)
    }

    /// Handle a natural completion report from the sink.
    fn finish(&self, session_id: SessionId) {
        let mut slot = self.lock_slot();

        let is_current = slot
            .as_ref()
            .map(|active| active.session.id == session_id)
            .unwrap_or(false);

        if !is_current {
            debug!(session_id = %session_id, "Ignoring stale completion");
            return;
        }

        if let Some(active) = slot.take() {
            drop(active.output);

            info!(session_id = %session_id, "Playback completed");
            self.emit(PlaybackEvent::Stopped {
                session_id,
                tag: active.session.tag,
                reason: StopReason::Completed,
            });
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        // No subscribers is normal
        let _ = self.events.send(event);
    }
}

async fn drain_completions(controller: Weak<ControllerInner>, mut completions: mpsc::UnboundedReceiver<SessionId>) {
    while let Some(session_id) = completions.recv().await {
        match controller.upgrade() {
            Some(inner) => inner.finish(session_id),
            None => break,
        }
    }
    debug!("Playback completion task finished");
}
