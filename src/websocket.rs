//! # WebSocket Playback Event Stream
//!
//! Clients connect to `/api/v1/ws/playback` to follow the playback slot in
//! real time, so a UI "playing" indicator can reset itself when a clip
//! finishes on its own.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: the server sends a `state` message with the current slot
//! 2. **Events**: every `Started`/`Stopped` controller event is forwarded as an
//!    `event` message, in order
//! 3. **Control**: clients may send `stop` (optionally with a session id) or
//!    ask for a fresh `state`
//! 4. **Heartbeat**: JSON ping/pong every 30s; silent clients are dropped after 60s
//!
//! ## Message Format:
//! - **Server → Client**: `{"type": "event", "event": {"event": "stopped", "session_id": 3, "tag": null, "reason": "completed"}}`
//! - **Client → Server**: `{"type": "stop", "session_id": 3}`

use crate::audio::{PlaybackEvent, PlaybackState, SessionId};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Messages sent by the server.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Snapshot of the playback slot
    State { state: PlaybackState },

    /// A controller event, forwarded as-is
    Event { event: PlaybackEvent },

    /// Reply to a client `stop`
    StopResult {
        stopped: bool,
        session_id: Option<SessionId>,
    },

    Error { code: String, message: String },

    Ping { timestamp: u64 },

    Pong { timestamp: u64 },
}

/// Messages accepted from the client.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Stop a session, or whatever is playing when no id is given
    Stop {
        #[serde(default)]
        session_id: Option<SessionId>,
    },

    /// Ask for a fresh `state` snapshot
    State,

    Ping { timestamp: u64 },

    Pong { timestamp: u64 },
}

/// One WebSocket connection following the playback controller.
pub struct PlaybackWebSocket {
    connection_id: Uuid,
    state: AppState,
    last_heartbeat: Instant,
}

impl PlaybackWebSocket {
    pub fn new(state: AppState) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            state,
            last_heartbeat: Instant::now(),
        }
    }

    fn send(&self, ctx: &mut ws::WebsocketContext<Self>, msg: &ServerMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => ctx.text(json),
            Err(e) => error!(connection_id = %self.connection_id, "Failed to serialize message: {}", e),
        }
    }

    fn send_state(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let state = self.state.playback.state();
        self.send(ctx, &ServerMessage::State { state });
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        warn!(connection_id = %self.connection_id, "WebSocket error {}: {}", code, message);
        self.send(
            ctx,
            &ServerMessage::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    fn handle_client_message(&mut self, msg: ClientMessage, ctx: &mut ws::WebsocketContext<Self>) {
        match msg {
            ClientMessage::Stop { session_id } => {
                // Stopping a device output joins its thread; keep that off the actor
                let playback = self.state.playback.clone();
                let stop = web::block(move || match session_id {
                    Some(id) => playback.stop(id).then_some(id),
                    None => playback.stop_current(),
                });

                ctx.spawn(stop.into_actor(self).map(|result, act, ctx| match result {
                    Ok(stopped) => act.send(
                        ctx,
                        &ServerMessage::StopResult {
                            stopped: stopped.is_some(),
                            session_id: stopped,
                        },
                    ),
                    Err(e) => act.send_error(ctx, "internal", &format!("Stop failed: {}", e)),
                }));
            }
            ClientMessage::State => self.send_state(ctx),
            ClientMessage::Ping { timestamp } => {
                self.last_heartbeat = Instant::now();
                self.send(ctx, &ServerMessage::Pong { timestamp });
            }
            ClientMessage::Pong { .. } => {
                self.last_heartbeat = Instant::now();
            }
        }
    }
}

impl Actor for PlaybackWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "Playback WebSocket connected");

        // Subscribe before the snapshot so no event falls in between
        ctx.add_stream(BroadcastStream::new(self.state.playback.subscribe()));
        self.send_state(ctx);

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection_id = %act.connection_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }

            let timestamp = chrono::Utc::now().timestamp_millis() as u64;
            act.send(ctx, &ServerMessage::Ping { timestamp });
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "Playback WebSocket disconnected");
    }
}

/// Controller events.
impl StreamHandler<Result<PlaybackEvent, BroadcastStreamRecvError>> for PlaybackWebSocket {
    fn handle(&mut self, item: Result<PlaybackEvent, BroadcastStreamRecvError>, ctx: &mut Self::Context) {
        match item {
            Ok(event) => {
                debug!(connection_id = %self.connection_id, ?event, "Forwarding playback event");
                self.send(ctx, &ServerMessage::Event { event });
            }
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                // Missed events can't be replayed; resync from a snapshot
                self.send_error(ctx, "lagged", &format!("Skipped {} playback events", skipped));
                self.send_state(ctx);
            }
        }
    }
}

/// Client frames.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for PlaybackWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => self.handle_client_message(message, ctx),
                Err(err) => self.send_error(ctx, "invalid_json", &format!("Invalid JSON: {}", err)),
            },
            Ok(ws::Message::Binary(_)) => {
                self.send_error(ctx, "unsupported", "Binary frames are not accepted on this stream");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.connection_id, "WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = %self.connection_id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.connection_id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

/// `GET /api/v1/ws/playback`: upgrade to the playback event stream.
pub async fn playback_ws(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    ws::start(PlaybackWebSocket::new(state.get_ref().clone()), &req, stream)
}
