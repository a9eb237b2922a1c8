use crate::audio::{PlaybackController, SessionId};
use crate::error::{AppError, AppResult};
use crate::handlers::audio::AudioRequest;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Default, Deserialize)]
pub struct StopRequest {
    /// Session to stop; omitted means whatever is playing
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// Run a controller call on the blocking pool.
///
/// Starting or stopping a device output waits for the output thread while the
/// slot lock is held, so these calls stay off the async workers.
async fn with_playback<T, F>(state: &AppState, call: F) -> AppResult<T>
where
    F: FnOnce(PlaybackController) -> T + Send + 'static,
    T: Send + 'static,
{
    let playback = state.playback.clone();
    Ok(web::block(move || call(playback)).await?)
}

/// `POST /playback/play`: decode and play, replacing the current session.
pub async fn play(state: web::Data<AppState>, body: web::Json<AudioRequest>) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let request = body.into_inner();
    let buffer = request.decode(&config.audio)?;
    let tag = request.tag;

    let session = with_playback(&state, move |playback| playback.play_tagged(buffer, tag)).await??;

    Ok(HttpResponse::Ok().json(json!({
        "status": "playing",
        "session": session
    })))
}

/// `POST /playback/toggle`: play button semantics; same tag (or both untagged) stops.
pub async fn toggle(state: web::Data<AppState>, body: web::Json<AudioRequest>) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let request = body.into_inner();
    let buffer = request.decode(&config.audio)?;
    let tag = request.tag;

    let response = match with_playback(&state, move |playback| playback.toggle(buffer, tag)).await?? {
        Some(session) => json!({ "status": "playing", "session": session }),
        None => json!({ "status": "stopped", "session": null }),
    };

    Ok(HttpResponse::Ok().json(response))
}

impl StopRequest {
    /// An empty body means "stop whatever is playing". Anything else must be
    /// a valid request; a broken body never falls back to stopping the current
    /// session.
    fn from_body(body: &[u8]) -> AppResult<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid stop request: {}", e)))
    }
}

/// `POST /playback/stop`: stop a session. Never fails for unknown ids.
pub async fn stop(state: web::Data<AppState>, body: web::Bytes) -> AppResult<HttpResponse> {
    let request = StopRequest::from_body(&body)?;

    let stopped = with_playback(&state, move |playback| match request.session_id {
        Some(session_id) => playback.stop(session_id).then_some(session_id),
        None => playback.stop_current(),
    })
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "stopped": stopped.is_some(),
        "session_id": stopped
    })))
}

/// `GET /playback`: current state of the playback slot.
pub async fn playback_state(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.playback.state())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sink::{AudioSink, CompletionNotifier, OutputHandle};
    use crate::audio::{AudioBuffer, AudioError, PlaybackController};
    use crate::config::AppConfig;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use std::sync::Arc;

    /// Output that never completes on its own.
    struct HoldSink;

    struct HoldOutput;

    impl OutputHandle for HoldOutput {
        fn stop(&mut self) {}
    }

    impl AudioSink for HoldSink {
        fn start(&self, _buffer: AudioBuffer, _done: CompletionNotifier) -> Result<Box<dyn OutputHandle>, AudioError> {
            Ok(Box::new(HoldOutput))
        }

        fn name(&self) -> &'static str {
            "hold"
        }
    }

    struct NoDeviceSink;

    impl AudioSink for NoDeviceSink {
        fn start(&self, _buffer: AudioBuffer, _done: CompletionNotifier) -> Result<Box<dyn OutputHandle>, AudioError> {
            Err(AudioError::PlaybackUnavailable("no output device".to_string()))
        }

        fn name(&self) -> &'static str {
            "none"
        }
    }

    /// Records which thread started the output.
    #[derive(Default)]
    struct ThreadSink {
        started_on: std::sync::Mutex<Option<std::thread::ThreadId>>,
    }

    impl AudioSink for Arc<ThreadSink> {
        fn start(&self, _buffer: AudioBuffer, _done: CompletionNotifier) -> Result<Box<dyn OutputHandle>, AudioError> {
            *self.started_on.lock().unwrap() = Some(std::thread::current().id());
            Ok(Box::new(HoldOutput))
        }

        fn name(&self) -> &'static str {
            "thread"
        }
    }

    macro_rules! playback_app {
        ($sink:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new(AppState::new(
                        AppConfig::default(),
                        PlaybackController::new(Arc::new($sink)),
                    )))
                    .route("/playback", web::get().to(playback_state))
                    .route("/playback/play", web::post().to(play))
                    .route("/playback/toggle", web::post().to(toggle))
                    .route("/playback/stop", web::post().to(stop)),
            )
            .await
        };
    }

    fn clip(tag: &str) -> serde_json::Value {
        json!({ "payload": "AAAAQP9/", "tag": tag })
    }

    #[actix_web::test]
    async fn test_play_then_replace_then_stop() {
        let app = playback_app!(HoldSink);

        let req = test::TestRequest::post().uri("/playback/play").set_json(clip("a")).to_request();
        let first: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(first["status"], "playing");
        let first_id = first["session"]["id"].as_u64().unwrap();

        let req = test::TestRequest::post().uri("/playback/play").set_json(clip("b")).to_request();
        let second: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let second_id = second["session"]["id"].as_u64().unwrap();
        assert!(second_id > first_id);

        let state: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/playback").to_request()).await;
        assert_eq!(state["state"], "playing");
        assert_eq!(state["session"]["tag"], "b");

        // Stopping the replaced session is a no-op
        let req = test::TestRequest::post()
            .uri("/playback/stop")
            .set_json(json!({ "session_id": first_id }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["stopped"], false);

        let req = test::TestRequest::post()
            .uri("/playback/stop")
            .set_json(json!({ "session_id": second_id }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["stopped"], true);
        assert_eq!(body["session_id"], second_id);

        let state: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/playback").to_request()).await;
        assert_eq!(state["state"], "idle");
    }

    #[actix_web::test]
    async fn test_stop_without_body_stops_current() {
        let app = playback_app!(HoldSink);

        let req = test::TestRequest::post().uri("/playback/play").set_json(clip("a")).to_request();
        test::call_service(&app, req).await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::post().uri("/playback/stop").to_request()).await;
        assert_eq!(body["stopped"], true);

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::post().uri("/playback/stop").to_request()).await;
        assert_eq!(body["stopped"], false);
    }

    #[actix_web::test]
    async fn test_stop_with_bad_body_keeps_current_session() {
        let app = playback_app!(HoldSink);

        let req = test::TestRequest::post().uri("/playback/play").set_json(clip("a")).to_request();
        test::call_service(&app, req).await;
        let req = test::TestRequest::post().uri("/playback/play").set_json(clip("b")).to_request();
        let current: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        // Session id sent as a string
        let req = test::TestRequest::post()
            .uri("/playback/stop")
            .set_json(json!({ "session_id": "1" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "bad_request");

        let req = test::TestRequest::post()
            .uri("/playback/stop")
            .insert_header(("content-type", "text/plain"))
            .set_payload("stop please")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let state: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/playback").to_request()).await;
        assert_eq!(state["state"], "playing");
        assert_eq!(state["session"]["id"], current["session"]["id"]);
    }

    #[actix_web::test]
    async fn test_toggle_untagged_clip() {
        let app = playback_app!(HoldSink);

        for expected in ["playing", "stopped"] {
            let req = test::TestRequest::post()
                .uri("/playback/toggle")
                .set_json(json!({ "payload": "AAAAQP9/" }))
                .to_request();
            let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
            assert_eq!(body["status"], expected);
        }
    }

    #[actix_web::test]
    async fn test_toggle_same_clip() {
        let app = playback_app!(HoldSink);

        let req = test::TestRequest::post().uri("/playback/toggle").set_json(clip("item-1")).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "playing");

        let req = test::TestRequest::post().uri("/playback/toggle").set_json(clip("item-1")).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "stopped");
    }

    #[actix_web::test]
    async fn test_output_starts_off_the_request_thread() {
        let sink = Arc::new(ThreadSink::default());
        let app = playback_app!(sink.clone());

        let req = test::TestRequest::post().uri("/playback/play").set_json(clip("a")).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let started_on = sink.started_on.lock().unwrap().expect("output was not started");
        assert_ne!(started_on, std::thread::current().id());
    }

    #[actix_web::test]
    async fn test_unavailable_output_is_503() {
        let app = playback_app!(NoDeviceSink);

        let req = test::TestRequest::post().uri("/playback/play").set_json(clip("a")).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "playback_unavailable");

        let state: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/playback").to_request()).await;
        assert_eq!(state["state"], "idle");
    }

    #[actix_web::test]
    async fn test_malformed_payload_does_not_touch_playback() {
        let app = playback_app!(HoldSink);

        let req = test::TestRequest::post()
            .uri("/playback/play")
            // Three bytes is half a sample short
            .set_json(json!({ "payload": "AAAA" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let state: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/playback").to_request()).await;
        assert_eq!(state["state"], "idle");
    }
}
