//! # Audio Handlers
//!
//! Stateless endpoints over the audio core: inspect a synthesized payload,
//! re-encode it for history storage, and export it as a WAV download. Each
//! decodes the payload exactly once.

use crate::audio::{pcm, wav, AudioBuffer, AudioFormat, AudioPayload};
use crate::config::AudioConfig;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::http::header::ContentDisposition;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

/// Audio as it arrives from the synthesis service or a stored history record.
///
/// `sample_rate` and `channels` default to the configured audio format.
/// `tag` names the clip (usually the history item id) for playback events and
/// download file names.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioRequest {
    pub payload: AudioPayload,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    #[serde(default)]
    pub tag: Option<String>,
}

impl AudioRequest {
    /// Format declared by the request, falling back to `defaults`.
    pub fn format(&self, defaults: &AudioConfig) -> AppResult<AudioFormat> {
        let fallback = defaults.default_format();
        let format = AudioFormat::new(
            self.sample_rate.unwrap_or(fallback.sample_rate),
            self.channels.unwrap_or(fallback.channels),
        )?;
        Ok(format)
    }

    /// Size-check and decode the payload into a buffer.
    pub fn decode(&self, defaults: &AudioConfig) -> AppResult<AudioBuffer> {
        if self.payload.len() > defaults.max_payload_bytes {
            return Err(AppError::BadRequest(format!(
                "Payload of {} bytes exceeds the {} byte limit",
                self.payload.len(),
                defaults.max_payload_bytes
            )));
        }

        let buffer = pcm::decode_payload(&self.payload, self.format(defaults)?)?;
        debug!(
            frames = buffer.frames(),
            sample_rate = buffer.sample_rate(),
            channels = buffer.channels(),
            "Decoded audio payload"
        );
        Ok(buffer)
    }
}

/// `POST /audio/inspect`: decode a payload and describe it.
pub async fn inspect_audio(state: web::Data<AppState>, body: web::Json<AudioRequest>) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let buffer = body.decode(&config.audio)?;

    Ok(HttpResponse::Ok().json(json!({
        "format": buffer.format(),
        "frames": buffer.frames(),
        "samples": buffer.samples().len(),
        "duration_ms": buffer.duration().as_millis() as u64,
        "peak": buffer.peak(),
        "pcm_bytes": buffer.samples().len() * 2
    })))
}

/// `POST /audio/payload`: decode a payload and hand back its canonical
/// transport form for storage (buffer in, payload out).
///
/// The returned text decodes to the same samples as the input, with
/// surrounding whitespace removed and standard padding applied.
pub async fn encode_payload(state: web::Data<AppState>, body: web::Json<AudioRequest>) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let buffer = body.decode(&config.audio)?;
    let payload = pcm::encode_payload(&buffer);

    debug!(bytes = payload.len(), frames = buffer.frames(), "Re-encoded audio payload");

    Ok(HttpResponse::Ok().json(json!({
        "payload": payload,
        "format": buffer.format(),
        "frames": buffer.frames(),
        "duration_ms": buffer.duration().as_millis() as u64
    })))
}

/// `POST /audio/wav`: decode a payload and return it as a WAV attachment.
pub async fn export_wav(state: web::Data<AppState>, body: web::Json<AudioRequest>) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let buffer = body.decode(&config.audio)?;
    let wav = wav::encode_wav(&buffer)?;
    let filename = wav::wav_filename(body.tag.as_deref(), chrono::Utc::now());

    info!(filename = %filename, bytes = wav.len(), frames = buffer.frames(), "Exporting WAV");
    state.record_wav_export(wav.len());

    Ok(HttpResponse::Ok()
        .content_type("audio/wav")
        .insert_header(ContentDisposition::attachment(filename))
        .body(wav.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sink::ClockSink;
    use crate::audio::PlaybackController;
    use crate::config::AppConfig;
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use std::sync::Arc;

    fn app_state(config: AppConfig) -> AppState {
        AppState::new(config, PlaybackController::new(Arc::new(ClockSink)))
    }

    macro_rules! audio_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .route("/audio/inspect", web::post().to(inspect_audio))
                    .route("/audio/payload", web::post().to(encode_payload))
                    .route("/audio/wav", web::post().to(export_wav)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_inspect_known_payload() {
        let app = audio_app!(app_state(AppConfig::default()));

        let req = test::TestRequest::post()
            .uri("/audio/inspect")
            .set_json(json!({ "payload": "AAAAQP9/" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["frames"], 3);
        assert_eq!(body["format"]["sample_rate"], 24_000);
        assert_eq!(body["format"]["channels"], 1);
        assert_eq!(body["pcm_bytes"], 6);
    }

    #[actix_web::test]
    async fn test_inspect_rejects_bad_base64() {
        let app = audio_app!(app_state(AppConfig::default()));

        let req = test::TestRequest::post()
            .uri("/audio/inspect")
            .set_json(json!({ "payload": "not*base64" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "invalid_encoding");
    }

    #[actix_web::test]
    async fn test_inspect_rejects_partial_frame() {
        let app = audio_app!(app_state(AppConfig::default()));

        // 6 bytes is three mono samples but not a whole number of 4-channel frames
        let req = test::TestRequest::post()
            .uri("/audio/inspect")
            .set_json(json!({ "payload": "AAAAQP9/", "channels": 4 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "malformed_audio");
    }

    #[actix_web::test]
    async fn test_oversized_payload_rejected_before_decode() {
        let mut config = AppConfig::default();
        config.audio.max_payload_bytes = 4;
        let app = audio_app!(app_state(config));

        let req = test::TestRequest::post()
            .uri("/audio/inspect")
            .set_json(json!({ "payload": "AAAAQP9/" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "bad_request");
    }

    #[actix_web::test]
    async fn test_payload_comes_back_canonical() {
        let app = audio_app!(app_state(AppConfig::default()));

        let req = test::TestRequest::post()
            .uri("/audio/payload")
            .set_json(json!({ "payload": "  AAAAQP9/\n", "tag": "item-3" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["payload"], "AAAAQP9/");
        assert_eq!(body["frames"], 3);

        // The stored form decodes to the same clip
        let req = test::TestRequest::post()
            .uri("/audio/wav")
            .set_json(json!({ "payload": body["payload"] }))
            .to_request();
        let bytes = test::call_and_read_body(&app, req).await;
        assert_eq!(&bytes[44..], &[0x00, 0x00, 0x00, 0x40, 0xFF, 0x7F]);
    }

    #[actix_web::test]
    async fn test_payload_keeps_stereo_format() {
        let app = audio_app!(app_state(AppConfig::default()));

        // Two stereo frames
        let req = test::TestRequest::post()
            .uri("/audio/payload")
            .set_json(json!({ "payload": "AQACAAMABAA=", "sample_rate": 16_000, "channels": 2 }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["payload"], "AQACAAMABAA=");
        assert_eq!(body["frames"], 2);
        assert_eq!(body["format"]["channels"], 2);
        assert_eq!(body["format"]["sample_rate"], 16_000);
    }

    #[actix_web::test]
    async fn test_payload_rejects_bad_base64() {
        let app = audio_app!(app_state(AppConfig::default()));

        let req = test::TestRequest::post()
            .uri("/audio/payload")
            .set_json(json!({ "payload": "AA AA" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_export_wav_download() {
        let state = app_state(AppConfig::default());
        let app = audio_app!(state.clone());

        let req = test::TestRequest::post()
            .uri("/audio/wav")
            .set_json(json!({ "payload": "AAAAQP9/", "tag": "item-7" }))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "audio/wav");
        let disposition = resp.headers().get(header::CONTENT_DISPOSITION).unwrap().to_str().unwrap();
        assert!(disposition.contains("attachment"));
        assert!(disposition.contains("voice-item-7.wav"));

        let bytes = test::read_body(resp).await;
        assert_eq!(bytes.len(), 50);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[44..], &[0x00, 0x00, 0x00, 0x40, 0xFF, 0x7F]);

        assert_eq!(state.get_metrics_snapshot().wav_bytes_served, 50);
    }

    #[actix_web::test]
    async fn test_export_empty_payload_is_header_only() {
        let app = audio_app!(app_state(AppConfig::default()));

        let req = test::TestRequest::post()
            .uri("/audio/wav")
            .set_json(json!({ "payload": "" }))
            .to_request();
        let bytes = test::call_and_read_body(&app, req).await;
        assert_eq!(bytes.len(), wav::WAV_HEADER_LEN);
    }
}
