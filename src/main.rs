//! # TTS Audio Backend - Main Application Entry Point
//!
//! Actix-web server around the speech audio core: base64 PCM payloads from
//! the synthesis service go in, playback sessions and WAV downloads come out.
//!
//! ## Application Architecture:
//! - **audio**: base64 codec, PCM decoding, WAV encoding, output sinks and the playback controller
//! - **config**: Handles application configuration (TOML files + environment variables)
//! - **state**: Manages shared application state and metrics
//! - **health**: Provides system health monitoring endpoints
//! - **middleware**: Custom request processing logic (logging, metrics)
//! - **handlers**: HTTP request handlers for API endpoints
//! - **websocket**: Live playback event stream
//! - **error**: Custom error types and HTTP error responses

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use audio::sink::{self, OutputKind};
use audio::PlaybackController;
use config::AppConfig;
use error::AppError;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGTERM or SIGINT arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// Room for the JSON envelope around a maximum-size payload.
const JSON_ENVELOPE_BYTES: usize = 4096;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{} ({} Hz, {} channel(s), output {:?})",
        config.server.host, config.server.port, config.audio.sample_rate, config.audio.channels, config.playback.output
    );

    let playback = PlaybackController::new(create_sink(config.playback.output));
    let app_state = AppState::new(config.clone(), playback);
    let _recorder = app_state.spawn_playback_recorder();

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let json_limit = config.audio.max_payload_bytes.saturating_add(JSON_ENVELOPE_BYTES);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_headers(["content-disposition", middleware::REQUEST_ID_HEADER])
            .max_age(3600);

        let json_config = web::JsonConfig::default()
            .limit(json_limit)
            .error_handler(|err, _req| AppError::BadRequest(format!("Invalid request body: {}", err)).into());

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .app_data(json_config)
            // Middleware runs outermost-last: CORS sees the request first
            .wrap(middleware::RequestLogging)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .wrap(cors)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/audio/inspect", web::post().to(handlers::inspect_audio))
                    .route("/audio/payload", web::post().to(handlers::encode_payload))
                    .route("/audio/wav", web::post().to(handlers::export_wav))
                    .route("/playback", web::get().to(handlers::playback_state))
                    .route("/playback/play", web::post().to(handlers::play))
                    .route("/playback/toggle", web::post().to(handlers::toggle))
                    .route("/playback/stop", web::post().to(handlers::stop))
                    .route("/ws/playback", web::get().to(websocket::playback_ws)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    // Release the output device before exiting
    if let Some(session_id) = app_state.playback.stop_current() {
        info!(session_id = %session_id, "Stopped playback on shutdown");
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing.
///
/// `RUST_LOG` controls the filter; defaults to
/// `tts_audio_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tts_audio_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Build the configured sink, falling back to the clock sink when the output
/// device cannot be used. Playback requests then still succeed on headless hosts.
fn create_sink(kind: OutputKind) -> std::sync::Arc<dyn audio::AudioSink> {
    match sink::create_sink(kind) {
        Ok(output) => {
            info!(sink = output.name(), "Playback output ready");
            output
        }
        Err(e) => {
            warn!("Playback output {:?} unavailable ({}), falling back to clock output", kind, e);
            std::sync::Arc::new(sink::ClockSink)
        }
    }
}

/// Listen for SIGTERM and SIGINT and raise the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                return;
            }
        };
        let mut sigint = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()) {
            Ok(signal) => signal,
            Err(e) => {
                error!("Failed to install SIGINT handler: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
