//! # Voice Chat Client - Main Application Entry Point
//!
//! A terminal client for a conversational-AI backend. Typed text goes over a
//! persistent WebSocket, recorded speech goes over HTTP as a WAV upload, and
//! every AI response is printed and spoken.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: Every component runs on the tokio runtime
//! - **modules**: One module per component (mod statements below)
//! - **Result<T, E>**: Startup errors bubble up to `main` through `?`
//! - **channels**: Components talk through `mpsc` queues instead of shared state
//!
//! ## Application Architecture:
//! - **config**: Endpoints and policies (TOML file + environment variables)
//! - **session**: The WebSocket connection and its reconnect loop
//! - **protocol / history**: Frame types and the conversation history
//! - **audio**: Microphone capture and the WAV encoder
//! - **exchange**: The multipart audio upload
//! - **speech**: Speech output with a single-utterance policy
//! - **router**: The event loop tying user actions to the transports
//! - **health / state**: Startup probe and client counters
//! - **error**: Error types and the notices shown to the user

// Module declarations - These tell Rust about our other source files
mod audio;       // Capture pipeline and WAV encoding (audio/ directory)
mod config;      // Configuration management (config.rs)
mod error;       // Error handling types (error.rs)
mod exchange;    // Audio upload client (exchange.rs)
mod health;      // Backend probe and session summary (health.rs)
mod history;     // Conversation history (history.rs)
mod protocol;    // Wire message types (protocol.rs)
mod router;      // Message router and console view (router.rs)
mod session;     // Streaming session manager (session.rs)
mod speech;      // Speech output (speech/ directory)
mod state;       // Client metrics (state.rs)

// External crate imports - These are dependencies from Cargo.toml
use anyhow::Result;    // Better error handling with context
use audio::device::{preference_from_config, system_microphone};
use audio::AudioCapture;
use config::AppConfig; // Our custom configuration struct
use exchange::AudioExchangeClient;
use health::BackendStatus;
use router::{ConsoleView, MessageRouter, UserAction};
use session::SessionManager;
use speech::{selectors_from_config, synthesizer_from_config, SpeechScheduler};
use state::ClientState;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::LinesStream, StreamExt};
use tracing::{debug, error, info, warn};  // Structured logging
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};  // Logging setup

/// How long the startup probe waits for the backend.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging
/// 3. **Probes the backend** once, for a readable startup message
/// 4. **Builds the components** and hands them to the router
/// 5. **Runs the router** until `/quit`, end of input, or Ctrl+C
///
/// ## Error Handling:
/// Only startup can fail. Once the router runs, transport problems are handled
/// by reconnecting and per-action problems are shown to the user.
#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-chat-client v{}", env!("CARGO_PKG_VERSION"));
    info!(websocket_url = %config.endpoints.websocket_url, "Configuration loaded");
    debug!("Effective configuration:\n{}", config.to_toml()?);

    match health::probe_backend(&config.endpoints, PROBE_TIMEOUT).await {
        BackendStatus::Reachable { message, latency_ms } => {
            info!(latency_ms, "Backend reachable: {}", message);
        }
        BackendStatus::Unreachable { reason } => {
            warn!(%reason, "Backend not reachable yet, the session will keep retrying");
        }
    }

    let metrics = ClientState::new();

    let (session, session_events) = SessionManager::new(
        config.endpoints.websocket_url.clone(),
        &config.session,
        metrics.clone(),
    );
    let exchange = AudioExchangeClient::new(&config.endpoints, &config.http)?;
    info!(endpoint = exchange.endpoint(), "Audio uploads ready");
    let speech = SpeechScheduler::new(
        synthesizer_from_config(&config.speech),
        selectors_from_config(&config.speech),
        &config.speech,
    )?;
    let capture = AudioCapture::new(system_microphone(preference_from_config(&config.audio.device)));

    let router = MessageRouter::new(
        session,
        capture,
        speech,
        exchange,
        Box::new(ConsoleView),
        metrics.clone(),
    );
    router.load_voices(config.speech.clone());

    let (actions_tx, actions_rx) = mpsc::channel(16);
    spawn_input_reader(actions_tx.clone());
    spawn_signal_handler(actions_tx);

    println!("Type a message and press Enter. Commands: /record, /clear, /quit");
    router.run(actions_rx, session_events).await;

    info!(summary = %health::session_summary(&metrics), "Client stopped");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "info", "voice_chat_client=trace")
/// - If not set, defaults to "voice_chat_client=debug"
///
/// Logs go to stderr so they do not interleave with the conversation on stdout.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            // Try to read RUST_LOG environment variable, or use defaults
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_chat_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

/// Read console lines and turn them into user actions.
///
/// ## Rust Concepts:
/// - **LinesStream**: adapts tokio's async line reader into a `Stream`
/// - **tokio::spawn**: the reader runs beside the router, never blocking it
///
/// End of input (Ctrl+D or a closed pipe) quits the client.
fn spawn_input_reader(actions: mpsc::Sender<UserAction>) {
    tokio::spawn(async move {
        let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, "Failed to read input");
                    break;
                }
            };
            let Some(action) = UserAction::from_input(&line) else { continue };
            let quit = action == UserAction::Quit;
            if actions.send(action).await.is_err() || quit {
                return;
            }
        }

        let _ = actions.send(UserAction::Quit).await;
    });
}

/// Turn Ctrl+C into a `Quit` action so the router can shut the session down.
fn spawn_signal_handler(actions: mpsc::Sender<UserAction>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                let _ = actions.send(UserAction::Quit).await;
            }
            Err(e) => error!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });
}
