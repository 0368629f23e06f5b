//! # Configuration Management
//!
//! This module handles loading the client's configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Converts between the Rust structs below and TOML / environment data
//! - **derive macros**: Generate Debug, Clone, Serialize, Deserialize
//! - **Result<T, E>**: Loading and validation can fail and must be handled
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `WEBSOCKET_URL` / `API_BASE_URL` (the names the browser client used)
//! 2. Environment variables (APP_ENDPOINTS__WEBSOCKET_URL, APP_SESSION__RECONNECT_DELAY_MS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! The configuration is read once at startup and never changes afterwards.

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables
use std::time::Duration;
use url::Url;

/// Main client configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each section belongs to one component: the session manager reads `session`,
/// the speech scheduler reads `speech`, and so on. Components receive only
/// their own section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub endpoints: EndpointsConfig,
    pub session: SessionConfig,
    pub speech: SpeechConfig,
    pub audio: AudioConfig,
    pub http: HttpConfig,
}

/// The two externally supplied backend endpoints.
///
/// ## Fields:
/// - `websocket_url`: Streaming channel for text chat (`ws://` or `wss://`)
/// - `api_base_url`: Base for the request/response channel (`http://` or `https://`);
///   audio goes to `<api_base_url>/chat/audio`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    pub websocket_url: String,
    pub api_base_url: String,
}

/// Streaming session policy.
///
/// ## Fields:
/// - `reconnect_delay_ms`: Fixed wait between a close and the next dial. No growth, no limit.
/// - `outbound_queue`: How many outbound frames may wait for the socket writer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub reconnect_delay_ms: u64,
    pub outbound_queue: usize,
}

/// Speech output settings.
///
/// ## Fields:
/// - `engine`: `"espeak-ng"` to speak through an external synthesizer program, `"none"` to only log
/// - `program`: Executable used by the command synthesizer
/// - `locale`: Target language tag, used for the locale fallback in voice selection
/// - `rate`: Playback rate multiplier (1.0 = normal speed)
/// - `preferred_voices`: Exact voice names tried in order before the locale fallback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub engine: String,
    pub program: String,
    pub locale: String,
    pub rate: f32,
    pub preferred_voices: Vec<String>,
}

/// Microphone settings.
///
/// ## Fields:
/// - `device`: `"default"` for the system input device, otherwise an exact device name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub device: String,
}

/// HTTP client settings for the audio endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub request_timeout_secs: u64,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// The client starts against a local backend without any configuration file.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoints: EndpointsConfig {
                websocket_url: "ws://localhost:8001/ws/chat".to_string(),
                api_base_url: "http://localhost:8001".to_string(),
            },
            session: SessionConfig {
                reconnect_delay_ms: 3000,   // Fixed retry delay after any close
                outbound_queue: 32,
            },
            speech: SpeechConfig {
                engine: "espeak-ng".to_string(),
                program: "espeak-ng".to_string(),
                locale: "en-US".to_string(),
                rate: 0.95,                 // Slightly slower for clarity
                preferred_voices: vec![
                    "Google US English".to_string(),
                    "Samantha".to_string(),
                ],
            },
            audio: AudioConfig {
                device: "default".to_string(),
            },
            http: HttpConfig {
                request_timeout_secs: 60,   // Transcription + LLM round trip can be slow
            },
        }
    }
}

impl SessionConfig {
    /// The reconnect delay as a `Duration`.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl EndpointsConfig {
    /// Full URL of the audio upload endpoint.
    ///
    /// ## Example:
    /// `http://localhost:8001` and `http://localhost:8001/` both become
    /// `http://localhost:8001/chat/audio`.
    pub fn audio_endpoint(&self) -> String {
        format!("{}/chat/audio", self.api_base_url.trim_end_matches('/'))
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle the two endpoint variables the browser client used
    ///
    /// ## Environment Variable Examples:
    /// - `APP_ENDPOINTS__WEBSOCKET_URL=wss://example.com/ws/chat`
    /// - `APP_SESSION__RECONNECT_DELAY_MS=5000`
    /// - `APP_SPEECH__ENGINE=none`
    /// - `WEBSOCKET_URL=wss://example.com/ws/chat`
    /// - `API_BASE_URL=https://example.com`
    ///
    /// Field names contain underscores, so nested keys are separated with `__`.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists)
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(url) = env::var("WEBSOCKET_URL") {
            settings = settings.set_override("endpoints.websocket_url", url)?;
        }

        if let Ok(url) = env::var("API_BASE_URL") {
            settings = settings.set_override("endpoints.api_base_url", url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - The streaming URL parses and uses `ws` or `wss`
    /// - The API base URL parses and uses `http` or `https`
    /// - The reconnect delay is not zero (a zero delay would busy-retry)
    /// - The outbound queue can hold at least one frame
    /// - The speech rate is in (0, 4] and the locale is not empty
    /// - The speech engine is one we know how to build
    pub fn validate(&self) -> Result<()> {
        check_scheme(&self.endpoints.websocket_url, &["ws", "wss"])?;
        check_scheme(&self.endpoints.api_base_url, &["http", "https"])?;

        if self.session.reconnect_delay_ms == 0 {
            return Err(anyhow::anyhow!("Reconnect delay must be greater than 0"));
        }

        if self.session.outbound_queue == 0 {
            return Err(anyhow::anyhow!("Outbound queue must hold at least one frame"));
        }

        if !(self.speech.rate > 0.0 && self.speech.rate <= 4.0) {
            return Err(anyhow::anyhow!("Speech rate must be in (0, 4], got {}", self.speech.rate));
        }

        if self.speech.locale.trim().is_empty() {
            return Err(anyhow::anyhow!("Speech locale cannot be empty"));
        }

        if !matches!(self.speech.engine.as_str(), "espeak-ng" | "none") {
            return Err(anyhow::anyhow!(
                "Unknown speech engine '{}', expected \"espeak-ng\" or \"none\"",
                self.speech.engine
            ));
        }

        Ok(())  // All validation passed
    }

    /// Render the effective configuration as TOML, for the startup debug log.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse `raw` as a URL and require one of the given schemes.
fn check_scheme(raw: &str, allowed: &[&str]) -> Result<()> {
    let parsed = Url::parse(raw)
        .map_err(|e| anyhow::anyhow!("Invalid URL '{}': {}", raw, e))?;
    if !allowed.contains(&parsed.scheme()) {
        return Err(anyhow::anyhow!(
            "URL '{}' must use one of {:?}, got '{}'",
            raw,
            allowed,
            parsed.scheme()
        ));
    }
    Ok(())
}
