//! # Error Handling
//!
//! This module defines the client's error taxonomy and how each error is turned
//! into something the person at the keyboard can read.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Result<T, E> Type
//! - **Purpose**: Forces every caller to handle both success and failure
//! - **No exceptions**: A failed send or a failed upload is a value, not a crash
//!
//! ### Enums for Error Types
//! - **Variants**: Each variant is one failure category from the client's design
//! - **Data**: Variants carry the diagnostic message that caused them
//! - **Pattern matching**: The router uses `match` to decide what to show the user
//!
//! ### Traits for Error Conversion
//! - **From trait**: `?` converts serde, config and HTTP errors automatically
//! - **Display trait**: Formats errors for logs
//! - **std::error::Error**: Lets `ClientError` flow into `anyhow::Error` in `main`
//!
//! ## Propagation policy:
//! Transport-level failures (`TransportClosed`, `MalformedMessage`) are handled
//! where they happen: the session reconnects or drops the frame. Per-action
//! failures (`NotConnected`, `DeviceUnavailable`, `AudioExchangeFailed`) are
//! shown to the user right away and never touch the conversation history.

use std::fmt;                                  // For implementing Display trait

/// Every way a client operation can fail.
///
/// ## Error Categories:
/// - **NotConnected**: Text send attempted while the streaming channel is not open
/// - **DeviceUnavailable**: Microphone permission denied or no input device
/// - **TransportClosed**: The streaming channel dropped (triggers reconnect)
/// - **AudioExchangeFailed**: Network error, bad status, or `error` field from `/chat/audio`
/// - **MalformedMessage**: An inbound frame that could not be parsed
/// - **AudioDecode**: Captured audio could not be decoded into samples
/// - **NotCapturing**: Stop requested while no recording is running
/// - **Speech**: The speech synthesizer could not start playback
/// - **ConfigError**: Configuration file or environment variable problems
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(ClientError::NotConnected);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Streaming channel is not in the `Open` state
    NotConnected,

    /// Microphone could not be opened
    DeviceUnavailable(String),

    /// Streaming channel closed or errored
    TransportClosed(String),

    /// The request/response audio exchange failed
    AudioExchangeFailed(String),

    /// Inbound frame could not be parsed
    MalformedMessage(String),

    /// Captured bytes could not be decoded into PCM samples
    AudioDecode(String),

    /// `stop_capture` called while idle
    NotCapturing,

    /// Speech synthesizer failure
    Speech(String),

    /// Configuration file or environment variable problems
    ConfigError(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::NotConnected => write!(f, "Not connected to the server"),
            ClientError::DeviceUnavailable(msg) => write!(f, "Microphone unavailable: {}", msg),
            ClientError::TransportClosed(msg) => write!(f, "Streaming channel closed: {}", msg),
            ClientError::AudioExchangeFailed(msg) => write!(f, "Audio exchange failed: {}", msg),
            ClientError::MalformedMessage(msg) => write!(f, "Malformed message: {}", msg),
            ClientError::AudioDecode(msg) => write!(f, "Audio decode failed: {}", msg),
            ClientError::NotCapturing => write!(f, "No recording in progress"),
            ClientError::Speech(msg) => write!(f, "Speech output error: {}", msg),
            ClientError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

impl ClientError {
    /// The text shown to the user for this error.
    ///
    /// ## Message Mapping:
    /// - NotConnected → "Not connected to the server."
    /// - DeviceUnavailable → microphone permission hint
    /// - AudioExchangeFailed → "Error: <message>" (message comes from the backend when it sent one)
    /// - TransportClosed → informational reconnect notice
    ///
    /// Everything else falls back to the `Display` text prefixed with "Error: ".
    pub fn user_notice(&self) -> String {
        match self {
            ClientError::NotConnected => "Not connected to the server.".to_string(),
            ClientError::DeviceUnavailable(_) => {
                "Could not access microphone. Please grant permission.".to_string()
            }
            ClientError::AudioExchangeFailed(msg) => format!("Error: {}", msg),
            ClientError::TransportClosed(_) => {
                "WebSocket connection error. Check backend and refresh.".to_string()
            }
            other => format!("Error: {}", other),
        }
    }

    /// Whether this failure is handled by the session's own reconnect loop
    /// rather than surfaced as a per-action failure.
    pub fn is_transport_level(&self) -> bool {
        matches!(self, ClientError::TransportClosed(_) | ClientError::MalformedMessage(_))
    }
}

/// JSON parsing errors only ever come from frames or bodies the backend sent us.
impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::MalformedMessage(format!("JSON parsing error: {}", err))
    }
}

/// Automatic conversion from configuration errors.
///
/// ## When this happens:
/// - config.toml file has invalid syntax
/// - An `APP_*` environment variable has the wrong type
impl From<config::ConfigError> for ClientError {
    fn from(err: config::ConfigError) -> Self {
        ClientError::ConfigError(err.to_string())
    }
}

/// Network-level HTTP failures (connection refused, timeout, body read errors).
impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::AudioExchangeFailed(err.to_string())
    }
}

/// Type alias for Results that use the client error type.
///
/// ## Usage Example:
/// ```rust,ignore
/// fn send(&self, message: OutboundMessage) -> ClientResult<()> { ... }
/// ```
pub type ClientResult<T> = Result<T, ClientError>;
