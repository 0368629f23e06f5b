//! # Chat Wire Protocol
//!
//! Message types exchanged with the backend.
//!
//! ## Streaming channel (JSON text frames, discriminated by `type`):
//! - **Client → Server**: `text_message`, `clear_history`
//! - **Server → Client**: `chat_response`, `error`, `history_cleared`
//!
//! ## Request/response channel:
//! Audio never travels on the streaming channel. It is uploaded as multipart
//! form data to `/chat/audio`, and the reply body is an [`AudioReply`]. The two
//! shapes differ on purpose and are kept as separate types.

use crate::error::{ClientError, ClientResult};
use crate::history::Turn;
use serde::{Deserialize, Serialize};

/// Frames the client sends on the streaming channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// A typed user message
    #[serde(rename = "text_message")]
    TextMessage {
        /// The user's text, already trimmed
        content: String,
    },

    /// Ask the backend to forget this connection's history
    #[serde(rename = "clear_history")]
    ClearHistory,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        OutboundMessage::TextMessage { content: content.into() }
    }

    /// Serialize to the JSON text of one frame.
    pub fn to_frame(&self) -> ClientResult<String> {
        serde_json::to_string(self).map_err(|e| ClientError::MalformedMessage(e.to_string()))
    }
}

/// Frames the backend sends on the streaming channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    /// The assistant's answer plus the backend's full copy of the history
    #[serde(rename = "chat_response")]
    ChatResponse {
        ai_response: String,
        conversation_history: Vec<Turn>,
        /// Echo of the user's text; present on current backends, not relied upon
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_message: Option<String>,
    },

    /// The backend could not handle the last frame
    #[serde(rename = "error")]
    Error {
        message: String,
    },

    /// Confirmation of `clear_history`
    #[serde(rename = "history_cleared")]
    HistoryCleared {
        #[serde(default)]
        message: String,
    },
}

impl InboundMessage {
    /// Parse one text frame.
    ///
    /// ## Errors:
    /// `MalformedMessage` for invalid JSON, an unknown `type`, or missing fields.
    pub fn parse(frame: &str) -> ClientResult<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::ChatResponse { .. } => "chat_response",
            InboundMessage::Error { .. } => "error",
            InboundMessage::HistoryCleared { .. } => "history_cleared",
        }
    }
}

/// Body of a `/chat/audio` response.
///
/// ## Shapes:
/// - success: `{transcription, response, conversation_history, error: null}`
/// - soft failure (HTTP 200): `{transcription: "", response: "", conversation_history, error: "..."}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioReply {
    #[serde(default)]
    pub transcription: String,
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub conversation_history: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of a non-success HTTP response (`{"detail": "..."}`).
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    pub detail: Option<String>,
}
