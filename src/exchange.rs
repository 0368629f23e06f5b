//! # Audio Exchange
//!
//! The request/response channel: one recorded WAV plus the current history go up
//! as a multipart form, and the backend answers with the transcription, the AI
//! response and its updated history.
//!
//! ## Failure Shapes:
//! - Network failure (refused, timeout, body read error)
//! - Non-success status, with an optional `{"detail": "..."}` body
//! - HTTP 200 with an `error` field in the body
//!
//! All three become `ClientError::AudioExchangeFailed` carrying the message to
//! show. There is no automatic retry; the user records again.

use crate::config::{EndpointsConfig, HttpConfig};
use crate::error::{ClientError, ClientResult};
use crate::history::Turn;
use crate::protocol::{AudioReply, ErrorDetail};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Shown when a failed response carries no usable message.
const FALLBACK_FAILURE: &str = "Failed to process audio.";

/// HTTP client for `POST <base>/chat/audio`.
///
/// Cloning is cheap (`reqwest::Client` is reference counted), so the router can
/// move a clone into each exchange task.
#[derive(Debug, Clone)]
pub struct AudioExchangeClient {
    http: Client,
    endpoint: String,
}

impl AudioExchangeClient {
    pub fn new(endpoints: &EndpointsConfig, http: &HttpConfig) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(http.request_timeout_secs))
            .build()
            .map_err(|e| ClientError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http: client, endpoint: endpoints.audio_endpoint() })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Upload one recording and wait for the backend's reply.
    ///
    /// ## Form fields:
    /// - `audio`: the WAV bytes, file name `user_audio.wav`, type `audio/wav`
    /// - `conversation_history`: the history snapshot as a JSON array
    ///
    /// ## Returns:
    /// The parsed reply. A reply whose `error` field is set is returned as `Err`,
    /// never as a success.
    pub async fn submit(&self, wav: Vec<u8>, history: &[Turn]) -> ClientResult<AudioReply> {
        let started = Instant::now();
        let wav_bytes = wav.len();

        let audio = Part::bytes(wav)
            .file_name("user_audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| ClientError::AudioExchangeFailed(format!("Invalid MIME type: {}", e)))?;

        let form = Form::new()
            .part("audio", audio)
            .text("conversation_history", serde_json::to_string(history)?);

        debug!(endpoint = %self.endpoint, wav_bytes, turns = history.len(), "Uploading recording");

        let response = self
            .http
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ClientError::AudioExchangeFailed(format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClientError::AudioExchangeFailed(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorDetail>(&body)
                .ok()
                .and_then(|d| d.detail)
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| FALLBACK_FAILURE.to_string());
            warn!(%status, %message, "Audio endpoint returned an error status");
            return Err(ClientError::AudioExchangeFailed(message));
        }

        let reply: AudioReply = serde_json::from_str(&body).map_err(|e| {
            warn!(error = %e, "Audio endpoint returned an unreadable body");
            ClientError::AudioExchangeFailed(FALLBACK_FAILURE.to_string())
        })?;

        if let Some(message) = reply.error.as_ref().filter(|m| !m.is_empty()) {
            warn!(%message, "Audio endpoint reported an error");
            return Err(ClientError::AudioExchangeFailed(message.clone()));
        }

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            transcription_len = reply.transcription.len(),
            "Audio exchange complete"
        );
        Ok(reply)
    }
}
