//! # Backend Health
//!
//! Two small diagnostics around the chat session:
//! - [`probe_backend`]: `GET <api_base_url>/` at startup. The backend answers
//!   `{"message": "English Chatbot API is running"}`. An unreachable backend is
//!   only a warning; the session keeps retrying on its own.
//! - [`session_summary`]: the counters from [`ClientState`] as JSON, logged on exit.

use crate::config::EndpointsConfig;
use crate::state::ClientState;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

/// Result of the startup probe.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendStatus {
    Reachable { message: String, latency_ms: u64 },
    Unreachable { reason: String },
}

#[derive(Debug, Deserialize)]
struct RootResponse {
    #[serde(default)]
    message: String,
}

/// Ask the backend whether it is up.
///
/// Never fails: every problem is folded into `BackendStatus::Unreachable`.
pub async fn probe_backend(endpoints: &EndpointsConfig, timeout: Duration) -> BackendStatus {
    let url = format!("{}/", endpoints.api_base_url.trim_end_matches('/'));
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => return BackendStatus::Unreachable { reason: e.to_string() },
    };

    let started = Instant::now();
    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(e) => return BackendStatus::Unreachable { reason: e.to_string() },
    };

    let status = response.status();
    if !status.is_success() {
        return BackendStatus::Unreachable { reason: format!("{} returned {}", url, status) };
    }

    // A backend that answers 200 with another body is still up
    let message = response
        .json::<RootResponse>()
        .await
        .map(|body| body.message)
        .unwrap_or_default();

    BackendStatus::Reachable {
        message,
        latency_ms: started.elapsed().as_millis() as u64,
    }
}

/// Counters and uptime as a JSON object.
pub fn session_summary(state: &ClientState) -> serde_json::Value {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "client": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        },
        "streaming": {
            "dial_attempts": metrics.dial_attempts,
            "connections_opened": metrics.connections_opened,
            "frames_sent": metrics.frames_sent,
            "frames_received": metrics.frames_received,
            "malformed_frames": metrics.malformed_frames,
            "stale_frames_dropped": metrics.stale_frames_dropped
        },
        "audio": {
            "exchanges": metrics.audio_exchanges,
            "failures": metrics.audio_failures,
            "failure_rate": metrics.audio_failure_rate()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoints(base: String) -> EndpointsConfig {
        EndpointsConfig { websocket_url: "ws://127.0.0.1:1/ws/chat".into(), api_base_url: base }
    }

    #[tokio::test]
    async fn test_probe_reads_root_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"message": "English Chatbot API is running"})),
            )
            .mount(&server)
            .await;

        let status = probe_backend(&endpoints(format!("{}/", server.uri())), Duration::from_secs(2)).await;
        match status {
            BackendStatus::Reachable { message, .. } => assert_eq!(message, "English Chatbot API is running"),
            other => panic!("unexpected status: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_reports_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let status = probe_backend(&endpoints(server.uri()), Duration::from_secs(2)).await;
        assert_eq!(
            status,
            BackendStatus::Unreachable { reason: format!("{}/ returned 503 Service Unavailable", server.uri()) }
        );
    }

    #[tokio::test]
    async fn test_probe_unreachable_backend() {
        let status = probe_backend(&endpoints("http://127.0.0.1:1".into()), Duration::from_secs(2)).await;
        assert!(matches!(status, BackendStatus::Unreachable { .. }));
    }

    #[test]
    fn test_session_summary_shape() {
        let state = ClientState::new();
        state.record(|m| {
            m.dial_attempts = 3;
            m.audio_exchanges = 2;
            m.audio_failures = 1;
        });

        let summary = session_summary(&state);
        assert_eq!(summary["streaming"]["dial_attempts"], 3);
        assert_eq!(summary["audio"]["failure_rate"], 0.5);
        assert_eq!(summary["client"]["name"], "voice-chat-client");
    }
}
