//! # Client Metrics
//!
//! Counters shared between the session driver task and the message router.
//! They are read for the shutdown summary and by tests that need to observe
//! what the transport did (how many dials, how many frames were dropped).
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: The driver task and the router both hold a handle
//! - **RwLock**: Many readers or one writer at a time
//! - **Snapshot**: Readers copy the counters out so no lock is held while logging
//!
//! Conversation history is deliberately NOT in here: it has a single owner
//! (the router) and is passed by reference, not shared.

use std::sync::{Arc, RwLock};        // Thread-safe shared ownership and locking
use std::time::Instant;              // For tracking client uptime

/// Handle to the shared counters. Cloning shares the same counters.
#[derive(Debug, Clone)]
pub struct ClientState {
    /// Counters updated by the session driver and the router
    pub metrics: Arc<RwLock<ClientMetrics>>,

    /// When the client started (never changes, so no lock needed)
    pub start_time: Instant,
}

/// Transport and exchange counters.
///
/// ## Why these metrics matter:
/// - **dial_attempts**: one per connect, the reconnect loop must not busy-retry
/// - **frames_sent / frames_received**: streaming channel traffic
/// - **malformed_frames**: inbound frames that were dropped
/// - **stale_frames_dropped**: outbound frames queued for a socket that died
/// - **audio_exchanges / audio_failures**: request/response channel outcomes
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClientMetrics {
    pub dial_attempts: u64,
    pub connections_opened: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub malformed_frames: u64,
    pub stale_frames_dropped: u64,
    pub audio_exchanges: u64,
    pub audio_failures: u64,
}

impl ClientState {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(ClientMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Apply an update to the counters under the write lock.
    ///
    /// ## Rust Concepts:
    /// - **FnOnce(&mut ClientMetrics)**: the caller says what to change, this method
    ///   handles the locking
    /// - **Poisoned lock**: a panic elsewhere must not stop counting, so the
    ///   inner value is recovered with `into_inner`
    pub fn record(&self, update: impl FnOnce(&mut ClientMetrics)) {
        let mut metrics = match self.metrics.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut metrics);
    }

    /// Copy of the current counters.
    pub fn get_metrics_snapshot(&self) -> ClientMetrics {
        match self.metrics.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Client uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientMetrics {
    /// Fraction of audio exchanges that failed (0.0 to 1.0).
    pub fn audio_failure_rate(&self) -> f64 {
        if self.audio_exchanges > 0 {
            self.audio_failures as f64 / self.audio_exchanges as f64
        } else {
            0.0  // No exchanges yet, so no failures possible
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_shared_between_clones() {
        let state = ClientState::new();
        let driver_view = state.clone();

        driver_view.record(|m| m.dial_attempts += 1);
        driver_view.record(|m| m.malformed_frames += 2);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.dial_attempts, 1);
        assert_eq!(snapshot.malformed_frames, 2);
    }

    #[test]
    fn test_audio_failure_rate() {
        let mut metrics = ClientMetrics::default();
        assert_eq!(metrics.audio_failure_rate(), 0.0);
        metrics.audio_exchanges = 4;
        metrics.audio_failures = 1;
        assert_eq!(metrics.audio_failure_rate(), 0.25);
    }
}
