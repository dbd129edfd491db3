//! Per-session counters
//!
//! Atomic counters owned by one dashboard session. A serializable snapshot is
//! logged when the session ends.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Counters for everything a session receives, publishes and checkpoints
#[derive(Debug)]
pub struct SessionMetrics {
    // Inbound
    messages_received: AtomicU64,
    messages_ignored: AtomicU64,
    decode_failures: AtomicU64,
    telemetry_applied: AtomicU64,

    // Outbound
    commands_published: AtomicU64,
    noop_commands_published: AtomicU64,
    publish_failures: AtomicU64,

    // Persistence
    checkpoints_written: AtomicU64,
    checkpoint_failures: AtomicU64,
    seed_loaded: AtomicBool,

    started_at: AtomicU64,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_ignored: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            telemetry_applied: AtomicU64::new(0),
            commands_published: AtomicU64::new(0),
            noop_commands_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            checkpoints_written: AtomicU64::new(0),
            checkpoint_failures: AtomicU64::new(0),
            seed_loaded: AtomicBool::new(false),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Message arrived on a topic outside the telemetry filter
    pub fn message_ignored(&self) {
        self.messages_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failed(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn telemetry_applied(&self) {
        self.telemetry_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful publish; `noop` marks the pre-ready `{"phoneData":{}}`
    pub fn command_published(&self, noop: bool) {
        if noop {
            self.noop_commands_published.fetch_add(1, Ordering::Relaxed);
        } else {
            self.commands_published.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn checkpoint_written(&self) {
        self.checkpoints_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn checkpoint_failed(&self) {
        self.checkpoint_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Stored setpoints were read without a backend error
    pub fn seed_loaded(&self) {
        self.seed_loaded.store(true, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let started_at = self.started_at.load(Ordering::Relaxed);

        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: now.saturating_sub(started_at),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_ignored: self.messages_ignored.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            telemetry_applied: self.telemetry_applied.load(Ordering::Relaxed),
            commands_published: self.commands_published.load(Ordering::Relaxed),
            noop_commands_published: self.noop_commands_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            checkpoints_written: self.checkpoints_written.load(Ordering::Relaxed),
            checkpoint_failures: self.checkpoint_failures.load(Ordering::Relaxed),
            seed_loaded: self.seed_loaded.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SessionMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub messages_received: u64,
    pub messages_ignored: u64,
    pub decode_failures: u64,
    pub telemetry_applied: u64,
    pub commands_published: u64,
    pub noop_commands_published: u64,
    pub publish_failures: u64,
    pub checkpoints_written: u64,
    pub checkpoint_failures: u64,
    pub seed_loaded: bool,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_are_zero() {
        let snapshot = SessionMetrics::new().snapshot();

        assert_eq!(snapshot.messages_received, 0);
        assert_eq!(snapshot.commands_published, 0);
        assert_eq!(snapshot.checkpoint_failures, 0);
        assert!(!snapshot.seed_loaded);
    }

    #[test]
    fn test_counters() {
        let metrics = SessionMetrics::new();

        metrics.message_received();
        metrics.message_received();
        metrics.message_ignored();
        metrics.decode_failed();
        metrics.telemetry_applied();
        metrics.command_published(false);
        metrics.command_published(true);
        metrics.command_published(true);
        metrics.publish_failed();
        metrics.checkpoint_written();
        metrics.checkpoint_failed();
        metrics.seed_loaded();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_received, 2);
        assert_eq!(snapshot.messages_ignored, 1);
        assert_eq!(snapshot.decode_failures, 1);
        assert_eq!(snapshot.telemetry_applied, 1);
        assert_eq!(snapshot.commands_published, 1);
        assert_eq!(snapshot.noop_commands_published, 2);
        assert_eq!(snapshot.publish_failures, 1);
        assert_eq!(snapshot.checkpoints_written, 1);
        assert_eq!(snapshot.checkpoint_failures, 1);
        assert!(snapshot.seed_loaded);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(SessionMetrics::new().snapshot()).unwrap();
        assert_eq!(json["messages_received"], 0);
        assert_eq!(json["seed_loaded"], false);
    }
}
