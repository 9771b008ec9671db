use crate::relay::Direction;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Point-in-time copy of the forwarder counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Target address every connection is forwarded to
    pub target: String,
    /// Total number of accepted connections
    pub total_connections: u64,
    /// Currently active (paired) connections
    pub active_connections: u64,
    /// Connections dropped because the target could not be dialed
    pub failed_dials: u64,
    /// Total bytes forwarded client -> target
    pub bytes_upstream: u64,
    /// Total bytes forwarded target -> client
    pub bytes_downstream: u64,
    /// Capture writes that failed (traffic was still forwarded)
    pub capture_failures: u64,
    /// Timestamp when the forwarder started (Unix timestamp)
    pub start_time: u64,
}

/// Shared statistics tracker for one forwarder
#[derive(Debug, Clone)]
pub struct ForwarderStats {
    target: Arc<String>,
    total_connections: Arc<AtomicU64>,
    active_connections: Arc<AtomicU64>,
    failed_dials: Arc<AtomicU64>,
    bytes_upstream: Arc<AtomicU64>,
    bytes_downstream: Arc<AtomicU64>,
    capture_failures: Arc<AtomicU64>,
    start_time: u64,
}

impl ForwarderStats {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: Arc::new(target.into()),
            total_connections: Arc::new(AtomicU64::new(0)),
            active_connections: Arc::new(AtomicU64::new(0)),
            failed_dials: Arc::new(AtomicU64::new(0)),
            bytes_upstream: Arc::new(AtomicU64::new(0)),
            bytes_downstream: Arc::new(AtomicU64::new(0)),
            capture_failures: Arc::new(AtomicU64::new(0)),
            start_time: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }

    /// Count a newly accepted connection
    pub fn connection_accepted(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a connection as paired; the returned guard marks it ended on drop
    pub fn connection_started(&self) -> ActiveConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        ActiveConnectionGuard {
            stats: self.clone(),
        }
    }

    /// Count a failed dial to the target
    pub fn dial_failed(&self) {
        self.failed_dials.fetch_add(1, Ordering::Relaxed);
    }

    /// Add forwarded bytes for one direction
    pub fn add_bytes(&self, direction: Direction, bytes: u64) {
        match direction {
            Direction::Upstream => self.bytes_upstream.fetch_add(bytes, Ordering::Relaxed),
            Direction::Downstream => self.bytes_downstream.fetch_add(bytes, Ordering::Relaxed),
        };
    }

    /// Count a failed capture write
    pub fn capture_failed(&self) {
        self.capture_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of stats
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            target: self.target.as_ref().clone(),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            failed_dials: self.failed_dials.load(Ordering::Relaxed),
            bytes_upstream: self.bytes_upstream.load(Ordering::Relaxed),
            bytes_downstream: self.bytes_downstream.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            start_time: self.start_time,
        }
    }
}

/// Decrements the active connection count when the pairing ends
#[derive(Debug)]
pub struct ActiveConnectionGuard {
    stats: ForwarderStats,
}

impl Drop for ActiveConnectionGuard {
    fn drop(&mut self) {
        self.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}
