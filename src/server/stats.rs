//! Server statistics

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Lock-free counters updated by connection tasks
#[derive(Debug, Default)]
pub(crate) struct ServerCounters {
    active_clients: AtomicUsize,
    total_connections: AtomicU64,
    parts_sent: AtomicU64,
    bytes_sent: AtomicU64,
    write_timeouts: AtomicU64,
}

impl ServerCounters {
    pub fn part_sent(&self, bytes: u64) {
        self.parts_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn write_timeout(&self) {
        self.write_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServerStats {
        ServerStats {
            active_clients: self.active_clients.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            parts_sent: self.parts_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            write_timeouts: self.write_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Counts a connection as active for as long as it lives, including when
/// its task is aborted during shutdown.
pub(crate) struct ClientGuard(Arc<ServerCounters>);

impl ClientGuard {
    pub fn new(counters: Arc<ServerCounters>) -> Self {
        counters.active_clients.fetch_add(1, Ordering::Relaxed);
        counters.total_connections.fetch_add(1, Ordering::Relaxed);
        Self(counters)
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.0.active_clients.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of the server counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Connections currently open
    pub active_clients: usize,

    /// Connections accepted since the server object was created
    pub total_connections: u64,

    /// Multipart parts fully written to clients
    pub parts_sent: u64,

    /// Bytes of those parts, multipart headers included
    pub bytes_sent: u64,

    /// Clients dropped for not draining their socket
    pub write_timeouts: u64,
}

impl ServerStats {
    /// Multipart parts delivered per second, summed over every viewer,
    /// between `previous` and `self`
    pub fn calculate_part_rate(&self, previous: &Self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 {
            return 0.0;
        }

        let parts_delta = self.parts_sent.saturating_sub(previous.parts_sent);
        parts_delta as f64 / elapsed_secs
    }

    /// Outgoing stream throughput in kbit/s, part headers included
    pub fn calculate_bitrate_kbps(&self, previous: &Self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 {
            return 0.0;
        }

        let bytes_delta = self.bytes_sent.saturating_sub(previous.bytes_sent);
        (bytes_delta as f64 * 8.0) / elapsed_secs / 1000.0
    }
}

/// Cloneable read access to a server's counters
#[derive(Clone)]
pub struct StatsHandle(pub(crate) Arc<ServerCounters>);

impl StatsHandle {
    pub fn snapshot(&self) -> ServerStats {
        self.0.snapshot()
    }
}
