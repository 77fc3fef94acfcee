//! Process-wide counters. Monotonic counters are atomics incremented from
//! both the HTTP and WS planes; `active_connections` and `peers_by_role` are
//! never stored, only ever derived on demand from the Room Registry so they
//! cannot drift from the live state.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::Metrics;
use crate::registry::Registry;

#[derive(Default)]
pub struct MetricsSink {
    total_connections: AtomicU64,
    total_messages: AtomicU64,
    rooms_created: AtomicU64,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message(&self) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_room_created(&self) {
        self.rooms_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Metrics {
        Metrics {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            total_messages: self.total_messages.load(Ordering::Relaxed),
            rooms_created: self.rooms_created.load(Ordering::Relaxed),
        }
    }
}

#[derive(serde::Serialize)]
pub struct MetricsSnapshot {
    pub total_connections: u64,
    pub total_messages: u64,
    pub rooms_created: u64,
    pub active_connections: usize,
    pub active_rooms: usize,
    pub peers_by_role: std::collections::HashMap<&'static str, usize>,
}

pub fn snapshot(sink: &MetricsSink, registry: &Registry) -> MetricsSnapshot {
    let counters = sink.snapshot();
    MetricsSnapshot {
        total_connections: counters.total_connections,
        total_messages: counters.total_messages,
        rooms_created: counters.rooms_created,
        active_connections: registry.total_peers(),
        active_rooms: registry.total_rooms(),
        peers_by_role: registry.peers_by_role(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let sink = MetricsSink::new();
        sink.record_connection();
        sink.record_connection();
        sink.record_message();
        let snap = sink.snapshot();
        assert_eq!(snap.total_connections, 2);
        assert_eq!(snap.total_messages, 1);
    }
}
