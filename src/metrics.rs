//! Metrics instrumentation for nova-dns.
//!
//! All metrics are prefixed with `nova_dns.`

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a DNS query and how it was settled.
pub fn record_query(record_type: &str, result: QueryResult, duration: Duration) {
    let result_str = match result {
        QueryResult::Answered => "answered",
        QueryResult::Empty => "empty",
        QueryResult::InvalidName => "invalid_name",
        QueryResult::Delegated => "delegated",
        QueryResult::InventoryUnavailable => "inventory_unavailable",
    };

    counter!("nova_dns.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("nova_dns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// How a query was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResult {
    /// In-scope query produced at least one answer record.
    Answered,
    /// In-scope query with no matching instance or address.
    Empty,
    /// In-scope name with a bad label count or role token.
    InvalidName,
    /// Out-of-scope name or type, handed to the upstream resolver.
    Delegated,
    /// In-scope query handed upstream because no inventory could be fetched.
    InventoryUnavailable,
}

/// Record one inventory refresh attempt.
pub fn record_refresh(result: RefreshResult, duration: Duration) {
    let result_str = match result {
        RefreshResult::Success => "success",
        RefreshResult::Error => "error",
        RefreshResult::Timeout => "timeout",
    };

    counter!("nova_dns.inventory.refresh.count", "result" => result_str).increment(1);
    histogram!("nova_dns.inventory.refresh.duration.seconds").record(duration.as_secs_f64());
}

/// Outcome of an inventory refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshResult {
    /// Provider returned a full list.
    Success,
    /// Provider call failed.
    Error,
    /// Provider call exceeded the configured bound.
    Timeout,
}

/// Record that a stale snapshot was served because a refresh failed.
pub fn record_stale_served() {
    counter!("nova_dns.inventory.stale_served.count").increment(1);
}

/// Record snapshot size and age (call periodically or after refresh).
pub fn record_snapshot(instances: usize, addresses: usize, age: Duration) {
    gauge!("nova_dns.inventory.instances.count").set(instances as f64);
    gauge!("nova_dns.inventory.addresses.count").set(addresses as f64);
    gauge!("nova_dns.inventory.snapshot_age.seconds").set(age.as_secs_f64());
}

/// Record A records returned for a successful lookup.
pub fn record_answers_returned(count: usize) {
    histogram!("nova_dns.query.a.answers_returned").record(count as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
