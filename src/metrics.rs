//! Metrics instrumentation for virt-dns.
//!
//! All metrics are prefixed with `virt_dns.`

use metrics::{counter, histogram};
use std::time::Instant;

/// Record a DNS query handled by the resolver.
pub fn record_query(record_type: &str, result: QueryResult, duration: std::time::Duration) {
    let result_str = match result {
        QueryResult::Answered => "answered",
        QueryResult::NotFound => "not_found",
        QueryResult::Unavailable => "unavailable",
        QueryResult::Error => "error",
    };

    counter!("virt_dns.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("virt_dns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query result type for metrics.
#[derive(Debug, Clone, Copy)]
pub enum QueryResult {
    /// Authoritative reply sent (possibly empty).
    Answered,
    /// Domain unknown to the hypervisor, forwarded.
    NotFound,
    /// Hypervisor unreachable or failing, forwarded.
    Unavailable,
    /// Reply could not be sent.
    Error,
}

/// Record a forwarded query that was not for this resolver.
pub fn record_passthrough() {
    counter!("virt_dns.query.passthrough.count").increment(1);
}

/// Record a hypervisor dial attempt.
pub fn record_dial(result: DialResult) {
    let result_str = match result {
        DialResult::Success => "success",
        DialResult::Error => "error",
    };

    counter!("virt_dns.session.dial.count", "result" => result_str).increment(1);
}

/// Dial outcome.
#[derive(Debug, Clone, Copy)]
pub enum DialResult {
    /// Session established.
    Success,
    /// Dial failed.
    Error,
}

/// Record the number of records in an authoritative reply.
pub fn record_answers(count: usize) {
    histogram!("virt_dns.query.answers").record(count as f64);
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
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
