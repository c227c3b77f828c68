//! Counters and audit event emission

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_submitted: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    callbacks_received: AtomicU64,
    callbacks_duplicate: AtomicU64,
    inbound_received: AtomicU64,
    auth_failures: AtomicU64,
    rate_limited: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_succeeded(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn callback_received(&self) {
        self.callbacks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn callback_duplicate(&self) {
        self.callbacks_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inbound_received(&self) {
        self.inbound_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            callbacks_received: self.callbacks_received.load(Ordering::Relaxed),
            callbacks_duplicate: self.callbacks_duplicate.load(Ordering::Relaxed),
            inbound_received: self.inbound_received.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub callbacks_received: u64,
    pub callbacks_duplicate: u64,
    pub inbound_received: u64,
    pub auth_failures: u64,
    pub rate_limited: u64,
}

/// Structured audit trail, emitted as `tracing` events under the `audit`
/// target. Records key ids, routes and backend tags — never tokens,
/// secrets, raw bodies or full destination numbers.
#[derive(Debug, Clone)]
pub struct Audit {
    enabled: bool,
}

impl Audit {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn emit(&self, event: &str, key_id: Option<&str>, route: &str, detail: &str) {
        if !self.enabled {
            return;
        }
        tracing::info!(
            target: "audit",
            event,
            key_id = key_id.unwrap_or("-"),
            route,
            detail,
        );
    }
}

/// Mask a destination number to its last four digits for logs and audit
/// feeds.
pub fn mask_number(number: &str) -> String {
    let digits: Vec<char> = number.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        return "***".to_string();
    }
    let last4: String = digits[digits.len() - 4..].iter().collect();
    format!("***{last4}")
}
