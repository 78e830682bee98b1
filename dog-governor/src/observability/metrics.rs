use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Most recent execution times kept per service
const DURATION_SAMPLES: usize = 1000;

/// Live counters for governor activity
#[derive(Debug, Default)]
pub struct GovernorMetrics {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    cleared: AtomicU64,
    expired: AtomicU64,
    retries: AtomicU64,

    // Per-service breakdown
    services: DashMap<String, ServiceMetrics>,

    durations: Mutex<ExecutionTimes>,
}

impl GovernorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_submitted(&self, service: &str) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.services.entry(service.to_string()).or_default().submitted += 1;
    }

    pub fn increment_completed(&self, service: &str) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.services.entry(service.to_string()).or_default().completed += 1;
    }

    pub fn increment_failed(&self, service: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.services.entry(service.to_string()).or_default().failed += 1;
    }

    pub fn increment_rejected(&self, service: &str) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        self.services.entry(service.to_string()).or_default().rejected += 1;
    }

    pub fn increment_cleared(&self, service: &str, count: u64) {
        self.cleared.fetch_add(count, Ordering::Relaxed);
        self.services.entry(service.to_string()).or_default().cleared += count;
    }

    pub fn increment_expired(&self, service: &str) {
        self.expired.fetch_add(1, Ordering::Relaxed);
        self.services.entry(service.to_string()).or_default().expired += 1;
    }

    /// Retries are counted globally; the executor does not know the key
    pub fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn cleared(&self) -> u64 {
        self.cleared.load(Ordering::Relaxed)
    }

    pub fn expired(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Counters for one service
    pub fn service_metrics(&self, service: &str) -> Option<ServiceMetrics> {
        self.services.get(service).map(|m| m.clone())
    }

    /// Record how long one action ran
    pub fn record_execution_time(&self, service: &str, duration: Duration) {
        self.durations.lock().record(service, duration);
    }

    pub fn average_execution_time(&self, service: &str) -> Option<Duration> {
        self.durations.lock().average(service)
    }

    pub fn percentile_execution_time(&self, service: &str, percentile: f64) -> Option<Duration> {
        self.durations.lock().percentile(service, percentile)
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            submitted: self.submitted(),
            completed: self.completed(),
            failed: self.failed(),
            rejected: self.rejected(),
            cleared: self.cleared(),
            expired: self.expired(),
            retries: self.retries(),
            services: self
                .services
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }
}

/// Counters for a single service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub cleared: u64,
    pub expired: u64,
}

impl ServiceMetrics {
    /// Calculate success rate as percentage
    pub fn success_rate(&self) -> f64 {
        success_rate(self.completed, self.failed)
    }
}

#[derive(Debug, Default)]
struct ExecutionTimes {
    samples: HashMap<String, Vec<Duration>>,
}

impl ExecutionTimes {
    fn record(&mut self, service: &str, duration: Duration) {
        let times = self.samples.entry(service.to_string()).or_default();
        times.push(duration);

        if times.len() > DURATION_SAMPLES {
            times.remove(0);
        }
    }

    fn average(&self, service: &str) -> Option<Duration> {
        let times = self.samples.get(service).filter(|t| !t.is_empty())?;
        let total: Duration = times.iter().sum();
        Some(total / times.len() as u32)
    }

    fn percentile(&self, service: &str, percentile: f64) -> Option<Duration> {
        let times = self.samples.get(service).filter(|t| !t.is_empty())?;

        let mut sorted = times.clone();
        sorted.sort();

        let index = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted.get(index).copied()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub cleared: u64,
    pub expired: u64,
    pub retries: u64,
    pub services: HashMap<String, ServiceMetrics>,
}

impl MetricsSnapshot {
    /// Calculate overall success rate
    pub fn success_rate(&self) -> f64 {
        success_rate(self.completed, self.failed)
    }

    /// Items admitted but not yet finished, cleared or expired
    pub fn in_flight(&self) -> u64 {
        self.submitted
            .saturating_sub(self.completed + self.failed + self.cleared + self.expired)
    }
}

fn success_rate(completed: u64, failed: u64) -> f64 {
    let total_processed = completed + failed;
    if total_processed == 0 {
        100.0
    } else {
        (completed as f64 / total_processed as f64) * 100.0
    }
}
