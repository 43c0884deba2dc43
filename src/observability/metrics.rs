//! Thread-safe metrics collection system
//!
//! Atomic counters for high-frequency job and bus events, mutex-protected maps
//! for per-stage statistics. Exposed over HTTP at `/metrics`.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Samples retained per duration series
const MAX_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    jobs_submitted: AtomicU64,
    jobs_rejected: AtomicU64,
    jobs_running: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    max_concurrent_jobs: AtomicU64,
    job_durations: Mutex<VecDeque<u64>>,

    stage_stats: Mutex<BTreeMap<String, StageStats>>,

    events_published: AtomicU64,
    events_undelivered: AtomicU64,
    events_lagged: AtomicU64,
    active_subscriptions: AtomicU64,

    started_at: AtomicU64,
}

#[derive(Debug, Default)]
struct StageStats {
    runs: u64,
    failures: u64,
    attempts: u64,
    durations: VecDeque<u64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            jobs_submitted: AtomicU64::new(0),
            jobs_rejected: AtomicU64::new(0),
            jobs_running: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            max_concurrent_jobs: AtomicU64::new(0),
            job_durations: Mutex::new(VecDeque::new()),
            stage_stats: Mutex::new(BTreeMap::new()),
            events_published: AtomicU64::new(0),
            events_undelivered: AtomicU64::new(0),
            events_lagged: AtomicU64::new(0),
            active_subscriptions: AtomicU64::new(0),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    // Job lifecycle
    pub fn job_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_rejected(&self) {
        self.jobs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_started(&self) {
        let running = self.jobs_running.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_concurrent_jobs.fetch_max(running, Ordering::Relaxed);
    }

    pub fn job_completed(&self, duration: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.finish_job(duration);
    }

    pub fn job_failed(&self, duration: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        self.finish_job(duration);
    }

    fn finish_job(&self, duration: Duration) {
        let _ = self
            .jobs_running
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        if let Ok(mut durations) = self.job_durations.lock() {
            push_bounded(&mut durations, duration.as_millis() as u64);
        }
    }

    // Stage execution
    pub fn stage_finished(&self, stage: &str, attempts: u32, duration: Duration, success: bool) {
        if let Ok(mut stats) = self.stage_stats.lock() {
            let entry = stats.entry(stage.to_string()).or_default();
            entry.runs += 1;
            entry.attempts += u64::from(attempts);
            if !success {
                entry.failures += 1;
            }
            push_bounded(&mut entry.durations, duration.as_millis() as u64);
        }
    }

    // Event bus
    pub fn event_published(&self, delivered: bool) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
        if !delivered {
            self.events_undelivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn events_lagged(&self, skipped: u64) {
        self.events_lagged.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn subscription_opened(&self) {
        self.active_subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_closed(&self) {
        let _ = self
            .active_subscriptions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.jobs_submitted,
            &self.jobs_rejected,
            &self.jobs_running,
            &self.jobs_completed,
            &self.jobs_failed,
            &self.max_concurrent_jobs,
            &self.events_published,
            &self.events_undelivered,
            &self.events_lagged,
            &self.active_subscriptions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.started_at.store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut durations) = self.job_durations.lock() {
            durations.clear();
        }
        if let Ok(mut stats) = self.stage_stats.lock() {
            stats.clear();
        }
    }

    fn stage_snapshots(&self) -> BTreeMap<String, StageMetrics> {
        let Ok(stats) = self.stage_stats.lock() else {
            return BTreeMap::new();
        };

        stats
            .iter()
            .map(|(name, s)| {
                let summary = DurationSummary::from_samples(&s.durations);
                let success_rate = if s.runs == 0 {
                    0.0
                } else {
                    (s.runs - s.failures) as f64 / s.runs as f64
                };
                (
                    name.clone(),
                    StageMetrics {
                        runs: s.runs,
                        failures: s.failures,
                        attempts: s.attempts,
                        success_rate,
                        duration_ms: summary,
                    },
                )
            })
            .collect()
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let job_durations = self
            .job_durations
            .lock()
            .map(|d| DurationSummary::from_samples(&d))
            .unwrap_or_default();

        MetricsSnapshot {
            jobs: JobMetrics {
                submitted: self.jobs_submitted.load(Ordering::Relaxed),
                rejected: self.jobs_rejected.load(Ordering::Relaxed),
                running: self.jobs_running.load(Ordering::Relaxed),
                completed: self.jobs_completed.load(Ordering::Relaxed),
                failed: self.jobs_failed.load(Ordering::Relaxed),
                max_concurrent: self.max_concurrent_jobs.load(Ordering::Relaxed),
                duration_ms: job_durations,
            },
            stages: self.stage_snapshots(),
            bus: BusMetrics {
                events_published: self.events_published.load(Ordering::Relaxed),
                events_undelivered: self.events_undelivered.load(Ordering::Relaxed),
                events_lagged: self.events_lagged.load(Ordering::Relaxed),
                active_subscriptions: self.active_subscriptions.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub jobs: JobMetrics,
    pub stages: BTreeMap<String, StageMetrics>,
    pub bus: BusMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct JobMetrics {
    pub submitted: u64,
    pub rejected: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub max_concurrent: u64,
    pub duration_ms: DurationSummary,
}

#[derive(Debug, Serialize)]
pub struct StageMetrics {
    pub runs: u64,
    pub failures: u64,
    pub attempts: u64,
    pub success_rate: f64,
    pub duration_ms: DurationSummary,
}

#[derive(Debug, Serialize)]
pub struct BusMetrics {
    pub events_published: u64,
    /// Published while nobody was subscribed
    pub events_undelivered: u64,
    /// Dropped for subscribers that fell behind
    pub events_lagged: u64,
    pub active_subscriptions: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct DurationSummary {
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl DurationSummary {
    fn from_samples(samples: &VecDeque<u64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();

        Self {
            avg: sorted.iter().sum::<u64>() as f64 / sorted.len() as f64,
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
        }
    }
}

fn push_bounded(samples: &mut VecDeque<u64>, value: u64) {
    samples.push_back(value);
    while samples.len() > MAX_SAMPLES {
        samples.pop_front();
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;

    lower + (upper - lower) * index.fract()
}
