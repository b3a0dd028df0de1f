use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::util::lock_unpoisoned;

/// Backend that receives the session's per-call signals. Implementations
/// forward to whatever statsd/DogStatsD/Prometheus client the service uses.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, key: &str, value: i64, tags: &[String]);

    fn histogram(&self, key: &str, value: f64);

    fn timing(&self, key: &str, elapsed: Duration);
}

/// Discards everything. The default sink of a session.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _key: &str, _value: i64, _tags: &[String]) {}

    fn histogram(&self, _key: &str, _value: f64) {}

    fn timing(&self, _key: &str, _elapsed: Duration) {}
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Counter totals keyed by `(key, tags)`.
    pub counters: BTreeMap<(String, Vec<String>), i64>,
    pub histograms: BTreeMap<String, Vec<f64>>,
    pub timings: BTreeMap<String, Vec<Duration>>,
}

impl MetricsSnapshot {
    pub fn counter(&self, key: &str, tags: &[&str]) -> i64 {
        let tags = tags.iter().map(|tag| (*tag).to_owned()).collect::<Vec<_>>();
        self.counters
            .get(&(key.to_owned(), tags))
            .copied()
            .unwrap_or(0)
    }

    pub fn histogram(&self, key: &str) -> &[f64] {
        self.histograms.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn timing(&self, key: &str) -> &[Duration] {
        self.timings.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Keeps every signal in memory. Meant for tests and local diagnostics.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        lock_unpoisoned(&self.inner).clone()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, key: &str, value: i64, tags: &[String]) {
        let mut inner = lock_unpoisoned(&self.inner);
        *inner
            .counters
            .entry((key.to_owned(), tags.to_vec()))
            .or_insert(0) += value;
    }

    fn histogram(&self, key: &str, value: f64) {
        lock_unpoisoned(&self.inner)
            .histograms
            .entry(key.to_owned())
            .or_default()
            .push(value);
    }

    fn timing(&self, key: &str, elapsed: Duration) {
        lock_unpoisoned(&self.inner)
            .timings
            .entry(key.to_owned())
            .or_default()
            .push(elapsed);
    }
}

pub(crate) fn response_time_key(signature: &str) -> String {
    format!("ResponseTimeByBackend.{signature}")
}

pub(crate) fn status_code_key(signature: &str) -> String {
    format!("StatusCodeByBackend.{signature}")
}

pub(crate) fn error_key(signature: &str) -> String {
    format!("ErrorByBackend.{signature}")
}

pub(crate) fn retries_key(signature: &str) -> String {
    format!("RetriesByBackend.{signature}")
}
