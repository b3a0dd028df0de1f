use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::{Error, ErrorCode, TimeoutPhase, TransportErrorKind};

pub(crate) const DEFAULT_RETRY_TOTAL: u32 = 10;
pub(crate) const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(120);

/// Decides whether a failed attempt may be replayed. Classifiers only see
/// transport failures; status codes never reach them.
pub trait RetryClassifier: Send + Sync {
    fn is_retryable(&self, error: &Error) -> bool;
}

/// Retries only failures that happened before a connection existed: failed
/// name lookups, refused or unreachable connects, and connect timeouts.
/// Anything after the connection was established may already have had effects
/// on the server.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConnectFailureClassifier;

impl RetryClassifier for ConnectFailureClassifier {
    fn is_retryable(&self, error: &Error) -> bool {
        matches!(
            error.transport_error_kind(),
            Some(TransportErrorKind::Dns | TransportErrorKind::Connect)
        ) || matches!(error.timeout_phase(), Some(TimeoutPhase::Connect))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FailureClass {
    Connect,
    Read,
    Other,
}

fn failure_class(error: &Error) -> FailureClass {
    match error {
        Error::Transport {
            kind: TransportErrorKind::Dns | TransportErrorKind::Connect,
            ..
        }
        | Error::Timeout {
            phase: TimeoutPhase::Connect,
            ..
        } => FailureClass::Connect,
        Error::Transport {
            kind: TransportErrorKind::Read,
            ..
        }
        | Error::Timeout {
            phase: TimeoutPhase::Response,
            ..
        }
        | Error::ReadBody { .. } => FailureClass::Read,
        _ => FailureClass::Other,
    }
}

#[derive(Clone)]
pub struct RetryPolicy {
    total: u32,
    connect: Option<u32>,
    read: Option<u32>,
    backoff_factor: Duration,
    backoff_max: Duration,
    backoff_jitter: Duration,
    classifier: Arc<dyn RetryClassifier>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryPolicy")
            .field("total", &self.total)
            .field("connect", &self.connect)
            .field("read", &self.read)
            .field("backoff_factor", &self.backoff_factor)
            .field("backoff_max", &self.backoff_max)
            .field("backoff_jitter", &self.backoff_jitter)
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            connect: None,
            read: None,
            backoff_factor: Duration::ZERO,
            backoff_max: DEFAULT_BACKOFF_MAX,
            backoff_jitter: Duration::ZERO,
            classifier: Arc::new(ConnectFailureClassifier),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    pub fn connect(mut self, connect: u32) -> Self {
        self.connect = Some(connect);
        self
    }

    pub fn read(mut self, read: u32) -> Self {
        self.read = Some(read);
        self
    }

    pub fn backoff_factor(mut self, backoff_factor: Duration) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    pub fn backoff_max(mut self, backoff_max: Duration) -> Self {
        self.backoff_max = backoff_max;
        self
    }

    pub fn backoff_jitter(mut self, backoff_jitter: Duration) -> Self {
        self.backoff_jitter = backoff_jitter;
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn RetryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn connect_budget(&self) -> Option<u32> {
        self.connect
    }

    pub fn read_budget(&self) -> Option<u32> {
        self.read
    }

    pub fn is_retryable(&self, error: &Error) -> bool {
        self.classifier.is_retryable(error)
    }

    pub(crate) fn start(&self) -> RetryState {
        RetryState {
            total: self.total,
            connect: self.connect,
            read: self.read,
            history: Vec::new(),
        }
    }

    /// Sleep before the next attempt, given how many consecutive failures the
    /// request has seen so far. The first retry is immediate.
    pub(crate) fn backoff_for(&self, consecutive_errors: usize) -> Duration {
        if consecutive_errors <= 1 {
            return self.apply_jitter(Duration::ZERO);
        }
        let exponent = (consecutive_errors - 1).min(31) as u32;
        let delay = self
            .backoff_factor
            .saturating_mul(1_u32 << exponent)
            .min(self.backoff_max);
        self.apply_jitter(delay)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.backoff_jitter.is_zero() {
            return delay;
        }
        let jitter_ms = self.backoff_jitter.as_millis().min(u64::MAX as u128) as u64;
        let sampled_ms = rand::rng().random_range(0..=jitter_ms);
        delay.saturating_add(Duration::from_millis(sampled_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_TOTAL)
    }
}

/// Remaining retry budget of one request, as reported back by the adapter once
/// the request finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryState {
    total: u32,
    connect: Option<u32>,
    read: Option<u32>,
    history: Vec<ErrorCode>,
}

impl RetryState {
    pub(crate) fn without_retries() -> Self {
        Self {
            total: 0,
            connect: None,
            read: None,
            history: Vec::new(),
        }
    }

    pub fn remaining_total(&self) -> u32 {
        self.total
    }

    pub fn remaining_connect(&self) -> Option<u32> {
        self.connect
    }

    pub fn remaining_read(&self) -> Option<u32> {
        self.read
    }

    /// Error codes of the failed attempts that were retried, oldest first.
    pub fn history(&self) -> &[ErrorCode] {
        &self.history
    }

    /// Consumes one retry for `error`. Returns `None` once any budget would go
    /// below zero.
    pub(crate) fn increment(&self, error: &Error) -> Option<Self> {
        let mut next = self.clone();
        next.total = self.total.checked_sub(1)?;
        match failure_class(error) {
            FailureClass::Connect => {
                if let Some(connect) = self.connect {
                    next.connect = Some(connect.checked_sub(1)?);
                }
            }
            FailureClass::Read => {
                if let Some(read) = self.read {
                    next.read = Some(read.checked_sub(1)?);
                }
            }
            FailureClass::Other => {}
        }
        next.history.push(error.code());
        Some(next)
    }
}
