use std::sync::Arc;
use std::time::{Duration, Instant};

use http::Method;
use tracing::debug;

use crate::ReqtrackResult;
use crate::adapter::Adapter;
use crate::config::{AdapterSettings, SessionConfig};
use crate::cookies::CookieJar;
use crate::error::Error;
use crate::metrics::{
    MetricsSink, NoopMetrics, error_key, response_time_key, retries_key, status_code_key,
};
use crate::registry::AdapterRegistry;
use crate::request::RequestOptions;
use crate::response::Response;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use crate::util::redact_uri_for_logs;

/// Timeout applied when the resolved adapter's config carries none.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Status reported for calls that produced no HTTP response at all.
const FAILED_REQUEST_STATUS: u16 = 500;

struct Mount {
    prefix: String,
    settings: AdapterSettings,
    policy: Option<RetryPolicy>,
}

pub struct TrackedSessionBuilder {
    mounts: Vec<Mount>,
    metrics: Arc<dyn MetricsSink>,
    transport: Option<Arc<dyn Transport>>,
}

impl TrackedSessionBuilder {
    fn new() -> Self {
        Self {
            mounts: Vec::new(),
            metrics: Arc::new(NoopMetrics),
            transport: None,
        }
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replaces the pooled `ureq` engine of every adapter with `transport`.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn mount(mut self, prefix: impl Into<String>, settings: AdapterSettings) -> Self {
        self.mounts.push(Mount {
            prefix: prefix.into(),
            settings,
            policy: None,
        });
        self
    }

    /// Mounts `prefix` with a ready-made policy, e.g. one carrying a custom
    /// classifier. Any `retry` block in `settings` is ignored.
    pub fn mount_with_policy(
        mut self,
        prefix: impl Into<String>,
        settings: AdapterSettings,
        policy: RetryPolicy,
    ) -> Self {
        self.mounts.push(Mount {
            prefix: prefix.into(),
            settings,
            policy: Some(policy),
        });
        self
    }

    pub fn adapter_settings(mut self, config: SessionConfig) -> Self {
        for (prefix, settings) in config.iter() {
            self.mounts.push(Mount {
                prefix: prefix.to_owned(),
                settings: settings.clone(),
                policy: None,
            });
        }
        self
    }

    pub fn try_build(self) -> ReqtrackResult<TrackedSession> {
        let mut adapters = AdapterRegistry::with_defaults(self.transport.as_ref())?;
        for mount in self.mounts {
            adapters.mount(Adapter::from_settings(
                &mount.prefix,
                &mount.settings,
                mount.policy,
                self.transport.clone(),
            )?);
        }
        Ok(TrackedSession {
            adapters,
            metrics: self.metrics,
            cookies: CookieJar::default(),
        })
    }
}

/// HTTP session that routes each call through the adapter mounted for its URL
/// prefix and reports latency, status, error and retry metrics per signature.
///
/// Cookies never carry over between calls: pass them per call through
/// [`RequestOptions::cookie`].
pub struct TrackedSession {
    adapters: AdapterRegistry,
    metrics: Arc<dyn MetricsSink>,
    cookies: CookieJar,
}

impl std::fmt::Debug for TrackedSession {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TrackedSession")
            .field("adapters", &self.adapters)
            .finish_non_exhaustive()
    }
}

impl TrackedSession {
    pub fn builder() -> TrackedSessionBuilder {
        TrackedSessionBuilder::new()
    }

    pub fn new() -> ReqtrackResult<Self> {
        Self::builder().try_build()
    }

    pub fn from_config(config: SessionConfig, metrics: Arc<dyn MetricsSink>) -> ReqtrackResult<Self> {
        Self::builder()
            .metrics(metrics)
            .adapter_settings(config)
            .try_build()
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    pub fn adapter_for(&self, url: &str) -> ReqtrackResult<Arc<Adapter>> {
        self.adapters.resolve(url)
    }

    /// Cookies set by the latest response. Never sent on later calls.
    pub fn cookies(&self) -> Vec<(String, String)> {
        self.cookies.snapshot()
    }

    pub fn get(
        &self,
        url: &str,
        signature: &str,
        options: RequestOptions,
    ) -> ReqtrackResult<Response> {
        self.execute(Method::GET, url, signature, options)
    }

    pub fn post(
        &self,
        url: &str,
        signature: &str,
        options: RequestOptions,
    ) -> ReqtrackResult<Response> {
        self.execute(Method::POST, url, signature, options)
    }

    pub fn put(
        &self,
        url: &str,
        signature: &str,
        options: RequestOptions,
    ) -> ReqtrackResult<Response> {
        self.execute(Method::PUT, url, signature, options)
    }

    pub fn patch(
        &self,
        url: &str,
        signature: &str,
        options: RequestOptions,
    ) -> ReqtrackResult<Response> {
        self.execute(Method::PATCH, url, signature, options)
    }

    pub fn delete(
        &self,
        url: &str,
        signature: &str,
        options: RequestOptions,
    ) -> ReqtrackResult<Response> {
        self.execute(Method::DELETE, url, signature, options)
    }

    /// Sends one tracked request. `signature` names the backend call in
    /// metrics (e.g. `search.query`) independently of the URL.
    ///
    /// Every call emits `ResponseTimeByBackend`, `StatusCodeByBackend` and
    /// `RetriesByBackend` under `signature`, plus `ErrorByBackend` on failure.
    /// Failed calls count as status 500. Errors are returned unchanged.
    pub fn execute(
        &self,
        method: Method,
        url: &str,
        signature: &str,
        options: RequestOptions,
    ) -> ReqtrackResult<Response> {
        let adapter = self.adapters.resolve(url)?;
        let retry_budget = adapter.retry_budget();
        let timeout = adapter.timeout().unwrap_or(DEFAULT_TIMEOUT);

        self.cookies.clear();

        let mut retries = RetriesReport {
            metrics: self.metrics.as_ref(),
            signature,
            retries: 0,
        };
        debug!(
            %method,
            url = %redact_uri_for_logs(url),
            signature,
            adapter = adapter.prefix(),
            "sending request"
        );
        let result =
            self.perform_timed_request(&adapter, method, url, timeout, signature, options);

        match &result {
            Ok(response) => {
                self.track_status_code(signature, response.status().as_u16());
                retries.retries =
                    retry_budget.saturating_sub(response.retries().remaining_total());
                self.cookies.store(response.cookies());
                debug!(
                    signature,
                    status = response.status().as_u16(),
                    retries = retries.retries,
                    "request completed"
                );
            }
            Err(error) => {
                // No partial count is available from a failed call.
                if error.is_transport() {
                    retries.retries = retry_budget;
                }
                self.track_status_code(signature, FAILED_REQUEST_STATUS);
                self.track_error(signature, error);
                debug!(
                    signature,
                    error_code = error.code().as_str(),
                    retries = retries.retries,
                    "request failed"
                );
            }
        }

        result
    }

    fn perform_timed_request(
        &self,
        adapter: &Adapter,
        method: Method,
        url: &str,
        timeout: Duration,
        signature: &str,
        options: RequestOptions,
    ) -> ReqtrackResult<Response> {
        let started_at = Instant::now();
        let result = options
            .prepare(method, url)
            .and_then(|request| adapter.send(&request, timeout));
        self.metrics
            .timing(&response_time_key(signature), started_at.elapsed());
        result
    }

    fn track_status_code(&self, signature: &str, status_code: u16) {
        self.metrics.increment(
            &status_code_key(signature),
            1,
            &[format!("status_code:{status_code}")],
        );
    }

    fn track_error(&self, signature: &str, error: &Error) {
        self.metrics
            .increment(&error_key(signature), 1, &[format!("type:{}", error.code())]);
    }
}

/// Emits `RetriesByBackend` when dropped so the histogram is recorded on every
/// exit path.
struct RetriesReport<'a> {
    metrics: &'a dyn MetricsSink,
    signature: &'a str,
    retries: u32,
}

impl Drop for RetriesReport<'_> {
    fn drop(&mut self) {
        self.metrics
            .histogram(&retries_key(self.signature), f64::from(self.retries));
    }
}
