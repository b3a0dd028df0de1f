use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use tracing::warn;

use crate::ReqtrackResult;
use crate::config::{AdapterConfig, AdapterSettings, PoolSettings};
use crate::request::PreparedRequest;
use crate::response::Response;
use crate::retry::{RetryPolicy, RetryState};
use crate::transport::{Transport, UreqTransport};
use crate::util::redact_uri_for_logs;

/// Transport binding for one URL prefix: pool sizing, optional retry policy,
/// and the adapter config bag.
pub struct Adapter {
    prefix: String,
    pool: PoolSettings,
    retry_policy: Option<RetryPolicy>,
    config: AdapterConfig,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Adapter")
            .field("prefix", &self.prefix)
            .field("pool", &self.pool)
            .field("retry_policy", &self.retry_policy)
            .field("config", &self.config)
            .finish()
    }
}

impl Adapter {
    pub(crate) fn from_settings(
        prefix: &str,
        settings: &AdapterSettings,
        policy_override: Option<RetryPolicy>,
        transport: Option<Arc<dyn Transport>>,
    ) -> ReqtrackResult<Self> {
        settings.validate(prefix)?;
        let pool = settings.adapter.unwrap_or_default();
        let retry_policy = match policy_override {
            Some(policy) => Some(policy),
            None => settings
                .retry
                .as_ref()
                .map(|retry| retry.to_policy(prefix))
                .transpose()?,
        };
        let transport = transport.unwrap_or_else(|| Arc::new(UreqTransport::new(&pool)));
        Ok(Self {
            prefix: prefix.to_owned(),
            pool,
            retry_policy,
            config: settings.adapter_config.clone().unwrap_or_default(),
            transport,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn pool(&self) -> PoolSettings {
        self.pool
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Configured `total` retries, 0 when the adapter does not retry.
    pub fn retry_budget(&self) -> u32 {
        self.retry_policy.as_ref().map_or(0, RetryPolicy::total)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.config.timeout()
    }

    /// Runs the request, retrying failures the policy classifies as retryable
    /// until the budget runs out. The last error is returned unchanged.
    pub(crate) fn send(
        &self,
        request: &PreparedRequest,
        timeout: Duration,
    ) -> ReqtrackResult<Response> {
        let Some(policy) = &self.retry_policy else {
            let raw = self.transport.exchange(request, timeout)?;
            return Ok(Response::new(raw, RetryState::without_retries()));
        };

        let mut state = policy.start();
        loop {
            let error = match self.transport.exchange(request, timeout) {
                Ok(raw) => return Ok(Response::new(raw, state)),
                Err(error) => error,
            };

            if !policy.is_retryable(&error) {
                return Err(error);
            }
            let Some(next) = state.increment(&error) else {
                warn!(
                    prefix = %self.prefix,
                    url = %redact_uri_for_logs(request.url()),
                    error_code = error.code().as_str(),
                    budget = policy.total(),
                    "retry budget exhausted"
                );
                return Err(error);
            };
            state = next;

            let delay = policy.backoff_for(state.history().len());
            warn!(
                prefix = %self.prefix,
                url = %redact_uri_for_logs(request.url()),
                error_code = error.code().as_str(),
                remaining = state.remaining_total(),
                delay_ms = delay.as_millis() as u64,
                "retrying request after transport failure"
            );
            if !delay.is_zero() {
                sleep(delay);
            }
        }
    }
}
