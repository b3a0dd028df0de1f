use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::ReqtrackResult;
use crate::error::Error;
use crate::retry::{DEFAULT_BACKOFF_MAX, DEFAULT_RETRY_TOTAL, RetryPolicy};

pub(crate) const DEFAULT_POOL_CONNECTIONS: usize = 10;
pub(crate) const DEFAULT_POOL_MAXSIZE: usize = 10;

/// Retry budgets for one adapter. `connect` and `read` cap their failure class
/// on top of `total`; leaving them unset means only `total` applies.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    pub total: Option<u32>,
    pub connect: Option<u32>,
    pub read: Option<u32>,
    /// Seconds.
    pub backoff_factor: Option<f64>,
    /// Seconds.
    pub backoff_max: Option<f64>,
    /// Seconds.
    pub backoff_jitter: Option<f64>,
}

impl RetrySettings {
    pub fn with_total(total: u32) -> Self {
        Self {
            total: Some(total),
            ..Self::default()
        }
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
        self.backoff_factor = Some(backoff_factor.as_secs_f64());
        self
    }

    pub fn backoff_jitter(mut self, backoff_jitter: Duration) -> Self {
        self.backoff_jitter = Some(backoff_jitter.as_secs_f64());
        self
    }

    fn validate(&self, prefix: &str) -> ReqtrackResult<()> {
        for (name, value) in [
            ("backoff_factor", self.backoff_factor),
            ("backoff_max", self.backoff_max),
            ("backoff_jitter", self.backoff_jitter),
        ] {
            if let Some(value) = value {
                seconds_to_duration(prefix, name, value, true)?;
            }
        }
        Ok(())
    }

    pub(crate) fn to_policy(&self, prefix: &str) -> ReqtrackResult<RetryPolicy> {
        let mut policy = RetryPolicy::new(self.total.unwrap_or(DEFAULT_RETRY_TOTAL));
        if let Some(connect) = self.connect {
            policy = policy.connect(connect);
        }
        if let Some(read) = self.read {
            policy = policy.read(read);
        }
        if let Some(factor) = self.backoff_factor {
            policy = policy.backoff_factor(seconds_to_duration(prefix, "backoff_factor", factor, true)?);
        }
        let backoff_max = match self.backoff_max {
            Some(max) => seconds_to_duration(prefix, "backoff_max", max, true)?,
            None => DEFAULT_BACKOFF_MAX,
        };
        policy = policy.backoff_max(backoff_max);
        if let Some(jitter) = self.backoff_jitter {
            policy = policy.backoff_jitter(seconds_to_duration(prefix, "backoff_jitter", jitter, true)?);
        }
        Ok(policy)
    }
}

/// Connection pool sizing handed to the transport engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolSettings {
    #[serde(default = "default_pool_connections")]
    pub pool_connections: usize,
    #[serde(default = "default_pool_maxsize")]
    pub pool_maxsize: usize,
}

fn default_pool_connections() -> usize {
    DEFAULT_POOL_CONNECTIONS
}

fn default_pool_maxsize() -> usize {
    DEFAULT_POOL_MAXSIZE
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            pool_connections: DEFAULT_POOL_CONNECTIONS,
            pool_maxsize: DEFAULT_POOL_MAXSIZE,
        }
    }
}

impl PoolSettings {
    pub fn with_maxsize(pool_maxsize: usize) -> Self {
        Self {
            pool_maxsize,
            ..Self::default()
        }
    }

    fn validate(&self, prefix: &str) -> ReqtrackResult<()> {
        if self.pool_connections == 0 {
            return Err(Error::invalid_config(prefix, "pool_connections must be at least 1"));
        }
        if self.pool_maxsize == 0 {
            return Err(Error::invalid_config(prefix, "pool_maxsize must be at least 1"));
        }
        Ok(())
    }
}

/// Free-form adapter configuration. Only `timeout` (seconds) is interpreted;
/// every other key is kept as-is in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct AdapterConfig {
    pub timeout: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl AdapterConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout.as_secs_f64()),
            extra: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }

    fn validate(&self, prefix: &str) -> ReqtrackResult<()> {
        if let Some(timeout) = self.timeout {
            seconds_to_duration(prefix, "timeout", timeout, false)?;
        }
        Ok(())
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.timeout
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
    }
}

/// Settings for one mounted URL prefix.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterSettings {
    pub retry: Option<RetrySettings>,
    #[serde(alias = "pool")]
    pub adapter: Option<PoolSettings>,
    #[serde(alias = "config")]
    pub adapter_config: Option<AdapterConfig>,
}

impl AdapterSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_pool(mut self, pool: PoolSettings) -> Self {
        self.adapter = Some(pool);
        self
    }

    pub fn with_config(mut self, config: AdapterConfig) -> Self {
        self.adapter_config = Some(config);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let mut config = self.adapter_config.take().unwrap_or_default();
        config.timeout = Some(timeout.as_secs_f64());
        self.adapter_config = Some(config);
        self
    }

    pub fn validate(&self, prefix: &str) -> ReqtrackResult<()> {
        if prefix.is_empty() {
            return Err(Error::invalid_config(prefix, "prefix must not be empty"));
        }
        if let Some(retry) = &self.retry {
            retry.validate(prefix)?;
        }
        if let Some(pool) = &self.adapter {
            pool.validate(prefix)?;
        }
        if let Some(config) = &self.adapter_config {
            config.validate(prefix)?;
        }
        Ok(())
    }
}

/// Declarative mapping of URL prefix to adapter settings, usually loaded from
/// a service's JSON configuration.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct SessionConfig {
    adapters: BTreeMap<String, AdapterSettings>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> ReqtrackResult<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|source| Error::ParseConfig { source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_value(value: serde_json::Value) -> ReqtrackResult<Self> {
        let config: Self =
            serde_json::from_value(value).map_err(|source| Error::ParseConfig { source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn insert(mut self, prefix: impl Into<String>, settings: AdapterSettings) -> Self {
        self.adapters.insert(prefix.into(), settings);
        self
    }

    pub fn validate(&self) -> ReqtrackResult<()> {
        for (prefix, settings) in &self.adapters {
            settings.validate(prefix)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AdapterSettings)> {
        self.adapters
            .iter()
            .map(|(prefix, settings)| (prefix.as_str(), settings))
    }
}

fn seconds_to_duration(
    prefix: &str,
    name: &str,
    seconds: f64,
    allow_zero: bool,
) -> ReqtrackResult<Duration> {
    let valid = seconds.is_finite() && (seconds > 0.0 || (allow_zero && seconds == 0.0));
    if !valid {
        let bound = if allow_zero { "non-negative" } else { "positive" };
        return Err(Error::invalid_config(
            prefix,
            format!("{name} must be a finite {bound} number of seconds, got {seconds}"),
        ));
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|source| Error::invalid_config(prefix, format!("{name}: {source}")))
}
