//! `reqtrack` is a blocking HTTP session for service clients that need uniform
//! retry behaviour and uniform backend metrics on every outbound call.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use reqtrack::prelude::{InMemoryMetrics, RequestOptions, SessionConfig, TrackedSession};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::from_json_str(
//!         r#"{
//!             "https://search.internal": {
//!                 "retry": {"total": 3, "connect": 3, "read": 3},
//!                 "adapter": {"pool_maxsize": 4},
//!                 "adapter_config": {"timeout": 0.5}
//!             }
//!         }"#,
//!     )?;
//!     let metrics = Arc::new(InMemoryMetrics::new());
//!     let session = TrackedSession::from_config(config, metrics.clone())?;
//!
//!     let response = session.get(
//!         "https://search.internal/v1/query",
//!         "search.query",
//!         RequestOptions::new().query_pair("q", "rust"),
//!     )?;
//!     println!("status={}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! # Metrics
//!
//! Each call reports, keyed by its signature:
//!
//! - `ResponseTimeByBackend.<signature>` timing
//! - `StatusCodeByBackend.<signature>` counter tagged `status_code:<code>`
//!   (`500` when the call failed without a response)
//! - `ErrorByBackend.<signature>` counter tagged `type:<error code>` on failure
//! - `RetriesByBackend.<signature>` histogram of retries used

mod adapter;
mod config;
mod cookies;
mod error;
mod metrics;
mod registry;
mod request;
mod response;
mod retry;
mod session;
mod transport;
mod util;

pub use crate::adapter::Adapter;
pub use crate::config::{AdapterConfig, AdapterSettings, PoolSettings, RetrySettings, SessionConfig};
pub use crate::error::{Error, ErrorCode, TimeoutPhase, TransportErrorKind};
pub use crate::metrics::{InMemoryMetrics, MetricsSink, MetricsSnapshot, NoopMetrics};
pub use crate::registry::AdapterRegistry;
pub use crate::request::{PreparedRequest, RequestOptions};
pub use crate::response::{Response, TransportResponse};
pub use crate::retry::{ConnectFailureClassifier, RetryClassifier, RetryPolicy, RetryState};
pub use crate::session::{DEFAULT_TIMEOUT, TrackedSession, TrackedSessionBuilder};
pub use crate::transport::{Transport, UreqTransport};

pub type ReqtrackResult<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        AdapterSettings, Error, ErrorCode, InMemoryMetrics, MetricsSink, NoopMetrics,
        PoolSettings, ReqtrackResult, RequestOptions, Response, RetryPolicy, RetrySettings,
        SessionConfig, TrackedSession,
    };
}
