use std::io::Read;
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use ureq::ResponseExt;

use crate::ReqtrackResult;
use crate::config::PoolSettings;
use crate::error::{Error, TimeoutPhase, TransportErrorKind};
use crate::request::PreparedRequest;
use crate::response::TransportResponse;
use crate::util::redact_uri_for_logs;

const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;

/// One request/response exchange over the network. Implementations perform a
/// single attempt; retrying is the adapter's job.
pub trait Transport: Send + Sync {
    fn exchange(
        &self,
        request: &PreparedRequest,
        timeout: Duration,
    ) -> ReqtrackResult<TransportResponse>;
}

/// Default transport: a pooled `ureq` agent per adapter.
#[derive(Clone, Debug)]
pub struct UreqTransport {
    agent: ureq::Agent,
    max_response_body_bytes: usize,
}

impl UreqTransport {
    pub fn new(pool: &PoolSettings) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_idle_connections_per_host(pool.pool_maxsize)
            .max_idle_connections(pool.pool_connections.saturating_mul(pool.pool_maxsize))
            .build();
        Self {
            agent: config.new_agent(),
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
        }
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = max_response_body_bytes.max(1);
        self
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(&PoolSettings::default())
    }
}

impl Transport for UreqTransport {
    fn exchange(
        &self,
        request: &PreparedRequest,
        timeout: Duration,
    ) -> ReqtrackResult<TransportResponse> {
        let method = request.method().clone();
        let mut builder = ureq::http::Request::builder()
            .method(method.clone())
            .uri(request.url());
        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }
        let outgoing = builder
            .body(request.body().to_vec())
            .map_err(|source| Error::RequestBuild { source })?;

        let configured = self
            .agent
            .configure_request(outgoing)
            .timeout_connect(Some(timeout))
            .timeout_recv_response(Some(timeout))
            .timeout_recv_body(Some(timeout))
            .build();

        let mut response = self
            .agent
            .run(configured)
            .map_err(|source| map_ureq_error(source, timeout, &method, request.url()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.get_uri().to_string();
        let body = match read_all_body_limited(&mut response, self.max_response_body_bytes) {
            Ok(body) => body,
            Err(ReadBodyError::TooLarge { actual_bytes }) => {
                return Err(Error::ResponseBodyTooLarge {
                    limit_bytes: self.max_response_body_bytes,
                    actual_bytes,
                    method,
                    uri: redact_uri_for_logs(request.url()),
                });
            }
            Err(ReadBodyError::Read(source)) => {
                if let Some(ureq::Error::Timeout(_)) = wrapped_ureq_error(&source) {
                    return Err(Error::Timeout {
                        phase: TimeoutPhase::Response,
                        timeout_ms: timeout.as_millis(),
                        method,
                        uri: redact_uri_for_logs(request.url()),
                    });
                }
                return Err(Error::ReadBody {
                    method,
                    uri: redact_uri_for_logs(request.url()),
                    source: Box::new(source),
                });
            }
        };

        Ok(TransportResponse {
            status,
            headers,
            body,
            url,
        })
    }
}

fn map_ureq_error(source: ureq::Error, timeout: Duration, method: &Method, uri: &str) -> Error {
    match source {
        ureq::Error::Timeout(which) => Error::Timeout {
            phase: timeout_phase(which),
            timeout_ms: timeout.as_millis(),
            method: method.clone(),
            uri: redact_uri_for_logs(uri),
        },
        other => Error::Transport {
            kind: classify_ureq_transport_error(&other),
            method: method.clone(),
            uri: redact_uri_for_logs(uri),
            source: Box::new(other),
        },
    }
}

fn timeout_phase(which: ureq::Timeout) -> TimeoutPhase {
    match which {
        ureq::Timeout::Resolve | ureq::Timeout::Connect => TimeoutPhase::Connect,
        _ => TimeoutPhase::Response,
    }
}

pub(crate) fn classify_ureq_transport_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Tls(_) => TransportErrorKind::Tls,
        #[cfg(feature = "tls-rustls")]
        ureq::Error::Rustls(_) => TransportErrorKind::Tls,
        #[cfg(feature = "tls-native")]
        ureq::Error::NativeTls(_) => TransportErrorKind::Tls,
        ureq::Error::ConnectProxyFailed(_) | ureq::Error::ConnectionFailed => {
            TransportErrorKind::Connect
        }
        ureq::Error::Io(source) if is_name_lookup_failure(source) => TransportErrorKind::Dns,
        ureq::Error::Io(source) => classify_io_error(source.kind()),
        _ => TransportErrorKind::Other,
    }
}

/// The system resolver reports lookup failures as uncategorized io errors, so
/// only the message tells them apart.
fn is_name_lookup_failure(error: &std::io::Error) -> bool {
    error
        .to_string()
        .starts_with("failed to lookup address information")
}

pub(crate) fn classify_io_error(kind: std::io::ErrorKind) -> TransportErrorKind {
    match kind {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => TransportErrorKind::Read,
        std::io::ErrorKind::NotFound => TransportErrorKind::Dns,
        std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::UnexpectedEof => TransportErrorKind::Read,
        _ => TransportErrorKind::Other,
    }
}

fn wrapped_ureq_error(io_error: &std::io::Error) -> Option<&ureq::Error> {
    io_error
        .get_ref()
        .and_then(|source| source.downcast_ref::<ureq::Error>())
}

enum ReadBodyError {
    Read(std::io::Error),
    TooLarge { actual_bytes: usize },
}

fn read_all_body_limited(
    response: &mut ureq::http::Response<ureq::Body>,
    max_bytes: usize,
) -> Result<Bytes, ReadBodyError> {
    // One byte past the limit is enough to tell an oversized body apart.
    let read_limit = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    let mut collected = Vec::new();
    response
        .body_mut()
        .as_reader()
        .take(read_limit)
        .read_to_end(&mut collected)
        .map_err(ReadBodyError::Read)?;

    if collected.len() > max_bytes {
        return Err(ReadBodyError::TooLarge {
            actual_bytes: collected.len(),
        });
    }
    Ok(Bytes::from(collected))
}
