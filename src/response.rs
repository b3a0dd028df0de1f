use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use crate::retry::RetryState;
use crate::util::parse_set_cookie_headers;

/// What a transport hands back for one successful exchange.
#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// URL the response was served from, after any redirects.
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    url: String,
    retries: RetryState,
}

impl Response {
    pub(crate) fn new(raw: TransportResponse, retries: RetryState) -> Self {
        Self {
            status: raw.status,
            headers: raw.headers,
            body: raw.body,
            url: raw.url,
            retries,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Retry budget left once the adapter finished with this request.
    pub fn retries(&self) -> &RetryState {
        &self.retries
    }

    pub fn cookies(&self) -> Vec<(String, String)> {
        parse_set_cookie_headers(&self.headers)
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
