use std::sync::{Mutex, MutexGuard, PoisonError};

use http::header::{HeaderName, HeaderValue};

use crate::error::Error;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

/// Appends `query_pairs` after any query `url_text` already carries.
pub(crate) fn append_query_pairs(
    url_text: &str,
    query_pairs: &[(String, String)],
) -> Result<String, Error> {
    if query_pairs.is_empty() {
        return Ok(url_text.to_owned());
    }

    let mut url = url::Url::parse(url_text).map_err(|_| Error::InvalidUri {
        uri: url_text.to_owned(),
    })?;
    url.query_pairs_mut().extend_pairs(
        query_pairs
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str())),
    );
    Ok(url.to_string())
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

/// Name/value pairs from `Set-Cookie` headers. Attributes after the first `;`
/// are dropped.
pub(crate) fn parse_set_cookie_headers(headers: &http::HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(http::header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| {
            let pair = value.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_owned(), value.trim().to_owned()))
        })
        .collect()
}
