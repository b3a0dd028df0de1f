use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use reqtrack::UreqTransport;
use reqtrack::prelude::{
    AdapterSettings, Error, ErrorCode, InMemoryMetrics, RequestOptions, RetrySettings,
    SessionConfig, TrackedSession,
};

const SIGNATURE: &str = "Example.example";

#[derive(Clone)]
struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    delay: Duration,
}

impl MockResponse {
    fn new(
        status: u16,
        headers: Vec<(impl Into<String>, impl Into<String>)>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    fn ok() -> Self {
        Self::new(200, Vec::<(String, String)>::new(), Vec::new())
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

struct MockServer {
    base_url: String,
    served: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    join: Option<JoinHandle<()>>,
}

impl MockServer {
    fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let served = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let served_clone = Arc::clone(&served);
        let captured_clone = Arc::clone(&captured);

        let join = thread::spawn(move || {
            let deadline = std::time::Instant::now() + Duration::from_secs(3);
            let mut response_index = 0;

            while response_index < responses.len() && std::time::Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        if let Ok(request) = read_request(&mut stream) {
                            captured_clone
                                .lock()
                                .expect("lock captured requests")
                                .push(request);
                        }

                        served_clone.fetch_add(1, Ordering::SeqCst);
                        let response = &responses[response_index];
                        response_index += 1;
                        if !response.delay.is_zero() {
                            thread::sleep(response.delay);
                        }
                        let _ = write_response(&mut stream, response);
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            served,
            captured,
            join: Some(join),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn served_count(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.captured
            .lock()
            .expect("lock captured requests")
            .clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;

    let mut raw = Vec::new();
    loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if find_header_end(&raw).is_some() {
            break;
        }
    }

    let header_end = find_header_end(&raw).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed request without header terminator",
        )
    })?;

    let header_text = String::from_utf8_lossy(&raw[..header_end]);
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "missing request line")
    })?;
    let mut request_line_parts = request_line.split_whitespace();
    let method = request_line_parts.next().unwrap_or_default().to_owned();
    let path = request_line_parts.next().unwrap_or_default().to_owned();

    let mut headers = BTreeMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = raw[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let body = &response.body;
    let mut raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        body.len()
    );
    for (name, value) in &response.headers {
        raw.push_str(name);
        raw.push_str(": ");
        raw.push_str(value);
        raw.push_str("\r\n");
    }
    raw.push_str("\r\n");

    stream.write_all(raw.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn tracked_session(prefix: &str, metrics: Arc<InMemoryMetrics>) -> TrackedSession {
    let config = SessionConfig::new().insert(
        prefix,
        AdapterSettings::new()
            .with_retry(RetrySettings::with_total(3).connect(3).read(3))
            .with_timeout(Duration::from_secs(1)),
    );
    TrackedSession::from_config(config, metrics).expect("session should build")
}

fn unused_local_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind throwaway listener");
    listener.local_addr().expect("throwaway address").port()
}

#[test]
fn get_request_carries_query_params() {
    let server = MockServer::start(vec![MockResponse::ok()]);
    let session = tracked_session(&server.base_url, Arc::new(InMemoryMetrics::new()));

    let response = session
        .get(
            &server.url("/endpoint"),
            SIGNATURE,
            RequestOptions::new().query_pair("paul", "rules"),
        )
        .expect("get should succeed");

    assert!(response.url().contains("paul=rules"));
    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/endpoint?paul=rules");
}

#[test]
fn post_request_sends_form_body() {
    let server = MockServer::start(vec![MockResponse::ok()]);
    let session = tracked_session(&server.base_url, Arc::new(InMemoryMetrics::new()));

    session
        .post(
            &server.url("/endpoint"),
            SIGNATURE,
            RequestOptions::new()
                .form(&[("paul", "rules")])
                .expect("form should encode"),
        )
        .expect("post should succeed");

    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].body, b"paul=rules".to_vec());
    assert_eq!(
        requests[0].headers.get("content-type").map(String::as_str),
        Some("application/x-www-form-urlencoded")
    );
}

#[test]
fn cookies_from_a_response_are_not_sent_on_the_next_call() {
    let server = MockServer::start(vec![
        MockResponse::new(200, vec![("Set-Cookie", "cookie=one; Path=/")], Vec::new()),
        MockResponse::ok(),
    ]);
    let session = tracked_session(&server.base_url, Arc::new(InMemoryMetrics::new()));

    let first = session
        .get(&server.url("/set_cookie"), SIGNATURE, RequestOptions::new())
        .expect("first call");
    assert_eq!(first.cookies(), vec![("cookie".to_owned(), "one".to_owned())]);

    session
        .get(&server.url("/get_num_cookies"), SIGNATURE, RequestOptions::new())
        .expect("second call");

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert!(!requests[1].headers.contains_key("cookie"));
}

#[test]
fn explicit_cookie_reaches_the_server() {
    let server = MockServer::start(vec![MockResponse::ok()]);
    let session = tracked_session(&server.base_url, Arc::new(InMemoryMetrics::new()));

    session
        .get(
            &server.url("/get_num_cookies"),
            SIGNATURE,
            RequestOptions::new().cookie("cookie", "one"),
        )
        .expect("call with cookie");

    let requests = server.requests();
    assert_eq!(
        requests[0].headers.get("cookie").map(String::as_str),
        Some("cookie=one")
    );
}

#[test]
fn server_errors_are_responses_and_are_not_retried() {
    let server = MockServer::start(vec![MockResponse::new(
        503,
        Vec::<(String, String)>::new(),
        b"busy".to_vec(),
    )]);
    let metrics = Arc::new(InMemoryMetrics::new());
    let session = tracked_session(&server.base_url, metrics.clone());

    let response = session
        .get(&server.url("/busy"), SIGNATURE, RequestOptions::new())
        .expect("503 is returned as a response");
    assert_eq!(response.status().as_u16(), 503);
    assert_eq!(response.text_lossy(), "busy");
    assert_eq!(server.served_count(), 1);

    let snapshot = metrics.snapshot();
    assert_eq!(
        snapshot.counter("StatusCodeByBackend.Example.example", &["status_code:503"]),
        1
    );
    assert_eq!(snapshot.histogram("RetriesByBackend.Example.example"), &[0.0]);
}

#[test]
fn refused_connection_exhausts_budget_and_reports_metrics() {
    let port = unused_local_port();
    let prefix = format!("http://127.0.0.1:{port}");
    let metrics = Arc::new(InMemoryMetrics::new());
    let session = tracked_session(&prefix, metrics.clone());

    let error = session
        .get(&format!("{prefix}/endpoint"), SIGNATURE, RequestOptions::new())
        .expect_err("nothing listens on the port");
    assert_eq!(error.code(), ErrorCode::Connect, "{error}");

    let snapshot = metrics.snapshot();
    assert_eq!(
        snapshot.counter("StatusCodeByBackend.Example.example", &["status_code:500"]),
        1
    );
    assert_eq!(
        snapshot.counter("ErrorByBackend.Example.example", &["type:connect"]),
        1
    );
    assert_eq!(snapshot.histogram("RetriesByBackend.Example.example"), &[3.0]);

    let timings = snapshot.timing("ResponseTimeByBackend.Example.example");
    assert_eq!(timings.len(), 1);
}

#[test]
fn response_timeout_is_not_retried() {
    let server = MockServer::start(vec![MockResponse::ok().delayed(Duration::from_millis(600))]);
    let config = SessionConfig::new().insert(
        server.base_url.as_str(),
        AdapterSettings::new()
            .with_retry(RetrySettings::with_total(2))
            .with_timeout(Duration::from_millis(150)),
    );
    let metrics = Arc::new(InMemoryMetrics::new());
    let session = TrackedSession::from_config(config, metrics.clone()).expect("session");

    let error = session
        .get(&server.url("/slow"), SIGNATURE, RequestOptions::new())
        .expect_err("server answers after the timeout");
    assert!(
        matches!(error, Error::Timeout { .. }),
        "unexpected error: {error}"
    );
    assert_eq!(error.code(), ErrorCode::ResponseTimeout);
    assert_eq!(server.served_count(), 1);

    let snapshot = metrics.snapshot();
    assert_eq!(
        snapshot.counter("ErrorByBackend.Example.example", &["type:response_timeout"]),
        1
    );
    assert_eq!(snapshot.histogram("RetriesByBackend.Example.example"), &[2.0]);
}

#[test]
fn unresolvable_host_is_retried_and_tagged_dns() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let session = tracked_session("http://nonexistent.invalid", metrics.clone());

    let error = session
        .get("http://nonexistent.invalid/x", SIGNATURE, RequestOptions::new())
        .expect_err(".invalid never resolves");
    assert_eq!(error.code(), ErrorCode::Dns, "{error}");

    let snapshot = metrics.snapshot();
    assert_eq!(
        snapshot.counter("ErrorByBackend.Example.example", &["type:dns"]),
        1
    );
    assert_eq!(snapshot.histogram("RetriesByBackend.Example.example"), &[3.0]);
}

#[test]
fn oversized_body_is_rejected_by_transport_limit() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        Vec::<(String, String)>::new(),
        b"0123456789".to_vec(),
    )]);
    let metrics = Arc::new(InMemoryMetrics::new());
    let session = TrackedSession::builder()
        .metrics(metrics.clone())
        .transport(Arc::new(UreqTransport::default().max_response_body_bytes(4)))
        .try_build()
        .expect("session should build");

    let error = session
        .get(&server.url("/large"), SIGNATURE, RequestOptions::new())
        .expect_err("body exceeds the limit");
    assert!(
        matches!(
            error,
            Error::ResponseBodyTooLarge {
                limit_bytes: 4,
                actual_bytes: 5,
                ..
            }
        ),
        "unexpected error: {error}"
    );

    let snapshot = metrics.snapshot();
    assert_eq!(
        snapshot.counter(
            "ErrorByBackend.Example.example",
            &["type:response_body_too_large"]
        ),
        1
    );
    assert_eq!(snapshot.histogram("RetriesByBackend.Example.example"), &[0.0]);
}
