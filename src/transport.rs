//! The transport owning one HTTP exchange
//!
//! A [`Transport`] performs exactly one exchange: [`configure`](Transport::configure)
//! builds the wire request from a [`RequestDescription`] (proxy rewrite, header
//! merge, body assembly, timeout), [`send`](Transport::send) starts it and returns
//! a one-shot [`Completion`], and [`abort`](Transport::abort) requests cooperative
//! cancellation. The exchange settles exactly once with an [`ExchangeReport`]
//! carrying the terminal state, final status, parsed body, and collected headers.
//!
//! Abort wins every race by construction: the exchange task is a biased
//! `select!` whose first arm is the abort signal, and the completion sender is
//! consumed on settlement, so a late error from the cancelled exchange can
//! neither overwrite the aborted state nor settle a second time.

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::{HeaderMap, StatusCode};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};
use tokio::sync::{oneshot, watch};

use crate::config::DispatcherConfig;
use crate::error::{Error, Result};
use crate::headers::{merge_request_headers, parse_header_block};
use crate::request::{FormValue, Payload, RequestDescription, ResponseKind};

/// `encodeURIComponent` compatibility: everything but ASCII alphanumerics and
/// `- _ . ! ~ * ' ( )` is percent-encoded.
const ENCODE_URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Rewrite an outgoing URL through the configured proxy, if any.
pub(crate) fn rewrite_url(url: &str, proxy: Option<&str>, encode: bool) -> String {
    match proxy {
        Some(proxy) if !proxy.is_empty() => {
            if encode {
                format!(
                    "{proxy}{}",
                    percent_encoding::utf8_percent_encode(url, ENCODE_URI_COMPONENT)
                )
            } else {
                format!("{proxy}{url}")
            }
        }
        _ => url.to_string(),
    }
}

/// Whether a final status code counts as success.
///
/// Status 0 is accepted because non-network schemes never populate a status
/// code; without this rule every such response would appear to have failed.
pub fn status_is_success(status: u16) -> bool {
    status == 0 || (200..300).contains(&status)
}

/// Closed set of exchange states. Terminal states are mutually exclusive;
/// the first event to fire decides the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// The exchange has not settled yet.
    InFlight,
    /// Load end with a status in the success set.
    Succeeded,
    /// Load end with a status outside the success set, or an undecodable body.
    Failed,
    /// The underlying exchange failed before a usable response.
    Errored,
    /// The exchange exceeded its timeout.
    TimedOut,
    /// The caller cancelled the exchange.
    Aborted,
}

impl ExchangeState {
    /// True for any state other than [`ExchangeState::InFlight`].
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExchangeState::InFlight)
    }
}

/// Byte-level progress of the response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Bytes received so far.
    pub loaded: u64,
    /// Total expected bytes, when the response declared a length.
    pub total: Option<u64>,
}

/// Parsed response body. Which variant is produced depends on the
/// negotiated [`ResponseKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// No body was captured (failure before load end, or abort).
    None,
    /// Decoded text.
    Text(String),
    /// Parsed JSON value; `Null` when the body was not valid JSON.
    Json(serde_json::Value),
    /// Raw bytes, passed through unchanged.
    Binary(Bytes),
}

impl ResponseBody {
    /// The text content, when this body is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The JSON value, when this body was parsed as JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The raw bytes, when this body is binary.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            ResponseBody::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Final snapshot of one exchange, settled exactly once.
#[derive(Debug)]
pub struct ExchangeReport {
    /// Terminal state of the exchange.
    pub state: ExchangeState,
    /// Final status code; 0 when no response was reached.
    pub status: u16,
    /// Final status text; empty when no response was reached.
    pub status_text: String,
    /// Parsed response body.
    pub body: ResponseBody,
    /// Collected raw response header text, `"name: value"` per CRLF line.
    pub headers: Option<String>,
    /// Last observed body progress.
    pub progress: Progress,
    /// The failure, when the exchange did not succeed.
    pub error: Option<Error>,
}

impl ExchangeReport {
    /// True when the exchange settled without an error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// One-shot completion signal for an exchange.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<ExchangeReport>,
}

impl Completion {
    /// Wait for the exchange to settle.
    pub async fn settled(self) -> ExchangeReport {
        self.rx.await.unwrap_or_else(|_| ExchangeReport {
            state: ExchangeState::Errored,
            status: 0,
            status_text: String::new(),
            body: ResponseBody::None,
            headers: None,
            progress: Progress::default(),
            error: Some(Error::HttpClient(
                "exchange task ended without settling".to_string(),
            )),
        })
    }
}

/// Handle for requesting cancellation of an exchange after the transport was
/// handed to its task.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    signal: Arc<AbortSignal>,
}

impl AbortHandle {
    /// Request cooperative cancellation. A no-op once the exchange settled.
    pub fn abort(&self) {
        self.signal.trigger();
    }
}

#[derive(Debug)]
struct AbortSignal {
    tx: watch::Sender<bool>,
}

impl AbortSignal {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    fn trigger(&self) {
        self.tx.send_replace(true);
    }

    async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // Only fails when the sender is dropped, which cannot happen while
        // the exchange task holds the signal.
        let _ = rx.wait_for(|aborted| *aborted).await;
    }
}

type ProgressCallback = Box<dyn Fn(Progress) + Send + 'static>;

struct Prepared {
    request: reqwest::Request,
    response_kind: ResponseKind,
}

/// Owns one outbound HTTP exchange.
pub struct Transport {
    client: reqwest::Client,
    append_headers: Vec<(String, String)>,
    proxy: Option<String>,
    proxy_encode_url: bool,
    prepared: Option<Prepared>,
    started: bool,
    signal: Arc<AbortSignal>,
    on_progress: Option<ProgressCallback>,
}

impl Transport {
    /// Create a transport sharing the dispatcher's client and standing
    /// configuration.
    pub fn new(client: reqwest::Client, config: &DispatcherConfig) -> Self {
        let append_headers = config
            .append_headers
            .as_deref()
            .map(parse_header_block)
            .unwrap_or_default();
        Self {
            client,
            append_headers,
            proxy: config.proxy.clone(),
            proxy_encode_url: config.proxy_encode_url,
            prepared: None,
            started: false,
            signal: Arc::new(AbortSignal::new()),
            on_progress: None,
        }
    }

    /// Build the wire request from a description.
    ///
    /// Applies the proxy rewrite, the header merge rule (fixed headers win,
    /// caller `content-type` dropped for multipart bodies), method, URL,
    /// timeout, and body. Must be called before [`send`](Self::send).
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid URL or method, or when the exchange
    /// already started.
    pub fn configure(&mut self, description: &RequestDescription) -> Result<()> {
        if self.started {
            return Err(Error::HttpClient(
                "transport already started an exchange".to_string(),
            ));
        }

        let target = rewrite_url(
            &description.url,
            self.proxy.as_deref(),
            self.proxy_encode_url,
        );
        let url: url::Url = target
            .parse()
            .map_err(|e| Error::InvalidUrl(format!("{target}: {e}")))?;

        let method = http::Method::from_bytes(
            description.method.to_ascii_uppercase().as_bytes(),
        )
        .map_err(|_| Error::InvalidMethod(description.method.clone()))?;

        let request_headers = description
            .headers
            .as_deref()
            .map(parse_header_block)
            .unwrap_or_default();
        let multipart = description
            .payload
            .as_ref()
            .is_some_and(Payload::is_form);
        let headers =
            merge_request_headers(&self.append_headers, &request_headers, multipart);

        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(timeout) = description.timeout {
            builder = builder.timeout(timeout);
        }
        builder = match &description.payload {
            None => builder,
            Some(Payload::Text { value }) => builder.body(value.clone()),
            Some(Payload::Binary { value }) => builder.body(value.clone()),
            Some(Payload::Form { parts }) => builder.multipart(build_form(parts)),
        };

        let request = builder
            .build()
            .map_err(|e| Error::HttpClient(e.to_string()))?;
        self.prepared = Some(Prepared {
            request,
            response_kind: description.response_kind,
        });
        Ok(())
    }

    /// Register an observer for body progress updates. Must be set before
    /// [`send`](Self::send).
    pub fn on_progress(&mut self, callback: impl Fn(Progress) + Send + 'static) {
        self.on_progress = Some(Box::new(callback));
    }

    /// Start the exchange.
    ///
    /// Returns `None` when the exchange already started or the transport was
    /// never configured; otherwise spawns the exchange task and returns its
    /// completion signal. Requires a running Tokio runtime.
    pub fn send(&mut self) -> Option<Completion> {
        if self.started {
            return None;
        }
        let prepared = self.prepared.take()?;
        self.started = true;

        let (tx, rx) = oneshot::channel();
        let client = self.client.clone();
        let signal = Arc::clone(&self.signal);
        let on_progress = self.on_progress.take();
        let progress_cell = Arc::new(Mutex::new(Progress::default()));

        tokio::spawn(async move {
            let cell = Arc::clone(&progress_cell);
            let report = tokio::select! {
                biased;
                _ = signal.triggered() => ExchangeReport {
                    state: ExchangeState::Aborted,
                    status: 0,
                    status_text: String::new(),
                    body: ResponseBody::None,
                    headers: None,
                    progress: last_progress(&progress_cell),
                    error: Some(Error::Aborted),
                },
                report = run_exchange(client, prepared, cell, on_progress) => report,
            };
            // The receiver may be gone when the caller stopped waiting.
            let _ = tx.send(report);
        });

        Some(Completion { rx })
    }

    /// Request cooperative cancellation of the exchange.
    pub fn abort(&self) {
        self.signal.trigger();
    }

    /// A cancellation handle that outlives this transport.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            signal: Arc::clone(&self.signal),
        }
    }
}

fn last_progress(cell: &Mutex<Progress>) -> Progress {
    cell.lock().map(|p| *p).unwrap_or_default()
}

fn build_form(parts: &[crate::request::FormPart]) -> reqwest::multipart::Form {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        form = match &part.value {
            FormValue::Text { value } => form.text(part.name.clone(), value.clone()),
            FormValue::File {
                filename,
                content_type,
                data,
            } => {
                let file_part = reqwest::multipart::Part::bytes(data.clone())
                    .file_name(filename.clone());
                let file_part = match content_type {
                    Some(mime) => match file_part.mime_str(mime) {
                        Ok(typed) => typed,
                        Err(error) => {
                            tracing::debug!(%mime, %error, "skipping invalid part content type");
                            reqwest::multipart::Part::bytes(data.clone())
                                .file_name(filename.clone())
                        }
                    },
                    None => file_part,
                };
                form.part(part.name.clone(), file_part)
            }
        };
    }
    form
}

async fn run_exchange(
    client: reqwest::Client,
    prepared: Prepared,
    progress_cell: Arc<Mutex<Progress>>,
    on_progress: Option<ProgressCallback>,
) -> ExchangeReport {
    let timeout = prepared.request.timeout().copied();
    let response = match client.execute(prepared.request).await {
        Ok(response) => response,
        Err(error) if error.is_timeout() => {
            return ExchangeReport {
                state: ExchangeState::TimedOut,
                status: 0,
                status_text: String::new(),
                body: ResponseBody::None,
                headers: None,
                progress: last_progress(&progress_cell),
                error: Some(Error::Timeout { after: timeout }),
            };
        }
        Err(error) => {
            return ExchangeReport {
                state: ExchangeState::Errored,
                status: 0,
                status_text: String::new(),
                body: ResponseBody::None,
                headers: None,
                progress: last_progress(&progress_cell),
                error: Some(Error::Connection(error.to_string())),
            };
        }
    };

    let status = response.status().as_u16();
    let status_text = status_text_for(response.status());
    let headers = collect_headers(response.headers());
    let total = response.content_length();

    let mut loaded = 0u64;
    let mut collected = BytesMut::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                loaded += bytes.len() as u64;
                let snapshot = Progress { loaded, total };
                if let Ok(mut cell) = progress_cell.lock() {
                    *cell = snapshot;
                }
                if let Some(callback) = &on_progress {
                    callback(snapshot);
                }
                collected.extend_from_slice(&bytes);
            }
            Err(error) if error.is_timeout() => {
                return ExchangeReport {
                    state: ExchangeState::TimedOut,
                    status,
                    status_text,
                    body: ResponseBody::None,
                    headers: Some(headers),
                    progress: last_progress(&progress_cell),
                    error: Some(Error::Timeout { after: timeout }),
                };
            }
            Err(error) => {
                return ExchangeReport {
                    state: ExchangeState::Errored,
                    status,
                    status_text,
                    body: ResponseBody::None,
                    headers: Some(headers),
                    progress: last_progress(&progress_cell),
                    error: Some(Error::Connection(error.to_string())),
                };
            }
        }
    }

    let progress = last_progress(&progress_cell);
    match parse_body(prepared.response_kind, collected.freeze()) {
        Ok(body) => {
            if status_is_success(status) {
                ExchangeReport {
                    state: ExchangeState::Succeeded,
                    status,
                    status_text,
                    body,
                    headers: Some(headers),
                    progress,
                    error: None,
                }
            } else {
                ExchangeReport {
                    state: ExchangeState::Failed,
                    status,
                    status_text,
                    body,
                    headers: Some(headers),
                    progress,
                    error: Some(Error::HttpFailure { status }),
                }
            }
        }
        Err(error) => ExchangeReport {
            state: ExchangeState::Failed,
            status,
            status_text,
            body: ResponseBody::None,
            headers: Some(headers),
            progress,
            error: Some(error),
        },
    }
}

fn status_text_for(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("").to_string()
}

/// Collect response headers into raw text, one `name: value` per CRLF line.
fn collect_headers(headers: &HeaderMap) -> String {
    let mut out = String::new();
    for (name, value) in headers {
        out.push_str(name.as_str());
        out.push_str(": ");
        out.push_str(&String::from_utf8_lossy(value.as_bytes()));
        out.push_str("\r\n");
    }
    out
}

/// Decode the body per the negotiated kind.
///
/// JSON never errors: malformed input yields `Null`, emulating lenient
/// response-body handling. Markup kinds require valid UTF-8; binary kinds
/// pass through unchanged.
fn parse_body(kind: ResponseKind, raw: Bytes) -> Result<ResponseBody> {
    match kind {
        ResponseKind::Json => {
            let text = String::from_utf8_lossy(&raw);
            Ok(ResponseBody::Json(
                serde_json::from_str(&text).unwrap_or(serde_json::Value::Null),
            ))
        }
        ResponseKind::Text => Ok(ResponseBody::Text(
            String::from_utf8_lossy(&raw).into_owned(),
        )),
        ResponseKind::Xml | ResponseKind::Document => match String::from_utf8(raw.to_vec()) {
            Ok(text) => Ok(ResponseBody::Text(text)),
            Err(error) => Err(Error::ResponseParse(error.to_string())),
        },
        ResponseKind::Blob | ResponseKind::Binary => Ok(ResponseBody::Binary(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn test_rewrite_url_without_proxy() {
        assert_eq!(
            rewrite_url("http://domain.com/path", None, true),
            "http://domain.com/path"
        );
    }

    #[test]
    fn test_rewrite_url_plain_proxy() {
        assert_eq!(
            rewrite_url("http://domain.com/path", Some("https://proxy.com/"), false),
            "https://proxy.com/http://domain.com/path"
        );
    }

    #[test]
    fn test_rewrite_url_encoding_proxy() {
        assert_eq!(
            rewrite_url("http://a.com/?q=1", Some("https://proxy/?url="), true),
            "https://proxy/?url=http%3A%2F%2Fa.com%2F%3Fq%3D1"
        );
    }

    #[test]
    fn test_rewrite_url_encoding_keeps_unreserved() {
        assert_eq!(
            rewrite_url("abc-_.!~*'()", Some("p?u="), true),
            "p?u=abc-_.!~*'()"
        );
    }

    #[rstest]
    #[case(0, true)]
    #[case(199, false)]
    #[case(200, true)]
    #[case(204, true)]
    #[case(299, true)]
    #[case(300, false)]
    #[case(404, false)]
    #[case(500, false)]
    fn test_status_success_table(#[case] status: u16, #[case] expected: bool) {
        assert_eq!(status_is_success(status), expected);
    }

    proptest! {
        #[test]
        fn prop_status_success_matches_contract(status in 0u16..=599) {
            let expected = status == 0 || (200..=299).contains(&status);
            prop_assert_eq!(status_is_success(status), expected);
        }
    }

    #[test]
    fn test_json_parse_fallback_to_null() {
        let body = parse_body(ResponseKind::Json, Bytes::from_static(b"{not json")).unwrap();
        assert_eq!(body, ResponseBody::Json(serde_json::Value::Null));
    }

    #[test]
    fn test_json_parse_valid() {
        let body =
            parse_body(ResponseKind::Json, Bytes::from_static(b"{\"a\":1}")).unwrap();
        assert_eq!(body, ResponseBody::Json(serde_json::json!({"a": 1})));
    }

    #[test]
    fn test_json_empty_body_is_null() {
        let body = parse_body(ResponseKind::Json, Bytes::new()).unwrap();
        assert_eq!(body, ResponseBody::Json(serde_json::Value::Null));
    }

    #[test]
    fn test_text_is_lossy() {
        let body = parse_body(ResponseKind::Text, Bytes::from_static(b"ok\xff")).unwrap();
        assert_eq!(body.as_text(), Some("ok\u{fffd}"));
    }

    #[test]
    fn test_binary_passes_through() {
        let raw = Bytes::from_static(&[0u8, 159, 146, 150]);
        let body = parse_body(ResponseKind::Binary, raw.clone()).unwrap();
        assert_eq!(body.as_bytes(), Some(&raw));

        let body = parse_body(ResponseKind::Blob, raw.clone()).unwrap();
        assert_eq!(body.as_bytes(), Some(&raw));
    }

    #[test]
    fn test_markup_requires_utf8() {
        let body = parse_body(ResponseKind::Xml, Bytes::from_static(b"<a/>")).unwrap();
        assert_eq!(body.as_text(), Some("<a/>"));

        let error = parse_body(ResponseKind::Document, Bytes::from_static(b"\xff\xfe"));
        assert!(matches!(error, Err(Error::ResponseParse(_))));
    }

    #[test]
    fn test_collect_headers_format() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.append("x-many", "1".parse().unwrap());
        headers.append("x-many", "2".parse().unwrap());

        let collected = collect_headers(&headers);
        assert!(collected.contains("content-type: application/json\r\n"));
        assert!(collected.contains("x-many: 1\r\n"));
        assert!(collected.contains("x-many: 2\r\n"));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ExchangeState::InFlight.is_terminal());
        for state in [
            ExchangeState::Succeeded,
            ExchangeState::Failed,
            ExchangeState::Errored,
            ExchangeState::TimedOut,
            ExchangeState::Aborted,
        ] {
            assert!(state.is_terminal());
        }
    }

    #[tokio::test]
    async fn test_send_before_configure_is_noop() {
        let client = reqwest::Client::new();
        let mut transport = Transport::new(client, &DispatcherConfig::default());
        assert!(transport.send().is_none());
    }

    #[tokio::test]
    async fn test_send_twice_is_noop() {
        let client = reqwest::Client::new();
        let mut transport = Transport::new(client, &DispatcherConfig::default());
        transport
            .configure(&RequestDescription::new("r1", "http://127.0.0.1:9/"))
            .unwrap();

        let first = transport.send();
        assert!(first.is_some());
        assert!(transport.send().is_none());

        // The exchange targets a closed port; make sure it settles with an
        // error rather than hanging.
        let report = first.unwrap().settled().await;
        assert_eq!(report.state, ExchangeState::Errored);
        assert!(matches!(report.error, Some(Error::Connection(_))));
    }

    #[tokio::test]
    async fn test_configure_rejects_bad_url() {
        let client = reqwest::Client::new();
        let mut transport = Transport::new(client, &DispatcherConfig::default());
        let result = transport.configure(&RequestDescription::new("r1", "not a url"));
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_configure_rejects_bad_method() {
        let client = reqwest::Client::new();
        let mut transport = Transport::new(client, &DispatcherConfig::default());
        let description =
            RequestDescription::new("r1", "http://localhost/").method("G E T");
        let result = transport.configure(&description);
        assert!(matches!(result, Err(Error::InvalidMethod(_))));
    }

    #[tokio::test]
    async fn test_abort_before_send_settles_aborted() {
        let client = reqwest::Client::new();
        let mut transport = Transport::new(client, &DispatcherConfig::default());
        transport
            .configure(&RequestDescription::new("r1", "http://127.0.0.1:9/"))
            .unwrap();
        transport.abort();

        let report = transport.send().unwrap().settled().await;
        assert_eq!(report.state, ExchangeState::Aborted);
        assert_eq!(report.error.unwrap().to_string(), "Request aborted");
    }
}
