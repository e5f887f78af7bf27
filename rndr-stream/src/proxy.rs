//! A local HTTP server that interposes between the player and a remote audio
//! source: it accepts `GET`/`HEAD`, honors `Range: bytes=N-`, hands the
//! request to a configurable URL-translation callback, and streams the
//! result back through a [`ContentReader`] that transparently resumes the
//! upstream fetch if it drops mid-stream.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::buf_xchange::{ABuffer, BufXChange, XchangeError};
use crate::net_fetch::{FetchStatus, NetFetch};

/// How the URL-translation callback disposes of a request.
pub enum UrlTransResult {
    /// Proxy the request through the given fetcher.
    Proxy(Box<dyn NetFetch>),
    /// Respond with a 302 pointing at `new_url`.
    Redirect(String),
    /// Refuse the connection.
    Error,
}

/// The callback that decides, for each request, whether to proxy it, redirect
/// it, or refuse it. Takes the client's `User-Agent`, the request URL path,
/// and its query parameters.
pub type UrlTrans =
    Arc<dyn Fn(Option<&str>, &str, &HashMap<String, String>) -> UrlTransResult + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct StreamProxyConfig {
    pub listen_port: u16,
    /// How long a consumer-side `take` waits before treating the upstream as
    /// stalled. 10s per the reference behavior.
    pub take_timeout: Duration,
    /// Chunk size requested from `content_read` per stream item.
    pub chunk_size: usize,
}

impl Default for StreamProxyConfig {
    fn default() -> Self {
        StreamProxyConfig {
            listen_port: 49149,
            take_timeout: Duration::from_secs(10),
            chunk_size: 64 * 1024,
        }
    }
}

#[derive(Clone)]
struct ProxyState {
    translator: UrlTrans,
    config: StreamProxyConfig,
}

/// Builds the server's router. Call [`serve`] to actually bind and run it.
pub fn router(translator: UrlTrans, config: StreamProxyConfig) -> Router {
    let state = Arc::new(ProxyState { translator, config });
    Router::new().fallback(any(handle)).with_state(state)
}

/// Binds `config.listen_port` and serves forever (or until the returned
/// future is dropped).
pub async fn serve(translator: UrlTrans, config: StreamProxyConfig) -> io::Result<()> {
    let addr = format!("0.0.0.0:{}", config.listen_port);
    let listener = TcpListener::bind(&addr).await?;
    debug!(addr, "stream proxy listening");
    axum::serve(listener, router(translator, config)).await
}

async fn handle(
    State(state): State<Arc<ProxyState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return refuse();
    }

    let offset = match parse_range(&headers) {
        Ok(offset) => offset,
        Err(()) => return (StatusCode::RANGE_NOT_SATISFIABLE, close_headers(), ()).into_response(),
    };

    let query = parse_query(&uri);
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok());

    match (state.translator)(user_agent, uri.path(), &query) {
        UrlTransResult::Error => refuse(),
        UrlTransResult::Redirect(new_url) => {
            let mut response = (StatusCode::FOUND, close_headers(), ()).into_response();
            if let Ok(v) = HeaderValue::from_str(&new_url) {
                response.headers_mut().insert(axum::http::header::LOCATION, v);
            }
            response
        }
        UrlTransResult::Proxy(mut fetcher) => {
            let queue = Arc::new(BufXChange::<ABuffer>::new(8, 4));
            fetcher.start(Arc::clone(&queue), offset);

            let take_timeout = state.config.take_timeout;
            let chunk_size = state.config.chunk_size;
            let head_only = method == Method::HEAD;

            // `wait_for_headers` and the fetcher itself block on a condvar; run
            // that hop off the async executor's worker threads.
            let headers_ok = tokio::task::spawn_blocking(move || {
                let ok = fetcher.wait_for_headers();
                (ok, fetcher)
            })
            .await;

            let (ok, mut fetcher) = match headers_ok {
                Ok(pair) => pair,
                Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, close_headers(), ()).into_response(),
            };

            if !ok {
                let (_, http_code) = fetcher.fetch_done();
                let status = http_code_or(http_code, 500);
                return (status, close_headers(), ()).into_response();
            }

            let content_length = fetcher.header_value("content-length");
            let content_range = fetcher.header_value("content-range");
            let content_type = fetcher.header_value("content-type");

            let status = if content_range.is_some() {
                StatusCode::PARTIAL_CONTENT
            } else {
                StatusCode::OK
            };

            let mut response_headers = close_headers();
            response_headers.insert(
                axum::http::header::ACCEPT_RANGES,
                HeaderValue::from_static("bytes"),
            );
            if let Some(len) = &content_length {
                if let Ok(v) = HeaderValue::from_str(len) {
                    response_headers.insert(axum::http::header::CONTENT_LENGTH, v);
                }
            }
            if let Some(range) = &content_range {
                if let Ok(v) = HeaderValue::from_str(range) {
                    response_headers.insert(axum::http::header::CONTENT_RANGE, v);
                }
            }
            if let Some(ctype) = &content_type {
                if let Ok(v) = HeaderValue::from_str(ctype) {
                    response_headers.insert(axum::http::header::CONTENT_TYPE, v);
                }
            }

            if head_only {
                return (status, response_headers, ()).into_response();
            }

            let reader = ContentReader::new(fetcher, queue, offset, take_timeout);
            let stream = body_stream(reader, chunk_size);
            (status, response_headers, Body::from_stream(stream)).into_response()
        }
    }
}

fn http_code_or(observed: u16, fallback: u16) -> StatusCode {
    StatusCode::from_u16(observed)
        .unwrap_or_else(|_| StatusCode::from_u16(fallback).unwrap())
}

fn close_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::CONNECTION,
        HeaderValue::from_static("close"),
    );
    headers
}

fn refuse() -> Response {
    // The framework has no notion of "refuse the connection with literally no
    // bytes written"; the closest honest approximation is an empty, close-tagged
    // error response.
    (StatusCode::BAD_REQUEST, close_headers(), ()).into_response()
}

/// Parses `Range: bytes=N-`. Only a single, open-ended range is supported;
/// anything else (multi-range, suffix-range, malformed) is rejected.
fn parse_range(headers: &HeaderMap) -> Result<u64, ()> {
    let Some(value) = headers.get(axum::http::header::RANGE) else {
        return Ok(0);
    };
    let value = value.to_str().map_err(|_| ())?;
    let spec = value.strip_prefix("bytes=").ok_or(())?;
    if spec.contains(',') {
        return Err(());
    }
    let (start, end) = spec.split_once('-').ok_or(())?;
    if !end.is_empty() {
        return Err(());
    }
    start.parse::<u64>().map_err(|_| ())
}

fn parse_query(uri: &Uri) -> HashMap<String, String> {
    let Some(query) = uri.query() else {
        return HashMap::new();
    };
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// Owns a fetcher and its buffer queue for the lifetime of one HTTP response.
/// Retains a partially-consumed buffer in a local slot rather than pushing it
/// back into the shared queue (`untake`), sidestepping the head-ordering
/// edge case a single-consumer reader never needs.
struct ContentReader {
    fetcher: Box<dyn NetFetch>,
    queue: Arc<BufXChange<ABuffer>>,
    start_offset: u64,
    delivered: u64,
    pending: Option<ABuffer>,
    eos_pending: bool,
    normal_eos: bool,
    take_timeout: Duration,
}

#[derive(Debug)]
enum ContentReadError {
    Fatal(u16),
}

impl ContentReader {
    fn new(
        fetcher: Box<dyn NetFetch>,
        queue: Arc<BufXChange<ABuffer>>,
        start_offset: u64,
        take_timeout: Duration,
    ) -> Self {
        ContentReader {
            fetcher,
            queue,
            start_offset,
            delivered: 0,
            pending: None,
            eos_pending: false,
            normal_eos: false,
            take_timeout,
        }
    }

    fn content_read(&mut self, max: usize) -> Result<Option<Bytes>, ContentReadError> {
        if self.normal_eos {
            return Ok(None);
        }
        if self.eos_pending {
            self.eos_pending = false;
            self.normal_eos = true;
            return Ok(None);
        }

        let mut out = Vec::new();
        while out.len() < max {
            let buf = match self.pending.take() {
                Some(b) => b,
                None => match self.queue.take(Some(self.take_timeout)) {
                    Ok(b) => b,
                    Err(XchangeError::Timeout) | Err(XchangeError::Terminated) => {
                        let (status, http_code) = self.fetcher.fetch_done();
                        if status == FetchStatus::Retryable {
                            self.fetcher.reset();
                            let restart_at = self.start_offset + self.delivered;
                            self.fetcher.start(Arc::clone(&self.queue), restart_at);
                            return Ok(Some(Bytes::from(out)));
                        }
                        warn!(http_code, "upstream fetch failed, not retryable");
                        return Err(ContentReadError::Fatal(http_code));
                    }
                },
            };

            if buf.is_eos_marker() {
                if out.is_empty() {
                    self.normal_eos = true;
                    return Ok(None);
                }
                self.eos_pending = true;
                break;
            }

            let remaining_out = max - out.len();
            let avail = buf.remaining();
            let take_n = remaining_out.min(avail);
            out.extend_from_slice(&buf.unread_slice()[..take_n]);
            self.delivered += take_n as u64;

            if take_n < avail {
                let mut leftover = buf;
                leftover.consume_offset += take_n;
                self.pending = Some(leftover);
            } else {
                self.queue.recycle(buf);
            }
        }
        Ok(Some(Bytes::from(out)))
    }
}

fn body_stream(
    mut reader: ContentReader,
    chunk_size: usize,
) -> ReceiverStream<Result<Bytes, io::Error>> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, io::Error>>(4);
    tokio::task::spawn_blocking(move || loop {
        match reader.content_read(chunk_size) {
            Ok(Some(bytes)) => {
                if bytes.is_empty() {
                    // Retry kicked off a restart; loop straight back into
                    // content_read rather than emitting an empty frame.
                    continue;
                }
                if tx.blocking_send(Ok(bytes)).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(ContentReadError::Fatal(code)) => {
                let _ = tx.blocking_send(Err(io::Error::other(format!(
                    "upstream fetch failed with http code {code}"
                ))));
                return;
            }
        }
    });
    ReceiverStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net_fetch::FileFetch;
    use std::io::Write;

    fn tmp_file(label: &str, contents: &[u8]) -> std::path::PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("rndr-stream-proxy-test-{label}"));
        std::fs::File::create(&path).unwrap().write_all(contents).unwrap();
        path
    }

    #[test]
    fn content_read_drains_full_file_across_small_chunks() {
        let path = tmp_file("drain", b"0123456789abcdef");
        let queue = Arc::new(BufXChange::<ABuffer>::new(8, 4));
        let mut fetcher = FileFetch::new(path);
        fetcher.start(Arc::clone(&queue), 0);
        assert!(fetcher.wait_for_headers());

        let mut reader = ContentReader::new(Box::new(fetcher), queue, 0, Duration::from_secs(2));
        let mut out = Vec::new();
        loop {
            match reader.content_read(5).unwrap() {
                Some(chunk) if chunk.is_empty() => continue,
                Some(chunk) => out.extend_from_slice(&chunk),
                None => break,
            }
        }
        assert_eq!(out, b"0123456789abcdef");
    }

    #[test]
    fn content_read_returns_eos_immediately_for_empty_file() {
        let path = tmp_file("empty", b"");
        let queue = Arc::new(BufXChange::<ABuffer>::new(8, 4));
        let mut fetcher = FileFetch::new(path);
        fetcher.start(Arc::clone(&queue), 0);
        assert!(fetcher.wait_for_headers());

        let mut reader = ContentReader::new(Box::new(fetcher), queue, 0, Duration::from_secs(2));
        assert!(reader.content_read(16).unwrap().is_none());
    }

    #[test]
    fn range_bytes_n_dash_is_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::RANGE, HeaderValue::from_static("bytes=100-"));
        assert_eq!(parse_range(&headers), Ok(100));
    }

    #[test]
    fn range_without_header_defaults_to_zero() {
        assert_eq!(parse_range(&HeaderMap::new()), Ok(0));
    }

    #[test]
    fn suffix_range_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::RANGE, HeaderValue::from_static("bytes=-100"));
        assert_eq!(parse_range(&headers), Err(()));
    }

    #[test]
    fn multi_range_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::RANGE,
            HeaderValue::from_static("bytes=0-100,200-300"),
        );
        assert_eq!(parse_range(&headers), Err(()));
    }

    #[test]
    fn query_map_decodes_pairs() {
        let uri: Uri = "/t?trackId=1&version=2".parse().unwrap();
        let q = parse_query(&uri);
        assert_eq!(q.get("trackId"), Some(&"1".to_string()));
        assert_eq!(q.get("version"), Some(&"2".to_string()));
    }
}
