//! `NetFetch`: an upstream byte-stream fetcher, polymorphic over transport.
//!
//! `start` hands the transfer to an owned worker thread, which posts filled
//! [`ABuffer`]s to the given queue and a final zero-length buffer on normal
//! EOS. Dropping any implementation cancels in-flight I/O before returning,
//! so a queue shutdown never races a still-running fetch.

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::buf_xchange::{ABuffer, BufXChange};

const CHUNK_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    InProgress,
    Retryable,
    Fatal,
}

/// A fetcher capable of resuming an upstream transfer at a byte offset.
///
/// Implementations own their worker thread and must cancel it on `Drop`.
pub trait NetFetch: Send {
    /// Starts (or restarts) the transfer at `byte_offset`, streaming filled
    /// buffers into `queue` until EOS or cancellation.
    fn start(&mut self, queue: Arc<BufXChange<ABuffer>>, byte_offset: u64);

    /// Cancels the current transfer and restarts it; called before calling
    /// `start` again after a retryable failure.
    fn reset(&mut self);

    /// Blocks until response headers have arrived or the fetch has
    /// irrecoverably failed before headers. `true` iff headers are usable.
    fn wait_for_headers(&self) -> bool;

    /// A response header, if headers were received.
    fn header_value(&self, name: &str) -> Option<String>;

    /// Non-blocking: the current fetch status and the observed HTTP code
    /// (0 if none was ever observed).
    fn fetch_done(&self) -> (FetchStatus, u16);
}

#[derive(Debug, Default)]
struct FetchState {
    headers: Option<HashMap<String, String>>,
    headers_failed: bool,
    status: FetchStatus,
    http_code: u16,
}

impl Default for FetchStatus {
    fn default() -> Self {
        FetchStatus::InProgress
    }
}

struct Shared {
    state: Mutex<FetchState>,
    headers_ready: Condvar,
    cancel: AtomicBool,
}

impl Shared {
    fn new() -> Arc<Self> {
        Arc::new(Shared {
            state: Mutex::new(FetchState::default()),
            headers_ready: Condvar::new(),
            cancel: AtomicBool::new(false),
        })
    }

    fn publish_headers(&self, headers: HashMap<String, String>) {
        let mut state = self.state.lock().unwrap();
        state.headers = Some(headers);
        self.headers_ready.notify_all();
    }

    fn fail_before_headers(&self, http_code: u16) {
        let mut state = self.state.lock().unwrap();
        state.headers_failed = true;
        state.status = FetchStatus::Fatal;
        state.http_code = http_code;
        self.headers_ready.notify_all();
    }

    fn finish(&self, status: FetchStatus, http_code: u16) {
        let mut state = self.state.lock().unwrap();
        state.status = status;
        if http_code != 0 {
            state.http_code = http_code;
        }
    }
}

/// Fetches an upstream HTTP(S) resource, honoring `Range: bytes=N-` on
/// restart and classifying mid-stream failures as retryable when the
/// upstream advertised `Accept-Ranges: bytes`.
pub struct HttpFetch {
    client: reqwest::blocking::Client,
    url: String,
    user_agent: Option<String>,
    shared: Arc<Shared>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl HttpFetch {
    pub fn new(client: reqwest::blocking::Client, url: impl Into<String>) -> Self {
        HttpFetch {
            client,
            url: url.into(),
            user_agent: None,
            shared: Shared::new(),
            worker: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    fn join_previous(&mut self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.shared.cancel.store(false, Ordering::SeqCst);
    }
}

impl NetFetch for HttpFetch {
    fn start(&mut self, queue: Arc<BufXChange<ABuffer>>, byte_offset: u64) {
        self.join_previous();
        queue.register_producer();

        let client = self.client.clone();
        let url = self.url.clone();
        let user_agent = self.user_agent.clone();
        let shared = Arc::clone(&self.shared);

        let handle = std::thread::Builder::new()
            .name("net-fetch-http".into())
            .spawn(move || run_http_fetch(client, url, user_agent, byte_offset, queue, shared))
            .expect("spawning HTTP fetch worker");
        self.worker = Some(handle);
    }

    fn reset(&mut self) {
        self.join_previous();
        let mut state = self.shared.state.lock().unwrap();
        *state = FetchState::default();
    }

    fn wait_for_headers(&self) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        while state.headers.is_none() && !state.headers_failed {
            state = self.shared.headers_ready.wait(state).unwrap();
        }
        state.headers.is_some()
    }

    fn header_value(&self, name: &str) -> Option<String> {
        let state = self.shared.state.lock().unwrap();
        state
            .headers
            .as_ref()
            .and_then(|h| h.get(&name.to_ascii_lowercase()).cloned())
    }

    fn fetch_done(&self) -> (FetchStatus, u16) {
        let state = self.shared.state.lock().unwrap();
        (state.status, state.http_code)
    }
}

impl Drop for HttpFetch {
    fn drop(&mut self) {
        self.join_previous();
    }
}

fn run_http_fetch(
    client: reqwest::blocking::Client,
    url: String,
    user_agent: Option<String>,
    byte_offset: u64,
    queue: Arc<BufXChange<ABuffer>>,
    shared: Arc<Shared>,
) {
    let mut request = client.get(&url);
    if byte_offset > 0 {
        request = request.header(reqwest::header::RANGE, format!("bytes={}-", byte_offset));
    }
    if let Some(ua) = &user_agent {
        request = request.header(reqwest::header::USER_AGENT, ua.clone());
    }

    let response = match request.send() {
        Ok(r) => r,
        Err(e) => {
            warn!(url, error = %e, "upstream fetch failed before headers");
            shared.fail_before_headers(0);
            queue.ack_producer_exit();
            return;
        }
    };

    let http_code = response.status().as_u16();
    let accepts_ranges = response
        .headers()
        .get(reqwest::header::ACCEPT_RANGES)
        .map(|v| v.as_bytes() == b"bytes")
        .unwrap_or(false);

    let mut headers = HashMap::new();
    for (name, value) in response.headers() {
        if let Ok(v) = value.to_str() {
            headers.insert(name.as_str().to_ascii_lowercase(), v.to_string());
        }
    }

    if !response.status().is_success() && !response.status().is_redirection() {
        shared.fail_before_headers(http_code);
        queue.ack_producer_exit();
        return;
    }

    shared.publish_headers(headers);

    let mut reader = response;
    let mut total_read: u64 = 0;
    loop {
        if shared.cancel.load(Ordering::SeqCst) {
            trace!(url, "fetch cancelled by drop");
            queue.ack_producer_exit();
            return;
        }

        let mut buf = queue
            .take_recycled()
            .unwrap_or_else(|| ABuffer::with_capacity(CHUNK_SIZE));
        buf.reset();
        let mut scratch = vec![0u8; CHUNK_SIZE];
        match reader.read(&mut scratch) {
            Ok(0) => {
                // Normal EOS: post the zero-byte marker buffer. fetch_done has no
                // dedicated "success" state (the proxy only consults it after a
                // queue timeout/termination, never after a clean EOS buffer), so
                // Fatal just means "not retryable, not in progress" here.
                let _ = queue.put(buf);
                shared.finish(FetchStatus::Fatal, http_code);
                queue.ack_producer_exit();
                return;
            }
            Ok(n) => {
                total_read += n as u64;
                buf.fill_from(&scratch[..n]);
                if queue.put(buf).is_err() {
                    queue.ack_producer_exit();
                    return;
                }
            }
            Err(e) => {
                debug!(url, error = %e, total_read, "upstream read error mid-stream");
                let status = if accepts_ranges {
                    FetchStatus::Retryable
                } else {
                    FetchStatus::Fatal
                };
                shared.finish(status, http_code);
                queue.ack_producer_exit();
                return;
            }
        }
    }
}

/// Serves a local file as an upstream source. Used for fixtures and for
/// plugin-less local content; never retryable (a file read error is
/// permanent for that file).
pub struct FileFetch {
    path: std::path::PathBuf,
    shared: Arc<Shared>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl FileFetch {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        FileFetch {
            path: path.into(),
            shared: Shared::new(),
            worker: None,
        }
    }

    fn join_previous(&mut self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.shared.cancel.store(false, Ordering::SeqCst);
    }
}

impl NetFetch for FileFetch {
    fn start(&mut self, queue: Arc<BufXChange<ABuffer>>, byte_offset: u64) {
        self.join_previous();
        queue.register_producer();
        let path = self.path.clone();
        let shared = Arc::clone(&self.shared);

        let handle = std::thread::Builder::new()
            .name("net-fetch-file".into())
            .spawn(move || run_file_fetch(path, byte_offset, queue, shared))
            .expect("spawning file fetch worker");
        self.worker = Some(handle);
    }

    fn reset(&mut self) {
        self.join_previous();
        let mut state = self.shared.state.lock().unwrap();
        *state = FetchState::default();
    }

    fn wait_for_headers(&self) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        while state.headers.is_none() && !state.headers_failed {
            state = self.shared.headers_ready.wait(state).unwrap();
        }
        state.headers.is_some()
    }

    fn header_value(&self, name: &str) -> Option<String> {
        let state = self.shared.state.lock().unwrap();
        state
            .headers
            .as_ref()
            .and_then(|h| h.get(&name.to_ascii_lowercase()).cloned())
    }

    fn fetch_done(&self) -> (FetchStatus, u16) {
        let state = self.shared.state.lock().unwrap();
        (state.status, state.http_code)
    }
}

impl Drop for FileFetch {
    fn drop(&mut self) {
        self.join_previous();
    }
}

fn run_file_fetch(
    path: std::path::PathBuf,
    byte_offset: u64,
    queue: Arc<BufXChange<ABuffer>>,
    shared: Arc<Shared>,
) {
    use std::io::{Seek, SeekFrom};

    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "local file fetch failed");
            shared.fail_before_headers(404);
            queue.ack_producer_exit();
            return;
        }
    };

    let len = file.metadata().ok().map(|m| m.len());
    if byte_offset > 0 && file.seek(SeekFrom::Start(byte_offset)).is_err() {
        shared.fail_before_headers(416);
        queue.ack_producer_exit();
        return;
    }

    let mut headers = HashMap::new();
    if let Some(len) = len {
        let remaining = len.saturating_sub(byte_offset);
        headers.insert("content-length".into(), remaining.to_string());
        if byte_offset > 0 {
            headers.insert(
                "content-range".into(),
                format!("bytes {}-{}/{}", byte_offset, len.saturating_sub(1), len),
            );
        }
    }
    headers.insert("accept-ranges".into(), "bytes".into());
    shared.publish_headers(headers);

    loop {
        if shared.cancel.load(Ordering::SeqCst) {
            queue.ack_producer_exit();
            return;
        }

        let mut buf = queue
            .take_recycled()
            .unwrap_or_else(|| ABuffer::with_capacity(CHUNK_SIZE));
        buf.reset();
        let mut scratch = vec![0u8; CHUNK_SIZE];
        match file.read(&mut scratch) {
            Ok(0) => {
                let _ = queue.put(buf);
                shared.finish(FetchStatus::Fatal, 200);
                queue.ack_producer_exit();
                return;
            }
            Ok(n) => {
                buf.fill_from(&scratch[..n]);
                if queue.put(buf).is_err() {
                    queue.ack_producer_exit();
                    return;
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "local file read error");
                shared.finish(FetchStatus::Fatal, 500);
                queue.ack_producer_exit();
                return;
            }
        }
    }
}

#[allow(dead_code)]
fn _assert_send<T: Send>() {}
#[allow(dead_code)]
fn _assert() {
    _assert_send::<HttpFetch>();
    _assert_send::<FileFetch>();
}
