//! In-process file server for download tests
//!
//! Serves byte blobs under `/repo/...`, honours `Range: bytes=N-` and records
//! every request so tests can assert on methods and range headers.

#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, Response, StatusCode, header};
use futures::StreamExt;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub range: Option<String>,
}

#[derive(Default)]
pub struct ServerState {
    files: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    /// Answer range requests with the full body and 200
    pub ignore_range: AtomicBool,
    /// Answer GET with 500
    pub fail_get: AtomicBool,
    /// Extra bytes advertised by HEAD beyond the real size
    pub head_extra: AtomicU64,
    /// Delay between streamed chunks, in milliseconds
    pub chunk_delay_ms: AtomicU64,
}

pub struct TestServer {
    pub state: Arc<ServerState>,
    pub base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let state = Arc::new(ServerState::default());
        let app = Router::new()
            .route("/repo/{*path}", axum::routing::get(serve).head(serve))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            base_url: format!("http://{}/repo", addr),
            handle,
        }
    }

    pub fn add_file(&self, path: &str, content: Vec<u8>) {
        self.state.files.lock().unwrap().insert(path.to_string(), content);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn gets(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == Method::GET)
            .collect()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Deterministic, non-repeating test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

async fn serve(
    State(state): State<Arc<ServerState>>,
    method: Method,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Response<Body> {
    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        range: range.clone(),
    });

    let Some(content) = state.files.lock().unwrap().get(&path).cloned() else {
        return status(StatusCode::NOT_FOUND);
    };

    if method == Method::HEAD {
        let advertised = content.len() as u64 + state.head_extra.load(Ordering::SeqCst);
        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, advertised)
            .body(Body::empty())
            .unwrap();
    }

    if state.fail_get.load(Ordering::SeqCst) {
        return status(StatusCode::INTERNAL_SERVER_ERROR);
    }

    let start = range
        .as_deref()
        .filter(|_| !state.ignore_range.load(Ordering::SeqCst))
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.trim_end_matches('-').parse::<usize>().ok());

    let (code, body) = match start {
        Some(start) if start <= content.len() => {
            (StatusCode::PARTIAL_CONTENT, content[start..].to_vec())
        }
        Some(_) => return status(StatusCode::RANGE_NOT_SATISFIABLE),
        None => (StatusCode::OK, content.clone()),
    };

    let mut builder = Response::builder()
        .status(code)
        .header(header::CONTENT_LENGTH, body.len());
    if code == StatusCode::PARTIAL_CONTENT {
        let first = content.len() - body.len();
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", first, content.len().saturating_sub(1), content.len()),
        );
    }

    let delay = Duration::from_millis(state.chunk_delay_ms.load(Ordering::SeqCst));
    let chunks: Vec<Vec<u8>> = body.chunks(4096).map(<[u8]>::to_vec).collect();
    let stream = futures::stream::iter(chunks).then(move |chunk| async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok::<_, Infallible>(chunk)
    });

    builder.body(Body::from_stream(stream)).unwrap()
}

fn status(code: StatusCode) -> Response<Body> {
    Response::builder().status(code).body(Body::empty()).unwrap()
}

/// Hand-written HTTP/1.1 responder for behaviour axum will not produce
///
/// HEAD is answered with `head_response`; GET reads the request and then
/// never writes anything, so the client waits for headers forever.
pub struct RawServer {
    pub base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl RawServer {
    pub async fn start(head_response: &'static str) -> Self {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    loop {
                        let Ok(n) = socket.read(&mut buf).await else {
                            return;
                        };
                        if n == 0 {
                            return;
                        }
                        if buf[..n].starts_with(b"HEAD") {
                            if socket.write_all(head_response.as_bytes()).await.is_err() {
                                return;
                            }
                        } else {
                            // Hold the connection open without a status line
                            tokio::time::sleep(Duration::from_secs(3600)).await;
                            return;
                        }
                    }
                });
            }
        });

        Self {
            base_url: format!("http://{}/repo", addr),
            handle,
        }
    }
}

impl Drop for RawServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// HEAD answer advertising a 1000 byte file
pub const HEAD_WITH_LENGTH: &str =
    "HTTP/1.1 200 OK\r\ncontent-length: 1000\r\nconnection: keep-alive\r\n\r\n";

/// HEAD answer that omits the size
pub const HEAD_WITHOUT_LENGTH: &str =
    "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\nconnection: keep-alive\r\n\r\n";
