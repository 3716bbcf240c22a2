use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub const BOUNDARY: &str = "frame";

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State shared between the display sink (writer) and the HTTP handlers.
pub struct PreviewState {
    latest: RwLock<Option<Bytes>>,
    frames_tx: broadcast::Sender<Bytes>,
    shutdown: watch::Receiver<bool>,
    frames: AtomicU64,
    last_seq: AtomicU64,
    clients: AtomicUsize,
    quit: AtomicBool,
    started: Instant,
}

impl PreviewState {
    pub fn new(frames_tx: broadcast::Sender<Bytes>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            latest: RwLock::new(None),
            frames_tx,
            shutdown,
            frames: AtomicU64::new(0),
            last_seq: AtomicU64::new(0),
            clients: AtomicUsize::new(0),
            quit: AtomicBool::new(false),
            started: Instant::now(),
        }
    }

    /// Make `jpeg` the latest frame and push it to every connected stream.
    pub fn publish(&self, seq: u64, jpeg: Bytes) {
        if let Ok(mut latest) = self.latest.write() {
            *latest = Some(jpeg.clone());
        }
        // No subscribers is fine.
        let _ = self.frames_tx.send(jpeg);
        self.last_seq.store(seq, Ordering::Relaxed);
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn latest(&self) -> Option<Bytes> {
        self.latest.read().ok().and_then(|latest| latest.clone())
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
    }

    pub fn clients(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }

    fn status(&self) -> Status {
        let frames = self.frames.load(Ordering::Relaxed);
        Status {
            frames,
            last_seq: (frames > 0).then(|| self.last_seq.load(Ordering::Relaxed)),
            clients: self.clients(),
            quit_requested: self.quit_requested(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Status {
    frames: u64,
    last_seq: Option<u64>,
    clients: usize,
    quit_requested: bool,
    uptime_secs: u64,
}

/// Keeps the connected-client count accurate however a stream ends.
struct ClientGuard(Arc<PreviewState>);

impl ClientGuard {
    fn new(state: Arc<PreviewState>) -> Self {
        let connected = state.clients.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(clients = connected, "preview client connected");
        Self(state)
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let remaining = self.0.clients.fetch_sub(1, Ordering::Relaxed) - 1;
        debug!(clients = remaining, "preview client disconnected");
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /stream: multipart MJPEG, one part per rendered frame
async fn stream(State(state): State<Arc<PreviewState>>) -> impl IntoResponse {
    struct StreamState {
        pending: Option<Bytes>,
        frames: broadcast::Receiver<Bytes>,
        shutdown: watch::Receiver<bool>,
        _guard: ClientGuard,
    }

    let initial = StreamState {
        pending: state.latest(),
        frames: state.frames_tx.subscribe(),
        shutdown: state.shutdown.clone(),
        _guard: ClientGuard::new(Arc::clone(&state)),
    };

    let parts = futures_util::stream::unfold(initial, |mut s| async move {
        if let Some(jpeg) = s.pending.take() {
            return Some((Ok::<_, Infallible>(multipart_part(&jpeg)), s));
        }
        loop {
            if *s.shutdown.borrow() {
                return None;
            }
            tokio::select! {
                received = s.frames.recv() => match received {
                    Ok(jpeg) => return Some((Ok(multipart_part(&jpeg)), s)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "preview client lagging, frames skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
                changed = s.shutdown.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    });

    (
        [
            (
                header::CONTENT_TYPE,
                format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
            ),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(parts),
    )
}

/// GET /frame: latest rendered frame as a single JPEG
async fn latest_frame(State(state): State<Arc<PreviewState>>) -> impl IntoResponse {
    match state.latest() {
        Some(jpeg) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "no frame rendered yet").into_response(),
    }
}

/// GET /status: counters as JSON
async fn status(State(state): State<Arc<PreviewState>>) -> impl IntoResponse {
    Json(state.status())
}

/// POST /quit: the next frame shown answers `Quit`
async fn quit(State(state): State<Arc<PreviewState>>) -> impl IntoResponse {
    if !state.quit_requested() {
        info!("quit requested over HTTP");
    }
    state.request_quit();
    StatusCode::ACCEPTED
}

pub fn router(state: Arc<PreviewState>) -> Router {
    Router::new()
        .route("/stream", get(stream))
        .route("/frame", get(latest_frame))
        .route("/status", get(status))
        .route("/quit", post(quit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state() -> (Arc<PreviewState>, watch::Sender<bool>) {
        let (frames_tx, _) = broadcast::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (Arc::new(PreviewState::new(frames_tx, shutdown_rx)), shutdown_tx)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn frame_is_unavailable_before_first_publish() {
        let (state, _shutdown) = state();
        let response = router(state).oneshot(get_request("/frame")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn frame_returns_latest_jpeg() {
        let (state, _shutdown) = state();
        state.publish(1, Bytes::from_static(b"\xff\xd8first"));
        state.publish(2, Bytes::from_static(b"\xff\xd8second"));

        let response = router(state).oneshot(get_request("/frame")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"\xff\xd8second");
    }

    #[tokio::test]
    async fn status_reports_counters() {
        let (state, _shutdown) = state();
        state.publish(7, Bytes::from_static(b"jpeg"));

        let response = router(state).oneshot(get_request("/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["frames"], 1);
        assert_eq!(json["last_seq"], 7);
        assert_eq!(json["clients"], 0);
        assert_eq!(json["quit_requested"], false);
    }

    #[tokio::test]
    async fn quit_sets_flag() {
        let (state, _shutdown) = state();
        let request = Request::builder()
            .method("POST")
            .uri("/quit")
            .body(Body::empty())
            .unwrap();
        let response = router(Arc::clone(&state)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(state.quit_requested());
    }

    #[tokio::test]
    async fn stream_starts_with_latest_frame_and_ends_on_shutdown() {
        let (state, shutdown) = state();
        state.publish(3, Bytes::from_static(b"JPEGDATA"));

        let response = router(Arc::clone(&state))
            .oneshot(get_request("/stream"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );

        let mut body = response.into_body();
        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert_eq!(
            &first[..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 8\r\n\r\nJPEGDATA\r\n"
        );
        assert_eq!(state.clients(), 1);

        shutdown.send(true).unwrap();
        assert!(body.frame().await.is_none());
        drop(body);
        assert_eq!(state.clients(), 0);
    }

    #[tokio::test]
    async fn stream_forwards_new_frames() {
        let (state, _shutdown) = state();
        let response = router(Arc::clone(&state))
            .oneshot(get_request("/stream"))
            .await
            .unwrap();
        let mut body = response.into_body();

        let publisher = Arc::clone(&state);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            publisher.publish(1, Bytes::from_static(b"NEW"));
        });

        let part = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert!(part.ends_with(b"NEW\r\n"));
    }
}
