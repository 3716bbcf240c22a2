//! Browser preview for the motion pipeline: a display sink that encodes
//! rendered frames as JPEG and serves them over HTTP.

pub mod server;

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use motion_pipeline_common::config::PreviewConfig;
use motion_pipeline_common::display::{DisplayAction, DisplaySink};
use motion_pipeline_common::frame::Frame;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

pub use server::{router, PreviewState};

/// Frames buffered per stream client before it starts skipping.
const FRAME_BACKLOG: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("failed to build preview runtime: {0}")]
    Runtime(std::io::Error),
    #[error("failed to bind preview server to {0}: {1}")]
    Bind(String, std::io::Error),
    #[error("failed to start preview server thread: {0}")]
    Spawn(std::io::Error),
}

/// Display sink serving rendered frames to browsers.
///
/// The HTTP server runs on its own tokio runtime thread so the renderer
/// stays fully synchronous.
pub struct PreviewSink {
    state: Arc<PreviewState>,
    jpeg_quality: u8,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    server: Option<JoinHandle<()>>,
}

impl PreviewSink {
    pub fn start(config: &PreviewConfig) -> Result<Self, PreviewError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("preview-http")
            .enable_all()
            .build()
            .map_err(PreviewError::Runtime)?;

        let listener = runtime
            .block_on(tokio::net::TcpListener::bind(&config.bind))
            .map_err(|e| PreviewError::Bind(config.bind.clone(), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| PreviewError::Bind(config.bind.clone(), e))?;

        let (frames_tx, _) = broadcast::channel(FRAME_BACKLOG);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(PreviewState::new(frames_tx, shutdown_rx.clone()));
        let app = router(Arc::clone(&state));

        let server = std::thread::Builder::new()
            .name("preview-server".to_string())
            .spawn(move || {
                let mut shutdown = shutdown_rx;
                runtime.block_on(async move {
                    let served = axum::serve(listener, app)
                        .with_graceful_shutdown(async move {
                            while !*shutdown.borrow() {
                                if shutdown.changed().await.is_err() {
                                    break;
                                }
                            }
                        })
                        .await;
                    if let Err(e) = served {
                        error!(error = %e, "preview server failed");
                    }
                });
            })
            .map_err(PreviewError::Spawn)?;

        info!(addr = %local_addr, "preview server listening");
        Ok(Self {
            state,
            jpeg_quality: config.jpeg_quality,
            local_addr,
            shutdown_tx,
            server: Some(server),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn shutdown(&mut self) {
        let Some(server) = self.server.take() else {
            return;
        };
        let _ = self.shutdown_tx.send(true);
        if server.join().is_err() {
            warn!("preview server thread panicked");
        }
        info!(addr = %self.local_addr, "preview server stopped");
    }
}

impl DisplaySink for PreviewSink {
    fn show(&mut self, frame: &Frame) -> DisplayAction {
        match encode_jpeg(&frame.image, self.jpeg_quality) {
            Ok(jpeg) => self.state.publish(frame.seq, jpeg),
            Err(e) => warn!(seq = frame.seq, error = %e, "failed to encode preview frame"),
        }
        if self.state.quit_requested() {
            DisplayAction::Quit
        } else {
            DisplayAction::Continue
        }
    }

    fn close(&mut self) {
        self.shutdown();
    }

    fn name(&self) -> &str {
        "preview"
    }
}

impl Drop for PreviewSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Bytes, image::ImageError> {
    let mut buf = Vec::new();
    image.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
    Ok(Bytes::from(buf))
}
