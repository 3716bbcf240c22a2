//! Frame providers feeding the motion pipeline.
//!
//! A provider yields frames in order and signals the end of its sequence
//! with `Ok(None)`. Resources (decoder processes, HTTP connections) are
//! released when the provider is dropped.

pub mod ffmpeg;
pub mod images;
pub mod memory;
pub mod mjpeg;

use std::path::Path;

use motion_pipeline_common::config::{SourceConfig, SourceKind};
use motion_pipeline_common::frame::{Frame, FrameError};
use tracing::info;

pub use ffmpeg::FfmpegSource;
pub use images::ImageSequenceSource;
pub use memory::MemorySource;
pub use mjpeg::MjpegSource;

pub trait FrameProvider: Send {
    /// Returns the next frame, or `None` once the sequence is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to spawn {0}: {1}")]
    Spawn(&'static str, std::io::Error),
    #[error("ffprobe failed for {0}: {1}")]
    Probe(String, String),
    #[error("failed to read decoder output: {0}")]
    Read(std::io::Error),
    #[error("decoder exited with {0}: {1}")]
    Decoder(std::process::ExitStatus, String),
    #[error("decoder output ended mid-frame: got {got} of {expected} bytes")]
    TruncatedFrame { got: usize, expected: usize },
    #[error("failed to list {0}: {1}")]
    ListDir(String, std::io::Error),
    #[error("no images found in {0}")]
    EmptySequence(String),
    #[error("failed to decode {0}: {1}")]
    Decode(String, image::ImageError),
    #[error("frame {seq} is {got_width}x{got_height}, stream started at {width}x{height}")]
    DimensionChange {
        seq: u64,
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("HTTP stream error: {0}")]
    HttpStream(std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Pin the first frame's dimensions and reject any later frame that differs.
pub(crate) fn check_dimensions(
    pinned: &mut Option<(u32, u32)>,
    seq: u64,
    got: (u32, u32),
) -> Result<(), SourceError> {
    match *pinned {
        None => *pinned = Some(got),
        Some((width, height)) if (width, height) != got => {
            return Err(SourceError::DimensionChange {
                seq,
                width,
                height,
                got_width: got.0,
                got_height: got.1,
            });
        }
        Some(_) => {}
    }
    Ok(())
}

/// Open the provider selected by the source configuration.
pub fn open_provider(config: &SourceConfig) -> Result<Box<dyn FrameProvider>, SourceError> {
    let kind = resolve_kind(&config.locator, config.kind);
    info!(locator = config.locator, kind = ?kind, "opening frame source");
    let provider: Box<dyn FrameProvider> = match kind {
        SourceKind::Mjpeg => Box::new(MjpegSource::connect(&config.locator)?),
        SourceKind::Images => Box::new(ImageSequenceSource::open(
            Path::new(&config.locator),
            config.loop_playback,
        )?),
        SourceKind::Ffmpeg | SourceKind::Auto => Box::new(FfmpegSource::open(&config.locator)?),
    };
    Ok(provider)
}

/// Resolve `auto` into a concrete source kind from the shape of the locator.
pub fn resolve_kind(locator: &str, kind: SourceKind) -> SourceKind {
    if kind != SourceKind::Auto {
        return kind;
    }
    if locator.starts_with("http://") || locator.starts_with("https://") {
        SourceKind::Mjpeg
    } else if Path::new(locator).is_dir() {
        SourceKind::Images
    } else {
        SourceKind::Ffmpeg
    }
}
