//! The three pipeline stages. Each runs on its own thread, talks to its
//! neighbours only through bounded channels, and polls the shared
//! cancellation token between channel waits.

pub mod detector;
pub mod renderer;
pub mod source;

use std::time::Duration;

use motion_pipeline_common::frame::StreamItem;
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::channel::BoundedChannel;
use crate::detect::DetectError;

pub use detector::run_detector;
pub use renderer::run_renderer;
pub use source::run_source;

/// What every stage needs besides its channels.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub token: CancellationToken,
    pub queue_timeout: Duration,
}

impl StageContext {
    pub fn new(token: CancellationToken, queue_timeout: Duration) -> Self {
        Self {
            token,
            queue_timeout,
        }
    }
}

/// Counters a stage reports when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    /// Items taken in: provider frames, channel frames or batches.
    pub received: u64,
    /// Items handed on: frames pushed, batches pushed or frames shown.
    pub emitted: u64,
    /// Source and detector: the sentinel was pushed downstream.
    /// Renderer: the sentinel was received.
    pub end_of_stream: bool,
    /// The stage stopped because cancellation was raised.
    pub cancelled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("detection failed: {0}")]
    Detect(#[from] DetectError),
    #[error("stage thread panicked: {0}")]
    Panicked(String),
}

/// Push the sentinel once, waiting at most one queue timeout. Used on the
/// cancellation path, where a full channel whose reader is gone must not
/// hold the stage.
pub(crate) fn push_end_of_stream_once<T>(
    out: &BoundedChannel<StreamItem<T>>,
    timeout: Duration,
    stage: &'static str,
) -> bool {
    match out.put(StreamItem::EndOfStream, timeout) {
        Ok(()) => true,
        Err(_) => {
            debug!(stage, "downstream full, end-of-stream not delivered");
            false
        }
    }
}
