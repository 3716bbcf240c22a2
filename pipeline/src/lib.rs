//! Three-stage motion detection pipeline: a frame source, a frame
//! differencing detector and an annotating renderer, connected by bounded
//! channels and stopped through a shared cancellation token.

pub mod cancel;
pub mod channel;
pub mod detect;
pub mod display;
pub mod orchestrator;
pub mod render;
pub mod stages;

pub use cancel::CancellationToken;
pub use channel::BoundedChannel;
pub use detect::{detect_motion, DetectError, DetectionParams};
pub use orchestrator::{Pipeline, PipelineError, PipelineReport, StageOutcome};
pub use stages::{StageError, StageStats};
