use chrono::Local;
use motion_pipeline_common::display::{DisplayAction, DisplaySink};
use motion_pipeline_common::frame::{DetectionBatch, StreamItem};
use tracing::{debug, info};

use super::{StageContext, StageError, StageStats};
use crate::channel::BoundedChannel;
use crate::render::Annotator;

/// Closes the sink when the renderer leaves, whichever way it leaves.
struct SinkGuard(Box<dyn DisplaySink>);

impl Drop for SinkGuard {
    fn drop(&mut self) {
        debug!(sink = self.0.name(), "closing display sink");
        self.0.close();
    }
}

/// Annotate each batch and hand it to the display sink until the stream
/// ends, the sink asks to quit, or the run is cancelled. A quit request
/// raises cancellation for the whole pipeline.
pub fn run_renderer(
    input: BoundedChannel<StreamItem<DetectionBatch>>,
    sink: Box<dyn DisplaySink>,
    annotator: Annotator,
    ctx: StageContext,
) -> Result<StageStats, StageError> {
    let mut sink = SinkGuard(sink);
    let mut stats = StageStats::default();
    info!(
        sink = sink.0.name(),
        blur = annotator.blur_enabled(),
        "renderer stage started"
    );

    while let Some(item) = input.get_until(ctx.queue_timeout, &ctx.token) {
        let mut batch = match item {
            StreamItem::Data(batch) => batch,
            StreamItem::EndOfStream => {
                stats.end_of_stream = true;
                info!(frames = stats.emitted, "renderer reached end of stream");
                return Ok(stats);
            }
        };
        stats.received += 1;

        annotator.annotate(&mut batch.frame.image, &batch.detections, Local::now());
        let action = sink.0.show(&batch.frame);
        stats.emitted += 1;

        if action == DisplayAction::Quit {
            info!(seq = batch.seq(), "quit requested by display, cancelling run");
            ctx.token.set();
            stats.cancelled = true;
            return Ok(stats);
        }
    }

    info!(frames = stats.emitted, "renderer stopped by cancellation");
    stats.cancelled = true;
    Ok(stats)
}
