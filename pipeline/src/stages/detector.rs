use motion_pipeline_common::frame::{DetectionBatch, Frame, GrayFrame, StreamItem};
use tracing::{debug, error, info};

use super::{push_end_of_stream_once, StageContext, StageError, StageStats};
use crate::channel::{BoundedChannel, Cancelled};
use crate::detect::{detect_motion, DetectionParams};

/// Compare each frame with the one before it and push the frame together
/// with its motion boxes downstream. The first frame only primes the
/// comparison and produces no batch.
pub fn run_detector(
    input: BoundedChannel<StreamItem<Frame>>,
    output: BoundedChannel<StreamItem<DetectionBatch>>,
    params: DetectionParams,
    ctx: StageContext,
) -> Result<StageStats, StageError> {
    let mut stats = StageStats::default();
    let mut previous: Option<GrayFrame> = None;
    info!(
        diff_threshold = params.diff_threshold,
        dilate_iterations = params.dilate_iterations,
        min_area = params.min_area,
        "detector stage started"
    );

    while let Some(item) = input.get_until(ctx.queue_timeout, &ctx.token) {
        let frame = match item {
            StreamItem::Data(frame) => frame,
            StreamItem::EndOfStream => {
                debug!("end of stream from source");
                match output.put_until(StreamItem::EndOfStream, ctx.queue_timeout, &ctx.token) {
                    Ok(()) => stats.end_of_stream = true,
                    Err(Cancelled(_)) => stats.cancelled = true,
                }
                info!(batches = stats.emitted, "detector stage stopped");
                return Ok(stats);
            }
        };
        stats.received += 1;

        let current = frame.to_gray();
        let Some(prev) = previous.as_ref() else {
            debug!(seq = frame.seq, "first frame stored as reference");
            previous = Some(current);
            continue;
        };

        let detections = match detect_motion(&current, prev, &params) {
            Ok(boxes) => boxes,
            Err(e) => {
                error!(error = %e, "detector cannot compare frames, cancelling run");
                ctx.token.set();
                stats.cancelled = true;
                stats.end_of_stream =
                    push_end_of_stream_once(&output, ctx.queue_timeout, "detector");
                return Err(e.into());
            }
        };
        debug!(seq = frame.seq, boxes = detections.len(), "frame compared");
        previous = Some(current);

        let batch = DetectionBatch::new(frame, detections);
        match output.put_until(StreamItem::Data(batch), ctx.queue_timeout, &ctx.token) {
            Ok(()) => stats.emitted += 1,
            Err(Cancelled(_)) => break,
        }
    }

    info!(batches = stats.emitted, "detector draining after cancellation");
    stats.cancelled = true;
    stats.end_of_stream = push_end_of_stream_once(&output, ctx.queue_timeout, "detector");
    info!("detector stage stopped");
    Ok(stats)
}
