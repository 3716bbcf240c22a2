use motion_pipeline_common::frame::{Frame, StreamItem};
use motion_pipeline_source::FrameProvider;
use tracing::{debug, info, warn};

use super::{push_end_of_stream_once, StageContext, StageError, StageStats};
use crate::channel::{BoundedChannel, Cancelled};

/// Pull frames from `provider` and push them downstream in order until the
/// provider runs dry or the run is cancelled. Exactly one `EndOfStream`
/// follows the last frame unless cancellation got in the way.
///
/// The provider is dropped, and with it any decoder process or connection,
/// on every exit path.
pub fn run_source(
    mut provider: Box<dyn FrameProvider>,
    out: BoundedChannel<StreamItem<Frame>>,
    ctx: StageContext,
) -> Result<StageStats, StageError> {
    let mut stats = StageStats::default();
    info!(provider = provider.name(), "source stage started");

    loop {
        if ctx.token.is_set() {
            break;
        }

        let frame = match provider.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!(frames = stats.received, "source exhausted");
                return finish(out, ctx, stats);
            }
            Err(e) => {
                warn!(error = %e, frames = stats.received, "source read failed, ending stream");
                return finish(out, ctx, stats);
            }
        };
        stats.received += 1;
        let seq = frame.seq;

        match out.put_until(StreamItem::Data(frame), ctx.queue_timeout, &ctx.token) {
            Ok(()) => {
                stats.emitted += 1;
                debug!(seq, "frame queued");
            }
            Err(Cancelled(_)) => {
                debug!(seq, "cancelled while queueing frame");
                break;
            }
        }
    }

    info!(frames = stats.emitted, "source draining after cancellation");
    stats.cancelled = true;
    stats.end_of_stream = push_end_of_stream_once(&out, ctx.queue_timeout, "source");
    info!(provider = provider.name(), "source stage stopped");
    Ok(stats)
}

fn finish(
    out: BoundedChannel<StreamItem<Frame>>,
    ctx: StageContext,
    mut stats: StageStats,
) -> Result<StageStats, StageError> {
    match out.put_until(StreamItem::EndOfStream, ctx.queue_timeout, &ctx.token) {
        Ok(()) => stats.end_of_stream = true,
        Err(Cancelled(_)) => stats.cancelled = true,
    }
    info!(frames = stats.emitted, "source stage stopped");
    Ok(stats)
}
