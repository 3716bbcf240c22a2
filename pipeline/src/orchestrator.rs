use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use motion_pipeline_common::config::Config;
use motion_pipeline_common::display::DisplaySink;
use motion_pipeline_common::frame::{DetectionBatch, Frame, StreamItem};
use motion_pipeline_source::FrameProvider;
use tracing::{error, info, warn};

use crate::cancel::CancellationToken;
use crate::channel::BoundedChannel;
use crate::detect::DetectionParams;
use crate::render::Annotator;
use crate::stages::{self, StageContext, StageError, StageStats};

const JOIN_POLL: Duration = Duration::from_millis(10);

/// How a stage ended.
#[derive(Debug)]
pub enum StageOutcome {
    Completed(StageStats),
    Failed(StageError),
    /// Still running when the grace period ran out; the thread was detached.
    Abandoned,
}

impl StageOutcome {
    pub fn stats(&self) -> Option<&StageStats> {
        match self {
            StageOutcome::Completed(stats) => Some(stats),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StageOutcome::Failed(_))
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self, StageOutcome::Abandoned)
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOutcome::Completed(s) => write!(
                f,
                "completed (in {}, out {}{}{})",
                s.received,
                s.emitted,
                if s.end_of_stream { ", eos" } else { "" },
                if s.cancelled { ", cancelled" } else { "" },
            ),
            StageOutcome::Failed(e) => write!(f, "failed: {e}"),
            StageOutcome::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Result of one pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    pub source: StageOutcome,
    pub detector: StageOutcome,
    pub renderer: StageOutcome,
    /// Cancellation was raised before the renderer finished: user quit,
    /// interrupt, or a fatal stage error.
    pub cancelled_early: bool,
    pub elapsed: Duration,
}

impl PipelineReport {
    /// No stage failed. Abandoned stages are a degraded shutdown, not a
    /// failure.
    pub fn is_success(&self) -> bool {
        !(self.source.is_failed() || self.detector.is_failed() || self.renderer.is_failed())
    }

    pub fn is_degraded(&self) -> bool {
        self.source.is_abandoned() || self.detector.is_abandoned()
    }

    /// Frames the display sink was handed.
    pub fn frames_rendered(&self) -> u64 {
        self.renderer.stats().map_or(0, |s| s.emitted)
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "pipeline finished in {:.2}s", self.elapsed.as_secs_f64())?;
        writeln!(f, "  source:   {}", self.source)?;
        writeln!(f, "  detector: {}", self.detector)?;
        write!(f, "  renderer: {}", self.renderer)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to spawn {0} thread: {1}")]
    Spawn(&'static str, std::io::Error),
}

/// Wires the three stages together and supervises their shutdown.
#[derive(Debug, Clone)]
pub struct Pipeline {
    channel_capacity: usize,
    queue_timeout: Duration,
    grace_period: Duration,
    params: DetectionParams,
    annotator: Annotator,
}

impl Pipeline {
    pub fn new(
        channel_capacity: usize,
        queue_timeout: Duration,
        grace_period: Duration,
        params: DetectionParams,
        annotator: Annotator,
    ) -> Self {
        Self {
            channel_capacity,
            queue_timeout,
            grace_period,
            params,
            annotator,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.pipeline.channel_capacity,
            config.pipeline.queue_timeout(),
            config.pipeline.grace_period(),
            DetectionParams::from(&config.detection),
            Annotator::from(&config.render),
        )
    }

    /// Run until the renderer stops, then shut the other stages down.
    ///
    /// `token` may be raised from outside (e.g. a signal handler) to stop the
    /// run early.
    pub fn run(
        &self,
        provider: Box<dyn FrameProvider>,
        sink: Box<dyn DisplaySink>,
        token: CancellationToken,
    ) -> Result<PipelineReport, PipelineError> {
        let started = Instant::now();
        let frames: BoundedChannel<StreamItem<Frame>> = BoundedChannel::new(self.channel_capacity);
        let batches: BoundedChannel<StreamItem<DetectionBatch>> =
            BoundedChannel::new(self.channel_capacity);
        let ctx = StageContext::new(token.clone(), self.queue_timeout);

        info!(
            capacity = self.channel_capacity,
            queue_timeout_ms = self.queue_timeout.as_millis() as u64,
            grace_period_ms = self.grace_period.as_millis() as u64,
            "starting pipeline"
        );

        let source = spawn_stage("source", &token, {
            let out = frames.clone();
            let ctx = ctx.clone();
            move || stages::run_source(provider, out, ctx)
        })?;
        let detector = spawn_stage("detector", &token, {
            let (input, output) = (frames.clone(), batches.clone());
            let params = self.params.clone();
            let ctx = ctx.clone();
            move || stages::run_detector(input, output, params, ctx)
        })?;
        let renderer = spawn_stage("renderer", &token, {
            let input = batches.clone();
            let annotator = self.annotator.clone();
            let ctx = ctx.clone();
            move || stages::run_renderer(input, sink, annotator, ctx)
        })?;

        let renderer = join_stage("renderer", renderer);
        let cancelled_early = !token.set();

        let deadline = Instant::now() + self.grace_period;
        let source = join_within("source", source, deadline);
        let detector = join_within("detector", detector, deadline);

        drop(frames);
        drop(batches);

        let report = PipelineReport {
            source,
            detector,
            renderer,
            cancelled_early,
            elapsed: started.elapsed(),
        };
        if report.is_degraded() {
            warn!(
                grace_period_ms = self.grace_period.as_millis() as u64,
                "degraded shutdown: stage threads left running"
            );
        }
        info!(
            frames = report.frames_rendered(),
            cancelled_early,
            success = report.is_success(),
            "pipeline stopped"
        );
        Ok(report)
    }
}

type StageHandle = JoinHandle<Result<StageStats, StageError>>;

fn spawn_stage<F>(
    name: &'static str,
    token: &CancellationToken,
    body: F,
) -> Result<StageHandle, PipelineError>
where
    F: FnOnce() -> Result<StageStats, StageError> + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|e| {
            // Stages already running wind down on their own.
            token.set();
            PipelineError::Spawn(name, e)
        })
}

fn join_stage(name: &'static str, handle: StageHandle) -> StageOutcome {
    match handle.join() {
        Ok(Ok(stats)) => StageOutcome::Completed(stats),
        Ok(Err(e)) => {
            error!(stage = name, error = %e, "stage failed");
            StageOutcome::Failed(e)
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(stage = name, panic = %message, "stage panicked");
            StageOutcome::Failed(StageError::Panicked(message))
        }
    }
}

/// Join `handle` if it finishes before `deadline`, otherwise detach it.
fn join_within(name: &'static str, handle: StageHandle, deadline: Instant) -> StageOutcome {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(stage = name, "stage did not stop within grace period, abandoning thread");
            return StageOutcome::Abandoned;
        }
        thread::sleep(JOIN_POLL);
    }
    join_stage(name, handle)
}
