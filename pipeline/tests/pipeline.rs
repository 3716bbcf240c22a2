use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use motion_pipeline::render::Annotator;
use motion_pipeline::{CancellationToken, DetectionParams, Pipeline, StageError, StageOutcome};
use motion_pipeline_common::display::{DisplayAction, DisplaySink};
use motion_pipeline_common::frame::Frame;
use motion_pipeline_source::{FrameProvider, MemorySource, SourceError};

const QUEUE_TIMEOUT: Duration = Duration::from_millis(50);
const GRACE: Duration = Duration::from_millis(500);

fn pipeline() -> Pipeline {
    Pipeline::new(
        2,
        QUEUE_TIMEOUT,
        GRACE,
        DetectionParams::default(),
        Annotator::new(false, 4.0, 2, true),
    )
}

fn background(width: u32, height: u32) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([20, 20, 20]))
}

/// Frames with a bright square drifting to the right.
fn moving_square(count: usize) -> Vec<RgbImage> {
    (0..count)
        .map(|i| {
            let mut img = background(320, 120);
            let x0 = 10 + 20 * i as u32;
            for y in 40..70 {
                for x in x0..x0 + 30 {
                    img.put_pixel(x, y, Rgb([240, 240, 240]));
                }
            }
            img
        })
        .collect()
}

#[derive(Default)]
struct SinkLog {
    shown: Vec<(u64, RgbImage)>,
    closed: u32,
}

struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
    quit_after: Option<usize>,
    delay: Duration,
}

impl RecordingSink {
    fn new(log: Arc<Mutex<SinkLog>>) -> Self {
        Self {
            log,
            quit_after: None,
            delay: Duration::ZERO,
        }
    }
}

impl DisplaySink for RecordingSink {
    fn show(&mut self, frame: &Frame) -> DisplayAction {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let mut log = self.log.lock().unwrap();
        log.shown.push((frame.seq, frame.image.clone()));
        match self.quit_after {
            Some(n) if log.shown.len() >= n => DisplayAction::Quit,
            _ => DisplayAction::Continue,
        }
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closed += 1;
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Provider that never runs dry.
struct EndlessSource {
    seq: u64,
}

impl FrameProvider for EndlessSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let frame = Frame::new(background(64, 48), 0, self.seq);
        self.seq += 1;
        Ok(Some(frame))
    }
}

/// Provider whose first read hangs far longer than any grace period.
struct StalledSource {
    stall: Duration,
}

impl FrameProvider for StalledSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        thread::sleep(self.stall);
        Ok(None)
    }
}

fn completed(outcome: &StageOutcome) -> motion_pipeline::StageStats {
    match outcome {
        StageOutcome::Completed(stats) => *stats,
        other => panic!("stage did not complete: {other}"),
    }
}

#[test]
fn n_frames_render_n_minus_one_batches() {
    let log = Arc::new(Mutex::new(SinkLog::default()));
    let report = pipeline()
        .run(
            Box::new(MemorySource::new(moving_square(12))),
            Box::new(RecordingSink::new(log.clone())),
            CancellationToken::new(),
        )
        .unwrap();

    assert!(report.is_success());
    assert!(!report.cancelled_early);
    let source = completed(&report.source);
    let detector = completed(&report.detector);
    let renderer = completed(&report.renderer);
    assert_eq!(source.emitted, 12);
    assert!(source.end_of_stream);
    assert_eq!(detector.emitted, 11);
    assert!(detector.end_of_stream);
    assert_eq!(renderer.emitted, 11);
    assert!(renderer.end_of_stream);

    let log = log.lock().unwrap();
    let seqs: Vec<u64> = log.shown.iter().map(|(seq, _)| *seq).collect();
    assert_eq!(seqs, (1..12).collect::<Vec<u64>>());
    assert_eq!(log.closed, 1);
}

#[test]
fn moving_object_is_outlined_in_rendered_frames() {
    let log = Arc::new(Mutex::new(SinkLog::default()));
    pipeline()
        .run(
            Box::new(MemorySource::new(moving_square(3))),
            Box::new(RecordingSink::new(log.clone())),
            CancellationToken::new(),
        )
        .unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.shown.len(), 2);
    let green = Rgb([0, 255, 0]);
    for (_, img) in &log.shown {
        assert!(img.pixels().any(|p| *p == green), "no box drawn");
        // Far corner is untouched background.
        assert_eq!(img.get_pixel(319, 119), &Rgb([20, 20, 20]));
    }
}

#[test]
fn single_frame_renders_nothing() {
    let log = Arc::new(Mutex::new(SinkLog::default()));
    let report = pipeline()
        .run(
            Box::new(MemorySource::new(vec![background(32, 32)])),
            Box::new(RecordingSink::new(log.clone())),
            CancellationToken::new(),
        )
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.frames_rendered(), 0);
    assert!(completed(&report.renderer).end_of_stream);
    assert_eq!(log.lock().unwrap().closed, 1);
}

#[test]
fn user_quit_cancels_the_run() {
    let log = Arc::new(Mutex::new(SinkLog::default()));
    let sink = RecordingSink {
        log: log.clone(),
        quit_after: Some(5),
        delay: Duration::ZERO,
    };
    let report = pipeline()
        .run(
            Box::new(EndlessSource { seq: 0 }),
            Box::new(sink),
            CancellationToken::new(),
        )
        .unwrap();

    assert!(report.is_success());
    assert!(report.cancelled_early);
    assert!(!report.is_degraded());
    assert!(completed(&report.source).cancelled);
    assert!(completed(&report.detector).cancelled);
    assert_eq!(report.frames_rendered(), 5);
    assert_eq!(log.lock().unwrap().closed, 1);
}

#[test]
fn external_cancellation_stops_every_stage_within_grace_period() {
    let log = Arc::new(Mutex::new(SinkLog::default()));
    let sink = RecordingSink {
        log: log.clone(),
        quit_after: None,
        delay: Duration::from_millis(5),
    };
    let token = CancellationToken::new();
    let setter = token.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        setter.set();
    });

    let started = Instant::now();
    let report = pipeline()
        .run(Box::new(EndlessSource { seq: 0 }), Box::new(sink), token)
        .unwrap();
    canceller.join().unwrap();

    assert!(report.cancelled_early);
    assert!(!report.is_degraded());
    assert!(report.is_success());
    // Renderer notices within one queue timeout, the rest within the grace period.
    assert!(started.elapsed() < Duration::from_millis(200) + QUEUE_TIMEOUT * 4 + GRACE);
    assert!(report.frames_rendered() > 0);
    assert_eq!(log.lock().unwrap().closed, 1);
}

#[test]
fn stalled_source_is_abandoned_after_grace_period() {
    let log = Arc::new(Mutex::new(SinkLog::default()));
    let token = CancellationToken::new();
    let setter = token.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        setter.set();
    });

    let started = Instant::now();
    let report = pipeline()
        .run(
            Box::new(StalledSource {
                stall: Duration::from_secs(30),
            }),
            Box::new(RecordingSink::new(log.clone())),
            token,
        )
        .unwrap();
    canceller.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(matches!(report.source, StageOutcome::Abandoned));
    assert!(completed(&report.detector).cancelled);
    assert!(report.is_degraded());
    assert!(report.is_success());
    assert!(report.cancelled_early);
    assert_eq!(report.frames_rendered(), 0);
    assert_eq!(log.lock().unwrap().closed, 1);
}

#[test]
fn resolution_change_fails_the_detector() {
    let mut images = moving_square(3);
    images.push(background(80, 60));
    images.extend(moving_square(3));
    let log = Arc::new(Mutex::new(SinkLog::default()));

    let report = pipeline()
        .run(
            Box::new(MemorySource::new(images)),
            Box::new(RecordingSink::new(log.clone())),
            CancellationToken::new(),
        )
        .unwrap();

    assert!(!report.is_success());
    assert!(report.cancelled_early);
    assert!(matches!(
        report.detector,
        StageOutcome::Failed(StageError::Detect(_))
    ));
    assert!(report.frames_rendered() <= 2);
    assert_eq!(log.lock().unwrap().closed, 1);
}

#[test]
fn image_directory_runs_end_to_end_from_config() {
    let dir = tempfile::tempdir().unwrap();
    for (i, img) in moving_square(4).iter().enumerate() {
        img.save(dir.path().join(format!("frame_{i:03}.png"))).unwrap();
    }
    let config_path = dir.path().join("motion.toml");
    std::fs::write(
        &config_path,
        format!(
            "[source]\nlocator = {:?}\n\n[pipeline]\nchannel_capacity = 1\nqueue_timeout_ms = 50\n\n[render]\nblur = true\n",
            dir.path().display().to_string()
        ),
    )
    .unwrap();

    let config = motion_pipeline_common::config::Config::load(&config_path).unwrap();
    config.validate().unwrap();
    let provider = motion_pipeline_source::open_provider(&config.source).unwrap();
    let log = Arc::new(Mutex::new(SinkLog::default()));

    let report = Pipeline::from_config(&config)
        .run(
            provider,
            Box::new(RecordingSink::new(log.clone())),
            CancellationToken::new(),
        )
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.frames_rendered(), 3);
    let seqs: Vec<u64> = log.lock().unwrap().shown.iter().map(|(seq, _)| *seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
}
