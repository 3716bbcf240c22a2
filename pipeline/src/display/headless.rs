use std::io::BufRead;
use std::thread;
use std::time::{Duration, Instant};

use motion_pipeline_common::display::{DisplayAction, DisplaySink};
use motion_pipeline_common::frame::Frame;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;

const SUMMARY_EVERY: u64 = 100;

/// Display sink for runs without a screen: logs what it is shown, paces
/// output to a fixed frame interval and relays a quit request.
pub struct HeadlessDisplay {
    frame_interval: Duration,
    quit: CancellationToken,
    shown: u64,
    last_shown: Option<Instant>,
    started: Instant,
}

impl HeadlessDisplay {
    pub fn new(frame_interval: Duration) -> Self {
        Self {
            frame_interval,
            quit: CancellationToken::new(),
            shown: 0,
            last_shown: None,
            started: Instant::now(),
        }
    }

    /// Like `new`, plus a background thread that requests quit when a line
    /// reading `q` arrives on stdin.
    pub fn with_stdin_quit(frame_interval: Duration) -> Self {
        let display = Self::new(frame_interval);
        let quit = display.quit_handle();
        let spawned = thread::Builder::new()
            .name("stdin-quit".to_string())
            .spawn(move || watch_for_quit(std::io::stdin().lock(), &quit));
        if let Err(e) = spawned {
            warn!(error = %e, "failed to start stdin watcher, quit key disabled");
        }
        display
    }

    /// Raising the returned token makes the next `show` answer `Quit`.
    pub fn quit_handle(&self) -> CancellationToken {
        self.quit.clone()
    }

    pub fn frames_shown(&self) -> u64 {
        self.shown
    }

    fn pace(&mut self) {
        if let Some(last) = self.last_shown {
            let elapsed = last.elapsed();
            if elapsed < self.frame_interval {
                thread::sleep(self.frame_interval - elapsed);
            }
        }
        self.last_shown = Some(Instant::now());
    }
}

impl DisplaySink for HeadlessDisplay {
    fn show(&mut self, frame: &Frame) -> DisplayAction {
        if !self.frame_interval.is_zero() {
            self.pace();
        }
        self.shown += 1;
        debug!(
            seq = frame.seq,
            width = frame.width(),
            height = frame.height(),
            "frame rendered"
        );
        if self.shown % SUMMARY_EVERY == 0 {
            let secs = self.started.elapsed().as_secs_f64();
            info!(
                frames = self.shown,
                fps = format!("{:.1}", self.shown as f64 / secs.max(f64::EPSILON)),
                "headless display progress"
            );
        }

        if self.quit.is_set() {
            DisplayAction::Quit
        } else {
            DisplayAction::Continue
        }
    }

    fn close(&mut self) {
        info!(frames = self.shown, "headless display closed");
    }

    fn name(&self) -> &str {
        "headless"
    }
}

/// Read lines until `q` (request quit) or end of input.
fn watch_for_quit(input: impl BufRead, quit: &CancellationToken) {
    for line in input.lines() {
        match line {
            Ok(line) if line.trim().eq_ignore_ascii_case("q") => {
                info!("quit requested from stdin");
                quit.set();
                return;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "stdin closed");
                return;
            }
        }
    }
}
