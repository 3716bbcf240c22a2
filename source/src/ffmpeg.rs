use std::io::{ErrorKind, Read};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;

use chrono::Utc;
use motion_pipeline_common::frame::{rgb24_frame_len, Frame};
use tracing::{debug, error, info, warn};

use crate::{FrameProvider, SourceError};

/// Bytes of decoder stderr kept for error reports.
const STDERR_TAIL: usize = 4 * 1024;

/// Decodes any ffmpeg-readable input (file, device, RTSP URL) into packed
/// `rgb24` frames read from the child's stdout.
pub struct FfmpegSource {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    locator: String,
    width: u32,
    height: u32,
    next_seq: u64,
}

impl FfmpegSource {
    /// Probe the input's dimensions with ffprobe, then start decoding.
    pub fn open(locator: &str) -> Result<Self, SourceError> {
        let (width, height) = probe_dimensions(locator)?;
        Self::spawn(locator, width, height)
    }

    /// Start decoding with known output dimensions. ffmpeg scales the video
    /// to `width` x `height` so every frame has the same size.
    pub fn spawn(locator: &str, width: u32, height: u32) -> Result<Self, SourceError> {
        Self::spawn_with(Command::new("ffmpeg"), locator, width, height)
    }

    /// Run the decoder through `cmd`, which supplies the program (and any
    /// leading arguments) the decoding arguments are appended to.
    fn spawn_with(
        mut cmd: Command,
        locator: &str,
        width: u32,
        height: u32,
    ) -> Result<Self, SourceError> {
        let scale_arg = format!("scale={width}:{height}");
        #[rustfmt::skip]
        let args = [
            "-hide_banner",
            "-loglevel", "error",
            "-i", locator,
            "-an",
            "-vf", scale_arg.as_str(),
            "-pix_fmt", "rgb24",
            "-f", "rawvideo",
            "-",
        ];
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| SourceError::Spawn("ffmpeg", e))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            SourceError::Spawn(
                "ffmpeg",
                std::io::Error::new(ErrorKind::Other, "could not get stdout handle"),
            )
        })?;
        // ffmpeg blocks once the stderr pipe fills, so it is drained on a
        // helper thread for the whole run.
        let stderr = child
            .stderr
            .take()
            .map(drain_stderr)
            .transpose()
            .map_err(|e| SourceError::Spawn("ffmpeg", e))?;

        info!(locator, width, height, "ffmpeg decoder started");

        Ok(Self {
            child,
            stdout,
            stderr,
            locator: locator.to_string(),
            width,
            height,
            next_seq: 0,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Reap the decoder once its output has ended. A non-zero exit means
    /// decoding failed rather than the input running out.
    fn check_exit(&mut self) -> Result<(), SourceError> {
        let status = self.child.wait().map_err(SourceError::Read)?;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        if status.success() {
            if !stderr.is_empty() {
                debug!(locator = self.locator, stderr = %stderr, "ffmpeg reported warnings");
            }
            return Ok(());
        }
        error!(locator = self.locator, %status, stderr = %stderr, "ffmpeg exited with error");
        Err(SourceError::Decoder(status, stderr))
    }
}

impl FrameProvider for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let expected = rgb24_frame_len(self.width, self.height);
        let mut buf = vec![0u8; expected];
        let got = read_full(&mut self.stdout, &mut buf).map_err(SourceError::Read)?;
        if got < expected {
            self.check_exit()?;
        }
        if got == 0 {
            debug!(locator = self.locator, frames = self.next_seq, "ffmpeg output ended");
            return Ok(None);
        }
        if got < expected {
            return Err(SourceError::TruncatedFrame { got, expected });
        }

        let frame = Frame::from_rgb24(
            self.width,
            self.height,
            buf,
            Utc::now().timestamp_millis(),
            self.next_seq,
        )?;
        self.next_seq += 1;
        Ok(Some(frame))
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        // ffmpeg may still be decoding when the pipeline is cancelled.
        if let Err(e) = self.child.kill() {
            if e.kind() != ErrorKind::InvalidInput {
                warn!(error = %e, "failed to kill ffmpeg decoder");
            }
        }
        match self.child.wait() {
            Ok(status) => debug!(%status, locator = self.locator, "ffmpeg decoder released"),
            Err(e) => warn!(error = %e, "failed to reap ffmpeg decoder"),
        }
        if let Some(handle) = self.stderr.take() {
            let _ = handle.join();
        }
    }
}

/// Ask ffprobe for the width and height of the first video stream.
pub fn probe_dimensions(locator: &str) -> Result<(u32, u32), SourceError> {
    #[rustfmt::skip]
    let args = [
        "-v", "error",
        "-select_streams", "v:0",
        "-show_entries", "stream=width,height",
        "-of", "csv=p=0:s=x",
        locator,
    ];
    let output = Command::new("ffprobe")
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| SourceError::Spawn("ffprobe", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SourceError::Probe(
            locator.to_string(),
            stderr.trim().to_string(),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_dimensions(&stdout).ok_or_else(|| {
        SourceError::Probe(
            locator.to_string(),
            format!("unexpected ffprobe output {:?}", stdout.trim()),
        )
    })
}

/// Parse ffprobe's `WIDTHxHEIGHT` output. Only the first line is used.
fn parse_dimensions(output: &str) -> Option<(u32, u32)> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let (w, h) = line.split_once('x')?;
    let width: u32 = w.trim().parse().ok()?;
    let height: u32 = h.trim().trim_end_matches('x').parse().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

/// Collect the tail of the decoder's stderr until the pipe closes.
fn drain_stderr(stderr: ChildStderr) -> std::io::Result<JoinHandle<String>> {
    std::thread::Builder::new()
        .name("ffmpeg-stderr".to_string())
        .spawn(move || {
            let mut reader = stderr;
            let mut tail = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => {
                        tail.extend_from_slice(&chunk[..n]);
                        if tail.len() > STDERR_TAIL {
                            tail.drain(..tail.len() - STDERR_TAIL);
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            String::from_utf8_lossy(&tail).trim().to_string()
        })
}

/// Fill `buf` from `reader`, stopping early only at EOF. Returns the number
/// of bytes read, so 0 means the stream ended cleanly on a frame boundary.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
