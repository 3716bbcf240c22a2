use std::io::Read;
use std::time::Duration;

use bytes::BytesMut;
use chrono::Utc;
use motion_pipeline_common::frame::Frame;
use tracing::{debug, info, warn};

use crate::{check_dimensions, FrameProvider, SourceError};

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";
const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Before the first `--frame` marker.
    SeekingBoundary,
    /// Inside a part's headers.
    SeekingHeaderEnd,
    /// Inside a part's body; it ends at the next marker.
    CollectingJpeg,
}

/// Incremental splitter for `multipart/x-mixed-replace; boundary=frame`
/// bodies. Feed it chunks in arrival order and pull complete JPEGs out.
pub struct MjpegParser {
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl MjpegParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Return the next complete JPEG, or `None` if more bytes are needed.
    pub fn next_jpeg(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // A marker may straddle two chunks.
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    let pos = find_subsequence(&self.buffer, HEADER_END)?;
                    let _ = self.buffer.split_to(pos + HEADER_END.len());
                    self.jpeg_start = 0;
                    self.state = ParseState::CollectingJpeg;
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY)
                    else {
                        self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        return None;
                    };

                    let jpeg_end = self.jpeg_start + pos;
                    // The part body is followed by CRLF before the marker.
                    let end = if jpeg_end >= 2
                        && self.buffer[jpeg_end - 2] == b'\r'
                        && self.buffer[jpeg_end - 1] == b'\n'
                    {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };

                    let jpeg = self.buffer[..end].to_vec();
                    let _ = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                    self.state = ParseState::SeekingHeaderEnd;

                    if !jpeg.is_empty() {
                        return Some(jpeg);
                    }
                }
            }
        }
    }
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Pulls frames from an HTTP MJPEG stream (e.g. a camera's `/stream`
/// endpoint).
pub struct MjpegSource {
    url: String,
    body: Box<dyn Read + Send>,
    parser: MjpegParser,
    chunk: Vec<u8>,
    dimensions: Option<(u32, u32)>,
    next_seq: u64,
}

impl MjpegSource {
    pub fn connect(url: &str) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            // Streams are unbounded; only the connect phase is timed.
            .timeout(None)
            .build()
            .map_err(SourceError::HttpConnect)?;
        let response = client
            .get(url)
            .send()
            .map_err(SourceError::HttpConnect)?;

        if !response.status().is_success() {
            return Err(SourceError::HttpStatus(response.status().as_u16()));
        }

        info!(url, status = %response.status(), "connected to MJPEG stream");
        Ok(Self::from_reader(url, response))
    }

    /// Wrap an already-open multipart body.
    pub fn from_reader(url: &str, body: impl Read + Send + 'static) -> Self {
        Self {
            url: url.to_string(),
            body: Box::new(body),
            parser: MjpegParser::new(),
            chunk: vec![0u8; READ_CHUNK],
            dimensions: None,
            next_seq: 0,
        }
    }
}

impl FrameProvider for MjpegSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        loop {
            if let Some(jpeg) = self.parser.next_jpeg() {
                let image = match image::load_from_memory(&jpeg) {
                    Ok(img) => img.to_rgb8(),
                    Err(e) => {
                        warn!(error = %e, bytes = jpeg.len(), "failed to decode MJPEG part, skipping");
                        continue;
                    }
                };
                check_dimensions(&mut self.dimensions, self.next_seq, image.dimensions())?;
                let frame = Frame::new(image, Utc::now().timestamp_millis(), self.next_seq);
                self.next_seq += 1;
                return Ok(Some(frame));
            }

            let n = self
                .body
                .read(&mut self.chunk)
                .map_err(SourceError::HttpStream)?;
            if n == 0 {
                debug!(url = self.url, frames = self.next_seq, "MJPEG stream closed");
                return Ok(None);
            }
            self.parser.push(&self.chunk[..n]);
        }
    }

    fn name(&self) -> &str {
        "mjpeg"
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
