use image::{GrayImage, RgbImage};

/// Number of interleaved samples per pixel in a [`Frame`].
pub const FRAME_CHANNELS: u8 = 3;

/// A decoded RGB video frame with capture metadata.
///
/// `seq` is the arrival position of the frame into the pipeline; providers
/// assign it monotonically starting at 0. A frame is owned by exactly one
/// stage at a time and moves between stages through channel hand-off.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    pub fn new(image: RgbImage, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            image,
            captured_at_ms,
            seq,
        }
    }

    /// Create a frame stamped with the current wall-clock time.
    pub fn captured_now(image: RgbImage, seq: u64) -> Self {
        Self::new(image, chrono::Utc::now().timestamp_millis(), seq)
    }

    /// Build a frame from a packed `rgb24` buffer (as produced by ffmpeg's
    /// rawvideo muxer).
    pub fn from_rgb24(
        width: u32,
        height: u32,
        data: Vec<u8>,
        captured_at_ms: i64,
        seq: u64,
    ) -> Result<Self, FrameError> {
        let expected = rgb24_frame_len(width, height);
        let got = data.len();
        if got != expected {
            return Err(FrameError::BufferSize { got, expected });
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or(FrameError::BufferSize { got, expected })?;
        Ok(Self::new(image, captured_at_ms, seq))
    }

    // -- Convenience accessors --------------------------------------------------

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn channels(&self) -> u8 {
        FRAME_CHANNELS
    }

    /// Derive the single-channel luminance frame used for differencing.
    pub fn to_gray(&self) -> GrayFrame {
        GrayFrame {
            image: image::imageops::grayscale(&self.image),
            seq: self.seq,
        }
    }
}

/// Byte length of one packed `rgb24` frame.
pub fn rgb24_frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * FRAME_CHANNELS as usize
}

/// Luminance view of a [`Frame`]. Lives only inside the detector, until it
/// has been compared against the next frame.
#[derive(Debug, Clone)]
pub struct GrayFrame {
    image: GrayImage,
    seq: u64,
}

impl GrayFrame {
    pub fn from_image(image: GrayImage, seq: u64) -> Self {
        Self { image, seq }
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Axis-aligned rectangle in pixel coordinates, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a box from inclusive corner coordinates.
    pub fn from_corners(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        Self::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// True when the box is non-empty and lies entirely inside a
    /// `width` x `height` frame.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0 && self.height > 0 && self.right() <= width && self.bottom() <= height
    }
}

/// A frame together with the regions that changed since the previous one.
#[derive(Debug, Clone)]
pub struct DetectionBatch {
    pub frame: Frame,
    /// Boxes in contour discovery order.
    pub detections: Vec<BoundingBox>,
}

impl DetectionBatch {
    pub fn new(frame: Frame, detections: Vec<BoundingBox>) -> Self {
        Self { frame, detections }
    }

    pub fn has_motion(&self) -> bool {
        !self.detections.is_empty()
    }

    pub fn seq(&self) -> u64 {
        self.frame.seq
    }
}

/// Payload carried by a pipeline channel: real data or the end-of-stream
/// sentinel.
#[derive(Debug, Clone)]
pub enum StreamItem<T> {
    Data(T),
    /// No more data will ever arrive on this channel.
    EndOfStream,
}

impl<T> StreamItem<T> {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, StreamItem::EndOfStream)
    }

    pub fn into_data(self) -> Option<T> {
        match self {
            StreamItem::Data(data) => Some(data),
            StreamItem::EndOfStream => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("raw frame buffer has {got} bytes, expected {expected}")]
    BufferSize { got: usize, expected: usize },
}
