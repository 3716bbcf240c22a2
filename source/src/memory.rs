use std::collections::VecDeque;

use image::RgbImage;
use motion_pipeline_common::frame::Frame;

use crate::{FrameProvider, SourceError};

/// Provider over frames already held in memory. Used for replaying
/// synthetic sequences.
pub struct MemorySource {
    images: VecDeque<RgbImage>,
    next_seq: u64,
}

impl MemorySource {
    pub fn new(images: impl IntoIterator<Item = RgbImage>) -> Self {
        Self {
            images: images.into_iter().collect(),
            next_seq: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.images.len()
    }
}

impl FrameProvider for MemorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let Some(image) = self.images.pop_front() else {
            return Ok(None);
        };
        let frame = Frame::captured_now(image, self.next_seq);
        self.next_seq += 1;
        Ok(Some(frame))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_in_order_then_ends() {
        let mut source = MemorySource::new((0..3).map(|_| RgbImage::new(2, 2)));
        for expected in 0..3 {
            let frame = source.next_frame().unwrap().unwrap();
            assert_eq!(frame.seq, expected);
        }
        assert!(source.next_frame().unwrap().is_none());
        assert!(source.next_frame().unwrap().is_none());
    }
}
