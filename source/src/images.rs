use std::path::{Path, PathBuf};

use chrono::Utc;
use motion_pipeline_common::frame::Frame;
use tracing::{debug, info};

use crate::{check_dimensions, FrameProvider, SourceError};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Replays the images of a directory in lexicographic file-name order.
///
/// Every image must have the dimensions of the first one; the detector
/// compares consecutive frames pixel by pixel.
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    cursor: usize,
    loop_playback: bool,
    dimensions: Option<(u32, u32)>,
    next_seq: u64,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path, loop_playback: bool) -> Result<Self, SourceError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| SourceError::ListDir(dir.display().to_string(), e))?;

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(SourceError::EmptySequence(dir.display().to_string()));
        }

        info!(
            dir = dir.display().to_string(),
            images = paths.len(),
            loop_playback,
            "image sequence opened"
        );

        Ok(Self {
            paths,
            cursor: 0,
            loop_playback,
            dimensions: None,
            next_seq: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameProvider for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if self.cursor == self.paths.len() {
            if !self.loop_playback {
                return Ok(None);
            }
            debug!(frames = self.next_seq, "image sequence wrapped around");
            self.cursor = 0;
        }

        let path = &self.paths[self.cursor];
        self.cursor += 1;

        let image = image::open(path)
            .map_err(|e| SourceError::Decode(path.display().to_string(), e))?
            .to_rgb8();

        check_dimensions(&mut self.dimensions, self.next_seq, image.dimensions())?;

        let frame = Frame::new(image, Utc::now().timestamp_millis(), self.next_seq);
        self.next_seq += 1;
        Ok(Some(frame))
    }

    fn name(&self) -> &str {
        "images"
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
