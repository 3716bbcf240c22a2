//! Frame-differencing motion detector.
//!
//! Two consecutive grayscale frames are compared pixel by pixel:
//!
//! 1. absolute difference
//! 2. binarize: differences strictly above `diff_threshold` become 255
//! 3. dilate the mask (3x3 square, `dilate_iterations` passes) so nearby
//!    fragments and compression noise gaps merge into one region
//! 4. trace external contours (outer borders without a parent)
//! 5. keep contours whose polygon area exceeds `min_area` and report their
//!    bounding rectangles
//!
//! The function is pure: same inputs, same boxes, same order.

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use imageproc::point::Point;
use motion_pipeline_common::config::DetectionConfig;
use motion_pipeline_common::frame::{BoundingBox, GrayFrame};

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    pub diff_threshold: u8,
    pub dilate_iterations: u8,
    pub min_area: f64,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            diff_threshold: 25,
            dilate_iterations: 2,
            min_area: 500.0,
        }
    }
}

impl From<&DetectionConfig> for DetectionParams {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            diff_threshold: config.diff_threshold,
            dilate_iterations: config.dilate_iterations,
            min_area: config.min_area,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectError {
    #[error("frame {current_seq} is {current:?} but previous frame {previous_seq} is {previous:?}")]
    DimensionMismatch {
        current_seq: u64,
        current: (u32, u32),
        previous_seq: u64,
        previous: (u32, u32),
    },
}

/// Bounding boxes of the regions that changed between `previous` and
/// `current`, in contour discovery (raster) order.
pub fn detect_motion(
    current: &GrayFrame,
    previous: &GrayFrame,
    params: &DetectionParams,
) -> Result<Vec<BoundingBox>, DetectError> {
    if current.dimensions() != previous.dimensions() {
        return Err(DetectError::DimensionMismatch {
            current_seq: current.seq(),
            current: current.dimensions(),
            previous_seq: previous.seq(),
            previous: previous.dimensions(),
        });
    }

    let mask = motion_mask(current.image(), previous.image(), params);

    let boxes = find_contours::<u32>(&mask)
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
        .filter(|c| polygon_area(&c.points) > params.min_area)
        .filter_map(|c| bounding_rect(&c.points))
        .collect();
    Ok(boxes)
}

/// Binary mask of changed pixels after thresholding and dilation.
pub fn motion_mask(current: &GrayImage, previous: &GrayImage, params: &DetectionParams) -> GrayImage {
    let mut mask = GrayImage::new(current.width(), current.height());
    for ((out, a), b) in mask.pixels_mut().zip(current.pixels()).zip(previous.pixels()) {
        out.0[0] = if a.0[0].abs_diff(b.0[0]) > params.diff_threshold {
            255
        } else {
            0
        };
    }

    if params.dilate_iterations == 0 {
        return mask;
    }
    // n passes of a 3x3 square equal one pass with Chebyshev radius n.
    dilate(&mask, Norm::LInf, params.dilate_iterations)
}

/// Area enclosed by a closed contour (shoelace formula over the traced
/// border pixels).
fn polygon_area(points: &[Point<u32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice_area: i64 = 0;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice_area += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    twice_area.abs() as f64 / 2.0
}

fn bounding_rect(points: &[Point<u32>]) -> Option<BoundingBox> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &points[1..] {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(BoundingBox::from_corners(min_x, min_y, max_x, max_y))
}
