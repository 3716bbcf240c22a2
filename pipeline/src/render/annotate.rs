use chrono::{DateTime, Local};
use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::filter::gaussian_blur_f32;
use imageproc::rect::Rect;
use motion_pipeline_common::config::RenderConfig;
use motion_pipeline_common::frame::BoundingBox;

use super::font::draw_text;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
const TIMESTAMP_ORIGIN: (u32, u32) = (10, 10);
const TIMESTAMP_SCALE: u32 = 2;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Draws detections and the timestamp overlay onto frames in place.
#[derive(Debug, Clone)]
pub struct Annotator {
    blur_sigma: Option<f32>,
    box_thickness: u32,
    timestamp: bool,
}

impl Annotator {
    pub fn new(blur: bool, blur_sigma: f32, box_thickness: u32, timestamp: bool) -> Self {
        Self {
            blur_sigma: blur.then_some(blur_sigma),
            box_thickness,
            timestamp,
        }
    }

    pub fn blur_enabled(&self) -> bool {
        self.blur_sigma.is_some()
    }

    /// Blur (if enabled) and outline every box, then stamp `now`.
    pub fn annotate(&self, img: &mut RgbImage, detections: &[BoundingBox], now: DateTime<Local>) {
        if let Some(sigma) = self.blur_sigma {
            for b in detections {
                blur_region(img, b, sigma);
            }
        }
        for b in detections {
            draw_box(img, b, self.box_thickness, BOX_COLOR);
        }
        if self.timestamp {
            let text = now.format(TIMESTAMP_FORMAT).to_string();
            let (x, y) = TIMESTAMP_ORIGIN;
            draw_text(img, &text, x, y, TIMESTAMP_SCALE, TEXT_COLOR);
        }
    }
}

impl From<&RenderConfig> for Annotator {
    fn from(config: &RenderConfig) -> Self {
        Self::new(
            config.blur,
            config.blur_sigma,
            config.box_thickness,
            config.timestamp,
        )
    }
}

/// Gaussian-blur the pixels under `b`, leaving the rest of the image alone.
pub fn blur_region(img: &mut RgbImage, b: &BoundingBox, sigma: f32) {
    let width = b.width.min(img.width().saturating_sub(b.x));
    let height = b.height.min(img.height().saturating_sub(b.y));
    if width == 0 || height == 0 {
        return;
    }
    let region = imageops::crop_imm(img, b.x, b.y, width, height).to_image();
    let blurred = gaussian_blur_f32(&region, sigma);
    imageops::replace(img, &blurred, b.x as i64, b.y as i64);
}

/// Outline `b`; extra thickness grows outward from the box edge.
pub fn draw_box(img: &mut RgbImage, b: &BoundingBox, thickness: u32, color: Rgb<u8>) {
    if b.width == 0 || b.height == 0 {
        return;
    }
    for offset in 0..thickness.max(1) {
        let rect = Rect::at(b.x as i32 - offset as i32, b.y as i32 - offset as i32)
            .of_size(b.width + 2 * offset, b.height + 2 * offset);
        draw_hollow_rect_mut(img, rect, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn checkerboard(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    #[test]
    fn blur_only_touches_the_region() {
        let mut img = checkerboard(60, 60);
        let original = img.clone();
        blur_region(&mut img, &BoundingBox::new(20, 20, 20, 20), 3.0);

        // Centre of the region is smoothed towards mid-grey.
        let centre = img.get_pixel(30, 30)[0];
        assert!(centre > 60 && centre < 200, "centre value {centre}");
        // Outside the region nothing changed.
        assert_eq!(img.get_pixel(5, 5), original.get_pixel(5, 5));
        assert_eq!(img.get_pixel(45, 45), original.get_pixel(45, 45));
        assert_eq!(img.get_pixel(19, 30), original.get_pixel(19, 30));
    }

    #[test]
    fn blur_clamps_to_image() {
        let mut img = checkerboard(30, 30);
        blur_region(&mut img, &BoundingBox::new(25, 25, 20, 20), 2.0);
        blur_region(&mut img, &BoundingBox::new(40, 40, 5, 5), 2.0);
    }

    #[test]
    fn box_outline_has_requested_thickness() {
        let mut img = RgbImage::new(50, 50);
        draw_box(&mut img, &BoundingBox::new(10, 10, 20, 20), 2, BOX_COLOR);
        assert_eq!(img.get_pixel(10, 10), &BOX_COLOR);
        assert_eq!(img.get_pixel(9, 15), &BOX_COLOR);
        assert_eq!(img.get_pixel(29, 29), &BOX_COLOR);
        assert_eq!(img.get_pixel(30, 20), &BOX_COLOR);
        // Interior and far outside untouched.
        assert_eq!(img.get_pixel(20, 20), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(8, 15), &Rgb([0, 0, 0]));
    }

    #[test]
    fn box_on_frame_edge_does_not_panic() {
        let mut img = RgbImage::new(40, 30);
        draw_box(&mut img, &BoundingBox::new(0, 0, 40, 30), 3, BOX_COLOR);
        assert_eq!(img.get_pixel(0, 0), &BOX_COLOR);
        assert_eq!(img.get_pixel(39, 29), &BOX_COLOR);
    }

    #[test]
    fn annotate_stamps_timestamp_and_boxes() {
        let mut img = RgbImage::new(400, 200);
        let annotator = Annotator::new(false, 5.0, 2, true);
        annotator.annotate(&mut img, &[BoundingBox::new(100, 100, 50, 50)], noon());

        let ink = img.pixels().filter(|p| **p == TEXT_COLOR).count();
        assert!(ink > 0, "timestamp drawn");
        // Everything drawn by the timestamp stays in the top band.
        assert!(img
            .enumerate_pixels()
            .filter(|(_, _, p)| **p == TEXT_COLOR)
            .all(|(_, y, _)| y >= 10 && y < 10 + 7 * TIMESTAMP_SCALE));
        assert_eq!(img.get_pixel(100, 100), &BOX_COLOR);
    }

    #[test]
    fn annotate_without_blur_keeps_box_interior() {
        let mut img = checkerboard(200, 200);
        let original = img.clone();
        let annotator = Annotator::new(false, 5.0, 1, false);
        annotator.annotate(&mut img, &[BoundingBox::new(50, 50, 40, 40)], noon());
        assert_eq!(img.get_pixel(70, 70), original.get_pixel(70, 70));
        assert!(!annotator.blur_enabled());
    }

    #[test]
    fn annotate_with_blur_smooths_box_interior() {
        let mut img = checkerboard(200, 200);
        let annotator = Annotator::new(true, 4.0, 1, false);
        annotator.annotate(&mut img, &[BoundingBox::new(50, 50, 40, 40)], noon());
        let centre = img.get_pixel(70, 70)[0];
        assert!(centre > 60 && centre < 200, "centre value {centre}");
    }
}
