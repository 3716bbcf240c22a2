use image::{Rgb, RgbImage};

pub const GLYPH_WIDTH: u32 = 5;
pub const GLYPH_HEIGHT: u32 = 7;

/// 5x7 bitmap for the characters a timestamp needs; anything else renders
/// as a hollow box.
fn glyph(ch: char) -> [u8; 7] {
    match ch {
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        '/' => [0b00001, 0b00010, 0b00010, 0b00100, 0b01000, 0b01000, 0b10000],
        ' ' => [0; 7],
        _ => [0b11111, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11111],
    }
}

/// Draw `text` with its top-left corner at (`x`, `y`). Each glyph pixel
/// becomes a `scale` x `scale` block; one column of spacing separates
/// glyphs. Pixels falling outside the image are skipped.
pub fn draw_text(img: &mut RgbImage, text: &str, x: u32, y: u32, scale: u32, color: Rgb<u8>) {
    let scale = scale.max(1);
    let advance = (GLYPH_WIDTH + 1) * scale;

    for (i, ch) in text.chars().enumerate() {
        let origin_x = x + i as u32 * advance;
        if origin_x >= img.width() {
            break;
        }
        for (row, &bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                    continue;
                }
                let px = origin_x + col * scale;
                let py = y + row as u32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        let (tx, ty) = (px + dx, py + dy);
                        if tx < img.width() && ty < img.height() {
                            img.put_pixel(tx, ty, color);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INK: Rgb<u8> = Rgb([255, 0, 0]);

    fn inked(img: &RgbImage) -> usize {
        img.pixels().filter(|p| **p == INK).count()
    }

    #[test]
    fn one_is_drawn_at_scale() {
        let mut img = RgbImage::new(20, 20);
        draw_text(&mut img, "1", 0, 0, 1, INK);
        // '1' has 10 set bits.
        assert_eq!(inked(&img), 10);

        let mut img = RgbImage::new(40, 40);
        draw_text(&mut img, "1", 0, 0, 2, INK);
        assert_eq!(inked(&img), 40);
    }

    #[test]
    fn space_draws_nothing() {
        let mut img = RgbImage::new(20, 20);
        draw_text(&mut img, "   ", 0, 0, 1, INK);
        assert_eq!(inked(&img), 0);
    }

    #[test]
    fn clips_at_image_edge() {
        let mut img = RgbImage::new(8, 4);
        draw_text(&mut img, "2026-01-01 12:00:00", 3, 1, 3, INK);
        assert!(inked(&img) > 0);
    }
}
