use grasp_common::BoundingBox;
use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::{
    error::{MaskError, Result},
    types::BinaryMask,
};

/// Tint the masked pixels of `image` with `color`
pub fn overlay_mask(image: &RgbImage, mask: &BinaryMask, color: [u8; 3], alpha: f32) -> Result<RgbImage> {
    if image.dimensions() != (mask.width(), mask.height()) {
        return Err(MaskError::DimensionMismatch {
            mask_width: mask.width(),
            mask_height: mask.height(),
            image_width: image.width(),
            image_height: image.height(),
        });
    }

    let mut result = image.clone();
    for (x, y, pixel) in result.enumerate_pixels_mut() {
        if mask.contains(x, y) {
            *pixel = Rgb(blend_colors(pixel.0, color, alpha));
        }
    }
    Ok(result)
}

/// Number of distinct colours used for box outlines
pub const PALETTE_SIZE: usize = 20;

/// Outline colour of the `index`-th box; repeats every [`PALETTE_SIZE`] boxes
pub fn palette_color(index: usize) -> [u8; 3] {
    let hue = (index % PALETTE_SIZE) as f32 / PALETTE_SIZE as f32;
    hsv_to_rgb(hue, 0.8, 0.9)
}

/// Draw each box as a hollow rectangle `thickness` pixels wide.
///
/// Boxes are in pixel-edge coordinates of `image`; the `i`-th box uses
/// [`palette_color`]`(i)`. Parts outside the image are clipped.
pub fn draw_boxes(image: &RgbImage, boxes: &[BoundingBox], thickness: u32) -> RgbImage {
    let mut result = image.clone();
    for (index, bbox) in boxes.iter().enumerate() {
        let color = Rgb(palette_color(index));
        let left = bbox.x1.floor() as i32;
        let top = bbox.y1.floor() as i32;
        let width = (bbox.x2.ceil() as i32 - left).max(1) as u32;
        let height = (bbox.y2.ceil() as i32 - top).max(1) as u32;

        for inset in 0..thickness {
            let Some(w) = width.checked_sub(2 * inset).filter(|w| *w > 0) else { break };
            let Some(h) = height.checked_sub(2 * inset).filter(|h| *h > 0) else { break };
            let offset = inset as i32;
            let rect = Rect::at(left + offset, top + offset).of_size(w, h);
            draw_hollow_rect_mut(&mut result, rect, color);
        }
    }
    result
}

fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> [u8; 3] {
    let sector = (hue * 6.0).floor();
    let fraction = hue * 6.0 - sector;
    let p = value * (1.0 - saturation);
    let q = value * (1.0 - saturation * fraction);
    let t = value * (1.0 - saturation * (1.0 - fraction));
    let (r, g, b) = match sector as i32 % 6 {
        0 => (value, t, p),
        1 => (q, value, p),
        2 => (p, value, t),
        3 => (p, q, value),
        4 => (t, p, value),
        _ => (value, p, q),
    };
    [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]
}

fn blend_colors(base: [u8; 3], overlay: [u8; 3], alpha: f32) -> [u8; 3] {
    let alpha = alpha.clamp(0.0, 1.0);
    let inv_alpha = 1.0 - alpha;

    [
        (base[0] as f32 * inv_alpha + overlay[0] as f32 * alpha) as u8,
        (base[1] as f32 * inv_alpha + overlay[1] as f32 * alpha) as u8,
        (base[2] as f32 * inv_alpha + overlay[2] as f32 * alpha) as u8,
    ]
}
