use grasp_common::Point2D;
use image::{GrayImage, Luma};

use crate::traits::Rasterizer;

/// Even-odd scanline fill sampled at pixel centres
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanlineRasterizer;

impl Rasterizer for ScanlineRasterizer {
    fn fill_ring(&self, mask: &mut GrayImage, ring: &[Point2D]) {
        if ring.len() < 3 || mask.width() == 0 || mask.height() == 0 {
            return;
        }

        let (min_y, max_y) = ring
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.y), hi.max(p.y)));

        let first_row = pixel_index(min_y, mask.height());
        let last_row = pixel_index(max_y, mask.height());

        let mut crossings = Vec::with_capacity(ring.len());
        for row in first_row..last_row {
            let yc = row as f64 + 0.5;

            crossings.clear();
            for (i, a) in ring.iter().enumerate() {
                let b = ring[(i + 1) % ring.len()];
                if (a.y <= yc) != (b.y <= yc) {
                    let t = (yc - a.y) / (b.y - a.y);
                    crossings.push(a.x + t * (b.x - a.x));
                }
            }
            crossings.sort_by(f64::total_cmp);

            for pair in crossings.chunks_exact(2) {
                let start = pixel_index(pair[0], mask.width());
                let end = pixel_index(pair[1], mask.width());
                for x in start..end {
                    mask.put_pixel(x, row, Luma([255]));
                }
            }
        }
    }
}

/// First pixel whose centre lies at or beyond `edge`, clamped to `[0, limit]`
fn pixel_index(edge: f64, limit: u32) -> u32 {
    let index = (edge - 0.5).ceil();
    if index.is_nan() || index <= 0.0 {
        0
    } else {
        (index as u32).min(limit)
    }
}
