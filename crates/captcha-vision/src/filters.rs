//! Pixel filters behind the preprocessing stages.
//!
//! All filters take the canonical RGB8 buffer by reference and return a new
//! one; none of them change the image dimensions except [`resize_to_fit`].

use image::imageops::FilterType;
use image::{Rgb, RgbImage};

/// Smoothing kernel used as the "blurred" reference when sharpening.
const SMOOTH_KERNEL: [[u32; 3]; 3] = [[1, 1, 1], [1, 5, 1], [1, 1, 1]];
const SMOOTH_WEIGHT: u32 = 13;

/// Per-channel median over a `(2r+1)²` window with clamped edges.
pub fn median_filter(img: &RgbImage, radius: u32) -> RgbImage {
    if radius == 0 {
        return img.clone();
    }

    let (w, h) = img.dimensions();
    let r = radius as i64;
    let side = (2 * radius + 1) as usize;
    let mut window: [Vec<u8>; 3] = [
        Vec::with_capacity(side * side),
        Vec::with_capacity(side * side),
        Vec::with_capacity(side * side),
    ];

    RgbImage::from_fn(w, h, |x, y| {
        for values in window.iter_mut() {
            values.clear();
        }
        for dy in -r..=r {
            let sy = clamp_coord(y as i64 + dy, h);
            for dx in -r..=r {
                let sx = clamp_coord(x as i64 + dx, w);
                let p = img.get_pixel(sx, sy);
                for (c, values) in window.iter_mut().enumerate() {
                    values.push(p.0[c]);
                }
            }
        }
        let mut out = [0u8; 3];
        for (c, values) in window.iter_mut().enumerate() {
            let mid = values.len() / 2;
            out[c] = *values.select_nth_unstable(mid).1;
        }
        Rgb(out)
    })
}

/// Scale each channel's distance from the mean luminance by `factor`.
pub fn adjust_contrast(img: &RgbImage, factor: f32) -> RgbImage {
    let mean = mean_luminance(img);
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = blend(mean, *c as f32, factor);
        }
    }
    out
}

/// Blend between a smoothed copy (`factor = 0`) and the original (`factor = 1`);
/// factors above one sharpen. Border pixels are left as they are.
pub fn adjust_sharpness(img: &RgbImage, factor: f32) -> RgbImage {
    let (w, h) = img.dimensions();
    let mut out = img.clone();
    if w < 3 || h < 3 {
        return out;
    }

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut acc = [0u32; 3];
            for (ky, row) in SMOOTH_KERNEL.iter().enumerate() {
                for (kx, weight) in row.iter().enumerate() {
                    let p = img.get_pixel(x + kx as u32 - 1, y + ky as u32 - 1);
                    for c in 0..3 {
                        acc[c] += p.0[c] as u32 * weight;
                    }
                }
            }
            let original = img.get_pixel(x, y);
            let mut px = [0u8; 3];
            for c in 0..3 {
                let smoothed = (acc[c] + SMOOTH_WEIGHT / 2) / SMOOTH_WEIGHT;
                px[c] = blend(smoothed as f32, original.0[c] as f32, factor);
            }
            out.put_pixel(x, y, Rgb(px));
        }
    }
    out
}

/// Target size that fits inside `max_w × max_h`, preserving aspect ratio.
///
/// Never upscales. Integer arithmetic keeps the result exact up to flooring,
/// so each side is within one pixel of the ideal ratio.
pub fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width <= max_w && height <= max_h {
        return (width, height);
    }

    let (w, h) = (width as u64, height as u64);
    let (mw, mh) = (max_w.max(1) as u64, max_h.max(1) as u64);

    // max_w / w <= max_h / h  ⇔  width is the binding side
    if mw * h <= mh * w {
        (max_w.max(1), ((h * mw) / w).max(1) as u32)
    } else {
        (((w * mh) / h).max(1) as u32, max_h.max(1))
    }
}

/// Downscale with Lanczos3 so the image fits the bounds.
pub fn resize_to_fit(img: &RgbImage, max_w: u32, max_h: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    let (nw, nh) = fit_within(w, h, max_w, max_h);
    if (nw, nh) == (w, h) {
        return img.clone();
    }
    image::imageops::resize(img, nw, nh, FilterType::Lanczos3)
}

/// Mean ITU-R 601 luma, as used for the contrast pivot.
fn mean_luminance(img: &RgbImage) -> f32 {
    let total = img.pixels().len() as u64;
    if total == 0 {
        return 0.0;
    }
    let sum: u64 = img
        .pixels()
        .map(|p| (p.0[0] as u64 * 299 + p.0[1] as u64 * 587 + p.0[2] as u64 * 114) / 1000)
        .sum();
    (sum as f64 / total as f64).round() as f32
}

fn blend(base: f32, value: f32, factor: f32) -> u8 {
    (base + factor * (value - base)).round().clamp(0.0, 255.0) as u8
}

fn clamp_coord(v: i64, len: u32) -> u32 {
    v.clamp(0, len as i64 - 1) as u32
}
