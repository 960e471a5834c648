//! Low-level 8-bit raster operations used by the preprocessing variants.
//!
//! Neighbourhood filters follow the usual document-scanning conventions:
//! kernels are anchored at `(width / 2, height / 2)`, results are rounded and
//! saturated to `0..=255`.

use image::{GrayImage, ImageBuffer, Luma, Pixel, RgbImage};
use imageproc::contrast::ThresholdType;

/// Edge handling for neighbourhood operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Border {
    /// Mirror without repeating the edge pixel: `dcb|abcd|cba`.
    Reflect101,
    /// Repeat the edge pixel: `aaa|abcd|ddd`.
    Replicate,
    /// Output pixels whose window leaves the image keep their source value.
    Preserve,
}

/// A dense convolution kernel, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    weights: Vec<f32>,
    width: usize,
    height: usize,
}

impl Kernel {
    /// `weights` are divided by `divisor`; `weights.len()` must be `width * height`.
    pub fn new(width: usize, height: usize, weights: &[f32], divisor: f32) -> Self {
        debug_assert_eq!(weights.len(), width * height);
        Self {
            weights: weights.iter().map(|w| w / divisor).collect(),
            width,
            height,
        }
    }

    fn anchor(&self) -> (usize, usize) {
        (self.width / 2, self.height / 2)
    }
}

fn saturate(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn border_index(i: i64, len: i64, border: Border) -> Option<usize> {
    if (0..len).contains(&i) {
        return Some(i as usize);
    }
    match border {
        Border::Replicate => Some(i.clamp(0, len - 1) as usize),
        Border::Reflect101 => {
            if len == 1 {
                return Some(0);
            }
            let period = 2 * (len - 1);
            let m = i.rem_euclid(period);
            let mirrored = if m >= len { period - m } else { m };
            Some(mirrored as usize)
        }
        Border::Preserve => None,
    }
}

// ── Convolution ───────────────────────────────────────────────────────────────

/// 2-D convolution over every channel of an 8-bit image.
pub fn convolve<P>(img: &ImageBuffer<P, Vec<u8>>, kernel: &Kernel, border: Border) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let (w, h) = img.dimensions();
    let (w, h) = (w as i64, h as i64);
    let channels = P::CHANNEL_COUNT as usize;
    let (ax, ay) = kernel.anchor();
    let src: &[u8] = img.as_raw();
    let mut out = img.clone();
    let dst: &mut [u8] = &mut out;

    for y in 0..h {
        for x in 0..w {
            let mut acc = [0f32; 4];
            let mut inside = true;
            'window: for ky in 0..kernel.height {
                let Some(sy) = border_index(y + ky as i64 - ay as i64, h, border) else {
                    inside = false;
                    break 'window;
                };
                for kx in 0..kernel.width {
                    let Some(sx) = border_index(x + kx as i64 - ax as i64, w, border) else {
                        inside = false;
                        break 'window;
                    };
                    let weight = kernel.weights[ky * kernel.width + kx];
                    let offset = (sy * w as usize + sx) * channels;
                    for (c, a) in acc.iter_mut().enumerate().take(channels) {
                        *a += weight * src[offset + c] as f32;
                    }
                }
            }
            if !inside {
                continue;
            }
            let base = (y as usize * w as usize + x as usize) * channels;
            for c in 0..channels {
                dst[base + c] = saturate(acc[c]);
            }
        }
    }
    out
}

/// Horizontal then vertical pass with the same 1-D weights.
pub fn separable_filter(gray: &GrayImage, weights: &[f32], border: Border) -> GrayImage {
    let (w, h) = gray.dimensions();
    let (wi, hi) = (w as i64, h as i64);
    let anchor = (weights.len() / 2) as i64;
    let src = gray.as_raw();

    let mut horizontal = vec![0f32; src.len()];
    for y in 0..hi {
        let row = (y * wi) as usize;
        for x in 0..wi {
            let mut acc = 0f32;
            for (k, weight) in weights.iter().enumerate() {
                if let Some(sx) = border_index(x + k as i64 - anchor, wi, border) {
                    acc += weight * src[row + sx] as f32;
                }
            }
            horizontal[row + x as usize] = acc;
        }
    }

    ImageBuffer::from_fn(w, h, |x, y| {
        let mut acc = 0f32;
        for (k, weight) in weights.iter().enumerate() {
            if let Some(sy) = border_index(y as i64 + k as i64 - anchor, hi, border) {
                acc += weight * horizontal[sy * w as usize + x as usize];
            }
        }
        Luma([saturate(acc)])
    })
}

/// Normalized 1-D Gaussian weights with sigma derived from the size.
pub fn gaussian_weights(size: usize) -> Vec<f32> {
    if size == 3 {
        return vec![0.25, 0.5, 0.25];
    }
    let sigma = 0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (size as f64 - 1.0) / 2.0;
    let raw: Vec<f64> = (0..size)
        .map(|i| {
            let d = i as f64 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    raw.into_iter().map(|v| (v / sum) as f32).collect()
}

pub fn gaussian_blur(gray: &GrayImage, size: usize) -> GrayImage {
    separable_filter(gray, &gaussian_weights(size), Border::Reflect101)
}

// ── Thresholding ──────────────────────────────────────────────────────────────

/// Binarize against a Gaussian-weighted local mean minus `bias`.
pub fn adaptive_threshold_gaussian(gray: &GrayImage, block_size: usize, bias: i32) -> GrayImage {
    let mean = separable_filter(gray, &gaussian_weights(block_size), Border::Replicate);
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        let src = gray.get_pixel(x, y)[0] as i32;
        let local = mean.get_pixel(x, y)[0] as i32;
        Luma([if src > local - bias { 255 } else { 0 }])
    })
}

/// Pixels strictly above `level` become 255, the rest 0.
pub fn threshold(gray: &GrayImage, level: u8) -> GrayImage {
    imageproc::contrast::threshold(gray, level, ThresholdType::Binary)
}

pub fn otsu_threshold(gray: &GrayImage) -> GrayImage {
    threshold(gray, imageproc::contrast::otsu_level(gray))
}

pub fn equalize_histogram(gray: &GrayImage) -> GrayImage {
    imageproc::contrast::equalize_histogram(gray)
}

/// `|p * gain|` saturated to the 8-bit range.
pub fn scale_saturate(gray: &GrayImage, gain: f32) -> GrayImage {
    ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([saturate((gray.get_pixel(x, y)[0] as f32 * gain).abs())])
    })
}

// ── Morphology (rectangular structuring elements) ─────────────────────────────

#[derive(Debug, Clone, Copy)]
enum MorphOp {
    Erode,
    Dilate,
}

fn morph(gray: &GrayImage, kw: u32, kh: u32, op: MorphOp) -> GrayImage {
    let (w, h) = gray.dimensions();
    let (ax, ay) = ((kw / 2) as i64, (kh / 2) as i64);
    ImageBuffer::from_fn(w, h, |x, y| {
        let mut acc = match op {
            MorphOp::Erode => u8::MAX,
            MorphOp::Dilate => u8::MIN,
        };
        for ky in 0..kh as i64 {
            let sy = y as i64 + ky - ay;
            if sy < 0 || sy >= h as i64 {
                continue;
            }
            for kx in 0..kw as i64 {
                let sx = x as i64 + kx - ax;
                if sx < 0 || sx >= w as i64 {
                    continue;
                }
                let v = gray.get_pixel(sx as u32, sy as u32)[0];
                acc = match op {
                    MorphOp::Erode => acc.min(v),
                    MorphOp::Dilate => acc.max(v),
                };
            }
        }
        Luma([acc])
    })
}

/// Dilate then erode: fills gaps narrower than the element.
pub fn close(gray: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    morph(&morph(gray, kw, kh, MorphOp::Dilate), kw, kh, MorphOp::Erode)
}

/// Erode then dilate: removes specks smaller than the element.
pub fn open(gray: &GrayImage, kw: u32, kh: u32) -> GrayImage {
    morph(&morph(gray, kw, kh, MorphOp::Erode), kw, kh, MorphOp::Dilate)
}

// ── Photo-editor style enhancement on RGB ────────────────────────────────────

/// ITU-R 601 luma with integer weights 299/587/114.
pub fn luma_601(rgb: &RgbImage) -> GrayImage {
    ImageBuffer::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let l = (r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16;
        Luma([l.min(255) as u8])
    })
}

/// `base + alpha * (value - base)`, clipped and truncated.
fn blend_channel(base: u8, value: u8, alpha: f32) -> u8 {
    let v = base as f32 + alpha * (value as f32 - base as f32);
    if v <= 0.0 {
        0
    } else if v >= 255.0 {
        255
    } else {
        v as u8
    }
}

fn blend(base: &RgbImage, img: &RgbImage, alpha: f32) -> RgbImage {
    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let b = base.get_pixel(x, y).0;
        let v = img.get_pixel(x, y).0;
        image::Rgb([
            blend_channel(b[0], v[0], alpha),
            blend_channel(b[1], v[1], alpha),
            blend_channel(b[2], v[2], alpha),
        ])
    })
}

/// Push every channel away from the mean grey level by `factor`.
pub fn enhance_contrast(rgb: &RgbImage, factor: f32) -> RgbImage {
    let gray = luma_601(rgb);
    let count = gray.pixels().len() as u64;
    let mean = if count == 0 {
        0
    } else {
        let sum: u64 = gray.pixels().map(|p| p[0] as u64).sum();
        ((sum as f64 / count as f64) + 0.5) as u8
    };
    let degenerate = RgbImage::from_pixel(rgb.width(), rgb.height(), image::Rgb([mean; 3]));
    blend(&degenerate, rgb, factor)
}

fn smooth_kernel() -> Kernel {
    Kernel::new(3, 3, &[1.0, 1.0, 1.0, 1.0, 5.0, 1.0, 1.0, 1.0, 1.0], 13.0)
}

fn sharpen_kernel() -> Kernel {
    Kernel::new(3, 3, &[-2.0, -2.0, -2.0, -2.0, 32.0, -2.0, -2.0, -2.0, -2.0], 16.0)
}

/// Push every pixel away from a smoothed copy by `factor`.
pub fn enhance_sharpness(rgb: &RgbImage, factor: f32) -> RgbImage {
    let degenerate = convolve(rgb, &smooth_kernel(), Border::Preserve);
    blend(&degenerate, rgb, factor)
}

/// Fixed 3×3 sharpening pass; the one-pixel frame is left untouched.
pub fn sharpen(rgb: &RgbImage) -> RgbImage {
    convolve(rgb, &sharpen_kernel(), Border::Preserve)
}
