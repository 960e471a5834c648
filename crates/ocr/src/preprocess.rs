use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

use crate::raster;
use crate::source::SourceImage;

/// A preprocessing transform could not be computed. Skips one variant only.
#[derive(Debug, Error)]
pub enum VariantError {
    #[error("{variant}: upscaled raster {width}x{height} exceeds the {limit} pixel limit")]
    TooLarge { variant: Variant, width: u64, height: u64, limit: u64 },
    #[error("{variant}: failed to encode processed image: {message}")]
    Encode { variant: Variant, message: String },
}

/// One deterministic image-enhancement strategy. Pure function of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Identity.
    Original,
    /// ×4 Lanczos, equalize, blur, adaptive binarization, close 2×1, open 2×2.
    EnhancedInvoice,
    /// ×6 bicubic, 5×5 sharpen, Otsu binarization.
    SuperResolution,
    /// ×3 bicubic, gain 3.0, fixed threshold 200.
    ExtremeContrast,
    /// ×4 Lanczos on RGB, contrast 2.5, sharpness 3.0, sharpen pass, luma.
    PilAdvanced,
}

impl Variant {
    /// Enumeration order; earlier variants win score ties.
    pub const ALL: [Variant; 5] = [
        Variant::PilAdvanced,
        Variant::EnhancedInvoice,
        Variant::SuperResolution,
        Variant::ExtremeContrast,
        Variant::Original,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Variant::Original => "original",
            Variant::EnhancedInvoice => "enhanced_invoice",
            Variant::SuperResolution => "super_resolution",
            Variant::ExtremeContrast => "extreme_contrast",
            Variant::PilAdvanced => "pil_advanced",
        }
    }

    pub fn scale_factor(self) -> u32 {
        match self {
            Variant::Original => 1,
            Variant::EnhancedInvoice | Variant::PilAdvanced => 4,
            Variant::SuperResolution => 6,
            Variant::ExtremeContrast => 3,
        }
    }

    /// Produce this variant's raster. The source is never modified.
    pub fn apply(self, source: &SourceImage, max_pixels: u64) -> Result<DynamicImage, VariantError> {
        let (w, h) = self.output_size(source.width(), source.height(), max_pixels)?;
        let img = source.raster();
        Ok(match self {
            Variant::Original => img.clone(),
            Variant::EnhancedInvoice => DynamicImage::ImageLuma8(enhanced_invoice(img, w, h)),
            Variant::SuperResolution => DynamicImage::ImageLuma8(super_resolution(img, w, h)),
            Variant::ExtremeContrast => DynamicImage::ImageLuma8(extreme_contrast(img, w, h)),
            Variant::PilAdvanced => DynamicImage::ImageLuma8(pil_advanced(img, w, h)),
        })
    }

    /// Dimensions of this variant for a `width`×`height` source, if within `max_pixels`.
    pub fn output_size(self, width: u32, height: u32, max_pixels: u64) -> Result<(u32, u32), VariantError> {
        let k = u64::from(self.scale_factor());
        let (w, h) = (u64::from(width) * k, u64::from(height) * k);
        match (u32::try_from(w), u32::try_from(h)) {
            (Ok(out_w), Ok(out_h)) if w.saturating_mul(h) <= max_pixels => Ok((out_w, out_h)),
            _ => Err(VariantError::TooLarge { variant: self, width: w, height: h, limit: max_pixels }),
        }
    }

    /// `apply` followed by PNG encoding, the form handed to the OCR engine.
    pub fn render_png(self, source: &SourceImage, max_pixels: u64) -> Result<Vec<u8>, VariantError> {
        let img = self.apply(source, max_pixels)?;
        encode_as_png(&img).map_err(|e| VariantError::Encode { variant: self, message: e.to_string() })
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Variant {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Variant::ALL
            .into_iter()
            .find(|v| v.name() == s)
            .ok_or_else(|| format!("Unknown preprocessing variant: '{s}'"))
    }
}

/// Luminance with BT.601 weights; single-channel input passes through.
fn gray_601(img: &DynamicImage) -> GrayImage {
    match img {
        DynamicImage::ImageLuma8(gray) => gray.clone(),
        other => raster::luma_601(&other.to_rgb8()),
    }
}

fn enhanced_invoice(img: &DynamicImage, w: u32, h: u32) -> GrayImage {
    let gray = gray_601(&img.resize_exact(w, h, FilterType::Lanczos3));
    let gray = raster::equalize_histogram(&gray);
    let gray = raster::gaussian_blur(&gray, 3);
    let binary = raster::adaptive_threshold_gaussian(&gray, 15, 8);
    // Bridge broken strokes, then drop speckle.
    let binary = raster::close(&binary, 2, 1);
    raster::open(&binary, 2, 2)
}

fn super_resolution(img: &DynamicImage, w: u32, h: u32) -> GrayImage {
    #[rustfmt::skip]
    let weights = [
        -1.0, -1.0, -1.0, -1.0, -1.0,
        -1.0,  2.0,  2.0,  2.0, -1.0,
        -1.0,  2.0,  8.0,  2.0, -1.0,
        -1.0,  2.0,  2.0,  2.0, -1.0,
        -1.0, -1.0, -1.0, -1.0, -1.0,
    ];
    let kernel = raster::Kernel::new(5, 5, &weights, 8.0);
    let upscaled = img.resize_exact(w, h, FilterType::CatmullRom);
    let gray = match upscaled {
        DynamicImage::ImageLuma8(gray) => raster::convolve(&gray, &kernel, raster::Border::Reflect101),
        other => raster::luma_601(&raster::convolve(&other.to_rgb8(), &kernel, raster::Border::Reflect101)),
    };
    raster::otsu_threshold(&gray)
}

fn extreme_contrast(img: &DynamicImage, w: u32, h: u32) -> GrayImage {
    let gray = gray_601(&img.resize_exact(w, h, FilterType::CatmullRom));
    let stretched = raster::scale_saturate(&gray, 3.0);
    raster::threshold(&stretched, 200)
}

fn pil_advanced(img: &DynamicImage, w: u32, h: u32) -> GrayImage {
    let rgb = img.resize_exact(w, h, FilterType::Lanczos3).to_rgb8();
    let rgb = raster::enhance_contrast(&rgb, 2.5);
    let rgb = raster::enhance_sharpness(&rgb, 3.0);
    let rgb = raster::sharpen(&rgb);
    raster::luma_601(&rgb)
}

pub fn encode_as_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}
