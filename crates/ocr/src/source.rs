use image::{ColorType, DynamicImage};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Failure to obtain a usable raster. Fatal for the whole run.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
}

/// A decoded invoice photo, shared read-only by every variant.
///
/// The raster is reduced to 8-bit luma or 8-bit RGB on load; the encoded
/// bytes are kept for fingerprinting. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct SourceImage {
    raster: Arc<DynamicImage>,
    encoded: Arc<[u8]>,
}

impl SourceImage {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Decode JPEG / PNG / WEBP / … bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, SourceError> {
        let decoded = image::load_from_memory(data)?;
        let raster = Self::reduce_channels(decoded);
        if raster.width() == 0 || raster.height() == 0 {
            return Err(SourceError::EmptyImage { width: raster.width(), height: raster.height() });
        }
        Ok(Self { raster: Arc::new(raster), encoded: Arc::from(data) })
    }

    /// Wrap an already-decoded raster (tests, callers with their own decoder).
    pub fn from_image(img: DynamicImage) -> Result<Self, SourceError> {
        let raster = Self::reduce_channels(img);
        if raster.width() == 0 || raster.height() == 0 {
            return Err(SourceError::EmptyImage { width: raster.width(), height: raster.height() });
        }
        let mut encoded = Vec::new();
        raster.write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageFormat::Png)?;
        Ok(Self { raster: Arc::new(raster), encoded: Arc::from(encoded) })
    }

    fn reduce_channels(img: DynamicImage) -> DynamicImage {
        match img.color() {
            ColorType::L8 => img,
            ColorType::La8 | ColorType::L16 | ColorType::La16 => DynamicImage::ImageLuma8(img.to_luma8()),
            ColorType::Rgb8 => img,
            _ => DynamicImage::ImageRgb8(img.to_rgb8()),
        }
    }

    pub fn raster(&self) -> &DynamicImage {
        &self.raster
    }

    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    pub fn width(&self) -> u32 {
        self.raster.width()
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }

    /// 1 for luma, 3 for colour.
    pub fn channels(&self) -> u8 {
        self.raster.color().channel_count()
    }
}
