//! Image normalization applied before any pixel leaves the process.
//!
//! [`preprocess`] shrinks an image so neither side exceeds a configured
//! maximum, flattens transparency onto a solid background and returns the
//! [`ScaleTransform`] that relates the two coordinate spaces.

use grasp_common::{GeometryError, ScaleTransform};
use image::{
    DynamicImage, GenericImageView, ImageError, Rgb, RgbImage, codecs::jpeg::JpegEncoder,
    imageops::FilterType,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub type Result<T> = std::result::Result<T, PreprocessError>;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Unsupported or undecodable image: {0}")]
    UnsupportedFormat(#[source] ImageError),

    #[error("Invalid image dimensions {width}x{height}: both must be non-zero")]
    InvalidDimension { width: u32, height: u32 },

    #[error("Invalid max dimension {0}: must be non-zero")]
    InvalidMaxDimension(u32),

    #[error("Failed to encode preprocessed image: {0}")]
    Encode(#[source] ImageError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Preprocessing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Upper bound for both the width and the height of the output
    pub max_dimension: u32,
    /// Colour that transparent pixels are composited onto
    pub background: [u8; 3],
    /// JPEG quality used when encoding for transport
    pub jpeg_quality: u8,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1024,
            background: [255, 255, 255],
            jpeg_quality: 85,
        }
    }
}

/// An RGB image bounded by the configured maximum, plus its transform
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    pub image: RgbImage,
    pub transform: ScaleTransform,
}

impl PreprocessedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Encode as JPEG for transport to a remote model
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
        self.image
            .write_with_encoder(encoder)
            .map_err(PreprocessError::Encode)?;

        debug!(
            width = self.width(),
            height = self.height(),
            bytes = buffer.len(),
            "Encoded preprocessed image"
        );
        Ok(buffer)
    }
}

/// Decode raw bytes and preprocess them
pub fn preprocess_bytes(bytes: &[u8], config: &PreprocessConfig) -> Result<PreprocessedImage> {
    let image = image::load_from_memory(bytes).map_err(PreprocessError::UnsupportedFormat)?;
    preprocess(&image, config)
}

/// Normalize `raw` to a bounded RGB image.
///
/// Images already within bounds are copied unchanged and get an identity
/// transform.
pub fn preprocess(raw: &DynamicImage, config: &PreprocessConfig) -> Result<PreprocessedImage> {
    let (original_width, original_height) = raw.dimensions();
    if original_width == 0 || original_height == 0 {
        return Err(PreprocessError::InvalidDimension {
            width: original_width,
            height: original_height,
        });
    }
    if config.max_dimension == 0 {
        return Err(PreprocessError::InvalidMaxDimension(config.max_dimension));
    }

    let rgb = flatten_to_rgb(raw, config.background);
    let (target_width, target_height) =
        fit_within(original_width, original_height, config.max_dimension);

    let image = if (target_width, target_height) == (original_width, original_height) {
        rgb
    } else {
        image::imageops::resize(&rgb, target_width, target_height, FilterType::Lanczos3)
    };

    let transform = ScaleTransform::new(
        (original_width, original_height),
        (target_width, target_height),
    )?;

    debug!(
        original = ?(original_width, original_height),
        preprocessed = ?(target_width, target_height),
        scale_x = transform.scale_x,
        scale_y = transform.scale_y,
        "Preprocessed image"
    );

    Ok(PreprocessedImage { image, transform })
}

/// Largest size with the same aspect ratio whose sides are all `<= max_dimension`
pub fn fit_within(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    if width <= max_dimension && height <= max_dimension {
        return (width, height);
    }

    if width >= height {
        let scaled = (height as f64 * max_dimension as f64 / width as f64) as u32;
        (max_dimension, scaled.max(1))
    } else {
        let scaled = (width as f64 * max_dimension as f64 / height as f64) as u32;
        (scaled.max(1), max_dimension)
    }
}

/// Convert to 8-bit RGB, compositing any alpha channel onto `background`
fn flatten_to_rgb(image: &DynamicImage, background: [u8; 3]) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let mut rgb = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = pixel[3] as f32 / 255.0;
        let blend = |channel: usize| {
            (pixel[channel] as f32 * alpha + background[channel] as f32 * (1.0 - alpha)).round() as u8
        };
        rgb.put_pixel(x, y, Rgb([blend(0), blend(1), blend(2)]));
    }
    rgb
}
