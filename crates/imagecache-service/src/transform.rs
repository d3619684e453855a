//! Resizing of images before they are cached.
//!
//! The [`ImageTransform`] trait is the seam to the image processing backend. [`RasterTransform`]
//! implements it with the pure Rust `image` crate.

use std::fmt;
use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use thiserror::Error;

use crate::config::TransformConfig;

/// An error transforming an image.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The image format could not be detected, or cannot be encoded.
    #[error("unsupported image format")]
    UnsupportedFormat,
    /// Decoding or encoding failed.
    #[error(transparent)]
    Image(#[from] image::ImageError),
    /// Reading the image data failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Target colorspace of a transformed image.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Colorspace {
    /// 8 bit per channel sRGB, with alpha if the source has it.
    #[default]
    Srgb,
}

/// Basic information about an encoded image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    /// MIME type of the detected format.
    pub mime_type: &'static str,
}

/// Parameters of [`ImageTransform::transform`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransformOptions {
    pub width: u32,
    pub height: u32,
    /// Encoding quality for lossy formats, between 1 and 100.
    pub quality: u8,
    pub colorspace: Colorspace,
    /// Whether to drop EXIF and other metadata.
    pub strip_metadata: bool,
    /// Whether to fit the image into `width`x`height` keeping its aspect ratio, rather than
    /// stretching it.
    pub embed: bool,
}

impl TransformOptions {
    /// Options producing a cache copy of an image with the given `metadata`.
    ///
    /// Images that fit into the configured maximum keep their size, all others are scaled
    /// down into it.
    pub fn for_cache(metadata: &ImageMetadata, config: &TransformConfig) -> Self {
        let fits = metadata.width <= config.max_width && metadata.height <= config.max_height;
        let (width, height) = if fits {
            (metadata.width, metadata.height)
        } else {
            (config.max_width, config.max_height)
        };

        Self {
            width,
            height,
            quality: config.quality,
            colorspace: Colorspace::Srgb,
            strip_metadata: true,
            embed: true,
        }
    }
}

/// An image processing backend.
///
/// Implementations are CPU bound and called from blocking threads.
pub trait ImageTransform: fmt::Debug + Send + Sync {
    /// Reads the dimensions and format of `data`.
    fn metadata(&self, data: &[u8]) -> Result<ImageMetadata, TransformError>;

    /// Re-encodes `data` in its own format according to `options`.
    fn transform(&self, data: &[u8], options: &TransformOptions)
    -> Result<Vec<u8>, TransformError>;
}

/// [`ImageTransform`] based on the `image` crate.
///
/// Supports JPEG, PNG, WebP and GIF. Metadata is always stripped, since re-encoding does not
/// carry it over.
#[derive(Clone, Copy, Debug, Default)]
pub struct RasterTransform;

impl ImageTransform for RasterTransform {
    fn metadata(&self, data: &[u8]) -> Result<ImageMetadata, TransformError> {
        let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
        let format = reader.format().ok_or(TransformError::UnsupportedFormat)?;
        let (width, height) = reader.into_dimensions()?;

        Ok(ImageMetadata {
            width,
            height,
            mime_type: format.to_mime_type(),
        })
    }

    fn transform(
        &self,
        data: &[u8],
        options: &TransformOptions,
    ) -> Result<Vec<u8>, TransformError> {
        let format = image::guess_format(data).map_err(|_| TransformError::UnsupportedFormat)?;
        let mut image = image::load_from_memory_with_format(data, format)?;

        if image.width() != options.width || image.height() != options.height {
            image = if options.embed {
                image.resize(options.width, options.height, FilterType::Lanczos3)
            } else {
                image.resize_exact(options.width, options.height, FilterType::Lanczos3)
            };
        }

        let image = match options.colorspace {
            Colorspace::Srgb if image.color().has_alpha() => {
                DynamicImage::ImageRgba8(image.to_rgba8())
            }
            Colorspace::Srgb => DynamicImage::ImageRgb8(image.to_rgb8()),
        };

        encode(&image, format, options.quality)
    }
}

fn encode(image: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>, TransformError> {
    let mut buffer = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
            // JPEG has no alpha channel.
            DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)?;
        }
        ImageFormat::Png | ImageFormat::WebP | ImageFormat::Gif => {
            image.write_to(&mut Cursor::new(&mut buffer), format)?;
        }
        _ => return Err(TransformError::UnsupportedFormat),
    }
    Ok(buffer)
}

/// Guesses the `Content-Type` of encoded image `data`.
pub fn content_type(data: &[u8]) -> &'static str {
    image::guess_format(data)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}
