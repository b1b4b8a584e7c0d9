use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageFormat, ImageReader};
use thiserror::Error;

use crate::stage::{Asset, Transform};

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),
}

/// Re-encodes raster images to make them smaller. PNG files get the best
/// lossless compression, JPEG files are re-encoded at a fixed quality.
/// Anything else, and any image that would grow, is left as it is.
#[derive(Debug, Clone, Copy)]
pub struct ImageOptimize {
    jpeg_quality: u8,
}

impl ImageOptimize {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    fn optimize(&self, format: ImageFormat, data: &[u8]) -> Result<Option<Vec<u8>>, ImageError> {
        let mut out = Vec::new();

        match format {
            ImageFormat::Png => {
                let img = decode(data, format)?;
                img.write_with_encoder(PngEncoder::new_with_quality(
                    &mut out,
                    CompressionType::Best,
                    FilterType::Adaptive,
                ))?;
            }
            ImageFormat::Jpeg => {
                let img = decode(data, format)?;
                img.write_with_encoder(JpegEncoder::new_with_quality(&mut out, self.jpeg_quality))?;
            }
            _ => return Ok(None),
        }

        Ok((out.len() < data.len()).then_some(out))
    }
}

impl Default for ImageOptimize {
    fn default() -> Self {
        Self::new(80)
    }
}

impl Transform for ImageOptimize {
    fn name(&self) -> &str {
        "image-optimize"
    }

    fn apply(&self, asset: Asset) -> anyhow::Result<Option<Asset>> {
        let Ok(format) = ImageFormat::from_path(&asset.path) else {
            return Ok(Some(asset));
        };

        Ok(Some(match self.optimize(format, &asset.data)? {
            Some(data) => asset.with_data(data),
            None => asset,
        }))
    }
}

/// Converts raster images to lossless WebP. Vector images, WebP files and
/// anything that isn't an image are dropped from the chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebP;

impl WebP {
    fn is_raster(format: ImageFormat) -> bool {
        matches!(
            format,
            ImageFormat::Png
                | ImageFormat::Jpeg
                | ImageFormat::Gif
                | ImageFormat::Bmp
                | ImageFormat::Tiff
        )
    }
}

impl Transform for WebP {
    fn name(&self) -> &str {
        "webp"
    }

    fn apply(&self, asset: Asset) -> anyhow::Result<Option<Asset>> {
        let format = match ImageFormat::from_path(&asset.path) {
            Ok(format) if Self::is_raster(format) => format,
            _ => return Ok(None),
        };

        let img = decode(&asset.data, format)?;
        let rgba = img.to_rgba8();

        let mut out = Vec::new();
        WebPEncoder::new_lossless(&mut out)
            .encode(&rgba, rgba.width(), rgba.height(), ExtendedColorType::Rgba8)
            .map_err(ImageError::from)?;

        Ok(Some(asset.with_data(out).with_extension("webp")))
    }
}

fn decode(data: &[u8], format: ImageFormat) -> Result<DynamicImage, ImageError> {
    let mut reader = ImageReader::new(Cursor::new(data));
    reader.set_format(format);
    Ok(reader.decode()?)
}
