use std::borrow::Cow;
use std::io::Cursor;

use clap::ValueEnum;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageEncoder, ImageReader, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CodecError;
use crate::formats::ImageFormatKind;
use crate::pipeline::{carried_png_chunks, splice_png_chunks, strip_policy};

/// Decoded pixels plus whatever metadata can be carried into an output.
#[derive(Debug, Clone)]
pub struct Raster {
    pub image: DynamicImage,
    pub source_format: Option<ImageFormatKind>,
    pub icc_profile: Option<Vec<u8>>,
    pub png_chunks: Vec<Vec<u8>>,
}

impl Raster {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            source_format: None,
            icc_profile: None,
            png_chunks: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ResizeFilter {
    #[default]
    Lanczos3,
    CatmullRom,
    Triangle,
}

impl From<ResizeFilter> for FilterType {
    fn from(filter: ResizeFilter) -> Self {
        match filter {
            ResizeFilter::Lanczos3 => FilterType::Lanczos3,
            ResizeFilter::CatmullRom => FilterType::CatmullRom,
            ResizeFilter::Triangle => FilterType::Triangle,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct EncodeSettings {
    pub format: ImageFormatKind,
    pub quality: u8,
    pub keep_metadata: bool,
    /// Extra lossless pass for PNG output.
    pub optimize: bool,
}

/// Decode, resample and re-encode capability the pipeline is built on.
pub trait ImageCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Raster, CodecError>;

    fn resize(&self, raster: Raster, width: u32, height: u32, filter: ResizeFilter) -> Raster;

    fn encode(&self, raster: &Raster, settings: &EncodeSettings) -> Result<Vec<u8>, CodecError>;
}

/// `image`-crate backed codec, with oxipng for optimized PNG output.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterCodec;

impl RasterCodec {
    pub fn new() -> Self {
        Self
    }
}

impl ImageCodec for RasterCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Raster, CodecError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|err| CodecError::Decode(err.to_string()))?;
        let source_format = reader.format().and_then(ImageFormatKind::from_image_format);

        let mut decoder = reader
            .into_decoder()
            .map_err(|err| CodecError::Decode(err.to_string()))?;
        let icc_profile = decoder.icc_profile().unwrap_or_else(|err| {
            debug!(error = %err, "ignoring unreadable ICC profile");
            None
        });
        let image =
            DynamicImage::from_decoder(decoder).map_err(|err| CodecError::Decode(err.to_string()))?;

        let png_chunks = if source_format == Some(ImageFormatKind::Png) {
            carried_png_chunks(bytes)
        } else {
            Vec::new()
        };

        Ok(Raster {
            image,
            source_format,
            icc_profile,
            png_chunks,
        })
    }

    fn resize(&self, raster: Raster, width: u32, height: u32, filter: ResizeFilter) -> Raster {
        let image = raster.image.resize_exact(width, height, filter.into());
        Raster { image, ..raster }
    }

    fn encode(&self, raster: &Raster, settings: &EncodeSettings) -> Result<Vec<u8>, CodecError> {
        let image = prepare_for(settings.format, &raster.image);
        let icc_profile = if settings.keep_metadata {
            raster.icc_profile.clone()
        } else {
            None
        };

        let mut buffer = Vec::new();
        let written = match settings.format {
            ImageFormatKind::Jpeg => {
                let mut encoder = JpegEncoder::new_with_quality(&mut buffer, settings.quality.clamp(1, 100));
                attach_icc_profile(&mut encoder, icc_profile);
                image.write_with_encoder(encoder)
            }
            ImageFormatKind::Png => {
                let mut encoder =
                    PngEncoder::new_with_quality(&mut buffer, CompressionType::Best, PngFilter::Adaptive);
                attach_icc_profile(&mut encoder, icc_profile);
                image.write_with_encoder(encoder)
            }
            ImageFormatKind::Webp if settings.quality < 100 => {
                if icc_profile.is_some() {
                    debug!("lossy WebP output does not carry the ICC profile");
                }
                buffer = encode_lossy_webp(&image, settings.quality)?;
                Ok(())
            }
            ImageFormatKind::Webp => {
                let mut encoder = WebPEncoder::new_lossless(&mut buffer);
                attach_icc_profile(&mut encoder, icc_profile);
                image.write_with_encoder(encoder)
            }
            other => image.write_to(&mut Cursor::new(&mut buffer), other.image_format()),
        };
        written.map_err(|err| CodecError::Encode(err.to_string()))?;

        if settings.format == ImageFormatKind::Png {
            buffer = finish_png(buffer, raster, settings)?;
        }

        Ok(buffer)
    }
}

/// libwebp lossy encode. `prepare_for` guarantees 8-bit RGB or RGBA.
fn encode_lossy_webp(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, CodecError> {
    let (width, height) = (image.width(), image.height());
    let encoder = match image {
        DynamicImage::ImageRgba8(pixels) => webp::Encoder::from_rgba(pixels.as_raw(), width, height),
        DynamicImage::ImageRgb8(pixels) => webp::Encoder::from_rgb(pixels.as_raw(), width, height),
        other => {
            return Err(CodecError::Encode(format!(
                "no WebP layout for {:?} pixels",
                other.color()
            )));
        }
    };
    encoder
        .encode_simple(false, f32::from(quality))
        .map(|memory| memory.to_vec())
        .map_err(|err| CodecError::Encode(format!("encoding WebP: {err:?}")))
}

fn attach_icc_profile<E: ImageEncoder>(encoder: &mut E, icc_profile: Option<Vec<u8>>) {
    if let Some(profile) = icc_profile {
        if let Err(err) = encoder.set_icc_profile(profile) {
            debug!(error = %err, "encoder cannot embed ICC profile");
        }
    }
}

fn finish_png(
    encoded: Vec<u8>,
    raster: &Raster,
    settings: &EncodeSettings,
) -> Result<Vec<u8>, CodecError> {
    let encoded = if settings.keep_metadata && !raster.png_chunks.is_empty() {
        splice_png_chunks(&encoded, &raster.png_chunks)
    } else {
        encoded
    };

    if !settings.optimize {
        return Ok(encoded);
    }

    let mut options = oxipng::Options::from_preset(2);
    options.strip = strip_policy(settings.keep_metadata);
    oxipng::optimize_from_memory(&encoded, &options)
        .map_err(|err| CodecError::Encode(format!("optimizing PNG: {err}")))
}

/// Converts pixels into a layout the target encoder accepts.
fn prepare_for(format: ImageFormatKind, image: &DynamicImage) -> Cow<'_, DynamicImage> {
    let has_alpha = image.color().has_alpha();
    if !format.supports_alpha() {
        return if has_alpha {
            Cow::Owned(flatten_onto_white(image))
        } else if matches!(image, DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_)) {
            Cow::Borrowed(image)
        } else {
            Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8()))
        };
    }

    match format {
        ImageFormatKind::Webp => match image {
            DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => Cow::Borrowed(image),
            _ if has_alpha => Cow::Owned(DynamicImage::ImageRgba8(image.to_rgba8())),
            _ => Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8())),
        },
        ImageFormatKind::Gif | ImageFormatKind::Ico => match image {
            DynamicImage::ImageRgba8(_) => Cow::Borrowed(image),
            _ => Cow::Owned(DynamicImage::ImageRgba8(image.to_rgba8())),
        },
        _ => Cow::Borrowed(image),
    }
}

fn flatten_onto_white(image: &DynamicImage) -> DynamicImage {
    let rgba = image.to_rgba8();
    let flattened = RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = u32::from(a);
        let blend = |channel: u8| ((u32::from(channel) * alpha + 255 * (255 - alpha)) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    });
    DynamicImage::ImageRgb8(flattened)
}
