use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{ImageDecoder, ImageReader};
use serde::Serialize;

use crate::error::{CodecError, EngineError};
use crate::formats::ImageFormatKind;
use crate::pipeline::png_chunk_names;

/// Header-level facts about one image, read without a full decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub path: PathBuf,
    pub format: Option<ImageFormatKind>,
    pub width: u32,
    pub height: u32,
    pub color: String,
    pub has_alpha: bool,
    pub has_icc_profile: bool,
    pub has_exif: bool,
    pub file_size: u64,
    /// Chunk names in file order, PNG only.
    pub png_chunks: Vec<String>,
}

impl ImageInfo {
    pub fn megapixels(&self) -> f64 {
        f64::from(self.width) * f64::from(self.height) / 1_000_000.0
    }
}

pub fn inspect(path: &Path) -> Result<ImageInfo, EngineError> {
    let bytes = fs::read(path).map_err(|source| EngineError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let codec_error = |message: String| EngineError::Codec {
        path: path.to_path_buf(),
        source: CodecError::Decode(message),
    };

    let reader = ImageReader::new(Cursor::new(bytes.as_slice()))
        .with_guessed_format()
        .map_err(|err| codec_error(err.to_string()))?;
    let format = reader.format().and_then(ImageFormatKind::from_image_format);
    let mut decoder = reader
        .into_decoder()
        .map_err(|err| codec_error(err.to_string()))?;

    let (width, height) = decoder.dimensions();
    let color = decoder.color_type();
    let has_icc_profile = matches!(decoder.icc_profile(), Ok(Some(_)));

    let chunk_names = if format == Some(ImageFormatKind::Png) {
        png_chunk_names(&bytes)
    } else {
        Vec::new()
    };
    let has_exif = match format {
        Some(ImageFormatKind::Png) => chunk_names.iter().any(|name| name == b"eXIf"),
        Some(ImageFormatKind::Webp) => contains(&bytes, b"EXIF"),
        _ => contains(&bytes, b"Exif\0\0"),
    };

    Ok(ImageInfo {
        path: path.to_path_buf(),
        format,
        width,
        height,
        color: format!("{color:?}"),
        has_alpha: color.has_alpha(),
        has_icc_profile,
        has_exif,
        file_size: bytes.len() as u64,
        png_chunks: chunk_names
            .iter()
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .collect(),
    })
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
