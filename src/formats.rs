use std::fmt;
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormatKind {
    Png,
    Jpeg,
    Webp,
    Bmp,
    Gif,
    Tiff,
    Ico,
}

impl ImageFormatKind {
    pub const ALL: [ImageFormatKind; 7] = [
        ImageFormatKind::Png,
        ImageFormatKind::Jpeg,
        ImageFormatKind::Webp,
        ImageFormatKind::Bmp,
        ImageFormatKind::Gif,
        ImageFormatKind::Tiff,
        ImageFormatKind::Ico,
    ];

    /// Extension written for outputs of this format.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormatKind::Png => "png",
            ImageFormatKind::Jpeg => "jpg",
            ImageFormatKind::Webp => "webp",
            ImageFormatKind::Bmp => "bmp",
            ImageFormatKind::Gif => "gif",
            ImageFormatKind::Tiff => "tiff",
            ImageFormatKind::Ico => "ico",
        }
    }

    /// Every extension recognised as this format on input.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            ImageFormatKind::Png => &["png"],
            ImageFormatKind::Jpeg => &["jpg", "jpeg"],
            ImageFormatKind::Webp => &["webp"],
            ImageFormatKind::Bmp => &["bmp"],
            ImageFormatKind::Gif => &["gif"],
            ImageFormatKind::Tiff => &["tiff", "tif"],
            ImageFormatKind::Ico => &["ico"],
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|format| {
            format
                .extensions()
                .iter()
                .any(|candidate| ext.eq_ignore_ascii_case(candidate))
        })
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Png => Some(ImageFormatKind::Png),
            image::ImageFormat::Jpeg => Some(ImageFormatKind::Jpeg),
            image::ImageFormat::WebP => Some(ImageFormatKind::Webp),
            image::ImageFormat::Bmp => Some(ImageFormatKind::Bmp),
            image::ImageFormat::Gif => Some(ImageFormatKind::Gif),
            image::ImageFormat::Tiff => Some(ImageFormatKind::Tiff),
            image::ImageFormat::Ico => Some(ImageFormatKind::Ico),
            _ => None,
        }
    }

    pub fn image_format(self) -> image::ImageFormat {
        match self {
            ImageFormatKind::Png => image::ImageFormat::Png,
            ImageFormatKind::Jpeg => image::ImageFormat::Jpeg,
            ImageFormatKind::Webp => image::ImageFormat::WebP,
            ImageFormatKind::Bmp => image::ImageFormat::Bmp,
            ImageFormatKind::Gif => image::ImageFormat::Gif,
            ImageFormatKind::Tiff => image::ImageFormat::Tiff,
            ImageFormatKind::Ico => image::ImageFormat::Ico,
        }
    }

    /// Whether the encoder honours the quality setting.
    pub fn supports_quality(self) -> bool {
        matches!(self, ImageFormatKind::Jpeg | ImageFormatKind::Webp)
    }

    pub fn supports_alpha(self) -> bool {
        !matches!(self, ImageFormatKind::Jpeg | ImageFormatKind::Bmp)
    }
}

impl fmt::Display for ImageFormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ImageFormatKind::Png => "PNG",
            ImageFormatKind::Jpeg => "JPEG",
            ImageFormatKind::Webp => "WebP",
            ImageFormatKind::Bmp => "BMP",
            ImageFormatKind::Gif => "GIF",
            ImageFormatKind::Tiff => "TIFF",
            ImageFormatKind::Ico => "ICO",
        };
        f.write_str(label)
    }
}

/// Which input formats a scan yields.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
pub enum InputFilter {
    /// Every supported format except ICO.
    #[default]
    All,
    Only(ImageFormatKind),
}

impl InputFilter {
    pub fn matches(self, format: ImageFormatKind) -> bool {
        match self {
            InputFilter::All => format != ImageFormatKind::Ico,
            InputFilter::Only(only) => only == format,
        }
    }
}
