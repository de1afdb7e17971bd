//! Core data types for decoded images, preprocessing and recognition.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use image::ImageFormat;
use serde::{Deserialize, Serialize};

/// Image container formats the codec can detect and re-encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Png,
    Jpeg,
    Gif,
    Bmp,
    Webp,
}

impl ImageKind {
    pub const ALL: [ImageKind; 5] = [
        ImageKind::Png,
        ImageKind::Jpeg,
        ImageKind::Gif,
        ImageKind::Bmp,
        ImageKind::Webp,
    ];

    /// Map a detected `image` crate format onto a supported tag.
    pub fn from_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Png => Some(ImageKind::Png),
            ImageFormat::Jpeg => Some(ImageKind::Jpeg),
            ImageFormat::Gif => Some(ImageKind::Gif),
            ImageFormat::Bmp => Some(ImageKind::Bmp),
            ImageFormat::WebP => Some(ImageKind::Webp),
            _ => None,
        }
    }

    pub fn format(self) -> ImageFormat {
        match self {
            ImageKind::Png => ImageFormat::Png,
            ImageKind::Jpeg => ImageFormat::Jpeg,
            ImageKind::Gif => ImageFormat::Gif,
            ImageKind::Bmp => ImageFormat::Bmp,
            ImageKind::Webp => ImageFormat::WebP,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageKind::Png => "png",
            ImageKind::Jpeg => "jpeg",
            ImageKind::Gif => "gif",
            ImageKind::Bmp => "bmp",
            ImageKind::Webp => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Gif => "image/gif",
            ImageKind::Bmp => "image/bmp",
            ImageKind::Webp => "image/webp",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageKind {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(ImageKind::Png),
            "jpeg" | "jpg" => Ok(ImageKind::Jpeg),
            "gif" => Ok(ImageKind::Gif),
            "bmp" => Ok(ImageKind::Bmp),
            "webp" => Ok(ImageKind::Webp),
            other => Err(VisionError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// A preprocessing stage.
///
/// The derived `Ord` is the canonical execution order: stages always run as
/// `denoise → enhance → resize` no matter how a caller lists them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Denoise,
    Enhance,
    Resize,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Denoise, Operation::Enhance, Operation::Resize];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Denoise => "denoise",
            Operation::Enhance => "enhance",
            Operation::Resize => "resize",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Operation::Denoise => "Median filter to remove speckle and salt noise",
            Operation::Enhance => "Contrast boost followed by sharpening",
            Operation::Resize => "Scale down to fit the maximum dimensions, keeping aspect ratio",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "denoise" => Ok(Operation::Denoise),
            "enhance" => Ok(Operation::Enhance),
            "resize" => Ok(Operation::Resize),
            other => Err(VisionError::InvalidInput(format!(
                "Unknown operation: {other}"
            ))),
        }
    }
}

/// Width and height of an image in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Output of a recognition adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub text: String,
    /// Adapter certainty, expected in `[0, 1]`.
    pub confidence: f64,
    pub elapsed: Duration,
}

/// Errors that can occur in the vision library.
#[derive(thiserror::Error, Debug)]
pub enum VisionError {
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload too large: {size} bytes exceeds {max} bytes")]
    TooLarge { size: usize, max: usize },

    #[error("Image too large: {width}x{height} exceeds {max} pixels")]
    TooManyPixels { width: u32, height: u32, max: u64 },

    #[error("Invalid encoding: {0}")]
    Encoding(String),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Image has no pixels")]
    EmptyImage,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Pipeline stage {stage} failed: {reason}")]
    Pipeline { stage: Operation, reason: String },

    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Recognition timed out after {0:?}")]
    Timeout(Duration),

    #[error("Model not available: {0}")]
    ModelNotAvailable(String),
}

impl VisionError {
    /// Whether the failure belongs to the recognition side rather than the image side.
    pub fn is_recognition(&self) -> bool {
        matches!(
            self,
            VisionError::Recognition(_) | VisionError::Timeout(_) | VisionError::ModelNotAvailable(_)
        )
    }
}

/// Convenience result type.
pub type VisionResult<T> = Result<T, VisionError>;
