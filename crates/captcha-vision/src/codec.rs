//! Image decoding and re-encoding.
//!
//! Every payload is normalized into an [`ImageBuffer`]: canonical RGB8
//! pixels plus the detected container format. Buffers decoded from a payload
//! keep their source bytes so an untouched image re-encodes byte-for-byte.

use std::borrow::Cow;
use std::io::Cursor;
use std::sync::Arc;

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader, Limits, RgbImage};

use crate::types::{Dimensions, ImageKind, VisionError, VisionResult};

/// Default maximum accepted payload size (5 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Default maximum pixel count (4096 x 4096).
pub const DEFAULT_MAX_PIXELS: u64 = 4096 * 4096;

/// JPEG quality used when re-encoding processed images.
const JPEG_QUALITY: u8 = 90;

/// Limits applied while decoding an incoming payload.
#[derive(Debug, Clone)]
pub struct DecodeLimits {
    pub max_bytes: usize,
    /// Largest `width * height` decoded; checked against the header first.
    pub max_pixels: u64,
    pub accepted: Vec<ImageKind>,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_pixels: DEFAULT_MAX_PIXELS,
            accepted: ImageKind::ALL.to_vec(),
        }
    }
}

impl DecodeLimits {
    pub fn accepts(&self, kind: ImageKind) -> bool {
        self.accepted.contains(&kind)
    }
}

/// A decoded image. Cheap to clone; pixel data is shared.
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    pixels: Arc<RgbImage>,
    kind: ImageKind,
    channels: u8,
    source: Option<Arc<[u8]>>,
}

impl ImageBuffer {
    /// Build a buffer that was not decoded from a payload.
    pub fn from_pixels(pixels: RgbImage, kind: ImageKind) -> Self {
        Self {
            pixels: Arc::new(pixels),
            kind,
            channels: 3,
            source: None,
        }
    }

    /// A new buffer with the same format tag but different pixels.
    pub(crate) fn derive(&self, pixels: RgbImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
            kind: self.kind,
            channels: self.channels,
            source: None,
        }
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width(),
            height: self.height(),
        }
    }

    /// Channel count of the image as it was encoded in the source payload.
    ///
    /// Pixels are always held as RGB8, so this describes the source layout
    /// (1 for grayscale, 4 for RGBA) and not [`ImageBuffer::pixels`].
    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    /// The payload bytes this buffer was decoded from, if it is unmodified.
    pub fn source_bytes(&self) -> Option<&[u8]> {
        self.source.as_deref()
    }

    /// Encoded form in the buffer's own format.
    pub fn encode(&self) -> VisionResult<Cow<'_, [u8]>> {
        match &self.source {
            Some(bytes) => Ok(Cow::Borrowed(bytes)),
            None => self.encode_as(self.kind).map(Cow::Owned),
        }
    }

    /// Encode the pixels into the given format.
    pub fn encode_as(&self, kind: ImageKind) -> VisionResult<Vec<u8>> {
        let mut buf = Vec::new();
        let mut cursor = Cursor::new(&mut buf);
        match kind {
            ImageKind::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut cursor, JPEG_QUALITY);
                self.pixels.write_with_encoder(encoder)?;
            }
            ImageKind::Gif => {
                let rgba = DynamicImage::ImageRgb8((*self.pixels).clone()).to_rgba8();
                rgba.write_to(&mut cursor, kind.format())?;
            }
            _ => self.pixels.write_to(&mut cursor, kind.format())?,
        }
        Ok(buf)
    }

    /// Lossless PNG bytes, the form handed to recognition engines.
    pub fn encode_png(&self) -> VisionResult<Cow<'_, [u8]>> {
        match (&self.source, self.kind) {
            (Some(bytes), ImageKind::Png) => Ok(Cow::Borrowed(bytes)),
            _ => self.encode_as(ImageKind::Png).map(Cow::Owned),
        }
    }

    /// Base64 of [`ImageBuffer::encode`].
    pub fn encode_base64(&self) -> VisionResult<String> {
        let bytes = self.encode()?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes.as_ref()))
    }
}

/// Decode a base64 payload (optionally a `data:` URL) into an image.
pub fn decode_base64(data: &str, limits: &DecodeLimits) -> VisionResult<ImageBuffer> {
    let payload = strip_data_url(data.trim());
    let payload: Cow<'_, str> = if payload.bytes().any(|b| b.is_ascii_whitespace()) {
        Cow::Owned(payload.chars().filter(|c| !c.is_ascii_whitespace()).collect())
    } else {
        Cow::Borrowed(payload)
    };

    let estimated = decoded_len(&payload);
    if estimated > limits.max_bytes {
        return Err(VisionError::TooLarge {
            size: estimated,
            max: limits.max_bytes,
        });
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| VisionError::Encoding(format!("Invalid base64: {e}")))?;

    decode_bytes(bytes, limits)
}

/// Decode raw image bytes into an image.
pub fn decode_bytes(bytes: Vec<u8>, limits: &DecodeLimits) -> VisionResult<ImageBuffer> {
    if bytes.len() > limits.max_bytes {
        return Err(VisionError::TooLarge {
            size: bytes.len(),
            max: limits.max_bytes,
        });
    }

    let format = image::guess_format(&bytes)
        .map_err(|_| VisionError::UnsupportedFormat("unrecognized signature".to_string()))?;
    let kind = ImageKind::from_format(format)
        .ok_or_else(|| VisionError::UnsupportedFormat(format!("{format:?}")))?;
    if !limits.accepts(kind) {
        return Err(VisionError::UnsupportedFormat(kind.to_string()));
    }

    let (width, height) = ImageReader::with_format(Cursor::new(&bytes[..]), format).into_dimensions()?;
    if width == 0 || height == 0 {
        return Err(VisionError::EmptyImage);
    }
    let pixels = u64::from(width) * u64::from(height);
    if pixels > limits.max_pixels {
        return Err(VisionError::TooManyPixels {
            width,
            height,
            max: limits.max_pixels,
        });
    }

    // Hold the decoder to the dimensions the header promised.
    let mut decode_limits = Limits::default();
    decode_limits.max_image_width = Some(width);
    decode_limits.max_image_height = Some(height);
    let mut reader = ImageReader::with_format(Cursor::new(&bytes[..]), format);
    reader.limits(decode_limits);
    let decoded = reader.decode()?;

    tracing::debug!("Decoded {kind} image {width}x{height}, {} bytes", bytes.len());

    Ok(ImageBuffer {
        channels: decoded.color().channel_count(),
        pixels: Arc::new(decoded.to_rgb8()),
        kind,
        source: Some(Arc::from(bytes)),
    })
}

/// Drop a `data:image/...;base64,` prefix if present.
fn strip_data_url(data: &str) -> &str {
    if data.starts_with("data:") {
        if let Some((_, rest)) = data.split_once(',') {
            return rest;
        }
    }
    data
}

/// Exact decoded size of well-formed base64, computed without decoding.
fn decoded_len(payload: &str) -> usize {
    let padding = payload.bytes().rev().take_while(|&b| b == b'=').count();
    (payload.len() / 4 * 3 + payload.len() % 4 * 3 / 4).saturating_sub(padding)
}
