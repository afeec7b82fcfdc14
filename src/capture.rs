//! Still-frame capture.
//!
//! A [`CaptureSurface`] is sized once per run from the source's native
//! dimensions and turns the source's current decoded picture into a
//! self-contained JPEG [`EncodedImage`].

use std::{
    borrow::Cow,
    fmt::{Debug, Formatter, Result as FmtResult},
    sync::Arc,
};

use image::{RgbImage, codecs::jpeg::JpegEncoder, imageops::FilterType};

use crate::{error::FramecastError, source::MediaSource};

/// MIME type of every captured frame.
pub const JPEG_MIME_TYPE: &str = "image/jpeg";

/// An encoded still image.
///
/// The bytes live behind an [`Arc`], so cloning is cheap and the payload is
/// immutable once created.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    bytes: Arc<[u8]>,
    mime_type: &'static str,
    width: u32,
    height: u32,
}

impl Debug for EncodedImage {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("EncodedImage")
            .field("mime_type", &self.mime_type)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl EncodedImage {
    /// Wrap already-encoded JPEG bytes.
    pub fn jpeg(bytes: impl Into<Arc<[u8]>>, width: u32, height: u32) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: JPEG_MIME_TYPE,
            width,
            height,
        }
    }

    /// The encoded bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// MIME type of the encoding.
    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Size of the encoded payload in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A pixel-capture surface sized to the source's native resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSurface {
    width: u32,
    height: u32,
    quality: u8,
}

impl CaptureSurface {
    /// Acquire a surface of `width` x `height` pixels encoding at JPEG
    /// `quality` (clamped to `1..=100`).
    ///
    /// # Errors
    ///
    /// Returns [`FramecastError::CaptureSurface`] if either dimension is
    /// zero, which means the source never produced usable video metadata.
    pub fn acquire(width: u32, height: u32, quality: u8) -> Result<Self, FramecastError> {
        if width == 0 || height == 0 {
            return Err(FramecastError::CaptureSurface(format!(
                "source reports {width}x{height} pixels"
            )));
        }

        Ok(Self {
            width,
            height,
            quality: quality.clamp(1, 100),
        })
    }

    /// Surface width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Surface height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Capture the source's current picture.
    ///
    /// Pictures delivered at a different size are rescaled to the surface.
    ///
    /// # Errors
    ///
    /// Returns [`FramecastError::CaptureSurface`] if no seek has completed
    /// yet, or [`FramecastError::Image`] if JPEG encoding fails.
    pub fn capture<S: MediaSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<EncodedImage, FramecastError> {
        let picture = source.current_picture().ok_or_else(|| {
            FramecastError::CaptureSurface(
                "no decoded picture; capture must follow a completed seek".to_string(),
            )
        })?;
        self.encode(picture)
    }

    /// Encode an RGB picture at the surface's size and quality.
    pub fn encode(&self, picture: &RgbImage) -> Result<EncodedImage, FramecastError> {
        let picture: Cow<'_, RgbImage> = if picture.dimensions() == (self.width, self.height) {
            Cow::Borrowed(picture)
        } else {
            log::debug!(
                "Rescaling {}x{} picture to {}x{}",
                picture.width(),
                picture.height(),
                self.width,
                self.height,
            );
            Cow::Owned(image::imageops::resize(
                picture,
                self.width,
                self.height,
                FilterType::Triangle,
            ))
        };

        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, self.quality).encode_image(picture.as_ref())?;

        Ok(EncodedImage::jpeg(bytes, self.width, self.height))
    }
}
