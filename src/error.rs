//! Error types for the `framecast` crate.
//!
//! This module defines [`FramecastError`], the unified error type returned by
//! all fallible operations in the crate. Variants are split into two groups:
//! run-level failures that abort an extraction or generation run, and
//! per-item failures that the generation pipeline records on a single
//! [`GenerationItem`](crate::GenerationItem) before moving on.

use std::{fmt::Display, io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// Why an artifact download failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// The service answered 404. This usually means the artifact expired or
    /// the API key in use is not allowed to read it.
    NotFound,
    /// Any other non-success status or transport failure.
    Transport,
}

impl Display for FetchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchKind::NotFound => write!(f, "not found"),
            FetchKind::Transport => write!(f, "transport"),
        }
    }
}

/// The unified error type for all `framecast` operations.
///
/// Every public method that can fail returns `Result<T, FramecastError>`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FramecastError {
    /// A required input was missing or out of range. No run is started.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The media file could not be opened or its metadata never loaded.
    #[error("Failed to load media file at {path}: {reason}")]
    MediaLoad {
        /// Path that was passed to the opener.
        path: PathBuf,
        /// Underlying reason the load failed.
        reason: String,
    },

    /// No capture surface could be acquired for the decoded picture.
    #[error("Capture surface unavailable: {0}")]
    CaptureSurface(String),

    /// No usable credential for the generative service.
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// The image-understanding service failed to caption a frame.
    #[error("Description failed: {0}")]
    Description(String),

    /// The video-generation job could not be submitted or finished badly.
    #[error("Video generation failed: {0}")]
    Generation(String),

    /// The generated artifact could not be downloaded.
    #[error("Failed to fetch generated video ({kind}): {message}")]
    Fetch {
        /// Classification of the failure.
        kind: FetchKind,
        /// Human-readable detail.
        message: String,
    },

    /// The operation was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// An error from the `image` crate while encoding a frame.
    #[error("Image processing error: {0}")]
    Image(#[from] ImageError),

    /// An HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A service payload could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FramecastError {
    /// Returns `true` for errors that abort a whole run.
    ///
    /// Description, generation, and fetch failures only ever affect the item
    /// they occurred on; cancellation is not a failure at all.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            FramecastError::Description(_)
                | FramecastError::Generation(_)
                | FramecastError::Fetch { .. }
                | FramecastError::Cancelled
        )
    }
}

impl From<FfmpegError> for FramecastError {
    fn from(error: FfmpegError) -> Self {
        FramecastError::Ffmpeg(error.to_string())
    }
}
