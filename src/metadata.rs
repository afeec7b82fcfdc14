//! Media metadata types.
//!
//! Metadata is read once when a [`MediaSource`](crate::MediaSource) is
//! opened and stays fixed for the lifetime of the source.

use std::time::Duration;

/// Metadata for an opened media source.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
///
/// use framecast::{FfmpegOpener, MediaOpener, MediaSource};
///
/// # async fn example() -> Result<(), framecast::FramecastError> {
/// let source = FfmpegOpener::new().open(Path::new("input.mp4")).await?;
/// let metadata = source.metadata();
/// println!("{}x{} for {:?}", metadata.width, metadata.height, metadata.duration);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct SourceMetadata {
    /// Total duration of the media.
    pub duration: Duration,
    /// Native frame width in pixels.
    pub width: u32,
    /// Native frame height in pixels.
    pub height: u32,
    /// Frames per second (approximate for variable-frame-rate content, zero
    /// when unknown).
    pub frames_per_second: f64,
    /// Container format name (e.g. `"mp4"`, `"matroska"`).
    pub format: String,
    /// Video codec name (e.g. `"h264"`).
    pub codec: String,
    /// Embedded subtitle streams, in container order.
    pub subtitle_tracks: Vec<SubtitleTrackInfo>,
}

impl SourceMetadata {
    /// Metadata for a source with the given duration and dimensions and no
    /// subtitle tracks.
    pub fn new(duration: Duration, width: u32, height: u32) -> Self {
        Self {
            duration,
            width,
            height,
            frames_per_second: 0.0,
            format: String::new(),
            codec: String::new(),
            subtitle_tracks: Vec::new(),
        }
    }
}

/// Metadata for one subtitle stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleTrackInfo {
    /// Container stream index.
    pub stream_index: usize,
    /// Codec name (e.g. `"subrip"`, `"ass"`, `"mov_text"`).
    pub codec: String,
    /// ISO 639 language tag, if present.
    pub language: Option<String>,
    /// Human-readable title, if present.
    pub title: Option<String>,
}
