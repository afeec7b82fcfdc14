//! The media-decoding seam.
//!
//! A [`MediaOpener`] turns a path into a [`MediaSource`]: a handle that
//! exposes metadata, a single seekable position with a readable decoded
//! picture, and zero or more [`TextTrack`]s. Dropping a source releases
//! everything it holds.
//!
//! [`FfmpegOpener`](crate::FfmpegOpener) is the built-in implementation.

use std::{
    fmt::{Debug, Formatter, Result as FmtResult},
    path::Path,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use image::RgbImage;

use crate::{error::FramecastError, metadata::SourceMetadata, subtitle::Cue};

/// Opens decoding handles.
#[async_trait]
pub trait MediaOpener: Send + Sync {
    /// The handle type produced by this opener.
    type Source: MediaSource;

    /// Open `path` and resolve once its metadata is available.
    ///
    /// # Errors
    ///
    /// Implementations report unreadable or undecodable media as
    /// [`FramecastError::MediaLoad`].
    async fn open(&self, path: &Path) -> Result<Self::Source, FramecastError>;
}

/// An opened decoding handle positioned at one timestamp at a time.
#[async_trait]
pub trait MediaSource: Send {
    /// Metadata read when the handle was opened.
    fn metadata(&self) -> &SourceMetadata;

    /// Text tracks exposed by the media, in container order.
    fn text_tracks(&self) -> Vec<TextTrack>;

    /// Move to `position` and resolve once the picture at that position has
    /// been decoded.
    async fn seek(&mut self, position: Duration) -> Result<(), FramecastError>;

    /// The picture decoded by the last completed seek, or `None` before any
    /// seek has completed.
    fn current_picture(&self) -> Option<&RgbImage>;
}

/// Observation mode of a [`TextTrack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackMode {
    /// Cues are not loaded.
    #[default]
    Disabled,
    /// Cues are loaded and enumerable but not rendered.
    Hidden,
    /// Cues are loaded and rendered.
    Showing,
}

/// Populates a track's cue list once the track is activated.
///
/// The loader is called at most once, synchronously from
/// [`TextTrack::set_mode`]. It is expected to hand the [`CueSink`] to a
/// background thread or task and return immediately.
pub type CueLoader = Box<dyn FnOnce(CueSink) + Send>;

struct TrackInner {
    label: Option<String>,
    language: Option<String>,
    mode: Mutex<TrackMode>,
    cues: Mutex<Vec<Cue>>,
    complete: AtomicBool,
    loader: Mutex<Option<CueLoader>>,
}

/// A subtitle or caption track exposed by a [`MediaSource`].
///
/// Cheap to clone; clones share the same cue list. Cues are parsed in the
/// background after the track is first switched out of
/// [`TrackMode::Disabled`], so readers must allow them time to appear (see
/// [`SettlePolicy`](crate::SettlePolicy)).
#[derive(Clone)]
pub struct TextTrack {
    inner: Arc<TrackInner>,
}

impl Debug for TextTrack {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("TextTrack")
            .field("label", &self.inner.label)
            .field("language", &self.inner.language)
            .field("mode", &self.mode())
            .field("cues", &self.cue_count())
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl TextTrack {
    /// Create a track whose cues are produced by `loader` on activation.
    pub fn new(label: Option<String>, language: Option<String>, loader: CueLoader) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                label,
                language,
                mode: Mutex::new(TrackMode::Disabled),
                cues: Mutex::new(Vec::new()),
                complete: AtomicBool::new(false),
                loader: Mutex::new(Some(loader)),
            }),
        }
    }

    /// Create a track whose cues are already known.
    ///
    /// The cue list still only becomes visible once the track is activated.
    pub fn with_cues(label: Option<String>, language: Option<String>, cues: Vec<Cue>) -> Self {
        Self::new(
            label,
            language,
            Box::new(move |sink: CueSink| {
                for cue in cues {
                    sink.push(cue);
                }
                sink.finish();
            }),
        )
    }

    /// The track's human-readable label.
    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    /// The track's language tag.
    pub fn language(&self) -> Option<&str> {
        self.inner.language.as_deref()
    }

    /// The current observation mode.
    pub fn mode(&self) -> TrackMode {
        *self
            .inner
            .mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Switch the observation mode. The first switch to
    /// [`Hidden`](TrackMode::Hidden) or [`Showing`](TrackMode::Showing)
    /// starts the cue loader.
    pub fn set_mode(&self, mode: TrackMode) {
        *self
            .inner
            .mode
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = mode;

        if mode == TrackMode::Disabled {
            return;
        }

        let loader = self
            .inner
            .loader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(loader) = loader {
            log::debug!("Loading cues for track {:?}", self.inner.label);
            loader(CueSink {
                inner: Arc::clone(&self.inner),
            });
        }
    }

    /// A snapshot of the cues loaded so far, in track order.
    ///
    /// Always empty while the track is disabled.
    pub fn cues(&self) -> Vec<Cue> {
        if self.mode() == TrackMode::Disabled {
            return Vec::new();
        }
        self.inner
            .cues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of cues loaded so far.
    pub fn cue_count(&self) -> usize {
        if self.mode() == TrackMode::Disabled {
            return 0;
        }
        self.inner
            .cues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the loader reported that every cue has been delivered.
    pub fn is_complete(&self) -> bool {
        self.inner.complete.load(Ordering::Acquire)
    }
}

/// Write end of a [`TextTrack`]'s cue list, handed to its [`CueLoader`].
#[derive(Clone)]
pub struct CueSink {
    inner: Arc<TrackInner>,
}

impl CueSink {
    /// Append one cue.
    pub fn push(&self, cue: Cue) {
        self.inner
            .cues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cue);
    }

    /// Mark the cue list as complete.
    pub fn finish(&self) {
        self.inner.complete.store(true, Ordering::Release);
    }

    /// Whether any [`TextTrack`] handle is still alive. Loaders may stop
    /// early once this returns `false`.
    pub fn is_observed(&self) -> bool {
        Arc::strong_count(&self.inner) > 1
    }
}
