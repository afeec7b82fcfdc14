//! # framecast
//!
//! Sample still frames and subtitles from a video file, then turn every
//! frame into a short AI-generated clip.
//!
//! `framecast` has two stages, each driven by a cheap-to-clone controller:
//!
//! - [`FrameExtractor`] opens a media file, captures one JPEG [`Frame`] per
//!   point of a fixed [`time_grid`] and recovers the first subtitle track as
//!   WebVTT. Decoding is done by FFmpeg via the
//!   [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//! - [`ClipGenerator`] captions each frame with an image-understanding
//!   model and feeds the caption to a text-to-video model, tracking every
//!   frame as a [`GenerationItem`] with its own status.
//!
//! Both controllers report through getters, an [`EventStream`] and an
//! optional [`ProgressCallback`], and both can be reset mid-run.
//!
//! ## Quick Start
//!
//! ### Extract Frames and Subtitles
//!
//! ```no_run
//! use std::path::Path;
//!
//! use framecast::{FfmpegOpener, FrameExtractor};
//!
//! # async fn example() -> Result<(), framecast::FramecastError> {
//! let extractor = FrameExtractor::new(FfmpegOpener::new());
//! extractor.start(Some(Path::new("input.mkv")), 5.0).await?;
//!
//! println!("captured {} frames", extractor.frames().len());
//! if let Some(subtitles) = extractor.subtitles() {
//!     std::fs::write("input.vtt", subtitles.as_str())?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Generate Clips
//!
//! ```no_run
//! use std::path::Path;
//!
//! use framecast::{ClipGenerator, CredentialStore, GeminiClient, ItemStatus};
//!
//! # async fn example(frames: Vec<framecast::Frame>) -> Result<(), framecast::FramecastError> {
//! let credentials = CredentialStore::from_env();
//! let client = GeminiClient::new(credentials.clone());
//! let generator = ClipGenerator::new(client.clone(), client, credentials);
//!
//! generator.start(&frames).await?;
//! for (index, item) in generator.items().iter().enumerate() {
//!     if item.status == ItemStatus::Complete {
//!         generator.save_clip(index, Path::new(&format!("clip-{index:02}.mp4")))?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Observe a Run
//!
//! ```no_run
//! use tokio_stream::StreamExt;
//!
//! use framecast::{ExtractionEvent, FfmpegOpener, FrameExtractor};
//!
//! # async fn example() {
//! let extractor = FrameExtractor::new(FfmpegOpener::new());
//! let mut events = extractor.subscribe();
//!
//! let runner = extractor.clone();
//! tokio::spawn(async move {
//!     let _ = runner.start(Some("input.mp4".as_ref()), 5.0).await;
//! });
//!
//! while let Some(event) = events.next().await {
//!     match event {
//!         ExtractionEvent::Frame { index, frame } => {
//!             println!("frame {index} at {:?}", frame.timestamp());
//!         }
//!         ExtractionEvent::Finished { phase, .. } => {
//!             println!("finished: {phase:?}");
//!             break;
//!         }
//!         _ => {}
//!     }
//! }
//! # }
//! ```
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system. The
//! generation stage needs a Gemini API key, read from `GEMINI_API_KEY` or
//! `API_KEY` by [`CredentialStore::from_env`].

pub mod capture;
pub mod configuration;
mod conversion;
pub mod credentials;
pub mod decoder;
pub mod describe;
pub mod error;
pub mod events;
pub mod extraction;
pub mod ffmpeg;
pub mod gemini;
pub mod generate;
pub mod generation;
pub mod metadata;
pub mod progress;
pub mod retry;
pub mod services;
pub mod source;
pub mod subtitle;
pub mod time_grid;

pub use capture::{CaptureSurface, EncodedImage, JPEG_MIME_TYPE};
pub use configuration::{
    DEFAULT_INSTRUCTION, DEFAULT_JPEG_QUALITY, DEFAULT_POLL_INTERVAL, ExtractionOptions,
    GenerationOptions, SettlePolicy,
};
pub use credentials::CredentialStore;
pub use decoder::{FfmpegOpener, FfmpegSource};
pub use describe::describe_frame;
pub use error::{FetchKind, FramecastError};
pub use events::EventStream;
pub use extraction::{
    ExtractionEvent, ExtractionPhase, ExtractionSnapshot, Frame, FrameExtractor,
};
pub use ffmpeg::{FfmpegLogLevel, set_ffmpeg_log_level};
pub use gemini::GeminiClient;
pub use generate::{ArtifactInfo, ClipArtifact, MP4_MIME_TYPE, generate_clip};
pub use generation::{
    ClipGenerator, GenerationEvent, GenerationItem, GenerationPhase, ItemStatus,
};
pub use metadata::{SourceMetadata, SubtitleTrackInfo};
pub use progress::{CancellationToken, OperationType, ProgressCallback, ProgressInfo, RunOutcome};
pub use retry::RetryPolicy;
pub use services::{
    Authorizer, GenerationParams, ImageDescriber, JobHandle, JobStatus, VideoGenerator,
};
pub use source::{CueLoader, CueSink, MediaOpener, MediaSource, TextTrack, TrackMode};
pub use subtitle::{
    Cue, SubtitlePayload, WEBVTT_MIME_TYPE, extract_subtitles, format_vtt_timestamp, to_webvtt,
};
pub use time_grid::time_grid;
