//! In-memory stand-ins for the media and generative services.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use image::{Rgb, RgbImage};

use framecast::{
    Authorizer, Cue, EncodedImage, FetchKind, Frame, FramecastError, GenerationParams,
    ImageDescriber, JobHandle, JobStatus, MediaOpener, MediaSource, ProgressCallback,
    ProgressInfo, SourceMetadata, TextTrack, VideoGenerator,
};

// ── Media ──────────────────────────────────────────────────────────

/// Counts opened and released sources.
#[derive(Debug, Clone, Default)]
pub struct HandleCounter {
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl HandleCounter {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.opened() - self.released()
    }
}

struct ReleaseGuard(Arc<AtomicUsize>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockOpener {
    pub duration: Duration,
    pub width: u32,
    pub height: u32,
    pub seek_delay: Duration,
    pub cues: Option<Vec<Cue>>,
    pub fail_open: bool,
    pub counter: HandleCounter,
}

impl MockOpener {
    pub fn new(duration_secs: u64) -> Self {
        Self {
            duration: Duration::from_secs(duration_secs),
            width: 64,
            height: 36,
            seek_delay: Duration::from_millis(100),
            cues: None,
            fail_open: false,
            counter: HandleCounter::default(),
        }
    }

    pub fn with_cues(mut self, cues: Vec<Cue>) -> Self {
        self.cues = Some(cues);
        self
    }

    pub fn with_seek_delay(mut self, delay: Duration) -> Self {
        self.seek_delay = delay;
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

#[async_trait]
impl MediaOpener for MockOpener {
    type Source = MockSource;

    async fn open(&self, path: &Path) -> Result<MockSource, FramecastError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if self.fail_open {
            return Err(FramecastError::Ffmpeg(format!(
                "cannot decode {}",
                path.display()
            )));
        }

        self.counter.opened.fetch_add(1, Ordering::SeqCst);
        let tracks = self
            .cues
            .clone()
            .map(|cues| vec![TextTrack::with_cues(Some("English".into()), Some("en".into()), cues)])
            .unwrap_or_default();

        Ok(MockSource {
            metadata: SourceMetadata::new(self.duration, self.width, self.height),
            tracks,
            seek_delay: self.seek_delay,
            picture: None,
            _guard: ReleaseGuard(Arc::clone(&self.counter.released)),
        })
    }
}

pub struct MockSource {
    metadata: SourceMetadata,
    tracks: Vec<TextTrack>,
    seek_delay: Duration,
    picture: Option<RgbImage>,
    _guard: ReleaseGuard,
}

#[async_trait]
impl MediaSource for MockSource {
    fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    fn text_tracks(&self) -> Vec<TextTrack> {
        self.tracks.clone()
    }

    async fn seek(&mut self, position: Duration) -> Result<(), FramecastError> {
        tokio::time::sleep(self.seek_delay).await;
        let shade = (position.as_secs() % 256) as u8;
        self.picture = Some(RgbImage::from_pixel(
            self.metadata.width,
            self.metadata.height,
            Rgb([shade, 128, 255 - shade]),
        ));
        Ok(())
    }

    fn current_picture(&self) -> Option<&RgbImage> {
        self.picture.as_ref()
    }
}

pub fn cue(start_ms: u64, end_ms: u64, text: &str) -> Cue {
    Cue::new(
        Duration::from_millis(start_ms),
        Duration::from_millis(end_ms),
        text,
    )
}

// ── Progress ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingProgress {
    pub percentages: Mutex<Vec<f32>>,
}

impl RecordingProgress {
    pub fn values(&self) -> Vec<f32> {
        self.percentages.lock().unwrap().clone()
    }
}

impl ProgressCallback for RecordingProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.percentages.lock().unwrap().push(info.percentage);
    }
}

pub fn assert_monotonic(values: &[f32]) {
    for pair in values.windows(2) {
        assert!(pair[0] <= pair[1], "progress went backwards: {values:?}");
    }
}

// ── Generative services ────────────────────────────────────────────

/// A frame whose one-byte payload identifies it to the mocks.
pub fn tagged_frame(tag: u8) -> Frame {
    Frame::new(
        EncodedImage::jpeg(vec![tag], 1, 1),
        Duration::from_secs(u64::from(tag) * 5),
    )
}

#[derive(Default)]
pub struct MockDescriber {
    /// Frames (by tag) whose description always fails.
    pub failing_tags: HashSet<u8>,
    /// Number of leading calls that fail regardless of the frame.
    pub flaky_calls: AtomicU32,
    pub calls: AtomicUsize,
}

impl MockDescriber {
    pub fn failing_on(tags: &[u8]) -> Self {
        Self {
            failing_tags: tags.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn flaky(failures: u32) -> Self {
        Self {
            flaky_calls: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageDescriber for MockDescriber {
    async fn describe(
        &self,
        image: &EncodedImage,
        _instruction: &str,
    ) -> Result<String, FramecastError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let flaky = self
            .flaky_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if flaky {
            return Err(FramecastError::Description("service unavailable".into()));
        }

        let tag = image.bytes()[0];
        if self.failing_tags.contains(&tag) {
            return Err(FramecastError::Description(format!(
                "frame {tag} was rejected"
            )));
        }
        Ok(format!("  scene number {tag}  "))
    }
}

pub struct MockGenerator {
    /// Polls needed before a job succeeds; `None` never finishes.
    pub polls_to_finish: Option<u32>,
    pub fetch_not_found: bool,
    pub polls: Mutex<HashMap<String, u32>>,
    pub prompts: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn finishing_after(polls: u32) -> Self {
        Self {
            polls_to_finish: Some(polls),
            fetch_not_found: false,
            polls: Mutex::new(HashMap::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn never_finishing() -> Self {
        Self {
            polls_to_finish: None,
            ..Self::finishing_after(0)
        }
    }

    pub fn with_missing_downloads(mut self) -> Self {
        self.fetch_not_found = true;
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn total_polls(&self) -> u32 {
        self.polls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl VideoGenerator for MockGenerator {
    async fn submit(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<JobHandle, FramecastError> {
        let mut prompts = self.prompts.lock().unwrap();
        prompts.push(prompt.to_string());
        Ok(JobHandle::new(format!("operations/{}", prompts.len())))
    }

    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, FramecastError> {
        let mut polls = self.polls.lock().unwrap();
        let count = polls.entry(job.name.clone()).or_insert(0);
        *count += 1;

        match self.polls_to_finish {
            Some(needed) if *count >= needed => Ok(JobStatus::Succeeded {
                video_uri: Some(format!("mem://{}", job.name)),
            }),
            _ => Ok(JobStatus::Running),
        }
    }

    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, FramecastError> {
        if self.fetch_not_found {
            return Err(FramecastError::Fetch {
                kind: FetchKind::NotFound,
                message: format!("{uri} not found"),
            });
        }
        Ok(format!("clip from {uri}").into_bytes())
    }
}

pub struct MockAuthorizer {
    pub has_key: AtomicBool,
    pub grant_on_select: bool,
    pub selections: AtomicUsize,
}

impl MockAuthorizer {
    pub fn authorized() -> Self {
        Self {
            has_key: AtomicBool::new(true),
            grant_on_select: false,
            selections: AtomicUsize::new(0),
        }
    }

    pub fn denied() -> Self {
        Self {
            has_key: AtomicBool::new(false),
            ..Self::authorized()
        }
    }

    pub fn prompting() -> Self {
        Self {
            grant_on_select: true,
            ..Self::denied()
        }
    }

    pub fn selections(&self) -> usize {
        self.selections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authorizer for MockAuthorizer {
    async fn has_credential(&self) -> Result<bool, FramecastError> {
        Ok(self.has_key.load(Ordering::SeqCst))
    }

    async fn select_credential(&self) -> Result<(), FramecastError> {
        self.selections.fetch_add(1, Ordering::SeqCst);
        if self.grant_on_select {
            self.has_key.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Lets tests keep a handle on a mock after moving it into a controller.
pub struct Shared<T>(pub Arc<T>);

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

#[async_trait]
impl<T: ImageDescriber> ImageDescriber for Shared<T> {
    async fn describe(
        &self,
        image: &EncodedImage,
        instruction: &str,
    ) -> Result<String, FramecastError> {
        self.0.describe(image, instruction).await
    }
}

#[async_trait]
impl<T: VideoGenerator> VideoGenerator for Shared<T> {
    async fn submit(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<JobHandle, FramecastError> {
        self.0.submit(prompt, params).await
    }

    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, FramecastError> {
        self.0.poll(job).await
    }

    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, FramecastError> {
        self.0.fetch(uri).await
    }
}

#[async_trait]
impl<T: Authorizer> Authorizer for Shared<T> {
    async fn has_credential(&self) -> Result<bool, FramecastError> {
        self.0.has_credential().await
    }

    async fn select_credential(&self) -> Result<(), FramecastError> {
        self.0.select_credential().await
    }
}
