//! Service seams for the generation pipeline.
//!
//! The generation pipeline talks to three collaborators: an
//! [`ImageDescriber`] that captions a still image, a [`VideoGenerator`] that
//! runs long-lived text-to-video jobs, and an [`Authorizer`] that guards
//! both behind a credential. [`GeminiClient`](crate::GeminiClient) and
//! [`CredentialStore`](crate::CredentialStore) implement them against the
//! hosted Gemini API; tests substitute in-memory mocks.

use async_trait::async_trait;

use crate::{capture::EncodedImage, error::FramecastError};

/// Parameters sent with every video-generation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationParams {
    /// Number of videos to render per job.
    pub number_of_videos: u32,
    /// Output resolution, e.g. `"720p"`.
    pub resolution: String,
    /// Output aspect ratio, e.g. `"16:9"`.
    pub aspect_ratio: String,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            number_of_videos: 1,
            resolution: "720p".to_string(),
            aspect_ratio: "16:9".to_string(),
        }
    }
}

/// Opaque reference to a submitted generation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    /// Service-assigned operation name.
    pub name: String,
}

impl JobHandle {
    /// Wrap a service-assigned operation name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Result of one status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// The job has not reached a terminal state yet.
    Running,
    /// The job finished. `video_uri` is the reference to fetch the rendered
    /// clip from; a finished job without one is treated as a failure.
    Succeeded {
        /// Location of the generated artifact, if the service reported one.
        video_uri: Option<String>,
    },
    /// The job finished with a service-side error.
    Failed(String),
}

impl JobStatus {
    /// Returns `true` for [`Succeeded`](JobStatus::Succeeded) and
    /// [`Failed`](JobStatus::Failed).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// Captions a still image.
#[async_trait]
pub trait ImageDescriber: Send + Sync {
    /// Return a natural-language caption for `image`, following
    /// `instruction`.
    async fn describe(
        &self,
        image: &EncodedImage,
        instruction: &str,
    ) -> Result<String, FramecastError>;
}

/// Runs asynchronous text-to-video jobs.
#[async_trait]
pub trait VideoGenerator: Send + Sync {
    /// Submit a job and return its handle without waiting for it to finish.
    async fn submit(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<JobHandle, FramecastError>;

    /// Query the current state of a job.
    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, FramecastError>;

    /// Download a finished artifact. Implementations report failures as
    /// [`FramecastError::Fetch`].
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, FramecastError>;
}

/// Guards the generative services behind a credential.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Whether a usable credential is currently available.
    async fn has_credential(&self) -> Result<bool, FramecastError>;

    /// Ask the user to pick or enter a credential.
    async fn select_credential(&self) -> Result<(), FramecastError>;
}
