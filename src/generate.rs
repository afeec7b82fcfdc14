//! Caption-to-clip generation.
//!
//! [`generate_clip`] submits one text-to-video job, polls it at a fixed
//! cadence until it reaches a terminal state, downloads the result and
//! materializes it as a [`ClipArtifact`]: a temporary file that is deleted
//! when the artifact is dropped.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::{Builder as TempFileBuilder, TempPath};

use crate::{
    configuration::GenerationOptions,
    error::{FetchKind, FramecastError},
    progress::CancellationToken,
    services::{JobStatus, VideoGenerator},
};

/// MIME type of generated clips.
pub const MP4_MIME_TYPE: &str = "video/mp4";

/// A generated clip held in a temporary file.
///
/// The file is removed when the artifact is dropped. Copy it elsewhere with
/// [`copy_to`](ClipArtifact::copy_to) to keep it.
#[derive(Debug)]
pub struct ClipArtifact {
    path: TempPath,
    size: u64,
}

/// Observable description of a [`ClipArtifact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    /// Location of the temporary file. Valid until the owning run is reset.
    pub path: PathBuf,
    /// Size of the clip in bytes.
    pub size: u64,
    /// MIME type of the clip.
    pub mime_type: &'static str,
}

impl ClipArtifact {
    /// Write `bytes` to a new temporary file in `dir`, or the system
    /// temporary directory when `dir` is `None`.
    pub fn from_bytes(bytes: &[u8], dir: Option<&Path>) -> Result<Self, FramecastError> {
        let mut builder = TempFileBuilder::new();
        builder.prefix("framecast-clip-").suffix(".mp4");

        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(bytes)?;
        file.flush()?;

        let path = file.into_temp_path();
        log::debug!("Stored {} byte clip at {}", bytes.len(), path.display());

        Ok(Self {
            path,
            size: bytes.len() as u64,
        })
    }

    /// Location of the temporary file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Describe the artifact for observers.
    pub fn info(&self) -> ArtifactInfo {
        ArtifactInfo {
            path: self.path.to_path_buf(),
            size: self.size,
            mime_type: MP4_MIME_TYPE,
        }
    }

    /// Copy the clip to `destination`.
    pub fn copy_to(&self, destination: &Path) -> Result<u64, FramecastError> {
        Ok(std::fs::copy(&self.path, destination)?)
    }
}

/// Turn `prompt` into a clip.
///
/// The job is polled every [`poll_interval`](GenerationOptions::poll_interval)
/// until it finishes; without a
/// [`max_poll_attempts`](GenerationOptions::max_poll_attempts) cap a stuck
/// job is polled until `token` is cancelled.
///
/// # Errors
///
/// - [`FramecastError::Generation`] if submission or polling fails, the job
///   finishes with an error or without a video reference, or the poll cap
///   is exceeded.
/// - [`FramecastError::Fetch`] if the finished clip cannot be downloaded.
/// - [`FramecastError::Cancelled`] if `token` is cancelled between polls.
pub async fn generate_clip<V: VideoGenerator + ?Sized>(
    generator: &V,
    prompt: &str,
    options: &GenerationOptions,
    token: &CancellationToken,
) -> Result<ClipArtifact, FramecastError> {
    let job = generator
        .submit(prompt, &options.params)
        .await
        .map_err(into_generation_error)?;
    log::debug!("Submitted generation job {}", job.name);

    let mut polls: u32 = 0;
    let video_uri = loop {
        tokio::time::sleep(options.poll_interval).await;
        if token.is_cancelled() {
            log::debug!("Abandoning generation job {}", job.name);
            return Err(FramecastError::Cancelled);
        }

        let status = generator.poll(&job).await.map_err(into_generation_error)?;
        polls += 1;

        match status {
            JobStatus::Running => {
                log::debug!("Job {} still running after {polls} poll(s)", job.name);
            }
            JobStatus::Succeeded {
                video_uri: Some(uri),
            } => break uri,
            JobStatus::Succeeded { video_uri: None } => {
                return Err(FramecastError::Generation(format!(
                    "job {} finished without a video reference",
                    job.name
                )));
            }
            JobStatus::Failed(message) => {
                return Err(FramecastError::Generation(message));
            }
        }

        if let Some(max) = options.max_poll_attempts
            && polls >= max
        {
            return Err(FramecastError::Generation(format!(
                "job {} did not finish after {polls} poll(s)",
                job.name
            )));
        }
    };

    log::debug!("Job {} finished after {polls} poll(s)", job.name);
    let bytes = generator
        .fetch(&video_uri)
        .await
        .map_err(|error| match error {
            FramecastError::Fetch { .. } | FramecastError::Cancelled => error,
            other => FramecastError::Fetch {
                kind: FetchKind::Transport,
                message: other.to_string(),
            },
        })?;
    ClipArtifact::from_bytes(&bytes, options.artifact_dir.as_deref())
}

fn into_generation_error(error: FramecastError) -> FramecastError {
    match error {
        FramecastError::Generation(_) | FramecastError::Cancelled => error,
        other => FramecastError::Generation(other.to_string()),
    }
}
