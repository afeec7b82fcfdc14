//! Gemini REST client.
//!
//! [`GeminiClient`] implements [`ImageDescriber`] with a multimodal
//! `generateContent` call and [`VideoGenerator`] with the long-running
//! `predictLongRunning` endpoint of a Veo model. The API key is read from a
//! shared [`CredentialStore`] on every request, so a key entered after the
//! client was built is picked up immediately.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::{
    capture::EncodedImage,
    credentials::CredentialStore,
    error::{FetchKind, FramecastError},
    services::{GenerationParams, ImageDescriber, JobHandle, JobStatus, VideoGenerator},
};

/// Default endpoint of the Generative Language API.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Default model for captioning frames.
pub const DEFAULT_DESCRIBE_MODEL: &str = "gemini-2.5-flash";

/// Default model for text-to-video jobs.
pub const DEFAULT_VIDEO_MODEL: &str = "veo-3.1-fast-generate-preview";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Client for the hosted Gemini and Veo models. Cheap to clone.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    credentials: CredentialStore,
    base_url: String,
    describe_model: String,
    video_model: String,
}

impl GeminiClient {
    /// A client using the default endpoint and models.
    pub fn new(credentials: CredentialStore) -> Self {
        Self {
            http: Client::new(),
            credentials,
            base_url: DEFAULT_BASE_URL.to_string(),
            describe_model: DEFAULT_DESCRIBE_MODEL.to_string(),
            video_model: DEFAULT_VIDEO_MODEL.to_string(),
        }
    }

    /// Send requests to `base_url` instead of the public endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Use `model` for captions.
    #[must_use]
    pub fn with_describe_model(mut self, model: impl Into<String>) -> Self {
        self.describe_model = model.into();
        self
    }

    /// Use `model` for video jobs.
    #[must_use]
    pub fn with_video_model(mut self, model: impl Into<String>) -> Self {
        self.video_model = model.into();
        self
    }

    /// The credential store this client reads its key from.
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    fn api_key(&self) -> Result<String, FramecastError> {
        self.credentials
            .api_key()
            .ok_or_else(|| FramecastError::Authorization("no API key configured".to_string()))
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!("{}/v1beta/models/{model}:{method}", self.base_url)
    }
}

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
    Text {
        text: &'a str,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    instances: Vec<PredictInstance<'a>>,
    parameters: PredictParameters<'a>,
}

#[derive(Debug, Serialize)]
struct PredictInstance<'a> {
    prompt: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters<'a> {
    aspect_ratio: &'a str,
    resolution: &'a str,
    sample_count: u32,
}

#[derive(Debug, Deserialize)]
struct Operation {
    name: Option<String>,
    #[serde(default)]
    done: bool,
    error: Option<OperationError>,
    response: Option<OperationResponse>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default)]
    generated_samples: Vec<GeneratedSample>,
}

#[derive(Debug, Deserialize)]
struct GeneratedSample {
    video: Option<VideoReference>,
}

#[derive(Debug, Deserialize)]
struct VideoReference {
    uri: Option<String>,
}

impl Operation {
    fn into_status(self) -> JobStatus {
        if !self.done {
            return JobStatus::Running;
        }
        if let Some(error) = self.error {
            return JobStatus::Failed(
                error
                    .message
                    .unwrap_or_else(|| "job failed without a message".to_string()),
            );
        }
        let video_uri = self
            .response
            .and_then(|response| response.generate_video_response)
            .and_then(|response| response.generated_samples.into_iter().next())
            .and_then(|sample| sample.video)
            .and_then(|video| video.uri);
        JobStatus::Succeeded { video_uri }
    }
}

/// Turn a non-success response into a message that includes the body.
async fn status_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if body.is_empty() {
        format!("service returned {status}")
    } else {
        format!("service returned {status}: {body}")
    }
}

#[async_trait]
impl ImageDescriber for GeminiClient {
    async fn describe(
        &self,
        image: &EncodedImage,
        instruction: &str,
    ) -> Result<String, FramecastError> {
        let key = self.api_key()?;
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    RequestPart::InlineData {
                        inline_data: InlineData {
                            mime_type: image.mime_type(),
                            data: STANDARD.encode(image.bytes()),
                        },
                    },
                    RequestPart::Text { text: instruction },
                ],
            }],
        };

        log::debug!(
            "Describing {}x{} frame with {}",
            image.width(),
            image.height(),
            self.describe_model
        );
        let response = self
            .http
            .post(self.model_url(&self.describe_model, "generateContent"))
            .header(API_KEY_HEADER, key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FramecastError::Description(status_message(response).await));
        }

        let body: GenerateContentResponse = response.json().await?;
        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default();
        Ok(text)
    }
}

#[async_trait]
impl VideoGenerator for GeminiClient {
    async fn submit(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<JobHandle, FramecastError> {
        let key = self.api_key()?;
        let request = PredictRequest {
            instances: vec![PredictInstance { prompt }],
            parameters: PredictParameters {
                aspect_ratio: &params.aspect_ratio,
                resolution: &params.resolution,
                sample_count: params.number_of_videos,
            },
        };

        let response = self
            .http
            .post(self.model_url(&self.video_model, "predictLongRunning"))
            .header(API_KEY_HEADER, key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FramecastError::Generation(status_message(response).await));
        }

        let operation: Operation = response.json().await?;
        let name = operation.name.ok_or_else(|| {
            FramecastError::Generation("job submitted without an operation name".to_string())
        })?;
        log::info!("Started video job {name} on {}", self.video_model);
        Ok(JobHandle::new(name))
    }

    async fn poll(&self, job: &JobHandle) -> Result<JobStatus, FramecastError> {
        let key = self.api_key()?;
        let response = self
            .http
            .get(format!("{}/v1beta/{}", self.base_url, job.name))
            .header(API_KEY_HEADER, key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FramecastError::Generation(status_message(response).await));
        }

        let operation: Operation = response.json().await?;
        Ok(operation.into_status())
    }

    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, FramecastError> {
        let key = self.api_key()?;
        let separator = if uri.contains('?') { '&' } else { '?' };
        let url = format!("{uri}{separator}key={key}");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|error| FramecastError::Fetch {
                kind: FetchKind::Transport,
                message: error.without_url().to_string(),
            })?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(FramecastError::Fetch {
                    kind: FetchKind::NotFound,
                    message: "video not found; the API key may be invalid, select a key and retry"
                        .to_string(),
                });
            }
            status => {
                return Err(FramecastError::Fetch {
                    kind: FetchKind::Transport,
                    message: format!("download returned {status}"),
                });
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|error| FramecastError::Fetch {
                kind: FetchKind::Transport,
                message: error.without_url().to_string(),
            })?;
        log::debug!("Downloaded {} byte clip", bytes.len());
        Ok(bytes.to_vec())
    }
}
