//! Gemini client request/response mapping, checked against a local
//! `wiremock` server.

use std::time::Duration;

use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path, query_param},
};

use framecast::{
    CancellationToken, CredentialStore, EncodedImage, FetchKind, FramecastError, GeminiClient,
    GenerationOptions, GenerationParams, ImageDescriber, JobHandle, JobStatus, VideoGenerator,
    generate_clip,
};

const KEY: &str = "test-key";

async fn client() -> (MockServer, GeminiClient) {
    let server = MockServer::start().await;
    let client = GeminiClient::new(CredentialStore::with_key(KEY)).with_base_url(server.uri());
    (server, client)
}

// ── Description ────────────────────────────────────────────────────

#[tokio::test]
async fn describe_sends_inline_jpeg_and_instruction() {
    let (server, client) = client().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
        .and(header("x-goog-api-key", KEY))
        .and(body_partial_json(json!({
            "contents": [{
                "parts": [
                    {"inlineData": {"mimeType": "image/jpeg", "data": "/9j/"}},
                    {"text": "Describe it"}
                ]
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [{"text": "A foggy "}, {"text": "harbour."}]}
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let image = EncodedImage::jpeg(vec![0xFF, 0xD8, 0xFF], 2, 2);
    let caption = client.describe(&image, "Describe it").await.unwrap();

    assert_eq!(caption, "A foggy harbour.");
}

#[tokio::test]
async fn describe_maps_service_errors() {
    let (server, client) = client().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota exhausted"))
        .mount(&server)
        .await;

    let image = EncodedImage::jpeg(vec![0xFF, 0xD8], 1, 1);
    let error = client.describe(&image, "x").await.unwrap_err();

    match error {
        FramecastError::Description(message) => {
            assert!(message.contains("429"));
            assert!(message.contains("quota exhausted"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn describe_with_custom_model() {
    let (server, client) = client().await;
    let client = client.with_describe_model("gemini-2.5-pro");

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-2.5-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
        .expect(1)
        .mount(&server)
        .await;

    let image = EncodedImage::jpeg(vec![0xFF, 0xD8], 1, 1);
    assert_eq!(client.describe(&image, "x").await.unwrap(), "");
}

#[tokio::test]
async fn requests_without_a_key_are_not_sent() {
    let server = MockServer::start().await;
    let client = GeminiClient::new(CredentialStore::new()).with_base_url(server.uri());

    let error = client
        .submit("prompt", &GenerationParams::default())
        .await
        .unwrap_err();

    assert!(matches!(error, FramecastError::Authorization(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

// ── Video jobs ─────────────────────────────────────────────────────

#[tokio::test]
async fn submit_sends_prompt_and_parameters() {
    let (server, client) = client().await;

    Mock::given(method("POST"))
        .and(path(
            "/v1beta/models/veo-3.1-fast-generate-preview:predictLongRunning",
        ))
        .and(header("x-goog-api-key", KEY))
        .and(body_partial_json(json!({
            "instances": [{"prompt": "a red kite over dunes"}],
            "parameters": {"aspectRatio": "16:9", "resolution": "720p", "sampleCount": 1}
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"name": "operations/abc123"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let job = client
        .submit("a red kite over dunes", &GenerationParams::default())
        .await
        .unwrap();

    assert_eq!(job, JobHandle::new("operations/abc123"));
}

#[tokio::test]
async fn poll_reads_operation_state() {
    let (server, client) = client().await;

    Mock::given(method("GET"))
        .and(path("/v1beta/operations/running"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"name": "operations/running", "done": false})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1beta/operations/failed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "operations/failed",
            "done": true,
            "error": {"code": 3, "message": "unsafe prompt"}
        })))
        .mount(&server)
        .await;

    assert_eq!(
        client
            .poll(&JobHandle::new("operations/running"))
            .await
            .unwrap(),
        JobStatus::Running
    );
    assert_eq!(
        client
            .poll(&JobHandle::new("operations/failed"))
            .await
            .unwrap(),
        JobStatus::Failed("unsafe prompt".to_string())
    );
}

// ── Downloads ──────────────────────────────────────────────────────

#[tokio::test]
async fn fetch_appends_key_to_uri() {
    let (server, client) = client().await;

    Mock::given(method("GET"))
        .and(path("/files/clip:download"))
        .and(query_param("alt", "media"))
        .and(query_param("key", KEY))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4 bytes".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let uri = format!("{}/files/clip:download?alt=media", server.uri());
    assert_eq!(client.fetch(&uri).await.unwrap(), b"mp4 bytes");
}

#[tokio::test]
async fn fetch_404_is_not_found() {
    let (server, client) = client().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let error = client
        .fetch(&format!("{}/files/gone", server.uri()))
        .await
        .unwrap_err();

    match error {
        FramecastError::Fetch { kind, message } => {
            assert_eq!(kind, FetchKind::NotFound);
            assert!(message.contains("API key may be invalid"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn fetch_server_error_is_transport() {
    let (server, client) = client().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let error = client
        .fetch(&format!("{}/files/busy", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        FramecastError::Fetch {
            kind: FetchKind::Transport,
            ..
        }
    ));
}

// ── End to end ─────────────────────────────────────────────────────

#[tokio::test]
async fn generate_clip_runs_the_whole_job_lifecycle() {
    let (server, client) = client().await;
    let video_uri = format!("{}/files/done:download?alt=media", server.uri());

    Mock::given(method("POST"))
        .and(path(
            "/v1beta/models/veo-3.1-fast-generate-preview:predictLongRunning",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "operations/e2e"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1beta/operations/e2e"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "operations/e2e",
            "done": true,
            "response": {
                "generateVideoResponse": {
                    "generatedSamples": [{"video": {"uri": video_uri}}]
                }
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/done:download"))
        .and(query_param("key", KEY))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2048]))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let options = GenerationOptions::new()
        .with_poll_interval(Duration::from_millis(5))
        .with_artifact_dir(dir.path());

    let clip = generate_clip(&client, "waves", &options, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(clip.size(), 2048);
    assert!(clip.path().starts_with(dir.path()));
    let path = clip.path().to_path_buf();
    drop(clip);
    assert!(!path.exists());
}
