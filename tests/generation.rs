//! Generation controller integration tests.
//!
//! The describer, video generator and authorizer are in-memory mocks;
//! polling and backoff run on Tokio's paused clock.

mod common;

use std::{
    sync::{Arc, atomic::Ordering},
    time::Duration,
};

use tokio::time::sleep;

use common::{
    MockAuthorizer, MockDescriber, MockGenerator, RecordingProgress, Shared, assert_monotonic,
    tagged_frame,
};
use framecast::{
    ClipGenerator, FetchKind, FramecastError, GenerationEvent, GenerationOptions,
    GenerationPhase, ItemStatus, RetryPolicy, RunOutcome, generate_clip,
};

type TestGenerator =
    ClipGenerator<Shared<MockDescriber>, Shared<MockGenerator>, Shared<MockAuthorizer>>;

struct Harness {
    describer: Arc<MockDescriber>,
    generator: Arc<MockGenerator>,
    authorizer: Arc<MockAuthorizer>,
    controller: TestGenerator,
}

fn harness(
    describer: MockDescriber,
    generator: MockGenerator,
    authorizer: MockAuthorizer,
    options: GenerationOptions,
) -> Harness {
    let describer = Arc::new(describer);
    let generator = Arc::new(generator);
    let authorizer = Arc::new(authorizer);
    let controller = ClipGenerator::with_options(
        Shared(Arc::clone(&describer)),
        Shared(Arc::clone(&generator)),
        Shared(Arc::clone(&authorizer)),
        options,
    );
    Harness {
        describer,
        generator,
        authorizer,
        controller,
    }
}

fn fast_options() -> GenerationOptions {
    GenerationOptions::new().with_poll_interval(Duration::from_secs(1))
}

// ── Per-item isolation ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failing_description_only_fails_its_item() {
    let progress = Arc::new(RecordingProgress::default());
    let h = harness(
        MockDescriber::failing_on(&[2]),
        MockGenerator::finishing_after(2),
        MockAuthorizer::authorized(),
        fast_options().with_progress(progress.clone()),
    );
    let frames = [tagged_frame(1), tagged_frame(2), tagged_frame(3)];

    let outcome = h.controller.start(&frames).await.unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(h.controller.phase(), GenerationPhase::Completed);
    assert_eq!(h.controller.progress(), 100.0);

    let items = h.controller.items();
    assert_eq!(items.len(), 3);
    let statuses: Vec<ItemStatus> = items.iter().map(|item| item.status).collect();
    assert_eq!(
        statuses,
        vec![ItemStatus::Complete, ItemStatus::Error, ItemStatus::Complete]
    );

    assert_eq!(items[0].description.as_deref(), Some("scene number 1"));
    assert!(items[0].artifact.is_some());
    assert!(items[1].description.is_none());
    assert!(items[1].artifact.is_none());
    assert!(items[1].error.as_deref().unwrap().contains("frame 2 was rejected"));
    assert_eq!(items[2].frame.timestamp(), Duration::from_secs(15));

    assert_eq!(
        h.generator.prompts(),
        vec!["scene number 1".to_string(), "scene number 3".to_string()]
    );

    let values = progress.values();
    assert_monotonic(&values);
    assert_eq!(values.last().copied(), Some(100.0));
}

#[tokio::test(start_paused = true)]
async fn item_updates_follow_the_status_order() {
    let h = harness(
        MockDescriber::default(),
        MockGenerator::finishing_after(1),
        MockAuthorizer::authorized(),
        fast_options(),
    );
    let mut events = h.controller.subscribe();

    h.controller.start(&[tagged_frame(7)]).await.unwrap();

    let statuses: Vec<ItemStatus> = std::iter::from_fn(|| events.try_next())
        .filter_map(|event| match event {
            GenerationEvent::Item { index: 0, item } => Some(item.status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            ItemStatus::Pending,
            ItemStatus::Describing,
            ItemStatus::Generating,
            ItemStatus::Complete,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn missing_download_is_reported_as_not_found() {
    let h = harness(
        MockDescriber::default(),
        MockGenerator::finishing_after(1).with_missing_downloads(),
        MockAuthorizer::authorized(),
        fast_options(),
    );

    h.controller.start(&[tagged_frame(1)]).await.unwrap();

    let item = &h.controller.items()[0];
    assert_eq!(item.status, ItemStatus::Error);
    assert!(item.error.as_deref().unwrap().contains("(not found)"));
    assert_eq!(h.controller.progress(), 100.0);
}

#[tokio::test(start_paused = true)]
async fn poll_cap_fails_a_stuck_job() {
    let h = harness(
        MockDescriber::default(),
        MockGenerator::never_finishing(),
        MockAuthorizer::authorized(),
        fast_options().with_max_poll_attempts(3),
    );

    h.controller.start(&[tagged_frame(1)]).await.unwrap();

    let item = &h.controller.items()[0];
    assert_eq!(item.status, ItemStatus::Error);
    assert!(item.error.as_deref().unwrap().contains("after 3 poll(s)"));
    assert_eq!(h.generator.total_polls(), 3);
}

// ── Retry ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn retry_recovers_a_flaky_describer() {
    let h = harness(
        MockDescriber::flaky(1),
        MockGenerator::finishing_after(1),
        MockAuthorizer::authorized(),
        fast_options().with_retry(RetryPolicy::new(2).with_base_delay(Duration::from_secs(1))),
    );

    h.controller.start(&[tagged_frame(4)]).await.unwrap();

    assert_eq!(h.controller.items()[0].status, ItemStatus::Complete);
    assert_eq!(h.describer.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn without_retry_a_flaky_describer_fails_the_item() {
    let h = harness(
        MockDescriber::flaky(1),
        MockGenerator::finishing_after(1),
        MockAuthorizer::authorized(),
        fast_options(),
    );

    h.controller
        .start(&[tagged_frame(4), tagged_frame(5)])
        .await
        .unwrap();

    let items = h.controller.items();
    assert_eq!(items[0].status, ItemStatus::Error);
    assert_eq!(items[1].status, ItemStatus::Complete);
    assert_eq!(h.describer.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn generation_retry_submits_a_new_job() {
    let h = harness(
        MockDescriber::default(),
        MockGenerator::finishing_after(1).with_missing_downloads(),
        MockAuthorizer::authorized(),
        fast_options().with_retry(RetryPolicy::new(1).with_base_delay(Duration::from_secs(1))),
    );

    h.controller.start(&[tagged_frame(2)]).await.unwrap();

    let item = &h.controller.items()[0];
    assert_eq!(item.status, ItemStatus::Error);
    assert_eq!(h.describer.calls(), 1);
    assert_eq!(h.generator.prompts(), vec!["scene number 2"; 2]);
}

// ── Authorization ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn missing_credential_aborts_before_any_item() {
    let h = harness(
        MockDescriber::default(),
        MockGenerator::finishing_after(1),
        MockAuthorizer::denied(),
        fast_options(),
    );

    let error = h.controller.start(&[tagged_frame(1)]).await.unwrap_err();

    assert!(matches!(error, FramecastError::Authorization(_)));
    assert_eq!(h.controller.phase(), GenerationPhase::Failed);
    assert_eq!(h.controller.progress(), 100.0);
    assert!(h.controller.items().is_empty());
    assert!(h.controller.error().is_some());
    assert_eq!(h.authorizer.selections(), 1);
    assert_eq!(h.describer.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn selecting_a_credential_lets_the_run_proceed() {
    let h = harness(
        MockDescriber::default(),
        MockGenerator::finishing_after(1),
        MockAuthorizer::prompting(),
        fast_options(),
    );

    let outcome = h.controller.start(&[tagged_frame(1)]).await.unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(h.authorizer.selections(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_authorization_keeps_previous_items() {
    let h = harness(
        MockDescriber::default(),
        MockGenerator::finishing_after(1),
        MockAuthorizer::authorized(),
        fast_options(),
    );
    h.controller
        .start(&[tagged_frame(1), tagged_frame(2)])
        .await
        .unwrap();

    h.authorizer.has_key.store(false, Ordering::SeqCst);
    let error = h.controller.start(&[tagged_frame(3)]).await.unwrap_err();

    assert!(matches!(error, FramecastError::Authorization(_)));
    assert_eq!(h.controller.items().len(), 2);
}

// ── Run control ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn empty_input_and_double_start_are_no_ops() {
    let h = harness(
        MockDescriber::default(),
        MockGenerator::finishing_after(3),
        MockAuthorizer::authorized(),
        fast_options(),
    );

    assert_eq!(h.controller.start(&[]).await.unwrap(), RunOutcome::Skipped);
    assert_eq!(h.controller.phase(), GenerationPhase::Idle);

    let frames = [tagged_frame(1), tagged_frame(2)];
    let (first, second) = tokio::join!(h.controller.start(&frames), async {
        sleep(Duration::from_millis(500)).await;
        assert!(h.controller.is_running());
        h.controller.start(&[tagged_frame(9)]).await
    });

    assert_eq!(first.unwrap(), RunOutcome::Completed);
    assert_eq!(second.unwrap(), RunOutcome::Skipped);
    assert_eq!(h.controller.items().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn reset_mid_run_clears_items_and_stops_polling() {
    let h = harness(
        MockDescriber::default(),
        MockGenerator::never_finishing(),
        MockAuthorizer::authorized(),
        fast_options(),
    );
    let frames = [tagged_frame(1), tagged_frame(2)];

    let (outcome, ()) = tokio::join!(h.controller.start(&frames), async {
        sleep(Duration::from_secs(30)).await;
        h.controller.reset();
    });

    assert_eq!(outcome.unwrap(), RunOutcome::Cancelled);
    assert_eq!(h.controller.phase(), GenerationPhase::Idle);
    assert!(h.controller.items().is_empty());
    assert_eq!(h.controller.progress(), 0.0);
    assert_eq!(h.generator.prompts().len(), 1, "second item never started");

    let polls = h.generator.total_polls();
    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.generator.total_polls(), polls);
}

#[tokio::test(start_paused = true)]
async fn cancel_lets_the_item_in_flight_finish() {
    let h = harness(
        MockDescriber::default(),
        MockGenerator::finishing_after(5),
        MockAuthorizer::authorized(),
        fast_options(),
    );
    let frames = [tagged_frame(1), tagged_frame(2), tagged_frame(3)];

    let (outcome, ()) = tokio::join!(h.controller.start(&frames), async {
        // The first item finishes after ~5 s; the second is mid-poll.
        sleep(Duration::from_secs(7)).await;
        h.controller.cancel();
    });

    assert_eq!(outcome.unwrap(), RunOutcome::Cancelled);
    assert_eq!(h.controller.phase(), GenerationPhase::Cancelled);
    assert_eq!(h.controller.progress(), 100.0);

    let items = h.controller.items();
    let statuses: Vec<ItemStatus> = items.iter().map(|item| item.status).collect();
    assert_eq!(
        statuses,
        vec![
            ItemStatus::Complete,
            ItemStatus::Complete,
            ItemStatus::Pending
        ]
    );
    assert!(items[1].artifact.is_some());
    assert_eq!(h.generator.prompts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_description_still_settles_the_item() {
    let h = harness(
        MockDescriber::default(),
        MockGenerator::finishing_after(2),
        MockAuthorizer::authorized(),
        fast_options(),
    );
    let frames = [tagged_frame(1), tagged_frame(2)];

    let (outcome, ()) = tokio::join!(h.controller.start(&frames), async {
        sleep(Duration::from_millis(20)).await;
        h.controller.cancel();
    });

    assert_eq!(outcome.unwrap(), RunOutcome::Cancelled);
    let statuses: Vec<ItemStatus> = h.controller.items().iter().map(|item| item.status).collect();
    assert_eq!(statuses, vec![ItemStatus::Complete, ItemStatus::Pending]);
    assert_eq!(h.describer.calls(), 1);
    assert_eq!(h.generator.total_polls(), 2);
}

#[tokio::test(start_paused = true)]
async fn reset_deletes_clip_files() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        MockDescriber::default(),
        MockGenerator::finishing_after(1),
        MockAuthorizer::authorized(),
        fast_options().with_artifact_dir(dir.path()),
    );

    h.controller
        .start(&[tagged_frame(1), tagged_frame(2)])
        .await
        .unwrap();

    let paths: Vec<_> = h
        .controller
        .items()
        .iter()
        .map(|item| item.artifact.clone().unwrap().path)
        .collect();
    assert_eq!(paths.len(), 2);
    for (index, path) in paths.iter().enumerate() {
        assert!(path.starts_with(dir.path()));
        let expected = format!("clip from mem://operations/{}", index + 1);
        assert_eq!(std::fs::read(path).unwrap(), expected.as_bytes());
    }

    h.controller.reset();

    for path in &paths {
        assert!(!path.exists(), "{} was not deleted", path.display());
    }
}

#[tokio::test(start_paused = true)]
async fn saved_clips_outlive_reset() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        MockDescriber::default(),
        MockGenerator::finishing_after(1),
        MockAuthorizer::authorized(),
        fast_options(),
    );
    h.controller.start(&[tagged_frame(1)]).await.unwrap();

    let destination = dir.path().join("clip-01.mp4");
    let copied = h.controller.save_clip(0, &destination).unwrap();
    assert_eq!(copied, Some(b"clip from mem://operations/1".len() as u64));
    assert_eq!(h.controller.save_clip(5, &destination).unwrap(), None);

    h.controller.reset();
    assert_eq!(
        std::fs::read(&destination).unwrap(),
        b"clip from mem://operations/1"
    );
}

#[tokio::test(start_paused = true)]
async fn new_run_replaces_previous_clips() {
    let h = harness(
        MockDescriber::default(),
        MockGenerator::finishing_after(1),
        MockAuthorizer::authorized(),
        fast_options(),
    );
    h.controller.start(&[tagged_frame(1)]).await.unwrap();
    let old = h.controller.items()[0].artifact.clone().unwrap().path;
    assert!(old.exists());

    h.controller.start(&[tagged_frame(2)]).await.unwrap();

    assert!(!old.exists());
    assert_eq!(h.controller.items().len(), 1);
}

// ── Generation step ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn generate_clip_polls_at_the_configured_cadence() {
    let generator = MockGenerator::finishing_after(4);
    let options = GenerationOptions::new().with_poll_interval(Duration::from_secs(10));
    let token = framecast::CancellationToken::new();
    let started = tokio::time::Instant::now();

    let clip = generate_clip(&generator, "a lighthouse", &options, &token)
        .await
        .unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(40));
    assert_eq!(clip.size(), b"clip from mem://operations/1".len() as u64);
    assert_eq!(clip.info().mime_type, "video/mp4");
}

#[tokio::test(start_paused = true)]
async fn generate_clip_maps_fetch_failures() {
    let generator = MockGenerator::finishing_after(1).with_missing_downloads();
    let token = framecast::CancellationToken::new();

    let error = generate_clip(&generator, "x", &fast_options(), &token)
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        FramecastError::Fetch {
            kind: FetchKind::NotFound,
            ..
        }
    ));
}
