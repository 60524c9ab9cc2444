mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use facematch::{PipelineConfig, PipelineError, ProcessingPipeline};
use index::ParticipantRecord;

async fn wait_until(mut ready: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !ready() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn gated_pipeline(config: PipelineConfig) -> (Arc<ProcessingPipeline>, Arc<GatedEncoder>) {
    let repo = seeded_repo(&[("alice", Some("alice@example.com")), ("bob", None)]);
    add_event(&repo, "evt-2");
    repo.enroll("evt-2", ParticipantRecord::new("carol", basis(2)))
        .unwrap();

    let encoder = Arc::new(GatedEncoder::new());
    let pipeline = pipeline_with(
        repo,
        encoder.clone(),
        Arc::new(RecordingTransport::default()),
        config,
    );
    (Arc::new(pipeline), encoder)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_run_for_an_event_is_rejected_while_first_is_active() {
    let (pipeline, encoder) = gated_pipeline(PipelineConfig::default());

    let first = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline
                .process_photos(EVENT, vec![photo_of("a.jpg", &[0]), photo_of("b.jpg", &[1])])
                .await
        })
    };
    wait_until(|| encoder.calls.load(Ordering::SeqCst) >= 1).await;

    let status = pipeline.processing_status(EVENT).expect("run is active");
    assert_eq!(status.event_id, EVENT);
    assert_eq!(status.total_photos, 2);
    assert_eq!(status.current_photo, 0);

    let err = pipeline
        .process_photos(EVENT, vec![photo_of("c.jpg", &[0])])
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyProcessing { .. }));
    assert!(err.is_retryable());

    encoder.gate.open();
    let result = first.await.unwrap().unwrap();
    assert_eq!(result.photos_processed, 2);
    assert!(pipeline.processing_status(EVENT).is_none());

    let again = pipeline
        .process_photos(EVENT, vec![photo_of("c.jpg", &[0])])
        .await
        .unwrap();
    assert_eq!(again.photos_processed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_events_run_side_by_side() {
    let (pipeline, encoder) = gated_pipeline(PipelineConfig::default());

    let spawn_run = |event_id: &'static str, axis: usize| {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            pipeline
                .process_photos(event_id, vec![photo_of("shared-name.jpg", &[axis])])
                .await
        })
    };
    let first = spawn_run(EVENT, 0);
    let second = spawn_run("evt-2", 2);

    wait_until(|| encoder.calls.load(Ordering::SeqCst) >= 2).await;
    assert_eq!(pipeline.active_events(), vec![EVENT.to_string(), "evt-2".to_string()]);

    encoder.gate.open();
    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(first.matched_users[0].user_id, "alice");
    assert_eq!(second.matched_users[0].user_id, "carol");
    assert!(pipeline.active_events().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timed_out_run_releases_the_event() {
    let config = PipelineConfig::default().with_run_timeout(Some(Duration::from_millis(100)));
    let (pipeline, encoder) = gated_pipeline(config);

    let err = pipeline
        .process_photos(EVENT, vec![photo_of("slow.jpg", &[0])])
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::TimedOut { ref event_id, .. } if event_id == EVENT));
    assert!(!pipeline.is_processing(EVENT));

    // Let the stranded encoder call finish; the next run must not block.
    encoder.gate.open();
    let result = pipeline
        .process_photos(EVENT, vec![photo_of("fast.jpg", &[0])])
        .await
        .unwrap();
    assert_eq!(result.photos_processed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timed_out_run_keeps_its_encoder_permit_until_the_call_returns() {
    let repo = seeded_repo(&[("alice", None)]);
    let encoder = Arc::new(InstrumentedEncoder::new(Duration::from_millis(400)));
    let pipeline = pipeline_with(
        repo,
        encoder.clone(),
        Arc::new(RecordingTransport::default()),
        PipelineConfig::default()
            .with_encoder_concurrency(1)
            .with_run_timeout(Some(Duration::from_millis(50))),
    );

    for name in ["first.jpg", "second.jpg"] {
        let err = pipeline
            .process_photos(EVENT, vec![photo_of(name, &[0])])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::TimedOut { .. }));
    }

    // The stranded first call still holds the only permit; the second run
    // must not have reached the encoder alongside it.
    tokio::time::sleep(Duration::from_millis(450)).await;
    assert_eq!(encoder.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_callers_one_event_exactly_one_runs() {
    let (pipeline, encoder) = gated_pipeline(PipelineConfig::default());

    let mut handles = Vec::new();
    for i in 0..6 {
        let pipeline = Arc::clone(&pipeline);
        handles.push(tokio::spawn(async move {
            pipeline
                .process_photos(EVENT, vec![photo_of(&format!("{i}.jpg"), &[0])])
                .await
        }));
    }

    wait_until(|| encoder.calls.load(Ordering::SeqCst) >= 1).await;
    // Give the losers time to hit the registry before the winner finishes.
    tokio::time::sleep(Duration::from_millis(50)).await;
    encoder.gate.open();

    let mut accepted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(PipelineError::AlreadyProcessing { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(rejected, 5);
}
