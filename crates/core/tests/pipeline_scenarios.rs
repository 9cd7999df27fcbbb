//! End-to-end pipeline scenarios.
//!
//! These tests drive the orchestrator with mock models, decoder, encoder and
//! object store:
//! - Frame sampling counts and the happy path
//! - Dropped-frame policy and job-level failure kinds
//! - Storage retries and idempotent re-runs
//! - Cancellation mid-stage and admission control

use std::sync::Arc;
use std::time::Duration;

use avatar_prep_core::{
    models::InferenceError,
    pipeline::{
        ErrorKind, Job, JobConfig, JobId, JobOutcome, JobRequest, JobResult, PipelineState, Stage,
    },
    storage::ArtifactStore,
    testing::{
        MockFaceModel, MockLandmarkModel, MockModelHub, MockModelLoader, MockObjectStore,
        MockSynthesisModel, MockVideoDecoder, MockVideoEncoder,
    },
    ModelRegistry, OrchestratorConfig, OrchestratorError, PipelineOrchestrator, RetryConfig,
    VideoRef,
};

/// Wires an orchestrator to mocks and keeps handles on them.
struct TestHarness {
    orchestrator: PipelineOrchestrator,
    store: Arc<MockObjectStore>,
    encoder: Arc<MockVideoEncoder>,
    landmarks: Arc<MockLandmarkModel>,
    hub: Arc<MockModelHub>,
}

struct HarnessBuilder {
    decoder: MockVideoDecoder,
    face: MockFaceModel,
    landmarks: MockLandmarkModel,
    config: OrchestratorConfig,
    job_config: JobConfig,
}

impl HarnessBuilder {
    fn new() -> Self {
        Self {
            // 10 s at 30 fps; sampled at 5 Hz this gives 50 frames
            decoder: MockVideoDecoder::new(10.0, 30.0),
            face: MockFaceModel::new(),
            landmarks: MockLandmarkModel::new(68),
            config: OrchestratorConfig::default().with_stage_retry(RetryConfig::immediate(3)),
            job_config: JobConfig::default(),
        }
    }

    fn decoder(mut self, decoder: MockVideoDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    fn face(mut self, face: MockFaceModel) -> Self {
        self.face = face;
        self
    }

    fn landmarks(mut self, landmarks: MockLandmarkModel) -> Self {
        self.landmarks = landmarks;
        self
    }

    fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config.with_stage_retry(RetryConfig::immediate(3));
        self
    }

    fn job_config(mut self, job_config: JobConfig) -> Self {
        self.job_config = job_config;
        self
    }

    async fn build(self) -> TestHarness {
        let store = Arc::new(MockObjectStore::new());
        let encoder = Arc::new(MockVideoEncoder::new());
        let landmarks = Arc::new(self.landmarks);
        let hub = Arc::new(MockModelHub::new());

        let loader = MockModelLoader::new()
            .with_face_model(Arc::new(self.face))
            .with_landmark_model(Arc::clone(&landmarks))
            .with_synthesis_model(Arc::new(MockSynthesisModel::new()));
        let registry = ModelRegistry::new(Arc::new(loader)).with_hub(hub.clone());

        let orchestrator = PipelineOrchestrator::new(
            self.config,
            Arc::new(registry),
            Arc::new(self.decoder),
            ArtifactStore::new(store.clone(), RetryConfig::immediate(3)),
            encoder.clone(),
        )
        .with_default_job_config(self.job_config);
        orchestrator.start().await;

        TestHarness {
            orchestrator,
            store,
            encoder,
            landmarks,
            hub,
        }
    }
}

impl TestHarness {
    async fn new() -> Self {
        HarnessBuilder::new().build().await
    }

    async fn run(&self, request: JobRequest) -> Job {
        let id = self
            .orchestrator
            .submit_job(request)
            .await
            .expect("submission accepted");
        tokio::time::timeout(Duration::from_secs(30), self.orchestrator.wait(&id))
            .await
            .expect("job finished in time")
            .expect("job known")
    }

    async fn run_default(&self) -> Job {
        self.run(video()).await
    }

    async fn keys(&self, job: &Job, dir: &str) -> Vec<String> {
        self.store
            .keys_with_prefix(&format!("jobs/{}/{}/", job.id, dir))
            .await
    }
}

fn video() -> JobRequest {
    JobRequest::new(VideoRef::Path("/videos/selfie.mp4".into()))
}

fn failure(job: &Job) -> (ErrorKind, Stage) {
    match job.state {
        PipelineState::Failed { kind, stage } => (kind, stage),
        other => panic!("expected failed job, got {}", other),
    }
}

fn assert_monotonic(job: &Job) {
    let ordinals: Vec<u8> = job.history.iter().map(|t| t.state.ordinal()).collect();
    assert!(
        ordinals.windows(2).all(|w| w[0] < w[1]),
        "state sequence not strictly forward: {:?}",
        job.history.iter().map(|t| t.state).collect::<Vec<_>>()
    );
    assert!(job.state.is_terminal());
}

#[tokio::test]
async fn test_extracts_fifty_frames() {
    let harness = TestHarness::new().await;
    let job = harness.run_default().await;

    assert_eq!(job.total_frames, 50);
    assert_eq!(harness.keys(&job, "frames").await.len(), 50);
}

#[tokio::test]
async fn test_happy_path_persists_everything() {
    let harness = TestHarness::new().await;
    let job = harness.run_default().await;

    assert_eq!(job.state, PipelineState::Completed);
    assert_monotonic(&job);
    assert_eq!(job.dropped_frames(), 0);

    let result = job.result.clone().expect("result recorded");
    assert_eq!(result.manifest.frames.len(), 50);
    assert_eq!(result.manifest.landmarks.len(), 50);
    assert_eq!(result.manifest.masks.len(), 50);
    assert_eq!(
        result.manifest.avatar.as_deref(),
        Some(format!("jobs/{}/avatar.mp4", job.id).as_str())
    );
    assert_eq!(result.manifest.frames[7], format!("jobs/{}/frames/frame_0007.raw", job.id));
    assert_eq!(result.stages.synthesis.succeeded, 50);
    assert_eq!(harness.encoder.last_frames().await.len(), 50);

    // The manifest object round-trips to the same result
    let stored = harness
        .store
        .keys()
        .await
        .into_iter()
        .find(|k| k.ends_with("manifest.json"))
        .expect("manifest stored");
    let bytes = avatar_prep_core::ObjectStore::get(harness.store.as_ref(), &stored)
        .await
        .unwrap();
    let manifest: JobResult = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(manifest.manifest, result.manifest);
    assert_eq!(manifest.seed, result.seed);

    match harness.orchestrator.result(&job.id).await.unwrap() {
        JobOutcome::Completed(r) => assert_eq!(r.job_id, job.id),
        other => panic!("expected completed outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_drop_rate_over_threshold_fails_before_synthesis() {
    // Sampled frame k carries source marker 6k; the first 20 have no face
    let face = MockFaceModel::new()
        .with_confidence(|marker| if marker / 6 < 20 { None } else { Some(0.95) });
    let harness = HarnessBuilder::new().face(face).build().await;

    let job = harness.run_default().await;

    assert_eq!(failure(&job), (ErrorKind::DataQualityError, Stage::Masking));
    assert_monotonic(&job);
    assert_eq!(job.diagnostics.dropped.no_face, 20);
    assert_eq!(job.dropped_frames(), 20);
    assert_eq!(harness.encoder.encode_count().await, 0);
    assert!(job
        .history
        .iter()
        .all(|t| t.state != PipelineState::Synthesizing));

    let message = &job.diagnostics.failure.as_ref().unwrap().message;
    assert!(message.contains("no_face"), "{}", message);
}

#[tokio::test]
async fn test_drop_rate_under_threshold_completes_with_survivors() {
    let face = MockFaceModel::new()
        .with_confidence(|marker| if marker / 6 < 10 { None } else { Some(0.95) });
    let harness = HarnessBuilder::new().face(face).build().await;

    let job = harness.run_default().await;

    assert_eq!(job.state, PipelineState::Completed);
    let result = job.result.unwrap();
    assert_eq!(result.manifest.frames.len(), 50);
    assert_eq!(result.manifest.landmarks.len(), 40);
    assert_eq!(result.manifest.masks.len(), 40);
    assert_eq!(result.manifest.masks[0], format!("jobs/{}/masks/mask_0010.raw", job.id));
    assert_eq!(result.stages.detection.succeeded, 40);
    assert_eq!(harness.encoder.last_frames().await.len(), 40);
}

#[tokio::test]
async fn test_all_frames_faceless_is_data_quality_error() {
    let harness = HarnessBuilder::new()
        .face(MockFaceModel::new().with_confidence(|_| None))
        .build()
        .await;

    let job = harness.run_default().await;

    assert_eq!(failure(&job), (ErrorKind::DataQualityError, Stage::Masking));
    assert_eq!(job.diagnostics.dropped.no_face, 50);
}

#[tokio::test]
async fn test_landmark_drops_count_toward_threshold() {
    let landmarks = MockLandmarkModel::new(68)
        .with_confidence(|marker| if marker / 6 < 20 { 0.2 } else { 0.9 });
    let harness = HarnessBuilder::new().landmarks(landmarks).build().await;

    let job = harness.run_default().await;

    assert_eq!(failure(&job), (ErrorKind::DataQualityError, Stage::Masking));
    assert_eq!(job.diagnostics.dropped.no_face, 0);
    assert_eq!(job.diagnostics.dropped.landmark_failed, 20);
    assert_eq!(harness.encoder.encode_count().await, 0);

    let message = &job.diagnostics.failure.as_ref().unwrap().message;
    assert!(message.contains("landmark_failed=20"), "{}", message);
}

#[tokio::test]
async fn test_degenerate_landmarks_count_as_mask_failures() {
    let landmarks = MockLandmarkModel::new(68).collapsed_when(|marker| marker / 6 < 20);
    let harness = HarnessBuilder::new().landmarks(landmarks).build().await;

    let job = harness.run_default().await;

    assert_eq!(failure(&job), (ErrorKind::DataQualityError, Stage::Masking));
    assert_eq!(job.diagnostics.dropped.landmark_failed, 0);
    assert_eq!(job.diagnostics.dropped.mask_failed, 20);
    // Landmarks were found, so their documents are kept
    assert_eq!(harness.keys(&job, "landmarks").await.len(), 50);
    assert_eq!(harness.keys(&job, "masks").await.len(), 30);
}

#[tokio::test]
async fn test_every_drop_category_adds_up() {
    // Sampled frames 0-3 have no face, 4-7 weak landmarks, 8-11 collapsed landmarks
    let face = MockFaceModel::new()
        .with_confidence(|marker| if marker / 6 < 4 { None } else { Some(0.95) });
    let landmarks = MockLandmarkModel::new(68)
        .with_confidence(|marker| if (4..8).contains(&(marker / 6)) { 0.2 } else { 0.9 })
        .collapsed_when(|marker| (8..12).contains(&(marker / 6)));
    let harness = HarnessBuilder::new().face(face).landmarks(landmarks).build().await;

    let job = harness.run_default().await;

    assert_eq!(job.state, PipelineState::Completed);
    let dropped = job.diagnostics.dropped;
    assert_eq!((dropped.no_face, dropped.landmark_failed, dropped.mask_failed), (4, 4, 4));
    assert_eq!(job.dropped_frames(), 12);

    let result = job.result.unwrap();
    assert_eq!(result.manifest.landmarks.len(), 42);
    assert_eq!(result.manifest.masks.len(), 38);
    assert_eq!(result.manifest.masks[0], format!("jobs/{}/masks/mask_0012.raw", job.id));
    assert_eq!(result.stages.masking.succeeded, 38);
    assert_eq!(harness.encoder.last_frames().await.len(), 38);
}

#[tokio::test]
async fn test_frame_order_survives_out_of_order_completion() {
    // Within each batch of 16, earlier frames take longer than later ones
    let face = MockFaceModel::new()
        .with_marker_delay(|marker| Duration::from_millis(2 * (15 - (marker / 6) % 16) as u64))
        .with_confidence(|marker| if (marker / 6) % 7 == 3 { None } else { Some(0.95) });
    let harness = HarnessBuilder::new()
        .face(face)
        .config(OrchestratorConfig::default().with_worker_slots(8))
        .build()
        .await;

    let job = harness.run_default().await;

    // The synthesizer rejects inputs that are not in frame order
    assert_eq!(job.state, PipelineState::Completed);

    let survivors: Vec<usize> = (0..50).filter(|k| k % 7 != 3).collect();
    let result = job.result.unwrap();
    let expected_masks: Vec<String> = survivors
        .iter()
        .map(|k| format!("jobs/{}/masks/mask_{:04}.raw", job.id, k))
        .collect();
    let expected_landmarks: Vec<String> = survivors
        .iter()
        .map(|k| format!("jobs/{}/landmarks/{:04}.json", job.id, k))
        .collect();
    assert_eq!(result.manifest.masks, expected_masks);
    assert_eq!(result.manifest.landmarks, expected_landmarks);
    assert_eq!(harness.encoder.last_frames().await.len(), survivors.len());
}

#[tokio::test]
async fn test_transient_storage_failures_are_retried() {
    let harness = TestHarness::new().await;
    harness.store.fail_next_puts(2).await;

    let job = harness.run_default().await;

    assert_eq!(job.state, PipelineState::Completed);
    assert!(job.diagnostics.failure.is_none());
    assert!(job.diagnostics.transient_retries >= 2);
    assert_eq!(harness.keys(&job, "frames").await.len(), 50);
}

#[tokio::test]
async fn test_storage_failure_fails_job() {
    let harness = TestHarness::new().await;
    harness.store.set_broken(Some("bucket deleted")).await;

    let job = harness.run_default().await;

    let (kind, _) = failure(&job);
    assert_eq!(kind, ErrorKind::StorageError);
    assert!(job.diagnostics.failure.unwrap().message.contains("bucket deleted"));
}

#[tokio::test]
async fn test_cancel_mid_landmarking() {
    let landmarks = MockLandmarkModel::new(68).with_delay(Duration::from_millis(20));
    let harness = HarnessBuilder::new()
        .landmarks(landmarks)
        .config(OrchestratorConfig::default().with_worker_slots(2))
        .job_config(JobConfig::default().with_batch_size(4))
        .build()
        .await;

    let id = harness.orchestrator.submit_job(video()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), async {
        while harness.landmarks.call_count() == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("landmarking started");

    assert!(harness.orchestrator.cancel(&id).await.unwrap());
    let job = harness.orchestrator.wait(&id).await.unwrap();

    assert_eq!(failure(&job), (ErrorKind::Cancelled, Stage::Landmarking));
    assert_monotonic(&job);

    // Started tasks finished and their artifacts stay in place
    let landmark_keys = harness.keys(&job, "landmarks").await;
    assert!(!landmark_keys.is_empty());
    assert!(landmark_keys.len() < 50);
    assert_eq!(harness.keys(&job, "frames").await.len(), 50);
    assert!(harness.keys(&job, "masks").await.is_empty());
    assert_eq!(harness.encoder.encode_count().await, 0);
}

#[tokio::test]
async fn test_missing_model_is_unavailable() {
    let harness = TestHarness::new().await;
    harness.hub.remove_model("vae").await;

    let job = harness.run_default().await;

    assert_eq!(failure(&job), (ErrorKind::ModelUnavailable, Stage::Queued));
    assert!(harness.store.keys().await.is_empty());
}

#[tokio::test]
async fn test_unreadable_video_is_corrupt_media() {
    let harness = HarnessBuilder::new()
        .decoder(MockVideoDecoder::new(10.0, 30.0).failing_open())
        .build()
        .await;

    let job = harness.run_default().await;

    assert_eq!(failure(&job), (ErrorKind::CorruptMedia, Stage::Extracting));
    match harness.orchestrator.result(&job.id).await.unwrap() {
        JobOutcome::Failed(failure) => {
            assert_eq!(failure.kind, ErrorKind::CorruptMedia);
            assert_eq!(failure.stage, Stage::Extracting);
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_partial_extraction_is_tolerated() {
    // Decoding stops after 5 s of source frames
    let harness = HarnessBuilder::new()
        .decoder(MockVideoDecoder::new(10.0, 30.0).failing_after(150))
        .build()
        .await;

    let job = harness.run_default().await;

    assert_eq!(job.state, PipelineState::Completed);
    assert!(job.total_frames > 0 && job.total_frames < 50);
    assert!(!job.diagnostics.warnings.is_empty());
}

#[tokio::test]
async fn test_landmark_count_mismatch_fails_job() {
    let harness = HarnessBuilder::new()
        .landmarks(MockLandmarkModel::new(68).returning_points(5))
        .build()
        .await;

    let job = harness.run_default().await;

    assert_eq!(
        failure(&job),
        (ErrorKind::ModelContractViolation, Stage::Landmarking)
    );
}

#[tokio::test]
async fn test_too_few_survivors_is_insufficient_frames() {
    let config = JobConfig::default()
        .with_drop_threshold(1.0)
        .with_min_synthesis_frames(60);
    let harness = HarnessBuilder::new().job_config(config).build().await;

    let job = harness.run_default().await;

    assert_eq!(failure(&job), (ErrorKind::InsufficientFrames, Stage::Synthesizing));
    // Per-frame artifacts were persisted before synthesis
    assert_eq!(harness.keys(&job, "masks").await.len(), 50);
}

#[tokio::test]
async fn test_transient_inference_failures_retry_in_place() {
    let face = MockFaceModel::new();
    face.fail_times(InferenceError::Transient("accelerator busy".into()), 2)
        .await;
    let harness = HarnessBuilder::new().face(face).build().await;

    let job = harness.run_default().await;

    assert_eq!(job.state, PipelineState::Completed);
    assert_monotonic(&job);
    assert!(job.diagnostics.transient_retries >= 2);
}

#[tokio::test]
async fn test_persistent_inference_failure_exhausts_retries() {
    let face = MockFaceModel::new();
    face.fail_times(InferenceError::Transient("accelerator gone".into()), 1000)
        .await;
    let harness = HarnessBuilder::new().face(face).build().await;

    let job = harness.run_default().await;

    assert_eq!(failure(&job), (ErrorKind::TransientExhausted, Stage::Detecting));
}

#[tokio::test]
async fn test_rerun_reuses_persisted_artifacts() {
    let harness = TestHarness::new().await;
    let id = JobId::parse("rerun-1").unwrap();

    let first = harness.run(video().with_job_id(id.clone())).await;
    assert_eq!(first.state, PipelineState::Completed);
    let puts_after_first = harness.store.put_calls();

    let second = harness.run(video().with_job_id(id.clone())).await;
    assert_eq!(second.state, PipelineState::Completed);
    // 50 frames + 50 landmarks + 50 masks + avatar were already stored
    assert_eq!(second.diagnostics.uploads_unchanged, 151);
    assert_eq!(second.diagnostics.storage_conflicts, 0);
    // Only the manifest (new completion time) is written again
    assert_eq!(harness.store.put_calls() - puts_after_first, 1);
    assert_eq!(second.result.unwrap().seed, first.result.unwrap().seed);
}

#[tokio::test]
async fn test_admission_control_rejects_over_limit() {
    let harness = HarnessBuilder::new()
        .landmarks(MockLandmarkModel::new(68).with_delay(Duration::from_millis(5)))
        .config(OrchestratorConfig::default().with_max_in_flight_jobs(1))
        .build()
        .await;

    let first = harness.orchestrator.submit_job(video()).await.unwrap();
    let err = harness.orchestrator.submit_job(video()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Rejected(_)));

    harness.orchestrator.wait(&first).await.unwrap();
}

#[tokio::test]
async fn test_duplicate_active_job_rejected() {
    let harness = HarnessBuilder::new()
        .landmarks(MockLandmarkModel::new(68).with_delay(Duration::from_millis(5)))
        .build()
        .await;
    let id = JobId::parse("dup").unwrap();

    harness
        .orchestrator
        .submit_job(video().with_job_id(id.clone()))
        .await
        .unwrap();
    let err = harness
        .orchestrator
        .submit_job(video().with_job_id(id.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::JobExists(_)));

    harness.orchestrator.wait(&id).await.unwrap();
}

#[tokio::test]
async fn test_stop_cancels_running_jobs() {
    let harness = HarnessBuilder::new()
        .landmarks(MockLandmarkModel::new(68).with_delay(Duration::from_millis(20)))
        .build()
        .await;
    let id = harness.orchestrator.submit_job(video()).await.unwrap();

    harness.orchestrator.stop().await;
    let job = harness.orchestrator.wait(&id).await.unwrap();

    assert_eq!(failure(&job).0, ErrorKind::Cancelled);
    assert!(matches!(
        harness.orchestrator.submit_job(video()).await,
        Err(OrchestratorError::NotRunning)
    ));
}
