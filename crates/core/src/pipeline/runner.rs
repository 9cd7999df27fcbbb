//! Drives one job through the stage DAG.

use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::detect::{FaceDetection, FaceDetector, LandmarkDetector, LandmarkSet};
use crate::extract::{ExtractOptions, FrameExtractor, FrameRecord, FrameTag, VideoRef};
use crate::mask::{MaskArtifact, MaskGenerator};
use crate::models::ModelRegistry;
use crate::retry::with_retry;
use crate::storage::{ArtifactKeys, ArtifactKind, ArtifactStore};
use crate::synth::{AvatarSynthesizer, SynthesisInput, VideoEncoder};

use super::config::{JobConfig, OrchestratorConfig};
use super::error::StageFailure;
use super::pool::WorkerPool;
use super::types::{
    ArtifactManifest, Diagnostics, DroppedCounts, ErrorKind, Job, JobId, JobResult, PipelineState,
    Stage, StageCounts, StageSummary,
};
use super::uploads::UploadQueue;

/// Collaborators shared by every job of an orchestrator.
pub(crate) struct PipelineDeps {
    pub registry: Arc<ModelRegistry>,
    pub extractor: FrameExtractor,
    pub artifacts: ArtifactStore,
    pub encoder: Arc<dyn VideoEncoder>,
    pub pool: WorkerPool,
    pub config: OrchestratorConfig,
}

/// Cooperative cancellation signal of a job.
#[derive(Debug, Clone, Default)]
pub(crate) struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Stage implementations bound to the job's models.
struct Stages {
    faces: FaceDetector,
    landmarks: LandmarkDetector,
    masks: MaskGenerator,
    synthesizer: AvatarSynthesizer,
}

/// Runs a single job. Owns the job's counters; publishes snapshots to `updates`.
pub(crate) struct JobRunner {
    id: JobId,
    video: VideoRef,
    config: JobConfig,
    deps: Arc<PipelineDeps>,
    updates: Arc<watch::Sender<Job>>,
    cancel: CancelFlag,
    uploads: UploadQueue,
    stage: Stage,
    dropped: DroppedCounts,
    retries: u32,
    summary: StageSummary,
    warnings: Vec<String>,
}

impl JobRunner {
    pub fn new(
        job: &Job,
        deps: Arc<PipelineDeps>,
        updates: Arc<watch::Sender<Job>>,
        cancel: CancelFlag,
    ) -> Self {
        let uploads = UploadQueue::new(
            deps.artifacts.clone(),
            ArtifactKeys::new(&job.id),
            deps.config.upload_concurrency,
        );
        Self {
            id: job.id.clone(),
            video: job.video.clone(),
            config: job.config.clone(),
            deps,
            updates,
            cancel,
            uploads,
            stage: Stage::Queued,
            dropped: DroppedCounts::default(),
            retries: 0,
            summary: StageSummary::default(),
            warnings: Vec::new(),
        }
    }

    /// Runs the job to a terminal state.
    pub async fn run(mut self) {
        let started = Instant::now();
        info!("Job {} started for {}", self.id, self.video);

        match self.execute().await {
            Ok(result) => {
                info!(
                    "Job {} completed in {:?}: {} of {} frames used",
                    self.id,
                    started.elapsed(),
                    result.stages.synthesis.succeeded,
                    result.stages.extraction.succeeded
                );
                self.updates.send_modify(|job| {
                    job.diagnostics = result.diagnostics.clone();
                    job.result = Some(result);
                    if let Err(e) = job.advance(PipelineState::Completed) {
                        error!("Job {}: {}", job.id, e);
                    }
                });
            }
            Err(failure) => self.fail(failure).await,
        }
    }

    async fn fail(&mut self, failure: StageFailure) {
        // Persisted artifacts stay in place; only wait for in-flight uploads.
        self.uploads.drain().await;
        let diagnostics = self.diagnostics().await;
        let failure = failure.at(self.stage);

        if failure.kind == ErrorKind::Cancelled {
            warn!("Job {} cancelled during {}", self.id, failure.stage);
        } else {
            error!(
                "Job {} failed during {} ({}): {}",
                self.id, failure.stage, failure.kind, failure.message
            );
        }

        let state = PipelineState::Failed {
            kind: failure.kind,
            stage: failure.stage,
        };
        self.updates.send_modify(|job| {
            job.diagnostics = diagnostics;
            job.diagnostics.failure = Some(failure);
            if let Err(e) = job.advance(state) {
                error!("Job {}: {}", job.id, e);
            }
        });
    }

    async fn execute(&mut self) -> Result<JobResult, StageFailure> {
        let stages = self.prepare().await?;
        self.checkpoint().await?;

        self.enter(Stage::Extracting)?;
        let frames = self.extract().await?;
        self.checkpoint().await?;

        self.enter(Stage::Detecting)?;
        let faces = self.detect(&stages, frames).await?;
        self.checkpoint().await?;

        self.enter(Stage::Landmarking)?;
        let landmarked = self.locate(&stages, faces).await?;
        self.checkpoint().await?;

        self.enter(Stage::Masking)?;
        let masked = self.mask(&stages, landmarked).await?;
        self.check_drop_rate()?;
        self.checkpoint().await?;

        self.enter(Stage::UploadingPartial)?;
        let ledger = self.uploads.drain().await;
        if let Some(reason) = ledger.failure {
            return Err(StageFailure::new(ErrorKind::StorageError, reason));
        }
        self.checkpoint().await?;

        self.enter(Stage::Synthesizing)?;
        let inputs: Vec<SynthesisInput> = masked
            .into_iter()
            .map(|(frame, mask)| SynthesisInput {
                frame_index: frame.index,
                image: frame.image,
                mask: Arc::new(mask.mask),
            })
            .collect();
        let video = stages
            .synthesizer
            .synthesize(self.id.as_str(), &inputs, self.config.sample_rate_hz)
            .await?;
        self.retries += video.retries;
        self.summary.synthesis = StageCounts::new(inputs.len(), video.frame_count);
        drop(inputs);
        self.checkpoint().await?;

        self.enter(Stage::UploadingFinal)?;
        let avatar = self.uploads.put_now(ArtifactKind::Avatar, video.data).await?;

        let mut diagnostics = self.diagnostics().await;
        diagnostics.smoothed_frames = video.smoothed_frames;
        let ledger = self.uploads.ledger().await;
        let keys = self.uploads.keys();
        let mut manifest = ArtifactManifest {
            avatar: Some(avatar.key),
            manifest: keys.manifest(),
            ..Default::default()
        };
        for (kind, key) in ledger.persisted {
            match kind {
                ArtifactKind::Frame(_) => manifest.frames.push(key),
                ArtifactKind::Landmarks(_) => manifest.landmarks.push(key),
                ArtifactKind::Mask(_) => manifest.masks.push(key),
                ArtifactKind::Avatar | ArtifactKind::Manifest => {}
            }
        }

        let result = JobResult {
            job_id: self.id.clone(),
            status: PipelineState::Completed,
            manifest,
            stages: self.summary,
            diagnostics,
            seed: video.seed,
            completed_at: Utc::now(),
        };
        let document = serde_json::to_vec_pretty(&result)
            .map_err(|e| StageFailure::new(ErrorKind::Internal, e.to_string()))?;
        self.uploads.put_now(ArtifactKind::Manifest, document).await?;

        Ok(result)
    }

    /// Acquires the job's models and binds the stages to them.
    async fn prepare(&mut self) -> Result<Stages, StageFailure> {
        let registry = &self.deps.registry;
        let (face, landmark, synthesis) = tokio::try_join!(
            registry.acquire(&self.config.face_model),
            registry.acquire(&self.config.landmark_model),
            registry.acquire(&self.config.synthesis_model),
        )?;

        Ok(Stages {
            faces: FaceDetector::new(face, self.config.face_confidence_threshold)?,
            landmarks: LandmarkDetector::new(landmark, self.config.landmark_confidence_threshold)?,
            masks: MaskGenerator::new(self.config.mask_region, self.config.min_mask_area_px),
            synthesizer: AvatarSynthesizer::new(
                synthesis,
                Arc::clone(&self.deps.encoder),
                self.config.synthesis.clone(),
            )?
            .with_retry(self.deps.config.stage_retry.clone()),
        })
    }

    async fn extract(&mut self) -> Result<Vec<FrameRecord>, StageFailure> {
        let options = ExtractOptions {
            sample_rate_hz: self.config.sample_rate_hz,
            tolerate_partial: self.config.tolerate_partial_extraction,
        };
        let mut stream = self
            .deps
            .extractor
            .extract(&self.id, &self.video, options)
            .await?;
        let expected = stream.expected_frames();
        let batch = self.config.frame_batch_size.max(1);

        let mut frames = Vec::with_capacity(expected);
        while let Some(frame) = stream.next_frame().await {
            let frame = frame?;
            self.uploads
                .enqueue(ArtifactKind::Frame(frame.index), frame.raw_bytes())
                .await;
            frames.push(frame);

            if frames.len() % batch == 0 {
                let total = frames.len();
                self.updates.send_modify(|job| job.total_frames = total);
                self.checkpoint().await?;
            }
        }

        let total = frames.len();
        if total < expected {
            let warning = format!("extracted {} of {} expected frames", total, expected);
            warn!("Job {}: {}", self.id, warning);
            self.warnings.push(warning);
        }
        self.summary.extraction = StageCounts::new(expected, total);
        self.updates.send_modify(|job| job.total_frames = total);
        debug!("Job {}: extracted {} frames", self.id, total);
        Ok(frames)
    }

    async fn detect(
        &mut self,
        stages: &Stages,
        frames: Vec<FrameRecord>,
    ) -> Result<Vec<(FrameRecord, FaceDetection)>, StageFailure> {
        let total = frames.len();
        let retry = self.deps.config.stage_retry.clone();
        let detector = stages.faces.clone();

        let results = self
            .run_batched(frames, move |frame| {
                let detector = detector.clone();
                let retry = retry.clone();
                async move {
                    let label = format!("detect frame {}", frame.index);
                    let attempted = with_retry(&retry, &label, |_| detector.detect(&frame)).await?;
                    let retries = attempted.retries();
                    Ok((frame, attempted.value, retries))
                }
            })
            .await?;

        let mut faces = Vec::with_capacity(results.len());
        for (frame, detection, retries) in results {
            self.retries += retries;
            match detection {
                Some(face) => faces.push((frame.tagged(FrameTag::FaceFound), face)),
                None => {
                    debug!("Job {}: frame {} {}", self.id, frame.index, FrameTag::NoFace.as_str());
                    self.dropped.no_face += 1;
                }
            }
        }

        self.summary.detection = StageCounts::new(total, faces.len());
        self.publish_counters();
        Ok(faces)
    }

    async fn locate(
        &mut self,
        stages: &Stages,
        faces: Vec<(FrameRecord, FaceDetection)>,
    ) -> Result<Vec<(FrameRecord, LandmarkSet)>, StageFailure> {
        let total = faces.len();
        let retry = self.deps.config.stage_retry.clone();
        let detector = stages.landmarks.clone();
        let uploads = self.uploads.clone();

        let results = self
            .run_batched(faces, move |(frame, face)| {
                let detector = detector.clone();
                let retry = retry.clone();
                let uploads = uploads.clone();
                async move {
                    let label = format!("landmarks frame {}", frame.index);
                    let attempted =
                        with_retry(&retry, &label, |_| detector.locate(&frame, &face)).await?;
                    if let Some(set) = &attempted.value {
                        let document = set
                            .to_json()
                            .map_err(|e| StageFailure::new(ErrorKind::Internal, e.to_string()))?;
                        uploads
                            .enqueue(ArtifactKind::Landmarks(frame.index), document)
                            .await;
                    }
                    let retries = attempted.retries();
                    Ok((frame, attempted.value, retries))
                }
            })
            .await?;

        let mut landmarked = Vec::with_capacity(results.len());
        for (frame, landmarks, retries) in results {
            self.retries += retries;
            match landmarks {
                Some(set) => landmarked.push((frame.tagged(FrameTag::Landmarked), set)),
                None => {
                    debug!(
                        "Job {}: frame {} {}",
                        self.id,
                        frame.index,
                        FrameTag::LandmarkFailed.as_str()
                    );
                    self.dropped.landmark_failed += 1;
                }
            }
        }

        self.summary.landmarking = StageCounts::new(total, landmarked.len());
        self.publish_counters();
        Ok(landmarked)
    }

    async fn mask(
        &mut self,
        stages: &Stages,
        landmarked: Vec<(FrameRecord, LandmarkSet)>,
    ) -> Result<Vec<(FrameRecord, MaskArtifact)>, StageFailure> {
        let total = landmarked.len();
        let generator = stages.masks.clone();
        let uploads = self.uploads.clone();

        let results = self
            .run_batched(landmarked, move |(frame, landmarks)| {
                let generator = generator.clone();
                let uploads = uploads.clone();
                async move {
                    match generator.generate(&frame, &landmarks) {
                        Ok(mask) => {
                            uploads
                                .enqueue(ArtifactKind::Mask(frame.index), mask.raw_bytes())
                                .await;
                            Ok((frame, Some(mask)))
                        }
                        Err(e) => {
                            debug!("{}", e);
                            Ok((frame, None))
                        }
                    }
                }
            })
            .await?;

        let mut masked = Vec::with_capacity(results.len());
        for (frame, mask) in results {
            match mask {
                Some(mask) => masked.push((frame.tagged(FrameTag::Masked), mask)),
                None => self.dropped.mask_failed += 1,
            }
        }

        self.summary.masking = StageCounts::new(total, masked.len());
        self.publish_counters();
        Ok(masked)
    }

    fn check_drop_rate(&self) -> Result<(), StageFailure> {
        let total = self.summary.extraction.succeeded;
        let dropped = self.dropped.total();
        if total == 0 {
            return Ok(());
        }
        let rate = dropped as f64 / total as f64;
        if rate > self.config.drop_threshold {
            return Err(StageFailure::new(
                ErrorKind::DataQualityError,
                format!(
                    "{} of {} frames dropped ({:.1}% > {:.1}%): {}",
                    dropped,
                    total,
                    rate * 100.0,
                    self.config.drop_threshold * 100.0,
                    self.dropped
                ),
            ));
        }
        Ok(())
    }

    /// Runs `task` for every item on the worker pool, `frame_batch_size` at a time.
    ///
    /// Cancellation and upload failures are checked before each batch. A batch
    /// always runs to completion; the first error (in item order) is returned
    /// afterwards. Output order matches input order.
    async fn run_batched<I, O, F, Fut>(
        &self,
        items: Vec<I>,
        task: F,
    ) -> Result<Vec<O>, StageFailure>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<O, StageFailure>> + Send + 'static,
    {
        let batch_size = self.config.frame_batch_size.max(1);
        let mut outputs: Vec<(usize, O)> = Vec::with_capacity(items.len());
        let mut pending = items.into_iter().enumerate().peekable();

        while pending.peek().is_some() {
            self.checkpoint().await?;

            let mut tasks = JoinSet::new();
            for (position, item) in pending.by_ref().take(batch_size) {
                let pool = self.deps.pool.clone();
                let work = task(item);
                tasks.spawn(async move { (position, pool.run(work).await) });
            }

            let mut first_error: Option<(usize, StageFailure)> = None;
            while let Some(joined) = tasks.join_next().await {
                let (position, result) = match joined {
                    Ok((position, result)) => (position, result),
                    Err(e) => (usize::MAX, Err(StageFailure::from(e))),
                };
                match result {
                    Ok(output) => outputs.push((position, output)),
                    Err(e) => {
                        if first_error.as_ref().map_or(true, |(p, _)| position < *p) {
                            first_error = Some((position, e));
                        }
                    }
                }
            }
            if let Some((_, e)) = first_error {
                return Err(e);
            }
        }

        outputs.sort_by_key(|(position, _)| *position);
        Ok(outputs.into_iter().map(|(_, output)| output).collect())
    }

    /// Fails fast on cancellation or a permanently failed upload.
    async fn checkpoint(&self) -> Result<(), StageFailure> {
        if self.cancel.is_cancelled() {
            return Err(StageFailure::cancelled());
        }
        if let Some(reason) = self.uploads.failure().await {
            return Err(StageFailure::new(ErrorKind::StorageError, reason));
        }
        Ok(())
    }

    fn enter(&mut self, stage: Stage) -> Result<(), StageFailure> {
        let mut outcome = Ok(());
        self.updates
            .send_modify(|job| outcome = job.advance(PipelineState::from_stage(stage)));
        outcome.map_err(|e| StageFailure::new(ErrorKind::Internal, e.to_string()))?;
        self.stage = stage;
        debug!("Job {} entered {}", self.id, stage);
        Ok(())
    }

    fn publish_counters(&self) {
        let dropped = self.dropped;
        let retries = self.retries;
        self.updates.send_modify(|job| {
            job.diagnostics.dropped = dropped;
            job.diagnostics.transient_retries = retries;
        });
    }

    async fn diagnostics(&self) -> Diagnostics {
        let ledger = self.uploads.ledger().await;
        Diagnostics {
            dropped: self.dropped,
            transient_retries: self.retries + ledger.retries,
            storage_conflicts: ledger.conflicts,
            uploads_unchanged: ledger.unchanged,
            smoothed_frames: 0,
            failure: None,
            warnings: self.warnings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>(_: &T) {}

    // Compile-time checks: both futures are moved onto the tokio runtime.
    #[allow(dead_code)]
    fn runner_future_is_send(runner: JobRunner) {
        let run = runner.run();
        assert_send(&run);
        tokio::spawn(run);
    }

    #[allow(dead_code)]
    fn synthesis_future_is_send(
        synthesizer: Arc<AvatarSynthesizer>,
        inputs: Vec<SynthesisInput>,
    ) {
        tokio::spawn(async move { synthesizer.synthesize("job", &inputs, 5.0).await.is_ok() });
    }
}
