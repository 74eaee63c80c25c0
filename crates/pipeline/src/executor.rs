//! Pipeline Executor.
//!
//! Drives the two images of a job through
//! `Pending -> Fetched -> Extracted -> Segmented -> Upscaled -> Persisted`
//! concurrently and folds their outcomes into one job result.
//!
//! The first failure (or the job deadline) ends the job: the sibling's
//! driver is dropped where it stands, in-flight GPU calls run to
//! completion in their own tasks with their results discarded, and any
//! artifact already written for the job is deleted before the failure is
//! returned. Dropping the [`PipelineExecutor::execute`] future (client
//! disconnect, outer request timeout) cancels the job and deletes its
//! artifacts the same way.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use designlift_core::job::{ImageStage, Job, JobFailure};
use designlift_core::naming::artifact_filename;
use designlift_core::request::{ImageInputs, ProcessRequest, ProcessResponse};
use designlift_core::types::{ErrorKind, ImageSlot, JobId, StageName};
use designlift_models::{ModelHandle, ModelKind, ModelRegistry, SegmentationVariant};

use crate::fetcher::AssetFetcher;
use crate::limiter::ConcurrencyLimiter;
use crate::payload::ImagePayload;
use crate::stages::{standard_stages, Stage};
use crate::writer::{JobArtifacts, OutputWriter};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Overall deadline for one job, both images included.
    pub job_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(180),
        }
    }
}

pub struct PipelineExecutor {
    registry: Arc<ModelRegistry>,
    fetcher: Arc<AssetFetcher>,
    limiter: Arc<ConcurrencyLimiter>,
    writer: Arc<OutputWriter>,
    stages: Vec<Arc<dyn Stage>>,
    variant: SegmentationVariant,
    job_timeout: Duration,
    shutdown: CancellationToken,
}

type Handles = HashMap<ModelKind, Arc<ModelHandle>>;

impl PipelineExecutor {
    pub fn new(
        registry: Arc<ModelRegistry>,
        fetcher: Arc<AssetFetcher>,
        limiter: Arc<ConcurrencyLimiter>,
        writer: Arc<OutputWriter>,
        config: ExecutorConfig,
    ) -> Self {
        let variant = registry.segmentation_variant();
        Self {
            registry,
            fetcher,
            limiter,
            writer,
            stages: standard_stages(variant),
            variant,
            job_timeout: config.job_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the stage list. Stages must still reach `Extracted`,
    /// `Segmented` and `Upscaled` in that order.
    pub fn with_stages(mut self, stages: Vec<Arc<dyn Stage>>) -> Self {
        self.stages = stages;
        self
    }

    pub fn is_ready(&self) -> bool {
        self.registry.is_ready()
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn writer(&self) -> &OutputWriter {
        &self.writer
    }

    /// Cancel every running job and refuse new GPU admissions.
    pub fn shutdown(&self) {
        tracing::info!("Pipeline executor shutting down");
        self.shutdown.cancel();
        self.limiter.close();
    }

    /// Validate, gate on readiness, run the job and shape the outcome.
    pub async fn process(&self, request: ProcessRequest) -> Result<ProcessResponse, JobFailure> {
        request.check().map_err(|e| {
            JobFailure::new(ErrorKind::ValidationError, StageName::Request, e.to_string())
        })?;
        if !self.is_ready() {
            return Err(not_ready());
        }

        let job = self.execute(request.id, request.output).await;
        let artifact_url = |slot: ImageSlot| {
            job.image(slot)
                .artifact()
                .map(|a| a.url.clone())
                .ok_or_else(|| {
                    job.error().cloned().unwrap_or_else(|| {
                        JobFailure::new(
                            ErrorKind::StorageError,
                            StageName::Persist,
                            "job ended without an artifact",
                        )
                        .for_slot(slot)
                    })
                })
        };

        Ok(ProcessResponse {
            id: job.id.clone(),
            front_output: artifact_url(ImageSlot::Front)?,
            back_output: artifact_url(ImageSlot::Back)?,
            processing_time_seconds: job.processing_time_seconds(),
        })
    }

    /// Run one job to a terminal state. Never panics on pipeline errors;
    /// the outcome is recorded on the returned [`Job`].
    pub async fn execute(&self, id: JobId, inputs: ImageInputs) -> Job {
        let mut job = Job::new(id, inputs);
        job.start();
        tracing::info!(job_id = %job.id, variant = %self.variant, "Job started");

        let handles = match self.preflight(&job.id) {
            Ok(handles) => handles,
            Err(failure) => {
                tracing::warn!(job_id = %job.id, error = %failure, "Job rejected");
                job.finish_failure(failure);
                return job;
            }
        };

        let id = job.id.clone();
        let cancel = self.shutdown.child_token();
        let artifacts = JobArtifacts::new();
        let purge_guard = artifacts.purge_guard();
        let _cancel_on_drop = cancel.clone().drop_guard();
        let deadline = tokio::time::Instant::now() + self.job_timeout;
        let shared = Mutex::new(job);

        let failure = {
            let front = self.drive(ImageSlot::Front, &shared, &handles, &cancel, &artifacts);
            let back = self.drive(ImageSlot::Back, &shared, &handles, &cancel, &artifacts);
            tokio::pin!(front);
            tokio::pin!(back);
            let (mut front_done, mut back_done) = (false, false);

            loop {
                if front_done && back_done {
                    break None;
                }
                tokio::select! {
                    result = &mut front, if !front_done => {
                        front_done = true;
                        if let Err(f) = result {
                            break Some(f);
                        }
                    }
                    result = &mut back, if !back_done => {
                        back_done = true;
                        if let Err(f) = result {
                            break Some(f);
                        }
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        let failure = self.timeout_failure(&lock(&shared));
                        break Some(failure);
                    }
                    _ = cancel.cancelled() => {
                        break Some(JobFailure::new(
                            ErrorKind::ServiceUnavailable,
                            StageName::Request,
                            "service is shutting down",
                        ));
                    }
                }
            }
        };

        let mut job = shared.into_inner().unwrap_or_else(PoisonError::into_inner);
        match failure {
            None => match job.finish_success() {
                Ok(()) => purge_guard.keep(),
                Err(e) => {
                    artifacts.seal_and_purge();
                    job.finish_failure(JobFailure::new(
                        ErrorKind::StorageError,
                        StageName::Persist,
                        e.to_string(),
                    ));
                }
            },
            Some(failure) => {
                cancel.cancel();
                let removed = artifacts.seal_and_purge();
                for slot in ImageSlot::ALL {
                    job.image_mut(slot).discard_artifact();
                }
                tracing::warn!(
                    job_id = %id,
                    error = %failure,
                    artifacts_removed = removed.len(),
                    "Job failed",
                );
                job.finish_failure(failure);
                return job;
            }
        }

        tracing::info!(
            job_id = %id,
            status = ?job.status(),
            processing_time_seconds = job.processing_time_seconds(),
            "Job finished",
        );
        job
    }

    /// Checks that must pass before any download starts.
    fn preflight(&self, id: &JobId) -> Result<Handles, JobFailure> {
        artifact_filename(id, ImageSlot::Front, self.variant.as_str()).map_err(|e| {
            JobFailure::new(ErrorKind::ValidationError, StageName::Request, e.to_string())
        })?;
        if !self.is_ready() {
            return Err(not_ready());
        }

        let mut handles = HashMap::new();
        for stage in &self.stages {
            let kind = stage.model();
            let handle = self.registry.handle(kind).map_err(|e| {
                JobFailure::new(ErrorKind::ServiceUnavailable, StageName::Request, e.to_string())
            })?;
            if !handle.is_ready() {
                return Err(not_ready());
            }
            handles.insert(kind, handle);
        }
        Ok(handles)
    }

    /// Take one image from its URL to a persisted artifact.
    async fn drive(
        &self,
        slot: ImageSlot,
        job: &Mutex<Job>,
        handles: &Handles,
        cancel: &CancellationToken,
        artifacts: &JobArtifacts,
    ) -> Result<(), JobFailure> {
        let (id, url) = {
            let job = lock(job);
            (job.id.clone(), job.input_url(slot).to_string())
        };

        let started = Instant::now();
        let image = self.fetcher.fetch_image(&url).await.map_err(|e| {
            JobFailure::new(e.kind(), StageName::Download, e.to_string()).for_slot(slot)
        })?;
        advance(job, slot, ImageStage::Fetched, StageName::Download)?;
        tracing::info!(
            job_id = %id,
            %slot,
            stage = %StageName::Download,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Stage complete",
        );

        let mut payload = ImagePayload::new(image);
        for stage in &self.stages {
            let name = stage.name();
            let handle = handles.get(&stage.model()).cloned().ok_or_else(|| {
                JobFailure::new(
                    ErrorKind::ServiceUnavailable,
                    name,
                    format!("no {} model handle", stage.model()),
                )
                .for_slot(slot)
            })?;

            let started = Instant::now();
            payload = if stage.gpu_bound() {
                self.run_gpu(Arc::clone(stage), payload, handle, cancel, slot)
                    .await?
            } else {
                stage
                    .transform(payload, &handle)
                    .await
                    .map_err(|e| JobFailure::new(e.kind(), name, e.to_string()).for_slot(slot))?
            };
            advance(job, slot, stage.target(), name)?;
            tracing::info!(
                job_id = %id,
                %slot,
                stage = %name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Stage complete",
            );
            self.writer.save_debug(&id, slot, name, &payload);
            if name == StageName::Segmentation {
                self.writer.save_debug_heatmap(&id, slot, name, &payload);
            }
        }

        let artifact = self
            .writer
            .persist(&id, slot, self.variant.as_str(), payload, artifacts)
            .await
            .map_err(|e| {
                JobFailure::new(e.kind(), StageName::Persist, e.to_string()).for_slot(slot)
            })?;
        lock(job)
            .image_mut(slot)
            .persist(artifact)
            .map_err(|e| {
                JobFailure::new(ErrorKind::StorageError, StageName::Persist, e.to_string())
                    .for_slot(slot)
            })
    }

    /// Run a GPU-bound stage under a limiter slot.
    ///
    /// The stage runs in its own task which owns the permit, so dropping
    /// the driver mid-call neither aborts the GPU work nor frees the slot
    /// before that work is done.
    async fn run_gpu(
        &self,
        stage: Arc<dyn Stage>,
        payload: ImagePayload,
        handle: Arc<ModelHandle>,
        cancel: &CancellationToken,
        slot: ImageSlot,
    ) -> Result<ImagePayload, JobFailure> {
        let name = stage.name();
        let permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| JobFailure::new(e.kind(), name, e.to_string()).for_slot(slot))?;

        let cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let _permit = permit;
            if cancel.is_cancelled() {
                return None;
            }
            Some(stage.transform(payload, &handle).await)
        });

        match task.await {
            Ok(Some(Ok(image))) => Ok(image),
            Ok(Some(Err(e))) => Err(JobFailure::new(e.kind(), name, e.to_string()).for_slot(slot)),
            Ok(None) => Err(JobFailure::new(
                ErrorKind::ServiceUnavailable,
                name,
                "job cancelled before the stage started",
            )
            .for_slot(slot)),
            Err(e) => Err(JobFailure::new(
                ErrorKind::ModelInferenceError,
                name,
                format!("stage task failed: {e}"),
            )
            .for_slot(slot)),
        }
    }

    /// A deadline failure, attributed to the image furthest behind.
    fn timeout_failure(&self, job: &Job) -> JobFailure {
        let image = job.slowest_image();
        let stage = image
            .stage()
            .pending_step()
            .unwrap_or(StageName::Request);
        JobFailure::new(
            ErrorKind::Timeout,
            stage,
            format!("job exceeded its {}s deadline", self.job_timeout.as_secs_f64()),
        )
        .for_slot(image.slot())
    }
}

fn not_ready() -> JobFailure {
    JobFailure::new(
        ErrorKind::ServiceUnavailable,
        StageName::Request,
        "models are not loaded yet",
    )
}

fn lock(job: &Mutex<Job>) -> MutexGuard<'_, Job> {
    job.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Record a stage transition. Only fails for a misordered stage list.
fn advance(
    job: &Mutex<Job>,
    slot: ImageSlot,
    to: ImageStage,
    stage: StageName,
) -> Result<(), JobFailure> {
    lock(job).image_mut(slot).advance(to).map_err(|e| {
        JobFailure::new(ErrorKind::ModelInferenceError, stage, e.to_string()).for_slot(slot)
    })
}
