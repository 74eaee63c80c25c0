//! Job and per-image state machine.
//!
//! A [`Job`] owns one [`ImageState`] per [`ImageSlot`]. Each image walks
//! the linear stage order
//!
//! ```text
//! Pending -> Fetched -> Extracted -> Segmented -> Upscaled -> Persisted
//! ```
//!
//! and may drop into `Failed` from any non-terminal stage. The job is
//! `Succeeded` only when both images are `Persisted`, and `Failed` as soon
//! as either image fails.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::request::ImageInputs;
use crate::types::{ErrorKind, ImageSlot, JobId, StageName, Timestamp};

// ---------------------------------------------------------------------------
// ImageStage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStage {
    Pending,
    Fetched,
    Extracted,
    Segmented,
    Upscaled,
    Persisted,
    Failed,
}

impl ImageStage {
    /// Linear successor, or `None` for terminal stages.
    pub fn next(self) -> Option<ImageStage> {
        match self {
            ImageStage::Pending => Some(ImageStage::Fetched),
            ImageStage::Fetched => Some(ImageStage::Extracted),
            ImageStage::Extracted => Some(ImageStage::Segmented),
            ImageStage::Segmented => Some(ImageStage::Upscaled),
            ImageStage::Upscaled => Some(ImageStage::Persisted),
            ImageStage::Persisted | ImageStage::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ImageStage::Persisted | ImageStage::Failed)
    }

    /// The pipeline step that moves an image out of this stage.
    pub fn pending_step(self) -> Option<StageName> {
        match self {
            ImageStage::Pending => Some(StageName::Download),
            ImageStage::Fetched => Some(StageName::Extraction),
            ImageStage::Extracted => Some(StageName::Segmentation),
            ImageStage::Segmented => Some(StageName::Upscale),
            ImageStage::Upscaled => Some(StageName::Persist),
            ImageStage::Persisted | ImageStage::Failed => None,
        }
    }
}

impl fmt::Display for ImageStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImageStage::Pending => "pending",
            ImageStage::Fetched => "fetched",
            ImageStage::Extracted => "extracted",
            ImageStage::Segmented => "segmented",
            ImageStage::Upscaled => "upscaled",
            ImageStage::Persisted => "persisted",
            ImageStage::Failed => "failed",
        })
    }
}

// ---------------------------------------------------------------------------
// Failures and artifacts
// ---------------------------------------------------------------------------

/// Typed failure naming the stage and image it originated from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub stage: StageName,
    pub slot: Option<ImageSlot>,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: ErrorKind, stage: StageName, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            slot: None,
            message: message.into(),
        }
    }

    pub fn for_slot(mut self, slot: ImageSlot) -> Self {
        self.slot = Some(slot);
        self
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot {
            Some(slot) => write!(
                f,
                "{} at {} ({}): {}",
                self.kind, self.stage, slot, self.message
            ),
            None => write!(f, "{} at {}: {}", self.kind, self.stage, self.message),
        }
    }
}

impl std::error::Error for JobFailure {}

/// A persisted output file and its public URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedArtifact {
    pub path: PathBuf,
    pub url: String,
}

// ---------------------------------------------------------------------------
// ImageState
// ---------------------------------------------------------------------------

/// Progress record for one image of a job.
///
/// The in-memory payload itself is owned by the executor and moved from
/// stage to stage; this record tracks where the image is and, once
/// persisted, where its artifact lives.
#[derive(Debug, Clone)]
pub struct ImageState {
    slot: ImageSlot,
    stage: ImageStage,
    artifact: Option<PersistedArtifact>,
    failure: Option<JobFailure>,
}

impl ImageState {
    pub fn new(slot: ImageSlot) -> Self {
        Self {
            slot,
            stage: ImageStage::Pending,
            artifact: None,
            failure: None,
        }
    }

    pub fn slot(&self) -> ImageSlot {
        self.slot
    }

    pub fn stage(&self) -> ImageStage {
        self.stage
    }

    pub fn artifact(&self) -> Option<&PersistedArtifact> {
        self.artifact.as_ref()
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        self.failure.as_ref()
    }

    /// Move to the linear successor. `Persisted` must go through
    /// [`persist`](Self::persist) so the artifact is recorded with it.
    pub fn advance(&mut self, to: ImageStage) -> Result<(), CoreError> {
        if to == ImageStage::Persisted || self.stage.next() != Some(to) {
            return Err(CoreError::InvalidTransition {
                from: self.stage,
                to,
            });
        }
        self.stage = to;
        Ok(())
    }

    pub fn persist(&mut self, artifact: PersistedArtifact) -> Result<(), CoreError> {
        if self.stage != ImageStage::Upscaled {
            return Err(CoreError::InvalidTransition {
                from: self.stage,
                to: ImageStage::Persisted,
            });
        }
        self.stage = ImageStage::Persisted;
        self.artifact = Some(artifact);
        Ok(())
    }

    pub fn fail(&mut self, failure: JobFailure) -> Result<(), CoreError> {
        if self.stage.is_terminal() {
            return Err(CoreError::InvalidTransition {
                from: self.stage,
                to: ImageStage::Failed,
            });
        }
        self.stage = ImageStage::Failed;
        self.failure = Some(failure);
        Ok(())
    }

    /// Forget a persisted artifact after it was deleted from disk.
    pub fn discard_artifact(&mut self) -> Option<PersistedArtifact> {
        self.artifact.take()
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One `/process` request covering a front/back image pair.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub inputs: ImageInputs,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    status: JobStatus,
    error: Option<JobFailure>,
    image_states: BTreeMap<ImageSlot, ImageState>,
}

impl Job {
    pub fn new(id: JobId, inputs: ImageInputs) -> Self {
        let image_states = ImageSlot::ALL
            .into_iter()
            .map(|slot| (slot, ImageState::new(slot)))
            .collect();
        Self {
            id,
            inputs,
            started_at: None,
            finished_at: None,
            status: JobStatus::Pending,
            error: None,
            image_states,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn error(&self) -> Option<&JobFailure> {
        self.error.as_ref()
    }

    pub fn image(&self, slot: ImageSlot) -> &ImageState {
        &self.image_states[&slot]
    }

    pub fn image_mut(&mut self, slot: ImageSlot) -> &mut ImageState {
        self.image_states
            .get_mut(&slot)
            .unwrap_or_else(|| unreachable!("every slot is populated in Job::new"))
    }

    pub fn input_url(&self, slot: ImageSlot) -> &str {
        match slot {
            ImageSlot::Front => &self.inputs.front,
            ImageSlot::Back => &self.inputs.back,
        }
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark the job succeeded. Both images must already be persisted.
    pub fn finish_success(&mut self) -> Result<(), CoreError> {
        if let Some(state) = self
            .image_states
            .values()
            .find(|s| s.stage() != ImageStage::Persisted)
        {
            return Err(CoreError::Internal(format!(
                "cannot succeed job {}: {} image is {}",
                self.id,
                state.slot(),
                state.stage()
            )));
        }
        self.status = JobStatus::Succeeded;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the job failed. Any image that has not reached a terminal
    /// stage is failed alongside it.
    pub fn finish_failure(&mut self, failure: JobFailure) {
        for state in self.image_states.values_mut() {
            if !state.stage().is_terminal() {
                let _ = state.fail(failure.clone());
            }
        }
        self.status = JobStatus::Failed;
        self.error = Some(failure);
        self.finished_at = Some(Utc::now());
    }

    /// Wall-clock time between start and finish, always positive once
    /// the job is terminal.
    pub fn processing_time_seconds(&self) -> f64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => {
                let micros = (end - start).num_microseconds().unwrap_or(i64::MAX);
                (micros.max(1) as f64) / 1_000_000.0
            }
            _ => 0.0,
        }
    }

    /// The image furthest behind, used to attribute job-level timeouts.
    pub fn slowest_image(&self) -> &ImageState {
        self.image_states
            .values()
            .filter(|s| !s.stage().is_terminal())
            .min_by_key(|s| s.stage() as u8)
            .unwrap_or_else(|| self.image(ImageSlot::Front))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn inputs() -> ImageInputs {
        ImageInputs {
            front: "https://x/front.png".into(),
            back: "https://x/back.png".into(),
        }
    }

    fn artifact(name: &str) -> PersistedArtifact {
        PersistedArtifact {
            path: PathBuf::from(name),
            url: format!("https://cdn/{name}"),
        }
    }

    fn walk_to_upscaled(state: &mut ImageState) {
        for to in [
            ImageStage::Fetched,
            ImageStage::Extracted,
            ImageStage::Segmented,
            ImageStage::Upscaled,
        ] {
            state.advance(to).unwrap();
        }
    }

    #[test]
    fn image_walks_linear_order() {
        let mut state = ImageState::new(ImageSlot::Front);
        walk_to_upscaled(&mut state);
        state.persist(artifact("a.png")).unwrap();
        assert_eq!(state.stage(), ImageStage::Persisted);
        assert!(state.artifact().is_some());
    }

    #[test]
    fn skipping_a_stage_is_rejected() {
        let mut state = ImageState::new(ImageSlot::Back);
        let err = state.advance(ImageStage::Extracted).unwrap_err();
        assert_matches!(
            err,
            CoreError::InvalidTransition {
                from: ImageStage::Pending,
                to: ImageStage::Extracted
            }
        );
    }

    #[test]
    fn persisted_requires_artifact_path() {
        let mut state = ImageState::new(ImageSlot::Front);
        walk_to_upscaled(&mut state);
        assert!(state.advance(ImageStage::Persisted).is_err());
    }

    #[test]
    fn failed_is_reachable_from_any_non_terminal_stage() {
        let mut state = ImageState::new(ImageSlot::Front);
        state.advance(ImageStage::Fetched).unwrap();
        let failure = JobFailure::new(ErrorKind::ExternalApiError, StageName::Extraction, "quota");
        state.fail(failure).unwrap();
        assert_eq!(state.stage(), ImageStage::Failed);
    }

    #[test]
    fn terminal_stages_are_final() {
        let mut state = ImageState::new(ImageSlot::Front);
        let failure = JobFailure::new(ErrorKind::DownloadError, StageName::Download, "404");
        state.fail(failure.clone()).unwrap();
        assert!(state.fail(failure).is_err());
        assert!(state.advance(ImageStage::Fetched).is_err());
    }

    #[test]
    fn job_succeeds_only_when_both_images_persisted() {
        let mut job = Job::new(JobId::Int(1), inputs());
        job.start();

        walk_to_upscaled(job.image_mut(ImageSlot::Front));
        job.image_mut(ImageSlot::Front)
            .persist(artifact("f.png"))
            .unwrap();
        assert!(job.finish_success().is_err());

        walk_to_upscaled(job.image_mut(ImageSlot::Back));
        job.image_mut(ImageSlot::Back)
            .persist(artifact("b.png"))
            .unwrap();
        job.finish_success().unwrap();

        assert_eq!(job.status(), JobStatus::Succeeded);
        assert!(job.processing_time_seconds() > 0.0);
    }

    #[test]
    fn job_failure_fails_in_flight_images() {
        let mut job = Job::new(JobId::from("abc"), inputs());
        job.start();
        job.image_mut(ImageSlot::Back)
            .advance(ImageStage::Fetched)
            .unwrap();

        let failure = JobFailure::new(ErrorKind::DownloadError, StageName::Download, "404")
            .for_slot(ImageSlot::Front);
        job.finish_failure(failure.clone());

        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error(), Some(&failure));
        assert_eq!(job.image(ImageSlot::Front).stage(), ImageStage::Failed);
        assert_eq!(job.image(ImageSlot::Back).stage(), ImageStage::Failed);
    }

    #[test]
    fn slowest_image_is_furthest_behind() {
        let mut job = Job::new(JobId::Int(7), inputs());
        job.image_mut(ImageSlot::Front)
            .advance(ImageStage::Fetched)
            .unwrap();
        assert_eq!(job.slowest_image().slot(), ImageSlot::Back);
        assert_eq!(
            job.slowest_image().stage().pending_step(),
            Some(StageName::Download)
        );
    }

    #[test]
    fn failure_display_names_stage_and_slot() {
        let failure = JobFailure::new(ErrorKind::DownloadError, StageName::Download, "HTTP 404")
            .for_slot(ImageSlot::Front);
        assert_eq!(
            failure.to_string(),
            "DownloadError at download (front): HTTP 404"
        );
    }
}
