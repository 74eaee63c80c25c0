//! Output Writer: persist terminal payloads under deterministic names.
//!
//! Files are encoded to `{name}.tmp-{uuid}` and renamed into place, so a
//! partial PNG is never visible under its final name. The rename happens
//! under the job's [`JobArtifacts`] lock; once a failed job has sealed its
//! artifact set, late writes are discarded instead of committed.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::DynamicImage;
use tokio::task::JoinHandle;
use uuid::Uuid;

use designlift_core::job::PersistedArtifact;
use designlift_core::naming::{artifact_filename, artifact_url};
use designlift_core::types::{ImageSlot, JobId, StageName};

use crate::error::WriteError;
use crate::payload::ImagePayload;
use crate::refine::alpha_heatmap;

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub output_dir: PathBuf,
    /// Public URL prefix under which `output_dir` is served.
    pub base_url: String,
    /// Save every stage's output under `output_dir/debug/`.
    pub debug_images: bool,
}

pub struct OutputWriter {
    config: WriterConfig,
}

impl OutputWriter {
    /// Create the output directory if needed.
    pub fn new(config: WriterConfig) -> Result<Self, WriteError> {
        std::fs::create_dir_all(&config.output_dir)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Write `payload` as `design_{id}_{slot}_{variant}.png`, replacing any
    /// earlier artifact of the same job id, and record it in `artifacts`.
    pub async fn persist(
        &self,
        id: &JobId,
        slot: ImageSlot,
        variant: &str,
        payload: ImagePayload,
        artifacts: &JobArtifacts,
    ) -> Result<PersistedArtifact, WriteError> {
        let filename = artifact_filename(id, slot, variant)?;
        if artifacts.is_sealed() {
            return Err(WriteError::Abandoned);
        }

        let final_path = self.config.output_dir.join(&filename);
        let tmp_path = self
            .config
            .output_dir
            .join(format!("{filename}.tmp-{}", Uuid::new_v4()));

        let staged = tokio::task::spawn_blocking(move || encode_png(tmp_path, &payload))
            .await
            .map_err(|e| WriteError::Encode(format!("writer task failed: {e}")))??;

        artifacts.commit(staged, &final_path)?;

        tracing::info!(job_id = %id, %slot, path = %final_path.display(), "Artifact persisted");
        Ok(PersistedArtifact {
            path: final_path,
            url: artifact_url(&self.config.base_url, &filename),
        })
    }

    /// Best-effort save of an intermediate image to
    /// `debug/{job_id}/{slot}_{stage}.png`. Does nothing unless debug images
    /// are enabled; errors are logged and never reach the job.
    pub fn save_debug(
        &self,
        id: &JobId,
        slot: ImageSlot,
        stage: StageName,
        payload: &ImagePayload,
    ) -> Option<JoinHandle<()>> {
        if !self.config.debug_images {
            return None;
        }
        let payload = payload.clone();
        Some(self.spawn_debug_render(id, format!("{slot}_{stage}.png"), move || {
            payload.into_image()
        }))
    }

    /// Like [`save_debug`](Self::save_debug), but renders the payload's
    /// alpha matte as a heatmap to `{slot}_{stage}_heatmap.png`. Payloads
    /// without alpha are skipped.
    pub fn save_debug_heatmap(
        &self,
        id: &JobId,
        slot: ImageSlot,
        stage: StageName,
        payload: &ImagePayload,
    ) -> Option<JoinHandle<()>> {
        if !self.config.debug_images || !payload.image().color().has_alpha() {
            return None;
        }
        let image = payload.image().clone();
        let heatmap = move || DynamicImage::ImageRgb8(alpha_heatmap(&image.to_rgba8()));
        Some(self.spawn_debug_render(id, format!("{slot}_{stage}_heatmap.png"), heatmap))
    }

    fn spawn_debug_render<F>(&self, id: &JobId, filename: String, render: F) -> JoinHandle<()>
    where
        F: FnOnce() -> DynamicImage + Send + 'static,
    {
        let dir = self.config.output_dir.join("debug").join(id.to_string());
        let path = dir.join(filename);

        tokio::task::spawn_blocking(move || {
            let result = std::fs::create_dir_all(&dir)
                .map_err(WriteError::from)
                .and_then(|_| encode_png(path.clone(), &ImagePayload::new(render())))
                .map(|staged| {
                    staged.disarm();
                });
            match result {
                Ok(()) => tracing::debug!(path = %path.display(), "Debug image saved"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Debug image not saved"),
            }
        })
    }
}

fn encode_png(path: PathBuf, payload: &ImagePayload) -> Result<StagedFile, WriteError> {
    let staged = StagedFile(Some(path));
    let file = File::create(staged.path())?;
    let mut out = BufWriter::new(file);
    payload
        .image()
        .write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| WriteError::Encode(e.to_string()))?;
    out.into_inner()
        .map_err(|e| WriteError::Io(e.into_error()))?
        .sync_all()?;
    Ok(staged)
}

/// A file on disk that is removed when dropped unless disarmed.
struct StagedFile(Option<PathBuf>);

impl StagedFile {
    fn path(&self) -> &Path {
        self.0.as_deref().unwrap_or_else(|| Path::new(""))
    }

    fn disarm(mut self) -> PathBuf {
        self.0.take().unwrap_or_default()
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Temporary file not removed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-job artifact set
// ---------------------------------------------------------------------------

/// Artifacts committed on behalf of one job.
///
/// Shared between the job's two image drivers. Sealing is one-way: after
/// [`seal_and_purge`](Self::seal_and_purge) every recorded file is deleted
/// and later commits are refused.
#[derive(Debug, Clone, Default)]
pub struct JobArtifacts {
    inner: Arc<Mutex<ArtifactSet>>,
}

#[derive(Debug, Default)]
struct ArtifactSet {
    sealed: bool,
    paths: Vec<PathBuf>,
}

impl JobArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ArtifactSet> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    /// Paths committed so far.
    pub fn recorded(&self) -> Vec<PathBuf> {
        self.lock().paths.clone()
    }

    fn commit(&self, staged: StagedFile, final_path: &Path) -> Result<(), WriteError> {
        let mut set = self.lock();
        if set.sealed {
            // `staged` drops here and removes the temporary file.
            return Err(WriteError::Abandoned);
        }
        std::fs::rename(staged.path(), final_path)?;
        staged.disarm();
        set.paths.push(final_path.to_path_buf());
        Ok(())
    }

    /// Refuse further commits and delete everything committed so far.
    /// Returns the paths that were removed.
    pub fn seal_and_purge(&self) -> Vec<PathBuf> {
        let mut set = self.lock();
        set.sealed = true;
        let mut removed = Vec::new();
        for path in set.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Failed to delete partial artifact")
                }
            }
        }
        removed
    }

    /// Guard that seals and purges this set when dropped, unless
    /// [`PurgeGuard::keep`] is called first.
    pub fn purge_guard(&self) -> PurgeGuard {
        PurgeGuard(Some(self.clone()))
    }
}

/// Purges a job's artifacts if the job is abandoned before it finishes,
/// e.g. when the request future is dropped mid-flight.
#[must_use = "dropping the guard purges the artifacts immediately"]
pub struct PurgeGuard(Option<JobArtifacts>);

impl PurgeGuard {
    /// The job succeeded; leave its artifacts in place.
    pub fn keep(mut self) {
        self.0 = None;
    }
}

impl Drop for PurgeGuard {
    fn drop(&mut self) {
        let Some(artifacts) = self.0.take() else {
            return;
        };
        if artifacts.is_sealed() {
            return;
        }
        let removed = artifacts.seal_and_purge();
        if !removed.is_empty() {
            tracing::warn!(artifacts_removed = removed.len(), "Abandoned job artifacts removed");
        }
    }
}
