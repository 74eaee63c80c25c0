//! Artifact naming convention.
//!
//! Output files are named deterministically from the job id, the image
//! slot and the pipeline variant, so re-processing the same id
//! overwrites the same files and yields the same URLs.

use crate::error::CoreError;
use crate::types::{ImageSlot, JobId};

/// Longest string id accepted in a filename.
pub const MAX_ID_LEN: usize = 128;

/// Check that a job id is safe to embed in a filename.
///
/// Integer ids are always valid. String ids must be 1 to 128 characters
/// drawn from `[A-Za-z0-9_-]`.
pub fn validate_job_id(id: &JobId) -> Result<(), CoreError> {
    let JobId::Str(s) = id else {
        return Ok(());
    };
    if s.is_empty() || s.len() > MAX_ID_LEN {
        return Err(CoreError::Validation(format!(
            "id must be 1-{MAX_ID_LEN} characters, got {}",
            s.len()
        )));
    }
    if let Some(bad) = s
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(CoreError::Validation(format!(
            "id contains invalid character {bad:?}; allowed: letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}

/// Build an artifact filename.
///
/// Convention: `design_{id}_{slot}_{variant}.png`
///
/// # Examples
///
/// ```
/// use designlift_core::naming::artifact_filename;
/// use designlift_core::types::{ImageSlot, JobId};
///
/// let name = artifact_filename(&JobId::Int(123), ImageSlot::Front, "birefnet").unwrap();
/// assert_eq!(name, "design_123_front_birefnet.png");
/// ```
pub fn artifact_filename(
    id: &JobId,
    slot: ImageSlot,
    variant: &str,
) -> Result<String, CoreError> {
    validate_job_id(id)?;
    Ok(format!("design_{id}_{slot}_{variant}.png"))
}

/// Join a public base URL and a filename with exactly one `/`.
pub fn artifact_url(base: &str, filename: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        filename.trim_start_matches('/')
    )
}
