//! Recalculation job data model.
//!
//! These are the domain shapes exchanged between the session driver and
//! the CONVAL backend. The JSON wire forms live next to the HTTP client;
//! only [`JobRequest`] is serialized directly since its field names
//! already match the request body.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{CorrelationKey, SheetIndex, Timestamp};

/// Maximum accepted length of an estimate number.
pub const MAX_CORRELATION_KEY_LEN: usize = 64;

/// Validate an estimate number before a session is bound to it.
pub fn validate_correlation_key(key: &str) -> Result<(), CoreError> {
    if key.trim().is_empty() {
        return Err(CoreError::Validation(
            "Estimate number must not be empty".to_string(),
        ));
    }
    if key.len() > MAX_CORRELATION_KEY_LEN {
        return Err(CoreError::Validation(format!(
            "Estimate number exceeds {MAX_CORRELATION_KEY_LEN} characters"
        )));
    }
    Ok(())
}

/// A recalculation request for one sheet of one estimate.
///
/// Built once per submission and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub correlation_key: CorrelationKey,
    pub sheet_index: SheetIndex,
    /// Opaque input blob forwarded to the engine as-is.
    pub payload: serde_json::Value,
}

impl JobRequest {
    pub fn new(
        correlation_key: impl Into<CorrelationKey>,
        sheet_index: SheetIndex,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            correlation_key: correlation_key.into(),
            sheet_index,
            payload,
        }
    }
}

/// Immediate answer of the backend to a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSubmissionResult {
    pub queued: bool,
    /// Jobs ahead of and including ours when the request was accepted.
    pub queue_depth_at_submission: u32,
    pub processing: bool,
    pub message: String,
}

/// Live state of the shared, server-owned compute queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub processing: bool,
    pub queue_count: u32,
}

impl QueueStatus {
    /// Whether the engine still has work running or waiting.
    pub fn is_busy(&self) -> bool {
        self.processing || self.queue_count > 0
    }
}

/// How a submission result is handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The job is outstanding; completion must be observed by polling.
    Queued { queue_depth: u32 },
    /// The engine ran the job synchronously.
    Completed,
}

impl Classification {
    pub fn of(result: &JobSubmissionResult) -> Self {
        if result.queued || result.queue_depth_at_submission > 0 || result.processing {
            Self::Queued {
                queue_depth: result.queue_depth_at_submission,
            }
        } else {
            Self::Completed
        }
    }
}

/// Read-side data reloaded after a recalculation finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependentData {
    /// Customer/context data for the estimate sheet.
    pub customer: serde_json::Value,
    /// Engine result data for the estimate sheet.
    pub engine: serde_json::Value,
    pub fetched_at: Timestamp,
}
