//! JSON wire types of the CONVAL HTTP endpoints.
//!
//! The backend is loose about optional fields: `isQueued`, `queueCount`
//! and `isProcessing` may be missing or `null` on the retry response.
//! These types absorb that and convert into the strict domain types of
//! `quotation-core`. Request bodies are the domain types serialized
//! directly.

use quotation_core::job::{JobSubmissionResult, QueueStatus};
use serde::Deserialize;

/// Response of `POST /conval/retry`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub is_queued: Option<bool>,
    #[serde(default)]
    pub queue_count: Option<i64>,
    #[serde(default)]
    pub is_processing: Option<bool>,
}

/// Response of `GET /conval/status`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub is_processing: bool,
    pub queue_count: i64,
}

/// Negative counts are treated as an empty queue.
fn clamp_count(count: i64) -> u32 {
    count.clamp(0, i64::from(u32::MAX)) as u32
}

impl From<RetryResponse> for JobSubmissionResult {
    fn from(raw: RetryResponse) -> Self {
        Self {
            queued: raw.is_queued.unwrap_or(false),
            queue_depth_at_submission: raw.queue_count.map(clamp_count).unwrap_or(0),
            processing: raw.is_processing.unwrap_or(false),
            message: raw.message.unwrap_or_default(),
        }
    }
}

impl From<StatusResponse> for QueueStatus {
    fn from(raw: StatusResponse) -> Self {
        Self {
            processing: raw.is_processing,
            queue_count: clamp_count(raw.queue_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retry(json: &str) -> JobSubmissionResult {
        serde_json::from_str::<RetryResponse>(json).unwrap().into()
    }

    #[test]
    fn retry_response_queued() {
        let result = retry(r#"{"message":"queued","isQueued":true,"queueCount":3,"isProcessing":true}"#);
        assert!(result.queued);
        assert!(result.processing);
        assert_eq!(result.queue_depth_at_submission, 3);
        assert_eq!(result.message, "queued");
    }

    #[test]
    fn retry_response_missing_and_null_fields() {
        let result = retry(r#"{"message":"done","isQueued":null}"#);
        assert_eq!(
            result,
            JobSubmissionResult {
                queued: false,
                queue_depth_at_submission: 0,
                processing: false,
                message: "done".to_string(),
            }
        );

        let result = retry("{}");
        assert_eq!(result.message, "");
    }

    #[test]
    fn negative_queue_count_is_clamped() {
        let result = retry(r#"{"queueCount":-2}"#);
        assert_eq!(result.queue_depth_at_submission, 0);
    }

    #[test]
    fn status_response_requires_both_fields() {
        let status: QueueStatus =
            serde_json::from_str::<StatusResponse>(r#"{"isProcessing":false,"queueCount":2}"#)
                .unwrap()
                .into();
        assert_eq!(
            status,
            QueueStatus {
                processing: false,
                queue_count: 2
            }
        );

        assert!(serde_json::from_str::<StatusResponse>(r#"{"isProcessing":true}"#).is_err());
    }
}
