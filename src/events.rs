use serde::{Deserialize, Serialize};

use crate::types::{BatchItem, GenerationStatus};

/// Notifications published by a [`GenerationSession`](crate::GenerationSession).
///
/// Presentation collaborators subscribe with
/// [`GenerationSession::subscribe`](crate::GenerationSession::subscribe).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// A new batch was initialized, either submitted or loaded from history.
    #[serde(rename_all = "camelCase")]
    BatchStarted { batch_id: String, size: u32 },

    /// The task for one slot was accepted by the backend.
    #[serde(rename_all = "camelCase")]
    ItemSubmitted {
        batch_id: String,
        index: u32,
        task_id: String,
    },

    /// A poll replaced the item array.
    #[serde(rename_all = "camelCase")]
    ItemsUpdated {
        batch_id: String,
        items: Vec<BatchItem>,
        success_count: u32,
        failed_count: u32,
    },

    /// Items were cancelled locally.
    #[serde(rename_all = "camelCase")]
    ItemsCancelled { batch_id: String, indices: Vec<u32> },

    /// The batch reached a terminal aggregate status.
    #[serde(rename_all = "camelCase")]
    BatchFinished {
        batch_id: String,
        status: GenerationStatus,
        elapsed_ms: u64,
        error: Option<String>,
    },

    /// Submission failed before the batch was fully queued.
    #[serde(rename_all = "camelCase")]
    SubmissionFailed {
        batch_id: String,
        index: u32,
        message: String,
    },

    /// Stored history changed and listings should be refreshed.
    HistoryChanged,
}
