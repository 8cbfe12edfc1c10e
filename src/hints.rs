//! User-facing error hints.
//!
//! Every error shown to a user goes through the same fallback chain: a hint
//! the server supplied, then a canned message for a known error code, then
//! [`GENERIC_FAILURE`].

use serde::Deserialize;

/// Shown when neither the server nor the error code says anything useful.
pub const GENERIC_FAILURE: &str = "Image generation failed, please try again later.";

/// Message for a known backend error code, if any.
pub fn message_for_code(code: &str) -> Option<&'static str> {
    match code {
        "gpu_oom" => Some("The GPU ran out of memory. Lower the resolution or steps and retry."),
        "dependency_missing" => {
            Some("The inference environment is missing a dependency. Check the worker logs.")
        }
        "model_missing" => Some("Model weights were not found on the worker."),
        "internal_error" => Some("An unexpected error occurred during generation. Please retry."),
        "cancelled" => Some("The task was cancelled."),
        _ => None,
    }
}

/// Resolve the message to show for a failure.
pub fn resolve(hint: Option<&str>, code: Option<&str>) -> String {
    if let Some(h) = hint.map(str::trim).filter(|h| !h.is_empty()) {
        return h.to_string();
    }
    code.and_then(message_for_code)
        .unwrap_or(GENERIC_FAILURE)
        .to_string()
}

/// Structured failure as serialized by the worker into a task's `error`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskFailure {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Parse a task `error` string.
///
/// Workers raise `RuntimeError('{"code": ..., "message": ...}')`, and the
/// result backend may keep the exception repr around the JSON, so the
/// outermost `{...}` span is what gets parsed.
pub fn parse_task_failure(raw: &str) -> Option<TaskFailure> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}
