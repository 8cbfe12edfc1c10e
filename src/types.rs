use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, StudioError};
use crate::{hints, media};

/// Largest batch the UI offers.
pub const MAX_BATCH_SIZE: u32 = 4;

/// Status of a single image slot within a batch.
///
/// Accepts both the lowercase item vocabulary of the batch endpoint and the
/// raw task states (`PENDING`, `STARTED`, ...) of the task endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    #[serde(alias = "PENDING", alias = "queued")]
    Pending,
    #[serde(alias = "STARTED", alias = "RETRY", alias = "started")]
    Running,
    #[serde(alias = "SUCCESS")]
    Success,
    #[serde(alias = "FAILURE", alias = "failed", alias = "failure")]
    Error,
    #[serde(alias = "REVOKED", alias = "revoked", alias = "canceled")]
    Cancelled,
}

impl ItemStatus {
    /// Map a backend task state. Unknown states count as pending.
    pub fn from_task_state(state: &str) -> Self {
        match state.to_ascii_uppercase().as_str() {
            "STARTED" | "RETRY" | "RUNNING" => Self::Running,
            "SUCCESS" => Self::Success,
            "FAILURE" | "ERROR" | "FAILED" => Self::Error,
            "REVOKED" | "CANCELLED" | "CANCELED" => Self::Cancelled,
            _ => Self::Pending,
        }
    }

    /// `success`, `error` or `cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }

    /// Still queued or running, i.e. cancellable.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Counts toward a batch's failed total.
    pub fn is_failure(self) -> bool {
        self.is_terminal() && self != Self::Success
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Aggregate status of the generation view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GenerationStatus {
    #[default]
    Idle,
    /// Requests for the batch are being sent.
    Submitting,
    /// All requests are queued; waiting on the polling engine.
    Generating,
    Success,
    Error,
}

/// User-editable generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance_scale: f64,
    /// Base seed. Item `i` of a batch uses `seed + i`. `None` = random.
    pub seed: Option<i64>,
    pub batch_size: u32,
    pub negative_prompt: Option<String>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 1024,
            steps: 9,
            guidance_scale: 0.0,
            seed: None,
            batch_size: 1,
            negative_prompt: None,
        }
    }
}

impl GenerationSettings {
    /// Copy with the batch size clamped to `1..=MAX_BATCH_SIZE`.
    pub fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    /// Check the bounds the backend enforces, so bad input fails locally.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if !(64..=2048).contains(&value) {
                return Err(StudioError::InvalidSettings(format!(
                    "{} must be between 64 and 2048, got {}",
                    name, value
                )));
            }
        }
        if !(1..=50).contains(&self.steps) {
            return Err(StudioError::InvalidSettings(format!(
                "steps must be between 1 and 50, got {}",
                self.steps
            )));
        }
        if !(0.0..=20.0).contains(&self.guidance_scale) {
            return Err(StudioError::InvalidSettings(format!(
                "guidance scale must be between 0 and 20, got {}",
                self.guidance_scale
            )));
        }
        Ok(())
    }

    /// Seed for the item at `index`.
    pub fn seed_for(&self, index: u32) -> Option<i64> {
        self.seed.map(|s| s.saturating_add(index as i64))
    }
}

/// Grouping tags attached to each request of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTag {
    pub batch_id: String,
    pub batch_index: u32,
    pub batch_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_seed: Option<i64>,
}

/// Body of `POST /v1/images/generate`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub height: u32,
    pub width: u32,
    pub num_inference_steps: u32,
    pub guidance_scale: f64,
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub metadata: BatchTag,
}

impl GenerateRequest {
    /// Request for slot `index` of a batch of `batch_size`.
    pub fn for_batch_item(
        prompt: &str,
        settings: &GenerationSettings,
        batch_id: &str,
        index: u32,
        batch_size: u32,
    ) -> Self {
        Self {
            prompt: prompt.to_string(),
            height: settings.height,
            width: settings.width,
            num_inference_steps: settings.steps,
            guidance_scale: settings.guidance_scale,
            seed: settings.seed_for(index),
            negative_prompt: settings
                .negative_prompt
                .clone()
                .filter(|n| !n.trim().is_empty()),
            metadata: BatchTag {
                batch_id: batch_id.to_string(),
                batch_index: index,
                batch_size,
                base_seed: settings.seed,
            },
        }
    }
}

/// Response of `POST /v1/images/generate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub task_id: String,
    #[serde(default)]
    pub status_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Response of `GET /v1/tasks/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    /// Raw backend state: `PENDING|STARTED|SUCCESS|FAILURE|RETRY|REVOKED`.
    pub status: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_hint: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub progress: Option<u32>,
}

impl TaskStatus {
    pub fn item_status(&self) -> ItemStatus {
        ItemStatus::from_task_state(&self.status)
    }

    /// Seed echoed back in the result payload.
    pub fn seed(&self) -> Option<i64> {
        self.result.as_ref()?.get("seed")?.as_i64()
    }

    /// Human-readable failure, if the task failed.
    ///
    /// Explicit `error_hint`/`error_code` fields win; otherwise the
    /// structured payload serialized into `error` is used.
    pub fn failure_message(&self) -> Option<String> {
        if !self.item_status().is_failure() {
            return None;
        }
        if self.error_hint.is_some() || self.error_code.is_some() {
            return Some(hints::resolve(
                self.error_hint.as_deref(),
                self.error_code.as_deref(),
            ));
        }
        let parsed = self.error.as_deref().and_then(hints::parse_task_failure);
        Some(match parsed {
            Some(f) => hints::resolve(Some(&f.message), Some(&f.code)),
            None if self.item_status() == ItemStatus::Cancelled => {
                hints::resolve(None, Some("cancelled"))
            }
            None => hints::resolve(None, None),
        })
    }
}

/// One past batch as listed by `GET /v1/history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    #[serde(rename = "task_id", alias = "id")]
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub relative_path: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub num_inference_steps: Option<u32>,
    #[serde(default)]
    pub guidance_scale: Option<f64>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub success_count: Option<u32>,
    #[serde(default)]
    pub failed_count: Option<u32>,
    #[serde(default)]
    pub base_seed: Option<i64>,
}

impl BatchSummary {
    /// Declared number of images, clamped like a fresh submission.
    pub fn size(&self) -> u32 {
        self.batch_size.unwrap_or(1).clamp(1, MAX_BATCH_SIZE)
    }

    /// Cover image of the batch, as served by the API.
    pub fn cover_url(&self) -> Option<String> {
        self.image_url.clone().or_else(|| {
            self.relative_path
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(media::image_url_for_path)
        })
    }

    /// Settings that reproduce this batch, defaults where unknown.
    pub fn settings(&self) -> GenerationSettings {
        let defaults = GenerationSettings::default();
        GenerationSettings {
            width: self.width.unwrap_or(defaults.width),
            height: self.height.unwrap_or(defaults.height),
            steps: self.num_inference_steps.unwrap_or(defaults.steps),
            guidance_scale: self.guidance_scale.unwrap_or(defaults.guidance_scale),
            seed: self.base_seed.or(self.seed),
            batch_size: self.size(),
            negative_prompt: self.negative_prompt.clone().filter(|n| !n.is_empty()),
        }
    }
}

/// Per-slot record of a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Backend task id; `None` until the slot's submission returns.
    #[serde(default)]
    pub task_id: Option<String>,
    pub index: u32,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_hint: Option<String>,
    /// 0-100, meaningful while running.
    #[serde(default)]
    pub progress: Option<u32>,
}

impl BatchItem {
    /// Empty pending slot.
    pub fn placeholder(index: u32) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    pub fn failure_message(&self) -> String {
        hints::resolve(self.error_hint.as_deref(), self.error_code.as_deref())
    }
}

/// Response of `GET /v1/history/{batch_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDetail {
    pub batch: BatchSummary,
    #[serde(default)]
    pub items: Vec<BatchItem>,
}

/// Response of the cancel and delete endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskActionResponse {
    pub task_id: String,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub environment: Option<String>,
}

/// Client-side metadata for the batch being shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMeta {
    pub id: String,
    pub size: u32,
    pub completed: Option<u32>,
    pub failed: Option<u32>,
}

impl BatchMeta {
    pub fn new(id: impl Into<String>, size: u32) -> Self {
        Self {
            id: id.into(),
            size,
            completed: None,
            failed: None,
        }
    }
}
