use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use zimage_studio::*;

/// One scripted batch status response.
#[derive(Debug, Clone)]
pub struct Step {
    pub delay: Option<Duration>,
    /// `None` = transport failure.
    pub items: Option<Vec<(u32, ItemStatus)>>,
}

impl Step {
    pub fn items(items: &[(u32, ItemStatus)]) -> Self {
        Self {
            delay: None,
            items: Some(items.to_vec()),
        }
    }

    pub fn fail() -> Self {
        Self {
            delay: None,
            items: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Default)]
pub struct MockState {
    pub generate_calls: Vec<GenerateRequest>,
    pub detail_calls: Vec<String>,
    pub cancel_calls: Vec<String>,
    pub delete_calls: Vec<String>,
    pub history_calls: Vec<(u32, u32)>,
    /// Submission index that fails.
    pub fail_generate_at: Option<u32>,
    /// Time each submission takes to be accepted.
    pub generate_delay: Option<Duration>,
    /// Consumed in call order; the last step repeats.
    pub steps: VecDeque<Step>,
    pub history: Vec<BatchSummary>,
    pub failing_deletes: HashSet<String>,
    pub failing_cancels: HashSet<String>,
}

impl MockState {
    fn next_step(&mut self) -> Step {
        if self.steps.len() > 1 {
            self.steps.pop_front().unwrap()
        } else {
            self.steps.front().cloned().unwrap_or_else(Step::fail)
        }
    }
}

/// Scripted in-memory backend.
#[derive(Clone, Default)]
pub struct MockApi {
    state: Arc<Mutex<MockState>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_steps(steps: Vec<Step>) -> Self {
        let api = Self::new();
        api.lock().steps = steps.into();
        api
    }

    pub fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

pub fn task_id(index: u32) -> String {
    format!("task-{}", index)
}

pub fn summary(id: &str, size: u32) -> BatchSummary {
    BatchSummary {
        id: id.to_string(),
        status: "running".to_string(),
        created_at: Some("2025-01-01T12:00:00+00:00".to_string()),
        prompt: Some(format!("prompt for {}", id)),
        height: Some(1024),
        width: Some(1024),
        relative_path: None,
        image_url: None,
        num_inference_steps: Some(9),
        guidance_scale: Some(0.0),
        seed: None,
        negative_prompt: None,
        batch_size: Some(size),
        success_count: None,
        failed_count: None,
        base_seed: None,
    }
}

fn build_item(index: u32, status: ItemStatus) -> BatchItem {
    BatchItem {
        task_id: Some(task_id(index)),
        index,
        status,
        image_url: (status == ItemStatus::Success)
            .then(|| format!("/generated-images/20250101/{}.webp", index)),
        error_hint: (status == ItemStatus::Error).then(|| format!("slot {} failed", index)),
        progress: (status == ItemStatus::Running).then_some(50),
        ..BatchItem::default()
    }
}

impl ImageApi for MockApi {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let index = request.metadata.batch_index;
        let (fails, delay) = {
            let mut state = self.lock();
            state.generate_calls.push(request.clone());
            (state.fail_generate_at == Some(index), state.generate_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fails {
            return Err(StudioError::Http {
                status: 503,
                body: "worker offline".to_string(),
            });
        }
        Ok(GenerateResponse {
            task_id: task_id(index),
            status_url: Some(format!("/v1/tasks/{}", task_id(index))),
            image_url: None,
        })
    }

    async fn batch_detail(&self, batch_id: &str) -> Result<BatchDetail> {
        let step = {
            let mut state = self.lock();
            state.detail_calls.push(batch_id.to_string());
            state.next_step()
        };
        if let Some(delay) = step.delay {
            tokio::time::sleep(delay).await;
        }
        match step.items {
            Some(items) => Ok(BatchDetail {
                batch: summary(batch_id, items.len() as u32),
                items: items
                    .into_iter()
                    .map(|(index, status)| build_item(index, status))
                    .collect(),
            }),
            None => Err(StudioError::InvalidResponse("connection reset".to_string())),
        }
    }

    async fn cancel_task(&self, task_id: &str) -> Result<TaskActionResponse> {
        let mut state = self.lock();
        state.cancel_calls.push(task_id.to_string());
        if state.failing_cancels.contains(task_id) {
            return Err(StudioError::Http {
                status: 500,
                body: "revoke failed".to_string(),
            });
        }
        Ok(TaskActionResponse {
            task_id: task_id.to_string(),
            status: "REVOKED".to_string(),
            message: None,
        })
    }

    async fn list_history(&self, limit: u32, offset: u32) -> Result<Vec<BatchSummary>> {
        let mut state = self.lock();
        state.history_calls.push((limit, offset));
        Ok(state
            .history
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn delete_history(&self, batch_id: &str) -> Result<TaskActionResponse> {
        let mut state = self.lock();
        state.delete_calls.push(batch_id.to_string());
        if state.failing_deletes.contains(batch_id) {
            return Err(StudioError::Http {
                status: 403,
                body: "Not allowed to access this task".to_string(),
            });
        }
        state.history.retain(|e| e.id != batch_id);
        Ok(TaskActionResponse {
            task_id: batch_id.to_string(),
            status: "deleted".to_string(),
            message: None,
        })
    }
}
