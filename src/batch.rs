//! Generation state store.
//!
//! [`GenerationState`] is the single context object behind a
//! [`GenerationSession`](crate::GenerationSession): prompt, settings, the
//! batch being shown and its per-slot items. All transitions are plain
//! methods so the reconciliation rules can be exercised without a runtime.
//! Every mutation that originates from an asynchronous source takes the batch
//! id it was started for and is ignored when that batch is no longer current.

use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::*;

/// Result of applying one poll response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The response was for a batch that is no longer polled. Nothing changed.
    Ignored,
    /// Some items are still pending or running.
    InProgress { success: u32, failed: u32 },
    /// Every slot resolved. Polling should stop.
    Finished {
        status: GenerationStatus,
        elapsed: Duration,
        error: Option<String>,
    },
}

/// What [`GenerationState::select_image`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// The image was already shown.
    Unchanged,
    /// Only the preview pointer moved; the batch view is kept.
    PreviewOnly,
    /// The batch view was dropped in favor of the single image.
    Replaced,
}

/// What [`GenerationState::assign_task`] did with a returned task id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    /// The slot now tracks the task.
    Assigned,
    /// The slot was cancelled while its request was in flight. The id is
    /// recorded but the backend task still has to be revoked.
    Cancelled,
    /// The batch is no longer current, or the slot does not exist.
    Stale,
}

/// Mutable state of one generation session.
#[derive(Debug, Clone, Default)]
pub struct GenerationState {
    pub prompt: String,
    pub settings: GenerationSettings,
    pub status: GenerationStatus,
    pub batch: Option<BatchMeta>,
    pub items: Vec<BatchItem>,
    /// Image currently shown in the main viewer.
    pub preview_url: Option<String>,
    /// User-visible error for the current batch.
    pub error: Option<String>,
    /// Wall-clock time from submission to the terminal poll.
    pub elapsed: Option<Duration>,
    started_at: Option<Instant>,
}

impl GenerationState {
    /// Id of the batch being shown.
    pub fn batch_id(&self) -> Option<&str> {
        self.batch.as_ref().map(|b| b.id.as_str())
    }

    pub fn is_current(&self, batch_id: &str) -> bool {
        self.batch_id() == Some(batch_id)
    }

    /// Whether a poller for `batch_id` should keep going.
    pub fn is_polling(&self, batch_id: &str) -> bool {
        self.is_current(batch_id) && self.status == GenerationStatus::Generating
    }

    pub fn success_count(&self) -> u32 {
        self.items
            .iter()
            .filter(|i| i.status == ItemStatus::Success)
            .count() as u32
    }

    pub fn failed_count(&self) -> u32 {
        self.items.iter().filter(|i| i.status.is_failure()).count() as u32
    }

    pub fn item(&self, index: u32) -> Option<&BatchItem> {
        self.items.iter().find(|i| i.index == index)
    }

    /// Whether slot `index` of `batch_id` may still be submitted.
    pub fn accepts_submission(&self, batch_id: &str, index: u32) -> bool {
        self.is_current(batch_id)
            && self
                .item(index)
                .is_some_and(|i| i.status != ItemStatus::Cancelled)
    }

    fn item_mut(&mut self, index: u32) -> Option<&mut BatchItem> {
        self.items.iter_mut().find(|i| i.index == index)
    }

    /// Replace whatever was shown with a fresh batch of `size` pending slots.
    pub fn begin_batch(&mut self, batch_id: &str, size: u32, status: GenerationStatus) {
        self.batch = Some(BatchMeta::new(batch_id, size));
        self.items = (0..size).map(BatchItem::placeholder).collect();
        self.status = status;
        self.preview_url = None;
        self.error = None;
        self.elapsed = None;
        self.started_at = Some(Instant::now());
    }

    /// Record the task id the backend assigned to slot `index`.
    pub fn assign_task(&mut self, batch_id: &str, index: u32, task_id: &str) -> AssignOutcome {
        if !self.is_current(batch_id) {
            return AssignOutcome::Stale;
        }
        match self.item_mut(index) {
            Some(item) => {
                item.task_id = Some(task_id.to_string());
                if item.status == ItemStatus::Cancelled {
                    AssignOutcome::Cancelled
                } else {
                    AssignOutcome::Assigned
                }
            }
            None => AssignOutcome::Stale,
        }
    }

    /// Abort a batch whose submission failed. Items keep their last state.
    pub fn fail_submission(&mut self, batch_id: &str, message: &str) -> bool {
        if !self.is_current(batch_id) {
            return false;
        }
        self.status = GenerationStatus::Error;
        self.error = Some(message.to_string());
        true
    }

    /// All requests were accepted; hand over to the polling engine.
    pub fn mark_generating(&mut self, batch_id: &str) -> bool {
        if !self.is_current(batch_id) {
            return false;
        }
        self.status = GenerationStatus::Generating;
        true
    }

    /// Reconcile a batch status response into the store.
    ///
    /// The server's item list is authoritative: it is sorted by index and
    /// replaces the local slots. Entries outside `0..size` or repeating an
    /// index are dropped, and slots the server did not report keep their
    /// local record so the array always covers every index exactly once.
    pub fn apply_detail(&mut self, batch_id: &str, detail: BatchDetail) -> PollOutcome {
        if !self.is_polling(batch_id) {
            return PollOutcome::Ignored;
        }
        let size = self.batch.as_ref().map(|b| b.size).unwrap_or(0);

        let mut incoming = detail.items;
        incoming.sort_by_key(|i| i.index);

        let mut merged: Vec<BatchItem> = (0..size)
            .map(|i| {
                self.item(i)
                    .cloned()
                    .unwrap_or_else(|| BatchItem::placeholder(i))
            })
            .collect();
        let mut seen = HashSet::new();
        for mut item in incoming {
            if item.index >= size || !seen.insert(item.index) {
                continue;
            }
            let slot = &mut merged[item.index as usize];
            if item.task_id.is_none() {
                item.task_id = slot.task_id.take();
            }
            *slot = item;
        }
        self.items = merged;

        let success = self.success_count();
        let failed = self.failed_count();
        if let Some(meta) = self.batch.as_mut() {
            meta.completed = Some(success);
            meta.failed = Some(failed);
        }

        if self.preview_url.is_none() {
            self.preview_url = self
                .items
                .iter()
                .find(|i| i.status == ItemStatus::Success && i.image_url.is_some())
                .and_then(|i| i.image_url.clone());
        }

        if success + failed < size {
            self.status = GenerationStatus::Generating;
            return PollOutcome::InProgress { success, failed };
        }

        let elapsed = self
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or_default();
        self.elapsed = Some(elapsed);
        if success > 0 {
            self.status = GenerationStatus::Success;
            self.error = None;
        } else {
            self.status = GenerationStatus::Error;
            self.error = Some(
                self.items
                    .iter()
                    .find(|i| i.status.is_failure())
                    .map(BatchItem::failure_message)
                    .unwrap_or_else(|| crate::hints::GENERIC_FAILURE.to_string()),
            );
        }
        PollOutcome::Finished {
            status: self.status,
            elapsed,
            error: self.error.clone(),
        }
    }

    /// Slots eligible for cancellation, with their task ids if submitted.
    pub fn cancel_targets(&self) -> Vec<(u32, Option<String>)> {
        self.items
            .iter()
            .filter(|i| i.status.is_active())
            .map(|i| (i.index, i.task_id.clone()))
            .collect()
    }

    /// Mark `indices` cancelled without waiting for the backend to confirm.
    /// Slots that resolved in the meantime are left alone.
    pub fn mark_cancelled(&mut self, batch_id: &str, indices: &[u32]) -> Vec<u32> {
        if !self.is_current(batch_id) {
            return Vec::new();
        }
        let mut marked = Vec::new();
        for item in self.items.iter_mut() {
            if indices.contains(&item.index) && item.status.is_active() {
                item.status = ItemStatus::Cancelled;
                item.progress = None;
                marked.push(item.index);
            }
        }
        let (success, failed) = (self.success_count(), self.failed_count());
        if let Some(meta) = self.batch.as_mut() {
            meta.completed = Some(success);
            meta.failed = Some(failed);
        }
        marked
    }

    /// Show a past batch and prepare it for polling under its own id.
    pub fn load_history(&mut self, summary: &BatchSummary) {
        if let Some(prompt) = &summary.prompt {
            self.prompt = prompt.clone();
        }
        self.settings = summary.settings();
        self.begin_batch(&summary.id, summary.size(), GenerationStatus::Generating);
    }

    /// Point the viewer at `url`.
    pub fn select_image(&mut self, url: &str) -> SelectOutcome {
        if self.preview_url.as_deref() == Some(url) {
            return SelectOutcome::Unchanged;
        }
        let in_batch = self
            .items
            .iter()
            .any(|i| i.image_url.as_deref() == Some(url));
        let active = matches!(
            self.status,
            GenerationStatus::Submitting | GenerationStatus::Generating
        );
        self.preview_url = Some(url.to_string());
        if active || in_batch {
            return SelectOutcome::PreviewOnly;
        }
        self.batch = None;
        self.items.clear();
        self.status = GenerationStatus::Success;
        self.error = None;
        self.elapsed = None;
        self.started_at = None;
        SelectOutcome::Replaced
    }

    /// Back to idle, keeping prompt and settings.
    pub fn clear(&mut self) {
        self.batch = None;
        self.items.clear();
        self.status = GenerationStatus::Idle;
        self.preview_url = None;
        self.error = None;
        self.elapsed = None;
        self.started_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, size: u32) -> BatchSummary {
        BatchSummary {
            id: id.to_string(),
            status: "running".to_string(),
            created_at: None,
            prompt: Some("a lighthouse".to_string()),
            height: Some(768),
            width: Some(512),
            relative_path: None,
            image_url: None,
            num_inference_steps: Some(12),
            guidance_scale: Some(1.5),
            seed: None,
            negative_prompt: None,
            batch_size: Some(size),
            success_count: None,
            failed_count: None,
            base_seed: Some(5),
        }
    }

    fn item(index: u32, status: ItemStatus) -> BatchItem {
        BatchItem {
            task_id: Some(format!("t-{}", index)),
            index,
            status,
            image_url: (status == ItemStatus::Success)
                .then(|| format!("/generated-images/{}.webp", index)),
            ..BatchItem::default()
        }
    }

    fn detail(id: &str, size: u32, items: Vec<BatchItem>) -> BatchDetail {
        BatchDetail {
            batch: summary(id, size),
            items,
        }
    }

    fn generating(id: &str, size: u32) -> GenerationState {
        let mut state = GenerationState::default();
        state.begin_batch(id, size, GenerationStatus::Generating);
        state
    }

    #[test]
    fn test_begin_batch_placeholders() {
        for size in 1..=4 {
            let state = generating("b", size);
            let indices: Vec<u32> = state.items.iter().map(|i| i.index).collect();
            assert_eq!(indices, (0..size).collect::<Vec<_>>());
            assert!(state.items.iter().all(|i| i.status == ItemStatus::Pending));
            assert!(state.items.iter().all(|i| i.task_id.is_none()));
        }
    }

    #[test]
    fn test_partial_poll_keeps_generating() {
        let mut state = generating("b", 3);
        let outcome = state.apply_detail(
            "b",
            detail(
                "b",
                3,
                vec![
                    item(0, ItemStatus::Success),
                    item(1, ItemStatus::Running),
                    item(2, ItemStatus::Pending),
                ],
            ),
        );
        assert_eq!(outcome, PollOutcome::InProgress { success: 1, failed: 0 });
        assert_eq!(state.status, GenerationStatus::Generating);
        assert_eq!(state.preview_url.as_deref(), Some("/generated-images/0.webp"));
        assert_eq!(state.batch.as_ref().unwrap().completed, Some(1));
    }

    #[test]
    fn test_mixed_terminal_is_success() {
        let mut state = generating("b", 3);
        let outcome = state.apply_detail(
            "b",
            detail(
                "b",
                3,
                vec![
                    item(2, ItemStatus::Success),
                    item(0, ItemStatus::Success),
                    item(1, ItemStatus::Error),
                ],
            ),
        );
        assert!(matches!(
            outcome,
            PollOutcome::Finished {
                status: GenerationStatus::Success,
                error: None,
                ..
            }
        ));
        assert_eq!(state.status, GenerationStatus::Success);
        assert!(state.elapsed.is_some());
        let indices: Vec<u32> = state.items.iter().map(|i| i.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_all_failed_surfaces_first_hint() {
        let mut state = generating("b", 2);
        let mut first = item(0, ItemStatus::Error);
        first.error_hint = Some("GPU out of memory".to_string());
        let mut second = item(1, ItemStatus::Error);
        second.error_hint = Some("other".to_string());
        let outcome = state.apply_detail("b", detail("b", 2, vec![second, first]));
        assert_eq!(state.status, GenerationStatus::Error);
        assert_eq!(state.error.as_deref(), Some("GPU out of memory"));
        assert!(matches!(outcome, PollOutcome::Finished { .. }));
        assert!(state.preview_url.is_none());
    }

    #[test]
    fn test_terminal_batch_ignores_repeat_responses() {
        let mut state = generating("b", 1);
        let resp = detail("b", 1, vec![item(0, ItemStatus::Success)]);
        assert!(matches!(
            state.apply_detail("b", resp.clone()),
            PollOutcome::Finished { .. }
        ));
        let elapsed = state.elapsed;
        assert_eq!(state.apply_detail("b", resp), PollOutcome::Ignored);
        assert_eq!(state.status, GenerationStatus::Success);
        assert_eq!(state.elapsed, elapsed);
        assert_eq!(state.success_count() + state.failed_count(), 1);
    }

    #[test]
    fn test_stale_batch_is_ignored() {
        let mut state = generating("new", 2);
        let before = state.items.clone();
        let outcome = state.apply_detail(
            "old",
            detail("old", 2, vec![item(0, ItemStatus::Success), item(1, ItemStatus::Success)]),
        );
        assert_eq!(outcome, PollOutcome::Ignored);
        assert_eq!(state.items, before);
        assert_eq!(state.status, GenerationStatus::Generating);
        assert!(state.preview_url.is_none());
    }

    #[test]
    fn test_duplicates_and_gaps() {
        let mut state = generating("b", 3);
        state.assign_task("b", 2, "local-2");
        let mut dup = item(0, ItemStatus::Error);
        dup.task_id = Some("dup".to_string());
        let outcome = state.apply_detail(
            "b",
            detail(
                "b",
                3,
                vec![item(0, ItemStatus::Running), dup, item(7, ItemStatus::Success)],
            ),
        );
        assert_eq!(outcome, PollOutcome::InProgress { success: 0, failed: 0 });
        assert_eq!(state.items.len(), 3);
        assert_eq!(state.items[0].task_id.as_deref(), Some("t-0"));
        assert_eq!(state.items[0].status, ItemStatus::Running);
        assert_eq!(state.items[2].task_id.as_deref(), Some("local-2"));
        assert_eq!(state.items[2].status, ItemStatus::Pending);
    }

    #[test]
    fn test_preview_not_replaced_once_shown() {
        let mut state = generating("b", 2);
        state.apply_detail("b", detail("b", 2, vec![item(1, ItemStatus::Success)]));
        state.apply_detail(
            "b",
            detail("b", 2, vec![item(0, ItemStatus::Success), item(1, ItemStatus::Success)]),
        );
        assert_eq!(state.preview_url.as_deref(), Some("/generated-images/1.webp"));
    }

    #[test]
    fn test_cancel_targets_only_active() {
        let mut state = generating("b", 4);
        state.apply_detail(
            "b",
            detail(
                "b",
                4,
                vec![
                    item(0, ItemStatus::Success),
                    item(1, ItemStatus::Error),
                    item(2, ItemStatus::Running),
                    item(3, ItemStatus::Pending),
                ],
            ),
        );
        let targets = state.cancel_targets();
        assert_eq!(
            targets,
            vec![(2, Some("t-2".to_string())), (3, Some("t-3".to_string()))]
        );
        let marked = state.mark_cancelled("b", &[2, 3]);
        assert_eq!(marked, vec![2, 3]);
        assert_eq!(state.items[0].status, ItemStatus::Success);
        assert_eq!(state.items[1].status, ItemStatus::Error);
        assert_eq!(state.items[3].status, ItemStatus::Cancelled);
        assert_eq!(state.batch.as_ref().unwrap().failed, Some(3));
    }

    #[test]
    fn test_assign_task_after_cancel() {
        let mut state = GenerationState::default();
        state.begin_batch("b", 3, GenerationStatus::Submitting);
        assert_eq!(state.assign_task("b", 0, "t-0"), AssignOutcome::Assigned);
        assert!(state.accepts_submission("b", 1));

        assert_eq!(state.mark_cancelled("b", &[0, 1, 2]), vec![0, 1, 2]);
        assert!(!state.accepts_submission("b", 2));
        assert_eq!(state.assign_task("b", 1, "t-1"), AssignOutcome::Cancelled);
        assert_eq!(state.items[1].task_id.as_deref(), Some("t-1"));
        assert_eq!(state.items[1].status, ItemStatus::Cancelled);

        assert_eq!(state.assign_task("other", 2, "t-2"), AssignOutcome::Stale);
        assert_eq!(state.assign_task("b", 9, "t-9"), AssignOutcome::Stale);
        assert!(!state.accepts_submission("other", 0));
    }

    #[test]
    fn test_mark_cancelled_stale_batch() {
        let mut state = generating("b", 1);
        assert!(state.mark_cancelled("other", &[0]).is_empty());
        assert_eq!(state.items[0].status, ItemStatus::Pending);
    }

    #[test]
    fn test_fail_submission_keeps_items() {
        let mut state = GenerationState::default();
        state.begin_batch("b", 3, GenerationStatus::Submitting);
        state.assign_task("b", 0, "t-0");
        assert!(state.fail_submission("b", "boom"));
        assert_eq!(state.status, GenerationStatus::Error);
        assert_eq!(state.error.as_deref(), Some("boom"));
        assert_eq!(state.items[0].task_id.as_deref(), Some("t-0"));
        assert_eq!(state.items[0].status, ItemStatus::Pending);
        assert!(state.items[1].task_id.is_none());
    }

    #[test]
    fn test_load_history_restores_settings() {
        let mut state = GenerationState::default();
        state.load_history(&summary("hist-1", 3));
        assert_eq!(state.batch_id(), Some("hist-1"));
        assert_eq!(state.items.len(), 3);
        assert_eq!(state.status, GenerationStatus::Generating);
        assert_eq!(state.prompt, "a lighthouse");
        assert_eq!(state.settings.width, 512);
        assert_eq!(state.settings.steps, 12);
        assert_eq!(state.settings.seed, Some(5));
    }

    #[test]
    fn test_select_same_image_is_noop() {
        let mut state = GenerationState::default();
        assert_eq!(state.select_image("/a.png"), SelectOutcome::Replaced);
        assert_eq!(state.select_image("/a.png"), SelectOutcome::Unchanged);
    }

    #[test]
    fn test_select_while_generating_keeps_batch() {
        let mut state = generating("b", 2);
        assert_eq!(state.select_image("/other.png"), SelectOutcome::PreviewOnly);
        assert_eq!(state.batch_id(), Some("b"));
        assert_eq!(state.items.len(), 2);
        assert_eq!(state.status, GenerationStatus::Generating);
    }

    #[test]
    fn test_select_outside_batch_replaces_view() {
        let mut state = generating("b", 1);
        state.apply_detail("b", detail("b", 1, vec![item(0, ItemStatus::Success)]));
        assert_eq!(
            state.select_image("/generated-images/0.webp"),
            SelectOutcome::Unchanged
        );
        assert_eq!(state.select_image("/history/x.png"), SelectOutcome::Replaced);
        assert!(state.batch.is_none());
        assert!(state.items.is_empty());
        assert_eq!(state.status, GenerationStatus::Success);
    }

    #[test]
    fn test_clear() {
        let mut state = generating("b", 2);
        state.prompt = "keep me".to_string();
        state.clear();
        assert_eq!(state.status, GenerationStatus::Idle);
        assert!(state.batch.is_none());
        assert_eq!(state.prompt, "keep me");
    }
}
