use futures_util::future::join_all;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::ImageApi;
use crate::batch::{AssignOutcome, GenerationState, PollOutcome, SelectOutcome};
use crate::config::ClientConfig;
use crate::error::{Result, StudioError};
use crate::events::SessionEvent;
use crate::ids;
use crate::types::*;

const EVENT_CAPACITY: usize = 64;

/// Floor for the poll period; `interval` panics on zero.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A generation session: the batch submission and polling engine.
///
/// Owns the [`GenerationState`] for one user session and drives it:
/// batches are submitted one request at a time in index order, then a
/// single background task polls the batch status endpoint until every slot
/// resolves. Starting another batch, loading one from history or clearing
/// the session stops the previous poller, and a poller that finds its batch
/// is no longer current exits without touching state.
///
/// Cloning is cheap; clones share the same state.
///
/// # Example
/// ```no_run
/// use zimage_studio::*;
///
/// # async fn example() -> zimage_studio::Result<()> {
/// let config = ClientConfig::from_env()?;
/// let session = GenerationSession::new(ZImageClient::from_config(&config), config);
/// let mut events = session.subscribe();
///
/// session.set_prompt("a red fox in the snow");
/// session.update_settings(GenerationSettings { batch_size: 2, seed: Some(42), ..Default::default() });
/// session.generate().await?;
///
/// while let Ok(event) = events.recv().await {
///     if let SessionEvent::BatchFinished { status, .. } = event {
///         println!("done: {:?}", status);
///         break;
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct GenerationSession<A: ImageApi> {
    inner: Arc<Inner<A>>,
}

impl<A: ImageApi> Clone for GenerationSession<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<A: ImageApi> {
    api: A,
    config: ClientConfig,
    state: Mutex<GenerationState>,
    poller: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl<A: ImageApi> GenerationSession<A> {
    pub fn new(api: A, config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                api,
                config,
                state: Mutex::new(GenerationState::default()),
                poller: Mutex::new(None),
                events,
            }),
        }
    }

    /// Receive session events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// The API this session talks to.
    pub fn api(&self) -> &A {
        &self.inner.api
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Copy of the current state, for rendering.
    pub fn snapshot(&self) -> GenerationState {
        self.inner.state().clone()
    }

    pub fn set_prompt(&self, prompt: impl Into<String>) {
        self.inner.state().prompt = prompt.into();
    }

    /// Replace the settings. Batch size is clamped to 1..=4.
    pub fn update_settings(&self, settings: GenerationSettings) {
        self.inner.state().settings = settings.normalized();
    }

    /// Restore default settings.
    pub fn reset_settings(&self) {
        self.inner.state().settings = GenerationSettings::default();
    }

    /// Whether a poller is currently running.
    pub fn is_polling(&self) -> bool {
        self.inner
            .poller_slot()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Submit the current prompt and settings as a new batch.
    ///
    /// Requests go out one at a time in index order so the backend queues
    /// them in that order. The first failure stops the batch: items already
    /// accepted keep their state and later items are never sent. A
    /// [`cancel`](Self::cancel) that lands mid-submission also stops the
    /// loop, and a request accepted after the cancel is revoked right away.
    /// Otherwise the polling engine takes over and the batch id is returned.
    pub async fn generate(&self) -> Result<String> {
        let (prompt, settings) = {
            let state = self.inner.state();
            (state.prompt.trim().to_string(), state.settings.clone().normalized())
        };
        if let Err(e) = self.check_request(&prompt, &settings) {
            self.inner.state().error = Some(e.user_message());
            return Err(e);
        }

        let size = settings.batch_size;
        let batch_id = ids::new_batch_id();
        self.inner.stop_polling();
        self.inner
            .state()
            .begin_batch(&batch_id, size, GenerationStatus::Submitting);
        log::info!("Submitting batch {} ({} image(s))", batch_id, size);
        self.inner.emit(SessionEvent::BatchStarted {
            batch_id: batch_id.clone(),
            size,
        });

        for index in 0..size {
            let open = self.inner.state().accepts_submission(&batch_id, index);
            if !open {
                if !self.inner.state().is_current(&batch_id) {
                    log::info!("Batch {} superseded during submission", batch_id);
                    return Err(StudioError::Superseded);
                }
                log::info!(
                    "Batch {} cancelled during submission, {} of {} item(s) sent",
                    batch_id,
                    index,
                    size
                );
                break;
            }

            let request = GenerateRequest::for_batch_item(&prompt, &settings, &batch_id, index, size);
            match self.inner.api.generate(&request).await {
                Ok(resp) => {
                    let outcome = self.inner.state().assign_task(&batch_id, index, &resp.task_id);
                    match outcome {
                        AssignOutcome::Assigned => {
                            self.inner.emit(SessionEvent::ItemSubmitted {
                                batch_id: batch_id.clone(),
                                index,
                                task_id: resp.task_id,
                            });
                        }
                        AssignOutcome::Cancelled => {
                            // Accepted after the user cancelled; revoke it now.
                            log::info!(
                                "Item {} of batch {} accepted after cancel, revoking {}",
                                index,
                                batch_id,
                                resp.task_id
                            );
                            if let Err(e) = self.inner.api.cancel_task(&resp.task_id).await {
                                log::warn!("Cancelling task {} failed: {}", resp.task_id, e);
                            }
                        }
                        AssignOutcome::Stale => {
                            log::info!("Batch {} superseded during submission", batch_id);
                            return Err(StudioError::Superseded);
                        }
                    }
                }
                Err(e) => {
                    let message = e.user_message();
                    log::warn!("Submitting item {} of batch {} failed: {}", index, batch_id, e);
                    if self.inner.state().fail_submission(&batch_id, &message) {
                        self.inner.emit(SessionEvent::SubmissionFailed {
                            batch_id: batch_id.clone(),
                            index,
                            message: message.clone(),
                        });
                    }
                    return Err(StudioError::Submission { index, message });
                }
            }
        }

        if !self.inner.state().mark_generating(&batch_id) {
            return Err(StudioError::Superseded);
        }
        self.inner.start_polling(batch_id.clone());
        Ok(batch_id)
    }

    fn check_request(&self, prompt: &str, settings: &GenerationSettings) -> Result<()> {
        if prompt.is_empty() {
            return Err(StudioError::EmptyPrompt);
        }
        settings.validate()?;
        let limit = self.inner.config.max_active_tasks;
        if settings.batch_size > limit {
            return Err(StudioError::TooManyActiveTasks {
                requested: settings.batch_size,
                limit,
            });
        }
        Ok(())
    }

    /// Cancel every pending or running item of the current batch.
    ///
    /// Cancel requests go out concurrently and individual failures are only
    /// logged. Targeted items are then marked cancelled locally without
    /// waiting for the backend to confirm. During submission this also covers
    /// slots not sent yet; [`generate`](Self::generate) skips them. Returns
    /// the number of items marked.
    pub async fn cancel(&self) -> usize {
        let (batch_id, targets) = {
            let state = self.inner.state();
            match state.batch_id() {
                Some(id) => (id.to_string(), state.cancel_targets()),
                None => return 0,
            }
        };
        if targets.is_empty() {
            return 0;
        }

        let api = &self.inner.api;
        let requests = targets
            .iter()
            .filter_map(|(index, task_id)| task_id.as_deref().map(|t| (*index, t)))
            .map(|(index, task_id)| async move { (index, task_id, api.cancel_task(task_id).await) });
        for (index, task_id, result) in join_all(requests).await {
            if let Err(e) = result {
                log::warn!(
                    "Cancelling task {} (item {} of batch {}) failed: {}",
                    task_id,
                    index,
                    batch_id,
                    e
                );
            }
        }

        let indices: Vec<u32> = targets.iter().map(|(index, _)| *index).collect();
        let marked = self.inner.state().mark_cancelled(&batch_id, &indices);
        if !marked.is_empty() {
            log::info!("Cancelled {} item(s) of batch {}", marked.len(), batch_id);
            self.inner.emit(SessionEvent::ItemsCancelled {
                batch_id,
                indices: marked.clone(),
            });
        }
        marked.len()
    }

    /// Show `url` in the viewer.
    ///
    /// Re-selecting the shown image does nothing. While a batch is running,
    /// or when the image belongs to the shown batch, only the preview moves.
    pub fn select_image(&self, url: &str) -> SelectOutcome {
        let outcome = self.inner.state().select_image(url);
        if outcome == SelectOutcome::Replaced {
            self.inner.stop_polling();
        }
        outcome
    }

    /// Show a past batch and poll it under its own id until it settles.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn load_history_batch(&self, summary: &BatchSummary) {
        self.inner.stop_polling();
        self.inner.state().load_history(summary);
        log::info!("Loading batch {} from history", summary.id);
        self.inner.emit(SessionEvent::BatchStarted {
            batch_id: summary.id.clone(),
            size: summary.size(),
        });
        self.inner.start_polling(summary.id.clone());
    }

    /// Stop polling and return to idle. Prompt and settings are kept.
    pub fn clear(&self) {
        self.inner.stop_polling();
        self.inner.state().clear();
    }
}

impl<A: ImageApi> Inner<A> {
    fn state(&self) -> MutexGuard<'_, GenerationState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            log::warn!("Generation state mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn poller_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.poller
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn stop_polling(&self) {
        if let Some(handle) = self.poller_slot().take() {
            handle.abort();
        }
    }

    fn start_polling(self: &Arc<Self>, batch_id: String) {
        self.stop_polling();
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move { inner.poll_loop(batch_id).await });
        *self.poller_slot() = Some(handle);
    }

    async fn poll_loop(&self, batch_id: String) {
        let mut ticker = tokio::time::interval(self.config.poll_interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if !self.state().is_polling(&batch_id) {
                log::debug!("Batch {} is no longer current, poller exiting", batch_id);
                return;
            }

            let detail = match self.api.batch_detail(&batch_id).await {
                Ok(d) => d,
                Err(e) => {
                    log::debug!("Polling batch {} failed, retrying: {}", batch_id, e);
                    continue;
                }
            };

            let (outcome, items) = {
                let mut state = self.state();
                let outcome = state.apply_detail(&batch_id, detail);
                (outcome, state.items.clone())
            };

            match outcome {
                PollOutcome::Ignored => return,
                PollOutcome::InProgress { success, failed } => {
                    self.emit(SessionEvent::ItemsUpdated {
                        batch_id: batch_id.clone(),
                        items,
                        success_count: success,
                        failed_count: failed,
                    });
                }
                PollOutcome::Finished {
                    status,
                    elapsed,
                    error,
                } => {
                    let success = items
                        .iter()
                        .filter(|i| i.status == ItemStatus::Success)
                        .count() as u32;
                    let failed = items.iter().filter(|i| i.status.is_failure()).count() as u32;
                    log::info!(
                        "Batch {} finished in {:.1}s: {} succeeded, {} failed",
                        batch_id,
                        elapsed.as_secs_f64(),
                        success,
                        failed
                    );
                    self.emit(SessionEvent::ItemsUpdated {
                        batch_id: batch_id.clone(),
                        items,
                        success_count: success,
                        failed_count: failed,
                    });
                    self.emit(SessionEvent::BatchFinished {
                        batch_id,
                        status,
                        elapsed_ms: elapsed.as_millis() as u64,
                        error,
                    });
                    self.emit(SessionEvent::HistoryChanged);
                    return;
                }
            }
        }
    }
}
