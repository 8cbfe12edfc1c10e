use futures_util::future::join_all;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::api::ImageApi;
use crate::error::Result;
use crate::events::SessionEvent;
use crate::types::BatchSummary;

/// Outcome of [`HistoryStore::delete_selected`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkDeleteReport {
    pub deleted: Vec<String>,
    /// `(batch_id, message)` for every delete that failed.
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct HistoryState {
    entries: Vec<BatchSummary>,
    has_more: bool,
    selected: BTreeSet<String>,
}

/// Paginated list of past batches with selection and deletion.
///
/// Entries are kept newest first as the API returns them. Deleting goes
/// through the single-delete endpoint; bulk delete is a client-side fan-out.
pub struct HistoryStore<A: ImageApi> {
    api: A,
    page_size: u32,
    state: Mutex<HistoryState>,
}

impl<A: ImageApi> HistoryStore<A> {
    /// `page_size` is clamped to the backend's 1..=50.
    pub fn new(api: A, page_size: u32) -> Self {
        Self {
            api,
            page_size: page_size.clamp(1, 50),
            state: Mutex::new(HistoryState {
                has_more: true,
                ..HistoryState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, HistoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn entries(&self) -> Vec<BatchSummary> {
        self.state().entries.clone()
    }

    pub fn get(&self, batch_id: &str) -> Option<BatchSummary> {
        self.state().entries.iter().find(|e| e.id == batch_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Whether another page may exist.
    pub fn has_more(&self) -> bool {
        self.state().has_more
    }

    /// Reload the first page, replacing what was loaded.
    ///
    /// Selected ids that are no longer listed are dropped from the selection.
    pub async fn refresh(&self) -> Result<usize> {
        let page = self.api.list_history(self.page_size, 0).await?;
        let mut state = self.state();
        state.has_more = page.len() as u32 >= self.page_size;
        state.entries = page;
        let listed: BTreeSet<String> = state.entries.iter().map(|e| e.id.clone()).collect();
        state.selected.retain(|id| listed.contains(id));
        Ok(state.entries.len())
    }

    /// Append the next page. Returns how many new entries arrived.
    pub async fn load_more(&self) -> Result<usize> {
        let offset = {
            let state = self.state();
            if !state.has_more {
                return Ok(0);
            }
            state.entries.len() as u32
        };
        let page = self.api.list_history(self.page_size, offset).await?;
        let mut state = self.state();
        state.has_more = page.len() as u32 >= self.page_size;
        let before = state.entries.len();
        for entry in page {
            // Offsets shift when new batches land; skip what we already have.
            if !state.entries.iter().any(|e| e.id == entry.id) {
                state.entries.push(entry);
            }
        }
        Ok(state.entries.len() - before)
    }

    /// Delete one batch and drop it from the list.
    pub async fn delete(&self, batch_id: &str) -> Result<()> {
        self.api.delete_history(batch_id).await?;
        self.remove_local(batch_id);
        log::info!("Deleted history batch {}", batch_id);
        Ok(())
    }

    fn remove_local(&self, batch_id: &str) {
        let mut state = self.state();
        state.entries.retain(|e| e.id != batch_id);
        state.selected.remove(batch_id);
    }

    // ── Selection ───────────────────────────────────────────────────

    /// Toggle selection of a listed batch. Returns whether it is now selected.
    pub fn toggle_select(&self, batch_id: &str) -> bool {
        let mut state = self.state();
        if state.selected.remove(batch_id) {
            return false;
        }
        if state.entries.iter().any(|e| e.id == batch_id) {
            state.selected.insert(batch_id.to_string());
            return true;
        }
        false
    }

    pub fn select_all(&self) {
        let mut state = self.state();
        let ids: Vec<String> = state.entries.iter().map(|e| e.id.clone()).collect();
        state.selected.extend(ids);
    }

    pub fn clear_selection(&self) {
        self.state().selected.clear();
    }

    pub fn selected(&self) -> Vec<String> {
        self.state().selected.iter().cloned().collect()
    }

    /// Delete every selected batch concurrently.
    ///
    /// Successful ids leave both the list and the selection. Failed ids stay
    /// selected so the user can retry.
    pub async fn delete_selected(&self) -> BulkDeleteReport {
        let ids = self.selected();
        let api = &self.api;
        let results = join_all(ids.iter().map(|id| async move {
            (id.clone(), api.delete_history(id).await)
        }))
        .await;

        let mut report = BulkDeleteReport::default();
        for (id, result) in results {
            match result {
                Ok(_) => {
                    self.remove_local(&id);
                    report.deleted.push(id);
                }
                Err(e) => {
                    log::warn!("Deleting history batch {} failed: {}", id, e);
                    report.failed.push((id, e.user_message()));
                }
            }
        }
        report
    }

    /// Refresh whenever `events` reports that history changed.
    ///
    /// The task ends when the session's event channel closes.
    pub fn follow(self: Arc<Self>, mut events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::HistoryChanged) => {
                        if let Err(e) = self.refresh().await {
                            log::debug!("History refresh failed: {}", e);
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::debug!("History follower lagged by {} events, refreshing", skipped);
                        if let Err(e) = self.refresh().await {
                            log::debug!("History refresh failed: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }
}
