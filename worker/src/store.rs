//! In-memory item store and the diff-wait long-poll engine.
//!
//! The store exclusively owns the `id → Item` map and the `max_id`
//! counter; both live under one `RwLock` so readers share and writers
//! exclude. Mutations signal a `Notify` that pending diff-waits listen
//! on. The signal is purely a latency optimization: diff-wait re-computes
//! the delta on a fixed idle-retry interval regardless, so a coalesced or
//! dropped wake-up delays a response by at most one interval and can
//! never lose an update.

use crate::error::store::StoreError;

use common::ErrorLocation;
use common::item::{Item, ItemKey, status_label};

use std::collections::HashMap;
use std::panic::Location;
use std::time::Duration;

use log::debug;
use tokio::sync::{Notify, RwLock};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Fallback wake-up period for blocked diff-waits.
pub const IDLE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

struct StoreInner {
    items: HashMap<u64, Item>,
    max_id: u64,
}

pub struct ItemStore {
    inner: RwLock<StoreInner>,
    changed: Notify,
    idle_retry: Duration,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::with_idle_retry(IDLE_RETRY_INTERVAL)
    }

    /// Construct with a custom idle-retry interval (tests use a short one).
    pub fn with_idle_retry(idle_retry: Duration) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                items: HashMap::new(),
                max_id: 0,
            }),
            changed: Notify::new(),
            idle_retry,
        }
    }

    /// Allocate the next id and insert a fresh item at zero progress.
    pub async fn add(&self) -> Item {
        let item = {
            let mut inner = self.inner.write().await;
            inner.max_id += 1;
            let id = inner.max_id;

            let item = Item {
                id,
                name: format!("entry {id}"),
                status: status_label(0.0),
                progress: 0.0,
                error: None,
            };
            inner.items.insert(id, item.clone());
            item
        };

        debug!("Added item {}", item.id);
        self.changed.notify_waiters();
        item
    }

    /// Remove an item by id. `max_id` never decreases, so the id is not
    /// reused for the lifetime of the process.
    pub async fn delete(&self, id: u64) -> Result<(), StoreError> {
        let removed = {
            let mut inner = self.inner.write().await;
            inner.items.remove(&id)
        };

        match removed {
            Some(_) => {
                debug!("Deleted item {id}");
                self.changed.notify_waiters();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                message: format!("item to delete does not exist: {id}"),
                location: ErrorLocation::from(Location::caller()),
            }),
        }
    }

    /// Replace every item wholesale with the transform's output. Stands in
    /// for any external producer of progress updates.
    pub async fn mutate_all<F>(&self, mut transform: F) -> usize
    where
        F: FnMut(&Item) -> Item,
    {
        let count = {
            let mut inner = self.inner.write().await;
            let ids: Vec<u64> = inner.items.keys().copied().collect();
            for id in &ids {
                if let Some(current) = inner.items.get(id) {
                    let replacement = transform(current);
                    inner.items.insert(*id, replacement);
                }
            }
            ids.len()
        };

        self.changed.notify_waiters();
        count
    }

    /// Current items, ordered by id for stable output.
    pub async fn snapshot(&self) -> Vec<Item> {
        let inner = self.inner.read().await;
        let mut items: Vec<Item> = inner.items.values().cloned().collect();
        items.sort_by_key(|item| item.id);
        items
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.items.is_empty()
    }

    pub async fn max_id(&self) -> u64 {
        self.inner.read().await.max_id
    }

    /// Block until the store differs from the caller's baseline, then
    /// return the differing slice.
    ///
    /// - Empty baseline: returns the full current set immediately, even
    ///   when that set is empty.
    /// - Non-empty baseline: returns as soon as at least one current item's
    ///   `(id, status)` pair is absent from the baseline; until then the
    ///   call suspends on the change signal with the idle-retry timer as
    ///   backstop. There is no upper bound on how long this may block.
    /// - Cancellation is observed at every await point and before any
    ///   store read.
    pub async fn diff_wait(
        &self,
        baseline: &[ItemKey],
        cancel: &CancellationToken,
    ) -> Result<Vec<Item>, StoreError> {
        loop {
            if cancel.is_cancelled() {
                return Err(cancelled_error());
            }

            // Register for the change signal before reading, so a mutation
            // landing between the delta computation and the await below
            // still wakes us.
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let delta = self.delta(baseline).await;
            if baseline.is_empty() || !delta.is_empty() {
                return Ok(delta);
            }

            tokio::select! {
                () = cancel.cancelled() => return Err(cancelled_error()),
                () = &mut notified => {}
                () = sleep(self.idle_retry) => {}
            }
        }
    }

    async fn delta(&self, baseline: &[ItemKey]) -> Vec<Item> {
        let inner = self.inner.read().await;
        let mut delta: Vec<Item> = inner
            .items
            .values()
            .filter(|item| {
                !baseline
                    .iter()
                    .any(|known| known.id == item.id && known.status == item.status)
            })
            .cloned()
            .collect();
        delta.sort_by_key(|item| item.id);
        delta
    }
}

impl Default for ItemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[track_caller]
fn cancelled_error() -> StoreError {
    StoreError::Cancelled {
        message: "diff-wait cancelled".to_string(),
        location: ErrorLocation::from(Location::caller()),
    }
}
