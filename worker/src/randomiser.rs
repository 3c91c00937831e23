//! Progress randomiser: the stand-in producer of item updates.
//!
//! Rewrites every item's progress with a random fraction on a fixed
//! interval, replacing each record wholesale. Every tick logs a line, so
//! the host's stdout watchdog sees regular output from a healthy worker.

use crate::store::ItemStore;

use common::item::{Item, status_label};

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use rand::Rng;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

pub const RANDOMISE_INTERVAL: Duration = Duration::from_millis(1250);

pub async fn run(store: Arc<ItemStore>, cancel: CancellationToken) {
    let mut ticker = interval(RANDOMISE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // The first tick of a tokio interval fires immediately; consume it so
    // the initial state survives one full period.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("Randomiser stopped");
                return;
            }
            _ = ticker.tick() => {
                let count = randomise_all(&store).await;
                info!("Randomised {count} items");
            }
        }
    }
}

async fn randomise_all(store: &ItemStore) -> usize {
    store
        .mutate_all(|item| {
            // ThreadRng is !Send; it must live inside the closure, which
            // runs synchronously under the write lock, or this future
            // cannot be spawned.
            let progress: f64 = rand::thread_rng().r#gen();
            Item {
                id: item.id,
                name: item.name.clone(),
                status: status_label(progress),
                progress,
                error: item.error.clone(),
            }
        })
        .await
}
