//! Stdout keepalive watchdog.
//!
//! The worker's stdout doubles as its heartbeat: every line it prints
//! (log output included) proves the process is alive. The configured time
//! limit is divided into five equal sub-intervals; a repeating timer
//! counts quiet sub-intervals and any stdout line resets the count.
//! Five consecutive quiet sub-intervals emit one timeout event for the
//! supervisor, which restarts the worker. This liveness check is entirely
//! independent of envelope freshness.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use log::{trace, warn};
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

pub const SUB_INTERVALS: u32 = 5;

/// Emitted once per detected silence; the receiver decides what to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogTimeout;

/// Cheap cloneable feeder handed to whatever reads the worker's stdout.
#[derive(Clone)]
pub struct WatchdogHandle {
    misses: Arc<AtomicU32>,
}

impl WatchdogHandle {
    /// Record a sign of life, resetting the quiet-interval count.
    pub fn feed(&self) {
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// The running watchdog timer. Stops when dropped.
pub struct Watchdog {
    handle: WatchdogHandle,
    cancel: CancellationToken,
}

impl Watchdog {
    /// Start the timer task. Events arrive on the returned receiver.
    ///
    /// Sub-intervals are clamped to at least one millisecond, so a zero or
    /// near-zero time limit degrades to a very eager watchdog instead of
    /// a panic.
    pub fn start(time_limit: Duration) -> (Self, mpsc::Receiver<WatchdogTimeout>) {
        let (event_tx, event_rx) = mpsc::channel(1);
        let misses = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let tick_misses = Arc::clone(&misses);
        let tick_cancel = cancel.clone();
        tokio::spawn(async move {
            // interval panics on a zero period
            let period = (time_limit / SUB_INTERVALS).max(Duration::from_millis(1));
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; it is not a quiet
            // sub-interval.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = tick_cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                let quiet = tick_misses.fetch_add(1, Ordering::Relaxed) + 1;
                trace!("Watchdog: {quiet}/{SUB_INTERVALS} quiet sub-intervals");

                if quiet >= SUB_INTERVALS {
                    warn!("Watchdog: no worker output for {time_limit:?}");
                    tick_misses.store(0, Ordering::Relaxed);
                    // A full channel means an unconsumed timeout is already
                    // pending; dropping this one loses nothing.
                    let _ = event_tx.try_send(WatchdogTimeout);
                }
            }
        });

        (
            Self {
                handle: WatchdogHandle { misses },
                cancel,
            },
            event_rx,
        )
    }

    pub fn handle(&self) -> WatchdogHandle {
        self.handle.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
