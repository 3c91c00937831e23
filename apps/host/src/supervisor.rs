//! Worker supervision: spawn, sync, watch, restart.
//!
//! Each worker generation gets a fresh keypair, a fresh session, and a
//! fresh watchdog. The sync loop pings continuously, folding each delta
//! into a local view; a watchdog timeout or a failed request tears the
//! generation down and the supervisor starts the next one.

use crate::error::HostError;

use common::ErrorLocation;
use common::item::Item;
use common::session::{KeyExchange, Session};

use sync_core::client::SyncClient;
use sync_core::config::HostConfig;
use sync_core::error::ClientError;
use sync_core::spawn::spawn_and_handshake;
use sync_core::watchdog::{Watchdog, WatchdogTimeout};

use std::panic::Location;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const RESPAWN_DELAY: Duration = Duration::from_secs(2);

enum GenerationExit {
    Shutdown,
    WatchdogTimeout,
    Failed(ClientError),
}

/// Run the supervision loop until `shutdown` fires.
///
/// Worker failures are not errors here: handshake failures, watchdog
/// timeouts, and broken pings all roll into the next generation. The
/// only exits are shutdown and errors in the host's own wiring.
pub async fn run(config: HostConfig, shutdown: CancellationToken) -> Result<(), HostError> {
    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }

        // Fresh key material per generation: a restarted worker never
        // shares a session key with its predecessor.
        let keys = KeyExchange::generate();
        let mut session = Session::new(keys, config.worker.tolerance_ms);

        let (watchdog, mut timeouts) = Watchdog::start(config.watchdog.time_limit());

        let worker = match spawn_and_handshake(
            &mut session,
            config.worker.binary_override.as_deref(),
            config.worker.port_override,
            config.worker.tolerance_ms,
            watchdog.handle(),
        )
        .await
        {
            Ok(worker) => worker,
            Err(e) => {
                warn!("Worker startup failed, retrying in {RESPAWN_DELAY:?}: {e}");
                watchdog.stop();
                tokio::select! {
                    () = shutdown.cancelled() => return Ok(()),
                    () = sleep(RESPAWN_DELAY) => continue,
                }
            }
        };

        let token = session.token().to_string();
        let codec = match session.into_codec() {
            Ok(codec) => Arc::new(codec),
            Err(e) => {
                // install_remote succeeded above, so this cannot happen in
                // a correct build; treat it as a host wiring failure.
                worker.stop().await;
                return Err(HostError::Core {
                    message: e.to_string(),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
        };

        let client = SyncClient::new(&worker.base_url, token, codec)?;
        info!(
            "Session established with worker at {} (PID: {:?})",
            worker.base_url,
            worker.pid()
        );

        let mut view: Vec<Item> = Vec::new();
        let exit = sync_loop(&client, &mut view, &mut timeouts, &shutdown).await;

        watchdog.stop();
        worker.stop().await;

        match exit {
            GenerationExit::Shutdown => {
                info!("Shutdown requested, worker stopped");
                return Ok(());
            }
            GenerationExit::WatchdogTimeout => {
                warn!("Worker went quiet, restarting");
            }
            GenerationExit::Failed(e) => {
                warn!("Sync loop failed, restarting in {RESPAWN_DELAY:?}: {e}");
                tokio::select! {
                    () = shutdown.cancelled() => return Ok(()),
                    () = sleep(RESPAWN_DELAY) => {}
                }
            }
        }
    }
}

/// Ping continuously, folding each delta into `view`.
async fn sync_loop(
    client: &SyncClient,
    view: &mut Vec<Item>,
    timeouts: &mut mpsc::Receiver<WatchdogTimeout>,
    shutdown: &CancellationToken,
) -> GenerationExit {
    loop {
        let baseline = view.iter().map(Item::key).collect();

        tokio::select! {
            () = shutdown.cancelled() => return GenerationExit::Shutdown,

            // A closed channel means the watchdog is gone; treat it the
            // same as a timeout so the generation never outlives it.
            _ = timeouts.recv() => return GenerationExit::WatchdogTimeout,

            result = client.ping(baseline) => match result {
                Ok(delta) => {
                    apply_delta(view, delta);
                    info!("View now tracks {} items", view.len());
                }
                Err(e) => return GenerationExit::Failed(e),
            }
        }
    }
}

/// Fold a changed-items delta into the local view: replace by id, append
/// what is new, keep id order.
///
/// Deletions are not in the delta; the protocol only surfaces items the
/// baseline does not cover, so a removed item simply stops changing.
pub fn apply_delta(view: &mut Vec<Item>, delta: Vec<Item>) {
    for item in delta {
        match view.iter_mut().find(|known| known.id == item.id) {
            Some(known) => *known = item,
            None => view.push(item),
        }
    }
    view.sort_by_key(|item| item.id);
}
