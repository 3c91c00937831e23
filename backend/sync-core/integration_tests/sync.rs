//! End-to-end exercises of the host-side client against a real in-process
//! worker server: same axum router, same codecs, same wire bytes as
//! production, minus the process boundary.

use sync_core::client::SyncClient;

use syncbridge_worker::server::{AppState, serve};
use syncbridge_worker::store::ItemStore;

use common::item::ItemKey;
use common::session::{KeyExchange, Session};

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const TEST_TOLERANCE_MS: i64 = 10_000;

struct Harness {
    client: SyncClient,
    store: Arc<ItemStore>,
    shutdown: CancellationToken,
}

impl Harness {
    async fn start() -> Self {
        let host_keys = KeyExchange::generate();
        let worker_keys = KeyExchange::generate();
        let token = host_keys.bearer_token();

        let host_public = *host_keys.public_key();
        let worker_public = *worker_keys.public_key();

        let mut worker_session =
            Session::with_token(worker_keys, token.clone(), TEST_TOLERANCE_MS);
        worker_session
            .install_remote(&host_public)
            .expect("worker derive");
        let worker_codec = Arc::new(worker_session.into_codec().expect("worker codec"));

        let mut host_session = Session::new(host_keys, TEST_TOLERANCE_MS);
        host_session
            .install_remote(&worker_public)
            .expect("host derive");
        let host_codec = Arc::new(host_session.into_codec().expect("host codec"));

        let store = Arc::new(ItemStore::new());
        store.add().await;

        let shutdown = CancellationToken::new();
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");

        let state = AppState {
            store: Arc::clone(&store),
            codec: worker_codec,
            token: Arc::new(token.clone()),
            shutdown: shutdown.clone(),
        };
        tokio::spawn(async move {
            serve(listener, state).await.expect("server runs");
        });

        let client = SyncClient::new(&format!("http://{addr}"), token, host_codec)
            .expect("client builds");

        Self {
            client,
            store,
            shutdown,
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// **VALUE**: Verifies the client's bootstrap ping returns the worker's
/// startup item.
///
/// **WHY THIS MATTERS**: This is the host's very first observation after
/// handshake; both sealed directions must line up through the public
/// client API, not just the raw codec.
///
/// **BUG THIS CATCHES**: Would catch the client sending a baseline shape
/// the server does not recognize, or failing to open the response.
#[tokio::test]
async fn given_fresh_worker_when_client_pings_then_initial_item_arrives() {
    let harness = Harness::start().await;

    let items = harness.client.ping(Vec::new()).await.expect("ping");

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, 1);
    assert_eq!(items[0].status, "0.00 %");
}

/// **VALUE**: Verifies the full host workflow: ping, add, incremental
/// ping, delete, and the follow-up observation of each step.
///
/// **WHY THIS MATTERS**: This is how the host actually runs — each ping's
/// baseline is built from the previous response, and mutations are only
/// observable through subsequent pings.
///
/// **BUG THIS CATCHES**: Would catch incremental baselines returning full
/// snapshots (or nothing), and delete acknowledgements carrying bodies.
#[tokio::test]
async fn given_running_worker_when_client_syncs_then_deltas_track_mutations() {
    let harness = Harness::start().await;

    // GIVEN: The bootstrap snapshot
    let items = harness.client.ping(Vec::new()).await.expect("first ping");
    assert_eq!(items.len(), 1);
    let baseline: Vec<ItemKey> = items.iter().map(|item| item.key()).collect();

    // WHEN: Adding an item and pinging with the old baseline
    harness.client.add_item().await.expect("add");
    let delta = timeout(Duration::from_secs(5), harness.client.ping(baseline))
        .await
        .expect("delta must arrive within one idle-retry interval")
        .expect("incremental ping");

    // THEN: Only the new item comes back
    assert_eq!(delta.len(), 1);
    assert_eq!(delta[0].id, 2);
    assert_eq!(delta[0].name, "entry 2");

    // AND: Deleting it brings the store back to one item
    harness.client.delete_item(2).await.expect("delete");
    assert_eq!(harness.store.len().await, 1);
}

/// **VALUE**: Verifies a delete of an unknown id surfaces as a server
/// error carrying the worker's description.
///
/// **WHY THIS MATTERS**: The host's supervisor logs these verbatim; an
/// opaque error would leave no trail of which id was bad.
///
/// **BUG THIS CATCHES**: Would catch non-2xx responses being treated as
/// success by the client.
#[tokio::test]
async fn given_unknown_id_when_client_deletes_then_server_error_reported() {
    let harness = Harness::start().await;

    let result = harness.client.delete_item(99).await;

    let error = result.expect_err("delete of unknown id must fail");
    assert!(
        error.to_string().contains("99"),
        "error must name the offending id: {error}"
    );
}
