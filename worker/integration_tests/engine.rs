//! Full-stack exercises of the worker HTTP surface: a real listener on an
//! ephemeral loopback port, real sealed envelopes, a real client.

use syncbridge_worker::server::{AppState, serve};
use syncbridge_worker::store::ItemStore;

use common::envelope::EnvelopeCodec;
use common::item::Item;
use common::session::{KeyExchange, Session};
use common::wire::{SealedEnvelope, SyncRequest};

use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const TEST_TOLERANCE_MS: i64 = 10_000;

/// A running worker server plus the host's half of the session.
struct Harness {
    base_url: String,
    token: String,
    host_codec: EnvelopeCodec,
    client: reqwest::Client,
    shutdown: CancellationToken,
}

impl Harness {
    /// Perform the handshake in-process and start serving on an ephemeral
    /// loopback port. The store starts with one item, like the real worker.
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
        let host_codec = host_session.into_codec().expect("host codec");

        let store = Arc::new(ItemStore::new());
        store.add().await;

        let shutdown = CancellationToken::new();
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");

        let state = AppState {
            store,
            codec: worker_codec,
            token: Arc::new(token.clone()),
            shutdown: shutdown.clone(),
        };
        tokio::spawn(async move {
            serve(listener, state).await.expect("server runs");
        });

        Self {
            base_url: format!("http://{addr}"),
            token,
            host_codec,
            client: reqwest::Client::new(),
            shutdown,
        }
    }

    fn seal(&self, request: &SyncRequest) -> SealedEnvelope {
        self.host_codec.seal(request).expect("seal request")
    }

    async fn post_sealed(&self, envelope: &SealedEnvelope) -> reqwest::Response {
        let body = serde_json::to_string(envelope).expect("serialize envelope");
        self.client
            .post(format!("{}/request", self.base_url))
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .body(body)
            .send()
            .await
            .expect("request must reach the server")
    }

    async fn ping(&self) -> Vec<Item> {
        let envelope = self.seal(&SyncRequest::Ping { items: Vec::new() });
        let response = self.post_sealed(&envelope).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.text().await.expect("response body");
        let sealed: SealedEnvelope = serde_json::from_str(&body).expect("sealed response");
        self.host_codec.open(&sealed).expect("open response")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// **VALUE**: Verifies requests without a bearer token never reach the
/// protocol layer.
///
/// **WHY THIS MATTERS**: The token check is the first authenticated gate;
/// an anonymous local process probing the port must get nothing but a 403.
///
/// **BUG THIS CATCHES**: Would catch the authorization header being
/// treated as optional.
#[tokio::test]
async fn given_running_worker_when_bearer_missing_then_forbidden() {
    let harness = Harness::start().await;

    let response = harness
        .client
        .post(format!("{}/request", harness.base_url))
        .body("{}")
        .send()
        .await
        .expect("request must reach the server");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

/// **VALUE**: Verifies a syntactically valid but wrong token is rejected
/// before the body is parsed.
///
/// **WHY THIS MATTERS**: Only the spawning host knows the real token; any
/// other caller must be indistinguishable from an anonymous one.
///
/// **BUG THIS CATCHES**: Would catch a prefix-only or length-only token
/// comparison.
#[tokio::test]
async fn given_running_worker_when_token_wrong_then_forbidden() {
    let harness = Harness::start().await;
    let envelope = harness.seal(&SyncRequest::Ping { items: Vec::new() });
    let body = serde_json::to_string(&envelope).expect("serialize envelope");

    let response = harness
        .client
        .post(format!("{}/request", harness.base_url))
        .header(AUTHORIZATION, format!("Bearer {}x", harness.token))
        .body(body)
        .send()
        .await
        .expect("request must reach the server");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.text().await.expect("body"), "auth error");
}

/// **VALUE**: Verifies the first ping returns the startup item through the
/// full sealed round trip.
///
/// **WHY THIS MATTERS**: This is the host's bootstrap path: empty baseline
/// in, full snapshot out, both directions encrypted.
///
/// **BUG THIS CATCHES**: Would catch key derivation disagreeing between
/// the two sides, which every unit test with a shared helper would miss.
#[tokio::test]
async fn given_fresh_worker_when_pinged_then_initial_item_returned() {
    let harness = Harness::start().await;

    let items = harness.ping().await;

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, 1);
    assert_eq!(items[0].name, "entry 1");
    assert_eq!(items[0].status, "0.00 %");
}

/// **VALUE**: Verifies an add mutation is acknowledged bodylessly and
/// visible to the next ping.
///
/// **WHY THIS MATTERS**: Mutation-then-observe is the only way the host
/// learns an add landed; both legs must work against one live server.
///
/// **BUG THIS CATCHES**: Would catch the server sealing an empty response
/// for mutations, which would desynchronize the host's replay mark.
#[tokio::test]
async fn given_running_worker_when_item_added_then_next_ping_observes_it() {
    let harness = Harness::start().await;

    // WHEN: Adding an item
    let envelope = harness.seal(&SyncRequest::AddItem);
    let response = harness.post_sealed(&envelope).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.text().await.expect("body").is_empty(),
        "mutations are acknowledged by status alone"
    );

    // THEN: The next ping sees both items
    let items = harness.ping().await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[1].id, 2);
    assert_eq!(items[1].name, "entry 2");
}

/// **VALUE**: Verifies a delete of a nonexistent id fails the request
/// without poisoning the session.
///
/// **WHY THIS MATTERS**: A bad request must cost only that request; the
/// same session must keep working afterwards.
///
/// **BUG THIS CATCHES**: Would catch request errors tearing down the codec
/// or the server turning them into 5xx.
#[tokio::test]
async fn given_missing_id_when_delete_requested_then_bad_request_and_session_survives() {
    let harness = Harness::start().await;

    let envelope = harness.seal(&SyncRequest::DeleteItem {
        id: "99".to_string(),
    });
    let response = harness.post_sealed(&envelope).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Session still works
    let items = harness.ping().await;
    assert_eq!(items.len(), 1);
}

/// **VALUE**: Verifies a captured envelope cannot be submitted twice.
///
/// **WHY THIS MATTERS**: Replay resistance is the protocol's core security
/// property; the high-water mark must reject the byte-identical resend.
///
/// **BUG THIS CATCHES**: Would catch the mark not advancing on accepted
/// envelopes, or advancing per-codec-clone instead of per-session.
#[tokio::test]
async fn given_accepted_envelope_when_replayed_then_rejected() {
    let harness = Harness::start().await;

    let envelope = harness.seal(&SyncRequest::AddItem);

    let first = harness.post_sealed(&envelope).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = harness.post_sealed(&envelope).await;
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);

    // Only the accepted submission mutated the store
    let items = harness.ping().await;
    assert_eq!(items.len(), 2);
}

/// **VALUE**: Verifies garbage bodies are rejected as malformed without
/// touching the replay mark.
///
/// **WHY THIS MATTERS**: The JSON parse is the outermost untrusted-input
/// boundary after auth; it must fail cleanly.
///
/// **BUG THIS CATCHES**: Would catch the body parse panicking or being
/// reported as an auth failure.
#[tokio::test]
async fn given_running_worker_when_body_is_garbage_then_bad_request() {
    let harness = Harness::start().await;

    let response = harness
        .client
        .post(format!("{}/request", harness.base_url))
        .header(AUTHORIZATION, format!("Bearer {}", harness.token))
        .body("not json")
        .send()
        .await
        .expect("request must reach the server");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Freshness state is untouched; a real envelope still goes through
    let items = harness.ping().await;
    assert_eq!(items.len(), 1);
}

/// **VALUE**: Verifies the unauthenticated health probe answers.
///
/// **WHY THIS MATTERS**: The host's spawn readiness loop polls this before
/// the first sealed request; if it required auth the bootstrap would
/// deadlock on itself.
///
/// **BUG THIS CATCHES**: Would catch the health route being folded behind
/// the bearer gate.
#[tokio::test]
async fn given_running_worker_when_health_probed_then_ok_without_auth() {
    let harness = Harness::start().await;

    let response = harness
        .client
        .get(format!("{}/health", harness.base_url))
        .send()
        .await
        .expect("request must reach the server");

    assert_eq!(response.status(), StatusCode::OK);
}
