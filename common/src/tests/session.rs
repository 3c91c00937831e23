// Unit tests for key exchange, PEM/token encoding, and session setup

use crate::envelope::DEFAULT_FRESHNESS_TOLERANCE_MS;
use crate::error::session::SessionError;
use crate::session::{KeyExchange, Session, public_key_from_pem, public_key_from_token};

/// **VALUE**: Verifies the public key survives a PEM encode/parse round trip.
///
/// **WHY THIS MATTERS**: The PEM block printed to the worker's stdout is the
/// only channel the host has for the worker's key. If the round trip corrupts
/// a single byte, the derived session keys diverge and every envelope fails
/// to open with a confusing decrypt error.
///
/// **BUG THIS CATCHES**: Would catch marker or base64 changes in either the
/// encoder or the parser that break the handshake.
#[test]
fn given_keypair_when_pem_round_tripped_then_same_public_key() {
    // GIVEN: A fresh keypair
    let keys = KeyExchange::generate();

    // WHEN: Rendering to PEM and parsing back
    let pem = keys.public_key_pem();
    let parsed = public_key_from_pem(&pem).expect("valid PEM must parse");

    // THEN: The parsed key is byte-identical
    assert_eq!(parsed.as_bytes(), keys.public_key().as_bytes());
}

/// **VALUE**: Verifies the bearer token decodes back to the host public key.
///
/// **WHY THIS MATTERS**: The token does double duty: bearer credential and
/// key transfer. The worker must recover the exact host key from it or the
/// two sides derive different session keys.
///
/// **BUG THIS CATCHES**: Would catch a base64 alphabet or padding mismatch
/// between `bearer_token()` and `public_key_from_token()`.
#[test]
fn given_bearer_token_when_parsed_then_yields_host_public_key() {
    let keys = KeyExchange::generate();

    let token = keys.bearer_token();
    let parsed = public_key_from_token(&token).expect("valid token must parse");

    assert_eq!(parsed.as_bytes(), keys.public_key().as_bytes());
}

/// **VALUE**: Verifies both sides derive the same session key.
///
/// **WHY THIS MATTERS**: This is the whole point of the handshake: host and
/// worker, each holding only their own secret and the peer's public key,
/// must arrive at an identical AES key. Asymmetry here breaks all traffic.
///
/// **BUG THIS CATCHES**: Would catch a salt/info mismatch in the HKDF step
/// or an argument swap in the Diffie-Hellman call.
#[test]
fn given_two_keypairs_when_both_derive_then_keys_match() {
    // GIVEN: Host and worker keypairs plus the shared token salt
    let host = KeyExchange::generate();
    let worker = KeyExchange::generate();
    let token = host.bearer_token();

    // WHEN: Each side derives with the peer's public key
    let host_key = host
        .derive(worker.public_key(), token.as_bytes())
        .expect("host derive");
    let worker_key = worker
        .derive(host.public_key(), token.as_bytes())
        .expect("worker derive");

    // THEN: The derived keys are identical
    assert_eq!(host_key.0.as_ref(), worker_key.0.as_ref());
}

/// **VALUE**: Verifies malformed PEM input is rejected with a `Pem` error.
///
/// **WHY THIS MATTERS**: The PEM arrives interleaved with arbitrary worker
/// diagnostics; a parse failure must be a clean, reportable error the
/// supervisor can react to by restarting the worker, never a panic.
///
/// **BUG THIS CATCHES**: Would catch a parser that panics on missing markers
/// or silently accepts truncated key material.
#[test]
fn given_malformed_pem_when_parsed_then_returns_error() {
    // GIVEN: Inputs missing markers, with bad base64, and with a short key
    let missing_markers = "not a pem block";
    let bad_base64 =
        "-----BEGIN PUBLIC KEY-----\n!!!not-base64!!!\n-----END PUBLIC KEY-----";
    let short_key = "-----BEGIN PUBLIC KEY-----\nQUJD\n-----END PUBLIC KEY-----";

    // WHEN/THEN: All fail with a session error
    assert!(matches!(
        public_key_from_pem(missing_markers),
        Err(SessionError::Pem { .. })
    ));
    assert!(matches!(
        public_key_from_pem(bad_base64),
        Err(SessionError::Pem { .. })
    ));
    assert!(matches!(
        public_key_from_pem(short_key),
        Err(SessionError::Key { .. })
    ));
}

/// **VALUE**: Verifies a session refuses to hand out a codec before the
/// remote key is installed.
///
/// **WHY THIS MATTERS**: Until the handshake completes, the session cannot
/// encrypt or decrypt. This must surface as a distinct "no peer key"
/// condition, fatal to the attempt but not a crash.
///
/// **BUG THIS CATCHES**: Would catch the codec being constructed eagerly
/// with a placeholder key, which would silently produce undecryptable
/// traffic instead of a clear error.
#[test]
fn given_no_remote_key_when_codec_requested_then_no_peer_key_error() {
    // GIVEN: A host session with no remote key installed
    let session = Session::new(KeyExchange::generate(), DEFAULT_FRESHNESS_TOLERANCE_MS);

    // WHEN: Requesting the codec
    let result = session.codec();

    // THEN: The distinct NoPeerKey condition is reported
    assert!(matches!(result, Err(SessionError::NoPeerKey { .. })));
}

/// **VALUE**: Verifies install_remote makes the codec available.
///
/// **BUG THIS CATCHES**: Would catch the install path failing to store the
/// derived codec.
#[test]
fn given_remote_key_installed_when_codec_requested_then_available() {
    let worker = KeyExchange::generate();
    let mut session = Session::new(KeyExchange::generate(), DEFAULT_FRESHNESS_TOLERANCE_MS);

    session
        .install_remote(worker.public_key())
        .expect("install remote key");

    assert!(session.codec().is_ok());
}
