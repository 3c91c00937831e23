// Unit tests for the envelope codec and the freshness check

use crate::envelope::{DEFAULT_FRESHNESS_TOLERANCE_MS, EnvelopeCodec, check_freshness};
use crate::error::envelope::EnvelopeError;
use crate::session::KeyExchange;
use crate::wire::SyncRequest;

use std::time::{SystemTime, UNIX_EPOCH};

// Generous tolerance so round-trip tests cannot flake on a slow machine;
// exact boundary behavior is covered by the check_freshness tests below.
const TEST_TOLERANCE_MS: i64 = 10_000;

/// Build a worker/host codec pair over one derived session.
///
/// The worker codec is constructed first, matching the real startup
/// ordering where the receiving side exists before the host's first seal.
fn codec_pair(tolerance_ms: i64) -> (EnvelopeCodec, EnvelopeCodec) {
    let host = KeyExchange::generate();
    let worker = KeyExchange::generate();
    let token = host.bearer_token();

    let worker_codec = EnvelopeCodec::new(
        &worker
            .derive(host.public_key(), token.as_bytes())
            .expect("worker derive"),
        tolerance_ms,
    );
    let host_codec = EnvelopeCodec::new(
        &host
            .derive(worker.public_key(), token.as_bytes())
            .expect("host derive"),
        tolerance_ms,
    );

    (worker_codec, host_codec)
}

/// **VALUE**: Verifies a payload sealed by one side opens on the other.
///
/// **WHY THIS MATTERS**: This is the end-to-end contract of the codec: the
/// host seals a request, the worker opens it, and the payload comes out
/// intact. Everything else in the protocol sits on top of this.
///
/// **BUG THIS CATCHES**: Would catch nonce/AAD handling mismatches between
/// seal and open, or serde drift in the envelope shape.
#[test]
fn given_sealed_request_when_opened_by_peer_then_payload_intact() {
    // GIVEN: A derived codec pair and a request
    let (worker_codec, host_codec) = codec_pair(TEST_TOLERANCE_MS);
    let request = SyncRequest::DeleteItem {
        id: "42".to_string(),
    };

    // WHEN: Host seals, worker opens
    let envelope = host_codec.seal(&request).expect("seal");
    let decoded: SyncRequest = worker_codec.open(&envelope).expect("open");

    // THEN: The payload survives
    assert_eq!(decoded, request);
}

/// **VALUE**: Verifies a captured envelope cannot be replayed.
///
/// **WHY THIS MATTERS**: Replay resistance is the core security property of
/// the envelope protocol. Any local process that sniffs loopback traffic
/// can capture a valid envelope; re-presenting it must fail.
///
/// **BUG THIS CATCHES**: Would catch the high-water mark not advancing on
/// accept, or the strictly-greater comparison becoming greater-or-equal.
#[test]
fn given_accepted_envelope_when_replayed_then_rejected_expired() {
    let (worker_codec, host_codec) = codec_pair(TEST_TOLERANCE_MS);
    let envelope = host_codec
        .seal(&SyncRequest::AddItem)
        .expect("seal");

    // WHEN: The same envelope is opened twice
    let first: Result<SyncRequest, _> = worker_codec.open(&envelope);
    let second: Result<SyncRequest, _> = worker_codec.open(&envelope);

    // THEN: First accepted, replay rejected as Expired
    assert!(first.is_ok(), "first open must succeed");
    assert!(matches!(second, Err(EnvelopeError::Expired { .. })));
}

/// **VALUE**: Verifies messages arriving out of order are rejected.
///
/// **WHY THIS MATTERS**: Accepted messages must form a strictly increasing
/// timestamp sequence per session. Accepting an older stamp after a newer
/// one would reopen the replay window.
///
/// **BUG THIS CATCHES**: Would catch per-message (rather than per-session)
/// mark tracking.
#[test]
fn given_newer_message_accepted_when_older_arrives_then_rejected() {
    let (worker_codec, host_codec) = codec_pair(TEST_TOLERANCE_MS);

    // GIVEN: Two envelopes sealed in order (strictly increasing stamps)
    let older = host_codec.seal(&SyncRequest::AddItem).expect("seal older");
    let newer = host_codec.seal(&SyncRequest::AddItem).expect("seal newer");

    // WHEN: The newer one is accepted first
    worker_codec
        .open::<SyncRequest>(&newer)
        .expect("newer must open");

    // THEN: The older one is now expired
    assert!(matches!(
        worker_codec.open::<SyncRequest>(&older),
        Err(EnvelopeError::Expired { .. })
    ));
}

/// **VALUE**: Verifies a failed open leaves the high-water mark untouched.
///
/// **WHY THIS MATTERS**: A failed decode must not mutate session state.
/// If a tampered message advanced the mark, an attacker
/// could invalidate legitimate queued messages without ever authenticating.
///
/// **BUG THIS CATCHES**: Would catch the mark being advanced before the
/// integrity check instead of after it.
#[test]
fn given_tampered_envelope_when_open_fails_then_mark_unchanged() {
    let (worker_codec, host_codec) = codec_pair(TEST_TOLERANCE_MS);
    let envelope = host_codec.seal(&SyncRequest::AddItem).expect("seal");

    // GIVEN: A tampered copy of the envelope
    let mut tampered = envelope.clone();
    tampered.ciphertext = {
        let mut chars: Vec<char> = tampered.ciphertext.chars().collect();
        chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
        chars.into_iter().collect()
    };

    // WHEN: The tampered copy fails to open
    let tampered_result: Result<SyncRequest, _> = worker_codec.open(&tampered);
    assert!(matches!(
        tampered_result,
        Err(EnvelopeError::Decrypt { .. })
    ));

    // THEN: The original still opens — the mark never advanced
    let original: Result<SyncRequest, _> = worker_codec.open(&envelope);
    assert!(original.is_ok(), "mark must be unchanged after failed open");
}

/// **VALUE**: Verifies all four freshness branches at their exact boundaries.
///
/// **WHY THIS MATTERS**: The check is the replay/ordering gate for the whole
/// protocol; off-by-one drift in any comparison either opens a replay window
/// (accepting `ts == mark`) or rejects honest traffic (rejecting
/// `delta == tolerance`).
///
/// **BUG THIS CATCHES**: Would catch `<=` vs `<` regressions in any branch.
#[test]
fn given_boundary_timestamps_when_checked_then_each_branch_exact() {
    let mark = 1_000_000;
    let tolerance = 20;

    // Not a timestamp at all
    assert!(matches!(
        check_freshness("not-a-number", mark, mark + 10, tolerance),
        Err(EnvelopeError::InvalidFormat { .. })
    ));

    // At the mark: replay, rejected
    assert!(matches!(
        check_freshness(&mark.to_string(), mark, mark + 10, tolerance),
        Err(EnvelopeError::Expired { .. })
    ));

    // Exactly one unit above the mark: accepted
    let accepted = check_freshness(&(mark + 1).to_string(), mark, mark + 10, tolerance)
        .expect("mark + 1 must be accepted");
    assert_eq!(accepted, mark + 1);

    // Receiver behind the sender (negative delta): rejected
    assert!(matches!(
        check_freshness(&(mark + 30).to_string(), mark, mark + 29, tolerance),
        Err(EnvelopeError::InPast { .. })
    ));

    // Delta exactly at tolerance: accepted
    let now = mark + 100;
    assert!(check_freshness(&(now - tolerance).to_string(), mark, now, tolerance).is_ok());

    // Delta one past tolerance: rejected
    assert!(matches!(
        check_freshness(&(now - tolerance - 1).to_string(), mark, now, tolerance),
        Err(EnvelopeError::InFuture { .. })
    ));
}

/// **VALUE**: Verifies the tolerance is honored as a configurable value,
/// not a hard-coded constant.
///
/// **WHY THIS MATTERS**: The 20 ms reference tolerance is a tunable
/// deployment knob. A message older than the configured window must be
/// rejected as InFuture by a real codec, not just by the pure check.
///
/// **BUG THIS CATCHES**: Would catch the codec ignoring its constructor
/// tolerance and falling back to the default.
#[test]
fn given_message_older_than_tolerance_when_opened_then_in_future() {
    // GIVEN: A codec pair with the narrow default tolerance
    let (worker_codec, host_codec) = codec_pair(DEFAULT_FRESHNESS_TOLERANCE_MS);
    let envelope = host_codec.seal(&SyncRequest::AddItem).expect("seal");

    // WHEN: The envelope sits past the tolerance window before opening
    std::thread::sleep(std::time::Duration::from_millis(
        (DEFAULT_FRESHNESS_TOLERANCE_MS + 30) as u64,
    ));
    let result: Result<SyncRequest, _> = worker_codec.open(&envelope);

    // THEN: Rejected as too old
    assert!(matches!(result, Err(EnvelopeError::InFuture { .. })));
}

/// **VALUE**: Verifies outbound stamps are strictly monotonic even for
/// back-to-back sends in the same millisecond.
///
/// **WHY THIS MATTERS**: The receiver rejects anything not strictly newer
/// than its mark. Two honest requests sealed in one millisecond tick would
/// otherwise collide and the second would be dropped as a replay.
///
/// **BUG THIS CATCHES**: Would catch the seal path reusing a stamp for two
/// sends that land in the same millisecond tick.
#[test]
fn given_rapid_seals_when_timestamps_compared_then_strictly_increasing() {
    let (_, host_codec) = codec_pair(TEST_TOLERANCE_MS);

    let mut previous = 0i64;
    for _ in 0..50 {
        let envelope = host_codec.seal(&SyncRequest::AddItem).expect("seal");
        let stamp: i64 = envelope.timestamp.parse().expect("numeric stamp");
        assert!(
            stamp > previous,
            "stamps must strictly increase: {stamp} after {previous}"
        );
        previous = stamp;
    }
}

/// **VALUE**: Verifies outbound stamps never run ahead of the wall clock
/// and that a burst of back-to-back seals all open on the peer, starting
/// with a seal in the same millisecond the codecs were constructed.
///
/// **WHY THIS MATTERS**: Receivers give forward skew zero tolerance, so a
/// sender that resolves a same-millisecond collision by stamping past
/// `now` turns its own next honest request into an `InPast` rejection.
/// Likewise a receiver whose initial mark sits at its construction instant
/// rejects the host's very first request as a replay. Either way the
/// supervisor sees a 400 on honest traffic and respawns a healthy worker.
///
/// **BUG THIS CATCHES**: Would catch the outbound path bumping stamps
/// beyond the wall clock, or the high-water marks initializing to `now`
/// instead of strictly before it.
#[test]
fn given_same_millisecond_seals_when_opened_then_all_accepted() {
    let (worker_codec, host_codec) = codec_pair(TEST_TOLERANCE_MS);

    for _ in 0..10 {
        // WHEN: Sealing as fast as the codec allows
        let envelope = host_codec.seal(&SyncRequest::AddItem).expect("seal");
        let stamp: i64 = envelope.timestamp.parse().expect("numeric stamp");
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_millis() as i64;

        // THEN: The stamp never leads the clock and the peer accepts it
        assert!(stamp <= now, "stamp {stamp} must not lead the clock {now}");
        worker_codec
            .open::<SyncRequest>(&envelope)
            .expect("every honest seal must open");
    }
}
