//! Authenticated envelope codec.
//!
//! Every request and response is sealed into an AES-256-GCM envelope whose
//! associated data is the sender's millisecond-epoch timestamp. On open,
//! the timestamp is authenticated against a per-session high-water mark:
//! anything not strictly newer than the last accepted message is rejected,
//! which defeats replay of captured requests. The check-and-advance runs
//! under one mutex so two concurrently arriving messages cannot both pass
//! against the same old mark. A failed open never advances the mark.

use crate::error::envelope::EnvelopeError;
use crate::error::error_location::ErrorLocation;
use crate::session::SharedKey;
use crate::wire::SealedEnvelope;

use std::panic::Location;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Default receiver-side jitter tolerance. Deliberately narrow for two
/// co-located processes on loopback; tunable per deployment.
pub const DEFAULT_FRESHNESS_TOLERANCE_MS: i64 = 20;

const NONCE_LEN: usize = 12;

/// Seals and opens envelopes for one side of a session.
///
/// Holds two independent timestamp marks: `inbound` is the replay
/// high-water mark for messages we accept, `outbound` guarantees the
/// stamps we issue are strictly monotonic even for same-millisecond sends.
pub struct EnvelopeCodec {
    cipher: Aes256Gcm,
    tolerance_ms: i64,
    inbound_mark: Mutex<i64>,
    outbound_mark: Mutex<i64>,
}

impl EnvelopeCodec {
    /// Build a codec over a derived session key.
    ///
    /// Both marks start one millisecond behind the current time: a message
    /// stamped in the same millisecond this codec was constructed is
    /// accepted, anything older is rejected as `Expired`.
    pub fn new(key: &SharedKey, tolerance_ms: i64) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.0.as_ref()));
        let mark = now_ms() - 1;

        Self {
            cipher,
            tolerance_ms,
            inbound_mark: Mutex::new(mark),
            outbound_mark: Mutex::new(mark),
        }
    }

    /// Serialize and encrypt a payload, binding a fresh timestamp as
    /// associated data.
    #[track_caller]
    pub fn seal<T: Serialize>(&self, payload: &T) -> Result<SealedEnvelope, EnvelopeError> {
        let plaintext = serde_json::to_vec(payload).map_err(|e| EnvelopeError::Payload {
            message: format!("failed to serialize payload: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;

        let timestamp = self.next_outbound_timestamp();
        let aad = timestamp.to_string();

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: &plaintext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|e| EnvelopeError::Encrypt {
                message: format!("AEAD seal failed: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })?;

        Ok(SealedEnvelope {
            nonce: STANDARD.encode(nonce_bytes),
            ciphertext: STANDARD.encode(ciphertext),
            timestamp: aad,
        })
    }

    /// Decrypt, verify integrity, authenticate the timestamp, and
    /// deserialize the payload.
    ///
    /// On success the inbound high-water mark advances to the envelope's
    /// timestamp; on any failure it is left untouched.
    #[track_caller]
    pub fn open<T: DeserializeOwned>(&self, envelope: &SealedEnvelope) -> Result<T, EnvelopeError> {
        let nonce_bytes = STANDARD
            .decode(&envelope.nonce)
            .map_err(|e| EnvelopeError::InvalidFormat {
                message: format!("nonce is not valid base64: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(EnvelopeError::InvalidFormat {
                message: format!("nonce must be {NONCE_LEN} bytes, got {}", nonce_bytes.len()),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let ciphertext =
            STANDARD
                .decode(&envelope.ciphertext)
                .map_err(|e| EnvelopeError::InvalidFormat {
                    message: format!("ciphertext is not valid base64: {e}"),
                    location: ErrorLocation::from(Location::caller()),
                })?;

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &ciphertext,
                    aad: envelope.timestamp.as_bytes(),
                },
            )
            .map_err(|e| EnvelopeError::Decrypt {
                message: format!("AEAD open failed: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })?;

        // Check-and-advance must be atomic: hold the mark for the whole
        // freshness check.
        {
            let mut mark = lock(&self.inbound_mark);
            let accepted = check_freshness(&envelope.timestamp, *mark, now_ms(), self.tolerance_ms)?;
            *mark = accepted;
        }

        serde_json::from_slice(&plaintext).map_err(|e| EnvelopeError::Payload {
            message: format!("failed to deserialize payload: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })
    }

    /// Issue the next outbound timestamp: strictly monotonic and never
    /// ahead of the wall clock. Receivers reject any stamp ahead of their
    /// own clock, so a second seal inside one millisecond waits the tick
    /// out under the mutex instead of stamping into the future.
    fn next_outbound_timestamp(&self) -> i64 {
        let mut mark = lock(&self.outbound_mark);
        let mut now = now_ms();
        while now <= *mark {
            std::thread::sleep(Duration::from_millis(1));
            now = now_ms();
        }
        *mark = now;
        now
    }
}

/// The authentication check of the freshness protocol, pure over its
/// inputs so the boundary conditions are directly testable.
#[track_caller]
pub(crate) fn check_freshness(
    aad: &str,
    mark: i64,
    now: i64,
    tolerance_ms: i64,
) -> Result<i64, EnvelopeError> {
    let timestamp: i64 = aad.parse().map_err(|e| EnvelopeError::InvalidFormat {
        message: format!("associated data is not a timestamp: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    if timestamp <= mark {
        return Err(EnvelopeError::Expired {
            message: format!("timestamp {timestamp} at or below high-water mark {mark}"),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    let delta = now - timestamp;
    if delta < 0 {
        return Err(EnvelopeError::InPast {
            message: format!("timestamp {timestamp} is {}ms ahead of receiver", -delta),
            location: ErrorLocation::from(Location::caller()),
        });
    }
    if delta > tolerance_ms {
        return Err(EnvelopeError::InFuture {
            message: format!("timestamp {timestamp} is {delta}ms old, tolerance {tolerance_ms}ms"),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    Ok(timestamp)
}

fn lock(mark: &Mutex<i64>) -> MutexGuard<'_, i64> {
    mark.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
