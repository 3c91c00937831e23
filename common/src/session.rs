//! Key exchange and session state for the loopback protocol.
//!
//! Each process generates an x25519 keypair at startup. The worker ships
//! its public key to the host as a PEM block on stdout; the host ships its
//! public key to the worker inside the bearer token it passes on the
//! command line. Once each side holds the other's public key, both derive
//! the same AES-256-GCM key via Diffie-Hellman + HKDF-SHA256 (salted with
//! the bearer token so a different token yields a different session key).

use crate::envelope::EnvelopeCodec;
use crate::error::error_location::ErrorLocation;
use crate::error::session::SessionError;

use std::panic::Location;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

pub const PEM_HEADER: &str = "-----BEGIN PUBLIC KEY-----";
pub const PEM_FOOTER: &str = "-----END PUBLIC KEY-----";

const HKDF_INFO: &[u8] = b"syncbridge envelope key v1";
const KEY_LEN: usize = 32;

/// The derived per-session symmetric key. Wiped on drop.
pub struct SharedKey(pub(crate) Zeroizing<[u8; KEY_LEN]>);

/// Local keypair plus encoding helpers.
pub struct KeyExchange {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyExchange {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// PEM rendering of the public key, for the worker's stdout handshake.
    pub fn public_key_pem(&self) -> String {
        format!(
            "{PEM_HEADER}\n{}\n{PEM_FOOTER}",
            STANDARD.encode(self.public.as_bytes())
        )
    }

    /// The bearer credential: URL-safe base64 of the local public key.
    ///
    /// Stable and collision-resistant, so it doubles as the capability
    /// token for every non-handshake request.
    pub fn bearer_token(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.public.as_bytes())
    }

    /// Derive the session key from our secret and the peer's public key.
    ///
    /// Both sides must use the same `salt` (the bearer token bytes) to
    /// arrive at the same key.
    #[track_caller]
    pub fn derive(&self, remote: &PublicKey, salt: &[u8]) -> Result<SharedKey, SessionError> {
        let shared = self.secret.diffie_hellman(remote);
        let hkdf = Hkdf::<Sha256>::new(Some(salt), shared.as_bytes());

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        hkdf.expand(HKDF_INFO, key.as_mut())
            .map_err(|e| SessionError::Derive {
                message: format!("HKDF expand failed: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })?;

        Ok(SharedKey(key))
    }
}

/// Parse a peer public key from a PEM block (as captured from the worker's
/// stdout). Tolerates base64 bodies wrapped over multiple lines.
#[track_caller]
pub fn public_key_from_pem(pem: &str) -> Result<PublicKey, SessionError> {
    let trimmed = pem.trim();

    let body = trimmed
        .strip_prefix(PEM_HEADER)
        .and_then(|rest| rest.strip_suffix(PEM_FOOTER))
        .ok_or_else(|| SessionError::Pem {
            message: "missing PEM public key markers".to_string(),
            location: ErrorLocation::from(Location::caller()),
        })?;

    let compact: String = body.split_whitespace().collect();
    let bytes = STANDARD.decode(&compact).map_err(|e| SessionError::Pem {
        message: format!("PEM body is not valid base64: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    public_key_from_bytes(&bytes)
}

/// Parse a peer public key from a bearer token (the host's key as passed
/// to the worker on the command line).
#[track_caller]
pub fn public_key_from_token(token: &str) -> Result<PublicKey, SessionError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token.trim())
        .map_err(|e| SessionError::Key {
            message: format!("bearer token is not valid base64: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;

    public_key_from_bytes(&bytes)
}

#[track_caller]
fn public_key_from_bytes(bytes: &[u8]) -> Result<PublicKey, SessionError> {
    let raw: [u8; KEY_LEN] = bytes.try_into().map_err(|_| SessionError::Key {
        message: format!("public key must be {KEY_LEN} bytes, got {}", bytes.len()),
        location: ErrorLocation::from(Location::caller()),
    })?;

    Ok(PublicKey::from(raw))
}

/// One side's view of the authenticated session.
///
/// Created with local key material and the bearer token; useless for
/// encryption until [`Session::install_remote`] has run (the codec
/// accessor reports [`SessionError::NoPeerKey`] before then).
pub struct Session {
    keys: KeyExchange,
    token: String,
    tolerance_ms: i64,
    codec: Option<EnvelopeCodec>,
}

impl Session {
    /// Host-side constructor: the token is derived from the local key.
    pub fn new(keys: KeyExchange, tolerance_ms: i64) -> Self {
        let token = keys.bearer_token();
        Self {
            keys,
            token,
            tolerance_ms,
            codec: None,
        }
    }

    /// Worker-side constructor: the token arrived as a startup argument
    /// and carries the host's public key.
    pub fn with_token(keys: KeyExchange, token: String, tolerance_ms: i64) -> Self {
        Self {
            keys,
            token,
            tolerance_ms,
            codec: None,
        }
    }

    pub fn keys(&self) -> &KeyExchange {
        &self.keys
    }

    /// The bearer credential sent (host) or expected (worker) on every
    /// non-handshake request.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Install the peer's public key and derive the envelope codec.
    #[track_caller]
    pub fn install_remote(&mut self, remote: &PublicKey) -> Result<(), SessionError> {
        let key = self.keys.derive(remote, self.token.as_bytes())?;
        self.codec = Some(EnvelopeCodec::new(&key, self.tolerance_ms));
        Ok(())
    }

    /// The envelope codec, once a peer key is installed.
    #[track_caller]
    pub fn codec(&self) -> Result<&EnvelopeCodec, SessionError> {
        self.codec.as_ref().ok_or_else(|| SessionError::NoPeerKey {
            message: "no remote public key installed for this session".to_string(),
            location: ErrorLocation::from(Location::caller()),
        })
    }

    /// Consume the session, yielding the codec for shared ownership.
    #[track_caller]
    pub fn into_codec(self) -> Result<EnvelopeCodec, SessionError> {
        self.codec.ok_or_else(|| SessionError::NoPeerKey {
            message: "no remote public key installed for this session".to_string(),
            location: ErrorLocation::from(Location::caller()),
        })
    }
}
