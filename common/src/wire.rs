//! Wire types exchanged over the loopback transport.
//!
//! A logical request is a [`SyncRequest`]; on the wire it is always wrapped
//! in a [`SealedEnvelope`] produced by the envelope codec. Responses reuse
//! the same envelope shape around a plain item list.

use crate::item::ItemKey;

use serde::{Deserialize, Serialize};

/// A decoded request, one per envelope.
///
/// Each variant carries a concretely typed payload validated at decode
/// time; an unknown `type` tag fails deserialization outright instead of
/// being default-routed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncRequest {
    /// Long-poll read: `items` is the caller's current known baseline.
    Ping { items: Vec<ItemKey> },

    /// Create a fresh item; the next `ping` will observe it.
    AddItem,

    /// Delete the item whose id is carried as the wire's opaque string;
    /// parsed to an integer at dispatch time.
    DeleteItem { id: String },
}

/// The encrypted, integrity-checked container around every payload.
///
/// `timestamp` is the cleartext millisecond-epoch stamp bound to the
/// ciphertext as AEAD associated data; it is what the freshness check
/// authenticates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SealedEnvelope {
    pub nonce: String,
    pub ciphertext: String,
    pub timestamp: String,
}
