//! Ledger entry shape and canonical hashing.

use chrono::{DateTime, Utc};
use concord_types::{ActionPayload, MemberId};
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// One immutable line of the governance record.
///
/// `entry_hash` covers every field except itself and `signature`;
/// `prev_hash` of entry N equals `entry_hash` of entry N-1, and entry 1
/// links to the all-zero genesis constant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub prev_hash: String,
    pub action: ActionPayload,
    pub signer_id: MemberId,
    pub entry_hash: String,
    pub signature: String,
    pub hw_signed: bool,
}

/// Recompute an entry's content hash from its hashed fields.
pub fn recompute_entry_hash(entry: &LedgerEntry) -> Result<String, LedgerError> {
    let mut canonical = entry.clone();
    canonical.entry_hash = String::new();
    canonical.signature = String::new();
    canonical.hw_signed = false;

    let encoded = serde_json::to_vec(&canonical)
        .map_err(|error| LedgerError::Serialization(error.to_string()))?;

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"concord-ledger-entry-v1:");
    hasher.update(&encoded);
    Ok(hasher.finalize().to_hex().to_string())
}

/// Outcome of a full-chain verification pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerVerification {
    pub valid: bool,
    pub entries: u64,
    /// Sequences at which a hash or linkage mismatch was found. Every break
    /// is reported, not just the first.
    pub breaks: Vec<u64>,
    pub hw_signed_count: u64,
}
