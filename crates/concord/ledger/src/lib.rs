//! Concord Ledger - append-only, hash-chained governance record.
//!
//! The durability and tamper-evidence root of a team. Entries link through
//! blake3 content hashes back to an all-zero genesis constant; verification
//! recomputes every hash and linkage and reports all breaks.
#![deny(unsafe_code)]

mod entry;
mod error;
mod storage;

pub use entry::{recompute_entry_hash, LedgerEntry, LedgerVerification};
pub use error::LedgerError;
pub use storage::{FileStorage, LedgerStorage, MemoryStorage};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use concord_signer::SigningCapability;
use concord_types::{
    ActionDecision, ActionPayload, Clock, MemberId, Policy, SystemClock, GENESIS_HASH,
};
use tracing::{debug, error, info};

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Filter for ledger reads. Matches are returned most-recent-first.
#[derive(Clone, Debug, Default)]
pub struct LedgerQuery {
    pub actor: Option<String>,
    pub kind: Option<String>,
    pub decision: Option<ActionDecision>,
    pub hw_signed_only: bool,
    pub min_sequence: Option<u64>,
}

/// Per-actor activity rollup.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActorActivity {
    pub actions: u64,
    pub approved: u64,
    pub denied: u64,
    pub atp_spent: f64,
}

/// Whole-ledger analytics snapshot.
#[derive(Clone, Debug, Default)]
pub struct LedgerAnalytics {
    pub total_entries: u64,
    pub by_actor: BTreeMap<String, ActorActivity>,
    pub policy_versions: u64,
    pub hw_signed_count: u64,
}

/// The governance ledger for one team. A single instance owns the backing
/// storage; all appends serialize through its write lock.
pub struct Ledger {
    storage: Box<dyn LedgerStorage>,
    clock: Arc<dyn Clock>,
    chain: RwLock<Vec<LedgerEntry>>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").finish_non_exhaustive()
    }
}

impl Ledger {
    pub fn new(storage: Box<dyn LedgerStorage>, clock: Arc<dyn Clock>) -> Result<Self, LedgerError> {
        // `FileStorage::open` creates the file, so a load failure here is a
        // real read error, never a first run.
        let entries = storage.load()?;
        if !entries.is_empty() {
            info!(entries = entries.len(), "Ledger reopened");
        }
        Ok(Self {
            storage,
            clock,
            chain: RwLock::new(entries),
        })
    }

    pub fn open_file(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self, LedgerError> {
        Self::new(Box::new(FileStorage::open(path)?), clock)
    }

    pub fn in_memory() -> Result<Self, LedgerError> {
        Self::new(Box::new(MemoryStorage::new()), Arc::new(SystemClock))
    }

    /// Append a governance action. The entry is hashed, signed, and durably
    /// persisted before the in-memory head advances; a storage failure
    /// leaves the chain unchanged.
    pub fn append(
        &self,
        action: ActionPayload,
        signer_id: MemberId,
        signer: &dyn SigningCapability,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut chain = self.chain.write().map_err(|_| LedgerError::LockError)?;

        let prev_hash = chain
            .last()
            .map(|entry| entry.entry_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let mut entry = LedgerEntry {
            sequence: chain.len() as u64 + 1,
            timestamp: self.clock.now(),
            prev_hash,
            action,
            signer_id,
            entry_hash: String::new(),
            signature: String::new(),
            hw_signed: false,
        };
        entry.entry_hash = recompute_entry_hash(&entry)?;
        entry.signature = hex_encode(&signer.sign(entry.entry_hash.as_bytes())?);
        entry.hw_signed = signer.is_hardware_backed();

        self.storage.append(&entry)?;
        debug!(
            sequence = entry.sequence,
            kind = entry.action.kind(),
            hw_signed = entry.hw_signed,
            "Ledger entry appended"
        );
        chain.push(entry.clone());
        Ok(entry)
    }

    /// Convenience for the first entry of a new team's chain.
    pub fn append_genesis(
        &self,
        team_name: impl Into<String>,
        root_id: MemberId,
        admin_id: MemberId,
        signer: &dyn SigningCapability,
    ) -> Result<LedgerEntry, LedgerError> {
        let signer_id = admin_id.clone();
        self.append(
            ActionPayload::Genesis {
                team_name: team_name.into(),
                root_id,
                admin_id,
            },
            signer_id,
            signer,
        )
    }

    pub fn len(&self) -> usize {
        self.chain.read().map(|chain| chain.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn head_hash(&self) -> Result<String, LedgerError> {
        let chain = self.chain.read().map_err(|_| LedgerError::LockError)?;
        Ok(chain
            .last()
            .map(|entry| entry.entry_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string()))
    }

    pub fn tail(&self, n: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let chain = self.chain.read().map_err(|_| LedgerError::LockError)?;
        let start = chain.len().saturating_sub(n);
        Ok(chain[start..].to_vec())
    }

    /// Re-derive every entry hash and linkage. Reports all mismatching
    /// sequences; never aborts early, so a single corrupted entry still
    /// yields a complete diagnostic.
    pub fn verify(&self) -> Result<LedgerVerification, LedgerError> {
        let chain = self.chain.read().map_err(|_| LedgerError::LockError)?;

        let mut breaks = Vec::new();
        let mut hw_signed_count = 0u64;
        let mut expected_prev = GENESIS_HASH.to_string();

        for (index, entry) in chain.iter().enumerate() {
            let expected_sequence = index as u64 + 1;
            let mut broken = entry.sequence != expected_sequence || entry.prev_hash != expected_prev;

            match recompute_entry_hash(entry) {
                Ok(recomputed) if recomputed == entry.entry_hash => {}
                Ok(_) => broken = true,
                Err(_) => broken = true,
            }

            if broken {
                breaks.push(entry.sequence);
            }
            if entry.hw_signed {
                hw_signed_count += 1;
            }
            expected_prev = entry.entry_hash.clone();
        }

        let verification = LedgerVerification {
            valid: breaks.is_empty(),
            entries: chain.len() as u64,
            breaks,
            hw_signed_count,
        };
        if !verification.valid {
            // Operational alarm: tampering or corruption in the record.
            error!(
                breaks = ?verification.breaks,
                entries = verification.entries,
                "Ledger integrity broken"
            );
        }
        Ok(verification)
    }

    /// Latest `PolicyUpdate` payload, or None if the chain carries no policy
    /// yet. O(n) by design; hot paths cache via the tamper-checked resolver.
    pub fn active_policy(&self) -> Result<Option<Policy>, LedgerError> {
        self.policy_at_sequence(u64::MAX)
    }

    /// Latest `PolicyUpdate` at or below the given sequence.
    pub fn policy_at_sequence(&self, sequence: u64) -> Result<Option<Policy>, LedgerError> {
        let chain = self.chain.read().map_err(|_| LedgerError::LockError)?;
        Ok(chain
            .iter()
            .rev()
            .filter(|entry| entry.sequence <= sequence)
            .find_map(|entry| match &entry.action {
                ActionPayload::PolicyUpdate { policy } => Some(policy.clone()),
                _ => None,
            }))
    }

    /// Filtered read, most-recent-first.
    pub fn query(&self, query: &LedgerQuery) -> Result<Vec<LedgerEntry>, LedgerError> {
        let chain = self.chain.read().map_err(|_| LedgerError::LockError)?;
        let mut matches: Vec<LedgerEntry> = chain
            .iter()
            .filter(|entry| {
                if let Some(min) = query.min_sequence {
                    if entry.sequence < min {
                        return false;
                    }
                }
                if query.hw_signed_only && !entry.hw_signed {
                    return false;
                }
                if let Some(kind) = &query.kind {
                    if entry.action.kind() != kind.as_str() {
                        return false;
                    }
                }
                if let Some(actor) = &query.actor {
                    if entry.action.actor() != Some(actor.as_str()) {
                        return false;
                    }
                }
                if let Some(decision) = query.decision {
                    match &entry.action {
                        ActionPayload::Action { decision: d, .. } if *d == decision => {}
                        _ => return false,
                    }
                }
                true
            })
            .cloned()
            .collect();
        matches.reverse();
        Ok(matches)
    }

    /// Per-actor rollup across the whole chain.
    pub fn analytics(&self) -> Result<LedgerAnalytics, LedgerError> {
        let chain = self.chain.read().map_err(|_| LedgerError::LockError)?;
        let mut analytics = LedgerAnalytics {
            total_entries: chain.len() as u64,
            ..Default::default()
        };

        for entry in chain.iter() {
            if entry.hw_signed {
                analytics.hw_signed_count += 1;
            }
            match &entry.action {
                ActionPayload::PolicyUpdate { .. } => analytics.policy_versions += 1,
                ActionPayload::Action {
                    actor,
                    decision,
                    atp_cost,
                    ..
                } => {
                    let activity = analytics.by_actor.entry(actor.clone()).or_default();
                    activity.actions += 1;
                    match decision {
                        ActionDecision::Approved => {
                            activity.approved += 1;
                            activity.atp_spent += atp_cost;
                        }
                        ActionDecision::Denied => activity.denied += 1,
                        ActionDecision::Pending => {}
                    }
                }
                _ => {}
            }
        }
        Ok(analytics)
    }
}
