//! Concord Policy - resolution and version governance.
//!
//! The authoritative policy is whatever the ledger says it is: the latest
//! `PolicyUpdate` entry, or the hard-coded baseline when none exists. This
//! crate adds the hot-path cache (tamper-checked by content hash) and the
//! governance rules for accepting a new policy version.
#![deny(unsafe_code)]

use std::sync::RwLock;

use concord_ledger::{Ledger, LedgerError};
use concord_signer::SigningCapability;
use concord_types::{ActionPayload, MemberId, Policy, Role};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Authorization denied: {reason} (requires {required_role})")]
    AuthorizationDenied { reason: String, required_role: Role },

    #[error("Policy version conflict: expected {expected}, got {got}")]
    VersionConflict { expected: u32, got: u32 },

    #[error("Policy integrity check failed for version {version}")]
    IntegrityFailed { version: u32 },

    #[error("Ledger failure: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Lock poisoned")]
    LockError,
}

/// Resolves the active policy against a ledger, caching the result.
///
/// The cache carries the policy's own content hash; every read re-checks it
/// and a mismatch (in-memory tampering, bit corruption) discards the cache
/// and re-derives from the ledger.
#[derive(Default)]
pub struct PolicyResolver {
    cache: RwLock<Option<Policy>>,
}

impl PolicyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active policy: cached if intact, otherwise re-derived from the
    /// ledger, otherwise the baseline.
    pub fn resolve(&self, ledger: &Ledger) -> Result<Policy, PolicyError> {
        {
            let cache = self.cache.read().map_err(|_| PolicyError::LockError)?;
            if let Some(policy) = cache.as_ref() {
                if policy.verify_integrity() {
                    return Ok(policy.clone());
                }
                warn!(
                    version = policy.version,
                    "Cached policy failed integrity check, re-deriving from ledger"
                );
            }
        }

        let resolved = ledger.active_policy()?.unwrap_or_else(Policy::baseline);
        debug!(version = resolved.version, "Policy resolved from ledger");

        let mut cache = self.cache.write().map_err(|_| PolicyError::LockError)?;
        *cache = Some(resolved.clone());
        Ok(resolved)
    }

    /// Submit a policy update through governance: Admin only, and the new
    /// version must be exactly one past the current one. On acceptance the
    /// update is appended to the ledger and becomes the cached active
    /// policy; on rejection the ledger is untouched.
    pub fn apply_update(
        &self,
        ledger: &Ledger,
        new_policy: Policy,
        submitter: &MemberId,
        submitter_role: Role,
        signer: &dyn SigningCapability,
    ) -> Result<Policy, PolicyError> {
        if submitter_role != Role::Admin {
            return Err(PolicyError::AuthorizationDenied {
                reason: format!("policy updates require admin, submitter is {submitter_role}"),
                required_role: Role::Admin,
            });
        }

        let current = self.resolve(ledger)?;
        let expected = current.version + 1;
        if new_policy.version != expected {
            return Err(PolicyError::VersionConflict {
                expected,
                got: new_policy.version,
            });
        }

        let sealed = new_policy.sealed();
        if !sealed.verify_integrity() {
            return Err(PolicyError::IntegrityFailed {
                version: sealed.version,
            });
        }

        ledger.append(
            ActionPayload::PolicyUpdate {
                policy: sealed.clone(),
            },
            submitter.clone(),
            signer,
        )?;
        info!(version = sealed.version, "Policy update accepted");

        let mut cache = self.cache.write().map_err(|_| PolicyError::LockError)?;
        *cache = Some(sealed.clone());
        Ok(sealed)
    }

    #[cfg(test)]
    fn inject_cache(&self, policy: Policy) {
        *self.cache.write().unwrap() = Some(policy);
    }
}
