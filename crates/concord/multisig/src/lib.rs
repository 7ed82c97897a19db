//! Concord MultiSig - pending quorum requests for critical actions.
//!
//! Policy declares which actions need M-of-N approval; this crate holds the
//! live requests, enforces the approval rules (no duplicates, role
//! eligibility, TTL), and checkpoints the buffer to disk. Resolution events
//! are the caller's to ledger.
#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use concord_types::{ActionName, Clock, MultiSigRule, Role};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default request lifetime.
pub const DEFAULT_TTL_SECONDS: i64 = 3600;

#[derive(Debug, Error)]
pub enum MultiSigError {
    #[error("Duplicate approval by '{approver}'")]
    Duplicate { approver: String },

    #[error("Role {role} is not eligible to approve '{action}'")]
    IneligibleRole { role: Role, action: ActionName },

    #[error("Request {request_id} expired before execution")]
    Expired { request_id: String },

    #[error("Request {request_id} already executed")]
    AlreadyExecuted { request_id: String },

    #[error("A request for ({actor}, {action}) is already pending")]
    AlreadyPending { actor: String, action: ActionName },

    #[error("Quorum not met: {approvals}/{required}")]
    QuorumNotMet { approvals: u32, required: u32 },

    #[error("No such request: {request_id}")]
    NotFound { request_id: String },

    #[error("Snapshot I/O failure: {0}")]
    Io(String),

    #[error("Snapshot serialization failure: {0}")]
    Serialization(String),

    #[error("Lock poisoned")]
    LockError,
}

impl From<std::io::Error> for MultiSigError {
    fn from(error: std::io::Error) -> Self {
        MultiSigError::Io(error.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub approver: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
}

/// One pending quorum request. Mutated only by adding approvals; terminated
/// by execution or expiry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultiSigRequest {
    pub request_id: String,
    pub actor: String,
    pub action_name: ActionName,
    pub required: u32,
    pub eligible_roles: Vec<Role>,
    pub approvals: Vec<Approval>,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: i64,
    pub executed: bool,
}

impl MultiSigRequest {
    pub fn approval_count(&self) -> u32 {
        self.approvals.len() as u32
    }

    pub fn is_quorum_met(&self) -> bool {
        self.approval_count() >= self.required
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.ttl_seconds)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    /// A request still occupying its `(actor, action)` slot.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        !self.executed && !self.is_expired(now)
    }

    fn add_approval(
        &mut self,
        approver: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<(), MultiSigError> {
        if self.executed {
            return Err(MultiSigError::AlreadyExecuted {
                request_id: self.request_id.clone(),
            });
        }
        if self.is_expired(now) {
            return Err(MultiSigError::Expired {
                request_id: self.request_id.clone(),
            });
        }
        if self.approvals.iter().any(|a| a.approver == approver) {
            return Err(MultiSigError::Duplicate {
                approver: approver.to_string(),
            });
        }
        if !self.eligible_roles.contains(&role) {
            return Err(MultiSigError::IneligibleRole {
                role,
                action: self.action_name.clone(),
            });
        }
        self.approvals.push(Approval {
            approver: approver.to_string(),
            role,
            timestamp: now,
        });
        Ok(())
    }
}

/// Live request buffer for one team, checkpointed to a snapshot file that is
/// rewritten (never appended) on every state change and reloaded on start,
/// dropping anything already expired.
pub struct MultiSigRegistry {
    clock: Arc<dyn Clock>,
    snapshot_path: Option<PathBuf>,
    requests: RwLock<Vec<MultiSigRequest>>,
}

impl MultiSigRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            snapshot_path: None,
            requests: RwLock::new(Vec::new()),
        }
    }

    /// Registry backed by a snapshot file. Expired requests in an existing
    /// snapshot are dropped on load.
    pub fn with_snapshot(
        clock: Arc<dyn Clock>,
        path: impl AsRef<Path>,
    ) -> Result<Self, MultiSigError> {
        let path = path.as_ref().to_path_buf();
        let mut requests = Vec::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let loaded: Vec<MultiSigRequest> = serde_json::from_str(&raw)
                .map_err(|error| MultiSigError::Serialization(error.to_string()))?;
            let now = clock.now();
            let before = loaded.len();
            requests = loaded.into_iter().filter(|r| r.is_open(now)).collect();
            if requests.len() < before {
                info!(
                    dropped = before - requests.len(),
                    live = requests.len(),
                    "Dropped expired multi-sig requests on load"
                );
            }
        }
        Ok(Self {
            clock,
            snapshot_path: Some(path),
            requests: RwLock::new(requests),
        })
    }

    /// Open a request. The requester is recorded as the first approver when
    /// their role is eligible (self-approval is an intentional, documented
    /// rule, preserved from the reference behavior). At most one open
    /// request may exist per `(actor, action)` pair.
    pub fn create_request(
        &self,
        actor: &str,
        actor_role: Role,
        action: ActionName,
        rule: &MultiSigRule,
        ttl_seconds: i64,
    ) -> Result<MultiSigRequest, MultiSigError> {
        let now = self.clock.now();
        let mut requests = self.requests.write().map_err(|_| MultiSigError::LockError)?;

        if requests
            .iter()
            .any(|r| r.actor == actor && r.action_name == action && r.is_open(now))
        {
            return Err(MultiSigError::AlreadyPending {
                actor: actor.to_string(),
                action,
            });
        }

        let mut request = MultiSigRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            actor: actor.to_string(),
            action_name: action,
            required: rule.required,
            eligible_roles: rule.eligible_roles.clone(),
            approvals: Vec::new(),
            created_at: now,
            ttl_seconds,
            executed: false,
        };
        if request.eligible_roles.contains(&actor_role) {
            request.approvals.push(Approval {
                approver: actor.to_string(),
                role: actor_role,
                timestamp: now,
            });
        }

        debug!(
            request_id = %request.request_id,
            actor,
            action = %request.action_name,
            required = request.required,
            approvals = request.approval_count(),
            "Multi-sig request opened"
        );
        requests.push(request.clone());
        self.persist(&requests)?;
        Ok(request)
    }

    /// Record one approval. Duplicates, ineligible roles, and approvals
    /// past the TTL are rejected without mutating the request.
    pub fn approve(
        &self,
        request_id: &str,
        approver: &str,
        role: Role,
    ) -> Result<MultiSigRequest, MultiSigError> {
        let now = self.clock.now();
        let mut requests = self.requests.write().map_err(|_| MultiSigError::LockError)?;
        let request = requests
            .iter_mut()
            .find(|r| r.request_id == request_id)
            .ok_or_else(|| MultiSigError::NotFound {
                request_id: request_id.to_string(),
            })?;

        request.add_approval(approver, role, now)?;
        debug!(
            request_id,
            approver,
            approvals = request.approval_count(),
            required = request.required,
            "Multi-sig approval recorded"
        );
        let snapshot = request.clone();
        self.persist(&requests)?;
        Ok(snapshot)
    }

    /// Mark a request executed. Requires a met quorum and an unexpired
    /// request; a quorum reached after expiry never executes.
    pub fn mark_executed(&self, request_id: &str) -> Result<MultiSigRequest, MultiSigError> {
        let now = self.clock.now();
        let mut requests = self.requests.write().map_err(|_| MultiSigError::LockError)?;
        let request = requests
            .iter_mut()
            .find(|r| r.request_id == request_id)
            .ok_or_else(|| MultiSigError::NotFound {
                request_id: request_id.to_string(),
            })?;

        if request.executed {
            return Err(MultiSigError::AlreadyExecuted {
                request_id: request_id.to_string(),
            });
        }
        if request.is_expired(now) {
            warn!(request_id, "Multi-sig request expired before execution");
            return Err(MultiSigError::Expired {
                request_id: request_id.to_string(),
            });
        }
        if !request.is_quorum_met() {
            return Err(MultiSigError::QuorumNotMet {
                approvals: request.approval_count(),
                required: request.required,
            });
        }

        request.executed = true;
        info!(
            request_id,
            action = %request.action_name,
            approvals = request.approval_count(),
            "Multi-sig request executed"
        );
        let snapshot = request.clone();
        self.persist(&requests)?;
        Ok(snapshot)
    }

    pub fn find_pending(
        &self,
        actor: &str,
        action: &ActionName,
    ) -> Result<Option<MultiSigRequest>, MultiSigError> {
        let now = self.clock.now();
        let requests = self.requests.read().map_err(|_| MultiSigError::LockError)?;
        Ok(requests
            .iter()
            .find(|r| r.actor == actor && &r.action_name == action && r.is_open(now))
            .cloned())
    }

    pub fn get(&self, request_id: &str) -> Result<Option<MultiSigRequest>, MultiSigError> {
        let requests = self.requests.read().map_err(|_| MultiSigError::LockError)?;
        Ok(requests.iter().find(|r| r.request_id == request_id).cloned())
    }

    /// Drop expired and executed requests from the live buffer, returning
    /// the expired ones so the caller can ledger their resolution.
    pub fn prune(&self) -> Result<Vec<MultiSigRequest>, MultiSigError> {
        let now = self.clock.now();
        let mut requests = self.requests.write().map_err(|_| MultiSigError::LockError)?;
        let expired: Vec<MultiSigRequest> = requests
            .iter()
            .filter(|r| !r.executed && r.is_expired(now))
            .cloned()
            .collect();
        requests.retain(|r| r.is_open(now));
        self.persist(&requests)?;
        Ok(expired)
    }

    pub fn open_count(&self) -> Result<usize, MultiSigError> {
        let now = self.clock.now();
        let requests = self.requests.read().map_err(|_| MultiSigError::LockError)?;
        Ok(requests.iter().filter(|r| r.is_open(now)).count())
    }

    /// Rewrite the snapshot with only live requests.
    fn persist(&self, requests: &[MultiSigRequest]) -> Result<(), MultiSigError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let now = self.clock.now();
        let live: Vec<&MultiSigRequest> = requests.iter().filter(|r| r.is_open(now)).collect();
        let encoded = serde_json::to_string_pretty(&live)
            .map_err(|error| MultiSigError::Serialization(error.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, encoded)?;
        Ok(())
    }
}
