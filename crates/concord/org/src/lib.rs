//! Concord Org - multiple teams joined by verified trust bridges.
//!
//! The organization never reaches inside a team: it verifies root identities
//! when a bridge is established, scales delegated action costs by bridge
//! trust, and leaves each team's own pipeline to record its side of every
//! delegation.
#![deny(unsafe_code)]

mod bridge;

pub use bridge::{
    bridge_id, Bridge, BridgeState, DelegationEntry, BREAK_THRESHOLD, ESTABLISH_THRESHOLD,
};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use concord_team::{Team, TeamError};
use concord_types::{ActionName, ActionPayload, Clock, TeamId};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Scaled delegation cost never exceeds 10x the base: the trust divisor is
/// floored here.
pub const MIN_TRUST_DIVISOR: f64 = 0.1;

#[derive(Debug, Error)]
pub enum OrgError {
    #[error("Unknown team: {name}")]
    UnknownTeam { name: String },

    #[error("Team already registered: {name}")]
    TeamExists { name: String },

    #[error("No bridge between '{a}' and '{b}'")]
    UnknownBridge { a: String, b: String },

    #[error("Bridge {bridge_id} already exists")]
    BridgeExists { bridge_id: String },

    #[error("Bridge {bridge_id} is {state}, delegation refused")]
    BridgeUnhealthy { bridge_id: String, state: BridgeState },

    #[error("Cannot delegate '{action}': {reason}")]
    DelegationNotAllowed { action: ActionName, reason: String },

    #[error("Root identity verification failed for team '{team}'")]
    VerificationFailed { team: String },

    #[error("Team failure: {0}")]
    Team(#[from] TeamError),

    #[error("Bridge state I/O failure: {0}")]
    Io(String),

    #[error("Bridge state serialization failure: {0}")]
    Serialization(String),

    #[error("Lock poisoned")]
    LockError,
}

impl From<std::io::Error> for OrgError {
    fn from(error: std::io::Error) -> Self {
        OrgError::Io(error.to_string())
    }
}

/// Completed cross-team delegation, as returned to the caller. Both teams'
/// ledgers carry the matching `CrossTeamDelegation` record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub bridge_id: String,
    pub source_team: TeamId,
    pub target_team: TeamId,
    pub actor: String,
    pub action_name: ActionName,
    pub base_cost: f64,
    pub scaled_cost: f64,
    pub effective_trust: f64,
}

#[derive(Clone, Debug)]
pub struct BridgeSummary {
    pub bridge_id: String,
    pub teams: (TeamId, TeamId),
    pub state: BridgeState,
    pub effective_trust: f64,
    pub total_successes: u64,
    pub total_failures: u64,
}

#[derive(Clone, Debug)]
pub struct OrgInfo {
    pub name: String,
    pub teams: Vec<TeamId>,
    pub bridges: Vec<BridgeSummary>,
}

/// Persisted organization index: enough to name every team and bridge on
/// reload. Teams re-register themselves; bridges reload from their own files.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct OrgIndex {
    name: String,
    teams: Vec<TeamId>,
    bridges: Vec<String>,
}

pub struct Organization {
    name: String,
    clock: Arc<dyn Clock>,
    teams: RwLock<HashMap<TeamId, Arc<Team>>>,
    bridges: RwLock<HashMap<String, Bridge>>,
    state_dir: Option<PathBuf>,
}

impl Organization {
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            clock,
            teams: RwLock::new(HashMap::new()),
            bridges: RwLock::new(HashMap::new()),
            state_dir: None,
        }
    }

    /// Organization with persisted bridge state. Bridges are reloaded from
    /// `<dir>/bridges/*.json`; teams re-register themselves on start since
    /// each owns its own state directory.
    pub fn with_state_dir(
        name: impl Into<String>,
        clock: Arc<dyn Clock>,
        dir: impl Into<PathBuf>,
    ) -> Result<Self, OrgError> {
        let dir = dir.into();
        let mut bridges = HashMap::new();
        let bridge_dir = dir.join("bridges");
        if bridge_dir.is_dir() {
            for entry in std::fs::read_dir(&bridge_dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let raw = std::fs::read_to_string(&path)?;
                let bridge: Bridge = serde_json::from_str(&raw)
                    .map_err(|error| OrgError::Serialization(error.to_string()))?;
                bridges.insert(bridge.bridge_id.clone(), bridge);
            }
            if !bridges.is_empty() {
                info!(bridges = bridges.len(), "Bridges reloaded");
            }
        }
        Ok(Self {
            name: name.into(),
            clock,
            teams: RwLock::new(HashMap::new()),
            bridges: RwLock::new(bridges),
            state_dir: Some(dir),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_team(&self, team: Arc<Team>) -> Result<(), OrgError> {
        {
            let mut teams = self.teams.write().map_err(|_| OrgError::LockError)?;
            let id = team.id().clone();
            if teams.contains_key(&id) {
                return Err(OrgError::TeamExists { name: id.0 });
            }
            debug!(team = %id, org = %self.name, "Team registered");
            teams.insert(id, team);
        }
        self.persist_index()
    }

    pub fn team(&self, name: &str) -> Result<Arc<Team>, OrgError> {
        let teams = self.teams.read().map_err(|_| OrgError::LockError)?;
        teams
            .get(&TeamId::new(name))
            .cloned()
            .ok_or_else(|| OrgError::UnknownTeam {
                name: name.to_string(),
            })
    }

    pub fn info(&self) -> Result<OrgInfo, OrgError> {
        let teams = self.teams.read().map_err(|_| OrgError::LockError)?;
        let bridges = self.bridges.read().map_err(|_| OrgError::LockError)?;
        let mut team_ids: Vec<TeamId> = teams.keys().cloned().collect();
        team_ids.sort();
        let mut summaries: Vec<BridgeSummary> = bridges
            .values()
            .map(|b| BridgeSummary {
                bridge_id: b.bridge_id.clone(),
                teams: (b.team_a.clone(), b.team_b.clone()),
                state: b.state,
                effective_trust: b.effective_trust(),
                total_successes: b.total_successes,
                total_failures: b.total_failures,
            })
            .collect();
        summaries.sort_by(|x, y| x.bridge_id.cmp(&y.bridge_id));
        Ok(OrgInfo {
            name: self.name.clone(),
            teams: team_ids,
            bridges: summaries,
        })
    }

    pub fn bridge_between(&self, a: &str, b: &str) -> Result<Bridge, OrgError> {
        let bridges = self.bridges.read().map_err(|_| OrgError::LockError)?;
        bridges
            .get(&bridge_id(&TeamId::new(a), &TeamId::new(b)))
            .cloned()
            .ok_or_else(|| OrgError::UnknownBridge {
                a: a.to_string(),
                b: b.to_string(),
            })
    }

    /// Establish a bridge by mutual root verification: each team signs a
    /// shared nonce with its root identity and the signature is checked
    /// against its published root key. A verified bridge carries traffic at
    /// `Active` trust.
    pub fn establish_bridge(&self, a: &str, b: &str) -> Result<Bridge, OrgError> {
        let team_a = self.team(a)?;
        let team_b = self.team(b)?;
        let id = bridge_id(team_a.id(), team_b.id());

        {
            let bridges = self.bridges.read().map_err(|_| OrgError::LockError)?;
            if bridges.contains_key(&id) {
                return Err(OrgError::BridgeExists { bridge_id: id });
            }
        }

        let nonce = self.challenge_nonce(&id);
        verify_root(&team_a, &nonce)?;
        verify_root(&team_b, &nonce)?;

        let mut bridge = Bridge::new(team_a.id().clone(), team_b.id().clone(), self.clock.now());
        bridge.mark_verified(self.clock.now());
        team_a.record_event(ActionPayload::BridgeEstablished {
            bridge_id: id.clone(),
            peer_team: team_b.id().clone(),
        })?;
        team_b.record_event(ActionPayload::BridgeEstablished {
            bridge_id: id.clone(),
            peer_team: team_a.id().clone(),
        })?;
        info!(bridge = %id, a = %team_a.id(), b = %team_b.id(), "Bridge established");

        let mut bridges = self.bridges.write().map_err(|_| OrgError::LockError)?;
        self.persist_bridge(&bridge)?;
        bridges.insert(id, bridge.clone());
        drop(bridges);
        self.persist_index()?;
        Ok(bridge)
    }

    /// Re-run mutual verification on an existing bridge. The only path that
    /// restarts a broken bridge.
    pub fn reverify_bridge(&self, a: &str, b: &str) -> Result<Bridge, OrgError> {
        let team_a = self.team(a)?;
        let team_b = self.team(b)?;
        let id = bridge_id(team_a.id(), team_b.id());

        let nonce = self.challenge_nonce(&id);
        verify_root(&team_a, &nonce)?;
        verify_root(&team_b, &nonce)?;

        let mut bridges = self.bridges.write().map_err(|_| OrgError::LockError)?;
        let bridge = bridges
            .get_mut(&id)
            .ok_or_else(|| OrgError::UnknownBridge {
                a: a.to_string(),
                b: b.to_string(),
            })?;
        bridge.restart(self.clock.now());
        self.persist_bridge(bridge)?;
        Ok(bridge.clone())
    }

    /// Cap the trust one team extends over its bridge to a peer.
    pub fn set_trust_ceiling(&self, team: &str, peer: &str, ceiling: f64) -> Result<(), OrgError> {
        let mut bridges = self.bridges.write().map_err(|_| OrgError::LockError)?;
        let bridge = bridges
            .get_mut(&bridge_id(&TeamId::new(team), &TeamId::new(peer)))
            .ok_or_else(|| OrgError::UnknownBridge {
                a: team.to_string(),
                b: peer.to_string(),
            })?;
        bridge.set_trust_ceiling(TeamId::new(team), ceiling);
        self.persist_bridge(bridge)?;
        Ok(())
    }

    /// External health signal (bridge heartbeat) feeding the same state
    /// machine as delegation outcomes.
    pub fn record_bridge_outcome(&self, a: &str, b: &str, success: bool) -> Result<Bridge, OrgError> {
        let mut bridges = self.bridges.write().map_err(|_| OrgError::LockError)?;
        let bridge = bridges
            .get_mut(&bridge_id(&TeamId::new(a), &TeamId::new(b)))
            .ok_or_else(|| OrgError::UnknownBridge {
                a: a.to_string(),
                b: b.to_string(),
            })?;
        if success {
            bridge.record_success(self.clock.now());
        } else {
            bridge.record_failure(self.clock.now());
        }
        self.persist_bridge(bridge)?;
        Ok(bridge.clone())
    }

    /// Delegate an action from a member of `source` to execute under
    /// `target`'s pipeline, with the target's admin as executing proxy. The
    /// cost is the target's price scaled up by distrust and is debited from
    /// the source team's pool; a rejection before that debit leaves both
    /// teams untouched.
    pub fn delegate(
        &self,
        source: &str,
        target: &str,
        actor: &str,
        action: ActionName,
    ) -> Result<DelegationRecord, OrgError> {
        let source_team = self.team(source)?;
        let target_team = self.team(target)?;
        let id = bridge_id(source_team.id(), target_team.id());

        let mut bridges = self.bridges.write().map_err(|_| OrgError::LockError)?;
        let bridge = bridges.get_mut(&id).ok_or_else(|| OrgError::UnknownBridge {
            a: source.to_string(),
            b: target.to_string(),
        })?;
        // Delegation rides only on earned trust: Active or Established.
        if !bridge.accepts_delegation() {
            return Err(OrgError::BridgeUnhealthy {
                bridge_id: id,
                state: bridge.state,
            });
        }

        // The actor must be a real source-team identity.
        source_team.member_role(actor)?;

        // Target-side eligibility: the target's admin acts as executing
        // proxy, so role gates pass, but a quorum cannot be assembled across
        // a bridge.
        let target_policy = target_team.resolve_policy()?;
        if target_policy.requires_multi_sig(&action).is_some() {
            return Err(OrgError::DelegationNotAllowed {
                action,
                reason: format!("requires a multi-sig quorum under '{target}' policy"),
            });
        }

        let effective_trust = bridge.effective_trust();
        let base_cost = target_policy.get_cost(&action);
        let scaled_cost = base_cost / effective_trust.max(MIN_TRUST_DIVISOR);

        let payload = ActionPayload::CrossTeamDelegation {
            bridge_id: id.clone(),
            source_team: source_team.id().clone(),
            target_team: target_team.id().clone(),
            actor: actor.to_string(),
            action_name: action.clone(),
            scaled_cost,
            effective_trust,
        };

        // An unaffordable delegation fails here with no target-side record
        // and no bridge penalty; only then does the target execute.
        source_team.charge_delegation(payload.clone(), scaled_cost)?;
        target_team.execute_delegated(action.clone(), base_cost, payload)?;

        bridge.delegations.push(DelegationEntry {
            source_team: source_team.id().clone(),
            actor: actor.to_string(),
            action_name: action.clone(),
            scaled_cost,
            effective_trust,
            timestamp: self.clock.now(),
        });
        bridge.record_success(self.clock.now());
        self.persist_bridge(bridge)?;
        debug!(
            bridge = %id,
            source,
            target,
            actor,
            action = %action,
            scaled_cost,
            effective_trust,
            "Delegation completed"
        );
        Ok(DelegationRecord {
            bridge_id: id,
            source_team: source_team.id().clone(),
            target_team: target_team.id().clone(),
            actor: actor.to_string(),
            action_name: action,
            base_cost,
            scaled_cost,
            effective_trust,
        })
    }

    fn challenge_nonce(&self, bridge_id: &str) -> Vec<u8> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"concord-bridge-nonce-v1:");
        hasher.update(bridge_id.as_bytes());
        hasher.update(self.clock.now().to_rfc3339().as_bytes());
        hasher.finalize().as_bytes().to_vec()
    }

    fn persist_bridge(&self, bridge: &Bridge) -> Result<(), OrgError> {
        let Some(dir) = &self.state_dir else {
            return Ok(());
        };
        let bridge_dir = dir.join("bridges");
        std::fs::create_dir_all(&bridge_dir)?;
        let encoded = serde_json::to_string_pretty(bridge)
            .map_err(|error| OrgError::Serialization(error.to_string()))?;
        std::fs::write(bridge_dir.join(format!("{}.json", bridge.bridge_id)), encoded)?;
        Ok(())
    }

    fn persist_index(&self) -> Result<(), OrgError> {
        let Some(dir) = &self.state_dir else {
            return Ok(());
        };
        let mut team_ids: Vec<TeamId> = {
            let teams = self.teams.read().map_err(|_| OrgError::LockError)?;
            teams.keys().cloned().collect()
        };
        team_ids.sort();
        let mut bridge_ids: Vec<String> = {
            let bridges = self.bridges.read().map_err(|_| OrgError::LockError)?;
            bridges.keys().cloned().collect()
        };
        bridge_ids.sort();
        let index = OrgIndex {
            name: self.name.clone(),
            teams: team_ids,
            bridges: bridge_ids,
        };
        std::fs::create_dir_all(dir)?;
        let encoded = serde_json::to_string_pretty(&index)
            .map_err(|error| OrgError::Serialization(error.to_string()))?;
        std::fs::write(dir.join("org.json"), encoded)?;
        Ok(())
    }
}

/// Check that a team's root identity really holds its published key.
fn verify_root(team: &Team, nonce: &[u8]) -> Result<(), OrgError> {
    let fail = || OrgError::VerificationFailed {
        team: team.id().to_string(),
    };
    let signature_bytes = team.sign_nonce(nonce)?;
    let key_bytes: [u8; 32] = team
        .root_public_key()
        .as_slice()
        .try_into()
        .map_err(|_| fail())?;
    let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| fail())?;
    let signature = Signature::from_slice(&signature_bytes).map_err(|_| fail())?;
    key.verify(nonce, &signature).map_err(|_| {
        warn!(team = %team.id(), "Root nonce signature rejected");
        fail()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use concord_ledger::LedgerQuery;
    use concord_signer::SoftwareSigner;
    use concord_team::{SigningHandle, TeamConfig};
    use concord_types::{ActionDecision, ManualClock};

    fn handle(label: &str) -> SigningHandle {
        SigningHandle::Software(Arc::new(SoftwareSigner::from_seed_label(label)))
    }

    fn team(name: &str, clock: Arc<ManualClock>, atp: f64) -> Arc<Team> {
        let mut config = TeamConfig::new(name);
        config.atp_initial = atp;
        config.atp_max = atp;
        Arc::new(
            Team::create(
                config,
                clock,
                handle(&format!("{name}-root")),
                "admin-root",
                handle(&format!("{name}-admin")),
            )
            .unwrap(),
        )
    }

    fn two_team_org(clock: Arc<ManualClock>) -> Organization {
        let org = Organization::new("concord-labs", clock.clone());
        org.add_team(team("alpha", clock.clone(), 1000.0)).unwrap();
        org.add_team(team("beta", clock, 1000.0)).unwrap();
        org.establish_bridge("alpha", "beta").unwrap();
        org
    }

    fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc::now()))
    }

    #[test]
    fn establish_verifies_roots_and_activates() {
        let clock = manual_clock();
        let org = two_team_org(clock);
        let bridge = org.bridge_between("alpha", "beta").unwrap();
        assert_eq!(bridge.state, BridgeState::Active);
        assert_eq!(bridge.bridge_id, bridge_id(&TeamId::new("beta"), &TeamId::new("alpha")));
    }

    #[test]
    fn duplicate_bridge_is_rejected() {
        let clock = manual_clock();
        let org = two_team_org(clock);
        let err = org.establish_bridge("beta", "alpha").unwrap_err();
        assert!(matches!(err, OrgError::BridgeExists { .. }));
    }

    #[test]
    fn delegation_scales_cost_by_trust_and_debits_source() {
        let clock = manual_clock();
        let org = two_team_org(clock);

        // Active bridge: multiplier 0.8, so review_pr (5.0 under beta's
        // baseline policy) costs 6.25 from alpha's pool.
        let record = org
            .delegate("alpha", "beta", "admin-root", ActionName::ReviewPr)
            .unwrap();
        assert_eq!(record.base_cost, 5.0);
        assert!((record.effective_trust - 0.8).abs() < 1e-9);
        assert!((record.scaled_cost - 6.25).abs() < 1e-9);

        let source_pool = org.team("alpha").unwrap().pool_snapshot().unwrap();
        assert!((source_pool.balance - 993.75).abs() < 1e-9);
        // The target pool is never debited for incoming delegations.
        let target_pool = org.team("beta").unwrap().pool_snapshot().unwrap();
        assert_eq!(target_pool.balance, 1000.0);

        // The bridge retains the delegation and counts it as a success.
        let bridge = org.bridge_between("alpha", "beta").unwrap();
        assert_eq!(bridge.consecutive_successes, 1);
        assert_eq!(bridge.delegations.len(), 1);
        assert_eq!(bridge.delegations[0].actor, "admin-root");
        assert_eq!(bridge.delegations[0].source_team, TeamId::new("alpha"));
    }

    #[test]
    fn both_ledgers_record_the_delegation() {
        let clock = manual_clock();
        let org = two_team_org(clock);
        org.delegate("alpha", "beta", "admin-root", ActionName::ReviewPr)
            .unwrap();

        for name in ["alpha", "beta"] {
            let team = org.team(name).unwrap();
            team.force_flush().unwrap();
            let entries = team
                .query_ledger(&LedgerQuery {
                    kind: Some("cross_team_delegation".to_string()),
                    ..Default::default()
                })
                .unwrap();
            assert_eq!(entries.len(), 1, "{name} ledger must carry the delegation");
            assert!(team.verify_ledger().unwrap().valid);
        }
    }

    #[test]
    fn target_admin_executes_as_proxy() {
        let clock = manual_clock();
        let org = two_team_org(clock);
        let beta = org.team("beta").unwrap();
        let (trust_before, _) = beta.member_reputation("admin-root").unwrap();

        org.delegate("alpha", "beta", "admin-root", ActionName::ReviewPr)
            .unwrap();
        beta.force_flush().unwrap();

        // The target ledger carries a proxy-approved action with no local
        // debit, and the proxy's reputation moved.
        let actions = beta
            .query_ledger(&LedgerQuery {
                kind: Some("action".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(actions.len(), 1);
        match &actions[0].action {
            ActionPayload::Action {
                actor,
                decision,
                atp_cost,
                ..
            } => {
                assert_eq!(actor, "admin-root");
                assert_eq!(*decision, ActionDecision::Approved);
                assert_eq!(*atp_cost, 0.0);
            }
            other => panic!("expected action record, got {other:?}"),
        }
        let (trust_after, _) = beta.member_reputation("admin-root").unwrap();
        assert!(trust_after.composite() > trust_before.composite());
    }

    #[test]
    fn established_bridge_approaches_base_cost() {
        let clock = manual_clock();
        let org = two_team_org(clock);
        for _ in 0..ESTABLISH_THRESHOLD {
            org.record_bridge_outcome("alpha", "beta", true).unwrap();
        }
        let record = org
            .delegate("alpha", "beta", "admin-root", ActionName::ReviewPr)
            .unwrap();
        assert!((record.effective_trust - 0.95).abs() < 1e-9);
        assert!((record.scaled_cost - 5.0 / 0.95).abs() < 1e-9);
    }

    #[test]
    fn broken_bridge_refuses_delegation() {
        let clock = manual_clock();
        let org = two_team_org(clock);
        for _ in 0..BREAK_THRESHOLD {
            org.record_bridge_outcome("alpha", "beta", false).unwrap();
        }
        let err = org
            .delegate("alpha", "beta", "admin-root", ActionName::ReviewPr)
            .unwrap_err();
        assert!(matches!(
            err,
            OrgError::BridgeUnhealthy {
                state: BridgeState::Broken,
                ..
            }
        ));
    }

    #[test]
    fn reverify_restarts_a_broken_bridge() {
        let clock = manual_clock();
        let org = two_team_org(clock);
        for _ in 0..BREAK_THRESHOLD {
            org.record_bridge_outcome("alpha", "beta", false).unwrap();
        }
        let bridge = org.reverify_bridge("alpha", "beta").unwrap();
        assert_eq!(bridge.state, BridgeState::New);

        // Restarted trust is not yet earned back: delegation stays refused
        // until a health signal promotes the bridge.
        let err = org
            .delegate("alpha", "beta", "admin-root", ActionName::ReviewPr)
            .unwrap_err();
        assert!(matches!(
            err,
            OrgError::BridgeUnhealthy {
                state: BridgeState::New,
                ..
            }
        ));
        org.record_bridge_outcome("alpha", "beta", true).unwrap();
        assert!(org
            .delegate("alpha", "beta", "admin-root", ActionName::ReviewPr)
            .is_ok());
    }

    #[test]
    fn unaffordable_delegation_leaves_everything_untouched() {
        let clock = manual_clock();
        let org = Organization::new("concord-labs", clock.clone());
        // 5 ATP cannot cover review_pr scaled to 6.25 at Active trust.
        org.add_team(team("alpha", clock.clone(), 5.0)).unwrap();
        org.add_team(team("beta", clock, 1000.0)).unwrap();
        org.establish_bridge("alpha", "beta").unwrap();

        let err = org
            .delegate("alpha", "beta", "admin-root", ActionName::ReviewPr)
            .unwrap_err();
        assert!(matches!(
            err,
            OrgError::Team(TeamError::InsufficientResource { .. })
        ));

        let bridge = org.bridge_between("alpha", "beta").unwrap();
        assert_eq!(bridge.total_successes, 0);
        assert_eq!(bridge.total_failures, 0);

        let beta = org.team("beta").unwrap();
        beta.force_flush().unwrap();
        let entries = beta
            .query_ledger(&LedgerQuery {
                kind: Some("cross_team_delegation".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn quorum_gated_actions_never_cross_a_bridge() {
        let clock = manual_clock();
        let org = two_team_org(clock);

        // Admin-only actions delegate fine: the target's admin executes as
        // proxy. add_member defaults to 10.0, scaled by 0.8 trust.
        let record = org
            .delegate("alpha", "beta", "admin-root", ActionName::AddMember)
            .unwrap();
        assert!((record.scaled_cost - 12.5).abs() < 1e-9);

        // Multi-sig actions cannot assemble a quorum remotely.
        let err = org
            .delegate("alpha", "beta", "admin-root", ActionName::RotateCredentials)
            .unwrap_err();
        assert!(matches!(err, OrgError::DelegationNotAllowed { .. }));

        // A policy refusal is not a bridge fault.
        let bridge = org.bridge_between("alpha", "beta").unwrap();
        assert_eq!(bridge.state, BridgeState::Active);
        assert_eq!(bridge.total_failures, 0);
    }

    #[test]
    fn unknown_actor_cannot_delegate() {
        let clock = manual_clock();
        let org = two_team_org(clock);
        let err = org
            .delegate("alpha", "beta", "ghost", ActionName::ReviewPr)
            .unwrap_err();
        assert!(matches!(err, OrgError::Team(TeamError::UnknownMember { .. })));
    }

    #[test]
    fn trust_ceiling_limits_delegation() {
        let clock = manual_clock();
        let org = two_team_org(clock);
        org.set_trust_ceiling("beta", "alpha", 0.4).unwrap();

        let record = org
            .delegate("alpha", "beta", "admin-root", ActionName::ReviewPr)
            .unwrap();
        // 0.8 multiplier * 0.4 ceiling = 0.32 effective trust.
        assert!((record.effective_trust - 0.32).abs() < 1e-9);
        assert!((record.scaled_cost - 15.625).abs() < 1e-9);
    }

    #[test]
    fn bridges_persist_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let clock = manual_clock();

        {
            let org =
                Organization::with_state_dir("concord-labs", clock.clone(), dir.path()).unwrap();
            org.add_team(team("alpha", clock.clone(), 1000.0)).unwrap();
            org.add_team(team("beta", clock.clone(), 1000.0)).unwrap();
            org.establish_bridge("alpha", "beta").unwrap();
            for _ in 0..3 {
                org.record_bridge_outcome("alpha", "beta", true).unwrap();
            }
        }

        let reopened =
            Organization::with_state_dir("concord-labs", clock, dir.path()).unwrap();
        let bridge = reopened.bridge_between("alpha", "beta").unwrap();
        assert_eq!(bridge.state, BridgeState::Active);
        assert_eq!(bridge.consecutive_successes, 3);

        // The index file names every team and bridge.
        let raw = std::fs::read_to_string(dir.path().join("org.json")).unwrap();
        let index: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(index["name"], "concord-labs");
        assert_eq!(index["teams"].as_array().unwrap().len(), 2);
        assert_eq!(
            index["bridges"][0],
            bridge_id(&TeamId::new("alpha"), &TeamId::new("beta"))
        );
    }

    #[test]
    fn info_reports_teams_and_bridges() {
        let clock = manual_clock();
        let org = two_team_org(clock);
        let info = org.info().unwrap();
        assert_eq!(info.name, "concord-labs");
        assert_eq!(info.teams, vec![TeamId::new("alpha"), TeamId::new("beta")]);
        assert_eq!(info.bridges.len(), 1);
        assert_eq!(info.bridges[0].state, BridgeState::Active);
    }
}
