//! Concord Team - orchestration of one governed group of identities.
//!
//! A team owns its ledger, resolved policy, multi-sig buffer, heartbeat, and
//! ATP pool. Every action request runs the same pipeline: birth-certificate
//! gate, role authorization (with admin delegation escape), multi-sig
//! routing, atomic ATP debit, reputation update, and heartbeat queuing.
#![deny(unsafe_code)]

mod certificate;
mod error;
mod member;
mod pool;
pub mod reputation;

pub use certificate::{initial_rights, initial_responsibilities, BirthCertificate};
pub use error::TeamError;
pub use member::{Member, SigningHandle};
pub use pool::AtpPool;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use concord_heartbeat::Heartbeat;
use concord_ledger::{Ledger, LedgerAnalytics, LedgerQuery, LedgerVerification, MemoryStorage};
use concord_multisig::{MultiSigRegistry, MultiSigRequest, DEFAULT_TTL_SECONDS};
use concord_policy::PolicyResolver;
use concord_types::{
    ActionDecision, ActionName, ActionPayload, Clock, MemberId, MetabolicState, Policy,
    ReputationRecord, Role, TeamId, TrustTensor, ValueTensor,
};
use tracing::{debug, info};

/// Construction parameters for a team.
#[derive(Clone, Debug)]
pub struct TeamConfig {
    pub name: String,
    pub atp_initial: f64,
    pub atp_max: f64,
    pub multi_sig_ttl_seconds: i64,
    /// When set, the ledger, multi-sig snapshot, and birth certificates
    /// persist under this directory; otherwise everything is in-memory.
    pub state_dir: Option<PathBuf>,
}

impl TeamConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            atp_initial: 1000.0,
            atp_max: 1000.0,
            multi_sig_ttl_seconds: DEFAULT_TTL_SECONDS,
            state_dir: None,
        }
    }
}

/// Synchronous outcome of an action request. Denials and pending quorums are
/// valid outcomes, not errors; resource exhaustion and unknown identities
/// surface as `TeamError`.
#[derive(Debug)]
pub enum ActionOutcome {
    Approved {
        action: ActionPayload,
        cost: f64,
        reputation: ReputationRecord,
    },
    Denied {
        reason: String,
        reputation: Option<ReputationRecord>,
    },
    PendingMultiSig {
        request: MultiSigRequest,
    },
}

impl ActionOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, ActionOutcome::Approved { .. })
    }
}

/// Point-in-time team summary.
#[derive(Clone, Debug)]
pub struct TeamStats {
    pub name: TeamId,
    pub members: usize,
    pub ledger_entries: usize,
    pub atp_balance: f64,
    pub atp_max: f64,
    pub atp_discharged_total: f64,
    pub policy_version: u32,
    pub metabolic_state: MetabolicState,
    pub pending_actions: usize,
    pub open_multi_sig: usize,
}

pub struct Team {
    id: TeamId,
    admin_name: String,
    root_handle: SigningHandle,
    clock: Arc<dyn Clock>,
    ledger: Ledger,
    policy: PolicyResolver,
    multisig: MultiSigRegistry,
    heartbeat: Heartbeat,
    members: RwLock<HashMap<String, Member>>,
    certificates: RwLock<HashMap<String, BirthCertificate>>,
    pool: RwLock<AtpPool>,
    state_dir: Option<PathBuf>,
    multi_sig_ttl_seconds: i64,
}

impl Team {
    /// Bootstrap a team: genesis entry, founding admin with birth
    /// certificate, full pool. The root handle signs bridge verification
    /// nonces on the team's behalf.
    pub fn create(
        config: TeamConfig,
        clock: Arc<dyn Clock>,
        root_handle: SigningHandle,
        admin_name: impl Into<String>,
        admin_handle: SigningHandle,
    ) -> Result<Self, TeamError> {
        let admin_name = admin_name.into();
        let id = TeamId::new(config.name.clone());

        let ledger = match &config.state_dir {
            Some(dir) => Ledger::open_file(dir.join("ledger.ndjson"), clock.clone())?,
            None => Ledger::new(Box::new(MemoryStorage::new()), clock.clone())?,
        };
        let multisig = match &config.state_dir {
            Some(dir) => MultiSigRegistry::with_snapshot(clock.clone(), dir.join("multi_sig.json"))?,
            None => MultiSigRegistry::new(clock.clone()),
        };
        let heartbeat = Heartbeat::new(clock.clone());

        let team = Self {
            id: id.clone(),
            admin_name: admin_name.clone(),
            root_handle,
            clock,
            ledger,
            policy: PolicyResolver::new(),
            multisig,
            heartbeat,
            members: RwLock::new(HashMap::new()),
            certificates: RwLock::new(HashMap::new()),
            pool: RwLock::new(AtpPool::new(config.atp_initial, config.atp_max)),
            state_dir: config.state_dir,
            multi_sig_ttl_seconds: config.multi_sig_ttl_seconds,
        };

        let admin = Member::new(admin_name.clone(), Role::Admin, admin_handle);
        let existing_cert = team
            .state_dir
            .as_ref()
            .map(|dir| dir.join("certs").join(format!("{admin_name}.json")))
            .filter(|path| path.exists());
        match existing_cert {
            // Reopened team: the admin's certificate was issued on first
            // bootstrap and must not be re-issued.
            Some(path) => {
                let cert = BirthCertificate::load(path)?;
                team.register(admin, cert)?;
            }
            None => {
                if team.ledger.is_empty() {
                    team.ledger.append_genesis(
                        id.0.clone(),
                        MemberId::new(format!("root:{id}")),
                        admin.member_id.clone(),
                        admin.handle.capability(),
                    )?;
                }
                team.admit(admin, &admin_name)?;
            }
        }

        let ratio = team
            .pool
            .read()
            .map_err(|_| TeamError::LockError)?
            .ratio();
        team.heartbeat.transition_for_ratio(ratio)?;
        info!(team = %team.id, admin = %admin_name, "Team created");
        Ok(team)
    }

    pub fn id(&self) -> &TeamId {
        &self.id
    }

    pub fn admin_name(&self) -> &str {
        &self.admin_name
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn state(&self) -> MetabolicState {
        self.heartbeat.state()
    }

    pub fn pool_snapshot(&self) -> Result<AtpPool, TeamError> {
        Ok(*self.pool.read().map_err(|_| TeamError::LockError)?)
    }

    pub fn member_role(&self, name: &str) -> Result<Role, TeamError> {
        let members = self.members.read().map_err(|_| TeamError::LockError)?;
        members
            .get(name)
            .map(|m| m.role)
            .ok_or_else(|| TeamError::UnknownMember {
                name: name.to_string(),
            })
    }

    pub fn member_reputation(
        &self,
        name: &str,
    ) -> Result<(TrustTensor, ValueTensor), TeamError> {
        let members = self.members.read().map_err(|_| TeamError::LockError)?;
        members
            .get(name)
            .map(|m| (m.t3, m.v3))
            .ok_or_else(|| TeamError::UnknownMember {
                name: name.to_string(),
            })
    }

    pub fn birth_certificate(&self, name: &str) -> Result<BirthCertificate, TeamError> {
        let certs = self.certificates.read().map_err(|_| TeamError::LockError)?;
        certs
            .get(name)
            .cloned()
            .ok_or_else(|| TeamError::UnknownMember {
                name: name.to_string(),
            })
    }

    pub fn resolve_policy(&self) -> Result<Policy, TeamError> {
        Ok(self.policy.resolve(&self.ledger)?)
    }

    pub fn policy_cost(&self, action: &ActionName) -> Result<f64, TeamError> {
        Ok(self.resolve_policy()?.get_cost(action))
    }

    pub fn verify_ledger(&self) -> Result<LedgerVerification, TeamError> {
        Ok(self.ledger.verify()?)
    }

    pub fn query_ledger(&self, query: &LedgerQuery) -> Result<Vec<concord_ledger::LedgerEntry>, TeamError> {
        Ok(self.ledger.query(query)?)
    }

    pub fn analytics(&self) -> Result<LedgerAnalytics, TeamError> {
        Ok(self.ledger.analytics()?)
    }

    pub fn stats(&self) -> Result<TeamStats, TeamError> {
        let pool = self.pool_snapshot()?;
        let members = self.members.read().map_err(|_| TeamError::LockError)?;
        Ok(TeamStats {
            name: self.id.clone(),
            members: members.len(),
            ledger_entries: self.ledger.len(),
            atp_balance: pool.balance,
            atp_max: pool.max,
            atp_discharged_total: pool.discharged_total,
            policy_version: self.resolve_policy()?.version,
            metabolic_state: self.heartbeat.state(),
            pending_actions: self.heartbeat.pending_count(),
            open_multi_sig: self.multisig.open_count()?,
        })
    }

    /// Admit a new member. Admin-gated; issues the one-time birth
    /// certificate and records both events in the ledger.
    pub fn add_member(
        &self,
        name: impl Into<String>,
        role: Role,
        handle: SigningHandle,
        admitted_by: &str,
    ) -> Result<(), TeamError> {
        let name = name.into();
        let admitter = {
            let members = self.members.read().map_err(|_| TeamError::LockError)?;
            let admitter = members
                .get(admitted_by)
                .ok_or_else(|| TeamError::UnknownMember {
                    name: admitted_by.to_string(),
                })?;
            if admitter.role != Role::Admin {
                return Err(TeamError::AuthorizationDenied {
                    reason: format!("member admission requires admin, '{admitted_by}' is {}", admitter.role),
                    required_role: Some(Role::Admin),
                });
            }
            if members.contains_key(&name) {
                return Err(TeamError::MemberExists { name });
            }
            admitter.clone()
        };

        let member = Member::new(name.clone(), role, handle);
        self.ledger.append(
            ActionPayload::AddMember {
                name: name.clone(),
                role,
                member_id: member.member_id.clone(),
            },
            admitter.member_id.clone(),
            admitter.handle.capability(),
        )?;
        self.admit(member, admitted_by)?;
        Ok(())
    }

    fn admit(&self, member: Member, law_oracle: &str) -> Result<(), TeamError> {
        let law_version = self.resolve_policy()?.version;
        let genesis_ref: String = self.ledger.head_hash()?.chars().take(16).collect();
        let binding = if member.handle.is_hardware() {
            "hardware"
        } else {
            "software"
        };
        let cert = BirthCertificate::issue(
            member.name.clone(),
            member.role,
            self.id.clone(),
            MemberId::new(law_oracle),
            law_version,
            self.clock.now(),
            vec![
                MemberId::new(law_oracle),
                MemberId::new(format!("root:{}", self.id)),
            ],
            genesis_ref,
            binding,
        );

        if let Some(dir) = &self.state_dir {
            cert.save(dir.join("certs").join(format!("{}.json", member.name)))?;
        }
        self.ledger.append(
            ActionPayload::BirthCertificateIssued {
                entity_name: member.name.clone(),
                cert_hash: cert.cert_hash.clone(),
            },
            member.member_id.clone(),
            member.handle.capability(),
        )?;

        debug!(team = %self.id, member = %member.name, role = %member.role, "Member admitted");
        self.register(member, cert)
    }

    /// Attach a member and their verified certificate to the live registry.
    fn register(&self, member: Member, cert: BirthCertificate) -> Result<(), TeamError> {
        if !cert.verify() {
            return Err(TeamError::CertificateTampered {
                entity: member.name.clone(),
            });
        }
        let mut certs = self.certificates.write().map_err(|_| TeamError::LockError)?;
        certs.insert(member.name.clone(), cert);
        let mut members = self.members.write().map_err(|_| TeamError::LockError)?;
        members.insert(member.name.clone(), member);
        Ok(())
    }

    /// Submit a policy update through governance (admin-only, contiguous
    /// version).
    pub fn update_policy(&self, submitter: &str, new_policy: Policy) -> Result<Policy, TeamError> {
        let (member_id, role, handle) = {
            let members = self.members.read().map_err(|_| TeamError::LockError)?;
            let m = members
                .get(submitter)
                .ok_or_else(|| TeamError::UnknownMember {
                    name: submitter.to_string(),
                })?;
            (m.member_id.clone(), m.role, m.handle.clone())
        };
        Ok(self
            .policy
            .apply_update(&self.ledger, new_policy, &member_id, role, handle.capability())?)
    }

    /// The authorization pipeline. Outcomes are synchronous; the ledger
    /// write of approved/denied records happens at heartbeat flush (or
    /// immediately in crisis).
    pub fn submit_action(
        &self,
        actor: &str,
        action: ActionName,
        target: Option<String>,
        approved_by: Option<&str>,
    ) -> Result<ActionOutcome, TeamError> {
        if self.heartbeat.should_flush()? {
            self.flush()?;
        }

        let actor_role = {
            let members = self.members.read().map_err(|_| TeamError::LockError)?;
            members
                .get(actor)
                .map(|m| m.role)
                .ok_or_else(|| TeamError::UnknownMember {
                    name: actor.to_string(),
                })?
        };
        {
            let certs = self.certificates.read().map_err(|_| TeamError::LockError)?;
            match certs.get(actor) {
                Some(cert) if cert.verify() => {}
                Some(_) => {
                    return Err(TeamError::CertificateTampered {
                        entity: actor.to_string(),
                    })
                }
                None => {
                    return Err(TeamError::AuthorizationDenied {
                        reason: format!("'{actor}' has no birth certificate"),
                        required_role: None,
                    })
                }
            }
        }

        let policy = self.resolve_policy()?;

        // Role gate. Admin always passes; this is an explicit policy
        // decision, not an implicit one.
        if actor_role != Role::Admin {
            let blocked_reason = if policy.is_admin_only(&action) {
                Some((format!("'{action}' requires admin, '{actor}' is {actor_role}"), Role::Admin))
            } else if actor_role == Role::Viewer {
                // Viewers never self-authorize anything.
                Some((format!("viewer '{actor}' cannot self-authorize '{action}'"), Role::Operator))
            } else if policy.is_operator_min(&action) && actor_role == Role::Agent {
                Some((format!("'{action}' requires operator or above, '{actor}' is {actor_role}"), Role::Operator))
            } else {
                None
            };

            if let Some((reason, required)) = blocked_reason {
                let delegated = match approved_by {
                    Some(co_signer) => {
                        let members = self.members.read().map_err(|_| TeamError::LockError)?;
                        members.get(co_signer).map(|m| m.role) == Some(Role::Admin)
                    }
                    None => false,
                };
                if !delegated {
                    return self.deny(actor, actor_role, action, target, reason, required);
                }
                debug!(team = %self.id, actor, co_signer = approved_by, "Action approved by admin delegation");
            }
        }

        // Multi-sig routing. A met quorum falls through to the debit below
        // and is only consumed after the debit succeeds, so an exhausted
        // pool leaves the quorum pending for a retry once ATP recovers.
        let mut quorum_met = None;
        if let Some(rule) = policy.requires_multi_sig(&action) {
            match self.multisig.find_pending(actor, &action)? {
                Some(request) if request.is_quorum_met() => quorum_met = Some(request),
                Some(request) => return Ok(ActionOutcome::PendingMultiSig { request }),
                None => {
                    let request = self.multisig.create_request(
                        actor,
                        actor_role,
                        action.clone(),
                        rule,
                        self.multi_sig_ttl_seconds,
                    )?;
                    self.queue_record(ActionPayload::MultiSigRequested {
                        request_id: request.request_id.clone(),
                        actor: actor.to_string(),
                        action_name: action,
                        required: request.required,
                    })?;
                    return Ok(ActionOutcome::PendingMultiSig { request });
                }
            }
        }

        // Atomic affordability check + debit, then metabolic re-classify.
        let cost = policy.get_cost(&action);
        let ratio = {
            let mut pool = self.pool.write().map_err(|_| TeamError::LockError)?;
            pool.debit(cost)?;
            pool.ratio()
        };
        self.heartbeat.transition_for_ratio(ratio)?;

        let executed_request = match quorum_met {
            Some(request) => Some(self.multisig.mark_executed(&request.request_id)?),
            None => None,
        };

        let record = self.apply_reputation(actor, true, cost)?;
        let payload = ActionPayload::Action {
            actor: actor.to_string(),
            action_name: action,
            role: actor_role,
            decision: ActionDecision::Approved,
            atp_cost: cost,
            target,
            reputation: Some(record.clone()),
            reason: None,
        };
        self.queue_record(payload.clone())?;

        if let Some(request) = executed_request {
            self.queue_record(ActionPayload::MultiSigExecuted {
                request_id: request.request_id.clone(),
                actor: request.actor.clone(),
                action_name: request.action_name.clone(),
                approvals: request.approvals.iter().map(|a| a.approver.clone()).collect(),
            })?;
        }

        Ok(ActionOutcome::Approved {
            action: payload,
            cost,
            reputation: record,
        })
    }

    fn deny(
        &self,
        actor: &str,
        actor_role: Role,
        action: ActionName,
        target: Option<String>,
        reason: String,
        required: Role,
    ) -> Result<ActionOutcome, TeamError> {
        // Denials are audit events: reputation still moves, and the denial
        // is ledgered at the next flush.
        let record = self.apply_reputation(actor, false, 0.0)?;
        self.queue_record(ActionPayload::Action {
            actor: actor.to_string(),
            action_name: action,
            role: actor_role,
            decision: ActionDecision::Denied,
            atp_cost: 0.0,
            target,
            reputation: Some(record.clone()),
            reason: Some(reason.clone()),
        })?;
        debug!(team = %self.id, actor, %reason, required_role = %required, "Action denied");
        Ok(ActionOutcome::Denied {
            reason,
            reputation: Some(record),
        })
    }

    fn apply_reputation(
        &self,
        actor: &str,
        success: bool,
        cost: f64,
    ) -> Result<ReputationRecord, TeamError> {
        let mut members = self.members.write().map_err(|_| TeamError::LockError)?;
        let member = members
            .get_mut(actor)
            .ok_or_else(|| TeamError::UnknownMember {
                name: actor.to_string(),
            })?;
        Ok(reputation::apply_outcome(
            &mut member.t3,
            &mut member.v3,
            success,
            cost,
        ))
    }

    /// Queue a record for the next heartbeat block. Crisis demands zero
    /// buffering latency, so the queue drains immediately in that state.
    fn queue_record(&self, payload: ActionPayload) -> Result<(), TeamError> {
        self.heartbeat.queue_action(payload)?;
        if self.heartbeat.state() == MetabolicState::Crisis {
            self.flush()?;
        }
        Ok(())
    }

    /// Record an approval on a pending multi-sig request.
    pub fn approve_multi_sig(
        &self,
        request_id: &str,
        approver: &str,
    ) -> Result<MultiSigRequest, TeamError> {
        let role = self.member_role(approver)?;
        let request = self.multisig.approve(request_id, approver, role)?;
        self.queue_record(ActionPayload::MultiSigApproval {
            request_id: request_id.to_string(),
            approver: approver.to_string(),
            role,
        })?;
        Ok(request)
    }

    pub fn pending_multi_sig(
        &self,
        actor: &str,
        action: &ActionName,
    ) -> Result<Option<MultiSigRequest>, TeamError> {
        Ok(self.multisig.find_pending(actor, action)?)
    }

    /// Drain the heartbeat into the ledger and apply the recharge. One
    /// atomic step relative to concurrent debits on the pool.
    pub fn flush(&self) -> Result<usize, TeamError> {
        let outcome = self.heartbeat.flush()?;
        self.commit_flush(outcome)
    }

    /// Shutdown path: drains regardless of the interval so nothing queued is
    /// ever dropped.
    pub fn force_flush(&self) -> Result<usize, TeamError> {
        let outcome = self.heartbeat.force_flush()?;
        self.commit_flush(outcome)
    }

    fn commit_flush(&self, outcome: concord_heartbeat::FlushOutcome) -> Result<usize, TeamError> {
        // Expired quorums leave the live buffer here, but their resolution
        // still lands in the ledger.
        for request in self.multisig.prune()? {
            let (member_id, handle) = self.signer_for(&self.admin_name)?;
            self.ledger.append(
                ActionPayload::MultiSigExpired {
                    request_id: request.request_id.clone(),
                    actor: request.actor.clone(),
                    action_name: request.action_name.clone(),
                    approvals: request.approval_count(),
                },
                member_id,
                handle.capability(),
            )?;
        }

        let count = outcome.actions.len();
        for action in outcome.actions {
            let signer_name = action
                .actor()
                .map(str::to_string)
                .unwrap_or_else(|| self.admin_name.clone());
            let (member_id, handle) = self.signer_for(&signer_name)?;
            self.ledger.append(action, member_id, handle.capability())?;
        }
        if let Some(block) = outcome.block {
            let (member_id, handle) = self.signer_for(&self.admin_name)?;
            self.ledger.append(block, member_id, handle.capability())?;
        }

        let ratio = {
            let mut pool = self.pool.write().map_err(|_| TeamError::LockError)?;
            pool.credit(outcome.recharge);
            pool.ratio()
        };
        self.heartbeat.transition_for_ratio(ratio)?;
        if count > 0 {
            debug!(team = %self.id, flushed = count, recharge = outcome.recharge, "Heartbeat block committed");
        }
        Ok(count)
    }

    fn signer_for(&self, name: &str) -> Result<(MemberId, SigningHandle), TeamError> {
        let members = self.members.read().map_err(|_| TeamError::LockError)?;
        let member = members
            .get(name)
            .or_else(|| members.get(&self.admin_name))
            .ok_or_else(|| TeamError::UnknownMember {
                name: name.to_string(),
            })?;
        Ok((member.member_id.clone(), member.handle.clone()))
    }

    /// Sign a bridge-verification nonce with the team's root identity.
    pub fn sign_nonce(&self, nonce: &[u8]) -> Result<Vec<u8>, TeamError> {
        Ok(self.root_handle.capability().sign(nonce)?)
    }

    /// Public key of the team's root identity, for peers verifying nonce
    /// signatures.
    pub fn root_public_key(&self) -> Vec<u8> {
        self.root_handle.capability().public_key()
    }

    /// Debit a delegation's scaled cost from this team's pool and queue the
    /// cross-team record. The caller verifies target-side eligibility first;
    /// this debit is its last irreversible step.
    pub fn charge_delegation(
        &self,
        payload: ActionPayload,
        scaled_cost: f64,
    ) -> Result<(), TeamError> {
        let ratio = {
            let mut pool = self.pool.write().map_err(|_| TeamError::LockError)?;
            pool.debit(scaled_cost)?;
            pool.ratio()
        };
        self.heartbeat.transition_for_ratio(ratio)?;
        self.queue_record(payload)
    }

    /// Queue an informational record (e.g. a bridge establishment) for the
    /// next heartbeat block.
    pub fn record_event(&self, payload: ActionPayload) -> Result<(), TeamError> {
        self.queue_record(payload)
    }

    /// Execute an incoming delegation with the admin standing in as the
    /// proxy actor. The source team already paid the scaled cost, so no
    /// local debit happens; the action record and the proxy's reputation
    /// update land here exactly as for a locally approved action.
    pub fn execute_delegated(
        &self,
        action: ActionName,
        base_cost: f64,
        delegation: ActionPayload,
    ) -> Result<(), TeamError> {
        let record = self.apply_reputation(&self.admin_name, true, base_cost)?;
        self.queue_record(ActionPayload::Action {
            actor: self.admin_name.clone(),
            action_name: action,
            role: Role::Admin,
            decision: ActionDecision::Approved,
            atp_cost: 0.0,
            target: None,
            reputation: Some(record),
            reason: None,
        })?;
        self.queue_record(delegation)
    }
}
