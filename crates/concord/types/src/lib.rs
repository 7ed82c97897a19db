//! Concord Types - shared governance vocabulary
//!
//! Identifiers, roles, trust tensors, metabolic states, the ledger action
//! payloads, and the versioned policy object every other crate consumes.
#![deny(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Hash of all zeros that anchors every chain: entry 1's `prev_hash`.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamId(pub String);
impl TeamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}
impl std::fmt::Display for TeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberId(pub String);
impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}
impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Team roles, fixed at admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Operator,
    Agent,
    Viewer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::Agent => "agent",
            Role::Viewer => "viewer",
        };
        write!(f, "{s}")
    }
}

/// Closed set of governed actions. Unknown or team-specific actions travel
/// as `Custom`, which still resolves to a defined default cost. Serialized
/// as a plain string so it can key JSON maps.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionName {
    ReviewPr,
    DeployStaging,
    DeployProduction,
    EmergencyShutdown,
    RotateCredentials,
    AddMember,
    RemoveMember,
    UpdatePolicy,
    Custom(String),
}

impl std::fmt::Display for ActionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionName::ReviewPr => write!(f, "review_pr"),
            ActionName::DeployStaging => write!(f, "deploy_staging"),
            ActionName::DeployProduction => write!(f, "deploy_production"),
            ActionName::EmergencyShutdown => write!(f, "emergency_shutdown"),
            ActionName::RotateCredentials => write!(f, "rotate_credentials"),
            ActionName::AddMember => write!(f, "add_member"),
            ActionName::RemoveMember => write!(f, "remove_member"),
            ActionName::UpdatePolicy => write!(f, "update_policy"),
            ActionName::Custom(name) => write!(f, "{name}"),
        }
    }
}

impl ActionName {
    pub fn custom(name: impl Into<String>) -> Self {
        ActionName::Custom(name.into())
    }
}

impl From<String> for ActionName {
    fn from(s: String) -> Self {
        match s.as_str() {
            "review_pr" => ActionName::ReviewPr,
            "deploy_staging" => ActionName::DeployStaging,
            "deploy_production" => ActionName::DeployProduction,
            "emergency_shutdown" => ActionName::EmergencyShutdown,
            "rotate_credentials" => ActionName::RotateCredentials,
            "add_member" => ActionName::AddMember,
            "remove_member" => ActionName::RemoveMember,
            "update_policy" => ActionName::UpdatePolicy,
            _ => ActionName::Custom(s),
        }
    }
}

impl From<ActionName> for String {
    fn from(action: ActionName) -> Self {
        action.to_string()
    }
}

/// Metabolic states governing heartbeat flush cadence and ATP recharge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetabolicState {
    Focus,
    Wake,
    Rest,
    Dream,
    Crisis,
}

impl MetabolicState {
    /// Classify the pool ratio (`atp_balance / atp_max`) into a state.
    /// Re-evaluated after every debit.
    pub fn for_ratio(ratio: f64) -> Self {
        if ratio < 0.1 {
            MetabolicState::Crisis
        } else if ratio < 0.3 {
            MetabolicState::Rest
        } else if ratio > 0.8 {
            MetabolicState::Focus
        } else {
            MetabolicState::Wake
        }
    }
}

impl std::fmt::Display for MetabolicState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MetabolicState::Focus => "focus",
            MetabolicState::Wake => "wake",
            MetabolicState::Rest => "rest",
            MetabolicState::Dream => "dream",
            MetabolicState::Crisis => "crisis",
        };
        write!(f, "{s}")
    }
}

fn clamp_unit(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Trust tensor: how capably an identity acts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrustTensor {
    pub talent: f64,
    pub training: f64,
    pub temperament: f64,
}

impl Default for TrustTensor {
    fn default() -> Self {
        Self {
            talent: 0.5,
            training: 0.5,
            temperament: 0.5,
        }
    }
}

impl TrustTensor {
    pub fn composite(&self) -> f64 {
        (self.talent + self.training + self.temperament) / 3.0
    }

    /// Exponential moving average toward outcome-derived targets.
    /// Deterministic: the same inputs always yield the same tensor.
    pub fn apply_outcome(&mut self, success: bool, quality: f64, alpha: f64) {
        let talent_target = if success {
            quality
        } else {
            (quality - 0.2).max(0.0)
        };
        let training_target = if success { 0.7 } else { 0.3 };
        let temperament_target = if success { 0.8 } else { 0.4 };

        self.talent = clamp_unit(self.talent + alpha * (talent_target - self.talent));
        self.training = clamp_unit(self.training + alpha * (training_target - self.training));
        self.temperament =
            clamp_unit(self.temperament + alpha * (temperament_target - self.temperament));
    }
}

/// Value tensor: how much verified value an identity produces.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueTensor {
    pub valuation: f64,
    pub veracity: f64,
    pub validity: f64,
}

impl Default for ValueTensor {
    fn default() -> Self {
        Self {
            valuation: 0.5,
            veracity: 0.5,
            validity: 0.5,
        }
    }
}

impl ValueTensor {
    pub fn composite(&self) -> f64 {
        (self.valuation + self.veracity + self.validity) / 3.0
    }

    pub fn apply_outcome(&mut self, value_created: f64, accurate: bool, alpha: f64) {
        let veracity_target = if accurate { 0.8 } else { 0.3 };
        let validity_target = if accurate { 0.7 } else { 0.4 };

        self.valuation = clamp_unit(self.valuation + alpha * (value_created - self.valuation));
        self.veracity = clamp_unit(self.veracity + alpha * (veracity_target - self.veracity));
        self.validity = clamp_unit(self.validity + alpha * (validity_target - self.validity));
    }
}

/// Before/after tensor snapshot recorded alongside every completed action so
/// the reputation effect is auditable and replayable from the ledger alone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReputationRecord {
    pub t3_before: TrustTensor,
    pub t3_after: TrustTensor,
    pub v3_before: ValueTensor,
    pub v3_after: ValueTensor,
    pub net_trust_change: f64,
    pub net_value_change: f64,
}

/// Outcome of an authorization attempt as recorded in the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionDecision {
    Approved,
    Denied,
    Pending,
}

/// Multi-signature requirement attached to an action by policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultiSigRule {
    pub required: u32,
    pub eligible_roles: Vec<Role>,
}

/// Versioned governance policy. The authoritative instance at any point is
/// the latest `PolicyUpdate` entry in the ledger; this object is only ever
/// superseded, never edited.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub version: u32,
    pub admin_only_actions: Vec<ActionName>,
    pub operator_min_actions: Vec<ActionName>,
    pub action_costs: BTreeMap<ActionName, f64>,
    pub multi_sig_requirements: BTreeMap<ActionName, MultiSigRule>,
    pub custom_rules: BTreeMap<String, String>,
    /// Content hash over every other field. A cached policy whose hash no
    /// longer matches its fields is discarded and re-derived from the ledger.
    pub policy_hash: String,
}

/// Cost charged for actions the policy does not price explicitly.
pub const DEFAULT_ACTION_COST: f64 = 10.0;

impl Policy {
    /// The hard-coded v1 policy used when the ledger carries no
    /// `PolicyUpdate` yet.
    pub fn baseline() -> Self {
        let mut action_costs = BTreeMap::new();
        action_costs.insert(ActionName::ReviewPr, 5.0);
        action_costs.insert(ActionName::DeployStaging, 20.0);
        action_costs.insert(ActionName::DeployProduction, 35.0);
        action_costs.insert(ActionName::EmergencyShutdown, 50.0);
        action_costs.insert(ActionName::RotateCredentials, 25.0);

        let mut multi_sig_requirements = BTreeMap::new();
        multi_sig_requirements.insert(
            ActionName::EmergencyShutdown,
            MultiSigRule {
                required: 2,
                eligible_roles: vec![Role::Admin, Role::Operator],
            },
        );
        multi_sig_requirements.insert(
            ActionName::RotateCredentials,
            MultiSigRule {
                required: 2,
                eligible_roles: vec![Role::Admin],
            },
        );

        let mut policy = Self {
            version: 1,
            admin_only_actions: vec![
                ActionName::AddMember,
                ActionName::RemoveMember,
                ActionName::UpdatePolicy,
                ActionName::EmergencyShutdown,
            ],
            operator_min_actions: vec![
                ActionName::DeployStaging,
                ActionName::DeployProduction,
                ActionName::RotateCredentials,
            ],
            action_costs,
            multi_sig_requirements,
            custom_rules: BTreeMap::new(),
            policy_hash: String::new(),
        };
        policy.policy_hash = policy.compute_hash();
        policy
    }

    /// Recompute the content hash from every field except `policy_hash`.
    pub fn compute_hash(&self) -> String {
        let mut canonical = self.clone();
        canonical.policy_hash = String::new();
        // Serialization of a plain data struct cannot fail.
        let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"concord-policy-v1:");
        hasher.update(&encoded);
        hasher.finalize().to_hex().to_string()
    }

    pub fn verify_integrity(&self) -> bool {
        self.policy_hash == self.compute_hash()
    }

    /// Seal the hash after constructing or mutating a draft policy.
    pub fn sealed(mut self) -> Self {
        self.policy_hash = self.compute_hash();
        self
    }

    /// Cost lookup with a defined fallback; unknown actions are never free
    /// and never a panic.
    pub fn get_cost(&self, action: &ActionName) -> f64 {
        self.action_costs
            .get(action)
            .copied()
            .unwrap_or(DEFAULT_ACTION_COST)
    }

    pub fn requires_multi_sig(&self, action: &ActionName) -> Option<&MultiSigRule> {
        self.multi_sig_requirements.get(action)
    }

    pub fn is_admin_only(&self, action: &ActionName) -> bool {
        self.admin_only_actions.contains(action)
    }

    pub fn is_operator_min(&self, action: &ActionName) -> bool {
        self.operator_min_actions.contains(action)
    }
}

/// Closed set of ledger action payloads. Every field participates in the
/// canonical hash input of its entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionPayload {
    Genesis {
        team_name: String,
        root_id: MemberId,
        admin_id: MemberId,
    },
    AddMember {
        name: String,
        role: Role,
        member_id: MemberId,
    },
    PolicyUpdate {
        policy: Policy,
    },
    Action {
        actor: String,
        action_name: ActionName,
        role: Role,
        decision: ActionDecision,
        atp_cost: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reputation: Option<ReputationRecord>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    MultiSigRequested {
        request_id: String,
        actor: String,
        action_name: ActionName,
        required: u32,
    },
    MultiSigApproval {
        request_id: String,
        approver: String,
        role: Role,
    },
    MultiSigExecuted {
        request_id: String,
        actor: String,
        action_name: ActionName,
        approvals: Vec<String>,
    },
    MultiSigExpired {
        request_id: String,
        actor: String,
        action_name: ActionName,
        approvals: u32,
    },
    BirthCertificateIssued {
        entity_name: String,
        cert_hash: String,
    },
    HeartbeatBlock {
        count: u64,
        metabolic_state: MetabolicState,
    },
    BridgeEstablished {
        bridge_id: String,
        peer_team: TeamId,
    },
    CrossTeamDelegation {
        bridge_id: String,
        source_team: TeamId,
        target_team: TeamId,
        actor: String,
        action_name: ActionName,
        scaled_cost: f64,
        effective_trust: f64,
    },
}

impl ActionPayload {
    /// Stable kind label used by ledger queries and analytics.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionPayload::Genesis { .. } => "genesis",
            ActionPayload::AddMember { .. } => "add_member",
            ActionPayload::PolicyUpdate { .. } => "policy_update",
            ActionPayload::Action { .. } => "action",
            ActionPayload::MultiSigRequested { .. } => "multi_sig_requested",
            ActionPayload::MultiSigApproval { .. } => "multi_sig_approval",
            ActionPayload::MultiSigExecuted { .. } => "multi_sig_executed",
            ActionPayload::MultiSigExpired { .. } => "multi_sig_expired",
            ActionPayload::BirthCertificateIssued { .. } => "birth_certificate_issued",
            ActionPayload::HeartbeatBlock { .. } => "heartbeat_block",
            ActionPayload::BridgeEstablished { .. } => "bridge_established",
            ActionPayload::CrossTeamDelegation { .. } => "cross_team_delegation",
        }
    }

    /// The acting identity this payload is attributed to, when one exists.
    pub fn actor(&self) -> Option<&str> {
        match self {
            ActionPayload::Action { actor, .. } => Some(actor),
            ActionPayload::MultiSigRequested { actor, .. } => Some(actor),
            ActionPayload::MultiSigApproval { approver, .. } => Some(approver),
            ActionPayload::MultiSigExecuted { actor, .. } => Some(actor),
            ActionPayload::MultiSigExpired { actor, .. } => Some(actor),
            ActionPayload::CrossTeamDelegation { actor, .. } => Some(actor),
            _ => None,
        }
    }
}

/// Injectable time source so schedulers and TTLs are testable without
/// sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock advanced by hand.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn advance(&self, duration: Duration) {
        if let Ok(mut now) = self.now.write() {
            *now = *now + duration;
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
            .read()
            .map(|now| *now)
            .unwrap_or_else(|_| Utc::now())
    }
}
