//! Trust bridges between teams.
//!
//! A bridge carries a state machine driven by delegation outcomes. Trust is
//! earned slowly (ten consecutive successes to establish) and lost fast (one
//! failure degrades, five consecutive failures break the bridge for good).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use concord_types::{ActionName, TeamId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Bridge lifecycle states. `Broken` is terminal for outcome recording;
/// only an explicit re-verification restarts a broken bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    New,
    Active,
    Established,
    Degraded,
    Broken,
}

impl BridgeState {
    /// Trust discount applied to everything flowing over the bridge.
    pub fn trust_multiplier(&self) -> f64 {
        match self {
            BridgeState::New => 0.5,
            BridgeState::Active => 0.8,
            BridgeState::Established => 0.95,
            BridgeState::Degraded => 0.3,
            BridgeState::Broken => 0.0,
        }
    }
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BridgeState::New => "new",
            BridgeState::Active => "active",
            BridgeState::Established => "established",
            BridgeState::Degraded => "degraded",
            BridgeState::Broken => "broken",
        };
        write!(f, "{s}")
    }
}

/// Consecutive successes needed in `Active` to reach `Established`.
pub const ESTABLISH_THRESHOLD: u32 = 10;

/// Consecutive failures that break the bridge.
pub const BREAK_THRESHOLD: u32 = 5;

/// Deterministic, order-independent bridge identifier for a team pair.
pub fn bridge_id(a: &TeamId, b: &TeamId) -> String {
    let (lo, hi) = if a.0 <= b.0 { (a, b) } else { (b, a) };
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"concord-bridge-v1:");
    hasher.update(lo.0.as_bytes());
    hasher.update(b":");
    hasher.update(hi.0.as_bytes());
    hasher.finalize().to_hex().to_string()[..12].to_string()
}

/// One delegation carried over a bridge, retained on the bridge itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DelegationEntry {
    pub source_team: TeamId,
    pub actor: String,
    pub action_name: ActionName,
    pub scaled_cost: f64,
    pub effective_trust: f64,
    pub timestamp: DateTime<Utc>,
}

/// One verified trust link between two teams.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bridge {
    pub bridge_id: String,
    pub team_a: TeamId,
    pub team_b: TeamId,
    pub state: BridgeState,
    /// Per-team ceilings on the trust either side extends. Effective trust
    /// is the state multiplier times the minimum ceiling.
    pub trust_ceilings: BTreeMap<TeamId, f64>,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub delegations: Vec<DelegationEntry>,
    pub established_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Bridge {
    pub fn new(team_a: TeamId, team_b: TeamId, now: DateTime<Utc>) -> Self {
        Self {
            bridge_id: bridge_id(&team_a, &team_b),
            team_a,
            team_b,
            state: BridgeState::New,
            trust_ceilings: BTreeMap::new(),
            consecutive_successes: 0,
            consecutive_failures: 0,
            total_successes: 0,
            total_failures: 0,
            delegations: Vec::new(),
            established_at: now,
            last_activity: now,
        }
    }

    /// Mutual root verification succeeded; the bridge carries live traffic.
    pub fn mark_verified(&mut self, now: DateTime<Utc>) {
        if self.state == BridgeState::New {
            info!(bridge = %self.bridge_id, "Bridge verified, now active");
            self.state = BridgeState::Active;
            self.last_activity = now;
        }
    }

    /// Delegation traffic is only carried at earned trust levels.
    pub fn accepts_delegation(&self) -> bool {
        matches!(self.state, BridgeState::Active | BridgeState::Established)
    }

    pub fn connects(&self, a: &TeamId, b: &TeamId) -> bool {
        (&self.team_a == a && &self.team_b == b) || (&self.team_a == b && &self.team_b == a)
    }

    pub fn peer_of(&self, team: &TeamId) -> Option<&TeamId> {
        if &self.team_a == team {
            Some(&self.team_b)
        } else if &self.team_b == team {
            Some(&self.team_a)
        } else {
            None
        }
    }

    /// State multiplier times the lowest ceiling either side has set.
    /// Ceilings default to fully open.
    pub fn effective_trust(&self) -> f64 {
        let floor = self
            .trust_ceilings
            .values()
            .fold(1.0f64, |acc, c| acc.min(*c));
        self.state.trust_multiplier() * floor
    }

    pub fn set_trust_ceiling(&mut self, team: TeamId, ceiling: f64) {
        self.trust_ceilings.insert(team, ceiling.clamp(0.0, 1.0));
    }

    pub fn is_usable(&self) -> bool {
        self.state != BridgeState::Broken
    }

    /// A successful delegation or heartbeat over the bridge.
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        if self.state == BridgeState::Broken {
            return;
        }
        self.last_activity = now;
        self.total_successes += 1;
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;

        let next = match self.state {
            BridgeState::New | BridgeState::Degraded => BridgeState::Active,
            BridgeState::Active if self.consecutive_successes >= ESTABLISH_THRESHOLD => {
                BridgeState::Established
            }
            other => other,
        };
        if next != self.state {
            info!(bridge = %self.bridge_id, from = %self.state, to = %next, "Bridge state transition");
            self.state = next;
        }
    }

    /// A failed delegation or missed heartbeat. One failure degrades;
    /// `BREAK_THRESHOLD` consecutive failures break the bridge.
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        if self.state == BridgeState::Broken {
            return;
        }
        self.last_activity = now;
        self.total_failures += 1;
        self.consecutive_successes = 0;
        self.consecutive_failures += 1;

        let next = if self.consecutive_failures >= BREAK_THRESHOLD {
            BridgeState::Broken
        } else {
            BridgeState::Degraded
        };
        if next != self.state {
            warn!(
                bridge = %self.bridge_id,
                from = %self.state,
                to = %next,
                consecutive_failures = self.consecutive_failures,
                "Bridge state transition"
            );
            self.state = next;
        }
    }

    /// Restart a broken bridge after a fresh mutual verification. Counters
    /// reset; trust starts over at `New`.
    pub fn restart(&mut self, now: DateTime<Utc>) {
        info!(bridge = %self.bridge_id, "Bridge restarted after re-verification");
        self.state = BridgeState::New;
        self.consecutive_successes = 0;
        self.consecutive_failures = 0;
        self.last_activity = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> Bridge {
        Bridge::new(TeamId::new("alpha"), TeamId::new("beta"), Utc::now())
    }

    #[test]
    fn id_is_order_independent() {
        let ab = bridge_id(&TeamId::new("alpha"), &TeamId::new("beta"));
        let ba = bridge_id(&TeamId::new("beta"), &TeamId::new("alpha"));
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 12);

        let other = bridge_id(&TeamId::new("alpha"), &TeamId::new("gamma"));
        assert_ne!(ab, other);
    }

    #[test]
    fn first_success_activates() {
        let mut b = bridge();
        assert_eq!(b.state, BridgeState::New);
        b.record_success(Utc::now());
        assert_eq!(b.state, BridgeState::Active);
    }

    #[test]
    fn ten_consecutive_successes_establish() {
        let mut b = bridge();
        for _ in 0..ESTABLISH_THRESHOLD {
            b.record_success(Utc::now());
        }
        assert_eq!(b.state, BridgeState::Established);
        assert_eq!(b.effective_trust(), 0.95);
    }

    #[test]
    fn one_failure_degrades_and_success_reactivates() {
        let mut b = bridge();
        b.record_success(Utc::now());
        b.record_failure(Utc::now());
        assert_eq!(b.state, BridgeState::Degraded);
        assert_eq!(b.effective_trust(), 0.3);

        b.record_success(Utc::now());
        assert_eq!(b.state, BridgeState::Active);
    }

    #[test]
    fn failure_interrupts_the_establish_streak() {
        let mut b = bridge();
        for _ in 0..ESTABLISH_THRESHOLD - 1 {
            b.record_success(Utc::now());
        }
        b.record_failure(Utc::now());
        for _ in 0..ESTABLISH_THRESHOLD - 1 {
            b.record_success(Utc::now());
        }
        // The streak restarted; nine more are not enough.
        assert_eq!(b.state, BridgeState::Active);
        b.record_success(Utc::now());
        assert_eq!(b.state, BridgeState::Established);
    }

    #[test]
    fn five_consecutive_failures_break_terminally() {
        let mut b = bridge();
        for _ in 0..BREAK_THRESHOLD {
            b.record_failure(Utc::now());
        }
        assert_eq!(b.state, BridgeState::Broken);
        assert_eq!(b.effective_trust(), 0.0);
        assert!(!b.is_usable());

        // Outcomes no longer move a broken bridge.
        b.record_success(Utc::now());
        assert_eq!(b.state, BridgeState::Broken);
    }

    #[test]
    fn restart_resets_to_new() {
        let mut b = bridge();
        for _ in 0..BREAK_THRESHOLD {
            b.record_failure(Utc::now());
        }
        b.restart(Utc::now());
        assert_eq!(b.state, BridgeState::New);
        assert_eq!(b.consecutive_failures, 0);
        b.record_success(Utc::now());
        assert_eq!(b.state, BridgeState::Active);
    }

    #[test]
    fn ceilings_cap_effective_trust() {
        let mut b = bridge();
        for _ in 0..ESTABLISH_THRESHOLD {
            b.record_success(Utc::now());
        }
        b.set_trust_ceiling(TeamId::new("alpha"), 0.6);
        b.set_trust_ceiling(TeamId::new("beta"), 0.9);
        assert!((b.effective_trust() - 0.95 * 0.6).abs() < 1e-9);

        // Ceilings clamp to the unit range.
        b.set_trust_ceiling(TeamId::new("alpha"), 7.0);
        assert!((b.effective_trust() - 0.95 * 0.9).abs() < 1e-9);
    }
}
