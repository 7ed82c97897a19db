//! Concord Heartbeat - the metabolic scheduler.
//!
//! Actions queue here between heartbeats and commit to the ledger as a block
//! when the current metabolic state's interval elapses. The same tick drives
//! ATP recharge, proportional to elapsed time and capped so idle time cannot
//! be gamed into a windfall.
#![deny(unsafe_code)]

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use concord_types::{ActionPayload, Clock, MetabolicState};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("Invalid heartbeat config: {0}")]
    InvalidConfig(String),

    #[error("Lock poisoned")]
    LockError,
}

/// Flush cadence and recharge rate per metabolic state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StateProfile {
    pub interval_secs: u64,
    /// ATP regained per full interval. Must be strictly positive for every
    /// state: a zero crisis rate is an unrecoverable death spiral.
    pub recharge_per_interval: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HeartbeatConfig {
    pub focus: StateProfile,
    pub wake: StateProfile,
    pub rest: StateProfile,
    pub dream: StateProfile,
    pub crisis: StateProfile,
    /// Recharge for one flush is capped at this many intervals' worth.
    pub recharge_cap_intervals: f64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            focus: StateProfile {
                interval_secs: 15,
                recharge_per_interval: 2.0,
            },
            wake: StateProfile {
                interval_secs: 60,
                recharge_per_interval: 5.0,
            },
            rest: StateProfile {
                interval_secs: 120,
                recharge_per_interval: 10.0,
            },
            dream: StateProfile {
                interval_secs: 300,
                recharge_per_interval: 20.0,
            },
            crisis: StateProfile {
                interval_secs: 5,
                recharge_per_interval: 1.0,
            },
            recharge_cap_intervals: 3.0,
        }
    }
}

impl HeartbeatConfig {
    pub fn profile(&self, state: MetabolicState) -> StateProfile {
        match state {
            MetabolicState::Focus => self.focus,
            MetabolicState::Wake => self.wake,
            MetabolicState::Rest => self.rest,
            MetabolicState::Dream => self.dream,
            MetabolicState::Crisis => self.crisis,
        }
    }

    fn validate(&self) -> Result<(), HeartbeatError> {
        for state in [
            MetabolicState::Focus,
            MetabolicState::Wake,
            MetabolicState::Rest,
            MetabolicState::Dream,
            MetabolicState::Crisis,
        ] {
            let profile = self.profile(state);
            if profile.recharge_per_interval <= 0.0 {
                return Err(HeartbeatError::InvalidConfig(format!(
                    "recharge rate for {state} must be strictly positive"
                )));
            }
            if profile.interval_secs == 0 {
                return Err(HeartbeatError::InvalidConfig(format!(
                    "interval for {state} must be non-zero"
                )));
            }
        }
        if self.recharge_cap_intervals < 1.0 {
            return Err(HeartbeatError::InvalidConfig(
                "recharge cap must allow at least one interval".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of draining the heartbeat: the actions to ledger, the summary
/// block (when anything flushed), and the recharge earned by elapsed time.
#[derive(Debug)]
pub struct FlushOutcome {
    pub actions: Vec<ActionPayload>,
    pub block: Option<ActionPayload>,
    pub recharge: f64,
    pub state: MetabolicState,
}

struct HeartbeatInner {
    state: MetabolicState,
    last_flush: DateTime<Utc>,
    pending: Vec<ActionPayload>,
    total_recharged: f64,
    blocks_flushed: u64,
}

/// Per-team metabolic scheduler. Not a timer itself: the owner polls
/// `should_flush` (or calls `force_flush` on shutdown) and applies the
/// returned recharge to its pool as one atomic step.
pub struct Heartbeat {
    config: HeartbeatConfig,
    clock: Arc<dyn Clock>,
    inner: RwLock<HeartbeatInner>,
}

impl Heartbeat {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        // Default config is statically valid.
        Self::with_config(HeartbeatConfig::default(), clock)
            .unwrap_or_else(|_| unreachable!("default heartbeat config is valid"))
    }

    pub fn with_config(
        config: HeartbeatConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, HeartbeatError> {
        config.validate()?;
        let now = clock.now();
        Ok(Self {
            config,
            clock,
            inner: RwLock::new(HeartbeatInner {
                state: MetabolicState::Wake,
                last_flush: now,
                pending: Vec::new(),
                total_recharged: 0.0,
                blocks_flushed: 0,
            }),
        })
    }

    pub fn state(&self) -> MetabolicState {
        self.inner
            .read()
            .map(|inner| inner.state)
            .unwrap_or(MetabolicState::Wake)
    }

    pub fn interval_secs(&self) -> u64 {
        self.config.profile(self.state()).interval_secs
    }

    pub fn recharge_rate(&self) -> f64 {
        self.config.profile(self.state()).recharge_per_interval
    }

    pub fn pending_count(&self) -> usize {
        self.inner.read().map(|inner| inner.pending.len()).unwrap_or(0)
    }

    pub fn total_recharged(&self) -> f64 {
        self.inner
            .read()
            .map(|inner| inner.total_recharged)
            .unwrap_or(0.0)
    }

    /// Explicit state transition.
    pub fn transition(&self, state: MetabolicState) -> Result<(), HeartbeatError> {
        let mut inner = self.inner.write().map_err(|_| HeartbeatError::LockError)?;
        if inner.state != state {
            info!(from = %inner.state, to = %state, "Metabolic state transition");
            inner.state = state;
        }
        Ok(())
    }

    /// Re-classify from the pool ratio. Called after every debit.
    pub fn transition_for_ratio(&self, ratio: f64) -> Result<MetabolicState, HeartbeatError> {
        let state = MetabolicState::for_ratio(ratio);
        self.transition(state)?;
        Ok(state)
    }

    pub fn queue_action(&self, action: ActionPayload) -> Result<(), HeartbeatError> {
        let mut inner = self.inner.write().map_err(|_| HeartbeatError::LockError)?;
        inner.pending.push(action);
        Ok(())
    }

    pub fn should_flush(&self) -> Result<bool, HeartbeatError> {
        let inner = self.inner.read().map_err(|_| HeartbeatError::LockError)?;
        let elapsed = self.clock.now() - inner.last_flush;
        let interval = self.config.profile(inner.state).interval_secs as i64;
        Ok(elapsed.num_seconds() >= interval)
    }

    /// Time-proportional recharge for the given elapsed seconds under the
    /// current state, capped at `recharge_cap_intervals` intervals' worth.
    pub fn compute_recharge(&self, elapsed_secs: f64) -> Result<f64, HeartbeatError> {
        let inner = self.inner.read().map_err(|_| HeartbeatError::LockError)?;
        Ok(self.recharge_for(&inner, elapsed_secs))
    }

    fn recharge_for(&self, inner: &HeartbeatInner, elapsed_secs: f64) -> f64 {
        let profile = self.config.profile(inner.state);
        let intervals = (elapsed_secs / profile.interval_secs as f64).max(0.0);
        let earned = profile.recharge_per_interval * intervals;
        earned.min(profile.recharge_per_interval * self.config.recharge_cap_intervals)
    }

    /// Drain the queue and reset the timer. One atomic step: the caller
    /// ledgers the returned actions plus the summary block and credits the
    /// recharge before releasing its own pool lock.
    pub fn flush(&self) -> Result<FlushOutcome, HeartbeatError> {
        let mut inner = self.inner.write().map_err(|_| HeartbeatError::LockError)?;
        let now = self.clock.now();
        let elapsed_secs = (now - inner.last_flush).num_milliseconds() as f64 / 1000.0;
        let recharge = self.recharge_for(&inner, elapsed_secs);

        let actions = std::mem::take(&mut inner.pending);
        let block = if actions.is_empty() {
            None
        } else {
            inner.blocks_flushed += 1;
            Some(ActionPayload::HeartbeatBlock {
                count: actions.len() as u64,
                metabolic_state: inner.state,
            })
        };

        inner.last_flush = now;
        inner.total_recharged += recharge;
        debug!(
            drained = actions.len(),
            recharge,
            state = %inner.state,
            "Heartbeat flushed"
        );
        Ok(FlushOutcome {
            actions,
            block,
            recharge,
            state: inner.state,
        })
    }

    /// Shutdown path: identical to `flush` but never gated on the interval,
    /// so no queued action is silently dropped.
    pub fn force_flush(&self) -> Result<FlushOutcome, HeartbeatError> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_types::{ActionDecision, ActionName, ManualClock, Role};

    fn queued_action() -> ActionPayload {
        ActionPayload::Action {
            actor: "sage-agent".to_string(),
            action_name: ActionName::ReviewPr,
            role: Role::Agent,
            decision: ActionDecision::Approved,
            atp_cost: 5.0,
            target: None,
            reputation: None,
            reason: None,
        }
    }

    fn manual_heartbeat() -> (Arc<ManualClock>, Heartbeat) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let heartbeat = Heartbeat::new(clock.clone());
        (clock, heartbeat)
    }

    #[test]
    fn state_intervals_match_profile() {
        let (_, hb) = manual_heartbeat();
        hb.transition(MetabolicState::Focus).unwrap();
        assert_eq!(hb.interval_secs(), 15);
        hb.transition(MetabolicState::Crisis).unwrap();
        assert_eq!(hb.interval_secs(), 5);
        hb.transition(MetabolicState::Wake).unwrap();
        assert_eq!(hb.interval_secs(), 60);
    }

    #[test]
    fn every_state_recharges_at_a_positive_rate() {
        let (_, hb) = manual_heartbeat();
        for state in [
            MetabolicState::Focus,
            MetabolicState::Wake,
            MetabolicState::Rest,
            MetabolicState::Dream,
            MetabolicState::Crisis,
        ] {
            hb.transition(state).unwrap();
            assert!(hb.recharge_rate() > 0.0, "{state} must recharge");
        }
    }

    #[test]
    fn zero_crisis_rate_is_rejected() {
        let mut config = HeartbeatConfig::default();
        config.crisis.recharge_per_interval = 0.0;
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Utc::now()));
        assert!(matches!(
            Heartbeat::with_config(config, clock),
            Err(HeartbeatError::InvalidConfig(_))
        ));
    }

    #[test]
    fn should_flush_after_interval_elapses() {
        let (clock, hb) = manual_heartbeat();
        assert!(!hb.should_flush().unwrap());
        clock.advance_secs(59);
        assert!(!hb.should_flush().unwrap());
        clock.advance_secs(1);
        assert!(hb.should_flush().unwrap());
    }

    #[test]
    fn flush_drains_queue_and_emits_block() {
        let (clock, hb) = manual_heartbeat();
        for _ in 0..5 {
            hb.queue_action(queued_action()).unwrap();
        }
        clock.advance_secs(60);

        let outcome = hb.flush().unwrap();
        assert_eq!(outcome.actions.len(), 5);
        assert!(matches!(
            outcome.block,
            Some(ActionPayload::HeartbeatBlock { count: 5, .. })
        ));
        assert_eq!(hb.pending_count(), 0);
        assert!(!hb.should_flush().unwrap());
    }

    #[test]
    fn empty_flush_emits_no_block_but_still_recharges() {
        let (clock, hb) = manual_heartbeat();
        clock.advance_secs(60);
        let outcome = hb.flush().unwrap();
        assert!(outcome.actions.is_empty());
        assert!(outcome.block.is_none());
        assert!(outcome.recharge > 0.0);
    }

    #[test]
    fn recharge_is_capped_at_three_intervals() {
        let (_, hb) = manual_heartbeat();
        hb.transition(MetabolicState::Dream).unwrap();
        let capped = hb.compute_recharge(999_999.0).unwrap();
        assert_eq!(capped, 20.0 * 3.0);
    }

    #[test]
    fn recharge_is_proportional_below_the_cap() {
        let (_, hb) = manual_heartbeat();
        hb.transition(MetabolicState::Rest).unwrap();
        // Half an interval earns half the per-interval rate.
        let earned = hb.compute_recharge(60.0).unwrap();
        assert!((earned - 5.0).abs() < 1e-9);
    }

    #[test]
    fn ratio_transitions_follow_thresholds() {
        let (_, hb) = manual_heartbeat();
        assert_eq!(hb.transition_for_ratio(0.05).unwrap(), MetabolicState::Crisis);
        assert_eq!(hb.transition_for_ratio(0.2).unwrap(), MetabolicState::Rest);
        assert_eq!(hb.transition_for_ratio(0.5).unwrap(), MetabolicState::Wake);
        assert_eq!(hb.transition_for_ratio(0.9).unwrap(), MetabolicState::Focus);
    }

    #[test]
    fn force_flush_drains_without_interval() {
        let (_, hb) = manual_heartbeat();
        hb.queue_action(queued_action()).unwrap();
        assert!(!hb.should_flush().unwrap());
        let outcome = hb.force_flush().unwrap();
        assert_eq!(outcome.actions.len(), 1);
        assert_eq!(hb.pending_count(), 0);
    }

    #[test]
    fn crisis_recovery_has_no_death_spiral() {
        // Starting below the crisis threshold with no further debits, the
        // pool ratio strictly increases across successive flush cycles.
        let (clock, hb) = manual_heartbeat();
        let atp_max = 100.0;
        let mut balance = 5.0;
        hb.transition_for_ratio(balance / atp_max).unwrap();
        assert_eq!(hb.state(), MetabolicState::Crisis);

        let mut last_ratio = balance / atp_max;
        for _ in 0..10 {
            clock.advance_secs(hb.interval_secs() as i64);
            let outcome = hb.flush().unwrap();
            balance = (balance + outcome.recharge).min(atp_max);
            let ratio = balance / atp_max;
            assert!(ratio > last_ratio, "ratio must strictly increase");
            last_ratio = ratio;
            hb.transition_for_ratio(ratio).unwrap();
        }
    }
}
