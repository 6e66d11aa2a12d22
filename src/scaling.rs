//! Cooldown-gated scaling policies
//!
//! A [`ScalingPolicyEngine`] turns an alarm entering (or, optionally,
//! staying in) ALARM into a relative adjustment request for one target.
//! Up and down are always separate policies bound to separate alarms, so
//! each direction keeps its own window and cooldown.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::callbacks::ScalingTarget;
use crate::error::{ShardwatchError, ShardwatchResult};
use crate::types::{AlarmState, AlarmTransition, MetricValue, ScaleDirection, Timestamp};

/// Binds one alarm to a bounded replica-count delta on one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingPolicySpec {
    /// Unique policy identity (e.g. "shard-1-scale-out")
    pub id: String,
    /// Rule whose ALARM state drives this policy
    pub alarm_id: String,
    /// Scaling target the delta is sent to
    pub target_id: String,
    pub direction: ScaleDirection,
    /// Signed replica delta; positive for up, negative for down
    pub step: i32,
    /// Minimum time between two adjustments issued by this policy
    pub cooldown_seconds: u64,
    /// Re-attempt on every tick the alarm stays in ALARM, not only on the transition
    pub reevaluate_while_alarm: bool,
}

impl ScalingPolicySpec {
    pub fn validate(&self) -> ShardwatchResult<()> {
        let sign_ok = match self.direction {
            ScaleDirection::Up => self.step > 0,
            ScaleDirection::Down => self.step < 0,
        };
        if !sign_ok {
            return Err(ShardwatchError::invalid_rule(
                &self.id,
                format!("step {} does not match direction '{}'", self.step, self.direction),
            ));
        }
        if self.target_id.is_empty() {
            return Err(ShardwatchError::invalid_rule(&self.id, "target_id must not be empty"));
        }
        Ok(())
    }
}

/// Last action time of one policy
#[derive(Debug, Clone)]
pub struct CooldownTimer {
    policy_id: String,
    last_action_time: Option<Timestamp>,
}

impl CooldownTimer {
    pub fn new(policy_id: &str) -> Self {
        Self {
            policy_id: policy_id.to_string(),
            last_action_time: None,
        }
    }

    pub fn policy_id(&self) -> &str {
        &self.policy_id
    }

    pub fn last_action_time(&self) -> Option<Timestamp> {
        self.last_action_time
    }

    /// Seconds left before the next action is allowed, or `None` if cooled down
    pub fn remaining(&self, now: Timestamp, cooldown_seconds: u64) -> Option<u64> {
        let last = self.last_action_time?;
        let elapsed = now.saturating_sub(last);
        (elapsed < cooldown_seconds).then(|| cooldown_seconds - elapsed)
    }

    pub fn reset(&mut self, now: Timestamp) {
        self.last_action_time = Some(now);
    }
}

/// An adjustment the engine decided on (or dropped)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingAction {
    pub policy_id: String,
    pub target_id: String,
    pub direction: ScaleDirection,
    pub delta: i32,
    /// Human-readable explanation
    pub reason: String,
    pub timestamp: Timestamp,
}

/// What a policy did on one tick
#[derive(Debug, Clone, PartialEq)]
pub enum ScalingOutcome {
    /// The alarm did not qualify this tick
    NotTriggered,
    /// Adjustment accepted by the target (it may still have been clamped)
    Executed(ScalingAction),
    /// Adjustment dropped, e.g. still cooling down
    Skipped { action: ScalingAction, reason: String },
    /// Adjustment rejected by the target; cooldown was applied anyway
    Failed { action: ScalingAction, error: String },
}

/// Cooldown-gated driver for one [`ScalingPolicySpec`]
#[derive(Debug)]
pub struct ScalingPolicyEngine {
    spec: Arc<ScalingPolicySpec>,
    cooldown: CooldownTimer,
}

impl ScalingPolicyEngine {
    pub fn new(spec: Arc<ScalingPolicySpec>) -> Self {
        let cooldown = CooldownTimer::new(&spec.id);
        Self { spec, cooldown }
    }

    pub fn spec(&self) -> &ScalingPolicySpec {
        &self.spec
    }

    pub fn cooldown(&self) -> &CooldownTimer {
        &self.cooldown
    }

    /// Whether this tick's alarm signal asks for an adjustment
    pub fn qualifies(&self, transition: Option<&AlarmTransition>, state: AlarmState) -> bool {
        if state != AlarmState::Alarm {
            return false;
        }
        let entered_alarm = transition.map_or(false, |t| t.to == AlarmState::Alarm);
        entered_alarm || self.spec.reevaluate_while_alarm
    }

    /// Handle one evaluator tick for the bound alarm
    pub async fn on_tick(
        &mut self,
        transition: Option<&AlarmTransition>,
        state: AlarmState,
        value: Option<MetricValue>,
        target: &dyn ScalingTarget,
        now: Timestamp,
    ) -> ScalingOutcome {
        if !self.qualifies(transition, state) {
            return ScalingOutcome::NotTriggered;
        }

        let action = ScalingAction {
            policy_id: self.spec.id.clone(),
            target_id: self.spec.target_id.clone(),
            direction: self.spec.direction,
            delta: self.spec.step,
            reason: match value {
                Some(v) => format!("alarm '{}' in ALARM (last value {:.2})", self.spec.alarm_id, v),
                None => format!("alarm '{}' in ALARM (no data)", self.spec.alarm_id),
            },
            timestamp: now,
        };

        if let Some(remaining) = self.cooldown.remaining(now, self.spec.cooldown_seconds) {
            debug!(
                policy = %self.spec.id,
                target_id = %self.spec.target_id,
                remaining_seconds = remaining,
                "Scaling action dropped due to cooldown"
            );
            return ScalingOutcome::Skipped {
                action,
                reason: format!("cooldown active for another {}s", remaining),
            };
        }

        let result = target.adjust(&self.spec.target_id, self.spec.step).await;
        // Applied even when the orchestrator clamps or rejects the request
        self.cooldown.reset(now);

        match result {
            Ok(()) => {
                info!(
                    policy = %self.spec.id,
                    target_id = %self.spec.target_id,
                    delta = self.spec.step,
                    "Scaling adjustment issued"
                );
                ScalingOutcome::Executed(action)
            }
            Err(e) => {
                warn!(
                    policy = %self.spec.id,
                    target_id = %self.spec.target_id,
                    delta = self.spec.step,
                    error = %e,
                    "Scaling adjustment rejected"
                );
                ScalingOutcome::Failed {
                    action,
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::MockScalingTarget;

    fn scale_out(cooldown_seconds: u64, reevaluate_while_alarm: bool) -> Arc<ScalingPolicySpec> {
        Arc::new(ScalingPolicySpec {
            id: "shard-1-scale-out".to_string(),
            alarm_id: "shard-1-latency-high".to_string(),
            target_id: "shard-1".to_string(),
            direction: ScaleDirection::Up,
            step: 1,
            cooldown_seconds,
            reevaluate_while_alarm,
        })
    }

    fn entered_alarm(at: Timestamp) -> AlarmTransition {
        AlarmTransition {
            rule_id: "shard-1-latency-high".to_string(),
            from: AlarmState::Ok,
            to: AlarmState::Alarm,
            timestamp: at,
            value: Some(480.0),
        }
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_second_transition() {
        let mut target = MockScalingTarget::new();
        target
            .expect_adjust()
            .withf(|id, delta| id.to_string() == "shard-1" && *delta == 1)
            .times(1)
            .returning(|_, _| Ok(()));

        let mut policy = ScalingPolicyEngine::new(scale_out(60, false));

        let first = policy
            .on_tick(Some(&entered_alarm(1_000)), AlarmState::Alarm, Some(480.0), &target, 1_000)
            .await;
        assert!(matches!(first, ScalingOutcome::Executed(_)));

        let second = policy
            .on_tick(Some(&entered_alarm(1_010)), AlarmState::Alarm, Some(480.0), &target, 1_010)
            .await;
        match second {
            ScalingOutcome::Skipped { reason, .. } => assert!(reason.contains("50s")),
            other => panic!("expected skip, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fires_again_once_cooled_down() {
        let mut target = MockScalingTarget::new();
        target.expect_adjust().times(2).returning(|_, _| Ok(()));

        let mut policy = ScalingPolicyEngine::new(scale_out(60, false));
        policy
            .on_tick(Some(&entered_alarm(1_000)), AlarmState::Alarm, None, &target, 1_000)
            .await;
        let outcome = policy
            .on_tick(Some(&entered_alarm(1_060)), AlarmState::Alarm, None, &target, 1_060)
            .await;

        assert!(matches!(outcome, ScalingOutcome::Executed(_)));
        assert_eq!(policy.cooldown().last_action_time(), Some(1_060));
    }

    #[tokio::test]
    async fn test_rejected_adjustment_still_starts_cooldown() {
        let mut target = MockScalingTarget::new();
        target
            .expect_adjust()
            .times(1)
            .returning(|_, _| Err(ShardwatchError::callback_failed("adjust", "already at max capacity")));

        let mut policy = ScalingPolicyEngine::new(scale_out(60, true));
        let first = policy
            .on_tick(Some(&entered_alarm(1_000)), AlarmState::Alarm, None, &target, 1_000)
            .await;
        assert!(matches!(first, ScalingOutcome::Failed { .. }));

        let second = policy.on_tick(None, AlarmState::Alarm, None, &target, 1_030).await;
        assert!(matches!(second, ScalingOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_sustained_alarm_rechecks_only_when_enabled() {
        let mut target = MockScalingTarget::new();
        target.expect_adjust().times(2).returning(|_, _| Ok(()));

        let mut recheck = ScalingPolicyEngine::new(scale_out(60, true));
        recheck
            .on_tick(Some(&entered_alarm(1_000)), AlarmState::Alarm, None, &target, 1_000)
            .await;
        let sustained = recheck.on_tick(None, AlarmState::Alarm, None, &target, 1_060).await;
        assert!(matches!(sustained, ScalingOutcome::Executed(_)));

        let once = ScalingPolicyEngine::new(scale_out(60, false));
        assert!(!once.qualifies(None, AlarmState::Alarm));
        assert!(once.qualifies(Some(&entered_alarm(1_000)), AlarmState::Alarm));
    }

    #[tokio::test]
    async fn test_ok_and_insufficient_data_never_scale() {
        let target = MockScalingTarget::new();
        let mut policy = ScalingPolicyEngine::new(scale_out(0, true));

        for state in [AlarmState::Ok, AlarmState::InsufficientData] {
            let outcome = policy.on_tick(None, state, None, &target, 1_000).await;
            assert_eq!(outcome, ScalingOutcome::NotTriggered);
        }
        assert_eq!(policy.cooldown().last_action_time(), None);
    }

    #[test]
    fn test_cooldown_timer() {
        let mut timer = CooldownTimer::new("p");
        assert_eq!(timer.remaining(1_000, 120), None);

        timer.reset(1_000);
        assert_eq!(timer.remaining(1_000, 120), Some(120));
        assert_eq!(timer.remaining(1_119, 120), Some(1));
        assert_eq!(timer.remaining(1_120, 120), None);
        assert_eq!(timer.policy_id(), "p");
    }

    #[test]
    fn test_validate_step_sign() {
        let mut spec = (*scale_out(60, false)).clone();
        assert!(spec.validate().is_ok());

        spec.step = -1;
        assert!(spec.validate().is_err());

        spec.direction = ScaleDirection::Down;
        assert!(spec.validate().is_ok());

        spec.step = 0;
        assert!(spec.validate().is_err());
    }
}
