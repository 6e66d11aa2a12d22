//! Prometheus self-metrics for the controller

use async_trait::async_trait;
use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::alerts::AlarmNotification;
use crate::callbacks::ControllerObserver;
use crate::error::{ShardwatchError, ShardwatchResult};
use crate::scaling::ScalingAction;
use crate::types::{AlarmState, AlarmTransition};

const ALL_STATES: [AlarmState; 3] = [AlarmState::Ok, AlarmState::Alarm, AlarmState::InsufficientData];

/// [`ControllerObserver`] that exports engine activity as Prometheus metrics
#[derive(Clone)]
pub struct PrometheusObserver {
    registry: Registry,
    transitions: IntCounterVec,
    alarm_state: IntGaugeVec,
    scaling_actions: IntCounterVec,
    notifications: IntCounterVec,
}

impl PrometheusObserver {
    /// Register all collectors in a fresh registry
    pub fn new() -> ShardwatchResult<Self> {
        Self::with_registry(Registry::new())
    }

    /// Register all collectors in an existing registry
    pub fn with_registry(registry: Registry) -> ShardwatchResult<Self> {
        let transitions = IntCounterVec::new(
            Opts::new("shardwatch_alarm_transitions_total", "Alarm state transitions"),
            &["rule", "to"],
        )?;
        let alarm_state = IntGaugeVec::new(
            Opts::new("shardwatch_alarm_state", "1 for the current state of each alarm"),
            &["rule", "state"],
        )?;
        let scaling_actions = IntCounterVec::new(
            Opts::new("shardwatch_scaling_actions_total", "Scaling decisions by outcome"),
            &["target", "direction", "outcome"],
        )?;
        let notifications = IntCounterVec::new(
            Opts::new("shardwatch_notifications_total", "Alarm notifications by delivery result"),
            &["rule", "delivered"],
        )?;

        registry.register(Box::new(transitions.clone()))?;
        registry.register(Box::new(alarm_state.clone()))?;
        registry.register(Box::new(scaling_actions.clone()))?;
        registry.register(Box::new(notifications.clone()))?;

        Ok(Self {
            registry,
            transitions,
            alarm_state,
            scaling_actions,
            notifications,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every collector in the text exposition format
    pub fn gather_text(&self) -> ShardwatchResult<String> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }

    fn count_action(&self, action: &ScalingAction, outcome: &str) {
        let direction = action.direction.to_string();
        self.scaling_actions
            .with_label_values(&[action.target_id.as_str(), direction.as_str(), outcome])
            .inc();
    }
}

#[async_trait]
impl ControllerObserver for PrometheusObserver {
    async fn on_transition(&self, transition: &AlarmTransition) -> ShardwatchResult<()> {
        let to = transition.to.to_string();
        self.transitions
            .with_label_values(&[transition.rule_id.as_str(), to.as_str()])
            .inc();

        for state in ALL_STATES {
            let label = state.to_string();
            self.alarm_state
                .with_label_values(&[transition.rule_id.as_str(), label.as_str()])
                .set(i64::from(state == transition.to));
        }
        Ok(())
    }

    async fn on_scaling_executed(&self, action: &ScalingAction) -> ShardwatchResult<()> {
        self.count_action(action, "executed");
        Ok(())
    }

    async fn on_scaling_skipped(&self, action: &ScalingAction, _reason: &str) -> ShardwatchResult<()> {
        self.count_action(action, "skipped");
        Ok(())
    }

    async fn on_scaling_error(&self, action: &ScalingAction, _error: &ShardwatchError) -> ShardwatchResult<()> {
        self.count_action(action, "failed");
        Ok(())
    }

    async fn on_notification(&self, notification: &AlarmNotification, delivered: bool) -> ShardwatchResult<()> {
        let delivered = if delivered { "true" } else { "false" };
        self.notifications
            .with_label_values(&[notification.rule_id.as_str(), delivered])
            .inc();
        Ok(())
    }
}
