//! Edge-triggered alert routing
//!
//! An [`AlertRoute`] watches the state of one alarm on every tick and emits a
//! notification only when that state differs from the last one it notified.
//! Repeated ALARM ticks therefore produce a single notification, and the
//! recovery to OK produces one more.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::alarm::AlarmRuleSpec;
use crate::callbacks::NotificationPublisher;
use crate::error::{ShardwatchError, ShardwatchResult};
use crate::types::{AlarmState, AlarmTransition, Comparator, Dimensions, MetricValue, Timestamp};

/// Binds one alarm's state to a notification topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRouteSpec {
    pub id: String,
    /// Rule whose state is routed
    pub alarm_id: String,
    /// Fan-out topic handed to the publisher
    pub topic: String,
    /// States that produce a notification when entered
    pub notify_on: Vec<AlarmState>,
}

impl AlertRouteSpec {
    /// Route every state change of `alarm_id` to `topic`
    pub fn new(id: &str, alarm_id: &str, topic: &str) -> Self {
        Self {
            id: id.to_string(),
            alarm_id: alarm_id.to_string(),
            topic: topic.to_string(),
            notify_on: vec![AlarmState::Alarm, AlarmState::Ok, AlarmState::InsufficientData],
        }
    }

    pub fn notify_on(mut self, states: &[AlarmState]) -> Self {
        self.notify_on = states.to_vec();
        self
    }

    pub fn validate(&self) -> ShardwatchResult<()> {
        if self.topic.is_empty() {
            return Err(ShardwatchError::invalid_rule(&self.id, "alert topic must not be empty"));
        }
        if self.notify_on.is_empty() {
            return Err(ShardwatchError::invalid_rule(&self.id, "notify_on must name at least one state"));
        }
        Ok(())
    }
}

/// Payload published for one alarm state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmNotification {
    pub route_id: String,
    pub rule_id: String,
    pub description: String,
    pub metric_name: String,
    pub dimensions: Dimensions,
    pub old_state: AlarmState,
    pub new_state: AlarmState,
    pub comparator: Comparator,
    pub threshold: MetricValue,
    /// Statistic of the most recent period with data
    pub value: Option<MetricValue>,
    pub timestamp: Timestamp,
}

/// Notification de-duplication state for one route
#[derive(Debug)]
pub struct AlertRoute {
    spec: Arc<AlertRouteSpec>,
    last_notified_state: AlarmState,
}

impl AlertRoute {
    /// New routes start from the healthy baseline, so a cold start that
    /// settles on OK stays silent.
    pub fn new(spec: Arc<AlertRouteSpec>) -> Self {
        Self {
            spec,
            last_notified_state: AlarmState::Ok,
        }
    }

    pub fn spec(&self) -> &AlertRouteSpec {
        &self.spec
    }

    pub fn last_notified_state(&self) -> AlarmState {
        self.last_notified_state
    }

    /// Build a notification if `state` is a new, routed state
    ///
    /// Marks the state as notified; delivery is at-most-once.
    pub fn observe(
        &mut self,
        rule: &AlarmRuleSpec,
        state: AlarmState,
        transition: Option<&AlarmTransition>,
        value: Option<MetricValue>,
        now: Timestamp,
    ) -> Option<AlarmNotification> {
        if state == self.last_notified_state || !self.spec.notify_on.contains(&state) {
            return None;
        }

        let old_state = transition.map_or(self.last_notified_state, |t| t.from);
        self.last_notified_state = state;

        Some(AlarmNotification {
            route_id: self.spec.id.clone(),
            rule_id: rule.id.clone(),
            description: rule.description.clone(),
            metric_name: rule.query.metric_name.clone(),
            dimensions: rule.query.dimensions.clone(),
            old_state,
            new_state: state,
            comparator: rule.comparator,
            threshold: rule.threshold,
            value,
            timestamp: now,
        })
    }

    /// Observe one tick and publish the resulting notification, if any
    ///
    /// Returns the notification together with whether the publisher accepted it.
    pub async fn dispatch(
        &mut self,
        rule: &AlarmRuleSpec,
        state: AlarmState,
        transition: Option<&AlarmTransition>,
        value: Option<MetricValue>,
        publisher: &dyn NotificationPublisher,
        now: Timestamp,
    ) -> Option<(AlarmNotification, bool)> {
        let notification = self.observe(rule, state, transition, value, now)?;

        let delivered = match publisher.publish(&self.spec.topic, &notification).await {
            Ok(()) => {
                info!(
                    route = %self.spec.id,
                    topic = %self.spec.topic,
                    rule = %notification.rule_id,
                    state = %notification.new_state,
                    "Alarm notification published"
                );
                true
            }
            Err(e) => {
                warn!(
                    route = %self.spec.id,
                    topic = %self.spec.topic,
                    rule = %notification.rule_id,
                    error = %e,
                    "Alarm notification failed, not retrying"
                );
                false
            }
        };

        Some((notification, delivered))
    }
}
