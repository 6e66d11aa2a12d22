// src/callbacks.rs

use async_trait::async_trait;
use std::sync::Arc;

use crate::alerts::AlarmNotification;
use crate::error::{ShardwatchError, ShardwatchResult};
use crate::scaling::ScalingAction;
use crate::types::{AlarmTransition, CapacityBounds, MetricQuery, MetricValue, TargetCapacity, Timestamp};

/// Trait for reading period statistics from a telemetry backend
///
/// Implement this to connect the engine to your monitoring system.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Compute `query.statistic` over the period `[period_end - period, period_end)`
    ///
    /// # Returns
    /// * `Ok(Some(value))` - The period had datapoints
    /// * `Ok(None)` - No datapoint in the period
    /// * `Err(error)` - The backend failed; the engine treats this as missing data
    async fn query(
        &self,
        query: &MetricQuery,
        period_end: Timestamp,
    ) -> ShardwatchResult<Option<MetricValue>>;
}

/// Trait for issuing relative replica-count adjustments
///
/// The orchestrator behind this trait is authoritative: it clamps to the
/// target's bounds and serializes concurrent requests. The engine never
/// assumes the resulting count.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScalingTarget: Send + Sync {
    /// Request a relative change of the desired replica count
    ///
    /// # Returns
    /// * `Ok(())` - Request accepted (it may still have been clamped)
    /// * `Err(error)` - Request rejected or transport failed
    async fn adjust(&self, target_id: &str, delta: i32) -> ShardwatchResult<()>;

    /// Read the current desired count and bounds. Advisory only.
    async fn get_state(&self, _target_id: &str) -> ShardwatchResult<Option<TargetCapacity>> {
        Ok(None)
    }

    /// Pass the configured clamp bounds for a target to the orchestrator
    ///
    /// Called once per target when the controller starts.
    async fn register_bounds(
        &self,
        _target_id: &str,
        _bounds: CapacityBounds,
    ) -> ShardwatchResult<()> {
        Ok(())
    }
}

/// Trait for the notification fan-out channel
///
/// Fire-and-forget: the engine logs failures and never retries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, topic: &str, notification: &AlarmNotification) -> ShardwatchResult<()>;
}

/// Trait for receiving engine events
///
/// Implement this to get notified about alarm transitions and scaling
/// decisions. Useful for self-metrics, audit logs or custom business logic.
#[async_trait]
pub trait ControllerObserver: Send + Sync {
    /// Called when an alarm changes state
    async fn on_transition(&self, _transition: &AlarmTransition) -> ShardwatchResult<()> {
        Ok(())
    }

    /// Called after an adjustment request was accepted by the scaling target
    async fn on_scaling_executed(&self, _action: &ScalingAction) -> ShardwatchResult<()> {
        Ok(())
    }

    /// Called when an adjustment is dropped (e.g. due to cooldown)
    async fn on_scaling_skipped(
        &self,
        _action: &ScalingAction,
        _reason: &str,
    ) -> ShardwatchResult<()> {
        Ok(())
    }

    /// Called when the scaling target rejected an adjustment
    async fn on_scaling_error(
        &self,
        _action: &ScalingAction,
        _error: &ShardwatchError,
    ) -> ShardwatchResult<()> {
        Ok(())
    }

    /// Called after a notification was handed to the publisher
    async fn on_notification(
        &self,
        _notification: &AlarmNotification,
        _delivered: bool,
    ) -> ShardwatchResult<()> {
        Ok(())
    }
}

/// Combine all callbacks into a single struct for easier management
#[derive(Clone)]
pub struct ControllerCallbacks {
    pub metric_source: Arc<dyn MetricSource>,
    pub scaling_target: Arc<dyn ScalingTarget>,
    pub publisher: Arc<dyn NotificationPublisher>,
    pub observers: Vec<Arc<dyn ControllerObserver>>,
}

impl ControllerCallbacks {
    /// Create a new callback configuration
    pub fn new(
        metric_source: Arc<dyn MetricSource>,
        scaling_target: Arc<dyn ScalingTarget>,
        publisher: Arc<dyn NotificationPublisher>,
    ) -> Self {
        Self {
            metric_source,
            scaling_target,
            publisher,
            observers: Vec::new(),
        }
    }

    /// Add an observer to receive engine events
    pub fn add_observer(mut self, observer: Arc<dyn ControllerObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Add multiple observers at once
    pub fn add_observers(mut self, observers: Vec<Arc<dyn ControllerObserver>>) -> Self {
        self.observers.extend(observers);
        self
    }
}
