//! In-process realizations of the external interfaces
//!
//! - [`InMemoryMetricStore`]: datapoint buffer answering period statistics
//! - [`InMemoryScalingTarget`]: orchestrator stand-in that clamps adjustments
//! - [`RecordingPublisher`]: notification sink that keeps what it was sent
//!
//! Useful for simulations, tests and single-process deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::alerts::AlarmNotification;
use crate::callbacks::{MetricSource, NotificationPublisher, ScalingTarget};
use crate::error::{ShardwatchError, ShardwatchResult};
use crate::types::{CapacityBounds, Dimensions, MetricQuery, MetricValue, TargetCapacity, Timestamp};

/// One tagged datapoint
#[derive(Debug, Clone, PartialEq)]
pub struct Datapoint {
    pub metric_name: String,
    pub dimensions: Dimensions,
    pub timestamp: Timestamp,
    pub value: MetricValue,
}

/// Time-series buffer implementing [`MetricSource`]
#[derive(Debug, Default)]
pub struct InMemoryMetricStore {
    points: RwLock<Vec<Datapoint>>,
}

impl InMemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, metric_name: &str, dimensions: Dimensions, timestamp: Timestamp, value: MetricValue) {
        self.points.write().await.push(Datapoint {
            metric_name: metric_name.to_string(),
            dimensions,
            timestamp,
            value,
        });
    }

    /// Drop datapoints older than `cutoff`; returns how many were removed
    pub async fn prune_before(&self, cutoff: Timestamp) -> usize {
        let mut points = self.points.write().await;
        let before = points.len();
        points.retain(|p| p.timestamp >= cutoff);
        before - points.len()
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }
}

#[async_trait]
impl MetricSource for InMemoryMetricStore {
    async fn query(&self, query: &MetricQuery, period_end: Timestamp) -> ShardwatchResult<Option<MetricValue>> {
        let period_start = period_end.saturating_sub(query.period_seconds);
        let points = self.points.read().await;
        let values: Vec<MetricValue> = points
            .iter()
            .filter(|p| p.timestamp >= period_start && p.timestamp < period_end)
            .filter(|p| query.matches(&p.metric_name, &p.dimensions))
            .map(|p| p.value)
            .collect();

        Ok(query.statistic.apply(&values))
    }
}

/// One adjustment as seen by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustmentRecord {
    pub target_id: String,
    pub delta: i32,
    pub before: u32,
    pub after: u32,
}

/// Orchestrator stand-in: authoritative desired counts, clamped to bounds
#[derive(Debug, Default)]
pub struct InMemoryScalingTarget {
    targets: RwLock<HashMap<String, TargetCapacity>>,
    history: RwLock<Vec<AdjustmentRecord>>,
}

impl InMemoryScalingTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a target with an initial desired count
    pub async fn insert(&self, target_id: &str, current: u32, bounds: CapacityBounds) {
        self.targets.write().await.insert(
            target_id.to_string(),
            TargetCapacity {
                current: current.clamp(bounds.min, bounds.max),
                min: bounds.min,
                max: bounds.max,
            },
        );
    }

    /// Manual operator override, bypassing the engine
    pub async fn set_desired(&self, target_id: &str, desired: u32) -> ShardwatchResult<()> {
        let mut targets = self.targets.write().await;
        let capacity = targets
            .get_mut(target_id)
            .ok_or_else(|| ShardwatchError::callback_failed("set_desired", format!("unknown target '{}'", target_id)))?;
        capacity.current = desired.clamp(capacity.min, capacity.max);
        Ok(())
    }

    pub async fn capacity(&self, target_id: &str) -> Option<TargetCapacity> {
        self.targets.read().await.get(target_id).copied()
    }

    /// Every adjustment received, in arrival order
    pub async fn history(&self) -> Vec<AdjustmentRecord> {
        self.history.read().await.clone()
    }
}

#[async_trait]
impl ScalingTarget for InMemoryScalingTarget {
    async fn adjust(&self, target_id: &str, delta: i32) -> ShardwatchResult<()> {
        let mut targets = self.targets.write().await;
        let capacity = targets
            .get_mut(target_id)
            .ok_or_else(|| ShardwatchError::callback_failed("adjust", format!("unknown target '{}'", target_id)))?;

        let before = capacity.current;
        let requested = i64::from(before) + i64::from(delta);
        let after = requested.clamp(i64::from(capacity.min), i64::from(capacity.max)) as u32;
        capacity.current = after;

        debug!(target_id, delta, before, after, "Adjusted desired count");
        self.history.write().await.push(AdjustmentRecord {
            target_id: target_id.to_string(),
            delta,
            before,
            after,
        });
        Ok(())
    }

    async fn get_state(&self, target_id: &str) -> ShardwatchResult<Option<TargetCapacity>> {
        Ok(self.capacity(target_id).await)
    }

    async fn register_bounds(&self, target_id: &str, bounds: CapacityBounds) -> ShardwatchResult<()> {
        let mut targets = self.targets.write().await;
        let capacity = targets.entry(target_id.to_string()).or_insert(TargetCapacity {
            current: bounds.min,
            min: bounds.min,
            max: bounds.max,
        });
        capacity.min = bounds.min;
        capacity.max = bounds.max;
        capacity.current = capacity.current.clamp(bounds.min, bounds.max);
        Ok(())
    }
}

/// Notification sink that records every publish
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    sent: RwLock<Vec<(String, AlarmNotification)>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent publishes fail (they are still recorded as attempts)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn notifications(&self) -> Vec<(String, AlarmNotification)> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl NotificationPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, notification: &AlarmNotification) -> ShardwatchResult<()> {
        self.sent.write().await.push((topic.to_string(), notification.clone()));
        if self.failing.load(Ordering::SeqCst) {
            return Err(ShardwatchError::callback_failed("publish", format!("topic '{}' unavailable", topic)));
        }
        Ok(())
    }
}
