//! # Shardwatch - Alarm-Driven Autoscaling for Sharded Services
//!
//! Shardwatch evaluates threshold alarms over periodic metric statistics and
//! turns their state changes into bounded replica-count adjustments and
//! de-duplicated notifications. It targets a sharded key-value fleet (one
//! coordinator, N shards, one cluster-wide view) but every piece works on its
//! own through type-safe callbacks.
//!
//! ## 🎯 Core Model
//!
//! - **Alarms**: M-of-N evaluation over a sliding window of periods, with a
//!   per-rule missing-data policy and three states (`OK`, `ALARM`,
//!   `INSUFFICIENT_DATA`)
//! - **Scaling policies**: one per direction, relative deltas only, each with
//!   its own cooldown
//! - **Alert routes**: edge-triggered, one notification per state change
//! - **Controller**: one independent task per alarm, graceful shutdown
//!
//! ## 📊 Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              Controller                              │
//! │   one task per pipeline: coordinator • shard-0..N-1 • cluster        │
//! ├──────────────────────┬──────────────────────┬────────────────────────┤
//! │   AlarmEvaluator     │ ScalingPolicyEngine  │      AlertRoute        │
//! │                      │                      │                        │
//! │ • period statistic   │ • ALARM → delta      │ • state-change edge    │
//! │ • M-of-N window      │ • cooldown timer     │ • notify_on filter     │
//! │ • missing-data rule  │ • up/down separate   │ • fire-and-forget      │
//! └──────────┬───────────┴──────────┬───────────┴───────────┬────────────┘
//!            │                      │                       │
//!   ┌────────▼───────┐    ┌─────────▼────────┐    ┌─────────▼─────────────┐
//!   │  MetricSource  │    │  ScalingTarget   │    │ NotificationPublisher │
//!   └────────────────┘    └──────────────────┘    └───────────────────────┘
//! ```
//!
//! ## 🚀 Quick Start
//!
//! ```rust,no_run
//! use shardwatch::{
//!     Controller, ControllerCallbacks, ControllerConfig,
//!     InMemoryMetricStore, InMemoryScalingTarget, RecordingPublisher,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> shardwatch::ShardwatchResult<()> {
//!     // 1. Describe the fleet
//!     let config = ControllerConfig::builder()
//!         .cluster_name("sharded-kv")
//!         .shard_count(4)
//!         .shard_latency_thresholds(250.0, 60.0)
//!         .build();
//!
//!     // 2. Plug in your infrastructure
//!     let callbacks = ControllerCallbacks::new(
//!         Arc::new(InMemoryMetricStore::new()),
//!         Arc::new(InMemoryScalingTarget::new()),
//!         Arc::new(RecordingPublisher::new()),
//!     );
//!
//!     // 3. Run until shutdown
//!     let controller = Controller::new(config, callbacks)?;
//!     let handle = controller.handle();
//!     let running = tokio::spawn(controller.start());
//!
//!     let status = handle.get_status().await?;
//!     println!("{} pipelines running", status.pipelines);
//!
//!     handle.shutdown().await?;
//!     let _ = running.await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `config-toml` (default): load [`ControllerConfig`] from TOML
//! - `webhook`: [`WebhookPublisher`] posting notifications over HTTP
//! - `prometheus-metrics`: [`PrometheusObserver`] exporting engine activity

pub mod error;
pub mod utils;
pub mod types;
pub mod callbacks;
pub mod alarm;
pub mod scaling;
pub mod alerts;
pub mod pipeline;
pub mod policies;
pub mod config;
pub mod topology;
pub mod controller;
pub mod memory;
#[cfg(feature = "webhook")]
pub mod webhook;
#[cfg(feature = "prometheus-metrics")]
pub mod metrics;

#[cfg(test)]
mod tests;

// Re-export common types for convenience
pub use types::{
    AlarmState, AlarmTransition, CapacityBounds, Comparator, Dimensions, MetricQuery,
    MetricValue, MissingDataPolicy, PeriodSample, ScaleDirection, Statistic, TargetCapacity,
    Timestamp,
};

pub use error::{ShardwatchError, ShardwatchResult};

pub use callbacks::{
    ControllerCallbacks, ControllerObserver, MetricSource, NotificationPublisher, ScalingTarget,
};

pub use alarm::{AlarmEvaluator, AlarmRuleSpec};
pub use scaling::{CooldownTimer, ScalingAction, ScalingOutcome, ScalingPolicyEngine, ScalingPolicySpec};
pub use alerts::{AlarmNotification, AlertRoute, AlertRouteSpec};
pub use pipeline::{PipelineScope, PipelineSpec, RulePipeline, TickReport};

pub use config::{
    ClusterAlarmConfig, ControllerConfig, ControllerConfigBuilder, LivenessConfig,
    ReplicationLagConfig, ScalingWindow, ServiceScalingConfig,
};

pub use topology::{build_fleet, PipelineTemplate};

pub use controller::{AlarmSnapshot, Controller, ControllerHandle, ControllerStatus};

pub use memory::{InMemoryMetricStore, InMemoryScalingTarget, RecordingPublisher};

#[cfg(feature = "webhook")]
pub use webhook::WebhookPublisher;

#[cfg(feature = "prometheus-metrics")]
pub use metrics::PrometheusObserver;
