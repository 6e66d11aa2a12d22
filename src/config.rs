//! Controller configuration
//!
//! All options are supplied at startup and never change afterwards. The
//! controller expands them into pipeline specs once; running pipeline tasks
//! only see their own spec.

use serde::{Deserialize, Serialize};

use crate::error::{ShardwatchError, ShardwatchResult};
use crate::types::{CapacityBounds, MissingDataPolicy};

/// M-of-N window, cooldown, step and missing-data policy for one scaling direction
///
/// Each direction carries its own policy, so a scale-out rule that treats
/// missing latency as breaching never makes the scale-in rule alarm too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingWindow {
    pub evaluation_periods: usize,
    pub datapoints_to_alarm: usize,
    pub cooldown_seconds: u64,
    pub step: i32,
    #[serde(default = "not_breaching")]
    pub missing_data: MissingDataPolicy,
}

fn not_breaching() -> MissingDataPolicy {
    MissingDataPolicy::NotBreaching
}

impl ScalingWindow {
    /// Fast trigger: 2 of 2 periods, 60s cooldown, +1 replica
    pub fn scale_up() -> Self {
        Self {
            evaluation_periods: 2,
            datapoints_to_alarm: 2,
            cooldown_seconds: 60,
            step: 1,
            missing_data: MissingDataPolicy::NotBreaching,
        }
    }

    /// Sustained trigger: 5 of 5 periods, 120s cooldown, -1 replica
    pub fn scale_down() -> Self {
        Self {
            evaluation_periods: 5,
            datapoints_to_alarm: 5,
            cooldown_seconds: 120,
            step: -1,
            missing_data: MissingDataPolicy::NotBreaching,
        }
    }
}

/// Latency-driven scaling for one service kind (coordinator or shard)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceScalingConfig {
    /// p99 latency above which the service scales out
    pub p99_latency_threshold_ms: f64,
    /// p99 latency below which the service scales in
    pub scale_in_latency_threshold_ms: f64,
    pub capacity: CapacityBounds,
    pub scale_up: ScalingWindow,
    pub scale_down: ScalingWindow,
}

impl Default for ServiceScalingConfig {
    fn default() -> Self {
        Self {
            p99_latency_threshold_ms: 250.0,
            scale_in_latency_threshold_ms: 60.0,
            capacity: CapacityBounds::default(),
            scale_up: ScalingWindow::scale_up(),
            scale_down: ScalingWindow::scale_down(),
        }
    }
}

/// Per-shard replication lag alarm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationLagConfig {
    pub threshold_ms: f64,
    pub evaluation_periods: usize,
    pub datapoints_to_alarm: usize,
    pub missing_data: MissingDataPolicy,
}

impl Default for ReplicationLagConfig {
    fn default() -> Self {
        Self {
            threshold_ms: 1_000.0,
            evaluation_periods: 3,
            datapoints_to_alarm: 2,
            missing_data: MissingDataPolicy::NotBreaching,
        }
    }
}

/// Liveness alarm over a presence metric (heartbeat, leader presence)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub enabled: bool,
    pub evaluation_periods: usize,
    pub datapoints_to_alarm: usize,
    pub missing_data: MissingDataPolicy,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            evaluation_periods: 2,
            datapoints_to_alarm: 2,
            missing_data: MissingDataPolicy::Breaching,
        }
    }
}

/// Cluster-wide aggregate alarms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterAlarmConfig {
    /// Worst replication lag across all shards
    pub replication_lag_threshold_ms: f64,
    /// 5xx responses summed across all shards in one period
    pub error_5xx_threshold: f64,
    pub evaluation_periods: usize,
    pub datapoints_to_alarm: usize,
    pub missing_data: MissingDataPolicy,
}

impl Default for ClusterAlarmConfig {
    fn default() -> Self {
        Self {
            replication_lag_threshold_ms: 5_000.0,
            error_5xx_threshold: 10.0,
            evaluation_periods: 3,
            datapoints_to_alarm: 2,
            missing_data: MissingDataPolicy::NotBreaching,
        }
    }
}

/// Main configuration for the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Value of the `Cluster` dimension on every query
    pub cluster_name: String,
    /// Number of per-shard pipeline sets
    pub shard_count: u32,
    /// Shard names are `{prefix}{index}`
    pub shard_name_prefix: String,
    /// Value of the `Service` dimension for shard metrics
    pub shard_service: String,
    /// Value of the `Service` dimension for coordinator metrics; also its scaling target id
    pub coordinator_service: String,
    /// Topic every alert route publishes to
    pub alert_topic: String,
    /// Metric period and poll interval (seconds)
    pub period_seconds: u64,
    /// Bound on one metric query; a timeout counts as missing data
    pub query_timeout_seconds: u64,
    /// Bound on draining in-flight ticks at shutdown
    pub shutdown_timeout_seconds: u64,
    pub coordinator: ServiceScalingConfig,
    pub shard: ServiceScalingConfig,
    pub replication_lag: ReplicationLagConfig,
    pub heartbeat: LivenessConfig,
    pub leader: LivenessConfig,
    pub cluster: ClusterAlarmConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cluster_name: "sharded-kv".to_string(),
            shard_count: 3,
            shard_name_prefix: "shard-".to_string(),
            shard_service: "shard".to_string(),
            coordinator_service: "coordinator".to_string(),
            alert_topic: "sharded-kv-alerts".to_string(),
            period_seconds: 60,
            query_timeout_seconds: 10,
            shutdown_timeout_seconds: 30,
            coordinator: ServiceScalingConfig {
                p99_latency_threshold_ms: 400.0,
                scale_in_latency_threshold_ms: 100.0,
                capacity: CapacityBounds { min: 1, max: 4 },
                ..ServiceScalingConfig::default()
            },
            shard: ServiceScalingConfig::default(),
            replication_lag: ReplicationLagConfig::default(),
            heartbeat: LivenessConfig::default(),
            leader: LivenessConfig::default(),
            cluster: ClusterAlarmConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn builder() -> ControllerConfigBuilder {
        ControllerConfigBuilder::new()
    }

    /// Parse a TOML document; unspecified options keep their defaults
    #[cfg(feature = "config-toml")]
    pub fn from_toml_str(content: &str) -> ShardwatchResult<Self> {
        let config: ControllerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    #[cfg(feature = "config-toml")]
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> ShardwatchResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Names of all shards, `shard-0` .. `shard-{n-1}` by default
    pub fn shard_names(&self) -> Vec<String> {
        (0..self.shard_count)
            .map(|i| format!("{}{}", self.shard_name_prefix, i))
            .collect()
    }

    /// Reject any configuration the engine must not run with
    pub fn validate(&self) -> ShardwatchResult<()> {
        if self.shard_count == 0 {
            return Err(ShardwatchError::config("shard_count must be at least 1"));
        }
        if self.period_seconds == 0 {
            return Err(ShardwatchError::config("period_seconds must be at least 1"));
        }
        if self.query_timeout_seconds == 0 {
            return Err(ShardwatchError::config("query_timeout_seconds must be at least 1"));
        }
        if self.cluster_name.is_empty() || self.alert_topic.is_empty() {
            return Err(ShardwatchError::config("cluster_name and alert_topic must not be empty"));
        }

        validate_service("coordinator", &self.coordinator)?;
        validate_service("shard", &self.shard)?;

        validate_threshold("replication_lag.threshold_ms", self.replication_lag.threshold_ms)?;
        validate_window(
            "replication_lag",
            self.replication_lag.evaluation_periods,
            self.replication_lag.datapoints_to_alarm,
        )?;
        validate_window(
            "heartbeat",
            self.heartbeat.evaluation_periods,
            self.heartbeat.datapoints_to_alarm,
        )?;
        validate_window("leader", self.leader.evaluation_periods, self.leader.datapoints_to_alarm)?;

        validate_threshold(
            "cluster.replication_lag_threshold_ms",
            self.cluster.replication_lag_threshold_ms,
        )?;
        validate_threshold("cluster.error_5xx_threshold", self.cluster.error_5xx_threshold)?;
        validate_window(
            "cluster",
            self.cluster.evaluation_periods,
            self.cluster.datapoints_to_alarm,
        )?;

        Ok(())
    }
}

fn validate_service(name: &str, service: &ServiceScalingConfig) -> ShardwatchResult<()> {
    validate_threshold(&format!("{}.p99_latency_threshold_ms", name), service.p99_latency_threshold_ms)?;
    validate_threshold(
        &format!("{}.scale_in_latency_threshold_ms", name),
        service.scale_in_latency_threshold_ms,
    )?;
    if service.scale_in_latency_threshold_ms >= service.p99_latency_threshold_ms {
        return Err(ShardwatchError::config(format!(
            "{}: scale-in latency threshold ({}) must be below the scale-out threshold ({})",
            name, service.scale_in_latency_threshold_ms, service.p99_latency_threshold_ms
        )));
    }
    if service.capacity.min > service.capacity.max {
        return Err(ShardwatchError::config(format!(
            "{}: min_capacity ({}) exceeds max_capacity ({})",
            name, service.capacity.min, service.capacity.max
        )));
    }

    let up = &service.scale_up;
    validate_window(&format!("{}.scale_up", name), up.evaluation_periods, up.datapoints_to_alarm)?;
    if up.step <= 0 {
        return Err(ShardwatchError::config(format!("{}.scale_up.step must be positive", name)));
    }

    let down = &service.scale_down;
    validate_window(&format!("{}.scale_down", name), down.evaluation_periods, down.datapoints_to_alarm)?;
    if down.step >= 0 {
        return Err(ShardwatchError::config(format!("{}.scale_down.step must be negative", name)));
    }

    // Both rules would alarm on the same gap and issue opposite adjustments
    if up.missing_data == MissingDataPolicy::Breaching && down.missing_data == MissingDataPolicy::Breaching {
        return Err(ShardwatchError::config(format!(
            "{}: scale_up and scale_down cannot both treat missing data as breaching",
            name
        )));
    }

    Ok(())
}

fn validate_window(name: &str, evaluation_periods: usize, datapoints_to_alarm: usize) -> ShardwatchResult<()> {
    if evaluation_periods == 0 || datapoints_to_alarm == 0 {
        return Err(ShardwatchError::config(format!(
            "{}: evaluation_periods and datapoints_to_alarm must be at least 1",
            name
        )));
    }
    if datapoints_to_alarm > evaluation_periods {
        return Err(ShardwatchError::config(format!(
            "{}: datapoints_to_alarm ({}) exceeds evaluation_periods ({})",
            name, datapoints_to_alarm, evaluation_periods
        )));
    }
    Ok(())
}

fn validate_threshold(name: &str, value: f64) -> ShardwatchResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ShardwatchError::config(format!("{} must be a positive number", name)));
    }
    Ok(())
}

/// Builder for creating controller configurations easily
#[derive(Debug)]
pub struct ControllerConfigBuilder {
    config: ControllerConfig,
}

impl ControllerConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ControllerConfig::default(),
        }
    }

    pub fn cluster_name(mut self, name: &str) -> Self {
        self.config.cluster_name = name.to_string();
        self
    }

    pub fn shard_count(mut self, count: u32) -> Self {
        self.config.shard_count = count;
        self
    }

    pub fn alert_topic(mut self, topic: &str) -> Self {
        self.config.alert_topic = topic.to_string();
        self
    }

    pub fn period_seconds(mut self, seconds: u64) -> Self {
        self.config.period_seconds = seconds;
        self
    }

    pub fn query_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.query_timeout_seconds = seconds;
        self
    }

    pub fn shutdown_timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.shutdown_timeout_seconds = seconds;
        self
    }

    pub fn coordinator(mut self, service: ServiceScalingConfig) -> Self {
        self.config.coordinator = service;
        self
    }

    pub fn shard(mut self, service: ServiceScalingConfig) -> Self {
        self.config.shard = service;
        self
    }

    pub fn shard_capacity(mut self, min: u32, max: u32) -> Self {
        self.config.shard.capacity = CapacityBounds { min, max };
        self
    }

    pub fn shard_latency_thresholds(mut self, scale_out_ms: f64, scale_in_ms: f64) -> Self {
        self.config.shard.p99_latency_threshold_ms = scale_out_ms;
        self.config.shard.scale_in_latency_threshold_ms = scale_in_ms;
        self
    }

    pub fn replication_lag_threshold_ms(mut self, threshold_ms: f64) -> Self {
        self.config.replication_lag.threshold_ms = threshold_ms;
        self
    }

    pub fn heartbeat(mut self, heartbeat: LivenessConfig) -> Self {
        self.config.heartbeat = heartbeat;
        self
    }

    pub fn leader(mut self, leader: LivenessConfig) -> Self {
        self.config.leader = leader;
        self
    }

    pub fn cluster(mut self, cluster: ClusterAlarmConfig) -> Self {
        self.config.cluster = cluster;
        self
    }

    pub fn build(self) -> ControllerConfig {
        self.config
    }
}

impl Default for ControllerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
