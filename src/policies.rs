//! Convenience builders for the common alarm rules, scaling policies and alert routes

use crate::alarm::AlarmRuleSpec;
use crate::alerts::AlertRouteSpec;
use crate::config::ScalingWindow;
use crate::scaling::ScalingPolicySpec;
use crate::types::{
    AlarmState, Comparator, MetricQuery, MetricValue, MissingDataPolicy, ScaleDirection, Statistic,
};

/// Per-request latency, emitted by coordinator and shards
pub const LATENCY_METRIC: &str = "RequestLatencyMs";
/// Follower lag behind the shard leader
pub const REPLICATION_LAG_METRIC: &str = "ReplicationLagMs";
/// One datapoint per replica keepalive tick
pub const HEARTBEAT_METRIC: &str = "Heartbeat";
/// 1.0 while the coordinator knows a leader for the shard
pub const LEADER_PRESENT_METRIC: &str = "LeaderPresent";
/// Server error responses
pub const ERRORS_5XX_METRIC: &str = "Request5xx";

pub const CLUSTER_DIMENSION: &str = "Cluster";
pub const SERVICE_DIMENSION: &str = "Service";
pub const SHARD_DIMENSION: &str = "Shard";

/// p99 latency above `threshold_ms` over the given window
pub fn latency_high_rule(
    id: &str,
    query: MetricQuery,
    threshold_ms: MetricValue,
    window: &ScalingWindow,
) -> AlarmRuleSpec {
    AlarmRuleSpec {
        id: id.to_string(),
        description: format!("p99 {} above {}ms", query.metric_name, threshold_ms),
        query,
        comparator: Comparator::GreaterThan,
        threshold: threshold_ms,
        evaluation_periods: window.evaluation_periods,
        datapoints_to_alarm: window.datapoints_to_alarm,
        missing_data: window.missing_data,
    }
}

/// p99 latency below `threshold_ms` over the given window
pub fn latency_low_rule(
    id: &str,
    query: MetricQuery,
    threshold_ms: MetricValue,
    window: &ScalingWindow,
) -> AlarmRuleSpec {
    AlarmRuleSpec {
        id: id.to_string(),
        description: format!("p99 {} below {}ms", query.metric_name, threshold_ms),
        query,
        comparator: Comparator::LessThan,
        threshold: threshold_ms,
        evaluation_periods: window.evaluation_periods,
        datapoints_to_alarm: window.datapoints_to_alarm,
        missing_data: window.missing_data,
    }
}

/// Generic threshold rule
#[allow(clippy::too_many_arguments)]
pub fn threshold_rule(
    id: &str,
    description: &str,
    query: MetricQuery,
    comparator: Comparator,
    threshold: MetricValue,
    evaluation_periods: usize,
    datapoints_to_alarm: usize,
    missing_data: MissingDataPolicy,
) -> AlarmRuleSpec {
    AlarmRuleSpec {
        id: id.to_string(),
        description: description.to_string(),
        query,
        comparator,
        threshold,
        evaluation_periods,
        datapoints_to_alarm,
        missing_data,
    }
}

/// Presence rule: ALARM when the summed presence metric drops below 1,
/// including when it stops arriving (with `missing_data = breaching`).
pub fn liveness_rule(
    id: &str,
    description: &str,
    query: MetricQuery,
    evaluation_periods: usize,
    datapoints_to_alarm: usize,
    missing_data: MissingDataPolicy,
) -> AlarmRuleSpec {
    threshold_rule(
        id,
        description,
        query,
        Comparator::LessThan,
        1.0,
        evaluation_periods,
        datapoints_to_alarm,
        missing_data,
    )
}

/// Scale-out policy driven by `alarm_id`, re-checked while the alarm persists
pub fn scale_out_policy(id: &str, alarm_id: &str, target_id: &str, window: &ScalingWindow) -> ScalingPolicySpec {
    ScalingPolicySpec {
        id: id.to_string(),
        alarm_id: alarm_id.to_string(),
        target_id: target_id.to_string(),
        direction: ScaleDirection::Up,
        step: window.step,
        cooldown_seconds: window.cooldown_seconds,
        reevaluate_while_alarm: true,
    }
}

/// Scale-in policy driven by `alarm_id`, re-checked while the alarm persists
pub fn scale_in_policy(id: &str, alarm_id: &str, target_id: &str, window: &ScalingWindow) -> ScalingPolicySpec {
    ScalingPolicySpec {
        id: id.to_string(),
        alarm_id: alarm_id.to_string(),
        target_id: target_id.to_string(),
        direction: ScaleDirection::Down,
        step: window.step,
        cooldown_seconds: window.cooldown_seconds,
        reevaluate_while_alarm: true,
    }
}

/// Route ALARM and recovery (OK) changes of `alarm_id` to `topic`
///
/// INSUFFICIENT_DATA is left out so a cold start stays quiet.
pub fn alert_route(alarm_id: &str, topic: &str) -> AlertRouteSpec {
    AlertRouteSpec::new(&format!("{}-alert", alarm_id), alarm_id, topic)
        .notify_on(&[AlarmState::Alarm, AlarmState::Ok])
}

/// p99 latency query for one service, optionally narrowed to one shard
pub fn latency_query(cluster: &str, service: &str, shard: Option<&str>, period_seconds: u64) -> MetricQuery {
    let query = MetricQuery::new(LATENCY_METRIC, Statistic::Percentile(99.0), period_seconds)
        .with_dimension(CLUSTER_DIMENSION, cluster)
        .with_dimension(SERVICE_DIMENSION, service);
    match shard {
        Some(shard) => query.with_dimension(SHARD_DIMENSION, shard),
        None => query,
    }
}
