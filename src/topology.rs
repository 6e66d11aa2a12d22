//! Fleet topology: which pipelines exist for a given configuration
//!
//! Shard pipelines come from one template set written against the
//! `{shard}` placeholder. Instantiating a template substitutes the shard
//! name into rule, policy and route identities, scaling targets and
//! dimension values, so every shard gets structurally identical but fully
//! independent pipelines. The coordinator and the cluster-wide aggregates
//! are built directly.

use std::collections::HashSet;

use crate::config::ControllerConfig;
use crate::error::{ShardwatchError, ShardwatchResult};
use crate::pipeline::{PipelineScope, PipelineSpec};
use crate::policies::{
    self, CLUSTER_DIMENSION, ERRORS_5XX_METRIC, HEARTBEAT_METRIC, LEADER_PRESENT_METRIC,
    REPLICATION_LAG_METRIC, SERVICE_DIMENSION, SHARD_DIMENSION,
};
use crate::types::{CapacityBounds, Comparator, MetricQuery, Statistic};

/// Placeholder replaced by the shard name when a template is instantiated
pub const SHARD_PLACEHOLDER: &str = "{shard}";

/// A pipeline written against [`SHARD_PLACEHOLDER`]
#[derive(Debug, Clone)]
pub struct PipelineTemplate {
    spec: PipelineSpec,
}

impl PipelineTemplate {
    pub fn new(spec: PipelineSpec) -> Self {
        Self { spec }
    }

    pub fn rule_id(&self) -> &str {
        &self.spec.rule.id
    }

    /// Produce the concrete pipeline for one shard
    pub fn instantiate(&self, shard: &str) -> PipelineSpec {
        let sub = |s: &str| s.replace(SHARD_PLACEHOLDER, shard);
        let mut spec = self.spec.clone();

        spec.scope = PipelineScope::Shard(shard.to_string());
        spec.rule.id = sub(&spec.rule.id);
        spec.rule.description = sub(&spec.rule.description);
        for value in spec.rule.query.dimensions.values_mut() {
            *value = sub(value);
        }
        for policy in &mut spec.policies {
            policy.id = sub(&policy.id);
            policy.alarm_id = sub(&policy.alarm_id);
            policy.target_id = sub(&policy.target_id);
        }
        for route in &mut spec.routes {
            route.id = sub(&route.id);
            route.alarm_id = sub(&route.alarm_id);
        }

        spec
    }
}

/// The per-shard rule set
pub fn shard_templates(config: &ControllerConfig) -> Vec<PipelineTemplate> {
    let shard = &config.shard;
    let period = config.period_seconds;
    let topic = &config.alert_topic;
    let placeholder = SHARD_PLACEHOLDER;

    let shard_query = |metric: &str, statistic: Statistic| {
        MetricQuery::new(metric, statistic, period)
            .with_dimension(CLUSTER_DIMENSION, &config.cluster_name)
            .with_dimension(SERVICE_DIMENSION, &config.shard_service)
            .with_dimension(SHARD_DIMENSION, placeholder)
    };

    let mut templates = Vec::new();

    let high_id = format!("{}-latency-high", placeholder);
    templates.push(
        PipelineSpec::new(
            PipelineScope::Shard(placeholder.to_string()),
            policies::latency_high_rule(
                &high_id,
                policies::latency_query(&config.cluster_name, &config.shard_service, Some(placeholder), period),
                shard.p99_latency_threshold_ms,
                &shard.scale_up,
            ),
        )
        .with_policy(policies::scale_out_policy(
            &format!("{}-scale-out", placeholder),
            &high_id,
            placeholder,
            &shard.scale_up,
        ))
        .with_route(policies::alert_route(&high_id, topic)),
    );

    let low_id = format!("{}-latency-low", placeholder);
    templates.push(
        PipelineSpec::new(
            PipelineScope::Shard(placeholder.to_string()),
            policies::latency_low_rule(
                &low_id,
                policies::latency_query(&config.cluster_name, &config.shard_service, Some(placeholder), period),
                shard.scale_in_latency_threshold_ms,
                &shard.scale_down,
            ),
        )
        .with_policy(policies::scale_in_policy(
            &format!("{}-scale-in", placeholder),
            &low_id,
            placeholder,
            &shard.scale_down,
        )),
    );

    let lag = &config.replication_lag;
    let lag_id = format!("{}-replication-lag", placeholder);
    templates.push(
        PipelineSpec::new(
            PipelineScope::Shard(placeholder.to_string()),
            policies::threshold_rule(
                &lag_id,
                &format!("{} replication lag above {}ms", placeholder, lag.threshold_ms),
                shard_query(REPLICATION_LAG_METRIC, Statistic::Maximum),
                Comparator::GreaterThan,
                lag.threshold_ms,
                lag.evaluation_periods,
                lag.datapoints_to_alarm,
                lag.missing_data,
            ),
        )
        .with_route(policies::alert_route(&lag_id, topic)),
    );

    if config.heartbeat.enabled {
        let hb = &config.heartbeat;
        let hb_id = format!("{}-heartbeat", placeholder);
        templates.push(
            PipelineSpec::new(
                PipelineScope::Shard(placeholder.to_string()),
                policies::liveness_rule(
                    &hb_id,
                    &format!("{} stopped sending heartbeats", placeholder),
                    shard_query(HEARTBEAT_METRIC, Statistic::Sum),
                    hb.evaluation_periods,
                    hb.datapoints_to_alarm,
                    hb.missing_data,
                ),
            )
            .with_route(policies::alert_route(&hb_id, topic)),
        );
    }

    if config.leader.enabled {
        let leader = &config.leader;
        let leader_id = format!("{}-leader-present", placeholder);
        // Leader presence is reported by the coordinator, tagged with the shard
        let query = MetricQuery::new(LEADER_PRESENT_METRIC, Statistic::Minimum, period)
            .with_dimension(CLUSTER_DIMENSION, &config.cluster_name)
            .with_dimension(SERVICE_DIMENSION, &config.coordinator_service)
            .with_dimension(SHARD_DIMENSION, placeholder);
        templates.push(
            PipelineSpec::new(
                PipelineScope::Shard(placeholder.to_string()),
                policies::liveness_rule(
                    &leader_id,
                    &format!("{} has no elected leader", placeholder),
                    query,
                    leader.evaluation_periods,
                    leader.datapoints_to_alarm,
                    leader.missing_data,
                ),
            )
            .with_route(policies::alert_route(&leader_id, topic)),
        );
    }

    templates.into_iter().map(PipelineTemplate::new).collect()
}

/// Latency scaling pipelines for the coordinator
pub fn coordinator_pipelines(config: &ControllerConfig) -> Vec<PipelineSpec> {
    let coordinator = &config.coordinator;
    let service = &config.coordinator_service;
    let query = policies::latency_query(&config.cluster_name, service, None, config.period_seconds);

    let high_id = format!("{}-latency-high", service);
    let low_id = format!("{}-latency-low", service);

    vec![
        PipelineSpec::new(
            PipelineScope::Coordinator,
            policies::latency_high_rule(
                &high_id,
                query.clone(),
                coordinator.p99_latency_threshold_ms,
                &coordinator.scale_up,
            ),
        )
        .with_policy(policies::scale_out_policy(
            &format!("{}-scale-out", service),
            &high_id,
            service,
            &coordinator.scale_up,
        ))
        .with_route(policies::alert_route(&high_id, &config.alert_topic)),
        PipelineSpec::new(
            PipelineScope::Coordinator,
            policies::latency_low_rule(
                &low_id,
                query,
                coordinator.scale_in_latency_threshold_ms,
                &coordinator.scale_down,
            ),
        )
        .with_policy(policies::scale_in_policy(
            &format!("{}-scale-in", service),
            &low_id,
            service,
            &coordinator.scale_down,
        )),
    ]
}

/// Alert-only aggregates across every shard
pub fn cluster_pipelines(config: &ControllerConfig) -> Vec<PipelineSpec> {
    let cluster = &config.cluster;
    let fleet_query = |metric: &str, statistic: Statistic| {
        MetricQuery::new(metric, statistic, config.period_seconds)
            .with_dimension(CLUSTER_DIMENSION, &config.cluster_name)
            .with_dimension(SERVICE_DIMENSION, &config.shard_service)
    };

    let lag_id = "cluster-replication-lag";
    let errors_id = "cluster-5xx";

    vec![
        PipelineSpec::new(
            PipelineScope::Cluster,
            policies::threshold_rule(
                lag_id,
                &format!("worst replication lag above {}ms", cluster.replication_lag_threshold_ms),
                fleet_query(REPLICATION_LAG_METRIC, Statistic::Maximum),
                Comparator::GreaterThan,
                cluster.replication_lag_threshold_ms,
                cluster.evaluation_periods,
                cluster.datapoints_to_alarm,
                cluster.missing_data,
            ),
        )
        .with_route(policies::alert_route(lag_id, &config.alert_topic)),
        PipelineSpec::new(
            PipelineScope::Cluster,
            policies::threshold_rule(
                errors_id,
                &format!("more than {} server errors per period", cluster.error_5xx_threshold),
                fleet_query(ERRORS_5XX_METRIC, Statistic::Sum),
                Comparator::GreaterThan,
                cluster.error_5xx_threshold,
                cluster.evaluation_periods,
                cluster.datapoints_to_alarm,
                cluster.missing_data,
            ),
        )
        .with_route(policies::alert_route(errors_id, &config.alert_topic)),
    ]
}

/// Every pipeline for the configured fleet, validated
pub fn build_fleet(config: &ControllerConfig) -> ShardwatchResult<Vec<PipelineSpec>> {
    config.validate()?;

    let mut specs = coordinator_pipelines(config);
    let templates = shard_templates(config);
    for shard in config.shard_names() {
        specs.extend(templates.iter().map(|t| t.instantiate(&shard)));
    }
    specs.extend(cluster_pipelines(config));

    validate_fleet(&specs)?;
    Ok(specs)
}

/// Validate every pipeline and require unique rule identities
pub fn validate_fleet(specs: &[PipelineSpec]) -> ShardwatchResult<()> {
    let mut ids = HashSet::new();
    for spec in specs {
        spec.validate()?;
        if !ids.insert(spec.id()) {
            return Err(ShardwatchError::config(format!("duplicate rule id '{}'", spec.id())));
        }
    }
    Ok(())
}

/// Scaling targets and their clamp bounds
pub fn scaling_targets(config: &ControllerConfig) -> Vec<(String, CapacityBounds)> {
    let mut targets = vec![(config.coordinator_service.clone(), config.coordinator.capacity)];
    targets.extend(
        config
            .shard_names()
            .into_iter()
            .map(|name| (name, config.shard.capacity)),
    );
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MissingDataPolicy, ScaleDirection};

    #[test]
    fn test_fleet_shape() {
        let config = ControllerConfig::builder().shard_count(4).build();
        let fleet = build_fleet(&config).unwrap();

        // 2 coordinator + 5 per shard + 2 cluster
        assert_eq!(fleet.len(), 2 + 4 * 5 + 2);
        assert_eq!(
            fleet.iter().filter(|p| p.scope == PipelineScope::Coordinator).count(),
            2
        );
        assert_eq!(fleet.iter().filter(|p| p.scope == PipelineScope::Cluster).count(), 2);
        assert!(fleet.iter().all(|p| !p.id().contains(SHARD_PLACEHOLDER)));
    }

    #[test]
    fn test_instantiation_is_dimensionally_distinct() {
        let config = ControllerConfig::default();
        let fleet = build_fleet(&config).unwrap();

        for spec in fleet.iter().filter(|p| p.scope == PipelineScope::Shard("shard-1".to_string())) {
            assert!(spec.id().starts_with("shard-1-"));
            assert_eq!(
                spec.rule.query.dimensions.get(SHARD_DIMENSION).map(String::as_str),
                Some("shard-1")
            );
            for policy in &spec.policies {
                assert_eq!(policy.target_id, "shard-1");
                assert_eq!(policy.alarm_id, spec.rule.id);
            }
            for route in &spec.routes {
                assert_eq!(route.alarm_id, spec.rule.id);
            }
        }
    }

    #[test]
    fn test_shard_scaling_is_asymmetric() {
        let config = ControllerConfig::default();
        let fleet = build_fleet(&config).unwrap();

        let high = fleet.iter().find(|p| p.id() == "shard-0-latency-high").unwrap();
        let low = fleet.iter().find(|p| p.id() == "shard-0-latency-low").unwrap();

        assert_eq!(high.rule.evaluation_periods, 2);
        assert_eq!(low.rule.evaluation_periods, 5);
        assert_eq!(high.policies[0].direction, ScaleDirection::Up);
        assert_eq!(low.policies[0].direction, ScaleDirection::Down);
        assert!(low.policies[0].cooldown_seconds > high.policies[0].cooldown_seconds);
        // Scale-in is not an operator event
        assert!(low.routes.is_empty());
    }

    #[test]
    fn test_missing_data_policy_is_per_rule() {
        let mut config = ControllerConfig::default();
        config.shard.scale_up.missing_data = MissingDataPolicy::Breaching;
        config.cluster.missing_data = MissingDataPolicy::Ignore;
        let fleet = build_fleet(&config).unwrap();

        let rule = |id: &str| fleet.iter().find(|p| p.id() == id).unwrap().rule.missing_data;
        assert_eq!(rule("shard-0-latency-high"), MissingDataPolicy::Breaching);
        assert_eq!(rule("shard-0-latency-low"), MissingDataPolicy::NotBreaching);
        assert_eq!(rule("coordinator-latency-high"), MissingDataPolicy::NotBreaching);
        assert_eq!(rule("cluster-replication-lag"), MissingDataPolicy::Ignore);
        assert_eq!(rule("cluster-5xx"), MissingDataPolicy::Ignore);
    }

    #[test]
    fn test_heartbeat_uses_absence_as_failure() {
        let config = ControllerConfig::default();
        let fleet = build_fleet(&config).unwrap();
        let hb = fleet.iter().find(|p| p.id() == "shard-2-heartbeat").unwrap();

        assert_eq!(hb.rule.missing_data, MissingDataPolicy::Breaching);
        assert_eq!(hb.rule.comparator, Comparator::LessThan);
        assert_eq!(hb.rule.query.metric_name, HEARTBEAT_METRIC);
    }

    #[test]
    fn test_disabled_liveness_rules_are_omitted() {
        let mut config = ControllerConfig::default();
        config.leader.enabled = false;
        config.heartbeat.enabled = false;
        assert_eq!(shard_templates(&config).len(), 3);
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let config = ControllerConfig::builder().shard_capacity(3, 1).build();
        assert!(build_fleet(&config).unwrap_err().is_fatal());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let config = ControllerConfig::default();
        let mut fleet = coordinator_pipelines(&config);
        fleet.push(fleet[0].clone());
        assert!(validate_fleet(&fleet).is_err());
    }

    #[test]
    fn test_scaling_targets() {
        let config = ControllerConfig::builder().shard_count(2).shard_capacity(2, 6).build();
        let targets = scaling_targets(&config);
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].0, "coordinator");
        assert_eq!(targets[2], ("shard-1".to_string(), CapacityBounds { min: 2, max: 6 }));
    }
}
