//! One evaluation pipeline: an alarm rule plus the policies and routes bound to it

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::alarm::{AlarmEvaluator, AlarmRuleSpec};
use crate::alerts::{AlarmNotification, AlertRoute, AlertRouteSpec};
use crate::callbacks::ControllerCallbacks;
use crate::error::{ShardwatchError, ShardwatchResult};
use crate::scaling::{ScalingOutcome, ScalingPolicyEngine, ScalingPolicySpec};
use crate::types::{AlarmState, AlarmTransition, Timestamp};

/// Which part of the fleet a pipeline watches
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineScope {
    Coordinator,
    Shard(String),
    Cluster,
}

impl fmt::Display for PipelineScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineScope::Coordinator => write!(f, "coordinator"),
            PipelineScope::Shard(name) => write!(f, "{}", name),
            PipelineScope::Cluster => write!(f, "cluster"),
        }
    }
}

/// Immutable description of one pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub scope: PipelineScope,
    pub rule: AlarmRuleSpec,
    pub policies: Vec<ScalingPolicySpec>,
    pub routes: Vec<AlertRouteSpec>,
}

impl PipelineSpec {
    pub fn new(scope: PipelineScope, rule: AlarmRuleSpec) -> Self {
        Self {
            scope,
            rule,
            policies: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: ScalingPolicySpec) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn with_route(mut self, route: AlertRouteSpec) -> Self {
        self.routes.push(route);
        self
    }

    pub fn id(&self) -> &str {
        &self.rule.id
    }

    /// Validate the rule, every binding, and at most one policy per direction
    pub fn validate(&self) -> ShardwatchResult<()> {
        self.rule.validate()?;

        let mut directions = HashSet::new();
        for policy in &self.policies {
            policy.validate()?;
            if policy.alarm_id != self.rule.id {
                return Err(ShardwatchError::invalid_rule(
                    &policy.id,
                    format!("bound to alarm '{}' but attached to '{}'", policy.alarm_id, self.rule.id),
                ));
            }
            if !directions.insert(policy.direction) {
                return Err(ShardwatchError::invalid_rule(
                    &self.rule.id,
                    format!("more than one '{}' policy bound to the same alarm", policy.direction),
                ));
            }
        }

        for route in &self.routes {
            route.validate()?;
            if route.alarm_id != self.rule.id {
                return Err(ShardwatchError::invalid_rule(
                    &route.id,
                    format!("bound to alarm '{}' but attached to '{}'", route.alarm_id, self.rule.id),
                ));
            }
        }

        Ok(())
    }
}

/// Everything one tick did
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub state: AlarmState,
    pub transition: Option<AlarmTransition>,
    pub scaling: Vec<ScalingOutcome>,
    pub notifications: Vec<(AlarmNotification, bool)>,
}

impl TickReport {
    /// Adjustments handed to the scaling target this tick, accepted or not
    pub fn adjustments_issued(&self) -> usize {
        self.scaling
            .iter()
            .filter(|o| matches!(o, ScalingOutcome::Executed(_) | ScalingOutcome::Failed { .. }))
            .count()
    }
}

/// Runtime state of one pipeline. Owned by exactly one task.
pub struct RulePipeline {
    scope: PipelineScope,
    evaluator: AlarmEvaluator,
    policies: Vec<ScalingPolicyEngine>,
    routes: Vec<AlertRoute>,
    callbacks: ControllerCallbacks,
    query_timeout: Duration,
}

impl RulePipeline {
    pub fn new(spec: PipelineSpec, callbacks: ControllerCallbacks, query_timeout: Duration) -> Self {
        Self {
            scope: spec.scope,
            evaluator: AlarmEvaluator::new(Arc::new(spec.rule)),
            policies: spec
                .policies
                .into_iter()
                .map(|p| ScalingPolicyEngine::new(Arc::new(p)))
                .collect(),
            routes: spec
                .routes
                .into_iter()
                .map(|r| AlertRoute::new(Arc::new(r)))
                .collect(),
            callbacks,
            query_timeout,
        }
    }

    pub fn id(&self) -> &str {
        &self.evaluator.spec().id
    }

    pub fn scope(&self) -> &PipelineScope {
        &self.scope
    }

    pub fn evaluator(&self) -> &AlarmEvaluator {
        &self.evaluator
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.evaluator.spec().query.period_seconds.max(1))
    }

    /// Query, classify, update the window, then drive policies and routes
    pub async fn tick(&mut self, now: Timestamp) -> TickReport {
        let transition = self
            .evaluator
            .tick(self.callbacks.metric_source.as_ref(), now, self.query_timeout)
            .await;
        let state = self.evaluator.state();
        let value = self.evaluator.last_value();

        if let Some(t) = &transition {
            for observer in &self.callbacks.observers {
                if let Err(e) = observer.on_transition(t).await {
                    warn!("Observer error on transition: {}", e);
                }
            }
        }

        let mut scaling = Vec::with_capacity(self.policies.len());
        for policy in &mut self.policies {
            let outcome = policy
                .on_tick(
                    transition.as_ref(),
                    state,
                    value,
                    self.callbacks.scaling_target.as_ref(),
                    now,
                )
                .await;

            for observer in &self.callbacks.observers {
                let result = match &outcome {
                    ScalingOutcome::NotTriggered => Ok(()),
                    ScalingOutcome::Executed(action) => observer.on_scaling_executed(action).await,
                    ScalingOutcome::Skipped { action, reason } => {
                        observer.on_scaling_skipped(action, reason).await
                    }
                    ScalingOutcome::Failed { action, error } => {
                        let error = ShardwatchError::callback_failed("adjust", error.as_str());
                        observer.on_scaling_error(action, &error).await
                    }
                };
                if let Err(e) = result {
                    warn!("Observer error on scaling outcome: {}", e);
                }
            }

            scaling.push(outcome);
        }

        let mut notifications = Vec::new();
        for route in &mut self.routes {
            let dispatched = route
                .dispatch(
                    self.evaluator.spec(),
                    state,
                    transition.as_ref(),
                    value,
                    self.callbacks.publisher.as_ref(),
                    now,
                )
                .await;

            if let Some((notification, delivered)) = dispatched {
                for observer in &self.callbacks.observers {
                    if let Err(e) = observer.on_notification(&notification, delivered).await {
                        warn!("Observer error on notification: {}", e);
                    }
                }
                notifications.push((notification, delivered));
            }
        }

        TickReport {
            state,
            transition,
            scaling,
            notifications,
        }
    }
}
