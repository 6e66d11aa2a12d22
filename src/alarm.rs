//! M-of-N alarm evaluation
//!
//! An [`AlarmEvaluator`] owns the sliding window for one [`AlarmRuleSpec`].
//! Each tick classifies the latest completed period, pushes it into a ring
//! buffer of `evaluation_periods` slots and resolves the three-valued state.
//!
//! Slots not yet filled since start are undetermined: the state settles as
//! soon as the outcome no longer depends on them. A `breaching` missing-data
//! rule with `M = N = 2` therefore reaches ALARM on its second poll without
//! data, while a rule that has seen too few periods stays INSUFFICIENT_DATA.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::callbacks::MetricSource;
use crate::error::{ShardwatchError, ShardwatchResult};
use crate::types::{
    AlarmState, AlarmTransition, Comparator, MetricQuery, MetricValue, MissingDataPolicy,
    PeriodSample, Timestamp,
};
use crate::utils::period_floor;

/// Declarative threshold policy over one metric query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmRuleSpec {
    /// Unique rule identity (e.g. "shard-1-latency-high")
    pub id: String,
    /// Human-readable description, carried into notifications
    pub description: String,
    /// The metric query evaluated each period
    pub query: MetricQuery,
    /// Breaching when `comparator(value, threshold)` holds
    pub comparator: Comparator,
    pub threshold: MetricValue,
    /// Window size N
    pub evaluation_periods: usize,
    /// Breaching periods M within the window required for ALARM
    pub datapoints_to_alarm: usize,
    /// Treatment of periods without a datapoint
    pub missing_data: MissingDataPolicy,
}

impl AlarmRuleSpec {
    /// Check the rule invariants: `1 <= M <= N`, a finite threshold and a non-zero period
    pub fn validate(&self) -> ShardwatchResult<()> {
        if self.evaluation_periods == 0 {
            return Err(ShardwatchError::invalid_rule(&self.id, "evaluation_periods must be at least 1"));
        }
        if self.datapoints_to_alarm == 0 {
            return Err(ShardwatchError::invalid_rule(&self.id, "datapoints_to_alarm must be at least 1"));
        }
        if self.datapoints_to_alarm > self.evaluation_periods {
            return Err(ShardwatchError::invalid_rule(
                &self.id,
                format!(
                    "datapoints_to_alarm ({}) exceeds evaluation_periods ({})",
                    self.datapoints_to_alarm, self.evaluation_periods
                ),
            ));
        }
        if !self.threshold.is_finite() {
            return Err(ShardwatchError::invalid_rule(&self.id, "threshold must be finite"));
        }
        if self.query.period_seconds == 0 {
            return Err(ShardwatchError::invalid_rule(&self.id, "period must be at least one second"));
        }
        Ok(())
    }
}

/// Stateful evaluator for a single rule. Never shared between tasks.
#[derive(Debug)]
pub struct AlarmEvaluator {
    spec: Arc<AlarmRuleSpec>,
    window: VecDeque<PeriodSample>,
    state: AlarmState,
    last_transition_time: Option<Timestamp>,
    last_value: Option<MetricValue>,
}

impl AlarmEvaluator {
    pub fn new(spec: Arc<AlarmRuleSpec>) -> Self {
        let capacity = spec.evaluation_periods;
        Self {
            spec,
            window: VecDeque::with_capacity(capacity),
            state: AlarmState::InsufficientData,
            last_transition_time: None,
            last_value: None,
        }
    }

    pub fn spec(&self) -> &AlarmRuleSpec {
        &self.spec
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn last_transition_time(&self) -> Option<Timestamp> {
        self.last_transition_time
    }

    /// Statistic of the most recent period that had a datapoint
    pub fn last_value(&self) -> Option<MetricValue> {
        self.last_value
    }

    /// Classifications currently in the window, oldest first
    pub fn samples(&self) -> impl Iterator<Item = &PeriodSample> {
        self.window.iter()
    }

    /// Classify one period's statistic against the rule threshold
    pub fn classify(&self, value: Option<MetricValue>) -> PeriodSample {
        match value {
            Some(v) if v.is_finite() => {
                if self.spec.comparator.holds(v, self.spec.threshold) {
                    PeriodSample::Breaching
                } else {
                    PeriodSample::Ok
                }
            }
            _ => PeriodSample::Missing,
        }
    }

    /// Poll the metric source for the latest completed period and record it
    ///
    /// Query errors and timeouts are recorded as missing data.
    pub async fn tick(
        &mut self,
        source: &dyn MetricSource,
        now: Timestamp,
        query_timeout: Duration,
    ) -> Option<AlarmTransition> {
        let period_end = period_floor(now, self.spec.query.period_seconds);

        let value = match tokio::time::timeout(query_timeout, source.query(&self.spec.query, period_end)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!(rule = %self.spec.id, error = %e, "Metric query failed, treating period as missing");
                None
            }
            Err(_) => {
                warn!(
                    rule = %self.spec.id,
                    timeout_ms = query_timeout.as_millis() as u64,
                    "Metric query timed out, treating period as missing"
                );
                None
            }
        };

        self.record(value, now)
    }

    /// Push one period's statistic into the window and resolve the new state
    ///
    /// Returns the transition if the state changed.
    pub fn record(&mut self, value: Option<MetricValue>, now: Timestamp) -> Option<AlarmTransition> {
        let sample = self.classify(value);
        if self.window.len() == self.spec.evaluation_periods {
            self.window.pop_front();
        }
        self.window.push_back(sample);
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.last_value = Some(v);
        }

        let next = self.resolve();
        debug!(
            rule = %self.spec.id,
            ?sample,
            value = ?value,
            state = %next,
            "Evaluated period"
        );

        if next == self.state {
            return None;
        }

        let transition = AlarmTransition {
            rule_id: self.spec.id.clone(),
            from: self.state,
            to: next,
            timestamp: now,
            value,
        };
        info!(
            rule = %self.spec.id,
            from = %transition.from,
            to = %transition.to,
            value = ?value,
            "Alarm state changed"
        );

        self.state = next;
        self.last_transition_time = Some(now);
        Some(transition)
    }

    fn resolve(&self) -> AlarmState {
        let policy = self.spec.missing_data;
        let required = self.spec.datapoints_to_alarm;
        let unfilled = self.spec.evaluation_periods - self.window.len();

        if policy == MissingDataPolicy::AsMissing
            && (unfilled > 0 || self.window.contains(&PeriodSample::Missing))
        {
            return AlarmState::InsufficientData;
        }

        let mut breaching = 0;
        let mut evaluated = 0;
        for sample in &self.window {
            match (sample, policy) {
                (PeriodSample::Breaching, _) | (PeriodSample::Missing, MissingDataPolicy::Breaching) => {
                    breaching += 1;
                    evaluated += 1;
                }
                (PeriodSample::Ok, _) | (PeriodSample::Missing, MissingDataPolicy::NotBreaching) => {
                    evaluated += 1;
                }
                (PeriodSample::Missing, _) => {}
            }
        }

        if breaching >= required {
            AlarmState::Alarm
        } else if evaluated == 0 {
            // Nothing but ignored periods: hold
            self.state
        } else if breaching + unfilled < required {
            AlarmState::Ok
        } else {
            AlarmState::InsufficientData
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::MockMetricSource;
    use crate::types::Statistic;

    fn rule(n: usize, m: usize, missing_data: MissingDataPolicy) -> Arc<AlarmRuleSpec> {
        Arc::new(AlarmRuleSpec {
            id: "shard-1-latency-high".to_string(),
            description: "p99 latency above 200ms".to_string(),
            query: MetricQuery::new("RequestLatencyMs", Statistic::Percentile(99.0), 60)
                .with_dimension("Shard", "shard-1"),
            comparator: Comparator::GreaterThan,
            threshold: 200.0,
            evaluation_periods: n,
            datapoints_to_alarm: m,
            missing_data,
        })
    }

    fn feed(evaluator: &mut AlarmEvaluator, values: &[Option<f64>]) -> Vec<AlarmTransition> {
        values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| evaluator.record(*v, 1_000 + 60 * i as u64))
            .collect()
    }

    #[test]
    fn test_m_of_n_over_every_full_window() {
        for mask in 0u32..32 {
            let mut evaluator = AlarmEvaluator::new(rule(5, 3, MissingDataPolicy::Ignore));
            let values: Vec<Option<f64>> = (0..5)
                .map(|bit| Some(if mask & (1 << bit) != 0 { 500.0 } else { 50.0 }))
                .collect();
            feed(&mut evaluator, &values);

            let expected = if mask.count_ones() >= 3 { AlarmState::Alarm } else { AlarmState::Ok };
            assert_eq!(evaluator.state(), expected, "mask {:05b}", mask);
        }
    }

    #[test]
    fn test_window_slides() {
        let mut evaluator = AlarmEvaluator::new(rule(3, 2, MissingDataPolicy::NotBreaching));
        feed(&mut evaluator, &[Some(500.0), Some(500.0), Some(10.0)]);
        assert_eq!(evaluator.state(), AlarmState::Alarm);

        // The two breaching periods age out one by one
        evaluator.record(Some(10.0), 2_000);
        assert_eq!(evaluator.state(), AlarmState::Ok);
        assert_eq!(evaluator.samples().count(), 3);
    }

    #[test]
    fn test_missing_heartbeat_raises_alarm() {
        let mut evaluator = AlarmEvaluator::new(rule(2, 2, MissingDataPolicy::Breaching));

        assert!(evaluator.record(None, 1_000).is_none());
        assert_eq!(evaluator.state(), AlarmState::InsufficientData);

        let transition = evaluator.record(None, 1_060).unwrap();
        assert_eq!(transition.from, AlarmState::InsufficientData);
        assert_eq!(transition.to, AlarmState::Alarm);
        assert_eq!(evaluator.last_transition_time(), Some(1_060));
    }

    #[test]
    fn test_not_breaching_missing_data_counts_as_ok() {
        let mut evaluator = AlarmEvaluator::new(rule(2, 2, MissingDataPolicy::NotBreaching));
        feed(&mut evaluator, &[None, None]);
        assert_eq!(evaluator.state(), AlarmState::Ok);
    }

    #[test]
    fn test_as_missing_forces_insufficient_data() {
        let mut evaluator = AlarmEvaluator::new(rule(3, 1, MissingDataPolicy::AsMissing));
        feed(&mut evaluator, &[Some(500.0), Some(500.0), Some(500.0)]);
        assert_eq!(evaluator.state(), AlarmState::Alarm);

        evaluator.record(None, 2_000);
        assert_eq!(evaluator.state(), AlarmState::InsufficientData);

        // Stays insufficient until the missing period leaves the window
        evaluator.record(Some(500.0), 2_060);
        evaluator.record(Some(500.0), 2_120);
        assert_eq!(evaluator.state(), AlarmState::InsufficientData);
        evaluator.record(Some(500.0), 2_180);
        assert_eq!(evaluator.state(), AlarmState::Alarm);
    }

    #[test]
    fn test_ignore_shrinks_window() {
        let mut evaluator = AlarmEvaluator::new(rule(4, 2, MissingDataPolicy::Ignore));
        feed(&mut evaluator, &[Some(50.0), None, None, Some(50.0)]);
        assert_eq!(evaluator.state(), AlarmState::Ok);

        // Two missing, two breaching: 2 of the 2 evaluated periods breach
        feed(&mut evaluator, &[None, Some(500.0), None, Some(500.0)]);
        assert_eq!(evaluator.state(), AlarmState::Alarm);
    }

    #[test]
    fn test_ignore_holds_state_without_any_data() {
        let mut evaluator = AlarmEvaluator::new(rule(2, 1, MissingDataPolicy::Ignore));
        feed(&mut evaluator, &[None, None, None]);
        assert_eq!(evaluator.state(), AlarmState::InsufficientData);

        feed(&mut evaluator, &[Some(500.0), None, None]);
        assert_eq!(evaluator.state(), AlarmState::Alarm);
    }

    #[test]
    fn test_cold_start_needs_full_window_for_ok() {
        let mut evaluator = AlarmEvaluator::new(rule(5, 5, MissingDataPolicy::NotBreaching));
        feed(&mut evaluator, &[Some(10.0)]);
        // One clean period already rules out 5-of-5
        assert_eq!(evaluator.state(), AlarmState::Ok);

        let mut evaluator = AlarmEvaluator::new(rule(5, 2, MissingDataPolicy::NotBreaching));
        feed(&mut evaluator, &[Some(10.0), Some(10.0), Some(10.0)]);
        assert_eq!(evaluator.state(), AlarmState::InsufficientData);
        feed(&mut evaluator, &[Some(10.0)]);
        assert_eq!(evaluator.state(), AlarmState::Ok);
    }

    #[test]
    fn test_repeated_alarm_ticks_report_no_change() {
        let mut evaluator = AlarmEvaluator::new(rule(2, 2, MissingDataPolicy::NotBreaching));
        let transitions = feed(&mut evaluator, &[Some(500.0), Some(500.0), Some(500.0), Some(500.0)]);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].to, AlarmState::Alarm);
        assert_eq!(evaluator.last_value(), Some(500.0));
    }

    #[test]
    fn test_nan_is_missing() {
        let evaluator = AlarmEvaluator::new(rule(2, 2, MissingDataPolicy::Breaching));
        assert_eq!(evaluator.classify(Some(f64::NAN)), PeriodSample::Missing);
        assert_eq!(evaluator.classify(Some(200.0)), PeriodSample::Ok);
        assert_eq!(evaluator.classify(Some(200.5)), PeriodSample::Breaching);
    }

    #[test]
    fn test_validate() {
        assert!(rule(3, 2, MissingDataPolicy::Ignore).validate().is_ok());

        let err = rule(2, 3, MissingDataPolicy::Ignore).validate().unwrap_err();
        assert!(matches!(err, ShardwatchError::InvalidRule { .. }));
        assert!(err.is_fatal());

        assert!(rule(0, 0, MissingDataPolicy::Ignore).validate().is_err());
        assert!(rule(3, 0, MissingDataPolicy::Ignore).validate().is_err());
    }

    #[tokio::test]
    async fn test_query_failure_is_missing() {
        let mut source = MockMetricSource::new();
        source
            .expect_query()
            .returning(|q, _| Err(ShardwatchError::metric_query(q.metric_name.clone(), "backend unavailable")));

        let mut evaluator = AlarmEvaluator::new(rule(2, 2, MissingDataPolicy::Breaching));
        evaluator.tick(&source, 1_000, Duration::from_secs(5)).await;
        let transition = evaluator.tick(&source, 1_060, Duration::from_secs(5)).await;

        assert_eq!(transition.map(|t| t.to), Some(AlarmState::Alarm));
        assert!(evaluator.samples().all(|s| *s == PeriodSample::Missing));
    }

    #[tokio::test]
    async fn test_queries_latest_completed_period() {
        let mut source = MockMetricSource::new();
        source
            .expect_query()
            .withf(|q, period_end| q.metric_name == "RequestLatencyMs" && *period_end == 1_020)
            .times(1)
            .returning(|_, _| Ok(Some(250.0)));

        let mut evaluator = AlarmEvaluator::new(rule(1, 1, MissingDataPolicy::Ignore));
        let transition = evaluator.tick(&source, 1_079, Duration::from_secs(5)).await;
        assert_eq!(transition.map(|t| t.value), Some(Some(250.0)));
    }

    struct StalledSource;

    #[async_trait::async_trait]
    impl MetricSource for StalledSource {
        async fn query(&self, _query: &MetricQuery, _period_end: Timestamp) -> ShardwatchResult<Option<MetricValue>> {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            Ok(Some(1.0))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_timeout_is_missing() {
        let mut evaluator = AlarmEvaluator::new(rule(1, 1, MissingDataPolicy::Breaching));
        let transition = evaluator.tick(&StalledSource, 1_000, Duration::from_secs(10)).await;

        assert_eq!(transition.map(|t| t.to), Some(AlarmState::Alarm));
        assert_eq!(evaluator.last_value(), None);
    }
}
