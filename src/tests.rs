use crate::callbacks::*;
use crate::config::*;
use crate::controller::*;
use crate::error::*;
use crate::memory::*;
use crate::pipeline::*;
use crate::policies::*;
use crate::scaling::ScalingOutcome;
use crate::topology::*;
use crate::types::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Latency keyed by period end; every other query has no data
struct ScriptedLatency {
	by_period_end: HashMap<Timestamp, MetricValue>,
}

#[async_trait]
impl MetricSource for ScriptedLatency {
	async fn query(&self, query: &MetricQuery, period_end: Timestamp) -> ShardwatchResult<Option<MetricValue>> {
		if query.metric_name != LATENCY_METRIC {
			return Ok(None);
		}
		Ok(self.by_period_end.get(&period_end).copied())
	}
}

/// Healthy fleet except for one shard whose latency stays high
struct HotShard {
	shard: &'static str,
}

#[async_trait]
impl MetricSource for HotShard {
	async fn query(&self, query: &MetricQuery, _period_end: Timestamp) -> ShardwatchResult<Option<MetricValue>> {
		let value = match query.metric_name.as_str() {
			LATENCY_METRIC => {
				let hot = query.dimensions.get(SHARD_DIMENSION).map(String::as_str) == Some(self.shard);
				if hot { 480.0 } else { 150.0 }
			}
			HEARTBEAT_METRIC | LEADER_PRESENT_METRIC => 1.0,
			_ => 0.0,
		};
		Ok(Some(value))
	}
}

#[derive(Default)]
struct CountingObserver {
	transitions: AtomicUsize,
	executed: AtomicUsize,
}

#[async_trait]
impl ControllerObserver for CountingObserver {
	async fn on_transition(&self, _transition: &AlarmTransition) -> ShardwatchResult<()> {
		self.transitions.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	async fn on_scaling_executed(&self, _action: &crate::scaling::ScalingAction) -> ShardwatchResult<()> {
		self.executed.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

/// Orchestrator that takes `delay` to apply every adjustment
struct SlowTarget {
	inner: Arc<InMemoryScalingTarget>,
	delay: Duration,
}

#[async_trait]
impl ScalingTarget for SlowTarget {
	async fn adjust(&self, target_id: &str, delta: i32) -> ShardwatchResult<()> {
		tokio::time::sleep(self.delay).await;
		self.inner.adjust(target_id, delta).await
	}

	async fn register_bounds(&self, target_id: &str, bounds: CapacityBounds) -> ShardwatchResult<()> {
		self.inner.register_bounds(target_id, bounds).await
	}
}

/// A controller running only shard-0's scale-out alarm, which trips on its first tick
fn slow_scale_out(shutdown_timeout_seconds: u64, delay: Duration) -> (Controller, Arc<InMemoryScalingTarget>) {
	let mut config = ControllerConfig::builder()
		.shutdown_timeout_seconds(shutdown_timeout_seconds)
		.build();
	config.shard.scale_up.evaluation_periods = 1;
	config.shard.scale_up.datapoints_to_alarm = 1;

	let specs: Vec<PipelineSpec> = build_fleet(&config)
		.unwrap()
		.into_iter()
		.filter(|p| p.id() == "shard-0-latency-high")
		.collect();

	let inner = Arc::new(InMemoryScalingTarget::new());
	let callbacks = ControllerCallbacks::new(
		Arc::new(HotShard { shard: "shard-0" }),
		Arc::new(SlowTarget { inner: inner.clone(), delay }),
		Arc::new(RecordingPublisher::new()),
	);
	(Controller::from_specs(config, specs, callbacks).unwrap(), inner)
}

fn shard_pipeline(config: &ControllerConfig, rule_suffix: &str, callbacks: &ControllerCallbacks) -> RulePipeline {
	let spec = shard_templates(config)
		.iter()
		.map(|t| t.instantiate("shard-0"))
		.find(|s| s.id() == format!("shard-0-{}", rule_suffix))
		.unwrap();
	RulePipeline::new(spec, callbacks.clone(), Duration::from_secs(1))
}

#[tokio::test]
async fn test_asymmetric_hysteresis() {
	let config = ControllerConfig::default();

	// Two high periods, then a dip below the scale-in threshold lasting five
	let mut by_period_end = HashMap::new();
	for k in 1..=2u64 {
		by_period_end.insert(k * 60, 480.0);
	}
	for k in 3..=7u64 {
		by_period_end.insert(k * 60, 30.0);
	}

	let target = Arc::new(InMemoryScalingTarget::new());
	target.register_bounds("shard-0", CapacityBounds { min: 1, max: 10 }).await.unwrap();
	let callbacks = ControllerCallbacks::new(
		Arc::new(ScriptedLatency { by_period_end }),
		target.clone(),
		Arc::new(RecordingPublisher::new()),
	);

	let mut high = shard_pipeline(&config, "latency-high", &callbacks);
	let mut low = shard_pipeline(&config, "latency-low", &callbacks);

	let mut up = Vec::new();
	let mut down = Vec::new();
	for k in 1..=7u64 {
		let now = k * 60 + 1;
		up.push(high.tick(now).await.adjustments_issued());
		down.push(low.tick(now).await.adjustments_issued());
	}

	// Scale-up fires on the second high period
	assert_eq!(up, vec![0, 1, 0, 0, 0, 0, 0]);
	// Four low periods are not enough; the fifth is
	assert_eq!(down, vec![0, 0, 0, 0, 0, 0, 1]);

	let history = target.history().await;
	assert_eq!(history.len(), 2);
	assert_eq!((history[0].delta, history[0].after), (1, 2));
	assert_eq!((history[1].delta, history[1].after), (-1, 1));
}

#[tokio::test]
async fn test_single_period_spike_does_not_scale() {
	let config = ControllerConfig::default();
	let mut by_period_end = HashMap::new();
	by_period_end.insert(120, 480.0);
	for k in [60u64, 180, 240] {
		by_period_end.insert(k, 150.0);
	}

	let target = MockScalingTarget::new();
	let callbacks = ControllerCallbacks::new(
		Arc::new(ScriptedLatency { by_period_end }),
		Arc::new(target),
		Arc::new(RecordingPublisher::new()),
	);
	let mut high = shard_pipeline(&config, "latency-high", &callbacks);

	for k in 1..=4u64 {
		let report = high.tick(k * 60 + 1).await;
		assert!(report.scaling.iter().all(|o| *o == ScalingOutcome::NotTriggered));
	}
	assert_eq!(high.evaluator().state(), AlarmState::Ok);
}

#[tokio::test]
async fn test_breaching_gaps_on_scale_out_leave_scale_in_alone() {
	let mut config = ControllerConfig::default();
	config.shard.scale_up.missing_data = MissingDataPolicy::Breaching;

	let target = Arc::new(InMemoryScalingTarget::new());
	target.register_bounds("shard-0", CapacityBounds { min: 1, max: 10 }).await.unwrap();
	let callbacks = ControllerCallbacks::new(
		Arc::new(ScriptedLatency { by_period_end: HashMap::new() }),
		target.clone(),
		Arc::new(RecordingPublisher::new()),
	);

	let mut high = shard_pipeline(&config, "latency-high", &callbacks);
	let mut low = shard_pipeline(&config, "latency-low", &callbacks);

	// Latency stops arriving entirely
	for k in 1..=5u64 {
		let now = k * 60 + 1;
		high.tick(now).await;
		low.tick(now).await;
	}

	assert_eq!(high.evaluator().state(), AlarmState::Alarm);
	assert_eq!(low.evaluator().state(), AlarmState::Ok);

	let history = target.history().await;
	assert!(!history.is_empty());
	assert!(history.iter().all(|r| r.delta == 1));
}

#[tokio::test(start_paused = true)]
async fn test_hot_shard_never_scales_its_neighbours() {
	let config = ControllerConfig::builder().shard_count(4).build();
	let target = Arc::new(InMemoryScalingTarget::new());
	let publisher = Arc::new(RecordingPublisher::new());
	let callbacks = ControllerCallbacks::new(
		Arc::new(HotShard { shard: "shard-1" }),
		target.clone(),
		publisher.clone(),
	);

	let controller = Controller::new(config, callbacks).unwrap();
	let handle = controller.handle();
	let running = tokio::spawn(controller.start());

	tokio::time::sleep(Duration::from_secs(600)).await;

	let states = handle.alarm_states().await.unwrap();
	for snapshot in &states {
		let expected = if snapshot.rule_id == "shard-1-latency-high" {
			AlarmState::Alarm
		} else {
			AlarmState::Ok
		};
		assert_eq!(snapshot.state, expected, "rule {}", snapshot.rule_id);
	}

	let history = target.history().await;
	assert!(history.len() >= 2);
	assert!(history.iter().all(|r| r.target_id == "shard-1" && r.delta == 1));
	for neighbour in ["shard-0", "shard-2", "shard-3", "coordinator"] {
		let capacity = target.capacity(neighbour).await.unwrap();
		assert_eq!(capacity.current, capacity.min, "{} was adjusted", neighbour);
	}

	let alerts = publisher.notifications().await;
	assert_eq!(alerts.len(), 1);
	assert_eq!(alerts[0].1.rule_id, "shard-1-latency-high");

	handle.shutdown().await.unwrap();
	running.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_controller_status_and_shutdown() {
	let observer = Arc::new(CountingObserver::default());
	let target = Arc::new(InMemoryScalingTarget::new());
	let callbacks = ControllerCallbacks::new(
		Arc::new(HotShard { shard: "shard-2" }),
		target.clone(),
		Arc::new(RecordingPublisher::new()),
	)
	.add_observer(observer.clone());

	let controller = Controller::new(ControllerConfig::default(), callbacks).unwrap();
	assert_eq!(controller.pipeline_ids().len(), 2 + 3 * 5 + 2);
	let handle = controller.handle();
	let running = tokio::spawn(controller.start());

	tokio::time::sleep(Duration::from_secs(61)).await;

	let status = handle.get_status().await.unwrap();
	assert!(status.is_running);
	assert_eq!(status.pipelines, 19);
	assert_eq!(status.ticks, 19 * 2);
	assert_eq!(status.scaling_actions, 1);
	assert_eq!(status.notifications, 1);
	assert_eq!(observer.executed.load(Ordering::SeqCst), 1);
	assert!(observer.transitions.load(Ordering::SeqCst) >= 19);

	// Bounds were registered before the first tick
	let coordinator = target.capacity("coordinator").await.unwrap();
	assert_eq!((coordinator.min, coordinator.max), (1, 4));

	handle.shutdown().await.unwrap();
	running.await.unwrap().unwrap();
	assert!(handle.get_status().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_lets_in_flight_tick_finish() {
	let (controller, target) = slow_scale_out(30, Duration::from_secs(5));
	let handle = controller.handle();
	let running = tokio::spawn(controller.start());

	// The first tick is waiting on the orchestrator
	tokio::time::sleep(Duration::from_secs(1)).await;
	assert!(target.history().await.is_empty());

	let requested = Instant::now();
	handle.shutdown().await.unwrap();
	running.await.unwrap().unwrap();

	let history = target.history().await;
	assert_eq!(history.len(), 1);
	assert_eq!((history[0].target_id.as_str(), history[0].delta), ("shard-0", 1));
	assert!(requested.elapsed() >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_aborts_ticks_past_the_drain_timeout() {
	let (controller, target) = slow_scale_out(2, Duration::from_secs(3_600));
	let handle = controller.handle();
	let running = tokio::spawn(controller.start());

	tokio::time::sleep(Duration::from_secs(1)).await;

	let requested = Instant::now();
	handle.shutdown().await.unwrap();
	running.await.unwrap().unwrap();

	let waited = requested.elapsed();
	assert!(waited >= Duration::from_secs(2));
	assert!(waited < Duration::from_secs(60));
	assert!(target.history().await.is_empty());
	assert!(handle.get_status().await.is_err());
}

#[test]
fn test_invalid_config_never_starts() {
	let config = ControllerConfig::builder().shard_latency_thresholds(100.0, 200.0).build();
	let callbacks = ControllerCallbacks::new(
		Arc::new(InMemoryMetricStore::new()),
		Arc::new(InMemoryScalingTarget::new()),
		Arc::new(RecordingPublisher::new()),
	);

	let err = Controller::new(config, callbacks).err().unwrap();
	assert!(err.is_fatal());
}

#[test]
fn test_builders() {
	let window = ScalingWindow::scale_up();
	let query = latency_query("kv", "shard", Some("shard-0"), 60);
	assert_eq!(query.dimensions.len(), 3);
	assert_eq!(query.statistic, Statistic::Percentile(99.0));

	let rule = latency_high_rule("r", query, 250.0, &window);
	assert_eq!(rule.comparator, Comparator::GreaterThan);
	assert_eq!(rule.missing_data, MissingDataPolicy::NotBreaching);
	assert_eq!((rule.evaluation_periods, rule.datapoints_to_alarm), (2, 2));

	let policy = scale_out_policy("p", "r", "shard-0", &window);
	assert_eq!(policy.step, 1);
	assert!(policy.validate().is_ok());

	let route = alert_route("r", "ops");
	assert_eq!(route.id, "r-alert");
}
