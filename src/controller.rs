// src/controller.rs

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::callbacks::ControllerCallbacks;
use crate::config::ControllerConfig;
use crate::error::{ShardwatchError, ShardwatchResult};
use crate::pipeline::{PipelineScope, PipelineSpec, RulePipeline, TickReport};
use crate::topology::{build_fleet, scaling_targets, validate_fleet};
use crate::types::{AlarmState, MetricValue, Timestamp};
use crate::utils::current_timestamp;

/// Commands that can be sent to a running controller
#[derive(Debug)]
pub enum ControllerCommand {
    /// Get current controller status
    GetStatus {
        response: oneshot::Sender<ControllerStatus>,
    },
    /// Snapshot every alarm's current state
    GetAlarmStates {
        response: oneshot::Sender<Vec<AlarmSnapshot>>,
    },
    /// Stop all pipelines and return from `start`
    Shutdown,
}

/// Status information about the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControllerStatus {
    pub is_running: bool,
    pub pipelines: usize,
    pub ticks: u64,
    pub transitions: u64,
    /// Adjustments handed to the scaling target, accepted or rejected
    pub scaling_actions: u64,
    pub notifications: u64,
    pub failed_notifications: u64,
    pub started_at: Option<Timestamp>,
}

/// Read-only view of one alarm, refreshed after every tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmSnapshot {
    pub rule_id: String,
    pub scope: PipelineScope,
    pub state: AlarmState,
    pub last_transition: Option<Timestamp>,
    pub last_value: Option<MetricValue>,
}

impl AlarmSnapshot {
    fn of(pipeline: &RulePipeline) -> Self {
        let evaluator = pipeline.evaluator();
        Self {
            rule_id: pipeline.id().to_string(),
            scope: pipeline.scope().clone(),
            state: evaluator.state(),
            last_transition: evaluator.last_transition_time(),
            last_value: evaluator.last_value(),
        }
    }
}

/// Counters shared by every pipeline task
#[derive(Debug, Default)]
struct ControllerCounters {
    running: AtomicBool,
    ticks: AtomicU64,
    transitions: AtomicU64,
    scaling_actions: AtomicU64,
    notifications: AtomicU64,
    failed_notifications: AtomicU64,
}

impl ControllerCounters {
    fn record(&self, report: &TickReport) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if report.transition.is_some() {
            self.transitions.fetch_add(1, Ordering::Relaxed);
        }
        self.scaling_actions
            .fetch_add(report.adjustments_issued() as u64, Ordering::Relaxed);
        for (_, delivered) in &report.notifications {
            if *delivered {
                self.notifications.fetch_add(1, Ordering::Relaxed);
            } else {
                self.failed_notifications.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Wall-clock seconds advanced by the runtime's monotonic clock
///
/// Follows tokio's paused clock in tests, so cooldowns and periods line up
/// with the interval schedule. Ticks are stamped with the instant they were
/// scheduled for, rounded to the nearest second, so a late tick never shifts
/// which period it evaluates.
#[derive(Debug, Clone, Copy)]
struct EngineClock {
    base: Timestamp,
    origin: Instant,
}

impl EngineClock {
    fn start() -> Self {
        Self {
            base: current_timestamp(),
            origin: Instant::now(),
        }
    }

    fn now(&self) -> Timestamp {
        self.at(Instant::now())
    }

    fn at(&self, instant: Instant) -> Timestamp {
        let millis = instant.saturating_duration_since(self.origin).as_millis();
        self.base + ((millis + 500) / 1_000) as u64
    }
}

/// Runs one independent task per alarm pipeline
pub struct Controller {
    config: Arc<ControllerConfig>,
    specs: Vec<PipelineSpec>,
    callbacks: ControllerCallbacks,
    command_tx: mpsc::UnboundedSender<ControllerCommand>,
    command_rx: Option<mpsc::UnboundedReceiver<ControllerCommand>>,
    counters: Arc<ControllerCounters>,
}

impl Controller {
    /// Build the full fleet from `config`
    ///
    /// Fails if the configuration or any generated rule is invalid.
    pub fn new(config: ControllerConfig, callbacks: ControllerCallbacks) -> ShardwatchResult<Self> {
        let specs = build_fleet(&config)?;
        Ok(Self::assemble(config, specs, callbacks))
    }

    /// Run a hand-built set of pipelines instead of the generated fleet
    pub fn from_specs(
        config: ControllerConfig,
        specs: Vec<PipelineSpec>,
        callbacks: ControllerCallbacks,
    ) -> ShardwatchResult<Self> {
        config.validate()?;
        validate_fleet(&specs)?;
        Ok(Self::assemble(config, specs, callbacks))
    }

    fn assemble(config: ControllerConfig, specs: Vec<PipelineSpec>, callbacks: ControllerCallbacks) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            config: Arc::new(config),
            specs,
            callbacks,
            command_tx,
            command_rx: Some(command_rx),
            counters: Arc::new(ControllerCounters::default()),
        }
    }

    /// Get a handle to send commands to the controller
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            command_tx: self.command_tx.clone(),
        }
    }

    pub fn pipeline_ids(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.id()).collect()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Start every pipeline and serve commands until shutdown (consumes self)
    pub async fn start(mut self) -> ShardwatchResult<()> {
        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| ShardwatchError::controller_not_running("Controller already started"))?;

        info!(
            cluster = %self.config.cluster_name,
            shards = self.config.shard_count,
            pipelines = self.specs.len(),
            "Controller starting..."
        );

        self.register_bounds().await;

        let clock = EngineClock::start();
        let started_at = clock.now();
        let query_timeout = Duration::from_secs(self.config.query_timeout_seconds);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(self.specs.len());
        let mut snapshots: Vec<watch::Receiver<AlarmSnapshot>> = Vec::with_capacity(self.specs.len());

        for spec in std::mem::take(&mut self.specs) {
            let pipeline = RulePipeline::new(spec, self.callbacks.clone(), query_timeout);
            let (snapshot_tx, snapshot_rx) = watch::channel(AlarmSnapshot::of(&pipeline));
            let span = info_span!("pipeline", rule = %pipeline.id(), scope = %pipeline.scope());

            tasks.push(tokio::spawn(
                run_pipeline(
                    pipeline,
                    clock,
                    Arc::clone(&self.counters),
                    snapshot_tx,
                    shutdown_rx.clone(),
                )
                .instrument(span),
            ));
            snapshots.push(snapshot_rx);
        }
        drop(shutdown_rx);

        self.counters.running.store(true, Ordering::SeqCst);

        while let Some(command) = command_rx.recv().await {
            match command {
                ControllerCommand::GetStatus { response } => {
                    let status = self.status(snapshots.len(), Some(started_at));
                    let _ = response.send(status); // Caller may have gone away
                }
                ControllerCommand::GetAlarmStates { response } => {
                    let states = snapshots.iter().map(|rx| rx.borrow().clone()).collect();
                    let _ = response.send(states);
                }
                ControllerCommand::Shutdown => {
                    info!("Shutdown command received");
                    break;
                }
            }
        }

        let _ = shutdown_tx.send(true);
        let drain = Duration::from_secs(self.config.shutdown_timeout_seconds);
        match tokio::time::timeout(drain, join_all(tasks.iter_mut())).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("Pipeline task ended abnormally: {}", e);
                    }
                }
            }
            Err(_) => {
                warn!(
                    timeout_seconds = drain.as_secs(),
                    "In-flight ticks did not finish in time, aborting"
                );
                for task in &tasks {
                    task.abort();
                }
            }
        }

        self.counters.running.store(false, Ordering::SeqCst);
        info!("Controller stopped");
        Ok(())
    }

    async fn register_bounds(&self) {
        for (target_id, bounds) in scaling_targets(&self.config) {
            if let Err(e) = self
                .callbacks
                .scaling_target
                .register_bounds(&target_id, bounds)
                .await
            {
                warn!(target_id = %target_id, error = %e, "Failed to register capacity bounds");
            }
        }
    }

    fn status(&self, pipelines: usize, started_at: Option<Timestamp>) -> ControllerStatus {
        let counters = &self.counters;
        ControllerStatus {
            is_running: counters.running.load(Ordering::SeqCst),
            pipelines,
            ticks: counters.ticks.load(Ordering::Relaxed),
            transitions: counters.transitions.load(Ordering::Relaxed),
            scaling_actions: counters.scaling_actions.load(Ordering::Relaxed),
            notifications: counters.notifications.load(Ordering::Relaxed),
            failed_notifications: counters.failed_notifications.load(Ordering::Relaxed),
            started_at,
        }
    }
}

/// Tick one pipeline every period until shutdown is signalled
///
/// A tick that has started always runs to completion; shutdown is only
/// observed between ticks.
async fn run_pipeline(
    mut pipeline: RulePipeline,
    clock: EngineClock,
    counters: Arc<ControllerCounters>,
    snapshot_tx: watch::Sender<AlarmSnapshot>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval(pipeline.period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,

            scheduled = ticker.tick() => {
                let report = pipeline.tick(clock.at(scheduled)).await;
                counters.record(&report);
                let _ = snapshot_tx.send(AlarmSnapshot::of(&pipeline));
            }
        }
    }

    debug!("Pipeline stopped");
}

/// Handle for interacting with a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    command_tx: mpsc::UnboundedSender<ControllerCommand>,
}

impl ControllerHandle {
    /// Get current controller status
    pub async fn get_status(&self) -> ShardwatchResult<ControllerStatus> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx.send(ControllerCommand::GetStatus {
            response: response_tx,
        })?;
        Ok(response_rx.await?)
    }

    /// Current state of every alarm
    pub async fn alarm_states(&self) -> ShardwatchResult<Vec<AlarmSnapshot>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx.send(ControllerCommand::GetAlarmStates {
            response: response_tx,
        })?;
        Ok(response_rx.await?)
    }

    /// Shutdown the controller
    pub async fn shutdown(&self) -> ShardwatchResult<()> {
        self.command_tx.send(ControllerCommand::Shutdown)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::period_floor;

    #[test]
    fn test_clock_rounds_scheduled_instants() {
        let origin = Instant::now();
        let clock = EngineClock { base: 6_000, origin };

        assert_eq!(clock.at(origin), 6_000);
        assert_eq!(clock.at(origin + Duration::from_millis(60_400)), 6_060);
        assert_eq!(clock.at(origin + Duration::from_millis(119_600)), 6_120);
    }

    #[test]
    fn test_consecutive_ticks_evaluate_consecutive_periods() {
        let origin = Instant::now();
        let clock = EngineClock { base: 6_030, origin };
        let period = Duration::from_secs(60);

        // Scheduled instants sit just after the interval's creation
        let ends: Vec<Timestamp> = (1..=4u32)
            .map(|k| clock.at(origin + period * k + Duration::from_micros(300)))
            .map(|now| period_floor(now, 60))
            .collect();
        assert_eq!(ends, vec![6_060, 6_120, 6_180, 6_240]);
    }
}
