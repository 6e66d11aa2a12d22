// demos/fleet_simulation.rs
//! Fleet simulation showing the full controller loop
//!
//! This demo:
//! - Builds the generated fleet for a 3-shard cluster
//! - Feeds synthetic telemetry into the in-memory metric store
//! - Drives a latency spike on shard-1 and a heartbeat loss on shard-2
//! - Prints transitions, adjustments and notifications as they happen
//!
//! Run with: RUST_LOG=shardwatch=info cargo run --example fleet_simulation

use async_trait::async_trait;
use shardwatch::{
    utils, AlarmNotification, AlarmTransition, CapacityBounds, Controller, ControllerCallbacks,
    ControllerConfig, ControllerObserver, InMemoryMetricStore, InMemoryScalingTarget,
    RecordingPublisher, ScalingAction, ScalingWindow, ServiceScalingConfig, ShardwatchResult,
};
use shardwatch::policies::{
    CLUSTER_DIMENSION, ERRORS_5XX_METRIC, HEARTBEAT_METRIC, LATENCY_METRIC,
    LEADER_PRESENT_METRIC, REPLICATION_LAG_METRIC, SERVICE_DIMENSION, SHARD_DIMENSION,
};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing_subscriber::EnvFilter;

const CLUSTER: &str = "sharded-kv";
const PERIOD_SECONDS: u64 = 2;

/// Observer that prints engine events to the console
struct ConsoleObserver;

#[async_trait]
impl ControllerObserver for ConsoleObserver {
    async fn on_transition(&self, transition: &AlarmTransition) -> ShardwatchResult<()> {
        println!(
            "🔔 {}: {} -> {} (value: {:?})",
            transition.rule_id, transition.from, transition.to, transition.value
        );
        Ok(())
    }

    async fn on_scaling_executed(&self, action: &ScalingAction) -> ShardwatchResult<()> {
        println!("🔧 SCALING: {} {:+} ({})", action.target_id, action.delta, action.reason);
        Ok(())
    }

    async fn on_scaling_skipped(&self, action: &ScalingAction, reason: &str) -> ShardwatchResult<()> {
        println!("⏸️  SKIPPED: {} - {}", action.target_id, reason);
        Ok(())
    }

    async fn on_notification(&self, notification: &AlarmNotification, delivered: bool) -> ShardwatchResult<()> {
        let icon = if delivered { "📣" } else { "❌" };
        println!(
            "{} ALERT: {} {} -> {}",
            icon, notification.rule_id, notification.old_state, notification.new_state
        );
        Ok(())
    }
}

/// One tick of synthetic telemetry for every service
async fn emit_telemetry(store: &InMemoryMetricStore, shards: &[String], phase: Phase) {
    let now = utils::current_timestamp();

    store
        .record(
            LATENCY_METRIC,
            utils::dimensions(&[(CLUSTER_DIMENSION, CLUSTER), (SERVICE_DIMENSION, "coordinator")]),
            now,
            180.0,
        )
        .await;

    for shard in shards {
        let spiking = phase == Phase::Spike && shard == "shard-1";
        let silent = phase != Phase::Calm && shard == "shard-2";

        let shard_dims = utils::dimensions(&[
            (CLUSTER_DIMENSION, CLUSTER),
            (SERVICE_DIMENSION, "shard"),
            (SHARD_DIMENSION, shard.as_str()),
        ]);
        let latency = if spiking { 480.0 } else { 120.0 };
        store.record(LATENCY_METRIC, shard_dims.clone(), now, latency).await;
        store.record(REPLICATION_LAG_METRIC, shard_dims.clone(), now, 40.0).await;
        store.record(ERRORS_5XX_METRIC, shard_dims.clone(), now, 0.0).await;
        if !silent {
            store.record(HEARTBEAT_METRIC, shard_dims, now, 1.0).await;
        }

        store
            .record(
                LEADER_PRESENT_METRIC,
                utils::dimensions(&[
                    (CLUSTER_DIMENSION, CLUSTER),
                    (SERVICE_DIMENSION, "coordinator"),
                    (SHARD_DIMENSION, shard.as_str()),
                ]),
                now,
                1.0,
            )
            .await;
    }

    store.prune_before(now.saturating_sub(10 * PERIOD_SECONDS)).await;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Calm,
    Spike,
    Recovery,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shardwatch=info")))
        .init();

    println!("🚨 Shardwatch Fleet Simulation");
    println!("==============================\n");

    // 1. Configure a small fleet with short periods so the demo moves quickly
    let shard = ServiceScalingConfig {
        p99_latency_threshold_ms: 250.0,
        scale_in_latency_threshold_ms: 60.0,
        capacity: CapacityBounds { min: 1, max: 5 },
        scale_up: ScalingWindow {
            evaluation_periods: 2,
            datapoints_to_alarm: 2,
            cooldown_seconds: 4,
            ..ScalingWindow::scale_up()
        },
        ..ServiceScalingConfig::default()
    };
    let config = ControllerConfig::builder()
        .cluster_name(CLUSTER)
        .shard_count(3)
        .period_seconds(PERIOD_SECONDS)
        .query_timeout_seconds(1)
        .shutdown_timeout_seconds(5)
        .shard(shard)
        .build();
    let shards = config.shard_names();

    // 2. In-memory stand-ins for telemetry, orchestrator and fan-out
    let store = Arc::new(InMemoryMetricStore::new());
    let orchestrator = Arc::new(InMemoryScalingTarget::new());
    let publisher = Arc::new(RecordingPublisher::new());

    let callbacks = ControllerCallbacks::new(store.clone(), orchestrator.clone(), publisher.clone())
        .add_observer(Arc::new(ConsoleObserver));

    // 3. Start the controller
    let controller = Controller::new(config, callbacks)?;
    println!("📋 Pipelines: {}\n", controller.pipeline_ids().join(", "));
    let handle = controller.handle();
    let running = tokio::spawn(controller.start());

    // 4. Feed telemetry through three phases
    let schedule = [(Phase::Calm, 6), (Phase::Spike, 12), (Phase::Recovery, 10)];
    for (phase, seconds) in schedule {
        println!("\n▶️  Phase {:?} for {}s", phase, seconds);
        for _ in 0..(seconds * 2) {
            emit_telemetry(&store, &shards, phase).await;
            sleep(Duration::from_millis(500)).await;
        }
    }

    // 5. Report and shut down
    let status = handle.get_status().await?;
    println!("\n📈 Status: {}", serde_json::to_string_pretty(&status)?);

    for snapshot in handle.alarm_states().await? {
        println!("   {:<28} {}", snapshot.rule_id, snapshot.state);
    }

    for record in orchestrator.history().await {
        println!("   {} {:+}: {} -> {}", record.target_id, record.delta, record.before, record.after);
    }
    println!("   {} notifications published", publisher.notifications().await.len());

    handle.shutdown().await?;
    running.await??;
    println!("\n👋 Controller stopped");
    Ok(())
}
