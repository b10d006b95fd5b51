use anyhow::Result;
use murmur_app::{ControlHandle, RunnerSettings, SharedWorld, TickRunner, create_command_bus};
use murmur_core::{FlockConfig, FlockWorld, SpawnMode, Vec2};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

const STEP_DT: f32 = 0.02;

fn main() -> Result<()> {
    init_tracing();
    let world = bootstrap_world()?;
    info!("Starting murmur flock shell");

    let (sender, receiver) = create_command_bus(64);
    let handle = ControlHandle::new(Arc::clone(&world), sender);
    let settings = RunnerSettings {
        dt: STEP_DT,
        ..RunnerSettings::default()
    };
    let mut runner = TickRunner::new(world, receiver, handle.pause_flag(), settings);

    let ticks: u64 = std::env::var("MURMUR_TICKS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(1_200);
    runner.run_steps(ticks);

    if let Ok(summary) = handle.latest_summary() {
        info!(
            tick = summary.tick.0,
            agents = summary.active,
            avg_speed = summary.average_speed,
            max_speed = summary.max_speed,
            "Session complete",
        );
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn bootstrap_world() -> Result<SharedWorld> {
    let config = FlockConfig {
        active_count: 4_096,
        spawn: SpawnMode::Clustered { clusters: 8 },
        spawn_radius: 2.0,
        spawn_spread: Vec2::new(24.0, 24.0),
        history_capacity: 600,
        ..FlockConfig::default()
    };

    let mut world = FlockWorld::new(config)?;

    for _ in 0..120 {
        world.step(STEP_DT);
    }

    if let Some(summary) = world.latest_summary() {
        info!(
            tick = summary.tick.0,
            agents = summary.active,
            avg_speed = summary.average_speed,
            "Primed flock world",
        );
    } else {
        warn!("World bootstrap completed without summaries");
    }

    Ok(Arc::new(Mutex::new(world)))
}
