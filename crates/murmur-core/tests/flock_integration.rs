use murmur_core::{
    ControlCommand, FlockConfig, FlockWorld, NeighborSearch, StepSummary, Tick, Vec2,
    apply_control_command,
};

const DT: f32 = 0.02;

fn seeded_config(seed: u64, active: usize) -> FlockConfig {
    FlockConfig {
        capacity: 4_096,
        active_count: active,
        rng_seed: Some(seed),
        ..FlockConfig::default()
    }
}

/// Configuration with every flocking influence disabled; only containment
/// and inertia remain.
fn coasting_config(seed: u64, active: usize) -> FlockConfig {
    FlockConfig {
        cohesion_weight: 0.0,
        alignment_weight: 0.0,
        separation_weight: 0.0,
        ..seeded_config(seed, active)
    }
}

fn run_flock_summary(seed: u64, steps: u32) -> StepSummary {
    let config = FlockConfig {
        spawn_radius: 4.0,
        ..seeded_config(seed, 1_024)
    };
    let mut world = FlockWorld::new(config).expect("world");
    let mut latest = None;
    for _ in 0..steps {
        latest = Some(world.step(DT));
    }
    latest.expect("at least one step")
}

#[test]
fn seeded_worlds_agree_across_instances_and_thread_counts() {
    let serial = FlockConfig {
        parallel_threshold: usize::MAX,
        spawn_radius: 4.0,
        ..seeded_config(0xF10C, 1_500)
    };
    let parallel = FlockConfig {
        parallel_threshold: 256,
        spawn_radius: 4.0,
        ..seeded_config(0xF10C, 1_500)
    };

    let mut world_a = FlockWorld::new(serial.clone()).expect("world_a");
    let mut world_b = FlockWorld::new(serial).expect("world_b");
    let mut world_c = FlockWorld::new(parallel).expect("world_c");

    for _ in 0..20 {
        world_a.step(DT);
        world_b.step(DT);
        world_c.step(DT);
    }

    assert_eq!(world_a.tick(), Tick(20));
    assert_eq!(world_a.positions(), world_b.positions());
    assert_eq!(world_a.velocities(), world_b.velocities());
    assert_eq!(
        world_a.positions(),
        world_c.positions(),
        "parallel stages must match the serial reference bit for bit"
    );
    assert_eq!(world_a.velocities(), world_c.velocities());
}

#[test]
fn grid_index_tracks_brute_force_reference() {
    let grid = FlockConfig {
        neighbor_search: NeighborSearch::Grid,
        ..seeded_config(7, 600)
    };
    let brute = FlockConfig {
        neighbor_search: NeighborSearch::BruteForce,
        ..seeded_config(7, 600)
    };

    let mut world_grid = FlockWorld::new(grid).expect("grid world");
    let mut world_brute = FlockWorld::new(brute).expect("brute world");
    for _ in 0..6 {
        world_grid.step(DT);
        world_brute.step(DT);
    }

    for (idx, (a, b)) in world_grid
        .positions()
        .iter()
        .zip(world_brute.positions())
        .enumerate()
    {
        assert!(
            (a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3,
            "agent {idx} diverged between index kinds: {a:?} vs {b:?}"
        );
    }
}

#[test]
fn cohesion_pulls_a_pair_together() {
    let config = FlockConfig {
        cohesion_radius: 2.0,
        cohesion_weight: 1.0,
        alignment_weight: 0.0,
        separation_weight: 0.0,
        spawn_speed: 0.0,
        ..seeded_config(3, 2)
    };
    let mut world = FlockWorld::new(config).expect("world");
    world
        .place_agent(0, Vec2::new(-0.5, 0.0), Vec2::ZERO)
        .expect("place left");
    world
        .place_agent(1, Vec2::new(0.5, 0.0), Vec2::ZERO)
        .expect("place right");

    for _ in 0..5 {
        world.step(DT);
    }

    let gap = (world.positions()[1] - world.positions()[0]).length();
    assert!(gap < 1.0, "cohesion should shrink the gap, got {gap}");
    assert!(world.positions()[0].x > -0.5);
    assert!(world.positions()[1].x < 0.5);
}

#[test]
fn alignment_converges_opposing_velocities() {
    let config = FlockConfig {
        cohesion_weight: 0.0,
        alignment_radius: 2.0,
        alignment_weight: 1.0,
        separation_weight: 0.0,
        spawn_speed: 0.0,
        ..seeded_config(4, 2)
    };
    let mut world = FlockWorld::new(config).expect("world");
    world
        .place_agent(0, Vec2::new(-0.3, 0.0), Vec2::new(1.0, 0.0))
        .expect("place left");
    world
        .place_agent(1, Vec2::new(0.3, 0.0), Vec2::new(-1.0, 0.0))
        .expect("place right");

    for _ in 0..10 {
        world.step(DT);
    }

    let relative = (world.velocities()[0] - world.velocities()[1]).length();
    assert!(
        relative < 2.0,
        "alignment should reduce the velocity gap, got {relative}"
    );
    assert!(
        world.velocities()[0].x > 0.0 && world.velocities()[1].x < 0.0,
        "pull is gradual, headings are not instantly flipped"
    );
}

#[test]
fn containment_turns_an_escaping_agent_around() {
    let config = FlockConfig {
        area_size: Vec2::new(8.0, 8.0),
        area_softness: Vec2::new(2.0, 2.0),
        ..coasting_config(5, 1)
    };
    let mut world = FlockWorld::new(config).expect("world");
    world
        .place_agent(0, Vec2::new(10.0, 0.0), Vec2::new(2.0, 0.0))
        .expect("place runaway");

    for _ in 0..150 {
        world.step(DT);
        let position = world.positions()[0];
        assert!(
            position.x < 12.5,
            "containment must bound the excursion, reached {}",
            position.x
        );
        assert!(position.y.abs() < 1e-6, "force acts per axis");
    }

    assert!(
        world.velocities()[0].x < 0.0,
        "agent should be heading home, velocity {:?}",
        world.velocities()[0]
    );
    assert!(
        world.steering()[0].x < 0.0,
        "steering keeps pointing inward while outside"
    );
}

#[test]
fn speeds_stay_bounded_in_a_dense_crowd() {
    let config = FlockConfig {
        active_count: 1_024,
        parallel_threshold: 256,
        cohesion_weight: 10.0,
        alignment_weight: 10.0,
        separation_weight: 20.0,
        spawn_radius: 0.5,
        ..seeded_config(0xC0FFEE, 1_024)
    };
    let mut world = FlockWorld::new(config).expect("world");
    let ceiling = world.config().max_speed;

    for _ in 0..25 {
        let summary = world.step(DT);
        assert!(
            summary.max_speed <= ceiling + 1e-3,
            "summary reports speed {} above ceiling {ceiling}",
            summary.max_speed
        );
    }
    for (idx, velocity) in world.velocities().iter().enumerate() {
        assert!(
            velocity.length() <= ceiling + 1e-3,
            "agent {idx} at speed {} exceeds ceiling {ceiling}",
            velocity.length()
        );
    }
    for (idx, position) in world.positions().iter().enumerate() {
        assert!(
            position.x.is_finite() && position.y.is_finite(),
            "agent {idx} position is not finite: {position:?}"
        );
    }
}

#[test]
fn activation_commands_freeze_and_resume_agents() {
    let mut world = FlockWorld::new(coasting_config(11, 8)).expect("world");
    for _ in 0..3 {
        world.step(DT);
    }

    apply_control_command(&mut world, ControlCommand::SetActiveCount(4)).expect("shrink");
    let frozen: Vec<Vec2> = world.columns().positions()[4..8].to_vec();
    for _ in 0..5 {
        world.step(DT);
    }
    assert_eq!(
        &world.columns().positions()[4..8],
        frozen.as_slice(),
        "deactivated agents must hold their state"
    );

    apply_control_command(&mut world, ControlCommand::SetActiveCount(8)).expect("grow");
    assert_eq!(&world.positions()[4..8], frozen.as_slice());
    let summary = world.step(DT);
    assert_eq!(summary.active, 8);

    let err =
        apply_control_command(&mut world, ControlCommand::SetActiveCount(5_000)).expect_err("over");
    assert_eq!(
        err.to_string(),
        "active count 5000 exceeds capacity 4096",
        "capacity errors carry both numbers"
    );
}

#[test]
fn distant_newcomers_leave_existing_trajectories_untouched() {
    let config = FlockConfig {
        spawn_speed: 0.0,
        ..seeded_config(6, 2)
    };
    let spaced_pair = |config: FlockConfig| {
        let mut world = FlockWorld::new(config).expect("world");
        world
            .place_agent(0, Vec2::new(-5.0, 0.0), Vec2::ZERO)
            .expect("place left");
        world
            .place_agent(1, Vec2::new(5.0, 0.0), Vec2::ZERO)
            .expect("place right");
        world
    };

    let mut baseline = spaced_pair(config.clone());
    baseline.step(DT);

    let mut grown = spaced_pair(config.clone());
    grown.set_active_count(3).expect("grow");
    grown
        .place_agent(2, Vec2::new(60.0, 60.0), Vec2::ZERO)
        .expect("place distant newcomer");
    grown.step(DT);
    assert_eq!(
        &grown.positions()[..2],
        baseline.positions(),
        "a newcomer beyond every radius must not perturb the originals"
    );

    let mut crowded = spaced_pair(config);
    crowded.set_active_count(3).expect("grow");
    crowded
        .place_agent(2, Vec2::new(-4.7, 0.0), Vec2::new(0.0, 1.0))
        .expect("place nearby newcomer");
    crowded.step(DT);
    assert_ne!(
        crowded.positions()[0],
        baseline.positions()[0],
        "a newcomer in range must deflect its neighbor"
    );
    assert_eq!(crowded.positions()[1], baseline.positions()[1]);
}

#[test]
fn config_updates_take_effect_at_tick_boundaries() {
    let mut world = FlockWorld::new(seeded_config(21, 64)).expect("world");
    for _ in 0..5 {
        world.step(DT);
    }

    let mut frozen_config = world.config().clone();
    frozen_config.time_scale = 0.0;
    apply_control_command(
        &mut world,
        ControlCommand::UpdateConfig(Box::new(frozen_config)),
    )
    .expect("freeze");
    let held: Vec<Vec2> = world.positions().to_vec();
    for _ in 0..5 {
        world.step(DT);
    }
    assert_eq!(world.positions(), held.as_slice(), "time_scale 0 holds positions");
    assert_eq!(world.tick(), Tick(10), "ticks keep counting while frozen");

    let mut running_config = world.config().clone();
    running_config.time_scale = 1.0;
    apply_control_command(
        &mut world,
        ControlCommand::UpdateConfig(Box::new(running_config)),
    )
    .expect("thaw");
    world.step(DT);
    assert_ne!(world.positions(), held.as_slice(), "motion resumes after thaw");
}

#[test]
fn reset_command_respawns_without_touching_tick() {
    let mut world = FlockWorld::new(seeded_config(31, 128)).expect("world");
    for _ in 0..8 {
        world.step(DT);
    }
    let drifted: Vec<Vec2> = world.positions().to_vec();

    apply_control_command(&mut world, ControlCommand::Reset).expect("reset");
    assert_ne!(world.positions(), drifted.as_slice());
    assert_eq!(world.tick(), Tick(8), "reset repositions agents, not the clock");

    world.reset_time();
    assert_eq!(world.tick(), Tick::zero());
}

#[test]
fn history_retains_the_most_recent_summaries() {
    let config = FlockConfig {
        history_capacity: 8,
        ..seeded_config(17, 32)
    };
    let mut world = FlockWorld::new(config).expect("world");
    for _ in 0..20 {
        world.step(DT);
    }

    let ticks: Vec<u64> = world.history().map(|summary| summary.tick.0).collect();
    assert_eq!(ticks, (13..=20).collect::<Vec<u64>>());
    let latest = world.latest_summary().expect("latest");
    assert_eq!(latest.tick, Tick(20));
    assert_eq!(latest.active, 32);
}

#[test]
fn regression_seeded_run_stays_within_envelope() {
    let summary = run_flock_summary(42, 40);
    assert_eq!(summary.tick, Tick(40));
    assert_eq!(summary.active, 1_024);
    assert!(
        summary.average_speed.is_finite() && summary.average_speed >= 0.0,
        "average speed should be a sane number, got {}",
        summary.average_speed
    );
    assert!(
        summary.average_speed <= summary.max_speed + 1e-6,
        "average speed {} cannot exceed peak {}",
        summary.average_speed,
        summary.max_speed
    );
    assert!(
        summary.max_speed <= 10.0 + 1e-3,
        "peak speed should respect the configured ceiling, got {}",
        summary.max_speed
    );
    assert!(
        summary.centroid.length() < 16.0,
        "flock centroid should stay near the arena, got {:?}",
        summary.centroid
    );
}
