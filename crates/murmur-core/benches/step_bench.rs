use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use murmur_core::{FlockConfig, FlockWorld, NeighborSearch, Vec2};
use std::time::Duration;

fn bench_flock_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("flock_step");
    // Longer iteration times give stabler numbers; all knobs accept env overrides
    let samples: usize = std::env::var("MURMUR_BENCH_SAMPLES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(30);
    let warm: u64 = std::env::var("MURMUR_BENCH_WARMUP_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(2);
    let measure: u64 = std::env::var("MURMUR_BENCH_MEASURE_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(10);
    group.sample_size(samples);
    group.warm_up_time(Duration::from_secs(warm));
    group.measurement_time(Duration::from_secs(measure));
    // Steps per bench iteration (override via MURMUR_BENCH_STEPS)
    let steps: usize = std::env::var("MURMUR_BENCH_STEPS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64);
    let agents_list: Vec<usize> = std::env::var("MURMUR_BENCH_AGENTS")
        .ok()
        .map(|s| {
            s.split(',')
                .filter_map(|t| t.trim().parse::<usize>().ok())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| vec![1000_usize, 5000, 20000]);
    for &agents in &agents_list {
        for search in [NeighborSearch::Grid, NeighborSearch::BruteForce] {
            // Brute force is quadratic; skip it where it would dominate the run
            if matches!(search, NeighborSearch::BruteForce) && agents > 5000 {
                continue;
            }
            let label = match search {
                NeighborSearch::Grid => "grid",
                NeighborSearch::BruteForce => "brute",
            };
            group.bench_function(format!("steps{steps}_agents{agents}_{label}"), |b| {
                b.iter_batched(
                    || {
                        let config = FlockConfig {
                            active_count: agents,
                            rng_seed: Some(0xBEEF),
                            // Spread the spawn so neighbor density stays realistic
                            spawn_radius: 8.0,
                            spawn_spread: Vec2::new(24.0, 24.0),
                            neighbor_search: search,
                            history_capacity: 1,
                            ..FlockConfig::default()
                        };
                        FlockWorld::new(config).expect("world")
                    },
                    |mut world| {
                        for _ in 0..steps {
                            world.step(0.02);
                        }
                    },
                    BatchSize::LargeInput,
                );
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_flock_steps);
criterion_main!(benches);
