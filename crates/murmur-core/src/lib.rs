//! Core simulation kernel for the murmur flocking workspace.
//!
//! A [`FlockWorld`] owns a fixed-capacity agent population and advances it
//! one fixed time-step at a time. Each step reads a single pre-step snapshot
//! and writes a separate back buffer, so agents never observe one another's
//! in-progress updates; configuration mutations travel as
//! [`ControlCommand`]s and are applied only between steps.

use murmur_index::{BruteForceIndex, NeighborhoodIndex, UniformGridIndex};
use ordered_float::OrderedFloat;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Range, RangeInclusive, Sub};
use thiserror::Error;

/// Hard ceiling on the population capacity a world may be built with.
pub const MAX_CAPACITY: usize = 60_000;

/// Squared distance below which a separation pair counts as coincident and is skipped.
const MIN_SEPARATION_DIST_SQ: f32 = 1e-12;

/// Smallest grid cell edge, used when every interaction radius is zero.
const MIN_GRID_CELL: f32 = 1e-3;

/// Errors raised at configuration acceptance or by control commands.
#[derive(Debug, Error)]
pub enum FlockError {
    /// Structurally unusable configuration values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// A request to activate more agents than the world was built for.
    #[error("active count {requested} exceeds capacity {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },
}

/// Plain 2D vector used for positions, velocities, and steering forces.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    /// The zero vector.
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Construct a new vector.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean length.
    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    /// Euclidean length.
    #[must_use]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Scale the vector down so its length does not exceed `max`.
    #[must_use]
    pub fn clamp_length(self, max: f32) -> Self {
        if max <= 0.0 {
            return Self::ZERO;
        }
        let len_sq = self.length_squared();
        if len_sq > max * max {
            self * (max / len_sq.sqrt())
        } else {
            self
        }
    }
}

impl Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f32> for Vec2 {
    type Output = Self;

    fn div(self, rhs: f32) -> Self {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

impl Neg for Vec2 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

/// High level simulation clock (steps completed since construction).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Aggregate diagnostics captured after each completed step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepSummary {
    pub tick: Tick,
    pub active: usize,
    pub average_speed: f32,
    pub max_speed: f32,
    pub centroid: Vec2,
}

/// Initial placement law used when a world is seeded or reset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpawnMode {
    /// Agents spawn in disks of `spawn_radius` around cluster points sampled
    /// uniformly inside the `spawn_spread` rectangle.
    Clustered { clusters: u32 },
    /// Agents spawn uniformly over the whole simulation area.
    Uniform,
}

impl Default for SpawnMode {
    fn default() -> Self {
        Self::Clustered { clusters: 1 }
    }
}

/// Neighbor query implementation selected by configuration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NeighborSearch {
    /// Uniform grid sized to the largest interaction radius.
    #[default]
    Grid,
    /// Exhaustive pairwise scan; the reference semantics.
    BruteForce,
}

/// Tunable simulation parameters plus population and plumbing settings.
///
/// Out-of-range tunables are clamped into their documented ranges at
/// acceptance time ([`FlockConfig::sanitized`]); capacity violations are hard
/// errors. Capacity itself is fixed for the lifetime of a world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlockConfig {
    /// Allocated population bound; immutable after construction.
    pub capacity: usize,
    /// Number of agents participating in each step.
    pub active_count: usize,
    /// Seed for the world RNG; drawn from entropy when absent.
    pub rng_seed: Option<u64>,
    /// Initial placement law.
    pub spawn: SpawnMode,
    /// Disk radius around each spawn cluster point.
    pub spawn_radius: f32,
    /// Upper bound on initial speed; zero spawns agents at rest.
    pub spawn_speed: f32,
    /// Rectangle (centered on the origin) in which cluster points are sampled.
    pub spawn_spread: Vec2,
    /// Velocity magnitude ceiling.
    pub max_speed: f32,
    /// Steering magnitude ceiling applied before integration.
    pub max_steering_force: f32,
    /// Neighbor radius for the cohesion influence.
    pub cohesion_radius: f32,
    /// Weight of the cohesion influence.
    pub cohesion_weight: f32,
    /// Neighbor radius for the alignment influence.
    pub alignment_radius: f32,
    /// Weight of the alignment influence.
    pub alignment_weight: f32,
    /// Neighbor radius for the separation influence.
    pub separation_radius: f32,
    /// Weight of the separation influence.
    pub separation_weight: f32,
    /// Soft simulation area extents (full widths, centered on the origin).
    pub area_size: Vec2,
    /// Width of the containment ramp outside each area edge.
    pub area_softness: Vec2,
    /// Containment strength reached at the outer edge of the ramp.
    pub area_weight: f32,
    /// Time dilation applied to the caller's `dt`; zero freezes motion.
    pub time_scale: f32,
    /// Neighbor query implementation.
    pub neighbor_search: NeighborSearch,
    /// Active count at or above which step stages fan out across rayon.
    pub parallel_threshold: usize,
    /// Bound on retained step summaries.
    pub history_capacity: usize,
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_CAPACITY,
            active_count: 10_000,
            rng_seed: None,
            spawn: SpawnMode::default(),
            spawn_radius: 1.0,
            spawn_speed: 0.1,
            spawn_spread: Vec2::ZERO,
            max_speed: 10.0,
            max_steering_force: 1.0,
            cohesion_radius: 1.0,
            cohesion_weight: 0.5,
            alignment_radius: 1.0,
            alignment_weight: 0.5,
            separation_radius: 0.5,
            separation_weight: 2.0,
            area_size: Vec2::new(32.0, 32.0),
            area_softness: Vec2::new(8.0, 8.0),
            area_weight: 10.0,
            time_scale: 1.0,
            neighbor_search: NeighborSearch::default(),
            parallel_threshold: 2_048,
            history_capacity: 256,
        }
    }
}

impl FlockConfig {
    /// Valid range for `max_speed`.
    pub const MAX_SPEED_RANGE: RangeInclusive<f32> = 0.0..=50.0;
    /// Valid range for `max_steering_force`.
    pub const MAX_STEERING_RANGE: RangeInclusive<f32> = 0.0..=10.0;
    /// Valid range for the three interaction radii.
    pub const RADIUS_RANGE: RangeInclusive<f32> = 0.0..=10.0;
    /// Valid range for the cohesion and alignment weights.
    pub const WEIGHT_RANGE: RangeInclusive<f32> = 0.0..=10.0;
    /// Valid range for the separation weight.
    pub const SEPARATION_WEIGHT_RANGE: RangeInclusive<f32> = 0.0..=20.0;
    /// Valid range for each `area_size` axis.
    pub const AREA_SIZE_RANGE: RangeInclusive<f32> = 1.0..=256.0;
    /// Valid range for each `area_softness` axis; the floor keeps the
    /// containment ramp divisor away from zero.
    pub const AREA_SOFTNESS_RANGE: RangeInclusive<f32> = 1e-3..=64.0;
    /// Valid range for `area_weight`.
    pub const AREA_WEIGHT_RANGE: RangeInclusive<f32> = 0.0..=100.0;
    /// Valid range for `time_scale`.
    pub const TIME_SCALE_RANGE: RangeInclusive<f32> = 0.0..=10.0;
    /// Valid range for `spawn_radius`.
    pub const SPAWN_RADIUS_RANGE: RangeInclusive<f32> = 0.0..=64.0;
    /// Valid range for `spawn_speed`.
    pub const SPAWN_SPEED_RANGE: RangeInclusive<f32> = 0.0..=10.0;
    /// Valid range for each `spawn_spread` axis.
    pub const SPAWN_SPREAD_RANGE: RangeInclusive<f32> = 0.0..=256.0;
    /// Valid range for the clustered spawn's cluster count.
    pub const SPAWN_CLUSTERS_RANGE: RangeInclusive<u32> = 1..=MAX_CAPACITY as u32;
    /// Valid range for `history_capacity`.
    pub const HISTORY_CAPACITY_RANGE: RangeInclusive<usize> = 1..=(1 << 20);

    /// Clamp every tunable into its documented range, then enforce the hard
    /// preconditions (finite values, non-zero capacity within
    /// [`MAX_CAPACITY`], active count within capacity).
    pub fn sanitized(mut self) -> Result<Self, FlockError> {
        if !self.is_finite() {
            return Err(FlockError::InvalidConfig("parameters must be finite"));
        }
        if self.capacity == 0 {
            return Err(FlockError::InvalidConfig("capacity must be non-zero"));
        }
        if self.capacity > MAX_CAPACITY {
            return Err(FlockError::InvalidConfig("capacity exceeds MAX_CAPACITY"));
        }
        if self.active_count > self.capacity {
            return Err(FlockError::CapacityExceeded {
                requested: self.active_count,
                capacity: self.capacity,
            });
        }
        if self.history_capacity == 0 {
            return Err(FlockError::InvalidConfig("history_capacity must be non-zero"));
        }
        if let SpawnMode::Clustered { clusters } = self.spawn
            && clusters == 0
        {
            return Err(FlockError::InvalidConfig(
                "clustered spawn needs at least one cluster",
            ));
        }
        self.max_speed = clamp_to(self.max_speed, &Self::MAX_SPEED_RANGE);
        self.max_steering_force = clamp_to(self.max_steering_force, &Self::MAX_STEERING_RANGE);
        self.cohesion_radius = clamp_to(self.cohesion_radius, &Self::RADIUS_RANGE);
        self.alignment_radius = clamp_to(self.alignment_radius, &Self::RADIUS_RANGE);
        self.separation_radius = clamp_to(self.separation_radius, &Self::RADIUS_RANGE);
        self.cohesion_weight = clamp_to(self.cohesion_weight, &Self::WEIGHT_RANGE);
        self.alignment_weight = clamp_to(self.alignment_weight, &Self::WEIGHT_RANGE);
        self.separation_weight = clamp_to(self.separation_weight, &Self::SEPARATION_WEIGHT_RANGE);
        self.area_size.x = clamp_to(self.area_size.x, &Self::AREA_SIZE_RANGE);
        self.area_size.y = clamp_to(self.area_size.y, &Self::AREA_SIZE_RANGE);
        self.area_softness.x = clamp_to(self.area_softness.x, &Self::AREA_SOFTNESS_RANGE);
        self.area_softness.y = clamp_to(self.area_softness.y, &Self::AREA_SOFTNESS_RANGE);
        self.area_weight = clamp_to(self.area_weight, &Self::AREA_WEIGHT_RANGE);
        self.time_scale = clamp_to(self.time_scale, &Self::TIME_SCALE_RANGE);
        self.spawn_radius = clamp_to(self.spawn_radius, &Self::SPAWN_RADIUS_RANGE);
        self.spawn_speed = clamp_to(self.spawn_speed, &Self::SPAWN_SPEED_RANGE);
        self.spawn_spread.x = clamp_to(self.spawn_spread.x, &Self::SPAWN_SPREAD_RANGE);
        self.spawn_spread.y = clamp_to(self.spawn_spread.y, &Self::SPAWN_SPREAD_RANGE);
        self.history_capacity = self.history_capacity.clamp(
            *Self::HISTORY_CAPACITY_RANGE.start(),
            *Self::HISTORY_CAPACITY_RANGE.end(),
        );
        if let SpawnMode::Clustered { clusters } = &mut self.spawn {
            *clusters = (*clusters).clamp(
                *Self::SPAWN_CLUSTERS_RANGE.start(),
                *Self::SPAWN_CLUSTERS_RANGE.end(),
            );
        }
        Ok(self)
    }

    /// Largest of the three interaction radii; the per-agent query radius.
    #[must_use]
    pub fn interaction_radius(&self) -> f32 {
        self.cohesion_radius
            .max(self.alignment_radius)
            .max(self.separation_radius)
    }

    fn is_finite(&self) -> bool {
        [
            self.max_speed,
            self.max_steering_force,
            self.cohesion_radius,
            self.cohesion_weight,
            self.alignment_radius,
            self.alignment_weight,
            self.separation_radius,
            self.separation_weight,
            self.area_size.x,
            self.area_size.y,
            self.area_softness.x,
            self.area_softness.y,
            self.area_weight,
            self.time_scale,
            self.spawn_radius,
            self.spawn_speed,
            self.spawn_spread.x,
            self.spawn_spread.y,
        ]
        .iter()
        .all(|value| value.is_finite())
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

fn clamp_to(value: f32, range: &RangeInclusive<f32>) -> f32 {
    value.clamp(*range.start(), *range.end())
}

/// Column-oriented agent storage (position and velocity columns side by side).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentColumns {
    positions: Vec<Vec2>,
    velocities: Vec<Vec2>,
}

impl AgentColumns {
    /// Allocate `capacity` zeroed agents.
    #[must_use]
    pub fn zeroed(capacity: usize) -> Self {
        Self {
            positions: vec![Vec2::ZERO; capacity],
            velocities: vec![Vec2::ZERO; capacity],
        }
    }

    /// Number of allocated slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true when no slots are allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Position column over the full capacity.
    #[must_use]
    pub fn positions(&self) -> &[Vec2] {
        &self.positions
    }

    /// Velocity column over the full capacity.
    #[must_use]
    pub fn velocities(&self) -> &[Vec2] {
        &self.velocities
    }

    fn set(&mut self, idx: usize, position: Vec2, velocity: Vec2) {
        self.positions[idx] = position;
        self.velocities[idx] = velocity;
    }

    fn zero_range(&mut self, range: Range<usize>) {
        self.positions[range.clone()].fill(Vec2::ZERO);
        self.velocities[range].fill(Vec2::ZERO);
    }

    fn copy_range_from(&mut self, other: &Self, range: Range<usize>) {
        self.positions[range.clone()].copy_from_slice(&other.positions[range.clone()]);
        self.velocities[range.clone()].copy_from_slice(&other.velocities[range]);
    }

    fn split_prefix_mut(&mut self, len: usize) -> (&mut [Vec2], &mut [Vec2]) {
        (&mut self.positions[..len], &mut self.velocities[..len])
    }
}

/// Configuration mutations applied to a world between ticks.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    /// Replace the tunable configuration; capacity changes are rejected.
    UpdateConfig(Box<FlockConfig>),
    /// Grow or shrink the active prefix of the population.
    SetActiveCount(usize),
    /// Re-randomize the full population per the configured spawn mode.
    Reset,
}

/// Apply a control command to the world. Called by drivers at tick
/// boundaries, never while a step is in flight.
pub fn apply_control_command(
    world: &mut FlockWorld,
    command: ControlCommand,
) -> Result<(), FlockError> {
    match command {
        ControlCommand::UpdateConfig(config) => world.apply_config(*config),
        ControlCommand::SetActiveCount(count) => world.set_active_count(count),
        ControlCommand::Reset => {
            world.reset();
            Ok(())
        }
    }
}

/// Per-step constants snapshotted from the configuration before fan-out.
#[derive(Debug, Clone, Copy)]
struct SteeringParams {
    cohesion_radius_sq: f32,
    cohesion_weight: f32,
    alignment_radius_sq: f32,
    alignment_weight: f32,
    separation_radius_sq: f32,
    separation_weight: f32,
    query_radius_sq: f32,
    half_area: Vec2,
    softness: Vec2,
    area_weight: f32,
    max_steering_force: f32,
}

impl SteeringParams {
    fn from_config(config: &FlockConfig) -> Self {
        let query_radius = config.interaction_radius();
        Self {
            cohesion_radius_sq: config.cohesion_radius * config.cohesion_radius,
            cohesion_weight: config.cohesion_weight,
            alignment_radius_sq: config.alignment_radius * config.alignment_radius,
            alignment_weight: config.alignment_weight,
            separation_radius_sq: config.separation_radius * config.separation_radius,
            separation_weight: config.separation_weight,
            query_radius_sq: query_radius * query_radius,
            half_area: config.area_size * 0.5,
            softness: config.area_softness,
            area_weight: config.area_weight,
            max_steering_force: config.max_steering_force,
        }
    }
}

/// Combined steering for one agent: cohesion, alignment, separation, and
/// boundary containment, clamped to the steering ceiling.
fn steering_for(
    idx: usize,
    positions: &[Vec2],
    velocities: &[Vec2],
    index: &dyn NeighborhoodIndex,
    params: &SteeringParams,
) -> Vec2 {
    let position = positions[idx];
    let mut cohesion_sum = Vec2::ZERO;
    let mut cohesion_count = 0usize;
    let mut alignment_sum = Vec2::ZERO;
    let mut alignment_count = 0usize;
    let mut separation_sum = Vec2::ZERO;

    if params.query_radius_sq > 0.0 {
        index.neighbors_within(
            idx,
            params.query_radius_sq,
            &mut |other, dist_sq: OrderedFloat<f32>| {
                let dist_sq = dist_sq.into_inner();
                if dist_sq < params.cohesion_radius_sq {
                    cohesion_sum += positions[other];
                    cohesion_count += 1;
                }
                if dist_sq < params.alignment_radius_sq {
                    alignment_sum += velocities[other];
                    alignment_count += 1;
                }
                if dist_sq < params.separation_radius_sq && dist_sq > MIN_SEPARATION_DIST_SQ {
                    // Unit direction away from the neighbor, weighted by 1/d.
                    separation_sum += (position - positions[other]) / dist_sq;
                }
            },
        );
    }

    let mut steering = Vec2::ZERO;
    if cohesion_count > 0 {
        let centroid = cohesion_sum / cohesion_count as f32;
        steering += (centroid - position) * params.cohesion_weight;
    }
    if alignment_count > 0 {
        let mean_velocity = alignment_sum / alignment_count as f32;
        steering += (mean_velocity - velocities[idx]) * params.alignment_weight;
    }
    steering += separation_sum * params.separation_weight;
    steering += containment(position, params);
    steering.clamp_length(params.max_steering_force)
}

/// Boundary force pushing the agent back toward the area center.
///
/// Per axis: zero while inside `half_area`, then a linear ramp across the
/// softness margin reaching `area_weight` at the outer edge and growing
/// unbounded beyond it.
fn containment(position: Vec2, params: &SteeringParams) -> Vec2 {
    let mut force = Vec2::ZERO;
    let over_x = position.x.abs() - params.half_area.x;
    if over_x > 0.0 {
        force.x = -position.x.signum() * params.area_weight * (over_x / params.softness.x);
    }
    let over_y = position.y.abs() - params.half_area.y;
    if over_y > 0.0 {
        force.y = -position.y.signum() * params.area_weight * (over_y / params.softness.y);
    }
    force
}

/// Uniform sample from the closed unit disk (rejection sampling).
fn unit_disk(rng: &mut SmallRng) -> Vec2 {
    loop {
        let candidate = Vec2::new(
            rng.random_range(-1.0_f32..=1.0),
            rng.random_range(-1.0_f32..=1.0),
        );
        if candidate.length_squared() <= 1.0 {
            return candidate;
        }
    }
}

fn build_index(config: &FlockConfig) -> Box<dyn NeighborhoodIndex + Send + Sync> {
    match config.neighbor_search {
        NeighborSearch::Grid => Box::new(UniformGridIndex::new(
            config.interaction_radius().max(MIN_GRID_CELL),
        )),
        NeighborSearch::BruteForce => Box::new(BruteForceIndex::new()),
    }
}

/// Owns the agent population and advances it one fixed time-step at a time.
pub struct FlockWorld {
    config: FlockConfig,
    tick: Tick,
    rng: SmallRng,
    agents: AgentColumns,
    scratch: AgentColumns,
    steering: Vec<Vec2>,
    index: Box<dyn NeighborhoodIndex + Send + Sync>,
    pair_scratch: Vec<(f32, f32)>,
    history: VecDeque<StepSummary>,
}

impl fmt::Debug for FlockWorld {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlockWorld")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("active_count", &self.config.active_count)
            .finish()
    }
}

impl FlockWorld {
    /// Instantiate a world from the supplied configuration and seed its
    /// population per the configured spawn mode.
    pub fn new(config: FlockConfig) -> Result<Self, FlockError> {
        let config = config.sanitized()?;
        let rng = config.seeded_rng();
        let index = build_index(&config);
        let capacity = config.capacity;
        let history_capacity = config.history_capacity;
        let mut world = Self {
            tick: Tick::zero(),
            rng,
            agents: AgentColumns::zeroed(capacity),
            scratch: AgentColumns::zeroed(capacity),
            steering: vec![Vec2::ZERO; capacity],
            index,
            pair_scratch: Vec::with_capacity(capacity),
            history: VecDeque::with_capacity(history_capacity),
            config,
        };
        world.reset();
        Ok(world)
    }

    /// Re-randomize every active agent per the configured spawn mode and zero
    /// the inactive tail. Serviced between ticks, never mid-step.
    pub fn reset(&mut self) {
        let active = self.config.active_count;
        match self.config.spawn {
            SpawnMode::Clustered { clusters } => self.spawn_clustered(active, clusters as usize),
            SpawnMode::Uniform => self.spawn_uniform(active),
        }
        if active < self.config.capacity {
            self.agents.zero_range(active..self.config.capacity);
        }
        let capacity = self.config.capacity;
        self.scratch.copy_range_from(&self.agents, 0..capacity);
        self.steering.fill(Vec2::ZERO);
    }

    fn spawn_clustered(&mut self, active: usize, clusters: usize) {
        if active == 0 {
            return;
        }
        let spread = self.config.spawn_spread;
        let centers: Vec<Vec2> = (0..clusters)
            .map(|_| {
                Vec2::new(
                    self.rng.random_range(-spread.x * 0.5..=spread.x * 0.5),
                    self.rng.random_range(-spread.y * 0.5..=spread.y * 0.5),
                )
            })
            .collect();
        for idx in 0..active {
            // Contiguous blocks per cluster, remainder spread across blocks.
            let center = centers[idx * clusters / active];
            let offset =
                unit_disk(&mut self.rng) * self.rng.random_range(0.0..=self.config.spawn_radius);
            let velocity = self.spawn_velocity();
            self.agents.set(idx, center + offset, velocity);
        }
    }

    fn spawn_uniform(&mut self, active: usize) {
        let half = self.config.area_size * 0.5;
        for idx in 0..active {
            let position = Vec2::new(
                self.rng.random_range(-half.x..=half.x),
                self.rng.random_range(-half.y..=half.y),
            );
            let velocity = self.spawn_velocity();
            self.agents.set(idx, position, velocity);
        }
    }

    fn spawn_velocity(&mut self) -> Vec2 {
        if self.config.spawn_speed <= 0.0 {
            Vec2::ZERO
        } else {
            unit_disk(&mut self.rng) * self.config.spawn_speed
        }
    }

    /// Change the number of participating agents between ticks.
    ///
    /// Growing the prefix brings agents back exactly as they were frozen
    /// (zeroed at the origin unless a reset placed them); shrinking freezes
    /// the tail in place. Requests beyond capacity are a hard error.
    pub fn set_active_count(&mut self, count: usize) -> Result<(), FlockError> {
        if count > self.config.capacity {
            return Err(FlockError::CapacityExceeded {
                requested: count,
                capacity: self.config.capacity,
            });
        }
        let previous = self.config.active_count;
        if count < previous {
            // Keep both buffers agreeing on the newly inactive range.
            self.scratch.copy_range_from(&self.agents, count..previous);
        }
        self.config.active_count = count;
        self.debug_assert_tail_coherent();
        Ok(())
    }

    /// Replace the configuration between ticks. Tunables are clamped, the
    /// active count is adjusted, and capacity changes are rejected.
    pub fn apply_config(&mut self, config: FlockConfig) -> Result<(), FlockError> {
        let config = config.sanitized()?;
        if config.capacity != self.config.capacity {
            return Err(FlockError::InvalidConfig(
                "capacity cannot change at runtime; build a new world",
            ));
        }
        let previous_active = self.config.active_count;
        let reseed = config.rng_seed != self.config.rng_seed;
        self.config = config;
        if self.config.active_count < previous_active {
            let range = self.config.active_count..previous_active;
            self.scratch.copy_range_from(&self.agents, range);
        }
        if reseed {
            self.rng = self.config.seeded_rng();
        }
        self.index = build_index(&self.config);
        while self.history.len() > self.config.history_capacity {
            self.history.pop_front();
        }
        self.debug_assert_tail_coherent();
        Ok(())
    }

    /// Overwrite one agent's state directly (scenario setup and tooling).
    /// Writes land in both buffers so the swap discipline holds.
    pub fn place_agent(
        &mut self,
        idx: usize,
        position: Vec2,
        velocity: Vec2,
    ) -> Result<(), FlockError> {
        if idx >= self.config.capacity {
            return Err(FlockError::CapacityExceeded {
                requested: idx + 1,
                capacity: self.config.capacity,
            });
        }
        self.agents.set(idx, position, velocity);
        self.scratch.set(idx, position, velocity);
        Ok(())
    }

    /// Advance the simulation by one fixed time-step of `dt` seconds.
    ///
    /// Every active agent reads the same pre-step snapshot; results land in
    /// the back buffer, which is swapped in once the stage completes. The
    /// per-agent neighbor reduction runs in a deterministic order, so serial
    /// and parallel execution of the same configuration are bit-identical.
    pub fn step(&mut self, dt: f32) -> StepSummary {
        let dt = dt * self.config.time_scale;
        self.stage_index();
        self.stage_steering();
        self.stage_integrate(dt);
        self.tick = self.tick.next();
        let summary = self.summarize();
        self.push_history(summary.clone());
        summary
    }

    fn stage_index(&mut self) {
        let active = self.config.active_count;
        if active == 0 || self.config.interaction_radius() <= 0.0 {
            return;
        }
        self.pair_scratch.clear();
        self.pair_scratch
            .extend(self.agents.positions()[..active].iter().map(|p| (p.x, p.y)));
        // A failed rebuild keeps the previous index contents; the step still runs.
        let _ = self.index.rebuild(&self.pair_scratch);
    }

    fn stage_steering(&mut self) {
        let active = self.config.active_count;
        if active == 0 {
            return;
        }
        let params = SteeringParams::from_config(&self.config);
        let positions = &self.agents.positions()[..active];
        let velocities = &self.agents.velocities()[..active];
        let index = self.index.as_ref();
        let steering = &mut self.steering[..active];

        if active >= self.config.parallel_threshold {
            steering.par_iter_mut().enumerate().for_each(|(idx, slot)| {
                *slot = steering_for(idx, positions, velocities, index, &params);
            });
        } else {
            for (idx, slot) in steering.iter_mut().enumerate() {
                *slot = steering_for(idx, positions, velocities, index, &params);
            }
        }
    }

    fn stage_integrate(&mut self, dt: f32) {
        let active = self.config.active_count;
        if active == 0 {
            return;
        }
        let max_speed = self.config.max_speed;
        let positions = &self.agents.positions()[..active];
        let velocities = &self.agents.velocities()[..active];
        let steering = &self.steering[..active];
        let (next_positions, next_velocities) = self.scratch.split_prefix_mut(active);

        let integrate = |idx: usize| {
            let velocity = (velocities[idx] + steering[idx] * dt).clamp_length(max_speed);
            let position = positions[idx] + velocity * dt;
            (position, velocity)
        };

        if active >= self.config.parallel_threshold {
            next_positions
                .par_iter_mut()
                .zip(next_velocities.par_iter_mut())
                .enumerate()
                .for_each(|(idx, (position, velocity))| {
                    let (next_position, next_velocity) = integrate(idx);
                    *position = next_position;
                    *velocity = next_velocity;
                });
        } else {
            for idx in 0..active {
                let (next_position, next_velocity) = integrate(idx);
                next_positions[idx] = next_position;
                next_velocities[idx] = next_velocity;
            }
        }
        std::mem::swap(&mut self.agents, &mut self.scratch);
        self.debug_assert_tail_coherent();
    }

    fn summarize(&self) -> StepSummary {
        let active = self.config.active_count;
        let mut speed_sum = 0.0_f32;
        let mut top_speed = 0.0_f32;
        let mut centroid_sum = Vec2::ZERO;
        for idx in 0..active {
            let speed = self.agents.velocities()[idx].length();
            speed_sum += speed;
            if speed > top_speed {
                top_speed = speed;
            }
            centroid_sum += self.agents.positions()[idx];
        }
        let (average_speed, centroid) = if active > 0 {
            (speed_sum / active as f32, centroid_sum / active as f32)
        } else {
            (0.0, Vec2::ZERO)
        };
        StepSummary {
            tick: self.tick,
            active,
            average_speed,
            max_speed: top_speed,
            centroid,
        }
    }

    fn push_history(&mut self, summary: StepSummary) {
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }

    fn debug_assert_tail_coherent(&self) {
        let tail = self.config.active_count..;
        debug_assert!(
            self.agents.positions()[tail.clone()] == self.scratch.positions()[tail.clone()]
                && self.agents.velocities()[tail.clone()] == self.scratch.velocities()[tail],
            "front and back buffers must agree on the inactive tail"
        );
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &FlockConfig {
        &self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Resets the tick counter back to zero (useful for restarts).
    pub fn reset_time(&mut self) {
        self.tick = Tick::zero();
    }

    /// Number of agents participating in each step.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.config.active_count
    }

    /// Allocated population bound.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Positions of the active prefix, read-only.
    #[must_use]
    pub fn positions(&self) -> &[Vec2] {
        &self.agents.positions()[..self.config.active_count]
    }

    /// Velocities of the active prefix, read-only.
    #[must_use]
    pub fn velocities(&self) -> &[Vec2] {
        &self.agents.velocities()[..self.config.active_count]
    }

    /// Steering vectors computed during the most recent step.
    #[must_use]
    pub fn steering(&self) -> &[Vec2] {
        &self.steering[..self.config.active_count]
    }

    /// Full-capacity agent columns, including the inactive tail.
    #[must_use]
    pub fn columns(&self) -> &AgentColumns {
        &self.agents
    }

    /// Iterate over retained step summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &StepSummary> {
        self.history.iter()
    }

    /// Most recent step summary, if any step has run.
    #[must_use]
    pub fn latest_summary(&self) -> Option<&StepSummary> {
        self.history.back()
    }

    /// Borrow the world RNG mutably for deterministic sampling.
    #[must_use]
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }
}
