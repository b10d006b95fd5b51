//! Spatial indexing abstractions for agent neighborhood queries.
//!
//! The flocking kernel asks one question of its surroundings: "which other
//! agents sit strictly closer than a given radius?". Implementations answer
//! it through [`NeighborhoodIndex::neighbors_within`], passing each hit's
//! squared distance so callers can gate multiple interaction radii from a
//! single query. Membership is exclusive (`dist² < radius²`) and an agent is
//! never reported as its own neighbor; both implementations here honor the
//! same contract so they are interchangeable.

use std::collections::HashMap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., non-positive cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Common behaviour exposed by neighborhood indices.
pub trait NeighborhoodIndex {
    /// Rebuild internal structures from agent positions.
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError>;

    /// Visit neighbors of `agent_idx` strictly within the provided squared radius.
    ///
    /// The visitor receives the neighbor's index and squared distance. Visit
    /// order is deterministic for a given implementation and rebuild, but
    /// differs between implementations.
    fn neighbors_within(
        &self,
        agent_idx: usize,
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    );
}

/// Reference index that compares every pair of agents.
///
/// O(n) per query, O(n²) per simulation step. Visits neighbors in ascending
/// index order, which makes it the fixture other implementations are tested
/// against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BruteForceIndex {
    #[serde(skip)]
    positions: Vec<(f32, f32)>,
}

impl BruteForceIndex {
    /// Create an empty brute-force index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NeighborhoodIndex for BruteForceIndex {
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError> {
        self.positions.clear();
        self.positions.extend_from_slice(positions);
        Ok(())
    }

    fn neighbors_within(
        &self,
        agent_idx: usize,
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        let Some(&(x, y)) = self.positions.get(agent_idx) else {
            return;
        };
        if radius_sq <= 0.0 {
            return;
        }
        for (other, &(ox, oy)) in self.positions.iter().enumerate() {
            if other == agent_idx {
                continue;
            }
            let dx = ox - x;
            let dy = oy - y;
            let dist_sq = dx * dx + dy * dy;
            if dist_sq < radius_sq {
                visitor(other, OrderedFloat(dist_sq));
            }
        }
    }
}

/// Uniform grid index bucketing agents by floored cell coordinates.
///
/// Cells are keyed by `(i32, i32)` in a hash map, so the plane is unbounded
/// and negative coordinates need no special casing. Queries scan the square
/// ring of cells covering the radius; `cell_size` should be on the order of
/// the largest query radius so that scan stays at 3×3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniformGridIndex {
    /// Edge length of each grid cell used for bucketing agents.
    pub cell_size: f32,
    #[serde(skip)]
    positions: Vec<(f32, f32)>,
    #[serde(skip)]
    buckets: HashMap<(i32, i32), Vec<usize>>,
}

impl UniformGridIndex {
    /// Create a new uniform grid with the provided cell size.
    #[must_use]
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            positions: Vec::new(),
            buckets: HashMap::new(),
        }
    }

    fn cell_of(&self, x: f32, y: f32) -> (i32, i32) {
        (
            (x / self.cell_size).floor() as i32,
            (y / self.cell_size).floor() as i32,
        )
    }
}

impl Default for UniformGridIndex {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl NeighborhoodIndex for UniformGridIndex {
    fn rebuild(&mut self, positions: &[(f32, f32)]) -> Result<(), IndexError> {
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            return Err(IndexError::InvalidConfig("cell_size must be positive"));
        }
        self.positions.clear();
        self.positions.extend_from_slice(positions);
        self.buckets.clear();
        for (idx, &(x, y)) in self.positions.iter().enumerate() {
            let cell = self.cell_of(x, y);
            self.buckets.entry(cell).or_default().push(idx);
        }
        Ok(())
    }

    fn neighbors_within(
        &self,
        agent_idx: usize,
        radius_sq: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        let Some(&(x, y)) = self.positions.get(agent_idx) else {
            return;
        };
        if radius_sq <= 0.0 {
            return;
        }
        let reach = (radius_sq.sqrt() / self.cell_size).ceil() as i32;
        let (cx, cy) = self.cell_of(x, y);
        for dy in -reach..=reach {
            for dx in -reach..=reach {
                let Some(bucket) = self.buckets.get(&(cx + dx, cy + dy)) else {
                    continue;
                };
                for &other in bucket {
                    if other == agent_idx {
                        continue;
                    }
                    let (ox, oy) = self.positions[other];
                    let sx = ox - x;
                    let sy = oy - y;
                    let dist_sq = sx * sx + sy * sy;
                    if dist_sq < radius_sq {
                        visitor(other, OrderedFloat(dist_sq));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::SmallRng};

    fn collect_neighbors(
        index: &dyn NeighborhoodIndex,
        agent_idx: usize,
        radius_sq: f32,
    ) -> Vec<(usize, f32)> {
        let mut hits = Vec::new();
        index.neighbors_within(agent_idx, radius_sq, &mut |other, dist_sq| {
            hits.push((other, dist_sq.into_inner()));
        });
        hits.sort_by_key(|&(other, _)| other);
        hits
    }

    fn scattered_points(count: usize, seed: u64) -> Vec<(f32, f32)> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                (
                    rng.random_range(-20.0_f32..=20.0),
                    rng.random_range(-20.0_f32..=20.0),
                )
            })
            .collect()
    }

    #[test]
    fn brute_force_visits_only_within_radius() {
        let mut index = BruteForceIndex::new();
        index
            .rebuild(&[(0.0, 0.0), (1.0, 0.0), (0.0, 3.0), (5.0, 5.0)])
            .expect("rebuild");
        let hits = collect_neighbors(&index, 0, 4.0);
        assert_eq!(hits.len(), 1, "only the point at distance 1 is in range");
        assert_eq!(hits[0].0, 1);
        assert!((hits[0].1 - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn self_is_never_visited() {
        let mut index = BruteForceIndex::new();
        index
            .rebuild(&[(0.0, 0.0), (0.0, 0.0)])
            .expect("rebuild");
        let hits = collect_neighbors(&index, 0, 1.0);
        assert_eq!(hits, vec![(1, 0.0)], "coincident other agent is a neighbor, self is not");
    }

    #[test]
    fn boundary_distance_is_excluded() {
        let mut index = BruteForceIndex::new();
        index.rebuild(&[(0.0, 0.0), (2.0, 0.0)]).expect("rebuild");
        assert!(
            collect_neighbors(&index, 0, 4.0).is_empty(),
            "distance exactly equal to the radius must be out"
        );
        assert_eq!(collect_neighbors(&index, 0, 4.0 + 1e-3).len(), 1);
    }

    #[test]
    fn grid_matches_brute_force_on_random_points() {
        let points = scattered_points(400, 0x5EED);
        let mut brute = BruteForceIndex::new();
        brute.rebuild(&points).expect("brute rebuild");
        let mut grid = UniformGridIndex::new(2.5);
        grid.rebuild(&points).expect("grid rebuild");

        for agent_idx in 0..points.len() {
            let expected = collect_neighbors(&brute, agent_idx, 2.5 * 2.5);
            let actual = collect_neighbors(&grid, agent_idx, 2.5 * 2.5);
            assert_eq!(actual, expected, "neighbor sets diverge for agent {agent_idx}");
        }
    }

    #[test]
    fn grid_matches_brute_force_when_radius_spans_cells() {
        let points = scattered_points(200, 0xB1D5);
        let mut brute = BruteForceIndex::new();
        brute.rebuild(&points).expect("brute rebuild");
        // Cell edge much smaller than the query radius forces a multi-ring scan.
        let mut grid = UniformGridIndex::new(0.75);
        grid.rebuild(&points).expect("grid rebuild");

        for agent_idx in 0..points.len() {
            let expected = collect_neighbors(&brute, agent_idx, 16.0);
            let actual = collect_neighbors(&grid, agent_idx, 16.0);
            assert_eq!(actual, expected, "neighbor sets diverge for agent {agent_idx}");
        }
    }

    #[test]
    fn grid_handles_negative_coordinates() {
        let mut grid = UniformGridIndex::new(1.0);
        grid.rebuild(&[(-3.2, -3.2), (-3.9, -3.2), (3.2, 3.2)])
            .expect("rebuild");
        let hits = collect_neighbors(&grid, 0, 1.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 1);
    }

    #[test]
    fn grid_rejects_non_positive_cell_size() {
        let mut grid = UniformGridIndex::new(0.0);
        let err = grid.rebuild(&[(0.0, 0.0)]).expect_err("zero cell size");
        assert!(matches!(err, IndexError::InvalidConfig(_)));
    }

    #[test]
    fn queries_are_repeatable() {
        let points = scattered_points(64, 7);
        let mut grid = UniformGridIndex::new(2.0);
        grid.rebuild(&points).expect("rebuild");

        let mut first = Vec::new();
        grid.neighbors_within(5, 9.0, &mut |other, dist_sq| first.push((other, dist_sq)));
        let mut second = Vec::new();
        grid.neighbors_within(5, 9.0, &mut |other, dist_sq| second.push((other, dist_sq)));
        assert_eq!(first, second, "visit order must be stable between queries");
    }

    #[test]
    fn out_of_range_agent_visits_nothing() {
        let mut index = BruteForceIndex::new();
        index.rebuild(&[(0.0, 0.0)]).expect("rebuild");
        assert!(collect_neighbors(&index, 9, 100.0).is_empty());

        let mut grid = UniformGridIndex::new(1.0);
        grid.rebuild(&[(0.0, 0.0)]).expect("rebuild");
        assert!(collect_neighbors(&grid, 9, 100.0).is_empty());
    }

    #[test]
    fn zero_radius_visits_nothing() {
        let mut index = BruteForceIndex::new();
        index
            .rebuild(&[(0.0, 0.0), (0.0, 0.0)])
            .expect("rebuild");
        assert!(collect_neighbors(&index, 0, 0.0).is_empty());
    }
}
