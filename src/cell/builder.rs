//! Drives the construction of one complete Voronoi cell from a candidate
//! stream.

use glam::DVec3;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::cell::{ClipOutcome, ConvexCell};
use crate::geometry::Aabb;
use crate::neighbors::{NeighborSource, ShellStep};

/// Default relative tolerance below which a clip is treated as a negligible
/// nick or a degenerate configuration.
pub const DEFAULT_PRUNE_TOLERANCE: f64 = 1e-6;

/// How often a degenerate clip is retried with a perturbed plane before
/// giving up on the neighbor.
const MAX_PERTURBATION_ATTEMPTS: u32 = 12;

/// Per-cell clipping parameters.
#[derive(Clone, Debug)]
pub struct ClipParams {
    /// Hard upper bound on the number of effective clips per cell. The cell
    /// is returned as-is when the bound is hit.
    pub max_clips: usize,
    /// Relative tolerance for pruning and degeneracy detection.
    pub prune_tolerance: f64,
}

impl Default for ClipParams {
    fn default() -> Self {
        Self {
            max_clips: usize::MAX,
            prune_tolerance: DEFAULT_PRUNE_TOLERANCE,
        }
    }
}

/// Quality counters for one constructed cell.
#[derive(Clone, Copy, Debug, Default)]
pub struct CellStats {
    /// Effective clips applied.
    pub clips: usize,
    /// Candidates whose cut was discarded as numerically negligible,
    /// including neighbors that stayed degenerate through all retries.
    pub prunes: usize,
    /// Perturbed retries of degenerate clips.
    pub numeric_retries: usize,
}

/// Reusable per-worker builder. Owns the perturbation rng; re-seeded from the
/// generator id for every cell, so results do not depend on which worker
/// builds which cell.
pub struct CellBuilder {
    rng: SmallRng,
}

impl Default for CellBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CellBuilder {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::seed_from_u64(0),
        }
    }

    /// Build the complete Voronoi cell of one generator by clipping against
    /// candidates from the neighbor source until the Voronoi flower is
    /// provably free of further candidates.
    pub fn build<S: NeighborSource + ?Sized>(
        &mut self,
        cell: &mut ConvexCell,
        generator: usize,
        loc: DVec3,
        source: &S,
        bounds: &Aabb,
        params: &ClipParams,
    ) -> CellStats {
        cell.initialize(generator, loc, bounds);
        self.rng = SmallRng::seed_from_u64(generator as u64);
        let mut stats = CellStats::default();

        let mut cursor = source.begin_shells(loc);
        'shells: loop {
            let ShellStep::Shell {
                candidates,
                next_min_dist2,
            } = cursor.next_shell(None)
            else {
                break;
            };
            for &(neighbor, dist2) in candidates {
                if neighbor == generator {
                    continue;
                }
                if cell.num_clips() >= params.max_clips {
                    break 'shells;
                }
                // Candidates arrive sorted by distance, so the first one
                // beyond the circumflower ends the whole search.
                if !cell.in_circum_flower(dist2) {
                    break 'shells;
                }
                let neighbor_loc = source.position(neighbor);
                match cell.clip(neighbor, neighbor_loc, params.prune_tolerance) {
                    ClipOutcome::Intersection | ClipOutcome::NoIntersection => (),
                    ClipOutcome::Pruned => stats.prunes += 1,
                    ClipOutcome::Numeric => {
                        self.retry_degenerate(cell, neighbor, neighbor_loc, params, &mut stats)
                    }
                }
            }
            if next_min_dist2 > cell.circumflower2() {
                break;
            }
        }
        stats.clips = cell.num_clips();
        stats
    }

    /// Retry a degenerate clip with increasingly perturbed planes. A
    /// neighbor that stays degenerate is skipped and counted as a prune; the
    /// resulting local asymmetry, if any, is repaired by graph validation.
    fn retry_degenerate(
        &mut self,
        cell: &mut ConvexCell,
        neighbor: usize,
        neighbor_loc: DVec3,
        params: &ClipParams,
        stats: &mut CellStats,
    ) {
        for attempt in 0..MAX_PERTURBATION_ATTEMPTS {
            stats.numeric_retries += 1;
            match cell.clip_perturbed(
                neighbor,
                neighbor_loc,
                params.prune_tolerance,
                attempt,
                &mut self.rng,
            ) {
                ClipOutcome::Numeric => continue,
                ClipOutcome::Pruned => {
                    stats.prunes += 1;
                    return;
                }
                ClipOutcome::Intersection | ClipOutcome::NoIntersection => return,
            }
        }
        stats.prunes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Dimensionality;
    use crate::neighbors::PointIndex;

    fn build_cell(
        points: &[DVec3],
        generator: usize,
        params: &ClipParams,
    ) -> (ConvexCell, CellStats) {
        let index = PointIndex::build(points, Dimensionality::ThreeD);
        let bounds = Aabb::from_points(points).padded(0.5, Dimensionality::ThreeD);
        let mut cell = ConvexCell::new(Dimensionality::ThreeD);
        let mut builder = CellBuilder::new();
        let stats = builder.build(
            &mut cell,
            generator,
            points[generator],
            &index,
            &bounds,
            params,
        );
        (cell, stats)
    }

    #[test]
    fn test_single_point_keeps_box() {
        let points = vec![DVec3::splat(0.5)];
        let (cell, stats) = build_cell(&points, 0, &ClipParams::default());
        assert_eq!(cell.num_vertices(), 8);
        assert_eq!(cell.num_faces(), 6);
        assert_eq!(stats.clips, 0);
        assert_eq!(stats.prunes, 0);
    }

    #[test]
    fn test_two_points_split_box() {
        let points = vec![DVec3::new(0.25, 0.5, 0.5), DVec3::new(0.75, 0.5, 0.5)];
        let (cell, stats) = build_cell(&points, 0, &ClipParams::default());
        assert_eq!(stats.clips, 1);
        // The axis-parallel bisector replaces the +x box face entirely.
        assert_eq!(cell.num_faces(), 6);
        assert_eq!(cell.num_vertices(), 8);
        assert!(cell.valid_faces().any(|(_, f)| f.neighbor == 1));
    }

    #[test]
    fn test_coincident_points_are_harmless() {
        let points = vec![DVec3::splat(0.5), DVec3::splat(0.5), DVec3::splat(0.5)];
        let (cell, stats) = build_cell(&points, 1, &ClipParams::default());
        // Coincident neighbors read as NoIntersection; the cell is the box.
        assert_eq!(cell.num_faces(), 6);
        assert_eq!(stats.clips, 0);
        assert_eq!(stats.prunes, 0);
    }

    #[test]
    fn test_max_clips_zero_keeps_box() {
        let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(11);
        let points: Vec<DVec3> = (0..20)
            .map(|_| {
                DVec3::new(
                    rand::Rng::gen(&mut rng),
                    rand::Rng::gen(&mut rng),
                    rand::Rng::gen(&mut rng),
                )
            })
            .collect();
        let params = ClipParams {
            max_clips: 0,
            ..ClipParams::default()
        };
        let (cell, stats) = build_cell(&points, 3, &params);
        assert_eq!(cell.num_faces(), 6);
        assert_eq!(cell.num_vertices(), 8);
        assert_eq!(stats.clips, 0);
    }

    #[test]
    fn test_flower_termination_matches_brute_force() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(123);
        let points: Vec<DVec3> = (0..200)
            .map(|_| DVec3::new(rng.gen(), rng.gen(), rng.gen()))
            .collect();
        let bounds = Aabb::from_points(&points).padded(0.1, Dimensionality::ThreeD);
        let index = PointIndex::build(&points, Dimensionality::ThreeD);
        let params = ClipParams::default();

        let mut builder = CellBuilder::new();
        let mut fast = ConvexCell::new(Dimensionality::ThreeD);
        builder.build(&mut fast, 17, points[17], &index, &bounds, &params);

        // Brute force: clip against every other point, in distance order.
        let mut brute = ConvexCell::new(Dimensionality::ThreeD);
        brute.initialize(17, points[17], &bounds);
        let mut order: Vec<usize> = (0..points.len()).filter(|&i| i != 17).collect();
        order.sort_by(|&a, &b| {
            points[17]
                .distance_squared(points[a])
                .total_cmp(&points[17].distance_squared(points[b]))
        });
        for i in order {
            brute.clip(i, points[i], params.prune_tolerance);
        }

        assert_eq!(fast.num_vertices(), brute.num_vertices());
        assert_eq!(fast.num_faces(), brute.num_faces());
        let mut fast_neighbors: Vec<i64> =
            fast.valid_faces().map(|(_, f)| f.neighbor).collect();
        let mut brute_neighbors: Vec<i64> =
            brute.valid_faces().map(|(_, f)| f.neighbor).collect();
        fast_neighbors.sort_unstable();
        brute_neighbors.sort_unstable();
        assert_eq!(fast_neighbors, brute_neighbors);
    }
}
