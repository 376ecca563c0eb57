//! Nearest-neighbor discovery in expanding shells.
//!
//! The clipping kernel never needs *all* neighbors of a generator, only the
//! ones close enough to affect its cell. The [`NeighborSource`] contract
//! delivers candidates in shells of non-decreasing distance, together with a
//! guaranteed lower bound on everything that follows, so the builder can stop
//! as soon as the Voronoi flower of the cell is provably empty of candidates.

use glam::DVec3;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::geometry::{Dimensionality, Sphere};

/// Initial shell size; shells double up to [`MAX_SHELL_SIZE`] as the search
/// widens.
const FIRST_SHELL_SIZE: usize = 8;
const MAX_SHELL_SIZE: usize = 512;

/// One step of a shell traversal.
pub enum ShellStep<'a> {
    /// The next shell of candidates, sorted by non-decreasing squared
    /// distance to the query point. No candidate yielded after this shell
    /// will be closer than `next_min_dist2`.
    Shell {
        candidates: &'a [(usize, f64)],
        next_min_dist2: f64,
    },
    /// The source is exhausted.
    Done,
}

/// A stateful traversal of the candidates around one query point.
pub trait ShellCursor {
    /// Advance to the next shell. `culling` optionally describes regions
    /// already known to contain no relevant candidates; implementations are
    /// free to ignore it.
    fn next_shell(&mut self, culling: Option<&[Sphere]>) -> ShellStep<'_>;
}

/// A source of neighbor candidates for cell construction.
///
/// Implementations must be immutable during a tessellation, so that all
/// workers can query them concurrently through `&self`.
pub trait NeighborSource: Sync {
    /// The number of points in this source.
    fn num_points(&self) -> usize;

    /// The position of a point.
    fn position(&self, id: usize) -> DVec3;

    /// Begin a shell traversal around a query location.
    fn begin_shells(&self, query: DVec3) -> Box<dyn ShellCursor + '_>;
}

#[derive(Clone, Copy, Debug)]
struct IndexedPoint {
    loc: [f64; 3],
    id: usize,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.loc)
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        let dx = self.loc[0] - point[0];
        let dy = self.loc[1] - point[1];
        let dz = self.loc[2] - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

/// The default [`NeighborSource`]: an immutable R-tree over the point set.
///
/// Shells are chunks of the distance-sorted nearest-neighbor stream, starting
/// small (most cells are closed by their first dozen neighbors) and doubling
/// as the search widens.
pub struct PointIndex {
    tree: RTree<IndexedPoint>,
    positions: Vec<DVec3>,
}

impl PointIndex {
    /// Bulk-load an index over the given points. 2D point sets are embedded
    /// in the z = 0 plane first, so distances in the index agree with the
    /// masked distances used by the cells.
    pub fn build(points: &[DVec3], dimensionality: Dimensionality) -> Self {
        let positions: Vec<DVec3> = points.iter().map(|&p| dimensionality.embed(p)).collect();
        let tree = RTree::bulk_load(
            positions
                .iter()
                .enumerate()
                .map(|(id, p)| IndexedPoint {
                    loc: p.to_array(),
                    id,
                })
                .collect(),
        );
        Self { tree, positions }
    }
}

impl NeighborSource for PointIndex {
    fn num_points(&self) -> usize {
        self.positions.len()
    }

    fn position(&self, id: usize) -> DVec3 {
        self.positions[id]
    }

    fn begin_shells(&self, query: DVec3) -> Box<dyn ShellCursor + '_> {
        Box::new(IndexShellCursor {
            inner: Box::new(
                self.tree
                    .nearest_neighbor_iter_with_distance_2(&query.to_array())
                    .map(|(p, dist2)| (p.id, dist2)),
            ),
            shell: Vec::with_capacity(FIRST_SHELL_SIZE),
            shell_size: FIRST_SHELL_SIZE,
            exhausted: false,
        })
    }
}

struct IndexShellCursor<'a> {
    inner: Box<dyn Iterator<Item = (usize, f64)> + 'a>,
    shell: Vec<(usize, f64)>,
    shell_size: usize,
    exhausted: bool,
}

impl ShellCursor for IndexShellCursor<'_> {
    fn next_shell(&mut self, _culling: Option<&[Sphere]>) -> ShellStep<'_> {
        if self.exhausted {
            return ShellStep::Done;
        }
        self.shell.clear();
        while self.shell.len() < self.shell_size {
            match self.inner.next() {
                Some(candidate) => self.shell.push(candidate),
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }
        if self.shell.is_empty() {
            return ShellStep::Done;
        }
        // The stream is globally sorted, so the last candidate of this shell
        // bounds everything that follows.
        let next_min_dist2 = if self.exhausted {
            f64::INFINITY
        } else {
            self.shell[self.shell.len() - 1].1
        };
        self.shell_size = (2 * self.shell_size).min(MAX_SHELL_SIZE);
        ShellStep::Shell {
            candidates: &self.shell,
            next_min_dist2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_points(count: usize, seed: u64) -> Vec<DVec3> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| DVec3::new(rng.gen(), rng.gen(), rng.gen()))
            .collect()
    }

    #[test]
    fn test_shells_are_sorted_and_complete() {
        let points = random_points(100, 42);
        let index = PointIndex::build(&points, Dimensionality::ThreeD);
        let query = DVec3::splat(0.5);

        let mut cursor = index.begin_shells(query);
        let mut seen = vec![false; points.len()];
        let mut last_dist2 = 0.;
        let mut lower_bound = 0.;
        loop {
            match cursor.next_shell(None) {
                ShellStep::Shell {
                    candidates,
                    next_min_dist2,
                } => {
                    for &(id, dist2) in candidates {
                        assert!(!seen[id]);
                        seen[id] = true;
                        assert!(dist2 >= last_dist2);
                        assert!(dist2 >= lower_bound);
                        assert!((dist2 - query.distance_squared(points[id])).abs() < 1e-12);
                        last_dist2 = dist2;
                    }
                    assert!(next_min_dist2 >= last_dist2);
                    lower_bound = next_min_dist2;
                }
                ShellStep::Done => break,
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_first_candidate_is_self() {
        let points = random_points(25, 7);
        let index = PointIndex::build(&points, Dimensionality::ThreeD);
        for (id, &p) in points.iter().enumerate() {
            let mut cursor = index.begin_shells(p);
            match cursor.next_shell(None) {
                ShellStep::Shell { candidates, .. } => {
                    assert_eq!(candidates[0].0, id);
                    assert_eq!(candidates[0].1, 0.);
                }
                ShellStep::Done => panic!("Index must yield at least one shell"),
            }
        }
    }

    #[test]
    fn test_2d_index_masks_z() {
        let points = vec![
            DVec3::new(0., 0., 5.),
            DVec3::new(1., 0., -3.),
            DVec3::new(0.1, 0., 17.),
        ];
        let index = PointIndex::build(&points, Dimensionality::TwoD);
        let mut cursor = index.begin_shells(index.position(0));
        match cursor.next_shell(None) {
            ShellStep::Shell { candidates, .. } => {
                // In-plane distances decide the order, not z.
                assert_eq!(candidates[0].0, 0);
                assert_eq!(candidates[1].0, 2);
                assert_eq!(candidates[2].0, 1);
            }
            ShellStep::Done => panic!("Index must yield at least one shell"),
        }
    }

    #[test]
    fn test_single_point() {
        let points = vec![DVec3::splat(0.3)];
        let index = PointIndex::build(&points, Dimensionality::ThreeD);
        let mut cursor = index.begin_shells(points[0]);
        match cursor.next_shell(None) {
            ShellStep::Shell {
                candidates,
                next_min_dist2,
            } => {
                assert_eq!(candidates.len(), 1);
                assert_eq!(next_min_dist2, f64::INFINITY);
            }
            ShellStep::Done => panic!("Index must yield the point itself"),
        }
        assert!(matches!(cursor.next_shell(None), ShellStep::Done));
    }
}
