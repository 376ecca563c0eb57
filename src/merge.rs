//! Topological merging of duplicated cell vertices.
//!
//! Cells are built in isolation, so a Voronoi vertex shared by `k` cells is
//! emitted `k` times. Rather than welding points by floating-point proximity,
//! every vertex carries a *topological coordinate*: the sorted ids of the
//! generators whose cells meet there. Cross-cell plane anchoring makes these
//! ids, not the coordinates, the reliable identity of a vertex.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// The sorted 4-tuple of generator ids meeting at a Voronoi vertex: the
/// three face neighbors plus the owning generator. Synthetic negative ids of
/// bounding-box faces participate as-is, which keeps boundary vertices
/// distinct per box face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopoCoordinate([i64; 4]);

impl TopoCoordinate {
    pub fn new(p0: i64, p1: i64, p2: i64, p3: i64) -> Self {
        let mut ids = [p0, p1, p2, p3];
        ids.sort_unstable();
        Self(ids)
    }

    /// The participating generator ids, ascending.
    pub fn ids(&self) -> [i64; 4] {
        self.0
    }

    /// Whether all four participants are real generators (no bounding-box
    /// faces).
    pub fn is_interior(&self) -> bool {
        self.0[0] >= 0
    }
}

/// Maps every local (duplicated) vertex index to its global merged point id.
pub type MergeMap = Vec<usize>;

/// The result of merging a batch of topological coordinates.
pub struct TopologicalMerge {
    pub merge_map: MergeMap,
    pub num_merged_points: usize,
}

impl TopologicalMerge {
    /// Merge all vertices with equal topological coordinates into one global
    /// point id each. Global ids are assigned in coordinate sort order, so
    /// the result is independent of the input order of equal tuples and the
    /// operation is idempotent.
    pub fn execute(coords: &[TopoCoordinate]) -> Self {
        let mut order: Vec<usize> = (0..coords.len()).collect();
        #[cfg(feature = "rayon")]
        order.par_sort_unstable_by_key(|&i| coords[i]);
        #[cfg(not(feature = "rayon"))]
        order.sort_unstable_by_key(|&i| coords[i]);

        let mut merge_map = vec![0; coords.len()];
        let mut num_merged_points = 0;
        let mut prev: Option<TopoCoordinate> = None;
        for &i in &order {
            if prev != Some(coords[i]) {
                num_merged_points += 1;
                prev = Some(coords[i]);
            }
            merge_map[i] = num_merged_points - 1;
        }
        Self {
            merge_map,
            num_merged_points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_is_order_invariant() {
        let a = TopoCoordinate::new(3, 1, 7, 2);
        let b = TopoCoordinate::new(7, 2, 1, 3);
        assert_eq!(a, b);
        assert_eq!(a.ids(), [1, 2, 3, 7]);
    }

    #[test]
    fn test_interior() {
        assert!(TopoCoordinate::new(0, 1, 2, 3).is_interior());
        assert!(!TopoCoordinate::new(-1, 1, 2, 3).is_interior());
    }

    #[test]
    fn test_merge_groups_duplicates() {
        let coords = vec![
            TopoCoordinate::new(0, 1, 2, 3),
            TopoCoordinate::new(4, 5, 6, 7),
            TopoCoordinate::new(3, 2, 1, 0),
            TopoCoordinate::new(0, 1, 2, 4),
        ];
        let merge = TopologicalMerge::execute(&coords);
        assert_eq!(merge.num_merged_points, 3);
        assert_eq!(merge.merge_map[0], merge.merge_map[2]);
        assert_ne!(merge.merge_map[0], merge.merge_map[1]);
        assert_ne!(merge.merge_map[0], merge.merge_map[3]);
        // Every assigned id is in range.
        assert!(merge
            .merge_map
            .iter()
            .all(|&g| g < merge.num_merged_points));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let coords = vec![
            TopoCoordinate::new(0, 1, 2, 3),
            TopoCoordinate::new(0, 1, 2, 3),
            TopoCoordinate::new(-1, 0, 1, 2),
        ];
        let first = TopologicalMerge::execute(&coords);
        let second = TopologicalMerge::execute(&coords);
        assert_eq!(first.merge_map, second.merge_map);
        assert_eq!(first.num_merged_points, 2);
    }

    #[test]
    fn test_merge_empty() {
        let merge = TopologicalMerge::execute(&[]);
        assert_eq!(merge.num_merged_points, 0);
        assert!(merge.merge_map.is_empty());
    }
}
