//! The cross-cell adjacency structure: one *wheel* of classified *spokes*
//! per generator, stored as a single offset-indexed array.

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Classification bits of a [`Spoke`].
pub mod spoke_class {
    /// The spoke points from a lower to a higher generator id.
    pub const FORWARD: u8 = 0x01;
    /// The spoke points from a higher to a lower generator id.
    pub const BACKWARD: u8 = 0x02;
    /// The spoke crosses the domain boundary (synthetic bounding-box
    /// neighbor, or a neighbor outside the active domain).
    pub const DOMAIN_BOUNDARY: u8 = 0x04;
    /// The spoke connects two different regions.
    pub const REGION_BOUNDARY: u8 = 0x08;
    /// The spoke has no matching reverse spoke and was repaired away by
    /// validation.
    pub const PRUNED: u8 = 0x10;
}

/// One face-adjacency of a Voronoi cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Spoke {
    /// The neighboring generator id; negative for the synthetic neighbors of
    /// the bounding-box faces.
    pub neighbor: i64,
    /// Bitwise or of [`spoke_class`] flags.
    pub classification: u8,
}

impl Spoke {
    pub fn new(neighbor: i64, classification: u8) -> Self {
        Self {
            neighbor,
            classification,
        }
    }

    pub fn is_forward(&self) -> bool {
        self.classification & spoke_class::FORWARD != 0
    }

    pub fn is_backward(&self) -> bool {
        self.classification & spoke_class::BACKWARD != 0
    }

    pub fn is_domain_boundary(&self) -> bool {
        self.classification & spoke_class::DOMAIN_BOUNDARY != 0
    }

    pub fn is_region_boundary(&self) -> bool {
        self.classification & spoke_class::REGION_BOUNDARY != 0
    }

    pub fn is_pruned(&self) -> bool {
        self.classification & spoke_class::PRUNED != 0
    }
}

/// The adjacency graph of a tessellation.
///
/// `wheels` holds `num_wheels + 1` offsets into the global `spokes` array;
/// the spokes of generator `i` occupy `spokes[wheels[i]..wheels[i + 1]]`, in
/// the face order of its cell.
pub struct AdjacencyGraph {
    wheels: Vec<usize>,
    spokes: Vec<Spoke>,
}

impl AdjacencyGraph {
    pub(crate) fn from_parts(wheels: Vec<usize>, spokes: Vec<Spoke>) -> Self {
        debug_assert!(!wheels.is_empty());
        debug_assert_eq!(*wheels.last().unwrap(), spokes.len());
        Self { wheels, spokes }
    }

    pub fn num_wheels(&self) -> usize {
        self.wheels.len() - 1
    }

    pub fn num_spokes(&self) -> usize {
        self.spokes.len()
    }

    /// The spokes of one generator, in the face order of its cell.
    pub fn wheel(&self, generator: usize) -> &[Spoke] {
        &self.spokes[self.wheels[generator]..self.wheels[generator + 1]]
    }

    pub fn spokes(&self) -> &[Spoke] {
        &self.spokes
    }

    /// The wheel offsets (length `num_wheels + 1`).
    pub fn wheels(&self) -> &[usize] {
        &self.wheels
    }

    fn has_reverse(&self, generator: usize, spoke: &Spoke) -> bool {
        if spoke.neighbor < 0 {
            return false;
        }
        self.wheel(spoke.neighbor as usize)
            .iter()
            .any(|s| s.neighbor == generator as i64 && !s.is_pruned())
    }

    /// The global indices of the asymmetric spokes of one wheel.
    fn unmatched_spokes(&self, generator: usize) -> Vec<usize> {
        let start = self.wheels[generator];
        self.wheel(generator)
            .iter()
            .enumerate()
            .filter(|&(_, s)| {
                !s.is_domain_boundary() && !s.is_pruned() && !self.has_reverse(generator, s)
            })
            .map(|(i, _)| start + i)
            .collect()
    }

    /// Repair the graph by marking every non-boundary spoke without a
    /// matching reverse spoke as [`spoke_class::PRUNED`]. Such spokes arise
    /// when numerical pruning discards a cut on one side of a pair only.
    /// Returns the number of repairs; a nonzero count degrades quality but
    /// is never fatal.
    pub fn validate(&mut self) -> usize {
        // Read-only scan over all wheels, then one write pass.
        #[cfg(feature = "rayon")]
        let unmatched: Vec<usize> = (0..self.num_wheels())
            .into_par_iter()
            .flat_map_iter(|w| self.unmatched_spokes(w))
            .collect();
        #[cfg(not(feature = "rayon"))]
        let unmatched: Vec<usize> = (0..self.num_wheels())
            .flat_map(|w| self.unmatched_spokes(w))
            .collect();

        for &i in &unmatched {
            self.spokes[i].classification |= spoke_class::PRUNED;
        }
        unmatched.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_of(wheels: &[Vec<Spoke>]) -> AdjacencyGraph {
        let mut offsets = vec![0];
        let mut spokes = vec![];
        for wheel in wheels {
            spokes.extend_from_slice(wheel);
            offsets.push(spokes.len());
        }
        AdjacencyGraph::from_parts(offsets, spokes)
    }

    #[test]
    fn test_validate_keeps_symmetric_graph() {
        let mut graph = graph_of(&[
            vec![
                Spoke::new(1, spoke_class::FORWARD),
                Spoke::new(-1, spoke_class::DOMAIN_BOUNDARY),
            ],
            vec![Spoke::new(0, spoke_class::BACKWARD)],
        ]);
        assert_eq!(graph.validate(), 0);
        assert!(graph.spokes().iter().all(|s| !s.is_pruned()));
    }

    #[test]
    fn test_validate_prunes_unmatched_spoke() {
        // Wheel 0 claims adjacency to 1, but not vice versa.
        let mut graph = graph_of(&[
            vec![Spoke::new(1, spoke_class::FORWARD)],
            vec![Spoke::new(-3, spoke_class::DOMAIN_BOUNDARY)],
        ]);
        assert_eq!(graph.validate(), 1);
        assert!(graph.wheel(0)[0].is_pruned());
        // Idempotent: the repaired graph validates cleanly.
        assert_eq!(graph.validate(), 0);
    }

    #[test]
    fn test_boundary_spokes_are_never_pruned() {
        let mut graph = graph_of(&[
            vec![Spoke::new(-1, spoke_class::DOMAIN_BOUNDARY)],
            vec![Spoke::new(-2, spoke_class::DOMAIN_BOUNDARY)],
        ]);
        assert_eq!(graph.validate(), 0);
    }

    #[test]
    fn test_wheel_slices() {
        let graph = graph_of(&[
            vec![Spoke::new(1, 0), Spoke::new(2, 0)],
            vec![Spoke::new(0, 0)],
            vec![Spoke::new(0, 0)],
        ]);
        assert_eq!(graph.num_wheels(), 3);
        assert_eq!(graph.num_spokes(), 4);
        assert_eq!(graph.wheel(0).len(), 2);
        assert_eq!(graph.wheel(2).len(), 1);
    }
}
