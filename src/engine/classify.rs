//! Spoke classification.
//!
//! A [`Classifier`] decides, per finished cell, which adjacencies cross the
//! domain boundary or a region boundary. Classification happens during cell
//! construction (not as a postprocess), so extractors can select faces by
//! classification on the fly.

use crate::cell::ConvexCell;
use crate::graph::{spoke_class, Spoke};

pub trait Classifier: Sync {
    /// Whether a generator lies inside the active domain.
    fn is_inside_domain(&self, _id: usize) -> bool {
        true
    }

    /// Whether two generators belong to the same region.
    fn is_same_region(&self, _a: usize, _b: usize) -> bool {
        true
    }

    /// Append one classified spoke per valid face of the cell, in face slot
    /// order. The default covers the common rules; implementations normally
    /// only override the two predicates above.
    fn emit_spokes(&self, cell: &ConvexCell, spokes: &mut Vec<Spoke>) {
        let generator = cell.generator();
        let inside = self.is_inside_domain(generator);
        for (_, face) in cell.valid_faces() {
            let mut class = 0u8;
            if face.neighbor < 0 {
                class |= spoke_class::DOMAIN_BOUNDARY;
            } else {
                let neighbor = face.neighbor as usize;
                if !inside || !self.is_inside_domain(neighbor) {
                    class |= spoke_class::DOMAIN_BOUNDARY;
                } else {
                    class |= if generator < neighbor {
                        spoke_class::FORWARD
                    } else {
                        spoke_class::BACKWARD
                    };
                    if !self.is_same_region(generator, neighbor) {
                        class |= spoke_class::REGION_BOUNDARY;
                    }
                }
            }
            spokes.push(Spoke::new(face.neighbor, class));
        }
    }
}

/// The trivial classifier: every generator is interior, in one region.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unclassified;

impl Classifier for Unclassified {}

/// Classifies by a per-generator region id array. Negative region ids mark
/// exterior generators; all their spokes become domain boundaries.
pub struct RegionClassifier<'a> {
    regions: &'a [i32],
}

impl<'a> RegionClassifier<'a> {
    pub fn new(regions: &'a [i32]) -> Self {
        Self { regions }
    }

    pub fn region(&self, id: usize) -> i32 {
        self.regions[id]
    }
}

impl Classifier for RegionClassifier<'_> {
    fn is_inside_domain(&self, id: usize) -> bool {
        self.regions[id] >= 0
    }

    fn is_same_region(&self, a: usize, b: usize) -> bool {
        self.regions[a] == self.regions[b]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Aabb, Dimensionality};
    use glam::DVec3;

    fn two_cell_spokes(classifier: &dyn Classifier, generator: usize) -> Vec<Spoke> {
        let locs = [DVec3::new(0.25, 0.5, 0.5), DVec3::new(0.75, 0.5, 0.5)];
        let bounds = Aabb::new(DVec3::ZERO, DVec3::ONE);
        let mut cell = ConvexCell::new(Dimensionality::ThreeD);
        cell.initialize(generator, locs[generator], &bounds);
        cell.clip(1 - generator, locs[1 - generator], 1e-6);
        let mut spokes = vec![];
        classifier.emit_spokes(&cell, &mut spokes);
        spokes
    }

    #[test]
    fn test_unclassified_directions() {
        let spokes = two_cell_spokes(&Unclassified, 0);
        assert_eq!(spokes.len(), 6);
        let to_neighbor: Vec<&Spoke> = spokes.iter().filter(|s| s.neighbor == 1).collect();
        assert_eq!(to_neighbor.len(), 1);
        assert!(to_neighbor[0].is_forward());
        assert!(!to_neighbor[0].is_region_boundary());
        assert_eq!(
            spokes.iter().filter(|s| s.is_domain_boundary()).count(),
            5
        );

        let spokes = two_cell_spokes(&Unclassified, 1);
        let back = spokes.iter().find(|s| s.neighbor == 0).unwrap();
        assert!(back.is_backward());
    }

    #[test]
    fn test_region_classifier() {
        let regions = vec![0, 1];
        let spokes = two_cell_spokes(&RegionClassifier::new(&regions), 0);
        let to_neighbor = spokes.iter().find(|s| s.neighbor == 1).unwrap();
        assert!(to_neighbor.is_forward());
        assert!(to_neighbor.is_region_boundary());
    }

    #[test]
    fn test_exterior_generator() {
        let regions = vec![0, -1];
        let spokes = two_cell_spokes(&RegionClassifier::new(&regions), 0);
        let to_neighbor = spokes.iter().find(|s| s.neighbor == 1).unwrap();
        assert!(to_neighbor.is_domain_boundary());
        assert!(!to_neighbor.is_forward());
    }
}
