//! A parallel Voronoi tessellation kernel, with its dual Delaunay
//! connectivity.
//!
//! Every generator's cell is computed independently by incremental clipping:
//! the cell starts as the padded bounding box of the point set and is cut by
//! the bisecting half space towards each nearby neighbor, delivered in
//! shells of increasing distance by a [`NeighborSource`]. The search around
//! a generator stops as soon as the remaining candidates provably lie
//! outside the cell's *Voronoi flower* (the union of the empty balls
//! centered at its vertices), which keeps the per-cell cost local. Per-point
//! independence is what makes the construction embarrassingly parallel.
//!
//! Robustness comes from tolerances instead of exact arithmetic: cuts that
//! are negligible relative to the cell size are pruned, degenerate cuts are
//! retried with deterministically perturbed planes, and the rare surviving
//! asymmetry is repaired by [`AdjacencyGraph::validate`]. Bisector planes
//! are always derived from the lower-id generator of a pair, so neighboring
//! cells agree bitwise on their shared boundary and cell vertices can be
//! welded topologically ([`TopologicalMerge`]) rather than by coordinate
//! proximity.
//!
//! Outputs are produced on the fly through the [`Extractor`] seam;
//! [`GeometryExtractor`] yields the polyhedral cells and
//! [`DelaunayExtractor`] the dual tetrahedra. With the default `rayon`
//! feature, cells are built in parallel batches; results are identical to
//! the serial construction.
//!
//! ```
//! use glam::DVec3;
//! use parvoro::{
//!     execute, EngineParams, FaceSelection, GeometryExtractor, PointIndex, Unclassified,
//! };
//! use parvoro::geometry::Dimensionality;
//!
//! let points = vec![
//!     DVec3::new(0., 0., 0.),
//!     DVec3::new(1., 0., 0.),
//!     DVec3::new(0., 1., 0.),
//!     DVec3::new(0., 0., 1.),
//! ];
//! let index = PointIndex::build(&points, Dimensionality::ThreeD);
//! let mut extractor = GeometryExtractor::new(FaceSelection::All);
//! let tessellation = execute(
//!     &points,
//!     &index,
//!     &EngineParams::default(),
//!     &mut extractor,
//!     &Unclassified,
//! )
//! .unwrap();
//!
//! assert_eq!(tessellation.graph.num_wheels(), 4);
//! // Every pair of cells is adjacent in this configuration.
//! for id in 0..4 {
//!     let real: Vec<i64> = tessellation.graph.wheel(id)
//!         .iter()
//!         .filter(|s| !s.is_domain_boundary())
//!         .map(|s| s.neighbor)
//!         .collect();
//!     assert_eq!(real.len(), 3);
//! }
//! ```

mod cell;
mod engine;
mod error;
pub mod geometry;
mod graph;
mod merge;
mod neighbors;

pub use cell::{
    CellBuilder, CellFace, CellStats, CellVertex, ClipOutcome, ClipParams, ConvexCell, SlotStatus,
    DEFAULT_PRUNE_TOLERANCE,
};
pub use engine::{
    execute, CellComplex, Classifier, DelaunayExtractor, DelaunayMesh, EngineParams, Extractor,
    FaceSelection, GeometryExtractor, NullExtractor, RegionClassifier, Tessellation, Unclassified,
};
pub use error::VoronoiError;
pub use geometry::Dimensionality;
pub use graph::{spoke_class, AdjacencyGraph, Spoke};
pub use merge::{MergeMap, TopoCoordinate, TopologicalMerge};
pub use neighbors::{NeighborSource, PointIndex, ShellCursor, ShellStep};
