//! The parallel tessellation engine.
//!
//! Points are processed in fixed-size batches of consecutive ids. Every
//! worker carries a persistent [`ConvexCell`] + [`CellBuilder`] scratch pair,
//! builds the cells of its batches in strict isolation (read-only shared
//! inputs, writes only to per-batch buffers), and the per-batch results are
//! reduced in batch order: a scan over the batch spoke totals fixes every
//! batch's offset, then the wheel offsets and the global spoke array are
//! assembled in parallel into disjoint slices. Combined with the lower-id
//! anchoring of the bisector planes this makes the output independent of
//! thread scheduling.

mod classify;
mod extract;

pub use classify::{Classifier, RegionClassifier, Unclassified};
pub use extract::{
    CellComplex, DelaunayExtractor, DelaunayMesh, Extractor, FaceSelection, GeometryExtractor,
    NullExtractor,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use glam::DVec3;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::cell::{CellBuilder, ClipParams, ConvexCell, DEFAULT_PRUNE_TOLERANCE};
use crate::error::VoronoiError;
use crate::geometry::{Aabb, Dimensionality};
use crate::graph::{AdjacencyGraph, Spoke};
use crate::neighbors::NeighborSource;

/// Fallback padding, as a fraction of the largest extent, when none is given.
const DEFAULT_RELATIVE_PADDING: f64 = 0.025;

/// Tuning knobs of a tessellation run.
#[derive(Clone, Debug)]
pub struct EngineParams {
    /// Absolute padding added to the bounding box on all sides. Non-positive
    /// values select a default of 2.5% of the largest extent.
    pub padding: f64,
    /// Hard per-cell clip bound; cells are returned as-is when it is hit.
    pub max_clips: usize,
    /// Whether to run graph validation (spoke symmetry repair) afterwards.
    pub validate: bool,
    /// Relative tolerance for pruning and degeneracy detection, in [0, 0.5).
    pub prune_tolerance: f64,
    /// Number of consecutive point ids per work batch.
    pub batch_size: usize,
    pub dimensionality: Dimensionality,
    /// Cooperative cancellation flag, checked once per batch. In-flight
    /// batches finish; partial results are flagged, not returned as valid.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            padding: 0.,
            max_clips: usize::MAX,
            validate: true,
            prune_tolerance: DEFAULT_PRUNE_TOLERANCE,
            batch_size: 128,
            dimensionality: Dimensionality::ThreeD,
            cancel: None,
        }
    }
}

/// A finished tessellation: the adjacency graph, the extractor's output, and
/// quality counters.
pub struct Tessellation<O> {
    pub graph: AdjacencyGraph,
    pub output: O,
    /// The padded bounding box the cells were clipped against.
    pub bounds: Aabb,
    pub num_threads_used: usize,
    /// The largest vertex count of any cell.
    pub max_cell_vertices: usize,
    /// The largest face count of any cell.
    pub max_cell_faces: usize,
    /// Clips discarded as numerically negligible or unresolvably degenerate.
    pub num_prunes: usize,
    /// Spokes pruned by graph validation.
    pub num_repairs: usize,
    /// Whether the run was cancelled. A cancelled result holds incomplete
    /// data and must be discarded.
    pub cancelled: bool,
}

#[derive(Default)]
struct BatchYield<L> {
    spokes: Vec<Spoke>,
    spoke_counts: Vec<u32>,
    local: L,
    max_cell_vertices: usize,
    max_cell_faces: usize,
    prunes: usize,
    skipped: bool,
}

/// Tessellate a point set.
///
/// `source` must index exactly the given points (see
/// [`PointIndex::build`](crate::neighbors::PointIndex::build)). The
/// classifier and extractor observe every finished cell exactly once, in a
/// deterministic order.
pub fn execute<S, E, C>(
    points: &[DVec3],
    source: &S,
    params: &EngineParams,
    extractor: &mut E,
    classifier: &C,
) -> Result<Tessellation<E::Output>, VoronoiError>
where
    S: NeighborSource + ?Sized,
    E: Extractor,
    C: Classifier,
{
    if points.is_empty() {
        return Err(VoronoiError::EmptyPointSet);
    }
    if let Some(i) = points.iter().position(|p| !p.is_finite()) {
        return Err(VoronoiError::NonFinitePoint(i));
    }
    if !(0. ..0.5).contains(&params.prune_tolerance) {
        return Err(VoronoiError::InvalidPruneTolerance(params.prune_tolerance));
    }
    if params.batch_size == 0 {
        return Err(VoronoiError::InvalidBatchSize);
    }

    let dimensionality = params.dimensionality;
    let embedded: Vec<DVec3> = points.iter().map(|&p| dimensionality.embed(p)).collect();
    let tight = Aabb::from_points(&embedded);
    let padding = if params.padding > 0. {
        params.padding
    } else {
        let extent = tight.extent();
        let largest = extent.x.max(extent.y).max(extent.z);
        // A single point (or a fully degenerate set) still needs a real box.
        if largest > 0. {
            DEFAULT_RELATIVE_PADDING * largest
        } else {
            1.
        }
    };
    let bounds = tight.padded(padding, dimensionality);

    let num_points = points.len();
    let batch_size = params.batch_size;
    let num_batches = num_points.div_ceil(batch_size);
    let clip_params = ClipParams {
        max_clips: params.max_clips,
        prune_tolerance: params.prune_tolerance,
    };
    extractor.init(num_points);

    let cancel = params.cancel.clone();
    let extractor_ref: &E = extractor;
    let embedded_ref: &[DVec3] = &embedded;
    let bounds_ref = &bounds;
    let process = |scratch: &mut (ConvexCell, CellBuilder), batch: usize| {
        let start = batch * batch_size;
        let end = num_points.min(start + batch_size);
        let mut yld = BatchYield::<E::Local>::default();
        if cancel
            .as_ref()
            .map_or(false, |c| c.load(Ordering::Relaxed))
        {
            // Keep the count arrays consistent; the run is flagged anyway.
            yld.spoke_counts.resize(end - start, 0);
            yld.skipped = true;
            return yld;
        }
        let (cell, builder) = scratch;
        for id in start..end {
            let stats = builder.build(cell, id, embedded_ref[id], source, bounds_ref, &clip_params);
            yld.prunes += stats.prunes;
            yld.max_cell_vertices = yld.max_cell_vertices.max(cell.num_vertices());
            yld.max_cell_faces = yld.max_cell_faces.max(cell.num_faces());
            let before = yld.spokes.len();
            classifier.emit_spokes(cell, &mut yld.spokes);
            yld.spoke_counts.push((yld.spokes.len() - before) as u32);
            extractor_ref.add_cell(&mut yld.local, cell, &yld.spokes[before..]);
        }
        yld
    };

    #[cfg(feature = "rayon")]
    let yields: Vec<BatchYield<E::Local>> = (0..num_batches)
        .into_par_iter()
        .map_init(
            || (ConvexCell::new(dimensionality), CellBuilder::new()),
            |scratch, batch| process(scratch, batch),
        )
        .collect();
    #[cfg(not(feature = "rayon"))]
    let yields: Vec<BatchYield<E::Local>> = {
        let mut scratch = (ConvexCell::new(dimensionality), CellBuilder::new());
        (0..num_batches)
            .map(|batch| process(&mut scratch, batch))
            .collect()
    };

    let cancelled = yields.iter().any(|y| y.skipped);

    // Reduction: one pass over the batches for the counters and batch spoke
    // offsets, then contention-free parallel assembly of the wheel offsets
    // and the global spoke array into disjoint per-batch slices.
    let mut locals = Vec::with_capacity(num_batches);
    let mut batch_counts = Vec::with_capacity(num_batches);
    let mut batch_spokes = Vec::with_capacity(num_batches);
    let mut batch_offsets = Vec::with_capacity(num_batches);
    let mut total = 0usize;
    let mut max_cell_vertices = 0;
    let mut max_cell_faces = 0;
    let mut num_prunes = 0;
    for yld in yields {
        batch_offsets.push(total);
        total += yld.spokes.len();
        batch_counts.push(yld.spoke_counts);
        batch_spokes.push(yld.spokes);
        locals.push(yld.local);
        max_cell_vertices = max_cell_vertices.max(yld.max_cell_vertices);
        max_cell_faces = max_cell_faces.max(yld.max_cell_faces);
        num_prunes += yld.prunes;
    }

    let mut wheels = vec![0usize; num_points + 1];
    let mut spokes = vec![Spoke::new(0, 0); total];
    let mut jobs = Vec::with_capacity(num_batches);
    {
        let mut wheels_rest = &mut wheels[1..];
        let mut spokes_rest = spokes.as_mut_slice();
        for (batch, (counts, sp)) in batch_counts.iter().zip(&batch_spokes).enumerate() {
            let (wheel_dst, rest) = std::mem::take(&mut wheels_rest).split_at_mut(counts.len());
            wheels_rest = rest;
            let (spoke_dst, rest) = std::mem::take(&mut spokes_rest).split_at_mut(sp.len());
            spokes_rest = rest;
            jobs.push((wheel_dst, spoke_dst, batch_offsets[batch], counts, sp));
        }
        debug_assert!(wheels_rest.is_empty());
        debug_assert!(spokes_rest.is_empty());
    }
    let assemble = |(wheel_dst, spoke_dst, base, counts, sp): (
        &mut [usize],
        &mut [Spoke],
        usize,
        &Vec<u32>,
        &Vec<Spoke>,
    )| {
        spoke_dst.copy_from_slice(sp);
        let mut offset = base;
        for (k, &count) in counts.iter().enumerate() {
            offset += count as usize;
            wheel_dst[k] = offset;
        }
    };
    #[cfg(feature = "rayon")]
    jobs.into_par_iter().for_each(assemble);
    #[cfg(not(feature = "rayon"))]
    jobs.into_iter().for_each(assemble);
    debug_assert_eq!(wheels[num_points], total);

    let mut graph = AdjacencyGraph::from_parts(wheels, spokes);
    let num_repairs = if params.validate && !cancelled {
        graph.validate()
    } else {
        0
    };
    let output = extractor.finalize(locals);

    #[cfg(feature = "rayon")]
    let num_threads_used = rayon::current_num_threads();
    #[cfg(not(feature = "rayon"))]
    let num_threads_used = 1;

    Ok(Tessellation {
        graph,
        output,
        bounds,
        num_threads_used,
        max_cell_vertices,
        max_cell_faces,
        num_prunes,
        num_repairs,
        cancelled,
    })
}
