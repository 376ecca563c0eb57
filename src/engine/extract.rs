//! Output extraction.
//!
//! An [`Extractor`] turns finished cells into a concrete output while the
//! tessellation runs, instead of materializing every cell and postprocessing.
//! Workers accumulate into per-batch locals; the engine hands the locals to
//! [`Extractor::finalize`] in batch order (ascending generator ids), which
//! keeps the output independent of thread scheduling.

use glam::DVec3;

use crate::cell::ConvexCell;
use crate::graph::Spoke;
use crate::merge::{TopoCoordinate, TopologicalMerge};

pub trait Extractor: Sync {
    /// Per-batch accumulation buffer.
    type Local: Send + Default;
    /// The final assembled output.
    type Output;

    /// Called once before execution with the total number of generators.
    fn init(&mut self, _num_points: usize) {}

    /// Called once per finished cell. `spokes` holds the classified spokes
    /// of this cell, one per valid face, in face slot order.
    fn add_cell(&self, local: &mut Self::Local, cell: &ConvexCell, spokes: &[Spoke]);

    /// Merge the per-batch buffers, ordered by ascending generator id.
    fn finalize(&mut self, locals: Vec<Self::Local>) -> Self::Output;
}

/// Discards all geometry. Useful for timing runs and for callers that only
/// want the adjacency graph.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullExtractor;

impl Extractor for NullExtractor {
    type Local = ();
    type Output = ();

    fn add_cell(&self, _local: &mut (), _cell: &ConvexCell, _spokes: &[Spoke]) {}

    fn finalize(&mut self, _locals: Vec<()>) {}
}

/// Which faces of each cell to extract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaceSelection {
    /// Every face: the complete polyhedral cell complex.
    All,
    /// Only faces on the domain boundary: the outer surface.
    DomainBoundary,
    /// Only forward faces between different regions: internal interfaces,
    /// emitted once per face pair.
    RegionBoundary,
}

/// Extracts cell geometry: hull points with their topological coordinates,
/// plus polygonal face connectivity, per cell.
///
/// Points are emitted per cell (a Voronoi vertex shared by `k` cells appears
/// `k` times); [`CellComplex::merge`] welds them topologically.
pub struct GeometryExtractor {
    selection: FaceSelection,
}

impl GeometryExtractor {
    pub fn new(selection: FaceSelection) -> Self {
        Self { selection }
    }

    fn selects(&self, spoke: &Spoke) -> bool {
        match self.selection {
            FaceSelection::All => true,
            FaceSelection::DomainBoundary => spoke.is_domain_boundary(),
            FaceSelection::RegionBoundary => spoke.is_forward() && spoke.is_region_boundary(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct LocalCellInfo {
    num_points: usize,
    num_faces: usize,
}

#[derive(Default)]
pub struct GeometryLocal {
    points: Vec<DVec3>,
    topo_coords: Vec<TopoCoordinate>,
    cells: Vec<LocalCellInfo>,
    face_sizes: Vec<usize>,
    /// Cell-local point ids, rebased during finalize.
    face_conn: Vec<usize>,
    /// Scratch: arena slot → cell-local point id.
    point_map: Vec<i64>,
}

/// The assembled per-cell geometry, in offset-array form.
pub struct CellComplex {
    /// All extracted points, cell by cell.
    pub points: Vec<DVec3>,
    /// The topological coordinate of each point.
    pub topo_coords: Vec<TopoCoordinate>,
    /// Per cell offsets into `points`, length `num_cells + 1`.
    pub point_offsets: Vec<usize>,
    /// Per face offsets into `face_conn`, length `num_faces + 1`.
    pub face_offsets: Vec<usize>,
    /// Face loops as indices into `points`.
    pub face_conn: Vec<usize>,
    /// Per cell offsets into the face list, length `num_cells + 1`.
    pub cell_face_offsets: Vec<usize>,
}

impl CellComplex {
    pub fn num_cells(&self) -> usize {
        self.point_offsets.len() - 1
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn num_faces(&self) -> usize {
        self.face_offsets.len() - 1
    }

    /// The extracted points of one cell.
    pub fn cell_points(&self, cell: usize) -> &[DVec3] {
        &self.points[self.point_offsets[cell]..self.point_offsets[cell + 1]]
    }

    /// The face ids of one cell.
    pub fn cell_faces(&self, cell: usize) -> std::ops::Range<usize> {
        self.cell_face_offsets[cell]..self.cell_face_offsets[cell + 1]
    }

    /// The point ids of one face loop.
    pub fn face(&self, face: usize) -> &[usize] {
        &self.face_conn[self.face_offsets[face]..self.face_offsets[face + 1]]
    }

    /// Weld duplicated points across cells by topological coordinate.
    pub fn merge(&self) -> TopologicalMerge {
        TopologicalMerge::execute(&self.topo_coords)
    }
}

impl Extractor for GeometryExtractor {
    type Local = GeometryLocal;
    type Output = CellComplex;

    fn add_cell(&self, local: &mut GeometryLocal, cell: &ConvexCell, spokes: &[Spoke]) {
        local.point_map.clear();
        local.point_map.resize(cell.vertices().len(), -1);
        let mut info = LocalCellInfo {
            num_points: 0,
            num_faces: 0,
        };
        for ((_, face), spoke) in cell.valid_faces().zip(spokes) {
            if !self.selects(spoke) {
                continue;
            }
            info.num_faces += 1;
            local.face_sizes.push(face.verts.len());
            for &vid in &face.verts {
                let mapped = &mut local.point_map[vid as usize];
                if *mapped < 0 {
                    *mapped = info.num_points as i64;
                    info.num_points += 1;
                    local.points.push(cell.vertices()[vid as usize].x);
                    local.topo_coords.push(cell.topo_coordinate(vid as usize));
                }
                local.face_conn.push(*mapped as usize);
            }
        }
        local.cells.push(info);
    }

    fn finalize(&mut self, locals: Vec<GeometryLocal>) -> CellComplex {
        let mut out = CellComplex {
            points: Vec::new(),
            topo_coords: Vec::new(),
            point_offsets: vec![0],
            face_offsets: vec![0],
            face_conn: Vec::new(),
            cell_face_offsets: vec![0],
        };
        for local in locals {
            out.points.extend_from_slice(&local.points);
            out.topo_coords.extend_from_slice(&local.topo_coords);
            let mut size_cursor = 0;
            let mut conn_cursor = 0;
            for info in &local.cells {
                let cell_base = *out.point_offsets.last().unwrap();
                out.point_offsets.push(cell_base + info.num_points);
                for _ in 0..info.num_faces {
                    let size = local.face_sizes[size_cursor];
                    size_cursor += 1;
                    for _ in 0..size {
                        out.face_conn.push(cell_base + local.face_conn[conn_cursor]);
                        conn_cursor += 1;
                    }
                    out.face_offsets.push(out.face_conn.len());
                }
                out.cell_face_offsets
                    .push(out.cell_face_offsets.last().unwrap() + info.num_faces);
            }
        }
        out
    }
}

/// Tetrahedral Delaunay connectivity, dual to the Voronoi tessellation.
pub struct DelaunayMesh {
    /// Tetrahedra as generator id 4-tuples.
    pub tets: Vec<[usize; 4]>,
}

/// Extracts the dual Delaunay tetrahedra from the topological coordinates of
/// the cell vertices.
///
/// Every interior Voronoi vertex is met by exactly four cells, so it would be
/// reported four times; each tetrahedron is emitted only by its smallest
/// participating generator. Vertices on bounding-box faces carry synthetic
/// negative ids and never form tetrahedra.
pub struct DelaunayExtractor<'a> {
    regions: Option<&'a [i32]>,
}

impl<'a> DelaunayExtractor<'a> {
    pub fn new() -> Self {
        Self { regions: None }
    }

    /// Restrict the output to tetrahedra whose four generators all lie in
    /// the interior of the domain (non-negative region id).
    pub fn with_regions(regions: &'a [i32]) -> Self {
        Self {
            regions: Some(regions),
        }
    }
}

impl Default for DelaunayExtractor<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for DelaunayExtractor<'_> {
    type Local = Vec<[usize; 4]>;
    type Output = DelaunayMesh;

    fn add_cell(&self, local: &mut Vec<[usize; 4]>, cell: &ConvexCell, _spokes: &[Spoke]) {
        let own = cell.generator() as i64;
        for (vid, _) in cell.valid_vertices() {
            let [p0, p1, p2] = cell.vertex_face_neighbors(vid);
            // Only the smallest participating generator emits the tet, and
            // only when all participants are real points.
            if own < p0 && own < p1 && own < p2 && p0 >= 0 && p1 >= 0 && p2 >= 0 {
                let tet = [own as usize, p0 as usize, p1 as usize, p2 as usize];
                if let Some(regions) = self.regions {
                    if tet.iter().any(|&p| regions[p] < 0) {
                        continue;
                    }
                }
                local.push(tet);
            }
        }
    }

    fn finalize(&mut self, locals: Vec<Vec<[usize; 4]>>) -> DelaunayMesh {
        let mut tets = Vec::with_capacity(locals.iter().map(Vec::len).sum());
        for local in locals {
            tets.extend(local);
        }
        DelaunayMesh { tets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Aabb, Dimensionality};
    use crate::graph::spoke_class;

    fn box_cell() -> ConvexCell {
        let mut cell = ConvexCell::new(Dimensionality::ThreeD);
        cell.initialize(
            0,
            DVec3::splat(0.5),
            &Aabb::new(DVec3::ZERO, DVec3::ONE),
        );
        cell
    }

    fn boundary_spokes(cell: &ConvexCell) -> Vec<Spoke> {
        cell.valid_faces()
            .map(|(_, f)| Spoke::new(f.neighbor, spoke_class::DOMAIN_BOUNDARY))
            .collect()
    }

    #[test]
    fn test_geometry_extractor_box() {
        let cell = box_cell();
        let spokes = boundary_spokes(&cell);
        let mut extractor = GeometryExtractor::new(FaceSelection::All);
        let mut local = GeometryLocal::default();
        extractor.add_cell(&mut local, &cell, &spokes);
        let complex = extractor.finalize(vec![local]);

        assert_eq!(complex.num_cells(), 1);
        assert_eq!(complex.num_points(), 8);
        assert_eq!(complex.num_faces(), 6);
        assert_eq!(complex.cell_points(0).len(), 8);
        assert_eq!(complex.cell_faces(0), 0..6);
        for face in 0..complex.num_faces() {
            assert_eq!(complex.face(face).len(), 4);
        }
        // A box corner joins 3 box faces and the cell itself.
        assert_eq!(complex.merge().num_merged_points, 8);
    }

    #[test]
    fn test_geometry_offsets_across_cells() {
        let cell = box_cell();
        let spokes = boundary_spokes(&cell);
        let mut extractor = GeometryExtractor::new(FaceSelection::All);
        let mut a = GeometryLocal::default();
        extractor.add_cell(&mut a, &cell, &spokes);
        let mut b = GeometryLocal::default();
        extractor.add_cell(&mut b, &cell, &spokes);
        let complex = extractor.finalize(vec![a, b]);

        assert_eq!(complex.num_cells(), 2);
        assert_eq!(complex.num_points(), 16);
        assert_eq!(complex.num_faces(), 12);
        // The second cell's faces must reference the second point block.
        for face in complex.cell_faces(1) {
            for &p in complex.face(face) {
                assert!((8..16).contains(&p));
            }
        }
    }

    #[test]
    fn test_face_selection_filters() {
        let mut cell = box_cell();
        cell.clip(1, DVec3::new(1.2, 0.5, 0.5), 1e-6);
        let spokes: Vec<Spoke> = cell
            .valid_faces()
            .map(|(_, f)| {
                if f.neighbor < 0 {
                    Spoke::new(f.neighbor, spoke_class::DOMAIN_BOUNDARY)
                } else {
                    Spoke::new(f.neighbor, spoke_class::FORWARD)
                }
            })
            .collect();
        let extractor = GeometryExtractor::new(FaceSelection::DomainBoundary);
        let mut local = GeometryLocal::default();
        extractor.add_cell(&mut local, &cell, &spokes);
        // The interior face to neighbor 1 is skipped.
        assert_eq!(local.cells[0].num_faces, cell.num_faces() - 1);
    }

    #[test]
    fn test_delaunay_minimal_id_filter() {
        // Three axis-aligned bisectors truncate the cell to [0, 0.85]³; the
        // corner at (0.85, 0.85, 0.85) joins faces 1, 2 and 3 and is the
        // only vertex with three real neighbors.
        let mut cell = box_cell();
        cell.clip(1, DVec3::new(1.2, 0.5, 0.5), 1e-6);
        cell.clip(2, DVec3::new(0.5, 1.2, 0.5), 1e-6);
        cell.clip(3, DVec3::new(0.5, 0.5, 1.2), 1e-6);
        let extractor = DelaunayExtractor::new();
        let mut local = Vec::new();
        extractor.add_cell(&mut local, &cell, &[]);
        assert_eq!(local.len(), 1);
        let mut tet = local[0];
        tet.sort_unstable();
        assert_eq!(tet, [0, 1, 2, 3]);
    }

    #[test]
    fn test_delaunay_region_filter() {
        let mut cell = box_cell();
        cell.clip(1, DVec3::new(1.2, 0.5, 0.5), 1e-6);
        cell.clip(2, DVec3::new(0.5, 1.2, 0.5), 1e-6);
        cell.clip(3, DVec3::new(0.5, 0.5, 1.2), 1e-6);
        let regions = vec![0, 0, -1, 0];
        let extractor = DelaunayExtractor::with_regions(&regions);
        let mut local = Vec::new();
        extractor.add_cell(&mut local, &cell, &[]);
        assert!(local.is_empty());
    }
}
