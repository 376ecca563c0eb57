//! The convex-cell clipping automaton.
//!
//! A [`ConvexCell`] represents the Voronoi region of a single generator as a
//! bounded convex polyhedron, stored explicitly as vertex and face arenas.
//! The cell starts out as the padded bounding box of the whole point set and
//! is shrunk by repeatedly intersecting it with the half space bounded by the
//! bisector between the generator and one of its neighbors.
//!
//! Arena slots are recycled through index free-lists, so a cell instance can
//! be re-initialized for the next generator on the same worker without
//! releasing memory.

use ahash::AHashMap;
use glam::DVec3;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use rand::rngs::SmallRng;
use rand::Rng;

use crate::geometry::{intersect_edge, Aabb, Dimensionality, Plane};
use crate::merge::TopoCoordinate;

mod builder;

pub use builder::{CellBuilder, CellStats, ClipParams, DEFAULT_PRUNE_TOLERANCE};

/// Sentinel for an unset arena index.
const NIL: u32 = u32::MAX;

/// Processing status of an arena slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum SlotStatus {
    Valid = 0,
    Deleted = 1,
    /// Transient, only seen mid-clip while a face is being reclassified.
    InProcess = 2,
}

/// The outcome of clipping a cell with one bisecting half space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ClipOutcome {
    /// The half space does not cut the cell; the cell is untouched.
    NoIntersection = 0,
    /// The cell was shrunk by the half space.
    Intersection = 1,
    /// The cut was a numerically negligible nick and was discarded to
    /// preserve robustness. The cell is untouched.
    Pruned = 2,
    /// A vertex lies too close to the clipping plane to classify reliably.
    /// The cell is untouched; the caller should retry with a perturbed plane.
    Numeric = 3,
}

/// A vertex of a [`ConvexCell`].
#[derive(Clone, Debug)]
pub struct CellVertex {
    /// The location of the vertex (in global coordinates).
    pub x: DVec3,
    /// Scratch signed plane value of the current clip; positive = outside.
    pub value: f64,
    /// Squared distance to the generator (slab axis masked in 2D).
    pub r2: f64,
    /// The three faces meeting at this vertex.
    pub faces: [u32; 3],
    pub status: SlotStatus,
}

impl Default for CellVertex {
    fn default() -> Self {
        Self {
            x: DVec3::ZERO,
            value: 0.,
            r2: 0.,
            faces: [NIL; 3],
            status: SlotStatus::Deleted,
        }
    }
}

/// A face of a [`ConvexCell`].
#[derive(Clone, Debug)]
pub struct CellFace {
    /// Id of the neighboring generator that produced this face, or a
    /// synthetic negative id (−1..−6) for the initial bounding-box faces.
    pub neighbor: i64,
    /// The vertex loop, counterclockwise as seen from outside the cell.
    pub verts: Vec<u32>,
    pub status: SlotStatus,
}

impl Default for CellFace {
    fn default() -> Self {
        Self {
            neighbor: 0,
            verts: Vec::new(),
            status: SlotStatus::Deleted,
        }
    }
}

/// Cached circumflower bound. Invalidated lazily when the extremal vertex
/// is deleted.
#[derive(Clone, Copy, Debug)]
struct FlowerCache {
    max_r2: f64,
    argmax: u32,
    dirty: bool,
}

impl FlowerCache {
    fn reset() -> Self {
        Self {
            max_r2: 0.,
            argmax: NIL,
            dirty: false,
        }
    }
}

// Topology of the initial bounding box. Corners are numbered bottom (z = min)
// counterclockwise, then top; faces are −x, +x, −y, +y, −z, +z. All face
// loops are counterclockwise as seen from outside the box.
const BOX_FACE_VERTS: [[u32; 4]; 6] = [
    [0, 4, 7, 3],
    [1, 2, 6, 5],
    [0, 1, 5, 4],
    [3, 7, 6, 2],
    [0, 3, 2, 1],
    [4, 5, 6, 7],
];
const BOX_VERT_FACES: [[u32; 3]; 8] = [
    [0, 2, 4],
    [1, 2, 4],
    [1, 3, 4],
    [0, 3, 4],
    [0, 2, 5],
    [1, 2, 5],
    [1, 3, 5],
    [0, 3, 5],
];

/// Base magnitude of the pseudo-random plane-normal nudge used to escape
/// degenerate configurations. An order of magnitude above the default
/// tolerance band, so a single nudge can already clear it.
const PERTURBATION_SCALE: f64 = 1e-5;

/// The clipping automaton for one generator.
pub struct ConvexCell {
    generator: usize,
    loc: DVec3,
    dimensionality: Dimensionality,
    verts: Vec<CellVertex>,
    faces: Vec<CellFace>,
    free_verts: Vec<u32>,
    free_faces: Vec<u32>,
    num_verts: usize,
    num_faces: usize,
    clips: usize,
    flower: FlowerCache,
    // Per-clip scratch, reused across clips and across generators.
    edge_cuts: AHashMap<(u32, u32), u32>,
    cap_verts: Vec<u32>,
    in_process: Vec<u32>,
    discarded: Vec<u32>,
    rebuild: Vec<u32>,
    doomed: Vec<u32>,
    loop_scratch: Vec<u32>,
    cap_order: Vec<(usize, u32)>,
}

impl ConvexCell {
    pub fn new(dimensionality: Dimensionality) -> Self {
        Self {
            generator: 0,
            loc: DVec3::ZERO,
            dimensionality,
            verts: Vec::new(),
            faces: Vec::new(),
            free_verts: Vec::new(),
            free_faces: Vec::new(),
            num_verts: 0,
            num_faces: 0,
            clips: 0,
            flower: FlowerCache::reset(),
            edge_cuts: AHashMap::new(),
            cap_verts: Vec::new(),
            in_process: Vec::new(),
            discarded: Vec::new(),
            rebuild: Vec::new(),
            doomed: Vec::new(),
            loop_scratch: Vec::new(),
            cap_order: Vec::new(),
        }
    }

    /// Reset this cell to the padded bounding box of the point set, for a new
    /// generator. Arena slots are recycled, not reallocated.
    pub fn initialize(&mut self, generator: usize, loc: DVec3, bounds: &Aabb) {
        self.generator = generator;
        self.loc = loc;
        self.clips = 0;
        self.flower = FlowerCache::reset();

        while self.verts.len() < 8 {
            self.verts.push(CellVertex::default());
        }
        while self.faces.len() < 6 {
            self.faces.push(CellFace::default());
        }

        // Everything beyond the box slots goes back on the free lists.
        self.free_verts.clear();
        for id in (8..self.verts.len() as u32).rev() {
            self.verts[id as usize].status = SlotStatus::Deleted;
            self.free_verts.push(id);
        }
        self.free_faces.clear();
        for id in (6..self.faces.len() as u32).rev() {
            let face = &mut self.faces[id as usize];
            face.status = SlotStatus::Deleted;
            face.verts.clear();
            self.free_faces.push(id);
        }

        let (lo, hi) = (bounds.min, bounds.max);
        let corners = [
            DVec3::new(lo.x, lo.y, lo.z),
            DVec3::new(hi.x, lo.y, lo.z),
            DVec3::new(hi.x, hi.y, lo.z),
            DVec3::new(lo.x, hi.y, lo.z),
            DVec3::new(lo.x, lo.y, hi.z),
            DVec3::new(hi.x, lo.y, hi.z),
            DVec3::new(hi.x, hi.y, hi.z),
            DVec3::new(lo.x, hi.y, hi.z),
        ];
        for (id, (&x, &faces)) in corners.iter().zip(BOX_VERT_FACES.iter()).enumerate() {
            let r2 = self.dimensionality.distance_squared(loc, x);
            self.verts[id] = CellVertex {
                x,
                value: 0.,
                r2,
                faces,
                status: SlotStatus::Valid,
            };
            if r2 > self.flower.max_r2 {
                self.flower.max_r2 = r2;
                self.flower.argmax = id as u32;
            }
        }
        for (id, loop_verts) in BOX_FACE_VERTS.iter().enumerate() {
            let face = &mut self.faces[id];
            face.neighbor = -(id as i64) - 1;
            face.status = SlotStatus::Valid;
            face.verts.clear();
            face.verts.extend_from_slice(loop_verts);
        }
        self.num_verts = 8;
        self.num_faces = 6;
    }

    pub fn generator(&self) -> usize {
        self.generator
    }

    pub fn loc(&self) -> DVec3 {
        self.loc
    }

    pub fn dimensionality(&self) -> Dimensionality {
        self.dimensionality
    }

    /// The number of half-space clips applied since initialization.
    pub fn num_clips(&self) -> usize {
        self.clips
    }

    /// The number of valid vertices.
    pub fn num_vertices(&self) -> usize {
        self.num_verts
    }

    /// The number of valid faces.
    pub fn num_faces(&self) -> usize {
        self.num_faces
    }

    /// The raw vertex arena, including deleted slots.
    pub fn vertices(&self) -> &[CellVertex] {
        &self.verts
    }

    /// The raw face arena, including deleted slots.
    pub fn faces(&self) -> &[CellFace] {
        &self.faces
    }

    /// Iterate over the valid faces, in slot order.
    pub fn valid_faces(&self) -> impl Iterator<Item = (usize, &CellFace)> {
        self.faces
            .iter()
            .enumerate()
            .filter(|(_, f)| f.status == SlotStatus::Valid)
    }

    /// Iterate over the valid vertices, in slot order.
    pub fn valid_vertices(&self) -> impl Iterator<Item = (usize, &CellVertex)> {
        self.verts
            .iter()
            .enumerate()
            .filter(|(_, v)| v.status == SlotStatus::Valid)
    }

    /// The neighbor ids of the three faces meeting at a vertex.
    pub fn vertex_face_neighbors(&self, vertex: usize) -> [i64; 3] {
        let v = &self.verts[vertex];
        [
            self.faces[v.faces[0] as usize].neighbor,
            self.faces[v.faces[1] as usize].neighbor,
            self.faces[v.faces[2] as usize].neighbor,
        ]
    }

    /// The topological coordinate of a vertex: the sorted ids of all
    /// generators whose cells meet there.
    pub fn topo_coordinate(&self, vertex: usize) -> TopoCoordinate {
        let [p0, p1, p2] = self.vertex_face_neighbors(vertex);
        TopoCoordinate::new(p0, p1, p2, self.generator as i64)
    }

    /// The squared diameter of the smallest ball containing the Voronoi
    /// flower: `4 × max r²` over all vertices. A neighbor farther than this
    /// bound from the generator cannot affect the cell.
    pub fn circumflower2(&mut self) -> f64 {
        if self.flower.dirty {
            self.flower.max_r2 = 0.;
            self.flower.argmax = NIL;
            for (id, v) in self.verts.iter().enumerate() {
                if v.status == SlotStatus::Valid && v.r2 > self.flower.max_r2 {
                    self.flower.max_r2 = v.r2;
                    self.flower.argmax = id as u32;
                }
            }
            self.flower.dirty = false;
        }
        4. * self.flower.max_r2
    }

    /// Whether a point at squared distance `dist2` from the generator could
    /// still affect this cell.
    pub fn in_circum_flower(&mut self, dist2: f64) -> bool {
        dist2 <= self.circumflower2()
    }

    /// Whether a point lies inside the Voronoi flower: the union of the empty
    /// balls centered at the cell vertices with radius to the generator.
    pub fn in_flower(&self, x: DVec3) -> bool {
        self.verts.iter().any(|v| {
            v.status == SlotStatus::Valid && self.dimensionality.distance_squared(v.x, x) <= v.r2
        })
    }

    /// The bisecting half space between this cell's generator and a neighbor,
    /// as `(plane, side)`. The plane is always derived with the lower-id
    /// point as anchor, so two neighboring cells compute bitwise identical
    /// planes regardless of visiting order. `side` flips the sign of plane
    /// values such that positive always means "discard".
    ///
    /// Returns `None` for coincident generators (zero-length normal).
    fn bisector(&self, neighbor: usize, neighbor_loc: DVec3) -> Option<(Plane, f64)> {
        let (lo, hi, side) = if self.generator < neighbor {
            (self.loc, neighbor_loc, 1.)
        } else {
            (neighbor_loc, self.loc, -1.)
        };
        let d = hi - lo;
        let len2 = d.length_squared();
        if len2 == 0. || !len2.is_finite() {
            return None;
        }
        Some((Plane::new(d / len2.sqrt(), 0.5 * (lo + hi)), side))
    }

    /// Clip this cell with the bisecting half space between its generator and
    /// the given neighbor.
    pub fn clip(&mut self, neighbor: usize, neighbor_loc: DVec3, prune_tol: f64) -> ClipOutcome {
        match self.bisector(neighbor, neighbor_loc) {
            Some((plane, side)) => self.clip_with_plane(neighbor, &plane, side, prune_tol),
            None => ClipOutcome::NoIntersection,
        }
    }

    /// Retry a [`ClipOutcome::Numeric`] clip with a pseudo-random nudge of
    /// the plane normal. The nudge grows with the attempt number.
    pub fn clip_perturbed(
        &mut self,
        neighbor: usize,
        neighbor_loc: DVec3,
        prune_tol: f64,
        attempt: u32,
        rng: &mut SmallRng,
    ) -> ClipOutcome {
        let Some((plane, side)) = self.bisector(neighbor, neighbor_loc) else {
            return ClipOutcome::NoIntersection;
        };
        let nudge = DVec3::new(
            rng.gen::<f64>() - 0.5,
            rng.gen::<f64>() - 0.5,
            rng.gen::<f64>() - 0.5,
        );
        // Keep the nudge in-plane in 2D so slab faces stay untouched.
        let nudge = self.dimensionality.embed(nudge);
        let scale = PERTURBATION_SCALE * (attempt + 1) as f64;
        let n = (plane.n + scale * nudge).normalize();
        self.clip_with_plane(neighbor, &Plane::new(n, plane.p), side, prune_tol)
    }

    fn clip_with_plane(
        &mut self,
        neighbor: usize,
        plane: &Plane,
        side: f64,
        prune_tol: f64,
    ) -> ClipOutcome {
        // Evaluate every valid vertex against the plane; positive = outside.
        let mut vmin = f64::INFINITY;
        let mut vmax = f64::NEG_INFINITY;
        for v in &mut self.verts {
            if v.status != SlotStatus::Valid {
                continue;
            }
            v.value = side * plane.eval(v.x);
            vmin = vmin.min(v.value);
            vmax = vmax.max(v.value);
        }
        if vmax <= 0. {
            return ClipOutcome::NoIntersection;
        }
        let len = vmax - vmin;
        if !(len > 0.) || vmax / len <= prune_tol {
            return ClipOutcome::Pruned;
        }
        // All tolerances are relative to the value range of this clip.
        let tol = len * prune_tol;
        for v in &self.verts {
            if v.status == SlotStatus::Valid && v.value.abs() <= tol {
                return ClipOutcome::Numeric;
            }
        }

        // Collect the discarded vertices and mark their faces in-process.
        self.discarded.clear();
        for (id, v) in self.verts.iter().enumerate() {
            if v.status == SlotStatus::Valid && v.value > 0. {
                self.discarded.push(id as u32);
            }
        }
        self.in_process.clear();
        for i in 0..self.discarded.len() {
            let vid = self.discarded[i];
            for fid in self.verts[vid as usize].faces {
                let face = &mut self.faces[fid as usize];
                if face.status == SlotStatus::Valid {
                    face.status = SlotStatus::InProcess;
                    self.in_process.push(fid);
                }
            }
        }

        // Classify every in-process face by counting sign changes around its
        // vertex loop, before mutating anything.
        self.rebuild.clear();
        self.doomed.clear();
        for i in 0..self.in_process.len() {
            let fid = self.in_process[i];
            let loop_verts = &self.faces[fid as usize].verts;
            let mut changes = 0;
            let mut outside = 0;
            for (k, &a) in loop_verts.iter().enumerate() {
                let b = loop_verts[(k + 1) % loop_verts.len()];
                let a_out = self.verts[a as usize].value > 0.;
                let b_out = self.verts[b as usize].value > 0.;
                if a_out {
                    outside += 1;
                }
                if a_out != b_out {
                    changes += 1;
                }
            }
            if changes == 2 {
                self.rebuild.push(fid);
            } else if changes == 0 && outside == loop_verts.len() {
                self.doomed.push(fid);
            } else {
                // Never expected for a clip that passed the degeneracy check.
                for &f in &self.in_process {
                    self.faces[f as usize].status = SlotStatus::Valid;
                }
                return ClipOutcome::Numeric;
            }
        }

        // Rebuild the crossing faces against the new capping face.
        let cap = self.alloc_face(neighbor as i64);
        self.edge_cuts.clear();
        self.cap_verts.clear();
        for i in 0..self.rebuild.len() {
            let fid = self.rebuild[i];
            self.rebuild_face(fid, cap);
        }
        self.order_cap_face(cap, side * plane.n);

        for i in 0..self.rebuild.len() {
            let fid = self.rebuild[i];
            self.faces[fid as usize].status = SlotStatus::Valid;
        }
        for i in 0..self.doomed.len() {
            let fid = self.doomed[i];
            self.free_face(fid);
        }
        // Free the discarded vertices only now, after all face rebuilding is
        // done, so their slots are not reused mid-operation.
        for i in 0..self.discarded.len() {
            let vid = self.discarded[i];
            self.free_vertex(vid);
        }

        self.clips += 1;
        ClipOutcome::Intersection
    }

    /// Rebuild a face crossed exactly twice by the clipping plane: keep the
    /// interior vertices in loop order and splice in the two edge cuts.
    fn rebuild_face(&mut self, fid: u32, cap: u32) {
        let old = std::mem::take(&mut self.faces[fid as usize].verts);
        let mut new_loop = std::mem::take(&mut self.loop_scratch);
        new_loop.clear();
        for (k, &a) in old.iter().enumerate() {
            let b = old[(k + 1) % old.len()];
            let va = self.verts[a as usize].value;
            let vb = self.verts[b as usize].value;
            if va < 0. {
                new_loop.push(a);
            }
            if va * vb < 0. {
                new_loop.push(self.edge_cut(a, b, fid, cap));
            }
        }
        let mut verts = old;
        verts.clear();
        verts.extend_from_slice(&new_loop);
        self.faces[fid as usize].verts = verts;
        self.loop_scratch = new_loop;
    }

    /// The intersection vertex of the clipping plane with the edge `a`–`b`.
    /// An edge shared by two rebuilt faces yields exactly one new vertex.
    fn edge_cut(&mut self, a: u32, b: u32, fid: u32, cap: u32) -> u32 {
        let key = (a.min(b), a.max(b));
        if let Some(&vid) = self.edge_cuts.get(&key) {
            let v = &mut self.verts[vid as usize];
            debug_assert_eq!(v.faces[2], NIL);
            v.faces[2] = fid;
            return vid;
        }
        let va = self.verts[a as usize].value;
        let vb = self.verts[b as usize].value;
        let x = intersect_edge(self.verts[a as usize].x, va, self.verts[b as usize].x, vb);
        let vid = self.alloc_vertex(x, [fid, cap, NIL]);
        self.edge_cuts.insert(key, vid);
        self.cap_verts.push(vid);
        vid
    }

    /// Order the collected cap vertices into one convex polygon,
    /// counterclockwise around the outward normal `u`. Each vertex is ranked
    /// by how many of the others lie on the positive side of the plane
    /// spanned by (pivot → vertex, u): a fan order that needs no
    /// trigonometry and is exact for convex capping polygons.
    fn order_cap_face(&mut self, cap: u32, u: DVec3) {
        debug_assert!(self.cap_verts.len() >= 3, "Degenerate capping polygon!");
        let pivot = self.cap_verts[0];
        let px = self.verts[pivot as usize].x;
        let mut order = std::mem::take(&mut self.cap_order);
        order.clear();
        for i in 1..self.cap_verts.len() {
            let vi = self.cap_verts[i];
            let di = self.verts[vi as usize].x - px;
            let mut rank = 0;
            for j in 1..self.cap_verts.len() {
                if j == i {
                    continue;
                }
                let dj = self.verts[self.cap_verts[j] as usize].x - px;
                if di.cross(dj).dot(u) > 0. {
                    rank += 1;
                }
            }
            order.push((rank, vi));
        }
        // Descending rank is ascending angle around `u`.
        order.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        let face = &mut self.faces[cap as usize];
        face.verts.clear();
        face.verts.push(pivot);
        face.verts.extend(order.iter().map(|&(_, v)| v));
        self.cap_order = order;
    }

    fn alloc_vertex(&mut self, x: DVec3, faces: [u32; 3]) -> u32 {
        let r2 = self.dimensionality.distance_squared(self.loc, x);
        let vid = match self.free_verts.pop() {
            Some(vid) => vid,
            None => {
                self.verts.push(CellVertex::default());
                (self.verts.len() - 1) as u32
            }
        };
        self.verts[vid as usize] = CellVertex {
            x,
            value: 0.,
            r2,
            faces,
            status: SlotStatus::Valid,
        };
        if !self.flower.dirty && r2 > self.flower.max_r2 {
            self.flower.max_r2 = r2;
            self.flower.argmax = vid;
        }
        self.num_verts += 1;
        vid
    }

    fn alloc_face(&mut self, neighbor: i64) -> u32 {
        let fid = match self.free_faces.pop() {
            Some(fid) => fid,
            None => {
                self.faces.push(CellFace::default());
                (self.faces.len() - 1) as u32
            }
        };
        let face = &mut self.faces[fid as usize];
        face.neighbor = neighbor;
        face.verts.clear();
        face.status = SlotStatus::Valid;
        self.num_faces += 1;
        fid
    }

    fn free_vertex(&mut self, vid: u32) {
        self.verts[vid as usize].status = SlotStatus::Deleted;
        self.free_verts.push(vid);
        self.num_verts -= 1;
        if self.flower.argmax == vid {
            self.flower.dirty = true;
        }
    }

    fn free_face(&mut self, fid: u32) {
        let face = &mut self.faces[fid as usize];
        face.status = SlotStatus::Deleted;
        face.verts.clear();
        self.free_faces.push(fid);
        self.num_faces -= 1;
    }
}
