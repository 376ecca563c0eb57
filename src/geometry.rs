//! A few general-purpose geometry primitives used by the clipping kernel,
//! which might also be useful for users of this library.

use glam::DVec3;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The dimensionality of a tessellation.
///
/// The kernel always works on a 3D representation; 2D point sets are embedded
/// in a z-slab and the z axis is masked out of all distance computations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Dimensionality {
    TwoD = 2,
    ThreeD = 3,
}

impl Dimensionality {
    /// Squared distance between two points, ignoring the slab axis in 2D.
    pub fn distance_squared(&self, a: DVec3, b: DVec3) -> f64 {
        let mut b = b;
        if let Dimensionality::TwoD = self {
            b.z = a.z;
        }
        a.distance_squared(b)
    }

    /// Project a point into the active subspace (zero the slab axis in 2D).
    pub fn embed(&self, mut loc: DVec3) -> DVec3 {
        if let Dimensionality::TwoD = self {
            loc.z = 0.;
        }
        loc
    }
}

/// A simple plane struct.
#[derive(Clone, Debug)]
pub struct Plane {
    /// Normal vector.
    pub n: DVec3,
    /// Point on the plane.
    pub p: DVec3,
}

impl Plane {
    /// Create a plane from a normal vector and a point on the plane.
    pub fn new(n: DVec3, p: DVec3) -> Self {
        Self { n, p }
    }

    /// Signed distance from a point to this plane, scaled by the length of
    /// the normal (exact signed distance for unit normals).
    pub fn eval(&self, x: DVec3) -> f64 {
        self.n.dot(x - self.p)
    }
}

/// Intersect the segment `a`–`b` with a plane, given the signed plane values
/// `va` and `vb` of the endpoints. The values must straddle zero.
pub fn intersect_edge(a: DVec3, va: f64, b: DVec3, vb: f64) -> DVec3 {
    debug_assert!(va * vb < 0., "Edge endpoints must straddle the plane!");
    let t = va / (va - vb);
    a + t * (b - a)
}

/// A simple sphere struct, stored with its squared radius.
#[derive(Clone, Copy, Debug)]
pub struct Sphere {
    pub center: DVec3,
    pub radius2: f64,
}

impl Sphere {
    /// Zero sized sphere at the origin.
    pub const EMPTY: Sphere = Sphere {
        center: DVec3::ZERO,
        radius2: 0.,
    };

    pub fn new(center: DVec3, radius2: f64) -> Self {
        Self { center, radius2 }
    }

    /// Whether a point lies inside this sphere.
    pub fn contains(&self, point: DVec3) -> bool {
        self.center.distance_squared(point) <= self.radius2
    }

    /// Whether this sphere overlaps an axis-aligned box.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        let closest = self.center.clamp(aabb.min, aabb.max);
        self.contains(closest)
    }
}

/// An axis-aligned bounding box.
#[derive(Clone, Copy, Debug)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// The tight bounding box of a point set. Panics on an empty set.
    pub fn from_points(points: &[DVec3]) -> Self {
        assert!(!points.is_empty(), "Bounding box of an empty point set!");
        let mut min = points[0];
        let mut max = points[0];
        for &p in &points[1..] {
            min = min.min(p);
            max = max.max(p);
        }
        Self { min, max }
    }

    pub fn extent(&self) -> DVec3 {
        self.max - self.min
    }

    pub fn center(&self) -> DVec3 {
        0.5 * (self.min + self.max)
    }

    /// Grow the box by `padding` on all sides. In 2D, the slab axis is
    /// additionally widened to the largest in-plane extent, so that the slab
    /// faces never interfere with the in-plane tessellation.
    pub fn padded(&self, padding: f64, dimensionality: Dimensionality) -> Self {
        let pad = DVec3::splat(padding);
        let mut min = self.min - pad;
        let mut max = self.max + pad;
        if let Dimensionality::TwoD = dimensionality {
            let extent = max - min;
            let half_width = 0.5 * extent.x.max(extent.y).max(1e-12);
            let mid = 0.5 * (min.z + max.z);
            min.z = mid - half_width;
            max.z = mid + half_width;
        }
        Aabb { min, max }
    }

    pub fn contains(&self, point: DVec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }
}
