//! Triangle mesh facade
//!
//! Storage is a flat list of facets, each carrying its three corner
//! coordinates. The shared-vertex table is derived lazily by exact
//! coordinate deduplication and invalidated whenever the geometry mutates,
//! so facet indices handed out by [`TriangleMesh::require_shared_vertices`]
//! always resolve against a consistent vertex pool.

use std::collections::HashMap;

use nalgebra::{Point2, Point3, Vector3};

use crate::error::{Error, Result};
use crate::transform::{self, Matrix3x4};

/// Axis selector for rotation and mirroring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// The X axis
    X,
    /// The Y axis
    Y,
    /// The Z axis
    Z,
}

/// Axis-aligned 3D bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox3 {
    /// Minimum corner
    pub min: Point3<f64>,
    /// Maximum corner
    pub max: Point3<f64>,
    defined: bool,
}

impl BoundingBox3 {
    /// An empty box that merges as a no-op
    pub fn new() -> Self {
        Self {
            min: Point3::origin(),
            max: Point3::origin(),
            defined: false,
        }
    }

    /// Whether any point has been merged yet
    pub fn defined(&self) -> bool {
        self.defined
    }

    /// Grow the box to contain `point`
    pub fn merge_point(&mut self, point: &Point3<f64>) {
        if self.defined {
            self.min = self.min.inf(point);
            self.max = self.max.sup(point);
        } else {
            self.min = *point;
            self.max = *point;
            self.defined = true;
        }
    }

    /// Grow the box to contain `other`
    pub fn merge(&mut self, other: &BoundingBox3) {
        if other.defined {
            self.merge_point(&other.min);
            self.merge_point(&other.max);
        }
    }

    /// Extent along each axis
    pub fn size(&self) -> Vector3<f64> {
        self.max - self.min
    }

    /// Center point
    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    /// Translate both corners
    pub fn translate(&mut self, shift: &Vector3<f64>) {
        self.min += shift;
        self.max += shift;
    }
}

impl Default for BoundingBox3 {
    fn default() -> Self {
        Self::new()
    }
}

/// Axis-aligned 2D bounds, used for build-plate limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox2 {
    /// Minimum corner
    pub min: Point2<f64>,
    /// Maximum corner
    pub max: Point2<f64>,
}

impl BoundingBox2 {
    /// Bounds spanning `min` to `max`
    pub fn new(min: Point2<f64>, max: Point2<f64>) -> Self {
        Self { min, max }
    }

    /// Extent along each axis
    pub fn size(&self) -> nalgebra::Vector2<f64> {
        self.max - self.min
    }

    /// Center point
    pub fn center(&self) -> Point2<f64> {
        nalgebra::center(&self.min, &self.max)
    }
}

/// Shared-vertex view of a mesh
///
/// Each facet's three corner indices resolve into `vertices`; the table is
/// deduplicated by exact coordinate equality.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedVertices {
    /// Deduplicated vertex pool
    pub vertices: Vec<Point3<f64>>,
    /// Per-facet corner indices into `vertices`
    pub facets: Vec<[usize; 3]>,
}

/// A triangle mesh owned by a model volume
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    facets: Vec<[Point3<f64>; 3]>,
    shared: Option<SharedVertices>,
    repaired: bool,
}

impl TriangleMesh {
    /// Create an empty mesh
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mesh from per-facet corner coordinates
    pub fn from_facets(facets: Vec<[Point3<f64>; 3]>) -> Self {
        Self {
            facets,
            shared: None,
            repaired: false,
        }
    }

    /// Create a mesh by resolving facet corner indices against a vertex pool
    ///
    /// Fails when any index falls outside `vertices`.
    pub fn from_indexed(vertices: &[Point3<f64>], facets: &[[usize; 3]]) -> Result<Self> {
        let mut resolved = Vec::with_capacity(facets.len());
        for facet in facets {
            let mut corners = [Point3::origin(); 3];
            for (corner, &index) in corners.iter_mut().zip(facet) {
                *corner = *vertices.get(index).ok_or(Error::FacetIndexOutOfRange {
                    index,
                    vertices: vertices.len(),
                })?;
            }
            resolved.push(corners);
        }
        Ok(Self::from_facets(resolved))
    }

    /// Number of facets
    pub fn facet_count(&self) -> usize {
        self.facets.len()
    }

    /// True when the mesh has no facets
    pub fn is_empty(&self) -> bool {
        self.facets.is_empty()
    }

    /// Per-facet corner coordinates
    pub fn facets(&self) -> &[[Point3<f64>; 3]] {
        &self.facets
    }

    /// The shared-vertex table, if already built
    pub fn shared_vertices(&self) -> Option<&SharedVertices> {
        self.shared.as_ref()
    }

    /// Ensure the shared-vertex table exists and return it
    ///
    /// Corners are deduplicated by exact coordinate equality. Idempotent:
    /// a second call returns the cached table.
    pub fn require_shared_vertices(&mut self) -> &SharedVertices {
        let facets = &self.facets;
        self.shared.get_or_insert_with(|| build_shared(facets))
    }

    /// Repair the mesh in place
    ///
    /// Collapses degenerate facets (two corners at identical coordinates).
    /// Hole filling and normal correction are delegated to the downstream
    /// mesh-repair pass; this call is idempotent.
    pub fn repair(&mut self) {
        let before = self.facets.len();
        self.facets
            .retain(|f| f[0] != f[1] && f[1] != f[2] && f[0] != f[2]);
        if self.facets.len() != before {
            self.shared = None;
        }
        self.repaired = true;
    }

    /// Whether [`TriangleMesh::repair`] has not run since the last mutation
    pub fn needed_repair(&self) -> bool {
        !self.repaired
    }

    /// Apply an affine transform to every facet corner
    pub fn transform(&mut self, matrix: &Matrix3x4) {
        self.map_corners(|p| transform::apply(matrix, &p));
    }

    /// Translate every facet corner
    pub fn translate(&mut self, x: f64, y: f64, z: f64) {
        let shift = Vector3::new(x, y, z);
        self.map_corners(|p| p + shift);
    }

    /// Scale per axis
    pub fn scale(&mut self, factors: &Vector3<f64>) {
        let f = *factors;
        self.map_corners(|p| Point3::new(p.x * f.x, p.y * f.y, p.z * f.z));
    }

    /// Scale uniformly
    pub fn scale_uniform(&mut self, factor: f64) {
        self.scale(&Vector3::new(factor, factor, factor));
    }

    /// Rotate about the Z axis by `angle` radians
    pub fn rotate_z(&mut self, angle: f64) {
        self.rotate(angle, Axis::Z);
    }

    /// Rotate about `axis` by `angle` radians
    pub fn rotate(&mut self, angle: f64, axis: Axis) {
        let (sin, cos) = angle.sin_cos();
        self.map_corners(|p| match axis {
            Axis::X => Point3::new(p.x, cos * p.y - sin * p.z, sin * p.y + cos * p.z),
            Axis::Y => Point3::new(cos * p.x + sin * p.z, p.y, -sin * p.x + cos * p.z),
            Axis::Z => Point3::new(cos * p.x - sin * p.y, sin * p.x + cos * p.y, p.z),
        });
    }

    /// Mirror across the plane orthogonal to `axis`
    pub fn mirror(&mut self, axis: Axis) {
        self.map_corners(|p| match axis {
            Axis::X => Point3::new(-p.x, p.y, p.z),
            Axis::Y => Point3::new(p.x, -p.y, p.z),
            Axis::Z => Point3::new(p.x, p.y, -p.z),
        });
    }

    /// Append every facet of `other`
    pub fn merge(&mut self, other: &TriangleMesh) {
        self.facets.extend_from_slice(&other.facets);
        self.shared = None;
        self.repaired = false;
    }

    /// Bounding box of all facet corners
    pub fn bounding_box(&self) -> BoundingBox3 {
        let mut bbox = BoundingBox3::new();
        for facet in &self.facets {
            for corner in facet {
                bbox.merge_point(corner);
            }
        }
        bbox
    }

    fn map_corners(&mut self, f: impl Fn(Point3<f64>) -> Point3<f64>) {
        for facet in &mut self.facets {
            for corner in facet.iter_mut() {
                *corner = f(*corner);
            }
        }
        self.shared = None;
        self.repaired = false;
    }
}

/// Deduplicate facet corners into a shared-vertex table
fn build_shared(facets: &[[Point3<f64>; 3]]) -> SharedVertices {
    let mut vertices: Vec<Point3<f64>> = Vec::new();
    let mut index_of: HashMap<[u64; 3], usize> = HashMap::new();
    let mut indexed = Vec::with_capacity(facets.len());
    for facet in facets {
        let mut indices = [0usize; 3];
        for (slot, corner) in indices.iter_mut().zip(facet) {
            let key = [corner.x.to_bits(), corner.y.to_bits(), corner.z.to_bits()];
            *slot = *index_of.entry(key).or_insert_with(|| {
                vertices.push(*corner);
                vertices.len() - 1
            });
        }
        indexed.push(indices);
    }
    SharedVertices {
        vertices,
        facets: indexed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A unit cube spanning [0, size]³ as 12 facets
    pub(crate) fn cube(size: f64) -> TriangleMesh {
        let s = size;
        let v = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(s, 0.0, 0.0),
            Point3::new(s, s, 0.0),
            Point3::new(0.0, s, 0.0),
            Point3::new(0.0, 0.0, s),
            Point3::new(s, 0.0, s),
            Point3::new(s, s, s),
            Point3::new(0.0, s, s),
        ];
        let facets: [[usize; 3]; 12] = [
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [1, 2, 6],
            [1, 6, 5],
            [2, 3, 7],
            [2, 7, 6],
            [3, 0, 4],
            [3, 4, 7],
        ];
        TriangleMesh::from_indexed(&v, &facets).unwrap()
    }

    #[test]
    fn shared_vertices_deduplicate_exactly() {
        let mut mesh = cube(20.0);
        let shared = mesh.require_shared_vertices();
        assert_eq!(shared.vertices.len(), 8);
        assert_eq!(shared.facets.len(), 12);
        for facet in &shared.facets {
            for &index in facet {
                assert!(index < shared.vertices.len());
            }
        }
    }

    #[test]
    fn require_shared_vertices_is_idempotent() {
        let mut mesh = cube(1.0);
        let first = mesh.require_shared_vertices().clone();
        let second = mesh.require_shared_vertices().clone();
        assert_eq!(first, second);
    }

    #[test]
    fn shared_corners_match_geometry() {
        let mut mesh = cube(2.0);
        let facets = mesh.facets().to_vec();
        let shared = mesh.require_shared_vertices();
        for (facet, indices) in facets.iter().zip(&shared.facets) {
            for (corner, &index) in facet.iter().zip(indices) {
                assert_eq!(shared.vertices[index], *corner);
            }
        }
    }

    #[test]
    fn from_indexed_rejects_out_of_range() {
        let vertices = [Point3::origin(), Point3::new(1.0, 0.0, 0.0)];
        let result = TriangleMesh::from_indexed(&vertices, &[[0, 1, 2]]);
        assert!(matches!(
            result,
            Err(Error::FacetIndexOutOfRange { index: 2, vertices: 2 })
        ));
    }

    #[test]
    fn repair_collapses_degenerate_facets() {
        let p = Point3::new(1.0, 1.0, 1.0);
        let mut mesh = TriangleMesh::from_facets(vec![
            [Point3::origin(), Point3::new(1.0, 0.0, 0.0), p],
            [p, p, Point3::new(0.0, 1.0, 0.0)],
        ]);
        assert!(mesh.needed_repair());
        mesh.repair();
        assert_eq!(mesh.facet_count(), 1);
        assert!(!mesh.needed_repair());

        // A second pass changes nothing.
        let snapshot = mesh.clone();
        mesh.repair();
        assert_eq!(mesh, snapshot);
    }

    #[test]
    fn mutation_invalidates_shared_table() {
        let mut mesh = cube(1.0);
        mesh.require_shared_vertices();
        assert!(mesh.shared_vertices().is_some());
        mesh.translate(1.0, 0.0, 0.0);
        assert!(mesh.shared_vertices().is_none());
        let bbox = mesh.bounding_box();
        assert_eq!(bbox.min, Point3::new(1.0, 0.0, 0.0));
        assert_eq!(bbox.max, Point3::new(2.0, 1.0, 1.0));
    }

    #[test]
    fn merge_concatenates_facets() {
        let mut a = cube(1.0);
        let b = cube(1.0);
        a.merge(&b);
        assert_eq!(a.facet_count(), 24);
    }

    #[test]
    fn rotate_z_quarter_turn() {
        let mut mesh = TriangleMesh::from_facets(vec![[
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ]]);
        mesh.rotate_z(std::f64::consts::FRAC_PI_2);
        let corner = mesh.facets()[0][0];
        assert!((corner.x - 0.0).abs() < 1e-12);
        assert!((corner.y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn bounding_box_of_empty_mesh_is_undefined() {
        let mesh = TriangleMesh::new();
        assert!(!mesh.bounding_box().defined());
    }
}
