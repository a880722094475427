//! The in-memory model graph
//!
//! A [`Model`] owns its objects and materials; an [`Object`] owns its
//! volumes and instances. Ownership is strictly a tree — parent context is
//! passed explicitly (by index or id) instead of stored back-pointers, so
//! deep copies are plain `Clone` and no reference cycles can form.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::{Point2, Vector2, Vector3};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::mesh::{Axis, BoundingBox2, BoundingBox3, TriangleMesh};

/// One span of Z with an overriding layer height
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerHeightRange {
    /// Lower Z bound
    pub min_z: f64,
    /// Upper Z bound
    pub max_z: f64,
    /// Layer height to use within the span
    pub height: f64,
}

/// A material shared across the objects of one model
///
/// Attributes come from the source file (at least `name`, often
/// `displaycolor`); the config carries print-setting overrides.
#[derive(Debug, Clone, Default)]
pub struct Material {
    /// Named string attributes from the source document
    pub attributes: BTreeMap<String, String>,
    /// Print-config overrides for this material
    pub config: Config,
}

impl Material {
    /// Create an empty material
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge attributes, keeping values already present
    pub fn apply(&mut self, attributes: &BTreeMap<String, String>) {
        for (key, value) in attributes {
            self.attributes
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// The `name` attribute, if set
    pub fn name(&self) -> Option<&str> {
        self.attributes.get("name").map(String::as_str)
    }
}

/// One mesh region of an object
///
/// Either a printable body or, when `modifier` is set, a region that only
/// overrides print parameters for the space it occupies.
#[derive(Debug, Clone)]
pub struct Volume {
    /// Volume name
    pub name: String,
    /// The owned mesh
    pub mesh: TriangleMesh,
    /// Print-config overrides for this volume
    pub config: Config,
    /// True for parameter-override regions that print no geometry
    pub modifier: bool,
    /// Key into the model's material map; empty when unassigned.
    /// Legacy documents may store a bare integer id here.
    pub material_id: String,
}

impl Volume {
    /// Create a volume around `mesh`
    pub fn new(mesh: TriangleMesh) -> Self {
        Self {
            name: String::new(),
            mesh,
            config: Config::new(),
            modifier: false,
            material_id: String::new(),
        }
    }
}

/// One placement of an object on the build plate
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    /// Rotation about the Z axis, radians
    pub rotation: f64,
    /// Uniform scaling factor
    pub scaling_factor: f64,
    /// Planar offset in unscaled coordinates
    pub offset: Vector2<f64>,
}

impl Default for Instance {
    fn default() -> Self {
        Self {
            rotation: 0.0,
            scaling_factor: 1.0,
            offset: Vector2::zeros(),
        }
    }
}

impl Instance {
    /// Apply this placement to `mesh`: rotate, scale, then translate
    pub fn transform_mesh(&self, mesh: &mut TriangleMesh, dont_translate: bool) {
        mesh.rotate_z(self.rotation);
        mesh.scale_uniform(self.scaling_factor);
        if !dont_translate {
            mesh.translate(self.offset.x, self.offset.y, 0.0);
        }
    }

    /// Bounding box of `bbox` under this placement
    ///
    /// Transforms the eight corners and re-wraps them, which is exact for
    /// the rotate/scale/translate placements instances can express.
    pub fn transform_bounding_box(&self, bbox: &BoundingBox3, dont_translate: bool) -> BoundingBox3 {
        let mut out = BoundingBox3::new();
        if !bbox.defined() {
            return out;
        }
        let (sin, cos) = self.rotation.sin_cos();
        for &x in &[bbox.min.x, bbox.max.x] {
            for &y in &[bbox.min.y, bbox.max.y] {
                for &z in &[bbox.min.z, bbox.max.z] {
                    let mut p = nalgebra::Point3::new(
                        (cos * x - sin * y) * self.scaling_factor,
                        (sin * x + cos * y) * self.scaling_factor,
                        z * self.scaling_factor,
                    );
                    if !dont_translate {
                        p.x += self.offset.x;
                        p.y += self.offset.y;
                    }
                    out.merge_point(&p);
                }
            }
        }
        out
    }
}

/// A printable object: volumes plus the placements that instantiate them
#[derive(Debug, Clone)]
pub struct Object {
    /// Object name
    pub name: String,
    /// Path of the file the object was imported from
    pub input_file: String,
    /// Printable and modifier volumes, in document order
    pub volumes: Vec<Volume>,
    /// Placements of this object on the build plate
    pub instances: Vec<Instance>,
    /// Print-config overrides for this object
    pub config: Config,
    /// Z spans with overriding layer heights, sorted and non-overlapping
    pub layer_height_ranges: Vec<LayerHeightRange>,
    /// Translation accumulated by [`Object::center_around_origin`]; undone
    /// on write so re-imported parts keep their alignment
    pub origin_translation: Vector3<f64>,
    /// Part number from the source document, if any
    pub part_number: Option<u32>,
    bounding_box: Option<BoundingBox3>,
}

impl Default for Object {
    fn default() -> Self {
        Self {
            name: String::new(),
            input_file: String::new(),
            volumes: Vec::new(),
            instances: Vec::new(),
            config: Config::new(),
            layer_height_ranges: Vec::new(),
            origin_translation: Vector3::zeros(),
            part_number: None,
            bounding_box: None,
        }
    }
}

impl Object {
    /// Create an empty object
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a volume owning `mesh`
    pub fn add_volume(&mut self, mesh: TriangleMesh) -> &mut Volume {
        self.volumes.push(Volume::new(mesh));
        self.invalidate_bounding_box();
        let idx = self.volumes.len() - 1;
        &mut self.volumes[idx]
    }

    /// Append a deep copy of `other`
    pub fn add_volume_from(&mut self, other: &Volume) -> &mut Volume {
        self.volumes.push(other.clone());
        self.invalidate_bounding_box();
        let idx = self.volumes.len() - 1;
        &mut self.volumes[idx]
    }

    /// Remove the volume at `idx`, preserving the order of the rest
    pub fn delete_volume(&mut self, idx: usize) {
        if idx < self.volumes.len() {
            self.volumes.remove(idx);
            self.invalidate_bounding_box();
        }
    }

    /// Remove every volume
    pub fn clear_volumes(&mut self) {
        self.volumes.clear();
        self.invalidate_bounding_box();
    }

    /// Append an identity instance
    pub fn add_instance(&mut self) -> &mut Instance {
        self.instances.push(Instance::default());
        self.invalidate_bounding_box();
        let idx = self.instances.len() - 1;
        &mut self.instances[idx]
    }

    /// Append a copy of `other`
    pub fn add_instance_from(&mut self, other: &Instance) -> &mut Instance {
        self.instances.push(other.clone());
        self.invalidate_bounding_box();
        let idx = self.instances.len() - 1;
        &mut self.instances[idx]
    }

    /// Remove the instance at `idx`
    pub fn delete_instance(&mut self, idx: usize) {
        if idx < self.instances.len() {
            self.instances.remove(idx);
            self.invalidate_bounding_box();
        }
    }

    /// Remove the most recently added instance
    pub fn delete_last_instance(&mut self) {
        self.instances.pop();
        self.invalidate_bounding_box();
    }

    /// Remove every instance
    pub fn clear_instances(&mut self) {
        self.instances.clear();
        self.invalidate_bounding_box();
    }

    /// Register a layer-height override for `[min_z, max_z)`
    ///
    /// Ranges are kept sorted; overlapping or inverted spans are rejected.
    pub fn add_layer_height_range(&mut self, min_z: f64, max_z: f64, height: f64) -> Result<()> {
        if !(min_z < max_z) {
            return Err(Error::invalid("layer height range must satisfy min_z < max_z"));
        }
        if self
            .layer_height_ranges
            .iter()
            .any(|r| min_z < r.max_z && r.min_z < max_z)
        {
            return Err(Error::invalid("layer height ranges must not overlap"));
        }
        let position = self
            .layer_height_ranges
            .partition_point(|r| r.min_z < min_z);
        self.layer_height_ranges.insert(
            position,
            LayerHeightRange {
                min_z,
                max_z,
                height,
            },
        );
        Ok(())
    }

    /// Bounding box of all transformed instances, cached until invalidated
    pub fn bounding_box(&mut self) -> BoundingBox3 {
        if self.bounding_box.is_none() {
            self.update_bounding_box();
        }
        self.bounding_box.unwrap_or_default()
    }

    /// Drop the cached bounding box after a geometric mutation
    pub fn invalidate_bounding_box(&mut self) {
        self.bounding_box = None;
    }

    /// Recompute the cached bounding box
    pub fn update_bounding_box(&mut self) {
        let raw = self.raw_bounding_box();
        let bbox = if self.instances.is_empty() {
            raw
        } else {
            let mut merged = BoundingBox3::new();
            for instance in &self.instances {
                merged.merge(&instance.transform_bounding_box(&raw, false));
            }
            merged
        };
        self.bounding_box = Some(bbox);
    }

    /// Bounding box of the untransformed printable volumes
    pub fn raw_bounding_box(&self) -> BoundingBox3 {
        let mut bbox = BoundingBox3::new();
        for volume in self.volumes.iter().filter(|v| !v.modifier) {
            bbox.merge(&volume.mesh.bounding_box());
        }
        bbox
    }

    /// Bounding box of the instance at `idx` applied to the raw geometry
    pub fn instance_bounding_box(&self, idx: usize) -> BoundingBox3 {
        let raw = self.raw_bounding_box();
        match self.instances.get(idx) {
            Some(instance) => instance.transform_bounding_box(&raw, false),
            None => raw,
        }
    }

    /// Repair every volume mesh
    pub fn repair(&mut self) {
        for volume in &mut self.volumes {
            volume.mesh.repair();
        }
    }

    /// Whether any volume mesh still needs a repair pass
    pub fn needed_repair(&self) -> bool {
        self.volumes.iter().any(|v| v.mesh.needed_repair())
    }

    /// Flatten printable volumes and instances into one mesh
    pub fn mesh(&self) -> TriangleMesh {
        let raw = self.raw_mesh();
        let mut merged = TriangleMesh::new();
        for instance in &self.instances {
            let mut placed = raw.clone();
            instance.transform_mesh(&mut placed, false);
            merged.merge(&placed);
        }
        merged
    }

    /// Flatten printable volumes into one mesh, ignoring instances
    pub fn raw_mesh(&self) -> TriangleMesh {
        let mut merged = TriangleMesh::new();
        for volume in self.volumes.iter().filter(|v| !v.modifier) {
            merged.merge(&volume.mesh);
        }
        merged
    }

    /// Translate every volume mesh
    pub fn translate(&mut self, x: f64, y: f64, z: f64) {
        for volume in &mut self.volumes {
            volume.mesh.translate(x, y, z);
        }
        if let Some(bbox) = &mut self.bounding_box {
            bbox.translate(&Vector3::new(x, y, z));
        }
    }

    /// Scale every volume mesh per axis; the accumulated origin translation
    /// scales with the geometry
    pub fn scale(&mut self, factors: &Vector3<f64>) {
        for volume in &mut self.volumes {
            volume.mesh.scale(factors);
        }
        self.origin_translation.component_mul_assign(factors);
        self.invalidate_bounding_box();
    }

    /// Scale every volume mesh uniformly
    pub fn scale_uniform(&mut self, factor: f64) {
        self.scale(&Vector3::new(factor, factor, factor));
    }

    /// Scale the object so its raw bounding box fits within `size`
    pub fn scale_to_fit(&mut self, size: &Vector3<f64>) {
        let current = self.raw_bounding_box().size();
        if current.x <= 0.0 || current.y <= 0.0 || current.z <= 0.0 {
            return;
        }
        let factor = (size.x / current.x)
            .min(size.y / current.y)
            .min(size.z / current.z);
        self.scale_uniform(factor);
    }

    /// Rotate every volume mesh about `axis`
    ///
    /// Rotation invalidates the accumulated origin translation.
    pub fn rotate(&mut self, angle: f64, axis: Axis) {
        for volume in &mut self.volumes {
            volume.mesh.rotate(angle, axis);
        }
        self.origin_translation = Vector3::zeros();
        self.invalidate_bounding_box();
    }

    /// Mirror every volume mesh across the plane orthogonal to `axis`
    pub fn mirror(&mut self, axis: Axis) {
        for volume in &mut self.volumes {
            volume.mesh.mirror(axis);
        }
        self.origin_translation = Vector3::zeros();
        self.invalidate_bounding_box();
    }

    /// Drop the object so its lowest point touches Z = 0
    pub fn align_to_ground(&mut self) {
        let bbox = self.raw_bounding_box();
        if bbox.defined() {
            self.translate(0.0, 0.0, -bbox.min.z);
        }
    }

    /// Center the raw geometry around the XY origin with its base at Z = 0
    ///
    /// The applied shift accumulates into `origin_translation`, and existing
    /// instance offsets are compensated so placements stay put.
    pub fn center_around_origin(&mut self) {
        let bbox = self.raw_bounding_box();
        if !bbox.defined() {
            return;
        }
        let size = bbox.size();
        let shift = Vector3::new(
            -bbox.min.x - size.x / 2.0,
            -bbox.min.y - size.y / 2.0,
            -bbox.min.z,
        );
        self.translate(shift.x, shift.y, shift.z);
        self.origin_translation += shift;
        if !self.instances.is_empty() {
            for instance in &mut self.instances {
                instance.offset -= Vector2::new(shift.x, shift.y);
            }
            self.update_bounding_box();
        }
    }

    /// Bake `instance` into the geometry of every volume
    pub fn transform_by_instance(&mut self, instance: &Instance, dont_translate: bool) {
        for volume in &mut self.volumes {
            volume.mesh.rotate_z(instance.rotation);
            volume.mesh.scale_uniform(instance.scaling_factor);
            if !dont_translate {
                volume
                    .mesh
                    .translate(instance.offset.x, instance.offset.y, 0.0);
            }
        }
        self.origin_translation = Vector3::zeros();
        self.invalidate_bounding_box();
    }

    /// Number of distinct materials referenced by the volumes
    pub fn materials_count(&self) -> usize {
        let ids: BTreeSet<&str> = self
            .volumes
            .iter()
            .map(|v| v.material_id.as_str())
            .collect();
        ids.len()
    }

    /// Total facet count over the printable volumes
    pub fn facets_count(&self) -> usize {
        self.volumes
            .iter()
            .filter(|v| !v.modifier)
            .map(|v| v.mesh.facet_count())
            .sum()
    }
}

/// The print-bed content: objects, shared materials and document metadata
#[derive(Debug, Clone, Default)]
pub struct Model {
    /// Objects in document order
    pub objects: Vec<Object>,
    /// Materials keyed by id, shared by volumes across objects
    pub materials: BTreeMap<String, Material>,
    /// Document metadata
    pub metadata: BTreeMap<String, String>,
}

impl Model {
    /// Create an empty model
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an empty object
    pub fn add_object(&mut self) -> &mut Object {
        self.objects.push(Object::new());
        let idx = self.objects.len() - 1;
        &mut self.objects[idx]
    }

    /// Append a deep copy of `other`, optionally without its volumes
    pub fn add_object_from(&mut self, other: &Object, copy_volumes: bool) -> &mut Object {
        let mut object = other.clone();
        if !copy_volumes {
            object.clear_volumes();
        }
        self.objects.push(object);
        let idx = self.objects.len() - 1;
        &mut self.objects[idx]
    }

    /// Remove the object at `idx`, preserving the order of the rest
    pub fn delete_object(&mut self, idx: usize) {
        if idx < self.objects.len() {
            self.objects.remove(idx);
        }
    }

    /// Remove every object
    pub fn clear_objects(&mut self) {
        self.objects.clear();
    }

    /// Register an empty material under `id`, replacing any prior holder
    pub fn add_material(&mut self, id: impl Into<String>) -> &mut Material {
        let id = id.into();
        self.materials.insert(id.clone(), Material::new());
        self.materials.entry(id).or_default()
    }

    /// Register a deep copy of `other` under `id`, replacing any prior holder
    pub fn add_material_from(&mut self, id: impl Into<String>, other: &Material) -> &mut Material {
        let id = id.into();
        self.materials.insert(id.clone(), other.clone());
        self.materials.entry(id).or_default()
    }

    /// Look up a material by id
    pub fn get_material(&self, id: &str) -> Option<&Material> {
        self.materials.get(id)
    }

    /// Remove the material registered under `id`, if any
    pub fn delete_material(&mut self, id: &str) {
        self.materials.remove(id);
    }

    /// Remove every material
    pub fn clear_materials(&mut self) {
        self.materials.clear();
    }

    /// True when any object has no placement yet
    pub fn has_objects_with_no_instances(&self) -> bool {
        self.objects.iter().any(|o| o.instances.is_empty())
    }

    /// Give every placement-less object a single identity instance
    pub fn add_default_instances(&mut self) {
        for object in &mut self.objects {
            if object.instances.is_empty() {
                object.add_instance();
            }
        }
    }

    /// Union of every object's transformed-instance bounding box
    pub fn bounding_box(&mut self) -> BoundingBox3 {
        let mut bbox = BoundingBox3::new();
        for object in &mut self.objects {
            bbox.merge(&object.bounding_box());
        }
        bbox
    }

    /// Repair every volume mesh of every object
    pub fn repair(&mut self) {
        for object in &mut self.objects {
            object.repair();
        }
    }

    /// Shift every instance so the centroid of placements lands on `point`
    pub fn center_instances_around_point(&mut self, point: &Point2<f64>) {
        let bbox = self.bounding_box();
        if !bbox.defined() {
            return;
        }
        let size = bbox.size();
        let shift = Vector2::new(
            -bbox.min.x + point.x - size.x / 2.0,
            -bbox.min.y + point.y - size.y / 2.0,
        );
        for object in &mut self.objects {
            for instance in &mut object.instances {
                instance.offset += shift;
            }
            object.invalidate_bounding_box();
        }
    }

    /// Shift every instance so the model's XY bounding box starts at origin
    pub fn align_instances_to_origin(&mut self) {
        let bbox = self.bounding_box();
        if !bbox.defined() {
            return;
        }
        let size = bbox.size();
        let new_center = Point2::new(size.x / 2.0, size.y / 2.0);
        self.center_instances_around_point(&new_center);
    }

    /// Translate every object's geometry, accumulating origin translation
    pub fn translate(&mut self, x: f64, y: f64, z: f64) {
        for object in &mut self.objects {
            object.translate(x, y, z);
            object.origin_translation += Vector3::new(x, y, z);
        }
    }

    /// Flatten the whole model, instance transforms applied
    pub fn mesh(&self) -> TriangleMesh {
        let mut merged = TriangleMesh::new();
        for object in &self.objects {
            merged.merge(&object.mesh());
        }
        merged
    }

    /// Flatten the whole model without instance transforms
    pub fn raw_mesh(&self) -> TriangleMesh {
        let mut merged = TriangleMesh::new();
        for object in &self.objects {
            merged.merge(&object.raw_mesh());
        }
        merged
    }

    /// Re-place every instance of every object on a grid
    pub fn arrange_objects(&mut self, dist: f64, bb: Option<&BoundingBox2>) -> Result<()> {
        let mut sizes = Vec::new();
        for object in &self.objects {
            for idx in 0..object.instances.len() {
                let size = object.instance_bounding_box(idx).size();
                sizes.push(Vector2::new(size.x, size.y));
            }
        }
        let positions = arrange(&sizes, dist, bb)?;
        let mut position = positions.into_iter();
        for object in &mut self.objects {
            for instance in &mut object.instances {
                if let Some(p) = position.next() {
                    instance.offset = Vector2::new(p.x, p.y);
                }
            }
            object.invalidate_bounding_box();
        }
        Ok(())
    }

    /// Duplicate the entire model `copies` times, keeping the relative
    /// placement of instances within each copy
    pub fn duplicate(&mut self, copies: usize, dist: f64, bb: Option<&BoundingBox2>) -> Result<()> {
        if copies < 2 {
            return Ok(());
        }
        let size = self.bounding_box().size();
        let sizes = vec![Vector2::new(size.x, size.y); copies - 1];
        let positions = arrange(&sizes, dist, bb)?;
        for object in &mut self.objects {
            let existing = object.instances.clone();
            for position in &positions {
                for instance in &existing {
                    let mut copy = instance.clone();
                    copy.offset += Vector2::new(position.x, position.y);
                    object.instances.push(copy);
                }
            }
            object.invalidate_bounding_box();
        }
        Ok(())
    }

    /// Multiply every object's instances `copies`-fold, then rearrange
    pub fn duplicate_objects(
        &mut self,
        copies: usize,
        dist: f64,
        bb: Option<&BoundingBox2>,
    ) -> Result<()> {
        if copies < 2 {
            return Ok(());
        }
        for object in &mut self.objects {
            let existing = object.instances.clone();
            for _ in 1..copies {
                for instance in &existing {
                    object.instances.push(instance.clone());
                }
            }
        }
        self.arrange_objects(dist, bb)
    }

    /// Lay a single object out as an `x` × `y` grid of instances
    pub fn duplicate_objects_grid(&mut self, x: usize, y: usize, dist: f64) -> Result<()> {
        if self.objects.len() != 1 {
            return Err(Error::invalid(
                "grid duplication requires exactly one object",
            ));
        }
        let size = self.objects[0].bounding_box().size();
        let object = &mut self.objects[0];
        object.clear_instances();
        for col in 0..x {
            for row in 0..y {
                let instance = object.add_instance();
                instance.offset = Vector2::new(
                    (size.x + dist) * col as f64,
                    (size.y + dist) * row as f64,
                );
            }
        }
        Ok(())
    }

    /// Heuristic: a single object whose printable volumes look like
    /// independent parts rather than modifier regions
    pub fn looks_like_multipart_object(&self) -> bool {
        if self.objects.len() != 1 {
            return false;
        }
        self.objects[0]
            .volumes
            .iter()
            .filter(|v| !v.modifier)
            .count()
            > 1
    }

    /// Promote each volume of a single multi-part object into its own
    /// object, preserving per-volume configs and placements
    pub fn convert_multipart_object(&mut self) {
        if !self.looks_like_multipart_object() {
            return;
        }
        let source = self.objects.remove(0);
        debug!(volumes = source.volumes.len(), "splitting multi-part object");
        let Object {
            name,
            input_file,
            volumes,
            instances,
            config,
            origin_translation,
            ..
        } = source;
        for volume in volumes {
            let object = self.add_object();
            object.name = if volume.name.is_empty() {
                name.clone()
            } else {
                volume.name.clone()
            };
            object.input_file = input_file.clone();
            object.config = config.clone();
            object.origin_translation = origin_translation;
            object.instances = instances.clone();
            object.volumes.push(volume);
        }
    }
}

/// Place rectangles of the given `sizes` on a grid with at least `dist`
/// clearance, optionally inside bounds `bb`; returns placement centers
///
/// Cells are sized by the largest rectangle so every part fits any slot.
/// Fails when the bounds cannot hold the requested count.
pub fn arrange(
    sizes: &[Vector2<f64>],
    dist: f64,
    bb: Option<&BoundingBox2>,
) -> Result<Vec<Point2<f64>>> {
    let count = sizes.len();
    if count == 0 {
        return Ok(Vec::new());
    }
    let mut part: Vector2<f64> = Vector2::zeros();
    for size in sizes {
        part.x = part.x.max(size.x);
        part.y = part.y.max(size.y);
    }
    let cell = part + Vector2::new(dist, dist);

    let (cols, rows) = match bb {
        Some(bounds) => {
            let space = bounds.size();
            let max_cols = (space.x / cell.x).floor() as usize;
            let max_rows = (space.y / cell.y).floor() as usize;
            if max_cols == 0 || max_rows == 0 || max_cols * max_rows < count {
                return Err(Error::ArrangeFailed { parts: count });
            }
            let cols = max_cols.min(count);
            (cols, count.div_ceil(cols))
        }
        None => {
            let cols = (count as f64).sqrt().ceil() as usize;
            (cols, count.div_ceil(cols))
        }
    };

    let grid = Vector2::new(cols as f64 * cell.x, rows as f64 * cell.y);
    let origin = match bb {
        Some(bounds) => bounds.center() - grid / 2.0,
        None => Point2::new(-grid.x / 2.0, -grid.y / 2.0),
    };

    let mut out = Vec::with_capacity(count);
    'grid: for row in 0..rows {
        for col in 0..cols {
            if out.len() == count {
                break 'grid;
            }
            out.push(Point2::new(
                origin.x + (col as f64 + 0.5) * cell.x,
                origin.y + (row as f64 + 0.5) * cell.y,
            ));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    fn tetrahedron(offset: f64) -> TriangleMesh {
        let v = [
            Point3::new(offset, 0.0, 0.0),
            Point3::new(offset + 1.0, 0.0, 0.0),
            Point3::new(offset, 1.0, 0.0),
            Point3::new(offset, 0.0, 1.0),
        ];
        TriangleMesh::from_indexed(&v, &[[0, 2, 1], [0, 1, 3], [1, 2, 3], [0, 3, 2]]).unwrap()
    }

    fn one_object_model() -> Model {
        let mut model = Model::new();
        let object = model.add_object();
        object.add_volume(tetrahedron(0.0));
        model
    }

    #[test]
    fn default_instances_cover_every_object() {
        let mut model = one_object_model();
        model.add_object().add_volume(tetrahedron(5.0));
        assert!(model.has_objects_with_no_instances());
        model.add_default_instances();
        assert!(!model.has_objects_with_no_instances());
        for object in &model.objects {
            assert_eq!(object.instances.len(), 1);
            assert_eq!(object.instances[0], Instance::default());
        }
        // Already-instanced objects are left alone.
        model.add_default_instances();
        assert_eq!(model.objects[0].instances.len(), 1);
    }

    #[test]
    fn add_material_replaces_prior_holder() {
        let mut model = Model::new();
        model
            .add_material("steel")
            .attributes
            .insert("name".into(), "Steel".into());
        assert_eq!(model.get_material("steel").unwrap().name(), Some("Steel"));
        model.add_material("steel");
        assert_eq!(model.get_material("steel").unwrap().name(), None);
        model.delete_material("steel");
        assert!(model.get_material("steel").is_none());
    }

    #[test]
    fn material_apply_keeps_existing_values() {
        let mut material = Material::new();
        material.attributes.insert("name".into(), "ABS".into());
        let mut incoming = BTreeMap::new();
        incoming.insert("name".to_string(), "PLA".to_string());
        incoming.insert("displaycolor".to_string(), "#FF0000FF".to_string());
        material.apply(&incoming);
        assert_eq!(material.name(), Some("ABS"));
        assert_eq!(
            material.attributes.get("displaycolor").map(String::as_str),
            Some("#FF0000FF")
        );
    }

    #[test]
    fn delete_object_preserves_order() {
        let mut model = Model::new();
        model.add_object().name = "a".into();
        model.add_object().name = "b".into();
        model.add_object().name = "c".into();
        model.delete_object(1);
        let names: Vec<&str> = model.objects.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["a", "c"]);
        // Out-of-range deletes are ignored.
        model.delete_object(7);
        assert_eq!(model.objects.len(), 2);
    }

    #[test]
    fn bounding_box_covers_scaled_instances() {
        let mut model = one_object_model();
        let instance = model.objects[0].add_instance();
        instance.scaling_factor = 2.0;
        let bbox = model.bounding_box();
        assert!((bbox.max.x - 2.0).abs() < 1e-12);
        assert!((bbox.max.z - 2.0).abs() < 1e-12);
    }

    #[test]
    fn bounding_box_cache_invalidates_on_mutation() {
        let mut model = one_object_model();
        model.objects[0].add_instance();
        let before = model.bounding_box();
        model.objects[0].instances[0].offset = Vector2::new(10.0, 0.0);
        model.objects[0].invalidate_bounding_box();
        let after = model.bounding_box();
        assert!((after.min.x - before.min.x - 10.0).abs() < 1e-12);
    }

    #[test]
    fn translate_accumulates_origin_translation() {
        let mut model = one_object_model();
        model.translate(3.0, -1.0, 2.0);
        let object = &model.objects[0];
        assert_eq!(object.origin_translation, Vector3::new(3.0, -1.0, 2.0));
        let bbox = object.raw_bounding_box();
        assert!((bbox.min.x - 3.0).abs() < 1e-12);
    }

    #[test]
    fn center_around_origin_compensates_instances() {
        let mut model = Model::new();
        let object = model.add_object();
        object.add_volume(tetrahedron(10.0));
        let instance = object.add_instance();
        instance.offset = Vector2::new(5.0, 5.0);
        let before = model.bounding_box();
        model.objects[0].center_around_origin();
        let after = model.bounding_box();
        assert!((before.min.x - after.min.x).abs() < 1e-9);
        assert!((before.max.y - after.max.y).abs() < 1e-9);
        assert!(model.objects[0].origin_translation.norm() > 0.0);
    }

    #[test]
    fn mesh_applies_instances_raw_mesh_does_not() {
        let mut model = one_object_model();
        let instance = model.objects[0].add_instance();
        instance.offset = Vector2::new(100.0, 0.0);
        let raw = model.raw_mesh().bounding_box();
        let placed = model.mesh().bounding_box();
        assert!(raw.max.x < 2.0);
        assert!(placed.min.x > 99.0);
    }

    #[test]
    fn modifier_volumes_do_not_print() {
        let mut model = one_object_model();
        let volume = model.objects[0].add_volume(tetrahedron(0.0));
        volume.modifier = true;
        assert_eq!(model.objects[0].facets_count(), 4);
        assert_eq!(model.raw_mesh().facet_count(), 4);
    }

    #[test]
    fn arrange_fits_within_bounds() {
        let sizes = vec![Vector2::new(10.0, 10.0); 4];
        let bounds = BoundingBox2::new(Point2::new(0.0, 0.0), Point2::new(100.0, 100.0));
        let positions = arrange(&sizes, 5.0, Some(&bounds)).unwrap();
        assert_eq!(positions.len(), 4);
        for p in &positions {
            assert!(p.x > 0.0 && p.x < 100.0);
            assert!(p.y > 0.0 && p.y < 100.0);
        }
        // Pairwise clearance of at least dist between cell centers.
        for (i, a) in positions.iter().enumerate() {
            for b in &positions[i + 1..] {
                assert!((a - b).norm() >= 15.0 - 1e-9);
            }
        }
    }

    #[test]
    fn arrange_fails_when_bed_too_small() {
        let sizes = vec![Vector2::new(50.0, 50.0); 4];
        let bounds = BoundingBox2::new(Point2::new(0.0, 0.0), Point2::new(60.0, 60.0));
        assert!(matches!(
            arrange(&sizes, 1.0, Some(&bounds)),
            Err(Error::ArrangeFailed { parts: 4 })
        ));
    }

    #[test]
    fn duplicate_multiplies_instances() {
        let mut model = one_object_model();
        model.add_default_instances();
        model.duplicate(3, 1.0, None).unwrap();
        assert_eq!(model.objects[0].instances.len(), 3);
    }

    #[test]
    fn duplicate_objects_grid_places_rows_and_columns() {
        let mut model = one_object_model();
        model.duplicate_objects_grid(2, 3, 4.0).unwrap();
        assert_eq!(model.objects[0].instances.len(), 6);

        let mut two = one_object_model();
        two.add_object();
        assert!(two.duplicate_objects_grid(2, 2, 1.0).is_err());
    }

    #[test]
    fn multipart_detection_and_conversion() {
        let mut model = one_object_model();
        assert!(!model.looks_like_multipart_object());

        let volume = model.objects[0].add_volume(tetrahedron(3.0));
        volume.name = "part2".into();
        volume.config.set_deserialize("perimeters", "4");
        model.objects[0].name = "combo".into();
        model.add_default_instances();
        assert!(model.looks_like_multipart_object());

        model.convert_multipart_object();
        assert_eq!(model.objects.len(), 2);
        assert_eq!(model.objects[0].name, "combo");
        assert_eq!(model.objects[1].name, "part2");
        assert_eq!(
            model.objects[1].volumes[0].config.serialize("perimeters"),
            Some("4")
        );
        for object in &model.objects {
            assert_eq!(object.volumes.len(), 1);
            assert_eq!(object.instances.len(), 1);
        }
    }

    #[test]
    fn layer_height_ranges_reject_overlap() {
        let mut object = Object::new();
        object.add_layer_height_range(0.0, 5.0, 0.2).unwrap();
        object.add_layer_height_range(5.0, 10.0, 0.3).unwrap();
        assert!(object.add_layer_height_range(4.0, 6.0, 0.1).is_err());
        assert!(object.add_layer_height_range(3.0, 3.0, 0.1).is_err());
        assert_eq!(object.layer_height_ranges.len(), 2);
        assert!(object.layer_height_ranges[0].min_z < object.layer_height_ranges[1].min_z);
    }

    #[test]
    fn repair_marks_all_volumes() {
        let mut model = one_object_model();
        assert!(model.objects[0].needed_repair());
        model.repair();
        assert!(!model.objects[0].needed_repair());
    }

    #[test]
    fn align_instances_to_origin_moves_bbox_to_first_quadrant() {
        let mut model = one_object_model();
        let instance = model.objects[0].add_instance();
        instance.offset = Vector2::new(-50.0, -20.0);
        model.align_instances_to_origin();
        let bbox = model.bounding_box();
        assert!(bbox.min.x.abs() < 1e-9);
        assert!(bbox.min.y.abs() < 1e-9);
    }
}
