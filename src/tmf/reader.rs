//! 3MF package parsing
//!
//! The model part is read from the archive into memory and fed through the
//! SAX driver into a push-down state machine, mirroring the AMF reader but
//! over the 3MF schema: attribute-borne vertices and triangles, one vertex
//! pool per object sliced into volumes by `<slic3r:volume ts te>` ranges,
//! component references flattened into volumes, and build items that turn
//! resource objects into placed instances.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use nalgebra::Point3;
use tracing::debug;
use zip::ZipArchive;

use super::opc;
use crate::error::{Error, Result};
use crate::mesh::TriangleMesh;
use crate::model::Model;
use crate::sax::{self, Attributes, SaxHandler};
use crate::transform;

/// Read the 3MF package at `path` into `model`
///
/// On error the model may hold a partial graph the caller must discard.
/// The archive handle is released on every exit path; no scratch files are
/// created.
pub fn read(path: impl AsRef<Path>, model: &mut Model) -> Result<()> {
    let path = path.as_ref();
    debug!(path = %path.display(), "reading 3MF");
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    let xml = opc::read_model_entry(&mut archive)?;
    parse_model(&xml, model)
}

/// Parse the model part document into `model`
pub(super) fn parse_model(xml: &str, model: &mut Model) -> Result<()> {
    let mut context = TmfContext::new(model);
    sax::parse_str(xml, &mut context)
}

/// One frame of the open-element stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TmfNode {
    Model,
    Metadata,
    Resources,
    Build,
    BaseMaterials,
    Base,
    SlicerMaterials,
    SlicerMaterial,
    Object,
    SlicerObjectConfig,
    Mesh,
    Vertices,
    Vertex,
    Triangles,
    Triangle,
    Components,
    Component,
    SlicerVolumes,
    SlicerVolume,
    SlicerVolumeConfig,
    Item,
    Unknown,
}

struct TmfContext<'a> {
    model: &'a mut Model,
    path: Vec<TmfNode>,
    /// Scratch for metadata and material config text
    text: String,
    metadata_name: String,
    /// Index of the object currently open
    object: Option<usize>,
    /// Document object ids to model indices
    object_ids: HashMap<String, usize>,
    /// Objects created by this parse with their build-output flag; objects
    /// never referenced by an `<item>` are dropped at `</model>`
    outputs: Vec<(usize, bool)>,
    /// Per-object vertex pool
    vertices: Vec<Point3<f64>>,
    /// Flattened facet-corner buffer (three entries per triangle)
    facet_corners: Vec<usize>,
    /// Per-triangle `p1` material index
    facet_p1: Vec<Option<usize>>,
    /// Index of the volume currently open
    volume: Option<usize>,
    /// Base-material index (`mid`) to model material id
    base_ids: Vec<String>,
    /// `mid`/`type` of the slic3r material config currently open
    material_mid: Option<usize>,
    material_key: String,
    /// Object-level material reference (`pid`/`pindex`)
    object_pindex: Option<usize>,
}

impl<'a> TmfContext<'a> {
    fn new(model: &'a mut Model) -> Self {
        Self {
            model,
            path: Vec::with_capacity(8),
            text: String::new(),
            metadata_name: String::new(),
            object: None,
            object_ids: HashMap::new(),
            outputs: Vec::new(),
            vertices: Vec::new(),
            facet_corners: Vec::new(),
            facet_p1: Vec::new(),
            volume: None,
            base_ids: Vec::new(),
            material_mid: None,
            material_key: String::new(),
            object_pindex: None,
        }
    }

    fn require<'v>(
        attrs: &'v Attributes,
        element: &'static str,
        attribute: &'static str,
    ) -> Result<&'v str> {
        attrs
            .get(attribute)
            .ok_or(Error::MissingAttribute { element, attribute })
    }

    fn current_object_index(&self) -> Result<usize> {
        self.object
            .ok_or_else(|| Error::invalid("element outside of an <object>"))
    }

    /// Slice the accumulated triangle list into a new volume of the open
    /// object; `ts`/`te` are inclusive triangle indices
    fn add_volume(&mut self, ts: usize, te: usize, modifier: bool) -> Result<usize> {
        if te < ts {
            return Err(Error::invalid(format!(
                "volume triangle range {}..{} is inverted",
                ts, te
            )));
        }
        let start = ts * 3;
        let end = te * 3 + 2;
        if end >= self.facet_corners.len() {
            return Err(Error::invalid(format!(
                "volume triangle range {}..{} exceeds {} triangles",
                ts,
                te,
                self.facet_corners.len() / 3
            )));
        }

        let facets: Vec<[usize; 3]> = self.facet_corners[start..=end]
            .chunks_exact(3)
            .map(|c| [c[0], c[1], c[2]])
            .collect();
        let mut mesh = TriangleMesh::from_indexed(&self.vertices, &facets)?;
        mesh.repair();

        // Restore the material assignment from the first painted triangle.
        let material_id = self.facet_p1[ts..=te]
            .iter()
            .flatten()
            .next()
            .and_then(|&mid| self.base_ids.get(mid))
            .cloned()
            .unwrap_or_default();

        let object_index = self.current_object_index()?;
        let object = &mut self.model.objects[object_index];
        let volume = object.add_volume(mesh);
        volume.modifier = modifier;
        volume.material_id = material_id;
        Ok(object.volumes.len() - 1)
    }
}

impl SaxHandler for TmfContext<'_> {
    fn element_start(&mut self, name: &str, attrs: &Attributes) -> Result<()> {
        let depth = self.path.len();
        let node = match (depth, name) {
            (0, "model") => TmfNode::Model,
            (0, other) => {
                return Err(Error::invalid(format!(
                    "expected <model> document root, found <{}>",
                    other
                )));
            }
            (1, "metadata") => {
                self.metadata_name = Self::require(attrs, "metadata", "name")?.to_string();
                self.text.clear();
                TmfNode::Metadata
            }
            (1, "resources") => TmfNode::Resources,
            (1, "build") => TmfNode::Build,
            (2, "basematerials") if self.path.last() == Some(&TmfNode::Resources) => {
                TmfNode::BaseMaterials
            }
            (2, "slic3r:materials") if self.path.last() == Some(&TmfNode::Resources) => {
                TmfNode::SlicerMaterials
            }
            (2, "object") if self.path.last() == Some(&TmfNode::Resources) => {
                let id = Self::require(attrs, "object", "id")?.to_string();
                self.model.add_object();
                let index = self.model.objects.len() - 1;
                self.object = Some(index);
                self.object_ids.insert(id, index);
                self.outputs.push((index, false));
                self.vertices.clear();
                self.facet_corners.clear();
                self.facet_p1.clear();

                let object = &mut self.model.objects[index];
                if let Some(name) = attrs.get("name") {
                    object.name = name.to_string();
                }
                if let Some(part_number) = attrs.get("partnumber") {
                    let value = part_number.parse::<i64>()?;
                    object.part_number = u32::try_from(value).ok();
                }
                self.object_pindex = match attrs.get("pindex") {
                    Some(pindex) if attrs.get("pid").is_some() => Some(pindex.parse::<usize>()?),
                    _ => None,
                };
                TmfNode::Object
            }
            (2, "item") if self.path.last() == Some(&TmfNode::Build) => {
                let id = Self::require(attrs, "item", "objectid")?;
                let index = *self
                    .object_ids
                    .get(id)
                    .ok_or_else(|| Error::UnknownObjectId(id.to_string()))?;
                if let Some(flag) = self.outputs.iter_mut().find(|(i, _)| *i == index) {
                    flag.1 = true;
                }
                let instance = self.model.objects[index].add_instance();
                if let Some(text) = attrs.get("transform") {
                    let matrix = transform::parse(text)?;
                    let decomposition = transform::decompose(&matrix);
                    // Only the scale survives; rotation and translation of
                    // build items are currently discarded downstream.
                    instance.scaling_factor = decomposition.scale.x;
                }
                TmfNode::Item
            }
            (3, "base") if self.path.last() == Some(&TmfNode::BaseMaterials) => {
                let id = self.base_ids.len().to_string();
                let material = self.model.add_material(id.clone());
                for (key, value) in attrs.iter() {
                    material.attributes.insert(key.to_string(), value.to_string());
                }
                self.base_ids.push(id);
                TmfNode::Base
            }
            (3, "slic3r:material") if self.path.last() == Some(&TmfNode::SlicerMaterials) => {
                let mid = Self::require(attrs, "slic3r:material", "mid")?.parse::<usize>()?;
                self.material_mid = Some(mid);
                self.material_key = Self::require(attrs, "slic3r:material", "type")?.to_string();
                self.text.clear();
                TmfNode::SlicerMaterial
            }
            (3, "mesh") if self.path.last() == Some(&TmfNode::Object) => TmfNode::Mesh,
            (3, "components") if self.path.last() == Some(&TmfNode::Object) => TmfNode::Components,
            (3, "slic3r:object") if self.path.last() == Some(&TmfNode::Object) => {
                if let (Some(key), Some(value)) = (attrs.get("type"), attrs.get("config")) {
                    let index = self.current_object_index()?;
                    self.model.objects[index].config.set_deserialize(key, value);
                }
                TmfNode::SlicerObjectConfig
            }
            (4, "vertices") if self.path.last() == Some(&TmfNode::Mesh) => TmfNode::Vertices,
            (4, "triangles") if self.path.last() == Some(&TmfNode::Mesh) => TmfNode::Triangles,
            (4, "slic3r:volumes") if self.path.last() == Some(&TmfNode::Mesh) => {
                TmfNode::SlicerVolumes
            }
            (4, "component") if self.path.last() == Some(&TmfNode::Components) => {
                let id = Self::require(attrs, "component", "objectid")?;
                let referenced = *self
                    .object_ids
                    .get(id)
                    .ok_or_else(|| Error::UnknownObjectId(id.to_string()))?;
                // The graph has no nested objects: flatten the referenced
                // object's merged mesh into a volume of the referencing one.
                let mut mesh = self.model.objects[referenced].raw_mesh();
                if let Some(text) = attrs.get("transform") {
                    let matrix = transform::parse(text)?;
                    mesh.transform(&matrix);
                }
                let index = self.current_object_index()?;
                self.model.objects[index].add_volume(mesh);
                TmfNode::Component
            }
            (5, "vertex") if self.path.last() == Some(&TmfNode::Vertices) => {
                let x = Self::require(attrs, "vertex", "x")?.parse::<f64>()?;
                let y = Self::require(attrs, "vertex", "y")?.parse::<f64>()?;
                let z = Self::require(attrs, "vertex", "z")?.parse::<f64>()?;
                self.vertices.push(Point3::new(x, y, z));
                TmfNode::Vertex
            }
            (5, "triangle") if self.path.last() == Some(&TmfNode::Triangles) => {
                let v1 = Self::require(attrs, "triangle", "v1")?.parse::<usize>()?;
                let v2 = Self::require(attrs, "triangle", "v2")?.parse::<usize>()?;
                let v3 = Self::require(attrs, "triangle", "v3")?.parse::<usize>()?;
                self.facet_corners.extend([v1, v2, v3]);
                let p1 = match attrs.get("p1") {
                    Some(p1) => Some(p1.parse::<usize>()?),
                    None => None,
                };
                self.facet_p1.push(p1);
                TmfNode::Triangle
            }
            (5, "slic3r:volume") if self.path.last() == Some(&TmfNode::SlicerVolumes) => {
                let ts = Self::require(attrs, "slic3r:volume", "ts")?.parse::<usize>()?;
                let te = Self::require(attrs, "slic3r:volume", "te")?.parse::<usize>()?;
                let modifier = Self::require(attrs, "slic3r:volume", "modifier")?;
                let modifier = modifier.parse::<i32>()? != 0;
                let volume = self.add_volume(ts, te, modifier)?;
                self.volume = Some(volume);
                TmfNode::SlicerVolume
            }
            (6, "slic3r:metadata") if self.path.last() == Some(&TmfNode::SlicerVolume) => {
                if let (Some(key), Some(value)) = (attrs.get("type"), attrs.get("config")) {
                    let object = self.current_object_index()?;
                    let volume = self
                        .volume
                        .ok_or_else(|| Error::invalid("config outside of a volume"))?;
                    self.model.objects[object].volumes[volume]
                        .config
                        .set_deserialize(key, value);
                }
                TmfNode::SlicerVolumeConfig
            }
            _ => TmfNode::Unknown,
        };
        self.path.push(node);
        Ok(())
    }

    fn element_end(&mut self, _name: &str) -> Result<()> {
        let node = self
            .path
            .pop()
            .ok_or_else(|| Error::invalid("unbalanced element"))?;
        match node {
            TmfNode::Metadata => {
                let name = std::mem::take(&mut self.metadata_name);
                let value = std::mem::take(&mut self.text);
                self.model.metadata.insert(name, value);
            }
            TmfNode::SlicerMaterial => {
                let value = std::mem::take(&mut self.text);
                let key = std::mem::take(&mut self.material_key);
                if let Some(id) = self
                    .material_mid
                    .take()
                    .and_then(|mid| self.base_ids.get(mid))
                {
                    if let Some(material) = self.model.materials.get_mut(id) {
                        material.config.set_deserialize(&key, &value);
                    }
                }
            }
            TmfNode::Mesh => {
                // Documents without slic3r:volumes get one volume spanning
                // the whole triangle list.
                let index = self.current_object_index()?;
                if self.model.objects[index].volumes.is_empty() && !self.facet_corners.is_empty() {
                    let count = self.facet_corners.len() / 3;
                    self.add_volume(0, count - 1, false)?;
                }
                self.facet_corners.clear();
                self.facet_p1.clear();
            }
            TmfNode::Object => {
                let index = self.current_object_index()?;
                // Apply the object-level base-material reference to volumes
                // that didn't carry their own.
                if let Some(id) = self
                    .object_pindex
                    .take()
                    .and_then(|pindex| self.base_ids.get(pindex))
                {
                    for volume in &mut self.model.objects[index].volumes {
                        if volume.material_id.is_empty() {
                            volume.material_id = id.clone();
                        }
                    }
                }
                self.vertices.clear();
                self.object = None;
            }
            TmfNode::SlicerVolume => {
                self.volume = None;
            }
            TmfNode::Model => {
                // Objects that exist only as component references are not
                // build output; drop them in descending index order.
                let mut doomed: Vec<usize> = self
                    .outputs
                    .iter()
                    .filter(|(_, output)| !output)
                    .map(|(index, _)| *index)
                    .collect();
                doomed.sort_unstable_by(|a, b| b.cmp(a));
                for index in doomed {
                    debug!(index, "dropping reference-only object");
                    self.model.delete_object(index);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        match self.path.last() {
            Some(TmfNode::Metadata) | Some(TmfNode::SlicerMaterial) => {
                self.text.push_str(text);
            }
            _ => {}
        }
        Ok(())
    }
}
