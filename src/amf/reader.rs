//! AMF document parsing
//!
//! A push-down state machine over the SAX driver. The node-type stack
//! mirrors the open element chain; dispatch is keyed on the stack depth and
//! element name, and unrecognized elements push an `Unknown` frame so the
//! stack discipline survives foreign markup.

use std::collections::HashMap;

use nalgebra::Point3;

use crate::error::{Error, Result};
use crate::mesh::TriangleMesh;
use crate::model::{Instance, Model};
use crate::sax::{self, Attributes, SaxHandler};

/// Parse an AMF document into `model`
pub(super) fn parse(xml: &str, model: &mut Model) -> Result<()> {
    let mut context = AmfContext::new(model);
    sax::parse_str(xml, &mut context)
}

/// Which entity a `<metadata>` element annotates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetadataTarget {
    Model,
    Object,
    Material,
}

/// Constellation instance fields carried as child elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstanceField {
    DeltaX,
    DeltaY,
    RotZ,
}

/// One frame of the open-element stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AmfNode {
    Amf,
    Object,
    Mesh,
    Vertices,
    Vertex,
    Coordinates,
    Coordinate(usize),
    Volume,
    Triangle,
    CornerIndex(usize),
    Material,
    Metadata(MetadataTarget),
    Constellation,
    ConstInstance,
    InstanceValue(InstanceField),
    Unknown,
}

struct AmfContext<'a> {
    model: &'a mut Model,
    path: Vec<AmfNode>,
    /// Scratch strings for coordinate and index children
    value: [String; 3],
    /// Scratch for metadata values and instance fields
    text: String,
    metadata_name: String,
    /// Index of the object currently open
    object: Option<usize>,
    /// Document object ids to model indices, for constellation references
    object_ids: HashMap<String, usize>,
    /// Per-object vertex pool, shared by the object's volumes
    vertices: Vec<Point3<f64>>,
    /// Per-volume accumulated facet corner indices
    facets: Vec<[usize; 3]>,
    /// `materialid` of the volume currently open
    volume_material: Option<String>,
    /// Id of the material currently open
    material: Option<String>,
    /// Target object of the constellation instance currently open
    instance_object: Option<usize>,
    instance: Instance,
}

impl<'a> AmfContext<'a> {
    fn new(model: &'a mut Model) -> Self {
        Self {
            model,
            path: Vec::with_capacity(8),
            value: Default::default(),
            text: String::new(),
            metadata_name: String::new(),
            object: None,
            object_ids: HashMap::new(),
            vertices: Vec::new(),
            facets: Vec::new(),
            volume_material: None,
            material: None,
            instance_object: None,
            instance: Instance::default(),
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

    fn current_object(&mut self) -> Result<&mut crate::model::Object> {
        let idx = self
            .object
            .ok_or_else(|| Error::invalid("element outside of an <object>"))?;
        Ok(&mut self.model.objects[idx])
    }

    fn parse_value(&self, idx: usize, what: &str) -> Result<f64> {
        if self.value[idx].is_empty() {
            return Err(Error::invalid(format!("missing {} value", what)));
        }
        Ok(self.value[idx].trim().parse::<f64>()?)
    }

    fn parse_index(&self, idx: usize) -> Result<usize> {
        if self.value[idx].is_empty() {
            return Err(Error::invalid("triangle is missing a vertex index"));
        }
        Ok(self.value[idx].trim().parse::<usize>()?)
    }
}

impl SaxHandler for AmfContext<'_> {
    fn element_start(&mut self, name: &str, attrs: &Attributes) -> Result<()> {
        let depth = self.path.len();
        let node = match (depth, name) {
            (0, "amf") => {
                let unit = Self::require(attrs, "amf", "unit")?;
                if unit != "millimeter" {
                    return Err(Error::UnsupportedUnit(unit.to_string()));
                }
                AmfNode::Amf
            }
            (0, other) => {
                return Err(Error::invalid(format!(
                    "expected <amf> document root, found <{}>",
                    other
                )));
            }
            (1, "object") => {
                let id = Self::require(attrs, "object", "id")?.to_string();
                self.model.add_object();
                let idx = self.model.objects.len() - 1;
                self.object = Some(idx);
                self.object_ids.insert(id, idx);
                self.vertices.clear();
                AmfNode::Object
            }
            (1, "material") => {
                let id = Self::require(attrs, "material", "id")?.to_string();
                self.model.add_material(id.clone());
                self.material = Some(id);
                AmfNode::Material
            }
            (1, "constellation") => AmfNode::Constellation,
            (1, "metadata") => {
                self.metadata_name = Self::require(attrs, "metadata", "name")?.to_string();
                self.text.clear();
                AmfNode::Metadata(MetadataTarget::Model)
            }
            (2, "mesh") if self.path.last() == Some(&AmfNode::Object) => {
                self.vertices.clear();
                AmfNode::Mesh
            }
            (2, "metadata") if self.path.last() == Some(&AmfNode::Object) => {
                self.metadata_name = Self::require(attrs, "metadata", "name")?.to_string();
                self.text.clear();
                AmfNode::Metadata(MetadataTarget::Object)
            }
            (2, "metadata") if self.path.last() == Some(&AmfNode::Material) => {
                self.metadata_name = Self::require(attrs, "metadata", "name")?.to_string();
                self.text.clear();
                AmfNode::Metadata(MetadataTarget::Material)
            }
            (2, "instance") if self.path.last() == Some(&AmfNode::Constellation) => {
                let id = Self::require(attrs, "instance", "objectid")?;
                let idx = *self
                    .object_ids
                    .get(id)
                    .ok_or_else(|| Error::UnknownObjectId(id.to_string()))?;
                self.instance_object = Some(idx);
                self.instance = Instance::default();
                AmfNode::ConstInstance
            }
            (3, "vertices") if self.path.last() == Some(&AmfNode::Mesh) => AmfNode::Vertices,
            (3, "volume") if self.path.last() == Some(&AmfNode::Mesh) => {
                self.facets.clear();
                self.volume_material = attrs.get("materialid").map(str::to_string);
                AmfNode::Volume
            }
            (3, "deltax") if self.path.last() == Some(&AmfNode::ConstInstance) => {
                self.text.clear();
                AmfNode::InstanceValue(InstanceField::DeltaX)
            }
            (3, "deltay") if self.path.last() == Some(&AmfNode::ConstInstance) => {
                self.text.clear();
                AmfNode::InstanceValue(InstanceField::DeltaY)
            }
            (3, "rz") if self.path.last() == Some(&AmfNode::ConstInstance) => {
                self.text.clear();
                AmfNode::InstanceValue(InstanceField::RotZ)
            }
            (4, "vertex") if self.path.last() == Some(&AmfNode::Vertices) => {
                self.value = Default::default();
                AmfNode::Vertex
            }
            (4, "triangle") if self.path.last() == Some(&AmfNode::Volume) => {
                self.value = Default::default();
                AmfNode::Triangle
            }
            (5, "coordinates") if self.path.last() == Some(&AmfNode::Vertex) => {
                AmfNode::Coordinates
            }
            (5, "v1") if self.path.last() == Some(&AmfNode::Triangle) => AmfNode::CornerIndex(0),
            (5, "v2") if self.path.last() == Some(&AmfNode::Triangle) => AmfNode::CornerIndex(1),
            (5, "v3") if self.path.last() == Some(&AmfNode::Triangle) => AmfNode::CornerIndex(2),
            (6, "x") if self.path.last() == Some(&AmfNode::Coordinates) => AmfNode::Coordinate(0),
            (6, "y") if self.path.last() == Some(&AmfNode::Coordinates) => AmfNode::Coordinate(1),
            (6, "z") if self.path.last() == Some(&AmfNode::Coordinates) => AmfNode::Coordinate(2),
            _ => AmfNode::Unknown,
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
            AmfNode::Vertex => {
                let x = self.parse_value(0, "vertex coordinate")?;
                let y = self.parse_value(1, "vertex coordinate")?;
                let z = self.parse_value(2, "vertex coordinate")?;
                self.vertices.push(Point3::new(x, y, z));
            }
            AmfNode::Triangle => {
                let v1 = self.parse_index(0)?;
                let v2 = self.parse_index(1)?;
                let v3 = self.parse_index(2)?;
                self.facets.push([v1, v2, v3]);
            }
            AmfNode::Volume => {
                let mut mesh = TriangleMesh::from_indexed(&self.vertices, &self.facets)?;
                mesh.repair();
                let material_id = self.volume_material.take().unwrap_or_default();
                let volume = self.current_object()?.add_volume(mesh);
                volume.material_id = material_id;
                self.facets.clear();
            }
            AmfNode::Object => {
                if self.current_object()?.volumes.is_empty() {
                    return Err(Error::invalid("object defines no volume"));
                }
                self.vertices.clear();
                self.object = None;
            }
            AmfNode::Material => {
                self.material = None;
            }
            AmfNode::Metadata(target) => {
                let name = std::mem::take(&mut self.metadata_name);
                let value = std::mem::take(&mut self.text);
                match target {
                    MetadataTarget::Model => {
                        self.model.metadata.insert(name, value);
                    }
                    MetadataTarget::Object => {
                        if name == "name" {
                            self.current_object()?.name = value;
                        }
                    }
                    MetadataTarget::Material => {
                        if let Some(id) = &self.material {
                            if let Some(material) = self.model.materials.get_mut(id) {
                                material.attributes.insert(name, value);
                            }
                        }
                    }
                }
            }
            AmfNode::InstanceValue(field) => {
                let value = self.text.trim().parse::<f64>()?;
                match field {
                    InstanceField::DeltaX => self.instance.offset.x = value,
                    InstanceField::DeltaY => self.instance.offset.y = value,
                    InstanceField::RotZ => self.instance.rotation = value.to_radians(),
                }
                self.text.clear();
            }
            AmfNode::ConstInstance => {
                if let Some(idx) = self.instance_object.take() {
                    self.model.objects[idx].instances.push(self.instance.clone());
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<()> {
        match self.path.last() {
            Some(&AmfNode::Coordinate(i)) | Some(&AmfNode::CornerIndex(i)) => {
                self.value[i].push_str(text);
            }
            Some(AmfNode::Metadata(_)) | Some(AmfNode::InstanceValue(_)) => {
                self.text.push_str(text);
            }
            _ => {}
        }
        Ok(())
    }
}
