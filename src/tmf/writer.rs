//! 3MF package emission
//!
//! Entries are written in order: content types, relationships, model. All
//! volumes of one object share a single `<vertices>` table; each volume
//! records its triangle range in a `<slic3r:volume ts te>` element so the
//! reader can slice the global triangle list back apart. Vertices are
//! written with the object's accumulated origin translation subtracted and
//! the build-item transform re-adds it.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write as IoWrite};
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::{
    opc, CORE_NAMESPACE, MATERIAL_NAMESPACE, MODEL_PATH, SLIC3R_NAMESPACE, WRITE_BUFFER_CAPACITY,
};
use crate::error::{Error, Result};
use crate::model::Model;
use crate::transform;

/// Write `model` as a 3MF package at `path`
pub fn write(model: &mut Model, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    debug!(path = %path.display(), "writing 3MF");
    let file = BufWriter::with_capacity(WRITE_BUFFER_CAPACITY, File::create(path)?);
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    opc::write_content_types(&mut zip, options)?;
    opc::write_relationships(&mut zip, options)?;

    zip.start_file(MODEL_PATH, options)?;
    write_model_document(model, &mut zip)?;

    let mut inner = zip.finish()?;
    inner.flush()?;
    Ok(())
}

/// Emit the model part XML
pub(super) fn write_model_document<W: IoWrite>(model: &mut Model, writer: W) -> Result<()> {
    let mut xml = Writer::new_with_indent(writer, b' ', 2);

    xml.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut elem = BytesStart::new("model");
    elem.push_attribute(("unit", "millimeter"));
    elem.push_attribute(("xml:lang", "en-US"));
    elem.push_attribute(("xmlns", CORE_NAMESPACE));
    elem.push_attribute(("xmlns:m", MATERIAL_NAMESPACE));
    elem.push_attribute(("xmlns:slic3r", SLIC3R_NAMESPACE));
    xml.write_event(Event::Start(elem))?;

    for (name, value) in &model.metadata {
        let mut elem = BytesStart::new("metadata");
        elem.push_attribute(("name", name.as_str()));
        xml.write_event(Event::Start(elem))?;
        xml.write_event(Event::Text(BytesText::new(value)))?;
        xml.write_event(Event::End(BytesEnd::new("metadata")))?;
    }

    // Version stamp for forward-compatibility diagnostics.
    let mut elem = BytesStart::new("slic3r:metadata");
    elem.push_attribute(("type", "version"));
    xml.write_event(Event::Start(elem))?;
    xml.write_event(Event::Text(BytesText::new(env!("CARGO_PKG_VERSION"))))?;
    xml.write_event(Event::End(BytesEnd::new("slic3r:metadata")))?;

    xml.write_event(Event::Start(BytesStart::new("resources")))?;

    let material_ids = write_materials(model, &mut xml)?;

    for index in 0..model.objects.len() {
        write_object(model, index, &material_ids, &mut xml)?;
    }

    xml.write_event(Event::End(BytesEnd::new("resources")))?;

    write_build(model, &mut xml)?;

    xml.write_event(Event::End(BytesEnd::new("model")))?;
    Ok(())
}

/// Emit base materials plus their config payloads; returns material id → mid
fn write_materials<W: IoWrite>(
    model: &Model,
    xml: &mut Writer<W>,
) -> Result<HashMap<String, usize>> {
    // Only materials with an id and a name are representable as <base>.
    let printable: Vec<(&String, &crate::model::Material)> = model
        .materials
        .iter()
        .filter(|(id, material)| !id.is_empty() && material.name().is_some())
        .collect();

    let mut material_ids = HashMap::new();
    if printable.is_empty() {
        return Ok(material_ids);
    }

    let mut elem = BytesStart::new("basematerials");
    elem.push_attribute(("id", "1"));
    xml.write_event(Event::Start(elem))?;
    for (mid, (id, material)) in printable.iter().enumerate() {
        let mut base = BytesStart::new("base");
        if let Some(name) = material.name() {
            base.push_attribute(("name", name));
        }
        let color = material
            .attributes
            .get("displaycolor")
            .map(String::as_str)
            .unwrap_or("#000000FF");
        base.push_attribute(("displaycolor", color));
        xml.write_event(Event::Empty(base))?;
        material_ids.insert((*id).clone(), mid);
    }
    xml.write_event(Event::End(BytesEnd::new("basematerials")))?;

    xml.write_event(Event::Start(BytesStart::new("slic3r:materials")))?;
    for (mid, (_, material)) in printable.iter().enumerate() {
        for key in material.config.keys() {
            if let Some(value) = material.config.serialize(key) {
                let mut elem = BytesStart::new("slic3r:material");
                elem.push_attribute(("mid", mid.to_string().as_str()));
                elem.push_attribute(("type", key));
                xml.write_event(Event::Start(elem))?;
                xml.write_event(Event::Text(BytesText::new(value)))?;
                xml.write_event(Event::End(BytesEnd::new("slic3r:material")))?;
            }
        }
    }
    xml.write_event(Event::End(BytesEnd::new("slic3r:materials")))?;

    Ok(material_ids)
}

fn write_object<W: IoWrite>(
    model: &mut Model,
    index: usize,
    material_ids: &HashMap<String, usize>,
    xml: &mut Writer<W>,
) -> Result<()> {
    let object = &mut model.objects[index];
    if object.volumes.iter().any(|v| v.mesh.is_empty()) {
        return Err(Error::invalid(format!(
            "object {} has a volume with no facets",
            index
        )));
    }
    let origin = object.origin_translation;

    let mut elem = BytesStart::new("object");
    elem.push_attribute(("id", (index + 1).to_string().as_str()));
    elem.push_attribute(("type", "model"));
    if let Some(part_number) = object.part_number {
        elem.push_attribute(("partnumber", part_number.to_string().as_str()));
    }
    if !object.name.is_empty() {
        elem.push_attribute(("name", object.name.as_str()));
    }
    xml.write_event(Event::Start(elem))?;

    for key in object.config.keys() {
        if let Some(value) = object.config.serialize(key) {
            let mut elem = BytesStart::new("slic3r:object");
            elem.push_attribute(("type", key));
            elem.push_attribute(("config", value));
            xml.write_event(Event::Empty(elem))?;
        }
    }

    xml.write_event(Event::Start(BytesStart::new("mesh")))?;
    xml.write_event(Event::Start(BytesStart::new("vertices")))?;

    // All volumes share one vertex table; each volume's facet indices are
    // shifted by the shared-vertex count of the volumes before it.
    let mut volumes = Vec::with_capacity(object.volumes.len());
    let mut vertices_offset = 0;
    for volume in &mut object.volumes {
        let shared = volume.mesh.require_shared_vertices();
        for vertex in &shared.vertices {
            let mut elem = BytesStart::new("vertex");
            elem.push_attribute(("x", (vertex.x - origin.x).to_string().as_str()));
            elem.push_attribute(("y", (vertex.y - origin.y).to_string().as_str()));
            elem.push_attribute(("z", (vertex.z - origin.z).to_string().as_str()));
            xml.write_event(Event::Empty(elem))?;
        }
        let facets: Vec<[usize; 3]> = shared
            .facets
            .iter()
            .map(|f| [f[0] + vertices_offset, f[1] + vertices_offset, f[2] + vertices_offset])
            .collect();
        vertices_offset += shared.vertices.len();
        volumes.push((facets, volume.material_id.clone(), volume.modifier, volume.config.clone()));
    }

    xml.write_event(Event::End(BytesEnd::new("vertices")))?;
    xml.write_event(Event::Start(BytesStart::new("triangles")))?;

    let mut ranges = Vec::with_capacity(volumes.len());
    let mut cursor = 0;
    for (facets, material_id, _, _) in &volumes {
        ranges.push((cursor, cursor + facets.len() - 1));
        let mid = material_ids.get(material_id);
        for facet in facets {
            let mut elem = BytesStart::new("triangle");
            elem.push_attribute(("v1", facet[0].to_string().as_str()));
            elem.push_attribute(("v2", facet[1].to_string().as_str()));
            elem.push_attribute(("v3", facet[2].to_string().as_str()));
            if let Some(mid) = mid {
                elem.push_attribute(("pid", "1"));
                elem.push_attribute(("p1", mid.to_string().as_str()));
            }
            xml.write_event(Event::Empty(elem))?;
        }
        cursor += facets.len();
    }

    xml.write_event(Event::End(BytesEnd::new("triangles")))?;
    xml.write_event(Event::Start(BytesStart::new("slic3r:volumes")))?;

    for ((ts, te), (_, _, modifier, config)) in ranges.iter().zip(&volumes) {
        let mut elem = BytesStart::new("slic3r:volume");
        elem.push_attribute(("ts", ts.to_string().as_str()));
        elem.push_attribute(("te", te.to_string().as_str()));
        elem.push_attribute(("modifier", if *modifier { "1" } else { "0" }));
        xml.write_event(Event::Start(elem))?;
        for key in config.keys() {
            if let Some(value) = config.serialize(key) {
                let mut elem = BytesStart::new("slic3r:metadata");
                elem.push_attribute(("type", key));
                elem.push_attribute(("config", value));
                xml.write_event(Event::Empty(elem))?;
            }
        }
        xml.write_event(Event::End(BytesEnd::new("slic3r:volume")))?;
    }

    xml.write_event(Event::End(BytesEnd::new("slic3r:volumes")))?;
    xml.write_event(Event::End(BytesEnd::new("mesh")))?;
    xml.write_event(Event::End(BytesEnd::new("object")))?;
    Ok(())
}

fn write_build<W: IoWrite>(model: &Model, xml: &mut Writer<W>) -> Result<()> {
    xml.write_event(Event::Start(BytesStart::new("build")))?;

    for (index, object) in model.objects.iter().enumerate() {
        for instance in &object.instances {
            let matrix = transform::compose(
                instance.rotation,
                instance.scaling_factor,
                &instance.offset,
                &object.origin_translation,
            );
            let mut elem = BytesStart::new("item");
            elem.push_attribute(("objectid", (index + 1).to_string().as_str()));
            elem.push_attribute(("transform", transform::format(&matrix).as_str()));
            xml.write_event(Event::Empty(elem))?;
        }
    }

    xml.write_event(Event::End(BytesEnd::new("build")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::TriangleMesh;
    use nalgebra::Point3;

    fn tetrahedron() -> TriangleMesh {
        let v = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        TriangleMesh::from_indexed(&v, &[[0, 2, 1], [0, 1, 3], [1, 2, 3], [0, 3, 2]]).unwrap()
    }

    fn emit(model: &mut Model) -> String {
        let mut buffer = Vec::new();
        write_model_document(model, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn shares_vertices_and_slices_volumes() {
        let mut model = Model::new();
        let object = model.add_object();
        object.add_volume(tetrahedron());
        let second = object.add_volume(tetrahedron());
        second.modifier = true;
        object.add_instance();

        let xml = emit(&mut model);
        assert_eq!(xml.matches("<vertex ").count(), 8);
        assert_eq!(xml.matches("<triangle ").count(), 8);
        // Second volume's indices continue after the first pool.
        assert!(xml.contains("v1=\"4\""));
        assert!(xml.contains("ts=\"0\" te=\"3\" modifier=\"0\""));
        assert!(xml.contains("ts=\"4\" te=\"7\" modifier=\"1\""));
    }

    #[test]
    fn emits_materials_with_default_color() {
        let mut model = Model::new();
        let material = model.add_material("pla");
        material.attributes.insert("name".into(), "PLA".into());
        material.config.set_deserialize("temperature", "205");
        let object = model.add_object();
        object.add_volume(tetrahedron()).material_id = "pla".into();
        object.add_instance();

        let xml = emit(&mut model);
        assert!(xml.contains(r##"<base name="PLA" displaycolor="#000000FF"/>"##));
        assert!(xml.contains(r#"<slic3r:material mid="0" type="temperature">205</slic3r:material>"#));
        assert!(xml.contains(r#"pid="1" p1="0""#));
    }

    #[test]
    fn nameless_materials_are_not_emitted() {
        let mut model = Model::new();
        model.add_material("anonymous");
        model.add_object().add_volume(tetrahedron());

        let xml = emit(&mut model);
        assert!(!xml.contains("<basematerials"));
    }

    #[test]
    fn build_items_carry_composed_transforms() {
        let mut model = Model::new();
        let object = model.add_object();
        object.add_volume(tetrahedron());
        let instance = object.add_instance();
        instance.scaling_factor = 2.0;
        instance.offset = nalgebra::Vector2::new(7.0, 0.0);

        let xml = emit(&mut model);
        assert!(xml.contains(r#"<item objectid="1" transform="2 0 0 0 2 0 0 0 2 7 0 0"/>"#));
    }

    #[test]
    fn config_attribute_is_properly_quoted() {
        let mut model = Model::new();
        let object = model.add_object();
        object.config.set_deserialize("fill_pattern", "honeycomb");
        let volume = object.add_volume(tetrahedron());
        volume.config.set_deserialize("fill_density", "42%");
        object.add_instance();

        let xml = emit(&mut model);
        assert!(xml.contains(r#"<slic3r:object type="fill_pattern" config="honeycomb"/>"#));
        assert!(xml.contains(r#"<slic3r:metadata type="fill_density" config="42%"/>"#));
    }

    #[test]
    fn empty_volume_is_rejected() {
        let mut model = Model::new();
        let object = model.add_object();
        object.add_volume(TriangleMesh::new());
        let mut buffer = Vec::new();
        assert!(write_model_document(&mut model, &mut buffer).is_err());
    }
}
