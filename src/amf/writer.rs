//! AMF document emission
//!
//! Always plain XML, never deflate-wrapped. Volumes of one object share the
//! object-level vertex pool, so facet indices are shifted by the running
//! vertex count of the preceding volumes. The object's accumulated origin
//! translation is subtracted from every vertex and re-added to the
//! constellation deltas, keeping re-imports aligned.

use std::fs::File;
use std::io::{BufWriter, Write as IoWrite};
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use tracing::debug;

use crate::error::Result;
use crate::model::Model;

/// Write `model` as a plain-XML AMF document at `path`
pub fn write(model: &mut Model, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    debug!(path = %path.display(), "writing AMF");
    let file = BufWriter::new(File::create(path)?);
    let mut xml = Writer::new_with_indent(file, b' ', 2);
    write_document(model, &mut xml)?;
    xml.into_inner().flush()?;
    Ok(())
}

fn write_document<W: IoWrite>(model: &mut Model, xml: &mut Writer<W>) -> Result<()> {
    xml.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut amf = BytesStart::new("amf");
    amf.push_attribute(("unit", "millimeter"));
    xml.write_event(Event::Start(amf))?;

    for (name, value) in &model.metadata {
        write_metadata(xml, name, value)?;
    }

    for (id, material) in &model.materials {
        let mut elem = BytesStart::new("material");
        elem.push_attribute(("id", id.as_str()));
        xml.write_event(Event::Start(elem))?;
        for (name, value) in &material.attributes {
            write_metadata(xml, name, value)?;
        }
        xml.write_event(Event::End(BytesEnd::new("material")))?;
    }

    for index in 0..model.objects.len() {
        write_object(model, index, xml)?;
    }

    write_constellation(model, xml)?;

    xml.write_event(Event::End(BytesEnd::new("amf")))?;
    Ok(())
}

fn write_object<W: IoWrite>(model: &mut Model, index: usize, xml: &mut Writer<W>) -> Result<()> {
    let object = &mut model.objects[index];
    let origin = object.origin_translation;

    let mut elem = BytesStart::new("object");
    elem.push_attribute(("id", index.to_string().as_str()));
    xml.write_event(Event::Start(elem))?;

    if !object.name.is_empty() {
        let name = object.name.clone();
        write_metadata(xml, "name", &name)?;
    }

    xml.write_event(Event::Start(BytesStart::new("mesh")))?;
    xml.write_event(Event::Start(BytesStart::new("vertices")))?;

    // One vertex pool per object; remember each volume's slice of it.
    let mut volumes = Vec::with_capacity(object.volumes.len());
    let mut vertices_offset = 0;
    for volume in &mut object.volumes {
        let shared = volume.mesh.require_shared_vertices();
        for vertex in &shared.vertices {
            xml.write_event(Event::Start(BytesStart::new("vertex")))?;
            xml.write_event(Event::Start(BytesStart::new("coordinates")))?;
            write_text_element(xml, "x", &(vertex.x - origin.x).to_string())?;
            write_text_element(xml, "y", &(vertex.y - origin.y).to_string())?;
            write_text_element(xml, "z", &(vertex.z - origin.z).to_string())?;
            xml.write_event(Event::End(BytesEnd::new("coordinates")))?;
            xml.write_event(Event::End(BytesEnd::new("vertex")))?;
        }
        let facets: Vec<[usize; 3]> = shared
            .facets
            .iter()
            .map(|f| [f[0] + vertices_offset, f[1] + vertices_offset, f[2] + vertices_offset])
            .collect();
        vertices_offset += shared.vertices.len();
        volumes.push((facets, volume.material_id.clone()));
    }

    xml.write_event(Event::End(BytesEnd::new("vertices")))?;

    for (facets, material_id) in &volumes {
        let mut elem = BytesStart::new("volume");
        if !material_id.is_empty() {
            elem.push_attribute(("materialid", material_id.as_str()));
        }
        xml.write_event(Event::Start(elem))?;
        for facet in facets {
            xml.write_event(Event::Start(BytesStart::new("triangle")))?;
            write_text_element(xml, "v1", &facet[0].to_string())?;
            write_text_element(xml, "v2", &facet[1].to_string())?;
            write_text_element(xml, "v3", &facet[2].to_string())?;
            xml.write_event(Event::End(BytesEnd::new("triangle")))?;
        }
        xml.write_event(Event::End(BytesEnd::new("volume")))?;
    }

    xml.write_event(Event::End(BytesEnd::new("mesh")))?;
    xml.write_event(Event::End(BytesEnd::new("object")))?;
    Ok(())
}

fn write_constellation<W: IoWrite>(model: &Model, xml: &mut Writer<W>) -> Result<()> {
    if model.objects.iter().all(|o| o.instances.is_empty()) {
        return Ok(());
    }

    let mut elem = BytesStart::new("constellation");
    elem.push_attribute(("id", "1"));
    xml.write_event(Event::Start(elem))?;

    for (index, object) in model.objects.iter().enumerate() {
        let origin = object.origin_translation;
        for instance in &object.instances {
            let mut elem = BytesStart::new("instance");
            elem.push_attribute(("objectid", index.to_string().as_str()));
            xml.write_event(Event::Start(elem))?;
            write_text_element(xml, "deltax", &(instance.offset.x + origin.x).to_string())?;
            write_text_element(xml, "deltay", &(instance.offset.y + origin.y).to_string())?;
            write_text_element(xml, "rz", &instance.rotation.to_degrees().to_string())?;
            xml.write_event(Event::End(BytesEnd::new("instance")))?;
        }
    }

    xml.write_event(Event::End(BytesEnd::new("constellation")))?;
    Ok(())
}

fn write_metadata<W: IoWrite>(xml: &mut Writer<W>, name: &str, value: &str) -> Result<()> {
    let mut elem = BytesStart::new("metadata");
    elem.push_attribute(("name", name));
    xml.write_event(Event::Start(elem))?;
    xml.write_event(Event::Text(BytesText::new(value)))?;
    xml.write_event(Event::End(BytesEnd::new("metadata")))?;
    Ok(())
}

fn write_text_element<W: IoWrite>(xml: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    xml.write_event(Event::Start(BytesStart::new(name)))?;
    xml.write_event(Event::Text(BytesText::new(text)))?;
    xml.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}
