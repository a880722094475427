//! Open Packaging Conventions plumbing for the 3MF container
//!
//! Writes the content-types and relationships parts, and locates the model
//! part of an opened package by following the start-part relationship
//! (falling back to the conventional `3D/3dmodel.model` path).

use std::io::{Read, Seek, Write};

use quick_xml::events::Event;
use quick_xml::Reader;
use urlencoding::decode;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use super::{
    CONTENT_TYPES_NAMESPACE, CONTENT_TYPES_PATH, MODEL_PATH, MODEL_REL_TYPE, RELATIONSHIPS_NAMESPACE,
    RELS_PATH,
};
use crate::error::{Error, Result};

/// Write the `[Content_Types].xml` entry
pub(super) fn write_content_types<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    options: SimpleFileOptions,
) -> Result<()> {
    let content = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Types xmlns="{}">
  <Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
  <Default Extension="model" ContentType="application/vnd.ms-package.3dmanufacturing-3dmodel+xml"/>
</Types>"#,
        CONTENT_TYPES_NAMESPACE
    );
    zip.start_file(CONTENT_TYPES_PATH, options)?;
    zip.write_all(content.as_bytes())?;
    Ok(())
}

/// Write the `_rels/.rels` entry establishing the start part
pub(super) fn write_relationships<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    options: SimpleFileOptions,
) -> Result<()> {
    let content = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="{}">
  <Relationship Id="rel0" Target="/{}" Type="{}"/>
</Relationships>"#,
        RELATIONSHIPS_NAMESPACE, MODEL_PATH, MODEL_REL_TYPE
    );
    zip.start_file(RELS_PATH, options)?;
    zip.write_all(content.as_bytes())?;
    Ok(())
}

/// Read the model part of an opened package into memory
///
/// The part is located through the start-part relationship in
/// `_rels/.rels`; packages without a usable relationship fall back to the
/// conventional path. A missing part is a [`Error::MissingEntry`].
pub(super) fn read_model_entry<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String> {
    let target = match read_entry(archive, RELS_PATH) {
        Ok(rels) => find_model_target(&rels)?.unwrap_or_else(|| MODEL_PATH.to_string()),
        Err(_) => MODEL_PATH.to_string(),
    };
    read_entry(archive, &target)
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<String> {
    let mut entry = archive
        .by_name(name)
        .map_err(|_| Error::MissingEntry(name.to_string()))?;
    let mut content = String::new();
    entry.read_to_string(&mut content)?;
    Ok(content)
}

/// Extract the start-part target from the relationships document
fn find_model_target(rels: &str) -> Result<Option<String>> {
    let mut reader = Reader::from_str(rels);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event()? {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if !name.ends_with("Relationship") {
                    continue;
                }
                let mut target = None;
                let mut rel_type = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr.unescape_value()?.into_owned();
                    match key.as_str() {
                        "Target" => target = Some(value),
                        "Type" => rel_type = Some(value),
                        _ => {}
                    }
                }
                if let (Some(target), Some(rel_type)) = (target, rel_type) {
                    if rel_type == MODEL_REL_TYPE {
                        let decoded = decode(&target)
                            .map_err(|e| Error::invalid(format!("bad relationship target: {}", e)))?;
                        return Ok(Some(decoded.trim_start_matches('/').to_string()));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(None)
}
