//! AMF (Additive Manufacturing Format) codec
//!
//! An AMF file is an XML document, optionally wrapped in a single-entry
//! deflate archive. The reader sniffs the archive magic, rejects archives
//! with more than one file entry, and tolerates directory entries around
//! the single document. The writer always emits plain XML.

mod reader;
mod writer;

pub use writer::write;

use std::io::{Cursor, Read};
use std::path::Path;

use tracing::debug;
use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::model::Model;

/// Local-file header magic of a deflate archive
const ARCHIVE_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

/// Read an AMF document at `path` into `model`
///
/// On error the model is unchanged unless parsing had already started, in
/// which case it holds a partial graph the caller must discard.
pub fn read(path: impl AsRef<Path>, model: &mut Model) -> Result<()> {
    let path = path.as_ref();
    debug!(path = %path.display(), "reading AMF");
    let bytes = std::fs::read(path)?;
    let xml = if bytes.starts_with(&ARCHIVE_MAGIC) {
        extract_single_entry(&bytes)?
    } else {
        String::from_utf8_lossy(&bytes).into_owned()
    };
    reader::parse(&xml, model)
}

/// Pull the one XML document out of a deflate-wrapped AMF file
///
/// Directory entries are irrelevant; any second file entry makes the
/// archive unsupported.
fn extract_single_entry(bytes: &[u8]) -> Result<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut document = None;
    let mut files = 0;
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        if !entry.is_dir() {
            files += 1;
            document = Some(index);
        }
    }
    if files != 1 {
        debug!(files, "rejecting multi-entry AMF archive");
        return Err(Error::MultiEntryArchive(files));
    }
    let index = document.ok_or(Error::MultiEntryArchive(0))?;
    let mut entry = archive.by_index(index)?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    Ok(xml)
}
