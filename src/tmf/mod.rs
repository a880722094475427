//! 3MF (3D Manufacturing Format) codec
//!
//! A 3MF file is a ZIP package following the Open Packaging Conventions:
//! a content-types manifest, a relationships part pointing at the start
//! part, and the model XML itself. On top of the core schema this codec
//! carries the materials extension (`m`) and a private `slic3r` namespace
//! for per-entity print configuration and volume boundaries.

mod opc;
mod reader;
mod writer;

pub use reader::read;
pub use writer::write;

/// Main 3D model part path within the package
pub const MODEL_PATH: &str = "3D/3dmodel.model";

/// Content types part path
pub const CONTENT_TYPES_PATH: &str = "[Content_Types].xml";

/// Package relationships part path
pub const RELS_PATH: &str = "_rels/.rels";

/// OPC content-types namespace
pub(crate) const CONTENT_TYPES_NAMESPACE: &str =
    "http://schemas.openxmlformats.org/package/2006/content-types";

/// OPC relationships namespace
pub(crate) const RELATIONSHIPS_NAMESPACE: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships";

/// 3MF core namespace
pub(crate) const CORE_NAMESPACE: &str =
    "http://schemas.microsoft.com/3dmanufacturing/core/2015/02";

/// 3MF materials extension namespace
pub(crate) const MATERIAL_NAMESPACE: &str =
    "http://schemas.microsoft.com/3dmanufacturing/material/2015/02";

/// Private namespace for print-configuration payloads
pub(crate) const SLIC3R_NAMESPACE: &str = "http://schemas.slic3r.org/3mf/2017/06";

/// Relationship type of the start part
pub(crate) const MODEL_REL_TYPE: &str =
    "http://schemas.microsoft.com/3dmanufacturing/2013/01/3dmodel";

/// Flush threshold for buffered package writes
pub(crate) const WRITE_BUFFER_CAPACITY: usize = 64 * 1024;
