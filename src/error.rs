//! Error types for model package reading and writing

use std::io;
use thiserror::Error;

/// Result type for package operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing model packages
#[derive(Error, Debug)]
pub enum Error {
    /// IO error while reading or writing a file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// ZIP archive error
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// XML parsing or writing error
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// XML attribute error
    #[error("XML attribute error: {0}")]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),

    /// Malformed floating-point text
    #[error("invalid number: {0}")]
    ParseFloat(#[from] std::num::ParseFloatError),

    /// Malformed integer text
    #[error("invalid integer: {0}")]
    ParseInt(#[from] std::num::ParseIntError),

    /// An AMF archive wrapped more than one file entry
    #[error("archive contains {0} file entries, expected exactly one")]
    MultiEntryArchive(usize),

    /// A required entry is missing from the package
    #[error("missing required package entry '{0}'")]
    MissingEntry(String),

    /// A required XML attribute is missing
    #[error("missing required attribute '{attribute}' on <{element}>")]
    MissingAttribute {
        /// Element the attribute belongs to
        element: &'static str,
        /// Name of the missing attribute
        attribute: &'static str,
    },

    /// The document structure does not match the expected schema
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// An affine transform attribute had the wrong number of components
    #[error("transform has {0} components, expected 12")]
    BadTransform(usize),

    /// A referenced object id is not defined in the document
    #[error("object id '{0}' is not defined")]
    UnknownObjectId(String),

    /// A facet references a vertex outside the vertex table
    #[error("facet index {index} out of range for {vertices} vertices")]
    FacetIndexOutOfRange {
        /// Offending facet corner index
        index: usize,
        /// Number of vertices available
        vertices: usize,
    },

    /// The document declares a unit this implementation does not handle
    #[error("unsupported unit '{0}'")]
    UnsupportedUnit(String),

    /// The requested placements do not fit inside the given bounds
    #[error("cannot arrange {parts} parts within the given bounds")]
    ArrangeFailed {
        /// Number of parts that were to be placed
        parts: usize,
    },
}

impl Error {
    /// Shorthand for a structural failure with a formatted message
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidDocument(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = Error::MissingAttribute {
            element: "vertex",
            attribute: "x",
        };
        assert_eq!(err.to_string(), "missing required attribute 'x' on <vertex>");

        let err = Error::MultiEntryArchive(3);
        assert!(err.to_string().contains("3 file entries"));
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
