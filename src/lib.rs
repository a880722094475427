//! # printpack
//!
//! Read and write 3D-printing model packages in AMF and 3MF.
//!
//! Both formats translate to and from the same in-memory [`Model`] graph:
//! a model owns objects, an object owns triangle-mesh volumes and the
//! instances that place it on the build plate, and materials are shared
//! across objects through string ids. AMF is an XML document (optionally
//! wrapped in a single-entry deflate archive); 3MF is a ZIP package
//! following the Open Packaging Conventions.
//!
//! ## Example: reading a model
//!
//! ```no_run
//! use printpack::Model;
//!
//! # fn main() -> printpack::Result<()> {
//! let model = Model::read_from_file("part.3mf")?;
//! println!("model contains {} objects", model.objects.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Example: building and writing a model
//!
//! ```no_run
//! use nalgebra::Point3;
//! use printpack::{tmf, Model, TriangleMesh};
//!
//! # fn main() -> printpack::Result<()> {
//! let mut model = Model::new();
//! let object = model.add_object();
//! let mesh = TriangleMesh::from_indexed(
//!     &[
//!         Point3::new(0.0, 0.0, 0.0),
//!         Point3::new(10.0, 0.0, 0.0),
//!         Point3::new(0.0, 10.0, 0.0),
//!         Point3::new(0.0, 0.0, 10.0),
//!     ],
//!     &[[0, 2, 1], [0, 1, 3], [1, 2, 3], [0, 3, 2]],
//! )?;
//! object.add_volume(mesh);
//! model.add_default_instances();
//! tmf::write(&mut model, "part.3mf")?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod amf;
pub mod config;
pub mod error;
pub mod mesh;
pub mod model;
mod sax;
pub mod tmf;
pub mod transform;

pub use config::Config;
pub use error::{Error, Result};
pub use mesh::{Axis, BoundingBox2, BoundingBox3, SharedVertices, TriangleMesh};
pub use model::{Instance, LayerHeightRange, Material, Model, Object, Volume};

use std::path::Path;

impl Model {
    /// Read a model from `path`, dispatching on the file extension
    ///
    /// Supports `.amf` and `.3mf`. The imported objects get their
    /// `input_file` set to `path`; a document with no objects is an error.
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Model> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(std::ffi::OsStr::to_str)
            .unwrap_or_default()
            .to_ascii_lowercase();

        let mut model = Model::new();
        match extension.as_str() {
            "amf" => amf::read(path, &mut model)?,
            "3mf" => tmf::read(path, &mut model)?,
            other => {
                return Err(Error::invalid(format!(
                    "unsupported model file extension '{}'",
                    other
                )));
            }
        }

        if model.objects.is_empty() {
            return Err(Error::invalid("the file contains no printable objects"));
        }
        let input_file = path.to_string_lossy().into_owned();
        for object in &mut model.objects {
            object.input_file = input_file.clone();
        }
        Ok(model)
    }
}
