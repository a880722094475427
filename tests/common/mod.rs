//! Shared fixtures for integration tests

#![allow(dead_code)]

use nalgebra::Point3;
use printpack::TriangleMesh;

/// Facet corner indices of a cube built from 8 shared vertices
pub const CUBE_FACETS: [[usize; 3]; 12] = [
    [0, 2, 1],
    [0, 3, 2],
    [4, 5, 6],
    [4, 6, 7],
    [0, 1, 5],
    [0, 5, 4],
    [1, 2, 6],
    [1, 6, 5],
    [2, 3, 7],
    [2, 7, 6],
    [3, 0, 4],
    [3, 4, 7],
];

/// The 8 corners of an axis-aligned cube spanning [0, size]³
pub fn cube_vertices(size: f64) -> [Point3<f64>; 8] {
    let s = size;
    [
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(s, 0.0, 0.0),
        Point3::new(s, s, 0.0),
        Point3::new(0.0, s, 0.0),
        Point3::new(0.0, 0.0, s),
        Point3::new(s, 0.0, s),
        Point3::new(s, s, s),
        Point3::new(0.0, s, s),
    ]
}

/// An axis-aligned cube mesh spanning [0, size]³
pub fn cube_mesh(size: f64) -> TriangleMesh {
    TriangleMesh::from_indexed(&cube_vertices(size), &CUBE_FACETS).expect("cube indices are valid")
}

/// A small tetrahedron shifted along X, for multi-volume fixtures
pub fn tetrahedron(offset: f64) -> TriangleMesh {
    let v = [
        Point3::new(offset, 0.0, 0.0),
        Point3::new(offset + 1.0, 0.0, 0.0),
        Point3::new(offset, 1.0, 0.0),
        Point3::new(offset, 0.0, 1.0),
    ];
    TriangleMesh::from_indexed(&v, &[[0, 2, 1], [0, 1, 3], [1, 2, 3], [0, 3, 2]])
        .expect("tetrahedron indices are valid")
}

/// A plain-XML AMF document holding one cube object
pub fn cube_amf_xml(size: f64) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<amf unit=\"millimeter\">\n  <object id=\"0\">\n    <mesh>\n      <vertices>\n",
    );
    for vertex in cube_vertices(size) {
        xml.push_str(&format!(
            "        <vertex><coordinates><x>{}</x><y>{}</y><z>{}</z></coordinates></vertex>\n",
            vertex.x, vertex.y, vertex.z
        ));
    }
    xml.push_str("      </vertices>\n      <volume>\n");
    for facet in CUBE_FACETS {
        xml.push_str(&format!(
            "        <triangle><v1>{}</v1><v2>{}</v2><v3>{}</v3></triangle>\n",
            facet[0], facet[1], facet[2]
        ));
    }
    xml.push_str("      </volume>\n    </mesh>\n  </object>\n</amf>\n");
    xml
}
