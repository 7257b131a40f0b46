//! Core tile-mesh data structures.
//!
//! The primary type is [`TileMesh`], a constrained Delaunay triangulation of
//! one tile's terrain together with the per-vertex and per-face attribute
//! tables the classification and blending passes operate on.
//!
//! The triangulation kernel is `spade`'s incremental
//! `ConstrainedDelaunayTriangulation`; terratin owns every terrain-related
//! attribute in side tables keyed by spade's handles. Vertex handles are
//! stable for the life of the triangulation, so the vertex table grows as
//! points are inserted; face slots are only meaningful once topology is
//! final, so the face table is (re)built explicitly via
//! [`TileMesh::rebuild_face_attrs`] after the last insertion.

mod attrs;
mod tile;

pub use attrs::{FaceAttrs, VertexAttrs};
pub use tile::{Cdt, FaceEdge, TileMesh};
