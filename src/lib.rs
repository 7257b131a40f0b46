//! # Terratin
//!
//! Terrain TIN generation for tiled scenery: turns a raster elevation grid
//! and a vector land-use map into a constrained Delaunay triangulation whose
//! edges line up exactly with already-built neighbor tiles.
//!
//! ## Features
//!
//! - **Adaptive refinement**: greedy insertion against a vertical-error
//!   tolerance, then a triangle-size tolerance, under a global vertex budget
//! - **Constraint burning**: land-use polygon boundaries become constrained
//!   mesh edges, then flood-fill classification assigns a terrain per face
//! - **Border matching**: a finished neighbor's edge vertices are reproduced
//!   exactly, and its blend layering is forced onto the seam
//! - **Cross-terrain blending**: border layers fade out over per-terrain
//!   transition distances, with slope-aware shortening
//! - **Mesh marching**: walk straight lines across the finished TIN for
//!   height queries along vectors
//!
//! ## Quick Start
//!
//! ```
//! use terratin::prelude::*;
//!
//! // A flat 1-degree tile with no land-use features.
//! let dem = DemGrid::filled(11, 11, 0.0, 0.0, 1.0, 1.0, 100.0);
//! let mut map = VectorMap::new();
//! let terrains = TerrainTable::new();
//!
//! let (mesh, stats) = build_tile_mesh_with_borders(
//!     &mut map,
//!     &dem,
//!     &terrains,
//!     &MeshPrefs::default(),
//!     Default::default(),
//! )
//! .unwrap();
//!
//! assert!(mesh.num_vertices() >= 4);
//! assert_eq!(stats.wet_ratio, 0.0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod algo;
pub mod dem;
pub mod error;
pub mod io;
pub mod map;
pub mod mesh;
pub mod pipeline;
pub mod raster;
pub mod terrain;

/// Prelude module for convenient imports.
///
/// This module re-exports the most commonly used types and functions:
///
/// ```
/// use terratin::prelude::*;
/// ```
pub mod prelude {
    pub use crate::dem::{DemGrid, DemMask, DEG_TO_MTR_LAT, NO_DATA};
    pub use crate::error::{Result, TinError};
    pub use crate::map::{MapFace, MapFaceId, VectorMap};
    pub use crate::mesh::TileMesh;
    pub use crate::pipeline::{
        build_tile_mesh, build_tile_mesh_with_borders, MeshPrefs, TileBuildContext,
        TileBuildStats,
    };
    pub use crate::terrain::{TerrainId, TerrainTable};
}

// Re-export the geometry crates for convenience
pub use nalgebra;
pub use spade;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_flat_tile() {
        let dem = DemGrid::filled(6, 6, 0.0, 0.0, 1.0, 1.0, 42.0);
        let mut map = VectorMap::new();
        let terrains = TerrainTable::new();

        let (mesh, stats) = build_tile_mesh_with_borders(
            &mut map,
            &dem,
            &terrains,
            &MeshPrefs::default(),
            Default::default(),
        )
        .unwrap();

        assert!(mesh.num_faces() > 0);
        assert_eq!(stats.vertices, mesh.num_vertices());
        for v in mesh.vertices() {
            assert_eq!(mesh.vertex_attr(v).height, 42.0);
        }
    }
}
