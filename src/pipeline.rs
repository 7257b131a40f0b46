//! End-to-end tile build: DEM + vector map in, finished TIN out.
//!
//! [`build_tile_mesh`] runs the stages in a fixed order:
//!
//! 1. Load finished neighbors' border files.
//! 2. Seed the four DEM corners.
//! 3. Collect map constraints and insert their endpoints.
//! 4. Reproduce each finished neighbor's edge exactly.
//! 5. Fill unmatched tile edges from the DEM.
//! 6. Sparsely sample water interiors.
//! 7. Greedy refinement: vertical error, then triangle size.
//! 8. Burn constraints, conform the mesh around them, classify terrain,
//!    compute normals.
//! 9. Cross-tile blending: rebase, spread, force seams, optimize.
//! 10. Write this tile's border file.
//!
//! Stage order matters. Border matching must precede refinement so matched
//! edges stay untouched, and constraint burning must wait until the vertex
//! set is final so constraint edges are never flipped away.

use std::path::PathBuf;

use log::{debug, info};

use crate::algo::blend::{border_stats, optimize_borders, spread_borders, BlendStats};
use crate::algo::border::{force_slave_edges, match_border, rebase_intrusions, MeshMatch};
use crate::algo::constrain::{
    burn_constraints, classify_terrain, conform_constraints, split_beached_water,
};
use crate::algo::march::{calc_mesh_error, terrain_histogram, MeshErrorStats};
use crate::algo::refine::{greedy_refine, RefineCriterion};
use crate::algo::select::{
    collect_constraints, copy_wet_points, insert_corners, insert_edge_points,
    EDGE_POINT_INTERVAL, LOW_RES_WATER_INTERVAL,
};
use crate::dem::{DemGrid, DemMask};
use crate::error::{Result, TinError};
use crate::io::border_file::{border_file_path, load_neighbor_borders, save_border_file};
use crate::map::VectorMap;
use crate::mesh::TileMesh;
use crate::terrain::TerrainTable;

/// Tuning knobs for the tile build.
#[derive(Debug, Clone)]
pub struct MeshPrefs {
    /// Hard cap on mesh vertices.
    pub max_points: usize,

    /// Maximum vertical deviation from the DEM, in meters.
    pub max_error: f64,

    /// Maximum triangle edge length, in meters.
    pub max_tri_size_m: f64,

    /// Distance at which texture consumers switch to a low-detail
    /// representation, in meters. Carried in the tile for renderers.
    pub rep_switch_m: f64,

    /// Whether to reproduce finished neighbors' edges exactly.
    pub border_match: bool,

    /// Whether to promote saturated borders after blending.
    pub optimize_borders: bool,

    /// Whether to split burned constraint segments that deviate too far
    /// from the DEM.
    pub split_constraints: bool,

    /// Whether to split zero-depth coastal water triangles after
    /// classification.
    pub split_beached_water: bool,
}

impl Default for MeshPrefs {
    fn default() -> Self {
        Self {
            max_points: 78_000,
            max_error: 5.0,
            max_tri_size_m: 1500.0,
            rep_switch_m: 50_000.0,
            border_match: true,
            optimize_borders: true,
            split_constraints: false,
            split_beached_water: true,
        }
    }
}

impl MeshPrefs {
    /// Set the vertex cap.
    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points;
        self
    }

    /// Set the vertical error tolerance in meters.
    pub fn with_max_error(mut self, max_error: f64) -> Self {
        self.max_error = max_error.max(0.0);
        self
    }

    /// Set the triangle size tolerance in meters.
    pub fn with_max_tri_size(mut self, meters: f64) -> Self {
        self.max_tri_size_m = meters.max(0.0);
        self
    }

    /// Build this tile as if it had no finished neighbors.
    pub fn standalone(mut self) -> Self {
        self.border_match = false;
        self
    }

    /// Split burned constraint segments against the DEM.
    pub fn splitting_constraints(mut self) -> Self {
        self.split_constraints = true;
        self
    }

    /// Leave zero-depth coastal water triangles alone.
    pub fn keep_beached_water(mut self) -> Self {
        self.split_beached_water = false;
        self
    }
}

/// Summary of a finished tile build.
#[derive(Debug, Clone, Default)]
pub struct TileBuildStats {
    /// Final vertex count.
    pub vertices: usize,
    /// Final inner face count.
    pub faces: usize,
    /// Fraction of DEM posts under water.
    pub wet_ratio: f64,
    /// Vertices added by the vertical-error pass.
    pub error_points: usize,
    /// Vertices added by the triangle-size pass.
    pub size_points: usize,
    /// Vertices added by the conforming pass along burned constraints.
    pub conform_points: usize,
    /// Mesh-vs-DEM height error over all posts.
    pub error: MeshErrorStats,
    /// Blend layer counts after spreading.
    pub blend: BlendStats,
}

/// Per-build state: the tile's integer degree coordinates, the border
/// directory, and the four neighbor edge records (west/south/east/north).
#[derive(Debug, Default)]
pub struct TileBuildContext {
    /// Neighbor edge records for the four sides.
    pub borders: [Option<MeshMatch>; 4],
    /// Southern integer latitude of the tile.
    pub south: i32,
    /// Western integer longitude of the tile.
    pub west: i32,
    /// Where border files live. `None` skips border I/O entirely.
    pub border_dir: Option<PathBuf>,
}

impl TileBuildContext {
    /// Context for a tile at the given integer degree coordinates, with no
    /// neighbor data and no border output.
    pub fn new(south: i32, west: i32) -> Self {
        Self {
            south,
            west,
            ..Default::default()
        }
    }

    /// Read and write border files under `dir`.
    pub fn with_border_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.border_dir = Some(dir.into());
        self
    }

    /// Load the facing edge sections of any finished neighbors.
    pub fn load_neighbors(mut self, terrains: &TerrainTable) -> Self {
        if let Some(dir) = &self.border_dir {
            self.borders = load_neighbor_borders(dir, self.south, self.west, terrains);
        }
        self
    }

    /// Write the finished tile's border file, if a directory was given.
    pub fn save_borders(&self, mesh: &TileMesh, terrains: &TerrainTable) -> Result<()> {
        if let Some(dir) = &self.border_dir {
            save_border_file(mesh, terrains, &border_file_path(dir, self.south, self.west))?;
        }
        Ok(())
    }
}

/// Build the TIN for one tile, reading neighbor borders from the context
/// and writing the tile's own border file back through it.
pub fn build_tile_mesh(
    map: &mut VectorMap,
    dem: &DemGrid,
    terrains: &TerrainTable,
    prefs: &MeshPrefs,
    ctx: &mut TileBuildContext,
) -> Result<(TileMesh, TileBuildStats)> {
    let borders = if prefs.border_match {
        std::mem::take(&mut ctx.borders)
    } else {
        Default::default()
    };
    let (mesh, stats) = build_tile_mesh_with_borders(map, dem, terrains, prefs, borders)?;
    ctx.save_borders(&mesh, terrains)?;
    Ok((mesh, stats))
}

/// Build the TIN for one tile with neighbor edge data supplied directly.
pub fn build_tile_mesh_with_borders(
    map: &mut VectorMap,
    dem: &DemGrid,
    terrains: &TerrainTable,
    prefs: &MeshPrefs,
    mut borders: [Option<MeshMatch>; 4],
) -> Result<(TileMesh, TileBuildStats)> {
    if prefs.max_points < 4 {
        return Err(TinError::invalid_param(
            "max_points",
            prefs.max_points,
            "a tile needs at least its four corners",
        ));
    }

    let mut mesh = TileMesh::new(dem.west, dem.south, dem.east, dem.north);
    let mut used = DemMask::new(dem.width(), dem.height());
    let mut stats = TileBuildStats::default();

    insert_corners(&mut mesh, dem, &mut used)?;
    let cons = collect_constraints(map, dem, &mut mesh)?;
    debug!("collected {} constraints", cons.len());

    let mut has_border = [false; 4];
    for (side, border) in borders.iter_mut().enumerate() {
        if let Some(b) = border {
            if !b.is_empty() {
                match_border(&mut mesh, b, side)?;
                has_border[side] = true;
            }
        }
    }
    info!(
        "matched {} neighbor edge(s)",
        has_border.iter().filter(|&&h| h).count()
    );

    insert_edge_points(&mut mesh, dem, &mut used, EDGE_POINT_INTERVAL, has_border)?;
    let wet_ratio = copy_wet_points(
        &mut mesh,
        dem,
        &mut used,
        LOW_RES_WATER_INTERVAL,
        map,
        terrains,
    )?;
    stats.wet_ratio = wet_ratio;

    // Water gets a sparse mesh, so spend the vertex budget mostly on land.
    let dry_ratio = 1.0 - wet_ratio;
    let error_budget = ((dry_ratio * 0.8 + 0.2) * prefs.max_points as f64) as usize;
    stats.error_points = greedy_refine(
        &mut mesh,
        dem,
        &mut used,
        RefineCriterion::VerticalError(prefs.max_error),
        error_budget,
    )?;
    stats.size_points = greedy_refine(
        &mut mesh,
        dem,
        &mut used,
        RefineCriterion::TriangleSize(prefs.max_tri_size_m),
        prefs.max_points,
    )?;
    info!(
        "refined: {} error points, {} size points, {} vertices total",
        stats.error_points,
        stats.size_points,
        mesh.num_vertices()
    );

    let split = prefs.split_constraints.then_some(prefs.max_error);
    burn_constraints(&mut mesh, dem, &cons, split)?;
    stats.conform_points = conform_constraints(&mut mesh, dem)?;

    mesh.rebuild_face_attrs();
    classify_terrain(&mut mesh, map, &cons, terrains, dem)?;
    if prefs.split_beached_water {
        split_beached_water(&mut mesh, map, &cons, terrains, dem)?;
    }
    mesh.calc_normals();

    rebase_intrusions(&mut mesh, &mut borders, terrains);
    stats.blend = spread_borders(&mut mesh, terrains);
    force_slave_edges(&mut mesh, &borders, terrains);
    if prefs.optimize_borders {
        stats.blend.optimized = optimize_borders(&mut mesh, terrains);
        debug!("promoted {} saturated borders", stats.blend.optimized);
    }
    border_stats(&mesh, terrains);

    stats.vertices = mesh.num_vertices();
    stats.faces = mesh.num_faces();
    stats.error = calc_mesh_error(&mesh, dem);
    let (hist, total) = terrain_histogram(&mesh);
    info!(
        "built tile: {} vertices, {} faces, {} terrain layer refs over {} faces",
        stats.vertices,
        stats.faces,
        hist.values().sum::<usize>(),
        total
    );
    for (layer, count) in &hist {
        debug!("  {}: {} face(s)", terrains.name(*layer), count);
    }
    Ok((mesh, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dem::NO_DATA;

    fn flat_dem(n: usize) -> DemGrid {
        DemGrid::filled(n, n, 0.0, 0.0, 1.0, 1.0, 100.0)
    }

    fn ramp_dem(n: usize) -> DemGrid {
        let mut dem = DemGrid::new(n, n, 0.0, 0.0, 1.0, 1.0);
        for y in 0..n {
            for x in 0..n {
                dem.set(x, y, x as f32 * 10.0);
            }
        }
        dem
    }

    #[test]
    fn test_flat_tile_builds_minimal_mesh() {
        let mut map = VectorMap::new();
        let dem = flat_dem(11);
        let terrains = TerrainTable::new();
        let prefs = MeshPrefs::default();

        let (mesh, stats) =
            build_tile_mesh_with_borders(&mut map, &dem, &terrains, &prefs, Default::default())
                .unwrap();
        // Flat terrain: corners, edge points, nothing from refinement.
        assert_eq!(stats.error_points, 0);
        assert!(mesh.num_vertices() >= 4);
        assert_eq!(stats.wet_ratio, 0.0);
        assert!(stats.error.max.abs() < 1e-6);
        for f in mesh.inner_faces() {
            assert_eq!(mesh.face_attr(f).terrain, terrains.natural());
        }
    }

    #[test]
    fn test_refinement_respects_budget() {
        let mut map = VectorMap::new();
        let dem = ramp_dem(21);
        let terrains = TerrainTable::new();
        let prefs = MeshPrefs::default().with_max_points(10).with_max_error(0.01);

        let (mesh, _) =
            build_tile_mesh_with_borders(&mut map, &dem, &terrains, &prefs, Default::default())
                .unwrap();
        // Corners and edge points don't count against the refinement budget,
        // but refinement itself must stop at it.
        assert!(mesh.num_vertices() <= 10 + 4 + 4 * 21);
    }

    #[test]
    fn test_boundary_sampling_interval() {
        let mut map = VectorMap::new();
        let dem = flat_dem(41);
        let terrains = TerrainTable::new();
        // A huge size tolerance keeps refinement out of the picture.
        let prefs = MeshPrefs::default().with_max_tri_size(1_000_000.0);

        let (mesh, _) =
            build_tile_mesh_with_borders(&mut map, &dem, &terrains, &prefs, Default::default())
                .unwrap();
        let mut west: Vec<f64> = mesh
            .vertices()
            .into_iter()
            .filter(|&v| mesh.position(v).x == 0.0)
            .map(|v| mesh.position(v).y)
            .collect();
        west.sort_by(|a, b| a.partial_cmp(b).unwrap());
        // 41 posts sampled every 20: both corners plus the midpoint row.
        assert_eq!(west, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_deterministic_build() {
        let terrains = TerrainTable::new();
        let dem = ramp_dem(15);
        let prefs = MeshPrefs::default().with_max_points(60);

        let run = || {
            let mut map = VectorMap::new();
            let (mesh, _) =
                build_tile_mesh_with_borders(&mut map, &dem, &terrains, &prefs, Default::default())
                    .unwrap();
            let mut pts: Vec<(u64, u64, u64)> = mesh
                .vertices()
                .iter()
                .map(|&v| {
                    let p = mesh.point3(v);
                    (p.x.to_bits(), p.y.to_bits(), p.z.to_bits())
                })
                .collect();
            pts.sort_unstable();
            pts
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_context_round_trip() {
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let terrains = TerrainTable::new();
        let prefs = MeshPrefs::default();

        let mut map = VectorMap::new();
        let dem = flat_dem(6);
        let mut ctx = TileBuildContext::new(0, 0)
            .with_border_dir(dir.path())
            .load_neighbors(&terrains);
        assert!(ctx.borders.iter().all(Option::is_none));
        let (_, _) = build_tile_mesh(&mut map, &dem, &terrains, &prefs, &mut ctx).unwrap();

        // The finished tile is now visible to its would-be right neighbor.
        let ctx2 = TileBuildContext::new(0, 1)
            .with_border_dir(dir.path())
            .load_neighbors(&terrains);
        assert!(ctx2.borders[0].is_some());
        assert!(ctx2.borders[2].is_none());
    }

    #[test]
    fn test_missing_corner_is_fatal() {
        let mut map = VectorMap::new();
        let mut dem = flat_dem(5);
        dem.set(0, 0, NO_DATA);
        let terrains = TerrainTable::new();
        let prefs = MeshPrefs::default();

        let err =
            build_tile_mesh_with_borders(&mut map, &dem, &terrains, &prefs, Default::default());
        assert!(err.is_err());
    }
}
