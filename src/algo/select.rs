//! Start-point selection: the vertices every tile mesh begins with.
//!
//! These routines copy points of interest from a fully populated DEM into
//! the empty triangulation: the four corners, the endpoints of consolidated
//! burn boundaries, regularly spaced tile-edge rows, and a sparse grid
//! inside water bodies. Greedy refinement then takes over for dry land.

use log::{debug, info};

use crate::dem::{DemGrid, DemMask, NO_DATA};
use crate::error::{Result, TinError};
use crate::map::{MapFaceId, VectorMap};
use crate::mesh::TileMesh;
use crate::raster::PolyRasterizer;
use spade::handles::FixedVertexHandle;

/// Guaranteed sampling interval along the tile boundary, in DEM posts.
pub const EDGE_POINT_INTERVAL: usize = 20;

/// Sparse sampling interval for wet interiors, in DEM posts.
pub const LOW_RES_WATER_INTERVAL: usize = 40;

/// A boundary destined to become a constrained edge, with the map faces on
/// either side. Vertices are inserted up front so triangulation quality can
/// take advantage of them; the constraint itself is burned later.
#[derive(Debug, Clone, Copy)]
pub struct PendingConstraint {
    /// Inserted start vertex.
    pub a: FixedVertexHandle,
    /// Inserted end vertex.
    pub b: FixedVertexHandle,
    /// Map face on the left of a -> b.
    pub left: MapFaceId,
    /// Map face on the right of a -> b.
    pub right: MapFaceId,
}

/// Insert the four tile corners.
///
/// A corner with no elevation data is fatal: every downstream step assumes
/// the convex hull spans the full tile.
pub fn insert_corners(mesh: &mut TileMesh, dem: &DemGrid, used: &mut DemMask) -> Result<()> {
    let w = dem.width() - 1;
    let h = dem.height() - 1;
    for (x, y) in [(0, 0), (w, 0), (w, h), (0, h)] {
        if dem.get(x, y) == NO_DATA {
            return Err(TinError::MissingCorner { x, y });
        }
        mesh.insert_dem_point(dem, used, x, y)?;
    }
    Ok(())
}

/// Find every map boundary that needs burn-in, consolidate collinear runs,
/// and insert the run endpoints into the mesh.
///
/// Constraints are returned rather than burned immediately; adding them now
/// would pin the triangulation before refinement has placed its points.
pub fn collect_constraints(
    map: &mut VectorMap,
    dem: &DemGrid,
    mesh: &mut TileMesh,
) -> Result<Vec<PendingConstraint>> {
    map.clear_marks();
    let mut out = Vec::new();

    for he in map.half_edge_ids() {
        let twin = map.half_edge(he).twin;
        if map.half_edge(he).mark || map.half_edge(twin).mark {
            continue;
        }
        if !map.must_burn_edge(he) {
            continue;
        }
        // Walk forward from both directed copies so the consolidated run
        // spans the full collinear chain through this segment.
        let fwd_end = map.extend_burn_edge(he);
        let rev_end = map.extend_burn_edge(twin);

        let pa = map.position(map.half_edge(rev_end).target);
        let pb = map.position(map.half_edge(fwd_end).target);

        let v1 = mesh.insert_point(dem, pa.x, pa.y)?;
        let v2 = mesh.insert_point(dem, pb.x, pb.y)?;
        out.push(PendingConstraint {
            a: v1,
            b: v2,
            left: map.half_edge(he).face,
            right: map.half_edge(twin).face,
        });
    }

    info!("collected {} boundary constraints", out.len());
    Ok(out)
}

/// Add regularly spaced points along the four tile edges.
///
/// Edges with a persisted neighbor match skip insertion entirely (the
/// matched vertices arrive separately at exact coordinates) and instead have
/// their whole DEM row or column marked used so refinement never touches it.
/// `has_border` is indexed west, south, east, north.
pub fn insert_edge_points(
    mesh: &mut TileMesh,
    dem: &DemGrid,
    used: &mut DemMask,
    interval: usize,
    has_border: [bool; 4],
) -> Result<()> {
    let w = dem.width();
    let h = dem.height();
    let interval = interval.max(1);
    let [has_left, has_bottom, has_right, has_top] = has_border;

    if !has_left {
        for y in (0..h).step_by(interval) {
            mesh.insert_dem_point(dem, used, 0, y)?;
        }
    }
    if !has_right {
        for y in (0..h).step_by(interval) {
            mesh.insert_dem_point(dem, used, w - 1, y)?;
        }
    }
    if !has_bottom {
        for x in (0..w).step_by(interval) {
            mesh.insert_dem_point(dem, used, x, 0)?;
        }
    }
    if !has_top {
        for x in (0..w).step_by(interval) {
            mesh.insert_dem_point(dem, used, x, h - 1)?;
        }
    }

    for y in 0..h {
        if has_left {
            used.set(0, y, true);
        }
        if has_right {
            used.set(w - 1, y, true);
        }
    }
    for x in 0..w {
        if has_bottom {
            used.set(x, 0, true);
        }
        if has_top {
            used.set(x, h - 1, true);
        }
    }
    Ok(())
}

/// Feed every water-boundary segment of the map into a scanline rasterizer
/// aligned to the DEM grid.
pub fn setup_water_rasterizer(
    map: &VectorMap,
    dem: &DemGrid,
    terrains: &crate::terrain::TerrainTable,
) -> PolyRasterizer {
    let mut r = PolyRasterizer::new();
    for he in map.half_edge_ids() {
        let e = map.half_edge(he);
        // One half-edge per twin pair.
        if e.twin < he {
            continue;
        }
        let f1_wet = map.face(e.face).terrain == terrains.water();
        let f2_wet = map.face(map.half_edge(e.twin).face).terrain == terrains.water();
        if f1_wet == f2_wet {
            continue;
        }
        let p1 = map.position(e.source);
        let p2 = map.position(e.target);
        r.add_segment(
            dem.lon_to_x(p1.x),
            dem.lat_to_y(p1.y),
            dem.lon_to_x(p2.x),
            dem.lat_to_y(p2.y),
        );
    }
    r.seal();
    r
}

/// Insert every Nth DEM post inside water bodies.
///
/// Water interiors are flat enough that error-driven refinement would never
/// pick points there, leaving huge triangles that render badly. Returns the
/// fraction of the tile that is wet, which drives the refinement budget
/// split between land and water.
pub fn copy_wet_points(
    mesh: &mut TileMesh,
    dem: &DemGrid,
    used: &mut DemMask,
    skip: usize,
    map: &VectorMap,
    terrains: &crate::terrain::TerrainTable,
) -> Result<f64> {
    let mut rasterizer = setup_water_rasterizer(map, dem, terrains);
    let total = dem.width() * dem.height();
    let mut wet = 0usize;
    let skip = skip.max(1);

    let mut y = 0usize;
    rasterizer.start_scanline(y);
    while !rasterizer.done_scan() {
        for (x1, x2) in rasterizer.ranges() {
            let x1 = x1.max(0) as usize;
            let x2 = (x2.max(0) as usize).min(dem.width());
            for x in x1..x2 {
                if x % skip == 0 && y % skip == 0 && dem.get(x, y) != NO_DATA {
                    mesh.insert_dem_point(dem, used, x, y)?;
                }
                wet += 1;
            }
        }
        y += 1;
        if y >= dem.height() {
            break;
        }
        rasterizer.advance_scanline(y);
    }

    let ratio = wet as f64 / total as f64;
    debug!("wet interior: {wet}/{total} posts ({:.1}%)", ratio * 100.0);
    Ok(ratio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::UNBOUNDED_FACE;
    use crate::terrain::TerrainTable;
    use nalgebra::Point2;

    fn flat_dem(n: usize) -> DemGrid {
        DemGrid::filled(n, n, 0.0, 0.0, 1.0, 1.0, 50.0)
    }

    #[test]
    fn test_corners_inserted() {
        let dem = flat_dem(11);
        let mut used = DemMask::new(11, 11);
        let mut mesh = TileMesh::new(0.0, 0.0, 1.0, 1.0);
        insert_corners(&mut mesh, &dem, &mut used).unwrap();
        assert_eq!(mesh.num_vertices(), 4);
        assert!(used.get(0, 0) && used.get(10, 10));
    }

    #[test]
    fn test_missing_corner_is_fatal() {
        let mut dem = flat_dem(11);
        dem.set(0, 0, NO_DATA);
        let mut used = DemMask::new(11, 11);
        let mut mesh = TileMesh::new(0.0, 0.0, 1.0, 1.0);
        let err = insert_corners(&mut mesh, &dem, &mut used).unwrap_err();
        assert!(matches!(err, TinError::MissingCorner { x: 0, y: 0 }));
    }

    #[test]
    fn test_edge_points_skip_matched_sides() {
        let dem = flat_dem(11);
        let mut used = DemMask::new(11, 11);
        let mut mesh = TileMesh::new(0.0, 0.0, 1.0, 1.0);
        insert_corners(&mut mesh, &dem, &mut used).unwrap();
        // West edge has a neighbor match: no points there, but the column
        // must be marked used.
        insert_edge_points(&mut mesh, &dem, &mut used, 5, [true, false, false, false]).unwrap();
        for y in 0..11 {
            assert!(used.get(0, y));
        }
        for v in mesh.vertices() {
            let p = mesh.position(v);
            if p.x == 0.0 {
                // Only the two corners may sit on the west edge.
                assert!(p.y == 0.0 || p.y == 1.0);
            }
        }
    }

    #[test]
    fn test_consolidated_constraint_endpoints() {
        let terrains = TerrainTable::new();
        let mut map = VectorMap::new();
        let land = map.add_face(terrains.natural(), None);
        let water = map.add_face(terrains.water(), None);
        map.add_ring(
            &[
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 0.0),
                Point2::new(1.0, 1.0),
                Point2::new(0.0, 1.0),
            ],
            land,
            UNBOUNDED_FACE,
        );
        map.add_ring(
            &[
                Point2::new(0.2, 0.2),
                Point2::new(0.6, 0.2),
                Point2::new(0.6, 0.6),
                Point2::new(0.2, 0.6),
            ],
            water,
            land,
        );

        let dem = flat_dem(11);
        let mut used = DemMask::new(11, 11);
        let mut mesh = TileMesh::new(0.0, 0.0, 1.0, 1.0);
        insert_corners(&mut mesh, &dem, &mut used).unwrap();
        let cons = collect_constraints(&mut map, &dem, &mut mesh).unwrap();
        // Four sides of the water square, no consolidation possible.
        assert_eq!(cons.len(), 4);
        for c in &cons {
            assert!(c.left == water || c.right == water);
        }
    }

    #[test]
    fn test_wet_ratio_of_quadrant() {
        let terrains = TerrainTable::new();
        let mut map = VectorMap::new();
        let land = map.add_face(terrains.natural(), None);
        let water = map.add_face(terrains.water(), None);
        map.add_ring(
            &[
                Point2::new(0.0, 0.0),
                Point2::new(0.5, 0.0),
                Point2::new(0.5, 0.5),
                Point2::new(0.0, 0.5),
            ],
            water,
            land,
        );

        let dem = flat_dem(101);
        let mut used = DemMask::new(101, 101);
        let mut mesh = TileMesh::new(0.0, 0.0, 1.0, 1.0);
        insert_corners(&mut mesh, &dem, &mut used).unwrap();
        let ratio =
            copy_wet_points(&mut mesh, &dem, &mut used, 10, &map, &terrains).unwrap();
        assert!(ratio > 0.15 && ratio < 0.35, "ratio was {ratio}");
        assert!(mesh.num_vertices() > 4);
    }
}
