//! Mesh queries: point heights, straight-line marching, and error metrics.
//!
//! Heights come from the containing triangle's supporting plane. Marching
//! walks the straight line between two points face by face, emitting a 3-D
//! point at every triangle boundary crossing; a walk that cannot proceed
//! (start outside the hull, or a stale cached face) re-seeds itself by
//! locating the goal and walking backward, never by recursing.

use std::collections::BTreeMap;

use log::{info, warn};
use nalgebra::Point3;
use spade::handles::{FixedFaceHandle, FixedVertexHandle, InnerTag};
use spade::{Point2, PositionInTriangulation, Triangulation};

use crate::dem::{DemGrid, NO_DATA};
use crate::error::{Result, TinError};
use crate::mesh::TileMesh;
use crate::terrain::TerrainId;

#[inline]
fn orient(a: Point2<f64>, b: Point2<f64>, c: Point2<f64>) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn face_contains(mesh: &TileMesh, f: FixedFaceHandle<InnerTag>, p: Point2<f64>) -> bool {
    let [a, b, c] = mesh.face_vertices(f);
    let (pa, pb, pc) = (mesh.position(a), mesh.position(b), mesh.position(c));
    orient(pa, pb, p) >= 0.0 && orient(pb, pc, p) >= 0.0 && orient(pc, pa, p) >= 0.0
}

/// Resolve a locate result to a finite face, if the point is on the mesh.
fn locate_inner(mesh: &TileMesh, p: Point2<f64>) -> Option<FixedFaceHandle<InnerTag>> {
    match mesh.locate(p.x, p.y) {
        PositionInTriangulation::OnFace(f) => Some(f),
        PositionInTriangulation::OnVertex(v) => {
            mesh.incident_faces(v).into_iter().next()
        }
        PositionInTriangulation::OnEdge(e) => {
            let de = mesh.cdt().directed_edge(e);
            de.face()
                .as_inner()
                .or_else(|| de.rev().face().as_inner())
                .map(|f| f.fix())
        }
        PositionInTriangulation::OutsideOfConvexHull(_)
        | PositionInTriangulation::NoTriangulation => None,
    }
}

/// Height of the mesh at a point, or `NO_DATA` off the mesh.
///
/// On a vertex the stored height is returned exactly; anywhere else the
/// containing triangle's plane is evaluated.
pub fn height_at(mesh: &TileMesh, lon: f64, lat: f64) -> f64 {
    if mesh.num_faces() < 1 {
        return NO_DATA as f64;
    }
    match mesh.locate(lon, lat) {
        PositionInTriangulation::OnVertex(v) => mesh.vertex_attr(v).height,
        PositionInTriangulation::OnEdge(e) => {
            let de = mesh.cdt().directed_edge(e);
            match de
                .face()
                .as_inner()
                .or_else(|| de.rev().face().as_inner())
            {
                Some(f) => mesh.height_in_face(f.fix(), lon, lat),
                None => NO_DATA as f64,
            }
        }
        PositionInTriangulation::OnFace(f) => mesh.height_in_face(f, lon, lat),
        PositionInTriangulation::OutsideOfConvexHull(_)
        | PositionInTriangulation::NoTriangulation => {
            warn!("requested point was off mesh: {lon}, {lat}");
            NO_DATA as f64
        }
    }
}

/// Cached position for repeated marching queries.
///
/// Re-seedable: a context whose point fell outside the hull simply holds no
/// face, and the next march relocates from the goal side.
#[derive(Debug, Clone, Copy)]
pub struct MarchContext {
    /// Face containing the cached point, when the point is on the mesh.
    pub face: Option<FixedFaceHandle<InnerTag>>,
    /// Cached position.
    pub pt: Point2<f64>,
    /// Mesh height at the cached position.
    pub height: f64,
}

/// Start a march at the given point.
pub fn march_start(mesh: &TileMesh, lon: f64, lat: f64) -> MarchContext {
    let p = Point2::new(lon, lat);
    match locate_inner(mesh, p) {
        Some(f) => MarchContext {
            face: Some(f),
            pt: p,
            height: mesh.height_in_face(f, lon, lat),
        },
        None => MarchContext {
            face: None,
            pt: p,
            height: NO_DATA as f64,
        },
    }
}

/// Pivot at a vertex the ray passes exactly through: find the incident face
/// whose wedge at `v` contains the direction to `goal`.
fn pivot_face(
    mesh: &TileMesh,
    v: FixedVertexHandle,
    goal: Point2<f64>,
) -> Option<FixedFaceHandle<InnerTag>> {
    let pv = mesh.position(v);
    for f in mesh.incident_faces(v) {
        let [a, b, c] = mesh.face_vertices(f);
        let i = [a, b, c].iter().position(|&h| h == v)?;
        let v_ccw = [a, b, c][(i + 1) % 3];
        let v_cw = [a, b, c][(i + 2) % 3];
        if orient(pv, mesh.position(v_cw), goal) > 0.0 {
            continue;
        }
        if orient(pv, mesh.position(v_ccw), goal) < 0.0 {
            continue;
        }
        return Some(f);
    }
    None
}

/// One straight-line walk. Emits the start point, every boundary crossing,
/// and (on success) the goal. `stop_at_hull` turns running off the convex
/// hull into successful termination at the hull crossing instead of a
/// failed walk; `Ok(None)` means the walk could not reach the goal and the
/// caller should re-seed.
fn walk(
    mesh: &TileMesh,
    start_face: FixedFaceHandle<InnerTag>,
    start: Point2<f64>,
    goal: Point2<f64>,
    stop_at_hull: bool,
) -> Result<Option<(Vec<Point3<f64>>, FixedFaceHandle<InnerTag>, Point2<f64>, f64)>> {
    let mut out = vec![Point3::new(
        start.x,
        start.y,
        mesh.height_in_face(start_face, start.x, start.y),
    )];
    let mut cur = start_face;
    let mut came_from: Option<FixedFaceHandle<InnerTag>> = None;

    // Every iteration crosses one edge or pivots one vertex.
    let limit = mesh.num_faces() * 3 + 16;
    for _ in 0..limit {
        if face_contains(mesh, cur, goal) {
            let h = mesh.height_in_face(cur, goal.x, goal.y);
            out.push(Point3::new(goal.x, goal.y, h));
            return Ok(Some((out, cur, goal, h)));
        }

        let mut advanced = false;
        for edge in mesh.face_edges(cur) {
            if edge.neighbor.is_some() && edge.neighbor == came_from {
                continue;
            }
            let p = mesh.position(edge.from);
            let q = mesh.position(edge.to);
            // Goal strictly beyond this edge, and the ray crossing it.
            if orient(p, q, goal) >= 0.0 {
                continue;
            }
            // Crossing the CCW edge outward means leaving `from` on the
            // right of the ray and `to` on the left.
            let o1 = orient(start, goal, p);
            let o2 = orient(start, goal, q);
            if o1 > 0.0 || o2 < 0.0 || (o1 == 0.0 && o2 == 0.0) {
                continue;
            }

            if o1 == 0.0 || o2 == 0.0 {
                // The ray passes exactly through a shared vertex.
                let v = if o1 == 0.0 { edge.from } else { edge.to };
                let pv = mesh.position(v);
                if pv.x == start.x && pv.y == start.y {
                    // The ray origin itself; not a crossing.
                    continue;
                }
                out.push(Point3::new(pv.x, pv.y, mesh.vertex_attr(v).height));
                match pivot_face(mesh, v, goal) {
                    Some(f) => {
                        came_from = Some(cur);
                        cur = f;
                        advanced = true;
                    }
                    None if stop_at_hull => {
                        let h = mesh.vertex_attr(v).height;
                        return Ok(Some((out, cur, pv, h)));
                    }
                    None => return Ok(None),
                }
                break;
            }

            // Proper crossing: intersect the ray with the edge.
            let denom = (goal.x - start.x) * (q.y - p.y) - (goal.y - start.y) * (q.x - p.x);
            if denom == 0.0 {
                return Err(TinError::MarchIntersection);
            }
            let t = ((p.x - start.x) * (q.y - p.y) - (p.y - start.y) * (q.x - p.x)) / denom;
            let ix = start.x + t * (goal.x - start.x);
            let iy = start.y + t * (goal.y - start.y);
            out.push(Point3::new(ix, iy, mesh.height_in_face(cur, ix, iy)));

            match edge.neighbor {
                Some(nb) => {
                    came_from = Some(cur);
                    cur = nb;
                    advanced = true;
                }
                None if stop_at_hull => {
                    let h = mesh.height_in_face(cur, ix, iy);
                    return Ok(Some((out, cur, Point2::new(ix, iy), h)));
                }
                None => return Ok(None),
            }
            break;
        }

        if !advanced {
            // A walk seeded exactly on a vertex can land in the wrong wedge
            // around it; pivot into the wedge the ray actually enters.
            let mut pivoted = false;
            for v in mesh.face_vertices(cur) {
                let pv = mesh.position(v);
                if pv.x == start.x && pv.y == start.y {
                    if let Some(f) = pivot_face(mesh, v, goal) {
                        if f != cur {
                            came_from = Some(cur);
                            cur = f;
                            pivoted = true;
                        }
                    }
                    break;
                }
            }
            if !pivoted {
                return Ok(None);
            }
        }
    }
    Err(TinError::MarchIntersection)
}

/// March from the context's cached position to the goal.
///
/// On success the returned points run from the cached position to the goal
/// inclusive, one per triangle boundary crossed, and the context is updated
/// to the goal. A failed forward walk (stale cache, start off the hull)
/// re-seeds by locating the goal and walking backward, then reverses the
/// output; with both endpoints off the mesh the result is empty and the
/// context keeps a bare goal position.
pub fn march_to(
    mesh: &TileMesh,
    ctx: &mut MarchContext,
    goal_lon: f64,
    goal_lat: f64,
) -> Result<Vec<Point3<f64>>> {
    let goal = Point2::new(goal_lon, goal_lat);

    if let Some(face) = ctx.face {
        if let Some((pts, end_face, end_pt, end_h)) = walk(mesh, face, ctx.pt, goal, false)? {
            ctx.face = Some(end_face);
            ctx.pt = end_pt;
            ctx.height = end_h;
            return Ok(pts);
        }
    }

    // Re-seed from the goal side and walk backward.
    let Some(goal_face) = locate_inner(mesh, goal) else {
        warn!("march goal off mesh: {goal_lon}, {goal_lat}");
        ctx.face = None;
        ctx.pt = goal;
        ctx.height = NO_DATA as f64;
        return Ok(Vec::new());
    };
    let back = walk(mesh, goal_face, goal, ctx.pt, true)?;
    let Some((mut pts, _, _, _)) = back else {
        return Err(TinError::MarchIntersection);
    };
    pts.reverse();

    ctx.face = Some(goal_face);
    ctx.pt = goal;
    ctx.height = mesh.height_in_face(goal_face, goal.x, goal.y);
    Ok(pts)
}

/// Aggregate deviation between the mesh and the DEM it was built from.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshErrorStats {
    /// Samples measured.
    pub count: usize,
    /// Smallest signed deviation in meters.
    pub min: f64,
    /// Largest signed deviation in meters.
    pub max: f64,
    /// Mean signed deviation.
    pub mean: f64,
    /// Standard deviation of the signed deviation.
    pub std_dev: f64,
    /// Worst positive deviation and where it occurred.
    pub worst_pos: (f64, f64, f64),
    /// Worst negative deviation and where it occurred.
    pub worst_neg: (f64, f64, f64),
}

/// Measure the mesh against every DEM post.
///
/// The deviation is mesh height minus DEM elevation at the post. Locates
/// are cached against the previous post: as long as the next post stays in
/// the same triangle, no point location runs at all, which is the common
/// case when scanning row by row.
pub fn calc_mesh_error(mesh: &TileMesh, dem: &DemGrid) -> MeshErrorStats {
    let mut stats = MeshErrorStats {
        min: f64::MAX,
        max: f64::MIN,
        ..Default::default()
    };
    if mesh.num_faces() < 1 {
        stats.min = 0.0;
        stats.max = 0.0;
        return stats;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut last: Option<FixedFaceHandle<InnerTag>> = None;

    for y in 0..dem.height() {
        for x in 0..dem.width() {
            let ideal = dem.get(x, y);
            if ideal == NO_DATA {
                continue;
            }
            let p = Point2::new(dem.x_to_lon(x as f64), dem.y_to_lat(y as f64));

            if !last.map_or(false, |f| face_contains(mesh, f, p)) {
                last = locate_inner(mesh, p);
            }
            let Some(f) = last else { continue };

            let derr = mesh.height_in_face(f, p.x, p.y) - ideal as f64;
            if derr > stats.worst_pos.0 {
                stats.worst_pos = (derr, p.x, p.y);
            }
            if derr < stats.worst_neg.0 {
                stats.worst_neg = (derr, p.x, p.y);
            }
            stats.min = stats.min.min(derr);
            stats.max = stats.max.max(derr);
            sum += derr;
            sum_sq += derr * derr;
            stats.count += 1;
        }
    }

    if stats.count > 0 {
        stats.mean = sum / stats.count as f64;
        stats.std_dev = (sum_sq / stats.count as f64).sqrt();
    } else {
        stats.min = 0.0;
        stats.max = 0.0;
    }
    if stats.worst_pos.0 > 0.0 {
        info!(
            "worst positive error is {:.3} m at {:+.6}, {:+.7}",
            stats.worst_pos.0, stats.worst_pos.1, stats.worst_pos.2
        );
    }
    if stats.worst_neg.0 < 0.0 {
        info!(
            "worst negative error is {:.3} m at {:+.6}, {:+.7}",
            stats.worst_neg.0, stats.worst_neg.1, stats.worst_neg.2
        );
    }
    stats
}

/// Count how many faces reference each terrain, as base or border layer.
/// Returns the histogram and the total number of layer references.
pub fn terrain_histogram(mesh: &TileMesh) -> (BTreeMap<TerrainId, usize>, usize) {
    let mut hist: BTreeMap<TerrainId, usize> = BTreeMap::new();
    let mut total = 0usize;
    for f in mesh.inner_faces() {
        let fa = mesh.face_attr(f);
        *hist.entry(fa.terrain).or_default() += 1;
        for &b in &fa.border {
            *hist.entry(b).or_default() += 1;
        }
        total += 1 + fa.border.len();
    }
    (hist, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_mesh() -> TileMesh {
        let mut m = TileMesh::new(0.0, 0.0, 1.0, 1.0);
        for y in 0..=4 {
            for x in 0..=4 {
                let lon = x as f64 / 4.0;
                let lat = y as f64 / 4.0;
                m.insert_raw(lon, lat, 100.0 + lon * 40.0).unwrap();
            }
        }
        m
    }

    #[test]
    fn test_height_on_vertex_is_exact() {
        let m = grid_mesh();
        assert_eq!(height_at(&m, 0.25, 0.5), 110.0);
    }

    #[test]
    fn test_height_interpolates_plane() {
        let m = grid_mesh();
        // Height varies linearly with longitude everywhere.
        let h = height_at(&m, 0.3, 0.37);
        assert!((h - 112.0).abs() < 1e-6, "got {h}");
    }

    #[test]
    fn test_height_off_mesh_is_no_data() {
        let m = grid_mesh();
        assert_eq!(height_at(&m, 2.0, 2.0), NO_DATA as f64);
    }

    #[test]
    fn test_march_crosses_faces_in_order() {
        let m = grid_mesh();
        let mut ctx = march_start(&m, 0.05, 0.45);
        let pts = march_to(&m, &mut ctx, 0.95, 0.45).unwrap();

        assert!(pts.len() > 2, "a cross-tile march must cross many faces");
        assert_eq!(pts[0].x, 0.05);
        let last = pts.last().unwrap();
        assert_eq!(last.x, 0.95);
        assert!((last.z - (100.0 + 0.95 * 40.0)).abs() < 1e-6);
        for w in pts.windows(2) {
            assert!(w[1].x >= w[0].x - 1e-12, "x must be monotone: {pts:?}");
        }
        // Context is re-usable from the goal.
        assert_eq!(ctx.pt.x, 0.95);
        assert!(ctx.face.is_some());
    }

    #[test]
    fn test_march_through_grid_vertex() {
        let m = grid_mesh();
        // This line passes exactly through interior grid vertices.
        let mut ctx = march_start(&m, 0.0, 0.5);
        let pts = march_to(&m, &mut ctx, 1.0, 0.5).unwrap();
        let on_vertex = pts
            .iter()
            .any(|p| (p.x - 0.5).abs() < 1e-12 && (p.y - 0.5).abs() < 1e-12);
        assert!(on_vertex, "vertex on the line must be emitted: {pts:?}");
        assert_eq!(pts.last().unwrap().x, 1.0);
    }

    #[test]
    fn test_march_reseeds_from_outside_hull() {
        let m = grid_mesh();
        let mut ctx = march_start(&m, -0.5, 0.45);
        assert!(ctx.face.is_none());
        let pts = march_to(&m, &mut ctx, 0.6, 0.45).unwrap();
        assert!(!pts.is_empty());
        let last = pts.last().unwrap();
        assert_eq!((last.x, last.y), (0.6, 0.45));
        assert!((last.z - (100.0 + 0.6 * 40.0)).abs() < 1e-6);
        for w in pts.windows(2) {
            assert!(w[1].x >= w[0].x - 1e-12, "ordered toward goal: {pts:?}");
        }
    }

    #[test]
    fn test_error_stats_flat() {
        let dem = DemGrid::filled(5, 5, 0.0, 0.0, 1.0, 1.0, 100.0);
        let mut m = TileMesh::new(0.0, 0.0, 1.0, 1.0);
        m.insert_raw(0.0, 0.0, 100.0).unwrap();
        m.insert_raw(1.0, 0.0, 100.0).unwrap();
        m.insert_raw(1.0, 1.0, 100.0).unwrap();
        m.insert_raw(0.0, 1.0, 100.0).unwrap();
        let stats = calc_mesh_error(&m, &dem);
        assert_eq!(stats.count, 25);
        assert!(stats.min.abs() < 1e-9);
        assert!(stats.max.abs() < 1e-9);
        assert!(stats.mean.abs() < 1e-9);
    }

    #[test]
    fn test_terrain_histogram_counts_borders() {
        let mut m = TileMesh::new(0.0, 0.0, 1.0, 1.0);
        m.insert_raw(0.0, 0.0, 0.0).unwrap();
        m.insert_raw(1.0, 0.0, 0.0).unwrap();
        m.insert_raw(0.5, 1.0, 0.0).unwrap();
        m.rebuild_face_attrs();
        let f = m.inner_faces()[0];
        let base = TerrainId::INVALID;
        m.face_attr_mut(f).terrain = base;
        let (hist, total) = terrain_histogram(&m);
        assert_eq!(total, 1);
        assert_eq!(hist.get(&base), Some(&1));
    }
}
