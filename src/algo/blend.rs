//! Border blend computation and optimization.
//!
//! Every non-water face spreads its terrain outward over strictly
//! lower-priority neighbors, fading with distance. The result is, per
//! vertex, an independent [0,1] attenuation for each intruding terrain;
//! blend weights are not a partition and never need to sum to one.

use std::collections::BTreeSet;

use log::{info, warn};
use spade::handles::{FixedFaceHandle, FixedVertexHandle, InnerTag};

use crate::dem::{deg_to_mtr_lon, DEG_TO_MTR_LAT};
use crate::mesh::TileMesh;
use crate::terrain::{TerrainId, TerrainTable};

fn point_segment_sq_dist(px: f64, py: f64, ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    let abx = bx - ax;
    let aby = by - ay;
    let apx = px - ax;
    let apy = py - ay;
    let len_sq = abx * abx + aby * aby;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        ((apx * abx + apy * aby) / len_sq).clamp(0.0, 1.0)
    };
    let cx = ax + t * abx - px;
    let cy = ay + t * aby - py;
    cx * cx + cy * cy
}

/// Distance in meters from a vertex to the closest point on a face's
/// perimeter. The vertex is assumed to lie outside the face, which holds
/// for any vertex of a different triangle in a valid triangulation.
pub fn dist_vertex_to_face(
    mesh: &TileMesh,
    v: FixedVertexHandle,
    f: FixedFaceHandle<InnerTag>,
) -> f64 {
    let vp = mesh.position(v);
    let lon_scale = deg_to_mtr_lon(vp.y);
    let px = vp.x * lon_scale;
    let py = vp.y * DEG_TO_MTR_LAT;

    let [a, b, c] = mesh.face_vertices(f);
    let pts: Vec<(f64, f64)> = [a, b, c]
        .iter()
        .map(|&h| {
            let p = mesh.position(h);
            (p.x * lon_scale, p.y * DEG_TO_MTR_LAT)
        })
        .collect();

    let d1 = point_segment_sq_dist(px, py, pts[0].0, pts[0].1, pts[1].0, pts[1].1);
    let d2 = point_segment_sq_dist(px, py, pts[1].0, pts[1].1, pts[2].0, pts[2].1);
    let d3 = point_segment_sq_dist(px, py, pts[2].0, pts[2].1, pts[0].0, pts[0].1);
    d1.min(d2).min(d3).sqrt()
}

/// Counters reported by the blend passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlendStats {
    /// Non-water faces.
    pub total: usize,
    /// Total border layers across all faces.
    pub borders: usize,
    /// Candidate faces whose fade was evaluated.
    pub checked: usize,
    /// Border layers removed by optimization.
    pub optimized: usize,
}

/// Spread every non-water face's terrain over lower-priority neighbors,
/// recording per-vertex fades.
///
/// For each source face, a breadth-first flood visits faces of strictly
/// lower terrain priority. A visited face's vertex fades are derived from
/// the meter distance back to the source face, clamped through the pair's
/// maximum transition distance; the flood continues only while some vertex
/// fade still increases, so ground already covered by a closer source is
/// not re-walked. An epoch counter per source face replaces clearing a
/// visited set between floods.
pub fn spread_borders(mesh: &mut TileMesh, terrains: &TerrainTable) -> BlendStats {
    let mut stats = BlendStats::default();
    let water = terrains.water();

    for tri in mesh.inner_faces() {
        if mesh.face_attr(tri).terrain == water {
            continue;
        }
        let epoch = mesh.bump_epoch();
        let layer = mesh.face_attr(tri).terrain;
        mesh.face_attr_mut(tri).flag = epoch;

        let mut to_visit: BTreeSet<FixedFaceHandle<InnerTag>> = BTreeSet::new();
        to_visit.insert(tri);

        while let Some(&border) = to_visit.iter().next() {
            to_visit.remove(&border);
            let mut spread = false;

            if border != tri {
                let [v1, v2, v3] = mesh.face_vertices(border);
                let dist_max = terrains.transition_dist(
                    layer,
                    mesh.face_attr(border).terrain,
                    mesh.face_attr(border).normal.z,
                );
                if dist_max > 0.0 {
                    let fade = |d: f64| ((dist_max - d) / dist_max).clamp(0.0, 1.0);
                    let mut dist1 = fade(dist_vertex_to_face(mesh, v1, tri));
                    let mut dist2 = fade(dist_vertex_to_face(mesh, v2, tri));
                    let mut dist3 = fade(dist_vertex_to_face(mesh, v3, tri));

                    stats.checked += 1;
                    if dist1 > 0.0 || dist2 > 0.0 || dist3 > 0.0 {
                        // Only fade a vertex whose far side has another face
                        // carrying this layer, or the gradient would run off
                        // into terrain that can't continue it.
                        let mut has = [false; 3];
                        for edge in mesh.face_edges(border) {
                            let Some(nb) = edge.neighbor else { continue };
                            let na = mesh.face_attr(nb);
                            if na.terrain == layer || na.border.contains(&layer) {
                                for (i, &v) in [v1, v2, v3].iter().enumerate() {
                                    if v == edge.from || v == edge.to {
                                        has[i] = true;
                                    }
                                }
                            }
                        }
                        if !has[0] {
                            dist1 = 0.0;
                        }
                        if !has[1] {
                            dist2 = 0.0;
                        }
                        if !has[2] {
                            dist3 = 0.0;
                        }

                        // Record only increases; anything else means a closer
                        // source already owns this territory.
                        for (&v, d) in [v1, v2, v3].iter().zip([dist1, dist2, dist3]) {
                            if d > mesh.vertex_attr(v).blend(layer) as f64 {
                                spread = true;
                                mesh.vertex_attr_mut(v)
                                    .border_blend
                                    .insert(layer, d as f32);
                            }
                        }

                        // Always register the layer and keep spreading, even
                        // with no increase; dropping this reintroduces seams
                        // between adjacent floods.
                        debug_assert!(layer.is_valid());
                        mesh.face_attr_mut(border).border.insert(layer);
                        spread = true;
                    }
                }
            } else {
                spread = true;
            }

            mesh.face_attr_mut(border).flag = epoch;

            if spread {
                for edge in mesh.face_edges(border) {
                    let Some(nb) = edge.neighbor else { continue };
                    let na = mesh.face_attr(nb);
                    if na.flag != epoch
                        && na.terrain != water
                        && terrains.is_lower_priority(na.terrain, layer)
                    {
                        to_visit.insert(nb);
                    }
                }
            }
        }
    }
    stats
}

/// Promote saturated borders to base terrain and prune layers no face can
/// fade into.
///
/// A face whose three vertices all sit at 1.0 for some higher-priority
/// border is fully covered by it; the border becomes the new base. Pruning
/// removes border ids from the face's set only; vertex blend maps keep
/// every entry because neighboring faces may still read them.
pub fn optimize_borders(mesh: &mut TileMesh, terrains: &TerrainTable) -> usize {
    let water = terrains.water();
    let mut optimized = 0usize;

    for f in mesh.inner_faces() {
        if mesh.face_attr(f).terrain == water {
            continue;
        }
        let [v1, v2, v3] = mesh.face_vertices(f);
        let mut need_optimize = false;

        let layers: Vec<TerrainId> = mesh.face_attr(f).border.iter().copied().collect();
        for layer in layers {
            if mesh.vertex_attr(v1).blend(layer) == 1.0
                && mesh.vertex_attr(v2).blend(layer) == 1.0
                && mesh.vertex_attr(v3).blend(layer) == 1.0
                && terrains.is_lower_priority(mesh.face_attr(f).terrain, layer)
            {
                mesh.face_attr_mut(f).terrain = layer;
                need_optimize = true;
            }
        }
        if need_optimize {
            let base = mesh.face_attr(f).terrain;
            let nuke: Vec<TerrainId> = mesh
                .face_attr(f)
                .border
                .iter()
                .copied()
                .filter(|&l| !terrains.is_lower_priority(base, l))
                .collect();
            optimized += nuke.len();
            for l in nuke {
                mesh.face_attr_mut(f).border.remove(&l);
            }
        }
    }
    optimized
}

/// Count faces and border layers, flagging any water face that carries a
/// border set. Water never blends; a border there is an upstream bug.
pub fn border_stats(mesh: &TileMesh, terrains: &TerrainTable) -> BlendStats {
    let mut stats = BlendStats::default();
    let water = terrains.water();
    for f in mesh.inner_faces() {
        let fa = mesh.face_attr(f);
        if fa.terrain != water {
            stats.total += 1;
            stats.borders += fa.border.len();
        } else if !fa.border.is_empty() {
            warn!(
                "border on water land use near face {} ({})",
                f.index(),
                terrains.name(fa.terrain)
            );
        }
    }
    info!(
        "blend stats: {} faces, {} border layers",
        stats.total, stats.borders
    );
    stats
}
