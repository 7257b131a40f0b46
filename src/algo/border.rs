//! Cross-tile border matching.
//!
//! A tile's west and south edges are authoritative for its not-yet-built
//! neighbors; its east and north edges must conform to neighbors that were
//! finalized first. The persisted record of a finalized edge (vertices,
//! heights, blend levels, per-segment base terrain and border sets) is a
//! [`MeshMatch`]; this module binds each recorded vertex to a local "buddy"
//! vertex, inserts recorded vertices the local mesh lacks, and forces the
//! neighbor's terrain layering onto the seam.
//!
//! Matching is deliberately a greedy nearest-pair heuristic and
//! deliberately lossy: a neighbor built from different hydrography can
//! record edge structure this tile cannot reproduce, and a hard failure
//! here would make whole coastlines unbuildable.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use log::warn;
use spade::handles::{FixedFaceHandle, FixedVertexHandle, InnerTag};
use spade::{Point2, Triangulation};

use crate::error::Result;
use crate::mesh::TileMesh;
use crate::terrain::{TerrainId, TerrainTable};

/// Side indices, in the order sections appear in a border file.
pub const SIDE_WEST: usize = 0;
/// South side.
pub const SIDE_SOUTH: usize = 1;
/// East side.
pub const SIDE_EAST: usize = 2;
/// North side.
pub const SIDE_NORTH: usize = 3;

/// One recorded boundary vertex of a finalized neighbor edge.
#[derive(Debug, Clone)]
pub struct MatchVertex {
    /// Exact recorded position.
    pub loc: Point2<f64>,
    /// Recorded height in meters.
    pub height: f64,
    /// Recorded blend level per border terrain.
    pub blending: BTreeMap<TerrainId, f32>,
    /// The local vertex this record was bound to.
    pub buddy: Option<FixedVertexHandle>,
}

/// One recorded boundary segment between two consecutive vertices.
#[derive(Debug, Clone)]
pub struct MatchEdge {
    /// Base terrain of the face behind the segment.
    pub base: TerrainId,
    /// Border terrains layered on that face.
    pub borders: BTreeSet<TerrainId>,
    /// The local face behind the matching seam segment, when one exists.
    pub buddy: Option<FixedFaceHandle<InnerTag>>,
}

/// A finalized neighbor edge: n vertices and n-1 segments.
#[derive(Debug, Clone, Default)]
pub struct MeshMatch {
    /// Boundary vertices, ordered along the edge.
    pub vertices: Vec<MatchVertex>,
    /// Segments between consecutive vertices.
    pub edges: Vec<MatchEdge>,
}

impl MeshMatch {
    /// True when no neighbor data was recorded for this side.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// Collect every local vertex lying exactly on the side's bounding line,
/// as (signed offset from `origin`, vertex), sorted by offset.
///
/// Only convex hull vertices are considered; a vertex on the bounding line
/// is necessarily on the hull since the mesh spans the whole tile.
pub fn fetch_border(
    mesh: &TileMesh,
    origin: Point2<f64>,
    side: usize,
) -> Vec<(f64, FixedVertexHandle)> {
    let vertical = side == SIDE_WEST || side == SIDE_EAST;
    let mut out = Vec::new();
    for e in mesh.cdt().convex_hull() {
        let v = e.from().fix();
        let p = mesh.position(v);
        if vertical {
            if p.x == origin.x {
                out.push((p.y - origin.y, v));
            }
        } else if p.y == origin.y {
            out.push((p.x - origin.x, v));
        }
    }
    out.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
    out
}

/// Bind each recorded vertex to a local boundary vertex.
///
/// Three steps: fetch the local boundary, repeatedly bind the globally
/// nearest unbound (recorded, local) pair by offset distance, then insert
/// any recorded vertex still unbound directly into the mesh at its exact
/// coordinate with its recorded height. Leftover local vertices are
/// tolerated; they come from local-only water the neighbor never saw.
pub fn match_border(mesh: &mut TileMesh, border: &mut MeshMatch, side: usize) -> Result<()> {
    if border.is_empty() {
        return Ok(());
    }
    let origin = border.vertices[0].loc;
    let vertical = side == SIDE_WEST || side == SIDE_EAST;

    let mut slaves = fetch_border(mesh, origin, side);

    while !slaves.is_empty() {
        let mut best: Option<(f64, usize, usize)> = None;
        for (mi, master) in border.vertices.iter().enumerate() {
            if master.buddy.is_some() {
                continue;
            }
            for (si, (_, sv)) in slaves.iter().enumerate() {
                let sp = mesh.position(*sv);
                let d = if vertical {
                    (master.loc.y - sp.y).abs()
                } else {
                    (master.loc.x - sp.x).abs()
                };
                // Strict less-than keeps the first-found pair on ties.
                if best.map_or(true, |(bd, _, _)| d < bd) {
                    best = Some((d, si, mi));
                }
            }
        }
        // All recorded vertices bound but local ones remain: the local mesh
        // has extra structure (typically water the neighbor lacked).
        let Some((_, si, mi)) = best else { break };
        border.vertices[mi].buddy = Some(slaves[si].1);
        slaves.remove(si);
    }

    for master in &mut border.vertices {
        if master.buddy.is_none() {
            let v = mesh.insert_raw(master.loc.x, master.loc.y, master.height)?;
            master.buddy = Some(v);
        }
    }
    Ok(())
}

/// Resolve each recorded segment to the local face behind the seam.
///
/// A segment whose two buddies are not joined by a hull edge is left
/// unresolved rather than failing: the local mesh can legitimately have
/// extra edge structure a neighbor could not have induced.
pub fn find_edge_faces(mesh: &TileMesh, border: &mut MeshMatch) {
    debug_assert_eq!(border.vertices.len(), border.edges.len() + 1);
    for n in 0..border.edges.len() {
        let (Some(a), Some(b)) = (border.vertices[n].buddy, border.vertices[n + 1].buddy) else {
            border.edges[n].buddy = None;
            continue;
        };
        let buddy = mesh.edge_between(a, b).and_then(|e| {
            let de = mesh.cdt().directed_edge(e);
            if de.face().is_outer() {
                de.rev().face().as_inner().map(|f| f.fix())
            } else if de.rev().face().is_outer() {
                de.face().as_inner().map(|f| f.fix())
            } else {
                None
            }
        });
        if buddy.is_none() {
            let p = mesh.position(a);
            warn!("seam segment unresolved near {}, {}", p.x, p.y);
        }
        border.edges[n].buddy = buddy;
    }
}

/// Replace a face's base terrain with a lower-priority one, demoting the
/// old base to a border layer.
///
/// Vertices on the shared seam (`v1`/`v2`) get a zero-initialized blend for
/// the old base; the remaining vertices get a saturated 1.0 so the old base
/// still shows through at full strength away from the seam. Water on either
/// side, or a pair with no transition, leaves the face untouched.
pub(crate) fn rebase_face(
    mesh: &mut TileMesh,
    f: FixedFaceHandle<InnerTag>,
    new_base: TerrainId,
    v1: Option<FixedVertexHandle>,
    v2: Option<FixedVertexHandle>,
    terrains: &TerrainTable,
    mod_verts: &mut BTreeSet<FixedVertexHandle>,
) {
    let old_base = mesh.face_attr(f).terrain;
    let water = terrains.water();
    if old_base == water || new_base == water {
        return;
    }
    if terrains.has_no_transition(old_base, new_base) {
        return;
    }

    mesh.face_attr_mut(f).terrain = new_base;
    mesh.face_attr_mut(f).border.insert(old_base);
    for v in mesh.face_vertices(f) {
        if Some(v) == v1 || Some(v) == v2 {
            mesh.vertex_attr_mut(v).ensure_blend(old_base);
        } else {
            mesh.vertex_attr_mut(v).border_blend.insert(old_base, 1.0);
            mod_verts.insert(v);
        }
    }
}

/// Ensure a face can carry `layer` as a border: register the layer on the
/// face and give any vertex without a blend entry an explicit zero.
pub(crate) fn add_zero_mix_if_needed(
    mesh: &mut TileMesh,
    f: FixedFaceHandle<InnerTag>,
    layer: TerrainId,
    terrains: &TerrainTable,
) {
    if mesh.face_attr(f).terrain == terrains.water() {
        return;
    }
    debug_assert!(layer.is_valid());
    mesh.face_attr_mut(f).border.insert(layer);
    for v in mesh.face_vertices(f) {
        mesh.vertex_attr_mut(v).ensure_blend(layer);
    }
}

/// When a vertex carries a positive blend for `layer`, register the layer
/// on every incident non-water face so no triangle around the vertex ends
/// up with a discontinuous border.
pub(crate) fn safe_smear_border(
    mesh: &mut TileMesh,
    vert: FixedVertexHandle,
    layer: TerrainId,
    terrains: &TerrainTable,
) {
    if mesh.vertex_attr(vert).blend(layer) <= 0.0 {
        return;
    }
    let water = terrains.water();
    for f in mesh.incident_faces(vert) {
        let t = mesh.face_attr(f).terrain;
        if t == layer || t == water {
            continue;
        }
        mesh.face_attr_mut(f).border.insert(layer);
        for v in mesh.face_vertices(f) {
            mesh.vertex_attr_mut(v).ensure_blend(layer);
        }
    }
}

/// Rebase local seam faces whose terrain outranks what the neighbor
/// recorded on the shared edge.
///
/// Fades only run from high priority to low, so a low-priority terrain
/// recorded by the neighbor could never show through a higher-priority
/// local base without swapping the two first.
pub fn rebase_intrusions(
    mesh: &mut TileMesh,
    borders: &mut [Option<MeshMatch>; 4],
    terrains: &TerrainTable,
) {
    let mut mod_verts: BTreeSet<FixedVertexHandle> = BTreeSet::new();

    for border in borders.iter_mut().flatten() {
        if border.is_empty() {
            continue;
        }
        find_edge_faces(mesh, border);

        for n in 0..border.edges.len() {
            let Some(buddy) = border.edges[n].buddy else {
                continue;
            };
            let mut lowest = mesh.face_attr(buddy).terrain;
            if terrains.is_lower_priority(border.edges[n].base, lowest) {
                lowest = border.edges[n].base;
            }
            for &bl in &border.edges[n].borders {
                if terrains.is_lower_priority(bl, lowest) {
                    lowest = bl;
                }
            }
            if lowest != mesh.face_attr(buddy).terrain {
                rebase_face(
                    mesh,
                    buddy,
                    lowest,
                    border.vertices[n].buddy,
                    border.vertices[n + 1].buddy,
                    terrains,
                    &mut mod_verts,
                );
            }
        }

        for mv in &border.vertices {
            let Some(vb) = mv.buddy else { continue };
            for f in mesh.incident_faces(vb) {
                if mesh.touches_hull(f) {
                    continue;
                }
                let mut lowest = mesh.face_attr(f).terrain;
                for (&bl, &mix) in &mv.blending {
                    if mix > 0.0 && terrains.is_lower_priority(bl, lowest) {
                        lowest = bl;
                    }
                }
                if lowest != mesh.face_attr(f).terrain {
                    rebase_face(mesh, f, lowest, Some(vb), None, terrains, &mut mod_verts);
                }
            }
        }
    }

    // Rebasing handed these vertices partial borders; make every incident
    // face able to carry them.
    for v in mod_verts {
        let layers: Vec<TerrainId> = mesh
            .vertex_attr(v)
            .border_blend
            .iter()
            .filter(|&(_, &mix)| mix > 0.0)
            .map(|(&l, _)| l)
            .collect();
        for f in mesh.incident_faces(v) {
            for &l in &layers {
                add_zero_mix_if_needed(mesh, f, l, terrains);
            }
        }
    }
}

/// Force the neighbor's exact layering onto the seam after local blending.
///
/// Blend levels on seam vertices are first hard-zeroed (a gradient cannot
/// continue into a tile that is already rendered), then every border the
/// neighbor recorded is written back explicitly and smeared so the seam
/// matches the neighbor value for value.
pub fn force_slave_edges(
    mesh: &mut TileMesh,
    borders: &[Option<MeshMatch>; 4],
    terrains: &TerrainTable,
) {
    for border in borders.iter().flatten() {
        for mv in &border.vertices {
            if let Some(vb) = mv.buddy {
                for mix in mesh.vertex_attr_mut(vb).border_blend.values_mut() {
                    *mix = 0.0;
                }
            }
        }
    }

    for border in borders.iter().flatten() {
        for n in 0..border.edges.len() {
            let Some(f) = border.edges[n].buddy else {
                continue;
            };
            if mesh.face_attr(f).terrain == terrains.water() {
                continue;
            }
            let va = border.vertices[n].buddy;
            let vb = border.vertices[n + 1].buddy;

            let base = border.edges[n].base;
            if mesh.face_attr(f).terrain != base {
                add_zero_mix_if_needed(mesh, f, base, terrains);
                if let Some(v) = va {
                    mesh.vertex_attr_mut(v).border_blend.insert(base, 1.0);
                    safe_smear_border(mesh, v, base, terrains);
                }
                if let Some(v) = vb {
                    mesh.vertex_attr_mut(v).border_blend.insert(base, 1.0);
                    safe_smear_border(mesh, v, base, terrains);
                }
            }

            for &bl in &border.edges[n].borders {
                if mesh.face_attr(f).terrain == bl {
                    continue;
                }
                add_zero_mix_if_needed(mesh, f, bl, terrains);
                if let Some(v) = va {
                    let mix = border.vertices[n].blending.get(&bl).copied().unwrap_or(0.0);
                    mesh.vertex_attr_mut(v).border_blend.insert(bl, mix);
                    safe_smear_border(mesh, v, bl, terrains);
                }
                if let Some(v) = vb {
                    let mix = border.vertices[n + 1]
                        .blending
                        .get(&bl)
                        .copied()
                        .unwrap_or(0.0);
                    mesh.vertex_attr_mut(v).border_blend.insert(bl, mix);
                    safe_smear_border(mesh, v, bl, terrains);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundary_mesh() -> TileMesh {
        let mut m = TileMesh::new(0.0, 0.0, 1.0, 1.0);
        m.insert_raw(0.0, 0.0, 10.0).unwrap();
        m.insert_raw(1.0, 0.0, 10.0).unwrap();
        m.insert_raw(1.0, 1.0, 10.0).unwrap();
        m.insert_raw(0.0, 1.0, 10.0).unwrap();
        m.insert_raw(0.0, 0.4, 10.0).unwrap();
        m.insert_raw(0.5, 0.5, 10.0).unwrap();
        m
    }

    fn master_vertex(x: f64, y: f64, h: f64) -> MatchVertex {
        MatchVertex {
            loc: Point2::new(x, y),
            height: h,
            blending: BTreeMap::new(),
            buddy: None,
        }
    }

    #[test]
    fn test_fetch_border_ordered() {
        let mesh = boundary_mesh();
        let pts = fetch_border(&mesh, Point2::new(0.0, 0.0), SIDE_WEST);
        let offsets: Vec<f64> = pts.iter().map(|p| p.0).collect();
        assert_eq!(offsets, vec![0.0, 0.4, 1.0]);
    }

    #[test]
    fn test_greedy_match_binds_nearest() {
        let mut mesh = boundary_mesh();
        let mut border = MeshMatch {
            vertices: vec![
                master_vertex(0.0, 0.0, 11.0),
                master_vertex(0.0, 0.45, 11.0),
                master_vertex(0.0, 1.0, 11.0),
            ],
            edges: vec![
                MatchEdge { base: TerrainId::INVALID, borders: BTreeSet::new(), buddy: None },
                MatchEdge { base: TerrainId::INVALID, borders: BTreeSet::new(), buddy: None },
            ],
        };
        match_border(&mut mesh, &mut border, SIDE_WEST).unwrap();
        // 0.45 must bind to the local 0.4 vertex, not steal an endpoint.
        let buddy = border.vertices[1].buddy.unwrap();
        let p = mesh.position(buddy);
        assert_eq!((p.x, p.y), (0.0, 0.4));
        assert!(border.vertices.iter().all(|v| v.buddy.is_some()));
    }

    #[test]
    fn test_empty_record_is_noop() {
        let mut mesh = boundary_mesh();
        let before = mesh.num_vertices();
        let mut border = MeshMatch::default();
        match_border(&mut mesh, &mut border, SIDE_WEST).unwrap();
        assert_eq!(mesh.num_vertices(), before);
        assert!(border.is_empty());
    }

    #[test]
    fn test_unmatched_master_inserted_exactly() {
        let mut mesh = boundary_mesh();
        let before = mesh.num_vertices();
        let mut border = MeshMatch {
            vertices: vec![
                master_vertex(0.0, 0.0, 11.0),
                master_vertex(0.0, 0.4, 11.0),
                master_vertex(0.0, 0.7, 17.5),
                master_vertex(0.0, 1.0, 11.0),
            ],
            edges: vec![
                MatchEdge { base: TerrainId::INVALID, borders: BTreeSet::new(), buddy: None },
                MatchEdge { base: TerrainId::INVALID, borders: BTreeSet::new(), buddy: None },
                MatchEdge { base: TerrainId::INVALID, borders: BTreeSet::new(), buddy: None },
            ],
        };
        match_border(&mut mesh, &mut border, SIDE_WEST).unwrap();
        assert_eq!(mesh.num_vertices(), before + 1);
        let v = border.vertices[2].buddy.unwrap();
        let p = mesh.position(v);
        assert_eq!((p.x, p.y), (0.0, 0.7));
        assert_eq!(mesh.vertex_attr(v).height, 17.5);
    }

    #[test]
    fn test_edge_faces_resolved_on_hull() {
        let mut mesh = boundary_mesh();
        let mut border = MeshMatch {
            vertices: vec![master_vertex(0.0, 0.0, 10.0), master_vertex(0.0, 0.4, 10.0)],
            edges: vec![MatchEdge {
                base: TerrainId::INVALID,
                borders: BTreeSet::new(),
                buddy: None,
            }],
        };
        match_border(&mut mesh, &mut border, SIDE_WEST).unwrap();
        find_edge_faces(&mesh, &mut border);
        assert!(border.edges[0].buddy.is_some());
    }

    #[test]
    fn test_rebase_swaps_base_and_border() {
        let mut terrains = TerrainTable::new();
        let grass = terrains.intern("terrain_grass", 10, 500.0);
        let rock = terrains.intern("terrain_rock", 20, 300.0);

        let mut mesh = boundary_mesh();
        mesh.rebuild_face_attrs();
        for f in mesh.inner_faces() {
            mesh.face_attr_mut(f).terrain = rock;
        }
        let f = mesh.inner_faces()[0];
        let [v1, _, _] = mesh.face_vertices(f);
        let mut mods = BTreeSet::new();
        rebase_face(&mut mesh, f, grass, Some(v1), None, &terrains, &mut mods);

        assert_eq!(mesh.face_attr(f).terrain, grass);
        assert!(mesh.face_attr(f).border.contains(&rock));
        assert_eq!(mesh.vertex_attr(v1).blend(rock), 0.0);
        assert_eq!(mods.len(), 2);
        for &v in &mods {
            assert_eq!(mesh.vertex_attr(v).blend(rock), 1.0);
        }
    }

    #[test]
    fn test_rebase_never_touches_water() {
        let mut terrains = TerrainTable::new();
        let grass = terrains.intern("terrain_grass", 10, 500.0);
        let mut mesh = boundary_mesh();
        mesh.rebuild_face_attrs();
        let f = mesh.inner_faces()[0];
        mesh.face_attr_mut(f).terrain = terrains.water();
        let mut mods = BTreeSet::new();
        rebase_face(&mut mesh, f, grass, None, None, &terrains, &mut mods);
        assert_eq!(mesh.face_attr(f).terrain, terrains.water());
        assert!(mods.is_empty());
    }
}
