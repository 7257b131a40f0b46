//! Constraint burn-in and flood-fill terrain classification.
//!
//! Pending constraints from point selection become real constrained edges
//! here, then terrain identity spreads outward: every face starts as
//! natural, the faces flanking each constraint are seeded with the map's
//! terrain for their side, and a flood fill carries those labels across
//! unconstrained edges until the whole tile is partitioned.

use std::collections::{BTreeSet, VecDeque};

use log::{error, info};
use spade::handles::{FixedFaceHandle, FixedVertexHandle, InnerTag};
use spade::Triangulation;

use crate::algo::select::PendingConstraint;
use crate::dem::{deg_to_mtr_lon, DemGrid, DEG_TO_MTR_LAT, NO_DATA};
use crate::error::{Result, TinError};
use crate::map::VectorMap;
use crate::mesh::TileMesh;
use crate::terrain::TerrainTable;

/// Collinearity tolerance for chain walking, in squared degrees. Vertices
/// on a burned constraint sit on the segment up to rounding from midpoint
/// construction.
const CHAIN_EPS: f64 = 1e-12;

/// Collect the mesh vertices along the straight edge from `a` to `b`,
/// including both endpoints.
///
/// A burned constraint may materialize as several constrained sub-edges
/// when other vertices lie on the segment. The walk hops vertex to vertex,
/// always requiring the next vertex to be adjacent, on the line, and
/// strictly ahead of the current one.
pub fn collect_edge_chain(
    mesh: &TileMesh,
    a: FixedVertexHandle,
    b: FixedVertexHandle,
) -> Result<Vec<FixedVertexHandle>> {
    let pa = mesh.position(a);
    let pb = mesh.position(b);
    let bail = || TinError::ConstraintNotAnEdge(pa.x, pa.y, pb.x, pb.y);

    let mut out = vec![a];
    let mut s = a;
    loop {
        let ps = mesh.position(s);
        let mut next = None;
        for n in mesh.neighbor_vertices(s) {
            if n == b {
                next = Some(b);
                break;
            }
            let pc = mesh.position(n);
            let cross = (pb.x - pa.x) * (pc.y - pa.y) - (pb.y - pa.y) * (pc.x - pa.x);
            if cross.abs() > CHAIN_EPS {
                continue;
            }
            // In order from the current point, or we take the hop backward.
            let ahead = (pc.x - ps.x) * (pb.x - ps.x) + (pc.y - ps.y) * (pb.y - ps.y);
            let before_b = (pb.x - pc.x) * (pb.x - ps.x) + (pb.y - pc.y) * (pb.y - ps.y);
            if ahead > 0.0 && before_b > 0.0 {
                next = Some(n);
                break;
            }
        }
        let n = next.ok_or_else(bail)?;
        out.push(n);
        if n == b {
            return Ok(out);
        }
        s = n;
    }
}

/// The finite face on the left of the directed edge `a -> b`, tracking the
/// constraint through intermediate vertices when it was split.
fn left_face_of(
    mesh: &TileMesh,
    a: FixedVertexHandle,
    b: FixedVertexHandle,
) -> Result<FixedFaceHandle<InnerTag>> {
    let pa = mesh.position(a);
    let pb = mesh.position(b);
    let bail = || TinError::ConstraintNotAnEdge(pa.x, pa.y, pb.x, pb.y);

    let (first, second) = if mesh.edge_between(a, b).is_some() {
        (a, b)
    } else {
        let chain = collect_edge_chain(mesh, a, b)?;
        (chain[0], chain[1])
    };
    let e = mesh.edge_between(first, second).ok_or_else(bail)?;
    if !mesh.cdt().is_constraint_edge(e.as_undirected()) {
        return Err(bail());
    }
    mesh.cdt()
        .directed_edge(e)
        .face()
        .as_inner()
        .map(|f| f.fix())
        .ok_or_else(bail)
}

/// Should this constraint sub-edge be split at its midpoint?
///
/// Compares the DEM's elevation at the midpoint against the average of the
/// endpoint elevations.
fn needs_split(
    mesh: &TileMesh,
    dem: &DemGrid,
    a: FixedVertexHandle,
    b: FixedVertexHandle,
    max_err: f64,
) -> Option<(f64, f64)> {
    let pa = mesh.position(a);
    let pb = mesh.position(b);
    let mx = (pa.x + pb.x) * 0.5;
    let my = (pa.y + pb.y) * 0.5;

    let h1 = dem.value_linear(pa.x, pa.y);
    let h2 = dem.value_linear(pb.x, pb.y);
    let hc = dem.value_linear(mx, my);
    if h1 == NO_DATA || h2 == NO_DATA || hc == NO_DATA {
        return None;
    }
    let ha = (h1 + h2) * 0.5;
    if (ha - hc).abs() as f64 > max_err {
        Some((mx, my))
    } else {
        None
    }
}

/// Burn all pending constraints into the triangulation.
///
/// With `split_max_err` set, each materialized sub-edge is checked against
/// the DEM and split at its midpoint while the interpolated error stays
/// above the threshold; the two halves re-enter the queue.
pub fn burn_constraints(
    mesh: &mut TileMesh,
    dem: &DemGrid,
    cons: &[PendingConstraint],
    split_max_err: Option<f64>,
) -> Result<()> {
    let mut queue: VecDeque<(FixedVertexHandle, FixedVertexHandle)> =
        cons.iter().map(|c| (c.a, c.b)).collect();
    let mut split_total = 0usize;

    while let Some((a, b)) = queue.pop_front() {
        if a == b {
            continue;
        }
        mesh.add_constraint(a, b);

        let Some(max_err) = split_max_err else {
            continue;
        };
        let chain = collect_edge_chain(mesh, a, b)?;
        for w in 0..chain.len() - 1 {
            if let Some((mx, my)) = needs_split(mesh, dem, chain[w], chain[w + 1], max_err) {
                let v = mesh.insert_point(dem, mx, my)?;
                split_total += 1;
                queue.push_back((chain[w], v));
                queue.push_back((v, chain[w + 1]));
            }
        }
    }

    if split_total > 0 {
        info!("added {split_total} vertices to reduce error on constraints");
    }
    Ok(())
}

/// A vertex inside the edge's diametral circle makes the edge encroached.
fn edge_encroached(mesh: &TileMesh, a: FixedVertexHandle, b: FixedVertexHandle) -> bool {
    let Some(e) = mesh.edge_between(a, b) else {
        return false;
    };
    let pa = mesh.position(a);
    let pb = mesh.position(b);
    let mx = (pa.x + pb.x) * 0.5;
    let my = (pa.y + pb.y) * 0.5;
    let r_sq = ((pb.x - pa.x).powi(2) + (pb.y - pa.y).powi(2)) * 0.25;

    let de = mesh.cdt().directed_edge(e);
    for d in [de, de.rev()] {
        if d.face().is_outer() {
            continue;
        }
        let p = d.next().to().position();
        let ex = p.x - mx;
        let ey = p.y - my;
        if ex * ex + ey * ey < r_sq {
            return true;
        }
    }
    false
}

/// Split encroached constrained edges until the mesh conforms to its
/// constraints.
///
/// Burned boundaries pin long edges the Delaunay criterion would otherwise
/// flip, leaving sliver triangles along coastlines. An edge whose diametral
/// circle contains the apex of an adjacent triangle is split at its
/// midpoint; the new vertex takes a DEM-interpolated height like any other
/// refinement point, and the triangulation splits the constraint in two.
/// An edge already shorter than the floor length is left alone so thin
/// input geometry cannot split forever. Returns the number of vertices
/// added.
pub fn conform_constraints(mesh: &mut TileMesh, dem: &DemGrid) -> Result<usize> {
    const MIN_EDGE_M: f64 = 30.0;

    let mut queue: VecDeque<(FixedVertexHandle, FixedVertexHandle)> = mesh
        .cdt()
        .undirected_edges()
        .filter(|e| mesh.cdt().is_constraint_edge(e.fix()))
        .map(|e| {
            let [a, b] = e.vertices();
            (a.fix(), b.fix())
        })
        .collect();

    let mut added = 0usize;
    while let Some((a, b)) = queue.pop_front() {
        if !mesh.is_constrained_between(a, b) {
            continue;
        }
        let pa = mesh.position(a);
        let pb = mesh.position(b);
        let mx = (pa.x + pb.x) * 0.5;
        let my = (pa.y + pb.y) * 0.5;
        let dx = (pb.x - pa.x) * deg_to_mtr_lon(my);
        let dy = (pb.y - pa.y) * DEG_TO_MTR_LAT;
        if dx * dx + dy * dy < MIN_EDGE_M * MIN_EDGE_M {
            continue;
        }
        if !edge_encroached(mesh, a, b) {
            continue;
        }
        let v = mesh.insert_point(dem, mx, my)?;
        added += 1;
        queue.push_back((a, v));
        queue.push_back((v, b));
    }
    if added > 0 {
        info!("conforming pass split {added} constrained edge(s)");
    }
    Ok(added)
}

/// Assign a terrain to every finite face by flood fill from the burned
/// constraints, then snap water vertex heights to the DEM.
///
/// Conflicting assignments at a flood frontier are logged and skipped, not
/// fatal: two water bodies separated by an unburned overlay (a bridge, say)
/// can legitimately disagree.
pub fn classify_terrain(
    mesh: &mut TileMesh,
    map: &VectorMap,
    cons: &[PendingConstraint],
    terrains: &TerrainTable,
    dem: &DemGrid,
) -> Result<()> {
    let natural = terrains.natural();
    for fa in &mut mesh.face_attrs {
        fa.terrain = natural;
        fa.feature = crate::terrain::TerrainId::INVALID;
        fa.orig_face = None;
    }

    // Seed the two flanking faces of each constraint. One face per side is
    // enough; the flood carries the label along the rest of the boundary.
    let mut frontier: BTreeSet<usize> = BTreeSet::new();
    let mut handle_of: Vec<Option<FixedFaceHandle<InnerTag>>> = vec![None; mesh.face_attrs.len()];
    for f in mesh.inner_faces() {
        handle_of[f.index()] = Some(f);
    }

    for c in cons {
        let left = left_face_of(mesh, c.a, c.b)?;
        let la = mesh.face_attr_mut(left);
        la.terrain = map.face(c.left).terrain;
        la.feature = map.face(c.left).terrain;
        if la.orig_face.is_none() {
            la.orig_face = Some(c.left);
        }
        frontier.insert(left.index());

        let right = left_face_of(mesh, c.b, c.a)?;
        let ra = mesh.face_attr_mut(right);
        ra.terrain = map.face(c.right).terrain;
        ra.feature = map.face(c.right).terrain;
        if ra.orig_face.is_none() {
            ra.orig_face = Some(c.right);
        }
        frontier.insert(right.index());
    }

    let mut visited: BTreeSet<usize> = BTreeSet::new();
    while let Some(&idx) = frontier.iter().next() {
        frontier.remove(&idx);
        visited.insert(idx);
        let f = handle_of[idx].ok_or(TinError::Topology("face vanished during terrain flood"))?;

        let tg = mesh.face_attr(f).terrain;
        let of = mesh.face_attr(f).orig_face;
        mesh.face_attr_mut(f).flag = 0;

        for edge in mesh.face_edges(f) {
            if edge.constrained {
                continue;
            }
            let Some(fnb) = edge.neighbor else { continue };
            if visited.contains(&fnb.index()) {
                continue;
            }
            let nt = mesh.face_attr(fnb).terrain;
            if nt != natural && nt != tg {
                let p = mesh.position(edge.from);
                error!(
                    "conflicting terrain assignment between {} and {} near {}, {}",
                    terrains.name(nt),
                    terrains.name(tg),
                    p.x,
                    p.y
                );
            } else {
                let na = mesh.face_attr_mut(fnb);
                na.terrain = tg;
                na.feature = tg;
            }
            let na = mesh.face_attr_mut(fnb);
            if na.orig_face.is_none() {
                na.orig_face = of;
            }
            frontier.insert(fnb.index());
        }
    }

    snap_water_heights(mesh, terrains, dem);
    Ok(())
}

/// Replace every water vertex's interpolated height with the nearest valid
/// DEM sample, so lakes and coastlines sit at the surveyed water level.
fn snap_water_heights(mesh: &mut TileMesh, terrains: &TerrainTable, dem: &DemGrid) {
    let water = terrains.water();
    let mut wet_verts: BTreeSet<usize> = BTreeSet::new();
    let mut handles: Vec<FixedVertexHandle> = Vec::new();
    for f in mesh.inner_faces() {
        if mesh.face_attr(f).terrain == water {
            for v in mesh.face_vertices(f) {
                if wet_verts.insert(v.index()) {
                    handles.push(v);
                }
            }
        }
    }
    for v in handles {
        let p = mesh.position(v);
        if let Some((e, _, _)) = dem.nearest(p.x, p.y) {
            mesh.vertex_attr_mut(v).height = e as f64;
        }
    }
}

/// Split zero-depth coastal water triangles.
///
/// A water face can end up with all three vertices on the shoreline; its
/// whole surface then sits at beach height and renders as a dry shelf. For
/// every water-face edge whose two endpoints both touch constraints while
/// the edge itself is unconstrained, insert the edge midpoint, then
/// re-classify the changed topology. Returns the number of points added.
pub fn split_beached_water(
    mesh: &mut TileMesh,
    map: &VectorMap,
    cons: &[PendingConstraint],
    terrains: &TerrainTable,
    dem: &DemGrid,
) -> Result<usize> {
    let water = terrains.water();
    let mut splits: BTreeSet<(u64, u64)> = BTreeSet::new();

    for f in mesh.inner_faces() {
        if mesh.face_attr(f).terrain != water {
            continue;
        }
        let vs = mesh.face_vertices(f);
        let coastal = [
            mesh.vertex_on_constraint(vs[0]),
            mesh.vertex_on_constraint(vs[1]),
            mesh.vertex_on_constraint(vs[2]),
        ];
        for i in 0..3 {
            let j = (i + 1) % 3;
            if coastal[i] && coastal[j] && !mesh.is_constrained_between(vs[i], vs[j]) {
                let pa = mesh.position(vs[i]);
                let pb = mesh.position(vs[j]);
                let mx = (pa.x + pb.x) * 0.5;
                let my = (pa.y + pb.y) * 0.5;
                splits.insert((mx.to_bits(), my.to_bits()));
            }
        }
    }

    for &(xb, yb) in &splits {
        mesh.insert_point(dem, f64::from_bits(xb), f64::from_bits(yb))?;
    }
    if !splits.is_empty() {
        info!("split {} beached water edges", splits.len());
        mesh.rebuild_face_attrs();
        classify_terrain(mesh, map, cons, terrains, dem)?;
    }
    Ok(splits.len())
}
