//! Greedy error-driven mesh refinement.
//!
//! Starting from the sparse selection mesh, repeatedly insert the unused DEM
//! post with the worst score until the score drops below a tolerance or the
//! point budget runs out. Two passes with different criteria build a full
//! tile: a vertical-error pass captures terrain morphology, then a
//! triangle-size pass caps the longest edge so no triangle exceeds a
//! renderable size.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use log::info;
use spade::handles::{FixedFaceHandle, InnerTag};
use spade::{PositionInTriangulation, Triangulation};

use crate::dem::{deg_to_mtr_lon, DemGrid, DemMask, DEG_TO_MTR_LAT, NO_DATA};
use crate::error::Result;
use crate::mesh::TileMesh;

/// What the greedy loop maximizes.
#[derive(Debug, Clone, Copy)]
pub enum RefineCriterion {
    /// Absolute difference in meters between the DEM post and the mesh's
    /// supporting plane. The payload is the tolerance below which a post no
    /// longer earns insertion.
    VerticalError(f64),
    /// Longest edge in meters of the triangle containing the post. The
    /// payload is the maximum tolerated edge length.
    TriangleSize(f64),
}

#[derive(Debug, Clone)]
struct Candidate {
    x: usize,
    y: usize,
    score: f64,
}

// Max-heap on score; ties resolved by grid order for determinism.
impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.x == other.x && self.y == other.y
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| (other.y, other.x).cmp(&(self.y, self.x)))
    }
}

fn longest_edge_m(mesh: &TileMesh, f: FixedFaceHandle<InnerTag>) -> f64 {
    let [a, b, c] = mesh.face_vertices(f);
    let pa = mesh.position(a);
    let pb = mesh.position(b);
    let pc = mesh.position(c);
    let lon_scale = deg_to_mtr_lon(pa.y);
    let mut worst: f64 = 0.0;
    for (p, q) in [(pa, pb), (pb, pc), (pc, pa)] {
        let dx = (q.x - p.x) * lon_scale;
        let dy = (q.y - p.y) * DEG_TO_MTR_LAT;
        worst = worst.max((dx * dx + dy * dy).sqrt());
    }
    worst
}

/// Score one unused post against the current mesh. `None` when the post is
/// sitting on an existing vertex or outside the hull.
fn score_point(mesh: &TileMesh, dem: &DemGrid, x: usize, y: usize, crit: RefineCriterion) -> Option<f64> {
    let h = dem.get(x, y);
    if h == NO_DATA {
        return None;
    }
    let lon = dem.x_to_lon(x as f64);
    let lat = dem.y_to_lat(y as f64);
    let face = match mesh.locate(lon, lat) {
        PositionInTriangulation::OnFace(f) => f,
        PositionInTriangulation::OnEdge(e) => {
            let e = mesh.cdt().directed_edge(e);
            e.face().as_inner().or_else(|| e.rev().face().as_inner()).map(|f| f.fix())?
        }
        _ => return None,
    };
    match crit {
        RefineCriterion::VerticalError(_) => {
            Some((h as f64 - mesh.height_in_face(face, lon, lat)).abs())
        }
        RefineCriterion::TriangleSize(_) => Some(longest_edge_m(mesh, face)),
    }
}

/// Insert unused DEM posts worst-first until the criterion is satisfied
/// everywhere or `max_points` total mesh vertices are reached.
///
/// Scores go stale as the mesh changes underfoot, so the heap revalidates
/// lazily: a popped candidate whose score dropped is pushed back with the
/// fresh score instead of being inserted. Returns the number of points
/// added.
pub fn greedy_refine(
    mesh: &mut TileMesh,
    dem: &DemGrid,
    used: &mut DemMask,
    crit: RefineCriterion,
    max_points: usize,
) -> Result<usize> {
    let tolerance = match crit {
        RefineCriterion::VerticalError(t) => t,
        RefineCriterion::TriangleSize(t) => t,
    };

    let mut heap = BinaryHeap::new();
    for y in 0..dem.height() {
        for x in 0..dem.width() {
            if used.get(x, y) {
                continue;
            }
            if let Some(score) = score_point(mesh, dem, x, y, crit) {
                if score > tolerance {
                    heap.push(Candidate { x, y, score });
                }
            }
        }
    }

    let mut added = 0usize;
    while let Some(cand) = heap.pop() {
        if mesh.num_vertices() >= max_points {
            break;
        }
        if used.get(cand.x, cand.y) {
            continue;
        }
        let Some(score) = score_point(mesh, dem, cand.x, cand.y, crit) else {
            continue;
        };
        if score <= tolerance {
            continue;
        }
        if score < cand.score {
            // Stale entry: earlier insertions already improved this spot.
            heap.push(Candidate { score, ..cand });
            continue;
        }
        mesh.insert_dem_point(dem, used, cand.x, cand.y)?;
        added += 1;
    }

    info!("greedy refinement added {added} points ({:?})", crit);
    Ok(added)
}
