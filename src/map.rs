//! Planar vector map of water and feature polygons.
//!
//! A [`VectorMap`] is a doubly-connected arrangement of polygon boundaries
//! with per-face terrain and zoning attributes. The mesh pipeline consumes
//! it read-only: boundaries whose two sides differ in terrain or zoning are
//! "burned" into the triangulation as constrained edges, and water faces
//! drive the wet-interior point selection.
//!
//! The arrangement is deliberately simple — disjoint polygon rings inserted
//! into a background face — which is all the tile builder needs. Face 0 is
//! the unbounded face; edges touching it never burn.

use nalgebra::Point2;
use std::collections::HashMap;

use crate::terrain::TerrainId;

/// Index of a map vertex.
pub type MapVertexId = usize;
/// Index of a map half-edge.
pub type MapHalfEdgeId = usize;
/// Index of a map face.
pub type MapFaceId = usize;

/// The unbounded face surrounding everything.
pub const UNBOUNDED_FACE: MapFaceId = 0;

/// Attributes of one map face.
#[derive(Debug, Clone)]
pub struct MapFace {
    /// Terrain attribute of the face interior.
    pub terrain: TerrainId,
    /// Opaque zoning attribute; only equality is ever consulted.
    pub zoning: Option<i32>,
    /// Marks the unbounded sentinel face.
    pub unbounded: bool,
}

/// One directed half-edge of the arrangement.
#[derive(Debug, Clone)]
pub struct MapHalfEdge {
    /// Source vertex.
    pub source: MapVertexId,
    /// Target vertex.
    pub target: MapVertexId,
    /// Opposite half-edge.
    pub twin: MapHalfEdgeId,
    /// Face on the left of this half-edge.
    pub face: MapFaceId,
    /// Explicit burn request, independent of attribute differences.
    pub must_burn: bool,
    /// Consolidation scratch mark.
    pub mark: bool,
}

/// A planar map of polygon boundaries with face attributes.
#[derive(Debug, Clone)]
pub struct VectorMap {
    vertices: Vec<Point2<f64>>,
    vertex_index: HashMap<(u64, u64), MapVertexId>,
    half_edges: Vec<MapHalfEdge>,
    /// Outgoing half-edges per vertex, in insertion order.
    out_edges: Vec<Vec<MapHalfEdgeId>>,
    faces: Vec<MapFace>,
}

impl Default for VectorMap {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorMap {
    /// Create a map holding only the unbounded face.
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            vertex_index: HashMap::new(),
            half_edges: Vec::new(),
            out_edges: Vec::new(),
            faces: vec![MapFace {
                terrain: TerrainId::INVALID,
                zoning: None,
                unbounded: true,
            }],
        }
    }

    /// Add a face with the given attributes and return its id.
    pub fn add_face(&mut self, terrain: TerrainId, zoning: Option<i32>) -> MapFaceId {
        self.faces.push(MapFace {
            terrain,
            zoning,
            unbounded: false,
        });
        self.faces.len() - 1
    }

    /// Face attributes.
    #[inline]
    pub fn face(&self, f: MapFaceId) -> &MapFace {
        &self.faces[f]
    }

    /// Half-edge record.
    #[inline]
    pub fn half_edge(&self, he: MapHalfEdgeId) -> &MapHalfEdge {
        &self.half_edges[he]
    }

    /// Position of a map vertex.
    #[inline]
    pub fn position(&self, v: MapVertexId) -> Point2<f64> {
        self.vertices[v]
    }

    /// Number of half-edges.
    pub fn num_half_edges(&self) -> usize {
        self.half_edges.len()
    }

    /// Iterate over all half-edge ids.
    pub fn half_edge_ids(&self) -> impl Iterator<Item = MapHalfEdgeId> {
        0..self.half_edges.len()
    }

    /// Outgoing half-edges of a vertex.
    pub fn out_edges(&self, v: MapVertexId) -> &[MapHalfEdgeId] {
        &self.out_edges[v]
    }

    fn intern_vertex(&mut self, p: Point2<f64>) -> MapVertexId {
        let key = (p.x.to_bits(), p.y.to_bits());
        if let Some(&v) = self.vertex_index.get(&key) {
            return v;
        }
        let v = self.vertices.len();
        self.vertices.push(p);
        self.out_edges.push(Vec::new());
        self.vertex_index.insert(key, v);
        v
    }

    /// Insert one boundary segment as a twin pair of half-edges.
    ///
    /// `left` is the face on the left of source -> target, `right` the face
    /// on the left of the twin. Returns the forward half-edge id.
    pub fn add_edge(
        &mut self,
        source: Point2<f64>,
        target: Point2<f64>,
        left: MapFaceId,
        right: MapFaceId,
    ) -> MapHalfEdgeId {
        let sv = self.intern_vertex(source);
        let tv = self.intern_vertex(target);
        let fwd = self.half_edges.len();
        let rev = fwd + 1;
        self.half_edges.push(MapHalfEdge {
            source: sv,
            target: tv,
            twin: rev,
            face: left,
            must_burn: false,
            mark: false,
        });
        self.half_edges.push(MapHalfEdge {
            source: tv,
            target: sv,
            twin: fwd,
            face: right,
            must_burn: false,
            mark: false,
        });
        self.out_edges[sv].push(fwd);
        self.out_edges[tv].push(rev);
        fwd
    }

    /// Insert a closed counter-clockwise polygon ring.
    ///
    /// The ring's interior (`inner`, on the left walking the ring) and the
    /// surrounding face (`outer`) sit on opposite sides of every segment.
    pub fn add_ring(&mut self, points: &[Point2<f64>], inner: MapFaceId, outer: MapFaceId) {
        for i in 0..points.len() {
            let j = (i + 1) % points.len();
            self.add_edge(points[i], points[j], inner, outer);
        }
    }

    /// Request burn-in of an edge regardless of face attributes.
    pub fn set_must_burn(&mut self, he: MapHalfEdgeId, burn: bool) {
        self.half_edges[he].must_burn = burn;
    }

    /// Clear all consolidation marks.
    pub fn clear_marks(&mut self) {
        for he in &mut self.half_edges {
            he.mark = false;
        }
    }

    fn set_mark(&mut self, he: MapHalfEdgeId) {
        self.half_edges[he].mark = true;
    }

    /// Does this boundary need to be burned into the mesh as a constraint?
    ///
    /// A half-edge burns when its two incident faces differ in terrain type
    /// or zoning, or when either direction carries an explicit burn request.
    /// Edges incident to the unbounded face never burn.
    pub fn must_burn_edge(&self, he: MapHalfEdgeId) -> bool {
        let e = &self.half_edges[he];
        let t = &self.half_edges[e.twin];
        let f1 = &self.faces[e.face];
        let f2 = &self.faces[t.face];
        if f1.unbounded || f2.unbounded {
            return false;
        }
        e.must_burn || t.must_burn || f1.terrain != f2.terrain || f1.zoning != f2.zoning
    }

    fn collinear_continuation(&self, a: MapHalfEdgeId, b: MapHalfEdgeId) -> bool {
        let ea = &self.half_edges[a];
        let eb = &self.half_edges[b];
        debug_assert_eq!(ea.target, eb.source);
        let p = self.vertices[ea.source];
        let q = self.vertices[ea.target];
        let r = self.vertices[eb.target];
        let cross = (q.x - p.x) * (r.y - p.y) - (q.y - p.y) * (r.x - p.x);
        if cross != 0.0 {
            return false;
        }
        // Ordered along the line: q must lie between p and r.
        let dot = (r.x - q.x) * (q.x - p.x) + (r.y - q.y) * (q.y - p.y);
        dot > 0.0
    }

    /// Extend a need-burn half-edge as far as possible through collinear,
    /// contiguous, also-need-burn half-edges, marking everything visited.
    ///
    /// Consolidation stops at already-marked edges, at T junctions (more than
    /// one candidate continuation), and at turns. The result is that a
    /// boundary split by a crossing non-burned overlay is merged back into a
    /// single constraint, keeping micro-triangles out of the start mesh.
    pub fn extend_burn_edge(&mut self, start: MapHalfEdgeId) -> MapHalfEdgeId {
        let mut best = start;
        loop {
            self.set_mark(best);
            let v = self.half_edges[best].target;
            let twin_of_best = self.half_edges[best].twin;

            let mut new_best = None;
            for &cand in &self.out_edges[v] {
                if cand == twin_of_best {
                    continue;
                }
                if !self.must_burn_edge(cand) {
                    continue;
                }
                let cand_twin = self.half_edges[cand].twin;
                if self.half_edges[cand].mark || self.half_edges[cand_twin].mark {
                    return best; // already burned; cannot extend through it
                }
                if new_best.is_some() {
                    return best; // T junction
                }
                new_best = Some(cand);
            }

            let Some(next) = new_best else {
                return best;
            };
            if !self.collinear_continuation(best, next) {
                return best;
            }
            best = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain::TerrainTable;

    fn square(w: f64, s: f64, e: f64, n: f64) -> Vec<Point2<f64>> {
        vec![
            Point2::new(w, s),
            Point2::new(e, s),
            Point2::new(e, n),
            Point2::new(w, n),
        ]
    }

    /// Land tile with a water square inside it.
    fn water_map() -> (VectorMap, TerrainTable) {
        let terrains = TerrainTable::new();
        let mut map = VectorMap::new();
        let land = map.add_face(terrains.natural(), None);
        let water = map.add_face(terrains.water(), None);
        map.add_ring(&square(0.0, 0.0, 1.0, 1.0), land, UNBOUNDED_FACE);
        map.add_ring(&square(0.2, 0.2, 0.5, 0.5), water, land);
        (map, terrains)
    }

    #[test]
    fn test_tile_boundary_never_burns() {
        let (map, _) = water_map();
        // First 8 half-edges form the tile boundary against the unbounded face.
        for he in 0..8 {
            assert!(!map.must_burn_edge(he));
        }
    }

    #[test]
    fn test_water_boundary_burns() {
        let (map, _) = water_map();
        for he in 8..16 {
            assert!(map.must_burn_edge(he));
        }
    }

    #[test]
    fn test_consolidation_merges_collinear_split() {
        let terrains = TerrainTable::new();
        let mut map = VectorMap::new();
        let land = map.add_face(terrains.natural(), None);
        let water = map.add_face(terrains.water(), None);
        map.add_ring(&square(0.0, 0.0, 1.0, 1.0), land, UNBOUNDED_FACE);
        // Water boundary's south side is split at x = 0.3.
        let ring = vec![
            Point2::new(0.2, 0.2),
            Point2::new(0.3, 0.2),
            Point2::new(0.5, 0.2),
            Point2::new(0.5, 0.5),
            Point2::new(0.2, 0.5),
        ];
        map.add_ring(&ring, water, land);

        let first = 8; // (0.2,0.2) -> (0.3,0.2)
        assert!(map.must_burn_edge(first));
        let extended = map.extend_burn_edge(first);
        // Consolidates through (0.3,0.2) and stops at the (0.5,0.2) corner.
        assert_eq!(map.half_edge(extended).target, map.half_edge(10).target);
        assert!(map.half_edge(first).mark);
    }

    #[test]
    fn test_consolidation_stops_at_turn() {
        let (mut map, _) = water_map();
        let first = 8;
        let extended = map.extend_burn_edge(first);
        assert_eq!(extended, first); // square corner: no collinear continuation
    }
}
