//! The per-tile constrained triangulation and its attribute tables.

use log::warn;
use nalgebra::{Point3, Vector3};
use spade::handles::{
    FixedDirectedEdgeHandle, FixedFaceHandle, FixedVertexHandle, InnerTag,
};
use spade::{
    ConstrainedDelaunayTriangulation, Point2, PositionInTriangulation, Triangulation,
};

use crate::dem::{deg_to_mtr_lon, DemGrid, DemMask, DEG_TO_MTR_LAT, NO_DATA};
use crate::error::{Result, TinError};
use crate::mesh::{FaceAttrs, VertexAttrs};

/// The underlying constrained Delaunay triangulation.
///
/// Vertices carry only their position; all terrain attributes live in
/// [`TileMesh`]'s side tables.
pub type Cdt = ConstrainedDelaunayTriangulation<Point2<f64>>;

/// One edge of a face: the neighbor across it, the two shared vertices, and
/// whether the edge is constrained.
#[derive(Debug, Clone, Copy)]
pub struct FaceEdge {
    /// The face on the other side, `None` when it is the outer face.
    pub neighbor: Option<FixedFaceHandle<InnerTag>>,
    /// First shared vertex.
    pub from: FixedVertexHandle,
    /// Second shared vertex.
    pub to: FixedVertexHandle,
    /// Whether this edge was burned in as a constraint.
    pub constrained: bool,
}

/// A constrained Delaunay triangulation of one tile plus terrain attributes.
///
/// Owned exclusively by the builder for the duration of one tile's mesh
/// generation; nothing is shared across tiles. Cross-tile continuity comes
/// from inserting geometrically identical coordinates, never from shared
/// vertices.
pub struct TileMesh {
    pub(crate) cdt: Cdt,
    pub(crate) vertex_attrs: Vec<VertexAttrs>,
    pub(crate) face_attrs: Vec<FaceAttrs>,
    epoch: u64,
    /// Western longitude of the tile.
    pub west: f64,
    /// Southern latitude of the tile.
    pub south: f64,
    /// Eastern longitude of the tile.
    pub east: f64,
    /// Northern latitude of the tile.
    pub north: f64,
}

impl TileMesh {
    /// Create an empty mesh spanning the given tile bounds.
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            cdt: Cdt::new(),
            vertex_attrs: Vec::new(),
            face_attrs: Vec::new(),
            epoch: 0,
            west,
            south,
            east,
            north,
        }
    }

    /// Read-only access to the triangulation.
    #[inline]
    pub fn cdt(&self) -> &Cdt {
        &self.cdt
    }

    /// Number of vertices.
    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.cdt.num_vertices()
    }

    /// Number of finite faces.
    #[inline]
    pub fn num_faces(&self) -> usize {
        self.cdt.num_inner_faces()
    }

    // ==================== Insertion ====================

    fn ensure_vertex_slot(&mut self, v: FixedVertexHandle) {
        if v.index() >= self.vertex_attrs.len() {
            self.vertex_attrs
                .resize_with(v.index() + 1, VertexAttrs::default);
        }
    }

    /// Insert a point with an explicit height.
    ///
    /// Inserting a duplicate coordinate is idempotent: the triangulation
    /// collapses it onto the existing vertex, whose height is re-assigned.
    pub fn insert_raw(&mut self, lon: f64, lat: f64, height: f64) -> Result<FixedVertexHandle> {
        let v = self
            .cdt
            .insert(Point2::new(lon, lat))
            .map_err(|_| TinError::BadInsertion { lon, lat })?;
        self.ensure_vertex_slot(v);
        self.vertex_attrs[v.index()].height = height;
        Ok(v)
    }

    /// Insert the DEM post at grid (x, y) and mark it used.
    pub fn insert_dem_point(
        &mut self,
        dem: &DemGrid,
        used: &mut DemMask,
        x: usize,
        y: usize,
    ) -> Result<FixedVertexHandle> {
        let h = dem.get(x, y);
        debug_assert!(h != NO_DATA, "selected DEM point has no data");
        let v = self.insert_raw(dem.x_to_lon(x as f64), dem.y_to_lat(y as f64), h as f64)?;
        used.set(x, y, true);
        Ok(v)
    }

    /// Insert a non-grid-aligned point with a DEM-interpolated height.
    ///
    /// Falls back to the nearest valid sample when interpolation lands on
    /// missing data.
    pub fn insert_point(&mut self, dem: &DemGrid, lon: f64, lat: f64) -> Result<FixedVertexHandle> {
        let mut e = dem.value_linear(lon, lat);
        if e == NO_DATA {
            e = dem
                .nearest(lon, lat)
                .map(|(v, _, _)| v)
                .ok_or(TinError::BadInsertion { lon, lat })?;
        }
        self.insert_raw(lon, lat, e as f64)
    }

    /// Burn a constrained edge between two existing vertices.
    pub fn add_constraint(&mut self, a: FixedVertexHandle, b: FixedVertexHandle) {
        self.cdt.add_constraint(a, b);
    }

    // ==================== Attribute access ====================

    /// Vertex attributes.
    #[inline]
    pub fn vertex_attr(&self, v: FixedVertexHandle) -> &VertexAttrs {
        &self.vertex_attrs[v.index()]
    }

    /// Mutable vertex attributes.
    #[inline]
    pub fn vertex_attr_mut(&mut self, v: FixedVertexHandle) -> &mut VertexAttrs {
        &mut self.vertex_attrs[v.index()]
    }

    /// Face attributes. Only valid after [`TileMesh::rebuild_face_attrs`].
    #[inline]
    pub fn face_attr(&self, f: FixedFaceHandle<InnerTag>) -> &FaceAttrs {
        &self.face_attrs[f.index()]
    }

    /// Mutable face attributes.
    #[inline]
    pub fn face_attr_mut(&mut self, f: FixedFaceHandle<InnerTag>) -> &mut FaceAttrs {
        &mut self.face_attrs[f.index()]
    }

    /// Reset the face attribute table to match the current topology.
    ///
    /// Face slots are reused by the triangulation as points are inserted, so
    /// this must run after the last insertion and before any classification.
    pub fn rebuild_face_attrs(&mut self) {
        self.face_attrs.clear();
        self.face_attrs
            .resize_with(self.cdt.num_all_faces(), FaceAttrs::default);
    }

    /// Advance the visitation epoch, invalidating every face flag at once.
    pub fn bump_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    // ==================== Geometry & topology ====================

    /// Position of a vertex.
    #[inline]
    pub fn position(&self, v: FixedVertexHandle) -> Point2<f64> {
        self.cdt.vertex(v).position()
    }

    /// 3-D position of a vertex (lon, lat, height).
    #[inline]
    pub fn point3(&self, v: FixedVertexHandle) -> Point3<f64> {
        let p = self.position(v);
        Point3::new(p.x, p.y, self.vertex_attrs[v.index()].height)
    }

    /// Locate a point in the triangulation.
    #[inline]
    pub fn locate(&self, lon: f64, lat: f64) -> PositionInTriangulation {
        self.cdt.locate(Point2::new(lon, lat))
    }

    /// All finite faces.
    pub fn inner_faces(&self) -> Vec<FixedFaceHandle<InnerTag>> {
        self.cdt.inner_faces().map(|f| f.fix()).collect()
    }

    /// All vertices, in insertion order.
    pub fn vertices(&self) -> Vec<FixedVertexHandle> {
        self.cdt.fixed_vertices().collect()
    }

    /// The three vertices of a face, in counter-clockwise order.
    pub fn face_vertices(&self, f: FixedFaceHandle<InnerTag>) -> [FixedVertexHandle; 3] {
        let vs = self.cdt.face(f).vertices();
        [vs[0].fix(), vs[1].fix(), vs[2].fix()]
    }

    /// The three edges of a face with neighbor and constraint information.
    pub fn face_edges(&self, f: FixedFaceHandle<InnerTag>) -> [FaceEdge; 3] {
        let edges = self.cdt.face(f).adjacent_edges();
        edges.map(|e| FaceEdge {
            neighbor: e.rev().face().as_inner().map(|n| n.fix()),
            from: e.from().fix(),
            to: e.to().fix(),
            constrained: self.cdt.is_constraint_edge(e.fix().as_undirected()),
        })
    }

    /// The directed edge from `a` to `b`, if they are adjacent. `None` when
    /// the two vertices are not connected in the triangulation.
    pub fn edge_between(
        &self,
        a: FixedVertexHandle,
        b: FixedVertexHandle,
    ) -> Option<FixedDirectedEdgeHandle> {
        self.cdt.get_edge_from_neighbors(a, b).map(|e| e.fix())
    }

    /// Whether any edge incident to the vertex is constrained.
    pub fn vertex_on_constraint(&self, v: FixedVertexHandle) -> bool {
        self.cdt
            .vertex(v)
            .out_edges()
            .any(|e| self.cdt.is_constraint_edge(e.fix().as_undirected()))
    }

    /// Whether the edge between two adjacent vertices is constrained.
    pub fn is_constrained_between(&self, a: FixedVertexHandle, b: FixedVertexHandle) -> bool {
        self.cdt
            .get_edge_from_neighbors(a, b)
            .map(|e| self.cdt.is_constraint_edge(e.fix().as_undirected()))
            .unwrap_or(false)
    }

    /// Finite faces incident to a vertex, in circulation order.
    pub fn incident_faces(&self, v: FixedVertexHandle) -> Vec<FixedFaceHandle<InnerTag>> {
        self.cdt
            .vertex(v)
            .out_edges()
            .filter_map(|e| e.face().as_inner().map(|f| f.fix()))
            .collect()
    }

    /// Vertices adjacent to a vertex, in circulation order.
    pub fn neighbor_vertices(&self, v: FixedVertexHandle) -> Vec<FixedVertexHandle> {
        self.cdt
            .vertex(v)
            .out_edges()
            .map(|e| e.to().fix())
            .collect()
    }

    /// True when the face touches the convex hull (has an outer neighbor).
    pub fn touches_hull(&self, f: FixedFaceHandle<InnerTag>) -> bool {
        self.cdt
            .face(f)
            .adjacent_edges()
            .iter()
            .any(|e| e.rev().face().as_inner().is_none())
    }

    // ==================== Heights & normals ====================

    /// Height implied by a face's supporting plane at (lon, lat).
    ///
    /// The plane is formed in a local meter frame so lon/lat anisotropy does
    /// not skew the interpolation.
    pub fn height_in_face(&self, f: FixedFaceHandle<InnerTag>, lon: f64, lat: f64) -> f64 {
        let [a, b, c] = self.face_vertices(f);
        let lon_scale = deg_to_mtr_lon(lat);

        let to_m = |v: FixedVertexHandle| {
            let p = self.point3(v);
            Point3::new(p.x * lon_scale, p.y * DEG_TO_MTR_LAT, p.z)
        };
        let p1 = to_m(a);
        let p2 = to_m(b);
        let p3 = to_m(c);

        let n = (p3 - p2).cross(&(p1 - p2));
        if n.z == 0.0 {
            warn!("degenerate face plane at ({lon}, {lat})");
            return p1.z;
        }
        p1.z - ((n.x * (lon * lon_scale - p1.x)) + (n.y * (lat * DEG_TO_MTR_LAT - p1.y))) / n.z
    }

    /// Normal of one face in the local meter frame.
    ///
    /// Degenerate or overhanging faces fall back to straight up, matching
    /// how downstream consumers treat vertical cliffs.
    pub fn face_normal(&self, f: FixedFaceHandle<InnerTag>) -> Vector3<f64> {
        let [a, b, c] = self.face_vertices(f);
        let p1 = self.point3(a);
        let p2 = self.point3(b);
        let p3 = self.point3(c);
        let lon_scale = deg_to_mtr_lon(p1.y);

        let mut v1 = Vector3::new(
            (p2.x - p1.x) * lon_scale,
            (p2.y - p1.y) * DEG_TO_MTR_LAT,
            p2.z - p1.z,
        );
        let mut v2 = Vector3::new(
            (p3.x - p1.x) * lon_scale,
            (p3.y - p1.y) * DEG_TO_MTR_LAT,
            p3.z - p1.z,
        );
        let up = Vector3::new(0.0, 0.0, 1.0);
        if v1.norm_squared() == 0.0 || v2.norm_squared() == 0.0 {
            return up;
        }
        v1.normalize_mut();
        v2.normalize_mut();
        let n = v1.cross(&v2);
        if n.z <= 0.0 {
            up
        } else {
            n.normalize()
        }
    }

    /// Recompute face and vertex normals for the whole mesh.
    ///
    /// Face normals are stored in [`FaceAttrs::normal`]; each vertex normal
    /// is the normalized sum of its incident face normals.
    pub fn calc_normals(&mut self) {
        debug_assert!(
            self.face_attrs.len() >= self.cdt.num_all_faces(),
            "face attrs must be rebuilt before computing normals"
        );
        for f in self.inner_faces() {
            let n = self.face_normal(f);
            self.face_attrs[f.index()].normal = n;
        }
        for v in self.vertices() {
            let mut total = Vector3::zeros();
            for f in self.incident_faces(v) {
                total += self.face_attrs[f.index()].normal;
            }
            let n = if total.norm_squared() == 0.0 {
                Vector3::new(0.0, 0.0, 1.0)
            } else {
                total.normalize()
            };
            self.vertex_attrs[v.index()].normal = n;
        }
    }
}
