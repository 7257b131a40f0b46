//! Per-vertex and per-face mesh attributes.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::Vector3;

use crate::map::MapFaceId;
use crate::terrain::TerrainId;

/// Attributes carried by one triangulation vertex.
///
/// The 2-D position lives inside the triangulation and is immutable once
/// inserted; everything here is mutable terrain state layered on top.
#[derive(Debug, Clone)]
pub struct VertexAttrs {
    /// Elevation in meters, set at insertion and by later conforming passes.
    pub height: f64,
    /// Unit surface normal, recomputed once geometry is final.
    pub normal: Vector3<f64>,
    /// Border-terrain fade levels in [0, 1].
    ///
    /// Weights are independent per-layer attenuations; they are not a
    /// partition and never need to sum to one. Kept ordered so every
    /// iteration over blends is deterministic.
    pub border_blend: BTreeMap<TerrainId, f32>,
}

impl Default for VertexAttrs {
    fn default() -> Self {
        Self {
            height: 0.0,
            normal: Vector3::new(0.0, 0.0, 1.0),
            border_blend: BTreeMap::new(),
        }
    }
}

impl VertexAttrs {
    /// Current fade level for a border layer (0 when absent).
    #[inline]
    pub fn blend(&self, layer: TerrainId) -> f32 {
        self.border_blend.get(&layer).copied().unwrap_or(0.0)
    }

    /// Ensure a blend entry exists without lowering an existing level.
    #[inline]
    pub fn ensure_blend(&mut self, layer: TerrainId) {
        self.border_blend.entry(layer).or_insert(0.0);
    }
}

/// Attributes carried by one finite triangulation face.
#[derive(Debug, Clone)]
pub struct FaceAttrs {
    /// Base terrain. [`TerrainId::INVALID`] until classification runs.
    pub terrain: TerrainId,
    /// Feature terrain copied from the originating burned-in constraint.
    pub feature: TerrainId,
    /// Border terrains present on this face, each resolvable to per-vertex
    /// blends.
    pub border: BTreeSet<TerrainId>,
    /// Visitation epoch. A face counts as visited when this equals the
    /// mesh's current epoch counter; passes invalidate all flags at once by
    /// bumping the counter instead of clearing per-face state.
    pub flag: u64,
    /// Face normal in the local meter frame.
    pub normal: Vector3<f64>,
    /// Map polygon this face was classified from, for resolving
    /// neighbor-priority conflicts.
    pub orig_face: Option<MapFaceId>,
}

impl Default for FaceAttrs {
    fn default() -> Self {
        Self {
            terrain: TerrainId::INVALID,
            feature: TerrainId::INVALID,
            border: BTreeSet::new(),
            flag: 0,
            normal: Vector3::new(0.0, 0.0, 1.0),
            orig_face: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blend_defaults_to_zero() {
        let mut v = VertexAttrs::default();
        let layer = TerrainId::INVALID;
        assert_eq!(v.blend(layer), 0.0);
        v.border_blend.insert(layer, 0.75);
        assert_eq!(v.blend(layer), 0.75);
    }

    #[test]
    fn test_ensure_blend_keeps_existing() {
        let mut v = VertexAttrs::default();
        let layer = TerrainId::INVALID;
        v.border_blend.insert(layer, 0.5);
        v.ensure_blend(layer);
        assert_eq!(v.blend(layer), 0.5);
    }
}
