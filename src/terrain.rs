//! Terrain tokens, priorities, and transition distances.
//!
//! Terrain types are interned strings. The [`TerrainTable`] owns the
//! name-to-id mapping plus the two rule inputs the mesh algorithms need:
//!
//! - a **priority total order** — for any two distinct terrains, exactly one
//!   is lower priority than the other; borders always fade from a higher
//!   priority terrain out over a lower priority one, and
//! - a per-terrain **transition distance** in meters — the width of the
//!   blended band a terrain projects onto its lower-priority neighbors. A
//!   pair's effective distance is the minimum of the two, scaled by the
//!   receiving face's vertical normal; zero on either side disables blending
//!   for the pair entirely.

use std::collections::HashMap;

/// An interned terrain identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct TerrainId(u32);

impl TerrainId {
    /// Sentinel for "not yet classified".
    pub const INVALID: TerrainId = TerrainId(u32::MAX);

    /// Raw index value.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Check this is not the unassigned sentinel.
    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }
}

impl std::fmt::Debug for TerrainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "T({})", self.0)
        } else {
            write!(f, "T(INVALID)")
        }
    }
}

#[derive(Debug, Clone)]
struct TerrainInfo {
    name: String,
    /// Position in the priority total order; a smaller rank is lower priority.
    rank: i32,
    /// Maximum blended-transition distance in meters. Zero disables blending.
    transition_dist: f64,
}

/// The interning table plus terrain rules.
///
/// The table always contains the two reserved terrains [`TerrainTable::natural`]
/// (the generic pre-classification default, lowest priority) and
/// [`TerrainTable::water`] (which never blends).
#[derive(Debug, Clone)]
pub struct TerrainTable {
    info: Vec<TerrainInfo>,
    index: HashMap<String, TerrainId>,
    natural: TerrainId,
    water: TerrainId,
}

impl Default for TerrainTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TerrainTable {
    /// Create a table holding only the reserved terrains.
    pub fn new() -> Self {
        let mut t = Self {
            info: Vec::new(),
            index: HashMap::new(),
            natural: TerrainId::INVALID,
            water: TerrainId::INVALID,
        };
        t.natural = t.intern("natural", i32::MIN, 1000.0);
        t.water = t.intern("water", i32::MIN + 1, 0.0);
        t
    }

    /// The generic "natural" terrain every face starts with.
    #[inline]
    pub fn natural(&self) -> TerrainId {
        self.natural
    }

    /// The water terrain. Water never carries or receives borders.
    #[inline]
    pub fn water(&self) -> TerrainId {
        self.water
    }

    /// Intern a terrain name with its priority rank and transition distance.
    ///
    /// Re-interning an existing name updates its rules and returns the
    /// existing id.
    pub fn intern(&mut self, name: &str, rank: i32, transition_dist: f64) -> TerrainId {
        if let Some(&id) = self.index.get(name) {
            let rec = &mut self.info[id.index()];
            rec.rank = rank;
            rec.transition_dist = transition_dist;
            return id;
        }
        let id = TerrainId(self.info.len() as u32);
        self.info.push(TerrainInfo {
            name: name.to_string(),
            rank,
            transition_dist,
        });
        self.index.insert(name.to_string(), id);
        id
    }

    /// Resolve a terrain name, if present.
    pub fn lookup(&self, name: &str) -> Option<TerrainId> {
        self.index.get(name).copied()
    }

    /// The name a terrain id was interned under.
    pub fn name(&self, id: TerrainId) -> &str {
        &self.info[id.index()].name
    }

    /// Number of interned terrains (including the reserved ones).
    pub fn len(&self) -> usize {
        self.info.len()
    }

    /// Whether the table holds only the reserved terrains.
    pub fn is_empty(&self) -> bool {
        self.info.len() <= 2
    }

    /// True when `a` is strictly lower priority than `b`.
    ///
    /// The (rank, id) pair makes this a total order: for distinct terrains
    /// exactly one direction holds, even when ranks collide.
    #[inline]
    pub fn is_lower_priority(&self, a: TerrainId, b: TerrainId) -> bool {
        if a == b {
            return false;
        }
        let ka = (self.info[a.index()].rank, a.0);
        let kb = (self.info[b.index()].rank, b.0);
        ka < kb
    }

    /// True when either terrain of a pair has a zero transition distance.
    #[inline]
    pub fn has_no_transition(&self, a: TerrainId, b: TerrainId) -> bool {
        self.info[a.index()].transition_dist == 0.0 || self.info[b.index()].transition_dist == 0.0
    }

    /// Maximum transition distance for a terrain pair, in meters.
    ///
    /// The pair distance is the minimum of the two per-terrain distances,
    /// attenuated by the receiving face's vertical normal component, so
    /// steep faces get narrower transition bands.
    pub fn transition_dist(&self, a: TerrainId, b: TerrainId, z_normal: f64) -> f64 {
        let d1 = self.info[a.index()].transition_dist;
        let d2 = self.info[b.index()].transition_dist;
        d1.min(d2) * z_normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_terrains() {
        let t = TerrainTable::new();
        assert_eq!(t.lookup("natural"), Some(t.natural()));
        assert_eq!(t.lookup("water"), Some(t.water()));
        assert!(t.is_lower_priority(t.natural(), t.water()));
    }

    #[test]
    fn test_intern_round_trip() {
        let mut t = TerrainTable::new();
        let grass = t.intern("grass", 10, 500.0);
        let rock = t.intern("rock", 20, 300.0);
        assert_eq!(t.name(grass), "grass");
        assert_eq!(t.lookup("rock"), Some(rock));
        assert_eq!(t.intern("grass", 10, 500.0), grass);
    }

    #[test]
    fn test_priority_total_order() {
        let mut t = TerrainTable::new();
        let a = t.intern("a", 5, 100.0);
        let b = t.intern("b", 5, 100.0);
        // Equal ranks still order deterministically, exactly one way.
        assert!(t.is_lower_priority(a, b) != t.is_lower_priority(b, a));
        assert!(!t.is_lower_priority(a, a));
    }

    #[test]
    fn test_transition_distances() {
        let mut t = TerrainTable::new();
        let a = t.intern("a", 5, 400.0);
        let b = t.intern("b", 6, 100.0);
        assert_eq!(t.transition_dist(a, b, 1.0), 100.0);
        assert_eq!(t.transition_dist(a, b, 0.5), 50.0);
        assert!(t.has_no_transition(a, t.water()));
        assert!(!t.has_no_transition(a, b));
    }
}
