//! The border match file: a tile's persisted edge record.
//!
//! One plain-text file per tile, four sections in west/south/east/north
//! order. A section lists the tile's boundary vertices along that side with
//! their heights and blend levels, interleaved with the base terrain and
//! border set of the face behind each boundary segment, and closes with a
//! `VC` record for the side's final vertex:
//!
//! ```text
//! VT <lon>, <lat>, <height>
//! VBC <count>
//! VB <blend> <terrain-name>     (count times)
//! TERRAIN <terrain-name>
//! BORDER_C <count>
//! BORDER_T <terrain-name>       (count times)
//! ...
//! VC <lon>, <lat>, <height>
//! VBC <count>
//! VB <blend> <terrain-name>
//! ```
//!
//! The file ends with `END`. A missing, truncated, or otherwise unreadable
//! file is "no neighbor data", never an error: tiles must build standalone.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use spade::{Point2, Triangulation};

use crate::algo::border::{
    fetch_border, MatchEdge, MatchVertex, MeshMatch, SIDE_EAST, SIDE_NORTH, SIDE_SOUTH, SIDE_WEST,
};
use crate::error::{Result, TinError};
use crate::mesh::TileMesh;
use crate::terrain::TerrainTable;

/// Round a degree value down to its 10-degree bucket.
pub fn latlon_bucket(p: i32) -> i32 {
    if p > 0 {
        (p / 10) * 10
    } else {
        ((-p + 9) / 10) * -10
    }
}

/// Deterministic path of a tile's border file under `base`:
/// `<bucket-lat><bucket-lon>/<lat><lon>.border.txt`.
pub fn border_file_path(base: &Path, south: i32, west: i32) -> PathBuf {
    base.join(format!(
        "{:+03}{:+04}",
        latlon_bucket(south),
        latlon_bucket(west)
    ))
    .join(format!("{south:+03}{west:+04}.border.txt"))
}

/// Write the tile's border file with all four edge sections.
pub fn save_border_file(mesh: &TileMesh, terrains: &TerrainTable, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = File::create(path).map_err(|e| TinError::BorderWrite {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let mut w = BufWriter::new(file);

    for side in [SIDE_WEST, SIDE_SOUTH, SIDE_EAST, SIDE_NORTH] {
        write_side(mesh, terrains, side, path, &mut w)?;
    }
    writeln!(w, "END")?;
    w.flush()?;
    info!("wrote border file {}", path.display());
    Ok(())
}

fn write_side(
    mesh: &TileMesh,
    terrains: &TerrainTable,
    side: usize,
    path: &Path,
    w: &mut impl Write,
) -> Result<()> {
    let origin = match side {
        SIDE_WEST | SIDE_SOUTH => Point2::new(mesh.west, mesh.south),
        SIDE_EAST => Point2::new(mesh.east, mesh.south),
        _ => Point2::new(mesh.west, mesh.north),
    };
    let pts = fetch_border(mesh, origin, side);
    if pts.len() < 2 {
        return Err(TinError::BorderWrite {
            path: path.to_path_buf(),
            message: format!("side {side} has fewer than two boundary vertices"),
        });
    }

    for i in 0..pts.len() - 1 {
        let v = pts[i].1;
        let p = mesh.position(v);
        // Default float formatting is shortest-round-trip, so coordinates
        // and heights survive the file bit-exactly.
        writeln!(w, "VT {}, {}, {}", p.x, p.y, mesh.vertex_attr(v).height)?;

        // Positive blend levels, plus every incident base terrain at full
        // strength so the neighbor knows what it must be able to continue.
        let mut borders: BTreeMap<crate::terrain::TerrainId, f32> = BTreeMap::new();
        for (&layer, &mix) in &mesh.vertex_attr(v).border_blend {
            if mix > 0.0 {
                let e = borders.entry(layer).or_insert(0.0);
                *e = e.max(mix);
            }
        }
        for f in mesh.incident_faces(v) {
            borders.insert(mesh.face_attr(f).terrain, 1.0);
        }
        writeln!(w, "VBC {}", borders.len())?;
        for (layer, mix) in &borders {
            writeln!(w, "VB {} {}", mix, terrains.name(*layer))?;
        }

        // The face behind the boundary segment to the next vertex.
        let next = pts[i + 1].1;
        let f = mesh
            .edge_between(v, next)
            .and_then(|e| {
                let de = mesh.cdt().directed_edge(e);
                if de.face().is_outer() {
                    de.rev().face().as_inner().map(|f| f.fix())
                } else {
                    de.face().as_inner().map(|f| f.fix())
                }
            })
            .ok_or_else(|| TinError::BorderWrite {
                path: path.to_path_buf(),
                message: format!("no face behind boundary segment at {}, {}", p.x, p.y),
            })?;
        let fa = mesh.face_attr(f);
        writeln!(w, "TERRAIN {}", terrains.name(fa.terrain))?;
        writeln!(w, "BORDER_C {}", fa.border.len())?;
        for layer in &fa.border {
            writeln!(w, "BORDER_T {}", terrains.name(*layer))?;
        }
    }

    let last = pts[pts.len() - 1].1;
    let p = mesh.position(last);
    writeln!(w, "VC {}, {}, {}", p.x, p.y, mesh.vertex_attr(last).height)?;
    let blend = &mesh.vertex_attr(last).border_blend;
    writeln!(w, "VBC {}", blend.len())?;
    for (layer, mix) in blend {
        writeln!(w, "VB {} {}", mix, terrains.name(*layer))?;
    }
    Ok(())
}

/// Load a border file's four sections, in west/south/east/north order.
///
/// Returns `None` for a missing or unparseable file; the caller proceeds
/// with no neighbor data.
pub fn load_match_file(path: &Path, terrains: &TerrainTable) -> Option<[MeshMatch; 4]> {
    let file = File::open(path).ok()?;
    let mut lines = BufReader::new(file).lines().map_while(|l| l.ok());

    let mut out: [MeshMatch; 4] = Default::default();
    for section in &mut out {
        if !read_side(&mut lines, terrains, section) {
            warn!("discarding unreadable border file {}", path.display());
            return None;
        }
    }
    match lines.next() {
        Some(l) if l.trim() == "END" => Some(out),
        _ => {
            warn!("border file {} missing END marker", path.display());
            None
        }
    }
}

fn parse_vertex(line: &str, prefix: &str) -> Option<MatchVertex> {
    let rest = line.strip_prefix(prefix)?;
    let mut parts = rest.split(',').map(str::trim);
    let x: f64 = parts.next()?.parse().ok()?;
    let y: f64 = parts.next()?.parse().ok()?;
    let height: f64 = parts.next()?.parse().ok()?;
    Some(MatchVertex {
        loc: Point2::new(x, y),
        height,
        blending: BTreeMap::new(),
        buddy: None,
    })
}

fn read_side(
    lines: &mut impl Iterator<Item = String>,
    terrains: &TerrainTable,
    dest: &mut MeshMatch,
) -> bool {
    loop {
        let Some(line) = lines.next() else { return false };
        let is_final = line.starts_with("VC ");
        let prefix = if is_final { "VC " } else { "VT " };
        let Some(mut vertex) = parse_vertex(&line, prefix) else {
            return false;
        };

        let Some(vbc) = lines.next() else { return false };
        let Some(count) = vbc.strip_prefix("VBC ").and_then(|c| c.trim().parse::<usize>().ok())
        else {
            return false;
        };
        for _ in 0..count {
            let Some(vb) = lines.next() else { return false };
            let Some(rest) = vb.strip_prefix("VB ") else { return false };
            let mut parts = rest.split_whitespace();
            let (Some(mix), Some(name)) = (parts.next(), parts.next()) else {
                return false;
            };
            let Ok(mix) = mix.parse::<f32>() else { return false };
            let Some(layer) = terrains.lookup(name) else {
                warn!("unknown terrain {name} in border file");
                return false;
            };
            vertex.blending.insert(layer, mix);
        }
        dest.vertices.push(vertex);

        if is_final {
            return true;
        }

        let Some(line) = lines.next() else { return false };
        let Some(name) = line.strip_prefix("TERRAIN ") else { return false };
        let Some(base) = terrains.lookup(name.trim()) else {
            warn!("unknown terrain {} in border file", name.trim());
            return false;
        };
        let mut edge = MatchEdge {
            base,
            borders: Default::default(),
            buddy: None,
        };

        let Some(bc) = lines.next() else { return false };
        let Some(count) = bc
            .strip_prefix("BORDER_C ")
            .and_then(|c| c.trim().parse::<usize>().ok())
        else {
            return false;
        };
        for _ in 0..count {
            let Some(bt) = lines.next() else { return false };
            let Some(name) = bt.strip_prefix("BORDER_T ") else { return false };
            let Some(layer) = terrains.lookup(name.trim()) else {
                warn!("unknown terrain {} in border file", name.trim());
                return false;
            };
            edge.borders.insert(layer);
        }
        dest.edges.push(edge);
    }
}

/// Load the facing sections of up to four finished neighbors.
///
/// The left neighbor's east section becomes this tile's west border, and
/// so on around the compass. Sides with no (readable) neighbor file come
/// back `None`.
pub fn load_neighbor_borders(
    base: &Path,
    south: i32,
    west: i32,
    terrains: &TerrainTable,
) -> [Option<MeshMatch>; 4] {
    let mut result: [Option<MeshMatch>; 4] = Default::default();

    let neighbors = [
        (south, west - 1, SIDE_EAST, SIDE_WEST),
        (south - 1, west, SIDE_NORTH, SIDE_SOUTH),
        (south, west + 1, SIDE_WEST, SIDE_EAST),
        (south + 1, west, SIDE_SOUTH, SIDE_NORTH),
    ];
    for (nb_south, nb_west, their_side, our_side) in neighbors {
        let path = border_file_path(base, nb_south, nb_west);
        if let Some(mut sections) = load_match_file(&path, terrains) {
            let section = std::mem::take(&mut sections[their_side]);
            if !section.is_empty() {
                result[our_side] = Some(section);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_latlon_bucket() {
        assert_eq!(latlon_bucket(37), 30);
        assert_eq!(latlon_bucket(-37), -40);
        assert_eq!(latlon_bucket(0), 0);
        assert_eq!(latlon_bucket(-1), -10);
        assert_eq!(latlon_bucket(10), 10);
    }

    #[test]
    fn test_border_file_path_format() {
        let p = border_file_path(Path::new("borders"), 47, -123);
        assert_eq!(
            p,
            Path::new("borders").join("+40-130").join("+47-123.border.txt")
        );
    }

    fn simple_mesh(terrains: &TerrainTable) -> TileMesh {
        let mut m = TileMesh::new(0.0, 0.0, 1.0, 1.0);
        m.insert_raw(0.0, 0.0, 10.0).unwrap();
        m.insert_raw(1.0, 0.0, 11.0).unwrap();
        m.insert_raw(1.0, 1.0, 12.0).unwrap();
        m.insert_raw(0.0, 1.0, 13.0).unwrap();
        m.insert_raw(0.0, 0.5, 14.0).unwrap();
        m.rebuild_face_attrs();
        for f in m.inner_faces() {
            m.face_attr_mut(f).terrain = terrains.natural();
        }
        m
    }

    #[test]
    fn test_round_trip() {
        let terrains = TerrainTable::new();
        let mesh = simple_mesh(&terrains);

        let dir = TempDir::new().unwrap();
        let path = border_file_path(dir.path(), 0, 0);
        save_border_file(&mesh, &terrains, &path).unwrap();

        let sections = load_match_file(&path, &terrains).unwrap();
        // West side has three vertices (two corners plus the midpoint) and
        // two segments.
        let west = &sections[0];
        assert_eq!(west.vertices.len(), 3);
        assert_eq!(west.edges.len(), 2);
        assert_eq!(west.vertices[0].loc, Point2::new(0.0, 0.0));
        assert_eq!(west.vertices[1].loc, Point2::new(0.0, 0.5));
        assert_eq!(west.vertices[1].height, 14.0);
        assert_eq!(west.vertices[2].loc, Point2::new(0.0, 1.0));
        for e in &west.edges {
            assert_eq!(e.base, terrains.natural());
            assert!(e.borders.is_empty());
        }
        // Boundary vertices see only natural faces, written at 1.0.
        assert_eq!(
            west.vertices[0].blending.get(&terrains.natural()),
            Some(&1.0)
        );

        for side in &sections[1..] {
            assert_eq!(side.vertices.len(), 2);
            assert_eq!(side.edges.len(), 1);
        }
    }

    #[test]
    fn test_missing_file_is_no_data() {
        let terrains = TerrainTable::new();
        assert!(load_match_file(Path::new("/nonexistent/x.border.txt"), &terrains).is_none());
    }

    #[test]
    fn test_truncated_file_is_no_data() {
        let terrains = TerrainTable::new();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.border.txt");
        std::fs::write(&path, "VT 0.0, 0.0, 10.0\nVBC 1\n").unwrap();
        assert!(load_match_file(&path, &terrains).is_none());
    }

    #[test]
    fn test_neighbor_borders_pick_facing_section() {
        let terrains = TerrainTable::new();
        let mesh = simple_mesh(&terrains);
        let dir = TempDir::new().unwrap();

        // Pretend this tile sits at (0, -1): it becomes the left neighbor
        // of tile (0, 0).
        let path = border_file_path(dir.path(), 0, -1);
        save_border_file(&mesh, &terrains, &path).unwrap();

        let borders = load_neighbor_borders(dir.path(), 0, 0, &terrains);
        let west = borders[0].as_ref().expect("west neighbor data");
        // The neighbor's east section: two corner vertices at lon 1.0.
        assert_eq!(west.vertices.len(), 2);
        assert!(west.vertices.iter().all(|v| v.loc.x == 1.0));
        assert!(borders[1].is_none() && borders[2].is_none() && borders[3].is_none());
    }
}
