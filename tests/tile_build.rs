//! End-to-end tile build scenarios exercised through the public API.

use nalgebra::Point2;
use tempfile::TempDir;
use terratin::algo::border::{fetch_border, SIDE_EAST, SIDE_WEST};
use terratin::algo::march::{height_at, march_start, march_to};
use terratin::map::UNBOUNDED_FACE;
use terratin::prelude::*;

fn flat_dem(n: usize) -> DemGrid {
    DemGrid::filled(n, n, 0.0, 0.0, 1.0, 1.0, 100.0)
}

/// A map whose southwest quadrant is water, built as a proper subdivision:
/// boundary segments carry the face actually behind them.
fn quadrant_water_map(terrains: &TerrainTable) -> VectorMap {
    let mut map = VectorMap::new();
    let land = map.add_face(terrains.natural(), None);
    let water = map.add_face(terrains.water(), None);

    let pts = |coords: &[(f64, f64)]| -> Vec<Point2<f64>> {
        coords.iter().map(|&(x, y)| Point2::new(x, y)).collect()
    };
    for w in pts(&[(0.0, 0.0), (0.5, 0.0)]).windows(2) {
        map.add_edge(w[0], w[1], water, UNBOUNDED_FACE);
    }
    for w in pts(&[(0.5, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.5)]).windows(2) {
        map.add_edge(w[0], w[1], land, UNBOUNDED_FACE);
    }
    for w in pts(&[(0.0, 0.5), (0.0, 0.0)]).windows(2) {
        map.add_edge(w[0], w[1], water, UNBOUNDED_FACE);
    }
    for w in pts(&[(0.5, 0.0), (0.5, 0.5), (0.0, 0.5)]).windows(2) {
        map.add_edge(w[0], w[1], water, land);
    }
    map
}

#[test]
fn water_quadrant_classifies_and_blends() {
    let terrains = TerrainTable::new();
    let mut map = quadrant_water_map(&terrains);
    let dem = flat_dem(11);
    let prefs = MeshPrefs::default();

    let (mesh, stats) =
        build_tile_mesh_with_borders(&mut map, &dem, &terrains, &prefs, Default::default())
            .unwrap();

    assert!(
        stats.wet_ratio > 0.15 && stats.wet_ratio < 0.35,
        "wet ratio {} should be near one quarter",
        stats.wet_ratio
    );
    for f in mesh.inner_faces() {
        let [a, b, c] = mesh.face_vertices(f);
        let (pa, pb, pc) = (mesh.position(a), mesh.position(b), mesh.position(c));
        let cx = (pa.x + pb.x + pc.x) / 3.0;
        let cy = (pa.y + pb.y + pc.y) / 3.0;
        let fa = mesh.face_attr(f);
        if cx < 0.5 && cy < 0.5 {
            assert_eq!(fa.terrain, terrains.water());
            // Water never carries blend layers.
            assert!(fa.border.is_empty());
        } else {
            assert_eq!(fa.terrain, terrains.natural());
        }
    }
}

#[test]
fn neighbor_seam_reproduced_exactly() {
    // Both tiles sample the same height field so corners agree.
    let field = |lat: f64| (lat * 10.0) as f32;
    let make_dem = |west: f64| {
        let mut dem = DemGrid::new(11, 11, west, 0.0, west + 1.0, 1.0);
        for y in 0..11 {
            for x in 0..11 {
                dem.set(x, y, field(y as f64 / 10.0));
            }
        }
        dem
    };

    let dir = TempDir::new().unwrap();
    let terrains = TerrainTable::new();
    let prefs = MeshPrefs::default();

    let mut map_a = VectorMap::new();
    let dem_a = make_dem(0.0);
    let mut ctx_a = TileBuildContext::new(0, 0)
        .with_border_dir(dir.path())
        .load_neighbors(&terrains);
    let (mesh_a, _) = build_tile_mesh(&mut map_a, &dem_a, &terrains, &prefs, &mut ctx_a).unwrap();

    let mut map_b = VectorMap::new();
    let dem_b = make_dem(1.0);
    let mut ctx_b = TileBuildContext::new(0, 1)
        .with_border_dir(dir.path())
        .load_neighbors(&terrains);
    assert!(ctx_b.borders[0].is_some(), "tile A's edge must be visible");
    let (mesh_b, _) = build_tile_mesh(&mut map_b, &dem_b, &terrains, &prefs, &mut ctx_b).unwrap();

    let east_a = fetch_border(&mesh_a, spade::Point2::new(1.0, 0.0), SIDE_EAST);
    let west_b = fetch_border(&mesh_b, spade::Point2::new(1.0, 0.0), SIDE_WEST);
    assert_eq!(east_a.len(), west_b.len());
    // Coordinates and heights round-trip through the border file
    // bit-exactly, so the seam must agree exactly.
    for ((_, va), (_, vb)) in east_a.iter().zip(&west_b) {
        let pa = mesh_a.point3(*va);
        let pb = mesh_b.point3(*vb);
        assert_eq!(pa.x, pb.x);
        assert_eq!(pa.y, pb.y);
        assert_eq!(pa.z, pb.z, "seam height differs at lat {}", pa.y);
    }
}

#[test]
fn march_across_built_tile() {
    let terrains = TerrainTable::new();
    let mut map = VectorMap::new();
    let mut dem = DemGrid::new(11, 11, 0.0, 0.0, 1.0, 1.0);
    for y in 0..11 {
        for x in 0..11 {
            dem.set(x, y, (x as f32) * 10.0);
        }
    }
    let prefs = MeshPrefs::default();
    let (mesh, _) =
        build_tile_mesh_with_borders(&mut map, &dem, &terrains, &prefs, Default::default())
            .unwrap();

    let mut ctx = march_start(&mesh, 0.05, 0.5);
    let pts = march_to(&mesh, &mut ctx, 0.95, 0.5).unwrap();
    assert!(pts.len() >= 2);
    let first = pts.first().unwrap();
    let last = pts.last().unwrap();
    assert_eq!((first.x, first.y), (0.05, 0.5));
    assert_eq!((last.x, last.y), (0.95, 0.5));
    // The surface is a plane in x, so every emitted point lies on it.
    for p in &pts {
        assert!((p.z - p.x * 100.0).abs() < 1e-6, "off-plane point {p:?}");
    }
    assert!((last.z - height_at(&mesh, 0.95, 0.5)).abs() < 1e-9);

    // A second march reuses the context without a fresh locate.
    let more = march_to(&mesh, &mut ctx, 0.95, 0.9).unwrap();
    assert_eq!(more.last().map(|p| (p.x, p.y)), Some((0.95, 0.9)));
}
