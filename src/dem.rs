//! Raster digital elevation model.
//!
//! A [`DemGrid`] is a rectangular grid of `f32` samples with geographic
//! bounds. Samples follow the post convention: sample (0, 0) sits exactly on
//! the southwest corner and sample (width-1, height-1) on the northeast
//! corner, so grid spacing is `(east - west) / (width - 1)`.
//!
//! Missing data is represented by the [`NO_DATA`] sentinel rather than an
//! error; consumers are expected to fall back to the nearest valid sample.

/// Sentinel value for a missing elevation sample.
pub const NO_DATA: f32 = -32768.0;

/// Meters per degree of latitude (60 nm of 1852 m each).
pub const DEG_TO_MTR_LAT: f64 = 111_120.0;

/// Meters per degree of longitude at the given latitude.
#[inline]
pub fn deg_to_mtr_lon(lat: f64) -> f64 {
    DEG_TO_MTR_LAT * lat.to_radians().cos()
}

/// A rectangular grid of elevation samples with geographic bounds.
#[derive(Debug, Clone)]
pub struct DemGrid {
    width: usize,
    height: usize,
    /// Western longitude of the grid.
    pub west: f64,
    /// Southern latitude of the grid.
    pub south: f64,
    /// Eastern longitude of the grid.
    pub east: f64,
    /// Northern latitude of the grid.
    pub north: f64,
    data: Vec<f32>,
}

impl DemGrid {
    /// Create a grid filled with [`NO_DATA`].
    pub fn new(width: usize, height: usize, west: f64, south: f64, east: f64, north: f64) -> Self {
        assert!(width >= 2 && height >= 2, "DEM must span at least 2x2 posts");
        Self {
            width,
            height,
            west,
            south,
            east,
            north,
            data: vec![NO_DATA; width * height],
        }
    }

    /// Create a grid filled with a constant elevation.
    pub fn filled(
        width: usize,
        height: usize,
        west: f64,
        south: f64,
        east: f64,
        north: f64,
        value: f32,
    ) -> Self {
        let mut g = Self::new(width, height, west, south, east, north);
        g.data.fill(value);
        g
    }

    /// Number of columns.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Fetch the sample at (x, y), or [`NO_DATA`] outside the grid.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        if x >= self.width || y >= self.height {
            return NO_DATA;
        }
        self.data[y * self.width + x]
    }

    /// Store a sample at (x, y).
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: f32) {
        assert!(x < self.width && y < self.height);
        self.data[y * self.width + x] = v;
    }

    /// Longitude of grid column `x`.
    #[inline]
    pub fn x_to_lon(&self, x: f64) -> f64 {
        self.west + (self.east - self.west) * x / (self.width - 1) as f64
    }

    /// Latitude of grid row `y`.
    #[inline]
    pub fn y_to_lat(&self, y: f64) -> f64 {
        self.south + (self.north - self.south) * y / (self.height - 1) as f64
    }

    /// Fractional grid column of a longitude.
    #[inline]
    pub fn lon_to_x(&self, lon: f64) -> f64 {
        (lon - self.west) / (self.east - self.west) * (self.width - 1) as f64
    }

    /// Fractional grid row of a latitude.
    #[inline]
    pub fn lat_to_y(&self, lat: f64) -> f64 {
        (lat - self.south) / (self.north - self.south) * (self.height - 1) as f64
    }

    /// Bilinear interpolation at a geographic location.
    ///
    /// Returns [`NO_DATA`] if any contributing sample is missing or the
    /// location is outside the grid.
    pub fn value_linear(&self, lon: f64, lat: f64) -> f32 {
        let fx = self.lon_to_x(lon);
        let fy = self.lat_to_y(lat);
        if fx < 0.0 || fy < 0.0 || fx > (self.width - 1) as f64 || fy > (self.height - 1) as f64 {
            return NO_DATA;
        }
        let x0 = (fx.floor() as usize).min(self.width - 2);
        let y0 = (fy.floor() as usize).min(self.height - 2);
        let dx = (fx - x0 as f64) as f32;
        let dy = (fy - y0 as f64) as f32;

        let v00 = self.get(x0, y0);
        let v10 = self.get(x0 + 1, y0);
        let v01 = self.get(x0, y0 + 1);
        let v11 = self.get(x0 + 1, y0 + 1);
        if v00 == NO_DATA || v10 == NO_DATA || v01 == NO_DATA || v11 == NO_DATA {
            return NO_DATA;
        }
        let bottom = v00 + (v10 - v00) * dx;
        let top = v01 + (v11 - v01) * dx;
        bottom + (top - bottom) * dy
    }

    /// Nearest valid sample to a geographic location.
    ///
    /// Searches outward in growing rings from the closest grid post and
    /// returns the value together with its grid coordinates, or `None` if
    /// the whole grid is empty.
    pub fn nearest(&self, lon: f64, lat: f64) -> Option<(f32, usize, usize)> {
        let cx = self
            .lon_to_x(lon)
            .round()
            .clamp(0.0, (self.width - 1) as f64) as i64;
        let cy = self
            .lat_to_y(lat)
            .round()
            .clamp(0.0, (self.height - 1) as f64) as i64;

        let max_r = self.width.max(self.height) as i64;
        for r in 0..=max_r {
            let mut best: Option<(i64, (f32, usize, usize))> = None;
            for y in (cy - r).max(0)..=(cy + r).min(self.height as i64 - 1) {
                for x in (cx - r).max(0)..=(cx + r).min(self.width as i64 - 1) {
                    if (x - cx).abs() != r && (y - cy).abs() != r {
                        continue; // interior of the ring was covered earlier
                    }
                    let v = self.get(x as usize, y as usize);
                    if v != NO_DATA {
                        let d2 = (x - cx) * (x - cx) + (y - cy) * (y - cy);
                        if best.map_or(true, |(bd, _)| d2 < bd) {
                            best = Some((d2, (v, x as usize, y as usize)));
                        }
                    }
                }
            }
            if let Some((_, hit)) = best {
                return Some(hit);
            }
        }
        None
    }

    /// Replace every [`NO_DATA`] sample with its nearest valid neighbor.
    pub fn fill_nearest(&mut self) {
        let src = self.clone();
        for y in 0..self.height {
            for x in 0..self.width {
                if self.get(x, y) == NO_DATA {
                    if let Some((v, _, _)) =
                        src.nearest(src.x_to_lon(x as f64), src.y_to_lat(y as f64))
                    {
                        self.set(x, y, v);
                    }
                }
            }
        }
    }
}

/// A per-sample boolean mask over the same grid shape as a [`DemGrid`].
///
/// Used to remember which DEM posts have already been promoted to mesh
/// vertices so no point is ever inserted twice.
#[derive(Debug, Clone)]
pub struct DemMask {
    width: usize,
    height: usize,
    bits: Vec<bool>,
}

impl DemMask {
    /// Create an all-false mask matching `width` x `height`.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width * height],
        }
    }

    /// Number of columns.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Query the mask at (x, y).
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.bits[y * self.width + x]
    }

    /// Set the mask at (x, y).
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, used: bool) {
        self.bits[y * self.width + x] = used;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> DemGrid {
        let mut g = DemGrid::new(3, 3, 0.0, 0.0, 1.0, 1.0);
        for y in 0..3 {
            for x in 0..3 {
                g.set(x, y, (x + y * 3) as f32);
            }
        }
        g
    }

    #[test]
    fn test_coordinate_mapping() {
        let g = grid();
        assert_eq!(g.x_to_lon(0.0), 0.0);
        assert_eq!(g.x_to_lon(2.0), 1.0);
        assert_eq!(g.lon_to_x(0.5), 1.0);
        assert_eq!(g.lat_to_y(1.0), 2.0);
    }

    #[test]
    fn test_value_linear() {
        let g = grid();
        assert_eq!(g.value_linear(0.0, 0.0), 0.0);
        assert_eq!(g.value_linear(1.0, 1.0), 8.0);
        // Center of the grid: average of all four middle-cell corners.
        assert!((g.value_linear(0.25, 0.25) - 2.0).abs() < 1e-6);
        assert_eq!(g.value_linear(2.0, 0.0), NO_DATA);
    }

    #[test]
    fn test_nearest_skips_no_data() {
        let mut g = grid();
        g.set(0, 0, NO_DATA);
        let (v, x, y) = g.nearest(0.0, 0.0).unwrap();
        assert_ne!(v, NO_DATA);
        assert!(x <= 1 && y <= 1);
    }

    #[test]
    fn test_fill_nearest() {
        let mut g = grid();
        g.set(1, 1, NO_DATA);
        g.fill_nearest();
        assert_ne!(g.get(1, 1), NO_DATA);
    }

    #[test]
    fn test_mask() {
        let mut m = DemMask::new(4, 4);
        assert!(!m.get(2, 3));
        m.set(2, 3, true);
        assert!(m.get(2, 3));
    }
}
