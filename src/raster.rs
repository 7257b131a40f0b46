//! Scanline polygon rasterization.
//!
//! A [`PolyRasterizer`] converts a set of polygon boundary segments into
//! per-scanline inside intervals, using the classic active-edge-table sweep.
//! The tile builder uses it to find which DEM posts fall inside water bodies
//! so a sparse mesh can be seeded under water.
//!
//! Segments are supplied in grid coordinates with the first endpoint below
//! the second; horizontal segments contribute nothing and are dropped by the
//! caller.

/// One upward-pointing boundary segment in grid coordinates.
#[derive(Debug, Clone, Copy)]
pub struct RasterSegment {
    /// X at the lower endpoint.
    pub x1: f64,
    /// Y at the lower endpoint.
    pub y1: f64,
    /// X at the upper endpoint.
    pub x2: f64,
    /// Y at the upper endpoint.
    pub y2: f64,
}

impl RasterSegment {
    /// Create a segment, swapping endpoints so y1 <= y2.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        if y1 <= y2 {
            Self { x1, y1, x2, y2 }
        } else {
            Self {
                x1: x2,
                y1: y2,
                x2: x1,
                y2: y1,
            }
        }
    }

    fn x_at(&self, y: f64) -> f64 {
        if self.y2 == self.y1 {
            self.x1
        } else {
            self.x1 + (self.x2 - self.x1) * (y - self.y1) / (self.y2 - self.y1)
        }
    }
}

/// Active-edge-table scanline rasterizer.
#[derive(Debug, Clone, Default)]
pub struct PolyRasterizer {
    /// All boundary segments, sorted by lower y once sealed.
    masters: Vec<RasterSegment>,
    /// Index of the first master not yet activated.
    unused: usize,
    /// Crossing x positions on the current scanline, sorted.
    actives: Vec<f64>,
    current_y: f64,
}

impl PolyRasterizer {
    /// Create an empty rasterizer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one boundary segment. Horizontal segments are ignored.
    pub fn add_segment(&mut self, x1: f64, y1: f64, x2: f64, y2: f64) {
        if y1 != y2 {
            self.masters.push(RasterSegment::new(x1, y1, x2, y2));
        }
    }

    /// Sort segments by lower endpoint; must be called before scanning.
    pub fn seal(&mut self) {
        self.masters
            .sort_by(|a, b| (a.y1, a.x1).partial_cmp(&(b.y1, b.x1)).unwrap());
        self.unused = 0;
        self.actives.clear();
    }

    /// Begin scanning at row `y`.
    pub fn start_scanline(&mut self, y: usize) {
        self.current_y = y as f64;
        self.recalc_actives();
    }

    /// Advance to row `y` (must be monotonically increasing).
    pub fn advance_scanline(&mut self, y: usize) {
        self.current_y = y as f64;
        self.recalc_actives();
    }

    /// True once every segment lies entirely below the current scanline.
    pub fn done_scan(&self) -> bool {
        self.actives.is_empty() && self.unused >= self.masters.len()
    }

    /// Integer inside-ranges `[x1, x2)` of the current scanline, left to right.
    pub fn ranges(&self) -> Vec<(i64, i64)> {
        let mut out = Vec::new();
        let mut i = 0;
        while i + 1 < self.actives.len() {
            let x1 = self.actives[i].ceil() as i64;
            let x2 = self.actives[i + 1].ceil() as i64;
            if x1 < x2 {
                out.push((x1, x2));
            }
            i += 2;
        }
        out
    }

    fn recalc_actives(&mut self) {
        let y = self.current_y;
        while self.unused < self.masters.len() && self.masters[self.unused].y1 <= y {
            self.unused += 1;
        }
        self.actives.clear();
        // A segment crosses the scanline when y1 <= y < y2.
        for seg in &self.masters[..self.unused] {
            if seg.y1 <= y && y < seg.y2 {
                self.actives.push(seg.x_at(y));
            }
        }
        self.actives.sort_by(|a, b| a.partial_cmp(b).unwrap());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_rasterizer() -> PolyRasterizer {
        // Rectangle from (2, 1) to (6, 4) in grid coordinates.
        let mut r = PolyRasterizer::new();
        r.add_segment(2.0, 1.0, 2.0, 4.0);
        r.add_segment(6.0, 1.0, 6.0, 4.0);
        r.add_segment(2.0, 1.0, 6.0, 1.0); // dropped (horizontal)
        r.add_segment(2.0, 4.0, 6.0, 4.0); // dropped (horizontal)
        r.seal();
        r
    }

    #[test]
    fn test_rect_fill() {
        let mut r = rect_rasterizer();
        let mut hits = Vec::new();
        let mut y = 0;
        r.start_scanline(y);
        while !r.done_scan() {
            for (x1, x2) in r.ranges() {
                for x in x1..x2 {
                    hits.push((x, y as i64));
                }
            }
            y += 1;
            if y >= 10 {
                break;
            }
            r.advance_scanline(y);
        }
        // Rows 1..=3 inclusive, columns 2..=5.
        assert_eq!(hits.len(), 3 * 4);
        assert!(hits.contains(&(2, 1)));
        assert!(hits.contains(&(5, 3)));
        assert!(!hits.contains(&(6, 2)));
        assert!(!hits.contains(&(3, 4)));
    }

    #[test]
    fn test_triangle_fill_narrows() {
        let mut r = PolyRasterizer::new();
        // Triangle (0,0) (8,0) (0,8): hypotenuse x = 8 - y.
        r.add_segment(0.0, 0.0, 0.0, 8.0);
        r.add_segment(8.0, 0.0, 0.0, 8.0);
        r.seal();
        r.start_scanline(2);
        let ranges = r.ranges();
        assert_eq!(ranges, vec![(0, 6)]);
        r.advance_scanline(6);
        assert_eq!(r.ranges(), vec![(0, 2)]);
    }
}
