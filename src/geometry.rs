// ============================================================================
// GEOMETRY — shared point / rectangle math for canvas pixel space
// ============================================================================

use serde::{Deserialize, Serialize};

/// A 2D point in either screen or canvas space (the viewport transform maps
/// between the two). Plain `f32` pair — cheap to copy everywhere.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: Point) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Clamp into the canvas pixel range `[0, w-1] × [0, h-1]`.
    pub fn clamp_to_canvas(&self, width: u32, height: u32) -> Point {
        Point {
            x: self.x.clamp(0.0, width.saturating_sub(1) as f32),
            y: self.y.clamp(0.0, height.saturating_sub(1) as f32),
        }
    }
}

/// Axis-aligned rectangle in canvas pixel coordinates.
/// `x`/`y` is the top-left corner; `width`/`height` extend right/down, so the
/// right and bottom edges (`x + width`, `y + height`) are exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Build from inclusive min and exclusive max corners.
    /// Degenerate input (max <= min) yields an empty rect at `min`.
    pub fn from_min_max(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        Self {
            x: min_x,
            y: min_y,
            width: max_x.saturating_sub(min_x),
            height: max_y.saturating_sub(min_y),
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    /// Smallest rectangle covering both `self` and `other`.
    pub fn union(&self, other: PixelRect) -> PixelRect {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return *self;
        }
        let min_x = self.x.min(other.x);
        let min_y = self.y.min(other.y);
        let max_x = self.right().max(other.right());
        let max_y = self.bottom().max(other.bottom());
        PixelRect::from_min_max(min_x, min_y, max_x, max_y)
    }

    /// Overlapping region of `self` and `other`, or `None` when disjoint.
    pub fn intersect(&self, other: PixelRect) -> Option<PixelRect> {
        let min_x = self.x.max(other.x);
        let min_y = self.y.max(other.y);
        let max_x = self.right().min(other.right());
        let max_y = self.bottom().min(other.bottom());
        if min_x >= max_x || min_y >= max_y {
            None
        } else {
            Some(PixelRect::from_min_max(min_x, min_y, max_x, max_y))
        }
    }

    /// Grow minimally to include the pixel at (x, y).
    pub fn include(&self, x: u32, y: u32) -> PixelRect {
        if self.is_empty() {
            return PixelRect::new(x, y, 1, 1);
        }
        PixelRect::from_min_max(
            self.x.min(x),
            self.y.min(y),
            self.right().max(x + 1),
            self.bottom().max(y + 1),
        )
    }

    /// Clip to canvas dimensions. `None` when nothing remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<PixelRect> {
        self.intersect(PixelRect::new(0, 0, width, height))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_covers_both() {
        let a = PixelRect::new(0, 0, 10, 10);
        let b = PixelRect::new(20, 5, 10, 10);
        let u = a.union(b);
        assert_eq!(u, PixelRect::from_min_max(0, 0, 30, 15));
    }

    #[test]
    fn union_with_empty_is_identity() {
        let a = PixelRect::new(3, 4, 5, 6);
        let empty = PixelRect::new(9, 9, 0, 0);
        assert_eq!(a.union(empty), a);
        assert_eq!(empty.union(a), a);
    }

    #[test]
    fn intersect_disjoint_is_none() {
        let a = PixelRect::new(0, 0, 10, 10);
        let b = PixelRect::new(10, 0, 5, 5);
        assert!(a.intersect(b).is_none());
    }

    #[test]
    fn include_grows_minimally() {
        let r = PixelRect::new(5, 5, 2, 2).include(10, 3);
        assert_eq!(r, PixelRect::from_min_max(5, 3, 11, 7));
    }

    #[test]
    fn clamp_to_canvas_point() {
        let p = Point::new(-3.0, 250.0).clamp_to_canvas(100, 200);
        assert_eq!(p, Point::new(0.0, 199.0));
    }
}
