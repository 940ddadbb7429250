// ============================================================================
// VIEWPORT TRANSFORM — zoom/pan mapping between screen and canvas space
// ============================================================================
//
// Mapping convention:
//   screen = (canvas + pan) * zoom
//   canvas = screen / zoom - pan
//
// `pan` is stored in canvas units so that panning by a screen delta divides
// by the current zoom. All operations are O(1) and keep every stored value
// finite; non-finite inputs are rejected as no-ops.

use crate::geometry::Point;

pub const MIN_ZOOM: f32 = 0.1;
pub const MAX_ZOOM: f32 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub zoom: f32,
    pub pan: Point,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { zoom: 1.0, pan: Point::ZERO }
    }
}

impl Viewport {
    /// Map a screen-space point into canvas pixel space.
    pub fn to_canvas(&self, screen: Point) -> Point {
        Point::new(screen.x / self.zoom - self.pan.x, screen.y / self.zoom - self.pan.y)
    }

    /// Map a canvas pixel coordinate into screen space.
    pub fn to_screen(&self, canvas: Point) -> Point {
        Point::new(
            (canvas.x + self.pan.x) * self.zoom,
            (canvas.y + self.pan.y) * self.zoom,
        )
    }

    /// Multiply the current zoom by `factor`, clamped to `[0.1, 10]`,
    /// keeping the canvas point under `anchor` fixed on screen.
    ///
    /// The new pan is solved from the fixed-anchor constraint:
    /// `anchor / zoom' - pan' = anchor / zoom - pan`.
    pub fn zoom_by(&mut self, factor: f32, anchor: Point) {
        if !factor.is_finite() || factor <= 0.0 || !anchor.is_finite() {
            return;
        }
        let canvas_anchor = self.to_canvas(anchor);
        self.zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        self.pan = Point::new(
            anchor.x / self.zoom - canvas_anchor.x,
            anchor.y / self.zoom - canvas_anchor.y,
        );
    }

    /// Pan by a screen-space delta (divided by the current zoom).
    /// No bounds clamping — callers may clamp for UX.
    pub fn pan_by(&mut self, delta_screen: Point) {
        if !delta_screen.is_finite() {
            return;
        }
        self.pan = Point::new(
            self.pan.x + delta_screen.x / self.zoom,
            self.pan.y + delta_screen.y / self.zoom,
        );
    }

    /// Back to 100% zoom at the canvas origin.
    pub fn reset(&mut self) {
        *self = Viewport::default();
    }

    /// Fit the whole canvas inside `viewport_size` (screen pixels), centred.
    pub fn fit_to_viewport(&mut self, canvas_size: (u32, u32), viewport_size: Point) {
        let (cw, ch) = canvas_size;
        if cw == 0 || ch == 0 || viewport_size.x <= 0.0 || viewport_size.y <= 0.0 {
            return;
        }
        let scale = (viewport_size.x / cw as f32).min(viewport_size.y / ch as f32);
        self.zoom = scale.clamp(MIN_ZOOM, MAX_ZOOM);
        // Centre: to_screen(0,0) lands at (viewport - canvas*zoom) / 2
        self.pan = Point::new(
            (viewport_size.x - cw as f32 * self.zoom) / (2.0 * self.zoom),
            (viewport_size.y - ch as f32 * self.zoom) / (2.0 * self.zoom),
        );
    }

    /// Canvas-space corners of the visible region for a given screen size.
    /// Used by the compositor for viewport culling.
    pub fn visible_canvas_region(&self, viewport_size: Point) -> (Point, Point) {
        (
            self.to_canvas(Point::ZERO),
            self.to_canvas(viewport_size),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn round_trip_screen_canvas() {
        let mut vp = Viewport::default();
        vp.zoom = 2.5;
        vp.pan = Point::new(13.0, -7.0);
        let s = Point::new(420.0, 69.0);
        let back = vp.to_screen(vp.to_canvas(s));
        assert!(close(back.x, s.x) && close(back.y, s.y));
    }

    #[test]
    fn zoom_clamps_to_range() {
        let mut vp = Viewport::default();
        for _ in 0..20 {
            vp.zoom_by(10.0, Point::ZERO);
        }
        assert!(close(vp.zoom, MAX_ZOOM));
        for _ in 0..40 {
            vp.zoom_by(0.01, Point::ZERO);
        }
        assert!(close(vp.zoom, MIN_ZOOM));
    }

    #[test]
    fn zoom_keeps_anchor_fixed() {
        let mut vp = Viewport::default();
        vp.pan = Point::new(40.0, 10.0);
        let anchor = Point::new(300.0, 200.0);
        let before = vp.to_canvas(anchor);
        vp.zoom_by(1.7, anchor);
        let after = vp.to_canvas(anchor);
        assert!(close(before.x, after.x) && close(before.y, after.y));

        // And again across a clamped zoom step
        vp.zoom_by(100.0, anchor);
        let clamped = vp.to_canvas(anchor);
        assert!(close(before.x, clamped.x) && close(before.y, clamped.y));
    }

    #[test]
    fn pan_divides_by_zoom() {
        let mut vp = Viewport::default();
        vp.zoom = 4.0;
        vp.pan_by(Point::new(40.0, -8.0));
        assert!(close(vp.pan.x, 10.0) && close(vp.pan.y, -2.0));
    }

    #[test]
    fn non_finite_inputs_are_ignored() {
        let mut vp = Viewport::default();
        vp.zoom_by(f32::NAN, Point::ZERO);
        vp.zoom_by(f32::INFINITY, Point::new(f32::NAN, 0.0));
        vp.pan_by(Point::new(f32::INFINITY, 0.0));
        assert_eq!(vp, Viewport::default());
    }

    #[test]
    fn fit_centres_canvas() {
        let mut vp = Viewport::default();
        vp.fit_to_viewport((200, 100), Point::new(400.0, 400.0));
        assert!(close(vp.zoom, 2.0));
        let top_left = vp.to_screen(Point::ZERO);
        let bottom_right = vp.to_screen(Point::new(200.0, 100.0));
        // Horizontal: exactly filled; vertical: centred with 100px margins
        assert!(close(top_left.x, 0.0) && close(bottom_right.x, 400.0));
        assert!(close(top_left.y, 100.0) && close(bottom_right.y, 300.0));
    }
}
