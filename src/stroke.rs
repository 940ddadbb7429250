// ============================================================================
// STROKE RASTERIZER — points + tool parameters → mask buffer mutations
// ============================================================================
//
// A closed set of tool variants, each with its own way of touching the
// active layer's MaskBuffer:
//   Brush   — capsule (segment + round caps) stamps, union (max) alpha
//   Eraser  — same footprint, writes 0 (clears, never blends)
//   Outline — accumulates points, commits a scan-line even-odd fill on close
//   Segmentation — stamps a provider-produced alpha region verbatim

use crate::error::ToolError;
use crate::geometry::{PixelRect, Point};
use crate::mask::MaskBuffer;

pub const MIN_BRUSH_SIZE: f32 = 5.0;
pub const MAX_BRUSH_SIZE: f32 = 100.0;

/// Brush/eraser parameters. `size` is the footprint diameter in canvas
/// pixels, clamped to [5, 100] on construction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BrushSettings {
    pub size: f32,
    /// 0 = fully soft falloff, 1 = hard edge.
    pub hardness: f32,
    /// 0 = raw input, 1 = full speed-adaptive smoothing.
    pub smoothing: f32,
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self { size: 20.0, hardness: 0.8, smoothing: 0.5 }
    }
}

impl BrushSettings {
    pub fn with_size(size: f32) -> Self {
        Self { size: size.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE), ..Self::default() }
    }

    pub fn radius(&self) -> f32 {
        self.size.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE) / 2.0
    }
}

/// The active drawing tool. A closed enum rather than trait objects: the
/// tool set is fixed and each arm stays independently testable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Tool {
    Brush(BrushSettings),
    Eraser(BrushSettings),
    Outline,
    Segmentation,
}

impl Tool {
    pub fn is_freehand(&self) -> bool {
        matches!(self, Tool::Brush(_) | Tool::Eraser(_))
    }
}

/// Soft-edged brush footprint alpha for a pixel at `dist` from the stroke
/// spine. Inside the hardness core it is 1.0, then falls off with a
/// smoothstep to 0 at the radius.
fn footprint_alpha(dist: f32, radius: f32, hardness: f32) -> f32 {
    if dist > radius {
        return 0.0;
    }
    let t = (dist / radius).clamp(0.0, 1.0);
    let hard_t = (hardness * 0.9 + 0.1).clamp(0.0, 1.0);
    if t < hard_t {
        1.0
    } else {
        let s = (t - hard_t) / (1.0 - hard_t + 1e-6);
        1.0 - s * s * (3.0 - 2.0 * s)
    }
}

/// Distance from `p` to the segment `a`–`b`.
fn segment_distance(p: Point, a: Point, b: Point) -> f32 {
    let ab = Point::new(b.x - a.x, b.y - a.y);
    let len_sq = ab.x * ab.x + ab.y * ab.y;
    if len_sq <= f32::EPSILON {
        return p.distance(a);
    }
    let t = (((p.x - a.x) * ab.x + (p.y - a.y) * ab.y) / len_sq).clamp(0.0, 1.0);
    p.distance(Point::new(a.x + t * ab.x, a.y + t * ab.y))
}

/// Rasterize one capsule (line segment with rounded caps) into `mask`.
/// Brush passes union alpha via max; the eraser clears every pixel whose
/// footprint coverage is non-negligible. Returns the touched rect.
fn stamp_capsule(
    mask: &mut MaskBuffer,
    a: Point,
    b: Point,
    settings: &BrushSettings,
    erase: bool,
) -> PixelRect {
    let radius = settings.radius();
    let (w, h) = (mask.width(), mask.height());

    let min_x = (a.x.min(b.x) - radius).floor().max(0.0) as u32;
    let min_y = (a.y.min(b.y) - radius).floor().max(0.0) as u32;
    let max_x = ((a.x.max(b.x) + radius).ceil() as u32 + 1).min(w);
    let max_y = ((a.y.max(b.y) + radius).ceil() as u32 + 1).min(h);

    for y in min_y..max_y {
        for x in min_x..max_x {
            let dist = segment_distance(Point::new(x as f32, y as f32), a, b);
            let alpha = footprint_alpha(dist, radius, settings.hardness);
            if alpha < 0.01 {
                continue;
            }
            if erase {
                mask.write_alpha(x, y, 0);
            } else {
                mask.max_alpha(x, y, (alpha * 255.0).round() as u8);
            }
        }
    }
    PixelRect::from_min_max(min_x, min_y, max_x, max_y)
}

/// Fill a closed polygon with 255 using scan-line **even-odd** parity.
/// Returns the polygon's bounding box (clamped to canvas) and the row-major
/// alpha buffer covering it, or `None` for a degenerate polygon.
fn fill_polygon(points: &[Point], width: u32, height: u32) -> Option<(PixelRect, Vec<u8>)> {
    debug_assert!(points.len() >= 3);
    let min_x = points.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
    let min_y = points.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
    let max_x = points.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
    let max_y = points.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);

    let bounds = PixelRect::from_min_max(
        min_x.floor().max(0.0) as u32,
        min_y.floor().max(0.0) as u32,
        (max_x.ceil() as u32 + 1).min(width),
        (max_y.ceil() as u32 + 1).min(height),
    );
    if bounds.is_empty() {
        return None;
    }

    let mut alpha = vec![0u8; bounds.area() as usize];
    let n = points.len();
    let mut crossings: Vec<f32> = Vec::with_capacity(n);

    for row in 0..bounds.height {
        // Sample scan-lines at pixel centres
        let y = (bounds.y + row) as f32 + 0.5;
        crossings.clear();
        for i in 0..n {
            let p1 = points[i];
            let p2 = points[(i + 1) % n];
            // Half-open edge test avoids double-counting shared vertices
            if (p1.y <= y && p2.y > y) || (p2.y <= y && p1.y > y) {
                let t = (y - p1.y) / (p2.y - p1.y);
                crossings.push(p1.x + t * (p2.x - p1.x));
            }
        }
        crossings.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        // Even-odd: fill between alternating crossing pairs
        for pair in crossings.chunks(2) {
            let [x0, x1] = pair else { continue };
            let from = x0.ceil().max(bounds.x as f32) as u32;
            let to = (x1.floor() as u32 + 1).min(bounds.right());
            for x in from..to.max(from) {
                alpha[row as usize * bounds.width as usize + (x - bounds.x) as usize] = 255;
            }
        }
    }
    Some((bounds, alpha))
}

/// Stroke state machine: owns the in-progress freehand stroke (smoothing
/// state, accumulated dirty rect) and the pending outline points.
#[derive(Default)]
pub struct StrokeRasterizer {
    /// Smoothed pen position (EMA output) — the stroke spine follows this.
    smooth_pos: Option<Point>,
    /// Last raw input position, used to close the gap on stroke end.
    last_raw: Option<Point>,
    /// Union of everything this stroke touched, for dirty tracking and the
    /// history entry.
    stroke_bounds: Option<PixelRect>,
    outline_points: Vec<Point>,
}

impl StrokeRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stroke_in_progress(&self) -> bool {
        self.smooth_pos.is_some()
    }

    pub fn outline_len(&self) -> usize {
        self.outline_points.len()
    }

    /// Begin a freehand stroke with a single dab at `point` (canvas space,
    /// clamped in-canvas). Returns the touched rect.
    pub fn begin(&mut self, settings: &BrushSettings, erase: bool, point: Point, mask: &mut MaskBuffer) -> PixelRect {
        let p = point.clamp_to_canvas(mask.width(), mask.height());
        self.smooth_pos = Some(p);
        self.last_raw = Some(p);
        let rect = stamp_capsule(mask, p, p, settings, erase);
        self.stroke_bounds = Some(rect);
        rect
    }

    /// Extend the stroke to `point`, applying speed-adaptive EMA smoothing
    /// before rasterizing the connecting capsule.
    ///
    /// The adaptive factor leaves slow, close-together samples untouched and
    /// pulls hard on fast, widely-spaced ones, which rounds off the angular
    /// corners of frame-rate input. `settings.smoothing` scales the effect
    /// from none (0) to full (1).
    pub fn extend(&mut self, settings: &BrushSettings, erase: bool, point: Point, mask: &mut MaskBuffer) -> PixelRect {
        let raw = point.clamp_to_canvas(mask.width(), mask.height());
        let prev = match self.smooth_pos {
            Some(p) => p,
            None => return self.begin(settings, erase, point, mask),
        };

        let dx = raw.x - prev.x;
        let dy = raw.y - prev.y;
        let dist = (dx * dx + dy * dy).sqrt();
        // dist < 1.5  → 1.0  (raw, precise)
        // dist → ∞    → 0.55 (max smoothing)
        let adaptive = if dist < 1.5 {
            1.0
        } else {
            (0.55 + 1.8 / (dist + 1.8)).min(1.0)
        };
        let alpha = 1.0 - settings.smoothing.clamp(0.0, 1.0) * (1.0 - adaptive);
        let smoothed = Point::new(prev.x + alpha * dx, prev.y + alpha * dy);

        let rect = stamp_capsule(mask, prev, smoothed, settings, erase);
        self.smooth_pos = Some(smoothed);
        self.last_raw = Some(raw);
        self.accumulate(rect);
        rect
    }

    /// Finish the stroke: rasterize the remaining gap between the smoothed
    /// spine and the final raw input point so strokes always reach where the
    /// pointer actually stopped. Returns the whole stroke's touched rect.
    pub fn finish(&mut self, settings: &BrushSettings, erase: bool, mask: &mut MaskBuffer) -> Option<PixelRect> {
        if let (Some(smooth), Some(raw)) = (self.smooth_pos, self.last_raw) {
            if smooth.distance(raw) > 0.5 {
                let rect = stamp_capsule(mask, smooth, raw, settings, erase);
                self.accumulate(rect);
            }
        }
        self.smooth_pos = None;
        self.last_raw = None;
        self.stroke_bounds.take()
    }

    /// Abandon any in-progress stroke state without touching the mask.
    pub fn reset(&mut self) {
        self.smooth_pos = None;
        self.last_raw = None;
        self.stroke_bounds = None;
        self.outline_points.clear();
    }

    fn accumulate(&mut self, rect: PixelRect) {
        self.stroke_bounds = Some(match self.stroke_bounds {
            Some(b) => b.union(rect),
            None => rect,
        });
    }

    // ---- outline tool ------------------------------------------------------

    /// Accumulate an outline vertex (clamped in-canvas). Nothing is
    /// committed to the mask until `close_outline`.
    pub fn add_outline_point(&mut self, point: Point, canvas_width: u32, canvas_height: u32) {
        self.outline_points
            .push(point.clamp_to_canvas(canvas_width, canvas_height));
    }

    /// Close the polygon and commit a scan-line even-odd fill via
    /// `stamp_region`. Fewer than 3 points fails with `ToolError` and
    /// leaves both the mask and the accumulated points untouched.
    pub fn close_outline(&mut self, mask: &mut MaskBuffer) -> Result<PixelRect, ToolError> {
        if self.outline_points.len() < 3 {
            return Err(ToolError::OutlineTooShort(self.outline_points.len()));
        }
        let filled = fill_polygon(&self.outline_points, mask.width(), mask.height());
        self.outline_points.clear();
        match filled {
            Some((bounds, alpha)) => {
                mask.stamp_region(&alpha, bounds);
                Ok(bounds)
            }
            // Fully off-canvas or zero-area polygon: nothing to commit
            None => Ok(PixelRect::new(0, 0, 0, 0)),
        }
    }

    /// Stamp a segmentation-provider alpha region verbatim (authoritative,
    /// not blended with prior strokes).
    pub fn apply_region(&self, mask: &mut MaskBuffer, alpha: &[u8], bounds: PixelRect) -> PixelRect {
        mask.stamp_region(alpha, bounds);
        bounds.clamp_to(mask.width(), mask.height()).unwrap_or(PixelRect::new(0, 0, 0, 0))
    }
}
