// ============================================================================
// COMPOSITOR — visible layers, tinted and alpha-blended over the base image
// ============================================================================
//
// Pull-based: mutations mark per-layer dirty rects, and the host asks for a
// composite once per frame. When the viewport hasn't changed, only the union
// of dirty rects is recomputed; any viewport change invalidates everything.
// Rows of the recomposited region are processed in parallel with rayon.

use std::collections::HashMap;

use image::RgbaImage;
use rayon::prelude::*;

use crate::geometry::{PixelRect, Point};
use crate::layer::{Layer, LayerId};
use crate::viewport::Viewport;

pub struct Compositor {
    /// Per-layer union of bounds touched since the last composite.
    dirty: HashMap<LayerId, PixelRect>,
    /// Set on viewport changes, layer reorders, undo — anything that makes
    /// partial recompositing unsound.
    full_redraw: bool,
    last_viewport: Option<Viewport>,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor {
    pub fn new() -> Self {
        Self {
            dirty: HashMap::new(),
            full_redraw: true,
            last_viewport: None,
        }
    }

    /// Union `bounds` into the layer's dirty rect.
    pub fn mark_dirty(&mut self, id: LayerId, bounds: PixelRect) {
        if bounds.is_empty() {
            return;
        }
        self.dirty
            .entry(id)
            .and_modify(|r| *r = r.union(bounds))
            .or_insert(bounds);
    }

    pub fn dirty_region(&self, id: LayerId) -> Option<PixelRect> {
        self.dirty.get(&id).copied()
    }

    /// Throw away all incremental state and force a full recomposite.
    pub fn invalidate_all(&mut self) {
        self.dirty.clear();
        self.full_redraw = true;
    }

    /// Record the viewport used for the next composite; any change from the
    /// previous frame invalidates all dirty tracking.
    pub fn note_viewport(&mut self, viewport: Viewport) {
        if self.last_viewport != Some(viewport) {
            self.invalidate_all();
            self.last_viewport = Some(viewport);
        }
    }

    /// Viewport culling: skip layers whose mask bounds don't intersect the
    /// visible canvas region. Purely an optimization — callers may pass
    /// `None` for the region and render everything.
    pub fn should_render_layer(layer: &Layer, visible: Option<PixelRect>) -> bool {
        if !layer.visible || layer.opacity <= 0.0 {
            return false;
        }
        match (visible, layer.mask.bounds()) {
            (Some(region), Some(bounds)) => bounds.intersect(region).is_some(),
            // Unknown viewport or empty mask: don't cull
            _ => true,
        }
    }

    /// Canvas-space visible region for a viewport and screen size, for use
    /// as the culling argument to `render_composite`.
    pub fn visible_region(viewport: &Viewport, viewport_size: Point, canvas: (u32, u32)) -> Option<PixelRect> {
        let (min, max) = viewport.visible_canvas_region(viewport_size);
        PixelRect::from_min_max(
            min.x.floor().max(0.0) as u32,
            min.y.floor().max(0.0) as u32,
            (max.x.ceil().max(0.0) as u32).min(canvas.0),
            (max.y.ceil().max(0.0) as u32).min(canvas.1),
        )
        .clamp_to(canvas.0, canvas.1)
    }

    /// Composite `layers` (ascending z, visible only) over `base` into
    /// `target`, recomputing only the dirty union unless a full redraw is
    /// pending. Returns the recomposited region, `None` when everything was
    /// already clean.
    ///
    /// `base` and `target` must share dimensions; `target` is the persistent
    /// presentation buffer reused across frames.
    pub fn render_composite(
        &mut self,
        base: &RgbaImage,
        layers: &[Layer],
        target: &mut RgbaImage,
        visible: Option<PixelRect>,
    ) -> Option<PixelRect> {
        let (w, h) = base.dimensions();
        debug_assert_eq!((w, h), target.dimensions());

        let region = if self.full_redraw {
            PixelRect::new(0, 0, w, h)
        } else {
            let mut union: Option<PixelRect> = None;
            for rect in self.dirty.values() {
                union = Some(match union {
                    Some(u) => u.union(*rect),
                    None => *rect,
                });
            }
            match union.and_then(|u| u.clamp_to(w, h)) {
                Some(u) => u,
                None => return None, // nothing dirty
            }
        };

        let renderable: Vec<&Layer> = layers
            .iter()
            .filter(|l| Self::should_render_layer(l, visible))
            .collect();

        let base_raw = base.as_raw();
        let stride = w as usize * 4;
        let row_range = region.y as usize..region.bottom() as usize;

        target
            .as_mut()
            .par_chunks_mut(stride)
            .enumerate()
            .filter(|(y, _)| row_range.contains(y))
            .for_each(|(y, row)| {
                let y = y as u32;
                for x in region.x..region.right() {
                    let o = x as usize * 4;
                    let mut r = base_raw[y as usize * stride + o] as f32;
                    let mut g = base_raw[y as usize * stride + o + 1] as f32;
                    let mut b = base_raw[y as usize * stride + o + 2] as f32;
                    let mut a = base_raw[y as usize * stride + o + 3] as f32 / 255.0;

                    // "over" each tinted mask, bottom to top
                    for layer in &renderable {
                        let mask_a = layer.mask.read_alpha(x, y);
                        if mask_a == 0 {
                            continue;
                        }
                        let la = mask_a as f32 / 255.0 * layer.opacity;
                        let inv = 1.0 - la;
                        r = layer.color.r as f32 * la + r * inv;
                        g = layer.color.g as f32 * la + g * inv;
                        b = layer.color.b as f32 * la + b * inv;
                        a = la + a * inv;
                    }

                    row[o] = r.round().clamp(0.0, 255.0) as u8;
                    row[o + 1] = g.round().clamp(0.0, 255.0) as u8;
                    row[o + 2] = b.round().clamp(0.0, 255.0) as u8;
                    row[o + 3] = (a * 255.0).round().clamp(0.0, 255.0) as u8;
                }
            });

        self.dirty.clear();
        self.full_redraw = false;
        Some(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerStore;

    fn setup(w: u32, h: u32) -> (RgbaImage, RgbaImage, LayerStore) {
        let base = RgbaImage::from_pixel(w, h, image::Rgba([100, 100, 100, 255]));
        let target = RgbaImage::new(w, h);
        (base, target, LayerStore::new(w, h))
    }

    #[test]
    fn composite_tints_mask_pixels() {
        let (base, mut target, mut store) = setup(32, 32);
        let id = store.create(None, Some("#FF0000")).unwrap();
        store.layer_mut(id).unwrap().mask.write_alpha(5, 5, 255);

        let mut comp = Compositor::new();
        let region = comp.render_composite(&base, store.layers(), &mut target, None);
        assert_eq!(region, Some(PixelRect::new(0, 0, 32, 32)));
        // Full mask alpha, opacity 1: pure layer color
        assert_eq!(target.get_pixel(5, 5).0, [255, 0, 0, 255]);
        // Untouched pixel shows the base
        assert_eq!(target.get_pixel(10, 10).0, [100, 100, 100, 255]);
    }

    #[test]
    fn opacity_scales_the_blend() {
        let (base, mut target, mut store) = setup(16, 16);
        let id = store.create(None, Some("#FFFFFF")).unwrap();
        store.layer_mut(id).unwrap().mask.write_alpha(0, 0, 255);
        store.set_opacity(id, 0.5).unwrap();

        let mut comp = Compositor::new();
        comp.render_composite(&base, store.layers(), &mut target, None);
        // 255 * 0.5 + 100 * 0.5 ≈ 178
        let px = target.get_pixel(0, 0).0;
        assert!((px[0] as i32 - 178).abs() <= 1);
    }

    #[test]
    fn hidden_layers_are_skipped() {
        let (base, mut target, mut store) = setup(16, 16);
        let id = store.create(None, Some("#00FF00")).unwrap();
        store.layer_mut(id).unwrap().mask.write_alpha(3, 3, 255);
        store.set_visibility(id, false).unwrap();

        let mut comp = Compositor::new();
        comp.render_composite(&base, store.layers(), &mut target, None);
        assert_eq!(target.get_pixel(3, 3).0, [100, 100, 100, 255]);
    }

    #[test]
    fn z_order_decides_the_winner() {
        let (base, mut target, mut store) = setup(16, 16);
        let red = store.create(None, Some("#FF0000")).unwrap();
        let blue = store.create(None, Some("#0000FF")).unwrap();
        store.layer_mut(red).unwrap().mask.write_alpha(4, 4, 255);
        store.layer_mut(blue).unwrap().mask.write_alpha(4, 4, 255);

        let mut comp = Compositor::new();
        comp.render_composite(&base, store.layers(), &mut target, None);
        // Blue sits above red
        assert_eq!(target.get_pixel(4, 4).0, [0, 0, 255, 255]);

        store.move_to_top(red).unwrap();
        comp.invalidate_all();
        comp.render_composite(&base, store.layers(), &mut target, None);
        assert_eq!(target.get_pixel(4, 4).0, [255, 0, 0, 255]);
    }

    #[test]
    fn partial_recomposite_covers_only_dirty_union() {
        let (base, mut target, mut store) = setup(64, 64);
        let id = store.create(None, Some("#FF0000")).unwrap();

        let mut comp = Compositor::new();
        comp.render_composite(&base, store.layers(), &mut target, None);

        // Second frame: a small mutation recomposites a small region
        store.layer_mut(id).unwrap().mask.write_alpha(10, 10, 255);
        comp.mark_dirty(id, PixelRect::new(10, 10, 1, 1));
        let region = comp.render_composite(&base, store.layers(), &mut target, None);
        assert_eq!(region, Some(PixelRect::new(10, 10, 1, 1)));
        assert_eq!(target.get_pixel(10, 10).0, [255, 0, 0, 255]);

        // Third frame with no mutations: nothing to do
        assert_eq!(comp.render_composite(&base, store.layers(), &mut target, None), None);
    }

    #[test]
    fn viewport_change_forces_full_redraw() {
        let (base, mut target, mut store) = setup(32, 32);
        store.create(None, None).unwrap();
        let mut comp = Compositor::new();

        let vp = Viewport::default();
        comp.note_viewport(vp);
        comp.render_composite(&base, store.layers(), &mut target, None);
        assert_eq!(comp.render_composite(&base, store.layers(), &mut target, None), None);

        let mut zoomed = vp;
        zoomed.zoom_by(2.0, Point::ZERO);
        comp.note_viewport(zoomed);
        let region = comp.render_composite(&base, store.layers(), &mut target, None);
        assert_eq!(region, Some(PixelRect::new(0, 0, 32, 32)));
    }

    #[test]
    fn culling_skips_offscreen_layers() {
        let (_, _, mut store) = setup(512, 512);
        let id = store.create(None, None).unwrap();
        store.layer_mut(id).unwrap().mask.write_alpha(500, 500, 255);
        let layer = store.get(id).unwrap();

        let visible = Some(PixelRect::new(0, 0, 100, 100));
        assert!(!Compositor::should_render_layer(layer, visible));
        assert!(Compositor::should_render_layer(layer, Some(PixelRect::new(400, 400, 112, 112))));
        assert!(Compositor::should_render_layer(layer, None));
    }
}
