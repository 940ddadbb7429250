// ============================================================================
// ENGINE FACADE — the single surface external callers drive
// ============================================================================
//
// Owns the whole canvas aggregate (image, layer store, viewport, compositor,
// rasterizer, history, segmentation gate). All mutation goes through these
// methods, synchronously and atomically with respect to each other; multiple
// engine instances are fully independent. Rendering is pull-based: the host
// calls `composite()` once per frame, and `tick()` to flush debounced
// history entries.

use std::time::Instant;

use image::RgbaImage;

use crate::compositor::Compositor;
use crate::error::{EngineError, ImageLoadError, LayerError, ToolError};
use crate::export::{ExportSnapshot, ImageInfo, LayerMaskData};
use crate::geometry::{PixelRect, Point};
use crate::history::{ActionKind, HistoryManager, Snapshot};
use crate::layer::{LayerId, LayerStore};
use crate::log_info;
use crate::segmentation::{SegmentationGate, SegmentationProvider, SegmentationResult, SegmentationTicket};
use crate::stroke::{BrushSettings, StrokeRasterizer, Tool};
use crate::viewport::Viewport;

pub const MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;
pub const SUPPORTED_FORMATS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Metadata the loader supplies alongside the decoded pixels.
#[derive(Clone, Debug)]
pub struct ImageMeta {
    pub file_name: String,
    pub file_size: u64,
    /// Lowercase extension-style format tag ("png", "jpg", "webp").
    pub format: String,
}

pub struct SourceImage {
    pub pixels: RgbaImage,
    pub meta: ImageMeta,
}

impl SourceImage {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

pub struct MaskEngine {
    image: Option<SourceImage>,
    store: LayerStore,
    viewport: Viewport,
    compositor: Compositor,
    rasterizer: StrokeRasterizer,
    history: HistoryManager,
    tool: Tool,
    gate: SegmentationGate,
    /// Persistent presentation buffer, reused across frames.
    target: RgbaImage,
    /// Last known screen size, for viewport culling. `None` renders all.
    viewport_size: Option<Point>,
}

impl Default for MaskEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MaskEngine {
    pub fn new() -> Self {
        Self {
            image: None,
            store: LayerStore::new(1, 1),
            viewport: Viewport::default(),
            compositor: Compositor::new(),
            rasterizer: StrokeRasterizer::new(),
            history: HistoryManager::new(Snapshot::empty()),
            tool: Tool::Brush(BrushSettings::default()),
            gate: SegmentationGate::new(),
            target: RgbaImage::new(1, 1),
            viewport_size: None,
        }
    }

    // ---- image lifecycle ----------------------------------------------------

    /// Accept an already-decoded base image. Validates the input contract
    /// (size cap, format whitelist, non-degenerate dimensions) and resets
    /// the whole document: layers, history, viewport, segmentation state.
    pub fn load_image(&mut self, pixels: RgbaImage, meta: ImageMeta) -> Result<(), ImageLoadError> {
        if meta.file_size > MAX_IMAGE_BYTES {
            return Err(ImageLoadError::Oversize { size: meta.file_size, max: MAX_IMAGE_BYTES });
        }
        let format = meta.format.to_ascii_lowercase();
        if !SUPPORTED_FORMATS.contains(&format.as_str()) {
            return Err(ImageLoadError::UnsupportedFormat(meta.format.clone()));
        }
        let (w, h) = pixels.dimensions();
        if w == 0 || h == 0 {
            return Err(ImageLoadError::ZeroDimension { width: w, height: h });
        }

        log_info!("loaded image '{}' {}×{} ({} bytes)", meta.file_name, w, h, meta.file_size);
        self.store = LayerStore::new(w, h);
        self.viewport = Viewport::default();
        self.history.clear(Snapshot::empty());
        self.rasterizer.reset();
        self.gate.cancel();
        self.compositor.invalidate_all();
        self.target = RgbaImage::new(w, h);
        self.image = Some(SourceImage { pixels, meta: ImageMeta { format, ..meta } });
        Ok(())
    }

    pub fn image(&self) -> Option<&SourceImage> {
        self.image.as_ref()
    }

    fn require_image(&self) -> Result<&SourceImage, ToolError> {
        self.image.as_ref().ok_or(ToolError::NoImage)
    }

    // ---- tool selection -----------------------------------------------------

    pub fn tool(&self) -> Tool {
        self.tool
    }

    /// Switch tools. Commits any pending coalesced entry, drops in-progress
    /// stroke/outline state, and cancels an in-flight segmentation so its
    /// late result cannot land on a since-changed layer.
    pub fn set_tool(&mut self, tool: Tool) {
        if self.tool != tool {
            self.flush_pending();
            self.rasterizer.reset();
            self.gate.cancel();
            self.tool = tool;
        }
    }

    // ---- freehand drawing ---------------------------------------------------

    /// Pointer-down. For brush/eraser this stamps the first dab; for the
    /// outline tool it accumulates a vertex; for the segmentation tool the
    /// host drives the provider instead (see `request_segmentation`).
    pub fn start_drawing(&mut self, screen: Point) -> Result<(), EngineError> {
        self.require_image()?;
        let canvas = self.viewport.to_canvas(screen);
        match self.tool {
            Tool::Brush(settings) => self.stroke_step(settings, false, canvas, true),
            Tool::Eraser(settings) => self.stroke_step(settings, true, canvas, true),
            Tool::Outline => self.push_outline_point(canvas),
            Tool::Segmentation => Ok(()),
        }
    }

    /// Pointer-move while drawing.
    pub fn continue_drawing(&mut self, screen: Point) -> Result<(), EngineError> {
        self.require_image()?;
        let canvas = self.viewport.to_canvas(screen);
        match self.tool {
            Tool::Brush(settings) => self.stroke_step(settings, false, canvas, false),
            Tool::Eraser(settings) => self.stroke_step(settings, true, canvas, false),
            Tool::Outline => self.push_outline_point(canvas),
            Tool::Segmentation => Ok(()),
        }
    }

    /// Pointer-up: completes the stroke and commits its single history
    /// entry (unless the debounce already did).
    pub fn end_drawing(&mut self) -> Result<(), EngineError> {
        let (settings, erase) = match self.tool {
            Tool::Brush(s) => (s, false),
            Tool::Eraser(s) => (s, true),
            _ => return Ok(()),
        };
        if !self.rasterizer.stroke_in_progress() {
            return Ok(());
        }
        let id = self.active_layer_or_err()?;
        let rect = self
            .rasterizer
            .finish(&settings, erase, &mut self.store.layer_mut(id)?.mask);
        if let Some(rect) = rect {
            self.compositor.mark_dirty(id, rect);
        }
        self.flush_pending();
        Ok(())
    }

    /// One-dab eraser convenience: begin + end at a single point, committed
    /// immediately as its own history entry.
    pub fn erase_at(&mut self, screen: Point) -> Result<(), EngineError> {
        let settings = match self.tool {
            Tool::Eraser(s) => s,
            _ => BrushSettings::default(),
        };
        self.require_image()?;
        let id = self.active_layer_or_err()?;
        self.flush_pending();
        let canvas = self.viewport.to_canvas(screen);
        self.rasterizer
            .begin(&settings, true, canvas, &mut self.store.layer_mut(id)?.mask);
        let rect = self
            .rasterizer
            .finish(&settings, true, &mut self.store.layer_mut(id)?.mask);
        if let Some(rect) = rect {
            self.compositor.mark_dirty(id, rect);
        }
        self.push_entry(ActionKind::Erase);
        Ok(())
    }

    fn stroke_step(
        &mut self,
        settings: BrushSettings,
        erase: bool,
        canvas: Point,
        starting: bool,
    ) -> Result<(), EngineError> {
        let id = self.active_layer_or_err()?;
        let kind = if erase { ActionKind::Erase } else { ActionKind::Draw };
        if let Some(stale) = self.history.touch_pending(kind, Instant::now()) {
            self.push_entry(stale);
        }
        let mask = &mut self.store.layer_mut(id)?.mask;
        let rect = if starting || !self.rasterizer.stroke_in_progress() {
            self.rasterizer.begin(&settings, erase, canvas, mask)
        } else {
            self.rasterizer.extend(&settings, erase, canvas, mask)
        };
        self.compositor.mark_dirty(id, rect);
        Ok(())
    }

    fn active_layer_or_err(&self) -> Result<LayerId, ToolError> {
        self.store.active_id().ok_or(ToolError::NoActiveLayer)
    }

    // ---- outline tool -------------------------------------------------------

    pub fn add_outline_point(&mut self, screen: Point) -> Result<(), EngineError> {
        self.require_image()?;
        let canvas = self.viewport.to_canvas(screen);
        self.push_outline_point(canvas)
    }

    fn push_outline_point(&mut self, canvas: Point) -> Result<(), EngineError> {
        self.active_layer_or_err()?;
        let (w, h) = self.store.canvas_size();
        self.rasterizer.add_outline_point(canvas, w, h);
        Ok(())
    }

    /// Close the accumulated polygon and commit its fill. Fewer than 3
    /// points fails with `ToolError` and commits nothing.
    pub fn close_outline(&mut self) -> Result<(), EngineError> {
        self.require_image()?;
        let id = self.active_layer_or_err()?;
        // Different action category: any pending coalesced entry commits
        // first so the fill gets its own undo step
        self.flush_pending();
        let rect = self
            .rasterizer
            .close_outline(&mut self.store.layer_mut(id)?.mask)?;
        self.compositor.mark_dirty(id, rect);
        self.push_entry(ActionKind::Draw);
        Ok(())
    }

    // ---- segmentation -------------------------------------------------------

    /// Issue a ticket for a segmentation request, superseding any
    /// outstanding one. The host runs the provider and delivers the result
    /// to `apply_segmentation` with this ticket.
    pub fn request_segmentation(&mut self) -> Result<SegmentationTicket, EngineError> {
        self.require_image()?;
        self.active_layer_or_err()?;
        Ok(self.gate.issue(Instant::now()))
    }

    /// Apply a provider result. Stale or timed-out tickets are rejected and
    /// the mask buffer stays untouched; a valid result is stamped verbatim
    /// and pushed as an immediate (uncoalesced) history entry.
    pub fn apply_segmentation(
        &mut self,
        ticket: SegmentationTicket,
        result: SegmentationResult,
    ) -> Result<(), EngineError> {
        self.gate.accept(ticket, Instant::now())?;
        let id = self.active_layer_or_err()?;
        self.flush_pending();
        log_info!(
            "segmentation applied: confidence {:.2}, {} ms inference",
            result.confidence,
            result.inference_time_ms
        );
        let mask = &mut self.store.layer_mut(id)?.mask;
        let rect = self.rasterizer.apply_region(mask, &result.alpha, result.bounds);
        self.compositor.mark_dirty(id, rect);
        self.push_entry(ActionKind::Draw);
        Ok(())
    }

    /// Synchronous convenience for hosts without a worker: issue a ticket,
    /// run the provider inline, and apply. Provider failures surface as
    /// `SegmentationError` with the mask unchanged.
    pub fn segment_with(
        &mut self,
        provider: &dyn SegmentationProvider,
        screen: Point,
    ) -> Result<(), EngineError> {
        let ticket = self.request_segmentation()?;
        let canvas = self.viewport.to_canvas(screen);
        let result = {
            let image = self.require_image()?;
            provider.segment(canvas, &image.pixels)
        };
        match result {
            Ok(r) => self.apply_segmentation(ticket, r),
            Err(e) => {
                self.gate.cancel();
                Err(e.into())
            }
        }
    }

    /// Stamp a pre-rasterized alpha region onto a layer — the headless
    /// import path (CLI mask files). Committed immediately as a draw entry.
    pub fn import_mask(&mut self, id: LayerId, alpha: &[u8], bounds: PixelRect) -> Result<(), EngineError> {
        self.require_image()?;
        self.flush_pending();
        let mask = &mut self.store.layer_mut(id)?.mask;
        let rect = self.rasterizer.apply_region(mask, alpha, bounds);
        self.compositor.mark_dirty(id, rect);
        self.push_entry(ActionKind::Draw);
        Ok(())
    }

    // ---- layer CRUD ---------------------------------------------------------

    pub fn add_layer(&mut self, name: Option<&str>, color: Option<&str>) -> Result<LayerId, EngineError> {
        if self.image.is_none() {
            return Err(LayerError::NoImage.into());
        }
        self.flush_pending();
        let id = self.store.create(name, color)?;
        log_info!("layer added: {} ({})", self.store.get(id).map(|l| l.name.as_str()).unwrap_or("?"), id);
        self.push_entry(ActionKind::LayerAdd);
        Ok(id)
    }

    pub fn delete_layer(&mut self, id: LayerId) -> Result<(), EngineError> {
        self.flush_pending();
        self.store.delete(id)?;
        self.compositor.invalidate_all();
        self.push_entry(ActionKind::LayerDelete);
        Ok(())
    }

    pub fn rename_layer(&mut self, id: LayerId, name: &str) -> Result<(), EngineError> {
        self.flush_pending();
        self.store.rename(id, name)?;
        self.push_entry(ActionKind::LayerRename);
        Ok(())
    }

    pub fn set_layer_color(&mut self, id: LayerId, hex: &str) -> Result<(), EngineError> {
        self.flush_pending();
        self.store.set_color(id, hex)?;
        self.invalidate_layer(id);
        self.push_entry(ActionKind::LayerColor);
        Ok(())
    }

    /// Opacity is an appearance change like color, so it shares the
    /// `LayerColor` history kind.
    pub fn set_layer_opacity(&mut self, id: LayerId, opacity: f32) -> Result<(), EngineError> {
        self.flush_pending();
        self.store.set_opacity(id, opacity)?;
        self.invalidate_layer(id);
        self.push_entry(ActionKind::LayerColor);
        Ok(())
    }

    /// Visibility is view state: it recomposites but deliberately records no
    /// history entry (the action taxonomy has no visibility kind).
    pub fn set_layer_visibility(&mut self, id: LayerId, visible: bool) -> Result<(), EngineError> {
        self.store.set_visibility(id, visible)?;
        self.invalidate_layer(id);
        Ok(())
    }

    pub fn move_layer_up(&mut self, id: LayerId) -> Result<(), EngineError> {
        self.reorder(id, LayerStore::move_up)
    }

    pub fn move_layer_down(&mut self, id: LayerId) -> Result<(), EngineError> {
        self.reorder(id, LayerStore::move_down)
    }

    pub fn move_layer_to_top(&mut self, id: LayerId) -> Result<(), EngineError> {
        self.reorder(id, LayerStore::move_to_top)
    }

    pub fn move_layer_to_bottom(&mut self, id: LayerId) -> Result<(), EngineError> {
        self.reorder(id, LayerStore::move_to_bottom)
    }

    fn reorder(
        &mut self,
        id: LayerId,
        op: fn(&mut LayerStore, LayerId) -> Result<bool, LayerError>,
    ) -> Result<(), EngineError> {
        self.flush_pending();
        if op(&mut self.store, id)? {
            self.compositor.invalidate_all();
            self.push_entry(ActionKind::LayerReorder);
        }
        Ok(())
    }

    pub fn set_active_layer(&mut self, id: Option<LayerId>) -> Result<(), EngineError> {
        Ok(self.store.set_active(id)?)
    }

    pub fn active_layer_id(&self) -> Option<LayerId> {
        self.store.active_id()
    }

    pub fn layers(&self) -> &[crate::layer::Layer] {
        self.store.layers()
    }

    pub fn layer_store(&self) -> &LayerStore {
        &self.store
    }

    fn invalidate_layer(&mut self, id: LayerId) {
        if let Some(bounds) = self.store.get(id).and_then(|l| l.mask.bounds()) {
            self.compositor.mark_dirty(id, bounds);
        }
    }

    // ---- viewport -----------------------------------------------------------

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn zoom_by(&mut self, factor: f32, anchor_screen: Point) {
        let mut next = self.viewport;
        next.zoom_by(factor, anchor_screen);
        self.apply_viewport(next);
    }

    pub fn pan_by(&mut self, delta_screen: Point) {
        let mut next = self.viewport;
        next.pan_by(delta_screen);
        self.apply_viewport(next);
    }

    pub fn reset_view(&mut self) {
        self.apply_viewport(Viewport::default());
    }

    pub fn fit_view(&mut self, viewport_size: Point) {
        self.viewport_size = Some(viewport_size);
        if let Some(img) = &self.image {
            let size = (img.width(), img.height());
            let mut next = self.viewport;
            next.fit_to_viewport(size, viewport_size);
            self.apply_viewport(next);
        }
    }

    /// Commit a viewport value. A no-op transform (clamped zoom, rejected
    /// non-finite input) must not schedule a history entry identical to the
    /// present state, so activity is only noted on an actual change.
    fn apply_viewport(&mut self, next: Viewport) {
        if next == self.viewport {
            return;
        }
        self.note_viewport_activity();
        self.viewport = next;
    }

    fn note_viewport_activity(&mut self) {
        if let Some(stale) = self.history.touch_pending(ActionKind::ViewportChange, Instant::now()) {
            self.push_entry(stale);
        }
    }

    // ---- history ------------------------------------------------------------

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history_len(&self) -> usize {
        self.history.past_len()
    }

    pub fn undo(&mut self) -> bool {
        self.flush_pending();
        let snap = match self.history.undo() {
            Some(s) => (s.layers.clone(), s.active, s.viewport),
            None => return false,
        };
        self.restore(snap);
        true
    }

    pub fn redo(&mut self) -> bool {
        self.flush_pending();
        let snap = match self.history.redo() {
            Some(s) => (s.layers.clone(), s.active, s.viewport),
            None => return false,
        };
        self.restore(snap);
        true
    }

    fn restore(&mut self, (layers, active, viewport): (Vec<crate::layer::Layer>, Option<LayerId>, Viewport)) {
        self.store.restore(layers, active);
        self.viewport = viewport;
        self.rasterizer.reset();
        self.gate.cancel();
        self.compositor.invalidate_all();
    }

    /// Flush any coalesced entry whose debounce deadline has passed. Hosts
    /// call this from their frame loop; tests drive it with explicit
    /// instants.
    pub fn tick(&mut self, now: Instant) {
        if let Some(kind) = self.history.take_due_pending(now) {
            self.push_entry(kind);
        }
    }

    fn flush_pending(&mut self) {
        if let Some(kind) = self.history.take_pending() {
            self.push_entry(kind);
        }
    }

    fn push_entry(&mut self, kind: ActionKind) {
        let snapshot = Snapshot::new(
            self.store.layers().to_vec(),
            self.store.active_id(),
            self.viewport,
            kind,
        );
        self.history.push(snapshot);
    }

    // ---- rendering ----------------------------------------------------------

    /// Composite the current state into the presentation buffer and return
    /// it. Between mutations this is cheap: only dirty regions recompute,
    /// and a fully clean frame is a no-op.
    pub fn composite(&mut self) -> Option<&RgbaImage> {
        let image = self.image.as_ref()?;
        self.compositor.note_viewport(self.viewport);
        let visible = self.viewport_size.and_then(|size| {
            Compositor::visible_region(&self.viewport, size, (image.width(), image.height()))
        });
        self.compositor
            .render_composite(&image.pixels, self.store.layers(), &mut self.target, visible);
        Some(&self.target)
    }

    // ---- export -------------------------------------------------------------

    /// Copy out every layer's raster and metadata — no encoding here; a
    /// `MaskCodec` turns this into the wire format.
    pub fn export_snapshot(&self) -> Result<ExportSnapshot, EngineError> {
        let image = self.image.as_ref().ok_or(crate::error::ExportError::NoImage)?;
        if self.store.is_empty() {
            return Err(crate::error::ExportError::NoLayers.into());
        }
        let layers = self
            .store
            .layers()
            .iter()
            .enumerate()
            .map(|(z, layer)| {
                let (bounds, pixels) = match layer.mask.to_region() {
                    Some((b, p)) => (Some(b), p),
                    None => (None, Vec::new()),
                };
                LayerMaskData {
                    id: layer.id,
                    name: layer.name.clone(),
                    color: layer.color,
                    z_index: z,
                    bounds,
                    pixels,
                }
            })
            .collect();
        Ok(ExportSnapshot {
            image: ImageInfo {
                width: image.width(),
                height: image.height(),
                file_name: image.meta.file_name.clone(),
            },
            layers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExportError, SegmentationError};
    use std::time::Duration;

    fn engine_with_image(w: u32, h: u32) -> MaskEngine {
        let mut e = MaskEngine::new();
        e.load_image(
            RgbaImage::from_pixel(w, h, image::Rgba([64, 64, 64, 255])),
            ImageMeta { file_name: "test.png".into(), file_size: 1024, format: "png".into() },
        )
        .unwrap();
        e
    }

    fn precise_brush(size: f32) -> Tool {
        Tool::Brush(BrushSettings { size, hardness: 1.0, smoothing: 0.0 })
    }

    fn read_alpha(e: &MaskEngine, x: u32, y: u32) -> u8 {
        e.layers()[0].mask.read_alpha(x, y)
    }

    #[test]
    fn load_image_validates_contract() {
        let mut e = MaskEngine::new();
        let px = RgbaImage::new(4, 4);

        let oversize = ImageMeta { file_name: "big.png".into(), file_size: 21 * 1024 * 1024, format: "png".into() };
        assert!(matches!(
            e.load_image(px.clone(), oversize),
            Err(ImageLoadError::Oversize { .. })
        ));

        let bad_fmt = ImageMeta { file_name: "a.gif".into(), file_size: 10, format: "gif".into() };
        assert!(matches!(
            e.load_image(px.clone(), bad_fmt),
            Err(ImageLoadError::UnsupportedFormat(_))
        ));
        assert!(e.image().is_none());

        let ok = ImageMeta { file_name: "a.png".into(), file_size: 10, format: "PNG".into() };
        assert!(e.load_image(px, ok).is_ok());
    }

    #[test]
    fn drawing_without_image_or_layer_fails() {
        let mut e = MaskEngine::new();
        assert!(matches!(
            e.start_drawing(Point::new(1.0, 1.0)),
            Err(EngineError::Tool(ToolError::NoImage))
        ));

        let mut e = engine_with_image(100, 100);
        assert!(matches!(
            e.start_drawing(Point::new(1.0, 1.0)),
            Err(EngineError::Tool(ToolError::NoActiveLayer))
        ));
    }

    #[test]
    fn brush_erase_undo_scenario() {
        // Scenarios A, B and C in one flow
        let mut e = engine_with_image(300, 300);
        e.add_layer(None, None).unwrap();

        e.set_tool(precise_brush(20.0));
        e.start_drawing(Point::new(100.0, 100.0)).unwrap();
        e.continue_drawing(Point::new(150.0, 150.0)).unwrap();
        e.end_drawing().unwrap();
        assert!(read_alpha(&e, 125, 125) > 0);

        e.set_tool(Tool::Eraser(BrushSettings { size: 20.0, hardness: 1.0, smoothing: 0.0 }));
        let before_far = read_alpha(&e, 150, 150);
        e.start_drawing(Point::new(100.0, 100.0)).unwrap();
        e.end_drawing().unwrap();
        assert_eq!(read_alpha(&e, 100, 100), 0);
        assert_eq!(read_alpha(&e, 150, 150), before_far);

        // Undo reverts the erase
        assert!(e.undo());
        assert!(read_alpha(&e, 100, 100) > 0);

        // Walk back to the start, then undo returns false
        while e.undo() {}
        assert!(!e.can_undo());
        assert!(!e.undo());
    }

    #[test]
    fn stroke_coalesces_into_one_entry() {
        let mut e = engine_with_image(200, 200);
        e.add_layer(None, None).unwrap();
        let baseline = e.history_len();

        e.set_tool(precise_brush(20.0));
        e.start_drawing(Point::new(10.0, 10.0)).unwrap();
        for i in 1..50 {
            e.continue_drawing(Point::new(10.0 + i as f32, 10.0)).unwrap();
        }
        // No entry until the stroke completes
        assert_eq!(e.history_len(), baseline);
        e.end_drawing().unwrap();
        assert_eq!(e.history_len(), baseline + 1);
    }

    #[test]
    fn stroke_debounce_fires_via_tick() {
        let mut e = engine_with_image(200, 200);
        e.add_layer(None, None).unwrap();
        let baseline = e.history_len();

        e.set_tool(precise_brush(20.0));
        e.start_drawing(Point::new(10.0, 10.0)).unwrap();
        e.continue_drawing(Point::new(30.0, 10.0)).unwrap();

        e.tick(Instant::now()); // too early
        assert_eq!(e.history_len(), baseline);
        e.tick(Instant::now() + Duration::from_millis(600));
        assert_eq!(e.history_len(), baseline + 1);

        // Pointer-up with no further activity adds nothing more
        e.end_drawing().unwrap();
        assert_eq!(e.history_len(), baseline + 1);
    }

    #[test]
    fn discrete_commit_flushes_pending_viewport_entry() {
        let mut e = engine_with_image(200, 200);
        e.add_layer(None, None).unwrap();
        let baseline = e.history_len();

        e.zoom_by(1.5, Point::new(50.0, 50.0));
        e.add_outline_point(Point::new(15.0, 15.0)).unwrap();
        e.add_outline_point(Point::new(75.0, 15.0)).unwrap();
        e.add_outline_point(Point::new(45.0, 90.0)).unwrap();
        e.close_outline().unwrap();

        // Two distinct undo steps: the pending viewport change commits
        // first, then the fill — never one merged entry
        assert_eq!(e.history_len(), baseline + 2);
        e.tick(Instant::now() + Duration::from_millis(2000));
        assert_eq!(e.history_len(), baseline + 2);

        assert!(e.undo()); // reverts the fill, keeps the zoom
        assert!(e.layers()[0].mask.bounds().is_none());
        assert_eq!(e.viewport().zoom, 1.5);
        assert!(e.undo()); // reverts the zoom
        assert_eq!(e.viewport().zoom, 1.0);
    }

    #[test]
    fn stroke_after_viewport_change_keeps_both_entries() {
        let mut e = engine_with_image(200, 200);
        e.add_layer(None, None).unwrap();
        e.set_tool(precise_brush(20.0));
        let baseline = e.history_len();

        e.pan_by(Point::new(10.0, 0.0));
        // Pointer-down flushes the viewport entry and arms the stroke;
        // pointer-up must still commit the stroke as its own entry
        e.start_drawing(Point::new(60.0, 60.0)).unwrap();
        e.end_drawing().unwrap();
        assert_eq!(e.history_len(), baseline + 2);
    }

    #[test]
    fn noop_viewport_ops_schedule_nothing() {
        let mut e = engine_with_image(100, 100);
        let baseline = e.history_len();

        e.zoom_by(100.0, Point::ZERO);
        e.tick(Instant::now() + Duration::from_millis(1500));
        let after_zoom = e.history_len();
        assert_eq!(after_zoom, baseline + 1);

        // Already clamped at 10× / rejected input: no state change, so no
        // history entry may appear
        e.zoom_by(3.0, Point::ZERO);
        e.pan_by(Point::new(f32::NAN, 0.0));
        e.tick(Instant::now() + Duration::from_millis(3000));
        assert_eq!(e.history_len(), after_zoom);
    }

    #[test]
    fn viewport_changes_debounce_to_one_entry() {
        let mut e = engine_with_image(200, 200);
        e.add_layer(None, None).unwrap();
        let baseline = e.history_len();

        for _ in 0..10 {
            e.zoom_by(1.1, Point::new(50.0, 50.0));
            e.pan_by(Point::new(5.0, 0.0));
        }
        assert_eq!(e.history_len(), baseline);
        e.tick(Instant::now() + Duration::from_millis(1100));
        assert_eq!(e.history_len(), baseline + 1);
    }

    #[test]
    fn zoom_stays_in_bounds_through_facade() {
        let mut e = engine_with_image(100, 100);
        for _ in 0..30 {
            e.zoom_by(3.0, Point::ZERO);
        }
        assert!(e.viewport().zoom <= 10.0);
        for _ in 0..60 {
            e.zoom_by(0.1, Point::ZERO);
        }
        assert!(e.viewport().zoom >= 0.1);
    }

    #[test]
    fn drawing_maps_through_viewport() {
        let mut e = engine_with_image(200, 200);
        e.add_layer(None, None).unwrap();
        e.zoom_by(2.0, Point::ZERO);

        e.set_tool(precise_brush(20.0));
        // Screen (100,100) at zoom 2 is canvas (50,50)
        e.start_drawing(Point::new(100.0, 100.0)).unwrap();
        e.end_drawing().unwrap();
        assert!(read_alpha(&e, 50, 50) > 0);
        assert_eq!(read_alpha(&e, 100, 100), 0);
    }

    #[test]
    fn outline_close_rules() {
        // Scenario E through the facade
        let mut e = engine_with_image(300, 300);
        e.add_layer(None, None).unwrap();
        e.set_tool(Tool::Outline);

        e.add_outline_point(Point::new(10.0, 10.0)).unwrap();
        e.add_outline_point(Point::new(50.0, 10.0)).unwrap();
        assert!(matches!(
            e.close_outline(),
            Err(EngineError::Tool(ToolError::OutlineTooShort(2)))
        ));
        assert!(e.layers()[0].mask.bounds().is_none());

        e.add_outline_point(Point::new(30.0, 60.0)).unwrap();
        e.close_outline().unwrap();
        assert!(e.layers()[0].mask.bounds().is_some());
        assert_eq!(read_alpha(&e, 30, 30), 255);
    }

    #[test]
    fn segmentation_stale_and_apply() {
        let mut e = engine_with_image(100, 100);
        e.add_layer(None, None).unwrap();

        let stale = e.request_segmentation().unwrap();
        let fresh = e.request_segmentation().unwrap();
        let result = SegmentationResult {
            alpha: vec![255; 25],
            bounds: PixelRect::new(10, 10, 5, 5),
            confidence: 0.9,
            inference_time_ms: 12,
        };

        // The superseded request's result is refused, buffer untouched
        assert!(matches!(
            e.apply_segmentation(stale, result.clone()),
            Err(EngineError::Segmentation(SegmentationError::Stale))
        ));
        assert_eq!(read_alpha(&e, 12, 12), 0);

        let before = e.history_len();
        e.apply_segmentation(fresh, result).unwrap();
        assert_eq!(read_alpha(&e, 12, 12), 255);
        // Discrete: pushed immediately
        assert_eq!(e.history_len(), before + 1);
    }

    #[test]
    fn segment_with_provider_failure_leaves_mask_unchanged() {
        struct Failing;
        impl SegmentationProvider for Failing {
            fn segment(&self, _: Point, _: &RgbaImage) -> Result<SegmentationResult, SegmentationError> {
                Err(SegmentationError::ProviderFailed("model exploded".into()))
            }
        }

        let mut e = engine_with_image(100, 100);
        e.add_layer(None, None).unwrap();
        let err = e.segment_with(&Failing, Point::new(50.0, 50.0)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Segmentation(SegmentationError::ProviderFailed(_))
        ));
        assert!(e.layers()[0].mask.bounds().is_none());
        // Still usable for a retry
        assert!(e.request_segmentation().is_ok());
    }

    #[test]
    fn layer_reorder_undo_round_trip() {
        // Scenario D plus undo
        let mut e = engine_with_image(100, 100);
        let a = e.add_layer(None, None).unwrap();
        let b = e.add_layer(None, None).unwrap();
        let c = e.add_layer(None, None).unwrap();

        e.move_layer_to_top(a).unwrap();
        assert_eq!(e.layer_store().z_index(a), Some(2));
        assert_eq!(e.layer_store().z_index(b), Some(0));
        assert_eq!(e.layer_store().z_index(c), Some(1));

        assert!(e.undo());
        assert_eq!(e.layer_store().z_index(a), Some(0));
        assert_eq!(e.layer_store().z_index(c), Some(2));
    }

    #[test]
    fn undo_restores_deleted_layer_pixels() {
        let mut e = engine_with_image(100, 100);
        let id = e.add_layer(None, None).unwrap();
        e.set_tool(precise_brush(20.0));
        e.start_drawing(Point::new(40.0, 40.0)).unwrap();
        e.end_drawing().unwrap();

        e.delete_layer(id).unwrap();
        assert!(e.layers().is_empty());
        assert!(e.undo());
        assert_eq!(e.layers().len(), 1);
        assert!(read_alpha(&e, 40, 40) > 0);
        assert_eq!(e.active_layer_id(), Some(e.layers()[0].id));
    }

    #[test]
    fn export_requires_image_and_layers() {
        let e = MaskEngine::new();
        assert!(matches!(
            e.export_snapshot(),
            Err(EngineError::Export(ExportError::NoImage))
        ));

        let mut e = engine_with_image(50, 50);
        assert!(matches!(
            e.export_snapshot(),
            Err(EngineError::Export(ExportError::NoLayers))
        ));
        e.add_layer(None, None).unwrap();
        let snap = e.export_snapshot().unwrap();
        assert_eq!(snap.image.width, 50);
        assert_eq!(snap.layers.len(), 1);
        assert!(snap.layers[0].bounds.is_none());
    }

    #[test]
    fn composite_reflects_stroke() {
        let mut e = engine_with_image(64, 64);
        let id = e.add_layer(None, Some("#FF0000")).unwrap();
        e.set_tool(precise_brush(10.0));
        e.start_drawing(Point::new(32.0, 32.0)).unwrap();
        e.end_drawing().unwrap();
        let _ = id;

        let frame = e.composite().unwrap();
        assert_eq!(frame.get_pixel(32, 32).0, [255, 0, 0, 255]);
        assert_eq!(frame.get_pixel(5, 5).0, [64, 64, 64, 255]);
    }
}
