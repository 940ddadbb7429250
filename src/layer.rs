// ============================================================================
// LAYERS — per-layer state and the ordered store that owns them
// ============================================================================
//
// The store's `Vec` order IS the z-order (index 0 = bottom). Deriving
// z-indices from positions keeps the `{0..N-1}` density invariant true by
// construction: every reorder re-derives the whole set atomically.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::error::LayerError;
use crate::mask::MaskBuffer;

pub const MAX_LAYERS: usize = 100;
const MAX_NAME_LEN: usize = 50;

/// Default tint colors cycled through as layers are created.
const DEFAULT_COLORS: &[&str] = &[
    "#FF3B30", "#34C759", "#007AFF", "#FF9500", "#AF52DE", "#FFCC00", "#5AC8FA", "#FF2D55",
];

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Opaque unique layer identifier (UUID v4), immutable after creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerId(Uuid);

impl LayerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// RGB tint applied to a layer's mask when composited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    /// Parse a `#RRGGBB` hex string. Anything else is a validation error.
    pub fn from_hex(hex: &str) -> Result<Self, LayerError> {
        let digits = hex
            .strip_prefix('#')
            .ok_or_else(|| LayerError::InvalidColor(hex.to_string()))?;
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(LayerError::InvalidColor(hex.to_string()));
        }
        let r = u8::from_str_radix(&digits[0..2], 16).unwrap_or(0);
        let g = u8::from_str_radix(&digits[2..4], 16).unwrap_or(0);
        let b = u8::from_str_radix(&digits[4..6], 16).unwrap_or(0);
        Ok(Self { r, g, b })
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// One mask layer. The `MaskBuffer` is exclusively owned; `clone()` is cheap
/// thanks to chunk-level copy-on-write, which is what makes whole-layer
/// history snapshots affordable.
#[derive(Clone)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub mask: MaskBuffer,
    pub color: Color,
    pub opacity: f32,
    pub visible: bool,
    pub created_at: u64,
    pub modified_at: u64,
}

impl Layer {
    fn new(name: String, color: Color, width: u32, height: u32) -> Self {
        let now = now_millis();
        Self {
            id: LayerId::new(),
            name,
            mask: MaskBuffer::new(width, height),
            color,
            opacity: 1.0,
            visible: true,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.modified_at = now_millis();
    }
}

fn validate_name(name: &str) -> Result<(), LayerError> {
    let len = name.chars().count();
    if len == 0 || len > MAX_NAME_LEN {
        return Err(LayerError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn validate_opacity(opacity: f32) -> Result<(), LayerError> {
    if !opacity.is_finite() || !(0.0..=1.0).contains(&opacity) {
        return Err(LayerError::InvalidOpacity(opacity));
    }
    Ok(())
}

/// Ordered collection of layers for one canvas, plus the active-layer
/// reference every drawing operation targets.
pub struct LayerStore {
    layers: Vec<Layer>,
    active: Option<LayerId>,
    canvas_width: u32,
    canvas_height: u32,
    /// Monotonic counter for "Layer {n}" default names; never reused after
    /// deletes so names stay distinguishable within a session.
    name_counter: usize,
}

impl LayerStore {
    pub fn new(canvas_width: u32, canvas_height: u32) -> Self {
        Self {
            layers: Vec::new(),
            active: None,
            canvas_width,
            canvas_height,
            name_counter: 0,
        }
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        (self.canvas_width, self.canvas_height)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layers in z-order (index 0 = bottom).
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    fn index_of(&self, id: LayerId) -> Result<usize, LayerError> {
        self.layers
            .iter()
            .position(|l| l.id == id)
            .ok_or(LayerError::NotFound(id))
    }

    /// Derived z-index of a layer (its position in the stack).
    pub fn z_index(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    /// Bottom-to-top layer ids.
    pub fn z_order(&self) -> Vec<LayerId> {
        self.layers.iter().map(|l| l.id).collect()
    }

    pub fn active_id(&self) -> Option<LayerId> {
        self.active
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.active.and_then(|id| self.get(id))
    }

    pub fn active_layer_mut(&mut self) -> Option<&mut Layer> {
        let id = self.active?;
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn set_active(&mut self, id: Option<LayerId>) -> Result<(), LayerError> {
        if let Some(id) = id {
            self.index_of(id)?;
        }
        self.active = id;
        Ok(())
    }

    /// Create a layer on top of the stack. `None` arguments fall back to a
    /// generated `"Layer {n}"` name and the next palette color. The new
    /// layer becomes active.
    pub fn create(&mut self, name: Option<&str>, color: Option<&str>) -> Result<LayerId, LayerError> {
        if self.layers.len() >= MAX_LAYERS {
            return Err(LayerError::LimitExceeded(MAX_LAYERS));
        }
        let color = match color {
            Some(hex) => Color::from_hex(hex)?,
            None => Color::from_hex(DEFAULT_COLORS[self.name_counter % DEFAULT_COLORS.len()])
                .unwrap_or(Color { r: 255, g: 59, b: 48 }),
        };
        let name = match name {
            Some(n) => {
                validate_name(n)?;
                n.to_string()
            }
            None => format!("Layer {}", self.name_counter + 1),
        };
        self.name_counter += 1;

        let layer = Layer::new(name, color, self.canvas_width, self.canvas_height);
        let id = layer.id;
        self.layers.push(layer);
        self.active = Some(id);
        Ok(id)
    }

    /// Delete a layer. Remaining layers keep their relative order (the dense
    /// z set re-derives itself from positions). If the deleted layer was
    /// active, the layer now occupying its former z-index becomes active —
    /// clamped to the new top when the deleted layer was topmost, `None`
    /// when the store empties.
    pub fn delete(&mut self, id: LayerId) -> Result<(), LayerError> {
        let idx = self.index_of(id)?;
        self.layers.remove(idx);
        if self.active == Some(id) {
            self.active = if self.layers.is_empty() {
                None
            } else {
                Some(self.layers[idx.min(self.layers.len() - 1)].id)
            };
        }
        Ok(())
    }

    pub fn rename(&mut self, id: LayerId, name: &str) -> Result<(), LayerError> {
        validate_name(name)?;
        let idx = self.index_of(id)?;
        let layer = &mut self.layers[idx];
        layer.name = name.to_string();
        layer.touch();
        Ok(())
    }

    pub fn set_color(&mut self, id: LayerId, hex: &str) -> Result<(), LayerError> {
        let color = Color::from_hex(hex)?;
        let idx = self.index_of(id)?;
        let layer = &mut self.layers[idx];
        layer.color = color;
        layer.touch();
        Ok(())
    }

    /// Fails on out-of-range values rather than silently clamping.
    pub fn set_opacity(&mut self, id: LayerId, opacity: f32) -> Result<(), LayerError> {
        validate_opacity(opacity)?;
        let idx = self.index_of(id)?;
        let layer = &mut self.layers[idx];
        layer.opacity = opacity;
        layer.touch();
        Ok(())
    }

    pub fn set_visibility(&mut self, id: LayerId, visible: bool) -> Result<(), LayerError> {
        let idx = self.index_of(id)?;
        let layer = &mut self.layers[idx];
        layer.visible = visible;
        layer.touch();
        Ok(())
    }

    /// Swap with the layer above. Already at the top is a no-op, not an
    /// error. Returns whether anything moved.
    pub fn move_up(&mut self, id: LayerId) -> Result<bool, LayerError> {
        let idx = self.index_of(id)?;
        if idx + 1 >= self.layers.len() {
            return Ok(false);
        }
        self.layers.swap(idx, idx + 1);
        self.layers[idx + 1].touch();
        Ok(true)
    }

    /// Swap with the layer below. Already at the bottom is a no-op.
    pub fn move_down(&mut self, id: LayerId) -> Result<bool, LayerError> {
        let idx = self.index_of(id)?;
        if idx == 0 {
            return Ok(false);
        }
        self.layers.swap(idx, idx - 1);
        self.layers[idx - 1].touch();
        Ok(true)
    }

    pub fn move_to_top(&mut self, id: LayerId) -> Result<bool, LayerError> {
        let idx = self.index_of(id)?;
        if idx + 1 == self.layers.len() {
            return Ok(false);
        }
        let mut layer = self.layers.remove(idx);
        layer.touch();
        self.layers.push(layer);
        Ok(true)
    }

    pub fn move_to_bottom(&mut self, id: LayerId) -> Result<bool, LayerError> {
        let idx = self.index_of(id)?;
        if idx == 0 {
            return Ok(false);
        }
        let layer = self.layers.remove(idx);
        self.layers.insert(0, layer);
        self.layers[0].touch();
        Ok(true)
    }

    /// Mutable access by id, bumping `modified_at` — the hook drawing
    /// operations go through.
    pub fn layer_mut(&mut self, id: LayerId) -> Result<&mut Layer, LayerError> {
        let idx = self.index_of(id)?;
        let layer = &mut self.layers[idx];
        layer.touch();
        Ok(layer)
    }

    /// Replace the whole stack from a history snapshot.
    pub fn restore(&mut self, layers: Vec<Layer>, active: Option<LayerId>) {
        self.layers = layers;
        // An id that no longer exists falls back to no active layer
        self.active = active.filter(|id| self.layers.iter().any(|l| l.id == *id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> LayerStore {
        LayerStore::new(100, 100)
    }

    #[test]
    fn create_assigns_dense_z_and_default_names() {
        let mut s = store();
        let a = s.create(None, None).unwrap();
        let b = s.create(None, None).unwrap();
        let c = s.create(None, None).unwrap();
        assert_eq!(s.z_order(), vec![a, b, c]);
        assert_eq!(s.z_index(c), Some(2));
        assert_eq!(s.get(a).unwrap().name, "Layer 1");
        assert_eq!(s.get(c).unwrap().name, "Layer 3");
        assert_eq!(s.active_id(), Some(c));
    }

    #[test]
    fn layer_limit_is_enforced() {
        let mut s = store();
        for _ in 0..MAX_LAYERS {
            s.create(None, None).unwrap();
        }
        let err = s.create(None, None).unwrap_err();
        assert_eq!(err, LayerError::LimitExceeded(MAX_LAYERS));
        assert_eq!(s.len(), MAX_LAYERS);
    }

    #[test]
    fn delete_redistributes_z_and_active() {
        let mut s = store();
        let a = s.create(None, None).unwrap();
        let b = s.create(None, None).unwrap();
        let c = s.create(None, None).unwrap();

        s.set_active(Some(b)).unwrap();
        s.delete(b).unwrap();
        // c slid down into b's former z-index and becomes active
        assert_eq!(s.z_order(), vec![a, c]);
        assert_eq!(s.active_id(), Some(c));

        // Deleting the topmost active layer clamps to the new top
        s.set_active(Some(c)).unwrap();
        s.delete(c).unwrap();
        assert_eq!(s.active_id(), Some(a));

        s.delete(a).unwrap();
        assert_eq!(s.active_id(), None);
        assert!(s.is_empty());
    }

    #[test]
    fn move_to_top_shifts_others_down() {
        let mut s = store();
        let a = s.create(None, None).unwrap();
        let b = s.create(None, None).unwrap();
        let c = s.create(None, None).unwrap();

        assert!(s.move_to_top(a).unwrap());
        assert_eq!(s.z_index(a), Some(2));
        assert_eq!(s.z_index(b), Some(0));
        assert_eq!(s.z_index(c), Some(1));
        // Indices remain exactly {0, 1, 2}
        let mut zs: Vec<usize> = s.z_order().iter().map(|id| s.z_index(*id).unwrap()).collect();
        zs.sort();
        assert_eq!(zs, vec![0, 1, 2]);
    }

    #[test]
    fn moves_at_edges_are_no_ops() {
        let mut s = store();
        let a = s.create(None, None).unwrap();
        let b = s.create(None, None).unwrap();
        assert!(!s.move_down(a).unwrap());
        assert!(!s.move_up(b).unwrap());
        assert!(!s.move_to_bottom(a).unwrap());
        assert!(!s.move_to_top(b).unwrap());
        assert_eq!(s.z_order(), vec![a, b]);
    }

    #[test]
    fn validation_rejects_without_mutating() {
        let mut s = store();
        let a = s.create(None, None).unwrap();
        let name_before = s.get(a).unwrap().name.clone();

        assert!(matches!(s.rename(a, ""), Err(LayerError::InvalidName(_))));
        assert!(matches!(
            s.rename(a, &"x".repeat(51)),
            Err(LayerError::InvalidName(_))
        ));
        assert!(matches!(
            s.set_color(a, "red"),
            Err(LayerError::InvalidColor(_))
        ));
        assert!(matches!(
            s.set_color(a, "#12345"),
            Err(LayerError::InvalidColor(_))
        ));
        assert!(matches!(
            s.set_opacity(a, 1.5),
            Err(LayerError::InvalidOpacity(_))
        ));
        assert!(matches!(
            s.set_opacity(a, f32::NAN),
            Err(LayerError::InvalidOpacity(_))
        ));

        assert_eq!(s.get(a).unwrap().name, name_before);
        assert_eq!(s.get(a).unwrap().opacity, 1.0);
    }

    #[test]
    fn hex_color_round_trip() {
        let c = Color::from_hex("#a1B2c3").unwrap();
        assert_eq!((c.r, c.g, c.b), (0xA1, 0xB2, 0xC3));
        assert_eq!(c.to_hex(), "#A1B2C3");
    }

    #[test]
    fn ops_on_missing_layer_fail() {
        let mut s = store();
        let a = s.create(None, None).unwrap();
        s.delete(a).unwrap();
        assert!(matches!(s.rename(a, "x"), Err(LayerError::NotFound(_))));
        assert!(matches!(s.move_up(a), Err(LayerError::NotFound(_))));
        assert!(matches!(s.set_visibility(a, false), Err(LayerError::NotFound(_))));
    }
}
