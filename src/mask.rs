// ============================================================================
// MASK BUFFER — sparse 64×64-chunked alpha raster with a tracked bounding box
// ============================================================================

use std::sync::Arc;

use crate::geometry::PixelRect;

pub const CHUNK_SIZE: u32 = 64;
const CHUNK_AREA: usize = (CHUNK_SIZE * CHUNK_SIZE) as usize;

/// Sparse single-channel (alpha) raster backed by a flat
/// `Vec<Option<Arc<[u8; 4096]>>>`. Chunk coordinates map to a flat index via
/// `cy * chunks_per_row + cx`, giving O(1) access with zero hashing overhead.
///
/// Chunks are wrapped in `Arc` for copy-on-write semantics: `clone()` only
/// bumps reference counts, so history snapshots share every unmodified chunk.
/// Mutations go through `Arc::make_mut`, which COW-clones only the touched
/// chunk. Everything outside the tracked bounding box is implicitly zero.
#[derive(Clone)]
pub struct MaskBuffer {
    width: u32,
    height: u32,
    chunks_per_row: u32,
    chunks: Vec<Option<Arc<[u8; CHUNK_AREA]>>>,
    /// Minimal rectangle containing every pixel ever written non-zero (or
    /// stamped). Grows on write, clamped to canvas dimensions; shrinks only
    /// on `clear()`.
    bounds: Option<PixelRect>,
}

impl MaskBuffer {
    /// Create an empty (fully transparent) mask covering a canvas.
    pub fn new(width: u32, height: u32) -> Self {
        // Sanity: clamp dimensions to prevent overflow (max ~256 megapixels)
        let (width, height) = {
            let total = (width as u64) * (height as u64);
            if total > 256_000_000 || width == 0 || height == 0 {
                eprintln!(
                    "MaskBuffer::new: dimensions {}×{} out of range, clamped to 1×1",
                    width, height
                );
                (1, 1)
            } else {
                (width, height)
            }
        };
        let chunks_per_row = (width + CHUNK_SIZE - 1) / CHUNK_SIZE;
        let chunks_per_col = (height + CHUNK_SIZE - 1) / CHUNK_SIZE;
        Self {
            width,
            height,
            chunks_per_row,
            chunks: vec![None; (chunks_per_row * chunks_per_col) as usize],
            bounds: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Tracked bounding box, or `None` when nothing has been written.
    pub fn bounds(&self) -> Option<PixelRect> {
        self.bounds
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    #[inline]
    fn chunk_index(&self, x: u32, y: u32) -> usize {
        ((y / CHUNK_SIZE) * self.chunks_per_row + x / CHUNK_SIZE) as usize
    }

    /// Read the alpha at (x, y). Outside the canvas or the tracked bounds
    /// this returns 0 without allocating.
    pub fn read_alpha(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        match self.bounds {
            Some(b) if b.contains(x, y) => {}
            _ => return 0,
        }
        match &self.chunks[self.chunk_index(x, y)] {
            Some(chunk) => {
                chunk[((y % CHUNK_SIZE) * CHUNK_SIZE + x % CHUNK_SIZE) as usize]
            }
            None => 0,
        }
    }

    /// Mutable access to the chunk containing (x, y), allocating a zeroed
    /// chunk on first touch and COW-cloning a shared one.
    fn chunk_mut(&mut self, x: u32, y: u32) -> &mut [u8; CHUNK_AREA] {
        let idx = self.chunk_index(x, y);
        let slot = &mut self.chunks[idx];
        if slot.is_none() {
            *slot = Some(Arc::new([0u8; CHUNK_AREA]));
        }
        Arc::make_mut(slot.as_mut().unwrap())
    }

    /// Write an alpha value at (x, y), expanding the tracked bounds.
    /// Off-canvas writes are ignored (callers clamp before rasterizing).
    /// Writing 0 where no chunk exists is a no-op, which keeps erasing an
    /// already-empty region bit-identical.
    pub fn write_alpha(&mut self, x: u32, y: u32, value: u8) {
        if x >= self.width || y >= self.height {
            return;
        }
        if value == 0 && self.chunks[self.chunk_index(x, y)].is_none() {
            return;
        }
        let local = ((y % CHUNK_SIZE) * CHUNK_SIZE + x % CHUNK_SIZE) as usize;
        self.chunk_mut(x, y)[local] = value;
        if value > 0 {
            self.grow_bounds_point(x, y);
        }
    }

    /// Union-write: keep the maximum of the existing and the new alpha.
    /// Brush strokes use this so overlapping passes never exceed full
    /// opacity.
    pub fn max_alpha(&mut self, x: u32, y: u32, value: u8) {
        if value == 0 || x >= self.width || y >= self.height {
            return;
        }
        let local = ((y % CHUNK_SIZE) * CHUNK_SIZE + x % CHUNK_SIZE) as usize;
        let chunk = self.chunk_mut(x, y);
        if chunk[local] < value {
            chunk[local] = value;
        }
        self.grow_bounds_point(x, y);
    }

    /// Overwrite (not blend) a sub-rectangle with externally-produced alpha.
    /// `alpha` is row-major `region.width × region.height`. The region is
    /// clipped to canvas dimensions; the tracked bounds grow to cover the
    /// clipped region. Used for segmentation results and outline fills.
    pub fn stamp_region(&mut self, alpha: &[u8], region: PixelRect) {
        let Some(clipped) = region.clamp_to(self.width, self.height) else {
            return;
        };
        debug_assert_eq!(alpha.len(), region.area() as usize);
        if alpha.len() < region.area() as usize {
            eprintln!(
                "MaskBuffer::stamp_region: alpha slice too short ({} < {})",
                alpha.len(),
                region.area()
            );
            return;
        }
        for y in clipped.y..clipped.bottom() {
            let src_row = (y - region.y) as usize * region.width as usize;
            for x in clipped.x..clipped.right() {
                let v = alpha[src_row + (x - region.x) as usize];
                if v == 0 && self.chunks[self.chunk_index(x, y)].is_none() {
                    continue;
                }
                let local = ((y % CHUNK_SIZE) * CHUNK_SIZE + x % CHUNK_SIZE) as usize;
                self.chunk_mut(x, y)[local] = v;
            }
        }
        self.grow_bounds_rect(clipped);
    }

    /// Drop all content and reset the tracked bounds.
    pub fn clear(&mut self) {
        for slot in &mut self.chunks {
            *slot = None;
        }
        self.bounds = None;
    }

    /// Copy out the alpha of an arbitrary region (row-major). Pixels outside
    /// the canvas or tracked bounds come back as 0.
    pub fn region_pixels(&self, region: PixelRect) -> Vec<u8> {
        let mut out = vec![0u8; region.area() as usize];
        for y in region.y..region.bottom() {
            let row = (y - region.y) as usize * region.width as usize;
            for x in region.x..region.right() {
                out[row + (x - region.x) as usize] = self.read_alpha(x, y);
            }
        }
        out
    }

    /// Tracked bounds plus a copy of the pixels inside them — the export
    /// payload. `None` for a never-drawn mask.
    pub fn to_region(&self) -> Option<(PixelRect, Vec<u8>)> {
        let b = self.bounds?;
        Some((b, self.region_pixels(b)))
    }

    fn grow_bounds_point(&mut self, x: u32, y: u32) {
        self.bounds = Some(match self.bounds {
            Some(b) => b.include(x, y),
            None => PixelRect::new(x, y, 1, 1),
        });
    }

    fn grow_bounds_rect(&mut self, rect: PixelRect) {
        self.bounds = Some(match self.bounds {
            Some(b) => b.union(rect),
            None => rect,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_outside_bounds_is_zero() {
        let mask = MaskBuffer::new(100, 100);
        assert_eq!(mask.read_alpha(50, 50), 0);
        assert_eq!(mask.read_alpha(1000, 1000), 0);
        assert!(mask.bounds().is_none());
    }

    #[test]
    fn write_grows_bounds_minimally() {
        let mut mask = MaskBuffer::new(200, 200);
        mask.write_alpha(10, 20, 128);
        assert_eq!(mask.bounds(), Some(PixelRect::new(10, 20, 1, 1)));
        mask.write_alpha(150, 30, 255);
        assert_eq!(mask.bounds(), Some(PixelRect::from_min_max(10, 20, 151, 31)));
        assert_eq!(mask.read_alpha(10, 20), 128);
        assert_eq!(mask.read_alpha(150, 30), 255);
    }

    #[test]
    fn off_canvas_writes_are_ignored() {
        let mut mask = MaskBuffer::new(64, 64);
        mask.write_alpha(64, 0, 255);
        mask.write_alpha(0, 9999, 255);
        assert!(mask.bounds().is_none());
    }

    #[test]
    fn max_alpha_never_decreases() {
        let mut mask = MaskBuffer::new(64, 64);
        mask.max_alpha(5, 5, 200);
        mask.max_alpha(5, 5, 100);
        assert_eq!(mask.read_alpha(5, 5), 200);
        mask.max_alpha(5, 5, 255);
        assert_eq!(mask.read_alpha(5, 5), 255);
    }

    #[test]
    fn stamp_region_overwrites() {
        let mut mask = MaskBuffer::new(100, 100);
        mask.write_alpha(12, 12, 255);
        let region = PixelRect::new(10, 10, 4, 4);
        let alpha = vec![7u8; 16];
        mask.stamp_region(&alpha, region);
        // Overwrite, not blend: the previous 255 is replaced
        assert_eq!(mask.read_alpha(12, 12), 7);
        assert_eq!(mask.read_alpha(10, 10), 7);
        assert_eq!(mask.bounds(), Some(region));
    }

    #[test]
    fn stamp_region_clips_to_canvas() {
        let mut mask = MaskBuffer::new(20, 20);
        let region = PixelRect::new(15, 15, 10, 10);
        mask.stamp_region(&vec![255u8; 100], region);
        assert_eq!(mask.bounds(), Some(PixelRect::from_min_max(15, 15, 20, 20)));
        assert_eq!(mask.read_alpha(19, 19), 255);
    }

    #[test]
    fn erase_of_empty_region_is_bit_identical() {
        let mut mask = MaskBuffer::new(128, 128);
        mask.write_alpha(5, 5, 255);
        let before_bounds = mask.bounds();
        let before = mask.region_pixels(PixelRect::new(0, 0, 128, 128));

        // Writing zeros into untouched space must not allocate or change bounds
        for y in 100..120 {
            for x in 100..120 {
                mask.write_alpha(x, y, 0);
            }
        }
        assert_eq!(mask.bounds(), before_bounds);
        assert_eq!(mask.region_pixels(PixelRect::new(0, 0, 128, 128)), before);
    }

    #[test]
    fn clear_resets_everything() {
        let mut mask = MaskBuffer::new(64, 64);
        mask.write_alpha(1, 1, 9);
        mask.clear();
        assert!(mask.bounds().is_none());
        assert_eq!(mask.read_alpha(1, 1), 0);
    }

    #[test]
    fn clone_shares_chunks_structurally() {
        let mut mask = MaskBuffer::new(256, 256);
        mask.write_alpha(10, 10, 200);
        let snapshot = mask.clone();

        // Mutating the original must not disturb the snapshot
        mask.write_alpha(10, 10, 50);
        assert_eq!(snapshot.read_alpha(10, 10), 200);
        assert_eq!(mask.read_alpha(10, 10), 50);

        // A chunk untouched since the clone is literally the same allocation
        mask.write_alpha(200, 200, 1);
        let snap2 = mask.clone();
        assert_eq!(snap2.read_alpha(200, 200), 1);
    }

    #[test]
    fn to_region_round_trips_pixels() {
        let mut mask = MaskBuffer::new(50, 50);
        mask.write_alpha(20, 20, 10);
        mask.write_alpha(25, 22, 99);
        let (bounds, pixels) = mask.to_region().unwrap();
        assert_eq!(bounds, PixelRect::from_min_max(20, 20, 26, 23));
        assert_eq!(pixels.len(), bounds.area() as usize);
        assert_eq!(pixels[0], 10);
        let idx = (22 - bounds.y) as usize * bounds.width as usize + (25 - bounds.x) as usize;
        assert_eq!(pixels[idx], 99);
    }
}
