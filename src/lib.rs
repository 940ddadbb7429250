//! MaskStudio — a raster mask-editing engine: tinted mask layers over a base
//! image, freehand/outline/segmentation tools, bounded undo/redo history and
//! a zoom/pan viewport, plus a JSON export format and a headless CLI.

pub mod cli;
pub mod compositor;
pub mod engine;
pub mod error;
pub mod export;
pub mod geometry;
pub mod history;
pub mod layer;
pub mod logger;
pub mod mask;
pub mod segmentation;
pub mod stroke;
pub mod viewport;

pub use engine::{ImageMeta, MaskEngine, SourceImage};
pub use error::EngineError;
pub use export::{build_export, MaskCodec, PngMaskCodec};
pub use geometry::{PixelRect, Point};
pub use layer::{Color, Layer, LayerId};
pub use segmentation::{SegmentationProvider, SegmentationResult};
pub use stroke::{BrushSettings, Tool};
pub use viewport::Viewport;
