// ============================================================================
// ERROR TAXONOMY
// ============================================================================
//
// Every failure the engine can surface is one of the five category enums
// below. All of them are recoverable: a failed call leaves engine state
// untouched, and the caller fixes its input and retries. `EngineError` is
// the umbrella type returned by the facade and the CLI.

use crate::layer::LayerId;

/// Failures while accepting a base image.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageLoadError {
    /// File exceeds the 20 MB input limit.
    Oversize { size: u64, max: u64 },
    /// Format outside {png, jpg, webp}.
    UnsupportedFormat(String),
    DecodeFailed(String),
    ZeroDimension { width: u32, height: u32 },
}

impl std::fmt::Display for ImageLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageLoadError::Oversize { size, max } => {
                write!(f, "image file is {} bytes, limit is {} bytes", size, max)
            }
            ImageLoadError::UnsupportedFormat(fmt) => {
                write!(f, "unsupported image format '{}' (expected png, jpg or webp)", fmt)
            }
            ImageLoadError::DecodeFailed(e) => write!(f, "failed to decode image: {}", e),
            ImageLoadError::ZeroDimension { width, height } => {
                write!(f, "image has degenerate dimensions {}×{}", width, height)
            }
        }
    }
}

impl std::error::Error for ImageLoadError {}

/// Failures in layer CRUD and reordering.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerError {
    /// The 100-layer cap was hit.
    LimitExceeded(usize),
    /// Name empty or longer than 50 characters.
    InvalidName(String),
    /// Color string is not `#RRGGBB` hex.
    InvalidColor(String),
    /// Opacity outside [0, 1] or non-finite.
    InvalidOpacity(f32),
    NotFound(LayerId),
    /// Layers cannot exist before a base image is loaded.
    NoImage,
}

impl std::fmt::Display for LayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerError::LimitExceeded(max) => write!(f, "layer limit of {} reached", max),
            LayerError::InvalidName(n) => {
                write!(f, "invalid layer name {:?} (must be 1–50 characters)", n)
            }
            LayerError::InvalidColor(c) => {
                write!(f, "invalid layer color {:?} (expected #RRGGBB)", c)
            }
            LayerError::InvalidOpacity(o) => write!(f, "invalid opacity {} (must be in [0, 1])", o),
            LayerError::NotFound(id) => write!(f, "no layer with id {}", id),
            LayerError::NoImage => write!(f, "cannot create layers before an image is loaded"),
        }
    }
}

impl std::error::Error for LayerError {}

/// Failures while applying a drawing tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolError {
    /// Drawing requires an active layer.
    NoActiveLayer,
    /// Drawing requires a loaded image.
    NoImage,
    /// `close_outline` with fewer than 3 accumulated points.
    OutlineTooShort(usize),
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolError::NoActiveLayer => write!(f, "no active layer to draw on"),
            ToolError::NoImage => write!(f, "no image loaded"),
            ToolError::OutlineTooShort(n) => {
                write!(f, "outline needs at least 3 points to close, has {}", n)
            }
        }
    }
}

impl std::error::Error for ToolError {}

/// Failures from the segmentation provider path.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentationError {
    /// Result arrived past the 2000 ms deadline.
    Timeout(u64),
    /// Result belongs to a superseded or cancelled request.
    Stale,
    ProviderFailed(String),
}

impl std::fmt::Display for SegmentationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentationError::Timeout(ms) => {
                write!(f, "segmentation timed out after {} ms", ms)
            }
            SegmentationError::Stale => write!(f, "segmentation result discarded (stale request)"),
            SegmentationError::ProviderFailed(e) => write!(f, "segmentation provider failed: {}", e),
        }
    }
}

impl std::error::Error for SegmentationError {}

/// Failures while exporting masks.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportError {
    NoImage,
    NoLayers,
    CodecFailed(String),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::NoImage => write!(f, "nothing to export: no image loaded"),
            ExportError::NoLayers => write!(f, "nothing to export: no layers"),
            ExportError::CodecFailed(e) => write!(f, "mask codec failed: {}", e),
        }
    }
}

impl std::error::Error for ExportError {}

/// Umbrella error for the engine facade and the CLI.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    Image(ImageLoadError),
    Layer(LayerError),
    Tool(ToolError),
    Segmentation(SegmentationError),
    Export(ExportError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Image(e) => e.fmt(f),
            EngineError::Layer(e) => e.fmt(f),
            EngineError::Tool(e) => e.fmt(f),
            EngineError::Segmentation(e) => e.fmt(f),
            EngineError::Export(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ImageLoadError> for EngineError {
    fn from(e: ImageLoadError) -> Self {
        EngineError::Image(e)
    }
}

impl From<LayerError> for EngineError {
    fn from(e: LayerError) -> Self {
        EngineError::Layer(e)
    }
}

impl From<ToolError> for EngineError {
    fn from(e: ToolError) -> Self {
        EngineError::Tool(e)
    }
}

impl From<SegmentationError> for EngineError {
    fn from(e: SegmentationError) -> Self {
        EngineError::Segmentation(e)
    }
}

impl From<ExportError> for EngineError {
    fn from(e: ExportError) -> Self {
        EngineError::Export(e)
    }
}
