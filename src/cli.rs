// ============================================================================
// MaskStudio CLI — headless batch export via command-line arguments
// ============================================================================
//
// Usage examples:
//   maskstudio --input photo.jpg --output masks.json
//   maskstudio -i photo.png -m sky.png -m person.png -o out.json --pretty
//   maskstudio -i scan.webp --mask defects.png --output report.json -v
//
// Loads a base image, imports each --mask file (8-bit grayscale PNG, same
// dimensions as the image) as one layer, and writes the export wire format
// as JSON. All processing runs synchronously on the current thread.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::engine::{ImageMeta, MaskEngine, MAX_IMAGE_BYTES, SUPPORTED_FORMATS};
use crate::error::{EngineError, ExportError, ImageLoadError};
use crate::export::{build_export, PngMaskCodec};
use crate::geometry::PixelRect;
use crate::{log_err, log_info};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// MaskStudio headless mask exporter.
#[derive(Parser, Debug)]
#[command(
    name = "maskstudio",
    about = "MaskStudio headless mask exporter",
    long_about = "Load a base image, import grayscale mask files as layers, and write\n\
                  the mask export JSON without opening a UI.\n\n\
                  Example:\n  \
                  maskstudio --input photo.jpg --mask sky.png --output masks.json\n  \
                  maskstudio -i photo.png -m a.png -m b.png -o out.json --pretty"
)]
pub struct CliArgs {
    /// Base image file (png, jpg or webp, at most 20 MB).
    #[arg(short, long, value_name = "IMAGE")]
    pub input: PathBuf,

    /// Grayscale mask PNG(s), one layer each, in bottom-to-top z-order.
    /// Must match the base image dimensions. Layers are named after the
    /// file stem.
    #[arg(short, long, value_name = "MASK.png")]
    pub mask: Vec<PathBuf>,

    /// Output JSON file.
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Pretty-print the output JSON.
    #[arg(long)]
    pub pretty: bool,

    /// Print per-step timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the export and return an OS exit code (`0` success, `1` failure).
pub fn run(args: CliArgs) -> ExitCode {
    let started = Instant::now();
    match export_file(&args) {
        Ok(layer_count) => {
            if args.verbose {
                println!(
                    "wrote {} ({} layer{}) in {:.1?}",
                    args.output.display(),
                    layer_count,
                    if layer_count == 1 { "" } else { "s" },
                    started.elapsed()
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            log_err!("cli export failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn export_file(args: &CliArgs) -> Result<usize, EngineError> {
    let mut engine = MaskEngine::new();

    let (pixels, meta) = load_source(&args.input)?;
    let (width, height) = pixels.dimensions();
    engine.load_image(pixels, meta)?;
    log_info!("cli: loaded {} ({}×{})", args.input.display(), width, height);

    for path in &args.mask {
        let name = layer_name(path);
        let id = engine.add_layer(Some(&name), None)?;
        if let Some((bounds, alpha)) = load_mask(path, width, height)? {
            engine.import_mask(id, &alpha, bounds)?;
        }
        if args.verbose {
            println!("imported mask {} as layer {:?}", path.display(), name);
        }
    }

    let snapshot = engine.export_snapshot()?;
    let export = build_export(&snapshot, &PngMaskCodec)?;
    let json = if args.pretty {
        serde_json::to_string_pretty(&export)
    } else {
        serde_json::to_string(&export)
    }
    .map_err(|e| ExportError::CodecFailed(e.to_string()))?;

    fs::write(&args.output, json)
        .map_err(|e| ExportError::CodecFailed(format!("{}: {}", args.output.display(), e)))?;
    Ok(snapshot.layers.len())
}

// ============================================================================
// File loading
// ============================================================================

/// Load and validate the base image: size cap before decoding, format from
/// the file extension, then a full decode to RGBA.
fn load_source(path: &Path) -> Result<(image::RgbaImage, ImageMeta), ImageLoadError> {
    let file_size = fs::metadata(path)
        .map_err(|e| ImageLoadError::DecodeFailed(format!("{}: {}", path.display(), e)))?
        .len();
    if file_size > MAX_IMAGE_BYTES {
        return Err(ImageLoadError::Oversize { size: file_size, max: MAX_IMAGE_BYTES });
    }

    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !SUPPORTED_FORMATS.contains(&format.as_str()) {
        return Err(ImageLoadError::UnsupportedFormat(format));
    }

    let pixels = image::open(path)
        .map_err(|e| ImageLoadError::DecodeFailed(e.to_string()))?
        .to_rgba8();

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image")
        .to_string();
    Ok((pixels, ImageMeta { file_name, file_size, format }))
}

/// Load a grayscale mask file and return its tight bounding box plus the
/// row-major alpha covering it, or `None` for an all-zero mask.
fn load_mask(path: &Path, width: u32, height: u32) -> Result<Option<(PixelRect, Vec<u8>)>, ImageLoadError> {
    let luma = image::open(path)
        .map_err(|e| ImageLoadError::DecodeFailed(format!("{}: {}", path.display(), e)))?
        .to_luma8();
    if luma.dimensions() != (width, height) {
        return Err(ImageLoadError::DecodeFailed(format!(
            "mask {} is {}×{}, image is {}×{}",
            path.display(),
            luma.width(),
            luma.height(),
            width,
            height
        )));
    }

    let mut bounds: Option<PixelRect> = None;
    for (x, y, p) in luma.enumerate_pixels() {
        if p.0[0] > 0 {
            bounds = Some(match bounds {
                Some(b) => b.include(x, y),
                None => PixelRect::new(x, y, 1, 1),
            });
        }
    }
    let Some(bounds) = bounds else {
        return Ok(None);
    };

    let mut alpha = Vec::with_capacity(bounds.area() as usize);
    for y in bounds.y..bounds.bottom() {
        for x in bounds.x..bounds.right() {
            alpha.push(luma.get_pixel(x, y).0[0]);
        }
    }
    Ok(Some((bounds, alpha)))
}

fn layer_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Mask")
        .trim()
        .to_string();
    if stem.is_empty() {
        "Mask".to_string()
    } else {
        // Layer names cap at 50 characters
        stem.chars().take(50).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_names_come_from_file_stems() {
        assert_eq!(layer_name(Path::new("masks/sky.png")), "sky");
        assert_eq!(layer_name(Path::new("Person 2.png")), "Person 2");
        let long = format!("{}.png", "x".repeat(80));
        assert_eq!(layer_name(Path::new(&long)).chars().count(), 50);
    }

    #[test]
    fn missing_input_surfaces_a_load_error() {
        let err = load_source(Path::new("no-such-file.png")).unwrap_err();
        assert!(matches!(err, ImageLoadError::DecodeFailed(_)));
    }
}
