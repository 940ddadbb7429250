// ============================================================================
// EXPORT — snapshot types, wire format, mask codec
// ============================================================================
//
// Two stages, deliberately separated: the engine produces an `ExportSnapshot`
// (raw copied pixels, no encoding), and `build_export` turns it into the
// versioned wire structure with each mask raster compressed to a
// base64-encoded grayscale PNG. The codec is a trait so hosts can swap the
// encoding; `PngMaskCodec` is the shipped implementation.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::ExportError;
use crate::geometry::PixelRect;
use crate::layer::{now_millis, Color, LayerId};

pub const EXPORT_VERSION: &str = "1.0";
pub const CANVAS_VERSION: u32 = 1;

// ---- engine-side snapshot (no encoding) ------------------------------------

pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub file_name: String,
}

/// One layer's raster and metadata as copied out of the engine. `bounds` is
/// `None` for a layer that has never been painted; `pixels` is row-major
/// alpha covering `bounds`.
pub struct LayerMaskData {
    pub id: LayerId,
    pub name: String,
    pub color: Color,
    pub z_index: usize,
    pub bounds: Option<PixelRect>,
    pub pixels: Vec<u8>,
}

pub struct ExportSnapshot {
    pub image: ImageInfo,
    pub layers: Vec<LayerMaskData>,
}

// ---- wire format -----------------------------------------------------------

#[derive(Serialize, Deserialize, Debug)]
pub struct MaskExport {
    pub version: String,
    pub image: ImageEntry,
    pub masks: Vec<MaskEntry>,
    pub metadata: ExportMetadata,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ImageEntry {
    pub width: u32,
    pub height: u32,
    pub file_name: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct MaskEntry {
    pub id: String,
    pub name: String,
    /// `#RRGGBB`
    pub color: String,
    /// Base64 grayscale PNG covering `bounds`; empty string for a layer
    /// with no painted pixels.
    pub mask_data: String,
    pub bounds: PixelRect,
    pub z_index: usize,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ExportMetadata {
    /// ISO-8601 UTC, second precision.
    pub exported_at: String,
    pub layer_count: usize,
    pub canvas_version: u32,
}

// ---- mask codec ------------------------------------------------------------

/// A decoded mask raster: row-major alpha, dimensions carried alongside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskRegion {
    pub width: u32,
    pub height: u32,
    pub alpha: Vec<u8>,
}

/// Encoding strategy for mask rasters on the wire. Round-trip must be
/// lossless for 8-bit alpha.
pub trait MaskCodec {
    fn encode(&self, region: &MaskRegion) -> Result<String, ExportError>;
    fn decode(&self, data: &str) -> Result<MaskRegion, ExportError>;
}

/// Grayscale PNG, base64-encoded.
pub struct PngMaskCodec;

impl MaskCodec for PngMaskCodec {
    fn encode(&self, region: &MaskRegion) -> Result<String, ExportError> {
        if region.width == 0
            || region.height == 0
            || region.alpha.len() != (region.width as usize * region.height as usize)
        {
            return Err(ExportError::CodecFailed(format!(
                "region {}×{} does not match {} alpha bytes",
                region.width,
                region.height,
                region.alpha.len()
            )));
        }
        let mut buf = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut buf, region.width, region.height);
            encoder.set_color(png::ColorType::Grayscale);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder
                .write_header()
                .map_err(|e| ExportError::CodecFailed(e.to_string()))?;
            writer
                .write_image_data(&region.alpha)
                .map_err(|e| ExportError::CodecFailed(e.to_string()))?;
        }
        Ok(base64::engine::general_purpose::STANDARD.encode(&buf))
    }

    fn decode(&self, data: &str) -> Result<MaskRegion, ExportError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| ExportError::CodecFailed(e.to_string()))?;
        let decoder = png::Decoder::new(bytes.as_slice());
        let mut reader = decoder
            .read_info()
            .map_err(|e| ExportError::CodecFailed(e.to_string()))?;
        let mut out = vec![0u8; reader.output_buffer_size()];
        let info = reader
            .next_frame(&mut out)
            .map_err(|e| ExportError::CodecFailed(e.to_string()))?;
        if info.color_type != png::ColorType::Grayscale || info.bit_depth != png::BitDepth::Eight {
            return Err(ExportError::CodecFailed(format!(
                "expected 8-bit grayscale mask, got {:?}/{:?}",
                info.color_type, info.bit_depth
            )));
        }
        out.truncate(info.buffer_size());
        Ok(MaskRegion { width: info.width, height: info.height, alpha: out })
    }
}

// ---- assembly --------------------------------------------------------------

/// Assemble the wire structure from an engine snapshot. Unpainted layers
/// appear with empty `mask_data` and a zero bounds rect so consumers see
/// every layer, painted or not.
pub fn build_export(snapshot: &ExportSnapshot, codec: &dyn MaskCodec) -> Result<MaskExport, ExportError> {
    let masks = snapshot
        .layers
        .iter()
        .map(|layer| {
            let (bounds, mask_data) = match layer.bounds {
                Some(b) => {
                    let region = MaskRegion {
                        width: b.width,
                        height: b.height,
                        alpha: layer.pixels.clone(),
                    };
                    (b, codec.encode(&region)?)
                }
                None => (PixelRect::new(0, 0, 0, 0), String::new()),
            };
            Ok(MaskEntry {
                id: layer.id.to_string(),
                name: layer.name.clone(),
                color: layer.color.to_hex(),
                mask_data,
                bounds,
                z_index: layer.z_index,
            })
        })
        .collect::<Result<Vec<_>, ExportError>>()?;

    Ok(MaskExport {
        version: EXPORT_VERSION.to_string(),
        image: ImageEntry {
            width: snapshot.image.width,
            height: snapshot.image.height,
            file_name: snapshot.image.file_name.clone(),
        },
        masks,
        metadata: ExportMetadata {
            exported_at: iso8601_utc(now_millis()),
            layer_count: snapshot.layers.len(),
            canvas_version: CANVAS_VERSION,
        },
    })
}

// ---- timestamps ------------------------------------------------------------

/// Format Unix milliseconds as ISO-8601 UTC with second precision.
pub fn iso8601_utc(unix_millis: u64) -> String {
    let secs = unix_millis / 1000;
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    let rem = secs % 86_400;
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        day,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

/// Days since 1970-01-01 to (year, month, day), Gregorian.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}
