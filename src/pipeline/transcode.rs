//! Conditional resize and re-encode of raster images before upload.
//!
//! Large photos straight out of a camera are routinely 10–30 MB, far more
//! than a CMS needs to serve. The policy here is banded by file size: the
//! bigger the file, the lower the JPEG quality and the smaller the bounding
//! box. Files under 1 MB are never touched.
//!
//! | Size            | Quality | Resize when either side exceeds |
//! |-----------------|---------|---------------------------------|
//! | < 1 MB          | n/a     | n/a                             |
//! | 1 MB ..= 5 MB   | 95      | 5000 px                         |
//! | 5 MB ..= 10 MB  | 90      | 4000 px                         |
//! | > 10 MB         | 85      | 3000 px                         |
//!
//! PNG stays PNG (best compression, adaptive filtering, alpha kept); every
//! other raster format becomes JPEG. If the re-encoded bytes are not
//! strictly smaller than the original, the original is used unchanged.
//!
//! `image` decodes and resizes. JPEG output goes through `jpeg-encoder` as
//! progressive JPEG with optimized Huffman tables.

use crate::error::UploadError;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use jpeg_encoder::{ColorType, Encoder as JpegEncoder};
use std::io::Cursor;
use tracing::debug;

/// Bytes per megabyte used by every size threshold.
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Size band an asset falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityBand {
    /// Under 1 MB: no transcoding.
    Untouched,
    VeryHigh,
    High,
    Aggressive,
}

impl QualityBand {
    pub fn for_size(size_mb: f64) -> Self {
        if size_mb < 1.0 {
            QualityBand::Untouched
        } else if size_mb <= 5.0 {
            QualityBand::VeryHigh
        } else if size_mb <= 10.0 {
            QualityBand::High
        } else {
            QualityBand::Aggressive
        }
    }

    /// JPEG quality for this band.
    pub fn quality(self) -> Option<u8> {
        match self {
            QualityBand::Untouched => None,
            QualityBand::VeryHigh => Some(95),
            QualityBand::High => Some(90),
            QualityBand::Aggressive => Some(85),
        }
    }

    /// Bounding-box edge beyond which the image is downscaled.
    pub fn max_dimension(self) -> Option<u32> {
        match self {
            QualityBand::Untouched => None,
            QualityBand::VeryHigh => Some(5000),
            QualityBand::High => Some(4000),
            QualityBand::Aggressive => Some(3000),
        }
    }
}

/// Raster formats the transcoder accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterFormat {
    Png,
    Jpeg,
    Gif,
    WebP,
    Bmp,
    Tiff,
}

impl RasterFormat {
    /// Map a declared MIME type to a raster format. Vector and non-image
    /// types return `None` and bypass transcoding.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Some(RasterFormat::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(RasterFormat::Jpeg),
            "image/gif" => Some(RasterFormat::Gif),
            "image/webp" => Some(RasterFormat::WebP),
            "image/bmp" | "image/x-ms-bmp" => Some(RasterFormat::Bmp),
            "image/tiff" => Some(RasterFormat::Tiff),
            _ => None,
        }
    }
}

/// What to do with one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeDecision {
    pub band: QualityBand,
    /// JPEG quality; `None` when untouched.
    pub quality: Option<u8>,
    /// Bounding-box edge to fit into; `None` when no resize is needed.
    pub resize_to: Option<u32>,
    /// Re-encode as JPEG rather than keeping the source format.
    pub normalize_to_jpeg: bool,
}

impl TranscodeDecision {
    pub fn should_transcode(&self) -> bool {
        self.band != QualityBand::Untouched
    }
}

/// Decide the transcode policy for an image of `size_mb` and the given
/// pixel dimensions.
pub fn decide(size_mb: f64, width: u32, height: u32, format: RasterFormat) -> TranscodeDecision {
    let band = QualityBand::for_size(size_mb);
    if band == QualityBand::Untouched {
        return TranscodeDecision {
            band,
            quality: None,
            resize_to: None,
            normalize_to_jpeg: false,
        };
    }

    let resize_to = band
        .max_dimension()
        .filter(|&limit| width > limit || height > limit);

    TranscodeDecision {
        band,
        quality: band.quality(),
        resize_to,
        normalize_to_jpeg: format != RasterFormat::Png,
    }
}

/// A re-encoded image that beat the original on size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub extension: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Result of [`transcode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Transcoded(TranscodedImage),
    /// The candidate was not smaller; upload the original bytes.
    KeptOriginal { candidate_len: usize },
    /// The decision said not to transcode.
    Skipped,
}

/// Read pixel dimensions from the image header without a full decode.
pub fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), UploadError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| UploadError::Transcode(format!("Unreadable image header: {e}")))?
        .into_dimensions()
        .map_err(|e| UploadError::Transcode(format!("Unreadable image dimensions: {e}")))
}

/// Apply `decision` to `original`.
///
/// CPU-bound; the upload pipeline calls it from `spawn_blocking`.
pub fn transcode(
    original: &[u8],
    decision: &TranscodeDecision,
) -> Result<TranscodeOutcome, UploadError> {
    if !decision.should_transcode() {
        return Ok(TranscodeOutcome::Skipped);
    }

    let img = image::load_from_memory(original)
        .map_err(|e| UploadError::Transcode(format!("Decode failed: {e}")))?;

    let img = match decision.resize_to {
        Some(limit) if img.width() > limit || img.height() > limit => {
            debug!(
                "Resizing {}x{} into {}px bounding box",
                img.width(),
                img.height(),
                limit
            );
            img.resize(limit, limit, FilterType::Lanczos3)
        }
        _ => img,
    };

    let (content_type, extension, bytes) = if decision.normalize_to_jpeg {
        let quality = decision.quality.unwrap_or(95);
        ("image/jpeg", "jpg", encode_jpeg(&img, quality)?)
    } else {
        ("image/png", "png", encode_png(&img)?)
    };

    if bytes.len() >= original.len() {
        debug!(
            "Transcoded candidate ({} bytes) not smaller than original ({} bytes); keeping original",
            bytes.len(),
            original.len()
        );
        return Ok(TranscodeOutcome::KeptOriginal {
            candidate_len: bytes.len(),
        });
    }

    debug!(
        "Transcoded {} → {} bytes ({})",
        original.len(),
        bytes.len(),
        content_type
    );
    Ok(TranscodeOutcome::Transcoded(TranscodedImage {
        bytes,
        content_type,
        extension,
        width: img.width(),
        height: img.height(),
    }))
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, UploadError> {
    let (width, height) = match (u16::try_from(img.width()), u16::try_from(img.height())) {
        (Ok(w), Ok(h)) => (w, h),
        _ => {
            return Err(UploadError::Transcode(format!(
                "{}x{} exceeds the JPEG size limit",
                img.width(),
                img.height()
            )))
        }
    };
    // JPEG has no alpha channel.
    let rgb = img.to_rgb8();

    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new(&mut buf, quality);
    encoder.set_progressive(true);
    encoder.set_optimized_huffman_tables(true);
    encoder
        .encode(rgb.as_raw(), width, height, ColorType::Rgb)
        .map_err(|e| UploadError::Transcode(format!("JPEG encode failed: {e}")))?;
    Ok(buf)
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, UploadError> {
    let mut buf = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buf, CompressionType::Best, PngFilter::Adaptive);
    img.write_with_encoder(encoder)
        .map_err(|e| UploadError::Transcode(format!("PNG encode failed: {e}")))?;
    Ok(buf)
}
