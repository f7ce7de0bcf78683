//! Image encoding: raw samples or JPEG bytes → JPEG at a target quality.
//!
//! The recompression walker only ever talks to [`ImageCodec::reencode`]. The
//! in-process [`JpegCodec`] decodes with the `image` crate and encodes with
//! its baseline JPEG encoder; tests substitute their own codecs.

use crate::error::SkipReason;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use tracing::debug;

/// Interleaved 8-bit samples with known geometry.
#[derive(Debug, Clone, Copy)]
pub struct RawImage<'a> {
    pub samples: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// 1 (gray) or 3 (RGB).
    pub channels: u8,
}

/// What the walker hands to the codec.
#[derive(Debug, Clone, Copy)]
pub enum CodecInput<'a> {
    /// An already lossy-encoded (DCT) image.
    Jpeg(&'a [u8]),
    /// Unfiltered pixel samples.
    Raw(RawImage<'a>),
}

/// Re-encodes one image to a lossy photographic encoding.
///
/// Implementations must be `Send + Sync`: a tier fans images out over the
/// blocking thread pool.
pub trait ImageCodec: Send + Sync {
    /// Short identifier for logs and `Debug` output.
    fn name(&self) -> &'static str;

    /// Encode `input` as JPEG at `quality` (1–100).
    fn reencode(&self, input: CodecInput<'_>, quality: u8) -> Result<Vec<u8>, SkipReason>;
}

/// In-process JPEG codec backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCodec;

impl ImageCodec for JpegCodec {
    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn reencode(&self, input: CodecInput<'_>, quality: u8) -> Result<Vec<u8>, SkipReason> {
        let img = match input {
            CodecInput::Jpeg(bytes) => image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
                .map_err(|e| SkipReason::Decode(e.to_string()))?,
            CodecInput::Raw(raw) => raw_to_image(raw)?,
        };
        encode_jpeg(&img, quality)
    }
}

fn raw_to_image(raw: RawImage<'_>) -> Result<DynamicImage, SkipReason> {
    let len = (raw.width as usize)
        .checked_mul(raw.height as usize)
        .and_then(|n| n.checked_mul(usize::from(raw.channels)))
        .ok_or(SkipReason::GeometryMismatch {
            expected: usize::MAX,
            actual: raw.samples.len(),
        })?;
    let samples = raw
        .samples
        .get(..len)
        .ok_or(SkipReason::GeometryMismatch {
            expected: len,
            actual: raw.samples.len(),
        })?
        .to_vec();

    match raw.channels {
        1 => GrayImage::from_raw(raw.width, raw.height, samples)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| SkipReason::Codec("gray buffer rejected".into())),
        3 => RgbImage::from_raw(raw.width, raw.height, samples)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| SkipReason::Codec("RGB buffer rejected".into())),
        n => Err(SkipReason::Codec(format!("{n}-channel samples cannot be JPEG-encoded"))),
    }
}

/// Encode as baseline JPEG, keeping grayscale images single-channel.
fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, SkipReason> {
    let mut buf = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
        let result = match img {
            DynamicImage::ImageLuma8(gray) => encoder.encode_image(gray),
            other => encoder.encode_image(&other.to_rgb8()),
        };
        result.map_err(|e| SkipReason::Codec(e.to_string()))?;
    }
    debug!(
        "Encoded {}x{} image at q{} → {} bytes",
        img.width(),
        img.height(),
        quality,
        buf.len()
    );
    Ok(buf)
}
