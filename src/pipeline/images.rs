//! Image XObject inspection and rewriting.
//!
//! Work is split in two so the expensive half can leave the async runtime:
//!
//! 1. [`collect`] walks the object table on the caller's thread, resolving
//!    every indirect value an image needs (geometry, colour space, filter
//!    chain, decode parameters) into an owned [`ImageJob`].
//! 2. [`rewrite`] is pure and `Send`: decode, convert, hand the pixels to the
//!    [`ImageCodec`], and build the replacement stream. The recompression
//!    engine runs it on the blocking pool.
//!
//! Flate layers are size-checked against the declared geometry before lopdf
//! decodes them, so a small stream cannot expand without bound.
//!
//! Any [`SkipReason`] leaves the image exactly as it was.

use crate::error::SkipReason;
use crate::pipeline::encode::{CodecInput, ImageCodec, RawImage};
use flate2::read::ZlibDecoder;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::io::{self, Read};

/// Reference chains longer than this are treated as broken.
const MAX_DEREF_DEPTH: usize = 16;

/// Headroom over the raw sample size allowed for a Flate-wrapped JPEG.
const JPEG_SLACK: usize = 64 * 1024;

/// Colour model an image's samples are interpreted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColourModel {
    Gray,
    Rgb,
    Cmyk,
}

impl ColourModel {
    pub fn channels(self) -> usize {
        match self {
            ColourModel::Gray => 1,
            ColourModel::Rgb => 3,
            ColourModel::Cmyk => 4,
        }
    }
}

/// How the stored bytes are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Lossy photographic data, optionally wrapped in a Flate layer.
    Dct { flate: bool },
    /// Raw samples, optionally Flate-compressed.
    Raw { flate: bool },
}

/// Everything [`rewrite`] needs to know about one image, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    pub width: u32,
    pub height: u32,
    pub colour: ColourModel,
    pub encoding: Encoding,
    /// PNG predictor (10–15) of the Flate layer. Its `Columns`, `Colors` and
    /// `BitsPerComponent` have been checked against the image geometry.
    pub predictor: Option<i64>,
}

impl ImageHeader {
    /// Bytes of 8-bit samples the geometry needs, or `None` on overflow.
    pub fn sample_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.colour.channels())
    }

    fn geometry_overflow(&self, actual: usize) -> SkipReason {
        SkipReason::GeometryMismatch {
            expected: usize::MAX,
            actual,
        }
    }
}

/// One image ready for the blocking pool.
#[derive(Debug, Clone)]
pub struct ImageJob {
    pub id: ObjectId,
    pub stream: Stream,
    pub header: ImageHeader,
}

/// Result of [`collect`]: candidates plus the images rejected up front.
#[derive(Debug, Default)]
pub struct Collected {
    pub jobs: Vec<ImageJob>,
    pub skipped: Vec<(ObjectId, SkipReason)>,
}

/// Find every image XObject in `doc` and resolve its header.
pub fn collect(doc: &Document) -> Collected {
    let mut out = Collected::default();
    for (&id, object) in &doc.objects {
        let Object::Stream(stream) = object else {
            continue;
        };
        if !is_image(&stream.dict) {
            continue;
        }
        match read_header(doc, &stream.dict) {
            Ok(header) => out.jobs.push(ImageJob {
                id,
                stream: stream.clone(),
                header,
            }),
            Err(reason) => out.skipped.push((id, reason)),
        }
    }
    out
}

fn is_image(dict: &Dictionary) -> bool {
    matches!(dict.get(b"Subtype").and_then(Object::as_name), Ok(b"Image"))
}

/// Follow indirect references until a direct value is reached.
fn resolve<'a>(doc: &'a Document, mut object: &'a Object) -> Option<&'a Object> {
    for _ in 0..MAX_DEREF_DEPTH {
        match object {
            Object::Reference(id) => object = doc.get_object(*id).ok()?,
            direct => return Some(direct),
        }
    }
    None
}

fn lookup<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    dict.get(key).ok().and_then(|o| resolve(doc, o))
}

fn integer(doc: &Document, dict: &Dictionary, key: &str) -> Result<i64, SkipReason> {
    lookup(doc, dict, key.as_bytes())
        .and_then(|o| o.as_i64().ok())
        .ok_or_else(|| SkipReason::MissingKey(key.to_string()))
}

/// Resolve width, height, bit depth, colour model and filter chain.
pub fn read_header(doc: &Document, dict: &Dictionary) -> Result<ImageHeader, SkipReason> {
    let width = integer(doc, dict, "Width")?;
    let height = integer(doc, dict, "Height")?;
    if width < 2 || height < 2 {
        return Err(SkipReason::TooSmall { width, height });
    }
    let (Ok(width), Ok(height)) = (u32::try_from(width), u32::try_from(height)) else {
        return Err(SkipReason::TooSmall { width, height });
    };

    if matches!(lookup(doc, dict, b"ImageMask"), Some(Object::Boolean(true))) {
        return Err(SkipReason::UnsupportedBitDepth(1));
    }
    let bits = integer(doc, dict, "BitsPerComponent")?;
    if bits != 8 {
        return Err(SkipReason::UnsupportedBitDepth(bits));
    }

    let colour = match lookup(doc, dict, b"ColorSpace") {
        Some(cs) => colour_model(doc, cs)?,
        None => ColourModel::Rgb,
    };

    let filters = filter_names(doc, dict)?;
    let encoding = match filters.as_slice() {
        [] => Encoding::Raw { flate: false },
        [f] if is_flate(f) => Encoding::Raw { flate: true },
        [f] if is_dct(f) => Encoding::Dct { flate: false },
        [a, b] if is_flate(a) && is_dct(b) => Encoding::Dct { flate: true },
        other => {
            let names: Vec<_> = other.iter().map(|n| String::from_utf8_lossy(n)).collect();
            return Err(SkipReason::UnsupportedFilter(names.join(",")));
        }
    };

    let predictor = match encoding {
        Encoding::Raw { flate: true } | Encoding::Dct { flate: true } => {
            let parms = flate_parms(doc, dict);
            read_predictor(doc, parms, encoding, width, colour)?
        }
        _ => None,
    };

    Ok(ImageHeader {
        width,
        height,
        colour,
        encoding,
        predictor,
    })
}

fn is_flate(name: &[u8]) -> bool {
    name == b"FlateDecode" || name == b"Fl"
}

fn is_dct(name: &[u8]) -> bool {
    name == b"DCTDecode" || name == b"DCT"
}

fn filter_names(doc: &Document, dict: &Dictionary) -> Result<Vec<Vec<u8>>, SkipReason> {
    match lookup(doc, dict, b"Filter") {
        None | Some(Object::Null) => Ok(Vec::new()),
        Some(Object::Name(name)) => Ok(vec![name.clone()]),
        Some(Object::Array(items)) => items
            .iter()
            .map(|item| match resolve(doc, item) {
                Some(Object::Name(name)) => Ok(name.clone()),
                _ => Err(SkipReason::MissingKey("Filter".into())),
            })
            .collect(),
        Some(_) => Err(SkipReason::MissingKey("Filter".into())),
    }
}

/// Decode parameters of the Flate layer, which is always the first filter.
fn flate_parms<'a>(doc: &'a Document, dict: &'a Dictionary) -> Option<&'a Dictionary> {
    match lookup(doc, dict, b"DecodeParms")? {
        Object::Dictionary(parms) => Some(parms),
        Object::Array(items) => match resolve(doc, items.first()?)? {
            Object::Dictionary(parms) => Some(parms),
            _ => None,
        },
        _ => None,
    }
}

/// A PNG predictor is only accepted when its row layout is exactly the
/// image's: `Columns` = width, `Colors` = channels, 8 bits per component.
fn read_predictor(
    doc: &Document,
    parms: Option<&Dictionary>,
    encoding: Encoding,
    width: u32,
    colour: ColourModel,
) -> Result<Option<i64>, SkipReason> {
    let Some(parms) = parms else {
        return Ok(None);
    };
    let get = |key: &str, default: i64| {
        lookup(doc, parms, key.as_bytes())
            .and_then(|o| o.as_i64().ok())
            .unwrap_or(default)
    };
    let require = |key: &str, default: i64, expected: usize| {
        let declared = get(key, default);
        match usize::try_from(declared) {
            Ok(actual) if actual == expected => Ok(()),
            Ok(actual) => Err(SkipReason::GeometryMismatch { expected, actual }),
            Err(_) => Err(SkipReason::GeometryMismatch {
                expected,
                actual: 0,
            }),
        }
    };
    match get("Predictor", 1) {
        1 => Ok(None),
        p if p >= 10 && matches!(encoding, Encoding::Raw { .. }) => {
            require("Columns", 1, width as usize)?;
            require("Colors", 1, colour.channels())?;
            require("BitsPerComponent", 8, 8)?;
            Ok(Some(p))
        }
        p => Err(SkipReason::UnsupportedPredictor(p)),
    }
}

fn colour_model(doc: &Document, cs: &Object) -> Result<ColourModel, SkipReason> {
    match cs {
        Object::Name(name) => named_colour_model(name),
        Object::Array(items) => {
            let family = items
                .first()
                .and_then(|o| resolve(doc, o))
                .and_then(|o| o.as_name().ok())
                .ok_or_else(|| SkipReason::MissingKey("ColorSpace".into()))?;
            match family {
                b"ICCBased" => {
                    let n = items
                        .get(1)
                        .and_then(|o| resolve(doc, o))
                        .and_then(|o| o.as_stream().ok())
                        .and_then(|s| lookup(doc, &s.dict, b"N"))
                        .and_then(|o| o.as_i64().ok())
                        .ok_or_else(|| SkipReason::MissingKey("N".into()))?;
                    match n {
                        1 => Ok(ColourModel::Gray),
                        3 => Ok(ColourModel::Rgb),
                        4 => Ok(ColourModel::Cmyk),
                        other => Err(SkipReason::UnsupportedColorSpace(format!(
                            "ICCBased with {other} components"
                        ))),
                    }
                }
                b"CalGray" | b"CalRGB" | b"Lab" => named_colour_model(family),
                other => Err(SkipReason::UnsupportedColorSpace(
                    String::from_utf8_lossy(other).into_owned(),
                )),
            }
        }
        _ => Err(SkipReason::MissingKey("ColorSpace".into())),
    }
}

fn named_colour_model(name: &[u8]) -> Result<ColourModel, SkipReason> {
    match name {
        b"DeviceGray" | b"G" | b"CalGray" => Ok(ColourModel::Gray),
        b"DeviceCMYK" | b"CMYK" => Ok(ColourModel::Cmyk),
        b"DeviceRGB" | b"RGB" | b"CalRGB" | b"Lab" => Ok(ColourModel::Rgb),
        other => Err(SkipReason::UnsupportedColorSpace(
            String::from_utf8_lossy(other).into_owned(),
        )),
    }
}

/// Re-encode one image at `quality`, returning its replacement stream.
///
/// Lossy images are only replaced when the result is strictly smaller; raw
/// images are always replaced once they validate.
pub fn rewrite(
    stream: &Stream,
    header: &ImageHeader,
    quality: u8,
    codec: &dyn ImageCodec,
) -> Result<Stream, SkipReason> {
    let mut dict = stream.dict.clone();
    let needed = header
        .sample_len()
        .ok_or_else(|| header.geometry_overflow(stream.content.len()))?;

    let encoded = match header.encoding {
        Encoding::Dct { flate } => {
            if header.colour == ColourModel::Cmyk {
                return Err(SkipReason::UnsupportedColorSpace("DeviceCMYK".into()));
            }
            let jpeg = if flate {
                let limit = needed.saturating_mul(2).saturating_add(JPEG_SLACK);
                check_inflated_len(&stream.content, limit)?;
                flate_decode(&stream.content, None)?
            } else {
                stream.content.clone()
            };
            let encoded = codec.reencode(CodecInput::Jpeg(&jpeg), quality)?;
            if encoded.len() >= stream.content.len() {
                return Err(SkipReason::NotSmaller {
                    old: stream.content.len(),
                    new: encoded.len(),
                });
            }
            encoded
        }
        Encoding::Raw { .. } => {
            let mut samples = decode_samples(stream, header)?;
            let channels = match header.colour {
                ColourModel::Cmyk => {
                    samples = cmyk_to_rgb(&samples);
                    dict.set("ColorSpace", Object::Name(b"DeviceRGB".to_vec()));
                    dict.remove(b"Decode");
                    3
                }
                other => other.channels() as u8,
            };

            codec.reencode(
                CodecInput::Raw(RawImage {
                    samples: &samples,
                    width: header.width,
                    height: header.height,
                    channels,
                }),
                quality,
            )?
        }
    };

    dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
    dict.remove(b"DecodeParms");
    dict.set("BitsPerComponent", Object::Integer(8));
    Ok(Stream::new(dict, encoded).with_compression(false))
}

/// Exactly `sample_len()` bytes of 8-bit samples for a raw image.
///
/// Shorter payloads are skipped. A Flate layer that inflates past the
/// geometry (plus one filter byte per row under a predictor) is skipped too;
/// trailing bytes of an unfiltered payload are dropped.
pub fn decode_samples(stream: &Stream, header: &ImageHeader) -> Result<Vec<u8>, SkipReason> {
    let needed = header
        .sample_len()
        .ok_or_else(|| header.geometry_overflow(stream.content.len()))?;

    let mut samples = match header.encoding {
        Encoding::Raw { flate: true } => {
            let row_tags = if header.predictor.is_some() {
                header.height as usize
            } else {
                0
            };
            check_inflated_len(&stream.content, needed.saturating_add(row_tags))?;
            let parms = header.predictor.map(|predictor| {
                dictionary! {
                    "Predictor" => predictor,
                    "Columns" => i64::from(header.width),
                    "Colors" => header.colour.channels() as i64,
                    "BitsPerComponent" => 8,
                }
            });
            flate_decode(&stream.content, parms)?
        }
        Encoding::Raw { flate: false } => stream.content.clone(),
        Encoding::Dct { .. } => {
            return Err(SkipReason::UnsupportedFilter("DCTDecode".into()));
        }
    };

    if samples.len() < needed {
        return Err(SkipReason::GeometryMismatch {
            expected: needed,
            actual: samples.len(),
        });
    }
    samples.truncate(needed);
    Ok(samples)
}

/// Inflate into a sink, failing once more than `limit` bytes come out.
fn check_inflated_len(data: &[u8], limit: usize) -> Result<(), SkipReason> {
    let cap = u64::try_from(limit).unwrap_or(u64::MAX);
    let mut bounded = ZlibDecoder::new(data).take(cap.saturating_add(1));
    let inflated = io::copy(&mut bounded, &mut io::sink())
        .map_err(|e| SkipReason::Decode(format!("flate: {e}")))?;
    if inflated > cap {
        return Err(SkipReason::GeometryMismatch {
            expected: limit,
            actual: usize::try_from(inflated).unwrap_or(usize::MAX),
        });
    }
    Ok(())
}

/// Undo a lone Flate layer (and its PNG predictor, if any) with lopdf.
///
/// The stream handed to lopdf carries only the filter and resolved decode
/// parameters, never the image's own dictionary.
fn flate_decode(content: &[u8], parms: Option<Dictionary>) -> Result<Vec<u8>, SkipReason> {
    let mut dict = dictionary! { "Filter" => "FlateDecode" };
    if let Some(parms) = parms {
        dict.set("DecodeParms", parms);
    }
    Stream::new(dict, content.to_vec())
        .decompressed_content()
        .map_err(|e| SkipReason::Decode(format!("flate: {e}")))
}

fn cmyk_to_rgb(samples: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(samples.len() / 4 * 3);
    for px in samples.chunks_exact(4) {
        let k = 255 - u16::from(px[3]);
        for &ink in &px[..3] {
            rgb.push(((255 - u16::from(ink)) * k / 255) as u8);
        }
    }
    rgb
}
