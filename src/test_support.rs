//! In-memory fixtures and transform doubles shared by unit tests.

use crate::error::TransformError;
use crate::pipeline::transform::{DocumentTransform, TransformOptions};
use async_trait::async_trait;
use lopdf::{dictionary, Document, Object, Stream, StringFormat};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A PDF with one page per label. Resources and MediaBox live on the
/// `Pages` node so merged pages must inherit them.
pub(crate) fn labelled_pdf(labels: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let kids: Vec<Object> = labels
        .iter()
        .map(|label| {
            let content = format!("BT /F1 12 Tf 72 720 Td ({label}) Tj ET");
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            })
            .into()
        })
        .collect();

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => kids.len() as i64,
            "Kids" => kids,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// A single-page PDF whose page draws one image XObject.
pub(crate) fn image_pdf(image: Stream) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let image_id = doc.add_object(image);
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        b"q 200 0 0 200 0 0 cm /Im0 Do Q".to_vec(),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 200.into(), 200.into()],
        "Contents" => content_id,
        "Resources" => dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => 1,
            "Kids" => vec![page_id.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// A raw 8-bit RGB image XObject filled with deterministic noise.
pub(crate) fn noisy_rgb_image(width: u32, height: u32) -> Stream {
    let mut state: u32 = 0x9E37_79B9;
    let samples: Vec<u8> = (0..width * height * 3)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xFF) as u8
        })
        .collect();
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "BitsPerComponent" => 8,
            "ColorSpace" => "DeviceRGB",
        },
        samples,
    )
    .with_compression(false)
}

/// The text drawn on each page, in page order.
pub(crate) fn page_labels(bytes: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(bytes).unwrap();
    doc.get_pages()
        .values()
        .map(|&page_id| {
            let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
            let content_id = page.get(b"Contents").unwrap().as_reference().unwrap();
            let stream = doc.get_object(content_id).unwrap().as_stream().unwrap();
            let content = stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone());
            let text = String::from_utf8_lossy(&content).into_owned();
            let start = text.find('(').unwrap() + 1;
            let end = text.rfind(')').unwrap();
            text[start..end].to_string()
        })
        .collect()
}

/// Standard security handler password padding.
const PASSWORD_PAD: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01,
    0x08, 0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53,
    0x69, 0x7A,
];

fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut s: Vec<u8> = (0..=255).collect();
    let mut j = 0usize;
    for i in 0..256 {
        j = (j + s[i] as usize + key[i % key.len()] as usize) & 0xFF;
        s.swap(i, j);
    }
    let (mut i, mut j) = (0usize, 0usize);
    data.iter()
        .map(|&byte| {
            i = (i + 1) & 0xFF;
            j = (j + s[i] as usize) & 0xFF;
            s.swap(i, j);
            byte ^ s[(s[i] as usize + s[j] as usize) & 0xFF]
        })
        .collect()
}

/// [`labelled_pdf`] encrypted with 40-bit RC4 (V1, R2) under `user_password`.
pub(crate) fn encrypted_pdf(labels: &[&str], user_password: &[u8]) -> Vec<u8> {
    let file_id = b"pdfpack-fixture!";
    let permissions: i32 = -4;

    let mut padded = user_password[..user_password.len().min(32)].to_vec();
    padded.extend_from_slice(&PASSWORD_PAD[..32 - padded.len()]);

    // Owner password equals the user password.
    let owner_key = md5::compute(&padded);
    let o_value = rc4(&owner_key[..5], &padded);

    let mut key_input = padded.clone();
    key_input.extend_from_slice(&o_value);
    key_input.extend_from_slice(&(permissions as u32).to_le_bytes());
    key_input.extend_from_slice(file_id);
    let key = md5::compute(&key_input)[..5].to_vec();
    let u_value = rc4(&key, &PASSWORD_PAD);

    let mut doc = Document::load_mem(&labelled_pdf(labels)).unwrap();
    for (&(num, generation), object) in doc.objects.iter_mut() {
        let mut object_key = key.clone();
        object_key.extend_from_slice(&num.to_le_bytes()[..3]);
        object_key.extend_from_slice(&generation.to_le_bytes()[..2]);
        let digest = md5::compute(&object_key);
        let object_key = &digest[..(key.len() + 5).min(16)];
        match object {
            Object::Stream(stream) => {
                let sealed = rc4(object_key, &stream.content);
                stream.set_content(sealed);
            }
            Object::String(bytes, _) => *bytes = rc4(object_key, bytes),
            _ => {}
        }
    }

    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 1,
        "R" => 2,
        "Length" => 40,
        "O" => Object::String(o_value, StringFormat::Literal),
        "U" => Object::String(u_value, StringFormat::Literal),
        "P" => permissions as i64,
    });
    doc.trailer.set("Encrypt", encrypt_id);
    doc.trailer.set(
        "ID",
        vec![
            Object::String(file_id.to_vec(), StringFormat::Literal),
            Object::String(file_id.to_vec(), StringFormat::Literal),
        ],
    );

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

/// Always returns the same bytes and counts its calls.
pub(crate) struct FixedTransform {
    pub output: Vec<u8>,
    pub calls: AtomicUsize,
}

impl FixedTransform {
    pub fn new(output: Vec<u8>) -> Self {
        Self {
            output,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentTransform for FixedTransform {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn transform(
        &self,
        _input: &[u8],
        _options: &TransformOptions,
    ) -> Result<Vec<u8>, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

/// Always fails as if the tool were missing.
pub(crate) struct MissingTool;

#[async_trait]
impl DocumentTransform for MissingTool {
    fn name(&self) -> &'static str {
        "missing"
    }

    async fn transform(
        &self,
        _input: &[u8],
        _options: &TransformOptions,
    ) -> Result<Vec<u8>, TransformError> {
        Err(TransformError::ToolNotFound {
            tool: "missing".into(),
        })
    }
}
