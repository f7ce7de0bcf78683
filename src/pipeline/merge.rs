//! Document merging: ordered PDF blobs → one PDF.
//!
//! Each source is renumbered above the accumulated document's highest id and
//! its pages are moved across together with every object they transitively
//! reference. Source `Pages` nodes are never copied: inheritable attributes are
//! flattened onto each page, and every page is re-parented under a single new
//! page-tree root built in [`MergedDocument::finish`].
//!
//! A blob that fails to open goes through the configured repair transform once.
//! If it still fails, the whole merge fails with
//! [`PipelineError::NoValidPages`] naming that blob. A well-formed document
//! whose page tree is empty contributes nothing and is not a failure.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, UnreadableDocument};
use crate::pipeline::input::InputItem;
use crate::pipeline::transform::TransformOptions;
use crate::progress::Stage;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Page attributes a page may inherit from its ancestors.
const INHERITABLE: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

/// Parent chains deeper than this are treated as cyclic.
const MAX_TREE_DEPTH: usize = 64;

/// US Letter, used when no ancestor declares a MediaBox.
const DEFAULT_MEDIA_BOX: [i64; 4] = [0, 0, 612, 792];

/// Output of [`merge`].
#[derive(Debug)]
pub struct MergeOutput {
    pub bytes: Vec<u8>,
    pub page_count: usize,
    /// Documents that contributed at least one page.
    pub documents: usize,
    /// Documents that needed the repair pass.
    pub repaired: usize,
}

/// An accumulating output document.
pub struct MergedDocument {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl Default for MergedDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MergedDocument {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Move every page of `source`, in its own page order, to the end of this
    /// document. Returns the number of pages added.
    pub fn append(&mut self, mut source: Document) -> usize {
        source.renumber_objects_with(self.doc.max_id + 1);
        let source_max = source.objects.keys().map(|id| id.0).max().unwrap_or(0);

        let page_ids: Vec<ObjectId> = source.get_pages().into_values().collect();
        let prepared: Vec<(ObjectId, Dictionary)> = page_ids
            .into_iter()
            .filter_map(|id| {
                let dict = source.get_object(id).and_then(Object::as_dict).ok()?;
                Some((id, flatten_page(&source, dict)))
            })
            .collect();

        let mut pending = Vec::new();
        for (id, mut page) in prepared {
            page.set("Parent", self.pages_id);
            push_dict_refs(&page, &mut pending);
            source.objects.remove(&id);
            self.doc.objects.insert(id, Object::Dictionary(page));
            self.kids.push(id.into());
        }
        let added = self.kids.len();

        while let Some(id) = pending.pop() {
            if self.doc.objects.contains_key(&id) {
                continue;
            }
            if let Some(object) = source.objects.remove(&id) {
                push_refs(&object, &mut pending);
                self.doc.objects.insert(id, object);
            }
        }

        self.doc.max_id = self.doc.max_id.max(source.max_id).max(source_max);
        added
    }

    /// Build the page tree and catalog and serialise the document.
    pub fn finish(mut self, compress_streams: bool) -> Result<Vec<u8>, lopdf::Error> {
        let count = self.kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let nulled = null_dangling(&mut self.doc);
        if nulled > 0 {
            debug!("Replaced {} dangling reference(s) with null", nulled);
        }
        if compress_streams {
            self.doc.compress();
        }

        let mut out = Vec::new();
        self.doc.save_to(&mut out)?;
        Ok(out)
    }
}

/// Copy of a page dictionary with inherited attributes written onto it.
fn flatten_page(doc: &Document, page: &Dictionary) -> Dictionary {
    let mut flat = page.clone();
    for key in INHERITABLE {
        if flat.has(key.as_bytes()) {
            continue;
        }
        if let Some(value) = inherited(doc, page, key.as_bytes()) {
            flat.set(key, value.clone());
        }
    }
    if !flat.has(b"MediaBox") {
        flat.set(
            "MediaBox",
            DEFAULT_MEDIA_BOX.iter().map(|&v| Object::Integer(v)).collect::<Vec<_>>(),
        );
    }
    flat
}

fn inherited<'a>(doc: &'a Document, page: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut node = page;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return Some(value);
        }
        let parent = node.get(b"Parent").and_then(Object::as_reference).ok()?;
        node = doc.get_object(parent).and_then(Object::as_dict).ok()?;
    }
    None
}

fn push_refs(object: &Object, out: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => out.push(*id),
        Object::Array(items) => items.iter().for_each(|o| push_refs(o, out)),
        Object::Dictionary(dict) => push_dict_refs(dict, out),
        Object::Stream(stream) => push_dict_refs(&stream.dict, out),
        _ => {}
    }
}

/// Page-tree nodes keep their `Parent` behind: following it would drag the
/// source's whole page tree across.
fn push_dict_refs(dict: &Dictionary, out: &mut Vec<ObjectId>) {
    let tree_node = matches!(
        dict.get(b"Type").and_then(Object::as_name),
        Ok(b"Page" | b"Pages")
    );
    for (key, value) in dict.iter() {
        if tree_node && key.as_slice() == b"Parent" {
            continue;
        }
        push_refs(value, out);
    }
}

/// Replace references to absent objects with `null`. Returns how many.
fn null_dangling(doc: &mut Document) -> usize {
    let ids: BTreeSet<ObjectId> = doc.objects.keys().copied().collect();
    doc.objects
        .values_mut()
        .map(|object| null_missing(object, &ids))
        .sum()
}

fn null_missing(object: &mut Object, ids: &BTreeSet<ObjectId>) -> usize {
    match object {
        Object::Reference(id) => {
            if ids.contains(id) {
                0
            } else {
                *object = Object::Null;
                1
            }
        }
        Object::Array(items) => items.iter_mut().map(|o| null_missing(o, ids)).sum(),
        Object::Dictionary(dict) => dict.iter_mut().map(|(_, o)| null_missing(o, ids)).sum(),
        Object::Stream(stream) => stream
            .dict
            .iter_mut()
            .map(|(_, o)| null_missing(o, ids))
            .sum(),
        _ => 0,
    }
}

/// Parse a blob, decrypting with the empty password if needed.
///
/// A document without a resolvable catalog and `Pages` node counts as
/// unreadable. An empty page tree does not.
pub fn open_document(bytes: &[u8]) -> Result<Document, String> {
    let mut doc = Document::load_mem(bytes).map_err(|e| e.to_string())?;
    if doc.is_encrypted() {
        doc.decrypt("")
            .map_err(|e| format!("encrypted with a non-empty password: {e}"))?;
    }
    if page_tree_root(&doc).is_none() {
        return Err("document has no page tree".to_string());
    }
    Ok(doc)
}

fn page_tree_root(doc: &Document) -> Option<&Dictionary> {
    let root = doc.trailer.get(b"Root").and_then(Object::as_reference).ok()?;
    let catalog = doc.get_object(root).and_then(Object::as_dict).ok()?;
    let pages = catalog.get(b"Pages").and_then(Object::as_reference).ok()?;
    doc.get_object(pages).and_then(Object::as_dict).ok()
}

async fn open_blocking(bytes: Vec<u8>) -> (Result<Document, String>, Vec<u8>) {
    match tokio::task::spawn_blocking(move || {
        let result = open_document(&bytes);
        (result, bytes)
    })
    .await
    {
        Ok(pair) => pair,
        Err(e) => (Err(format!("parser task failed: {e}")), Vec::new()),
    }
}

/// Merge `items` in order into one document.
///
/// # Errors
/// [`PipelineError::NoValidPages`] when no pages were merged at all, or when a
/// blob was unreadable before and after repair (or with repair disabled).
pub async fn merge(
    items: Vec<InputItem>,
    config: &PipelineConfig,
) -> Result<MergeOutput, PipelineError> {
    if let Some(cb) = &config.progress_callback {
        cb.on_stage(Stage::Merge);
    }

    let total = items.len();
    let mut merged = MergedDocument::new();
    let mut documents = 0;
    let mut repaired = 0;

    for (index, item) in items.into_iter().enumerate() {
        let InputItem { name, bytes, .. } = item;
        if bytes.is_empty() {
            warn!("Skipping empty document '{}'", name);
            continue;
        }

        let (opened, bytes) = open_blocking(bytes).await;
        let (doc, was_repaired) = match opened {
            Ok(doc) => (doc, false),
            Err(first) => (
                repair_and_open(&name, &bytes, first, total, config).await?,
                true,
            ),
        };

        let pages = merged.append(doc);
        if pages > 0 {
            documents += 1;
        }
        repaired += usize::from(was_repaired);
        debug!("Merged '{}': {} page(s)", name, pages);
        if let Some(cb) = &config.progress_callback {
            cb.on_document_merged(index, total, pages, was_repaired);
        }
    }

    let page_count = merged.page_count();
    if page_count == 0 {
        return Err(PipelineError::NoValidPages {
            documents: total,
            unreadable: None,
        });
    }

    let compress = config.compress_streams;
    let bytes = tokio::task::spawn_blocking(move || merged.finish(compress))
        .await
        .map_err(|e| PipelineError::Internal(format!("Merge task failed: {e}")))?
        .map_err(|e| PipelineError::Internal(format!("Failed to serialise merged PDF: {e}")))?;

    info!(
        "Merged {} page(s) from {} document(s) ({} repaired) → {} bytes",
        page_count,
        documents,
        repaired,
        bytes.len()
    );
    Ok(MergeOutput {
        bytes,
        page_count,
        documents,
        repaired,
    })
}

async fn repair_and_open(
    name: &str,
    bytes: &[u8],
    first: String,
    total: usize,
    config: &PipelineConfig,
) -> Result<Document, PipelineError> {
    let corrupt = |detail: String| PipelineError::NoValidPages {
        documents: total,
        unreadable: Some(UnreadableDocument {
            name: name.to_string(),
            detail,
        }),
    };

    let Some(repair) = &config.repair else {
        return Err(corrupt(first));
    };

    warn!("'{}' failed to open ({}), repairing with {}", name, first, repair.name());
    let fixed = repair
        .transform(bytes, &TransformOptions::repair(config.tier_timeout))
        .await
        .map_err(|e| corrupt(format!("{first}; repair failed: {e}")))?;

    let (reopened, _) = open_blocking(fixed).await;
    reopened.map_err(|e| corrupt(format!("{first}; still unreadable after repair: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::input::ItemSource;
    use crate::test_support::{
        encrypted_pdf, labelled_pdf, page_labels, FixedTransform, MissingTool,
    };
    use std::sync::Arc;

    fn item(name: &str, bytes: Vec<u8>) -> InputItem {
        InputItem {
            name: name.into(),
            bytes,
            source: ItemSource::Direct,
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::builder().no_repair().build().unwrap()
    }

    #[tokio::test]
    async fn pages_keep_input_order() {
        let items = vec![
            item("a.pdf", labelled_pdf(&["a1", "a2"])),
            item("b.pdf", labelled_pdf(&["b1"])),
            item("c.pdf", labelled_pdf(&["c1", "c2", "c3"])),
        ];
        let out = merge(items, &config()).await.unwrap();
        assert_eq!(out.page_count, 6);
        assert_eq!(out.documents, 3);
        assert_eq!(page_labels(&out.bytes), ["a1", "a2", "b1", "c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn inherited_attributes_are_flattened() {
        let out = merge(vec![item("a.pdf", labelled_pdf(&["x"]))], &config())
            .await
            .unwrap();
        let doc = Document::load_mem(&out.bytes).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        assert!(page.has(b"Resources"));
        assert!(page.has(b"MediaBox"));

        let parent = page.get(b"Parent").unwrap().as_reference().unwrap();
        let root = doc.get_object(parent).unwrap().as_dict().unwrap();
        assert_eq!(root.get(b"Count").unwrap().as_i64().unwrap(), 1);
    }

    #[tokio::test]
    async fn same_document_twice_does_not_collide() {
        let pdf = labelled_pdf(&["p"]);
        let out = merge(vec![item("1.pdf", pdf.clone()), item("2.pdf", pdf)], &config())
            .await
            .unwrap();
        assert_eq!(page_labels(&out.bytes), ["p", "p"]);
    }

    #[tokio::test]
    async fn empty_inputs_yield_no_valid_pages() {
        let err = merge(vec![], &config()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::NoValidPages {
                documents: 0,
                unreadable: None
            }
        ));

        let err = merge(vec![item("a.pdf", vec![]), item("b.pdf", vec![])], &config())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::NoValidPages {
                documents: 2,
                unreadable: None
            }
        ));
    }

    fn unreadable_name(err: &PipelineError) -> Option<&str> {
        match err {
            PipelineError::NoValidPages {
                unreadable: Some(doc),
                ..
            } => Some(doc.name.as_str()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn empty_page_tree_contributes_nothing() {
        let items = vec![
            item("blank.pdf", labelled_pdf(&[])),
            item("a.pdf", labelled_pdf(&["a1", "a2"])),
        ];
        let out = merge(items, &config()).await.unwrap();
        assert_eq!(out.page_count, 2);
        assert_eq!(out.documents, 1);
        assert_eq!(page_labels(&out.bytes), ["a1", "a2"]);

        let err = merge(vec![item("blank.pdf", labelled_pdf(&[]))], &config())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::NoValidPages {
                documents: 1,
                unreadable: None
            }
        ));
    }

    #[tokio::test]
    async fn empty_password_documents_are_decrypted() {
        let items = vec![
            item("locked.pdf", encrypted_pdf(&["secret-1", "secret-2"], b"")),
            item("plain.pdf", labelled_pdf(&["plain"])),
        ];
        let out = merge(items, &config()).await.unwrap();
        assert_eq!(out.repaired, 0);
        assert_eq!(page_labels(&out.bytes), ["secret-1", "secret-2", "plain"]);
    }

    #[tokio::test]
    async fn password_protected_document_is_fatal() {
        let items = vec![
            item("plain.pdf", labelled_pdf(&["plain"])),
            item("locked.pdf", encrypted_pdf(&["hidden"], b"hunter2")),
        ];
        let err = merge(items, &config()).await.unwrap_err();
        assert_eq!(unreadable_name(&err), Some("locked.pdf"));
    }

    #[tokio::test]
    async fn empty_blob_is_skipped() {
        let items = vec![item("empty.pdf", vec![]), item("a.pdf", labelled_pdf(&["a"]))];
        let out = merge(items, &config()).await.unwrap();
        assert_eq!(out.documents, 1);
        assert_eq!(page_labels(&out.bytes), ["a"]);
    }

    #[tokio::test]
    async fn corrupt_input_without_repair_is_fatal() {
        let items = vec![
            item("good.pdf", labelled_pdf(&["a"])),
            item("bad.pdf", b"%PDF-1.4 this is not a pdf".to_vec()),
        ];
        let err = merge(items, &config()).await.unwrap_err();
        assert_eq!(unreadable_name(&err), Some("bad.pdf"));
    }

    #[tokio::test]
    async fn repair_is_used_once_and_its_output_merged() {
        let repair = Arc::new(FixedTransform::new(labelled_pdf(&["fixed"])));
        let config = PipelineConfig::builder()
            .repair(repair.clone())
            .build()
            .unwrap();
        let items = vec![
            item("bad.pdf", b"%PDF-1.4 garbage".to_vec()),
            item("good.pdf", labelled_pdf(&["good"])),
        ];
        let out = merge(items, &config).await.unwrap();
        assert_eq!(repair.calls(), 1);
        assert_eq!(out.repaired, 1);
        assert_eq!(page_labels(&out.bytes), ["fixed", "good"]);
    }

    #[tokio::test]
    async fn still_corrupt_after_repair_is_fatal() {
        let repair = Arc::new(FixedTransform::new(b"%PDF-1.4 still garbage".to_vec()));
        let config = PipelineConfig::builder()
            .repair(repair.clone())
            .build()
            .unwrap();
        let err = merge(vec![item("bad.pdf", b"garbage".to_vec())], &config)
            .await
            .unwrap_err();
        assert_eq!(repair.calls(), 1);
        assert_eq!(unreadable_name(&err), Some("bad.pdf"));
        assert!(err.to_string().contains("after repair"));
    }

    #[tokio::test]
    async fn unavailable_repair_tool_is_fatal() {
        let config = PipelineConfig::builder()
            .repair(Arc::new(MissingTool))
            .build()
            .unwrap();
        let err = merge(vec![item("bad.pdf", b"garbage".to_vec())], &config)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("repair failed"), "got: {err}");
    }

    #[test]
    fn dangling_references_become_null() {
        let mut doc = Document::with_version("1.7");
        let id = doc.add_object(dictionary! {
            "Present" => Object::Reference((1, 0)),
            "Missing" => Object::Reference((999, 0)),
        });
        assert_eq!(null_dangling(&mut doc), 1);
        let dict = doc.get_object(id).unwrap().as_dict().unwrap();
        assert!(matches!(dict.get(b"Missing").unwrap(), Object::Null));
        assert!(matches!(dict.get(b"Present").unwrap(), Object::Reference(_)));
    }
}
