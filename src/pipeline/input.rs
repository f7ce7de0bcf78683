//! Input resolution: user-supplied parts → an ordered list of PDF blobs.
//!
//! Two steps:
//!
//! 1. [`load_part`] turns a path or URL into a named [`SubmittedPart`]. URL
//!    downloads stay in memory; nothing is written to disk.
//! 2. [`resolve_items`] classifies each part by its magic bytes and expands
//!    archives in place, so archive members land at their archive's position
//!    in submission order. That order is the final page order.

use crate::error::PipelineError;
use crate::pipeline::archive;
use std::path::Path;
use tracing::{debug, info};

const PDF_MAGIC: &[u8] = b"%PDF";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
/// End-of-central-directory record; an empty archive starts with it.
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";

/// One named part exactly as it was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedPart {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SubmittedPart {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    Pdf,
    Zip,
}

/// Where a resolved PDF came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSource {
    /// Submitted directly as a PDF part.
    Direct,
    /// Extracted from the archive submitted at `archive_index`.
    ArchiveMember { archive: String, archive_index: usize },
}

/// One PDF blob in final merge order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputItem {
    pub name: String,
    pub bytes: Vec<u8>,
    pub source: ItemSource,
}

/// Decide whether a part is a PDF or a ZIP archive.
///
/// Magic bytes win; the extension is only consulted when neither signature
/// is present. Unrecognised parts are treated as PDFs so the merger can
/// attempt a repair.
pub fn classify(part: &SubmittedPart) -> PartKind {
    let bytes = part.bytes.as_slice();
    if bytes.starts_with(PDF_MAGIC) {
        PartKind::Pdf
    } else if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(ZIP_EMPTY_MAGIC) {
        PartKind::Zip
    } else if part.name.to_ascii_lowercase().ends_with(".zip") {
        PartKind::Zip
    } else {
        PartKind::Pdf
    }
}

/// Expand archives and flatten everything into merge order.
///
/// # Errors
/// [`PipelineError::ArchiveFormat`] if any archive part is unreadable.
pub fn resolve_items(parts: Vec<SubmittedPart>) -> Result<Vec<InputItem>, PipelineError> {
    let mut items = Vec::with_capacity(parts.len());
    for (index, part) in parts.into_iter().enumerate() {
        match classify(&part) {
            PartKind::Pdf => {
                debug!("Part {} '{}' is a PDF ({} bytes)", index, part.name, part.bytes.len());
                items.push(InputItem {
                    name: part.name,
                    bytes: part.bytes,
                    source: ItemSource::Direct,
                });
            }
            PartKind::Zip => {
                let members = archive::extract(&part.name, &part.bytes)?;
                debug!("Part {} '{}' is an archive of {} PDF(s)", index, part.name, members.len());
                items.extend(members.into_iter().map(|m| InputItem {
                    name: m.name,
                    bytes: m.bytes,
                    source: ItemSource::ArchiveMember {
                        archive: part.name.clone(),
                        archive_index: index,
                    },
                }));
            }
        }
    }
    Ok(items)
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a path or URL into memory as a [`SubmittedPart`].
pub async fn load_part(input: &str, timeout_secs: u64) -> Result<SubmittedPart, PipelineError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else if input.trim().is_empty() {
        Err(PipelineError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        read_local(Path::new(input)).await
    }
}

async fn read_local(path: &Path) -> Result<SubmittedPart, PipelineError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => PipelineError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => PipelineError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    debug!("Read local input {} ({} bytes)", path.display(), bytes.len());
    Ok(SubmittedPart { name, bytes })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<SubmittedPart, PipelineError> {
    info!("Downloading input from: {}", url);

    let failed = |reason: String| PipelineError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let name = filename_from_url(url);
    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

    info!("Downloaded {} bytes as '{}'", bytes.len(), name);
    Ok(SubmittedPart {
        name,
        bytes: bytes.to_vec(),
    })
}

/// Last non-empty path segment of the URL, or a generic fallback.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "download.pdf".to_string())
}
