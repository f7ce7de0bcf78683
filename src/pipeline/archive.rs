//! ZIP extraction: archive bytes → PDF members in natural name order.
//!
//! Extraction is pure: the archive is read from memory and nothing touches
//! the filesystem. Members are identified by their final path segment, which
//! is also the sort key.

use crate::error::PipelineError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::io::{Cursor, Read};
use tracing::{debug, info};

/// macOS resource-fork sidecar directory.
const RESOURCE_FORK_PREFIX: &str = "__MACOSX";

/// Total bytes one archive may inflate to.
pub const MAX_EXTRACTED_SIZE: u64 = 1024 * 1024 * 1024;

/// Alternating runs of ASCII digits and everything else.
static NAME_CHUNKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]+|[^0-9]+").expect("static regex is valid"));

/// One PDF pulled out of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    /// Final path segment of the entry.
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Extract every PDF member of a ZIP archive, sorted by natural name order.
///
/// `archive_name` is used for error reporting only.
///
/// # Errors
/// [`PipelineError::ArchiveFormat`] if the bytes are not a readable archive,
/// a member's data cannot be inflated, or the PDF members together exceed
/// [`MAX_EXTRACTED_SIZE`].
pub fn extract(archive_name: &str, bytes: &[u8]) -> Result<Vec<ArchiveMember>, PipelineError> {
    extract_within(archive_name, bytes, MAX_EXTRACTED_SIZE)
}

fn extract_within(
    archive_name: &str,
    bytes: &[u8],
    limit: u64,
) -> Result<Vec<ArchiveMember>, PipelineError> {
    let format_error = |detail: String| PipelineError::ArchiveFormat {
        name: archive_name.to_string(),
        detail,
    };

    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format_error(e.to_string()))?;

    let mut members: Vec<(usize, String, Vec<u8>)> = Vec::new();
    let mut remaining = limit;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| format_error(e.to_string()))?;

        if entry.is_dir() {
            continue;
        }
        let path = entry.name().replace('\\', "/");
        let Some(name) = member_name(&path) else {
            debug!("Skipping archive entry '{}'", path);
            continue;
        };

        let too_large = || {
            format_error(format!(
                "entry '{path}' exceeds the {limit}-byte extraction limit"
            ))
        };
        if entry.size() > remaining {
            return Err(too_large());
        }
        let mut data = Vec::new();
        entry
            .by_ref()
            .take(remaining.saturating_add(1))
            .read_to_end(&mut data)
            .map_err(|e| format_error(format!("entry '{path}': {e}")))?;
        let read = data.len() as u64;
        if read > remaining {
            return Err(too_large());
        }
        remaining -= read;
        members.push((index, name.to_string(), data));
    }

    members.sort_by(|a, b| natural_cmp(&a.1, &b.1).then(a.0.cmp(&b.0)));

    info!(
        "Extracted {} PDF(s) from archive '{}'",
        members.len(),
        archive_name
    );
    Ok(members
        .into_iter()
        .map(|(_, name, bytes)| ArchiveMember { name, bytes })
        .collect())
}

/// The member name for a kept entry, or `None` for junk.
fn member_name(path: &str) -> Option<&str> {
    if path.starts_with(RESOURCE_FORK_PREFIX) || path.starts_with('.') {
        return None;
    }
    let name = path.rsplit('/').next().unwrap_or(path);
    if name.is_empty() || name.starts_with('.') {
        return None;
    }
    if !name.to_ascii_lowercase().ends_with(".pdf") {
        return None;
    }
    Some(name)
}

/// Case-insensitive comparison with embedded integers compared numerically.
///
/// Digit runs of any length compare without overflow. Names that are equal
/// under this ordering fall back to a plain byte comparison so the order is
/// total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let la = a.to_lowercase();
    let lb = b.to_lowercase();
    let mut ca = NAME_CHUNKS.find_iter(&la).map(|m| m.as_str());
    let mut cb = NAME_CHUNKS.find_iter(&lb).map(|m| m.as_str());

    loop {
        match (ca.next(), cb.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (is_digits(x), is_digits(y)) {
                    (true, true) => cmp_digit_runs(x, y),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn is_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

fn cmp_digit_runs(x: &str, y: &str) -> Ordering {
    let tx = x.trim_start_matches('0');
    let ty = y.trim_start_matches('0');
    tx.len()
        .cmp(&ty.len())
        .then_with(|| tx.cmp(ty))
        .then_with(|| x.len().cmp(&y.len()))
}
