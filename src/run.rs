//! Pipeline entry points: extract → merge → recompress.
//!
//! [`run`] is the core; the other entry points only differ in how inputs
//! arrive and where the result goes.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::output::PipelineResult;
use crate::pipeline::input::{self, SubmittedPart};
use crate::pipeline::{merge, recompress};
use crate::progress::Stage;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Merge every submitted part, in order, and fit the result to the budget.
///
/// # Arguments
/// * `parts`: named PDFs or ZIP archives, in submission order
/// * `config`: pipeline configuration
///
/// # Returns
/// `Ok(PipelineResult)` whenever a document was produced, even if it is
/// still over budget (check `result.report.budget_met`).
///
/// # Errors
/// * [`PipelineError::ArchiveFormat`]: an archive part is unreadable
/// * [`PipelineError::EmptyInput`]: no PDFs after archive extraction
/// * [`PipelineError::NoValidPages`]: nothing could be merged, or an input
///   stayed unreadable after repair
pub async fn run(
    parts: Vec<SubmittedPart>,
    config: &PipelineConfig,
) -> Result<PipelineResult, PipelineError> {
    let start = Instant::now();
    info!("Starting pipeline: {} part(s)", parts.len());

    // ── Step 1: Extract ──────────────────────────────────────────────────
    if let Some(cb) = &config.progress_callback {
        cb.on_stage(Stage::Extract);
    }
    let items = tokio::task::spawn_blocking(move || input::resolve_items(parts))
        .await
        .map_err(|e| PipelineError::Internal(format!("Extract task failed: {e}")))??;
    if items.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    info!("Resolved {} PDF(s)", items.len());

    // ── Step 2: Merge ────────────────────────────────────────────────────
    let merged = merge::merge(items, config).await?;
    let original_size = merged.bytes.len() as u64;

    // ── Step 3: Recompress ───────────────────────────────────────────────
    let outcome = recompress::recompress(merged.bytes, config).await;
    let final_size = outcome.bytes.len() as u64;

    info!(
        "Pipeline complete: {} → {} bytes ({} pages) in {}ms",
        original_size,
        final_size,
        merged.page_count,
        start.elapsed().as_millis()
    );
    if let Some(cb) = &config.progress_callback {
        cb.on_pipeline_complete(original_size, final_size);
    }

    Ok(PipelineResult {
        bytes: outcome.bytes,
        original_size,
        final_size,
        page_count: merged.page_count,
        document_count: merged.documents,
        repaired_count: merged.repaired,
        report: outcome.report,
    })
}

/// Load each path or URL, then [`run`] the pipeline over them.
pub async fn run_inputs(
    inputs: &[impl AsRef<str>],
    config: &PipelineConfig,
) -> Result<PipelineResult, PipelineError> {
    let mut parts = Vec::with_capacity(inputs.len());
    for input in inputs {
        parts.push(input::load_part(input.as_ref(), config.download_timeout_secs).await?);
    }
    run(parts, config).await
}

/// [`run_inputs`] and write the PDF to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn run_to_file(
    inputs: &[impl AsRef<str>],
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<PipelineResult, PipelineError> {
    let result = run_inputs(inputs, config).await?;
    let path = output_path.as_ref();
    let write_failed = |source| PipelineError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, &result.bytes)
        .await
        .map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(write_failed)?;

    info!("Wrote {} bytes to {}", result.final_size, path.display());
    Ok(result)
}

/// Synchronous wrapper around [`run`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_sync(
    parts: Vec<SubmittedPart>,
    config: &PipelineConfig,
) -> Result<PipelineResult, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run(parts, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{labelled_pdf, page_labels};

    fn config() -> PipelineConfig {
        PipelineConfig::builder().no_repair().build().unwrap()
    }

    #[tokio::test]
    async fn no_parts_is_empty_input() {
        let err = run(vec![], &config()).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput));
    }

    #[tokio::test]
    async fn sizes_are_reported_at_the_boundary() {
        let parts = vec![
            SubmittedPart::new("a.pdf", labelled_pdf(&["a"])),
            SubmittedPart::new("b.pdf", labelled_pdf(&["b"])),
        ];
        let result = run(parts, &config()).await.unwrap();
        assert_eq!(result.page_count, 2);
        assert_eq!(result.document_count, 2);
        assert_eq!(result.final_size, result.bytes.len() as u64);
        assert_eq!(result.original_size, result.final_size);
        assert!(result.report.budget_met);
        assert_eq!(page_labels(&result.bytes), ["a", "b"]);
    }

    #[test]
    fn run_sync_works_outside_a_runtime() {
        let parts = vec![SubmittedPart::new("a.pdf", labelled_pdf(&["only"]))];
        let result = run_sync(parts, &config()).unwrap();
        assert_eq!(result.page_count, 1);
    }

    #[tokio::test]
    async fn run_to_file_writes_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        std::fs::write(&input, labelled_pdf(&["x", "y"])).unwrap();
        let output = dir.path().join("out/merged.pdf");

        let result = run_to_file(&[input.to_str().unwrap()], &output, &config())
            .await
            .unwrap();
        let written = std::fs::read(&output).unwrap();
        assert_eq!(written.len() as u64, result.final_size);
        assert!(!output.with_extension("pdf.tmp").exists());
    }
}
