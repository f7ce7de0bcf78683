//! # pdfpack
//!
//! Merge PDFs (submitted directly or inside ZIP archives) into one document
//! and recompress it until it fits a byte budget.
//!
//! ## Pipeline Overview
//!
//! ```text
//! parts (PDF | ZIP)
//!  │
//!  ├─ 1. Extract     ZIP members in natural name order, spliced in place
//!  ├─ 2. Merge       one page tree; malformed inputs repaired once (gs)
//!  ├─ 3. Recompress  tier ladder, gentlest first, until size ≤ budget
//!  └─ 4. Output      bytes + original/final size + per-tier report
//! ```
//!
//! Page order is fixed by submission order alone. Recompression never fails
//! the request: if no tier fits, the last tier's output is returned.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdfpack::{run_inputs, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .max_output_size(5 * 1024 * 1024)
//!         .build()?;
//!     let result = run_inputs(&["cover.pdf", "scans.zip"], &config).await?;
//!     std::fs::write("packed.pdf", &result.bytes)?;
//!     eprintln!("{} → {} bytes", result.original_size, result.final_size);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfpack` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdfpack = { version = "0.1", default-features = false }
//! ```
//!
//! ## External tools
//!
//! Repair of malformed inputs (and the optional per-tier rewrite) shells out to
//! Ghostscript. Without `gs` on `PATH`, well-formed inputs still merge and
//! recompress in-process; a malformed input then fails the request.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod run;

#[cfg(test)]
mod test_support;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    default_ladder, parse_ladder, CompressionTier, PipelineConfig, PipelineConfigBuilder,
    ResolutionClass, TierChaining, DEFAULT_TIER_TIMEOUT_SECS, MAX_OUTPUT_SIZE,
};
pub use error::{ErrorPayload, PipelineError, SkipReason, TransformError, UnreadableDocument};
pub use output::{PipelineResult, RecompressionReport, TierAttempt, TierOutcome};
pub use pipeline::encode::{CodecInput, ImageCodec, JpegCodec, RawImage};
pub use pipeline::input::{InputItem, ItemSource, PartKind, SubmittedPart};
pub use pipeline::transform::{
    DocumentTransform, GhostscriptTransform, NoopTransform, TransformMode, TransformOptions,
};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback, Stage};
pub use run::{run, run_inputs, run_sync, run_to_file};
