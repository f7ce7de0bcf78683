//! Result types returned by the pipeline entry points.
//!
//! All types serialise with serde; [`PipelineResult::bytes`] is skipped so the
//! metadata can be printed as JSON while the document goes elsewhere.

use crate::config::CompressionTier;
use serde::{Deserialize, Serialize};

/// One merged-and-recompressed document plus the sizes at each boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// The final PDF.
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// Size of the merged document before recompression.
    pub original_size: u64,
    /// Size of [`Self::bytes`].
    pub final_size: u64,
    pub page_count: usize,
    /// Documents that contributed pages to the merge.
    pub document_count: usize,
    /// Documents that only opened after the repair pass.
    pub repaired_count: usize,
    pub report: RecompressionReport,
}

impl PipelineResult {
    /// `final_size / original_size`, or 1.0 for an empty original.
    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            1.0
        } else {
            self.final_size as f64 / self.original_size as f64
        }
    }
}

/// What the recompression engine did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecompressionReport {
    /// Byte budget the run aimed for.
    pub budget: u64,
    /// Index into the ladder of the tier whose output was returned;
    /// `None` when the input was returned unchanged.
    pub tier_used: Option<usize>,
    /// One entry per tier attempted, in ladder order.
    pub attempts: Vec<TierAttempt>,
    pub budget_met: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierAttempt {
    pub tier: CompressionTier,
    pub outcome: TierOutcome,
    /// Images replaced during the in-process pass.
    pub images_rewritten: usize,
    /// Images left untouched during the in-process pass.
    pub images_skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TierOutcome {
    /// The tier produced a document of `size` bytes.
    Produced { size: u64, fits: bool },
    /// The tier failed; the ladder moved on.
    Failed { reason: String },
}

impl TierOutcome {
    pub fn size(&self) -> Option<u64> {
        match self {
            TierOutcome::Produced { size, .. } => Some(*size),
            TierOutcome::Failed { .. } => None,
        }
    }
}
