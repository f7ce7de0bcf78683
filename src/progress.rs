//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the pipeline merges documents and walks the tier ladder.
//!
//! # Example
//!
//! ```rust
//! use pdfpack::{PipelineProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct TierCounter {
//!     attempts: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for TierCounter {
//!     fn on_tier_start(&self, index: usize, total: usize, tier: &pdfpack::CompressionTier) {
//!         self.attempts.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("tier {}/{}: {}", index + 1, total, tier);
//!     }
//! }
//!
//! let counter = Arc::new(TierCounter { attempts: AtomicUsize::new(0) });
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::config::CompressionTier;
use std::fmt;
use std::sync::Arc;

/// Coarse pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extract,
    Merge,
    Recompress,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Extract => "Extracting",
            Stage::Merge => "Merging",
            Stage::Recompress => "Compressing",
        })
    }
}

/// Called by the pipeline as it runs.
///
/// Implementations must be `Send + Sync`. All methods have default no-op
/// implementations so callers only override what they care about.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called when the pipeline enters a stage.
    fn on_stage(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called after one input document has been appended to the merge.
    ///
    /// # Arguments
    /// * `index`: 0-indexed position in the resolved input list
    /// * `total`: number of resolved inputs
    /// * `pages`: pages contributed by this document
    /// * `repaired`: whether the document needed the repair pass
    fn on_document_merged(&self, index: usize, total: usize, pages: usize, repaired: bool) {
        let _ = (index, total, pages, repaired);
    }

    /// Called before a tier is attempted.
    fn on_tier_start(&self, index: usize, total: usize, tier: &CompressionTier) {
        let _ = (index, total, tier);
    }

    /// Called when a tier produced a document.
    fn on_tier_complete(&self, index: usize, total: usize, size: u64, fits: bool) {
        let _ = (index, total, size, fits);
    }

    /// Called when a tier failed and the ladder moves on.
    fn on_tier_failed(&self, index: usize, total: usize, error: &str) {
        let _ = (index, total, error);
    }

    /// Called once with the sizes reported at the boundary.
    fn on_pipeline_complete(&self, original_size: u64, final_size: u64) {
        let _ = (original_size, final_size);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolutionClass;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        stages: AtomicUsize,
        tiers: AtomicUsize,
        failures: AtomicUsize,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_stage(&self, _stage: Stage) {
            self.stages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_tier_start(&self, _index: usize, _total: usize, _tier: &CompressionTier) {
            self.tiers.fetch_add(1, Ordering::SeqCst);
        }

        fn on_tier_failed(&self, _index: usize, _total: usize, _error: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage(Stage::Merge);
        cb.on_document_merged(0, 2, 5, false);
        cb.on_tier_start(0, 3, &CompressionTier::new(ResolutionClass::Ebook, 60));
        cb.on_tier_complete(0, 3, 1024, true);
        cb.on_tier_failed(1, 3, "timeout");
        cb.on_pipeline_complete(2048, 1024);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        let tier = CompressionTier::new(ResolutionClass::Screen, 30);

        tracker.on_stage(Stage::Extract);
        tracker.on_stage(Stage::Merge);
        tracker.on_tier_start(0, 2, &tier);
        tracker.on_tier_failed(0, 2, "gs exited with 1");
        tracker.on_tier_start(1, 2, &tier);

        assert_eq!(tracker.stages.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.tiers.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stage_labels() {
        assert_eq!(Stage::Recompress.to_string(), "Compressing");
    }
}
