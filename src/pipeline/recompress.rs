//! Budget-driven recompression over the tier ladder.
//!
//! ```text
//! bytes ≤ budget ───────────────────────────────▶ return unchanged
//!   │
//!   └─ for tier in ladder (gentlest first):
//!        parse → collect images → re-encode (blocking pool, bounded)
//!        → save → [external tier transform] → size ≤ budget? ─▶ return
//!   │
//!   └─ ladder exhausted ─▶ last tier's output (input if every tier failed)
//! ```
//!
//! Nothing in here fails the request: per-image problems leave the image
//! untouched, and per-tier problems mark the tier failed.

use crate::config::{CompressionTier, PipelineConfig, TierChaining};
use crate::error::SkipReason;
use crate::output::{RecompressionReport, TierAttempt, TierOutcome};
use crate::pipeline::images::{self, ImageJob};
use crate::pipeline::transform::TransformOptions;
use crate::progress::Stage;
use futures::stream::{self, StreamExt};
use lopdf::{Document, Object, ObjectId, Stream};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bytes chosen by [`recompress`] plus what happened along the way.
#[derive(Debug)]
pub struct RecompressOutcome {
    pub bytes: Vec<u8>,
    pub report: RecompressionReport,
}

/// Output of one successful tier.
struct TierRun {
    bytes: Vec<u8>,
    rewritten: usize,
    skipped: usize,
}

/// Bring `bytes` under `config.max_output_size` if the ladder can.
pub async fn recompress(bytes: Vec<u8>, config: &PipelineConfig) -> RecompressOutcome {
    let budget = config.max_output_size;
    let mut report = RecompressionReport {
        budget,
        ..Default::default()
    };

    if bytes.len() as u64 <= budget {
        debug!("{} bytes already within budget {}", bytes.len(), budget);
        report.budget_met = true;
        return RecompressOutcome { bytes, report };
    }

    if let Some(cb) = &config.progress_callback {
        cb.on_stage(Stage::Recompress);
    }
    info!(
        "{} bytes exceed budget {}; trying {} tier(s) ({:?})",
        bytes.len(),
        budget,
        config.tiers.len(),
        config.chaining
    );

    let total = config.tiers.len();
    let mut previous: Option<Vec<u8>> = None;
    let mut last: Option<(usize, Vec<u8>)> = None;

    for (index, tier) in config.tiers.iter().enumerate() {
        if let Some(cb) = &config.progress_callback {
            cb.on_tier_start(index, total, tier);
        }

        let input = match (config.chaining, &previous) {
            (TierChaining::Cumulative, Some(prev)) => prev.as_slice(),
            _ => bytes.as_slice(),
        };

        match run_tier(input, *tier, config).await {
            Ok(run) => {
                let size = run.bytes.len() as u64;
                let fits = size <= budget;
                info!(
                    "Tier {}/{} ({}): {} bytes, {} image(s) rewritten, {} skipped",
                    index + 1,
                    total,
                    tier,
                    size,
                    run.rewritten,
                    run.skipped
                );
                report.attempts.push(TierAttempt {
                    tier: *tier,
                    outcome: TierOutcome::Produced { size, fits },
                    images_rewritten: run.rewritten,
                    images_skipped: run.skipped,
                });
                if let Some(cb) = &config.progress_callback {
                    cb.on_tier_complete(index, total, size, fits);
                }

                if fits {
                    report.tier_used = Some(index);
                    report.budget_met = true;
                    return RecompressOutcome {
                        bytes: run.bytes,
                        report,
                    };
                }

                if config.chaining == TierChaining::Cumulative {
                    previous = Some(run.bytes.clone());
                }
                last = Some((index, run.bytes));
            }
            Err(reason) => {
                warn!("Tier {}/{} ({}) failed: {}", index + 1, total, tier, reason);
                if let Some(cb) = &config.progress_callback {
                    cb.on_tier_failed(index, total, &reason);
                }
                report.attempts.push(TierAttempt {
                    tier: *tier,
                    outcome: TierOutcome::Failed { reason },
                    images_rewritten: 0,
                    images_skipped: 0,
                });
            }
        }
    }

    match last {
        Some((index, output)) => {
            warn!(
                "Budget {} not met; returning tier {} at {} bytes",
                budget,
                index + 1,
                output.len()
            );
            report.tier_used = Some(index);
            RecompressOutcome {
                bytes: output,
                report,
            }
        }
        None => {
            warn!("Budget {} not met; every tier failed", budget);
            RecompressOutcome { bytes, report }
        }
    }
}

/// One pass over the document at `tier`. `Err` carries a printable reason.
async fn run_tier(
    input: &[u8],
    tier: CompressionTier,
    config: &PipelineConfig,
) -> Result<TierRun, String> {
    let owned = input.to_vec();
    let (mut doc, collected) = tokio::task::spawn_blocking(move || {
        let doc = Document::load_mem(&owned).map_err(|e| format!("parse failed: {e}"))?;
        let collected = images::collect(&doc);
        Ok::<_, String>((doc, collected))
    })
    .await
    .map_err(|e| format!("parser task failed: {e}"))??;

    for (id, reason) in &collected.skipped {
        debug!("Image {:?} left unchanged: {}", id, reason);
    }
    let mut skipped = collected.skipped.len();
    let mut rewritten = 0;

    for (id, result) in reencode_all(collected.jobs, tier.quality, config).await {
        match result {
            Ok(stream) => {
                doc.objects.insert(id, Object::Stream(stream));
                rewritten += 1;
            }
            Err(reason) => {
                debug!("Image {:?} left unchanged: {}", id, reason);
                skipped += 1;
            }
        }
    }

    let mut bytes = tokio::task::spawn_blocking(move || {
        let mut out = Vec::new();
        doc.save_to(&mut out).map(|_| out)
    })
    .await
    .map_err(|e| format!("writer task failed: {e}"))?
    .map_err(|e| format!("save failed: {e}"))?;

    if let Some(transform) = &config.tier_transform {
        let options = TransformOptions::recompress(tier, config.tier_timeout);
        bytes = transform
            .transform(&bytes, &options)
            .await
            .map_err(|e| format!("{} failed: {e}", transform.name()))?;
    }

    Ok(TierRun {
        bytes,
        rewritten,
        skipped,
    })
}

/// Re-encode every job on the blocking pool, at most `config.concurrency` at
/// a time. Completion order is arbitrary; callers apply results by id.
async fn reencode_all(
    jobs: Vec<ImageJob>,
    quality: u8,
    config: &PipelineConfig,
) -> Vec<(ObjectId, Result<Stream, SkipReason>)> {
    stream::iter(jobs.into_iter().map(|job| {
        let codec = Arc::clone(&config.codec);
        async move {
            let id = job.id;
            let result = tokio::task::spawn_blocking(move || {
                images::rewrite(&job.stream, &job.header, quality, codec.as_ref())
            })
            .await
            .unwrap_or_else(|e| Err(SkipReason::Codec(format!("worker failed: {e}"))));
            (id, result)
        }
    }))
    .buffer_unordered(config.concurrency.max(1))
    .collect()
    .await
}
