//! Configuration types for the merge-and-recompress pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The three constants the surrounding system is
//! expected to override are the byte budget ([`MAX_OUTPUT_SIZE`]), the tier
//! ladder ([`default_ladder`]) and the per-invocation timeout for external
//! tools ([`DEFAULT_TIER_TIMEOUT_SECS`]).

use crate::error::PipelineError;
use crate::pipeline::encode::{ImageCodec, JpegCodec};
use crate::pipeline::transform::{DocumentTransform, GhostscriptTransform};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Default output budget: 10 MiB.
pub const MAX_OUTPUT_SIZE: u64 = 10 * 1024 * 1024;

/// Default wall-clock limit for one external tool invocation.
pub const DEFAULT_TIER_TIMEOUT_SECS: u64 = 60;

/// The built-in ladder, gentlest first.
pub fn default_ladder() -> Vec<CompressionTier> {
    vec![
        CompressionTier::new(ResolutionClass::Printer, 80),
        CompressionTier::new(ResolutionClass::Ebook, 65),
        CompressionTier::new(ResolutionClass::Ebook, 50),
        CompressionTier::new(ResolutionClass::Screen, 35),
        CompressionTier::new(ResolutionClass::Screen, 20),
    ]
}

/// Configuration for one pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use pdfpack::{PipelineConfig, TierChaining};
///
/// let config = PipelineConfig::builder()
///     .max_output_size(5 * 1024 * 1024)
///     .chaining(TierChaining::Cumulative)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Maximum acceptable output size in bytes. Default: [`MAX_OUTPUT_SIZE`].
    pub max_output_size: u64,

    /// Ordered ladder of tiers, most gentle first. Default: [`default_ladder`].
    pub tiers: Vec<CompressionTier>,

    /// Whether each tier starts from the merged bytes or from the previous
    /// tier's output. Default: [`TierChaining::FromOriginal`].
    pub chaining: TierChaining,

    /// Wall-clock limit for each external tool invocation (repair or tier
    /// rewrite). Default: 60 s.
    pub tier_timeout: Duration,

    /// Number of images re-encoded concurrently inside one tier. Default: 4.
    pub concurrency: usize,

    /// Flate-compress unfiltered streams of the merged document. Default: true.
    pub compress_streams: bool,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// In-process image codec used by the recompression walker.
    pub codec: Arc<dyn ImageCodec>,

    /// Structural repair pass for inputs that fail to open.
    /// `None` disables repair: a malformed input is then immediately fatal.
    /// Default: Ghostscript (`gs`) when installed.
    pub repair: Option<Arc<dyn DocumentTransform>>,

    /// Optional whole-document rewrite run after the in-process image pass of
    /// every tier. Default: `None`.
    pub tier_transform: Option<Arc<dyn DocumentTransform>>,

    /// Optional observer for stage/tier events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_output_size: MAX_OUTPUT_SIZE,
            tiers: default_ladder(),
            chaining: TierChaining::default(),
            tier_timeout: Duration::from_secs(DEFAULT_TIER_TIMEOUT_SECS),
            concurrency: 4,
            compress_streams: true,
            download_timeout_secs: 120,
            codec: Arc::new(JpegCodec),
            repair: Some(Arc::new(GhostscriptTransform::default())),
            tier_transform: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("max_output_size", &self.max_output_size)
            .field("tiers", &self.tiers)
            .field("chaining", &self.chaining)
            .field("tier_timeout", &self.tier_timeout)
            .field("concurrency", &self.concurrency)
            .field("compress_streams", &self.compress_streams)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("codec", &self.codec.name())
            .field("repair", &self.repair.as_ref().map(|t| t.name()))
            .field("tier_transform", &self.tier_transform.as_ref().map(|t| t.name()))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn max_output_size(mut self, bytes: u64) -> Self {
        self.config.max_output_size = bytes;
        self
    }

    pub fn tiers(mut self, tiers: Vec<CompressionTier>) -> Self {
        self.config.tiers = tiers;
        self
    }

    pub fn chaining(mut self, chaining: TierChaining) -> Self {
        self.config.chaining = chaining;
        self
    }

    pub fn tier_timeout(mut self, timeout: Duration) -> Self {
        self.config.tier_timeout = timeout;
        self
    }

    pub fn tier_timeout_secs(self, secs: u64) -> Self {
        self.tier_timeout(Duration::from_secs(secs))
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn compress_streams(mut self, v: bool) -> Self {
        self.config.compress_streams = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.config.codec = codec;
        self
    }

    pub fn repair(mut self, transform: Arc<dyn DocumentTransform>) -> Self {
        self.config.repair = Some(transform);
        self
    }

    pub fn no_repair(mut self) -> Self {
        self.config.repair = None;
        self
    }

    pub fn tier_transform(mut self, transform: Arc<dyn DocumentTransform>) -> Self {
        self.config.tier_transform = Some(transform);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.max_output_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "Output budget must be > 0 bytes".into(),
            ));
        }
        if c.tiers.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Compression ladder must contain at least one tier".into(),
            ));
        }
        if let Some(bad) = c.tiers.iter().find(|t| !(1..=100).contains(&t.quality)) {
            return Err(PipelineError::InvalidConfig(format!(
                "Tier quality must be 1–100, got {}",
                bad.quality
            )));
        }
        if c.tier_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "Tier timeout must be > 0".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Value types ──────────────────────────────────────────────────────────

/// Target resolution preset for a tier.
///
/// The in-process image pass never changes pixel dimensions; this class only
/// reaches an external [`DocumentTransform`] as its downsampling target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionClass {
    /// 300 dpi.
    Printer,
    /// 150 dpi.
    Ebook,
    /// 72 dpi.
    Screen,
}

impl ResolutionClass {
    pub fn dpi(self) -> u32 {
        match self {
            ResolutionClass::Printer => 300,
            ResolutionClass::Ebook => 150,
            ResolutionClass::Screen => 72,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionClass::Printer => "printer",
            ResolutionClass::Ebook => "ebook",
            ResolutionClass::Screen => "screen",
        }
    }
}

impl FromStr for ResolutionClass {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "printer" | "print" => Ok(ResolutionClass::Printer),
            "ebook" => Ok(ResolutionClass::Ebook),
            "screen" => Ok(ResolutionClass::Screen),
            other => Err(PipelineError::InvalidConfig(format!(
                "Unknown resolution class '{other}' (expected printer, ebook or screen)"
            ))),
        }
    }
}

/// One rung of the recompression ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionTier {
    pub resolution: ResolutionClass,
    /// JPEG quality factor, 1–100.
    pub quality: u8,
}

impl CompressionTier {
    pub const fn new(resolution: ResolutionClass, quality: u8) -> Self {
        Self {
            resolution,
            quality,
        }
    }
}

impl fmt::Display for CompressionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resolution.as_str(), self.quality)
    }
}

impl FromStr for CompressionTier {
    type Err = PipelineError;

    /// Parse `class:quality`, e.g. `ebook:65`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (class, quality) = s.split_once(':').ok_or_else(|| {
            PipelineError::InvalidConfig(format!("Tier '{s}' must look like 'ebook:65'"))
        })?;
        let quality: u8 = quality.trim().parse().map_err(|_| {
            PipelineError::InvalidConfig(format!("Tier '{s}' has a non-numeric quality"))
        })?;
        Ok(CompressionTier::new(class.parse()?, quality))
    }
}

/// Parse a comma-separated ladder such as `printer:80,ebook:60,screen:30`.
pub fn parse_ladder(s: &str) -> Result<Vec<CompressionTier>, PipelineError> {
    s.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Source of each tier's input once the first tier has missed the budget.
///
/// * `FromOriginal`: every tier re-encodes the merged document. Idempotent;
///   output size is monotonic in the ladder's quality.
/// * `Cumulative`: each tier re-encodes the previous tier's output. Quality
///   loss compounds, so repeated application keeps shrinking the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TierChaining {
    #[default]
    FromOriginal,
    Cumulative,
}

impl FromStr for TierChaining {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "from-original" | "original" => Ok(TierChaining::FromOriginal),
            "cumulative" => Ok(TierChaining::Cumulative),
            other => Err(PipelineError::InvalidConfig(format!(
                "Unknown chaining policy '{other}' (expected from-original or cumulative)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ladder_gets_lossier() {
        let ladder = default_ladder();
        for pair in ladder.windows(2) {
            assert!(pair[1].quality < pair[0].quality);
            assert!(pair[1].resolution.dpi() <= pair[0].resolution.dpi());
        }
    }

    #[test]
    fn parse_ladder_roundtrips_display() {
        let ladder = parse_ladder("printer:80, ebook:60,screen:30").unwrap();
        assert_eq!(ladder.len(), 3);
        assert_eq!(ladder[1], CompressionTier::new(ResolutionClass::Ebook, 60));
        assert_eq!(ladder[2].to_string(), "screen:30");
    }

    #[test]
    fn parse_ladder_rejects_garbage() {
        assert!(parse_ladder("ebook").is_err());
        assert!(parse_ladder("fax:40").is_err());
        assert!(parse_ladder("ebook:high").is_err());
    }

    #[test]
    fn build_rejects_empty_ladder() {
        let err = PipelineConfig::builder().tiers(vec![]).build().unwrap_err();
        assert!(err.to_string().contains("at least one tier"));
    }

    #[test]
    fn build_rejects_out_of_range_quality() {
        let err = PipelineConfig::builder()
            .tiers(vec![CompressionTier::new(ResolutionClass::Screen, 0)])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("1–100"));
    }

    #[test]
    fn build_rejects_zero_budget() {
        assert!(PipelineConfig::builder().max_output_size(0).build().is_err());
    }

    #[test]
    fn chaining_parses() {
        assert_eq!(
            "cumulative".parse::<TierChaining>().unwrap(),
            TierChaining::Cumulative
        );
        assert_eq!(
            "from-original".parse::<TierChaining>().unwrap(),
            TierChaining::FromOriginal
        );
        assert!("sideways".parse::<TierChaining>().is_err());
    }

    #[test]
    fn debug_hides_trait_objects() {
        let s = format!("{:?}", PipelineConfig::default());
        assert!(s.contains("jpeg"));
        assert!(s.contains("max_output_size"));
    }
}
