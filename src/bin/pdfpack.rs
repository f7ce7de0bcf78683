//! CLI binary for pdfpack.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and writes the merged PDF.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdfpack::{
    parse_ladder, run_inputs, run_to_file, CompressionTier, GhostscriptTransform, PipelineConfig,
    PipelineProgressCallback, PipelineResult, ProgressCallback, Stage, TierChaining,
    DEFAULT_TIER_TIMEOUT_SECS, MAX_OUTPUT_SIZE,
};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

fn human_bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Parse `1048576`, `512K`, `10M` or `1G` (binary multiples).
fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, multiplier) = match s.char_indices().last() {
        Some((i, 'k' | 'K')) => (&s[..i], 1024),
        Some((i, 'm' | 'M')) => (&s[..i], 1024 * 1024),
        Some((i, 'g' | 'G')) => (&s[..i], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("'{s}' is not a size (try 10M or 5242880)"))?;
    value
        .checked_mul(multiplier)
        .filter(|&v| v > 0)
        .ok_or_else(|| format!("'{s}' must be between 1 byte and {} bytes", u64::MAX))
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one spinner whose prefix tracks the stage and whose
/// message tracks the current document or tier.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_stage(&self, stage: Stage) {
        self.bar.set_prefix(stage.to_string());
        self.bar.set_message("");
    }

    fn on_document_merged(&self, index: usize, total: usize, pages: usize, repaired: bool) {
        self.bar.set_message(format!("document {}/{}", index + 1, total));
        if repaired {
            self.bar.println(format!(
                "  {} document {}/{} repaired  {}",
                cyan("⚠"),
                index + 1,
                total,
                dim(&format!("{pages} pages")),
            ));
        }
    }

    fn on_tier_start(&self, index: usize, total: usize, tier: &CompressionTier) {
        self.bar.set_message(format!("tier {}/{} ({})", index + 1, total, tier));
    }

    fn on_tier_complete(&self, index: usize, total: usize, size: u64, fits: bool) {
        self.bar.println(format!(
            "  {} tier {}/{}  {}",
            if fits { green("✓") } else { dim("·") },
            index + 1,
            total,
            dim(&human_bytes(size)),
        ));
    }

    fn on_tier_failed(&self, index: usize, total: usize, error: &str) {
        let msg: String = error.chars().take(80).collect();
        self.bar.println(format!(
            "  {} tier {}/{}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg)
        ));
    }

    fn on_pipeline_complete(&self, _original_size: u64, _final_size: u64) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Merge two PDFs and an archive, write to a file
  pdfpack cover.pdf scans.zip appendix.pdf -o packet.pdf

  # Tighter budget, custom ladder
  pdfpack --max-size 5M --tiers ebook:70,screen:40,screen:20 *.pdf -o small.pdf

  # Let Ghostscript downsample images on every tier
  pdfpack --external-tiers big.pdf -o out.pdf

  # Metadata as JSON (the PDF still goes to -o)
  pdfpack --json bundle.zip -o out.pdf

ORDERING:
  Parts are merged in the order given. Archive members are inserted at their
  archive's position, sorted by name with numbers compared numerically
  (page2.pdf before page10.pdf).

TIERS:
  A tier is resolution:quality, where resolution is printer (300 dpi),
  ebook (150 dpi) or screen (72 dpi) and quality is a JPEG quality 1-100.
  Default: printer:80,ebook:65,ebook:50,screen:35,screen:20

ENVIRONMENT VARIABLES:
  PDFPACK_MAX_SIZE        Output budget (bytes, or with K/M/G suffix)
  PDFPACK_TIERS           Tier ladder
  PDFPACK_GHOSTSCRIPT     Ghostscript binary used for repair and --external-tiers
  RUST_LOG                Log filter (overrides -v / -q)
"#;

/// Merge PDFs and ZIP archives into one PDF that fits a size budget.
#[derive(Parser, Debug)]
#[command(
    name = "pdfpack",
    version,
    about = "Merge PDFs and ZIP archives into one PDF that fits a size budget",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF or ZIP files (local paths or HTTP/HTTPS URLs), in merge order.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Write the PDF to this file instead of stdout.
    #[arg(short, long, env = "PDFPACK_OUTPUT")]
    output: Option<PathBuf>,

    /// Maximum output size (bytes, or with K/M/G suffix).
    #[arg(long, env = "PDFPACK_MAX_SIZE", default_value_t = MAX_OUTPUT_SIZE,
          value_parser = parse_size)]
    max_size: u64,

    /// Comma-separated tier ladder, gentlest first (e.g. printer:80,ebook:60).
    #[arg(long, env = "PDFPACK_TIERS")]
    tiers: Option<String>,

    /// Timeout in seconds for each Ghostscript invocation.
    #[arg(long, env = "PDFPACK_TIER_TIMEOUT", default_value_t = DEFAULT_TIER_TIMEOUT_SECS)]
    tier_timeout: u64,

    /// Whether each tier starts from the merged PDF or the previous tier's output.
    #[arg(long, env = "PDFPACK_CHAINING", value_enum, default_value = "from-original")]
    chaining: ChainingArg,

    /// Number of images re-encoded concurrently.
    #[arg(short, long, env = "PDFPACK_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Ghostscript binary.
    #[arg(long = "gs", env = "PDFPACK_GHOSTSCRIPT")]
    ghostscript: Option<PathBuf>,

    /// Fail on malformed inputs instead of repairing them with Ghostscript.
    #[arg(long)]
    no_repair: bool,

    /// Also run Ghostscript downsampling on every tier.
    #[arg(long, env = "PDFPACK_EXTERNAL_TIERS")]
    external_tiers: bool,

    /// Do not Flate-compress unfiltered streams of the merged PDF.
    #[arg(long)]
    no_compress_streams: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDFPACK_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print result metadata (or the error) as JSON on stdout.
    #[arg(long, requires = "output")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFPACK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFPACK_QUIET")]
    quiet: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "PDFPACK_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ChainingArg {
    FromOriginal,
    Cumulative,
}

impl From<ChainingArg> for TierChaining {
    fn from(v: ChainingArg) -> Self {
        match v {
            ChainingArg::FromOriginal => TierChaining::FromOriginal,
            ChainingArg::Cumulative => TierChaining::Cumulative,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the spinner is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && io::stderr().is_terminal();
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if cli.output.is_none() && io::stdout().is_terminal() {
        bail!("Refusing to write a PDF to the terminal; use -o FILE or redirect stdout");
    }

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run pipeline ─────────────────────────────────────────────────────
    let outcome = match &cli.output {
        Some(path) => run_to_file(&cli.inputs, path, &config).await,
        None => run_inputs(&cli.inputs, &config).await,
    };
    let result = match outcome {
        Ok(result) => result,
        Err(e) if cli.json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&e.to_payload()).context("Failed to serialise error")?
            );
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Pipeline failed"),
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
        println!("{json}");
    } else if cli.output.is_none() {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(&result.bytes)
            .context("Failed to write to stdout")?;
        handle.flush().context("Failed to flush stdout")?;
    }

    if !cli.quiet && !cli.json {
        print_summary(&result, cli.output.as_ref(), &config);
    }
    Ok(())
}

fn print_summary(result: &PipelineResult, output: Option<&PathBuf>, config: &PipelineConfig) {
    let report = &result.report;
    let tier = report
        .tier_used
        .and_then(|i| config.tiers.get(i))
        .map(|t| format!("tier {t}"))
        .unwrap_or_else(|| "unchanged".to_string());
    eprintln!(
        "{}  {} pages from {} document(s)  {} → {}  {}",
        if report.budget_met { green("✔") } else { cyan("⚠") },
        result.page_count,
        result.document_count,
        human_bytes(result.original_size),
        bold(&human_bytes(result.final_size)),
        dim(&tier),
    );
    if !report.budget_met {
        eprintln!(
            "   budget of {} not met; returning the last tier's result",
            human_bytes(report.budget)
        );
    }
    if let Some(path) = output {
        eprintln!("   {}", bold(&path.display().to_string()));
    }
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .max_output_size(cli.max_size)
        .chaining(cli.chaining.into())
        .tier_timeout_secs(cli.tier_timeout)
        .concurrency(cli.concurrency)
        .compress_streams(!cli.no_compress_streams)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref ladder) = cli.tiers {
        builder = builder.tiers(parse_ladder(ladder).context("Invalid --tiers")?);
    }

    let gs = Arc::new(match &cli.ghostscript {
        Some(path) => GhostscriptTransform::new(path),
        None => GhostscriptTransform::default(),
    });
    builder = if cli.no_repair {
        builder.no_repair()
    } else {
        builder.repair(gs.clone())
    };
    if cli.external_tiers {
        builder = builder.tier_transform(gs);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_suffixes() {
        assert_eq!(parse_size("1048576"), Ok(1_048_576));
        assert_eq!(parse_size("512K"), Ok(512 * 1024));
        assert_eq!(parse_size("10m"), Ok(10 * 1024 * 1024));
        assert_eq!(parse_size(" 2G "), Ok(2 * 1024 * 1024 * 1024));
        assert!(parse_size("0").is_err());
        assert!(parse_size("lots").is_err());
        assert!(parse_size("99999999999999999999G").is_err());
    }

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(10 * 1024 * 1024), "10.0 MiB");
    }

    #[test]
    fn cli_maps_to_config() {
        let cli = Cli::parse_from([
            "pdfpack",
            "--max-size",
            "5M",
            "--tiers",
            "ebook:70,screen:30",
            "--chaining",
            "cumulative",
            "--no-repair",
            "a.pdf",
            "b.zip",
        ]);
        let config = build_config(&cli, None).unwrap();
        assert_eq!(config.max_output_size, 5 * 1024 * 1024);
        assert_eq!(config.tiers.len(), 2);
        assert_eq!(config.chaining, TierChaining::Cumulative);
        assert!(config.repair.is_none());
        assert!(config.tier_transform.is_none());
        assert_eq!(cli.inputs, ["a.pdf", "b.zip"]);
    }

    #[test]
    fn json_requires_output() {
        assert!(Cli::try_parse_from(["pdfpack", "--json", "a.pdf"]).is_err());
    }
}
