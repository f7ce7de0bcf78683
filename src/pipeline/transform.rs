//! Out-of-process document transforms: structural repair and tier rewrites.
//!
//! A [`DocumentTransform`] takes a whole PDF and returns a rewritten one. The
//! merger uses it to repair inputs that fail to parse; the recompression engine
//! can optionally run one after each tier's image pass.
//!
//! [`GhostscriptTransform`] shells out to `gs -sDEVICE=pdfwrite`. Every
//! invocation gets its own scratch directory (a [`tempfile::TempDir`], removed
//! when it drops on every exit path) and runs under `tokio::time::timeout`
//! with `kill_on_drop`, so a hung tool is killed when its deadline passes.

use crate::config::CompressionTier;
use crate::error::TransformError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// What a transform is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformMode {
    /// Rewrite a malformed document into a parseable one.
    Repair,
    /// Rewrite with images downsampled and re-encoded per the tier.
    Recompress(CompressionTier),
}

/// Options for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformOptions {
    pub mode: TransformMode,
    pub timeout: Duration,
}

impl TransformOptions {
    pub fn repair(timeout: Duration) -> Self {
        Self {
            mode: TransformMode::Repair,
            timeout,
        }
    }

    pub fn recompress(tier: CompressionTier, timeout: Duration) -> Self {
        Self {
            mode: TransformMode::Recompress(tier),
            timeout,
        }
    }
}

/// `transform(inputBytes, options) -> outputBytes`.
///
/// Contract: idempotent on already-valid input, never mutates its input,
/// honours `options.timeout`. Callers treat any error as "capability
/// unavailable for this invocation".
#[async_trait]
pub trait DocumentTransform: Send + Sync {
    /// Short identifier for logs and `Debug` output.
    fn name(&self) -> &'static str;

    async fn transform(
        &self,
        input: &[u8],
        options: &TransformOptions,
    ) -> Result<Vec<u8>, TransformError>;
}

/// Returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransform;

#[async_trait]
impl DocumentTransform for NoopTransform {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn transform(
        &self,
        input: &[u8],
        _options: &TransformOptions,
    ) -> Result<Vec<u8>, TransformError> {
        Ok(input.to_vec())
    }
}

/// Ghostscript `pdfwrite` device rewrite.
#[derive(Debug, Clone)]
pub struct GhostscriptTransform {
    binary: PathBuf,
    scratch_root: Option<PathBuf>,
}

impl Default for GhostscriptTransform {
    fn default() -> Self {
        let binary = if cfg!(windows) { "gswin64c" } else { "gs" };
        Self::new(binary)
    }
}

impl GhostscriptTransform {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            scratch_root: None,
        }
    }

    /// Create scratch directories under `root` instead of the system temp dir.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn scratch_dir(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pdfpack-");
        match &self.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }
}

#[async_trait]
impl DocumentTransform for GhostscriptTransform {
    fn name(&self) -> &'static str {
        "ghostscript"
    }

    async fn transform(
        &self,
        input: &[u8],
        options: &TransformOptions,
    ) -> Result<Vec<u8>, TransformError> {
        let scratch = self.scratch_dir()?;
        let in_path = scratch.path().join("input.pdf");
        let out_path = scratch.path().join("output.pdf");
        tokio::fs::write(&in_path, input).await?;

        let child = Command::new(&self.binary)
            .args(ghostscript_args(options.mode, &in_path, &out_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => TransformError::ToolNotFound {
                    tool: self.binary.display().to_string(),
                },
                _ => TransformError::Io(e),
            })?;

        debug!(
            "Running {} ({:?}, timeout {}s)",
            self.binary.display(),
            options.mode,
            options.timeout.as_secs()
        );

        let output = match tokio::time::timeout(options.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "{} timed out after {}s",
                    self.binary.display(),
                    options.timeout.as_secs()
                );
                return Err(TransformError::Timeout(options.timeout));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransformError::Failed {
                status: output.status.to_string(),
                stderr: stderr.trim().chars().take(500).collect(),
            });
        }

        let bytes = tokio::fs::read(&out_path).await?;
        if bytes.is_empty() {
            return Err(TransformError::EmptyOutput);
        }
        Ok(bytes)
    }
}

/// Build the `gs` argument list for one invocation.
fn ghostscript_args(mode: TransformMode, input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-sDEVICE=pdfwrite",
        "-dNOPAUSE",
        "-dBATCH",
        "-dQUIET",
        "-dSAFER",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();

    if let TransformMode::Recompress(tier) = mode {
        let dpi = tier.resolution.dpi();
        args.extend(
            [
                "-dCompatibilityLevel=1.5".to_string(),
                format!("-dPDFSETTINGS=/{}", tier.resolution.as_str()),
                "-dDownsampleColorImages=true".to_string(),
                "-dDownsampleGrayImages=true".to_string(),
                format!("-dColorImageResolution={dpi}"),
                format!("-dGrayImageResolution={dpi}"),
                "-dAutoFilterColorImages=false".to_string(),
                "-dAutoFilterGrayImages=false".to_string(),
                "-dColorImageFilter=/DCTEncode".to_string(),
                "-dGrayImageFilter=/DCTEncode".to_string(),
                format!("-dJPEGQ={}", tier.quality),
            ]
            .into_iter()
            .map(OsString::from),
        );
    }

    let mut out_arg = OsString::from("-sOutputFile=");
    out_arg.push(output);
    args.push(out_arg);
    args.push(input.as_os_str().to_owned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolutionClass;

    fn repair_opts() -> TransformOptions {
        TransformOptions::repair(Duration::from_secs(5))
    }

    #[test]
    fn repair_args_end_with_output_then_input() {
        let args = ghostscript_args(
            TransformMode::Repair,
            Path::new("/tmp/x/input.pdf"),
            Path::new("/tmp/x/output.pdf"),
        );
        let n = args.len();
        assert_eq!(args[n - 2], OsString::from("-sOutputFile=/tmp/x/output.pdf"));
        assert_eq!(args[n - 1], OsString::from("/tmp/x/input.pdf"));
        assert!(!args.iter().any(|a| a.to_string_lossy().starts_with("-dJPEGQ")));
    }

    #[test]
    fn recompress_args_carry_tier() {
        let tier = CompressionTier::new(ResolutionClass::Ebook, 55);
        let args: Vec<String> = ghostscript_args(
            TransformMode::Recompress(tier),
            Path::new("in.pdf"),
            Path::new("out.pdf"),
        )
        .into_iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
        assert!(args.contains(&"-dPDFSETTINGS=/ebook".to_string()));
        assert!(args.contains(&"-dColorImageResolution=150".to_string()));
        assert!(args.contains(&"-dJPEGQ=55".to_string()));
    }

    #[tokio::test]
    async fn noop_returns_input() {
        let out = NoopTransform.transform(b"%PDF-1.4", &repair_opts()).await.unwrap();
        assert_eq!(out, b"%PDF-1.4");
    }

    #[tokio::test]
    async fn missing_binary_is_tool_not_found_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let gs = GhostscriptTransform::new("/definitely/not/a/real/gs")
            .with_scratch_root(root.path());
        let err = gs.transform(b"%PDF-1.4", &repair_opts()).await.unwrap_err();
        assert!(matches!(err, TransformError::ToolNotFound { .. }), "got: {err}");
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-gs");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_tool_times_out_and_cleans_up() {
        let bin = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let gs = GhostscriptTransform::new(fake_tool(bin.path(), "sleep 5"))
            .with_scratch_root(root.path());
        let opts = TransformOptions::repair(Duration::from_millis(200));

        let err = gs.transform(b"%PDF-1.4", &opts).await.unwrap_err();
        assert!(matches!(err, TransformError::Timeout(_)), "got: {err}");
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_tool_reports_stderr() {
        let bin = tempfile::tempdir().unwrap();
        let gs = GhostscriptTransform::new(fake_tool(bin.path(), "echo broken xref >&2; exit 3"));
        let err = gs.transform(b"%PDF-1.4", &repair_opts()).await.unwrap_err();
        match err {
            TransformError::Failed { stderr, .. } => assert_eq!(stderr, "broken xref"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn copying_tool_roundtrips_bytes() {
        let bin = tempfile::tempdir().unwrap();
        let script = r#"for a in "$@"; do case "$a" in -sOutputFile=*) out="${a#-sOutputFile=}";; esac; done
eval in=\${$#}
cp "$in" "$out""#;
        let gs = GhostscriptTransform::new(fake_tool(bin.path(), script));
        let out = gs.transform(b"%PDF-1.7 body", &repair_opts()).await.unwrap();
        assert_eq!(out, b"%PDF-1.7 body");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_tool_without_output_is_an_error() {
        let bin = tempfile::tempdir().unwrap();
        let gs = GhostscriptTransform::new(fake_tool(bin.path(), "exit 0"));
        let err = gs.transform(b"%PDF-1.4", &repair_opts()).await.unwrap_err();
        // No output file was written at all, so the read fails.
        assert!(matches!(err, TransformError::Io(_) | TransformError::EmptyOutput));
    }
}
