//! CLI binary for pdfprep.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` / `PrepareOptions` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use pdfprep::housekeeping::{cache_status, sweep_expired};
use pdfprep::{
    prepare, write_delivery, CompressionAttempt, CompressionPreset, Delivery, PageSize,
    PipelineConfig, PipelineProgressCallback, PipelineResult, PrepError, PrepareOptions,
    ProgressCallback, ReturnMode, Source, Stage, StageReport, StageStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
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
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner naming the running stage, plus one
/// log line per finished stage and per compression attempt.
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
    fn on_run_start(&self, source: &str) {
        self.bar
            .println(format!("{} {}", cyan("◆"), bold(&format!("Preparing {source}…"))));
    }

    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_message(stage.to_string());
    }

    fn on_stage_complete(&self, stage: Stage, report: &StageReport) {
        let mark = match report.status {
            StageStatus::Completed => green("✓"),
            StageStatus::Skipped => dim("–"),
            StageStatus::SoftFailure => yellow("⚠"),
        };
        self.bar.println(format!(
            "  {} {:<19} {}  {}",
            mark,
            stage.to_string(),
            report.detail,
            dim(&format!("{:.1}s", report.duration_ms as f64 / 1000.0)),
        ));
    }

    fn on_compression_attempt(&self, attempt: &CompressionAttempt) {
        let outcome = match (&attempt.error, attempt.size_bytes) {
            (Some(e), _) => red(e),
            (None, Some(bytes)) if attempt.within_budget => {
                green(&format!("{:.2} MB", bytes as f64 / 1_048_576.0))
            }
            (None, Some(bytes)) => format!("{:.2} MB", bytes as f64 / 1_048_576.0),
            (None, None) => red("no output"),
        };
        self.bar.println(dim(&format!(
            "      preset {:<8} {}",
            attempt.preset.as_str(),
            outcome
        )));
    }

    fn on_run_complete(&self, result: &PipelineResult) {
        self.bar.finish_and_clear();
        let mark = if result.is_password_protected {
            yellow("⚠")
        } else {
            green("✔")
        };
        eprintln!(
            "{} {} → {}  ({:.2}% smaller)",
            mark,
            result.size.original_size_bytes,
            bold(&result.size.processed_size_bytes.to_string()),
            result.size.percent_reduction
        );
    }

    fn on_run_failed(&self, error: &PrepError) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), red(&error.to_string()));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Prepare a scan as a letter-sized PDF next to the current directory
  pdfprep scan.jpg

  # Word document to a 2 MB budget
  pdfprep report.docx --max-size-mb 2 -o report.pdf

  # Fetch from a URL and keep whatever protection cannot be removed
  pdfprep https://example.com/statement.pdf --no-password-removal

  # Publish as a time-limited link instead of writing a file
  pdfprep contract.pdf --link --public-base-url https://files.example.com

  # Full machine-readable report
  pdfprep --json scan.png > result.json

  # Shared directory maintenance
  pdfprep --cache-status
  pdfprep --sweep-older-than 60

COMPRESSION PRESETS (weakest to strongest on the ladder):
  screen  ebook (default)  printer  prepress
  Compression starts at --compression and moves along the ladder until the
  output fits --max-size-mb; the last preset is accepted regardless.

EXTERNAL TOOLS:
  gs        page fitting and compression        (--ghostscript-bin)
  qpdf      forced protection removal           (--qpdf-bin)
  soffice   office documents to PDF             (--office-bin)
  Missing tools degrade gracefully except soffice for office inputs.

ENVIRONMENT VARIABLES:
  Every option has a PDFPREP_* fallback, e.g. PDFPREP_MAX_SIZE_MB,
  PDFPREP_TEMP_DIR, PDFPREP_GHOSTSCRIPT_BIN. RUST_LOG overrides the
  log filter.
"#;

/// Prepare documents as letter-sized, unencrypted, size-bounded PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "pdfprep",
    version,
    about = "Prepare documents as letter-sized, unencrypted, size-bounded PDFs",
    long_about = "Convert images, office documents and PDFs (local files or URLs) into a \
letter-sized PDF: protection removed where possible, pages fitted to the target media, and \
compressed along a preset ladder until the result fits the size budget.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file path or HTTP/HTTPS URL.
    #[arg(required_unless_present_any = ["cache_status", "sweep_older_than"])]
    input: Option<String>,

    /// Write the PDF to this file (default: <input stem>.pdf in the current directory).
    #[arg(short, long, env = "PDFPREP_OUTPUT")]
    output: Option<PathBuf>,

    /// File name reported in the result and used for links.
    #[arg(long, env = "PDFPREP_FILENAME")]
    filename: Option<String>,

    /// Starting compression preset.
    #[arg(long, env = "PDFPREP_COMPRESSION", value_enum, default_value = "ebook")]
    compression: PresetArg,

    /// Size budget in megabytes.
    #[arg(long, env = "PDFPREP_MAX_SIZE_MB", default_value_t = 8.0)]
    max_size_mb: f64,

    /// Leave encrypted documents as they are.
    #[arg(long, env = "PDFPREP_NO_PASSWORD_REMOVAL")]
    no_password_removal: bool,

    /// Publish the result in the temp directory and print its link.
    #[arg(long, env = "PDFPREP_LINK")]
    link: bool,

    /// Print the full result as JSON on stdout.
    #[arg(long, env = "PDFPREP_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "PDFPREP_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFPREP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFPREP_QUIET")]
    quiet: bool,

    // ── Pipeline configuration ──────────────────────────────────────────
    /// Shared directory for temp files and published links.
    #[arg(long, env = "PDFPREP_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Prefix of published links.
    #[arg(long, env = "PDFPREP_PUBLIC_BASE_URL", default_value = "http://localhost:8000")]
    public_base_url: String,

    /// Lifetime of published links in minutes.
    #[arg(long, env = "PDFPREP_LINK_TTL_MINUTES", default_value_t = 60)]
    link_ttl_minutes: u64,

    /// Target page size.
    #[arg(long, env = "PDFPREP_PAGE_SIZE", value_enum, default_value = "letter")]
    page_size: PageSizeArg,

    /// Relative tolerance per page dimension.
    #[arg(long, env = "PDFPREP_GEOMETRY_TOLERANCE", default_value_t = 0.05)]
    geometry_tolerance: f64,

    /// Files at or below this size count as corrupt.
    #[arg(long, env = "PDFPREP_MIN_VALID_FILE_BYTES", default_value_t = 1000)]
    min_valid_file_bytes: u64,

    /// Margin around images laid out on a page, in points.
    #[arg(long, env = "PDFPREP_IMAGE_MARGIN_PT", default_value_t = 36.0)]
    image_margin_pt: f64,

    /// Comma-separated password dictionary (replaces the built-in list).
    #[arg(long, env = "PDFPREP_PASSWORDS", value_delimiter = ',')]
    passwords: Option<Vec<String>>,

    /// Remote fetch timeout in seconds.
    #[arg(long, env = "PDFPREP_FETCH_TIMEOUT", default_value_t = 60)]
    fetch_timeout: u64,

    /// Office conversion timeout in seconds.
    #[arg(long, env = "PDFPREP_OFFICE_TIMEOUT", default_value_t = 120)]
    office_timeout: u64,

    /// Page fitting timeout in seconds.
    #[arg(long, env = "PDFPREP_FIT_TIMEOUT", default_value_t = 120)]
    fit_timeout: u64,

    /// Per-preset compression timeout in seconds.
    #[arg(long, env = "PDFPREP_COMPRESS_TIMEOUT", default_value_t = 180)]
    compress_timeout: u64,

    /// Forced-strip timeout in seconds.
    #[arg(long, env = "PDFPREP_STRIP_TIMEOUT", default_value_t = 60)]
    strip_timeout: u64,

    #[arg(long, env = "PDFPREP_GHOSTSCRIPT_BIN", default_value = "gs")]
    ghostscript_bin: String,

    #[arg(long, env = "PDFPREP_OFFICE_BIN", default_value = "soffice")]
    office_bin: String,

    #[arg(long, env = "PDFPREP_QPDF_BIN", default_value = "qpdf")]
    qpdf_bin: String,

    // ── Housekeeping ────────────────────────────────────────────────────
    /// Delete files in the temp directory older than this many minutes (0 = all), then exit.
    #[arg(long)]
    sweep_older_than: Option<u64>,

    /// List the temp directory contents, then exit.
    #[arg(long)]
    cache_status: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum PresetArg {
    Screen,
    Ebook,
    Printer,
    Prepress,
}

impl From<PresetArg> for CompressionPreset {
    fn from(v: PresetArg) -> Self {
        match v {
            PresetArg::Screen => CompressionPreset::Screen,
            PresetArg::Ebook => CompressionPreset::Ebook,
            PresetArg::Printer => CompressionPreset::Printer,
            PresetArg::Prepress => CompressionPreset::Prepress,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum PageSizeArg {
    Letter,
    A4,
}

impl From<PageSizeArg> for PageSize {
    fn from(v: PageSizeArg) -> Self {
        match v {
            PageSizeArg::Letter => PageSize::LETTER,
            PageSizeArg::A4 => PageSize::A4,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner provides the feedback; library INFO logs would tear it.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Housekeeping modes ───────────────────────────────────────────────
    if cli.cache_status {
        let status = cache_status(&config.temp_dir).context("Failed to read temp directory")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&status).context("Failed to serialise status")?
            );
        } else {
            println!("Directory:  {}", config.temp_dir.display());
            println!("Files:      {}", status.file_count);
            println!("Total:      {:.2} KB", status.total_size_kb);
            for f in &status.files {
                println!(
                    "  {:<60} {:>10.2} KB  {:>8.1} min",
                    f.filename, f.size_kb, f.age_minutes
                );
            }
        }
        return Ok(());
    }

    if let Some(minutes) = cli.sweep_older_than {
        let older_than = (minutes > 0).then(|| Duration::from_secs(minutes * 60));
        let report =
            sweep_expired(&config.temp_dir, older_than).context("Failed to sweep temp directory")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialise report")?
            );
        } else if !cli.quiet {
            eprintln!("{} removed {} files", green("✔"), report.deleted);
            for e in &report.errors {
                eprintln!("  {} {}", red("✗"), e);
            }
        }
        return Ok(());
    }

    // ── Run pipeline ─────────────────────────────────────────────────────
    let input = cli
        .input
        .clone()
        .context("An input file or URL is required")?;
    let source = source_for(&input);
    let options = build_options(&cli, &input)?;

    let result = prepare(source, &options, &config)
        .await
        .context("Preparation failed")?;

    // With --json and no -o the PDF travels base64-encoded inside the JSON.
    let is_inline = matches!(result.delivery, Delivery::Inline { .. });
    let written = if is_inline && (cli.output.is_some() || !cli.json) {
        let path = cli
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(options.resolved_filename()));
        write_delivery(&result, &path)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Some(path)
    } else {
        None
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialise result")?
        );
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }

    if let Delivery::Link { url, expires_at, .. } = &result.delivery {
        println!("{url}");
        eprintln!("   {}", dim(&format!("expires {}", expires_at.to_rfc3339())));
    }
    if let Some(path) = written {
        eprintln!(
            "{}  {} pages  {}ms  →  {}",
            if result.is_password_protected {
                yellow("⚠")
            } else {
                green("✔")
            },
            result.page_count.map_or("?".to_string(), |n| n.to_string()),
            result.duration_ms,
            bold(&path.display().to_string()),
        );
    }
    if result.is_password_protected {
        eprintln!("   {}", yellow("document is still password protected"));
    }
    if let Some(preset) = result.final_preset {
        eprintln!(
            "   {}",
            dim(&format!(
                "preset {}  {:.2} MB saved ({:.2}%)",
                preset, result.size.mb_saved, result.size.percent_reduction
            ))
        );
    }
    if !show_progress {
        for entry in result.log.entries() {
            eprintln!("   {}", dim(&format!("[{}] {}", entry.stage, entry.message)));
        }
    }

    Ok(())
}

fn source_for(input: &str) -> Source {
    if input.starts_with("http://") || input.starts_with("https://") {
        Source::Url(input.to_string())
    } else {
        Source::Path(PathBuf::from(input))
    }
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .public_base_url(cli.public_base_url.clone())
        .link_ttl_minutes(cli.link_ttl_minutes)
        .fetch_timeout_secs(cli.fetch_timeout)
        .office_timeout_secs(cli.office_timeout)
        .fit_timeout_secs(cli.fit_timeout)
        .compress_timeout_secs(cli.compress_timeout)
        .strip_timeout_secs(cli.strip_timeout)
        .target_page(cli.page_size.clone().into())
        .geometry_tolerance(cli.geometry_tolerance)
        .min_valid_file_bytes(cli.min_valid_file_bytes)
        .image_margin_pt(cli.image_margin_pt)
        .ghostscript_bin(cli.ghostscript_bin.clone())
        .office_bin(cli.office_bin.clone())
        .qpdf_bin(cli.qpdf_bin.clone());

    if let Some(ref dir) = cli.temp_dir {
        builder = builder.temp_dir(dir.clone());
    }
    if let Some(ref passwords) = cli.passwords {
        builder = builder.password_dictionary(passwords.iter().cloned());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Map CLI args to `PrepareOptions`.
fn build_options(cli: &Cli, input: &str) -> Result<PrepareOptions> {
    let filename = cli
        .filename
        .clone()
        .or_else(|| default_filename(input));
    let mut builder = PrepareOptions::builder()
        .force_password_removal(!cli.no_password_removal)
        .target_compression(cli.compression.clone().into())
        .max_file_size_mb(cli.max_size_mb)
        .return_mode(if cli.link {
            ReturnMode::Link
        } else {
            ReturnMode::Inline
        });
    if let Some(name) = filename {
        builder = builder.output_filename(name);
    }
    builder.build().context("Invalid options")
}

/// `<stem>.pdf` of the input's last path segment.
fn default_filename(input: &str) -> Option<String> {
    let last = input
        .split(['?', '#'])
        .next()
        .unwrap_or(input)
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(input);
    let stem = Path::new(last).file_stem()?.to_str()?.trim();
    (!stem.is_empty()).then(|| format!("{stem}.pdf"))
}
