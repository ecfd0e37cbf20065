//! CLI binary for contentful2strapi.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `MigrationConfig` and the two API clients, then prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use contentful2strapi::{
    convert_with_diagnostics, ContentfulClient, ContentfulConfig, HttpFetcher, MappingFile,
    MigrationConfig, MigrationProgressCallback, Migrator, Node, ProgressCallback, RecordOutcome,
    RecordResult, ResolvedMedia, StepSummary, StrapiClient, StrapiConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar per step, re-sized when each step's records have been fetched.
struct CliProgressCallback {
    bar: ProgressBar,
    upload_failures: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Fetching");
        bar.set_message("Reading source entries…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            upload_failures: AtomicUsize::new(0),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl MigrationProgressCallback for CliProgressCallback {
    fn on_step_start(&self, content_type: &str, total_records: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} records  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_style(style);
        self.bar.set_length(total_records as u64);
        self.bar.set_position(0);
        self.bar.set_prefix(content_type.to_string());
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Migrating {total_records} '{content_type}' records…"))
        ));
    }

    fn on_record_start(&self, _index: usize, _total: usize, source_id: &str) {
        self.bar.set_message(source_id.to_string());
    }

    fn on_upload(&self, source_id: &str, file_name: &str, succeeded: bool) {
        if !succeeded {
            self.upload_failures.fetch_add(1, Ordering::SeqCst);
            self.bar.println(format!(
                "    {} upload of {} failed {}",
                yellow("⚠"),
                file_name,
                dim(&format!("({source_id})"))
            ));
        }
    }

    fn on_record_complete(&self, index: usize, total: usize, result: &RecordResult) {
        let (mark, detail) = match &result.outcome {
            RecordOutcome::Created { destination_id } => {
                (green("✓"), format!("created #{destination_id}"))
            }
            RecordOutcome::Skipped { existing_id } => {
                (dim("↷"), dim(&format!("exists as #{existing_id}")))
            }
            RecordOutcome::Failed { error } => {
                let msg = error.to_string();
                let msg = if msg.chars().count() > 80 {
                    format!("{}\u{2026}", msg.chars().take(79).collect::<String>())
                } else {
                    msg
                };
                (red("✗"), red(&msg))
            }
        };
        self.bar.println(format!(
            "  {} {:>4}/{:<4} {:<24} {}  {}",
            mark,
            index,
            total,
            result.source_id,
            detail,
            dim(&format!("{:.1}s", result.duration_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_step_complete(&self, summary: &StepSummary) {
        let upload_failures = self.upload_failures.swap(0, Ordering::SeqCst);
        let uploads = if upload_failures > 0 {
            yellow(&format!(", {upload_failures} upload(s) failed"))
        } else {
            String::new()
        };
        self.bar.println(format!(
            "{} {}: {} created, {} skipped, {} failed{}",
            if summary.failed == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            bold(&summary.content_type),
            summary.created,
            summary.skipped,
            summary.failed,
            uploads,
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Migrate every model listed in the mapping file, in order
  cf2strapi migrate --mapping mapping.json

  # Only one content type, JSON stats on stdout
  cf2strapi migrate --mapping mapping.json --only blogPost --json > stats.json

  # Render a rich-text document to Markdown (no network)
  cf2strapi render body.json

  # Render the `body` field of an exported entry
  cf2strapi render entry.json --field body

ENVIRONMENT VARIABLES:
  CONTENTFUL_SPACE_ID       Source space id
  CONTENTFUL_ACCESS_TOKEN   Content Delivery API token
  CONTENTFUL_ENVIRONMENT    Source environment (default: master)
  STRAPI_URL                Destination base URL, e.g. http://localhost:1337
  STRAPI_API_TOKEN          Destination API token (full access)
  RUST_LOG                  Override log filter, e.g. contentful2strapi=debug
"#;

/// Migrate Contentful content into Strapi.
#[derive(Parser, Debug)]
#[command(
    name = "cf2strapi",
    version,
    about = "Migrate Contentful entries, rich text and media into Strapi",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "CF2STRAPI_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "CF2STRAPI_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the mapped migration steps against both APIs.
    Migrate(MigrateArgs),
    /// Convert a rich-text document JSON file to Markdown on stdout.
    Render(RenderArgs),
}

#[derive(Args, Debug)]
struct MigrateArgs {
    /// JSON file listing the steps (content type → collection, field rules).
    #[arg(short, long, env = "CF2STRAPI_MAPPING")]
    mapping: PathBuf,

    /// Run only the step for this source content type.
    #[arg(long)]
    only: Option<String>,

    #[arg(long, env = "CONTENTFUL_SPACE_ID")]
    space_id: String,

    #[arg(long, env = "CONTENTFUL_ACCESS_TOKEN", hide_env_values = true)]
    access_token: String,

    #[arg(long, env = "CONTENTFUL_ENVIRONMENT", default_value = "master")]
    environment: String,

    /// Request a single locale from the source.
    #[arg(long, env = "CONTENTFUL_LOCALE")]
    locale: Option<String>,

    #[arg(long, env = "STRAPI_URL")]
    strapi_url: String,

    #[arg(long, env = "STRAPI_API_TOKEN", hide_env_values = true)]
    strapi_token: String,

    /// Upload attempts per asset, including the first.
    #[arg(long, env = "CF2STRAPI_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Wall-clock budget for the whole run, in seconds.
    #[arg(long, env = "CF2STRAPI_RUN_BUDGET", default_value_t = 240)]
    run_budget: u64,

    /// Source entries per page (1–1000).
    #[arg(long, env = "CF2STRAPI_PAGE_SIZE", default_value_t = 100)]
    page_size: usize,

    /// Asset download timeout in seconds.
    #[arg(long, env = "CF2STRAPI_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// Timeout for source fetches and record writes in seconds.
    #[arg(long, env = "CF2STRAPI_API_TIMEOUT", default_value_t = 30)]
    api_timeout: u64,

    /// Print run statistics as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "CF2STRAPI_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Document JSON file, or an entry JSON when `--field` is given.
    input: PathBuf,

    /// Take the document from this field of an entry's `fields`.
    #[arg(long)]
    field: Option<String>,

    /// List omitted content on stderr.
    #[arg(long)]
    diagnostics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; verbose mode always wins.
    let show_progress = match &cli.command {
        Command::Migrate(args) => !cli.quiet && !args.no_progress && !args.json,
        Command::Render(_) => false,
    };
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

    match cli.command {
        Command::Migrate(ref args) => run_migrate(args, cli.quiet, show_progress).await,
        Command::Render(ref args) => run_render(args),
    }
}

async fn run_migrate(args: &MigrateArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let mapping = MappingFile::load(&args.mapping).context("Failed to load mapping")?;
    let steps = mapping.select(args.only.as_deref());
    if steps.is_empty() {
        anyhow::bail!(
            "No step in {} matches '{}'",
            args.mapping.display(),
            args.only.as_deref().unwrap_or_default()
        );
    }

    let cli_progress = show_progress.then(CliProgressCallback::new);
    let progress_cb: Option<ProgressCallback> = cli_progress
        .clone()
        .map(|cb| cb as Arc<dyn MigrationProgressCallback>);
    let config = build_config(args, progress_cb)?;

    let mut source_config = ContentfulConfig::new(&args.space_id, &args.access_token);
    source_config.environment = args.environment.clone();
    source_config.locale = args.locale.clone();
    let source = ContentfulClient::new(source_config, config.api_timeout_secs)
        .context("Invalid Contentful settings")?;

    let strapi = Arc::new(
        StrapiClient::new(
            StrapiConfig::new(&args.strapi_url, &args.strapi_token),
            config.api_timeout_secs,
        )
        .context("Invalid Strapi settings")?,
    );
    let fetcher = Arc::new(
        HttpFetcher::new(config.download_timeout_secs).context("Failed to build HTTP client")?,
    );

    let migrator = Migrator::new(config, fetcher, strapi.clone(), strapi);
    let outcome = migrator.run(&source, &steps).await;
    if let Some(cb) = &cli_progress {
        cb.finish();
    }
    let stats = outcome.context("Migration failed")?;

    if args.json {
        let json = serde_json::to_string_pretty(&stats).context("Failed to serialise stats")?;
        println!("{json}");
    } else if !quiet {
        eprintln!(
            "{}  {} created  {} skipped  {} failed  {}ms",
            if stats.failed() == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            bold(&stats.created().to_string()),
            stats.skipped(),
            if stats.failed() == 0 {
                stats.failed().to_string()
            } else {
                red(&stats.failed().to_string())
            },
            stats.total_duration_ms,
        );
        if stats.uploads_failed() > 0 {
            eprintln!(
                "   {} media upload(s) failed; affected fields were left empty",
                yellow(&stats.uploads_failed().to_string())
            );
        }
    }

    Ok(())
}

/// Map CLI args to `MigrationConfig`.
fn build_config(args: &MigrateArgs, progress: Option<ProgressCallback>) -> Result<MigrationConfig> {
    let mut builder = MigrationConfig::builder()
        .max_attempts(args.max_attempts)
        .run_budget_secs(args.run_budget)
        .page_size(args.page_size)
        .download_timeout_secs(args.download_timeout)
        .api_timeout_secs(args.api_timeout);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn run_render(args: &RenderArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let value: Value = serde_json::from_str(&text).context("Input is not valid JSON")?;

    let document = match &args.field {
        Some(field) => value
            .pointer(&format!("/fields/{field}"))
            .or_else(|| value.get(field))
            .cloned()
            .with_context(|| format!("Field '{field}' not found"))?,
        None => value,
    };
    let node: Node =
        serde_json::from_value(document).context("Input is not a rich-text document")?;

    let conversion = convert_with_diagnostics(&node, &ResolvedMedia::new());

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(conversion.markdown.as_bytes())
        .context("Failed to write to stdout")?;
    if !conversion.markdown.ends_with('\n') {
        handle.write_all(b"\n").ok();
    }

    if args.diagnostics {
        for d in &conversion.diagnostics {
            eprintln!("{} {}", yellow("⚠"), d);
        }
    }
    Ok(())
}
