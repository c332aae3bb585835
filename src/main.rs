//! # bountyscope CLI
//!
//! Command-line front end for the scope harvester.
//!
//! - `fetch` (default): list programs, fetch their scopes and write the three
//!   category files
//! - `classify`: classify identifiers offline
//! - `cache-stats`: inspect the scope cache
//!
//! Settings come from flags, each of which can also be given through the
//! environment or a `.env` file.

mod telemetry;

use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use bountyscope::cache::CacheStore;
use bountyscope::config::{Config, RateLimitConfig};
use bountyscope::pipeline::{Pipeline, Progress, RunSummary};
use bountyscope::{Category, classify};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use telemetry::{OtelGuard, TelemetryOptions};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

#[derive(Parser)]
#[command(author, version, about = "Collect and classify bug bounty scope domains", long_about = None)]
struct Cli {
    /// Also write logs to a file in this directory
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Export traces and metrics over OTLP
    #[arg(long, global = true)]
    otel: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch every program's scope and write the category files
    Fetch(FetchArgs),

    /// Classify identifiers without touching the network
    Classify(ClassifyArgs),

    /// Show how many cache entries are fresh
    CacheStats(CacheArgs),
}

#[derive(Args, Debug, Clone)]
struct CacheArgs {
    /// Cache database path
    #[arg(long, env = "CACHE_PATH", default_value = ".bountyscope/cache.db")]
    cache_path: PathBuf,

    /// Days before a cached scope is refetched
    #[arg(long, env = "CACHE_EXPIRY_DAYS", default_value = "30")]
    cache_expiry_days: u64,
}

#[derive(Args, Debug, Clone)]
struct FetchArgs {
    /// Platform username
    #[arg(long, env = "H1_USERNAME", hide_env_values = true)]
    username: String,

    /// Platform API token
    #[arg(long, env = "H1_API_TOKEN", hide_env_values = true)]
    api_token: String,

    /// API root
    #[arg(long, env = "H1_API_URL", default_value = bountyscope::config::DEFAULT_API_BASE_URL)]
    api_url: String,

    /// Number of concurrent workers
    #[arg(short, long, env = "MAX_WORKERS", default_value = "10")]
    workers: usize,

    /// Records per page (1-100)
    #[arg(short, long, env = "PAGE_SIZE", default_value = "100")]
    page_size: u32,

    /// Requests allowed per rate limit window
    #[arg(long, env = "RATE_LIMIT", default_value = "600")]
    rate_limit: u32,

    /// Rate limit window in seconds
    #[arg(long, env = "RATE_WINDOW_SECS", default_value = "60")]
    rate_window: u64,

    /// Directory for the category files
    #[arg(short, long, env = "OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Reuse a fresh cached program list instead of listing again
    #[arg(long)]
    reuse_program_list: bool,

    #[command(flatten)]
    cache: CacheArgs,
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Fetch(FetchArgs::parse_env())
    }
}

impl FetchArgs {
    /// Fetch arguments taken from the environment alone
    fn parse_env() -> Self {
        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            args: FetchArgs,
        }
        Wrapper::parse_from(["bountyscope"]).args
    }

    fn to_config(&self) -> bountyscope::Result<Config> {
        let defaults = RateLimitConfig::default();
        Config::builder()
            .credentials(&self.username, &self.api_token)
            .api_base_url(&self.api_url)
            .max_workers(self.workers)
            .page_size(self.page_size)
            .rate_limit(RateLimitConfig {
                max_requests: self.rate_limit,
                window: Duration::from_secs(self.rate_window),
                burst: defaults.burst,
            })
            .cache_path(&self.cache.cache_path)
            .cache_expiry_days(self.cache.cache_expiry_days)
            .reuse_program_list(self.reuse_program_list)
            .output_dir(&self.output_dir)
            .build()
    }
}

#[derive(Args, Debug)]
struct ClassifyArgs {
    /// Identifiers to classify; read from stdin when omitted
    identifiers: Vec<String>,
}

/// Exit status when the run was aborted by a fatal error
const FATAL_EXIT_CODE: u8 = 2;

/// Exit status for a failed run: fatal errors (rejected credentials, bad
/// configuration, interruption) are told apart from other failures
fn exit_status(err: &bountyscope::Error) -> u8 {
    if err.is_fatal() { FATAL_EXIT_CODE } else { 1 }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let _otel: OtelGuard = telemetry::init_tracing_subscriber(&TelemetryOptions {
        log_dir: cli.log_file.clone(),
        otel: cli.otel,
    })?;

    match cli.command.unwrap_or_default() {
        Commands::Fetch(args) => return fetch_command(args).await,
        Commands::Classify(args) => classify_command(args)?,
        Commands::CacheStats(args) => cache_stats_command(args).await?,
    }

    Ok(ExitCode::SUCCESS)
}

#[instrument(skip(args))]
async fn fetch_command(args: FetchArgs) -> anyhow::Result<ExitCode> {
    let config = match args.to_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(ExitCode::from(exit_status(&e)));
        }
    };
    println!(
        "Starting scope harvest (cache expiry: {} days, {} workers)",
        args.cache.cache_expiry_days, config.max_workers
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping workers");
                cancel.cancel();
            }
        }
    });

    let (progress_sender, mut progress_receiver) = mpsc::unbounded_channel::<Progress>();

    let progress_bar = ProgressBar::new(0);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({eta}) {msg}")
            .context("Invalid progress template")?
            .progress_chars("##-"),
    );
    progress_bar.set_message("Processing programs...");

    let progress_handle = tokio::spawn({
        let progress_bar = progress_bar.clone();
        async move {
            while let Some(progress) = progress_receiver.recv().await {
                progress_bar.set_length(progress.total as u64);
                progress_bar.set_position(progress.completed as u64);
            }
            progress_bar.finish_and_clear();
        }
    });

    let result = Pipeline::new(config)
        .await?
        .with_cancellation(cancel)
        .with_progress(progress_sender)
        .run()
        .await;

    // Ends once the pipeline has dropped every sender
    let _ = progress_handle.await;

    match result {
        Ok(summary) => {
            print_summary(&summary);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("Scan failed: {}", e);
            eprintln!("Scan failed, no output files were written: {}", e);
            Ok(ExitCode::from(exit_status(&e)))
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("\nScan completed in {:.1} seconds", summary.elapsed.as_secs_f64());
    println!(
        "Programs: {} total, {} from cache, {} fetched, {} skipped",
        summary.programs,
        summary.from_cache,
        summary.fetched,
        summary.skipped.len()
    );

    println!("Results saved to:");
    for category in Category::ALL {
        println!(
            "  - {} ({} entries)",
            summary.outputs.get(category).display(),
            summary.count(category)
        );
    }

    if let Some(reason) = &summary.listing_error {
        println!("Program list incomplete, later pages were not processed: {}", reason);
    }

    if !summary.skipped.is_empty() {
        println!("Skipped programs:");
        for skipped in &summary.skipped {
            println!("  - {} ({}): {}", skipped.handle, skipped.id, skipped.reason);
        }
    }
}

fn classify_command(args: ClassifyArgs) -> anyhow::Result<()> {
    let identifiers = if args.identifiers.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read identifiers from stdin")?
    } else {
        args.identifiers
    };

    for identifier in identifiers.iter().map(|i| i.trim()).filter(|i| !i.is_empty()) {
        println!("{}\t{}", classify(identifier), identifier);
    }

    Ok(())
}

#[instrument]
async fn cache_stats_command(args: CacheArgs) -> anyhow::Result<()> {
    let ttl = Duration::from_secs(args.cache_expiry_days.saturating_mul(24 * 60 * 60));
    let cache = CacheStore::open(&args.cache_path, ttl)
        .await
        .with_context(|| format!("Failed to open cache at {}", args.cache_path.display()))?;

    let stats = cache.stats().await?;
    info!("Read cache statistics from {}", args.cache_path.display());

    println!("Cache: {}", args.cache_path.display());
    println!("  Entries: {}", stats.total);
    println!("  Fresh:   {}", stats.fresh);
    println!("  Stale:   {}", stats.stale);
    Ok(())
}
