//! # Run Pipeline
//!
//! One run lists every program, hands them to the [`WorkerPool`], and writes
//! the three category files once all workers are done.
//!
//! A fatal authentication failure anywhere aborts the run before any file is
//! written. Any other per-program failure only removes that program from the
//! results and is reported in the [`RunSummary`].

pub mod aggregate;
pub mod pool;

pub use aggregate::{Aggregator, ClassifiedDomainSet, OutputPaths, write_outputs};
pub use pool::{PoolReport, Progress, SkippedProgram, WorkerPool};

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::api::{PageFetcher, ProgramHandle};
use crate::cache::{CacheStore, PROGRAM_LIST_KEY};
use crate::classify::Category;
use crate::config::Config;
use crate::error::{Error, Result};

/// What a completed run did
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Programs in the listing
    pub programs: usize,

    /// Programs whose scope made it into the results
    pub processed: usize,
    pub from_cache: usize,
    pub fetched: usize,
    pub skipped: Vec<SkippedProgram>,

    /// Set when the listing stopped early; only the programs listed before
    /// the failing page were processed
    pub listing_error: Option<String>,

    /// Unique identifiers per category
    pub standard: usize,
    pub simple_wildcard: usize,
    pub wildcard_tld: usize,

    pub elapsed: Duration,
    pub outputs: OutputPaths,
}

impl RunSummary {
    pub fn count(&self, category: Category) -> usize {
        match category {
            Category::Standard => self.standard,
            Category::SimpleWildcard => self.simple_wildcard,
            Category::WildcardTld => self.wildcard_tld,
        }
    }
}

/// A configured run
#[derive(Debug)]
pub struct Pipeline {
    config: Arc<Config>,
    fetcher: PageFetcher,
    cache: CacheStore,
    progress: Option<mpsc::UnboundedSender<Progress>>,
}

impl Pipeline {
    /// Build the fetcher and open the cache.
    ///
    /// A cache that cannot be opened is replaced by an in-memory one, so the
    /// run still completes, just without reuse across runs.
    pub async fn new(config: Config) -> Result<Self> {
        let fetcher = PageFetcher::from_config(&config)?;
        let cache = match CacheStore::open(&config.cache_path, config.cache_ttl).await {
            Ok(cache) => cache,
            Err(e) => {
                warn!(
                    "Cache at {} unavailable, continuing without persistence: {}",
                    config.cache_path.display(),
                    e
                );
                CacheStore::in_memory(config.cache_ttl).await?
            }
        };

        Ok(Self {
            config: Arc::new(config),
            fetcher,
            cache,
            progress: None,
        })
    }

    /// Stop the run when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.fetcher = self.fetcher.with_cancellation(cancel);
        self
    }

    /// Receive one [`Progress`] per finished program
    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Run to completion
    #[instrument(skip(self))]
    pub async fn run(self) -> Result<RunSummary> {
        let start = Instant::now();
        let (programs, listing_error) = self.programs().await?;
        let total = programs.len();
        info!("Total programs: {}", total);

        let aggregator = Arc::new(Aggregator::new());
        let mut pool = WorkerPool::new(
            self.fetcher.clone(),
            self.cache.clone(),
            aggregator.clone(),
            self.config.max_workers,
        );
        if let Some(progress) = self.progress.clone() {
            pool = pool.with_progress(progress);
        }

        let report = pool.run(programs).await;
        drop(pool);

        if let Some(fatal) = report.fatal {
            return Err(fatal.into());
        }
        if report.cancelled {
            return Err(Error::Cancelled);
        }

        let domains = Arc::try_unwrap(aggregator)
            .map_err(|_| Error::Other("aggregator still shared after the pool finished".to_string()))?
            .finalize();
        let outputs = write_outputs(&domains, &self.config.output_dir, &self.config.output_files).await?;

        let summary = RunSummary {
            programs: total,
            processed: report.from_cache + report.fetched,
            from_cache: report.from_cache,
            fetched: report.fetched,
            skipped: report.skipped,
            listing_error,
            standard: domains.len(Category::Standard),
            simple_wildcard: domains.len(Category::SimpleWildcard),
            wildcard_tld: domains.len(Category::WildcardTld),
            elapsed: start.elapsed(),
            outputs,
        };

        info!(
            "Scan completed in {:.1}s: {} processed, {} skipped",
            summary.elapsed.as_secs_f64(),
            summary.processed,
            summary.skipped.len()
        );
        Ok(summary)
    }

    /// The program listing, from the cache when allowed and fresh, plus the
    /// reason it is incomplete if a page failed
    async fn programs(&self) -> Result<(Vec<ProgramHandle>, Option<String>)> {
        if self.config.reuse_program_list {
            if let Some(entry) = self.cache.get::<Vec<ProgramHandle>>(PROGRAM_LIST_KEY).await {
                info!("Using cached program list from {}", entry.fetched_at);
                return Ok((entry.payload, None));
            }
        }

        let listing = self.fetcher.list_programs().await?;
        if listing.malformed > 0 || listing.duplicates > 0 {
            warn!(
                "Dropped {} malformed and {} duplicate program records",
                listing.malformed, listing.duplicates
            );
        }

        if !listing.is_complete() {
            warn!(
                "Continuing with a partial program list of {} programs",
                listing.programs.len()
            );
        } else if self.config.reuse_program_list {
            if let Err(e) = self.cache.put(PROGRAM_LIST_KEY, &listing.programs).await {
                warn!("Failed to cache program list: {}", e);
            } else {
                debug!("Cached program list");
            }
        }

        Ok((listing.programs, listing.incomplete))
    }
}

/// Run the whole pipeline with `config`
pub async fn run(config: Config) -> Result<RunSummary> {
    Pipeline::new(config).await?.run().await
}
