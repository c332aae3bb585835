//! Bounded pool of program workers

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::api::{FetchError, PageFetcher, ProgramHandle, ScopeAsset};
use crate::cache::{CacheEntry, CacheStore, scope_key};
use crate::classify::{Category, classify};
use crate::pipeline::aggregate::Aggregator;
use crate::scope::{extract_identifiers, parse_records};

/// Programs between progress log lines
const PROGRESS_LOG_INTERVAL: usize = 50;

/// A program left out of the results
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedProgram {
    pub id: String,
    pub handle: String,
    pub reason: String,
}

/// Progress notification, sent once per finished program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

/// Where a program's scope came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Cache,
    Network,
}

/// Outcome of a pool run
#[derive(Debug, Default)]
pub struct PoolReport {
    pub from_cache: usize,
    pub fetched: usize,
    pub skipped: Vec<SkippedProgram>,

    /// Fatal error that stopped the pool, if any
    pub fatal: Option<FetchError>,

    /// Whether the pool stopped because its token was cancelled
    pub cancelled: bool,
}

impl PoolReport {
    pub fn processed(&self) -> usize {
        self.from_cache + self.fetched
    }

    fn absorb(&mut self, other: PoolReport) {
        self.from_cache += other.from_cache;
        self.fetched += other.fetched;
        self.skipped.extend(other.skipped);
        self.cancelled |= other.cancelled;
        if self.fatal.is_none() {
            self.fatal = other.fatal;
        }
    }
}

/// Processes each program exactly once across a fixed number of workers.
///
/// Workers pull from one shared FIFO queue. A program is popped by exactly one
/// worker, so no program is fetched twice within a run.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    fetcher: PageFetcher,
    cache: CacheStore,
    aggregator: Arc<Aggregator>,
    workers: usize,
    progress: Option<mpsc::UnboundedSender<Progress>>,
}

impl WorkerPool {
    /// The fetcher's cancellation token doubles as the pool's
    pub fn new(
        fetcher: PageFetcher,
        cache: CacheStore,
        aggregator: Arc<Aggregator>,
        workers: usize,
    ) -> Self {
        Self {
            fetcher,
            cache,
            aggregator,
            workers: workers.max(1),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: mpsc::UnboundedSender<Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    fn cancellation(&self) -> &CancellationToken {
        self.fetcher.cancellation()
    }

    /// Process every program.
    ///
    /// Per-program failures are recorded in the report. A fatal failure
    /// cancels the remaining work and is returned in [`PoolReport::fatal`].
    pub async fn run(&self, programs: Vec<ProgramHandle>) -> PoolReport {
        let total = programs.len();
        let queue = Arc::new(Mutex::new(VecDeque::from(programs)));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        info!("Processing {} programs with {} workers", total, self.workers);

        for worker_id in 0..self.workers.min(total.max(1)) {
            let pool = self.clone();
            let queue = queue.clone();
            let completed = completed.clone();
            tasks.spawn(
                async move { pool.work(queue, completed, total).await }
                    .instrument(info_span!("worker", id = worker_id)),
            );
        }

        let mut report = PoolReport::default();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(worker_report) => report.absorb(worker_report),
                Err(e) => {
                    error!("Worker task failed: {}", e);
                    self.cancellation().cancel();
                    report.cancelled = true;
                }
            }
        }

        if self.cancellation().is_cancelled() && report.fatal.is_none() {
            report.cancelled = true;
        }

        report
    }

    async fn work(
        &self,
        queue: Arc<Mutex<VecDeque<ProgramHandle>>>,
        completed: Arc<AtomicUsize>,
        total: usize,
    ) -> PoolReport {
        let mut report = PoolReport::default();

        loop {
            if self.cancellation().is_cancelled() {
                break;
            }
            let Some(program) = queue.lock().await.pop_front() else {
                break;
            };

            match self.process(&program).await {
                Ok(Source::Cache) => report.from_cache += 1,
                Ok(Source::Network) => report.fetched += 1,
                Err(FetchError::Cancelled) => {
                    debug!("Program {} abandoned after cancellation", program.handle);
                    break;
                }
                Err(e) if e.is_fatal() => {
                    error!("Fatal error on program {}: {}", program.handle, e);
                    self.cancellation().cancel();
                    report.fatal = Some(e);
                    break;
                }
                Err(e) => {
                    warn!("Skipping program {}: {}", program.handle, e);
                    report.skipped.push(SkippedProgram {
                        id: program.id.clone(),
                        handle: program.handle.clone(),
                        reason: e.to_string(),
                    });
                }
            }

            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            self.report_progress(done, total);
        }

        report
    }

    fn report_progress(&self, completed: usize, total: usize) {
        if completed % PROGRESS_LOG_INTERVAL == 0 || completed == total {
            info!(
                "Processed {}/{} | Standard: {} | Simple wildcards: {} | Wildcard TLDs: {}",
                completed,
                total,
                self.aggregator.len(Category::Standard),
                self.aggregator.len(Category::SimpleWildcard),
                self.aggregator.len(Category::WildcardTld),
            );
        }
        if let Some(progress) = &self.progress {
            // Receiver may be gone, progress is best effort
            let _ = progress.send(Progress { completed, total });
        }
    }

    /// Cache check, fetch on miss, extract, classify, merge
    async fn process(&self, program: &ProgramHandle) -> Result<Source, FetchError> {
        let key = scope_key(&program.id);

        let cached = self
            .cache
            .get::<Vec<ScopeAsset>>(&key)
            .await
            .filter(|entry| !changed_since(program, entry));

        let (assets, source) = match cached {
            Some(entry) => {
                debug!("Scope of {} served from cache", program.handle);
                (entry.payload, Source::Cache)
            }
            None => {
                let records = self.fetcher.structured_scopes(&program.handle).await?;
                let (assets, malformed) = parse_records(&records);
                if malformed > 0 {
                    warn!("Dropped {} malformed scope records of {}", malformed, program.handle);
                }
                if let Err(e) = self.cache.put(&key, &assets).await {
                    warn!("Failed to cache scope of {}: {}", program.handle, e);
                }
                (assets, Source::Network)
            }
        };

        let (identifiers, report) = extract_identifiers(&assets);
        debug!(
            "{}: {} identifiers ({} ineligible, {} non-domain, {} malformed)",
            program.handle,
            identifiers.len(),
            report.ineligible,
            report.non_domain,
            report.malformed
        );

        for identifier in identifiers {
            self.aggregator.merge(classify(&identifier), identifier);
        }

        Ok(source)
    }
}

/// A program updated after its scope was cached needs a refetch
fn changed_since<T>(program: &ProgramHandle, entry: &CacheEntry<T>) -> bool {
    program
        .updated_at
        .is_some_and(|updated_at| updated_at > entry.fetched_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RateLimitConfig, RetryConfig};
    use chrono::{TimeDelta, Utc};
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::time::Duration;

    fn test_config(server: &Server, workers: usize) -> Config {
        Config::builder()
            .credentials("hacker", "secret")
            .api_base_url(server.url())
            .max_workers(workers)
            .rate_limit(RateLimitConfig {
                max_requests: 1000,
                window: Duration::from_secs(60),
                burst: None,
            })
            .retry(RetryConfig {
                max_retries: 1,
                max_rate_limit_retries: 1,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(10),
                default_retry_after: Duration::from_millis(10),
            })
            .build()
            .unwrap()
    }

    async fn pool_for(server: &Server, workers: usize) -> (WorkerPool, CacheStore, Arc<Aggregator>) {
        let config = test_config(server, workers);
        let fetcher = PageFetcher::from_config(&config).unwrap();
        let cache = CacheStore::in_memory(config.cache_ttl).await.unwrap();
        let aggregator = Arc::new(Aggregator::new());
        let pool = WorkerPool::new(fetcher, cache.clone(), aggregator.clone(), workers);
        (pool, cache, aggregator)
    }

    fn program(id: &str) -> ProgramHandle {
        ProgramHandle {
            id: id.to_string(),
            handle: format!("program-{}", id),
            updated_at: None,
        }
    }

    fn scope_body(identifiers: &[&str]) -> String {
        let data: Vec<_> = identifiers
            .iter()
            .enumerate()
            .map(|(n, identifier)| {
                json!({
                    "id": n.to_string(),
                    "type": "structured-scope",
                    "attributes": {
                        "asset_identifier": identifier,
                        "asset_type": if identifier.contains('*') { "WILDCARD" } else { "URL" },
                        "eligible_for_bounty": true
                    }
                })
            })
            .collect();
        json!({"data": data, "links": {}}).to_string()
    }

    async fn mock_scope(
        server: &mut Server,
        id: &str,
        status: usize,
        body: String,
        hits: usize,
    ) -> mockito::Mock {
        server
            .mock("GET", format!("/hackers/programs/program-{}/structured_scopes", id).as_str())
            .match_query(Matcher::Any)
            .with_status(status)
            .with_body(body)
            .expect(hits)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_shared_identifiers_are_merged_once() {
        let mut server = Server::new_async().await;
        let first = mock_scope(&mut server, "1", 200, scope_body(&["api.example.com", "*.example.com"]), 1).await;
        let second = mock_scope(&mut server, "2", 200, scope_body(&["api.example.com", "*.example.*"]), 1).await;

        let (pool, _cache, aggregator) = pool_for(&server, 2).await;
        let report = pool.run(vec![program("1"), program("2")]).await;

        assert_eq!(report.fetched, 2);
        assert!(report.fatal.is_none());
        assert_eq!(aggregator.len(Category::Standard), 1);
        assert_eq!(aggregator.len(Category::SimpleWildcard), 1);
        assert_eq!(aggregator.len(Category::WildcardTld), 1);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_fresh_cache_entry_skips_fetch() {
        let mut server = Server::new_async().await;
        let never = mock_scope(&mut server, "1", 200, scope_body(&["other.example.com"]), 0).await;

        let (pool, cache, aggregator) = pool_for(&server, 1).await;
        let cached = vec![ScopeAsset {
            identifier: "cached.example.com".to_string(),
            asset_type: crate::api::AssetType::Url,
            eligible_for_bounty: true,
        }];
        cache.put(&scope_key("1"), &cached).await.unwrap();

        let report = pool.run(vec![program("1")]).await;

        assert_eq!(report.from_cache, 1);
        assert_eq!(report.fetched, 0);
        assert_eq!(aggregator.len(Category::Standard), 1);
        never.assert_async().await;
    }

    #[tokio::test]
    async fn test_program_updated_after_caching_is_refetched() {
        let mut server = Server::new_async().await;
        let scopes = mock_scope(&mut server, "1", 200, scope_body(&["new.example.com"]), 1).await;

        let (pool, cache, _aggregator) = pool_for(&server, 1).await;
        cache
            .put_at(&scope_key("1"), &Vec::<ScopeAsset>::new(), Utc::now() - TimeDelta::days(2))
            .await
            .unwrap();

        let mut updated = program("1");
        updated.updated_at = Some(Utc::now() - TimeDelta::days(1));
        let report = pool.run(vec![updated]).await;

        assert_eq!(report.fetched, 1);
        scopes.assert_async().await;

        let entry: CacheEntry<Vec<ScopeAsset>> = cache.get(&scope_key("1")).await.unwrap();
        assert_eq!(entry.payload[0].identifier, "new.example.com");
    }

    #[tokio::test]
    async fn test_failed_program_is_skipped() {
        let mut server = Server::new_async().await;
        let _missing = mock_scope(&mut server, "1", 404, "not found".to_string(), 1).await;
        let _ok = mock_scope(&mut server, "2", 200, scope_body(&["ok.example.com"]), 1).await;

        let (pool, _cache, aggregator) = pool_for(&server, 2).await;
        let report = pool.run(vec![program("1"), program("2")]).await;

        assert_eq!(report.fetched, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].handle, "program-1");
        assert!(report.fatal.is_none());
        assert!(!report.cancelled);
        assert_eq!(aggregator.len(Category::Standard), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_cancels_remaining_work() {
        let mut server = Server::new_async().await;
        let first = mock_scope(&mut server, "1", 200, scope_body(&["a.example.com"]), 1).await;
        let denied = mock_scope(&mut server, "2", 401, "bad credentials".to_string(), 1).await;
        let untouched = mock_scope(&mut server, "3", 200, scope_body(&["c.example.com"]), 0).await;

        let (pool, _cache, _aggregator) = pool_for(&server, 1).await;
        let report = pool.run(vec![program("1"), program("2"), program("3")]).await;

        assert!(matches!(report.fatal, Some(FetchError::Unauthorized { status: 401, .. })));
        assert_eq!(report.fetched, 1);
        assert!(pool.cancellation().is_cancelled());
        first.assert_async().await;
        denied.assert_async().await;
        untouched.assert_async().await;
    }

    #[tokio::test]
    async fn test_progress_is_reported() {
        let mut server = Server::new_async().await;
        let _scopes = server
            .mock(
                "GET",
                Matcher::Regex(r"^/hackers/programs/program-\d+/structured_scopes".to_string()),
            )
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(scope_body(&["a.example.com"]))
            .create_async()
            .await;

        let (pool, _cache, _aggregator) = pool_for(&server, 3).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pool = pool.with_progress(tx);

        let programs: Vec<_> = (1..=5).map(|id| program(&id.to_string())).collect();
        let report = pool.run(programs).await;
        drop(pool);

        let mut seen = Vec::new();
        while let Some(progress) = rx.recv().await {
            seen.push(progress.completed);
        }
        seen.sort_unstable();

        assert_eq!(report.processed(), 5);
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_empty_program_list() {
        let server = Server::new_async().await;
        let (pool, _cache, _aggregator) = pool_for(&server, 4).await;

        let report = pool.run(Vec::new()).await;

        assert_eq!(report.processed(), 0);
        assert!(!report.cancelled);
    }
}
