//! Paged, rate-limited retrieval with retries
//!
//! [`PageFetcher::pages`] walks a listing page by page until the server returns
//! an empty page or stops advertising a `next` link. Every page request goes
//! through the shared rate limiter and the retry policy.

use std::collections::HashSet;

use async_stream::try_stream;
use futures::{Stream, TryStreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::api::client::ApiClient;
use crate::api::error::FetchError;
use crate::api::schema::{Page, ProgramHandle};
use crate::config::Config;
use crate::error::Result;
use crate::ratelimit::RateLimiter;
use crate::retry::RetryPolicy;

/// Path of the program listing, relative to the API root
pub const PROGRAMS_PATH: &str = "hackers/programs";

/// Path of a program's structured scope listing
pub fn structured_scopes_path(handle: &str) -> String {
    format!("{}/{}/structured_scopes", PROGRAMS_PATH, handle)
}

/// Programs returned by a listing
#[derive(Debug, Clone, Default)]
pub struct ProgramListing {
    /// Unique programs in listing order
    pub programs: Vec<ProgramHandle>,

    /// Records dropped because they failed validation
    pub malformed: usize,

    /// Records dropped because their id was already listed
    pub duplicates: usize,

    /// Why the listing stopped early, when a page could not be fetched
    pub incomplete: Option<String>,
}

impl ProgramListing {
    pub fn is_complete(&self) -> bool {
        self.incomplete.is_none()
    }
}

/// Fetches listings page by page
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: ApiClient,
    limiter: RateLimiter,
    policy: RetryPolicy,
    page_size: u32,
    cancel: CancellationToken,
}

impl PageFetcher {
    pub fn new(client: ApiClient, limiter: RateLimiter, policy: RetryPolicy, page_size: u32) -> Self {
        Self {
            client,
            limiter,
            policy,
            page_size,
            cancel: CancellationToken::new(),
        }
    }

    /// Build a client, limiter and retry policy from the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            ApiClient::new(config)?,
            RateLimiter::new(&config.rate_limit),
            RetryPolicy::new(config.retry.clone()),
            config.page_size,
        ))
    }

    /// Abort waits for permits and backoff sleeps once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fetch a single page, retrying transient failures
    pub async fn fetch_page(&self, path: &str, number: u32) -> std::result::Result<Page, FetchError> {
        self.policy
            .execute(&self.limiter, &self.cancel, || {
                self.client.get_page(path, number, self.page_size)
            })
            .await
    }

    /// Lazily stream the records of a listing, one page per item.
    ///
    /// Starting at `first_page` lets a caller resume a listing after a failure.
    /// The stream ends after the first error.
    pub fn pages<'a>(
        &'a self,
        path: &'a str,
        first_page: u32,
    ) -> impl Stream<Item = std::result::Result<Vec<Value>, FetchError>> + 'a {
        try_stream! {
            let mut number = first_page.max(1);
            loop {
                let page = self.fetch_page(path, number).await?;
                let has_next = page.has_next();
                let records = page.into_records();

                if records.is_empty() {
                    debug!("{} page {} is empty", path, number);
                    break;
                }

                debug!("{} page {}: {} records", path, number, records.len());
                yield records;

                if !has_next {
                    break;
                }
                number += 1;
            }
        }
    }

    /// Collect every record of a listing
    pub async fn collect_records(&self, path: &str) -> std::result::Result<Vec<Value>, FetchError> {
        let pages: Vec<Vec<Value>> = self.pages(path, 1).try_collect().await?;
        Ok(pages.into_iter().flatten().collect())
    }

    /// List every program, dropping malformed and repeated records.
    ///
    /// A page that still fails after retries ends the listing early with the
    /// programs gathered so far, marked incomplete. Authentication failures
    /// and cancellation are returned as errors.
    #[instrument(skip(self))]
    pub async fn list_programs(&self) -> std::result::Result<ProgramListing, FetchError> {
        let mut listing = ProgramListing::default();
        let mut seen = HashSet::new();

        let pages = self.pages(PROGRAMS_PATH, 1);
        futures::pin_mut!(pages);

        loop {
            let records = match pages.try_next().await {
                Ok(Some(records)) => records,
                Ok(None) => break,
                Err(e) if e.is_fatal() || matches!(e, FetchError::Cancelled) => return Err(e),
                Err(e) => {
                    warn!(
                        "Program listing stopped after {} programs: {}",
                        listing.programs.len(),
                        e
                    );
                    listing.incomplete = Some(e.to_string());
                    break;
                }
            };

            for record in &records {
                match ProgramHandle::try_from(record) {
                    Ok(program) if seen.insert(program.id.clone()) => listing.programs.push(program),
                    Ok(program) => {
                        debug!("Program {} listed twice", program.id);
                        listing.duplicates += 1;
                    }
                    Err(e) => {
                        warn!("Dropping program record: {}", e);
                        listing.malformed += 1;
                    }
                }
            }
            info!("Listed {} programs so far", listing.programs.len());
        }

        Ok(listing)
    }

    /// Raw structured scope records of one program
    #[instrument(skip(self))]
    pub async fn structured_scopes(&self, handle: &str) -> std::result::Result<Vec<Value>, FetchError> {
        self.collect_records(&structured_scopes_path(handle)).await
    }
}
