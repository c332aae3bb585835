//! # Run Configuration
//!
//! A single immutable [`Config`] value is built once at startup and handed to
//! every component. Nothing in the crate reads ambient global state.
//!
//! ## Key Components
//!
//! - `Config`: credentials, pagination, worker count, cache and output settings
//! - `RateLimitConfig`: global request ceiling per window
//! - `RetryConfig`: retry budgets and backoff bounds
//! - `ConfigBuilder`: builder with validation

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default platform API root
pub const DEFAULT_API_BASE_URL: &str = "https://api.hackerone.com/v1/";

/// Largest page size the platform accepts
pub const MAX_PAGE_SIZE: u32 = 100;

/// Global request budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum number of requests in any `window`
    pub max_requests: u32,

    /// Length of the sliding window
    pub window: Duration,

    /// Token bucket burst used to smooth requests. `None` disables smoothing
    /// and leaves only the hard window ceiling.
    pub burst: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 600,
            window: Duration::from_secs(60),
            burst: Some(10),
        }
    }
}

/// Retry budgets and backoff bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries allowed for transient failures (network errors, 5xx)
    pub max_retries: u32,

    /// Retries allowed for 429 responses, counted separately
    pub max_rate_limit_retries: u32,

    /// First transient backoff delay, doubled on every further attempt
    pub base_delay: Duration,

    /// Upper bound for any computed backoff delay
    pub max_delay: Duration,

    /// Wait used after a 429 without a usable Retry-After header
    pub default_retry_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_rate_limit_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            default_retry_after: Duration::from_secs(10),
        }
    }
}

/// File names of the three category outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFiles {
    pub standard: String,
    pub simple_wildcard: String,
    pub wildcard_tld: String,
}

impl Default for OutputFiles {
    fn default() -> Self {
        Self {
            standard: "hackerone_standard_domains.txt".to_string(),
            simple_wildcard: "hackerone_simple_wildcards.txt".to_string(),
            wildcard_tld: "hackerone_wildcard_tlds.txt".to_string(),
        }
    }
}

/// Configuration for a run
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the REST API, with a trailing slash
    pub api_base_url: String,

    /// API username
    pub username: String,

    /// API token
    pub api_token: String,

    /// Timeout for a single HTTP request
    pub request_timeout: Duration,

    /// Records requested per page
    pub page_size: u32,

    /// Number of concurrent workers
    pub max_workers: usize,

    /// Location of the cache database
    pub cache_path: PathBuf,

    /// Age after which cache entries are stale
    pub cache_ttl: Duration,

    /// Reuse a fresh cached program listing instead of listing again
    pub reuse_program_list: bool,

    /// Global request budget
    pub rate_limit: RateLimitConfig,

    /// Retry behavior
    pub retry: RetryConfig,

    /// Directory the category files are written to
    pub output_dir: PathBuf,

    /// Category file names
    pub output_files: OutputFiles,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            username: String::new(),
            api_token: String::new(),
            request_timeout: Duration::from_secs(15),
            page_size: MAX_PAGE_SIZE,
            max_workers: 10,
            cache_path: PathBuf::from(".bountyscope/cache.db"),
            cache_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            reuse_program_list: false,
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            output_dir: PathBuf::from("."),
            output_files: OutputFiles::default(),
            user_agent: format!("bountyscope/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Config {
    /// Create a new builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Cache TTL in whole seconds
    pub fn cache_ttl_seconds(&self) -> i64 {
        i64::try_from(self.cache_ttl.as_secs()).unwrap_or(i64::MAX)
    }

    fn validate(&self) -> Result<()> {
        if self.username.is_empty() || self.api_token.is_empty() {
            return Err(Error::Config("username and API token are required".to_string()));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::Config(format!(
                "page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.max_workers == 0 {
            return Err(Error::Config("at least one worker is required".to_string()));
        }
        if self.rate_limit.max_requests == 0 || self.rate_limit.window.is_zero() {
            return Err(Error::Config(
                "rate limit needs a positive request count and window".to_string(),
            ));
        }
        if self.rate_limit.burst == Some(0) {
            return Err(Error::Config("rate limit burst must be positive".to_string()));
        }
        url::Url::parse(&self.api_base_url)
            .map_err(|e| Error::Config(format!("invalid API base URL: {}", e)))?;
        Ok(())
    }
}

/// Builder for Config
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the API root. A trailing slash is added when missing.
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        let mut url = url.into();
        if !url.ends_with('/') {
            url.push('/');
        }
        self.config.api_base_url = url;
        self
    }

    /// Set the credential pair
    pub fn credentials(mut self, username: impl Into<String>, api_token: impl Into<String>) -> Self {
        self.config.username = username.into();
        self.config.api_token = api_token.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.config.page_size = page_size;
        self
    }

    pub fn max_workers(mut self, max_workers: usize) -> Self {
        self.config.max_workers = max_workers;
        self
    }

    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cache_path = path.into();
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    /// Set the cache TTL in days
    pub fn cache_expiry_days(self, days: u64) -> Self {
        self.cache_ttl(Duration::from_secs(days.saturating_mul(24 * 60 * 60)))
    }

    pub fn reuse_program_list(mut self, reuse: bool) -> Self {
        self.config.reuse_program_list = reuse;
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn output_files(mut self, files: OutputFiles) -> Self {
        self.config.output_files = files;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_platform_limits() {
        let config = Config::default();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.cache_ttl_seconds(), 30 * 24 * 60 * 60);
        assert_eq!(config.rate_limit.max_requests, 600);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_builder_requires_credentials() {
        let result = Config::builder().build();
        assert!(matches!(result, Err(Error::Config(_))));

        let config = Config::builder().credentials("user", "token").build().unwrap();
        assert_eq!(config.username, "user");
    }

    #[test]
    fn test_builder_rejects_bad_values() {
        let base = || Config::builder().credentials("user", "token");

        assert!(base().page_size(0).build().is_err());
        assert!(base().page_size(101).build().is_err());
        assert!(base().max_workers(0).build().is_err());
        assert!(base().api_base_url("not a url").build().is_err());
        assert!(
            base()
                .rate_limit(RateLimitConfig {
                    burst: Some(0),
                    ..RateLimitConfig::default()
                })
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let config = Config::builder()
            .credentials("user", "token")
            .api_base_url("http://127.0.0.1:1234/v1")
            .build()
            .unwrap();
        assert_eq!(config.api_base_url, "http://127.0.0.1:1234/v1/");
    }

    #[test]
    fn test_cache_expiry_days() {
        let config = Config::builder()
            .credentials("user", "token")
            .cache_expiry_days(2)
            .build()
            .unwrap();
        assert_eq!(config.cache_ttl, Duration::from_secs(2 * 86_400));
    }
}
