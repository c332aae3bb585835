//! # bountyscope - Bug Bounty Scope Harvester
//!
//! This crate collects the in-scope domains of every bug bounty program visible
//! to an account on the HackerOne platform and sorts them into three lists:
//! standard domains, simple wildcards and wildcard TLDs.
//!
//! ## Features
//!
//! - Paginated, rate-limited API access with retries and `Retry-After` support
//! - Persistent scope cache in LibSQL with a configurable TTL
//! - Bounded pool of concurrent workers with run-wide cancellation
//! - Deterministic domain classification
//! - Async API with Tokio
//!
//! ## Example
//!
//! ```rust,no_run
//! use bountyscope::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::builder()
//!         .credentials("hacker", "api-token")
//!         .max_workers(10)
//!         .cache_expiry_days(30)
//!         .build()?;
//!
//!     let summary = bountyscope::pipeline::run(config).await?;
//!     println!(
//!         "{} standard, {} simple wildcards, {} wildcard TLDs",
//!         summary.standard, summary.simple_wildcard, summary.wildcard_tld
//!     );
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cache;
pub mod classify;
pub mod config;
mod error;
pub mod pipeline;
pub mod ratelimit;
pub mod retry;
pub mod scope;

pub use classify::{Category, classify};
pub use config::Config;
pub use error::{Error, Result};
pub use pipeline::{RunSummary, run};

/// Re-export of types module for public use
pub mod prelude {
    pub use crate::classify::{Category, classify};
    pub use crate::config::Config;
    pub use crate::error::Error;
    pub use crate::error::Result;
    pub use crate::pipeline::{Pipeline, RunSummary};
}
