//! Client for the bug bounty platform's REST API
//!
//! - `client`: one authenticated request per call, outcome classified
//! - `fetcher`: pagination on top of the client, behind the rate limiter and
//!   the retry policy
//! - `schema`: validated records parsed from the JSON:API responses

mod client;
pub mod error;
mod fetcher;
pub mod schema;

pub use client::{ApiClient, classify_status, parse_retry_after};
pub use error::FetchError;
pub use fetcher::{PROGRAMS_PATH, PageFetcher, ProgramListing, structured_scopes_path};
pub use schema::{AssetType, MalformedRecord, Page, ProgramHandle, ScopeAsset};
