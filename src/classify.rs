//! # Domain Classification
//!
//! Maps a normalized scope identifier to exactly one [`Category`].
//!
//! The boundary between a simple wildcard and a wildcard TLD is a policy
//! decision, fixed here:
//!
//! - no `*` anywhere: [`Category::Standard`]
//! - `*.` followed by a remainder that contains no `*`: [`Category::SimpleWildcard`]
//! - anything else: [`Category::WildcardTld`]
//!
//! So `*.*.example.com`, `sub.*.example.com`, `*.example.*`, `*example.com`
//! and a lone `*` all land in [`Category::WildcardTld`]. A remainder without a
//! dot such as `*.com` is still a simple wildcard; the extractor drops
//! dot-less identifiers before they get here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The three output categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// A plain host name, e.g. `api.example.com`
    Standard,

    /// A single leading wildcard label, e.g. `*.example.com`
    SimpleWildcard,

    /// A wildcard anywhere else, e.g. `*.example.*` or `sub.*.example.com`
    WildcardTld,
}

impl Category {
    /// All categories in output order
    pub const ALL: [Category; 3] = [
        Category::Standard,
        Category::SimpleWildcard,
        Category::WildcardTld,
    ];

    /// Stable name used in logs and the `classify` subcommand
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Standard => "standard",
            Category::SimpleWildcard => "simple_wildcard",
            Category::WildcardTld => "wildcard_tld",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an identifier. Total and deterministic.
pub fn classify(identifier: &str) -> Category {
    if !identifier.contains('*') {
        return Category::Standard;
    }

    match identifier.strip_prefix("*.") {
        Some(rest) if !rest.is_empty() && !rest.contains('*') => Category::SimpleWildcard,
        _ => Category::WildcardTld,
    }
}
