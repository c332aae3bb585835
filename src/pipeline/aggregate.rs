//! Cross-worker accumulation of classified identifiers and the final write-out

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, instrument};

use crate::classify::Category;
use crate::config::OutputFiles;
use crate::error::Result;

/// Deduplicated identifiers, one set per category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedDomainSet {
    pub standard: BTreeSet<String>,
    pub simple_wildcard: BTreeSet<String>,
    pub wildcard_tld: BTreeSet<String>,
}

impl ClassifiedDomainSet {
    pub fn get(&self, category: Category) -> &BTreeSet<String> {
        match category {
            Category::Standard => &self.standard,
            Category::SimpleWildcard => &self.simple_wildcard,
            Category::WildcardTld => &self.wildcard_tld,
        }
    }

    pub fn len(&self, category: Category) -> usize {
        self.get(category).len()
    }

    pub fn is_empty(&self) -> bool {
        Category::ALL.iter().all(|category| self.get(*category).is_empty())
    }
}

/// Where the three category files were written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub standard: PathBuf,
    pub simple_wildcard: PathBuf,
    pub wildcard_tld: PathBuf,
}

impl OutputPaths {
    pub fn new(dir: &Path, files: &OutputFiles) -> Self {
        Self {
            standard: dir.join(&files.standard),
            simple_wildcard: dir.join(&files.simple_wildcard),
            wildcard_tld: dir.join(&files.wildcard_tld),
        }
    }

    pub fn get(&self, category: Category) -> &Path {
        match category {
            Category::Standard => &self.standard,
            Category::SimpleWildcard => &self.simple_wildcard,
            Category::WildcardTld => &self.wildcard_tld,
        }
    }
}

/// Shared sink for worker results.
///
/// Each category has its own lock, so concurrent merges into different
/// categories never wait on each other.
#[derive(Debug, Default)]
pub struct Aggregator {
    standard: Mutex<BTreeSet<String>>,
    simple_wildcard: Mutex<BTreeSet<String>>,
    wildcard_tld: Mutex<BTreeSet<String>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, category: Category) -> &Mutex<BTreeSet<String>> {
        match category {
            Category::Standard => &self.standard,
            Category::SimpleWildcard => &self.simple_wildcard,
            Category::WildcardTld => &self.wildcard_tld,
        }
    }

    /// Add `identifier` to `category`. Returns whether it was new.
    pub fn merge(&self, category: Category, identifier: impl Into<String>) -> bool {
        self.set(category)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier.into())
    }

    pub fn len(&self, category: Category) -> usize {
        self.set(category)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Take the accumulated sets
    pub fn finalize(self) -> ClassifiedDomainSet {
        let take = |set: Mutex<BTreeSet<String>>| set.into_inner().unwrap_or_else(PoisonError::into_inner);

        ClassifiedDomainSet {
            standard: take(self.standard),
            simple_wildcard: take(self.simple_wildcard),
            wildcard_tld: take(self.wildcard_tld),
        }
    }
}

/// Write one sorted, newline-terminated file per category.
///
/// Each file is written next to its destination and renamed into place, so a
/// reader never sees a partial file.
#[instrument(skip(domains, files))]
pub async fn write_outputs(
    domains: &ClassifiedDomainSet,
    dir: &Path,
    files: &OutputFiles,
) -> Result<OutputPaths> {
    tokio::fs::create_dir_all(dir).await?;
    let paths = OutputPaths::new(dir, files);

    for category in Category::ALL {
        let path = paths.get(category);
        let mut contents = String::new();
        for identifier in domains.get(category) {
            contents.push_str(identifier);
            contents.push('\n');
        }

        let mut partial = path.as_os_str().to_owned();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        tokio::fs::write(&partial, contents).await?;
        tokio::fs::rename(&partial, path).await?;
        debug!("Wrote {} {} identifiers to {}", domains.len(category), category, path.display());
    }

    info!("Results saved to {}", dir.display());
    Ok(paths)
}
