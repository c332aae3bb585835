//! Scope extraction
//!
//! Turns one program's structured scope into the set of domain identifiers
//! worth classifying. Pure, no I/O.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, trace};

use crate::api::ScopeAsset;

/// What happened to the entries of one scope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractReport {
    /// Identifiers that made it into the set, before deduplication
    pub accepted: usize,

    /// Entries not eligible for a bounty
    pub ineligible: usize,

    /// Eligible entries whose asset type does not carry domains
    pub non_domain: usize,

    /// Identifiers that do not look like a domain
    pub malformed: usize,
}

/// Validate raw scope records, returning the assets and the number dropped
pub fn parse_records(records: &[Value]) -> (Vec<ScopeAsset>, usize) {
    let mut assets = Vec::with_capacity(records.len());
    let mut malformed = 0;

    for record in records {
        match ScopeAsset::try_from(record) {
            Ok(asset) => assets.push(asset),
            Err(e) => {
                debug!("Dropping scope record: {}", e);
                malformed += 1;
            }
        }
    }

    (assets, malformed)
}

/// Reduce a listed identifier to a bare, lowercase host pattern.
///
/// Returns `None` when nothing domain-like is left.
pub fn normalize_identifier(raw: &str) -> Option<String> {
    let mut host = raw.trim();

    if let Some((_, rest)) = host.rsplit_once("//") {
        host = rest;
    }
    if let Some(end) = host.find(['/', '?', '#']) {
        host = &host[..end];
    }
    if let Some((name, _port)) = host.split_once(':') {
        host = name;
    }
    let host = host.trim().trim_end_matches('.');

    if host.is_empty() || !host.contains('.') || host.chars().any(char::is_whitespace) {
        return None;
    }

    Some(host.to_ascii_lowercase())
}

/// Collect the normalized identifiers of every eligible domain asset
pub fn extract_identifiers(assets: &[ScopeAsset]) -> (BTreeSet<String>, ExtractReport) {
    let mut identifiers = BTreeSet::new();
    let mut report = ExtractReport::default();

    for asset in assets {
        if !asset.eligible_for_bounty {
            report.ineligible += 1;
            continue;
        }
        if !asset.asset_type.is_domain() {
            trace!("Skipping {} asset {}", asset.asset_type, asset.identifier);
            report.non_domain += 1;
            continue;
        }

        for part in asset.identifier.split(',') {
            match normalize_identifier(part) {
                Some(identifier) => {
                    report.accepted += 1;
                    identifiers.insert(identifier);
                }
                None if part.trim().is_empty() => {}
                None => {
                    debug!("Dropping identifier {:?}", part);
                    report.malformed += 1;
                }
            }
        }
    }

    (identifiers, report)
}
