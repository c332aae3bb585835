//! # API Record Schemas
//!
//! The platform answers with JSON:API documents: a `data` array of records,
//! each with an `id` and an `attributes` object, and a `links` object whose
//! `next` member is present while more pages remain.
//!
//! Records are validated here, at the parsing boundary. A record that fails
//! validation becomes a [`MalformedRecord`] and never reaches the pipeline.
//! Unknown fields are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// One page of a listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Page {
    #[serde(default)]
    data: Option<Vec<Value>>,

    #[serde(default)]
    links: Option<PageLinks>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PageLinks {
    #[serde(default)]
    next: Option<String>,
}

impl Page {
    /// Whether the server advertised another page
    pub fn has_next(&self) -> bool {
        !self.records().is_empty()
            && self
                .links
                .as_ref()
                .and_then(|links| links.next.as_deref())
                .is_some_and(|next| !next.is_empty())
    }

    pub fn records(&self) -> &[Value] {
        self.data.as_deref().unwrap_or_default()
    }

    pub fn into_records(self) -> Vec<Value> {
        self.data.unwrap_or_default()
    }
}

/// A record that failed validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed record: {0}")]
pub struct MalformedRecord(pub String);

/// JSON:API ids are strings, but tolerate bare numbers
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

impl From<RawId> for String {
    fn from(id: RawId) -> Self {
        match id {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RawRecord<A> {
    id: Option<RawId>,
    attributes: Option<A>,
}

#[derive(Deserialize)]
struct RawProgramAttributes {
    handle: Option<String>,
    updated_at: Option<String>,
}

#[derive(Deserialize)]
struct RawScopeAttributes {
    asset_identifier: Option<String>,
    asset_type: Option<String>,
    eligible_for_bounty: Option<bool>,
}

/// One bounty program
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProgramHandle {
    /// Platform id, used as the cache key
    pub id: String,

    /// URL slug of the program
    pub handle: String,

    /// Last change reported by the platform, when it reports one
    pub updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<&Value> for ProgramHandle {
    type Error = MalformedRecord;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        let raw: RawRecord<RawProgramAttributes> = serde_json::from_value(value.clone())
            .map_err(|e| MalformedRecord(format!("program: {}", e)))?;

        let id: String = raw
            .id
            .map(String::from)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| MalformedRecord("program without id".to_string()))?;

        let attributes = raw
            .attributes
            .ok_or_else(|| MalformedRecord(format!("program {} without attributes", id)))?;

        let handle = attributes
            .handle
            .map(|handle| handle.trim().to_string())
            .filter(|handle| is_valid_handle(handle))
            .ok_or_else(|| MalformedRecord(format!("program {} without a usable handle", id)))?;

        Ok(Self {
            id,
            handle,
            updated_at: attributes
                .updated_at
                .and_then(|at| DateTime::parse_from_rfc3339(&at).ok())
                .map(|at| at.with_timezone(&Utc)),
        })
    }
}

/// Handles are interpolated into request paths
fn is_valid_handle(handle: &str) -> bool {
    !handle.is_empty()
        && handle
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Kind of a scope asset. Only `Url` and `Wildcard` carry domains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AssetType {
    Url,
    Wildcard,
    Cidr,
    IpAddress,
    SourceCode,
    Other(String),
}

impl AssetType {
    pub fn as_str(&self) -> &str {
        match self {
            AssetType::Url => "URL",
            AssetType::Wildcard => "WILDCARD",
            AssetType::Cidr => "CIDR",
            AssetType::IpAddress => "IP_ADDRESS",
            AssetType::SourceCode => "SOURCE_CODE",
            AssetType::Other(other) => other,
        }
    }

    /// Whether identifiers of this type are domain patterns
    pub fn is_domain(&self) -> bool {
        matches!(self, AssetType::Url | AssetType::Wildcard)
    }
}

impl From<String> for AssetType {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "URL" => AssetType::Url,
            "WILDCARD" => AssetType::Wildcard,
            "CIDR" => AssetType::Cidr,
            "IP_ADDRESS" => AssetType::IpAddress,
            "SOURCE_CODE" => AssetType::SourceCode,
            _ => AssetType::Other(value),
        }
    }
}

impl From<AssetType> for String {
    fn from(value: AssetType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One in-scope entry of a program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeAsset {
    /// Raw identifier as listed by the program
    pub identifier: String,
    pub asset_type: AssetType,
    pub eligible_for_bounty: bool,
}

impl TryFrom<&Value> for ScopeAsset {
    type Error = MalformedRecord;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        let raw: RawRecord<RawScopeAttributes> = serde_json::from_value(value.clone())
            .map_err(|e| MalformedRecord(format!("scope: {}", e)))?;

        let attributes = raw
            .attributes
            .ok_or_else(|| MalformedRecord("scope without attributes".to_string()))?;

        let identifier = attributes
            .asset_identifier
            .filter(|identifier| !identifier.trim().is_empty())
            .ok_or_else(|| MalformedRecord("scope without asset_identifier".to_string()))?;

        Ok(Self {
            identifier,
            asset_type: attributes
                .asset_type
                .map(AssetType::from)
                .unwrap_or_else(|| AssetType::Other(String::new())),
            eligible_for_bounty: attributes.eligible_for_bounty.unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_navigation() {
        let page: Page = serde_json::from_value(json!({
            "data": [{"id": "1"}],
            "links": {"self": "a", "next": "b"}
        }))
        .unwrap();
        assert!(page.has_next());
        assert_eq!(page.records().len(), 1);

        let last: Page = serde_json::from_value(json!({"data": [{"id": "1"}], "links": {}})).unwrap();
        assert!(!last.has_next());

        let empty: Page = serde_json::from_value(json!({"data": [], "links": {"next": "b"}})).unwrap();
        assert!(!empty.has_next());

        let null: Page = serde_json::from_value(json!({"data": null})).unwrap();
        assert!(null.into_records().is_empty());
    }

    #[test]
    fn test_program_parsing() {
        let program = ProgramHandle::try_from(&json!({
            "id": "13",
            "type": "program",
            "attributes": {
                "handle": "security",
                "name": "HackerOne",
                "updated_at": "2024-03-01T10:00:00.000Z"
            }
        }))
        .unwrap();

        assert_eq!(program.id, "13");
        assert_eq!(program.handle, "security");
        assert!(program.updated_at.is_some());

        let numeric = ProgramHandle::try_from(&json!({
            "id": 7,
            "attributes": {"handle": "acme", "updated_at": "yesterday"}
        }))
        .unwrap();
        assert_eq!(numeric.id, "7");
        assert_eq!(numeric.updated_at, None);
    }

    #[test]
    fn test_malformed_programs() {
        let cases = [
            json!({"attributes": {"handle": "acme"}}),
            json!({"id": "1"}),
            json!({"id": "1", "attributes": {}}),
            json!({"id": "1", "attributes": {"handle": ""}}),
            json!({"id": "1", "attributes": {"handle": "../admin"}}),
            json!("not an object"),
        ];

        for case in cases {
            assert!(ProgramHandle::try_from(&case).is_err(), "{case} should be malformed");
        }
    }

    #[test]
    fn test_scope_parsing() {
        let asset = ScopeAsset::try_from(&json!({
            "id": "99",
            "attributes": {
                "asset_identifier": "*.example.com",
                "asset_type": "WILDCARD",
                "eligible_for_bounty": true,
                "eligible_for_submission": true,
                "instruction": null
            }
        }))
        .unwrap();

        assert_eq!(asset.identifier, "*.example.com");
        assert_eq!(asset.asset_type, AssetType::Wildcard);
        assert!(asset.eligible_for_bounty);
    }

    #[test]
    fn test_scope_without_identifier_is_malformed() {
        let missing = json!({"attributes": {"asset_type": "URL", "eligible_for_bounty": true}});
        let blank = json!({"attributes": {"asset_identifier": "  ", "asset_type": "URL"}});
        let wrong_type = json!({"attributes": {"asset_identifier": 42}});

        assert!(ScopeAsset::try_from(&missing).is_err());
        assert!(ScopeAsset::try_from(&blank).is_err());
        assert!(ScopeAsset::try_from(&wrong_type).is_err());
    }

    #[test]
    fn test_asset_type_round_trips_unknown_values() {
        let asset = ScopeAsset {
            identifier: "com.example.app".to_string(),
            asset_type: AssetType::from("GOOGLE_PLAY_APP_ID".to_string()),
            eligible_for_bounty: false,
        };

        let json = serde_json::to_value(&asset).unwrap();
        assert_eq!(json["asset_type"], "GOOGLE_PLAY_APP_ID");

        let back: ScopeAsset = serde_json::from_value(json).unwrap();
        assert_eq!(back, asset);
        assert!(!back.asset_type.is_domain());
        assert!(AssetType::from("url".to_string()).is_domain());
    }
}
