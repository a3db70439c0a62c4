use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Current version of the serialized interaction metadata layout.
pub const META_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Structured metadata attached to an interaction.
///
/// Stored as JSON in the `meta` column. Rows written before the structured
/// layout existed hold a bare string (e.g. `vision`); those are read back as
/// the `kind` of a version 1 record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionMeta {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Default for InteractionMeta {
    fn default() -> Self {
        Self {
            version: META_VERSION,
            kind: None,
            attributes: BTreeMap::new(),
        }
    }
}

impl InteractionMeta {
    pub fn with_kind(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decodes a stored blob. Never fails: unparseable blobs become the `kind`.
    pub fn from_stored(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match serde_json::from_str::<InteractionMeta>(trimmed) {
            Ok(meta) => Some(meta),
            Err(_) => Some(Self::with_kind(trimmed)),
        }
    }
}

/// One logged user or assistant message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Interaction {
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: String,
    pub meta: Option<InteractionMeta>,
}

/// A derived, timeless statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fact {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub fact: String,
    pub importance: i64,
}

/// Dedup key for fact text: trimmed, whitespace collapsed, lowercased.
pub fn normalize_fact_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses RFC 3339, falling back to naive ISO timestamps read as UTC.
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(ts) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(ts, fmt).ok())
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("Assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert!("system".parse::<Role>().is_err());
    }

    #[test]
    fn test_meta_legacy_blob() {
        let meta = InteractionMeta::from_stored("vision").unwrap();
        assert_eq!(meta.version, META_VERSION);
        assert_eq!(meta.kind.as_deref(), Some("vision"));
        assert!(InteractionMeta::from_stored("  ").is_none());
    }

    #[test]
    fn test_meta_structured() {
        let meta = InteractionMeta::with_kind("text").with_attribute("window", "editor");
        let json = meta.to_json().unwrap();
        assert_eq!(InteractionMeta::from_stored(&json), Some(meta));
    }

    #[test]
    fn test_normalize_fact_text() {
        assert_eq!(
            normalize_fact_text("  Backups   MÜSSEN\ttäglich laufen "),
            "backups müssen täglich laufen"
        );
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let now = Utc::now();
        let stored = format_timestamp(now);
        assert_eq!(parse_timestamp(&stored).unwrap().timestamp_micros(), now.timestamp_micros());

        // Naive isoformat written by older builds
        let legacy = parse_timestamp("2025-06-08T14:35:31.123456").unwrap();
        assert_eq!(legacy.format("%Y-%m-%d %H:%M").to_string(), "2025-06-08 14:35");
        assert!(parse_timestamp("yesterday").is_none());
    }
}
