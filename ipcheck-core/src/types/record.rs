//! Lookup results.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::LookupKind;

/// Outcome of a lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    /// A provider returned data for the address.
    Success,
    /// A provider answered definitively that it has no data (private range,
    /// unallocated block, ...).
    NotFound,
    /// Invalid input, provider outage, or open circuit.
    Error,
}

impl LookupStatus {
    /// Returns the lowercase status label.
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupStatus::Success => "success",
            LookupStatus::NotFound => "not_found",
            LookupStatus::Error => "error",
        }
    }
}

impl fmt::Display for LookupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider fields of a record (`country`, `city`, `lat`, ...).
pub type LookupFields = BTreeMap<String, Value>;

/// Result of one lookup.
///
/// Records are replaced, never edited: the only field that differs between
/// the stored copy and what a caller receives is `cached`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LookupRecord {
    /// The identifier as looked up (normalized address when valid)
    pub id: String,
    /// Kind of lookup
    pub kind: LookupKind,
    /// Outcome
    pub status: LookupStatus,
    /// Provider data, empty unless `status` is `Success`
    #[serde(default)]
    pub fields: LookupFields,
    /// Human readable reason for `NotFound` / `Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Provider that produced the answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Whether this copy was served from cache
    #[serde(default)]
    pub cached: bool,
    /// When the provider answered
    pub looked_up_at: DateTime<Utc>,
}

impl LookupRecord {
    /// Creates a successful record.
    pub fn success(
        id: impl Into<String>,
        kind: LookupKind,
        provider: impl Into<String>,
        fields: LookupFields,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            status: LookupStatus::Success,
            fields,
            message: None,
            provider: Some(provider.into()),
            cached: false,
            looked_up_at: at,
        }
    }

    /// Creates a definitive not-found record.
    pub fn not_found(
        id: impl Into<String>,
        kind: LookupKind,
        provider: impl Into<String>,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            status: LookupStatus::NotFound,
            fields: LookupFields::new(),
            message: Some(message.into()),
            provider: Some(provider.into()),
            cached: false,
            looked_up_at: at,
        }
    }

    /// Creates an error record.
    pub fn error(
        id: impl Into<String>,
        kind: LookupKind,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            status: LookupStatus::Error,
            fields: LookupFields::new(),
            message: Some(message.into()),
            provider: None,
            cached: false,
            looked_up_at: at,
        }
    }

    /// Returns a copy marked as served from cache.
    pub fn into_cached(mut self) -> Self {
        self.cached = true;
        self
    }

    /// Returns true if the lookup succeeded.
    pub fn is_success(&self) -> bool {
        self.status == LookupStatus::Success
    }

    /// Returns a string field, if present.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}
