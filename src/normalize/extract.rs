//! Source extraction contract and registry.
//!
//! Each external source registers one pure extractor implementing the shared
//! `(raw payload) -> partial fields` contract. Adding a source means
//! registering a new extractor, never branching deeper inside a shared
//! function. Extraction degrades gracefully: an absent field yields `None`,
//! never an error, because source coverage is uneven.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::models::QualityFlag;

/// Partial standardized fields produced by one extractor run.
#[derive(Debug, Clone, Default)]
pub struct ExtractedFields {
    pub entity_key: Option<String>,
    pub period: Option<String>,
    pub metrics: BTreeMap<String, Option<f64>>,
    /// Set by the extractor only when the source itself marks the value
    /// (e.g. disclosure-withheld); range checks happen later.
    pub quality: Option<QualityFlag>,
    /// Commodity hint for commodity-specific unit factors.
    pub commodity: Option<String>,
}

/// A pure, per-source extraction strategy.
pub trait SourceExtractor: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// Cheap structural check used by the ingestion gateway: can this payload
    /// possibly be this source's container shape? Returns a human-readable
    /// reason on mismatch.
    fn check_container(&self, payload: &Value) -> Result<(), String>;

    /// Pure extraction from the payload. Must not fail on absent fields.
    fn extract(&self, payload: &Value) -> ExtractedFields;
}

/// Registry mapping source identifier to its extractor.
pub struct SourceRegistry {
    extractors: HashMap<&'static str, Box<dyn SourceExtractor>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    /// Registry with the built-in extractors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(super::sources::QuickstatsExtractor));
        registry.register(Box::new(super::sources::WxDailyExtractor));
        registry.register(Box::new(super::sources::ComtradeExtractor));
        registry
    }

    pub fn register(&mut self, extractor: Box<dyn SourceExtractor>) {
        self.extractors.insert(extractor.source_id(), extractor);
    }

    pub fn get(&self, source: &str) -> Option<&dyn SourceExtractor> {
        self.extractors.get(source).map(|e| e.as_ref())
    }

    pub fn sources(&self) -> Vec<&'static str> {
        let mut ids: Vec<_> = self.extractors.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Read a string field, treating null/absent uniformly.
pub(crate) fn get_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(|v| v.as_str()).filter(|s| !s.trim().is_empty())
}

/// Read a numeric field; accepts JSON numbers and numeric strings with
/// thousands separators (survey extracts report "14,850").
pub(crate) fn get_f64(payload: &Value, key: &str) -> Option<f64> {
    match payload.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_numeric(s),
        _ => None,
    }
}

/// Parse a numeric string, tolerating thousands separators and surrounding
/// whitespace. Returns `None` for suppression markers and non-numeric text.
pub(crate) fn parse_numeric(s: &str) -> Option<f64> {
    let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// Normalize an entity name component: lowercase, trimmed, inner whitespace
/// collapsed to single dashes.
pub(crate) fn normalize_component(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}
