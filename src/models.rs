use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Closed quality enumeration for standardized records.
///
/// Source material carries free-text quality indicators; extraction maps them
/// into this set and anything unrecognized becomes `Suspect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityFlag {
    Ok,
    Suspect,
    Withheld,
    Interpolated,
}

impl QualityFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityFlag::Ok => "OK",
            QualityFlag::Suspect => "SUSPECT",
            QualityFlag::Withheld => "WITHHELD",
            QualityFlag::Interpolated => "INTERPOLATED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(QualityFlag::Ok),
            "SUSPECT" => Some(QualityFlag::Suspect),
            "WITHHELD" => Some(QualityFlag::Withheld),
            "INTERPOLATED" => Some(QualityFlag::Interpolated),
            _ => None,
        }
    }
}

/// Raw ingestion envelope supplied by source-specific collector processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEnvelope {
    pub source: String,
    pub natural_key: Vec<String>,
    pub payload: serde_json::Value,
    pub collected_at: DateTime<Utc>,
}

/// Bronze-layer record: the payload exactly as collected, plus processing state.
///
/// Owned exclusively by the ingestion gateway. Immutable once written except
/// for `processed` / `processing_error`, which the normalizer flips through
/// gateway methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub lineage_id: String,
    pub source: String,
    pub natural_key: Vec<String>,
    pub payload: serde_json::Value,
    pub signature: String,
    pub collected_at: DateTime<Utc>,
    pub processed: bool,
    pub processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Silver-layer record: one source's standardized view of one entity/period.
///
/// Unique on (entity_key, period, source). A pure function of its raw
/// record - re-derivable at any time, never hand-edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizedRecord {
    pub entity_key: String,
    pub period: String,
    pub source: String,
    /// Named numeric fields including derived unit variants. `BTreeMap` so
    /// serialization is key-ordered and re-normalization is byte-identical.
    pub metrics: BTreeMap<String, Option<f64>>,
    pub quality_flag: QualityFlag,
    pub lineage_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StandardizedRecord {
    /// Fetch a metric value; absent and null are both `None`.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied().flatten()
    }
}

/// One versioned load of externally submitted estimates for a commodity/period.
///
/// Rows are append-only; exactly one row per (commodity, period) has
/// `is_current = true` at any point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateRecord {
    pub id: Option<i64>,
    pub commodity: String,
    pub period: String,
    pub line_items: BTreeMap<String, f64>,
    pub as_of_date: NaiveDate,
    pub notes: Option<String>,
    pub is_current: bool,
    pub loaded_at: DateTime<Utc>,
}

/// Variance of one estimate line item against realized standardized data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceRow {
    pub line_item: String,
    pub estimate_value: f64,
    pub realized_value: f64,
    pub absolute_diff: f64,
    pub pct_diff: f64,
}

/// Result of a variance report. `Pending` means no realized data exists yet
/// for the key - an expected state early in a period, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VarianceReport {
    Pending {
        commodity: String,
        period: String,
    },
    Ready {
        commodity: String,
        period: String,
        as_of_date: NaiveDate,
        rows: Vec<VarianceRow>,
    },
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub normalize_batch_limit: usize,
    pub grid_retry_attempts: u32,
    pub grid_retry_initial_backoff_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./cropflow.db".to_string());

        let normalize_batch_limit = std::env::var("NORMALIZE_BATCH_LIMIT")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .unwrap_or(500);

        let grid_retry_attempts = std::env::var("GRID_RETRY_ATTEMPTS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .unwrap_or(3);

        let grid_retry_initial_backoff_ms = std::env::var("GRID_RETRY_BACKOFF_MS")
            .unwrap_or_else(|_| "250".to_string())
            .parse()
            .unwrap_or(250);

        Ok(Self {
            database_path,
            normalize_batch_limit,
            grid_retry_attempts,
            grid_retry_initial_backoff_ms,
        })
    }
}
