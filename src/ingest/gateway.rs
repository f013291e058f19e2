//! Ingestion gateway: the only writer of the bronze layer.
//!
//! Natural-key idempotency: re-ingesting an identical payload is a no-op;
//! a changed payload updates the existing row in place and resets
//! `processed` so the normalizer picks it up again. Every accepted call
//! appends a row to the immutable audit trail.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::models::{IngestEnvelope, RawRecord};
use crate::normalize::SourceRegistry;
use crate::store::Db;

use super::signature::content_signature;

/// Outcome of one ingest call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Inserted => "inserted",
            IngestOutcome::Updated => "updated",
            IngestOutcome::Unchanged => "unchanged",
        }
    }
}

/// Acknowledgement returned for an accepted envelope.
#[derive(Debug, Clone)]
pub struct IngestAck {
    pub lineage_id: String,
    pub outcome: IngestOutcome,
}

/// Per-item results plus counts; a rejected envelope never aborts the batch.
#[derive(Debug)]
pub struct IngestBatchReport {
    pub accepted: usize,
    pub rejected: usize,
    pub results: Vec<Result<IngestAck>>,
}

/// One row of the append-only audit trail.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub lineage_id: String,
    pub source: String,
    pub natural_key: Vec<String>,
    pub signature: String,
    pub outcome: String,
    pub at: DateTime<Utc>,
}

pub struct IngestGateway {
    db: Db,
    registry: std::sync::Arc<SourceRegistry>,
}

impl IngestGateway {
    pub fn new(db: Db, registry: std::sync::Arc<SourceRegistry>) -> Self {
        Self { db, registry }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Ingest one envelope. Idempotent on `(source, natural_key)` content.
    pub async fn ingest(&self, envelope: &IngestEnvelope) -> Result<IngestAck> {
        self.validate(envelope)?;

        let signature = content_signature(&envelope.payload);
        let key_json = serde_json::to_string(&envelope.natural_key)?;
        let payload_json = serde_json::to_string(&envelope.payload)?;
        let now = Utc::now().to_rfc3339();

        let conn = self.db.conn();
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result = self.upsert_locked(
            &conn,
            envelope,
            &signature,
            &key_json,
            &payload_json,
            &now,
        );

        match result {
            Ok(ack) => {
                conn.execute("COMMIT", [])?;
                debug!(
                    source = %envelope.source,
                    key = %key_json,
                    outcome = ack.outcome.as_str(),
                    "ingested raw record"
                );
                Ok(ack)
            }
            Err(e) => {
                conn.execute("ROLLBACK", []).ok();
                Err(e)
            }
        }
    }

    fn upsert_locked(
        &self,
        conn: &Connection,
        envelope: &IngestEnvelope,
        signature: &str,
        key_json: &str,
        payload_json: &str,
        now: &str,
    ) -> Result<IngestAck> {
        let existing: Option<(String, String)> = conn
            .query_row(
                "SELECT signature, lineage_id FROM raw_records
                 WHERE source = ?1 AND natural_key = ?2",
                params![envelope.source, key_json],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (lineage_id, outcome) = match existing {
            Some((old_signature, lineage_id)) if old_signature == signature => {
                (lineage_id, IngestOutcome::Unchanged)
            }
            Some((_, lineage_id)) => {
                conn.execute(
                    "UPDATE raw_records
                     SET signature = ?3, payload_json = ?4, collected_at = ?5,
                         processed = 0, processing_error = NULL, updated_at = ?6
                     WHERE source = ?1 AND natural_key = ?2",
                    params![
                        envelope.source,
                        key_json,
                        signature,
                        payload_json,
                        envelope.collected_at.to_rfc3339(),
                        now,
                    ],
                )?;
                (lineage_id, IngestOutcome::Updated)
            }
            None => {
                let lineage_id = Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO raw_records
                     (source, natural_key, lineage_id, signature, payload_json,
                      collected_at, processed, processing_error, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL, ?7, ?7)",
                    params![
                        envelope.source,
                        key_json,
                        lineage_id,
                        signature,
                        payload_json,
                        envelope.collected_at.to_rfc3339(),
                        now,
                    ],
                )?;
                (lineage_id, IngestOutcome::Inserted)
            }
        };

        conn.execute(
            "INSERT INTO ingest_audit (lineage_id, source, natural_key, signature, outcome, at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                lineage_id,
                envelope.source,
                key_json,
                signature,
                outcome.as_str(),
                now,
            ],
        )?;

        Ok(IngestAck {
            lineage_id,
            outcome,
        })
    }

    /// Ingest many envelopes; each is its own transaction and a rejection
    /// leaves the rest of the batch untouched.
    pub async fn ingest_batch(&self, envelopes: &[IngestEnvelope]) -> IngestBatchReport {
        let mut results = Vec::with_capacity(envelopes.len());
        let mut accepted = 0usize;
        let mut rejected = 0usize;

        for envelope in envelopes {
            match self.ingest(envelope).await {
                Ok(ack) => {
                    accepted += 1;
                    results.push(Ok(ack));
                }
                Err(e) => {
                    rejected += 1;
                    results.push(Err(e));
                }
            }
        }

        info!(accepted, rejected, "ingest batch complete");
        IngestBatchReport {
            accepted,
            rejected,
            results,
        }
    }

    fn validate(&self, envelope: &IngestEnvelope) -> Result<()> {
        if envelope.natural_key.is_empty() {
            return Err(PipelineError::Validation(
                "natural key must have at least one component".to_string(),
            ));
        }
        if envelope.natural_key.iter().any(|c| c.trim().is_empty()) {
            return Err(PipelineError::Validation(
                "natural key components must be non-null".to_string(),
            ));
        }

        let extractor = self.registry.get(&envelope.source).ok_or_else(|| {
            PipelineError::Validation(format!("unknown source '{}'", envelope.source))
        })?;

        extractor
            .check_container(&envelope.payload)
            .map_err(|detail| PipelineError::SchemaMismatch {
                source_name: envelope.source.clone(),
                detail,
            })
    }

    /// Fetch one raw record by natural key.
    pub fn get(&self, source: &str, natural_key: &[String]) -> Result<Option<RawRecord>> {
        let key_json = serde_json::to_string(natural_key)?;
        let conn = self.db.conn();
        let record = conn
            .query_row(
                "SELECT source, natural_key, lineage_id, signature, payload_json,
                        collected_at, processed, processing_error, created_at, updated_at
                 FROM raw_records WHERE source = ?1 AND natural_key = ?2",
                params![source, key_json],
                Self::row_to_raw,
            )
            .optional()?;
        Ok(record)
    }

    /// Fetch unprocessed raw records in update order.
    pub fn unprocessed(&self, limit: usize) -> Result<Vec<RawRecord>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT source, natural_key, lineage_id, signature, payload_json,
                    collected_at, processed, processing_error, created_at, updated_at
             FROM raw_records WHERE processed = 0
             ORDER BY updated_at, source, natural_key
             LIMIT ?1",
        )?;

        let records = stmt
            .query_map([limit], Self::row_to_raw)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Mark a raw record processed after successful extraction.
    pub fn mark_processed(&self, source: &str, natural_key: &[String]) -> Result<()> {
        let key_json = serde_json::to_string(natural_key)?;
        let conn = self.db.conn();
        conn.execute(
            "UPDATE raw_records SET processed = 1, processing_error = NULL
             WHERE source = ?1 AND natural_key = ?2",
            params![source, key_json],
        )?;
        Ok(())
    }

    /// Record a per-record extraction failure; the record stays unprocessed
    /// and is retried on the next pass.
    pub fn record_processing_error(
        &self,
        source: &str,
        natural_key: &[String],
        error: &str,
    ) -> Result<()> {
        let key_json = serde_json::to_string(natural_key)?;
        let conn = self.db.conn();
        conn.execute(
            "UPDATE raw_records SET processed = 0, processing_error = ?3
             WHERE source = ?1 AND natural_key = ?2",
            params![source, key_json, error],
        )?;
        Ok(())
    }

    /// Audit trail for one natural key, oldest first.
    pub fn audit_trail(&self, source: &str, natural_key: &[String]) -> Result<Vec<AuditEntry>> {
        let key_json = serde_json::to_string(natural_key)?;
        let conn = self.db.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT lineage_id, source, natural_key, signature, outcome, at
             FROM ingest_audit WHERE source = ?1 AND natural_key = ?2
             ORDER BY id",
        )?;

        let entries = stmt
            .query_map(params![source, key_json], |row| {
                let key_json: String = row.get(2)?;
                let at: String = row.get(5)?;
                Ok(AuditEntry {
                    lineage_id: row.get(0)?,
                    source: row.get(1)?,
                    natural_key: serde_json::from_str(&key_json).unwrap_or_default(),
                    signature: row.get(3)?,
                    outcome: row.get(4)?,
                    at: DateTime::parse_from_rfc3339(&at)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Total bronze rows.
    pub fn raw_count(&self) -> Result<i64> {
        let conn = self.db.conn();
        let count = conn.query_row("SELECT COUNT(*) FROM raw_records", [], |row| row.get(0))?;
        Ok(count)
    }

    fn row_to_raw(row: &rusqlite::Row) -> rusqlite::Result<RawRecord> {
        let key_json: String = row.get(1)?;
        let payload_json: String = row.get(4)?;
        let collected_at: String = row.get(5)?;
        let created_at: String = row.get(8)?;
        let updated_at: String = row.get(9)?;

        let parse_ts = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
        };

        Ok(RawRecord {
            source: row.get(0)?,
            natural_key: serde_json::from_str(&key_json)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
            lineage_id: row.get(2)?,
            signature: row.get(3)?,
            payload: serde_json::from_str(&payload_json)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
            collected_at: parse_ts(&collected_at)?,
            processed: row.get::<_, i64>(6)? != 0,
            processing_error: row.get(7)?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Arc;

    fn gateway() -> IngestGateway {
        let db = Db::open_in_memory().expect("open db");
        IngestGateway::new(db, Arc::new(SourceRegistry::with_defaults()))
    }

    fn envelope(value: f64) -> IngestEnvelope {
        IngestEnvelope {
            source: "quickstats".to_string(),
            natural_key: vec!["corn".into(), "iowa".into(), "MY2025".into()],
            payload: json!({
                "commodity": "CORN",
                "location": "IOWA",
                "period": "MY2025",
                "statistic": "production",
                "value": value.to_string(),
                "unit": "BU"
            }),
            collected_at: Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn identical_payload_reingestion_is_a_noop() {
        let gw = gateway();
        let first = gw.ingest(&envelope(100.0)).await.expect("ingest");
        assert_eq!(first.outcome, IngestOutcome::Inserted);

        let second = gw.ingest(&envelope(100.0)).await.expect("ingest");
        assert_eq!(second.outcome, IngestOutcome::Unchanged);
        assert_eq!(second.lineage_id, first.lineage_id);
        assert_eq!(gw.raw_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn changed_payload_updates_in_place_and_resets_processed() {
        let gw = gateway();
        let first = gw.ingest(&envelope(100.0)).await.expect("ingest");
        gw.mark_processed("quickstats", &envelope(100.0).natural_key)
            .expect("mark");

        let second = gw.ingest(&envelope(200.0)).await.expect("ingest");
        assert_eq!(second.outcome, IngestOutcome::Updated);
        assert_eq!(second.lineage_id, first.lineage_id);
        assert_eq!(gw.raw_count().unwrap(), 1);

        let raw = gw
            .get("quickstats", &envelope(200.0).natural_key)
            .expect("get")
            .expect("exists");
        assert!(!raw.processed);
        assert_eq!(raw.payload["value"], "200");
    }

    #[tokio::test]
    async fn null_key_component_is_rejected() {
        let gw = gateway();
        let mut env = envelope(1.0);
        env.natural_key[1] = "  ".to_string();

        let err = gw.ingest(&env).await.expect_err("must reject");
        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(gw.raw_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn container_mismatch_is_rejected() {
        let gw = gateway();
        let mut env = envelope(1.0);
        env.payload = json!([1, 2, 3]);

        let err = gw.ingest(&env).await.expect_err("must reject");
        assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
    }

    #[tokio::test]
    async fn audit_trail_is_append_only() {
        let gw = gateway();
        gw.ingest(&envelope(100.0)).await.expect("ingest");
        gw.ingest(&envelope(100.0)).await.expect("ingest");
        gw.ingest(&envelope(200.0)).await.expect("ingest");

        let trail = gw
            .audit_trail("quickstats", &envelope(100.0).natural_key)
            .expect("trail");
        let outcomes: Vec<&str> = trail.iter().map(|e| e.outcome.as_str()).collect();
        assert_eq!(outcomes, vec!["inserted", "unchanged", "updated"]);
    }

    #[tokio::test]
    async fn batch_report_counts_rejections_without_aborting() {
        let gw = gateway();
        let mut bad = envelope(1.0);
        bad.natural_key.clear();

        let report = gw
            .ingest_batch(&[envelope(1.0), bad, envelope(2.0)])
            .await;
        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected, 1);
        assert!(report.results[1].is_err());
    }

    #[tokio::test]
    async fn unprocessed_batch_excludes_processed_rows() {
        let gw = gateway();
        gw.ingest(&envelope(1.0)).await.expect("ingest");
        assert_eq!(gw.unprocessed(10).unwrap().len(), 1);

        gw.mark_processed("quickstats", &envelope(1.0).natural_key)
            .expect("mark");
        assert!(gw.unprocessed(10).unwrap().is_empty());
    }
}
