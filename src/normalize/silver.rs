//! Silver-layer store: standardized records keyed by (entity, period, source).
//!
//! Written only by the normalizer. The upsert compares content before
//! writing, so re-normalizing an unchanged raw record leaves the stored row
//! byte-identical (timestamps included).

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::debug;

use crate::error::Result;
use crate::models::{QualityFlag, StandardizedRecord};
use crate::store::Db;

pub struct SilverStore {
    db: Db,
}

impl SilverStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Upsert on (entity_key, period, source). Returns true when a row was
    /// actually written. `created_at` is preserved across updates.
    pub fn upsert(&self, record: &StandardizedRecord) -> Result<bool> {
        let metrics_json = serde_json::to_string(&record.metrics)?;
        let now = Utc::now().to_rfc3339();

        let conn = self.db.conn();

        let existing: Option<(String, String, String)> = conn
            .query_row(
                "SELECT metrics_json, quality_flag, lineage_id FROM standardized_records
                 WHERE entity_key = ?1 AND period = ?2 AND source = ?3",
                params![record.entity_key, record.period, record.source],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match existing {
            Some((old_metrics, old_flag, old_lineage))
                if old_metrics == metrics_json
                    && old_flag == record.quality_flag.as_str()
                    && old_lineage == record.lineage_id =>
            {
                debug!(
                    entity = %record.entity_key,
                    period = %record.period,
                    source = %record.source,
                    "standardized record unchanged"
                );
                Ok(false)
            }
            Some(_) => {
                conn.execute(
                    "UPDATE standardized_records
                     SET metrics_json = ?4, quality_flag = ?5, lineage_id = ?6, updated_at = ?7
                     WHERE entity_key = ?1 AND period = ?2 AND source = ?3",
                    params![
                        record.entity_key,
                        record.period,
                        record.source,
                        metrics_json,
                        record.quality_flag.as_str(),
                        record.lineage_id,
                        now,
                    ],
                )?;
                Ok(true)
            }
            None => {
                conn.execute(
                    "INSERT INTO standardized_records
                     (entity_key, period, source, metrics_json, quality_flag,
                      lineage_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                    params![
                        record.entity_key,
                        record.period,
                        record.source,
                        metrics_json,
                        record.quality_flag.as_str(),
                        record.lineage_id,
                        now,
                    ],
                )?;
                Ok(true)
            }
        }
    }

    pub fn get(
        &self,
        entity_key: &str,
        period: &str,
        source: &str,
    ) -> Result<Option<StandardizedRecord>> {
        let conn = self.db.conn();
        let record = conn
            .query_row(
                "SELECT entity_key, period, source, metrics_json, quality_flag,
                        lineage_id, created_at, updated_at
                 FROM standardized_records
                 WHERE entity_key = ?1 AND period = ?2 AND source = ?3",
                params![entity_key, period, source],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// All records for one period, across entities and sources.
    pub fn for_period(&self, period: &str) -> Result<Vec<StandardizedRecord>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT entity_key, period, source, metrics_json, quality_flag,
                    lineage_id, created_at, updated_at
             FROM standardized_records WHERE period = ?1
             ORDER BY entity_key, source",
        )?;
        let records = stmt
            .query_map([period], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// All records for one entity across periods (one source).
    pub fn for_entity(&self, entity_key: &str, source: &str) -> Result<Vec<StandardizedRecord>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT entity_key, period, source, metrics_json, quality_flag,
                    lineage_id, created_at, updated_at
             FROM standardized_records WHERE entity_key = ?1 AND source = ?2
             ORDER BY period",
        )?;
        let records = stmt
            .query_map(params![entity_key, source], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Records whose entity is the commodity itself or namespaced under it
    /// (`corn` or `corn:<location>`), for realized-vs-estimate comparison.
    pub fn for_commodity_period(
        &self,
        commodity: &str,
        period: &str,
    ) -> Result<Vec<StandardizedRecord>> {
        let prefix = format!("{}:%", commodity);
        let conn = self.db.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT entity_key, period, source, metrics_json, quality_flag,
                    lineage_id, created_at, updated_at
             FROM standardized_records
             WHERE period = ?1 AND (entity_key = ?2 OR entity_key LIKE ?3)
             ORDER BY entity_key, source",
        )?;
        let records = stmt
            .query_map(params![period, commodity, prefix], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.db.conn();
        let count = conn.query_row("SELECT COUNT(*) FROM standardized_records", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<StandardizedRecord> {
        let metrics_json: String = row.get(3)?;
        let flag: String = row.get(4)?;
        let created_at: String = row.get(6)?;
        let updated_at: String = row.get(7)?;

        let parse_ts = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
        };

        Ok(StandardizedRecord {
            entity_key: row.get(0)?,
            period: row.get(1)?,
            source: row.get(2)?,
            metrics: serde_json::from_str(&metrics_json)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
            quality_flag: QualityFlag::parse(&flag).unwrap_or(QualityFlag::Suspect),
            lineage_id: row.get(5)?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    }
}
