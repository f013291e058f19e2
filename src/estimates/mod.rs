//! Estimate version chain and variance reporting.
//!
//! Estimate rows are append-only. Loading a new estimate inserts the row and
//! flips every prior current row for the same (commodity, period) inside one
//! transaction, so there is no window where zero or two rows are current.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{EstimateRecord, VarianceReport, VarianceRow};
use crate::normalize::SilverStore;
use crate::store::Db;

pub struct EstimateStore {
    db: Db,
}

impl EstimateStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Load a new estimate version. The previous current row (if any) is
    /// superseded atomically.
    pub fn load_estimate(
        &self,
        commodity: &str,
        period: &str,
        line_items: &BTreeMap<String, f64>,
        as_of_date: NaiveDate,
        notes: Option<&str>,
    ) -> Result<i64> {
        let line_items_json = serde_json::to_string(line_items)?;
        let now = Utc::now().to_rfc3339();

        let conn = self.db.conn();
        conn.execute("BEGIN IMMEDIATE", [])?;

        let result = (|| -> Result<i64> {
            conn.execute(
                "UPDATE estimates SET is_current = 0
                 WHERE commodity = ?1 AND period = ?2 AND is_current = 1",
                params![commodity, period],
            )?;
            conn.execute(
                "INSERT INTO estimates
                 (commodity, period, line_items_json, as_of_date, notes, is_current, loaded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
                params![
                    commodity,
                    period,
                    line_items_json,
                    as_of_date.format("%Y-%m-%d").to_string(),
                    notes,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })();

        match result {
            Ok(id) => {
                conn.execute("COMMIT", [])?;
                info!(commodity, period, id, "estimate version loaded");
                Ok(id)
            }
            Err(e) => {
                conn.execute("ROLLBACK", []).ok();
                Err(e)
            }
        }
    }

    /// The single current estimate for a key, if one has been loaded.
    pub fn current(&self, commodity: &str, period: &str) -> Result<Option<EstimateRecord>> {
        let conn = self.db.conn();
        let record = conn
            .query_row(
                "SELECT id, commodity, period, line_items_json, as_of_date,
                        notes, is_current, loaded_at
                 FROM estimates
                 WHERE commodity = ?1 AND period = ?2 AND is_current = 1",
                params![commodity, period],
                Self::row_to_estimate,
            )
            .optional()?;
        Ok(record)
    }

    /// Full version history for a key, oldest load first.
    pub fn history(&self, commodity: &str, period: &str) -> Result<Vec<EstimateRecord>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, commodity, period, line_items_json, as_of_date,
                    notes, is_current, loaded_at
             FROM estimates WHERE commodity = ?1 AND period = ?2
             ORDER BY id",
        )?;
        let records = stmt
            .query_map(params![commodity, period], Self::row_to_estimate)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Compare the current estimate against realized standardized data.
    ///
    /// Realized values: for each entity under the commodity, the most
    /// recently updated record wins across sources; line-item totals sum over
    /// entities. Returns `Pending` when no estimate or no realized data
    /// exists for the key.
    pub fn variance_report(
        &self,
        silver: &SilverStore,
        commodity: &str,
        period: &str,
    ) -> Result<VarianceReport> {
        let Some(estimate) = self.current(commodity, period)? else {
            return Ok(VarianceReport::Pending {
                commodity: commodity.to_string(),
                period: period.to_string(),
            });
        };

        let realized_records = silver.for_commodity_period(commodity, period)?;
        if realized_records.is_empty() {
            debug!(commodity, period, "no realized data yet");
            return Ok(VarianceReport::Pending {
                commodity: commodity.to_string(),
                period: period.to_string(),
            });
        }

        // Latest record per entity across sources.
        let mut latest: BTreeMap<&str, &crate::models::StandardizedRecord> = BTreeMap::new();
        for record in &realized_records {
            latest
                .entry(record.entity_key.as_str())
                .and_modify(|existing| {
                    if record.updated_at > existing.updated_at {
                        *existing = record;
                    }
                })
                .or_insert(record);
        }

        let mut rows = Vec::with_capacity(estimate.line_items.len());
        for (line_item, estimate_value) in &estimate.line_items {
            let mut realized: Option<f64> = None;
            for record in latest.values() {
                if let Some(v) = record.metric(line_item) {
                    realized = Some(realized.unwrap_or(0.0) + v);
                }
            }

            let Some(realized_value) = realized else {
                continue;
            };

            let absolute_diff = realized_value - estimate_value;
            let pct_diff = if *estimate_value != 0.0 {
                absolute_diff / estimate_value * 100.0
            } else {
                0.0
            };
            rows.push(VarianceRow {
                line_item: line_item.clone(),
                estimate_value: *estimate_value,
                realized_value,
                absolute_diff,
                pct_diff,
            });
        }

        if rows.is_empty() {
            return Ok(VarianceReport::Pending {
                commodity: commodity.to_string(),
                period: period.to_string(),
            });
        }

        Ok(VarianceReport::Ready {
            commodity: commodity.to_string(),
            period: period.to_string(),
            as_of_date: estimate.as_of_date,
            rows,
        })
    }

    fn row_to_estimate(row: &rusqlite::Row) -> rusqlite::Result<EstimateRecord> {
        let line_items_json: String = row.get(3)?;
        let as_of: String = row.get(4)?;
        let loaded_at: String = row.get(7)?;

        Ok(EstimateRecord {
            id: Some(row.get(0)?),
            commodity: row.get(1)?,
            period: row.get(2)?,
            line_items: serde_json::from_str(&line_items_json)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
            as_of_date: NaiveDate::parse_from_str(&as_of, "%Y-%m-%d")
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
            notes: row.get(5)?,
            is_current: row.get::<_, i64>(6)? != 0,
            loaded_at: DateTime::parse_from_rfc3339(&loaded_at)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        })
    }
}
