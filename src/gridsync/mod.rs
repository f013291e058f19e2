//! Grid synchronization adapter.
//!
//! Reconciles standardized/aggregate data into an external keyed 2-D grid
//! document. Single-writer for the duration of one pass: a fingerprint taken
//! at header-scan time is re-checked immediately before the write batch, and
//! any concurrent external modification aborts the pass rather than merging
//! partial writes.

pub mod document;
pub mod labels;

pub use document::{CellUpdate, GridDocument, GridValue, InMemoryGrid, ProtectedCells};

use std::collections::{BTreeMap, HashMap};
use std::future::Future;

use sha2::{Digest, Sha256};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::calendar::{parse_period_label, PeriodGranularity};
use crate::error::{PipelineError, Result};
use crate::normalize::extract::normalize_component;

use labels::{cell_period, labels_match};

/// Bounded retry for document access, scoped to one failing unit.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff_ms: 250,
        }
    }
}

fn is_retryable(error: &PipelineError) -> bool {
    matches!(
        error,
        PipelineError::Storage(_) | PipelineError::TransientExtraction(_)
    )
}

/// Execute a document operation with exponential backoff retry.
async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.initial_backoff_ms;
    let mut last_err: Option<PipelineError> = None;

    for attempt in 0..policy.attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !is_retryable(&e) => return Err(e),
            Err(e) => {
                warn!(attempt = attempt + 1, error = %e, "{} failed", what);
                last_err = Some(e);
            }
        }
        if attempt + 1 < policy.attempts {
            debug!("retrying {} in {}ms", what, backoff);
            sleep(Duration::from_millis(backoff)).await;
            backoff = (backoff * 2).min(30_000);
        }
    }

    Err(last_err
        .unwrap_or_else(|| PipelineError::TransientExtraction(format!("{} exhausted retries", what))))
}

/// Result of one sync pass. `keys_not_found` (a period or entity present in
/// the source data but absent from the document) is recoverable and
/// reported, never a hard failure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncReport {
    pub cells_written: usize,
    pub cells_cleared: usize,
    pub keys_not_found: Vec<String>,
}

/// New sparse result set for one period column in an entity-rows document.
#[derive(Debug, Clone)]
pub struct ColumnData {
    pub period_label: String,
    /// Normalized entity name -> value. Entities absent from this map must
    /// end up blank in the document, not retain stale values.
    pub values: HashMap<String, f64>,
}

pub struct GridSyncAdapter {
    retry: RetryPolicy,
}

impl GridSyncAdapter {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Entity-rows / period-columns layout: resolve each touched period label
    /// to a column, clear all non-protected cells in that column, then write
    /// the new sparse result set. Row resolution is by normalized entity
    /// name, not position, because rows may be manually reordered.
    pub async fn sync_entity_rows(
        &self,
        doc: &dyn GridDocument,
        protected: &ProtectedCells,
        granularity: PeriodGranularity,
        columns: &[ColumnData],
    ) -> Result<SyncReport> {
        let header = with_retry(&self.retry, "header scan", || doc.read_row(0)).await?;
        let entity_labels =
            with_retry(&self.retry, "entity column read", || doc.read_column(0)).await?;
        let fingerprint = fingerprint_of(&[&header, &entity_labels]);

        // Normalized entity name -> row index (first occurrence wins).
        let mut entity_rows: HashMap<String, usize> = HashMap::new();
        for (row, cell) in entity_labels.iter().enumerate().skip(1) {
            if let GridValue::Text(name) = cell {
                entity_rows
                    .entry(normalize_component(name))
                    .or_insert(row);
            }
        }

        let mut report = SyncReport::default();
        let mut updates: Vec<CellUpdate> = Vec::new();

        for column in columns {
            let Some(target) = parse_period_label(&column.period_label) else {
                report.keys_not_found.push(column.period_label.clone());
                continue;
            };

            let Some(col) = header.iter().enumerate().skip(1).find_map(|(i, cell)| {
                cell_period(cell)
                    .filter(|p| labels_match(p, &target, granularity))
                    .map(|_| i)
            }) else {
                report.keys_not_found.push(column.period_label.clone());
                continue;
            };

            let current = with_retry(&self.retry, "column read", || doc.read_column(col)).await?;

            // Sparse source data: rows absent from the new set become blank.
            let mut written_rows: Vec<usize> = Vec::new();
            let mut found: Vec<&str> = Vec::new();
            for (name, value) in sorted(&column.values) {
                match entity_rows.get(name.as_str()) {
                    Some(&row) if !protected.is_protected(row, col) => {
                        updates.push(CellUpdate {
                            row,
                            col,
                            value: GridValue::Number(*value),
                        });
                        written_rows.push(row);
                        found.push(name);
                        report.cells_written += 1;
                    }
                    Some(_) => {
                        // Entity resolved onto a protected cell; leave it.
                        found.push(name);
                    }
                    None => {
                        report
                            .keys_not_found
                            .push(format!("{}:{}", column.period_label, name));
                    }
                }
            }

            for (row, cell) in current.iter().enumerate().skip(1) {
                if protected.is_protected(row, col)
                    || written_rows.contains(&row)
                    || cell.is_blank()
                {
                    continue;
                }
                updates.push(CellUpdate {
                    row,
                    col,
                    value: GridValue::Blank,
                });
                report.cells_cleared += 1;
            }
        }

        self.commit(doc, &fingerprint, true, updates).await?;

        info!(
            cells_written = report.cells_written,
            cells_cleared = report.cells_cleared,
            keys_not_found = report.keys_not_found.len(),
            "entity-rows sync pass complete"
        );
        Ok(report)
    }

    /// Period-rows / attribute-columns layout: locate the single row whose
    /// label exactly matches the target period and write each attribute into
    /// its fixed column. No clearing pass: each period row is fully supplied
    /// by one result set.
    pub async fn sync_period_row(
        &self,
        doc: &dyn GridDocument,
        protected: &ProtectedCells,
        granularity: PeriodGranularity,
        period_label: &str,
        attribute_columns: &HashMap<String, usize>,
        values: &BTreeMap<String, f64>,
    ) -> Result<SyncReport> {
        let period_labels =
            with_retry(&self.retry, "period column read", || doc.read_column(0)).await?;
        let fingerprint = fingerprint_of(&[&period_labels]);

        let mut report = SyncReport::default();

        let Some(target) = parse_period_label(period_label) else {
            report.keys_not_found.push(period_label.to_string());
            return Ok(report);
        };

        let row = period_labels.iter().enumerate().skip(1).find_map(|(i, cell)| {
            cell_period(cell)
                .filter(|p| labels_match(p, &target, granularity))
                .map(|_| i)
        });
        let Some(row) = row else {
            report.keys_not_found.push(period_label.to_string());
            return Ok(report);
        };

        let mut updates: Vec<CellUpdate> = Vec::new();
        for (attribute, value) in values {
            let Some(&col) = attribute_columns.get(attribute) else {
                report.keys_not_found.push(attribute.clone());
                continue;
            };
            if protected.is_protected(row, col) {
                continue;
            }
            updates.push(CellUpdate {
                row,
                col,
                value: GridValue::Number(*value),
            });
            report.cells_written += 1;
        }

        self.commit(doc, &fingerprint, false, updates).await?;

        info!(
            period = period_label,
            cells_written = report.cells_written,
            keys_not_found = report.keys_not_found.len(),
            "period-row sync pass complete"
        );
        Ok(report)
    }

    /// Re-check the fingerprint and apply the batch. A changed fingerprint
    /// means something external edited the document mid-pass: abort with no
    /// partial writes.
    async fn commit(
        &self,
        doc: &dyn GridDocument,
        fingerprint: &str,
        include_header: bool,
        updates: Vec<CellUpdate>,
    ) -> Result<()> {
        let mut regions: Vec<Vec<GridValue>> = Vec::new();
        if include_header {
            regions.push(with_retry(&self.retry, "header re-scan", || doc.read_row(0)).await?);
        }
        regions.push(with_retry(&self.retry, "label re-scan", || doc.read_column(0)).await?);
        let region_refs: Vec<&Vec<GridValue>> = regions.iter().collect();
        let current = fingerprint_of(&region_refs);

        if current != *fingerprint {
            return Err(PipelineError::ConcurrencyConflict(
                "document labels changed between scan and write".to_string(),
            ));
        }

        if updates.is_empty() {
            return Ok(());
        }
        with_retry(&self.retry, "write batch", || doc.apply(&updates)).await
    }
}

/// SHA-256 fingerprint over the label regions a pass depends on.
fn fingerprint_of(regions: &[&Vec<GridValue>]) -> String {
    let mut hasher = Sha256::new();
    for region in regions {
        for cell in region.iter() {
            hasher.update(cell.canonical_token().as_bytes());
            hasher.update(b"|");
        }
        hasher.update(b";");
    }
    hex::encode(hasher.finalize())
}

fn sorted(map: &HashMap<String, f64>) -> Vec<(&String, &f64)> {
    let mut pairs: Vec<_> = map.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn text(s: &str) -> GridValue {
        GridValue::Text(s.to_string())
    }

    fn adapter() -> GridSyncAdapter {
        GridSyncAdapter::new(RetryPolicy {
            attempts: 3,
            initial_backoff_ms: 1,
        })
    }

    /// Entity-rows document: one period column holding stale values.
    fn entity_doc() -> InMemoryGrid {
        InMemoryGrid::from_rows(vec![
            vec![text("entity"), GridValue::Date(date(2026, 1, 1))],
            vec![text("Alpha"), GridValue::Number(5.0)],
            vec![text("Beta"), GridValue::Number(7.0)],
            vec![text("Gamma"), GridValue::Number(3.0)],
        ])
    }

    #[tokio::test]
    async fn clear_then_write_blanks_stale_rows_and_keeps_protected() {
        let doc = entity_doc();
        let mut protected = ProtectedCells::new();
        protected.protect_cell(3, 1); // Gamma's cell is formula-owned

        let columns = vec![ColumnData {
            period_label: "2026-01".to_string(),
            values: HashMap::from([("alpha".to_string(), 10.0)]),
        }];

        let report = adapter()
            .sync_entity_rows(&doc, &protected, PeriodGranularity::Monthly, &columns)
            .await
            .expect("sync");

        assert_eq!(doc.get(1, 1), GridValue::Number(10.0));
        assert_eq!(doc.get(2, 1), GridValue::Blank); // stale Beta cleared
        assert_eq!(doc.get(3, 1), GridValue::Number(3.0)); // protected unchanged
        assert_eq!(report.cells_written, 1);
        assert_eq!(report.cells_cleared, 1);
        assert!(report.keys_not_found.is_empty());
    }

    #[tokio::test]
    async fn rows_resolve_by_name_not_position() {
        // Same data, rows manually reordered since the last pass.
        let doc = InMemoryGrid::from_rows(vec![
            vec![text("entity"), GridValue::Date(date(2026, 1, 1))],
            vec![text("Beta"), GridValue::Number(7.0)],
            vec![text("Alpha"), GridValue::Number(5.0)],
        ]);

        let columns = vec![ColumnData {
            period_label: "2026-01".to_string(),
            values: HashMap::from([("alpha".to_string(), 10.0), ("beta".to_string(), 20.0)]),
        }];

        adapter()
            .sync_entity_rows(&doc, &ProtectedCells::new(), PeriodGranularity::Monthly, &columns)
            .await
            .expect("sync");

        assert_eq!(doc.get(1, 1), GridValue::Number(20.0));
        assert_eq!(doc.get(2, 1), GridValue::Number(10.0));
    }

    #[tokio::test]
    async fn missing_keys_are_reported_not_fatal() {
        let doc = entity_doc();
        let columns = vec![
            ColumnData {
                period_label: "2027-06".to_string(), // no such column
                values: HashMap::from([("alpha".to_string(), 1.0)]),
            },
            ColumnData {
                period_label: "2026-01".to_string(),
                values: HashMap::from([("delta".to_string(), 2.0)]), // no such row
            },
        ];

        let report = adapter()
            .sync_entity_rows(&doc, &ProtectedCells::new(), PeriodGranularity::Monthly, &columns)
            .await
            .expect("sync");

        assert!(report.keys_not_found.contains(&"2027-06".to_string()));
        assert!(report.keys_not_found.contains(&"2026-01:delta".to_string()));
        assert_eq!(report.cells_written, 0);
    }

    #[tokio::test]
    async fn header_serial_dates_resolve_like_native_dates() {
        // Same column labeled with a numeric date serial for 2026-01-01.
        let doc = InMemoryGrid::from_rows(vec![
            vec![text("entity"), GridValue::Number(46023.0)],
            vec![text("Alpha"), GridValue::Blank],
        ]);

        let columns = vec![ColumnData {
            period_label: "2026-01".to_string(),
            values: HashMap::from([("alpha".to_string(), 42.0)]),
        }];

        let report = adapter()
            .sync_entity_rows(&doc, &ProtectedCells::new(), PeriodGranularity::Monthly, &columns)
            .await
            .expect("sync");
        assert_eq!(report.cells_written, 1);
        assert_eq!(doc.get(1, 1), GridValue::Number(42.0));
    }

    #[tokio::test]
    async fn period_row_layout_writes_fixed_columns_skipping_protected() {
        let doc = InMemoryGrid::from_rows(vec![
            vec![text("period"), text("temp"), text("precip")],
            vec![GridValue::Date(date(2026, 1, 15)), GridValue::Blank, GridValue::Blank],
            vec![GridValue::Date(date(2026, 1, 22)), GridValue::Blank, GridValue::Blank],
        ]);

        let mut protected = ProtectedCells::new();
        protected.protect_col(2);

        let columns = HashMap::from([
            ("temp_mean_c".to_string(), 1usize),
            ("precip_total_mm".to_string(), 2usize),
        ]);
        let values = BTreeMap::from([
            ("temp_mean_c".to_string(), 1.5),
            ("precip_total_mm".to_string(), 4.0),
            ("unknown_attr".to_string(), 9.9),
        ]);

        let report = adapter()
            .sync_period_row(
                &doc,
                &protected,
                PeriodGranularity::Weekly,
                "2026-01-15",
                &columns,
                &values,
            )
            .await
            .expect("sync");

        assert_eq!(doc.get(1, 1), GridValue::Number(1.5));
        assert_eq!(doc.get(1, 2), GridValue::Blank); // protected column untouched
        assert_eq!(doc.get(2, 1), GridValue::Blank); // other period row untouched
        assert_eq!(report.cells_written, 1);
        assert_eq!(report.keys_not_found, vec!["unknown_attr".to_string()]);
    }

    #[tokio::test]
    async fn period_row_requires_an_exact_match() {
        let doc = InMemoryGrid::from_rows(vec![
            vec![text("period"), text("temp")],
            vec![GridValue::Date(date(2026, 1, 15)), GridValue::Blank],
        ]);

        let columns = HashMap::from([("temp_mean_c".to_string(), 1usize)]);
        let values = BTreeMap::from([("temp_mean_c".to_string(), 1.5)]);

        // Same month, different day: no match at weekly granularity.
        let report = adapter()
            .sync_period_row(
                &doc,
                &ProtectedCells::new(),
                PeriodGranularity::Weekly,
                "2026-01-08",
                &columns,
                &values,
            )
            .await
            .expect("sync");

        assert_eq!(report.cells_written, 0);
        assert_eq!(report.keys_not_found, vec!["2026-01-08".to_string()]);
    }

    /// Mutates a header label between the initial scan and the commit
    /// re-scan, simulating a concurrent external edit.
    struct TamperedGrid {
        inner: InMemoryGrid,
        header_reads: AtomicUsize,
    }

    #[async_trait]
    impl GridDocument for TamperedGrid {
        async fn dimensions(&self) -> Result<(usize, usize)> {
            self.inner.dimensions().await
        }

        async fn read_row(&self, row: usize) -> Result<Vec<GridValue>> {
            if row == 0 && self.header_reads.fetch_add(1, Ordering::SeqCst) == 1 {
                self.inner.set(0, 1, text("2030-12"));
            }
            self.inner.read_row(row).await
        }

        async fn read_column(&self, col: usize) -> Result<Vec<GridValue>> {
            self.inner.read_column(col).await
        }

        async fn apply(&self, updates: &[CellUpdate]) -> Result<()> {
            self.inner.apply(updates).await
        }
    }

    #[tokio::test]
    async fn concurrent_modification_aborts_with_no_partial_write() {
        let doc = TamperedGrid {
            inner: entity_doc(),
            header_reads: AtomicUsize::new(0),
        };

        let columns = vec![ColumnData {
            period_label: "2026-01".to_string(),
            values: HashMap::from([("alpha".to_string(), 10.0)]),
        }];

        let err = adapter()
            .sync_entity_rows(&doc, &ProtectedCells::new(), PeriodGranularity::Monthly, &columns)
            .await
            .expect_err("must abort");
        assert!(matches!(err, PipelineError::ConcurrencyConflict(_)));

        // Nothing was written or cleared.
        assert_eq!(doc.inner.get(1, 1), GridValue::Number(5.0));
        assert_eq!(doc.inner.get(2, 1), GridValue::Number(7.0));
    }

    /// Fails the first N reads of the header row with a transient error.
    struct FlakyGrid {
        inner: InMemoryGrid,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl GridDocument for FlakyGrid {
        async fn dimensions(&self) -> Result<(usize, usize)> {
            self.inner.dimensions().await
        }

        async fn read_row(&self, row: usize) -> Result<Vec<GridValue>> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(PipelineError::TransientExtraction(
                    "simulated timeout".to_string(),
                ));
            }
            self.inner.read_row(row).await
        }

        async fn read_column(&self, col: usize) -> Result<Vec<GridValue>> {
            self.inner.read_column(col).await
        }

        async fn apply(&self, updates: &[CellUpdate]) -> Result<()> {
            self.inner.apply(updates).await
        }
    }

    #[tokio::test]
    async fn transient_read_failures_are_retried_within_bounds() {
        let doc = FlakyGrid {
            inner: entity_doc(),
            failures_left: AtomicUsize::new(2),
        };

        let columns = vec![ColumnData {
            period_label: "2026-01".to_string(),
            values: HashMap::from([("alpha".to_string(), 10.0)]),
        }];

        let report = adapter()
            .sync_entity_rows(&doc, &ProtectedCells::new(), PeriodGranularity::Monthly, &columns)
            .await
            .expect("third attempt succeeds");
        assert_eq!(report.cells_written, 1);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_only_that_unit() {
        let doc = FlakyGrid {
            inner: entity_doc(),
            failures_left: AtomicUsize::new(10),
        };

        let err = adapter()
            .sync_entity_rows(&doc, &ProtectedCells::new(), PeriodGranularity::Monthly, &[])
            .await
            .expect_err("retries exhausted");
        assert!(matches!(err, PipelineError::TransientExtraction(_)));
    }
}
