//! Source-dispatch normalizer: bronze -> silver.
//!
//! Each unprocessed raw record is dispatched by source to its registered
//! extractor, unit pairs are derived from the record's own fields, the
//! quality flag is resolved, and the result is upserted into the silver
//! layer. One record's failure is recorded on that record and never aborts
//! the batch.

pub mod extract;
pub mod quality;
pub mod silver;
pub mod sources;
pub mod units;

pub use extract::{ExtractedFields, SourceExtractor, SourceRegistry};
pub use silver::SilverStore;

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::ingest::IngestGateway;
use crate::models::{RawRecord, StandardizedRecord};

/// Counts for one normalize pass. Failed records keep their
/// `processing_error` and are retried on the next pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeReport {
    pub processed_count: usize,
    pub error_count: usize,
}

pub struct Normalizer {
    gateway: Arc<IngestGateway>,
    silver: SilverStore,
    registry: Arc<SourceRegistry>,
}

impl Normalizer {
    pub fn new(gateway: Arc<IngestGateway>, silver: SilverStore, registry: Arc<SourceRegistry>) -> Self {
        Self {
            gateway,
            silver,
            registry,
        }
    }

    /// Run one normalize pass over up to `batch_limit` unprocessed records.
    pub async fn normalize(&self, batch_limit: usize) -> Result<NormalizeReport> {
        let batch = self.gateway.unprocessed(batch_limit)?;
        let mut processed_count = 0usize;
        let mut error_count = 0usize;

        for raw in &batch {
            match self.standardize(raw) {
                Ok(record) => {
                    self.silver.upsert(&record)?;
                    self.gateway.mark_processed(&raw.source, &raw.natural_key)?;
                    processed_count += 1;
                }
                Err(PipelineError::TransientExtraction(detail)) => {
                    warn!(
                        source = %raw.source,
                        lineage = %raw.lineage_id,
                        error = %detail,
                        "extraction failed, record left for retry"
                    );
                    self.gateway
                        .record_processing_error(&raw.source, &raw.natural_key, &detail)?;
                    error_count += 1;
                }
                // Connection-level failures abort the whole run.
                Err(e) => return Err(e),
            }
        }

        info!(processed_count, error_count, "normalize pass complete");
        Ok(NormalizeReport {
            processed_count,
            error_count,
        })
    }

    /// Pure standardization of one raw record.
    ///
    /// Deterministic for a given payload: running it twice yields the same
    /// metrics, flag, and lineage, so the silver upsert becomes a no-op.
    pub fn standardize(&self, raw: &RawRecord) -> Result<StandardizedRecord> {
        let extractor = self.registry.get(&raw.source).ok_or_else(|| {
            PipelineError::TransientExtraction(format!("no extractor for source '{}'", raw.source))
        })?;

        let fields = extractor.extract(&raw.payload);

        let entity_key = fields.entity_key.ok_or_else(|| {
            PipelineError::TransientExtraction("payload missing entity identity".to_string())
        })?;
        let period = fields.period.ok_or_else(|| {
            PipelineError::TransientExtraction("payload missing period".to_string())
        })?;

        let mut metrics = fields.metrics;
        units::derive_unit_pairs(&mut metrics, fields.commodity.as_deref());
        let quality_flag = quality::resolve_quality(&metrics, fields.quality);

        let now = Utc::now();
        Ok(StandardizedRecord {
            entity_key,
            period,
            source: raw.source.clone(),
            metrics,
            quality_flag,
            lineage_id: raw.lineage_id.clone(),
            created_at: now,
            updated_at: now,
        })
    }
}
