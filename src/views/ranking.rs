//! Within-period ranking and share-of-total.
//!
//! Rank is a total order: descending by value with ties broken by entity key,
//! so repeated runs produce identical orderings. Shares are computed over the
//! same non-null set used for ranking and sum to 100 within float tolerance.

use std::collections::HashMap;

use crate::models::StandardizedRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct RankedRow {
    pub entity_key: String,
    pub period: String,
    pub value: f64,
    /// 1-based position in the descending order.
    pub rank: usize,
    pub share_pct: f64,
}

/// Rank entities and compute share-of-total for `metric`, partitioned by
/// period. Callers supply one category's records; entities with a null value
/// for the metric are excluded from both rank and the share denominator.
pub fn rank_and_share(
    records: &[StandardizedRecord],
    metric: &str,
) -> HashMap<String, Vec<RankedRow>> {
    let mut partitions: HashMap<&str, Vec<(&str, f64)>> = HashMap::new();
    for record in records {
        if let Some(value) = record.metric(metric) {
            partitions
                .entry(record.period.as_str())
                .or_default()
                .push((record.entity_key.as_str(), value));
        }
    }

    let mut out = HashMap::with_capacity(partitions.len());
    for (period, mut members) in partitions {
        members.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });

        let total: f64 = members.iter().map(|(_, v)| v).sum();
        let rows = members
            .into_iter()
            .enumerate()
            .map(|(i, (entity, value))| RankedRow {
                entity_key: entity.to_string(),
                period: period.to_string(),
                value,
                rank: i + 1,
                share_pct: if total != 0.0 { value / total * 100.0 } else { 0.0 },
            })
            .collect();
        out.insert(period.to_string(), rows);
    }
    out
}
