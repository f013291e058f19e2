//! Trailing rolling statistics per entity.
//!
//! Nulls are absent, not zero: a null in the window contributes to neither
//! the sum nor the denominator.

use std::collections::HashMap;

use crate::models::StandardizedRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct RollingStat {
    pub entity_key: String,
    /// Periods actually inspected (<= the requested window).
    pub periods_in_window: usize,
    /// Non-null values inside the window.
    pub present_count: usize,
    pub sum: Option<f64>,
    pub average: Option<f64>,
}

/// Trailing rolling average/sum of `metric` over the last `window` periods
/// per entity. Records are expected to hold one row per (entity, period);
/// pre-filter to a single source before calling. Period tokens are assumed
/// to sort chronologically (ISO dates, `MYyyyy`).
pub fn trailing(
    records: &[StandardizedRecord],
    metric: &str,
    window: usize,
) -> HashMap<String, RollingStat> {
    let mut by_entity: HashMap<&str, Vec<(&str, Option<f64>)>> = HashMap::new();
    for record in records {
        by_entity
            .entry(record.entity_key.as_str())
            .or_default()
            .push((record.period.as_str(), record.metric(metric)));
    }

    let mut out = HashMap::with_capacity(by_entity.len());
    for (entity, mut series) in by_entity {
        series.sort_by(|a, b| a.0.cmp(b.0));
        let tail: Vec<_> = series
            .iter()
            .rev()
            .take(window)
            .filter_map(|(_, v)| *v)
            .collect();

        let periods_in_window = series.len().min(window);
        let present_count = tail.len();
        let sum = (!tail.is_empty()).then(|| tail.iter().sum::<f64>());
        let average = sum.map(|s| s / present_count as f64);

        out.insert(
            entity.to_string(),
            RollingStat {
                entity_key: entity.to_string(),
                periods_in_window,
                present_count,
                sum,
                average,
            },
        );
    }
    out
}
