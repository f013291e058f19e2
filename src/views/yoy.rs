//! Year-over-year comparison.
//!
//! The prior period is resolved by an explicit label lookup through the
//! commodity calendar, never a positional offset of -1, because period
//! labels are irregular tokens whose real calendar start varies by category.

use std::collections::HashMap;

use crate::calendar::CommodityCalendar;
use crate::models::StandardizedRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct YoyRow {
    pub entity_key: String,
    pub period: String,
    pub current: Option<f64>,
    pub prior_period: Option<String>,
    pub prior: Option<f64>,
    pub change_pct: Option<f64>,
}

/// Year-over-year change of `metric` for every record in the set, looking up
/// the prior value at the calendar-resolved prior label.
pub fn year_over_year(
    records: &[StandardizedRecord],
    metric: &str,
    calendar: &CommodityCalendar,
) -> Vec<YoyRow> {
    let by_key: HashMap<(&str, &str), Option<f64>> = records
        .iter()
        .map(|r| ((r.entity_key.as_str(), r.period.as_str()), r.metric(metric)))
        .collect();

    records
        .iter()
        .map(|record| {
            let current = record.metric(metric);
            let prior_period = calendar.prior_label(&record.period);
            let prior = prior_period.as_deref().and_then(|p| {
                by_key
                    .get(&(record.entity_key.as_str(), p))
                    .copied()
                    .flatten()
            });

            let change_pct = match (current, prior) {
                (Some(c), Some(p)) if p != 0.0 => Some((c - p) / p * 100.0),
                _ => None,
            };

            YoyRow {
                entity_key: record.entity_key.clone(),
                period: record.period.clone(),
                current,
                prior_period,
                prior,
                change_pct,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QualityFlag;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn record(entity: &str, period: &str, value: Option<f64>) -> StandardizedRecord {
        let mut metrics = BTreeMap::new();
        metrics.insert("production_tonnes".to_string(), value);
        StandardizedRecord {
            entity_key: entity.to_string(),
            period: period.to_string(),
            source: "quickstats".to_string(),
            metrics,
            quality_flag: QualityFlag::Ok,
            lineage_id: "test".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn prior_value_comes_from_the_resolved_label() {
        let calendar = CommodityCalendar::with_defaults();
        let records = vec![
            record("corn:iowa", "MY2024", Some(100.0)),
            record("corn:iowa", "MY2025", Some(110.0)),
        ];

        let rows = year_over_year(&records, "production_tonnes", &calendar);
        let current = rows.iter().find(|r| r.period == "MY2025").unwrap();
        assert_eq!(current.prior_period.as_deref(), Some("MY2024"));
        assert_eq!(current.prior, Some(100.0));
        assert!((current.change_pct.unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn missing_prior_yields_no_change_not_an_error() {
        let calendar = CommodityCalendar::with_defaults();
        let records = vec![record("corn:iowa", "MY2025", Some(110.0))];

        let rows = year_over_year(&records, "production_tonnes", &calendar);
        assert_eq!(rows[0].prior, None);
        assert_eq!(rows[0].change_pct, None);
    }

    #[test]
    fn gap_in_the_series_is_not_bridged_positionally() {
        // MY2023 exists but MY2024 does not; a positional -1 offset would
        // wrongly pair MY2025 with MY2023.
        let calendar = CommodityCalendar::with_defaults();
        let records = vec![
            record("corn:iowa", "MY2023", Some(90.0)),
            record("corn:iowa", "MY2025", Some(110.0)),
        ];

        let rows = year_over_year(&records, "production_tonnes", &calendar);
        let current = rows.iter().find(|r| r.period == "MY2025").unwrap();
        assert_eq!(current.prior_period.as_deref(), Some("MY2024"));
        assert_eq!(current.prior, None);
    }
}
