//! Plausible-domain range checks.
//!
//! A value outside its declared range flags the record `SUSPECT` but is never
//! dropped; downstream consumers decide what to do with flagged rows.

use std::collections::BTreeMap;

use tracing::debug;

use crate::models::QualityFlag;

/// Plausible range for a metric, selected by name suffix.
fn plausible_range(metric: &str) -> Option<(f64, f64)> {
    let suffix = metric.rsplit('_').next()?;
    match suffix {
        "c" => Some((-90.0, 60.0)),
        "f" => Some((-130.0, 140.0)),
        "mm" => Some((0.0, 12_000.0)),
        "in" => Some((0.0, 475.0)),
        "bu" => Some((0.0, 1.0e11)),
        "tonnes" => Some((0.0, 3.0e9)),
        "kl" => Some((0.0, 3.0e9)),
        "acres" => Some((0.0, 1.0e9)),
        "pct" => Some((0.0, 100.0)),
        "usd" => Some((0.0, 1.0e13)),
        _ => None,
    }
}

/// Resolve the quality flag for a record: the extractor's source-marked flag
/// wins; otherwise `OK` unless some value falls outside its plausible domain.
pub fn resolve_quality(
    metrics: &BTreeMap<String, Option<f64>>,
    source_marked: Option<QualityFlag>,
) -> QualityFlag {
    if let Some(flag) = source_marked {
        return flag;
    }

    for (name, value) in metrics {
        let Some(v) = value else { continue };
        if let Some((lo, hi)) = plausible_range(name) {
            if *v < lo || *v > hi {
                debug!(metric = %name, value = v, lo, hi, "value outside plausible domain");
                return QualityFlag::Suspect;
            }
        }
    }

    QualityFlag::Ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(pairs: &[(&str, Option<f64>)]) -> BTreeMap<String, Option<f64>> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn in_range_values_are_ok() {
        let m = metrics(&[("temp_mean_c", Some(21.5)), ("precip_total_mm", Some(80.0))]);
        assert_eq!(resolve_quality(&m, None), QualityFlag::Ok);
    }

    #[test]
    fn out_of_range_flags_suspect() {
        let m = metrics(&[("temp_mean_c", Some(85.0))]);
        assert_eq!(resolve_quality(&m, None), QualityFlag::Suspect);

        let m = metrics(&[("share_pct", Some(140.0))]);
        assert_eq!(resolve_quality(&m, None), QualityFlag::Suspect);
    }

    #[test]
    fn nulls_do_not_trip_the_check() {
        let m = metrics(&[("temp_mean_c", None)]);
        assert_eq!(resolve_quality(&m, None), QualityFlag::Ok);
    }

    #[test]
    fn source_marked_flag_wins() {
        let m = metrics(&[("production_bu", Some(-5.0))]);
        assert_eq!(
            resolve_quality(&m, Some(QualityFlag::Withheld)),
            QualityFlag::Withheld
        );
    }
}
