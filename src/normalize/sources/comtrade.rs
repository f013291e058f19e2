//! Trade statistics: flow rows for one reporter/commodity/period.
//!
//! Container shape:
//! ```json
//! {
//!   "reporter": "BRAZIL",
//!   "commodity": "SOYBEANS",
//!   "period": "2026-01",
//!   "rows": [
//!     {"flow": "export", "netweight_kg": 1.2e9, "trade_value_usd": 5.4e8}
//!   ]
//! }
//! ```
//! Multiple rows for the same flow are summed (partner-level detail arrives
//! pre-split). Net weight is standardized to tonnes.

use serde_json::Value;

use super::super::extract::{get_f64, get_str, normalize_component, ExtractedFields, SourceExtractor};

pub struct ComtradeExtractor;

impl SourceExtractor for ComtradeExtractor {
    fn source_id(&self) -> &'static str {
        "comtrade"
    }

    fn check_container(&self, payload: &Value) -> Result<(), String> {
        let obj = payload
            .as_object()
            .ok_or_else(|| "expected an object".to_string())?;
        match obj.get("rows") {
            Some(Value::Array(_)) => Ok(()),
            Some(_) => Err("'rows' must be an array of flow entries".to_string()),
            None => Err("missing 'rows' array".to_string()),
        }
    }

    fn extract(&self, payload: &Value) -> ExtractedFields {
        let mut fields = ExtractedFields::default();

        let commodity = get_str(payload, "commodity").map(normalize_component);
        let reporter = get_str(payload, "reporter").map(normalize_component);

        fields.entity_key = match (&commodity, &reporter) {
            (Some(c), Some(r)) => Some(format!("{}:{}", c, r)),
            _ => None,
        };
        fields.commodity = commodity;
        fields.period = get_str(payload, "period").map(|s| s.to_string());

        let rows = payload
            .get("rows")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut export_kg: Option<f64> = None;
        let mut export_usd: Option<f64> = None;
        let mut import_kg: Option<f64> = None;
        let mut import_usd: Option<f64> = None;

        for row in &rows {
            let kg = get_f64(row, "netweight_kg");
            let usd = get_f64(row, "trade_value_usd");
            match get_str(row, "flow").map(str::to_lowercase).as_deref() {
                Some("export") => {
                    accumulate(&mut export_kg, kg);
                    accumulate(&mut export_usd, usd);
                }
                Some("import") => {
                    accumulate(&mut import_kg, kg);
                    accumulate(&mut import_usd, usd);
                }
                _ => {}
            }
        }

        fields
            .metrics
            .insert("export_tonnes".to_string(), export_kg.map(|v| v / 1000.0));
        fields
            .metrics
            .insert("export_value_usd".to_string(), export_usd);
        fields
            .metrics
            .insert("import_tonnes".to_string(), import_kg.map(|v| v / 1000.0));
        fields
            .metrics
            .insert("import_value_usd".to_string(), import_usd);

        fields
    }
}

/// Sum into an optional accumulator; `None` stays absent until a value arrives.
fn accumulate(acc: &mut Option<f64>, value: Option<f64>) {
    if let Some(v) = value {
        *acc = Some(acc.unwrap_or(0.0) + v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sums_flow_rows_and_standardizes_weight() {
        let payload = json!({
            "reporter": "BRAZIL",
            "commodity": "SOYBEANS",
            "period": "2026-01",
            "rows": [
                {"flow": "export", "netweight_kg": 1_000_000.0, "trade_value_usd": 450_000.0},
                {"flow": "export", "netweight_kg": 500_000.0, "trade_value_usd": 230_000.0},
                {"flow": "import", "netweight_kg": 20_000.0}
            ]
        });

        let fields = ComtradeExtractor.extract(&payload);
        assert_eq!(fields.entity_key.as_deref(), Some("soybeans:brazil"));
        assert_eq!(fields.metrics.get("export_tonnes"), Some(&Some(1500.0)));
        assert_eq!(
            fields.metrics.get("export_value_usd"),
            Some(&Some(680_000.0))
        );
        assert_eq!(fields.metrics.get("import_tonnes"), Some(&Some(20.0)));
        // No import value reported: absent, not zero.
        assert_eq!(fields.metrics.get("import_value_usd"), Some(&None));
    }

    #[test]
    fn empty_rows_yield_absent_metrics() {
        let payload = json!({
            "reporter": "BRAZIL",
            "commodity": "SOYBEANS",
            "period": "2026-01",
            "rows": []
        });

        let fields = ComtradeExtractor.extract(&payload);
        assert_eq!(fields.metrics.get("export_tonnes"), Some(&None));
    }
}
