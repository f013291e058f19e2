//! Weather readings: one station, one period, a nested array of daily entries.
//!
//! Container shape:
//! ```json
//! {
//!   "station": "L1",
//!   "period": "2026-01-15",
//!   "days": [
//!     {"date": "2026-01-15", "tmax_c": 4.0, "tmin_c": -3.0, "precip_mm": 2.5}
//!   ]
//! }
//! ```
//! Daily entries are aggregated to the period: max of highs, min of lows,
//! mean of daily midpoints, precipitation summed. Days missing a field simply
//! do not contribute to that aggregate.

use serde_json::Value;

use super::super::extract::{get_f64, get_str, normalize_component, ExtractedFields, SourceExtractor};

pub struct WxDailyExtractor;

impl SourceExtractor for WxDailyExtractor {
    fn source_id(&self) -> &'static str {
        "wx_daily"
    }

    fn check_container(&self, payload: &Value) -> Result<(), String> {
        let obj = payload
            .as_object()
            .ok_or_else(|| "expected an object".to_string())?;
        match obj.get("days") {
            Some(Value::Array(_)) => Ok(()),
            Some(_) => Err("'days' must be an array of daily entries".to_string()),
            None => Err("missing 'days' array".to_string()),
        }
    }

    fn extract(&self, payload: &Value) -> ExtractedFields {
        let mut fields = ExtractedFields::default();

        fields.entity_key = get_str(payload, "station").map(normalize_component);
        fields.period = get_str(payload, "period").map(|s| s.to_string());

        let days = payload
            .get("days")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut highs = Vec::new();
        let mut lows = Vec::new();
        let mut mids = Vec::new();
        let mut precip = Vec::new();

        for day in &days {
            let tmax = get_f64(day, "tmax_c");
            let tmin = get_f64(day, "tmin_c");
            if let Some(v) = tmax {
                highs.push(v);
            }
            if let Some(v) = tmin {
                lows.push(v);
            }
            if let (Some(hi), Some(lo)) = (tmax, tmin) {
                mids.push((hi + lo) / 2.0);
            }
            if let Some(v) = get_f64(day, "precip_mm") {
                precip.push(v);
            }
        }

        fields.metrics.insert(
            "temp_max_c".to_string(),
            highs.iter().cloned().reduce(f64::max),
        );
        fields.metrics.insert(
            "temp_min_c".to_string(),
            lows.iter().cloned().reduce(f64::min),
        );
        fields.metrics.insert(
            "temp_mean_c".to_string(),
            if mids.is_empty() {
                None
            } else {
                Some(mids.iter().sum::<f64>() / mids.len() as f64)
            },
        );
        fields.metrics.insert(
            "precip_total_mm".to_string(),
            if precip.is_empty() {
                None
            } else {
                Some(precip.iter().sum())
            },
        );

        fields
    }
}
