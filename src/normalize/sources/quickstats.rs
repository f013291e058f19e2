//! Agricultural survey extracts: a flat keyed object per observation.
//!
//! Container shape:
//! ```json
//! {
//!   "commodity": "CORN",
//!   "location": "IOWA",
//!   "period": "MY2025",
//!   "statistic": "production",
//!   "value": "14,850",
//!   "unit": "BU",
//!   "quality": "(D)"        // optional free-text indicator
//! }
//! ```
//! Values arrive as strings with thousands separators; "(D)" marks a
//! disclosure-withheld value and "(NA)" a value that simply was not reported.

use serde_json::Value;

use crate::models::QualityFlag;

use super::super::extract::{get_str, normalize_component, parse_numeric, ExtractedFields, SourceExtractor};

pub struct QuickstatsExtractor;

impl QuickstatsExtractor {
    /// Map the source unit code to a metric-name suffix.
    fn unit_suffix(unit: &str) -> &'static str {
        match unit.to_uppercase().as_str() {
            "BU" | "BUSHELS" => "bu",
            "MT" | "TONNES" | "METRIC TONS" => "tonnes",
            "ACRES" => "acres",
            "PCT" | "PERCENT" => "pct",
            "USD" | "$" => "usd",
            _ => "value",
        }
    }
}

impl SourceExtractor for QuickstatsExtractor {
    fn source_id(&self) -> &'static str {
        "quickstats"
    }

    fn check_container(&self, payload: &Value) -> Result<(), String> {
        let obj = payload
            .as_object()
            .ok_or_else(|| "expected a flat JSON object".to_string())?;
        if obj.values().any(|v| v.is_array() || v.is_object()) {
            return Err("expected a flat object without nested containers".to_string());
        }
        Ok(())
    }

    fn extract(&self, payload: &Value) -> ExtractedFields {
        let mut fields = ExtractedFields::default();

        let commodity = get_str(payload, "commodity").map(normalize_component);
        let location = get_str(payload, "location").map(normalize_component);

        fields.entity_key = match (&commodity, &location) {
            (Some(c), Some(l)) => Some(format!("{}:{}", c, l)),
            (Some(c), None) => Some(c.clone()),
            _ => None,
        };
        fields.commodity = commodity;
        fields.period = get_str(payload, "period").map(|s| s.to_string());

        let statistic = get_str(payload, "statistic")
            .map(normalize_component)
            .unwrap_or_else(|| "value".to_string());
        let suffix = get_str(payload, "unit").map(Self::unit_suffix).unwrap_or("value");
        let metric_name = format!("{}_{}", statistic, suffix);

        let raw_value = get_str(payload, "value");
        let value = raw_value.and_then(parse_numeric);
        fields.metrics.insert(metric_name, value);

        // Source-marked quality: "(D)" in the value slot or a quality field.
        let marker = get_str(payload, "quality").or(raw_value).unwrap_or("");
        fields.quality = match marker.trim() {
            "(D)" => Some(QualityFlag::Withheld),
            "(E)" => Some(QualityFlag::Interpolated),
            _ => None,
        };

        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_flat_survey_row() {
        let payload = json!({
            "commodity": "CORN",
            "location": "IOWA",
            "period": "MY2025",
            "statistic": "production",
            "value": "14,850",
            "unit": "BU"
        });

        let fields = QuickstatsExtractor.extract(&payload);
        assert_eq!(fields.entity_key.as_deref(), Some("corn:iowa"));
        assert_eq!(fields.period.as_deref(), Some("MY2025"));
        assert_eq!(fields.metrics.get("production_bu"), Some(&Some(14850.0)));
        assert_eq!(fields.commodity.as_deref(), Some("corn"));
        assert!(fields.quality.is_none());
    }

    #[test]
    fn withheld_value_is_flagged_not_dropped() {
        let payload = json!({
            "commodity": "CORN",
            "location": "IOWA",
            "period": "MY2025",
            "statistic": "production",
            "value": "(D)",
            "unit": "BU"
        });

        let fields = QuickstatsExtractor.extract(&payload);
        assert_eq!(fields.metrics.get("production_bu"), Some(&None));
        assert_eq!(fields.quality, Some(QualityFlag::Withheld));
    }

    #[test]
    fn absent_fields_yield_none_never_an_error() {
        let fields = QuickstatsExtractor.extract(&json!({}));
        assert!(fields.entity_key.is_none());
        assert!(fields.period.is_none());
        assert_eq!(fields.metrics.get("value_value"), Some(&None));
    }

    #[test]
    fn container_check_rejects_nested_shapes() {
        assert!(QuickstatsExtractor.check_container(&json!({"a": 1})).is_ok());
        assert!(QuickstatsExtractor.check_container(&json!([1, 2])).is_err());
        assert!(QuickstatsExtractor
            .check_container(&json!({"days": [1, 2]}))
            .is_err());
    }
}
