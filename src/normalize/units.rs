//! Paired unit derivation.
//!
//! Conversions use only the current record's own fields. A derived variant is
//! written only when its metric is absent, so re-running derivation is a
//! no-op and collected values are never overwritten by computed ones.

use std::collections::BTreeMap;

const MM_PER_INCH: f64 = 25.4;

/// Tonnes per bushel, by commodity (standard test weights).
fn tonnes_per_bushel(commodity: &str) -> Option<f64> {
    match commodity {
        "corn" | "sorghum" | "rye" => Some(0.025401),
        "wheat" | "soybeans" => Some(0.027216),
        "barley" => Some(0.021772),
        "oats" => Some(0.014515),
        _ => None,
    }
}

/// Density in tonnes per kiloliter, for mass/volume commodity pairs.
fn density_t_per_kl(commodity: &str) -> Option<f64> {
    match commodity {
        "soyoil" | "palm-oil" | "canola-oil" => Some(0.917),
        "ethanol" => Some(0.789),
        _ => None,
    }
}

/// Derive paired unit variants in place.
pub fn derive_unit_pairs(metrics: &mut BTreeMap<String, Option<f64>>, commodity: Option<&str>) {
    let mut derived: Vec<(String, Option<f64>)> = Vec::new();

    for (name, value) in metrics.iter() {
        let Some(v) = value else { continue };

        if let Some(stem) = name.strip_suffix("_c") {
            derived.push((format!("{}_f", stem), Some(v * 9.0 / 5.0 + 32.0)));
        } else if let Some(stem) = name.strip_suffix("_f") {
            derived.push((format!("{}_c", stem), Some((v - 32.0) * 5.0 / 9.0)));
        } else if let Some(stem) = name.strip_suffix("_mm") {
            derived.push((format!("{}_in", stem), Some(v / MM_PER_INCH)));
        } else if let Some(stem) = name.strip_suffix("_in") {
            derived.push((format!("{}_mm", stem), Some(v * MM_PER_INCH)));
        } else if let Some(stem) = name.strip_suffix("_bu") {
            if let Some(factor) = commodity.and_then(tonnes_per_bushel) {
                derived.push((format!("{}_tonnes", stem), Some(v * factor)));
            }
        } else if let Some(stem) = name.strip_suffix("_tonnes") {
            if let Some(factor) = commodity.and_then(tonnes_per_bushel) {
                derived.push((format!("{}_bu", stem), Some(v / factor)));
            }
            if let Some(density) = commodity.and_then(density_t_per_kl) {
                derived.push((format!("{}_kl", stem), Some(v / density)));
            }
        } else if let Some(stem) = name.strip_suffix("_kl") {
            if let Some(density) = commodity.and_then(density_t_per_kl) {
                derived.push((format!("{}_tonnes", stem), Some(v * density)));
            }
        }
    }

    for (name, value) in derived {
        metrics.entry(name).or_insert(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(pairs: &[(&str, f64)]) -> BTreeMap<String, Option<f64>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(*v)))
            .collect()
    }

    #[test]
    fn temperature_and_precip_pairs() {
        let mut m = metrics(&[("temp_mean_c", 10.0), ("precip_total_mm", 25.4)]);
        derive_unit_pairs(&mut m, None);
        assert_eq!(m.get("temp_mean_f"), Some(&Some(50.0)));
        assert_eq!(m.get("precip_total_in"), Some(&Some(1.0)));
    }

    #[test]
    fn bushel_conversion_is_commodity_specific() {
        let mut m = metrics(&[("production_bu", 1000.0)]);
        derive_unit_pairs(&mut m, Some("corn"));
        let tonnes = m.get("production_tonnes").copied().flatten().unwrap();
        assert!((tonnes - 25.401).abs() < 1e-9);

        let mut m = metrics(&[("production_bu", 1000.0)]);
        derive_unit_pairs(&mut m, Some("kumquats"));
        assert!(!m.contains_key("production_tonnes"));
    }

    #[test]
    fn mass_volume_pair_uses_density() {
        let mut m = metrics(&[("output_tonnes", 917.0)]);
        derive_unit_pairs(&mut m, Some("soyoil"));
        let kl = m.get("output_kl").copied().flatten().unwrap();
        assert!((kl - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn collected_values_are_never_overwritten() {
        let mut m = metrics(&[("temp_mean_c", 10.0), ("temp_mean_f", 49.0)]);
        derive_unit_pairs(&mut m, None);
        // Collected 49.0 wins over the computed 50.0.
        assert_eq!(m.get("temp_mean_f"), Some(&Some(49.0)));
    }

    #[test]
    fn rerun_is_a_noop() {
        let mut m = metrics(&[("temp_mean_c", 10.0)]);
        derive_unit_pairs(&mut m, None);
        let once = m.clone();
        derive_unit_pairs(&mut m, None);
        assert_eq!(m, once);
    }
}
