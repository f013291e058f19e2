//! Marketing-year and period-label configuration.
//!
//! Marketing-year start months vary by commodity and hemisphere, and label
//! conventions place the start year in either half of the label depending on
//! the region. Both are declarative per-commodity/per-region configuration;
//! nothing is inferred from label text.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// The granularity a grid document's period axis actually uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodGranularity {
    Monthly,
    Weekly,
}

/// Which calendar year a marketing-year label names: the year containing the
/// first half of the marketing year, or the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelYearConvention {
    StartYear,
    EndYear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketingYearSpec {
    /// First month of the marketing year (1-12).
    pub start_month: u32,
    pub label_year: LabelYearConvention,
}

impl Default for MarketingYearSpec {
    fn default() -> Self {
        // Calendar-year accounting unless configured otherwise.
        Self {
            start_month: 1,
            label_year: LabelYearConvention::StartYear,
        }
    }
}

/// A parsed period label token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodLabel {
    Year(i32),
    Month { year: i32, month: u32 },
    Day(NaiveDate),
    MarketingYear(i32),
}

/// Parse the period tokens the pipeline uses: `2026`, `2026-01`,
/// `2026-01-15`, `MY2025`.
pub fn parse_period_label(label: &str) -> Option<PeriodLabel> {
    let label = label.trim();

    if let Some(year) = label.strip_prefix("MY") {
        return year.parse().ok().map(PeriodLabel::MarketingYear);
    }
    if let Ok(date) = NaiveDate::parse_from_str(label, "%Y-%m-%d") {
        return Some(PeriodLabel::Day(date));
    }

    let parts: Vec<&str> = label.split('-').collect();
    match parts.as_slice() {
        [y] => y.parse().ok().map(PeriodLabel::Year),
        [y, m] => {
            let year: i32 = y.parse().ok()?;
            let month: u32 = m.parse().ok()?;
            (1..=12).contains(&month).then_some(PeriodLabel::Month { year, month })
        }
        _ => None,
    }
}

/// Declarative per-commodity/per-region marketing-year configuration.
pub struct CommodityCalendar {
    specs: HashMap<(String, String), MarketingYearSpec>,
    default_spec: MarketingYearSpec,
}

impl CommodityCalendar {
    pub fn new() -> Self {
        Self {
            specs: HashMap::new(),
            default_spec: MarketingYearSpec::default(),
        }
    }

    /// Calendar preloaded with the common grain conventions.
    pub fn with_defaults() -> Self {
        let mut cal = Self::new();
        // Northern hemisphere: label names the harvest (start) year.
        cal.register("corn", "us", MarketingYearSpec { start_month: 9, label_year: LabelYearConvention::StartYear });
        cal.register("soybeans", "us", MarketingYearSpec { start_month: 9, label_year: LabelYearConvention::StartYear });
        cal.register("wheat", "us", MarketingYearSpec { start_month: 6, label_year: LabelYearConvention::StartYear });
        // Southern hemisphere: harvest falls early in the calendar year and
        // the label names the year the marketing year ends in.
        cal.register("soybeans", "br", MarketingYearSpec { start_month: 2, label_year: LabelYearConvention::EndYear });
        cal.register("corn", "ar", MarketingYearSpec { start_month: 3, label_year: LabelYearConvention::EndYear });
        cal
    }

    pub fn register(&mut self, commodity: &str, region: &str, spec: MarketingYearSpec) {
        self.specs
            .insert((commodity.to_string(), region.to_string()), spec);
    }

    pub fn spec(&self, commodity: &str, region: &str) -> MarketingYearSpec {
        self.specs
            .get(&(commodity.to_string(), region.to_string()))
            .copied()
            .unwrap_or(self.default_spec)
    }

    /// Marketing-year label (`MY2025`) for a calendar date.
    pub fn marketing_year_label(&self, date: NaiveDate, commodity: &str, region: &str) -> String {
        let spec = self.spec(commodity, region);
        let start_year = if date.month() >= spec.start_month {
            date.year()
        } else {
            date.year() - 1
        };
        let label_year = match spec.label_year {
            LabelYearConvention::StartYear => start_year,
            LabelYearConvention::EndYear => start_year + 1,
        };
        format!("MY{}", label_year)
    }

    /// First calendar date of the marketing year a label names.
    pub fn marketing_year_start(
        &self,
        label: &str,
        commodity: &str,
        region: &str,
    ) -> Option<NaiveDate> {
        let PeriodLabel::MarketingYear(label_year) = parse_period_label(label)? else {
            return None;
        };
        let spec = self.spec(commodity, region);
        let start_year = match spec.label_year {
            LabelYearConvention::StartYear => label_year,
            LabelYearConvention::EndYear => label_year - 1,
        };
        NaiveDate::from_ymd_opt(start_year, spec.start_month, 1)
    }

    /// The prior-year label for a period token. This is an explicit label
    /// computation, never a positional offset into a record list.
    pub fn prior_label(&self, label: &str) -> Option<String> {
        match parse_period_label(label)? {
            PeriodLabel::Year(y) => Some(format!("{}", y - 1)),
            PeriodLabel::Month { year, month } => Some(format!("{:04}-{:02}", year - 1, month)),
            // Weekly series: the same reporting week one year earlier is 52
            // weeks back, keeping the weekday aligned.
            PeriodLabel::Day(d) => Some((d - chrono::Duration::days(364)).format("%Y-%m-%d").to_string()),
            PeriodLabel::MarketingYear(y) => Some(format!("MY{}", y - 1)),
        }
    }
}

impl Default for CommodityCalendar {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_period_tokens() {
        assert_eq!(parse_period_label("2026"), Some(PeriodLabel::Year(2026)));
        assert_eq!(
            parse_period_label("2026-01"),
            Some(PeriodLabel::Month { year: 2026, month: 1 })
        );
        assert_eq!(
            parse_period_label("2026-01-15"),
            Some(PeriodLabel::Day(date(2026, 1, 15)))
        );
        assert_eq!(
            parse_period_label("MY2025"),
            Some(PeriodLabel::MarketingYear(2025))
        );
        assert_eq!(parse_period_label("2026-13"), None);
        assert_eq!(parse_period_label("garbage"), None);
    }

    #[test]
    fn us_corn_label_names_the_start_year() {
        let cal = CommodityCalendar::with_defaults();
        // October 2025 falls in the year that started September 2025.
        assert_eq!(cal.marketing_year_label(date(2025, 10, 1), "corn", "us"), "MY2025");
        // July 2025 still belongs to the year that started September 2024.
        assert_eq!(cal.marketing_year_label(date(2025, 7, 1), "corn", "us"), "MY2024");
    }

    #[test]
    fn southern_hemisphere_label_names_the_end_year() {
        let cal = CommodityCalendar::with_defaults();
        // March 2025 starts Brazil's year labeled by its ending calendar year.
        assert_eq!(
            cal.marketing_year_label(date(2025, 3, 1), "soybeans", "br"),
            "MY2026"
        );
        assert_eq!(
            cal.marketing_year_start("MY2026", "soybeans", "br"),
            Some(date(2025, 2, 1))
        );
    }

    #[test]
    fn same_label_different_regions_resolve_differently() {
        let cal = CommodityCalendar::with_defaults();
        let us = cal.marketing_year_start("MY2025", "soybeans", "us").unwrap();
        let br = cal.marketing_year_start("MY2025", "soybeans", "br").unwrap();
        assert_eq!(us, date(2025, 9, 1));
        assert_eq!(br, date(2024, 2, 1));
    }

    #[test]
    fn prior_labels_are_explicit_lookups() {
        let cal = CommodityCalendar::with_defaults();
        assert_eq!(cal.prior_label("MY2025").as_deref(), Some("MY2024"));
        assert_eq!(cal.prior_label("2026-01").as_deref(), Some("2025-01"));
        assert_eq!(cal.prior_label("2026-01-16").as_deref(), Some("2025-01-17"));
        assert_eq!(cal.prior_label("not-a-period"), None);
    }
}
