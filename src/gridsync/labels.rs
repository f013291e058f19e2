//! Period-label resolution against document cells.
//!
//! The same column can hold a native date value in one cell and a numeric
//! date serial in the next, depending on who last edited the document. Both
//! must resolve, and matching happens at the coarsest granularity the
//! document actually uses: year+month for monthly documents, the exact date
//! for weekly ones.

use chrono::{Datelike, Duration, NaiveDate};

use crate::calendar::{parse_period_label, PeriodGranularity, PeriodLabel};

use super::document::GridValue;

/// Spreadsheet epoch for numeric date serials.
fn date_from_serial(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=200_000.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    Some(epoch + Duration::days(serial as i64))
}

/// Interpret one document cell as a period label.
pub(crate) fn cell_period(value: &GridValue) -> Option<PeriodLabel> {
    match value {
        GridValue::Date(d) => Some(PeriodLabel::Day(*d)),
        GridValue::Number(n) => date_from_serial(*n).map(PeriodLabel::Day),
        GridValue::Text(s) => parse_period_label(s),
        GridValue::Blank => None,
    }
}

/// Do two labels name the same period at the given granularity?
pub(crate) fn labels_match(a: &PeriodLabel, b: &PeriodLabel, granularity: PeriodGranularity) -> bool {
    match granularity {
        PeriodGranularity::Monthly => match (month_of(a), month_of(b)) {
            (Some(ma), Some(mb)) => ma == mb,
            _ => token_equal(a, b),
        },
        PeriodGranularity::Weekly => match (a, b) {
            (PeriodLabel::Day(da), PeriodLabel::Day(db)) => da == db,
            _ => token_equal(a, b),
        },
    }
}

fn month_of(label: &PeriodLabel) -> Option<(i32, u32)> {
    match label {
        PeriodLabel::Day(d) => Some((d.year(), d.month())),
        PeriodLabel::Month { year, month } => Some((*year, *month)),
        _ => None,
    }
}

fn token_equal(a: &PeriodLabel, b: &PeriodLabel) -> bool {
    match (a, b) {
        (PeriodLabel::Year(ya), PeriodLabel::Year(yb)) => ya == yb,
        (PeriodLabel::MarketingYear(ya), PeriodLabel::MarketingYear(yb)) => ya == yb,
        _ => false,
    }
}
