pub mod comtrade; // trade statistics rows with unit codes
pub mod quickstats; // flat keyed survey extracts
pub mod wx_daily; // nested arrays of daily weather entries

pub use comtrade::ComtradeExtractor;
pub use quickstats::QuickstatsExtractor;
pub use wx_daily::WxDailyExtractor;
