//! Read-time aggregation over caller-supplied standardized records.
//!
//! Nothing here is persisted; every view is a pure derivation so it can be
//! recomputed from the silver layer at any time.

pub mod ranking;
pub mod rolling;
pub mod yoy;

pub use ranking::{rank_and_share, RankedRow};
pub use rolling::{trailing, RollingStat};
pub use yoy::{year_over_year, YoyRow};
