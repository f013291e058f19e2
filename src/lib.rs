//! Cropflow - agricultural observation pipeline
//! Ingest gateway -> normalizer -> silver layer, with read-time aggregation
//! views, estimate variance tracking, and grid document synchronization.

pub mod calendar;
pub mod error;
pub mod estimates;
pub mod gridsync;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod store;
pub mod views;

pub use error::{PipelineError, Result};
pub use store::Db;
