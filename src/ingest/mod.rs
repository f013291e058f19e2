pub mod gateway;
pub mod signature;

pub use gateway::{AuditEntry, IngestAck, IngestBatchReport, IngestGateway, IngestOutcome};
pub use signature::content_signature;
