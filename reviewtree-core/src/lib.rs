mod client;
mod payload;

pub use client::{ApiError, ApiErrorClass, CollectionsClient, CreatedRecord, Scope};
pub use payload::{record_key, records_from_payload};
