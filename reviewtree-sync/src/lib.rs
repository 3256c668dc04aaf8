pub mod config;
pub mod store;

pub use store::coordinator::{
    DeleteOutcome, FileCreated, Outcome, ReconcileReport, RenameOutcome, SyncCoordinator,
};
pub use store::error::{ErrorKind, StoreError};
