//! # icu-storage
//!
//! Storage contract for the ICU intake service.
//!
//! This crate defines the [`IcuRepository`] trait, the domain types it
//! exchanges and [`StorageError`]. It contains no implementation: the
//! PostgreSQL gateway lives in `icu-db-postgres`, the in-memory one in
//! `icu-db-memory`.
//!
//! ## Example
//!
//! ```ignore
//! use icu_storage::{IcuRepository, StorageError, SearchRecord};
//!
//! async fn lookup(repo: &dyn IcuRepository, code: &str) -> Result<SearchRecord, StorageError> {
//!     repo.find_by_registration_code(code).await
//! }
//! ```

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::{DynRepository, IcuRepository};
pub use types::{
    AdmissionRequest, AuditLogEntry, Document, LabResult, NewAuditLogEntry, Patient,
    REGISTRATION_CODE_PREFIX, ResultSubmission, SearchRecord, Visit, generate_registration_code,
};
