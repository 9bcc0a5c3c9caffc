//! The storage contract every gateway implements.

use std::sync::Arc;

use async_trait::async_trait;
use time::Date;

use crate::error::StorageError;
use crate::types::{
    AdmissionRequest, AuditLogEntry, LabResult, NewAuditLogEntry, Patient, ResultSubmission,
    SearchRecord,
};

/// Persistence gateway for patients, visits, lab results and audit logs.
///
/// Implementations must be thread-safe (`Send + Sync`); each call is
/// independent and nothing is retried.
#[async_trait]
pub trait IcuRepository: Send + Sync {
    /// Looks up the patient and visit behind a registration code.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` when no visit has the code.
    async fn find_by_registration_code(&self, code: &str) -> Result<SearchRecord, StorageError>;

    /// Appends a lab result. Both documents are stored as given.
    async fn save_result(&self, submission: &ResultSubmission) -> Result<(), StorageError>;

    /// Audit entries written on `date` (UTC), newest first, at most `limit`.
    async fn list_logs(&self, date: Date, limit: i64) -> Result<Vec<AuditLogEntry>, StorageError>;

    /// Appends an audit entry stamped with the current time.
    async fn save_log(&self, entry: &NewAuditLogEntry) -> Result<(), StorageError>;

    /// Every stored lab result, newest first.
    ///
    /// # Errors
    ///
    /// A single undecodable row fails the whole call.
    async fn report(&self) -> Result<Vec<LabResult>, StorageError>;

    /// Admits a patient: creates the patient if the medical-record number is
    /// new, then creates a visit under a fresh registration code. Both writes
    /// are atomic.
    ///
    /// Returns the generated registration code.
    async fn admit(&self, request: &AdmissionRequest) -> Result<String, StorageError>;

    /// Patients ordered by medical-record number, at most `limit`.
    async fn list_patients(&self, limit: i64) -> Result<Vec<Patient>, StorageError>;

    /// Short backend name for logging.
    fn backend_name(&self) -> &'static str;
}

/// Type alias for a shareable repository instance.
pub type DynRepository = Arc<dyn IcuRepository>;
