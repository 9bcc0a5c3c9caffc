//! Application service: one operation per API action, each bounded by the
//! same time budget.

use std::future::Future;
use std::time::Duration;

use time::Date;

use icu_api::ApiError;
use icu_storage::{
    AdmissionRequest, AuditLogEntry, DynRepository, LabResult, NewAuditLogEntry, Patient,
    ResultSubmission, SearchRecord, StorageError,
};

/// Default per-call budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{operation} exceeded the {}ms budget", .after.as_millis())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Maps to an API error, prefixing server-side failures with `context`.
    pub fn into_api_error(self, context: &str) -> ApiError {
        match self {
            ServiceError::Validation(msg) => ApiError::bad_request(msg),
            ServiceError::Timeout { .. } => ApiError::gateway_timeout(format!("{context}: {self}")),
            ServiceError::Storage(err) if err.is_not_found() => {
                ApiError::not_found(format!("Data not found: {err}"))
            }
            ServiceError::Storage(err) => ApiError::internal(format!("{context}: {err}")),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        err.into_api_error("Request failed")
    }
}

/// Wraps a repository and applies the request budget to every call.
#[derive(Clone)]
pub struct IcuService {
    repository: DynRepository,
    timeout: Duration,
}

impl IcuService {
    pub fn new(repository: DynRepository, timeout: Duration) -> Self {
        Self {
            repository,
            timeout,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.repository.backend_name()
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(|err| {
                tracing::debug!(operation, category = %err.category(), error = %err, "Storage call failed");
                ServiceError::from(err)
            }),
            Err(_) => {
                tracing::warn!(operation, timeout_ms = %self.timeout.as_millis(), "Storage call timed out");
                Err(ServiceError::Timeout {
                    operation,
                    after: self.timeout,
                })
            }
        }
    }

    pub async fn search(&self, registration_code: &str) -> Result<SearchRecord, ServiceError> {
        self.bounded(
            "search",
            self.repository.find_by_registration_code(registration_code),
        )
        .await
    }

    /// Both documents must be non-empty; nothing is stored otherwise.
    pub async fn submit_result(&self, submission: &ResultSubmission) -> Result<(), ServiceError> {
        if submission.patient.is_empty() {
            return Err(ServiceError::validation("patient data cannot be empty"));
        }
        if submission.result.is_empty() {
            return Err(ServiceError::validation("result data cannot be empty"));
        }
        self.bounded("submit_result", self.repository.save_result(submission))
            .await
    }

    pub async fn list_logs(&self, date: Date, limit: i64) -> Result<Vec<AuditLogEntry>, ServiceError> {
        self.bounded("list_logs", self.repository.list_logs(date, limit))
            .await
    }

    pub async fn record_audit(&self, entry: &NewAuditLogEntry) -> Result<(), ServiceError> {
        self.bounded("record_audit", self.repository.save_log(entry))
            .await
    }

    pub async fn report(&self) -> Result<Vec<LabResult>, ServiceError> {
        self.bounded("report", self.repository.report()).await
    }

    pub async fn admit(&self, request: &AdmissionRequest) -> Result<String, ServiceError> {
        if request.medical_record_no.trim().is_empty() {
            return Err(ServiceError::validation("no_rm is required"));
        }
        let code = self
            .bounded("admit", self.repository.admit(request))
            .await?;
        tracing::info!(registration_code = %code, "Patient admitted");
        Ok(code)
    }

    pub async fn list_patients(&self, limit: i64) -> Result<Vec<Patient>, ServiceError> {
        self.bounded("list_patients", self.repository.list_patients(limit))
            .await
    }
}
