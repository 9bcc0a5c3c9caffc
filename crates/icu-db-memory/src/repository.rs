use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use time::{Date, OffsetDateTime};
use tokio::sync::Mutex;

use icu_storage::{
    AdmissionRequest, AuditLogEntry, IcuRepository, LabResult, NewAuditLogEntry, Patient,
    ResultSubmission, SearchRecord, StorageError, Visit, generate_registration_code,
};

#[derive(Debug, Default)]
struct State {
    /// Keyed by medical-record number; BTreeMap keeps listing order ascending.
    patients: BTreeMap<String, Patient>,
    /// Keyed by registration code.
    visits: HashMap<String, Visit>,
    results: Vec<LabResult>,
    logs: Vec<AuditLogEntry>,
    next_result_id: i64,
    next_log_id: i64,
}

/// In-memory [`IcuRepository`].
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an audit entry with an explicit timestamp.
    pub async fn insert_log_at(&self, entry: &NewAuditLogEntry, created_at: OffsetDateTime) {
        let mut state = self.state.lock().await;
        state.next_log_id += 1;
        let id = state.next_log_id;
        state.logs.push(AuditLogEntry {
            id,
            created_at,
            endpoint: entry.endpoint.clone(),
            method: entry.method.clone(),
            status: entry.status,
            message: entry.message.clone(),
        });
    }

    /// Every audit entry in insertion order.
    pub async fn logs(&self) -> Vec<AuditLogEntry> {
        self.state.lock().await.logs.clone()
    }

    pub async fn patient_count(&self) -> usize {
        self.state.lock().await.patients.len()
    }

    pub async fn visit_count(&self) -> usize {
        self.state.lock().await.visits.len()
    }

    pub async fn result_count(&self) -> usize {
        self.state.lock().await.results.len()
    }
}

fn clamp_limit(limit: i64) -> usize {
    usize::try_from(limit).unwrap_or(0)
}

#[async_trait]
impl IcuRepository for InMemoryRepository {
    async fn find_by_registration_code(&self, code: &str) -> Result<SearchRecord, StorageError> {
        let state = self.state.lock().await;
        let visit = state
            .visits
            .get(code)
            .ok_or_else(|| StorageError::not_found("Visit", code))?;
        let patient = state
            .patients
            .get(&visit.medical_record_no)
            .ok_or_else(|| StorageError::not_found("Patient", &visit.medical_record_no))?;
        Ok(SearchRecord::from_parts(patient, visit))
    }

    async fn save_result(&self, submission: &ResultSubmission) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        state.next_result_id += 1;
        let id = state.next_result_id;
        state.results.push(LabResult {
            id,
            patient_data: submission.patient.clone(),
            result_data: submission.result.clone(),
        });
        Ok(())
    }

    async fn list_logs(&self, date: Date, limit: i64) -> Result<Vec<AuditLogEntry>, StorageError> {
        let state = self.state.lock().await;
        let mut logs: Vec<AuditLogEntry> = state
            .logs
            .iter()
            .filter(|l| l.created_at.to_offset(time::UtcOffset::UTC).date() == date)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        logs.truncate(clamp_limit(limit));
        Ok(logs)
    }

    async fn save_log(&self, entry: &NewAuditLogEntry) -> Result<(), StorageError> {
        self.insert_log_at(entry, OffsetDateTime::now_utc()).await;
        Ok(())
    }

    async fn report(&self) -> Result<Vec<LabResult>, StorageError> {
        let state = self.state.lock().await;
        Ok(state.results.iter().rev().cloned().collect())
    }

    async fn admit(&self, request: &AdmissionRequest) -> Result<String, StorageError> {
        let code = generate_registration_code();

        let mut state = self.state.lock().await;
        if state.visits.contains_key(&code) {
            return Err(StorageError::constraint(format!(
                "duplicate registration code {code}"
            )));
        }

        let created = !state.patients.contains_key(&request.medical_record_no);
        state
            .patients
            .entry(request.medical_record_no.clone())
            .or_insert_with(|| request.patient());
        state.visits.insert(code.clone(), request.visit(&code));

        tracing::debug!(
            registration_code = %code,
            patient_created = created,
            "Admission stored in memory"
        );
        Ok(code)
    }

    async fn list_patients(&self, limit: i64) -> Result<Vec<Patient>, StorageError> {
        let state = self.state.lock().await;
        Ok(state
            .patients
            .values()
            .take(clamp_limit(limit))
            .cloned()
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
