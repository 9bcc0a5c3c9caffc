//! PostgreSQL implementation of [`IcuRepository`].

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::types::Json;
use sqlx_postgres::PgPool;
use time::{Date, OffsetDateTime};

use icu_storage::{
    AdmissionRequest, AuditLogEntry, Document, IcuRepository, LabResult, NewAuditLogEntry,
    Patient, ResultSubmission, SearchRecord, StorageError, generate_registration_code,
};

use crate::config::PostgresConfig;
use crate::error::query_error;
use crate::migrations;
use crate::pool;

type SearchRow = (String, String, String, String, String, String, String, String);
type LogRow = (i64, OffsetDateTime, String, String, i32, String);
type ResultRow = (i64, Json<Document>, Json<Document>);
type PatientRow = (String, String, String, String);

/// PostgreSQL repository for patients, visits, lab results and audit logs.
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Connects and, if configured, applies the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool settings are invalid, the server is
    /// unreachable, or a migration fails.
    pub async fn new(config: PostgresConfig) -> Result<Self, StorageError> {
        let pool = pool::connect(&config).await?;

        if config.run_migrations {
            migrations::run(&pool).await?;
        }

        Ok(Self { pool })
    }

    /// Wraps an existing pool. Migrations are not run.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn log_from_row(row: LogRow) -> Result<AuditLogEntry, StorageError> {
    let (id, created_at, endpoint, method, status, message) = row;
    let status = u16::try_from(status).map_err(|_| {
        StorageError::serialization(format!("audit log {id} has invalid status {status}"))
    })?;
    Ok(AuditLogEntry {
        id,
        created_at,
        endpoint,
        method,
        status,
        message,
    })
}

#[async_trait]
impl IcuRepository for PostgresRepository {
    async fn find_by_registration_code(&self, code: &str) -> Result<SearchRecord, StorageError> {
        let row: Option<SearchRow> = query_as(
            r#"
            SELECT p.mrn, p.name, p.sex, p.birth_date, v.ward, v.room, v.bed, v.visit_no
            FROM visits v
            JOIN patients p ON p.mrn = v.mrn
            WHERE v.registration_code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        let (medical_record_no, name, sex, birth_date, ward, room, bed, visit_no) =
            row.ok_or_else(|| StorageError::not_found("Visit", code))?;

        Ok(SearchRecord {
            medical_record_no,
            name,
            sex,
            birth_date,
            ward,
            room,
            bed,
            visit_no,
        })
    }

    async fn save_result(&self, submission: &ResultSubmission) -> Result<(), StorageError> {
        query("INSERT INTO lab_results (patient_data, result_data) VALUES ($1, $2)")
            .bind(Json(&submission.patient))
            .bind(Json(&submission.result))
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn list_logs(&self, date: Date, limit: i64) -> Result<Vec<AuditLogEntry>, StorageError> {
        let rows: Vec<LogRow> = query_as(
            r#"
            SELECT id, created_at, endpoint, method, status, message
            FROM audit_logs
            WHERE (created_at AT TIME ZONE 'UTC')::date = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(date)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.into_iter().map(log_from_row).collect()
    }

    async fn save_log(&self, entry: &NewAuditLogEntry) -> Result<(), StorageError> {
        query(
            "INSERT INTO audit_logs (created_at, endpoint, method, status, message) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(OffsetDateTime::now_utc())
        .bind(&entry.endpoint)
        .bind(&entry.method)
        .bind(i32::from(entry.status))
        .bind(&entry.message)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    async fn report(&self) -> Result<Vec<LabResult>, StorageError> {
        let rows: Vec<ResultRow> =
            query_as("SELECT id, patient_data, result_data FROM lab_results ORDER BY id DESC")
                .fetch_all(&self.pool)
                .await
                .map_err(query_error)?;

        Ok(rows
            .into_iter()
            .map(|(id, Json(patient_data), Json(result_data))| LabResult {
                id,
                patient_data,
                result_data,
            })
            .collect())
    }

    async fn admit(&self, request: &AdmissionRequest) -> Result<String, StorageError> {
        let code = generate_registration_code();
        let mut tx = self.pool.begin().await.map_err(query_error)?;

        // Insert-if-absent: an existing patient row is left untouched.
        let inserted = query(
            "INSERT INTO patients (mrn, name, sex, birth_date) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (mrn) DO NOTHING",
        )
        .bind(&request.medical_record_no)
        .bind(&request.name)
        .bind(&request.sex)
        .bind(&request.birth_date)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;
        let created = inserted.rows_affected() > 0;

        query(
            "INSERT INTO visits (registration_code, mrn, visit_no, ward, room, bed) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&code)
        .bind(&request.medical_record_no)
        .bind(&request.visit_no)
        .bind(&request.ward)
        .bind(&request.room)
        .bind(&request.bed)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;

        tracing::debug!(
            registration_code = %code,
            patient_created = created,
            "Admission committed"
        );
        Ok(code)
    }

    async fn list_patients(&self, limit: i64) -> Result<Vec<Patient>, StorageError> {
        let rows: Vec<PatientRow> = query_as(
            "SELECT mrn, name, sex, birth_date FROM patients ORDER BY mrn ASC LIMIT $1",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(rows
            .into_iter()
            .map(|(medical_record_no, name, sex, birth_date)| Patient {
                medical_record_no,
                name,
                sex,
                birth_date,
            })
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
