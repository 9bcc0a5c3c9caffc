use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, macros::format_description};

use icu_api::{ApiError, ApiResponse};
use icu_storage::{
    AdmissionRequest, AuditLogEntry, LabResult, Patient, ResultSubmission, SearchRecord,
};

use crate::server::AppState;

pub const DEFAULT_LOG_LIMIT: i64 = 100;
pub const DEFAULT_PATIENT_LIMIT: i64 = 10;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(rename = "KODE_REG")]
    pub registration_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogParams {
    pub date: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AdmissionReceipt {
    #[serde(rename = "kode_reg")]
    pub registration_code: String,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub storage: &'static str,
}

/// Absent, non-numeric and non-positive limits fall back to `default`.
fn parse_limit(raw: Option<&str>, default: i64) -> i64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(default)
}

/// `YYYY-MM-DD`; absent means today in UTC.
fn parse_date(raw: Option<&str>) -> Result<Date, ApiError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(OffsetDateTime::now_utc().date()),
        Some(s) => Date::parse(s, format_description!("[year]-[month]-[day]"))
            .map_err(|_| ApiError::bad_request("date must be in YYYY-MM-DD format")),
    }
}

fn query_params<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    params
        .map(|Query(p)| p)
        .map_err(|e| ApiError::bad_request(format!("Invalid query parameters: {}", e.body_text())))
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(b)| b).map_err(|e| {
        tracing::debug!(error = %e.body_text(), "Rejected request body");
        ApiError::bad_request("Invalid JSON body")
    })
}

pub async fn search(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<ApiResponse<SearchRecord>, ApiError> {
    let code = query_params(params)?
        .registration_code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::bad_request("KODE_REG is required"))?;

    let record = state
        .service
        .search(&code)
        .await
        .map_err(|e| e.into_api_error("Search failed"))?;
    Ok(ApiResponse::ok(record, "Data found"))
}

pub async fn submit_result(
    State(state): State<AppState>,
    body: Result<Json<ResultSubmission>, JsonRejection>,
) -> Result<ApiResponse<()>, ApiError> {
    let submission = json_body(body)?;
    state
        .service
        .submit_result(&submission)
        .await
        .map_err(|e| e.into_api_error("Failed to save result"))?;
    Ok(ApiResponse::message("Result saved successfully"))
}

pub async fn list_logs(
    State(state): State<AppState>,
    params: Result<Query<LogParams>, QueryRejection>,
) -> Result<ApiResponse<Vec<AuditLogEntry>>, ApiError> {
    let params = query_params(params)?;
    let date = parse_date(params.date.as_deref())?;
    let limit = parse_limit(params.limit.as_deref(), DEFAULT_LOG_LIMIT);

    let logs = state
        .service
        .list_logs(date, limit)
        .await
        .map_err(|e| e.into_api_error("Failed to retrieve logs"))?;
    Ok(ApiResponse::ok(logs, "Logs retrieved"))
}

pub async fn report(
    State(state): State<AppState>,
) -> Result<ApiResponse<Vec<LabResult>>, ApiError> {
    let results = state
        .service
        .report()
        .await
        .map_err(|e| e.into_api_error("Failed to retrieve report"))?;
    Ok(ApiResponse::ok(results, "Report data retrieved"))
}

pub async fn admit(
    State(state): State<AppState>,
    body: Result<Json<AdmissionRequest>, JsonRejection>,
) -> Result<ApiResponse<AdmissionReceipt>, ApiError> {
    let request = json_body(body)?;
    let registration_code = state
        .service
        .admit(&request)
        .await
        .map_err(|e| e.into_api_error("Failed to admit patient"))?;
    Ok(ApiResponse::ok(
        AdmissionReceipt { registration_code },
        "Patient admitted successfully",
    ))
}

pub async fn list_patients(
    State(state): State<AppState>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> Result<ApiResponse<Vec<Patient>>, ApiError> {
    let limit = parse_limit(query_params(params)?.limit.as_deref(), DEFAULT_PATIENT_LIMIT);
    let patients = state
        .service
        .list_patients(limit)
        .await
        .map_err(|e| e.into_api_error("Failed to retrieve patients"))?;
    Ok(ApiResponse::ok(patients, "Patients retrieved"))
}

pub async fn healthz(State(state): State<AppState>) -> ApiResponse<HealthStatus> {
    ApiResponse::ok(
        HealthStatus {
            status: "ok",
            storage: state.service.backend_name(),
        },
        "Service healthy",
    )
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("Route not found")
}
