//! Domain types exchanged between the API surface and the storage gateways.
//!
//! Field names on the wire follow the intake system's established JSON
//! contract (`no_rm`, `nama_pasien`, `kode_reg`, ...).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// A semi-structured document: string keys mapped to arbitrary JSON values.
///
/// Stored and returned verbatim; no schema is enforced.
pub type Document = Map<String, Value>;

/// Prefix of every server-generated registration code.
pub const REGISTRATION_CODE_PREFIX: &str = "REG-";

/// Generates a registration code from the current UTC time in nanoseconds.
///
/// Uniqueness is practical rather than guaranteed: two codes generated in the
/// same nanosecond collide and the second insert fails on the visit key.
#[must_use]
pub fn generate_registration_code() -> String {
    format!(
        "{REGISTRATION_CODE_PREFIX}{}",
        OffsetDateTime::now_utc().unix_timestamp_nanos()
    )
}

/// A patient, identified by a medical-record number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    #[serde(rename = "no_rm")]
    pub medical_record_no: String,
    #[serde(rename = "nama_pasien")]
    pub name: String,
    #[serde(rename = "jenis_kelamin")]
    pub sex: String,
    #[serde(rename = "tanggal_lahir")]
    pub birth_date: String,
}

/// One admission of a patient to a ward location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    #[serde(rename = "kode_reg")]
    pub registration_code: String,
    #[serde(rename = "no_rm")]
    pub medical_record_no: String,
    #[serde(rename = "no_kunjungan")]
    pub visit_no: String,
    #[serde(rename = "poli_ruang")]
    pub ward: String,
    #[serde(rename = "kamar")]
    pub room: String,
    pub bed: String,
}

/// Patient and visit fields joined on a registration code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRecord {
    #[serde(rename = "no_rm")]
    pub medical_record_no: String,
    #[serde(rename = "nama_pasien")]
    pub name: String,
    #[serde(rename = "jenis_kelamin")]
    pub sex: String,
    #[serde(rename = "tanggal_lahir")]
    pub birth_date: String,
    #[serde(rename = "poli_ruang")]
    pub ward: String,
    #[serde(rename = "kamar")]
    pub room: String,
    pub bed: String,
    #[serde(rename = "no_kunjungan")]
    pub visit_no: String,
}

impl SearchRecord {
    /// Joins a patient with one of its visits.
    #[must_use]
    pub fn from_parts(patient: &Patient, visit: &Visit) -> Self {
        Self {
            medical_record_no: patient.medical_record_no.clone(),
            name: patient.name.clone(),
            sex: patient.sex.clone(),
            birth_date: patient.birth_date.clone(),
            ward: visit.ward.clone(),
            room: visit.room.clone(),
            bed: visit.bed.clone(),
            visit_no: visit.visit_no.clone(),
        }
    }
}

/// Body of `POST /admission`.
///
/// Only the medical-record number is mandatory; absent fields default to the
/// empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionRequest {
    #[serde(rename = "no_rm")]
    pub medical_record_no: String,
    #[serde(rename = "nama_pasien", default)]
    pub name: String,
    #[serde(rename = "jenis_kelamin", default)]
    pub sex: String,
    #[serde(rename = "tanggal_lahir", default)]
    pub birth_date: String,
    #[serde(rename = "poli_ruang", default)]
    pub ward: String,
    #[serde(rename = "kamar", default)]
    pub room: String,
    #[serde(default)]
    pub bed: String,
    #[serde(rename = "no_kunjungan", default)]
    pub visit_no: String,
}

impl AdmissionRequest {
    /// The patient row this admission creates when the patient is new.
    #[must_use]
    pub fn patient(&self) -> Patient {
        Patient {
            medical_record_no: self.medical_record_no.clone(),
            name: self.name.clone(),
            sex: self.sex.clone(),
            birth_date: self.birth_date.clone(),
        }
    }

    /// The visit row for this admission under the given registration code.
    #[must_use]
    pub fn visit(&self, registration_code: impl Into<String>) -> Visit {
        Visit {
            registration_code: registration_code.into(),
            medical_record_no: self.medical_record_no.clone(),
            visit_no: self.visit_no.clone(),
            ward: self.ward.clone(),
            room: self.room.clone(),
            bed: self.bed.clone(),
        }
    }
}

/// Body of `POST /result`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSubmission {
    #[serde(default)]
    pub patient: Document,
    #[serde(default)]
    pub result: Document,
}

/// A stored lab result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabResult {
    pub id: i64,
    pub patient_data: Document,
    pub result_data: Document,
}

/// A persisted audit record of one inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub endpoint: String,
    pub method: String,
    pub status: u16,
    pub message: String,
}

/// An audit record before the store assigns its id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditLogEntry {
    pub endpoint: String,
    pub method: String,
    pub status: u16,
    pub message: String,
}

impl NewAuditLogEntry {
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        method: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into(),
            status,
            message: message.into(),
        }
    }
}
