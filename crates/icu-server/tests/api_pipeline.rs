use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use icu_db_memory::InMemoryRepository;
use icu_server::{AppConfig, AppState, build_app};
use icu_storage::{
    AdmissionRequest, AuditLogEntry, DynRepository, IcuRepository, LabResult, NewAuditLogEntry,
    Patient, ResultSubmission, SearchRecord, StorageError,
};
use time::Date;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::{Value, json};
use time::macros::datetime;
use tokio::task::JoinHandle;

const TOKEN: &str = "test-token";

struct TestServer {
    base: String,
    repo: Arc<InMemoryRepository>,
    client: reqwest::Client,
    shutdown: tokio::sync::oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    fn get(&self, path: &str) -> RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base))
            .header("accept", "application/json")
            .bearer_auth(TOKEN)
    }

    fn post(&self, path: &str, body: &Value) -> RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base))
            .header("accept", "application/json")
            .bearer_auth(TOKEN)
            .json(body)
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.handle.await;
    }
}

/// Delegates to the in-memory store but refuses every audit write.
struct AuditRejectingRepository {
    inner: Arc<InMemoryRepository>,
}

#[async_trait]
impl IcuRepository for AuditRejectingRepository {
    async fn find_by_registration_code(&self, code: &str) -> Result<SearchRecord, StorageError> {
        self.inner.find_by_registration_code(code).await
    }

    async fn save_result(&self, submission: &ResultSubmission) -> Result<(), StorageError> {
        self.inner.save_result(submission).await
    }

    async fn list_logs(&self, date: Date, limit: i64) -> Result<Vec<AuditLogEntry>, StorageError> {
        self.inner.list_logs(date, limit).await
    }

    async fn save_log(&self, _entry: &NewAuditLogEntry) -> Result<(), StorageError> {
        Err(StorageError::connection_error("audit table unavailable"))
    }

    async fn report(&self) -> Result<Vec<LabResult>, StorageError> {
        self.inner.report().await
    }

    async fn admit(&self, request: &AdmissionRequest) -> Result<String, StorageError> {
        self.inner.admit(request).await
    }

    async fn list_patients(&self, limit: i64) -> Result<Vec<Patient>, StorageError> {
        self.inner.list_patients(limit).await
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}

async fn start_server() -> TestServer {
    let repo = Arc::new(InMemoryRepository::new());
    start_server_with(repo.clone(), repo).await
}

/// Serves `backend`; `repo` is the store the test inspects.
async fn start_server_with(backend: DynRepository, repo: Arc<InMemoryRepository>) -> TestServer {
    let mut cfg = AppConfig::default();
    cfg.auth.api_token = Some(TOKEN.into());
    let state = AppState::new(backend, TOKEN, Duration::from_secs(5));
    let app = build_app(state, &cfg);

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        base: format!("http://{addr}"),
        repo,
        client: reqwest::Client::new(),
        shutdown: tx,
        handle,
    }
}

#[tokio::test]
async fn missing_or_wrong_token_is_rejected_and_audited_once() {
    let server = start_server().await;

    let resp = server
        .client
        .get(format!("{}/report", server.base))
        .header("accept", "application/json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(resp.headers()["www-authenticate"], "Bearer");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"status": 401, "message": "Authentication failed"}));

    let logs = server.repo.logs().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, 401);
    assert_eq!(logs[0].endpoint, "/report");
    assert_eq!(logs[0].method, "GET");
    assert_eq!(logs[0].message, "Unauthorized access attempt");

    let resp = server
        .client
        .get(format!("{}/report", server.base))
        .header("accept", "application/json")
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(server.repo.logs().await.len(), 2);

    server.stop().await;
}

#[tokio::test]
async fn protocol_violations_are_not_audited() {
    let server = start_server().await;

    let resp = server
        .client
        .post(format!("{}/result", server.base))
        .header("accept", "application/json")
        .header("content-type", "text/plain")
        .bearer_auth(TOKEN)
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], 415);

    let resp = server
        .client
        .get(format!("{}/patients", server.base))
        .header("accept", "text/html")
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);

    // Protocol checks run before auth: no token, wrong media type, still 415.
    let resp = server
        .client
        .post(format!("{}/admission", server.base))
        .header("accept", "application/json")
        .header("content-type", "application/xml")
        .body("<x/>")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    assert!(server.repo.logs().await.is_empty());
    server.stop().await;
}

#[tokio::test]
async fn admission_then_search_returns_patient() {
    let server = start_server().await;

    let resp = server
        .post(
            "/admission",
            &json!({
                "no_rm": "RM1",
                "nama_pasien": "Jane",
                "no_kunjungan": "V1",
                "poli_ruang": "ICU"
            }),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Patient admitted successfully");
    let code = body["data"]["kode_reg"].as_str().unwrap().to_string();
    assert!(code.starts_with("REG-"));

    let resp = server
        .get(&format!("/search?KODE_REG={code}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Data found");
    assert_eq!(body["data"]["nama_pasien"], "Jane");
    assert_eq!(body["data"]["no_rm"], "RM1");
    assert_eq!(body["data"]["poli_ruang"], "ICU");
    assert_eq!(body["data"]["no_kunjungan"], "V1");

    let logs = server.repo.logs().await;
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.status == 200 && l.message == "Request processed"));
    assert_eq!(logs[0].endpoint, "/admission");
    assert_eq!(logs[1].endpoint, "/search");

    server.stop().await;
}

#[tokio::test]
async fn repeated_admission_reuses_patient() {
    let server = start_server().await;
    let request = json!({"no_rm": "RM1", "nama_pasien": "Jane"});

    let mut codes = Vec::new();
    for _ in 0..2 {
        let body: Value = server
            .post("/admission", &request)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        codes.push(body["data"]["kode_reg"].as_str().unwrap().to_string());
    }
    assert_ne!(codes[0], codes[1]);
    assert_eq!(server.repo.patient_count().await, 1);
    assert_eq!(server.repo.visit_count().await, 2);

    let body: Value = server
        .get("/patients")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["message"], "Patients retrieved");
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    server.stop().await;
}

#[tokio::test]
async fn search_validation_and_not_found() {
    let server = start_server().await;

    let resp = server.get("/search").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "KODE_REG is required");

    let resp = server.get("/search?KODE_REG=REG-0").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let statuses: Vec<u16> = server.repo.logs().await.iter().map(|l| l.status).collect();
    assert_eq!(statuses, [400, 404]);

    server.stop().await;
}

#[tokio::test]
async fn empty_documents_are_rejected_before_storage() {
    let server = start_server().await;

    let resp = server
        .post("/result", &json!({"patient": {}, "result": {"glucose": 5.4}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "patient data cannot be empty");

    let resp = server
        .post("/result", &json!({"patient": {"pid": "123"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    assert_eq!(server.repo.result_count().await, 0);
    let logs = server.repo.logs().await;
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.status == 400));

    server.stop().await;
}

#[tokio::test]
async fn malformed_json_body_is_bad_request() {
    let server = start_server().await;

    let resp = server
        .client
        .post(format!("{}/admission", server.base))
        .header("accept", "application/json")
        .header("content-type", "application/json")
        .bearer_auth(TOKEN)
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Invalid JSON body");

    // Missing required identifier
    let resp = server
        .post("/admission", &json!({"nama_pasien": "Jane"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(server.repo.visit_count().await, 0);

    server.stop().await;
}

#[tokio::test]
async fn report_round_trips_documents() {
    let server = start_server().await;

    let resp = server
        .post(
            "/result",
            &json!({"patient": {"pid": "123"}, "result": {"glucose": 5.4}}),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"status": 200, "message": "Result saved successfully"}));

    let body: Value = server
        .get("/report")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["message"], "Report data retrieved");
    let results = body["data"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["patient_data"], json!({"pid": "123"}));
    assert_eq!(results[0]["result_data"], json!({"glucose": 5.4}));

    server.stop().await;
}

#[tokio::test]
async fn log_listing_filters_by_date_and_limit() {
    let server = start_server().await;
    let entry = NewAuditLogEntry::new("/report", "GET", 200, "Request processed");
    server
        .repo
        .insert_log_at(&entry, datetime!(2024-01-01 08:00 UTC))
        .await;
    server
        .repo
        .insert_log_at(&entry, datetime!(2024-01-01 20:15 UTC))
        .await;

    let body: Value = server
        .get("/log?date=2024-01-01&limit=1")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["message"], "Logs retrieved");
    let logs = body["data"].as_array().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["created_at"], "2024-01-01T20:15:00Z");

    let body: Value = server
        .get("/log?date=2024-01-01&limit=abc")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let resp = server.get("/log?date=01-01-2024").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    server.stop().await;
}

#[tokio::test]
async fn healthz_is_outside_the_pipeline() {
    let server = start_server().await;

    let resp = server
        .client
        .get(format!("{}/healthz", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-request-id"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["storage"], "memory");

    assert!(server.repo.logs().await.is_empty());
    server.stop().await;
}

#[tokio::test]
async fn request_id_is_propagated() {
    let server = start_server().await;

    let resp = server
        .get("/patients")
        .header("x-request-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "abc-123");

    server.stop().await;
}

#[tokio::test]
async fn unknown_path_requires_auth() {
    let server = start_server().await;

    let resp = server
        .client
        .get(format!("{}/nope", server.base))
        .header("accept", "application/json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let logs = server.repo.logs().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, 401);
    assert_eq!(logs[0].endpoint, "/nope");
    assert_eq!(logs[0].message, "Unauthorized access attempt");

    server.stop().await;
}

#[tokio::test]
async fn unknown_path_with_token_is_audited_not_found() {
    let server = start_server().await;

    let resp = server.get("/nope").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"status": 404, "message": "Route not found"}));

    let logs = server.repo.logs().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, 404);
    assert_eq!(logs[0].endpoint, "/nope");
    assert_eq!(logs[0].method, "GET");
    assert_eq!(logs[0].message, "Request processed");

    server.stop().await;
}

#[tokio::test]
async fn media_types_must_match_exactly() {
    let server = start_server().await;
    let body = json!({"no_rm": "RM1", "nama_pasien": "Jane"}).to_string();

    let resp = server
        .client
        .post(format!("{}/admission", server.base))
        .header("accept", "APPLICATION/JSON; q=0.5")
        .header("content-type", "application/json")
        .bearer_auth(TOKEN)
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);

    let resp = server
        .client
        .post(format!("{}/admission", server.base))
        .header("accept", "application/json")
        .header("content-type", "application/json; charset=latin1")
        .bearer_auth(TOKEN)
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    assert_eq!(server.repo.visit_count().await, 0);
    assert!(server.repo.logs().await.is_empty());
    server.stop().await;
}

#[tokio::test]
async fn failed_audit_write_leaves_response_unchanged() {
    let repo = Arc::new(InMemoryRepository::new());
    let backend = Arc::new(AuditRejectingRepository { inner: repo.clone() });
    let server = start_server_with(backend, repo).await;

    let resp = server
        .post(
            "/result",
            &json!({"patient": {"pid": "123"}, "result": {"glucose": 5.4}}),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"status": 200, "message": "Result saved successfully"}));

    let resp = server
        .client
        .get(format!("{}/report", server.base))
        .header("accept", "application/json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"status": 401, "message": "Authentication failed"}));

    assert_eq!(server.repo.result_count().await, 1);
    assert!(server.repo.logs().await.is_empty());
    server.stop().await;
}
