use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use icu_storage::DynRepository;

use crate::config::{AppConfig, StorageBackend};
use crate::middleware::{self as app_middleware, RequestId};
use crate::service::IcuService;
use crate::handlers;

/// State shared by handlers and interceptors.
#[derive(Clone)]
pub struct AppState {
    pub service: IcuService,
    /// Expected bearer token, resolved once at startup.
    pub api_token: Arc<str>,
}

impl AppState {
    pub fn new(repository: DynRepository, api_token: impl Into<Arc<str>>, timeout: Duration) -> Self {
        Self {
            service: IcuService::new(repository, timeout),
            api_token: api_token.into(),
        }
    }
}

pub struct IcuServer {
    addr: SocketAddr,
    app: Router,
}

pub fn build_app(state: AppState, cfg: &AppConfig) -> Router {
    let body_limit = cfg.server.body_limit_bytes;

    // Order: protocol gate -> auth gate -> audit trail -> handler
    let pipeline = ServiceBuilder::new()
        .layer(middleware::from_fn(app_middleware::protocol_gate))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_gate,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::audit_trail,
        ));

    // Unmatched paths go through the pipeline too, so they are gated and audited
    let api = Router::new()
        .route("/search", get(handlers::search))
        .route("/result", post(handlers::submit_result))
        .route("/log", get(handlers::list_logs))
        .route("/report", get(handlers::report))
        .route("/admission", post(handlers::admit))
        .route("/patients", get(handlers::list_patients))
        .fallback(handlers::not_found)
        .layer(pipeline);

    Router::new()
        // Liveness probe, outside the pipeline
        .route("/healthz", get(handlers::healthz))
        .merge(api)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<RequestId>()
                        .and_then(|id| id.0.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        // Outermost so the trace span can see the id
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

/// Creates the repository selected by `storage.backend`.
pub async fn create_repository(cfg: &AppConfig) -> anyhow::Result<DynRepository> {
    match cfg.storage.backend {
        StorageBackend::Postgres => {
            let repository =
                icu_db_postgres::create_repository(cfg.storage.postgres.to_postgres_config())
                    .await
                    .context("failed to initialize PostgreSQL storage")?;
            Ok(repository)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            Ok(icu_db_memory::create_repository())
        }
    }
}

#[derive(Default)]
pub struct ServerBuilder {
    config: AppConfig,
    addr: Option<SocketAddr>,
    repository: Option<DynRepository>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = Some(addr);
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Uses the given repository instead of the configured backend.
    pub fn with_repository(mut self, repository: DynRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    pub async fn build(self) -> anyhow::Result<IcuServer> {
        self.config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
        let token = self
            .config
            .auth
            .token()
            .context("auth.api_token must be configured")?
            .to_string();

        let repository = match self.repository {
            Some(repository) => repository,
            None => create_repository(&self.config).await?,
        };
        tracing::info!(backend = repository.backend_name(), "Storage initialized");

        let state = AppState::new(repository, token, self.config.request_timeout());
        let app = build_app(state, &self.config);

        Ok(IcuServer {
            addr: self.addr.unwrap_or_else(|| self.config.addr()),
            app,
        })
    }
}

impl IcuServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
