//! HTTP server for the ICU patient-intake and lab-result service.
//!
//! Six bearer-protected JSON routes (`/search`, `/result`, `/log`, `/report`,
//! `/admission`, `/patients`) plus an unauthenticated `/healthz`.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod service;

pub use config::AppConfig;
pub use server::{AppState, IcuServer, ServerBuilder, build_app};
pub use service::{IcuService, ServiceError};
