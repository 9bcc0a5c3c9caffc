use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

use icu_db_postgres::config::connection_url;
use icu_db_postgres::{PoolSettings, PostgresConfig};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Full validation for the HTTP server.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.request_timeout_ms == 0 {
            return Err("server.request_timeout_ms must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        self.validate_storage()?;
        if self.auth.token().is_none() {
            return Err(
                "auth.api_token is required (set APP_API_TOKEN or ICU__AUTH__API_TOKEN)".into(),
            );
        }
        Ok(())
    }

    /// Storage-only validation, enough for the migration tool.
    pub fn validate_storage(&self) -> Result<(), String> {
        if self.storage.backend != StorageBackend::Postgres {
            return Ok(());
        }
        let pg = &self.storage.postgres;
        if pg.url.is_none() && pg.host.is_empty() {
            return Err("storage.postgres requires either 'url' or 'host' to be set".into());
        }
        if pg.url.is_none() && pg.database.is_empty() {
            return Err("storage.postgres.database must not be empty".into());
        }
        pg.pool
            .validate()
            .map_err(|e| format!("storage.postgres.pool: {e}"))?;
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Budget applied to every storage call made on behalf of a request.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_body_limit() -> usize {
    2 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// Process-local store; data is lost on restart.
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub postgres: PostgresStorageConfig,
}

/// PostgreSQL storage configuration
///
/// Either set `url` to a full connection string, or set `host`, `port`,
/// `user`, `password` and `database` individually. `url` wins when both are
/// present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresStorageConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_postgres_host")]
    pub host: String,

    #[serde(default = "default_postgres_port")]
    pub port: u16,

    #[serde(default = "default_postgres_user")]
    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_postgres_database")]
    pub database: String,

    /// `[storage.postgres.pool]`; unset keys keep their defaults.
    #[serde(default)]
    pub pool: PoolSettings,

    /// Apply embedded migrations when the server starts.
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

fn default_postgres_host() -> String {
    "localhost".into()
}
fn default_postgres_port() -> u16 {
    5432
}
fn default_postgres_user() -> String {
    "postgres".into()
}
fn default_postgres_database() -> String {
    "icu".into()
}
fn default_run_migrations() -> bool {
    true
}

impl PostgresStorageConfig {
    /// Returns `url` when set, otherwise builds one from the individual options.
    pub fn connection_url(&self) -> String {
        if let Some(ref url) = self.url {
            return url.clone();
        }
        connection_url(
            &self.host,
            self.port,
            &self.user,
            self.password.as_deref().unwrap_or(""),
            &self.database,
        )
    }

    pub fn to_postgres_config(&self) -> PostgresConfig {
        PostgresConfig::new(self.connection_url())
            .with_pool(self.pool)
            .with_run_migrations(self.run_migrations)
    }
}

impl Default for PostgresStorageConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_postgres_host(),
            port: default_postgres_port(),
            user: default_postgres_user(),
            password: None,
            database: default_postgres_database(),
            pool: PoolSettings::default(),
            run_migrations: default_run_migrations(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Static bearer token every API request must present.
    #[serde(default)]
    pub api_token: Option<String>,
}

impl AuthConfig {
    /// The configured token, if non-blank.
    pub fn token(&self) -> Option<&str> {
        self.api_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::collections::HashMap;
    use std::path::PathBuf;

    /// Default file looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "icu.toml";

    /// Legacy flat variable names, mapped onto
    /// config keys. These win over both the file and `ICU__*` variables.
    pub const LEGACY_ENV: &[(&str, &str)] = &[
        ("DB_HOST", "storage.postgres.host"),
        ("DB_PORT", "storage.postgres.port"),
        ("DB_USER", "storage.postgres.user"),
        ("DB_PASS", "storage.postgres.password"),
        ("DB_NAME", "storage.postgres.database"),
        ("APP_PORT", "server.port"),
        ("APP_API_TOKEN", "auth.api_token"),
    ];

    /// Loads and fully validates the server configuration.
    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let cfg = build(path, None)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Like [`load_config`] but reads variables from `env` instead of the
    /// process environment.
    pub fn load_config_with_env(
        path: Option<&str>,
        env: &HashMap<String, String>,
    ) -> Result<AppConfig, String> {
        let cfg = build(path, Some(env))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads the configuration validating only the storage section.
    pub fn load_storage_config(path: Option<&str>) -> Result<AppConfig, String> {
        let cfg = build(path, None)?;
        cfg.validate_storage()?;
        Ok(cfg)
    }

    fn build(path: Option<&str>, env: Option<&HashMap<String, String>>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            return Err(format!("config file not found: {}", pathbuf.display()));
        }

        // Environment variable overrides, e.g., ICU__SERVER__PORT=9090
        let mut environment = Environment::with_prefix("ICU")
            .try_parsing(true)
            .separator("__");
        if let Some(vars) = env {
            environment = environment.source(Some(
                vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            ));
        }
        builder = builder.add_source(environment);

        for (var, key) in LEGACY_ENV {
            let value = match env {
                Some(vars) => vars.get(*var).cloned(),
                None => std::env::var(var).ok(),
            }
            .filter(|v| !v.trim().is_empty());
            builder = builder
                .set_override_option(*key, value)
                .map_err(|e| format!("config override error for {var}: {e}"))?;
        }

        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        cfg.try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))
    }
}
