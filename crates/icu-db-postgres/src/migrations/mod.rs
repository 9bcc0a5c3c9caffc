//! Database migration management for the PostgreSQL storage backend.
//!
//! The schema ships as reversible migrations embedded in the binary. An
//! operator may instead point at a directory of `<VERSION>_<NAME>.up.sql` /
//! `.down.sql` files; embedded and directory migrations built from the same
//! files carry identical checksums and can be mixed on one database.
//!
//! Applied versions are tracked in `_sqlx_migrations`.

use std::borrow::Cow;
use std::path::PathBuf;

use sqlx_core::migrate::{Migration, MigrationType, Migrator};
use sqlx_core::query::query;
use sqlx_core::query_scalar::query_scalar;
use sqlx_postgres::PgPool;
use tracing::{info, instrument, warn};

use crate::error::{PostgresError, Result};

/// Add new migrations here in chronological order as
/// `(version, description, up_sql, down_sql)`.
macro_rules! embedded_migrations {
    () => {
        &[(
            20240101000001i64,
            "icu_schema",
            include_str!("../../migrations/20240101000001_icu_schema.up.sql"),
            include_str!("../../migrations/20240101000001_icu_schema.down.sql"),
        )]
    };
}

const CREATE_MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS _sqlx_migrations (
    version BIGINT PRIMARY KEY,
    description TEXT NOT NULL,
    installed_on TIMESTAMPTZ NOT NULL DEFAULT now(),
    success BOOLEAN NOT NULL,
    checksum BYTEA NOT NULL,
    execution_time BIGINT NOT NULL
)
"#;

/// Where migration scripts are read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MigrationSource {
    /// Scripts compiled into the binary.
    #[default]
    Embedded,
    /// Scripts read from a directory at runtime.
    Directory(PathBuf),
}

/// Outcome of a migration command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The schema version moved.
    Changed { from: i64, to: i64 },
    /// The schema was already at the requested version.
    Unchanged { version: i64 },
}

impl MigrationOutcome {
    fn between(from: i64, to: i64) -> Self {
        if from == to {
            Self::Unchanged { version: to }
        } else {
            Self::Changed { from, to }
        }
    }
}

fn build_migrations() -> Vec<Migration> {
    embedded_migrations!()
        .iter()
        .flat_map(|(version, description, up, down)| {
            [
                Migration::new(
                    *version,
                    Cow::Borrowed(*description),
                    MigrationType::ReversibleUp,
                    Cow::Borrowed(*up),
                    false,
                ),
                Migration::new(
                    *version,
                    Cow::Borrowed(*description),
                    MigrationType::ReversibleDown,
                    Cow::Borrowed(*down),
                    false,
                ),
            ]
        })
        .collect()
}

/// The migrator over the embedded scripts.
#[must_use]
pub fn embedded() -> Migrator {
    Migrator {
        migrations: Cow::Owned(build_migrations()),
        ignore_missing: false,
        locking: true,
        no_tx: false,
    }
}

/// Builds a migrator for the given source.
///
/// # Errors
///
/// Returns an error if a directory source cannot be read.
pub async fn migrator(source: &MigrationSource) -> Result<Migrator> {
    match source {
        MigrationSource::Embedded => Ok(embedded()),
        MigrationSource::Directory(dir) => Ok(Migrator::new(dir.clone()).await?),
    }
}

/// Applies all pending embedded migrations. Used on service startup.
///
/// # Errors
///
/// Returns an error if a migration fails to execute.
#[instrument(skip(pool))]
pub async fn run(pool: &PgPool) -> Result<()> {
    info!("Running database migrations (embedded)");
    let outcome = up(pool, &embedded()).await?;
    info!(?outcome, "Database migrations completed successfully");
    Ok(())
}

/// Applies every pending migration of `migrator`.
///
/// # Errors
///
/// Returns an error if a migration fails or an applied checksum differs.
#[instrument(skip_all)]
pub async fn up(pool: &PgPool, migrator: &Migrator) -> Result<MigrationOutcome> {
    let from = current_version(pool).await?;
    migrator
        .run(pool)
        .await
        .map_err(|e| PostgresError::Migration(format!("Migration failed: {e}")))?;
    let to = current_version(pool).await?;
    Ok(MigrationOutcome::between(from, to))
}

/// Reverts the most recently applied migration.
///
/// # Errors
///
/// Returns an error if the down script fails.
#[instrument(skip_all)]
pub async fn undo_last(pool: &PgPool, migrator: &Migrator) -> Result<MigrationOutcome> {
    let applied = applied_versions(pool).await?;
    let Some(&latest) = applied.last() else {
        return Ok(MigrationOutcome::Unchanged { version: 0 });
    };
    let target = applied.iter().rev().nth(1).copied().unwrap_or(0);

    migrator
        .undo(pool, target)
        .await
        .map_err(|e| PostgresError::Migration(format!("Migration rollback failed: {e}")))?;

    Ok(MigrationOutcome::between(latest, current_version(pool).await?))
}

/// Marks the schema as being at exactly `version` without running any SQL.
///
/// Records above `version` are discarded, records at or below it are marked
/// successful, and known migrations at or below it that were never recorded
/// are inserted. Used to recover from a failed migration that was fixed by
/// hand.
///
/// # Errors
///
/// Returns an error if the bookkeeping table cannot be updated.
#[instrument(skip(pool, migrator))]
pub async fn force(pool: &PgPool, migrator: &Migrator, version: i64) -> Result<MigrationOutcome> {
    if version < 0 {
        return Err(PostgresError::config(format!(
            "cannot force negative version {version}"
        )));
    }
    if version > 0
        && !migrator
            .iter()
            .any(|m| m.version == version && m.migration_type.is_up_migration())
    {
        warn!(version, "Forcing a version with no known migration script");
    }

    let from = current_version(pool).await?;
    let mut tx = pool.begin().await?;

    query("DELETE FROM _sqlx_migrations WHERE version > $1")
        .bind(version)
        .execute(&mut *tx)
        .await?;
    query("UPDATE _sqlx_migrations SET success = TRUE WHERE version <= $1")
        .bind(version)
        .execute(&mut *tx)
        .await?;

    for migration in migrator
        .iter()
        .filter(|m| m.version <= version && m.migration_type.is_up_migration())
    {
        query(
            "INSERT INTO _sqlx_migrations (version, description, success, checksum, execution_time) \
             VALUES ($1, $2, TRUE, $3, 0) ON CONFLICT (version) DO NOTHING",
        )
        .bind(migration.version)
        .bind(&*migration.description)
        .bind(&*migration.checksum)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(MigrationOutcome::between(from, current_version(pool).await?))
}

/// Versions recorded in the bookkeeping table, ascending.
///
/// # Errors
///
/// Returns an error if the bookkeeping table cannot be created or read.
pub async fn applied_versions(pool: &PgPool) -> Result<Vec<i64>> {
    query(CREATE_MIGRATIONS_TABLE).execute(pool).await?;
    let versions: Vec<i64> = query_scalar("SELECT version FROM _sqlx_migrations ORDER BY version")
        .fetch_all(pool)
        .await?;
    Ok(versions)
}

/// Highest applied version, or `0` for an empty database.
///
/// # Errors
///
/// Returns an error if the bookkeeping table cannot be read.
pub async fn current_version(pool: &PgPool) -> Result<i64> {
    Ok(applied_versions(pool).await?.last().copied().unwrap_or(0))
}
