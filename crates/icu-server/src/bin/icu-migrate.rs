//! Schema migration tool.
//!
//! ```text
//! icu-migrate --up
//! icu-migrate --down
//! icu-migrate --force 20240101000001
//! icu-migrate --up --source ./migrations
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use icu_db_postgres::migrations::{self, MigrationOutcome, MigrationSource};
use icu_db_postgres::{PoolSettings, pool};
use icu_server::config::loader::load_storage_config;

#[derive(Parser)]
#[command(name = "icu-migrate")]
#[command(about = "Apply, revert or force ICU database schema migrations")]
#[command(version)]
#[command(group(ArgGroup::new("action").args(["up", "down", "force"])))]
struct Cli {
    /// Apply all pending migrations
    #[arg(long)]
    up: bool,

    /// Revert the most recently applied migration
    #[arg(long)]
    down: bool,

    /// Mark the schema as being at VERSION without running SQL
    #[arg(long, value_name = "VERSION")]
    force: Option<i64>,

    /// Read migrations from a directory instead of the embedded set
    #[arg(long, value_name = "DIR")]
    source: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long, env = "ICU_CONFIG")]
    config: Option<PathBuf>,
}

enum Action {
    Up,
    Down,
    Force(i64),
}

impl Cli {
    fn action(&self) -> Option<Action> {
        if self.up {
            Some(Action::Up)
        } else if self.down {
            Some(Action::Down)
        } else {
            self.force.map(Action::Force)
        }
    }
}

fn report(label: &str, outcome: MigrationOutcome) {
    match outcome {
        MigrationOutcome::Changed { from, to } => {
            println!("Migration {label} successful (version {from} -> {to})");
        }
        MigrationOutcome::Unchanged { version } => {
            println!("No migration changes needed (version {version})");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    icu_server::observability::init_tracing_with_level("warn");

    let cli = Cli::parse();
    let Some(action) = cli.action() else {
        println!("Nothing to do. Use --up, --down or --force <VERSION>.");
        return Ok(());
    };

    let config_path = cli.config.as_ref().map(|p| p.to_string_lossy().into_owned());
    let cfg = load_storage_config(config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;

    let single = PoolSettings {
        acquire_timeout_ms: cfg.storage.postgres.pool.acquire_timeout_ms,
        ..PoolSettings::single()
    };
    let pg_config = cfg.storage.postgres.to_postgres_config().with_pool(single);
    let pool = pool::connect(&pg_config)
        .await
        .context("failed to connect to the database")?;

    let source = cli
        .source
        .clone()
        .map_or(MigrationSource::Embedded, MigrationSource::Directory);
    let migrator = migrations::migrator(&source)
        .await
        .context("failed to load migrations")?;

    match action {
        Action::Up => report("up", migrations::up(&pool, &migrator).await?),
        Action::Down => report("down", migrations::undo_last(&pool, &migrator).await?),
        Action::Force(version) => {
            report("force", migrations::force(&pool, &migrator, version).await?)
        }
    }

    pool.close().await;
    Ok(())
}
