use std::path::PathBuf;

use clap::Parser;
use icu_server::ServerBuilder;
use icu_server::config::loader::{DEFAULT_CONFIG_FILE, load_config};

#[derive(Parser)]
#[command(name = "icu-server")]
#[command(about = "ICU patient-intake and lab-result HTTP service")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML). Falls back to icu.toml when present.
    #[arg(short, long, env = "ICU_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    icu_server::observability::init_tracing();

    let cli = Cli::parse();
    let config_path = cli.config.map(|p| p.to_string_lossy().into_owned());

    let cfg = match load_config(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(
        path = config_path.as_deref().unwrap_or(DEFAULT_CONFIG_FILE),
        backend = ?cfg.storage.backend,
        "Configuration loaded"
    );
    icu_server::observability::apply_logging_level(&cfg.logging.level);

    let server = match ServerBuilder::new().with_config(cfg).build().await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Server initialization failed: {e:#}");
            std::process::exit(2);
        }
    };

    if let Err(err) = server.run().await {
        eprintln!("Server error: {err}");
        std::process::exit(1);
    }
}
