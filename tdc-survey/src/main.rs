//! tdc-survey - Train Door Choice survey server
//!
//! `serve` runs the web survey; `import-credentials` turns a downloaded
//! service-account JSON key into the secrets file the server reads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tdc_common::config::{
    load_or_default, ConfigOverrides, CounterUpdate, MissingAssetPolicy, StoreBackend,
    SurveyConfig, TomlConfig, DEFAULT_SECRETS_PATH,
};
use tdc_survey::controller::SurveyController;
use tdc_survey::credentials::{import_service_account_json, SheetCredentials};
use tdc_survey::design::QuestionBank;
use tdc_survey::store::{MemoryStore, RetryPolicy, SheetsStore, SurveyStore};
use tdc_survey::{build_router, AppState};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tdc-survey")]
#[command(about = "Train Door Choice web survey")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the survey web server
    Serve(ServeArgs),
    /// Convert a service-account JSON key into a secrets TOML file
    ImportCredentials(ImportArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// TOML config file
    #[arg(short, long, env = "TDC_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "TDC_BIND_ADDRESS")]
    bind_address: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "TDC_PORT")]
    port: Option<u16>,

    /// Question table (CSV)
    #[arg(long, env = "TDC_DESIGN_PATH")]
    design: Option<PathBuf>,

    /// Directory holding door_d2d_{value}.png images
    #[arg(long, env = "TDC_ASSET_DIR")]
    assets: Option<PathBuf>,

    /// Secrets file with the [gspread] table
    #[arg(long, env = "TDC_SECRETS_PATH")]
    secrets: Option<PathBuf>,

    /// Store backend: sheets or memory
    #[arg(long, env = "TDC_STORE")]
    store: Option<StoreBackend>,

    /// Shorthand for --store memory
    #[arg(long, conflicts_with = "store")]
    memory_store: bool,

    /// Initial counter value for the memory store
    #[arg(long, default_value_t = 0)]
    memory_counter: u64,

    /// Counter update mode: read_modify_write or atomic
    #[arg(long, env = "TDC_COUNTER_UPDATE")]
    counter_update: Option<CounterUpdate>,

    /// Missing door image policy: error or placeholder
    #[arg(long, env = "TDC_MISSING_ASSET")]
    missing_asset: Option<MissingAssetPolicy>,

    /// Log level filter (RUST_LOG takes precedence)
    #[arg(long, env = "TDC_LOG_LEVEL")]
    log_level: Option<String>,
}

impl ServeArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            bind_address: self.bind_address.clone(),
            port: self.port,
            design_path: self.design.clone(),
            asset_dir: self.assets.clone(),
            secrets_path: self.secrets.clone(),
            store: if self.memory_store {
                Some(StoreBackend::Memory)
            } else {
                self.store
            },
            counter_update: self.counter_update,
            missing_asset: self.missing_asset,
            log_level: self.log_level.clone(),
        }
    }
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Service-account key downloaded from the cloud console
    #[arg(long)]
    json: PathBuf,

    /// Spreadsheet id
    #[arg(long)]
    sheet_key: String,

    /// Secrets file to write
    #[arg(long, default_value = DEFAULT_SECRETS_PATH)]
    out: PathBuf,
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::ImportCredentials(args) => {
            init_tracing("info");
            import_service_account_json(&args.json, &args.sheet_key, &args.out)
                .context("Failed to import service-account key")?;
            info!("Secrets written to {}", args.out.display());
            Ok(())
        }
    }
}

/// Subscriber for the lines logged before the configured level is known
fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .finish()
}

/// Load the TOML config with its log lines going to `subscriber`
fn load_config_logged<S>(path: Option<&Path>, subscriber: S) -> tdc_common::Result<TomlConfig>
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    tracing::subscriber::with_default(subscriber, || load_or_default(path))
}

async fn serve(args: ServeArgs) -> Result<()> {
    let toml_config = load_config_logged(args.config.as_deref(), bootstrap_subscriber())
        .context("Failed to load config")?;
    let config = SurveyConfig::resolve(toml_config, args.overrides())
        .context("Invalid configuration")?;

    init_tracing(&config.logging.level);

    info!(
        "Starting Train Door Choice survey (tdc-survey) v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!(
        store = %config.store,
        counter_update = %config.counter_update,
        missing_asset = %config.missing_asset,
        design = %config.design_path.display(),
        assets = %config.asset_dir.display(),
        ticket_price = config.ticket_price,
        trip_duration = config.trip_duration,
        retry_attempts = config.retry.max_attempts,
        "Configuration resolved"
    );

    let bank = QuestionBank::global(&config.design_path).with_context(|| {
        format!("Failed to load question table {}", config.design_path.display())
    })?;
    info!("✓ Loaded {} questions", bank.len());

    if !config.asset_dir.is_dir() {
        warn!(
            "Door image directory {} does not exist",
            config.asset_dir.display()
        );
    }

    let store: Arc<dyn SurveyStore> = match config.store {
        StoreBackend::Memory => {
            warn!("Using in-memory store: results are lost when the process exits");
            Arc::new(MemoryStore::new(args.memory_counter))
        }
        StoreBackend::Sheets => {
            let credentials = SheetCredentials::load(&config.secrets_path)
                .context("Failed to load spreadsheet credentials")?;
            let store = SheetsStore::new(credentials)
                .context("Failed to initialize spreadsheet client")?;
            Arc::new(store)
        }
    };
    info!("✓ Store backend: {}", store.name());

    if config.counter_update == CounterUpdate::ReadModifyWrite {
        info!("Counter updates use read-modify-write; simultaneous finishers may share an id");
    }

    let controller = SurveyController::new(
        store,
        RetryPolicy::from(&config.retry),
        config.counter_update,
    );
    let listen_address = config.listen_address();
    let sessions = config.sessions.clone();
    let state = AppState::new(config, bank, controller);
    state.sessions.spawn_sweeper(&sessions);
    info!(
        idle_timeout_secs = sessions.idle_timeout_secs,
        finished_grace_secs = sessions.finished_grace_secs,
        "Session sweeper started"
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_address)
        .await
        .with_context(|| format!("Failed to bind to {}", listen_address))?;
    info!("tdc-survey listening on http://{}", listen_address);
    info!("Health check: http://{}/health", listen_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_config_load_is_logged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tdc-survey.toml");
        std::fs::write(&path, "port = 8080\n").unwrap();

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let config = load_config_logged(Some(&path), subscriber).unwrap();
        assert_eq!(config.port, Some(8080));

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Loaded configuration from"));
        assert!(output.contains("tdc-survey.toml"));
    }
}
