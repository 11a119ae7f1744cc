use clap::{Args, Parser};
use config::{Config, ConfigError, ValidationError};
use person_api::ApiKeyGate;
use person_store::config::DatabaseConfig;
use person_store::{PgStore, Store, StoreError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

mod config;
mod telemetry;

/// How long in-flight requests get to finish once a shutdown signal arrives.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "person-service", about = "Person attribute and key-value service")]
enum CliCommand {
    /// Run the HTTP server.
    Serve(ConfigArgs),
    /// Apply database migrations and exit.
    Migrate(ConfigArgs),
    /// Load and validate the configuration, then print a summary.
    CheckConfig(ConfigArgs),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// YAML configuration file. Environment variables override its values.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] telemetry::TelemetryError),
    #[error("failed to create connection pool: {0}")]
    Pool(#[source] StoreError),
    #[error("database ping failed: {0}")]
    Ping(#[source] StoreError),
    #[error("failed to run migrations: {0}")]
    Migrate(#[source] StoreError),
    #[error("failed to start server: {0}")]
    Serve(#[from] std::io::Error),
    #[error("server did not shut down within {0:?}")]
    Shutdown(Duration),
}

impl ServiceError {
    fn error_code(&self) -> &'static str {
        match self {
            ServiceError::Config(ConfigError::Invalid(ValidationError::DatabaseUrlNotSet)) => {
                "DB_001_URL_NOT_SET"
            }
            ServiceError::Config(ConfigError::Invalid(ValidationError::InvalidPort(_))) => {
                "DB_002_INVALID_PORT"
            }
            ServiceError::Config(_) => "CFG_001_INVALID_CONFIG",
            ServiceError::Telemetry(_) => "CFG_002_TELEMETRY_INIT_FAILED",
            ServiceError::Pool(StoreError::InvalidUrl(_)) => "DB_003_FAILED_PARSE_URL",
            ServiceError::Pool(_) => "DB_004_FAILED_CREATE_POOL",
            ServiceError::Ping(_) => "DB_005_PING_FAILED",
            ServiceError::Serve(_) => "DB_006_FAILED_START_SERVER",
            ServiceError::Shutdown(_) => "DB_007_FAILED_SHUTDOWN_SERVER",
            ServiceError::Migrate(_) => "DB_008_MIGRATION_FAILED",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliCommand::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The subscriber may not be installed yet if configuration failed.
            eprintln!("ERROR: {e} (error_code: {})", e.error_code());
            tracing::error!(error = %e, error_code = e.error_code(), "person-service exited");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: CliCommand) -> Result<(), ServiceError> {
    match cli {
        CliCommand::Serve(args) => {
            let config = load_config(&args)?;
            let _telemetry = telemetry::init(&config.common)?;
            serve(config).await
        }
        CliCommand::Migrate(args) => {
            let config = load_config(&args)?;
            let _telemetry = telemetry::init(&config.common)?;
            let store = connect(&config.database).await?;
            store.migrate().await.map_err(ServiceError::Migrate)?;
            tracing::info!("migrations applied");
            Ok(())
        }
        CliCommand::CheckConfig(args) => {
            let config = load_config(&args)?;
            println!("{}", config.summary());
            Ok(())
        }
    }
}

fn load_config(args: &ConfigArgs) -> Result<Config, ConfigError> {
    Config::load(args.config.as_deref(), |name| std::env::var(name).ok())
}

async fn connect(config: &DatabaseConfig) -> Result<PgStore, ServiceError> {
    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "connecting to database"
    );
    let store = PgStore::connect(config).await.map_err(ServiceError::Pool)?;
    store.ping().await.map_err(ServiceError::Ping)?;
    tracing::info!("database connection successful");
    Ok(store)
}

async fn serve(config: Config) -> Result<(), ServiceError> {
    if config.encryption.is_default_key() {
        tracing::warn!(
            key_version = config.encryption.key_version,
            "no encryption key configured, using the development default"
        );
    }

    let store = connect(&config.database).await?;
    if config.database.run_migrations {
        store.migrate().await.map_err(ServiceError::Migrate)?;
        tracing::info!("migrations applied");
    }

    let gate = ApiKeyGate::new(config.api_keys.clone());
    let active: Vec<String> = gate.active_slots().map(str::to_owned).collect();
    if active.is_empty() {
        tracing::warn!("no valid api keys configured, /persons requests will be rejected");
    } else {
        tracing::info!(slots = ?active, "api keys loaded");
    }

    let app = person_api::router(Arc::new(store), config.encryption.context(), gate);

    let addr = config.listener.address();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "server listening");

    let shutdown = Arc::new(Notify::new());
    let signalled = shutdown.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signalled.notify_one();
        })
        .into_future();

    drain(server, &shutdown, SHUTDOWN_GRACE).await?;

    tracing::info!("server stopped");
    Ok(())
}

/// Drives `server` to completion. Once `shutdown` fires, the server has
/// `grace` to finish its in-flight requests.
async fn drain<F>(server: F, shutdown: &Notify, grace: Duration) -> Result<(), ServiceError>
where
    F: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(server);
    tokio::select! {
        result = &mut server => Ok(result?),
        () = shutdown.notified() => {
            match tokio::time::timeout(grace, &mut server).await {
                Ok(result) => Ok(result?),
                Err(_) => Err(ServiceError::Shutdown(grace)),
            }
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
