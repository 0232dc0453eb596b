use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use shadow_api::{ApiServer, ConfigFacade, TorrentHandles};
use shadow_config::ConfigStore;
use shadow_engine_sim::{SimEngineFactory, SimProfile};
use shadow_events::EventBus;
use shadow_telemetry::{
    DEFAULT_LOG_LEVEL, GlobalContextGuard, LogFormat, LoggingConfig, Metrics, log_format_from_str,
};
use shadow_torrent_core::{EngineFactory, JobInspector, JobWorkflow};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::session::SessionManager;

const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8888";
const DEFAULT_DATA_DIR: &str = ".shadow";

/// Dependencies required to bootstrap the session service.
pub(crate) struct BootstrapDependencies {
    logging: LoggingConfig<'static>,
    data_dir: PathBuf,
    http_addr: SocketAddr,
    factory: Arc<dyn EngineFactory>,
    events: EventBus,
    telemetry: Metrics,
}

impl BootstrapDependencies {
    /// Construct production dependencies from the environment for the binary entrypoint.
    pub(crate) fn from_env() -> AppResult<Self> {
        let format = log_format_from_str(std::env::var("SHADOW_LOG_FORMAT").ok().as_deref())
            .unwrap_or_else(LogFormat::infer);
        let logging = LoggingConfig {
            level: DEFAULT_LOG_LEVEL,
            format,
            build_sha: option_env!("SHADOW_BUILD_SHA").unwrap_or("dev"),
        };
        let data_dir = std::env::var_os("SHADOW_DATA_DIR")
            .map_or_else(|| PathBuf::from(DEFAULT_DATA_DIR), PathBuf::from);
        let http_addr = parse_http_addr(std::env::var("SHADOW_HTTP_ADDR").ok())?;
        let telemetry =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;

        Ok(Self {
            logging,
            data_dir,
            http_addr,
            factory: Arc::new(SimEngineFactory::new(SimProfile::default())),
            events: EventBus::new(),
            telemetry,
        })
    }
}

fn parse_http_addr(value: Option<String>) -> AppResult<SocketAddr> {
    let raw = value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string());
    raw.parse().map_err(|_| AppError::InvalidConfig {
        field: "SHADOW_HTTP_ADDR",
        reason: "not_a_socket_address",
        value: Some(raw),
    })
}

/// Entry point for the session service boot sequence.
///
/// # Errors
///
/// Returns an error if dependency construction or application startup fails.
pub async fn run_app() -> AppResult<()> {
    let dependencies = BootstrapDependencies::from_env()?;
    Box::pin(run_app_with(dependencies)).await
}

/// Boot sequence that relies entirely on injected dependencies.
pub(crate) async fn run_app_with(dependencies: BootstrapDependencies) -> AppResult<()> {
    shadow_telemetry::init_logging(&dependencies.logging)
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;

    let BootstrapDependencies {
        logging: _,
        data_dir,
        http_addr,
        factory,
        events,
        telemetry,
    } = dependencies;
    let _context = GlobalContextGuard::new(data_dir.display(), http_addr);

    info!("Shadow session bootstrap starting");

    let store = ConfigStore::open_in_dir(&data_dir)
        .await
        .map_err(|err| AppError::config("config_store.open", err))?;
    info!(path = %store.path().display(), "configuration store opened");

    let manager = SessionManager::initialize(store, factory, events.clone(), telemetry.clone())
        .await
        .map_err(|err| AppError::session("session.initialize", err))?;
    let report = manager.last_restore_report();
    info!(
        restored = report.restored,
        skipped = report.skipped,
        failed = report.failed,
        "session ready"
    );

    let shared = Arc::new(manager.clone());
    let workflow: Arc<dyn JobWorkflow> = shared.clone();
    let inspector: Arc<dyn JobInspector> = shared.clone();
    let config: Arc<dyn ConfigFacade> = shared;
    let api = ApiServer::new(
        config,
        events,
        TorrentHandles::new(workflow, inspector),
        manager.subscriptions(),
        telemetry,
    );

    info!(addr = %http_addr, "Launching API listener");
    let serve_result = api.serve(http_addr, shutdown_signal()).await;

    manager.shutdown().await;
    serve_result.map_err(|err| AppError::api_server("api_server.serve", err))?;
    info!("API server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
