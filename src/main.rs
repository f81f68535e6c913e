use std::sync::Arc;

use chrono::Local;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use case_dispatch::adapters::{DigitalPostGateway, HttpCaseSystem, HttpRegistry};
use case_dispatch::config::{AppConfig, TelemetryConfig};
use case_dispatch::error::{Error, SetupError};
use case_dispatch::letter::PdfLetterRenderer;
use case_dispatch::pipeline::{RunController, RunReport};
use case_dispatch::store::LibSqlBackend;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  See .env.example for the required CASE_SYSTEM_*, POSTAL_* and REGISTRY_* variables");
        std::process::exit(1);
    });

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_tracing(&config.telemetry);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting case dispatch run");

    match run(config).await {
        Ok(report) => {
            if !report.poisoned.is_empty() {
                warn!(
                    cases = ?report.poisoned,
                    "Cases with duplicate queue records need manual review"
                );
            }
            if !report.exhausted.is_empty() {
                warn!(
                    cases = ?report.exhausted,
                    "Cases that used every dispatch attempt need manual review"
                );
            }
            if !report.failures.is_empty() {
                warn!(failed = report.failures.len(), "Run finished with failed cases");
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Run failed");
            Err(e.into())
        }
    }
}

/// Build every collaborator, then run one batch. Setup failures return
/// before any case is touched.
async fn run(config: AppConfig) -> Result<RunReport, Error> {
    let queue = LibSqlBackend::new_local(&config.db_path)
        .await
        .map_err(|e| SetupError::Store(e.to_string()))?;

    let dispatch = Arc::new(config.dispatch);
    let timeout = config.http_timeout;

    let cases = HttpCaseSystem::new(&config.case_system, dispatch.approved_status.clone(), timeout)?;
    let postal = DigitalPostGateway::new(&config.postal, timeout)?;
    let registry = HttpRegistry::new(&config.registry, dispatch.registry.clone(), timeout)?;
    let renderer = PdfLetterRenderer::from_letterhead(
        dispatch.letterhead.clone(),
        dispatch.delivery.file_name.clone(),
    )?;

    let controller = RunController::new(
        Arc::new(cases),
        Arc::new(queue),
        Arc::new(renderer),
        Arc::new(postal),
        Arc::new(registry),
        dispatch,
    );

    let report = controller.run(Local::now().date_naive()).await?;
    Ok(report)
}

fn init_tracing(telemetry: &TelemetryConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&telemetry.log_level));
    let console = fmt::layer().with_target(false);

    match &telemetry.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "case-dispatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(
                    fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(console).init();
            None
        }
    }
}
