// src/main.rs
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

mod config;
mod coverage;
mod health;
mod metrics;
mod migrate;
mod probe;
mod server;
mod startup;

use crate::{
    config::Config,
    health::HealthMonitor,
    metrics::{MetricsCollector, MetricsRegistry},
    probe::{HttpProbe, PostgresProbe, Probe, ReadinessProber, TcpProbe},
    server::{AppHandler, AppState, ServerBuilder, ServerError},
    startup::{GateReport, StartupGate},
};

#[derive(Parser)]
#[command(
    name = "bootgate",
    version,
    about = "Wait for the database, apply migrations, then serve"
)]
struct Cli {
    /// Configuration file (YAML or JSON); environment variables override it
    #[arg(long, global = true, env = "BOOTGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full startup gate and serve until shutdown
    Serve,

    /// Apply pending migrations and exit
    Migrate {
        /// Fail immediately if the database is down instead of waiting
        #[arg(long)]
        no_wait: bool,
    },

    /// Block until the database accepts connections
    WaitDb {
        /// Probe with a bare TCP connect instead of a SQL round trip
        #[arg(long)]
        tcp: bool,

        /// Give up after this many attempts (default: retry forever)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_attempts: Option<u32>,

        /// Give up after this many seconds (default: no deadline)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        deadline_secs: Option<u64>,
    },

    /// One-shot health check, exit status carries the verdict
    #[command(subcommand)]
    Check(CheckTarget),

    /// Fail when line coverage in an LCOV report is below the floor
    CoverageGate {
        /// LCOV tracefile, e.g. target/coverage/lcov.info
        report: PathBuf,

        /// Override the configured minimum percentage
        #[arg(long)]
        min_percent: Option<f64>,
    },
}

#[derive(Subcommand)]
enum CheckTarget {
    /// Connect, ping and disconnect the database
    Db,

    /// GET the running application's health endpoint
    App {
        #[arg(long, default_value = "http://127.0.0.1:8000/healthz")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A .env file is a convenience for local runs; in containers the
    // orchestrator injects the real environment.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bootgate=info".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    let config = config::load_or_default(cli.config.as_deref()).await?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Migrate { no_wait } => run_migrations(config, no_wait).await,
        Command::WaitDb {
            tcp,
            max_attempts,
            deadline_secs,
        } => wait_db(config, tcp, max_attempts, deadline_secs).await,
        Command::Check(target) => check(config, target).await,
        Command::CoverageGate {
            report,
            min_percent,
        } => {
            let floor = min_percent.unwrap_or(config.coverage.min_percent);
            coverage::run_gate(&report, floor).await?;
            Ok(())
        }
    }
}

/// The full gate: probe until the database answers, migrate, then bind.
async fn serve(config: Config) -> Result<()> {
    let registry = MetricsRegistry::new()?;
    let metrics = registry.collector();
    let addr = config.server.addr()?;

    let prober = ReadinessProber::new(config.probe.clone(), Some(metrics.clone()));
    let db_probe = PostgresProbe::new(&config.database);
    let gate = StartupGate::new(Some(metrics.clone()));

    let report = gate
        .run(
            || async { prober.wait_until_ready(&db_probe).await },
            || async {
                migrate::apply_pending(
                    &config.database,
                    &config.migrations.dir,
                    Some(metrics.clone()),
                )
                .await
            },
            |report| serve_app(&config, addr, registry, metrics.clone(), report),
        )
        .await?;

    info!(
        "Shutdown complete (gate run {}, {} migration(s) applied at boot)",
        report.run_id, report.migrations_applied
    );
    Ok(())
}

/// Everything that happens after the gate passes: asset volumes, the
/// background database monitor, and the HTTP accept loop.
async fn serve_app(
    config: &Config,
    addr: SocketAddr,
    registry: MetricsRegistry,
    metrics: Arc<MetricsCollector>,
    report: GateReport,
) -> Result<(), ServerError> {
    server::prepare_asset_dirs(&config.server).await?;

    let db_probe: Arc<dyn Probe> = Arc::new(PostgresProbe::new(&config.database));
    let monitor = Arc::new(HealthMonitor::new(
        config.health_check.clone(),
        db_probe,
        Some(metrics),
    ));
    let db_health = monitor.subscribe();
    let monitor_task = tokio::spawn(monitor.clone().run());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let state = Arc::new(AppState {
        started_at: report.started_at,
        registry,
        db_health,
    });

    info!("Launching application server on {} (gate run {})", addr, report.run_id);
    let result = ServerBuilder::new(addr)
        .with_handler(AppHandler::new(state))
        .serve(shutdown_rx)
        .await;

    monitor.shutdown();
    let _ = monitor_task.await;
    result
}

async fn run_migrations(config: Config, no_wait: bool) -> Result<()> {
    if !no_wait {
        let prober = ReadinessProber::new(config.probe.clone(), None);
        let db_probe = PostgresProbe::new(&config.database);
        prober.wait_until_ready(&db_probe).await?;
    }

    let report = migrate::apply_pending(&config.database, &config.migrations.dir, None).await?;
    if report.applied.is_empty() {
        info!(
            "Nothing to apply; {} migration(s) already in place",
            report.previously_applied
        );
    } else {
        info!(
            "Applied {} migration(s) in {:?}: {}",
            report.applied.len(),
            report.duration,
            report.applied.join(", ")
        );
    }
    Ok(())
}

async fn wait_db(
    mut config: Config,
    tcp: bool,
    max_attempts: Option<u32>,
    deadline_secs: Option<u64>,
) -> Result<()> {
    if max_attempts.is_some() {
        config.probe.max_attempts = max_attempts;
    }
    if deadline_secs.is_some() {
        config.probe.deadline_secs = deadline_secs;
    }

    let prober = ReadinessProber::new(config.probe.clone(), None);
    let report = if tcp {
        let db_probe = TcpProbe::for_database(&config.database);
        prober.wait_until_ready(&db_probe).await?
    } else {
        let db_probe = PostgresProbe::new(&config.database);
        prober.wait_until_ready(&db_probe).await?
    };

    info!(
        "Database available after {} attempt(s) in {:?}",
        report.attempts, report.elapsed
    );
    Ok(())
}

async fn check(config: Config, target: CheckTarget) -> Result<()> {
    let probe: Box<dyn Probe> = match target {
        CheckTarget::Db => Box::new(PostgresProbe::new(&config.database)),
        CheckTarget::App { url } => Box::new(HttpProbe::new(url, config.health_check.timeout())),
    };

    probe.check().await?;
    info!("{} is healthy", probe.target());
    Ok(())
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
