mod config;

use clap::{Args, Parser, Subcommand};
use config::{LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use query_frontend::errors::FrontendError;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const METRICS_PREFIX: &str = "frontend";

#[derive(Parser)]
#[command(name = "frontend", about = "Sharding frontend for trace lookups")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve trace lookups, fanning each one out to the querier
    QueryFrontend(QueryFrontendArgs),
}

#[derive(Args)]
struct QueryFrontendArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("config file has no query_frontend section")]
    MissingQueryFrontendConfig,
    #[error("could not start metrics exporter: {0}")]
    Metrics(String),
    #[error("could not start runtime: {0}")]
    Runtime(std::io::Error),
    #[error(transparent)]
    Frontend(#[from] FrontendError),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        CliCommand::QueryFrontend(args) => run_query_frontend(args),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Exiting");
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run_query_frontend(args: QueryFrontendArgs) -> Result<(), CliError> {
    let config = config::Config::from_file(&args.config_file_path)?;

    let logging = config.common.logging.clone().unwrap_or_default();
    // Keep the guard alive so queued events are flushed on exit
    let _sentry = init_logging(&logging);

    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    let query_frontend = config
        .query_frontend
        .ok_or(CliError::MissingQueryFrontendConfig)?;

    tracing::info!("Starting query-frontend");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    runtime.block_on(query_frontend::run(query_frontend))?;

    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let sentry_guard = logging.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    let sentry_layer = sentry_guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(sentry_layer)
        .init();

    sentry_guard
}

fn init_metrics(metrics: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(metrics.statsd_host.as_str(), metrics.statsd_port)
        .build(Some(METRICS_PREFIX))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;

    tracing::info!(
        host = %metrics.statsd_host,
        port = metrics.statsd_port,
        "Sending metrics to statsd"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_query_frontend_subcommand() {
        let cli = Cli::try_parse_from([
            "frontend",
            "query-frontend",
            "--config-file-path",
            "/etc/frontend.yaml",
        ])
        .unwrap();

        let CliCommand::QueryFrontend(args) = cli.command;
        assert_eq!(args.config_file_path, PathBuf::from("/etc/frontend.yaml"));
    }

    #[test]
    fn config_file_path_required() {
        assert!(Cli::try_parse_from(["frontend", "query-frontend"]).is_err());
    }
}
