//! Command-line front end.
//!
//! - `init` writes a default configuration file
//! - `run` harvests radar images for a time window
//!
//! [`run`] is the async entry point shared by `main` and the tests; it
//! never initializes logging itself.

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, info_span, warn};

use crate::config::{HarvesterConfig, DEFAULT_CONFIG_PATH};
use crate::executor::{HarvestExecutor, SessionOutcome};
use crate::harvest::{HarvestError, HarvestOrchestrator};
use crate::sources::SmnSource;
use crate::store::FlatFileStore;
use crate::timing::resolve_window;

/// Scheduled weather-radar image harvester.
#[derive(Debug, Parser)]
#[command(name = "radar-harvester", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Write the default configuration file
    Init {
        /// Configuration file to create
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Harvest radar images over a time window
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Output directory, overrides client.repository_path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Window start (ISO 8601 date and time), defaults to now
    #[arg(short, long, value_name = "ISO_DATE_TIME")]
    pub start: Option<String>,

    /// Window end (ISO 8601 date and time), takes precedence over --scan-period
    #[arg(short, long, value_name = "ISO_DATE_TIME")]
    pub end: Option<String>,

    /// Window length (ISO 8601 duration), defaults to PT24H
    #[arg(
        short = 'p',
        long = "scan-period",
        visible_alias = "window",
        value_name = "ISO_DURATION"
    )]
    pub window: Option<String>,

    /// Station ids or station groups, defaults to the `radars` group
    #[arg(short, long = "ids", value_name = "ID", num_args = 1..)]
    pub ids: Vec<String>,

    /// Log everything down to debug messages
    #[arg(short = 'D', long, group = "verbosity")]
    pub debug: bool,

    /// Log progress messages
    #[arg(short = 'V', long, group = "verbosity")]
    pub verbose: bool,

    /// Log errors only (default)
    #[arg(short = 'Q', long, group = "verbosity")]
    pub quiet: bool,

    /// Log nothing
    #[arg(short = 'S', long, group = "verbosity")]
    pub silent: bool,
}

impl Cli {
    /// Default `tracing` filter for the selected verbosity.
    pub fn log_filter(&self) -> &'static str {
        match &self.command {
            Commands::Init { .. } => "info",
            Commands::Run(args) if args.debug => "debug",
            Commands::Run(args) if args.verbose => "info",
            Commands::Run(args) if args.silent => "off",
            Commands::Run(_) => "error",
        }
    }
}

pub async fn run(cli: Cli) -> Result<(), HarvestError> {
    match cli.command {
        Commands::Init { config, force } => init(config, force).await,
        Commands::Run(args) => harvest(args).await,
    }
}

async fn init(path: PathBuf, force: bool) -> Result<(), HarvestError> {
    if !force && tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(HarvestError::Config(format!(
            "{} already exists, use --force to overwrite it",
            path.display()
        )));
    }

    HarvesterConfig::default().save(&path).await.map_err(|e| {
        HarvestError::Config(format!("cannot write {}: {e}", path.display()))
    })?;

    info!(config_path = %path.display(), "Default configuration written");
    Ok(())
}

async fn harvest(args: RunArgs) -> Result<(), HarvestError> {
    let config = HarvesterConfig::load(&args.config).await?;

    let ids = config.resolve_ids(&args.ids)?;
    let window = resolve_window(
        Utc::now(),
        args.start.as_deref(),
        args.end.as_deref(),
        args.window.as_deref(),
        config.scan_interval()?,
    )?;

    let output = args
        .output
        .unwrap_or_else(|| config.client.repository_path.clone());
    let store = FlatFileStore::new(&output);
    store.ensure_root().await.map_err(|e| {
        HarvestError::Config(format!("cannot create {}: {e}", output.display()))
    })?;

    let source = SmnSource::new(&config)?;
    let mut orchestrator = HarvestOrchestrator::new(source, store)
        .with_span(info_span!("harvest", source = "smn"));
    if let Some(limit) = config.timing.max_consecutive_renewals {
        orchestrator = orchestrator.with_renewal_limit(limit);
    }

    info!(
        ids = ?ids,
        output = %output.display(),
        start = %window.start(),
        end = %window.end(),
        "Harvest scheduled"
    );

    let executor = HarvestExecutor::new(orchestrator);
    match executor.execute(ids, window, shutdown_signal()).await? {
        SessionOutcome::Completed(stats) => {
            info!(
                cycles = stats.cycles,
                renewals = stats.renewals,
                downloaded = stats.downloaded,
                abandoned = stats.abandoned,
                "Harvest complete"
            );
        }
        SessionOutcome::Interrupted => info!("Harvest interrupted by user"),
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_parse_run_arguments() {
        let cli = parse(&[
            "radar-harvester",
            "run",
            "-s",
            "2024-01-01T00:00:00Z",
            "-p",
            "PT1H",
            "-i",
            "RMA4_240",
            "mosaics",
            "-o",
            "/tmp/radar",
        ]);

        let Commands::Run(args) = &cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.start.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(args.window.as_deref(), Some("PT1H"));
        assert_eq!(args.ids, vec!["RMA4_240".to_string(), "mosaics".to_string()]);
        assert_eq!(args.output, Some(PathBuf::from("/tmp/radar")));
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_scan_period_long_form_and_alias() {
        for flag in ["--scan-period", "--window"] {
            let cli = parse(&["radar-harvester", "run", flag, "PT6H"]);
            let Commands::Run(args) = &cli.command else {
                panic!("expected run command");
            };
            assert_eq!(args.window.as_deref(), Some("PT6H"));
        }
    }

    #[test]
    fn test_verbosity_flags_map_to_filters() {
        assert_eq!(parse(&["radar-harvester", "run"]).log_filter(), "error");
        assert_eq!(parse(&["radar-harvester", "run", "-D"]).log_filter(), "debug");
        assert_eq!(parse(&["radar-harvester", "run", "-V"]).log_filter(), "info");
        assert_eq!(parse(&["radar-harvester", "run", "-S"]).log_filter(), "off");
    }

    #[test]
    fn test_verbosity_flags_conflict() {
        assert!(Cli::try_parse_from(["radar-harvester", "run", "-D", "-S"]).is_err());
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let path_arg = path.to_str().unwrap();

        run(parse(&["radar-harvester", "init", "-c", path_arg]))
            .await
            .unwrap();
        assert!(HarvesterConfig::load(&path).await.is_ok());

        let again = run(parse(&["radar-harvester", "init", "-c", path_arg])).await;
        assert!(matches!(again, Err(HarvestError::Config(_))));

        run(parse(&["radar-harvester", "init", "-c", path_arg, "--force"]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_without_config_exits_with_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.json");

        let result = run(parse(&["radar-harvester", "run", "-c", path.to_str().unwrap()])).await;

        let error = result.unwrap_err();
        assert!(matches!(error, HarvestError::Config(_)));
        assert_eq!(error.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_run_rejects_inverted_window() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        HarvesterConfig::default().save(&path).await.unwrap();

        let result = run(parse(&[
            "radar-harvester",
            "run",
            "-c",
            path.to_str().unwrap(),
            "-s",
            "2024-01-01T12:00:00Z",
            "-e",
            "2024-01-01T11:00:00Z",
        ]))
        .await;

        assert!(matches!(result, Err(HarvestError::Time(_))));
    }
}
