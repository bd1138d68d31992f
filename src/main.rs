use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gh_lor::config::{CliOverrides, ConfigSource};
use gh_lor::{Config, DedupKey, GitHubClient, ListEngine, ListOptions};

const USAGE: &str = "Usage: gh-lor [--username <username>] [--orgs <org1,org2,...>]";

#[derive(Parser)]
#[command(name = "gh-lor")]
#[command(about = "List GitHub user and organization repositories for fuzzy finders")]
#[command(version)]
struct Cli {
    /// GitHub username to fetch repositories for
    #[arg(long)]
    username: Option<String>,

    /// Comma-separated list of GitHub organizations to fetch repositories for
    #[arg(long, value_delimiter = ',')]
    orgs: Vec<String>,

    /// Append repository topics to each line
    #[arg(long)]
    show_topics: bool,

    /// Do not mark archived and forked repositories
    #[arg(long)]
    no_status: bool,

    /// Column width annotations are right-aligned to
    #[arg(long)]
    width: Option<usize>,

    /// Skip archived repositories
    #[arg(long)]
    no_archived: bool,

    /// Skip forked repositories
    #[arg(long)]
    no_fork: bool,

    /// Cache file to read and rewrite (defaults to the state directory)
    #[arg(long)]
    cache_file: Option<String>,

    /// Neither read nor write the cache file
    #[arg(long, conflicts_with = "cache_file")]
    no_cache: bool,

    /// What identifies a repository while merging
    #[arg(long, value_enum)]
    dedup_by: Option<DedupBy>,

    /// Fail when any user or organization cannot be fetched
    #[arg(long)]
    strict: bool,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum DedupBy {
    /// Repository name with owner
    Name,

    /// Full display line including annotations
    Line,
}

impl From<DedupBy> for DedupKey {
    fn from(value: DedupBy) -> Self {
        match value {
            DedupBy::Name => DedupKey::Name,
            DedupBy::Line => DedupKey::Line,
        }
    }
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            username: self.username.clone(),
            orgs: self.orgs.clone(),
            show_topics: self.show_topics,
            hide_status: self.no_status,
            line_width: self.width,
            exclude_archived: self.no_archived,
            exclude_forks: self.no_fork,
            cache_file: self.cache_file.clone(),
            no_cache: self.no_cache,
            dedup_key: self.dedup_by.map(DedupKey::from),
            strict: self.strict,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let (mut config, source) = load_config(cli.config.clone())?;
    config.apply_cli(cli.overrides())?;

    if !config.has_owner() {
        eprintln!("{}", USAGE);
        eprintln!();
        eprintln!("At least one of --username or --orgs must be provided (or set in the config file).");
        eprintln!();
        eprintln!("{}", Cli::command().render_help());
        std::process::exit(1);
    }

    init_logging(&config, cli.verbose)?;
    info!("Starting gh-lor v{}", env!("CARGO_PKG_VERSION"));
    log_config_source(&source);

    let options = ListOptions::from_config(&config)?;
    let client = GitHubClient::new(&config)?;
    let engine = ListEngine::new(Arc::new(client), options);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    engine.run(&mut out).await?;

    Ok(())
}

/// Initialize logging to the log file so stdout stays clean for the finder
fn init_logging(config: &Config, verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()))
    };

    let log_path = config.log_path()?;
    let log_file = log_path
        .parent()
        .map_or(Ok(()), std::fs::create_dir_all)
        .and_then(|_| OpenOptions::new().create(true).append(true).open(&log_path));

    match log_file {
        Ok(file) => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .with(filter)
                .init();
            info!("Logging output to {:?}", log_path);
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
            warn!("Could not open log file {:?}: {}", log_path, e);
        }
    }

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<PathBuf>) -> Result<(Config, ConfigSource)> {
    match config_path {
        Some(path) => Config::load(&path).map(|config| (config, ConfigSource::File(path))),
        None => Config::load_or_default(),
    }
    .context("Failed to load configuration")
}

fn log_config_source(source: &ConfigSource) {
    match source {
        ConfigSource::File(path) => info!("Using configuration from {:?}", path),
        ConfigSource::CreatedDefault(path) => {
            info!("Created default configuration at: {:?}", path)
        }
        ConfigSource::UnsavedDefault { path, error } => {
            warn!("Could not write default configuration to {:?}: {:#}", path, error)
        }
    }
}
