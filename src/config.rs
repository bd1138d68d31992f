use anyhow::{Context, Result};
use dirs::{config_dir, data_dir, home_dir};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::discovery::RepoFilter;
use crate::format::{DisplayOptions, DEFAULT_LINE_WIDTH};
use crate::merge::DedupKey;

const APP_NAME: &str = "gh-lor";
const CACHE_FILE_NAME: &str = "cached-repos";
const LOG_FILE_NAME: &str = "logs.log";

/// Main configuration structure for gh-lor
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// GitHub user whose repositories are listed
    #[serde(default)]
    pub username: Option<String>,

    /// Organizations whose repositories are listed
    #[serde(default)]
    pub orgs: Vec<String>,

    /// GitHub authentication settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Repository filtering configuration
    #[serde(default)]
    pub filters: RepoFilter,

    /// Line rendering
    #[serde(default)]
    pub display: DisplayConfig,

    /// Cache file settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Fetch and merge behavior
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitHubConfig {
    /// Authentication method
    #[serde(default = "default_auth_method")]
    pub auth_method: String, // "auto", "gh_cli", "token"
}

/// Display configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DisplayConfig {
    /// Append the repository topics
    #[serde(default)]
    pub show_topics: bool,

    /// Append archived / fork markers
    #[serde(default = "default_true")]
    pub show_status: bool,

    /// Column width annotations are right-aligned to
    #[serde(default = "default_line_width")]
    pub line_width: usize,
}

/// Cache configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CacheConfig {
    /// Read and rewrite the cache file
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Explicit cache file, overrides the per-mode default
    #[serde(default)]
    pub file: Option<String>,
}

/// Fetch configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FetchConfig {
    /// Fail the run when any source fails
    #[serde(default)]
    pub strict: bool,

    /// What identifies a repository while merging
    #[serde(default)]
    pub dedup_key: DedupKey,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log file location
    #[serde(default)]
    pub file: Option<String>,
}

/// Values supplied on the command line, overriding the config file
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub username: Option<String>,
    pub orgs: Vec<String>,
    pub show_topics: bool,
    pub hide_status: bool,
    pub line_width: Option<usize>,
    pub exclude_archived: bool,
    pub exclude_forks: bool,
    pub cache_file: Option<String>,
    pub no_cache: bool,
    pub dedup_key: Option<DedupKey>,
    pub strict: bool,
}

// Default value functions
fn default_auth_method() -> String {
    "auto".to_string()
}
fn default_true() -> bool {
    true
}
fn default_line_width() -> usize {
    DEFAULT_LINE_WIDTH
}
fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            auth_method: default_auth_method(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_topics: false,
            show_status: default_true(),
            line_width: default_line_width(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            file: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Where the configuration in use came from
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    CreatedDefault(PathBuf),
    UnsavedDefault {
        path: PathBuf,
        error: anyhow::Error,
    },
}

impl Config {
    /// Load configuration from the default location or create a default config.
    ///
    /// Nothing is logged here since logging is configured from the result;
    /// the returned [`ConfigSource`] says what happened.
    pub fn load_or_default() -> Result<(Self, ConfigSource)> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            let config = Self::load(&config_path)?;
            return Ok((config, ConfigSource::File(config_path)));
        }

        let config = Self::default();

        // A read-only config dir must not stop the listing
        let source = match config.save(&config_path) {
            Ok(()) => ConfigSource::CreatedDefault(config_path),
            Err(error) => ConfigSource::UnsavedDefault {
                path: config_path,
                error,
            },
        };

        Ok((config, source))
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        // Expand environment variables in paths
        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join(APP_NAME).join("config.yml"))
    }

    /// Per-application state directory (~/.local/share/gh-lor on Linux)
    pub fn state_dir() -> Result<PathBuf> {
        let base = data_dir()
            .or_else(|| home_dir().map(|home| home.join(".local").join("share")))
            .context("Failed to get user data directory")?;

        Ok(base.join(APP_NAME))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        if let Some(file) = &self.cache.file {
            self.cache.file = Some(
                shellexpand::full(file)
                    .context("Failed to expand cache file path")?
                    .into_owned(),
            );
        }

        if let Some(file) = &self.logging.file {
            self.logging.file = Some(
                shellexpand::full(file)
                    .context("Failed to expand log file path")?
                    .into_owned(),
            );
        }

        Ok(())
    }

    /// Overlay command line values on top of the file configuration
    pub fn apply_cli(&mut self, cli: CliOverrides) -> Result<()> {
        if let Some(username) = cli.username.filter(|name| !name.trim().is_empty()) {
            self.username = Some(username.trim().to_string());
        }

        let orgs = normalize_orgs(cli.orgs);
        if !orgs.is_empty() {
            self.orgs = orgs;
        }

        self.display.show_topics |= cli.show_topics;
        if cli.hide_status {
            self.display.show_status = false;
        }
        if let Some(width) = cli.line_width {
            self.display.line_width = width;
        }

        self.filters.exclude_archived |= cli.exclude_archived;
        self.filters.exclude_forks |= cli.exclude_forks;

        if let Some(file) = cli.cache_file {
            self.cache.file = Some(file);
        }
        if cli.no_cache {
            self.cache.enabled = false;
        }

        if let Some(dedup_key) = cli.dedup_key {
            self.fetch.dedup_key = dedup_key;
        }
        self.fetch.strict |= cli.strict;

        self.expand_paths()
    }

    /// Whether at least one owner has been configured
    pub fn has_owner(&self) -> bool {
        self.username.is_some() || !self.orgs.is_empty()
    }

    pub fn display_options(&self) -> DisplayOptions {
        DisplayOptions {
            show_status: self.display.show_status,
            show_topics: self.display.show_topics,
            width: self.display.line_width,
        }
    }

    /// Resolve the cache file for the current display mode and filters.
    ///
    /// Each combination gets its own file, so a filtered run never reads back
    /// lines an unfiltered run stored.
    pub fn cache_path(&self) -> Result<Option<PathBuf>> {
        if !self.cache.enabled {
            return Ok(None);
        }

        if let Some(file) = &self.cache.file {
            return Ok(Some(PathBuf::from(file)));
        }

        Ok(Some(
            Self::state_dir()?.join(cache_file_name(&self.display_options(), &self.filters)),
        ))
    }

    /// Resolve the log file location
    pub fn log_path(&self) -> Result<PathBuf> {
        match &self.logging.file {
            Some(file) => Ok(PathBuf::from(file)),
            None => Ok(Self::state_dir()?.join(LOG_FILE_NAME)),
        }
    }
}

/// Cache file name for a display mode and filter combination
pub fn cache_file_name(display: &DisplayOptions, filter: &RepoFilter) -> String {
    let mut name = CACHE_FILE_NAME.to_string();
    if !display.show_status {
        name.push_str("-plain");
    }
    if display.show_topics {
        name.push_str("-topics");
    }
    if filter.exclude_archived {
        name.push_str("-noarchived");
    }
    if filter.exclude_forks {
        name.push_str("-nofork");
    }
    if display.width != DEFAULT_LINE_WIDTH {
        name.push_str(&format!("-w{}", display.width));
    }
    name
}

/// Trim organization names and drop empty entries
pub fn normalize_orgs(orgs: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(orgs.len());
    for org in orgs {
        let org = org.trim();
        if !org.is_empty() && !normalized.iter().any(|seen| seen == org) {
            normalized.push(org.to_string());
        }
    }
    normalized
}
