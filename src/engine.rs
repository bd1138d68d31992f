//! List Engine - Orchestrates one listing run
//!
//! Wires the configured sources into the merge pipeline, streams the result
//! to the output, and persists the merged set back to the cache file.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use crate::cache;
use crate::discovery::{Paginator, RepoFilter, RepositoryQuery};
use crate::format::DisplayOptions;
use crate::merge::{DedupKey, MergePipeline};
use crate::Config;

/// Everything a run needs besides the query collaborator
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub username: Option<String>,
    pub orgs: Vec<String>,
    pub filter: RepoFilter,
    pub display: DisplayOptions,
    pub dedup_key: DedupKey,
    pub cache_path: Option<PathBuf>,
    pub strict: bool,
}

impl ListOptions {
    /// Derive the run options from a fully merged configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            username: config.username.clone(),
            orgs: config.orgs.clone(),
            filter: config.filters,
            display: config.display_options(),
            dedup_key: config.fetch.dedup_key,
            cache_path: config.cache_path()?,
            strict: config.fetch.strict,
        })
    }
}

/// Results from a complete listing run
#[derive(Debug, Clone)]
pub struct ListSummary {
    pub total_entries: usize,
    pub failed_sources: Vec<String>,
    pub cache_written: bool,
    pub duration: Duration,
}

/// Runs the merge pipeline and maintains the cache file
pub struct ListEngine {
    paginator: Paginator,
    options: ListOptions,
}

impl ListEngine {
    pub fn new(query: Arc<dyn RepositoryQuery>, options: ListOptions) -> Self {
        Self {
            paginator: Paginator::new(query),
            options,
        }
    }

    /// List every repository into `sink` and rewrite the cache.
    ///
    /// In strict mode any failed source fails the run and the cache is left
    /// untouched.
    pub async fn run<W: Write>(&self, sink: &mut W) -> Result<ListSummary> {
        let start_time = Instant::now();
        let options = &self.options;

        info!(
            "Listing repositories: user={:?}, orgs={:?}, cache={:?}",
            options.username, options.orgs, options.cache_path
        );

        let report = MergePipeline::new(self.paginator.clone())
            .with_cache(options.cache_path.clone())
            .with_user(options.username.clone())
            .with_orgs(options.orgs.clone())
            .with_filter(options.filter)
            .with_display(options.display)
            .with_dedup_key(options.dedup_key)
            .run(sink)
            .await
            .context("Failed to merge repository sources")?;

        for failure in &report.failures {
            warn!("Source failed: {}", failure);
        }

        let failed_sources: Vec<String> = report
            .failures
            .iter()
            .map(|failure| failure.source.clone())
            .collect();

        if options.strict && !report.is_complete() {
            let details: Vec<String> = report.failures.iter().map(ToString::to_string).collect();
            bail!(
                "{} source(s) failed:\n  {}",
                details.len(),
                details.join("\n  ")
            );
        }

        let cache_written = match &options.cache_path {
            Some(path) => {
                info!(
                    "Saving {} unique repositories to cache file: {:?}",
                    report.entries.len(),
                    path
                );
                match cache::write_entries(path, &report.entries).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Error writing cache file: {:#}", e);
                        false
                    }
                }
            }
            None => false,
        };

        let summary = ListSummary {
            total_entries: report.entries.len(),
            failed_sources,
            cache_written,
            duration: start_time.elapsed(),
        };

        info!(
            "Listing completed in {:.2}s: {} repositories, {} failed sources",
            summary.duration.as_secs_f64(),
            summary.total_entries,
            summary.failed_sources.len()
        );

        Ok(summary)
    }
}
