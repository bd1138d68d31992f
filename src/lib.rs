//! gh-lor - List GitHub repositories for fuzzy finders
//!
//! gh-lor lists the repositories of a GitHub user and any number of
//! organizations, merges them with the previous run's cache, and streams one
//! deduplicated line per repository to standard output.
//!
//! ## Core Features
//!
//! - **GraphQL Pagination**: Cursor-driven fetching, 100 repositories per page
//! - **Concurrent Sources**: User, organizations and cache merged as they arrive
//! - **Deduplication**: First occurrence of a repository wins
//! - **Filtering**: Archived and forked repositories, pushed to the server where possible
//! - **Annotations**: Right-aligned archived / fork markers and topics
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`discovery`]: Query interface and paginated fetcher
//! - [`github`]: GitHub GraphQL client and authentication
//! - [`merge`]: Dedup merge pipeline
//! - [`engine`]: Run orchestration and cache persistence

pub mod cache;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod format;
pub mod github;
pub mod merge;
pub mod repository;

pub use config::Config;
pub use discovery::{Owner, Paginator, RepoFilter, RepositoryQuery};
pub use engine::{ListEngine, ListOptions, ListSummary};
pub use format::{format_line, DisplayOptions};
pub use github::GitHubClient;
pub use merge::{DedupKey, MergePipeline, MergeReport};
pub use repository::{Page, Repository};
