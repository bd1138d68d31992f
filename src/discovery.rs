//! Repository discovery
//!
//! This module provides the provider-agnostic query interface used to list the
//! repositories of an owner, and the paginated fetcher that drives it until
//! every page has been consumed.

use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::format::status_markers;
use crate::repository::{Page, Repository};

/// Number of repositories requested per page (GitHub's maximum)
pub const PAGE_SIZE: u32 = 100;

/// A GitHub user or organization login that owns repositories
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Owner {
    User(String),
    Organization(String),
}

impl Owner {
    pub fn login(&self) -> &str {
        match self {
            Owner::User(login) | Owner::Organization(login) => login,
        }
    }

    /// Whether the owner's repositories query accepts an `isFork` argument.
    ///
    /// The user query is pinned to `ownerAffiliations: OWNER` and forks are
    /// filtered locally for it.
    pub fn supports_fork_filter(&self) -> bool {
        matches!(self, Owner::Organization(_))
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::User(login) => write!(f, "user:{}", login),
            Owner::Organization(login) => write!(f, "org:{}", login),
        }
    }
}

/// Repository filters requested by the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RepoFilter {
    /// Drop archived repositories
    #[serde(default)]
    pub exclude_archived: bool,

    /// Drop forked repositories
    #[serde(default)]
    pub exclude_forks: bool,
}

impl RepoFilter {
    pub fn matches(&self, repo: &Repository) -> bool {
        self.admits(repo.is_archived, repo.is_fork)
    }

    /// Whether a cached display line passes the filter.
    ///
    /// Only status markers present in the line can be checked, so lines
    /// written without them always pass.
    pub fn matches_line(&self, line: &str) -> bool {
        let markers = status_markers(line);
        self.admits(markers.archived, markers.fork)
    }

    fn admits(&self, archived: bool, fork: bool) -> bool {
        !(self.exclude_archived && archived) && !(self.exclude_forks && fork)
    }
}

/// Arguments of a single page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Page size
    pub first: u32,
    /// Cursor of the previous page, `None` for the first page
    pub after: Option<String>,
    /// Server-side `isArchived` predicate
    pub is_archived: Option<bool>,
    /// Server-side `isFork` predicate
    pub is_fork: Option<bool>,
}

impl PageRequest {
    /// First request for `owner`, pushing down every filter the query supports
    pub fn first_page(owner: &Owner, filter: &RepoFilter, page_size: u32) -> Self {
        Self {
            first: page_size,
            after: None,
            is_archived: filter.exclude_archived.then_some(false),
            is_fork: (filter.exclude_forks && owner.supports_fork_filter()).then_some(false),
        }
    }
}

/// A paginated source of repositories
///
/// Implement this trait to plug in another transport; the GitHub GraphQL
/// implementation lives in [`crate::github`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepositoryQuery: Send + Sync {
    /// Fetch one page of the owner's repositories
    async fn fetch_page(&self, owner: &Owner, request: &PageRequest) -> Result<Page>;
}

/// Drives a [`RepositoryQuery`] through every page of an owner
#[derive(Clone)]
pub struct Paginator {
    query: Arc<dyn RepositoryQuery>,
    page_size: u32,
}

impl Paginator {
    pub fn new(query: Arc<dyn RepositoryQuery>) -> Self {
        Self {
            query,
            page_size: PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fetch every repository of `owner` matching `filter`
    pub async fn fetch_all(&self, owner: &Owner, filter: &RepoFilter) -> Result<Vec<Repository>> {
        info!("[{}]: getting repositories...", owner);

        let mut request = PageRequest::first_page(owner, filter, self.page_size);
        let mut repositories = Vec::new();
        let mut page_number = 1u32;

        loop {
            debug!("[{}]: getting page {}...", owner, page_number);

            let page = self.query.fetch_page(owner, &request).await?;

            if page_number == 1 {
                info!("[{}]: {} repositories reported", owner, page.total_count);
            }

            repositories.extend(page.nodes);

            debug!(
                owner = %owner,
                page = page_number,
                total = repositories.len(),
                "Fetched page"
            );

            if !page.page_info.has_next_page {
                break;
            }

            match page.page_info.end_cursor {
                Some(cursor) => request.after = Some(cursor),
                None => bail!(
                    "[{}]: page {} reports a next page without an end cursor",
                    owner,
                    page_number
                ),
            }
            page_number += 1;
        }

        let fetched = repositories.len();
        repositories.retain(|repo| filter.matches(repo));

        if repositories.len() != fetched {
            debug!(
                "[{}]: filtered {} repositories locally",
                owner,
                fetched - repositories.len()
            );
        }

        info!(
            "[{}]: found {} repositories in {} pages",
            owner,
            repositories.len(),
            page_number
        );
        Ok(repositories)
    }
}
