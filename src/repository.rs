//! Repository records as returned by the GitHub GraphQL API
//!
//! These types mirror the GraphQL selection used by the fetch queries, so a
//! response page can be deserialized straight into them.

use serde::{Deserialize, Serialize};

/// Maximum number of topics requested per repository
pub const MAX_TOPICS: usize = 5;

/// A repository owned by a user or organization
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Full name, e.g. "acme/widgets". Unique key of the repository.
    pub name_with_owner: String,

    /// Whether the repository is a fork
    #[serde(default)]
    pub is_fork: bool,

    /// Whether the repository is archived
    #[serde(default)]
    pub is_archived: bool,

    /// Topics attached to the repository (at most [`MAX_TOPICS`])
    #[serde(default)]
    pub repository_topics: RepositoryTopics,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RepositoryTopics {
    pub nodes: Vec<TopicNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TopicNode {
    pub topic: Topic,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Topic {
    pub name: String,
}

impl Repository {
    pub fn new(name_with_owner: impl Into<String>) -> Self {
        Self {
            name_with_owner: name_with_owner.into(),
            is_fork: false,
            is_archived: false,
            repository_topics: RepositoryTopics::default(),
        }
    }

    pub fn fork(mut self) -> Self {
        self.is_fork = true;
        self
    }

    pub fn archived(mut self) -> Self {
        self.is_archived = true;
        self
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.repository_topics.nodes = topics
            .into_iter()
            .map(|name| TopicNode {
                topic: Topic { name: name.into() },
            })
            .collect();
        self
    }

    /// Topic names in the order the API returned them
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.repository_topics
            .nodes
            .iter()
            .map(|node| node.topic.name.as_str())
    }

    pub fn has_topics(&self) -> bool {
        !self.repository_topics.nodes.is_empty()
    }
}

/// One page of a repositories connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub nodes: Vec<Repository>,
    pub page_info: PageInfo,
}

/// Cursor information for a page
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

impl Page {
    /// Build the final page of a connection
    pub fn last(nodes: Vec<Repository>, total_count: u64) -> Self {
        Self {
            total_count,
            nodes,
            page_info: PageInfo {
                end_cursor: None,
                has_next_page: false,
            },
        }
    }

    /// Build a page that is followed by another one at `cursor`
    pub fn with_next(nodes: Vec<Repository>, total_count: u64, cursor: impl Into<String>) -> Self {
        Self {
            total_count,
            nodes,
            page_info: PageInfo {
                end_cursor: Some(cursor.into()),
                has_next_page: true,
            },
        }
    }
}
