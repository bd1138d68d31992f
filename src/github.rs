use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use octocrab::Octocrab;
use serde_json::{json, Value};
use std::env;
use std::process::Command;
use tracing::{debug, info};

use crate::config::Config;
use crate::discovery::{Owner, PageRequest, RepositoryQuery};
use crate::repository::{Page, MAX_TOPICS};

const REPOSITORY_FIELDS: &str = r#"
      totalCount
      pageInfo { endCursor hasNextPage }
      nodes {
        nameWithOwner
        isFork
        isArchived
        repositoryTopics(first: $topics) { nodes { topic { name } } }
      }"#;

/// GitHub GraphQL client with authentication management
#[derive(Clone)]
pub struct GitHubClient {
    client: Octocrab,
}

/// Where the API token was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// `gh auth token`
    GhCli,
    /// The `GITHUB_TOKEN` variable
    Environment,
}

impl TokenSource {
    /// Sources to try, in order, for an `auth_method` setting
    pub fn for_method(method: &str) -> Result<&'static [TokenSource]> {
        match method {
            "auto" => Ok(&[TokenSource::GhCli, TokenSource::Environment]),
            "gh_cli" => Ok(&[TokenSource::GhCli]),
            "token" => Ok(&[TokenSource::Environment]),
            other => bail!("Unknown auth method: {}", other),
        }
    }

    fn read(self) -> Result<String> {
        let token = match self {
            TokenSource::GhCli => gh_cli_token()?,
            TokenSource::Environment => {
                env::var("GITHUB_TOKEN").context("GITHUB_TOKEN is not set")?
            }
        };

        let token = token.trim().to_string();
        if token.is_empty() {
            bail!("{:?} returned an empty token", self);
        }
        Ok(token)
    }
}

fn gh_cli_token() -> Result<String> {
    let output = Command::new("gh")
        .args(["auth", "token"])
        .output()
        .context("Could not run `gh auth token`")?;

    if !output.status.success() {
        bail!(
            "`gh auth token` failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    String::from_utf8(output.stdout).context("gh returned a non UTF-8 token")
}

/// First token available from the sources configured by `auth_method`
fn resolve_token(method: &str) -> Result<(TokenSource, String)> {
    let mut failures = Vec::new();

    for &source in TokenSource::for_method(method)? {
        match source.read() {
            Ok(token) => return Ok((source, token)),
            Err(e) => {
                debug!("No token from {:?}: {:#}", source, e);
                failures.push(format!("{:?}: {:#}", source, e));
            }
        }
    }

    bail!(
        "No GitHub token found (run `gh auth login` or set GITHUB_TOKEN):\n  {}",
        failures.join("\n  ")
    )
}

impl GitHubClient {
    /// Authenticate with the configured token sources
    pub fn new(config: &Config) -> Result<Self> {
        let (source, token) = resolve_token(&config.github.auth_method)?;
        info!("Authenticated with token from {:?}", source);

        let client = Octocrab::builder()
            .personal_token(token)
            .build()
            .context("Failed to create GitHub client")?;

        Ok(Self { client })
    }

    /// Wrap an already configured octocrab instance
    pub fn with_octocrab(client: Octocrab) -> Self {
        Self { client }
    }
}

/// Build the GraphQL payload for one page of an owner's repositories
fn build_repositories_query(owner: &Owner, request: &PageRequest) -> Value {
    let query = match owner {
        Owner::User(_) => format!(
            r#"query GetUserRepositories($login: String!, $first: Int!, $after: String, $isArchived: Boolean, $topics: Int!) {{
  user(login: $login) {{
    repositories(ownerAffiliations: OWNER, first: $first, after: $after, isArchived: $isArchived) {{{fields}
    }}
  }}
}}"#,
            fields = REPOSITORY_FIELDS
        ),
        Owner::Organization(_) => format!(
            r#"query GetOrgRepositories($login: String!, $first: Int!, $after: String, $isArchived: Boolean, $isFork: Boolean, $topics: Int!) {{
  organization(login: $login) {{
    repositories(first: $first, after: $after, isArchived: $isArchived, isFork: $isFork) {{{fields}
    }}
  }}
}}"#,
            fields = REPOSITORY_FIELDS
        ),
    };

    let mut variables = json!({
        "login": owner.login(),
        "first": request.first,
        "after": request.after,
        "isArchived": request.is_archived,
        "topics": MAX_TOPICS,
    });
    if let Owner::Organization(_) = owner {
        variables["isFork"] = json!(request.is_fork);
    }

    json!({ "query": query, "variables": variables })
}

/// Extract the repositories connection from a GraphQL response
fn parse_repositories_response(owner: &Owner, response: Value) -> Result<Page> {
    if let Some(errors) = response.get("errors") {
        let error_msg = serde_json::to_string_pretty(errors).unwrap_or_default();
        bail!("GraphQL error for {}: {}", owner, error_msg);
    }

    let data = response
        .get("data")
        .context("Missing 'data' field in GraphQL response")?;

    let root = match owner {
        Owner::User(_) => "user",
        Owner::Organization(_) => "organization",
    };

    let connection = data
        .get(root)
        .filter(|value| !value.is_null())
        .with_context(|| format!("{} not found or inaccessible", owner))?
        .get("repositories")
        .context("Missing 'repositories' field in GraphQL response")?;

    serde_json::from_value(connection.clone())
        .with_context(|| format!("Failed to parse repositories page for {}", owner))
}

#[async_trait]
impl RepositoryQuery for GitHubClient {
    async fn fetch_page(&self, owner: &Owner, request: &PageRequest) -> Result<Page> {
        let payload = build_repositories_query(owner, request);

        let response: Value = self
            .client
            .graphql(&payload)
            .await
            .with_context(|| format!("Failed to execute GraphQL query for {}", owner))?;

        parse_repositories_response(owner, response)
    }
}
