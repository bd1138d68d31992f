//! Dedup merge pipeline
//!
//! Fans in candidates from the cache file and from one fetch per owner,
//! forwards each repository the first time its key is seen, and streams the
//! resulting lines to the output sink as they arrive.
//!
//! Task layout for one run:
//!
//! ```text
//! cache task ─┐
//!             ├─> unbounded channel ─> consumer (sink + collected entries)
//! api task ───┘        ^
//!   ├─ user fetch      │ closed by the closer task once every
//!   └─ org group       │ producer handle has completed
//!        └─ one task per organization
//! ```

use std::collections::HashSet;
use std::fmt;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::cache;
use crate::discovery::{Owner, Paginator, RepoFilter};
use crate::format::{format_line, DisplayOptions};
use crate::repository::Repository;

/// What identifies a repository while merging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupKey {
    /// The repository's `nameWithOwner`
    #[default]
    Name,
    /// The full formatted display line
    Line,
}

/// A line offered to the pipeline together with its dedup key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub key: String,
    pub line: String,
}

impl DedupKey {
    pub fn for_repository(self, repo: &Repository, display: &DisplayOptions) -> Candidate {
        let line = format_line(repo, display);
        let key = match self {
            DedupKey::Name => repo.name_with_owner.clone(),
            DedupKey::Line => line.clone(),
        };
        Candidate { key, line }
    }

    /// Candidate for a line read back from the cache file.
    ///
    /// Cached lines may carry annotations, so in name mode the key is the
    /// leading `owner/name` token.
    pub fn for_cached_line(self, line: &str) -> Candidate {
        let line = line.trim();
        let key = match self {
            DedupKey::Name => line.split_whitespace().next().unwrap_or_default(),
            DedupKey::Line => line,
        };
        Candidate {
            key: key.to_string(),
            line: line.to_string(),
        }
    }
}

/// Keys already forwarded during one run
#[derive(Debug, Default)]
pub struct SeenSet {
    keys: Mutex<HashSet<String>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key`, returning true only for its first occurrence.
    /// Empty keys are never recorded.
    pub fn insert(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        keys.insert(key.to_string())
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Producer handle onto the shared channel
#[derive(Clone)]
pub struct Emitter {
    seen: Arc<SeenSet>,
    tx: mpsc::UnboundedSender<String>,
}

impl Emitter {
    pub fn new(seen: Arc<SeenSet>, tx: mpsc::UnboundedSender<String>) -> Self {
        Self { seen, tx }
    }

    /// Forward the candidate if its key has not been seen yet
    pub fn emit(&self, candidate: Candidate) -> bool {
        if !self.seen.insert(&candidate.key) {
            return false;
        }
        if self.tx.send(candidate.line).is_err() {
            debug!("Output channel closed, dropping {}", candidate.key);
        }
        true
    }
}

/// A source that could not be read
#[derive(Debug)]
pub struct SourceFailure {
    pub source: String,
    pub error: anyhow::Error,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.source, self.error)
    }
}

/// Outcome of a merge run
#[derive(Debug, Default)]
pub struct MergeReport {
    /// Every forwarded line, in arrival order
    pub entries: Vec<String>,
    /// Sources that failed; their siblings still completed
    pub failures: Vec<SourceFailure>,
}

impl MergeReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Shared by every fetch task of a run
#[derive(Clone)]
struct FetchContext {
    paginator: Paginator,
    filter: RepoFilter,
    display: DisplayOptions,
    dedup_key: DedupKey,
    emitter: Emitter,
}

/// Merges the cache file, the user and every organization into one stream
pub struct MergePipeline {
    paginator: Paginator,
    cache_path: Option<PathBuf>,
    username: Option<String>,
    orgs: Vec<String>,
    filter: RepoFilter,
    display: DisplayOptions,
    dedup_key: DedupKey,
}

impl MergePipeline {
    pub fn new(paginator: Paginator) -> Self {
        Self {
            paginator,
            cache_path: None,
            username: None,
            orgs: Vec::new(),
            filter: RepoFilter::default(),
            display: DisplayOptions::default(),
            dedup_key: DedupKey::default(),
        }
    }

    pub fn with_cache(mut self, path: Option<PathBuf>) -> Self {
        self.cache_path = path;
        self
    }

    pub fn with_user(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    pub fn with_orgs(mut self, orgs: Vec<String>) -> Self {
        self.orgs = orgs;
        self
    }

    pub fn with_filter(mut self, filter: RepoFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_display(mut self, display: DisplayOptions) -> Self {
        self.display = display;
        self
    }

    pub fn with_dedup_key(mut self, dedup_key: DedupKey) -> Self {
        self.dedup_key = dedup_key;
        self
    }

    /// Run every source to completion, writing each unique line to `sink`
    /// as soon as it is received.
    ///
    /// A sink that stops accepting writes (e.g. the fuzzy finder exited) stops
    /// the output but not the merge, so the returned entries are complete.
    pub async fn run<W: Write>(self, sink: &mut W) -> Result<MergeReport> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let emitter = Emitter::new(Arc::new(SeenSet::new()), tx);

        let mut producers: Vec<JoinHandle<Vec<SourceFailure>>> = Vec::new();

        if let Some(path) = self.cache_path.clone() {
            let emitter = emitter.clone();
            let dedup_key = self.dedup_key;
            let filter = self.filter;
            producers.push(tokio::spawn(async move {
                let mut forwarded = 0;
                let read = cache::read_entries(&path, |line| {
                    if filter.matches_line(line) && emitter.emit(dedup_key.for_cached_line(line)) {
                        forwarded += 1;
                    }
                })
                .await;
                debug!("[cache]: forwarded {} of {} cached entries", forwarded, read);
                Vec::new()
            }));
        }

        if self.username.is_some() || !self.orgs.is_empty() {
            let context = FetchContext {
                paginator: self.paginator.clone(),
                filter: self.filter,
                display: self.display,
                dedup_key: self.dedup_key,
                emitter: emitter.clone(),
            };
            producers.push(tokio::spawn(fetch_from_api(
                context,
                self.username.clone(),
                self.orgs.clone(),
            )));
        }

        // The closer owns the original sender; the channel closes once it and
        // every producer clone are gone.
        let closer = tokio::spawn(close_when_done(producers, emitter));

        let mut entries = Vec::new();
        let mut sink_open = true;

        while let Some(line) = rx.recv().await {
            if sink_open {
                if let Err(e) = writeln!(sink, "{}", line).and_then(|_| sink.flush()) {
                    if e.kind() == ErrorKind::BrokenPipe {
                        info!("Output closed by reader, still collecting for the cache");
                    } else {
                        warn!("Failed to write to output: {}", e);
                    }
                    sink_open = false;
                }
            }
            entries.push(line);
        }

        let failures = closer
            .await
            .map_err(|e| anyhow!("Merge closer task failed: {}", e))?;

        info!(
            "Merged {} unique repositories ({} failed sources)",
            entries.len(),
            failures.len()
        );

        Ok(MergeReport { entries, failures })
    }
}

/// Wait for every producer, then drop the last sender
async fn close_when_done(
    producers: Vec<JoinHandle<Vec<SourceFailure>>>,
    emitter: Emitter,
) -> Vec<SourceFailure> {
    let mut failures = Vec::new();

    for result in join_all(producers).await {
        match result {
            Ok(source_failures) => failures.extend(source_failures),
            Err(e) => failures.push(SourceFailure {
                source: "producer".to_string(),
                error: anyhow!("Producer task failed: {}", e),
            }),
        }
    }

    drop(emitter);
    failures
}

/// Fetch the user and every organization, as siblings
async fn fetch_from_api(
    context: FetchContext,
    username: Option<String>,
    orgs: Vec<String>,
) -> Vec<SourceFailure> {
    let user_context = &context;
    let user = async move {
        match username {
            Some(login) => fetch_owner(user_context, Owner::User(login)).await,
            None => None,
        }
    };

    let (user_failure, mut failures) = tokio::join!(user, fetch_organizations(&context, orgs));

    failures.extend(user_failure);
    failures
}

/// One task per organization; a failing organization does not stop the others
async fn fetch_organizations(context: &FetchContext, orgs: Vec<String>) -> Vec<SourceFailure> {
    let mut tasks = JoinSet::new();

    for org in orgs {
        let context = context.clone();
        tasks.spawn(async move {
            let owner = Owner::Organization(org);
            let source = owner.to_string();
            (source, fetch_owner(&context, owner).await)
        });
    }

    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Some(failure))) => failures.push(failure),
            Ok((source, None)) => debug!("[{}]: done", source),
            Err(e) => failures.push(SourceFailure {
                source: "organization".to_string(),
                error: anyhow!("Organization task failed: {}", e),
            }),
        }
    }

    failures
}

async fn fetch_owner(context: &FetchContext, owner: Owner) -> Option<SourceFailure> {
    match context.paginator.fetch_all(&owner, &context.filter).await {
        Ok(repositories) => {
            let forwarded = repositories
                .iter()
                .filter(|repo| {
                    context
                        .emitter
                        .emit(context.dedup_key.for_repository(repo, &context.display))
                })
                .count();
            debug!(
                "[{}]: forwarded {} of {} repositories",
                owner,
                forwarded,
                repositories.len()
            );
            None
        }
        Err(e) => {
            warn!("Error getting repositories for {}: {:#}", owner, e);
            Some(SourceFailure {
                source: owner.to_string(),
                error: e,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{PageRequest, RepositoryQuery};
    use crate::repository::Page;
    use async_trait::async_trait;
    use quickcheck_macros::quickcheck;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Serves a single page per owner; unknown owners fail
    #[derive(Default)]
    struct StaticQuery {
        owners: HashMap<Owner, Vec<Repository>>,
        panics_for: Option<Owner>,
    }

    impl StaticQuery {
        fn with(mut self, owner: Owner, names: &[&str]) -> Self {
            self.owners
                .insert(owner, names.iter().map(|name| Repository::new(*name)).collect());
            self
        }
    }

    #[async_trait]
    impl RepositoryQuery for StaticQuery {
        async fn fetch_page(&self, owner: &Owner, _request: &PageRequest) -> Result<Page> {
            if self.panics_for.as_ref() == Some(owner) {
                panic!("query blew up for {owner}");
            }
            let nodes = self
                .owners
                .get(owner)
                .cloned()
                .ok_or_else(|| anyhow!("Could not resolve {}", owner))?;
            let total = nodes.len() as u64;
            Ok(Page::last(nodes, total))
        }
    }

    fn pipeline(query: StaticQuery) -> MergePipeline {
        MergePipeline::new(Paginator::new(Arc::new(query)))
    }

    /// Sink that fails every write
    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn sorted(mut entries: Vec<String>) -> Vec<String> {
        entries.sort();
        entries
    }

    #[test]
    fn test_seen_set_first_wins() {
        let seen = SeenSet::new();
        assert!(seen.insert("acme/widgets"));
        assert!(!seen.insert("acme/widgets"));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_seen_set_drops_empty_keys() {
        let seen = SeenSet::new();
        assert!(!seen.insert(""));
        assert!(seen.is_empty());
    }

    #[test]
    fn test_seen_set_concurrent_inserts() {
        let seen = Arc::new(SeenSet::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seen = seen.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|i| seen.insert(&format!("acme/repo-{i}")))
                        .count()
                })
            })
            .collect();

        let first_seen: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(first_seen, 100);
        assert_eq!(seen.len(), 100);
    }

    #[test]
    fn test_cached_line_key_is_leading_name() {
        let line = "acme/widgets          archived";
        let candidate = DedupKey::Name.for_cached_line(line);
        assert_eq!(candidate.key, "acme/widgets");
        assert_eq!(candidate.line, line);

        let candidate = DedupKey::Line.for_cached_line(line);
        assert_eq!(candidate.key, line);
    }

    #[test]
    fn test_repository_candidate_keys() {
        let repo = Repository::new("acme/widgets").fork();
        let display = DisplayOptions {
            width: 20,
            ..DisplayOptions::default()
        };

        let by_name = DedupKey::Name.for_repository(&repo, &display);
        assert_eq!(by_name.key, "acme/widgets");
        assert_eq!(by_name.line, "acme/widgets    fork");

        let by_line = DedupKey::Line.for_repository(&repo, &display);
        assert_eq!(by_line.key, by_line.line);
    }

    #[test]
    fn test_dedup_key_yaml_names() {
        assert_eq!(serde_yaml::to_string(&DedupKey::Line).unwrap().trim(), "line");
        let parsed: DedupKey = serde_yaml::from_str("name").unwrap();
        assert_eq!(parsed, DedupKey::Name);
    }

    #[tokio::test]
    async fn test_duplicates_across_sources_are_forwarded_once() {
        let query = StaticQuery::default()
            .with(Owner::User("me".into()), &["me/tool", "acme/widgets"])
            .with(Owner::Organization("acme".into()), &["acme/widgets", "acme/gadgets"])
            .with(Owner::Organization("globex".into()), &["globex/api", "me/tool"]);

        let mut out = Vec::new();
        let report = pipeline(query)
            .with_user(Some("me".into()))
            .with_orgs(vec!["acme".into(), "globex".into()])
            .run(&mut out)
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(
            sorted(report.entries.clone()),
            vec!["acme/gadgets", "acme/widgets", "globex/api", "me/tool"]
        );

        let printed: Vec<String> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        assert_eq!(printed, report.entries);
    }

    #[tokio::test]
    async fn test_failing_org_does_not_block_siblings() {
        let query = StaticQuery::default()
            .with(Owner::User("me".into()), &["me/tool"])
            .with(Owner::Organization("acme".into()), &["acme/widgets"]);

        let report = pipeline(query)
            .with_user(Some("me".into()))
            .with_orgs(vec!["missing".into(), "acme".into()])
            .run(&mut std::io::sink())
            .await
            .unwrap();

        assert_eq!(sorted(report.entries), vec!["acme/widgets", "me/tool"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source, "org:missing");
    }

    #[tokio::test]
    async fn test_panicking_org_is_reported_as_failure() {
        let mut query = StaticQuery::default()
            .with(Owner::Organization("acme".into()), &["acme/widgets"]);
        query.panics_for = Some(Owner::Organization("boom".into()));

        let report = pipeline(query)
            .with_orgs(vec!["boom".into(), "acme".into()])
            .run(&mut std::io::sink())
            .await
            .unwrap();

        assert_eq!(report.entries, vec!["acme/widgets"]);
        assert_eq!(report.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_entries_are_merged() {
        let dir = TempDir::new().unwrap();
        let cache_path = dir.path().join("cached-repos");
        std::fs::write(&cache_path, "acme/widgets\nold/gone\n").unwrap();

        let query =
            StaticQuery::default().with(Owner::User("me".into()), &["acme/widgets", "me/new"]);

        let report = pipeline(query)
            .with_cache(Some(cache_path))
            .with_user(Some("me".into()))
            .run(&mut std::io::sink())
            .await
            .unwrap();

        assert_eq!(
            sorted(report.entries),
            vec!["acme/widgets", "me/new", "old/gone"]
        );
    }

    #[tokio::test]
    async fn test_annotated_cache_line_wins_over_fetch_by_name() {
        let dir = TempDir::new().unwrap();
        let cache_path = dir.path().join("cached-repos");
        std::fs::write(&cache_path, "acme/widgets    archived\n").unwrap();

        let report = pipeline(StaticQuery::default())
            .with_cache(Some(cache_path))
            .run(&mut std::io::sink())
            .await
            .unwrap();

        assert_eq!(report.entries, vec!["acme/widgets    archived"]);
    }

    #[tokio::test]
    async fn test_filtered_run_skips_excluded_cache_lines() {
        let dir = TempDir::new().unwrap();
        let cache_path = dir.path().join("cached-repos");
        std::fs::write(&cache_path, "me/live\nme/old    archived\nme/copy    fork\n").unwrap();

        let report = pipeline(StaticQuery::default())
            .with_cache(Some(cache_path))
            .with_filter(RepoFilter {
                exclude_archived: true,
                exclude_forks: false,
            })
            .run(&mut std::io::sink())
            .await
            .unwrap();

        assert_eq!(sorted(report.entries), vec!["me/copy    fork", "me/live"]);
    }

    #[tokio::test]
    async fn test_no_sources_yields_empty_report() {
        let report = pipeline(StaticQuery::default())
            .run(&mut std::io::sink())
            .await
            .unwrap();

        assert!(report.entries.is_empty());
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_broken_output_keeps_collecting() {
        let query = StaticQuery::default().with(Owner::User("me".into()), &["me/a", "me/b", "me/c"]);

        let report = pipeline(query)
            .with_user(Some("me".into()))
            .run(&mut ClosedPipe)
            .await
            .unwrap();

        assert_eq!(report.entries, vec!["me/a", "me/b", "me/c"]);
    }

    #[tokio::test]
    async fn test_line_dedup_keeps_differently_annotated_lines() {
        let dir = TempDir::new().unwrap();
        let cache_path = dir.path().join("cached-repos");
        std::fs::write(&cache_path, "acme/widgets\n").unwrap();

        let mut query = StaticQuery::default();
        query.owners.insert(
            Owner::User("me".into()),
            vec![Repository::new("acme/widgets").archived()],
        );
        let display = DisplayOptions {
            width: 30,
            ..DisplayOptions::default()
        };

        let report = pipeline(query)
            .with_cache(Some(cache_path))
            .with_user(Some("me".into()))
            .with_display(display)
            .with_dedup_key(DedupKey::Line)
            .run(&mut std::io::sink())
            .await
            .unwrap();

        assert_eq!(report.entries.len(), 2);
    }

    #[quickcheck]
    fn prop_each_key_forwarded_once(user: Vec<u8>, org: Vec<u8>, cached: Vec<u8>) -> bool {
        let names = |ids: &[u8]| -> Vec<String> {
            ids.iter().map(|id| format!("acme/repo-{}", id % 32)).collect()
        };
        let (user, org, cached) = (names(&user), names(&org), names(&cached));

        let dir = TempDir::new().unwrap();
        let cache_path = dir.path().join("cached-repos");
        std::fs::write(&cache_path, cached.join("\n")).unwrap();

        let mut query = StaticQuery::default();
        query.owners.insert(
            Owner::User("me".into()),
            user.iter().map(Repository::new).collect(),
        );
        query.owners.insert(
            Owner::Organization("acme".into()),
            org.iter().map(Repository::new).collect(),
        );

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let report = runtime
            .block_on(
                pipeline(query)
                    .with_cache(Some(cache_path))
                    .with_user(Some("me".into()))
                    .with_orgs(vec!["acme".into()])
                    .run(&mut std::io::sink()),
            )
            .unwrap();

        let expected: HashSet<String> = user.into_iter().chain(org).chain(cached).collect();
        let unique: HashSet<String> = report.entries.iter().cloned().collect();

        unique.len() == report.entries.len() && unique == expected
    }
}
