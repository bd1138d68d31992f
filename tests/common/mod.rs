//! Common test utilities and helpers for gh-lor tests
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use gh_lor::discovery::PageRequest;
use gh_lor::{Owner, Page, RepositoryQuery, Repository};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Test environment with an isolated state directory
pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self { temp_dir }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.temp_dir.path().join("gh-lor").join("cached-repos")
    }

    pub fn write_cache(&self, content: &str) -> PathBuf {
        let path = self.cache_path();
        std::fs::create_dir_all(path.parent().unwrap()).expect("Failed to create cache dir");
        std::fs::write(&path, content).expect("Failed to write cache");
        path
    }

    pub fn read_cache(&self) -> String {
        std::fs::read_to_string(self.cache_path()).expect("Failed to read cache")
    }

    pub fn cache_lines(&self) -> Vec<String> {
        self.read_cache().lines().map(str::to_string).collect()
    }
}

/// In-memory query collaborator that serves fixed repositories in pages
pub struct FakeQuery {
    repos: HashMap<Owner, Vec<Repository>>,
    page_size: usize,
    requests: AtomicUsize,
}

impl FakeQuery {
    pub fn new() -> Self {
        Self {
            repos: HashMap::new(),
            page_size: 100,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn user(mut self, login: &str, repos: Vec<Repository>) -> Self {
        self.repos.insert(Owner::User(login.to_string()), repos);
        self
    }

    pub fn org(mut self, login: &str, repos: Vec<Repository>) -> Self {
        self.repos.insert(Owner::Organization(login.to_string()), repos);
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepositoryQuery for FakeQuery {
    async fn fetch_page(&self, owner: &Owner, request: &PageRequest) -> Result<Page> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let repos = self
            .repos
            .get(owner)
            .ok_or_else(|| anyhow!("Could not resolve to an owner: {}", owner))?;

        let page_size = self.page_size.min(request.first as usize);
        let start: usize = match &request.after {
            Some(cursor) => cursor.parse()?,
            None => 0,
        };
        let end = (start + page_size).min(repos.len());
        let nodes = repos[start..end].to_vec();
        let total = repos.len() as u64;

        if end < repos.len() {
            Ok(Page::with_next(nodes, total, end.to_string()))
        } else {
            Ok(Page::last(nodes, total))
        }
    }
}

/// Build plain repositories from names
pub fn repos(names: &[&str]) -> Vec<Repository> {
    names.iter().map(|name| Repository::new(*name)).collect()
}

/// Sorted copy of output lines
pub fn sorted_lines(output: &[u8]) -> Vec<String> {
    let mut lines: Vec<String> = String::from_utf8_lossy(output)
        .lines()
        .map(str::to_string)
        .collect();
    lines.sort();
    lines
}
