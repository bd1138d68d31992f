//! Display lines for repositories
//!
//! A line is the repository's `nameWithOwner`, optionally followed by a
//! right-aligned annotation block such as `archived | fork | [cli,rust]`.

use serde::{Deserialize, Serialize};

use crate::repository::Repository;

/// Column width annotations are aligned against
pub const DEFAULT_LINE_WIDTH: usize = 150;

const ANNOTATION_SEPARATOR: &str = " | ";

/// Which annotations to render and how wide a line is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct DisplayOptions {
    /// Show `archived` / `fork` markers
    pub show_status: bool,
    /// Show the sorted topic list
    pub show_topics: bool,
    /// Total column width used for right alignment
    pub width: usize,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            show_status: true,
            show_topics: false,
            width: DEFAULT_LINE_WIDTH,
        }
    }
}

/// Render a repository as a single display line
pub fn format_line(repo: &Repository, options: &DisplayOptions) -> String {
    let annotations = annotations(repo, options);

    if annotations.is_empty() {
        return repo.name_with_owner.clone();
    }

    align(
        &repo.name_with_owner,
        &annotations.join(ANNOTATION_SEPARATOR),
        options.width,
    )
}

fn annotations(repo: &Repository, options: &DisplayOptions) -> Vec<String> {
    let mut right = Vec::new();

    if options.show_status {
        if repo.is_archived {
            right.push("archived".to_string());
        }
        if repo.is_fork {
            right.push("fork".to_string());
        }
    }

    if options.show_topics && repo.has_topics() {
        let mut topics: Vec<&str> = repo.topics().collect();
        topics.sort_unstable();
        right.push(format!("[{}]", topics.join(",")));
    }

    right
}

/// Status markers found in a formatted line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusMarkers {
    pub archived: bool,
    pub fork: bool,
}

/// Read the archived / fork markers back out of a line built by [`format_line`]
pub fn status_markers(line: &str) -> StatusMarkers {
    let mut markers = StatusMarkers::default();

    let Some((_, annotations)) = line.trim().split_once(char::is_whitespace) else {
        return markers;
    };

    for annotation in annotations.split(ANNOTATION_SEPARATOR) {
        match annotation.trim() {
            "archived" => markers.archived = true,
            "fork" => markers.fork = true,
            _ => {}
        }
    }
    markers
}

/// Pad between `left` and `right` so the result is `width` characters wide.
///
/// When the two strings already fill the width they are concatenated as-is;
/// nothing is ever truncated.
pub fn align(left: &str, right: &str, width: usize) -> String {
    let used = left.chars().count() + right.chars().count();
    let padding = width.saturating_sub(used);

    let mut line = String::with_capacity(left.len() + padding + right.len());
    line.push_str(left);
    line.extend(std::iter::repeat(' ').take(padding));
    line.push_str(right);
    line
}
