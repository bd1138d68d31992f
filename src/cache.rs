//! Cache file of previously listed repositories
//!
//! The cache seeds the output stream with the last run's lines so the fuzzy
//! finder has something to show before the API answers. It is plain text,
//! one entry per line, and is rewritten in full at the end of every run.

use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

/// Stream every non-blank, trimmed line of the cache file into `emit`.
///
/// A missing or unreadable file contributes nothing. Returns the number of
/// entries read.
pub async fn read_entries<F>(path: &Path, mut emit: F) -> usize
where
    F: FnMut(&str),
{
    let file = match fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("Cache file {:?} does not exist yet", path);
            return 0;
        }
        Err(e) => {
            warn!("Error opening cache file {:?}: {}", path, e);
            return 0;
        }
    };

    let mut lines = BufReader::new(file).lines();
    let mut count = 0;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let entry = line.trim();
                if entry.is_empty() {
                    continue;
                }
                emit(entry);
                count += 1;
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading cache file {:?}: {}", path, e);
                break;
            }
        }
    }

    debug!("Read {} cached entries from {:?}", count, path);
    count
}

/// Overwrite the cache file with `entries`, one per line
pub async fn write_entries(path: &Path, entries: &[String]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create cache directory: {:?}", parent))?;
    }

    let mut content = entries.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }

    fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write cache file: {:?}", path))?;

    debug!("Wrote {} entries to {:?}", entries.len(), path);
    Ok(())
}
