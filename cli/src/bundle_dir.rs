//! Turning a project directory into bundle entries.

use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use tracing::debug;
use vibecodr_publish::FileEntry;
use walkdir::DirEntry;
use walkdir::WalkDir;

/// Entries that never belong in a published bundle.
const SKIPPED_NAMES: &[&str] = &[".git", "node_modules", ".DS_Store"];

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED_NAMES.contains(&name))
}

/// Read every regular file under `root`, sorted by path, with `/`-separated
/// paths relative to `root`. Symlinks are not followed.
pub fn read_bundle_dir(root: &Path) -> Result<Vec<FileEntry>> {
    if !root.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_skipped(entry));
    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{} escapes {}", entry.path().display(), root.display()))?;
        let path = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let content = std::fs::read(entry.path())
            .with_context(|| format!("failed to read {}", entry.path().display()))?;
        debug!(%path, size = content.len(), "adding file to bundle");
        files.push(FileEntry::from_bytes(path, content));
    }
    Ok(files)
}
