//! Repository file listing and ignore filtering
//!
//! - `collect_all_files`: every file under a root, as sorted `/`-separated
//!   relative paths, skipping dot-files and dot-directories
//! - `filter_paths`: drops paths matching an ignore prefix

use std::path::Path;

use ignore::WalkBuilder;

use crate::error::Result;

/// List every regular file below `root`.
///
/// Entries whose name starts with `.` are skipped, and hidden directories are
/// not descended into. `.gitignore` rules are NOT applied: the repository
/// config decides what to ignore.
pub fn collect_all_files(root: &Path) -> Result<Vec<String>> {
    let mut builder = WalkBuilder::new(root);
    builder.standard_filters(false);
    builder.hidden(true);
    builder.follow_links(false);

    let mut files = Vec::new();
    for entry in builder.build() {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        files.push(parts.join("/"));
    }

    files.sort();
    Ok(files)
}

/// Keep the paths that do not start with any of the `ignore` prefixes.
///
/// Matching is plain string prefix matching, so `"vendor"` also ignores
/// `"vendor.txt"`. Order of `paths` is preserved.
pub fn filter_paths(paths: &[String], ignore: &[String]) -> Vec<String> {
    paths
        .iter()
        .filter(|path| !ignore.iter().any(|prefix| path.starts_with(prefix.as_str())))
        .cloned()
        .collect()
}
