//! Input discovery and output layout
//!
//! This module turns the user's positional arguments into a flat,
//! deduplicated set of candidate files, and computes where each file lands
//! when an output directory mirrors the input tree.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Extension given to transcoded files
pub const OUTPUT_EXTENSION: &str = "mp3";

/// Collect every file under the given roots
///
/// Directories are walked recursively; anything else is taken as-is, even if
/// it does not exist yet (the worker reports the failure). Paths are made
/// absolute so overlapping roots collapse to one entry.
pub fn enumerate_files(roots: &[PathBuf], follow_links: bool) -> BTreeSet<PathBuf> {
    let mut files = BTreeSet::new();

    for root in roots {
        if !root.is_dir() {
            files.insert(absolute(root));
            continue;
        }

        for entry in WalkDir::new(root).follow_links(follow_links) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::warn!("Skipping unreadable entry under '{}': {}", root.display(), e);
                    continue;
                }
            };

            let file_type = entry.file_type();
            let is_file = file_type.is_file() || (file_type.is_symlink() && entry.path().is_file());
            if is_file {
                files.insert(absolute(entry.path()));
            }
        }
    }

    files
}

/// Common directory of all paths
///
/// Computed component-wise over each path's parent directory, so a single
/// file yields its own directory and siblings yield their shared parent.
pub fn common_prefix<'a>(paths: impl IntoIterator<Item = &'a PathBuf>) -> PathBuf {
    let mut prefix: Option<Vec<Component<'a>>> = None;

    for path in paths {
        let parent = path.parent().unwrap_or(Path::new(""));
        let components: Vec<Component<'a>> = parent.components().collect();
        prefix = Some(match prefix {
            None => components,
            Some(current) => current
                .into_iter()
                .zip(components)
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect(),
        });
    }

    prefix
        .map(|components| components.iter().collect())
        .unwrap_or_default()
}

/// Place `path` under `output_dir`, keeping its position relative to `prefix`
pub fn reroot(path: &Path, prefix: &Path, output_dir: &Path) -> PathBuf {
    let relative = match path.strip_prefix(prefix) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => path.file_name().map(PathBuf::from).unwrap_or_default(),
    };
    output_dir.join(relative)
}

/// Replace the file extension (or add one if there is none)
pub fn change_extension(path: &Path, extension: &str) -> PathBuf {
    path.with_extension(extension)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
