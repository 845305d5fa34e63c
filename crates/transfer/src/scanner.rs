//! Selection enumeration.
//!
//! Expands picked files, a picked directory, or a mixed drop payload into a
//! flat list of [`SourceFile`]s with relative paths normalized to forward
//! slashes. Directories are walked depth-first in file-name order.

use std::collections::HashSet;
use std::fs::Metadata;
use std::path::Path;

use tracing::{debug, warn};

use crate::staging::system_time_ms;
use crate::types::{Selection, SourceFile};

/// Enumerates a selection into an order-stable list of files.
///
/// Symlinks and unreadable entries are skipped; a failure inside one
/// subtree never aborts its siblings. Nothing is written.
pub fn enumerate(selection: &Selection) -> Vec<SourceFile> {
    let mut walker = Walker::default();
    match selection {
        Selection::Files(paths) => {
            for path in paths {
                walker.add_file_item(path);
            }
        }
        Selection::Directory(path) => walker.add_item(path),
        Selection::Drop(items) => {
            for item in items {
                walker.add_item(item);
            }
        }
    }
    debug!(files = walker.files.len(), "selection enumerated");
    walker.files
}

#[derive(Default)]
struct Walker {
    files: Vec<SourceFile>,
    seen: HashSet<String>,
}

impl Walker {
    fn add_file_item(&mut self, path: &Path) {
        let Some((name, metadata)) = top_level(path) else {
            return;
        };
        if metadata.is_file() {
            self.push(name, path, &metadata);
        } else {
            warn!(path = %path.display(), "not a regular file, skipping");
        }
    }

    fn add_item(&mut self, path: &Path) {
        let Some((name, metadata)) = top_level(path) else {
            return;
        };
        if metadata.is_dir() {
            self.walk(&name, path);
        } else if metadata.is_file() {
            self.push(name, path, &metadata);
        }
    }

    fn walk(&mut self, rel_dir: &str, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "cannot read directory, skipping");
                return;
            }
        };

        let mut entries: Vec<_> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "unreadable directory entry");
                    None
                }
            })
            .collect();
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let rel = format!("{rel_dir}/{name}");

            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot stat entry, skipping");
                    continue;
                }
            };

            if file_type.is_symlink() {
                debug!(path = %path.display(), "symlink skipped");
            } else if file_type.is_dir() {
                self.walk(&rel, &path);
            } else if file_type.is_file() {
                match entry.metadata() {
                    Ok(metadata) => self.push(rel, &path, &metadata),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "cannot stat file, skipping");
                    }
                }
            }
        }
    }

    fn push(&mut self, relative_path: String, path: &Path, metadata: &Metadata) {
        let modified_ms = match metadata.modified() {
            Ok(t) => system_time_ms(t),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "no modification time, skipping");
                return;
            }
        };
        if !self.seen.insert(relative_path.clone()) {
            warn!(path = %relative_path, "duplicate relative path, keeping first");
            return;
        }
        self.files.push(SourceFile {
            relative_path,
            source: path.to_path_buf(),
            size: metadata.len(),
            modified_ms,
        });
    }
}

/// Resolves the display name and metadata of a selected item.
fn top_level(path: &Path) -> Option<(String, Metadata)> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot stat selection, skipping");
            return None;
        }
    };
    if metadata.file_type().is_symlink() {
        debug!(path = %path.display(), "symlink skipped");
        return None;
    }
    let Some(name) = path.file_name() else {
        warn!(path = %path.display(), "selection has no file name, skipping");
        return None;
    };
    Some((name.to_string_lossy().into_owned(), metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("guide");

        fs::create_dir_all(root.join("img").join("raw")).unwrap();
        fs::write(root.join("intro.md"), b"INTRO").unwrap();
        fs::write(root.join("zeta.md"), b"Z").unwrap();
        fs::write(root.join("img").join("logo.png"), b"PNGDATA").unwrap();
        fs::write(root.join("img").join("raw").join("logo.psd"), b"PSD").unwrap();

        dir
    }

    fn paths(files: &[SourceFile]) -> Vec<&str> {
        files.iter().map(|f| f.relative_path.as_str()).collect()
    }

    #[test]
    fn directory_expands_depth_first_in_name_order() {
        let dir = create_test_tree();
        let files = enumerate(&Selection::Directory(dir.path().join("guide")));

        assert_eq!(
            paths(&files),
            vec![
                "guide/img/logo.png",
                "guide/img/raw/logo.psd",
                "guide/intro.md",
                "guide/zeta.md",
            ]
        );
        let total: u64 = files.iter().map(|f| f.size).sum();
        assert_eq!(total, 7 + 3 + 5 + 1);
    }

    #[test]
    fn file_list_uses_file_names() {
        let dir = create_test_tree();
        let root = dir.path().join("guide");
        let files = enumerate(&Selection::Files(vec![
            root.join("zeta.md"),
            root.join("img").join("logo.png"),
        ]));
        assert_eq!(paths(&files), vec!["zeta.md", "logo.png"]);
        assert_eq!(files[1].size, 7);
    }

    #[test]
    fn file_list_skips_directories() {
        let dir = create_test_tree();
        let root = dir.path().join("guide");
        let files = enumerate(&Selection::Files(vec![root.join("img"), root.join("intro.md")]));
        assert_eq!(paths(&files), vec!["intro.md"]);
    }

    #[test]
    fn mixed_drop_keeps_payload_order() {
        let dir = create_test_tree();
        let root = dir.path().join("guide");
        let files = enumerate(&Selection::Drop(vec![
            root.join("zeta.md"),
            root.join("img"),
        ]));
        assert_eq!(paths(&files), vec!["zeta.md", "img/logo.png", "img/raw/logo.psd"]);
    }

    #[test]
    fn missing_items_do_not_abort_siblings() {
        let dir = create_test_tree();
        let root = dir.path().join("guide");
        let files = enumerate(&Selection::Drop(vec![
            PathBuf::from("/nonexistent/path/that/does/not/exist"),
            root.join("intro.md"),
        ]));
        assert_eq!(paths(&files), vec!["intro.md"]);
    }

    #[test]
    fn duplicate_relative_paths_keep_first() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("one")).unwrap();
        fs::create_dir_all(dir.path().join("two")).unwrap();
        fs::write(dir.path().join("one").join("same.txt"), b"1").unwrap();
        fs::write(dir.path().join("two").join("same.txt"), b"22").unwrap();

        let files = enumerate(&Selection::Files(vec![
            dir.path().join("one").join("same.txt"),
            dir.path().join("two").join("same.txt"),
        ]));
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size, 1);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_skipped() {
        let dir = create_test_tree();
        let root = dir.path().join("guide");
        std::os::unix::fs::symlink(root.join("intro.md"), root.join("link.md")).unwrap();

        let files = enumerate(&Selection::Directory(root));
        assert!(!paths(&files).contains(&"guide/link.md"));
        assert_eq!(files.len(), 4);
    }

    #[test]
    fn empty_directory_yields_nothing() {
        let dir = TempDir::new().unwrap();
        let files = enumerate(&Selection::Directory(dir.path().to_path_buf()));
        assert!(files.is_empty());
    }
}
