//! Candidate file discovery

use crate::error::{ErrorCategory, ErrorKind, Result, ShroudError};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions that mark a file as already being an archive.
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "7z", "rar", "gz", "xz", "bz2", "tar"];

/// What to walk and what to leave out.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    /// Maximum directory depth below the root; `None` walks everything.
    /// Files directly in the root are at depth 1.
    pub max_depth: Option<usize>,
    /// If non-empty, only files with one of these extensions (without the
    /// dot, case-insensitive) are kept.
    pub extensions: Vec<String>,
    /// Paths never returned, such as the running executable and the audit log.
    pub exclude: Vec<PathBuf>,
}

/// Walk `root` and return every regular file that should be protected, in
/// a stable (sorted by file name) order.
///
/// Symlinks are neither followed nor returned. Entries that cannot be read
/// are logged and skipped; only an unreadable root is an error.
pub fn discover(root: &Path, options: &DiscoveryOptions) -> Result<Vec<PathBuf>> {
    let root_meta = std::fs::metadata(root).map_err(|e| {
        ShroudError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("cannot read root directory {}", root.display()),
            e,
        )
    })?;
    if !root_meta.is_dir() {
        return Err(ShroudError::with_kind(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("{} is not a directory", root.display()),
        ));
    }

    let exclude: Vec<PathBuf> = options.exclude.iter().map(|p| canonical(p)).collect();

    let mut walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
    if let Some(depth) = options.max_depth {
        walker = walker.max_depth(depth);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if has_archive_extension(path) || !matches_extension_filter(path, &options.extensions) {
            continue;
        }
        if exclude.contains(&canonical(path)) {
            log::debug!("excluding {}", path.display());
            continue;
        }
        files.push(path.to_path_buf());
    }
    Ok(files)
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

fn has_archive_extension(path: &Path) -> bool {
    lowercase_extension(path).is_some_and(|ext| ARCHIVE_EXTENSIONS.contains(&ext.as_str()))
}

fn matches_extension_filter(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let Some(ext) = lowercase_extension(path) else {
        return false;
    };
    extensions
        .iter()
        .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(&ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(root: &Path, files: &[PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|p| {
                p.strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn test_discover_skips_archives_and_excluded() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), b"a").unwrap();
        fs::write(root.join("b.TAR"), b"b").unwrap();
        fs::write(root.join("existing.zip"), b"z").unwrap();
        fs::write(root.join("shroud-log.txt"), b"log").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub").join("c.bin"), b"c").unwrap();

        let options = DiscoveryOptions {
            exclude: vec![root.join("shroud-log.txt")],
            ..Default::default()
        };
        let files = discover(root, &options).unwrap();
        assert_eq!(names(root, &files), ["a.txt", "sub/c.bin"]);
    }

    #[test]
    fn test_discover_max_depth() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("one").join("two")).unwrap();
        fs::write(root.join("top.txt"), b"").unwrap();
        fs::write(root.join("one").join("mid.txt"), b"").unwrap();
        fs::write(root.join("one").join("two").join("deep.txt"), b"").unwrap();

        let options = DiscoveryOptions {
            max_depth: Some(2),
            ..Default::default()
        };
        let files = discover(root, &options).unwrap();
        assert_eq!(names(root, &files), ["one/mid.txt", "top.txt"]);
    }

    #[test]
    fn test_discover_extension_filter() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), b"").unwrap();
        fs::write(root.join("b.PDF"), b"").unwrap();
        fs::write(root.join("noext"), b"").unwrap();

        let options = DiscoveryOptions {
            extensions: vec![".pdf".to_string()],
            ..Default::default()
        };
        let files = discover(root, &options).unwrap();
        assert_eq!(names(root, &files), ["b.PDF"]);
    }

    #[test]
    #[cfg(unix)]
    fn test_discover_ignores_symlinks() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("real.txt"), b"").unwrap();
        std::os::unix::fs::symlink(root.join("real.txt"), root.join("link.txt")).unwrap();

        let files = discover(root, &DiscoveryOptions::default()).unwrap();
        assert_eq!(names(root, &files), ["real.txt"]);
    }

    #[test]
    fn test_discover_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let err = discover(&temp_dir.path().join("nope"), &DiscoveryOptions::default())
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::User);
    }
}
