//! Output path planning
//!
//! Everything here only inspects the filesystem; nothing is created,
//! renamed or deleted.

use crate::error::{ErrorCategory, ErrorKind, Result, ShroudError};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Extension of the final container.
pub const CONTAINER_EXTENSION: &str = "zip";

/// Suffixes that mark a sibling as an archive of a file.
pub const ARCHIVE_SUFFIXES: &[&str] = &[
    ".zip", ".7z", ".rar", ".gz", ".xz", ".bz2", ".tar", ".tar.gz", ".tar.xz",
];

/// True if something, including a dangling symlink, occupies `path`.
pub fn path_is_taken(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Return `desired` if free, otherwise the first free variant with a
/// numeric disambiguator inserted before the extension
/// (`name.1.zip`, `name.2.zip`, ...).
pub fn resolve_unique(desired: &Path) -> PathBuf {
    if !path_is_taken(desired) {
        return desired.to_path_buf();
    }
    let parent = desired.parent().unwrap_or_else(|| Path::new(""));
    let stem = desired.file_stem().unwrap_or_default();
    let extension = desired.extension();

    let mut n: u64 = 1;
    loop {
        let mut name = OsString::from(stem);
        name.push(format!(".{}", n));
        if let Some(ext) = extension {
            name.push(".");
            name.push(ext);
        }
        let candidate = parent.join(name);
        if !path_is_taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// The preferred container path for `source`: `<source>.zip`, alongside it.
pub fn container_path_for(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_os_string();
    name.push(".");
    name.push(CONTAINER_EXTENSION);
    PathBuf::from(name)
}

/// A fresh random payload identifier: 32 lowercase hex characters.
pub fn new_payload_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A payload path in `dir` that nothing currently occupies.
pub fn new_payload_path(dir: &Path) -> PathBuf {
    loop {
        let candidate = dir.join(new_payload_id());
        if !path_is_taken(&candidate) {
            return candidate;
        }
    }
}

/// Best-effort check whether `source` already has an archive next to it.
///
/// A sibling counts if its name is the source's name followed by one of
/// [`ARCHIVE_SUFFIXES`] (or that suffix doubled), or by `.<digits>.zip` as
/// produced by [`resolve_unique`]. The comparison of the suffix is
/// case-insensitive. This is a heuristic, not a guarantee: an unrelated
/// file with a matching name also counts.
pub fn archive_already_exists(source: &Path) -> Result<bool> {
    let Some(base) = source.file_name().and_then(OsStr::to_str) else {
        return Ok(false);
    };
    let dir = match source.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let entries = fs::read_dir(dir).map_err(|e| list_error(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| list_error(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(suffix) = name.strip_prefix(base) {
            if is_archive_suffix(&suffix.to_lowercase()) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn is_archive_suffix(suffix: &str) -> bool {
    let known = ARCHIVE_SUFFIXES
        .iter()
        .any(|ext| suffix == *ext || suffix == format!("{}{}", ext, ext));
    known || is_disambiguated_container(suffix)
}

/// Matches `.<digits>.zip`.
fn is_disambiguated_container(suffix: &str) -> bool {
    let Some(rest) = suffix.strip_prefix('.') else {
        return false;
    };
    let Some(digits) = rest.strip_suffix(".zip") else {
        return false;
    };
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn list_error(dir: &Path, e: io::Error) -> ShroudError {
    ShroudError::with_kind_and_source(
        ErrorCategory::Internal,
        ErrorKind::Io,
        format!("failed to list {}", dir.display()),
        e,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_unique_free_path_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let desired = temp_dir.path().join("a.txt.zip");
        assert_eq!(resolve_unique(&desired), desired);
    }

    #[test]
    fn test_resolve_unique_probes_ascending() {
        let temp_dir = TempDir::new().unwrap();
        let desired = temp_dir.path().join("a.txt.zip");
        fs::write(&desired, b"taken").unwrap();
        fs::write(temp_dir.path().join("a.txt.1.zip"), b"taken").unwrap();
        fs::create_dir(temp_dir.path().join("a.txt.2.zip")).unwrap();

        let resolved = resolve_unique(&desired);
        assert_eq!(resolved, temp_dir.path().join("a.txt.3.zip"));
        assert!(!resolved.exists());

        // Deterministic for the same set of existing files
        assert_eq!(resolve_unique(&desired), resolved);
        // Nothing was touched
        assert_eq!(fs::read(&desired).unwrap(), b"taken");
    }

    #[test]
    fn test_resolve_unique_without_extension() {
        let temp_dir = TempDir::new().unwrap();
        let desired = temp_dir.path().join("README");
        fs::write(&desired, b"").unwrap();
        assert_eq!(resolve_unique(&desired), temp_dir.path().join("README.1"));
    }

    #[test]
    #[cfg(unix)]
    fn test_resolve_unique_treats_dangling_symlink_as_taken() {
        let temp_dir = TempDir::new().unwrap();
        let desired = temp_dir.path().join("x.zip");
        std::os::unix::fs::symlink(temp_dir.path().join("missing"), &desired).unwrap();
        assert_eq!(resolve_unique(&desired), temp_dir.path().join("x.1.zip"));
    }

    #[test]
    fn test_container_path_for() {
        assert_eq!(
            container_path_for(Path::new("dir/name.ext")),
            PathBuf::from("dir/name.ext.zip")
        );
    }

    #[test]
    fn test_payload_id_format() {
        let id = new_payload_id();
        assert_eq!(id.len(), 32);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        assert_ne!(id, new_payload_id());
    }

    #[test]
    fn test_new_payload_path_has_no_extension() {
        let temp_dir = TempDir::new().unwrap();
        let path = new_payload_path(temp_dir.path());
        assert!(path.extension().is_none());
        assert_eq!(path.parent(), Some(temp_dir.path()));
    }

    #[test]
    fn test_archive_already_exists() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("report.pdf");
        fs::write(&source, b"pdf").unwrap();
        assert!(!archive_already_exists(&source).unwrap());

        fs::write(temp_dir.path().join("report.pdf.ZIP"), b"").unwrap();
        assert!(archive_already_exists(&source).unwrap());
    }

    #[test]
    fn test_archive_already_exists_variants() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("data.csv");
        fs::write(&source, b"1,2").unwrap();

        for (sibling, expected) in [
            ("data.csv.bak", false),
            ("data.csv.zip.old", false),
            ("data.csv.tar.gz", true),
            ("data.csv.7z.7z", true),
            ("data.csv.4.zip", true),
            ("data.csv..zip", false),
        ] {
            let path = temp_dir.path().join(sibling);
            fs::write(&path, b"").unwrap();
            assert_eq!(
                archive_already_exists(&source).unwrap(),
                expected,
                "sibling {}",
                sibling
            );
            fs::remove_file(&path).unwrap();
        }
    }
}
