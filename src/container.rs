//! Zip container around a single encrypted payload

use crate::engine::require_regular_source;
use crate::error::{ErrorCategory, ErrorKind, Result, ShroudError};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Write a new zip at `dest_zip` whose only member is `payload`, stored
/// under the payload's base name.
///
/// `payload` must be a regular file (not a symlink). `dest_zip` must not
/// exist; the caller resolves a free path beforehand. If writing fails the
/// partial container is removed.
pub fn wrap(payload: &Path, dest_zip: &Path) -> Result<()> {
    require_regular_source(payload)?;
    let member = payload
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            ShroudError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                format!("payload name of {} is not valid UTF-8", payload.display()),
            )
        })?
        .to_string();

    let file = create_new(dest_zip)?;
    let result = write_single_member(file, payload, &member);
    if result.is_err() {
        if let Err(e) = fs::remove_file(dest_zip) {
            log::warn!(
                "failed to remove partial container {}: {}",
                dest_zip.display(),
                e
            );
        }
    }
    result
}

fn write_single_member(file: File, payload: &Path, member: &str) -> Result<()> {
    let mut source = File::open(payload).map_err(|e| {
        ShroudError::io(
            ErrorCategory::Internal,
            format!("failed to open {}", payload.display()),
            e,
        )
    })?;
    let size = source
        .metadata()
        .map_err(|e| {
            ShroudError::io(
                ErrorCategory::Internal,
                format!("failed to stat {}", payload.display()),
                e,
            )
        })?
        .len();

    // The payload is already compressed and encrypted; deflating gains nothing.
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .unix_permissions(0o600)
        .large_file(size >= u64::from(u32::MAX));

    let mut zip = ZipWriter::new(file);
    zip.start_file(member, options).map_err(zip_error)?;
    io::copy(&mut source, &mut zip).map_err(|e| {
        ShroudError::io(
            ErrorCategory::Internal,
            format!("failed to copy {} into container", payload.display()),
            e,
        )
    })?;
    let mut file = zip.finish().map_err(zip_error)?;
    file.flush().map_err(|e| {
        ShroudError::io(ErrorCategory::Internal, "failed to flush container", e)
    })?;
    file.sync_all().map_err(|e| {
        ShroudError::io(ErrorCategory::Internal, "failed to sync container", e)
    })?;
    Ok(())
}

/// Extract the sole member of `zip_path` into `out_dir` and return its path.
///
/// Containers with zero or several members, a directory member, or a
/// member name that is not a single plain file name are rejected as
/// [`ErrorKind::ContainerMalformed`]. An existing file at the extraction
/// path is never overwritten.
pub fn unwrap(zip_path: &Path, out_dir: &Path) -> Result<PathBuf> {
    let file = File::open(zip_path).map_err(|e| {
        let category = if e.kind() == io::ErrorKind::NotFound {
            ErrorCategory::User
        } else {
            ErrorCategory::Internal
        };
        ShroudError::io(category, format!("failed to open {}", zip_path.display()), e)
    })?;
    let mut archive = ZipArchive::new(file).map_err(|e| {
        ShroudError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::ContainerMalformed,
            format!("{} is not a readable zip container", zip_path.display()),
            e,
        )
    })?;
    if archive.len() != 1 {
        return Err(malformed(format!(
            "{} holds {} members, expected exactly 1",
            zip_path.display(),
            archive.len()
        )));
    }

    let mut entry = archive.by_index(0).map_err(|e| {
        ShroudError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::ContainerMalformed,
            format!("failed to read member of {}", zip_path.display()),
            e,
        )
    })?;
    if entry.is_dir() {
        return Err(malformed(format!(
            "{} holds a directory instead of a payload",
            zip_path.display()
        )));
    }
    let name = entry
        .enclosed_name()
        .filter(|p| is_plain_file_name(p))
        .ok_or_else(|| {
            malformed(format!(
                "{} holds a member with an unsafe name",
                zip_path.display()
            ))
        })?;

    let out_path = out_dir.join(name);
    let mut out = create_new(&out_path)?;
    let copied = io::copy(&mut entry, &mut out);
    if let Err(e) = copied {
        drop(out);
        let _ = fs::remove_file(&out_path);
        return Err(ShroudError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::ContainerMalformed,
            format!("failed to extract member of {}", zip_path.display()),
            e,
        ));
    }
    Ok(out_path)
}

fn is_plain_file_name(path: &Path) -> bool {
    let mut components = path.components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Create `path`, failing if anything already occupies it.
fn create_new(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            ShroudError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::UnsafeTargetRefused,
                format!("refusing to overwrite existing {}", path.display()),
                e,
            )
        } else {
            ShroudError::io(
                ErrorCategory::Internal,
                format!("failed to create {}", path.display()),
                e,
            )
        }
    })
}

fn malformed(msg: String) -> ShroudError {
    ShroudError::with_kind(ErrorCategory::User, ErrorKind::ContainerMalformed, msg)
}

fn zip_error(e: ZipError) -> ShroudError {
    ShroudError::with_kind_and_source(
        ErrorCategory::Internal,
        ErrorKind::Io,
        "failed to write container",
        e,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, data) in members {
            zip.start_file(
                *name,
                SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
            )
            .unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let payload = temp_dir.path().join("0123456789abcdef0123456789abcdef");
        let container = temp_dir.path().join("a.txt.zip");
        let out_dir = temp_dir.path().join("out");
        fs::create_dir(&out_dir).unwrap();

        let data: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
        fs::write(&payload, &data).unwrap();

        wrap(&payload, &container).unwrap();

        let archive = ZipArchive::new(File::open(&container).unwrap()).unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(
            archive.file_names().next(),
            Some("0123456789abcdef0123456789abcdef")
        );

        let extracted = unwrap(&container, &out_dir).unwrap();
        assert_eq!(extracted, out_dir.join("0123456789abcdef0123456789abcdef"));
        assert_eq!(fs::read(&extracted).unwrap(), data);
    }

    #[test]
    fn test_wrap_refuses_existing_destination() {
        let temp_dir = TempDir::new().unwrap();
        let payload = temp_dir.path().join("payload");
        let container = temp_dir.path().join("a.txt.zip");
        fs::write(&payload, b"p").unwrap();
        fs::write(&container, b"precious").unwrap();

        let err = wrap(&payload, &container).unwrap_err();
        assert!(err.is_kind(ErrorKind::UnsafeTargetRefused));
        assert_eq!(fs::read(&container).unwrap(), b"precious");
    }

    #[test]
    #[cfg(unix)]
    fn test_wrap_refuses_symlinked_payload() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target");
        let payload = temp_dir.path().join("payload");
        let container = temp_dir.path().join("out.zip");
        fs::write(&target, b"t").unwrap();
        std::os::unix::fs::symlink(&target, &payload).unwrap();

        let err = wrap(&payload, &container).unwrap_err();
        assert!(err.is_kind(ErrorKind::UnsafeTargetRefused));
        assert!(!container.exists());
    }

    #[test]
    fn test_wrap_missing_payload_leaves_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let container = temp_dir.path().join("out.zip");
        assert!(wrap(&temp_dir.path().join("missing"), &container).is_err());
        assert!(!container.exists());
    }

    #[test]
    fn test_unwrap_rejects_multiple_members() {
        let temp_dir = TempDir::new().unwrap();
        let container = temp_dir.path().join("two.zip");
        write_zip(&container, &[("a", b"1"), ("b", b"2")]);

        let err = unwrap(&container, temp_dir.path()).unwrap_err();
        assert!(err.is_kind(ErrorKind::ContainerMalformed));
        assert!(!temp_dir.path().join("a").exists());
    }

    #[test]
    fn test_unwrap_rejects_empty_container() {
        let temp_dir = TempDir::new().unwrap();
        let container = temp_dir.path().join("empty.zip");
        write_zip(&container, &[]);

        let err = unwrap(&container, temp_dir.path()).unwrap_err();
        assert!(err.is_kind(ErrorKind::ContainerMalformed));
    }

    #[test]
    fn test_unwrap_rejects_nested_member_name() {
        let temp_dir = TempDir::new().unwrap();
        let container = temp_dir.path().join("nested.zip");
        write_zip(&container, &[("dir/payload", b"1")]);

        let err = unwrap(&container, temp_dir.path()).unwrap_err();
        assert!(err.is_kind(ErrorKind::ContainerMalformed));
    }

    #[test]
    fn test_unwrap_rejects_non_zip() {
        let temp_dir = TempDir::new().unwrap();
        let container = temp_dir.path().join("fake.zip");
        fs::write(&container, b"definitely not a zip").unwrap();

        let err = unwrap(&container, temp_dir.path()).unwrap_err();
        assert!(err.is_kind(ErrorKind::ContainerMalformed));
    }

    #[test]
    fn test_unwrap_does_not_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let container = temp_dir.path().join("one.zip");
        write_zip(&container, &[("payload", b"new")]);
        fs::write(temp_dir.path().join("payload"), b"old").unwrap();

        let err = unwrap(&container, temp_dir.path()).unwrap_err();
        assert!(err.is_kind(ErrorKind::UnsafeTargetRefused));
        assert_eq!(fs::read(temp_dir.path().join("payload")).unwrap(), b"old");
    }
}
