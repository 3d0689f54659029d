//! External archiving engine adapter
//!
//! All actual compression and encryption is delegated to a 7-Zip
//! executable run as a blocking child process. [`ArchiveEngine`] is the
//! narrow seam the rest of the crate depends on, so tests can substitute an
//! in-process fake.
//!
//! The secret is passed to 7-Zip on its command line. On most platforms
//! other local users can read a process's arguments while it runs; this is
//! a known exposure of using the external engine and is announced with a
//! warning whenever a [`SevenZip`] is created.

use crate::error::{ErrorCategory, ErrorKind, Result, ShroudError};
use crate::secret::Secret;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Upper bound on engine diagnostic text carried in errors.
pub const MAX_DIAGNOSTIC_LEN: usize = 512;

/// Executable names tried next to our own binary and on `PATH`.
const ENGINE_NAMES: &[&str] = &["7z", "7zz", "7za"];

/// Native extension of the engine's archive format.
const NATIVE_EXTENSION: &str = "7z";

/// Produces and opens password-encrypted single-file payloads.
pub trait ArchiveEngine {
    /// Encrypt `source` into a new payload at `dest_no_ext`.
    ///
    /// A regular file already at `dest_no_ext` is replaced; any other kind
    /// of entry there makes the call fail with
    /// [`ErrorKind::UnsafeTargetRefused`].
    fn encrypt(&self, source: &Path, dest_no_ext: &Path, secret: &Secret) -> Result<()>;

    /// Extract the payload's sole member into `out_dir`.
    ///
    /// A wrong secret and a corrupt payload are not distinguished.
    fn decrypt(&self, payload: &Path, out_dir: &Path, secret: &Secret) -> Result<()>;
}

/// The 7-Zip command-line engine.
#[derive(Debug, Clone)]
pub struct SevenZip {
    program: PathBuf,
}

impl SevenZip {
    /// Use `program` without any lookup. It must be an executable file.
    pub fn new(program: impl Into<PathBuf>) -> Result<Self> {
        let program = program.into();
        if !is_executable(&program) {
            return Err(not_found(format!(
                "archiving engine {} is missing or not executable",
                program.display()
            )));
        }
        log::warn!(
            "the password is passed to {} on its command line and may be visible \
             to other local processes while it runs",
            program.display()
        );
        Ok(Self { program })
    }

    /// Locate the engine: `explicit` if given, otherwise the first hit in
    /// [`candidate_paths`].
    pub fn locate(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::new(path);
        }
        for candidate in candidate_paths() {
            if is_executable(&candidate) {
                log::debug!("using archiving engine at {}", candidate.display());
                return Self::new(candidate);
            }
        }
        Err(not_found(
            "7-Zip executable not found; install 7-Zip, add it to PATH, or pass --engine",
        ))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run the engine and turn a non-zero exit into an error carrying its
    /// bounded, secret-free diagnostic text.
    fn run(
        &self,
        args: Vec<OsString>,
        cwd: Option<&Path>,
        secret: &Secret,
        what: &str,
    ) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        log::debug!("running {} {}", self.program.display(), what);

        let output = command.output().map_err(|e| {
            ShroudError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::EngineInvocationFailed,
                format!("failed to start {}", self.program.display()),
                e,
            )
        })?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostic = bounded_diagnostic(&scrub_secret(stderr.trim(), secret));
        let status = match output.status.code() {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };
        Err(ShroudError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::EngineInvocationFailed,
            if diagnostic.is_empty() {
                format!("7z {} failed ({})", what, status)
            } else {
                format!("7z {} failed ({}): {}", what, status, diagnostic)
            },
        ))
    }
}

impl ArchiveEngine for SevenZip {
    fn encrypt(&self, source: &Path, dest_no_ext: &Path, secret: &Secret) -> Result<()> {
        require_regular_source(source)?;
        let (source_dir, source_name) = split_source(source)?;
        let dest_dir = parent_dir(dest_no_ext);

        // The temporary archive lives next to its destination so the final
        // rename never crosses filesystems. The directory is removed when
        // `work` drops, on every path out of this function.
        let work = tempfile::Builder::new()
            .prefix(".shroud-")
            .tempdir_in(dest_dir)
            .map_err(|e| {
                ShroudError::io(
                    ErrorCategory::Internal,
                    format!("failed to create work directory in {}", dest_dir.display()),
                    e,
                )
            })?;
        let temp_archive = work
            .path()
            .join(format!("{}.{}", crate::paths::new_payload_id(), NATIVE_EXTENSION));

        self.run(
            encrypt_args(&temp_archive, source_name, secret),
            Some(source_dir),
            secret,
            "encrypt",
        )?;
        place_payload(&temp_archive, dest_no_ext)
    }

    fn decrypt(&self, payload: &Path, out_dir: &Path, secret: &Secret) -> Result<()> {
        require_regular_source(payload)?;
        self.run(decrypt_args(payload, out_dir, secret), None, secret, "decrypt")
    }
}

/// Arguments for adding `source_name` (relative to the working directory)
/// to a new header-encrypted 7z archive at `archive`.
pub(crate) fn encrypt_args(archive: &Path, source_name: &Path, secret: &Secret) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["a", "-t7z", "-mx=9", "-mhe=on", "-m0=lzma2", "-mmt=on", "-y"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(password_arg(secret));
    // Names starting with '-' or '@' must not be read as switches or list files
    args.push(OsString::from("--"));
    args.push(archive.as_os_str().to_os_string());
    args.push(source_name.as_os_str().to_os_string());
    args
}

/// Arguments for extracting `payload` into `out_dir`.
pub(crate) fn decrypt_args(payload: &Path, out_dir: &Path, secret: &Secret) -> Vec<OsString> {
    let mut out_switch = OsString::from("-o");
    out_switch.push(out_dir.as_os_str());
    vec![
        OsString::from("x"),
        OsString::from("-y"),
        password_arg(secret),
        out_switch,
        OsString::from("--"),
        payload.as_os_str().to_os_string(),
    ]
}

fn password_arg(secret: &Secret) -> OsString {
    let mut arg = OsString::from("-p");
    arg.push(secret.expose());
    arg
}

/// Move the finished temporary archive to `dest`, dropping its extension.
///
/// An existing regular file at `dest` is removed first; a symlink,
/// directory or other entry is refused rather than followed or destroyed.
pub(crate) fn place_payload(temp_archive: &Path, dest: &Path) -> Result<()> {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.file_type().is_file() => {
            log::debug!("replacing existing payload at {}", dest.display());
            fs::remove_file(dest).map_err(|e| {
                ShroudError::io(
                    ErrorCategory::Internal,
                    format!("failed to remove existing {}", dest.display()),
                    e,
                )
            })?;
        }
        Ok(_) => {
            return Err(ShroudError::with_kind(
                ErrorCategory::User,
                ErrorKind::UnsafeTargetRefused,
                format!(
                    "refusing to replace {}: it is not a regular file",
                    dest.display()
                ),
            ));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(ShroudError::io(
                ErrorCategory::Internal,
                format!("failed to inspect {}", dest.display()),
                e,
            ));
        }
    }

    fs::rename(temp_archive, dest).map_err(|e| {
        ShroudError::io(
            ErrorCategory::Internal,
            format!("failed to move payload to {}", dest.display()),
            e,
        )
    })
}

/// Replace every occurrence of the secret with `***`.
pub(crate) fn scrub_secret(text: &str, secret: &Secret) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    text.replace(secret.expose(), "***")
}

/// Cut `text` to at most [`MAX_DIAGNOSTIC_LEN`] characters.
pub fn bounded_diagnostic(text: &str) -> String {
    match text.char_indices().nth(MAX_DIAGNOSTIC_LEN) {
        Some((cut, _)) => format!("{}... (truncated)", &text[..cut]),
        None => text.to_string(),
    }
}

/// Candidate engine locations in search order: bundled next to the
/// running executable, `PATH`, then well-known install locations.
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();

    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        for name in ENGINE_NAMES {
            out.push(dir.join(format!("{}{}", name, std::env::consts::EXE_SUFFIX)));
        }
    }

    for name in ENGINE_NAMES {
        if let Ok(path) = which::which(name) {
            out.push(path);
        }
    }

    out.extend(well_known_locations());
    out
}

#[cfg(windows)]
fn well_known_locations() -> Vec<PathBuf> {
    let mut out = Vec::new();
    for var in ["ProgramFiles", "ProgramFiles(x86)", "ProgramW6432"] {
        if let Ok(root) = std::env::var(var) {
            out.push(Path::new(&root).join("7-Zip").join("7z.exe"));
        }
    }
    out.push(PathBuf::from(r"C:\Program Files\7-Zip\7z.exe"));
    out.push(PathBuf::from(r"C:\Program Files (x86)\7-Zip\7z.exe"));
    out
}

#[cfg(not(windows))]
fn well_known_locations() -> Vec<PathBuf> {
    [
        "/usr/bin/7z",
        "/usr/local/bin/7z",
        "/opt/homebrew/bin/7z",
        "/usr/bin/7zz",
        "/usr/local/bin/7zz",
        "/opt/homebrew/bin/7zz",
        "/usr/bin/7za",
        "/usr/local/bin/7za",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

fn not_found(msg: impl Into<String>) -> ShroudError {
    ShroudError::with_kind(ErrorCategory::User, ErrorKind::EngineNotFound, msg)
}

/// Fail unless `path` is a regular file reached without following a symlink.
pub(crate) fn require_regular_source(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path).map_err(|e| {
        let category = if e.kind() == io::ErrorKind::NotFound {
            ErrorCategory::User
        } else {
            ErrorCategory::Internal
        };
        ShroudError::io(category, format!("failed to read from {}", path.display()), e)
    })?;
    if !meta.file_type().is_file() {
        return Err(ShroudError::with_kind(
            ErrorCategory::User,
            ErrorKind::UnsafeTargetRefused,
            format!("{} is not a regular file", path.display()),
        ));
    }
    Ok(())
}

fn split_source(source: &Path) -> Result<(&Path, &Path)> {
    let name = source.file_name().ok_or_else(|| {
        ShroudError::with_kind(
            ErrorCategory::User,
            ErrorKind::InternalInvariant,
            format!("{} has no file name", source.display()),
        )
    })?;
    Ok((parent_dir(source), Path::new(name)))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
