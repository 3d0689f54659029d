//! Shared test doubles.

#![allow(dead_code)]

use shroud::{ArchiveEngine, ErrorCategory, ErrorKind, Secret, ShroudError};
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;

const MAGIC: &[u8] = b"FAKE7Z\0";

/// In-process stand-in for the 7-Zip engine.
///
/// Payloads carry a fingerprint of the secret and the file bytes XORed with
/// a secret-derived stream, so a wrong secret fails to decrypt. Flags make
/// it misbehave in the ways the self-test must catch.
#[derive(Debug, Default, Clone, Copy)]
pub struct FakeEngine {
    pub fail_encrypt: bool,
    pub ignore_secret: bool,
    pub corrupt_output: bool,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_encrypt: true,
            ..Self::default()
        }
    }

    pub fn ignoring_secret() -> Self {
        Self {
            ignore_secret: true,
            ..Self::default()
        }
    }

    pub fn corrupting() -> Self {
        Self {
            corrupt_output: true,
            ..Self::default()
        }
    }
}

fn fingerprint(secret: &Secret) -> u64 {
    let mut hasher = DefaultHasher::new();
    secret.expose().hash(&mut hasher);
    hasher.finish()
}

fn keystream(secret: &Secret, data: &mut [u8]) {
    let key = secret.expose().as_bytes();
    for (i, b) in data.iter_mut().enumerate() {
        *b ^= key[i % key.len()] ^ (i as u8);
    }
}

fn engine_error(msg: impl Into<String>) -> ShroudError {
    ShroudError::with_kind(
        ErrorCategory::Internal,
        ErrorKind::EngineInvocationFailed,
        msg,
    )
}

fn io_error(e: std::io::Error) -> ShroudError {
    ShroudError::with_kind_and_source(ErrorCategory::Internal, ErrorKind::Io, "fake engine I/O", e)
}

impl ArchiveEngine for FakeEngine {
    fn encrypt(&self, source: &Path, dest_no_ext: &Path, secret: &Secret) -> shroud::Result<()> {
        if self.fail_encrypt {
            return Err(engine_error("7z encrypt failed (exit code 2): simulated"));
        }
        let mut data = fs::read(source).map_err(io_error)?;
        let name = source.file_name().unwrap().to_str().unwrap().as_bytes();
        if !self.ignore_secret {
            keystream(secret, &mut data);
        }

        let mut out = MAGIC.to_vec();
        out.extend_from_slice(&fingerprint(secret).to_be_bytes());
        out.extend_from_slice(&(name.len() as u16).to_be_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&data);

        if let Ok(meta) = fs::symlink_metadata(dest_no_ext) {
            if !meta.file_type().is_file() {
                return Err(ShroudError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::UnsafeTargetRefused,
                    "not a regular file",
                ));
            }
        }
        fs::write(dest_no_ext, out).map_err(io_error)
    }

    fn decrypt(&self, payload: &Path, out_dir: &Path, secret: &Secret) -> shroud::Result<()> {
        let raw = fs::read(payload).map_err(io_error)?;
        if raw.len() < MAGIC.len() + 10 || !raw.starts_with(MAGIC) {
            return Err(engine_error("Can not open the file as archive"));
        }
        let mut pos = MAGIC.len();
        let stored = u64::from_be_bytes(raw[pos..pos + 8].try_into().unwrap());
        pos += 8;
        if !self.ignore_secret && stored != fingerprint(secret) {
            return Err(engine_error("Wrong password"));
        }
        let name_len = u16::from_be_bytes(raw[pos..pos + 2].try_into().unwrap()) as usize;
        pos += 2;
        let name = std::str::from_utf8(&raw[pos..pos + name_len]).unwrap().to_string();
        pos += name_len;

        let mut data = raw[pos..].to_vec();
        if !self.ignore_secret {
            keystream(secret, &mut data);
        }
        if self.corrupt_output {
            data.pop();
        }
        fs::write(out_dir.join(name), data).map_err(io_error)
    }
}
