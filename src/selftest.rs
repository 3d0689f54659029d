//! Round-trip self-test
//!
//! Proves, on synthetic data in a scratch directory, that a payload made
//! by the engine survives wrapping and unwrapping, decrypts to the exact
//! original bytes with the right secret, and does NOT decrypt with a wrong
//! one. Runs stop at the first failing step.

use crate::container;
use crate::engine::ArchiveEngine;
use crate::error::ShroudError;
use crate::paths;
use crate::policy::{self, DEFAULT_GENERATED_LENGTH};
use std::fmt;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use thiserror::Error;

const SOURCE_NAME: &str = "self-test-source.bin";

/// The steps of the self-test, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfTestStep {
    GenerateSecrets,
    WriteSource,
    Encrypt,
    Wrap,
    Unwrap,
    DecryptCorrect,
    VerifyContent,
    DecryptWrong,
}

impl fmt::Display for SelfTestStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SelfTestStep::GenerateSecrets => "generate secrets",
            SelfTestStep::WriteSource => "write synthetic source",
            SelfTestStep::Encrypt => "encrypt",
            SelfTestStep::Wrap => "wrap",
            SelfTestStep::Unwrap => "unwrap",
            SelfTestStep::DecryptCorrect => "decrypt with correct password",
            SelfTestStep::VerifyContent => "verify decrypted content",
            SelfTestStep::DecryptWrong => "decrypt with wrong password",
        };
        f.write_str(name)
    }
}

/// Which step failed, and why.
#[derive(Debug, Error)]
#[error("self-test failed at step '{step}': {reason}")]
pub struct SelfTestFailure {
    pub step: SelfTestStep,
    pub reason: String,
    #[source]
    source: Option<ShroudError>,
}

impl SelfTestFailure {
    fn new(step: SelfTestStep, reason: impl Into<String>) -> Self {
        Self {
            step,
            reason: reason.into(),
            source: None,
        }
    }

    fn from_error(step: SelfTestStep, err: ShroudError) -> Self {
        Self {
            step,
            reason: err.chain_message(),
            source: Some(err),
        }
    }
}

/// The bytes encrypted by the self-test: text plus every byte value.
pub fn known_content() -> Vec<u8> {
    let mut content = b"shroud self-test: the quick brown fox jumps over the lazy dog\n".to_vec();
    content.extend(0..=255u8);
    content.extend(std::iter::repeat_n(0x5au8, 4096));
    content
}

/// Run the full round trip against `engine`.
pub fn run_self_test(engine: &dyn ArchiveEngine) -> Result<(), SelfTestFailure> {
    use SelfTestStep::*;

    let correct = policy::generate_strong(DEFAULT_GENERATED_LENGTH);
    let wrong = policy::generate_strong(DEFAULT_GENERATED_LENGTH);
    if correct == wrong {
        return Err(SelfTestFailure::new(
            GenerateSecrets,
            "generated secrets are not distinct",
        ));
    }
    passed(GenerateSecrets);

    let scratch = scratch_dir(WriteSource)?;
    let work = scratch.path();
    let source = work.join(SOURCE_NAME);
    let content = known_content();
    fs::write(&source, &content).map_err(|e| io_failure(WriteSource, &source, e))?;
    passed(WriteSource);

    let payload = paths::new_payload_path(work);
    engine
        .encrypt(&source, &payload, &correct)
        .map_err(|e| SelfTestFailure::from_error(Encrypt, e))?;
    if !payload.is_file() {
        return Err(SelfTestFailure::new(
            Encrypt,
            "engine reported success but wrote no payload",
        ));
    }
    passed(Encrypt);

    let container_path = work.join("self-test.zip");
    container::wrap(&payload, &container_path)
        .map_err(|e| SelfTestFailure::from_error(Wrap, e))?;
    passed(Wrap);

    let unwrap_dir = subdir(work, "unwrapped", Unwrap)?;
    let recovered = container::unwrap(&container_path, &unwrap_dir)
        .map_err(|e| SelfTestFailure::from_error(Unwrap, e))?;
    let original_payload = fs::read(&payload).map_err(|e| io_failure(Unwrap, &payload, e))?;
    let recovered_payload = fs::read(&recovered).map_err(|e| io_failure(Unwrap, &recovered, e))?;
    if original_payload != recovered_payload {
        return Err(SelfTestFailure::new(
            Unwrap,
            "unwrapped payload differs from the wrapped payload",
        ));
    }
    passed(Unwrap);

    let good_dir = subdir(work, "decrypted-correct", DecryptCorrect)?;
    engine
        .decrypt(&recovered, &good_dir, &correct)
        .map_err(|e| SelfTestFailure::from_error(DecryptCorrect, e))?;
    passed(DecryptCorrect);

    let decrypted_path = good_dir.join(SOURCE_NAME);
    if !decrypted_path.is_file() {
        return Err(SelfTestFailure::new(VerifyContent, "decrypted file is missing"));
    }
    let decrypted =
        fs::read(&decrypted_path).map_err(|e| io_failure(VerifyContent, &decrypted_path, e))?;
    if decrypted != content {
        return Err(SelfTestFailure::new(
            VerifyContent,
            format!(
                "decrypted content differs from the original ({} bytes vs {} bytes)",
                decrypted.len(),
                content.len()
            ),
        ));
    }
    passed(VerifyContent);

    let wrong_dir = subdir(work, "decrypted-wrong", DecryptWrong)?;
    if engine.decrypt(&recovered, &wrong_dir, &wrong).is_ok() {
        return Err(SelfTestFailure::new(
            DecryptWrong,
            "payload decrypted with a wrong password; encryption is not protecting the data",
        ));
    }
    passed(DecryptWrong);

    Ok(())
}

fn passed(step: SelfTestStep) {
    log::info!("self-test step '{}' passed", step);
}

fn scratch_dir(step: SelfTestStep) -> Result<TempDir, SelfTestFailure> {
    tempfile::Builder::new()
        .prefix("shroud-self-test-")
        .tempdir()
        .map_err(|e| {
            SelfTestFailure::new(step, format!("failed to create scratch directory: {}", e))
        })
}

fn subdir(
    work: &Path,
    name: &str,
    step: SelfTestStep,
) -> Result<std::path::PathBuf, SelfTestFailure> {
    let dir = work.join(name);
    fs::create_dir(&dir).map_err(|e| io_failure(step, &dir, e))?;
    Ok(dir)
}

fn io_failure(step: SelfTestStep, path: &Path, e: std::io::Error) -> SelfTestFailure {
    SelfTestFailure::new(step, format!("{}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_content_covers_all_byte_values() {
        let content = known_content();
        for b in 0..=255u8 {
            assert!(content.contains(&b));
        }
    }

    #[test]
    fn test_failure_message_names_step() {
        let failure = SelfTestFailure::new(SelfTestStep::DecryptWrong, "accepted");
        assert_eq!(
            failure.to_string(),
            "self-test failed at step 'decrypt with wrong password': accepted"
        );
    }
}
