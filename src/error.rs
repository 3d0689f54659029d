use std::error::Error as StdError;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// In particular this means that use of Internal is never a guarantee
    /// the error is not, for example due to a user error - merely that it
    /// cannot be confidently determined by the code.
    Internal,

    /// The user provided invalid input or performed an action that is
    /// unsupported or impossible to complete.
    User,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// No usable archiving engine executable could be located.
    EngineNotFound,
    /// The archiving engine could not be started or exited unsuccessfully.
    /// A wrong secret and a corrupt payload both surface as this kind.
    EngineInvocationFailed,
    /// A path was a symlink, directory or other non-regular entry where a
    /// regular file was required, or a destination already existed.
    UnsafeTargetRefused,
    /// A container did not hold exactly one plain file member.
    ContainerMalformed,
    /// A candidate secret violated the composition policy.
    PolicyViolation,
    /// The user interrupted an interactive prompt or the run.
    UserInterrupted,
    /// Passphrase could not be obtained from the configured reader.
    PassphraseUnavailable,
    /// Unexpected state reached within shroud logic.
    InternalInvariant,
    /// Interaction with the filesystem, stdin/stdout, or other I/O failed.
    Io,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct ShroudError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl ShroudError {
    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// Shorthand for filesystem failures, the most common per-file error.
    pub(crate) fn io(
        category: ErrorCategory,
        msg: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::with_kind_and_source(category, ErrorKind::Io, msg, source)
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Returns true if the error is tagged with `kind`.
    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == Some(kind)
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }

    /// Renders the message followed by every message in the source chain,
    /// separated by `": "`.
    pub fn chain_message(&self) -> String {
        let mut out = self.msg.clone();
        let mut next = self.source_error().map(|e| e as &(dyn StdError + 'static));
        while let Some(err) = next {
            out.push_str(": ");
            out.push_str(&err.to_string());
            next = err.source();
        }
        out
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ShroudError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_with_context_keeps_kind_and_category() {
        let inner = ShroudError::with_kind(
            ErrorCategory::User,
            ErrorKind::UnsafeTargetRefused,
            "refusing symlink",
        );
        let outer = inner.with_context("wrap failed");
        assert_eq!(outer.category, ErrorCategory::User);
        assert!(outer.is_kind(ErrorKind::UnsafeTargetRefused));
        assert_eq!(outer.message(), "wrap failed");
        assert!(outer.source_error().is_some());
    }

    #[test]
    fn test_chain_message() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let err = ShroudError::io(ErrorCategory::User, "failed to open a.txt", io_err)
            .with_context("encrypt failed");
        assert_eq!(
            err.chain_message(),
            "encrypt failed: failed to open a.txt: no such file"
        );
    }
}
