//! Shroud - batch password protection of files inside zip containers
//!
//! Every file under a root directory is encrypted by an external 7-Zip
//! engine into an extension-less payload, which is then stored as the only
//! member of a `<name>.zip` container next to the original.

#![forbid(unsafe_code)]

pub mod audit;
pub mod container;
pub mod discover;
pub mod engine;
pub mod error;
pub mod passphrase;
pub mod paths;
pub mod pipeline;
pub mod policy;
pub mod secret;
pub mod selftest;

pub use engine::{ArchiveEngine, SevenZip};
pub use error::{ErrorCategory, ErrorKind, Result, ShroudError};
pub use secret::Secret;
