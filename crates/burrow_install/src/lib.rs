#![deny(missing_docs)]

//! The tree installer: walks a locked dependency graph, drives concurrent
//! unpacks into the content-addressed store, and assembles the project-wide
//! package map.
//!
//! The orchestration pipeline runs `prepare`, `check_lock`, `fetch_tree`,
//! `build_package_map`, `write_package_map` and `build_tree`, with a
//! `teardown` stage that always runs; see [`Installer`]. External concerns
//! (registry access, lockfile generation, script execution, bin linking)
//! sit behind the traits in [`collaborators`].

pub mod collaborators;
mod config;
mod ensure;
mod installer;
mod package_map;
mod reclaim;
mod tree;

use std::path::PathBuf;

pub use config::InstallOptions;
pub use ensure::{dep_key, ensure_package};
pub use installer::{InstallSummary, Installer, Timings};
pub use package_map::build_package_map;
pub use reclaim::reclaim;
pub use tree::{walk_concurrent, walk_post_order, walk_pre_order, Visit, DEFAULT_VISIT_CONCURRENCY};

/// An error that aborts an install.
///
/// Failures of *optional* dependencies never surface here; the orchestrator
/// collects them and reclaims their subtrees instead.
#[derive(Debug, thiserror::Error)]
pub enum InstallerError {
    /// An io error outside any more specific stage.
    #[error("an io error occurred: {0}")]
    IoError(#[from] std::io::Error),

    /// Reading or parsing one of the project files failed.
    #[error("failed to read '{0}'")]
    FailedToReadProjectFile(PathBuf, #[source] std::io::Error),

    /// No lockfile was found and no generator is configured to create one.
    #[error("no package-lock.json or npm-shrinkwrap.json found")]
    MissingLockfile,

    /// The lockfile verifier reported hard errors and no generator is
    /// configured to regenerate the lockfile.
    #[error("the lockfile is out of sync with the project manifest")]
    LockfileOutOfSync,

    /// Fetching a required dependency failed.
    #[error("failed to fetch '{0}'")]
    FailedToFetch(String, #[source] std::io::Error),

    /// Unpacking a required dependency failed.
    #[error("failed to unpack '{0}'")]
    FailedToUnpack(String, #[source] burrow_unpack::UnpackError),

    /// Persisting or restoring cached package metadata failed.
    #[error("package metadata for '{0}' is corrupt")]
    CorruptPackageMetadata(String, #[source] serde_json::Error),

    /// The operation was cancelled.
    #[error("the operation was cancelled")]
    Cancelled,
}

impl From<tokio::task::JoinError> for InstallerError {
    fn from(err: tokio::task::JoinError) -> Self {
        if let Ok(panic) = err.try_into_panic() {
            std::panic::resume_unwind(panic)
        } else {
            InstallerError::Cancelled
        }
    }
}

impl From<tokio::sync::AcquireError> for InstallerError {
    fn from(_err: tokio::sync::AcquireError) -> Self {
        InstallerError::Cancelled
    }
}
