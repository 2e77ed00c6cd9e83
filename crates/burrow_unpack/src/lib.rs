#![deny(missing_docs)]

//! Streaming tarball unpacker for the burrow package store.
//!
//! The unpacker consumes a tar archive as a byte stream, classifies each
//! entry, streams regular file bodies into the content-addressed store and
//! produces a [`burrow_types::PackageMetadata`] describing the package: its
//! entry point, install-script flags and the tree of path → digest for every
//! file.
//!
//! Hostile or unsupported entries (path traversal, device nodes) are demoted
//! to warnings; only an error on the archive stream itself aborts an unpack.
//!
//! The [`IntegrityGate`] sits between a fetcher and the unpacker when the
//! caller has no ambient digest for the archive, computing one as the bytes
//! flow through.

mod gate;
mod sanitize;
mod unpacker;

pub use gate::{GateHandle, IntegrityGate};
pub use sanitize::{sanitize_entry_path, SanitizedPath};
pub use unpacker::{FileTransform, UnpackOptions, UnpackReporter, Unpacker};

/// An error that can occur while unpacking a package archive.
///
/// Per-entry problems never surface here; they are reported through
/// [`UnpackReporter::on_entry_warning`] and the entry is skipped.
#[derive(Debug, thiserror::Error)]
pub enum UnpackError {
    /// The archive stream itself failed: a tar parse error or an error from
    /// the underlying reader.
    #[error("an io error occurred: {0}")]
    IoError(#[from] std::io::Error),

    /// The unpack task was cancelled before completion.
    #[error("the task was cancelled")]
    Cancelled,
}
