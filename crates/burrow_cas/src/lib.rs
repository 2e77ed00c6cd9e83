#![deny(missing_docs)]

//! The content-addressed store backing a burrow installation.
//!
//! Package tarballs are never materialised as directory trees. Instead each
//! regular file a package ships is stored once, under the SHA-256 digest of
//! its bytes, and the project's package map refers to those digests. Since
//! dependency trees repeat the same licenses, type definitions and build
//! artifacts over and over, writing a second package that shares content
//! with an earlier one costs no additional storage.
//!
//! All access goes through a [`Store`] handle:
//!
//! - buffered blob writes ([`Store::write_bytes`]) with a dedup fast path,
//! - streaming blob writes through an async [`Writer`] sink,
//! - a keyed index associating installer-chosen keys with a stored artifact
//!   and a JSON metadata blob ([`Store::put_keyed`] / [`Store::get_info`]),
//! - in-process memo tables for hot blobs and keyed entries.
//!
//! On disk, a blob whose digest renders as hex `4a1f…` lives at
//! `<root>/4a/1f/<rest>`; writes are staged in `<root>/.tmp` and land with
//! an atomic rename, so a crash never leaves a partial blob at its final
//! address and concurrent writers of the same content cannot clobber each
//! other. Blobs are immutable once written: the store only ever gains
//! entries, and the content at a digest always hashes back to that digest.

mod store;
mod writer;

pub use store::{KeyedInfo, PutOptions, Store};
pub use writer::Writer;
