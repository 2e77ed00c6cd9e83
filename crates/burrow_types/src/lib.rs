#![deny(missing_docs)]

//! Shared data model for the burrow package store.
//!
//! The types in this crate describe everything that crosses a component
//! boundary during an install:
//!
//! - [`FileManifest`]: the per-package tree of path → digest produced by the
//!   unpacker.
//! - [`PackageMetadata`] / [`PackageDocument`]: what the unpacker learns
//!   about a package, and the enriched document the installer persists.
//! - [`DepNode`] / [`Address`]: the logical dependency tree the installer
//!   walks, derived from a lockfile by an external tree builder.
//! - [`PackageMap`]: the project-wide `.package-map.json` document.
//! - [`Lockfile`]: the subset of `package-lock.json` /
//!   `npm-shrinkwrap.json` the installer needs to canonicalise and verify.

mod dep;
mod json;
mod lockfile;
mod manifest;
mod metadata;
mod package_map;

pub use dep::{Address, DepNode};
pub use json::{canonical_json, read_json_file};
pub use lockfile::{LockDependency, Lockfile};
pub use manifest::{FileManifest, ManifestEntry};
pub use metadata::{PackageDocument, PackageMetadata};
pub use package_map::{PackageMap, PackageMapEntry, PackageScope};
