//! The subset of `package-lock.json` / `npm-shrinkwrap.json` the installer
//! reads.
//!
//! The installer never resolves version ranges; it only canonicalises the
//! lockfile to digest it, and hands the document to the external tree
//! builder.

use burrow_digest::Integrity;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use url::Url;

/// A `package-lock.json` or `npm-shrinkwrap.json` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lockfile {
    /// The project name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The project version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// The lockfile format version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockfile_version: Option<u32>,

    /// Whether the lockfile records `requires` relations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<bool>,

    /// The locked dependency tree.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dependencies: IndexMap<String, LockDependency>,
}

/// One locked dependency, possibly with its own nested tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockDependency {
    /// The locked version.
    pub version: String,

    /// The tarball URL this dependency resolved to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<Url>,

    /// The archive digest. Only `sha256-` digests are accepted; a lockfile
    /// carrying any other algorithm fails to parse.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<Integrity>,

    /// True for development-only dependencies.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dev: bool,

    /// True if installation failure is non-fatal.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,

    /// True if the files ship inside the parent's tarball.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bundled: bool,

    /// The version ranges this dependency requires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<IndexMap<String, String>>,

    /// Dependencies nested below this one.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub dependencies: IndexMap<String, LockDependency>,
}
