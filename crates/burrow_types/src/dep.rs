//! Nodes of the logical dependency tree the installer walks.
//!
//! The tree itself is produced by an external tree builder from the lockfile;
//! this module only defines its shape.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use burrow_digest::Integrity;
use serde_with::{DeserializeFromStr, SerializeDisplay};
use url::Url;

/// The colon-delimited nesting path of a dependency within the logical tree,
/// e.g. `root:a:b` for a package `b` nested under `a`.
///
/// The leading `root` segment names the tree root itself; the segments after
/// it mirror the `node_modules` nesting on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr)]
pub struct Address(Vec<String>);

impl Address {
    /// The address of the tree root.
    pub fn root() -> Self {
        Self(vec!["root".to_string()])
    }

    /// Extends this address with a child name.
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    /// All segments of the address, including the leading `root`.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The name of the node this address points at. The root address has no
    /// leaf.
    pub fn leaf(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.last().map(String::as_str)
        }
    }

    /// The ancestor names strictly between the root and the leaf. This is
    /// the scope chain the package-map builder folds through.
    pub fn scope_chain(&self) -> &[String] {
        if self.0.len() < 2 {
            &[]
        } else {
            &self.0[1..self.0.len() - 1]
        }
    }

    /// True if this is the address of the tree root.
    pub fn is_root(&self) -> bool {
        self.0.len() == 1
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(":"))
    }
}

impl FromStr for Address {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.split(':').map(str::to_string).collect()))
    }
}

/// A node of the logical dependency tree.
#[derive(Debug, Clone)]
pub struct DepNode {
    /// The package name.
    pub name: String,

    /// The locked version.
    pub version: String,

    /// The URL the tarball resolves to, when the lockfile records one.
    pub resolved: Option<Url>,

    /// The ambient archive digest, when the lockfile records one.
    pub integrity: Option<Integrity>,

    /// True for development-only dependencies.
    pub dev: bool,

    /// True if a failure to install this dependency is non-fatal.
    pub optional: bool,

    /// True if this dependency's files ship inside its parent's tarball.
    pub bundled: bool,

    /// True for the tree root (the project itself).
    pub is_root: bool,

    /// Set when the dependency resolves to a local directory (`file:` spec)
    /// instead of a registry tarball.
    pub local_path: Option<PathBuf>,

    /// The nesting path of this node within the tree.
    pub address: Address,

    /// Dependencies installed beneath this node.
    pub children: Vec<DepNode>,
}

impl DepNode {
    /// Constructs a root node for a project.
    pub fn root(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            resolved: None,
            integrity: None,
            dev: false,
            optional: false,
            bundled: false,
            is_root: true,
            local_path: None,
            address: Address::root(),
            children: Vec::new(),
        }
    }

    /// A copy of this node without its children. Visitors that outlive a
    /// borrow of the tree carry one of these instead of the whole subtree.
    pub fn detached(&self) -> Self {
        Self {
            name: self.name.clone(),
            version: self.version.clone(),
            resolved: self.resolved.clone(),
            integrity: self.integrity.clone(),
            dev: self.dev,
            optional: self.optional,
            bundled: self.bundled,
            is_root: self.is_root,
            local_path: self.local_path.clone(),
            address: self.address.clone(),
            children: Vec::new(),
        }
    }

    /// The logical install directory of this node below `prefix`:
    /// `<prefix>/node_modules/a/node_modules/b/…`.
    pub fn install_path(&self, prefix: &Path) -> PathBuf {
        let mut path = prefix.to_path_buf();
        for segment in &self.address.segments()[1..] {
            path.push("node_modules");
            path.push(segment);
        }
        path
    }
}
