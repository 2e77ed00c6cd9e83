//! Interfaces of the external collaborators the installer drives.
//!
//! The core never talks to a registry, runs a script or links a binary
//! itself; those concerns live behind these traits. The test suite provides
//! in-memory implementations.

use std::path::Path;

use burrow_digest::Integrity;
use burrow_types::{DepNode, Lockfile};
use futures::future::BoxFuture;
use tokio::io::AsyncRead;
use url::Url;

/// The byte stream of a package tarball.
pub type TarballStream = Box<dyn AsyncRead + Send + Unpin>;

/// Opens tarball byte streams for dependencies.
pub trait Fetcher: Send + Sync {
    /// Opens the gzip-compressed tarball stream for a dependency. The stream
    /// errors are surfaced through the returned reader.
    fn tarball_stream<'a>(
        &'a self,
        node: &'a DepNode,
    ) -> BoxFuture<'a, std::io::Result<TarballStream>>;
}

/// The resolution data a registry manifest provides for a package version.
#[derive(Debug, Clone, Default)]
pub struct ResolvedManifest {
    /// The tarball URL.
    pub resolved: Option<Url>,

    /// The archive digest.
    pub integrity: Option<Integrity>,
}

/// Resolves registry manifests, used to fill in `resolved`/`integrity` when
/// the lockfile lacks them.
pub trait ManifestResolver: Send + Sync {
    /// Fetches the manifest for a package version.
    fn manifest<'a>(
        &'a self,
        name: &'a str,
        version: &'a str,
    ) -> BoxFuture<'a, std::io::Result<ResolvedManifest>>;
}

/// Builds the logical dependency tree from the project files.
pub trait TreeBuilder: Send + Sync {
    /// Derives a walkable [`DepNode`] tree from the project's `package.json`
    /// and its lockfile.
    fn build_tree(
        &self,
        package_json: Option<&serde_json::Value>,
        lockfile: &Lockfile,
    ) -> std::io::Result<DepNode>;
}

/// The result of verifying a lockfile against the project manifest.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    /// False when the lockfile is out of sync with the manifest.
    pub status: bool,

    /// Non-fatal findings.
    pub warnings: Vec<String>,

    /// Findings that require the lockfile to be regenerated.
    pub errors: Vec<String>,
}

/// Verifies a lockfile against the project manifest.
pub trait LockfileVerifier: Send + Sync {
    /// Checks the lockfile; a hard-error report triggers regeneration.
    fn verify(&self, prefix: &Path, lockfile: &Lockfile) -> VerifyReport;
}

/// Writes a fresh `package-lock.json` for the project, typically by running
/// an external process.
pub trait LockfileGenerator: Send + Sync {
    /// Generates the lockfile at the given install prefix.
    fn generate<'a>(&'a self, prefix: &'a Path) -> BoxFuture<'a, std::io::Result<()>>;
}

/// An install-lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptPhase {
    /// `preinstall` scripts.
    Preinstall,
    /// `install` scripts.
    Install,
    /// `postinstall` scripts.
    Postinstall,
}

/// Runs lifecycle scripts of the installed tree.
pub trait ScriptRunner: Send + Sync {
    /// Runs one lifecycle phase across the tree.
    fn run_phase<'a>(
        &'a self,
        phase: ScriptPhase,
        prefix: &'a Path,
    ) -> BoxFuture<'a, std::io::Result<()>>;
}

/// Creates executable links for package `bin` entries.
pub trait BinLinker: Send + Sync {
    /// Links the bins of every installed package; returns the number of
    /// links created.
    fn link_bins<'a>(
        &'a self,
        tree: &'a DepNode,
        prefix: &'a Path,
    ) -> BoxFuture<'a, std::io::Result<usize>>;
}
