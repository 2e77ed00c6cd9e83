//! The installer orchestrator.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use burrow_cas::Store;
use burrow_digest::Integrity;
use burrow_types::{
    canonical_json, read_json_file, Address, DepNode, Lockfile, PackageDocument, PackageMap,
};
use futures::{future, FutureExt};
use tokio::sync::Semaphore;

use crate::{
    collaborators::{
        BinLinker, Fetcher, LockfileGenerator, LockfileVerifier, ManifestResolver, ScriptPhase,
        ScriptRunner, TreeBuilder,
    },
    ensure::ensure_package,
    package_map::build_package_map,
    reclaim::reclaim,
    tree::{walk_concurrent, Visit, DEFAULT_VISIT_CONCURRENCY},
    InstallOptions, InstallerError,
};

/// The file the package map is persisted to, relative to the prefix.
const PACKAGE_MAP_FILE: &str = ".package-map.json";

/// Wall-clock durations of the pipeline stages of one run.
#[derive(Debug, Default)]
pub struct Timings {
    stages: Vec<(&'static str, Duration)>,
}

impl Timings {
    fn record(&mut self, stage: &'static str, elapsed: Duration) {
        tracing::debug!("stage '{stage}' took {elapsed:?}");
        self.stages.push((stage, elapsed));
    }

    /// The recorded stages in execution order.
    pub fn stages(&self) -> &[(&'static str, Duration)] {
        &self.stages
    }

    /// The duration of one stage, if it ran.
    pub fn get(&self, stage: &str) -> Option<Duration> {
        self.stages
            .iter()
            .find(|(name, _)| *name == stage)
            .map(|(_, elapsed)| *elapsed)
    }
}

/// The outcome of a completed install run.
#[derive(Debug)]
pub struct InstallSummary {
    /// Number of dependencies processed, net of reclaimed ones.
    pub pkg_count: usize,

    /// Optional dependencies whose install failed.
    pub failed_deps: HashSet<Address>,

    /// Addresses reclaimed from the logical tree because of failed optional
    /// dependencies.
    pub purged: HashSet<Address>,

    /// The package map that was written.
    pub package_map: PackageMap,

    /// Stage timings.
    pub timings: Timings,
}

/// Drives the install pipeline: `prepare`, `check_lock`, `fetch_tree`,
/// `build_package_map`, `write_package_map`, `build_tree` and finally
/// `teardown`.
///
/// The orchestrator owns the bookkeeping (timings, package counter, failed
/// optional deps); everything that touches the outside world is one of the
/// injected collaborators.
pub struct Installer {
    options: InstallOptions,
    store: Store,
    fetcher: Arc<dyn Fetcher>,
    resolver: Arc<dyn ManifestResolver>,
    tree_builder: Arc<dyn TreeBuilder>,
    verifier: Option<Arc<dyn LockfileVerifier>>,
    lock_generator: Option<Arc<dyn LockfileGenerator>>,
    script_runner: Option<Arc<dyn ScriptRunner>>,
    bin_linker: Option<Arc<dyn BinLinker>>,
}

impl Installer {
    /// Constructs an installer from its required collaborators.
    pub fn new(
        options: InstallOptions,
        fetcher: Arc<dyn Fetcher>,
        resolver: Arc<dyn ManifestResolver>,
        tree_builder: Arc<dyn TreeBuilder>,
    ) -> Self {
        let store = Store::new(&options.cache);
        Self {
            options,
            store,
            fetcher,
            resolver,
            tree_builder,
            verifier: None,
            lock_generator: None,
            script_runner: None,
            bin_linker: None,
        }
    }

    /// Sets the lockfile verifier.
    #[must_use]
    pub fn with_verifier(self, verifier: Arc<dyn LockfileVerifier>) -> Self {
        Self {
            verifier: Some(verifier),
            ..self
        }
    }

    /// Sets the lockfile generator.
    #[must_use]
    pub fn with_lock_generator(self, generator: Arc<dyn LockfileGenerator>) -> Self {
        Self {
            lock_generator: Some(generator),
            ..self
        }
    }

    /// Sets the lifecycle-script runner.
    #[must_use]
    pub fn with_script_runner(self, runner: Arc<dyn ScriptRunner>) -> Self {
        Self {
            script_runner: Some(runner),
            ..self
        }
    }

    /// Sets the bin linker.
    #[must_use]
    pub fn with_bin_linker(self, linker: Arc<dyn BinLinker>) -> Self {
        Self {
            bin_linker: Some(linker),
            ..self
        }
    }

    /// The store this installer writes into.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Runs the install pipeline. The teardown stage always runs, also when
    /// an earlier stage failed.
    pub async fn run(self) -> Result<InstallSummary, InstallerError> {
        let mut timings = Timings::default();
        let result = self.run_stages(&mut timings).await;

        // teardown
        let started = Instant::now();
        timings.record("teardown", started.elapsed());
        for (stage, elapsed) in timings.stages() {
            tracing::info!("{stage}: {elapsed:?}");
        }

        match result {
            Ok(mut summary) => {
                summary.timings = timings;
                Ok(summary)
            }
            Err(e) => Err(e),
        }
    }

    async fn run_stages(&self, timings: &mut Timings) -> Result<InstallSummary, InstallerError> {
        // prepare: resolve the prefix and read the project files.
        let started = Instant::now();
        let prefix = self.resolve_prefix();
        let package_json: Option<serde_json::Value> =
            self.read_project_file(&prefix, "package.json")?;
        let shrinkwrap: Option<serde_json::Value> =
            self.read_project_file(&prefix, "npm-shrinkwrap.json")?;
        let package_lock: Option<serde_json::Value> =
            self.read_project_file(&prefix, "package-lock.json")?;
        let existing_map: Option<PackageMap> = self.read_project_file(&prefix, PACKAGE_MAP_FILE)?;

        // A shrinkwrap wins over the lockfile when both exist.
        let mut lock_value = shrinkwrap.or(package_lock);
        timings.record("prepare", started.elapsed());

        // check_lock: make sure a trustworthy lockfile exists and decide
        // whether the persisted map is still valid.
        let started = Instant::now();
        if lock_value.is_none() {
            let generator = self
                .lock_generator
                .as_ref()
                .ok_or(InstallerError::MissingLockfile)?;
            tracing::debug!("no lockfile found, generating one");
            generator.generate(&prefix).await?;
            lock_value = self.read_project_file(&prefix, "package-lock.json")?;
        }
        let mut lock_value = lock_value.ok_or(InstallerError::MissingLockfile)?;
        let mut lockfile = self.parse_lockfile(&prefix, &lock_value)?;

        if let Some(verifier) = &self.verifier {
            let report = verifier.verify(&prefix, &lockfile);
            for warning in &report.warnings {
                tracing::warn!("lockfile: {warning}");
            }
            if !report.status {
                for error in &report.errors {
                    tracing::warn!("lockfile: {error}");
                }
                let generator = self
                    .lock_generator
                    .as_ref()
                    .ok_or(InstallerError::LockfileOutOfSync)?;
                tracing::debug!("lockfile failed verification, regenerating");
                generator.generate(&prefix).await?;
                lock_value = self
                    .read_project_file(&prefix, "package-lock.json")?
                    .ok_or(InstallerError::MissingLockfile)?;
                lockfile = self.parse_lockfile(&prefix, &lock_value)?;
            }
        }

        let lockfile_integrity = Integrity::of(canonical_json(&lock_value));
        let valid_map = existing_map.filter(|map| {
            let valid = map.lockfile_integrity.as_ref() == Some(&lockfile_integrity);
            if !valid {
                tracing::debug!("discarding package map: lockfile integrity mismatch");
            }
            valid
        });

        let tree = self.tree_builder.build_tree(package_json.as_ref(), &lockfile)?;
        timings.record("check_lock", started.elapsed());

        // fetch_tree: walk the logical tree and make every dependency's
        // files present in the store. Skipped entirely when the persisted
        // map is still valid.
        let started = Instant::now();
        let documents: Mutex<HashMap<Address, PackageDocument>> = Mutex::new(HashMap::new());
        let failed: Mutex<HashSet<Address>> = Mutex::new(HashSet::new());
        let pkg_count = AtomicUsize::new(0);

        if valid_map.is_none() {
            let semaphore = Arc::new(Semaphore::new(DEFAULT_VISIT_CONCURRENCY));
            let visitor = |node: &DepNode| {
                // The cheap decisions are made synchronously; the future
                // carries a detached copy of the node so it does not borrow
                // the tree entry it was spawned for.
                if node.is_root {
                    return future::ready(Ok(Visit::Descend)).boxed();
                }
                if !self.options.include_dep(node) {
                    return future::ready(Ok(Visit::Skip)).boxed();
                }
                if node.bundled {
                    // Bundled files arrive inside the parent's tarball.
                    pkg_count.fetch_add(1, Ordering::SeqCst);
                    return future::ready(Ok(Visit::Descend)).boxed();
                }

                let node = node.detached();
                let prefix = &prefix;
                let documents = &documents;
                let failed = &failed;
                let pkg_count = &pkg_count;
                async move {
                    if let Some(local) = &node.local_path {
                        link_local_directory(local, &node.install_path(prefix)).await?;
                        pkg_count.fetch_add(1, Ordering::SeqCst);
                        return Ok(Visit::Descend);
                    }

                    match ensure_package(
                        &self.store,
                        self.fetcher.as_ref(),
                        self.resolver.as_ref(),
                        &node,
                        self.options.restore,
                        None,
                    )
                    .await
                    {
                        Ok(document) => {
                            documents
                                .lock()
                                .unwrap()
                                .insert(node.address.clone(), document);
                            pkg_count.fetch_add(1, Ordering::SeqCst);
                            Ok(Visit::Descend)
                        }
                        Err(e) if node.optional => {
                            tracing::warn!(
                                "optional dependency '{}' failed to install: {e}",
                                node.name
                            );
                            // Accounted like any other processed dep; the
                            // reclaimer's purged set settles the balance.
                            pkg_count.fetch_add(1, Ordering::SeqCst);
                            failed.lock().unwrap().insert(node.address.clone());
                            Ok(Visit::Skip)
                        }
                        Err(e) => Err(e),
                    }
                }
                .boxed()
            };
            walk_concurrent(&tree, semaphore, &visitor).await?;
        }

        let failed = failed.into_inner().unwrap();
        let mut purged = HashSet::new();
        if !failed.is_empty() {
            purged = reclaim(&tree, &failed, &prefix).await?;
            tracing::debug!("reclaimed {} dead subtree entries", purged.len());
        }
        let pkg_count = pkg_count
            .load(Ordering::SeqCst)
            .saturating_sub(purged.len());
        timings.record("fetch_tree", started.elapsed());

        // build_package_map
        let started = Instant::now();
        let package_map = match valid_map {
            Some(map) => map,
            None => build_package_map(
                &tree,
                &documents.into_inner().unwrap(),
                Some(lockfile_integrity),
            ),
        };
        timings.record("build_package_map", started.elapsed());

        // write_package_map
        let started = Instant::now();
        write_package_map(&prefix, &package_map)?;
        timings.record("write_package_map", started.elapsed());

        // build_tree: lifecycle scripts and bin links are external hooks.
        let started = Instant::now();
        if let Some(runner) = &self.script_runner {
            if !self.options.ignore_scripts {
                for phase in [
                    ScriptPhase::Preinstall,
                    ScriptPhase::Install,
                    ScriptPhase::Postinstall,
                ] {
                    runner.run_phase(phase, &prefix).await?;
                }
            }
        }
        if let Some(linker) = &self.bin_linker {
            let linked = linker.link_bins(&tree, &prefix).await?;
            tracing::debug!("linked {linked} package bins");
        }
        timings.record("build_tree", started.elapsed());

        Ok(InstallSummary {
            pkg_count,
            failed_deps: failed,
            purged,
            package_map,
            timings: Timings::default(),
        })
    }

    fn resolve_prefix(&self) -> PathBuf {
        let prefix = self
            .options
            .prefix
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        if self.options.global {
            prefix.join("lib")
        } else {
            prefix
        }
    }

    fn read_project_file<T: serde::de::DeserializeOwned>(
        &self,
        prefix: &Path,
        name: &str,
    ) -> Result<Option<T>, InstallerError> {
        let path = prefix.join(name);
        read_json_file(&path, true)
            .map_err(|e| InstallerError::FailedToReadProjectFile(path, e))
    }

    fn parse_lockfile(
        &self,
        prefix: &Path,
        value: &serde_json::Value,
    ) -> Result<Lockfile, InstallerError> {
        serde_json::from_value(value.clone()).map_err(|e| {
            InstallerError::FailedToReadProjectFile(prefix.join("package-lock.json"), e.into())
        })
    }
}

/// Writes the package map atomically next to the project files.
fn write_package_map(prefix: &Path, map: &PackageMap) -> Result<(), InstallerError> {
    let path = prefix.join(PACKAGE_MAP_FILE);
    let json = serde_json::to_string_pretty(map).map_err(std::io::Error::from)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".package-map")
        .tempfile_in(prefix)
        .map_err(InstallerError::IoError)?;
    std::io::Write::write_all(&mut temp, json.as_bytes()).map_err(InstallerError::IoError)?;
    temp.persist(&path)
        .map_err(|e| InstallerError::IoError(e.error))?;
    Ok(())
}

/// Creates a junction-style symlink for a local-directory dependency,
/// replacing whatever currently occupies the destination.
async fn link_local_directory(source: &Path, dest: &Path) -> Result<(), InstallerError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match symlink_dir(source, dest).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            if tokio::fs::remove_file(dest).await.is_err() {
                tokio::fs::remove_dir_all(dest).await?;
            }
            symlink_dir(source, dest).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
async fn symlink_dir(source: &Path, dest: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(source, dest).await
}

#[cfg(windows)]
async fn symlink_dir(source: &Path, dest: &Path) -> std::io::Result<()> {
    tokio::fs::symlink_dir(source, dest).await
}
