//! End-to-end install runs against in-memory collaborators.

use std::{
    collections::HashMap,
    io::Cursor,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use assert_matches::assert_matches;
use burrow_digest::Integrity;
use burrow_install::{
    collaborators::{
        BinLinker, Fetcher, LockfileGenerator, LockfileVerifier, ManifestResolver, ResolvedManifest,
        ScriptPhase, ScriptRunner, TarballStream, TreeBuilder, VerifyReport,
    },
    InstallOptions, Installer, InstallerError,
};
use burrow_types::{canonical_json, DepNode, LockDependency, Lockfile, PackageMap};
use futures::{future::BoxFuture, FutureExt};
use tokio::io::AsyncReadExt;

/// Builds a gzip-compressed registry-style tarball with the given files
/// under the conventional `package/` prefix.
async fn tgz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_path(format!("package/{path}")).unwrap();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, *content).unwrap();
    }
    let tar_bytes = builder.into_inner().unwrap();

    let mut encoder = async_compression::tokio::bufread::GzipEncoder::new(
        tokio::io::BufReader::new(Cursor::new(tar_bytes)),
    );
    let mut compressed = Vec::new();
    encoder.read_to_end(&mut compressed).await.unwrap();
    compressed
}

/// Serves tarballs from memory and counts fetch attempts.
#[derive(Default)]
struct MockFetcher {
    tarballs: HashMap<String, Vec<u8>>,
    fetches: AtomicUsize,
}

impl MockFetcher {
    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Fetcher for MockFetcher {
    fn tarball_stream<'a>(
        &'a self,
        node: &'a DepNode,
    ) -> BoxFuture<'a, std::io::Result<TarballStream>> {
        async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            match self.tarballs.get(&node.name) {
                Some(bytes) => {
                    Ok(Box::new(Cursor::new(bytes.clone())) as TarballStream)
                }
                None => Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no tarball for '{}'", node.name),
                )),
            }
        }
        .boxed()
    }
}

/// A resolver that never knows anything; the lockfile is the only source of
/// resolution data.
struct NullResolver;

impl ManifestResolver for NullResolver {
    fn manifest<'a>(
        &'a self,
        _name: &'a str,
        _version: &'a str,
    ) -> BoxFuture<'a, std::io::Result<ResolvedManifest>> {
        async { Ok(ResolvedManifest::default()) }.boxed()
    }
}

/// Derives the logical tree straight from the lockfile's nested
/// `dependencies` tables. A `file:` version marks a local-directory dep.
struct LockTreeBuilder;

impl LockTreeBuilder {
    fn add_children(parent: &mut DepNode, deps: &indexmap::IndexMap<String, LockDependency>) {
        for (name, dep) in deps {
            let mut node = DepNode {
                name: name.clone(),
                version: dep.version.clone(),
                resolved: dep.resolved.clone(),
                integrity: dep.integrity.clone(),
                dev: dep.dev,
                optional: dep.optional,
                bundled: dep.bundled,
                is_root: false,
                local_path: dep
                    .version
                    .strip_prefix("file:")
                    .map(PathBuf::from),
                address: parent.address.child(name),
                children: Vec::new(),
            };
            Self::add_children(&mut node, &dep.dependencies);
            parent.children.push(node);
        }
    }
}

impl TreeBuilder for LockTreeBuilder {
    fn build_tree(
        &self,
        package_json: Option<&serde_json::Value>,
        lockfile: &Lockfile,
    ) -> std::io::Result<DepNode> {
        let name = package_json
            .and_then(|v| v.get("name"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("root");
        let mut root = DepNode::root(name, lockfile.version.clone().unwrap_or_default());
        Self::add_children(&mut root, &lockfile.dependencies);
        Ok(root)
    }
}

struct OkVerifier;

impl LockfileVerifier for OkVerifier {
    fn verify(&self, _prefix: &std::path::Path, _lockfile: &Lockfile) -> VerifyReport {
        VerifyReport {
            status: true,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// A project directory plus a store directory.
struct TestProject {
    dir: tempfile::TempDir,
    cache: tempfile::TempDir,
}

impl TestProject {
    fn new(lockfile: &serde_json::Value) -> Self {
        let project = Self {
            dir: tempfile::tempdir().unwrap(),
            cache: tempfile::tempdir().unwrap(),
        };
        std::fs::write(
            project.dir.path().join("package.json"),
            br#"{"name":"app","version":"1.0.0"}"#,
        )
        .unwrap();
        project.write_lockfile(lockfile);
        project
    }

    fn write_lockfile(&self, lockfile: &serde_json::Value) {
        std::fs::write(
            self.dir.path().join("package-lock.json"),
            serde_json::to_vec_pretty(lockfile).unwrap(),
        )
        .unwrap();
    }

    fn options(&self) -> InstallOptions {
        InstallOptions::new(self.cache.path()).with_prefix(self.dir.path())
    }

    fn installer(&self, fetcher: Arc<MockFetcher>) -> Installer {
        self.installer_with_options(fetcher, self.options())
    }

    fn installer_with_options(&self, fetcher: Arc<MockFetcher>, options: InstallOptions) -> Installer {
        Installer::new(
            options,
            fetcher,
            Arc::new(NullResolver),
            Arc::new(LockTreeBuilder),
        )
        .with_verifier(Arc::new(OkVerifier))
    }

    fn package_map(&self) -> PackageMap {
        let bytes = std::fs::read(self.dir.path().join(".package-map.json")).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn package_map_bytes(&self) -> Vec<u8> {
        std::fs::read(self.dir.path().join(".package-map.json")).unwrap()
    }
}

fn lockfile_with_deps(deps: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "name": "app",
        "version": "1.0.0",
        "lockfileVersion": 1,
        "dependencies": deps,
    })
}

#[tokio::test]
async fn test_simple_install_writes_package_map() {
    let a_tgz = tgz(&[
        ("package.json", br#"{"name":"a","version":"1.0.0","main":"index.js"}"#),
        ("index.js", b"module.exports = 'a';"),
    ])
    .await;
    let b_tgz = tgz(&[("index.js", b"module.exports = 'b';")]).await;

    let lockfile = lockfile_with_deps(serde_json::json!({
        "a": {
            "version": "1.0.0",
            "integrity": Integrity::of(&a_tgz).to_string(),
            "dependencies": {
                "b": { "version": "2.0.0", "integrity": Integrity::of(&b_tgz).to_string() }
            }
        }
    }));
    let project = TestProject::new(&lockfile);

    let fetcher = Arc::new(MockFetcher {
        tarballs: HashMap::from([("a".to_string(), a_tgz), ("b".to_string(), b_tgz)]),
        ..Default::default()
    });

    let summary = project.installer(fetcher.clone()).run().await.unwrap();

    assert_eq!(summary.pkg_count, 2);
    assert!(summary.failed_deps.is_empty());
    assert_eq!(fetcher.fetch_count(), 2);

    let map = project.package_map();
    assert_eq!(map.path_prefix, "/node_modules");
    assert_eq!(
        map.lockfile_integrity,
        Some(Integrity::of(canonical_json(&lockfile)))
    );

    let a = &map.packages["a"];
    assert_eq!(a.version.as_deref(), Some("1.0.0"));
    assert_eq!(a.main.as_deref(), Some("index.js"));
    assert_eq!(
        a.files.as_ref().unwrap().get("index.js"),
        Some(&Integrity::of(b"module.exports = 'a';"))
    );

    // The nested dep lands in the parent's scope, not the root table.
    let scope = &map.scopes.as_ref().unwrap()["a"];
    assert_eq!(scope.packages["b"].version.as_deref(), Some("2.0.0"));
    assert!(!map.packages.contains_key("b"));
}

#[tokio::test]
async fn test_rerun_with_unchanged_lockfile_is_idempotent() {
    let a_tgz = tgz(&[("index.js", b"a")]).await;
    let lockfile = lockfile_with_deps(serde_json::json!({
        "a": { "version": "1.0.0", "integrity": Integrity::of(&a_tgz).to_string() }
    }));
    let project = TestProject::new(&lockfile);

    let fetcher = Arc::new(MockFetcher {
        tarballs: HashMap::from([("a".to_string(), a_tgz)]),
        ..Default::default()
    });

    project.installer(fetcher.clone()).run().await.unwrap();
    let first = project.package_map_bytes();
    assert_eq!(fetcher.fetch_count(), 1);

    // Second run: the persisted map is valid, so the fetch stage is skipped
    // and the map is byte-identical.
    project.installer(fetcher.clone()).run().await.unwrap();
    assert_eq!(fetcher.fetch_count(), 1);
    assert_eq!(project.package_map_bytes(), first);
}

#[tokio::test]
async fn test_optional_failure_is_reclaimed() {
    let good_tgz = tgz(&[("index.js", b"good")]).await;
    let lockfile = lockfile_with_deps(serde_json::json!({
        "good": { "version": "1.0.0", "integrity": Integrity::of(&good_tgz).to_string() },
        "flaky": {
            "version": "1.0.0",
            "optional": true,
            "dependencies": {
                "flaky-child": { "version": "1.0.0" }
            }
        }
    }));
    let project = TestProject::new(&lockfile);

    // No tarball for "flaky": its fetch fails.
    let fetcher = Arc::new(MockFetcher {
        tarballs: HashMap::from([("good".to_string(), good_tgz)]),
        ..Default::default()
    });

    let summary = project.installer(fetcher.clone()).run().await.unwrap();

    let flaky = burrow_types::Address::root().child("flaky");
    assert!(summary.failed_deps.contains(&flaky));
    assert!(summary.purged.contains(&flaky));
    assert!(summary.purged.contains(&flaky.child("flaky-child")));
    assert!(!summary.purged.contains(&burrow_types::Address::root()));

    // Two deps were accounted (good, flaky) and the purged set (flaky and
    // its never-visited child) was subtracted.
    assert_eq!(summary.pkg_count, 0);

    // The map still exists and only records the healthy dep.
    let map = project.package_map();
    assert!(map.packages.contains_key("good"));
    assert!(!map.packages.contains_key("flaky"));
}

#[tokio::test]
async fn test_required_failure_aborts_the_run() {
    let lockfile = lockfile_with_deps(serde_json::json!({
        "broken": { "version": "1.0.0" }
    }));
    let project = TestProject::new(&lockfile);

    let fetcher = Arc::new(MockFetcher::default());
    let result = project.installer(fetcher).run().await;

    assert_matches!(result, Err(InstallerError::FailedToFetch(name, _)) if name == "broken");
    assert!(!project.dir.path().join(".package-map.json").exists());
}

#[tokio::test]
async fn test_bundled_deps_are_not_fetched() {
    let a_tgz = tgz(&[("index.js", b"a")]).await;
    let lockfile = lockfile_with_deps(serde_json::json!({
        "a": { "version": "1.0.0", "integrity": Integrity::of(&a_tgz).to_string() },
        // No tarball exists for the bundled dep; fetching it would fail.
        "shipped-inside": { "version": "3.0.0", "bundled": true }
    }));
    let project = TestProject::new(&lockfile);

    let fetcher = Arc::new(MockFetcher {
        tarballs: HashMap::from([("a".to_string(), a_tgz)]),
        ..Default::default()
    });

    let summary = project.installer(fetcher.clone()).run().await.unwrap();

    // Only "a" hit the fetcher; the bundled dep was accounted without one.
    assert_eq!(fetcher.fetch_count(), 1);
    assert_eq!(summary.pkg_count, 2);
}

#[tokio::test]
async fn test_cache_hit_performs_no_fetch() {
    let a_tgz = tgz(&[("index.js", b"cached")]).await;
    let lockfile = lockfile_with_deps(serde_json::json!({
        "a": { "version": "1.0.0", "integrity": Integrity::of(&a_tgz).to_string() }
    }));
    let project = TestProject::new(&lockfile);

    let fetcher = Arc::new(MockFetcher {
        tarballs: HashMap::from([("a".to_string(), a_tgz)]),
        ..Default::default()
    });

    // restore=false allows reuse of cached package metadata.
    let options = project.options().with_restore(false);
    project
        .installer_with_options(fetcher.clone(), options.clone())
        .run()
        .await
        .unwrap();
    assert_eq!(fetcher.fetch_count(), 1);

    // Drop the map so the fetch stage runs again, then re-install: the keyed
    // store answers and the network stays silent.
    std::fs::remove_file(project.dir.path().join(".package-map.json")).unwrap();
    let summary = project
        .installer_with_options(fetcher.clone(), options)
        .run()
        .await
        .unwrap();

    assert_eq!(fetcher.fetch_count(), 1);
    assert_eq!(summary.pkg_count, 1);
    assert_eq!(
        summary.package_map.packages["a"]
            .files
            .as_ref()
            .unwrap()
            .get("index.js"),
        Some(&Integrity::of(b"cached"))
    );
}

#[tokio::test]
async fn test_missing_integrity_is_filled_by_the_gate() {
    let a_tgz = tgz(&[("index.js", b"gated")]).await;
    let expected = Integrity::of(&a_tgz);

    // The lockfile knows nothing about the archive digest.
    let lockfile = lockfile_with_deps(serde_json::json!({
        "a": { "version": "1.0.0" }
    }));
    let project = TestProject::new(&lockfile);

    let fetcher = Arc::new(MockFetcher {
        tarballs: HashMap::from([("a".to_string(), a_tgz)]),
        ..Default::default()
    });

    let summary = project.installer(fetcher).run().await.unwrap();
    assert_eq!(summary.package_map.packages["a"].integrity, Some(expected));
}

#[tokio::test]
async fn test_stale_lockfile_discards_the_map() {
    let a_tgz = tgz(&[("index.js", b"a")]).await;
    let b_tgz = tgz(&[("index.js", b"b")]).await;

    let lockfile = lockfile_with_deps(serde_json::json!({
        "a": { "version": "1.0.0", "integrity": Integrity::of(&a_tgz).to_string() }
    }));
    let project = TestProject::new(&lockfile);

    let fetcher = Arc::new(MockFetcher {
        tarballs: HashMap::from([
            ("a".to_string(), a_tgz.clone()),
            ("b".to_string(), b_tgz.clone()),
        ]),
        ..Default::default()
    });

    project.installer(fetcher.clone()).run().await.unwrap();
    assert_eq!(fetcher.fetch_count(), 1);

    // The lockfile changes underneath the persisted map.
    project.write_lockfile(&lockfile_with_deps(serde_json::json!({
        "a": { "version": "1.0.0", "integrity": Integrity::of(&a_tgz).to_string() },
        "b": { "version": "2.0.0", "integrity": Integrity::of(&b_tgz).to_string() }
    })));

    let summary = project.installer(fetcher.clone()).run().await.unwrap();

    // The stale map was discarded: both deps were processed again.
    assert_eq!(fetcher.fetch_count(), 3);
    assert!(summary.package_map.packages.contains_key("b"));
}

#[tokio::test]
async fn test_production_excludes_dev_deps() {
    let a_tgz = tgz(&[("index.js", b"a")]).await;
    let lockfile = lockfile_with_deps(serde_json::json!({
        "a": { "version": "1.0.0", "integrity": Integrity::of(&a_tgz).to_string() },
        "devtool": { "version": "1.0.0", "dev": true }
    }));
    let project = TestProject::new(&lockfile);

    let fetcher = Arc::new(MockFetcher {
        tarballs: HashMap::from([("a".to_string(), a_tgz)]),
        ..Default::default()
    });

    let options = project.options().with_production(true);
    let summary = project
        .installer_with_options(fetcher.clone(), options)
        .run()
        .await
        .unwrap();

    // The dev dep was never fetched and is absent from the map.
    assert_eq!(fetcher.fetch_count(), 1);
    assert!(!summary.package_map.packages.contains_key("devtool"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_local_directory_dep_is_symlinked() {
    let local_pkg = tempfile::tempdir().unwrap();
    std::fs::write(local_pkg.path().join("index.js"), b"local").unwrap();

    let lockfile = lockfile_with_deps(serde_json::json!({
        "linked": { "version": format!("file:{}", local_pkg.path().display()) }
    }));
    let project = TestProject::new(&lockfile);

    let fetcher = Arc::new(MockFetcher::default());
    let summary = project.installer(fetcher.clone()).run().await.unwrap();

    assert_eq!(fetcher.fetch_count(), 0);
    assert_eq!(summary.pkg_count, 1);

    let link = project.dir.path().join("node_modules/linked");
    assert!(link.is_symlink());
    assert_eq!(std::fs::read_link(&link).unwrap(), local_pkg.path());
}

#[tokio::test]
async fn test_missing_lockfile_without_generator_errors() {
    let project = TestProject::new(&lockfile_with_deps(serde_json::json!({})));
    std::fs::remove_file(project.dir.path().join("package-lock.json")).unwrap();

    let result = project
        .installer(Arc::new(MockFetcher::default()))
        .run()
        .await;
    assert_matches!(result, Err(InstallerError::MissingLockfile));
}

#[tokio::test]
async fn test_generator_runs_when_lockfile_is_missing() {
    struct WritingGenerator {
        lockfile: serde_json::Value,
        calls: AtomicUsize,
    }

    impl LockfileGenerator for WritingGenerator {
        fn generate<'a>(
            &'a self,
            prefix: &'a std::path::Path,
        ) -> BoxFuture<'a, std::io::Result<()>> {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                std::fs::write(
                    prefix.join("package-lock.json"),
                    serde_json::to_vec(&self.lockfile).unwrap(),
                )
            }
            .boxed()
        }
    }

    let a_tgz = tgz(&[("index.js", b"a")]).await;
    let generated = lockfile_with_deps(serde_json::json!({
        "a": { "version": "1.0.0", "integrity": Integrity::of(&a_tgz).to_string() }
    }));

    let project = TestProject::new(&generated);
    std::fs::remove_file(project.dir.path().join("package-lock.json")).unwrap();

    let fetcher = Arc::new(MockFetcher {
        tarballs: HashMap::from([("a".to_string(), a_tgz)]),
        ..Default::default()
    });
    let generator = Arc::new(WritingGenerator {
        lockfile: generated,
        calls: AtomicUsize::new(0),
    });

    let summary = project
        .installer(fetcher)
        .with_lock_generator(generator.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert!(summary.package_map.packages.contains_key("a"));
}

#[tokio::test]
async fn test_script_phases_run_in_order() {
    #[derive(Default)]
    struct RecordingRunner {
        phases: Mutex<Vec<ScriptPhase>>,
    }

    impl ScriptRunner for RecordingRunner {
        fn run_phase<'a>(
            &'a self,
            phase: ScriptPhase,
            _prefix: &'a std::path::Path,
        ) -> BoxFuture<'a, std::io::Result<()>> {
            async move {
                self.phases.lock().unwrap().push(phase);
                Ok(())
            }
            .boxed()
        }
    }

    #[derive(Default)]
    struct CountingLinker {
        calls: AtomicUsize,
    }

    impl BinLinker for CountingLinker {
        fn link_bins<'a>(
            &'a self,
            _tree: &'a DepNode,
            _prefix: &'a std::path::Path,
        ) -> BoxFuture<'a, std::io::Result<usize>> {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            }
            .boxed()
        }
    }

    let a_tgz = tgz(&[("index.js", b"a")]).await;
    let lockfile = lockfile_with_deps(serde_json::json!({
        "a": { "version": "1.0.0", "integrity": Integrity::of(&a_tgz).to_string() }
    }));
    let project = TestProject::new(&lockfile);

    let fetcher = Arc::new(MockFetcher {
        tarballs: HashMap::from([("a".to_string(), a_tgz)]),
        ..Default::default()
    });
    let runner = Arc::new(RecordingRunner::default());
    let linker = Arc::new(CountingLinker::default());

    project
        .installer(fetcher.clone())
        .with_script_runner(runner.clone())
        .with_bin_linker(linker.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(
        runner.phases.lock().unwrap().clone(),
        [
            ScriptPhase::Preinstall,
            ScriptPhase::Install,
            ScriptPhase::Postinstall
        ]
    );
    assert_eq!(linker.calls.load(Ordering::SeqCst), 1);

    // ignore_scripts silences the runner but not the linker.
    let runner2 = Arc::new(RecordingRunner::default());
    std::fs::remove_file(project.dir.path().join(".package-map.json")).unwrap();
    let options = project.options().with_ignore_scripts(true);
    project
        .installer_with_options(fetcher, options)
        .with_script_runner(runner2.clone())
        .with_bin_linker(linker.clone())
        .run()
        .await
        .unwrap();

    assert!(runner2.phases.lock().unwrap().is_empty());
    assert_eq!(linker.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_verification_regenerates_the_lockfile() {
    struct RejectingVerifier;

    impl LockfileVerifier for RejectingVerifier {
        fn verify(&self, _prefix: &std::path::Path, _lockfile: &Lockfile) -> VerifyReport {
            VerifyReport {
                status: false,
                warnings: Vec::new(),
                errors: vec!["missing dependency 'a'".to_string()],
            }
        }
    }

    struct WritingGenerator {
        lockfile: serde_json::Value,
    }

    impl LockfileGenerator for WritingGenerator {
        fn generate<'a>(
            &'a self,
            prefix: &'a std::path::Path,
        ) -> BoxFuture<'a, std::io::Result<()>> {
            async move {
                std::fs::write(
                    prefix.join("package-lock.json"),
                    serde_json::to_vec(&self.lockfile).unwrap(),
                )
            }
            .boxed()
        }
    }

    let a_tgz = tgz(&[("index.js", b"a")]).await;
    let regenerated = lockfile_with_deps(serde_json::json!({
        "a": { "version": "1.0.0", "integrity": Integrity::of(&a_tgz).to_string() }
    }));

    // The on-disk lockfile is empty; the regenerated one has the dep.
    let project = TestProject::new(&lockfile_with_deps(serde_json::json!({})));

    let fetcher = Arc::new(MockFetcher {
        tarballs: HashMap::from([("a".to_string(), a_tgz)]),
        ..Default::default()
    });

    let summary = Installer::new(
        project.options(),
        fetcher,
        Arc::new(NullResolver),
        Arc::new(LockTreeBuilder),
    )
    .with_verifier(Arc::new(RejectingVerifier))
    .with_lock_generator(Arc::new(WritingGenerator {
        lockfile: regenerated,
    }))
    .run()
    .await
    .unwrap();

    assert!(summary.package_map.packages.contains_key("a"));
}
