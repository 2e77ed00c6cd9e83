//! Fetch-or-restore of a single dependency.

use std::sync::Arc;

use burrow_cas::{PutOptions, Store};
use burrow_types::{DepNode, PackageDocument};
use burrow_unpack::{IntegrityGate, UnpackOptions, UnpackReporter, Unpacker};

use crate::{
    collaborators::{Fetcher, ManifestResolver},
    InstallerError,
};

/// Registry tarballs wrap their contents in a conventional `package/`
/// directory; unpacking drops it.
const TARBALL_STRIP: usize = 1;

/// A stable cache key for a dependency: the package name plus its resolved
/// URL, falling back to the integrity and finally the bare version.
/// Deterministic across runs so repeated installs hit the keyed index.
pub fn dep_key(name: &str, node: &DepNode) -> String {
    let identity = node
        .resolved
        .as_ref()
        .map(ToString::to_string)
        .or_else(|| node.integrity.as_ref().map(ToString::to_string))
        .unwrap_or_else(|| node.version.clone());
    format!("pkg:{name}:{identity}")
}

/// Makes one dependency's files present in the store and returns its
/// document.
///
/// Missing `resolved`/`integrity` are filled from the registry manifest
/// first. When the integrity is known, `restore` is off and the keyed index
/// already holds the dependency, the stored document is returned without
/// touching the network. Otherwise the tarball
/// stream is unpacked into the store; when no ambient integrity exists an
/// [`IntegrityGate`] computes one from the stream, and the resulting
/// document is persisted under [`dep_key`] for the next run.
pub async fn ensure_package(
    store: &Store,
    fetcher: &dyn Fetcher,
    resolver: &dyn ManifestResolver,
    node: &DepNode,
    restore: bool,
    reporter: Option<Arc<dyn UnpackReporter>>,
) -> Result<PackageDocument, InstallerError> {
    let mut node = node.clone();
    if node.resolved.is_none() || node.integrity.is_none() {
        let manifest = resolver
            .manifest(&node.name, &node.version)
            .await
            .map_err(|e| InstallerError::FailedToFetch(node.name.clone(), e))?;
        node.resolved = node.resolved.or(manifest.resolved);
        node.integrity = node.integrity.or(manifest.integrity);
    }

    let key = dep_key(&node.name, &node);
    if node.integrity.is_some() && !restore {
        if let Some(info) = store.get_info(&key)? {
            tracing::debug!("restoring '{}' from keyed cache", node.name);
            let document: PackageDocument = serde_json::from_str(&info.metadata)
                .map_err(|e| InstallerError::CorruptPackageMetadata(node.name.clone(), e))?;
            return Ok(document);
        }
    }

    let stream = fetcher
        .tarball_stream(&node)
        .await
        .map_err(|e| InstallerError::FailedToFetch(node.name.clone(), e))?;

    let unpacker = Unpacker::new(
        store.clone(),
        UnpackOptions {
            strip: TARBALL_STRIP,
            transform: None,
            reporter,
        },
    );

    let mut integrity = node.integrity.clone();
    let metadata = if integrity.is_none() {
        // No ambient digest; gate the stream and capture one.
        let (mut gate, handle) = IntegrityGate::new(stream);
        let metadata = unpacker
            .unpack_tgz(&mut gate)
            .await
            .map_err(|e| InstallerError::FailedToUnpack(node.name.clone(), e))?;

        // The archive parser stops at the tar terminator; drain the gate so
        // it sees end-of-stream and seals the digest.
        tokio::io::copy(&mut gate, &mut tokio::io::sink())
            .await
            .map_err(|e| InstallerError::FailedToFetch(node.name.clone(), e))?;
        integrity = handle.integrity();
        metadata
    } else {
        unpacker
            .unpack_tgz(stream)
            .await
            .map_err(|e| InstallerError::FailedToUnpack(node.name.clone(), e))?
    };

    let document = PackageDocument {
        name: node.name.clone(),
        version: node.version.clone(),
        integrity,
        resolved: node.resolved.clone(),
        metadata,
    };

    let json = serde_json::to_string(&document)
        .map_err(|e| InstallerError::CorruptPackageMetadata(node.name.clone(), e))?;
    store.put_keyed(
        &key,
        json.as_bytes(),
        PutOptions {
            metadata: json.clone(),
            memoize: true,
        },
    )?;

    Ok(document)
}

#[cfg(test)]
mod tests {
    use burrow_digest::Integrity;
    use burrow_types::Address;

    use super::*;

    fn node(name: &str) -> DepNode {
        let mut node = DepNode::root(name, "1.0.0");
        node.is_root = false;
        node.address = Address::root().child(name);
        node
    }

    #[test]
    fn test_dep_key_prefers_resolved() {
        let mut dep = node("a");
        dep.resolved = Some("https://registry.example/a/-/a-1.0.0.tgz".parse().unwrap());
        dep.integrity = Some(Integrity::of(b"tarball"));
        assert_eq!(
            dep_key("a", &dep),
            "pkg:a:https://registry.example/a/-/a-1.0.0.tgz"
        );
    }

    #[test]
    fn test_dep_key_falls_back_to_integrity() {
        let mut dep = node("a");
        dep.integrity = Some(Integrity::of(b"tarball"));
        assert_eq!(dep_key("a", &dep), format!("pkg:a:{}", Integrity::of(b"tarball")));
    }

    #[test]
    fn test_dep_key_is_deterministic() {
        let dep = node("a");
        assert_eq!(dep_key("a", &dep), dep_key("a", &dep));
        assert_eq!(dep_key("a", &dep), "pkg:a:1.0.0");
    }
}
