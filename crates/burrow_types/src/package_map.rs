//! The project-wide package map: the merger of every per-package manifest,
//! persisted as `.package-map.json` at the install prefix.

use burrow_digest::Integrity;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{FileManifest, PackageDocument};

/// The path prefix recorded for every scope level.
pub const PATH_PREFIX: &str = "/node_modules";

/// The top-level `.package-map.json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageMap {
    /// Digest of the canonicalised lockfile this map was built from. The map
    /// is discarded and rebuilt whenever this digest no longer matches the
    /// lockfile on disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockfile_integrity: Option<Integrity>,

    /// Always `/node_modules`.
    pub path_prefix: String,

    /// Top-level packages by name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub packages: IndexMap<String, PackageMapEntry>,

    /// Nested scopes for packages that carry their own `node_modules`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<IndexMap<String, PackageScope>>,
}

impl PackageMap {
    /// Creates an empty map for the given lockfile digest.
    pub fn new(lockfile_integrity: Option<Integrity>) -> Self {
        Self {
            lockfile_integrity,
            path_prefix: PATH_PREFIX.to_string(),
            packages: IndexMap::new(),
            scopes: None,
        }
    }
}

/// A nested scope: the `node_modules` directory owned by one package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageScope {
    /// Always `/node_modules`.
    pub path_prefix: String,

    /// Packages installed in this scope, by name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub packages: IndexMap<String, PackageMapEntry>,

    /// Scopes nested below this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<IndexMap<String, PackageScope>>,
}

impl Default for PackageScope {
    fn default() -> Self {
        Self {
            path_prefix: PATH_PREFIX.to_string(),
            packages: IndexMap::new(),
            scopes: None,
        }
    }
}

/// One package node in the map. Entries start empty and are filled by a
/// shallow-replace merge of the package's [`PackageDocument`], which keeps
/// the schema fixed and checkable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMapEntry {
    /// The package name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The locked version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// The archive digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<Integrity>,

    /// The URL the tarball was resolved from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<Url>,

    /// The package entry point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,

    /// Whether the package declares install scripts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_install_scripts: Option<bool>,

    /// Whether the package ships a native build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_native_build: Option<bool>,

    /// The package's file manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<FileManifest>,
}

impl PackageMapEntry {
    /// Shallow-replace merge: every known metadata key of `document`
    /// overwrites the corresponding field of this entry.
    pub fn merge_document(&mut self, document: &PackageDocument) {
        self.name = Some(document.name.clone());
        self.version = Some(document.version.clone());
        self.integrity = document.integrity.clone();
        self.resolved = document.resolved.clone();
        self.main = Some(document.metadata.main.clone());
        self.has_install_scripts = Some(document.metadata.has_install_scripts);
        self.has_native_build = Some(document.metadata.has_native_build);
        self.files = Some(document.metadata.files.clone());
    }
}

#[cfg(test)]
mod tests {
    use burrow_digest::Integrity;

    use super::*;
    use crate::PackageMetadata;

    fn document(name: &str) -> PackageDocument {
        let mut metadata = PackageMetadata::default();
        metadata.files.insert("index.js", Integrity::of(name.as_bytes()));
        PackageDocument {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            integrity: Some(Integrity::of(b"tarball")),
            resolved: None,
            metadata,
        }
    }

    #[test]
    fn test_merge_document_fills_entry() {
        let mut entry = PackageMapEntry::default();
        entry.merge_document(&document("a"));

        assert_eq!(entry.name.as_deref(), Some("a"));
        assert_eq!(entry.version.as_deref(), Some("1.0.0"));
        assert_eq!(entry.main.as_deref(), Some("index.js"));
        assert_eq!(entry.has_install_scripts, Some(false));
        assert!(entry.files.is_some());
    }

    #[test]
    fn test_merge_document_replaces_known_keys() {
        let mut entry = PackageMapEntry::default();
        entry.merge_document(&document("a"));
        entry.merge_document(&document("b"));

        assert_eq!(entry.name.as_deref(), Some("b"));
    }

    #[test]
    fn test_map_serialization_shape() {
        let mut map = PackageMap::new(Some(Integrity::of(b"lockfile")));
        let mut entry = PackageMapEntry::default();
        entry.merge_document(&document("a"));
        map.packages.insert("a".to_string(), entry);

        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["path_prefix"], "/node_modules");
        assert!(json["lockfile_integrity"].is_string());
        assert_eq!(json["packages"]["a"]["name"], "a");
        assert_eq!(json["packages"]["a"]["hasInstallScripts"], false);
        assert!(json.get("scopes").is_none());
    }

    #[test]
    fn test_map_round_trip() {
        let mut map = PackageMap::new(Some(Integrity::of(b"lockfile")));
        let mut entry = PackageMapEntry::default();
        entry.merge_document(&document("a"));
        map.packages.insert("a".to_string(), entry);

        let mut scope = PackageScope::default();
        let mut nested = PackageMapEntry::default();
        nested.merge_document(&document("b"));
        scope.packages.insert("b".to_string(), nested);
        map.scopes = Some(IndexMap::from([("a".to_string(), scope)]));

        let json = serde_json::to_string(&map).unwrap();
        let parsed: PackageMap = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, map);
    }
}
