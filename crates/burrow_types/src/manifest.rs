//! The per-package file manifest: a nested tree of path → digest.

use burrow_digest::Integrity;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One entry in a [`FileManifest`]: either a regular file with its content
/// digest, or a nested directory.
///
/// Empty directories, links and symlinks are never recorded; the manifest
/// only describes regular files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestEntry {
    /// A regular file, stored in the CAS under this digest.
    File(Integrity),
    /// A directory containing further entries.
    Dir(FileManifest),
}

/// A nested mapping from path segments to file digests, describing the
/// contents of a single package after prefix stripping.
///
/// Serializes to the plain JSON object form used in the package map:
///
/// ```json
/// { "package.json": "sha256-…", "lib": { "index.js": "sha256-…" } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileManifest(pub IndexMap<String, ManifestEntry>);

impl FileManifest {
    /// Creates an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the manifest records no files.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Records a file at `path` with the given digest.
    ///
    /// The path is split on both `/` and `\`; `.` segments are ignored and
    /// intermediate directories are created on demand. The terminal segment
    /// stores the digest, replacing any previous entry at that path.
    pub fn insert(&mut self, path: &str, integrity: Integrity) {
        let segments: Vec<&str> = path
            .split(['/', '\\'])
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect();

        let Some((terminal, directories)) = segments.split_last() else {
            return;
        };

        let mut acc = self;
        for segment in directories {
            let entry = acc
                .0
                .entry((*segment).to_string())
                .or_insert_with(|| ManifestEntry::Dir(FileManifest::new()));

            // A file and a directory with the same name cannot coexist; the
            // later directory wins.
            if let ManifestEntry::File(_) = entry {
                *entry = ManifestEntry::Dir(FileManifest::new());
            }
            let ManifestEntry::Dir(dir) = entry else {
                unreachable!("entry was just forced to be a directory")
            };
            acc = dir;
        }

        acc.0
            .insert((*terminal).to_string(), ManifestEntry::File(integrity));
    }

    /// Looks up the digest recorded for a `/`-separated path, if any.
    pub fn get(&self, path: &str) -> Option<&Integrity> {
        let mut segments = path.split('/').filter(|s| !s.is_empty() && *s != ".");
        let mut acc = self;
        let mut current = segments.next()?;
        for next in segments {
            match acc.0.get(current)? {
                ManifestEntry::Dir(dir) => acc = dir,
                ManifestEntry::File(_) => return None,
            }
            current = next;
        }
        match acc.0.get(current)? {
            ManifestEntry::File(integrity) => Some(integrity),
            ManifestEntry::Dir(_) => None,
        }
    }

}
