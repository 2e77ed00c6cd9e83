//! Package-scope metadata extracted during unpacking and the enriched
//! document the installer persists per dependency.

use burrow_digest::Integrity;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::FileManifest;

/// The `scripts` keys that mark a package as having install scripts.
const INSTALL_SCRIPT_KEYS: [&str; 3] = ["install", "preinstall", "postinstall"];

/// What the unpacker learns about a package while streaming its tarball.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    /// The package entry point. Defaults to `index.js` and is overwritten by
    /// a `main` field in the package's root `package.json`.
    pub main: String,

    /// True if `package.json` declares an `install`, `preinstall` or
    /// `postinstall` script, or if the package ships any `.gyp` file.
    pub has_install_scripts: bool,

    /// True only if the package ships a `.gyp` file.
    pub has_native_build: bool,

    /// The tree of path → digest for every regular file in the package.
    pub files: FileManifest,
}

impl Default for PackageMetadata {
    fn default() -> Self {
        Self {
            main: "index.js".to_string(),
            has_install_scripts: false,
            has_native_build: false,
            files: FileManifest::new(),
        }
    }
}

impl PackageMetadata {
    /// Updates the metadata from the package's root `package.json` body.
    ///
    /// A leading UTF-8 BOM is stripped before parsing. A `main` field
    /// replaces the default entry point; any install-phase script sets
    /// `has_install_scripts`.
    pub fn apply_package_json(&mut self, body: &[u8]) -> Result<(), serde_json::Error> {
        let body = strip_bom(body);
        let parsed: serde_json::Value = serde_json::from_slice(body)?;

        if let Some(main) = parsed.get("main").and_then(serde_json::Value::as_str) {
            self.main = main.to_string();
        }

        if let Some(scripts) = parsed.get("scripts").and_then(serde_json::Value::as_object) {
            if INSTALL_SCRIPT_KEYS
                .iter()
                .any(|key| scripts.contains_key(*key))
            {
                self.has_install_scripts = true;
            }
        }

        Ok(())
    }

    /// Records that the package ships a `.gyp` file, which implies a native
    /// build step and therefore install scripts.
    pub fn record_gyp_file(&mut self) {
        self.has_install_scripts = true;
        self.has_native_build = true;
    }
}

/// Strips a leading UTF-8 byte order mark, if present.
pub(crate) fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes)
}

/// The full per-dependency document the installer persists in the store and
/// folds into the package map: the unpacked metadata enriched with the
/// dependency's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDocument {
    /// The package name.
    pub name: String,

    /// The resolved version.
    pub version: String,

    /// The archive digest, either ambient from the lockfile or computed by
    /// the integrity gate during unpack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<Integrity>,

    /// The URL the tarball was resolved from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<Url>,

    /// The unpacked metadata.
    #[serde(flatten)]
    pub metadata: PackageMetadata,
}
