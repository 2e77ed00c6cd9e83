//! The store handle: blob storage, the keyed index and the memo tables.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use burrow_digest::{compute_bytes_digest, Integrity, Sha256};
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::Writer;

/// Directory below the root where in-flight writes are staged.
const STAGING_DIR: &str = ".tmp";

/// Directory below the root holding the keyed index entries.
const INDEX_DIR: &str = "index";

/// A handle to a content-addressed store rooted at a directory.
///
/// Cloning is cheap; all clones share the same in-process memo tables, so an
/// installer can hand one handle to every concurrent unpack.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    root: PathBuf,
    memo_by_digest: DashMap<Integrity, Bytes>,
    memo_by_key: DashMap<String, KeyedInfo>,
}

/// The information stored in the keyed index for a single key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyedInfo {
    /// The key this entry was stored under.
    pub key: String,

    /// The digest of the stored artifact.
    pub integrity: Integrity,

    /// The JSON metadata blob attached to the artifact.
    pub metadata: String,
}

/// Options for [`Store::put_keyed`].
#[derive(Debug, Default, Clone)]
pub struct PutOptions {
    /// The JSON metadata blob to attach to the artifact.
    pub metadata: String,

    /// Whether to also record the entry in the in-process memo table.
    pub memoize: bool,
}

impl Store {
    /// Constructs a new store handle rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                root: root.into(),
                memo_by_digest: DashMap::default(),
                memo_by_key: DashMap::default(),
            }),
        }
    }

    /// The root directory of the store.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// The address of the blob with the given digest. The blob may or may
    /// not have been written yet; see [`Store::contains`].
    pub fn blob_path(&self, integrity: &Integrity) -> PathBuf {
        let hex = format!("{:x}", integrity.sha256());
        let (bucket, rest) = hex.split_at(2);
        let (fan, leaf) = rest.split_at(2);
        self.inner.root.join(bucket).join(fan).join(leaf)
    }

    /// Whether the blob with the given digest has been written.
    pub fn contains(&self, integrity: &Integrity) -> bool {
        self.blob_path(integrity).exists()
    }

    /// Stores a file body, returning its digest.
    ///
    /// The digest is computed up front, so a body whose content is already
    /// present (the common case across packages that ship identical files)
    /// costs a single `stat` and no writes at all.
    pub fn write_bytes(&self, content: &[u8]) -> std::io::Result<Integrity> {
        let integrity = Integrity::of(content);
        if self.contains(&integrity) {
            return Ok(integrity);
        }

        let mut staged = self.stage()?;
        staged.write_all(content)?;
        staged.flush()?;
        self.commit(staged.into_temp_path(), &integrity)?;
        Ok(integrity)
    }

    /// Opens a streaming sink into the store. The digest is computed while
    /// bytes are written and returned by [`Writer::finish`].
    pub async fn writer(&self) -> std::io::Result<Writer> {
        Writer::create(self.clone()).await
    }

    /// Installs an in-process cache hint: subsequent same-process reads of
    /// the blob at `integrity` can be served from memory.
    pub fn memoize_by_digest(&self, integrity: Integrity, bytes: Bytes) {
        self.inner.memo_by_digest.insert(integrity, bytes);
    }

    /// Returns the memoized bytes for a digest, if any.
    pub fn memoized_by_digest(&self, integrity: &Integrity) -> Option<Bytes> {
        self.inner
            .memo_by_digest
            .get(integrity)
            .map(|entry| entry.value().clone())
    }

    /// Commits `payload` to the blob store and associates it, together with
    /// a JSON metadata blob, with `key` in the keyed index.
    ///
    /// Writing the same key twice replaces the index entry; the previously
    /// referenced blob stays in the store untouched.
    pub fn put_keyed(
        &self,
        key: &str,
        payload: &[u8],
        options: PutOptions,
    ) -> std::io::Result<Integrity> {
        let integrity = self.write_bytes(payload)?;

        let info = KeyedInfo {
            key: key.to_string(),
            integrity: integrity.clone(),
            metadata: options.metadata,
        };

        let path = self.index_path(key);
        fs_err::create_dir_all(path.parent().expect("index path must have a parent"))?;

        // Index entries are replaceable, so this persist clobbers.
        let mut staged = self.stage()?;
        staged.write_all(serde_json::to_string(&info)?.as_bytes())?;
        staged.flush()?;
        staged.persist(&path).map_err(|e| e.error)?;

        if options.memoize {
            self.inner.memo_by_key.insert(key.to_string(), info);
        }

        Ok(integrity)
    }

    /// Looks up the keyed index. Returns `None` if the key was never stored.
    pub fn get_info(&self, key: &str) -> std::io::Result<Option<KeyedInfo>> {
        if let Some(info) = self.inner.memo_by_key.get(key) {
            return Ok(Some(info.value().clone()));
        }

        let path = self.index_path(key);
        let content = match fs_err::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let info: KeyedInfo = serde_json::from_slice(&content)?;
        Ok(Some(info))
    }

    /// Opens a fresh staging file below `<root>/.tmp`.
    pub(crate) fn stage(&self) -> std::io::Result<tempfile::NamedTempFile> {
        let staging = self.inner.root.join(STAGING_DIR);
        fs_err::create_dir_all(&staging)?;
        tempfile::NamedTempFile::new_in(staging)
    }

    /// Moves a fully written staging file to its content address.
    ///
    /// The rename refuses to clobber: losing the race to a concurrent writer
    /// of the same content is success, since the winning blob is
    /// byte-identical by construction.
    pub(crate) fn commit(
        &self,
        staged: tempfile::TempPath,
        integrity: &Integrity,
    ) -> std::io::Result<()> {
        let target = self.blob_path(integrity);
        let parent = target
            .parent()
            .expect("blob paths are always nested below the root");
        fs_err::create_dir_all(parent)?;

        match staged.persist_noclobber(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.error),
        }
    }

    /// The on-disk location of the index entry for a key. Keys are hashed so
    /// arbitrary strings map to well-formed paths.
    fn index_path(&self, key: &str) -> PathBuf {
        let hash = compute_bytes_digest::<Sha256>(key.as_bytes());
        let hash_str = format!("{hash:x}");
        self.inner
            .root
            .join(INDEX_DIR)
            .join(&hash_str[0..2])
            .join(&hash_str[2..4])
            .join(&hash_str[4..])
    }
}
