//! The streaming unpacker: one tar archive in, one package metadata out.

use std::sync::Arc;

use burrow_cas::Store;
use burrow_types::PackageMetadata;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_tar::EntryType;

use crate::{
    sanitize::{sanitize_entry_path, SanitizedPath},
    UnpackError,
};

/// A caller-supplied transform applied to each file body before it is
/// stored. Receives the sanitised entry path and the raw body.
pub type FileTransform = Arc<dyn Fn(&str, Vec<u8>) -> std::io::Result<Vec<u8>> + Send + Sync>;

/// Observer for the progress of a single unpack.
///
/// The terminal signals fire after the archive has ended *and* every
/// outstanding file write has drained, always in the order `metadata`,
/// `prefinish`, `finish`, `end`, `close`, exactly once each. A fatal stream
/// error emits none of them.
pub trait UnpackReporter: Send + Sync {
    /// An entry was skipped or flagged; the unpack continues.
    fn on_entry_warning(&self, path: &str, reason: &str) {
        let _ = (path, reason);
    }

    /// The package metadata is complete.
    fn on_metadata(&self, metadata: &PackageMetadata) {
        let _ = metadata;
    }

    /// All file writes have been committed.
    fn on_prefinish(&self) {}

    /// The unpack has finished.
    fn on_finish(&self) {}

    /// No further data will be produced.
    fn on_end(&self) {}

    /// The unpacker has released its resources.
    fn on_close(&self) {}
}

/// Options controlling a single unpack.
#[derive(Default, Clone)]
pub struct UnpackOptions {
    /// Number of leading path segments to drop from every entry. Registry
    /// tarballs wrap their contents in a `package/` directory, so installers
    /// pass 1.
    pub strip: usize,

    /// Optional transform applied to each file body before storage. A
    /// transform failure skips the entry with a warning.
    pub transform: Option<FileTransform>,

    /// Optional observer for warnings and completion signals.
    pub reporter: Option<Arc<dyn UnpackReporter>>,
}

/// Streams one package tarball into the content-addressed store.
///
/// The unpacker walks the archive sequentially (tar is a sequential format)
/// but commits file bodies to the store concurrently: each body is handed to
/// a blocking write task and a counter of outstanding writes is drained once
/// the archive has ended. The manifest is assembled in entry order, so the
/// result is independent of write completion order.
pub struct Unpacker {
    store: Store,
    options: UnpackOptions,
}

impl Unpacker {
    /// Constructs an unpacker writing into the given store.
    pub fn new(store: Store, options: UnpackOptions) -> Self {
        Self { store, options }
    }

    /// Consumes a raw (already decompressed) tar stream and produces the
    /// package metadata.
    pub async fn unpack<R: AsyncRead + Unpin>(
        self,
        reader: R,
    ) -> Result<PackageMetadata, UnpackError> {
        let mut archive = tokio_tar::Archive::new(reader);
        let mut entries = archive.entries().map_err(UnpackError::IoError)?;

        let mut metadata = PackageMetadata::default();

        // Writes still in flight, in entry order. The length of the unjoined
        // tail is the outstanding-file counter: completion is committed only
        // once the archive has ended and this has drained to zero.
        type PendingWrite = tokio::task::JoinHandle<std::io::Result<burrow_digest::Integrity>>;
        let mut outstanding: Vec<(String, PendingWrite)> = Vec::new();

        while let Some(entry) = entries.next().await {
            let mut entry = entry.map_err(UnpackError::IoError)?;
            let raw_path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();

            let path = match sanitize_entry_path(&raw_path, self.options.strip) {
                SanitizedPath::Clean { path, warnings } => {
                    for warning in warnings {
                        self.warn(&raw_path, &warning);
                    }
                    path
                }
                SanitizedPath::Skip { reason } => {
                    self.warn(&raw_path, &reason);
                    continue;
                }
                SanitizedPath::SkipSilently => continue,
            };

            match entry.header().entry_type() {
                EntryType::Regular | EntryType::Continuous => {}
                // Manifests record regular files only.
                EntryType::Directory | EntryType::Link | EntryType::Symlink => continue,
                EntryType::Char | EntryType::Block | EntryType::Fifo => {
                    self.warn(&path, "unsupported entry type");
                    continue;
                }
                // Extended headers and other bookkeeping entries.
                _ => continue,
            }

            // Package files are small; collect the body in memory. An error
            // here comes from the archive stream itself and is fatal.
            let mut body = Vec::new();
            entry
                .read_to_end(&mut body)
                .await
                .map_err(UnpackError::IoError)?;

            let body = match &self.options.transform {
                Some(transform) => match transform(&path, body) {
                    Ok(body) => body,
                    Err(e) => {
                        self.warn(&path, &format!("transform failed: {e}"));
                        continue;
                    }
                },
                None => body,
            };

            if path == "package.json" {
                if let Err(e) = metadata.apply_package_json(&body) {
                    self.warn(&path, &format!("invalid package.json: {e}"));
                }
            }
            if path.ends_with(".gyp") {
                metadata.record_gyp_file();
            }

            let store = self.store.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let integrity = store.write_bytes(&body)?;
                store.memoize_by_digest(integrity.clone(), Bytes::from(body));
                Ok(integrity)
            });
            outstanding.push((path, handle));
        }

        // Archive ended; drain the outstanding writes in entry order. A
        // failed write demotes its entry to a warning, it does not abort the
        // unpack.
        for (path, handle) in outstanding {
            match handle.await {
                Ok(Ok(integrity)) => metadata.files.insert(&path, integrity),
                Ok(Err(e)) => self.warn(&path, &format!("failed to store file: {e}")),
                Err(e) => {
                    if let Ok(panic) = e.try_into_panic() {
                        std::panic::resume_unwind(panic);
                    }
                    return Err(UnpackError::Cancelled);
                }
            }
        }

        if let Some(reporter) = &self.options.reporter {
            reporter.on_metadata(&metadata);
            reporter.on_prefinish();
            reporter.on_finish();
            reporter.on_end();
            reporter.on_close();
        }

        Ok(metadata)
    }

    /// Consumes a gzip-compressed tarball (the registry `.tgz` format).
    pub async fn unpack_tgz<R: AsyncRead + Unpin>(
        self,
        reader: R,
    ) -> Result<PackageMetadata, UnpackError> {
        let decoder = async_compression::tokio::bufread::GzipDecoder::new(
            tokio::io::BufReader::new(reader),
        );
        self.unpack(decoder).await
    }

    fn warn(&self, path: &str, reason: &str) {
        tracing::warn!("skipping or flagging archive entry '{path}': {reason}");
        if let Some(reporter) = &self.options.reporter {
            reporter.on_entry_warning(path, reason);
        }
    }
}
