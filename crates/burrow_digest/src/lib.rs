#![deny(missing_docs)]

//! Hashing primitives for the burrow package store, built on the
//! [RustCrypto/hashes](https://github.com/RustCrypto/hashes) crates.
//!
//! Everything the store addresses is named by the SHA-256 digest of its
//! bytes, rendered canonically as an [`Integrity`] string
//! (`sha256-<base64>`). Digests are computed wherever the bytes already
//! are: one-shot over a buffer or a file, or incrementally through the
//! [`HashingReader`] / [`HashingWriter`] adapters that sit inline in the
//! streaming pipelines between fetcher, unpacker and store. With the
//! default `tokio` feature the adapters also implement the async I/O
//! traits, so the same types serve both worlds.
//!
//! ```
//! use burrow_digest::{compute_bytes_digest, Integrity, Sha256};
//!
//! let hash = compute_bytes_digest::<Sha256>(b"module.exports = 1;");
//! let integrity = Integrity::from_sha256(hash);
//! assert!(integrity.to_string().starts_with("sha256-"));
//! ```

mod integrity;
#[cfg(feature = "tokio")]
mod tokio;

use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
};

use digest::{Digest, Output};

pub use digest;
pub use integrity::{Algorithm, Integrity, ParseIntegrityError};
pub use sha2::Sha256;

/// A type alias for the output of a SHA256 hash.
pub type Sha256Hash = sha2::digest::Output<Sha256>;

/// Hashes the file at the given path without loading it into memory.
pub fn compute_file_digest<D: Digest + Write>(
    path: impl AsRef<Path>,
) -> Result<Output<D>, std::io::Error> {
    let mut hasher = D::new();
    std::io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Hashes an in-memory buffer.
pub fn compute_bytes_digest<D: Digest>(bytes: impl AsRef<[u8]>) -> Output<D> {
    D::digest(bytes)
}

/// A writer adapter that feeds every byte it passes on into a digest as
/// well. [`HashingWriter::finalize`] hands back the inner writer together
/// with the digest of everything written.
///
/// With the `tokio` feature this also implements
/// [`::tokio::io::AsyncWrite`], which is how the store's streaming sink
/// hashes blobs while they land in their staging file.
pub struct HashingWriter<W, D: Digest> {
    writer: W,
    hasher: D,
}

impl<W, D: Digest> HashingWriter<W, D> {
    /// Wraps a writer with a fresh hasher.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: D::new(),
        }
    }

    /// Unwraps the adapter, returning the inner writer and the digest of all
    /// bytes written through it.
    pub fn finalize(self) -> (W, Output<D>) {
        (self.writer, self.hasher.finalize())
    }
}

impl<W: Write, D: Digest> Write for HashingWriter<W, D> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let accepted = self.writer.write(buf)?;
        self.hasher.update(&buf[..accepted]);
        Ok(accepted)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// The reading twin of [`HashingWriter`]: every byte handed out is also fed
/// into the digest. [`HashingReader::finalize`] hands back the inner reader
/// together with the digest of everything read so far.
///
/// With the `tokio` feature this also implements
/// [`::tokio::io::AsyncRead`]; the integrity gate in front of the unpacker
/// is built on the same principle.
pub struct HashingReader<R, D: Digest> {
    reader: R,
    hasher: D,
}

impl<R, D: Digest> HashingReader<R, D> {
    /// Wraps a reader with a fresh hasher.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            hasher: D::new(),
        }
    }

    /// Unwraps the adapter, returning the inner reader and the digest of all
    /// bytes read through it.
    pub fn finalize(self) -> (R, Output<D>) {
        (self.reader, self.hasher.finalize())
    }
}

impl<R: Read, D: Digest> Read for HashingReader<R, D> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let filled = self.reader.read(buf)?;
        self.hasher.update(&buf[..filled]);
        Ok(filled)
    }
}
