//! The streaming blob sink.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use burrow_digest::{HashingWriter, Integrity, Sha256};

use crate::Store;

/// An async sink that streams one blob into the store.
///
/// Bytes are hashed as they are written into a staging file; calling
/// [`Writer::finish`] seals the digest and moves the file to its content
/// address. A writer that is dropped without finishing leaves nothing
/// behind, its staging file is cleaned up with it.
///
/// Obtained from [`Store::writer`].
pub struct Writer {
    store: Store,
    staged: tempfile::TempPath,
    sink: HashingWriter<tokio::fs::File, Sha256>,
}

impl Writer {
    pub(crate) async fn create(store: Store) -> std::io::Result<Self> {
        let staging = {
            let store = store.clone();
            tokio::task::spawn_blocking(move || store.stage())
        };
        let (file, staged) = flatten_blocking(staging).await?.into_parts();

        Ok(Writer {
            store,
            staged,
            sink: HashingWriter::new(tokio::fs::File::from_std(file)),
        })
    }

    /// Seals the digest and moves the staged bytes to their content address,
    /// returning the digest.
    pub async fn finish(mut self) -> std::io::Result<Integrity> {
        use tokio::io::AsyncWriteExt;

        self.sink.flush().await?;

        let Writer {
            store,
            staged,
            sink,
        } = self;
        let (file, hash) = sink.finalize();
        let integrity = Integrity::from_sha256(hash);

        let commit = {
            let integrity = integrity.clone();
            tokio::task::spawn_blocking(move || {
                // The handle must be closed before the rename; Windows
                // refuses to move a file that is still open.
                drop(file);
                store.commit(staged, &integrity)
            })
        };
        flatten_blocking(commit).await?;

        Ok(integrity)
    }
}

/// Awaits a blocking task, resuming its panic if it had one and turning an
/// aborted task into an io error.
async fn flatten_blocking<T>(
    task: tokio::task::JoinHandle<std::io::Result<T>>,
) -> std::io::Result<T> {
    match task.await {
        Ok(result) => result,
        Err(join_error) => match join_error.try_into_panic() {
            Ok(panic) => std::panic::resume_unwind(panic),
            Err(cancelled) => Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                cancelled,
            )),
        },
    }
}

impl tokio::io::AsyncWrite for Writer {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().sink).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().sink).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().sink).poll_shutdown(cx)
    }
}
