//! A pass-through stream that computes the digest of everything flowing
//! through it.

use std::{
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use burrow_digest::{digest::Digest, Integrity, Sha256};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, ReadBuf};

pin_project! {
    /// A transparent [`AsyncRead`] wrapper that keeps a rolling SHA-256 of
    /// the bytes it hands out.
    ///
    /// Used between a fetcher and the unpacker when the ambient integrity of
    /// a tarball is unknown: the unpacker consumes the gate as its input
    /// stream, and once the stream has been read to its end the paired
    /// [`GateHandle`] yields the digest of the whole archive.
    pub struct IntegrityGate<R> {
        #[pin]
        reader: R,
        state: Arc<Mutex<GateState>>,
    }
}

struct GateState {
    hasher: Option<Sha256>,
    integrity: Option<Integrity>,
}

/// The observer half of an [`IntegrityGate`].
#[derive(Clone)]
pub struct GateHandle {
    state: Arc<Mutex<GateState>>,
}

impl<R> IntegrityGate<R> {
    /// Wraps a reader, returning the gate and the handle that will yield the
    /// digest once the stream has been fully read.
    pub fn new(reader: R) -> (Self, GateHandle) {
        let state = Arc::new(Mutex::new(GateState {
            hasher: Some(Sha256::new()),
            integrity: None,
        }));
        (
            Self {
                reader,
                state: state.clone(),
            },
            GateHandle { state },
        )
    }
}

impl GateHandle {
    /// The digest of the streamed archive. `None` until the gate has seen a
    /// clean end-of-stream.
    pub fn integrity(&self) -> Option<Integrity> {
        self.state
            .lock()
            .expect("gate state lock poisoned")
            .integrity
            .clone()
    }
}

impl<R: AsyncRead> AsyncRead for IntegrityGate<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let previously_filled = buf.filled().len();
        let this = self.project();

        match this.reader.poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let mut state = this.state.lock().expect("gate state lock poisoned");
                let filled = &buf.filled()[previously_filled..];
                if filled.is_empty() {
                    // Clean end-of-stream: seal the digest.
                    if let Some(hasher) = state.hasher.take() {
                        state.integrity = Some(Integrity::from_sha256(hasher.finalize()));
                    }
                } else if let Some(hasher) = state.hasher.as_mut() {
                    hasher.update(filled);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
