//! Async passthrough for the hashing adapters.
//!
//! The adapters require `Unpin` inner objects, which every reader and writer
//! in this workspace satisfies; in exchange the projections need no unsafe
//! code. `poll_shutdown` is forwarded to the inner writer as-is, so a
//! hashing sink wrapped around a file behaves like the file itself on
//! shutdown.

use std::{
    pin::Pin,
    task::{ready, Context, Poll},
};

use digest::Digest;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::{HashingReader, HashingWriter};

impl<W: AsyncWrite + Unpin, D: Digest + Unpin> AsyncWrite for HashingWriter<W, D> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        let this = self.get_mut();
        let accepted = ready!(Pin::new(&mut this.writer).poll_write(cx, buf))?;
        // Only what the inner writer accepted counts towards the digest.
        this.hasher.update(&buf[..accepted]);
        Poll::Ready(Ok(accepted))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().writer).poll_shutdown(cx)
    }
}

impl<R: AsyncRead + Unpin, D: Digest + Unpin> AsyncRead for HashingReader<R, D> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let already_filled = buf.filled().len();
        ready!(Pin::new(&mut this.reader).poll_read(cx, buf))?;
        this.hasher.update(&buf.filled()[already_filled..]);
        Poll::Ready(Ok(()))
    }
}
