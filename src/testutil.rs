//! Test-only mock I/O, shared by unit tests across modules.
//!
//! Mirrors the client crate's `TestStream` (`awc::client::pool::test::TestStream`): an
//! idle mock socket that is always `Poll::Pending` on read and accepts writes/shutdown
//! without doing anything, standing in for a live-but-unused TCP/TLS connection.
#![cfg(test)]

use std::{
    cell::Cell,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// An always-pending mock channel. Tracks how many copies are alive via a shared
/// counter so tests can assert that connections were actually dropped/closed.
pub(crate) struct PendingIo {
    alive: Rc<Cell<u32>>,
}

impl PendingIo {
    pub(crate) fn new(alive: Rc<Cell<u32>>) -> Self {
        alive.set(alive.get() + 1);
        Self { alive }
    }
}

impl Drop for PendingIo {
    fn drop(&mut self) {
        self.alive.set(self.alive.get() - 1);
    }
}

impl AsyncRead for PendingIo {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for PendingIo {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
