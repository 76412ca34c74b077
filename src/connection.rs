//! The pooled `Connection` type and the per-connection lifecycle notification.

use std::{
    cell::{Cell, RefCell},
    future::poll_fn,
    pin::Pin,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
    task::Poll,
    time::Instant,
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::{dispatch::Dispatcher, waiter::HttpVersion};

/// Trait alias for types a [`Connection`] can hold as its raw channel.
///
/// Mirrors the client crate's `ConnectionIo` alias (`AsyncRead + AsyncWrite + Unpin +
/// 'static`) — the core never reads or writes this `Io` itself (wire framing is an
/// external collaborator's job), it only owns and hands it back out.
pub trait ConnectionIo: AsyncRead + AsyncWrite + Unpin + 'static {}
impl<T: AsyncRead + AsyncWrite + Unpin + 'static> ConnectionIo for T {}

/// Identity for the channel→connection registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

impl ChannelId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A live channel plus the bookkeeping the pool/queue need.
///
/// Owned exclusively by the [`crate::pool::PoolState`] that created it.
/// `active_streams`/`max_streams` are meaningful for H2 connections only;
/// for H1 connections `max_streams` is 1 (no pipelining) or the configured pipelining
/// limit.
pub struct Connection<Io: ConnectionIo> {
    id: ChannelId,
    io: RefCell<Option<Io>>,
    version: HttpVersion,
    created: Instant,
    valid: Cell<bool>,
    use_count: Cell<u32>,
    active_streams: Cell<u32>,
    max_streams: Cell<u32>,
    marked_for_close: Cell<bool>,
    context: Rc<dyn Dispatcher>,
    lifecycle: RefCell<Option<Rc<dyn Fn(Rc<Connection<Io>>, bool)>>>,
}

impl<Io: ConnectionIo> Connection<Io> {
    pub(crate) fn new(
        io: Io,
        version: HttpVersion,
        max_streams: u32,
        context: Rc<dyn Dispatcher>,
    ) -> Rc<Self> {
        Rc::new(Self {
            id: ChannelId::next(),
            io: RefCell::new(Some(io)),
            version,
            created: Instant::now(),
            valid: Cell::new(true),
            use_count: Cell::new(0),
            active_streams: Cell::new(0),
            max_streams: Cell::new(max_streams),
            marked_for_close: Cell::new(false),
            context,
            lifecycle: RefCell::new(None),
        })
    }

    /// Installs the callback the owning queue uses to learn that a stream finished.
    /// Set once, at bind time.
    pub(crate) fn install_lifecycle(&self, cb: Rc<dyn Fn(Rc<Connection<Io>>, bool)>) {
        *self.lifecycle.borrow_mut() = Some(cb);
    }

    fn lifecycle(&self) -> Option<Rc<dyn Fn(Rc<Connection<Io>>, bool)>> {
        self.lifecycle.borrow().clone()
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn created_at(&self) -> Instant {
        self.created
    }

    pub fn is_valid(&self) -> bool {
        self.valid.get()
    }

    /// Monotonic: valid → invalid.
    pub(crate) fn invalidate(&self) {
        self.valid.set(false);
    }

    pub fn use_count(&self) -> u32 {
        self.use_count.get()
    }

    pub(crate) fn bump_use_count(&self) {
        self.use_count.set(self.use_count.get() + 1);
    }

    pub(crate) fn active_streams(&self) -> u32 {
        self.active_streams.get()
    }

    pub(crate) fn max_streams(&self) -> u32 {
        self.max_streams.get()
    }

    pub(crate) fn set_max_streams(&self, limit: u32) {
        self.max_streams.set(limit);
    }

    pub(crate) fn try_reserve_stream(&self) -> bool {
        if self.marked_for_close.get() || self.active_streams.get() >= self.max_streams.get() {
            return false;
        }
        self.active_streams.set(self.active_streams.get() + 1);
        true
    }

    pub(crate) fn release_stream(&self) {
        self.active_streams.set(self.active_streams.get().saturating_sub(1));
    }

    pub(crate) fn mark_for_close(&self) {
        self.marked_for_close.set(true);
    }

    pub(crate) fn is_marked_for_close(&self) -> bool {
        self.marked_for_close.get()
    }

    pub fn context(&self) -> Rc<dyn Dispatcher> {
        self.context.clone()
    }

    /// Takes the raw channel out, e.g. when finally closing the connection.
    pub(crate) fn take_io(&self) -> Option<Io> {
        self.io.borrow_mut().take()
    }

    pub fn has_io(&self) -> bool {
        self.io.borrow().is_some()
    }

    /// One-shot readability check for the idle-timeout sweep: an idle, healthy channel
    /// is always `Poll::Pending` on read. Anything else — data arrived unsolicited,
    /// EOF, or an error — means the peer is gone and this connection is dead.
    ///
    /// Resolves on its very first poll, so this never actually suspends the task that
    /// awaits it.
    pub(crate) async fn probe_idle_liveness(&self) -> bool {
        let mut io_ref = self.io.borrow_mut();
        let Some(io) = io_ref.as_mut() else { return false };
        let mut scratch = [0u8; 1];
        poll_fn(|cx| {
            let mut buf = ReadBuf::new(&mut scratch);
            Poll::Ready(matches!(Pin::new(&mut *io).poll_read(cx, &mut buf), Poll::Pending))
        })
        .await
    }
}

/// A logical request/response channel handed to a waiter on success.
///
/// For H1 it is the connection's sole in-flight exchange; for H2 it is one of
/// potentially many concurrent exchanges over the same connection.
pub enum StreamHandle<Io: ConnectionIo> {
    H1(Rc<Connection<Io>>),
    H2(Rc<Connection<Io>>, u32),
}

impl<Io: ConnectionIo> StreamHandle<Io> {
    pub fn connection(&self) -> &Rc<Connection<Io>> {
        match self {
            StreamHandle::H1(conn) => conn,
            StreamHandle::H2(conn, _) => conn,
        }
    }

    /// Called by the wire-codec layer (external collaborator) once the exchange
    /// finishes. Routes to the owning queue via the per-connection lifecycle callback
    /// installed when the connection was bound.
    pub fn finish(self, reuse: bool) {
        let conn = self.connection().clone();
        if let StreamHandle::H2(_, _) = &self {
            conn.release_stream();
        }
        if let Some(cb) = conn.lifecycle() {
            cb(conn, reuse);
        }
    }
}

#[cfg(test)]
impl StreamHandle<crate::testutil::PendingIo> {
    pub(crate) fn test_dummy() -> Self {
        use std::cell::Cell;
        let conn = Connection::new(
            crate::testutil::PendingIo::new(Rc::new(Cell::new(0))),
            HttpVersion::Http11,
            1,
            crate::dispatch::default_context(),
        );
        StreamHandle::H1(conn)
    }
}
