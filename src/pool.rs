//! Version-specific pooling strategies held behind an origin queue.

use std::{collections::VecDeque, rc::Rc};

use crate::{
    connection::{Connection, ConnectionIo, StreamHandle},
    waiter::HttpVersion,
};

/// Internal, non-terminal failure from [`PoolState::create_stream`]: the connection
/// raced us and no longer has budget. The queue absorbs this by re-entering `acquire`
/// internal, non-terminal race.
#[derive(Debug)]
pub(crate) struct StreamBudgetExhausted;

/// Version-specific pooling strategy, held behind the owning
/// [`crate::queue::OriginQueue`]'s critical section. Swapping the variant (H2 → H1
/// fallback) is a plain assignment under that section's lock.
pub(crate) enum PoolState<Io: ConnectionIo> {
    H1(H1Pool<Io>),
    H2(H2Pool<Io>),
}

impl<Io: ConnectionIo> PoolState<Io> {
    pub(crate) fn version(&self) -> HttpVersion {
        match self {
            PoolState::H1(p) => p.minor_version,
            PoolState::H2(_) => HttpVersion::H2,
        }
    }

    pub(crate) fn may_create(&self, conn_count: usize) -> bool {
        match self {
            PoolState::H1(p) => conn_count < p.max,
            PoolState::H2(p) => conn_count < p.max,
        }
    }

    /// Finds an idle (H1) or under-budget (H2) connection, if any.
    pub(crate) fn poll(&mut self) -> Option<Rc<Connection<Io>>> {
        match self {
            PoolState::H1(p) => p.poll(),
            PoolState::H2(p) => p.poll(),
        }
    }

    pub(crate) fn recycle(&mut self, conn: Rc<Connection<Io>>) {
        match self {
            PoolState::H1(p) => p.recycle(conn),
            PoolState::H2(p) => p.recycle(conn),
        }
    }

    pub(crate) fn discard(&mut self, conn: Rc<Connection<Io>>) {
        match self {
            PoolState::H1(p) => p.discard(conn),
            PoolState::H2(p) => p.discard(conn),
        }
    }

    pub(crate) fn create_stream(
        &mut self,
        conn: &Rc<Connection<Io>>,
    ) -> Result<StreamHandle<Io>, StreamBudgetExhausted> {
        match self {
            PoolState::H1(p) => p.create_stream(conn),
            PoolState::H2(p) => p.create_stream(conn),
        }
    }

    pub(crate) fn bind(&mut self, conn: Rc<Connection<Io>>) {
        match self {
            PoolState::H1(p) => p.bind(conn),
            PoolState::H2(p) => p.bind(conn),
        }
    }

    pub(crate) fn close_all(&mut self) -> Vec<Rc<Connection<Io>>> {
        match self {
            PoolState::H1(p) => p.close_all(),
            PoolState::H2(p) => p.close_all(),
        }
    }

    /// Only H1's free list is swept for idle eviction; H2 connections have no
    /// equivalent "checked-in and unused" state to probe.
    pub(crate) fn h1_mut(&mut self) -> Option<&mut H1Pool<Io>> {
        match self {
            PoolState::H1(p) => Some(p),
            PoolState::H2(_) => None,
        }
    }
}

/// HTTP/1.x pool: an ordered free list plus a capacity bound.
///
/// `poll` pops from the front when pipelining is enabled (FIFO — the oldest idle
/// connection is reused first, spreading pipelined requests) and from the back
/// otherwise (LIFO — the most recently used connection is reused first, so idle
/// connections age out and get reaped by keep-alive).
pub(crate) struct H1Pool<Io: ConnectionIo> {
    free: VecDeque<Rc<Connection<Io>>>,
    max: usize,
    pipelining: bool,
    pipelining_limit: u32,
    minor_version: HttpVersion,
}

impl<Io: ConnectionIo> H1Pool<Io> {
    pub(crate) fn new(
        max: usize,
        pipelining: bool,
        pipelining_limit: u32,
        minor_version: HttpVersion,
    ) -> Self {
        Self {
            free: VecDeque::new(),
            max,
            pipelining,
            pipelining_limit,
            minor_version,
        }
    }

    fn poll(&mut self) -> Option<Rc<Connection<Io>>> {
        if self.pipelining {
            self.free.pop_front()
        } else {
            self.free.pop_back()
        }
    }

    fn recycle(&mut self, conn: Rc<Connection<Io>>) {
        if conn.is_valid() {
            self.free.push_back(conn);
        }
    }

    fn discard(&mut self, _conn: Rc<Connection<Io>>) {
        // not in the free list (it was checked out); nothing to remove.
    }

    fn create_stream(
        &mut self,
        conn: &Rc<Connection<Io>>,
    ) -> Result<StreamHandle<Io>, StreamBudgetExhausted> {
        let limit = if self.pipelining { self.pipelining_limit.max(1) } else { 1 };
        conn.set_max_streams(limit);
        if conn.try_reserve_stream() {
            Ok(StreamHandle::H1(conn.clone()))
        } else {
            Err(StreamBudgetExhausted)
        }
    }

    fn bind(&mut self, conn: Rc<Connection<Io>>) {
        // A freshly bound connection isn't free until recycled after its first use;
        // nothing to do here besides letting callers hold the Rc.
        drop(conn);
    }

    fn close_all(&mut self) -> Vec<Rc<Connection<Io>>> {
        self.free.drain(..).collect()
    }

    /// Hands the whole free list to the caller for an idle-liveness sweep; use
    /// [`H1Pool::restore_after_sweep`] to put the survivors back.
    pub(crate) fn take_free_for_sweep(&mut self) -> Vec<Rc<Connection<Io>>> {
        self.free.drain(..).collect()
    }

    /// Order isn't preserved across a sweep — eviction is opportunistic maintenance,
    /// not part of request-serving, so FIFO/LIFO fairness doesn't apply here.
    pub(crate) fn restore_after_sweep(&mut self, survivors: Vec<Rc<Connection<Io>>>) {
        self.free.extend(survivors);
    }
}

/// HTTP/2 pool: at most `max` connections (typically 1), each multiplexing up to
/// `multiplexing_limit` concurrent streams.
pub(crate) struct H2Pool<Io: ConnectionIo> {
    conns: Vec<Rc<Connection<Io>>>,
    max: usize,
    multiplexing_limit: u32,
}

impl<Io: ConnectionIo> H2Pool<Io> {
    pub(crate) fn new(max: usize, multiplexing_limit: u32) -> Self {
        Self {
            conns: Vec::new(),
            max,
            multiplexing_limit,
        }
    }

    fn poll(&mut self) -> Option<Rc<Connection<Io>>> {
        self.conns
            .iter()
            .find(|c| {
                c.is_valid()
                    && !c.is_marked_for_close()
                    && c.active_streams() < self.multiplexing_limit.min(c.max_streams())
            })
            .cloned()
    }

    /// H2 never frees the whole connection on stream completion.
    fn recycle(&mut self, _conn: Rc<Connection<Io>>) {}

    /// Marks for close-on-last-stream; actually removed once its stream count hits zero.
    fn discard(&mut self, conn: Rc<Connection<Io>>) {
        conn.invalidate();
        conn.mark_for_close();
        if conn.active_streams() == 0 {
            self.conns.retain(|c| c.id() != conn.id());
        }
    }

    fn create_stream(
        &mut self,
        conn: &Rc<Connection<Io>>,
    ) -> Result<StreamHandle<Io>, StreamBudgetExhausted> {
        static NEXT_STREAM_ID: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(1);

        if conn.try_reserve_stream() {
            let id = NEXT_STREAM_ID.fetch_add(2, std::sync::atomic::Ordering::Relaxed);
            Ok(StreamHandle::H2(conn.clone(), id))
        } else {
            Err(StreamBudgetExhausted)
        }
    }

    fn bind(&mut self, conn: Rc<Connection<Io>>) {
        self.conns.push(conn);
    }

    fn close_all(&mut self) -> Vec<Rc<Connection<Io>>> {
        self.conns.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::{dispatch::default_context, testutil::PendingIo};

    fn conn() -> Rc<Connection<PendingIo>> {
        Connection::new(
            PendingIo::new(Rc::new(Cell::new(0))),
            HttpVersion::Http11,
            1,
            default_context(),
        )
    }

    #[test]
    fn h1_pool_respects_capacity() {
        let pool = H1Pool::<PendingIo>::new(2, false, 1, HttpVersion::Http11);
        assert!(pool.max > 0);
        assert!(PoolState::H1(pool).may_create(1));
    }

    #[test]
    fn h1_plain_keep_alive_is_lifo() {
        let mut pool = H1Pool::<PendingIo>::new(4, false, 1, HttpVersion::Http11);
        let a = conn();
        let b = conn();
        pool.recycle(a.clone());
        pool.recycle(b.clone());
        // LIFO: most recently recycled (`b`) comes back first.
        assert_eq!(pool.poll().unwrap().id(), b.id());
        assert_eq!(pool.poll().unwrap().id(), a.id());
    }

    #[test]
    fn h1_pipelining_is_fifo() {
        let mut pool = H1Pool::<PendingIo>::new(4, true, 4, HttpVersion::Http11);
        let a = conn();
        let b = conn();
        pool.recycle(a.clone());
        pool.recycle(b.clone());
        assert_eq!(pool.poll().unwrap().id(), a.id());
        assert_eq!(pool.poll().unwrap().id(), b.id());
    }

    #[test]
    fn h2_pool_multiplexes_until_limit() {
        let mut pool = H2Pool::<PendingIo>::new(1, 2);
        let c = conn();
        pool.bind(c.clone());

        assert!(pool.create_stream(&c).is_ok());
        assert!(pool.create_stream(&c).is_ok());
        assert!(pool.create_stream(&c).is_err());

        assert!(pool.poll().is_none());
        c.release_stream();
        assert!(pool.poll().is_some());
    }

    #[test]
    fn h2_discard_marks_connection_unusable_and_evicts_when_idle() {
        let mut pool = H2Pool::<PendingIo>::new(1, 4);
        let c = conn();
        pool.bind(c.clone());
        pool.create_stream(&c).unwrap();

        pool.discard(c.clone());
        assert!(pool.create_stream(&c).is_err(), "marked for close");
        assert!(pool.poll().is_none());

        // once the one in-flight stream finishes and discard fires again (as the
        // queue does on the stream-finished lifecycle notification), the connection
        // is dropped from the pool entirely.
        c.release_stream();
        pool.discard(c.clone());
        assert!(pool.conns.is_empty());
    }
}
