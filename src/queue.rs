//! Per-origin state: current pool, connection count, and the FIFO of pending waiters.
//! Orchestrates acquisition, delivery, connection creation, and H2→H1 fallback.
//!
//! Every public method treats the queue as a short serialized critical section — in
//! practice a single `RefCell` borrow, since everything here runs on one arbiter.

use std::{cell::RefCell, collections::VecDeque, rc::Rc, time::Duration};

use actix_rt::task::JoinHandle;

use crate::{
    config::ConnectorConfig,
    connection::{Connection, ConnectionIo},
    connector::{ConnectAttempt, ConnectSink, Connector},
    dispatch::Dispatcher,
    error::ConnectError,
    key::OriginKey,
    metrics::{EndpointToken, Metrics},
    pool::{H1Pool, H2Pool, PoolState},
    registry::ChannelRegistry,
    transport::NegotiatedAlpn,
    waiter::{HttpVersion, Waiter},
};

struct Inner<Io: ConnectionIo> {
    key: OriginKey,
    pool: PoolState<Io>,
    conn_count: usize,
    waiters: VecDeque<Waiter<Io>>,
    max_wait_queue_size: i64,
    h1_max_pool_size: usize,
    config: Rc<ConnectorConfig>,
    metrics: Rc<dyn Metrics>,
    endpoint_token: EndpointToken,
    registry: Rc<ChannelRegistry>,
    connector: Rc<Connector<Io>>,
    default_context: Rc<dyn Dispatcher>,
    fallback_done: bool,
    closed: bool,
    removed: bool,
    on_empty: Box<dyn Fn(&OriginKey)>,
    /// Handles of spawned connection-creation attempts, awaited by [`OriginQueue::close`]
    /// so shutdown doesn't return while one is still in flight.
    in_flight: Vec<JoinHandle<()>>,
}

/// A cheap, `Clone`-able handle onto one origin's pool-and-queue state.
pub(crate) struct OriginQueue<Io: ConnectionIo>(Rc<RefCell<Inner<Io>>>);

impl<Io: ConnectionIo> Clone for OriginQueue<Io> {
    fn clone(&self) -> Self {
        OriginQueue(self.0.clone())
    }
}

impl<Io: ConnectionIo> OriginQueue<Io> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        key: OriginKey,
        version: HttpVersion,
        config: Rc<ConnectorConfig>,
        metrics: Rc<dyn Metrics>,
        registry: Rc<ChannelRegistry>,
        connector: Rc<Connector<Io>>,
        default_context: Rc<dyn Dispatcher>,
        on_empty: Box<dyn Fn(&OriginKey)>,
    ) -> Self {
        let endpoint_token = metrics.create_endpoint(
            key.host(),
            key.port(),
            if version == HttpVersion::H2 {
                config.http2_max_pool_size
            } else {
                config.max_pool_size
            },
        );

        let pool = if version == HttpVersion::H2 {
            PoolState::H2(H2Pool::new(config.http2_max_pool_size, config.effective_multiplexing_limit()))
        } else {
            PoolState::H1(H1Pool::new(config.max_pool_size, config.pipelining, config.pipelining_limit, version))
        };

        let idle_timeout = config.idle_timeout;
        let queue = OriginQueue(Rc::new(RefCell::new(Inner {
            key,
            pool,
            conn_count: 0,
            waiters: VecDeque::new(),
            max_wait_queue_size: config.max_wait_queue_size,
            h1_max_pool_size: config.max_pool_size,
            config,
            metrics,
            endpoint_token,
            registry,
            connector,
            default_context,
            fallback_done: false,
            closed: false,
            removed: false,
            on_empty,
            in_flight: Vec::new(),
        })));

        if idle_timeout > Duration::ZERO {
            queue.spawn_idle_sweep(idle_timeout);
        }
        queue
    }

    /// Ticks every `interval`, evicting H1 connections found dead by
    /// [`Connection::probe_idle_liveness`]. Stops once the queue closes.
    fn spawn_idle_sweep(&self, interval: Duration) {
        let this = self.clone();
        actix_rt::spawn(async move {
            loop {
                actix_rt::time::sleep(interval).await;
                if this.0.borrow().closed {
                    break;
                }
                this.sweep_idle().await;
            }
        });
    }

    async fn sweep_idle(&self) {
        let free = {
            let mut inner = self.0.borrow_mut();
            match inner.pool.h1_mut() {
                Some(p) => p.take_free_for_sweep(),
                None => return,
            }
        };
        if free.is_empty() {
            return;
        }

        let mut survivors = Vec::with_capacity(free.len());
        let mut evicted = Vec::new();
        for conn in free {
            if conn.probe_idle_liveness().await {
                survivors.push(conn);
            } else {
                evicted.push(conn);
            }
        }

        {
            let mut inner = self.0.borrow_mut();
            if let Some(p) = inner.pool.h1_mut() {
                p.restore_after_sweep(survivors);
            }
            inner.conn_count = inner.conn_count.saturating_sub(evicted.len());
        }
        if !evicted.is_empty() {
            log::debug!("{}: idle sweep evicted {} connection(s)", self.0.borrow().key, evicted.len());
            for conn in &evicted {
                conn.invalidate();
                self.0.borrow().registry.unregister(conn.id());
            }
        }
        self.maybe_remove_if_empty();
    }

    pub(crate) fn key(&self) -> OriginKey {
        self.0.borrow().key.clone()
    }

    pub(crate) fn is_empty(&self) -> bool {
        let inner = self.0.borrow();
        inner.conn_count == 0 && inner.waiters.is_empty()
    }

    /// Serves `waiter` from an idle connection, starts a new connection, enqueues the
    /// waiter, or fails it outright, in that order of preference.
    pub(crate) fn acquire(&self, waiter: Waiter<Io>) {
        if self.0.borrow().closed {
            waiter.fail(ConnectError::ManagerClosed);
            return;
        }

        let conn = self.0.borrow_mut().pool.poll();
        if let Some(conn) = conn {
            self.deliver(conn, waiter);
            return;
        }

        let may_create = {
            let inner = self.0.borrow();
            inner.pool.may_create(inner.conn_count)
        };
        if may_create {
            log::debug!("{}: no idle connection, creating a new one", self.0.borrow().key);
            self.create_connection(waiter);
            return;
        }

        let has_room = {
            let inner = self.0.borrow();
            inner.config.wait_queue_is_unbounded() || (inner.waiters.len() as i64) < inner.max_wait_queue_size
        };
        if has_room {
            let mut inner = self.0.borrow_mut();
            let token = inner.metrics.enqueue_request(inner.endpoint_token);
            waiter.set_metrics_token(token);
            inner.waiters.push_back(waiter);
            return;
        }

        waiter.fail(ConnectError::PoolTooBusy);
    }

    /// Returns a still-valid connection to the idle pool and wakes the next waiter.
    pub(crate) fn recycle(&self, conn: Rc<Connection<Io>>) {
        self.0.borrow_mut().pool.recycle(conn);
        self.drain_pending();
    }

    fn discard_connection(&self, conn: Rc<Connection<Io>>) {
        conn.invalidate();
        let id = conn.id();
        log::debug!("{}: discarding connection {:?}", self.0.borrow().key, id);
        self.0.borrow_mut().pool.discard(conn);
        self.0.borrow().registry.unregister(id);
        self.connection_closed();
    }

    /// Pops cancelled waiters until a live one (or none) surfaces.
    fn next_live_waiter(&self) -> Option<Waiter<Io>> {
        loop {
            let popped = self.0.borrow_mut().waiters.pop_front();
            match popped {
                None => return None,
                Some(w) if w.is_cancelled() => {
                    if let Some(token) = w.take_metrics_token() {
                        let inner = self.0.borrow();
                        inner.metrics.dequeue_request(inner.endpoint_token, token);
                    }
                }
                Some(w) => return Some(w),
            }
        }
    }

    /// Hands out idle connections to queued waiters until either runs dry.
    fn drain_pending(&self) {
        loop {
            let waiter = match self.next_live_waiter() {
                Some(w) => w,
                None => break,
            };
            let conn = self.0.borrow_mut().pool.poll();
            match conn {
                Some(conn) => self.deliver(conn, waiter),
                None => {
                    self.0.borrow_mut().waiters.push_front(waiter);
                    break;
                }
            }
        }
        self.maybe_remove_if_empty();
    }

    /// Accounts for a connection that is gone for good, and either starts a
    /// replacement for the next waiter or lets the queue go idle.
    pub(crate) fn connection_closed(&self) {
        {
            let mut inner = self.0.borrow_mut();
            inner.conn_count = inner.conn_count.saturating_sub(1);
        }
        if let Some(waiter) = self.next_live_waiter() {
            self.create_connection(waiter);
        } else {
            self.maybe_remove_if_empty();
        }
    }

    fn maybe_remove_if_empty(&self) {
        let should_remove = {
            let inner = self.0.borrow();
            !inner.removed && inner.conn_count == 0 && inner.waiters.is_empty()
        };
        if should_remove {
            let mut inner = self.0.borrow_mut();
            inner.removed = true;
            inner.metrics.close_endpoint(&inner.key.host().to_string(), inner.key.port(), inner.endpoint_token);
            (inner.on_empty)(&inner.key.clone());
        }
    }

    /// Hops to the connection's own context before binding a stream, re-queueing the
    /// waiter first if the connection turned out to be invalid or the waiter cancelled.
    fn deliver(&self, conn: Rc<Connection<Io>>, waiter: Waiter<Io>) {
        if !conn.is_valid() {
            self.acquire(waiter);
            return;
        }
        if waiter.is_cancelled() {
            self.recycle(conn);
            return;
        }

        let ctx = conn.context();
        let this = self.clone();
        ctx.dispatch(Box::new(move || {
            this.deliver_bound(conn, waiter);
            this.drain_pending();
        }));
    }

    /// Binds a stream on the connection's own context and resolves the waiter, or
    /// sends it back through `acquire` if the stream budget is exhausted.
    fn deliver_bound(&self, conn: Rc<Connection<Io>>, waiter: Waiter<Io>) {
        let stream = self.0.borrow_mut().pool.create_stream(&conn);
        match stream {
            Ok(stream) => {
                if conn.use_count() == 0 {
                    waiter.notify_first_connection(&conn);
                }
                conn.bump_use_count();
                waiter.succeed(stream);
            }
            Err(_budget_exhausted) => self.acquire(waiter),
        }
    }

    /// Reserves a connection slot and hands the attempt off to the connector. Picking
    /// a context is deferred to bind time, the first point a freshly created
    /// connection actually needs one.
    fn create_connection(&self, waiter: Waiter<Io>) {
        let (origin, version, connector) = {
            let mut inner = self.0.borrow_mut();
            inner.conn_count += 1;
            (inner.key.clone(), inner.pool.version(), inner.connector.clone())
        };
        let handle = connector.connect(ConnectAttempt { origin, version }, self.clone(), waiter);
        let mut inner = self.0.borrow_mut();
        inner.in_flight.retain(|h| !h.is_finished());
        inner.in_flight.push(handle);
    }

    fn context_for(&self, waiter: &Waiter<Io>) -> Rc<dyn Dispatcher> {
        waiter.context().unwrap_or_else(|| self.0.borrow().default_context.clone())
    }

    fn install_lifecycle(&self, conn: &Rc<Connection<Io>>) {
        let mut rx = self.0.borrow().registry.register(conn.id());
        let this = self.clone();
        let conn_for_task = conn.clone();
        actix_rt::spawn(async move {
            if rx.recv().await.is_some() {
                this.discard_connection(conn_for_task);
            }
        });

        let this = self.clone();
        conn.install_lifecycle(Rc::new(move |c, reuse| match c.version() {
            HttpVersion::H2 => {
                // per-stream completion only; true connection teardown arrives
                // asynchronously through the registry (GOAWAY, reset, idle timeout).
                this.drain_pending();
            }
            _ => {
                if reuse {
                    this.recycle(c);
                } else {
                    this.discard_connection(c);
                }
            }
        }));
    }

    fn bind_h2(&self, waiter: Waiter<Io>, channel: Io) {
        let context = self.context_for(&waiter);
        let limit = self.0.borrow().config.effective_multiplexing_limit();
        let conn = Connection::new(channel, HttpVersion::H2, limit, context);
        self.install_lifecycle(&conn);
        self.0.borrow_mut().pool.bind(conn.clone());
        self.deliver(conn, waiter);
    }

    fn bind_h1(&self, waiter: Waiter<Io>, channel: Io, version: HttpVersion) {
        let context = self.context_for(&waiter);
        let conn = Connection::new(channel, version, 1, context);
        self.install_lifecycle(&conn);
        self.0.borrow_mut().pool.bind(conn.clone());
        self.deliver(conn, waiter);
    }

    /// Switches this origin's pool from H2 to H1 exactly once.
    fn fallback_to_h1(&self, waiter: Waiter<Io>, channel: Io, version: HttpVersion) {
        {
            let mut inner = self.0.borrow_mut();
            if !inner.fallback_done {
                inner.fallback_done = true;
                let pool = H1Pool::new(inner.h1_max_pool_size, inner.config.pipelining, inner.config.pipelining_limit, version);
                inner.pool = PoolState::H1(pool);
                log::info!("{}: falling back from H2 to H1 ({:?})", inner.key, version);
            }
        }
        self.bind_h1(waiter, channel, version);
    }

    /// Close this queue: drop its pool's connections, fail any remaining waiters, and
    /// wait for every in-flight connection-creation task to observe the closed state
    /// and resolve its waiter before returning.
    pub(crate) async fn close(&self) {
        let (conns, waiters, handles) = {
            let mut inner = self.0.borrow_mut();
            if inner.closed {
                return;
            }
            inner.closed = true;
            let conns = inner.pool.close_all();
            let waiters = inner.waiters.drain(..).collect::<Vec<_>>();
            let handles = inner.in_flight.drain(..).collect::<Vec<_>>();
            (conns, waiters, handles)
        };
        for conn in conns {
            conn.invalidate();
            self.0.borrow().registry.unregister(conn.id());
        }
        for waiter in waiters {
            waiter.fail(ConnectError::ManagerClosed);
        }
        for handle in handles {
            let _ = handle.await;
        }
        self.maybe_remove_if_empty();
    }

    /// Late dial outcomes can arrive after the queue has already been closed (the
    /// connector task was spawned before shutdown, but its callback fires after). This
    /// releases the reserved slot and fails the waiter instead of binding against a
    /// torn-down pool. Returns the waiter back to the caller when the queue is still
    /// open, so the normal success path can proceed.
    fn fail_if_closed(&self, waiter: Waiter<Io>) -> Option<Waiter<Io>> {
        if self.0.borrow().closed {
            self.connection_closed();
            waiter.fail(ConnectError::ManagerClosed);
            None
        } else {
            Some(waiter)
        }
    }
}

impl<Io: ConnectionIo> ConnectSink<Io> for OriginQueue<Io> {
    fn on_handshake_success_tls(&self, waiter: Waiter<Io>, channel: Io, negotiated: NegotiatedAlpn) {
        let Some(waiter) = self.fail_if_closed(waiter) else { return };
        match negotiated {
            NegotiatedAlpn::H2 => self.bind_h2(waiter, channel),
            NegotiatedAlpn::Http11 => self.fallback_to_h1(waiter, channel, HttpVersion::Http11),
        }
    }

    fn on_handshake_failure(&self, waiter: Waiter<Io>, cause: ConnectError) {
        self.connection_closed();
        waiter.fail(cause);
    }

    fn on_negotiated_h2(&self, waiter: Waiter<Io>, channel: Io) {
        let Some(waiter) = self.fail_if_closed(waiter) else { return };
        self.bind_h2(waiter, channel);
    }

    fn on_cleartext_upgrade_refused(&self, waiter: Waiter<Io>, channel: Io) {
        let Some(waiter) = self.fail_if_closed(waiter) else { return };
        self.fallback_to_h1(waiter, channel, HttpVersion::Http11);
    }

    fn on_plain_bind(&self, waiter: Waiter<Io>, channel: Io, version: HttpVersion) {
        let Some(waiter) = self.fail_if_closed(waiter) else { return };
        match version {
            HttpVersion::H2 => self.bind_h2(waiter, channel),
            other => self.bind_h1(waiter, channel, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::{
        dispatch::default_context,
        metrics::NoopMetrics,
        testutil::PendingIo,
        transport::{ChannelProvider, DialRequest},
    };
    use futures_core::future::LocalBoxFuture;

    struct ImmediatePlain {
        alive: Rc<Cell<u32>>,
    }

    impl ChannelProvider<PendingIo> for ImmediatePlain {
        fn connect(&self, _req: DialRequest) -> LocalBoxFuture<'static, Result<PendingIo, ConnectError>> {
            let io = PendingIo::new(self.alive.clone());
            Box::pin(async move { Ok(io) })
        }
    }

    /// Several hops (dial spawn, then context-hop spawn) separate an `acquire` call
    /// from its delivery; a single `yield_now` isn't enough to drain the chain.
    async fn settle() {
        for _ in 0..8 {
            actix_rt::task::yield_now().await;
        }
    }

    fn test_queue(version: HttpVersion, max_pool_size: usize) -> OriginQueue<PendingIo> {
        let alive = Rc::new(Cell::new(0));
        let config = Rc::new(ConnectorConfig::default().max_pool_size(max_pool_size).http2_clear_text_upgrade(false));
        let connector = Rc::new(Connector::new(Rc::new(ImmediatePlain { alive }), None, None, None, config.clone()));
        OriginQueue::new(
            OriginKey::new(false, "example.com", 80),
            version,
            config,
            Rc::new(NoopMetrics::default()),
            ChannelRegistry::new(),
            connector,
            default_context(),
            Box::new(|_key| {}),
        )
    }

    #[actix_rt::test]
    async fn saturation_enqueues_then_rejects() {
        let queue = test_queue(HttpVersion::Http11, 2);
        let got = Rc::new(Cell::new(0u32));
        let failed = Rc::new(Cell::new(0u32));

        for _ in 0..2 {
            let got = got.clone();
            let (w, _h) = Waiter::new(None, None, |_c| {}, move |_s| got.set(got.get() + 1), |_e| {});
            queue.acquire(w);
        }
        settle().await;
        assert_eq!(got.get(), 2);

        // third acquire enqueues (no connection available, but pool is at capacity)
        let (w3, _h3) = Waiter::new(None, None, |_c| {}, |_s| {}, |_e| {});
        queue.acquire(w3);
        assert_eq!(queue.0.borrow().waiters.len(), 1);

        // fourth exceeds max_wait_queue_size default (unbounded in this config) so
        // tighten it to 1 to exercise the pool-too-busy path
        queue.0.borrow_mut().max_wait_queue_size = 1;
        let failed2 = failed.clone();
        let (w4, _h4) = Waiter::new(None, None, |_c| {}, |_s| {}, move |_e| failed2.set(failed2.get() + 1));
        queue.acquire(w4);
        assert_eq!(failed.get(), 1);
    }

    #[actix_rt::test]
    async fn cancelled_head_waiter_is_skipped_on_release() {
        let queue = test_queue(HttpVersion::Http11, 1);
        let first_stream = Rc::new(RefCell::new(None));
        {
            let first_stream = first_stream.clone();
            let (w, _h) = Waiter::new(None, None, |_c| {}, move |s| *first_stream.borrow_mut() = Some(s), |_e| {});
            queue.acquire(w);
        }
        settle().await;
        assert!(first_stream.borrow().is_some());

        let served = Rc::new(RefCell::new(Vec::<&'static str>::new()));
        let (w2, h2) = {
            let served = served.clone();
            Waiter::new(None, None, |_c| {}, move |_s| served.borrow_mut().push("2"), |_e| {})
        };
        let (w3, _h3) = {
            let served = served.clone();
            Waiter::new(None, None, |_c| {}, move |_s| served.borrow_mut().push("3"), |_e| {})
        };
        queue.acquire(w2);
        queue.acquire(w3);
        h2.cancel();

        // release the one connection back; the cancelled waiter should be skipped
        if let Some(stream) = first_stream.borrow_mut().take() {
            stream.finish(true);
        }
        settle().await;
        assert_eq!(served.borrow().as_slice(), &["3"]);
    }

    #[actix_rt::test]
    async fn idle_connection_closed_by_peer_is_replaced_on_next_acquire() {
        let queue = test_queue(HttpVersion::Http11, 1);
        let first_stream = Rc::new(RefCell::new(None));
        {
            let first_stream = first_stream.clone();
            let (w, _h) = Waiter::new(None, None, |_c| {}, move |s| *first_stream.borrow_mut() = Some(s), |_e| {});
            queue.acquire(w);
        }
        settle().await;
        let stream = first_stream.borrow_mut().take().unwrap();
        let idle_id = stream.connection().id();
        stream.finish(true);
        settle().await;
        assert_eq!(queue.0.borrow().conn_count, 1, "one idle connection recycled back to the pool");

        // the peer silently closes the idle socket; our side learns about it only
        // through the registry's out-of-band notification.
        queue.0.borrow().registry.notify_closed(idle_id);
        settle().await;

        let served = Rc::new(RefCell::new(None));
        {
            let served = served.clone();
            let (w2, _h2) = Waiter::new(None, None, |_c| {}, move |s| *served.borrow_mut() = Some(s), |_e| {});
            queue.acquire(w2);
        }
        settle().await;

        let new_stream = served.borrow_mut().take().expect("a fresh connection replaced the dead one");
        assert_ne!(new_stream.connection().id(), idle_id, "must not hand back the dead connection");
        assert_eq!(queue.0.borrow().conn_count, 1, "slot accounting stays consistent: one live connection");
    }
}
