//! The `Waiter` token: an opaque handle for a caller waiting on a connection.

use std::{cell::Cell, cell::RefCell, rc::Rc};

use crate::{
    connection::{Connection, ConnectionIo, StreamHandle},
    dispatch::Dispatcher,
    error::ConnectError,
};

/// The HTTP version a caller would like to use. `H2` is a preference, not a guarantee —
/// the queue may fall back to H1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
    H2,
}

struct Sinks<Io: ConnectionIo> {
    on_connection: Option<Box<dyn FnOnce(&Connection<Io>)>>,
    on_stream: Box<dyn FnOnce(StreamHandle<Io>)>,
    on_failure: Box<dyn FnOnce(ConnectError)>,
}

/// An opaque request for a connection-plus-stream.
///
/// Constructed with [`Waiter::new`], which also returns a [`WaiterHandle`] the caller
/// keeps around to observe/cancel it after it has been handed to
/// [`crate::manager::ConnectionManager::acquire_for_request`].
pub struct Waiter<Io: ConnectionIo> {
    pub(crate) id: u64,
    pub(crate) preferred_version: Option<HttpVersion>,
    cancelled: Rc<Cell<bool>>,
    context: Option<Rc<dyn Dispatcher>>,
    metrics_token: Cell<Option<u64>>,
    sinks: RefCell<Option<Sinks<Io>>>,
}

/// A handle retained by the caller to cancel a [`Waiter`] already handed to the manager.
///
/// Cancellation is observed, not acted upon immediately: the queue drains
/// cancelled waiters lazily at dequeue time.
#[derive(Clone)]
pub struct WaiterHandle {
    cancelled: Rc<Cell<bool>>,
}

impl WaiterHandle {
    /// Monotonic: once set, stays set.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

static NEXT_WAITER_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

impl<Io: ConnectionIo> Waiter<Io> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        preferred_version: Option<HttpVersion>,
        context: Option<Rc<dyn Dispatcher>>,
        on_connection: impl FnOnce(&Connection<Io>) + 'static,
        on_stream: impl FnOnce(StreamHandle<Io>) + 'static,
        on_failure: impl FnOnce(ConnectError) + 'static,
    ) -> (Self, WaiterHandle) {
        let cancelled = Rc::new(Cell::new(false));

        let waiter = Waiter {
            id: NEXT_WAITER_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            preferred_version,
            cancelled: cancelled.clone(),
            context,
            metrics_token: Cell::new(None),
            sinks: RefCell::new(Some(Sinks {
                on_connection: Some(Box::new(on_connection)),
                on_stream: Box::new(on_stream),
                on_failure: Box::new(on_failure),
            })),
        };

        (waiter, WaiterHandle { cancelled })
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    pub(crate) fn context(&self) -> Option<Rc<dyn Dispatcher>> {
        self.context.clone()
    }

    pub(crate) fn set_metrics_token(&self, token: u64) {
        self.metrics_token.set(Some(token));
    }

    pub(crate) fn take_metrics_token(&self) -> Option<u64> {
        self.metrics_token.take()
    }

    /// Fires `on_connection`, if not already fired. Called at most once, the first time a
    /// stream is created on a connection this waiter caused to be created.
    pub(crate) fn notify_first_connection(&self, conn: &Connection<Io>) {
        if let Some(sinks) = self.sinks.borrow_mut().as_mut() {
            if let Some(cb) = sinks.on_connection.take() {
                cb(conn);
            }
        }
    }

    /// Fires `on_stream` exactly once; a no-op if the waiter was already resolved.
    pub(crate) fn succeed(&self, stream: StreamHandle<Io>) {
        if let Some(sinks) = self.sinks.borrow_mut().take() {
            (sinks.on_stream)(stream);
        }
    }

    /// Fires `on_failure` exactly once; a no-op if the waiter was already resolved.
    pub(crate) fn fail(&self, err: ConnectError) {
        if let Some(sinks) = self.sinks.borrow_mut().take() {
            (sinks.on_failure)(err);
        }
    }

    /// True once either `on_stream` or `on_failure` has fired.
    pub(crate) fn is_resolved(&self) -> bool {
        self.sinks.borrow().is_none()
    }
}
