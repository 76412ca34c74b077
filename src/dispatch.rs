//! Execution-context abstraction.
//!
//! Delivery to a waiter, and all I/O callbacks for a connection, must always happen on
//! the connection's owning execution context rather than synchronously in whichever
//! task happens to call into the queue. A `Dispatcher` models that context: it's the
//! thing a [`crate::queue::OriginQueue`] hops to before invoking user code.

use std::rc::Rc;

/// Something that can run a boxed closure on its owning context.
///
/// The default implementation spawns onto the local `actix_rt` task system, which is
/// itself a single-threaded-per-arbiter executor — the same model the client crate
/// assumes for its connection pool.
pub trait Dispatcher: 'static {
    fn dispatch(&self, job: Box<dyn FnOnce() + 'static>);
}

/// Dispatcher that runs jobs on a freshly spawned local task.
#[derive(Clone, Copy, Default)]
pub struct LocalDispatcher;

impl Dispatcher for LocalDispatcher {
    fn dispatch(&self, job: Box<dyn FnOnce() + 'static>) {
        actix_rt::spawn(async move { job() });
    }
}

pub(crate) fn default_context() -> Rc<dyn Dispatcher> {
    Rc::new(LocalDispatcher)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[actix_rt::test]
    async fn dispatch_runs_job_on_a_spawned_task() {
        let ran = Rc::new(Cell::new(false));
        let ran2 = ran.clone();

        let dispatcher = default_context();
        dispatcher.dispatch(Box::new(move || ran2.set(true)));

        actix_rt::task::yield_now().await;
        assert!(ran.get());
    }
}
