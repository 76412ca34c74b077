//! The channel→connection registry: the one structure in this crate that is touched
//! from arbitrary threads rather than from a connection's own execution context.
//!
//! External callbacks — an idle-timeout sweep, a socket error reported on whatever
//! thread owns the underlying transport — report a closed channel here by id. A queue
//! listens locally (on the connection's context) for that notification and reacts by
//! tearing the connection down. Grounded on the same reasoning as `parking_lot::Mutex`
//! usage elsewhere in the client crate: cheap, uncontended, non-async-aware locking
//! around a plain map.

use std::{collections::HashMap, rc::Rc};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::connection::ChannelId;

#[derive(Default)]
pub(crate) struct ChannelRegistry {
    senders: Mutex<HashMap<ChannelId, UnboundedSender<()>>>,
}

impl ChannelRegistry {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Registers a channel and returns the receiving half of its close notification.
    pub(crate) fn register(&self, id: ChannelId) -> UnboundedReceiver<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().insert(id, tx);
        rx
    }

    /// Reports that a channel closed. A no-op if nobody (or nobody still) is listening.
    pub(crate) fn notify_closed(&self, id: ChannelId) {
        if let Some(tx) = self.senders.lock().get(&id) {
            let _ = tx.send(());
        }
    }

    pub(crate) fn unregister(&self, id: ChannelId) {
        self.senders.lock().remove(&id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.senders.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn notify_closed_wakes_the_registered_receiver() {
        let registry = ChannelRegistry::new();
        let id = crate::connection::ChannelId::next();
        let mut rx = registry.register(id);
        assert_eq!(registry.len(), 1);

        registry.notify_closed(id);
        assert!(rx.recv().await.is_some());

        registry.unregister(id);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn notify_on_unknown_channel_is_a_no_op() {
        let registry = ChannelRegistry::new();
        registry.notify_closed(crate::connection::ChannelId::next());
    }
}
