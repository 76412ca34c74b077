//! Top-level registry of origin queues, partitioned by usage class.

use std::{collections::HashMap, rc::Rc};

use crate::{
    config::ConnectorConfig,
    connection::ConnectionIo,
    connector::Connector,
    dispatch::{default_context, Dispatcher},
    error::ConnectError,
    key::OriginKey,
    metrics::Metrics,
    queue::OriginQueue,
    registry::ChannelRegistry,
    transport::{ChannelProvider, CleartextUpgrade, TlsHelper},
    waiter::{HttpVersion, Waiter},
};

/// Which of the two independent connection populations a waiter belongs to.
///
/// Upgrade-style traffic pins HTTP/1.1 and must not interfere with request-level
/// pools that may be HTTP/2 — hence two registries rather than one keyed by
/// `(OriginKey, Usage)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Usage {
    Request,
    Upgrade,
}

struct Registry<Io: ConnectionIo> {
    queues: HashMap<OriginKey, OriginQueue<Io>>,
}

impl<Io: ConnectionIo> Default for Registry<Io> {
    fn default() -> Self {
        Self { queues: HashMap::new() }
    }
}

/// Holds `request_registry` and `upgrade_registry`, each a map from [`OriginKey`] to
/// [`OriginQueue`]. Entry point for callers: [`ConnectionManager::acquire_for_request`]
/// and [`ConnectionManager::acquire_for_upgrade`].
pub struct ConnectionManager<Io: ConnectionIo> {
    config: Rc<ConnectorConfig>,
    metrics: Rc<dyn Metrics>,
    registry: Rc<ChannelRegistry>,
    connector: Rc<Connector<Io>>,
    default_context: Rc<dyn Dispatcher>,
    request_registry: Rc<std::cell::RefCell<Registry<Io>>>,
    upgrade_registry: Rc<std::cell::RefCell<Registry<Io>>>,
    closed: std::cell::Cell<bool>,
}

impl<Io: ConnectionIo> ConnectionManager<Io> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConnectorConfig,
        metrics: Rc<dyn Metrics>,
        channel_provider: Rc<dyn ChannelProvider<Io>>,
        proxied_channel_provider: Option<Rc<dyn ChannelProvider<Io>>>,
        tls_helper: Option<Rc<dyn TlsHelper<Io>>>,
        cleartext_upgrade: Option<Rc<dyn CleartextUpgrade<Io>>>,
    ) -> Result<Self, ConnectError> {
        config.validate()?;
        let config = Rc::new(config);
        let connector = Rc::new(Connector::new(
            channel_provider,
            proxied_channel_provider,
            tls_helper,
            cleartext_upgrade,
            config.clone(),
        ));
        Ok(Self {
            config,
            metrics,
            registry: ChannelRegistry::new(),
            connector,
            default_context: default_context(),
            request_registry: Rc::new(std::cell::RefCell::new(Registry::default())),
            upgrade_registry: Rc::new(std::cell::RefCell::new(Registry::default())),
            closed: std::cell::Cell::new(false),
        })
    }

    fn get_or_create(
        &self,
        usage: Usage,
        key: OriginKey,
        version: HttpVersion,
    ) -> OriginQueue<Io> {
        let registry = match usage {
            Usage::Request => &self.request_registry,
            Usage::Upgrade => &self.upgrade_registry,
        };

        if let Some(queue) = registry.borrow().queues.get(&key) {
            return queue.clone();
        }

        let registry_for_removal = registry.clone();
        let key_for_removal = key.clone();
        let queue = OriginQueue::new(
            key.clone(),
            version,
            self.config.clone(),
            self.metrics.clone(),
            self.registry.clone(),
            self.connector.clone(),
            self.default_context.clone(),
            Box::new(move |_k| {
                registry_for_removal.borrow_mut().queues.remove(&key_for_removal);
            }),
        );
        registry.borrow_mut().queues.insert(key, queue.clone());
        queue
    }

    /// Acquires a connection for a request-level exchange, creating the origin's queue
    /// on first use.
    pub fn acquire_for_request(
        &self,
        version: HttpVersion,
        tls: bool,
        host: impl Into<Box<str>>,
        port: u16,
        waiter: Waiter<Io>,
    ) {
        if self.config.pipelining && !self.config.keep_alive {
            waiter.fail(ConnectError::IllegalConfig);
            return;
        }
        if self.closed.get() {
            waiter.fail(ConnectError::ManagerClosed);
            return;
        }
        let key = OriginKey::new(tls, host, port);
        let queue = self.get_or_create(Usage::Request, key, version);
        queue.acquire(waiter);
    }

    /// Acquires a connection for a protocol upgrade. Always HTTP/1.1: upgrade traffic
    /// never shares a pool with request-level HTTP/2 connections.
    pub fn acquire_for_upgrade(&self, tls: bool, host: impl Into<Box<str>>, port: u16, waiter: Waiter<Io>) {
        if self.closed.get() {
            waiter.fail(ConnectError::ManagerClosed);
            return;
        }
        let key = OriginKey::new(tls, host, port);
        let queue = self.get_or_create(Usage::Upgrade, key, HttpVersion::Http11);
        queue.acquire(waiter);
    }

    /// Closes every queue in both registries, then the metrics collaborator. Resolves
    /// only once every queue has drained its in-flight connection-creation attempts.
    pub async fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        log::info!("connection manager closing");
        for registry in [&self.request_registry, &self.upgrade_registry] {
            let queues: Vec<_> = registry.borrow().queues.values().cloned().collect();
            for queue in queues {
                queue.close().await;
            }
            registry.borrow_mut().queues.clear();
        }
        self.metrics.close();
    }
}
