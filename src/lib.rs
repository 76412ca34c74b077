//! A client-side HTTP connection manager: the pool-and-queue state machine that sits
//! between request-issuing callers and a bounded set of physical connections to remote
//! origins.
//!
//! This crate owns connection admission, protocol-version negotiation and fallback
//! (HTTP/1.x vs HTTP/2, TLS-ALPN or cleartext upgrade), and fair-but-bounded queuing
//! under overload. It does not open sockets, speak TLS, or frame HTTP/1 or HTTP/2 wire
//! traffic — those are external collaborators plugged in through the traits in
//! [`transport`]. Wiring them up, and building/parsing actual requests and responses,
//! is left to callers.
//!
//! The entry point is [`manager::ConnectionManager`]: construct one per process (or
//! per thread, since everything here assumes a single-threaded execution model aside
//! from the channel registry), then call `acquire_for_request`/`acquire_for_upgrade`
//! with a [`waiter::Waiter`] for each caller that wants a connection.

mod config;
mod connection;
mod connector;
mod dispatch;
mod error;
mod key;
mod manager;
mod metrics;
mod pool;
mod queue;
mod registry;
#[cfg(test)]
mod testutil;
mod transport;
mod waiter;

pub use config::{ConnectorConfig, InitialSettings, ProxyOptions, UNBOUNDED};
pub use connection::{ChannelId, Connection, ConnectionIo, StreamHandle};
pub use dispatch::{Dispatcher, LocalDispatcher};
pub use error::ConnectError;
pub use key::OriginKey;
pub use manager::ConnectionManager;
pub use metrics::{EndpointToken, Metrics, NoopMetrics, WaiterToken};
pub use transport::{ChannelProvider, CleartextUpgrade, DialRequest, NegotiatedAlpn, TlsHelper, UpgradeOutcome};
pub use waiter::{HttpVersion, Waiter, WaiterHandle};
