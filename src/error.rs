use std::io;

use derive_more::{Display, From};

/// Errors that can occur while acquiring a connection/stream from the pool.
///
/// Only terminal, per-waiter failures are represented here. Internal, non-terminal
/// conditions — an H1 connection found dead at delivery time, or
/// an H2 connection whose stream budget raced us to zero — are handled by re-entering
/// [`crate::queue::OriginQueue::acquire`] and never reach the caller as an error.
#[derive(Debug, Display, From)]
#[non_exhaustive]
pub enum ConnectError {
    /// `pipelining` was requested without `keep_alive`; the two are only meaningful together.
    #[display("pipelining requires keep-alive to be enabled")]
    IllegalConfig,

    /// The origin's waiter queue was full and no connection could be created.
    #[display("connection pool for this origin is saturated and the wait queue is full")]
    PoolTooBusy,

    /// The transport failed to establish the underlying channel (dial/DNS/reset).
    #[display("failed to establish connection: {}", _0)]
    Transport(io::Error),

    /// The TLS handshake failed after the channel was dialed.
    #[display("TLS handshake failed: {}", _0)]
    Handshake(Box<dyn std::error::Error + Send + Sync>),

    /// The [`crate::manager::ConnectionManager`] was closed while this waiter was queued
    /// or mid-connect.
    #[display("connection manager was closed")]
    ManagerClosed,
}

impl std::error::Error for ConnectError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(
            ConnectError::PoolTooBusy.to_string(),
            "connection pool for this origin is saturated and the wait queue is full"
        );
        assert_eq!(
            ConnectError::IllegalConfig.to_string(),
            "pipelining requires keep-alive to be enabled"
        );
    }
}
