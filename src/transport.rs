//! External collaborator interfaces consumed by [`crate::connector::Connector`].
//! The transport library, TLS engine, and proxy logic are out of scope — these traits
//! are the seams the core calls through.

use std::rc::Rc;

use futures_core::future::LocalBoxFuture;

use crate::{config::InitialSettings, connection::ConnectionIo, error::ConnectError};

/// What the connector asks a collaborator to dial.
#[derive(Debug, Clone)]
pub struct DialRequest {
    pub host: Rc<str>,
    pub port: u16,
    pub tls: bool,
    pub force_sni: bool,
    /// H2 SETTINGS to advertise; only meaningful to a [`CleartextUpgrade`] collaborator
    /// building the upgrade request.
    pub initial_settings: InitialSettings,
}

/// Outcome of ALPN negotiation during a TLS handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatedAlpn {
    H2,
    Http11,
}

/// Outcome of attempting the `h2c` cleartext upgrade dance.
pub enum UpgradeOutcome<Io> {
    /// Server replied `101 Switching Protocols`; the channel now speaks H2.
    Upgraded(Io),
    /// Server replied with a normal (non-101) HTTP/1.1 response; fall back to H1 on
    /// the same channel. Not an error.
    Refused(Io),
}

/// Dials a raw channel to a `(host, port)`. Two implementations are expected in a real
/// deployment: direct and proxied — both are the caller's concern, not the core's.
/// [`crate::connector::Connector`] holds one of each and picks between them per attempt
/// based on `proxy_options` and whether the target is TLS.
pub trait ChannelProvider<Io: ConnectionIo>: 'static {
    fn connect(&self, req: DialRequest) -> LocalBoxFuture<'static, Result<Io, ConnectError>>;
}

/// Drives the TLS handshake over an already-dialed channel and reports the ALPN
/// outcome. The TLS engine itself (OpenSSL/rustls/etc.) is an external collaborator;
/// this trait is the seam.
pub trait TlsHelper<Io: ConnectionIo>: 'static {
    fn handshake(
        &self,
        io: Io,
        req: &DialRequest,
    ) -> LocalBoxFuture<'static, Result<(Io, NegotiatedAlpn), ConnectError>>;
}

/// Drives the cleartext `h2c` upgrade request/response over an already-dialed,
/// plaintext channel.
pub trait CleartextUpgrade<Io: ConnectionIo>: 'static {
    fn attempt(
        &self,
        io: Io,
        req: &DialRequest,
    ) -> LocalBoxFuture<'static, Result<UpgradeOutcome<Io>, ConnectError>>;
}
