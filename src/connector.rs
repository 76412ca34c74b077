//! Drives a single connection attempt: dial, optionally negotiate, and report the
//! outcome back to the owning queue. Modeled as a small state machine —
//! `Dialing -> TlsHandshake | CleartextUpgrade -> Bound | Failed` — rather than a deep
//! nest of captured closures.

use std::rc::Rc;

use crate::{
    config::ConnectorConfig,
    connection::ConnectionIo,
    error::ConnectError,
    key::OriginKey,
    transport::{ChannelProvider, CleartextUpgrade, DialRequest, NegotiatedAlpn, TlsHelper, UpgradeOutcome},
    waiter::{HttpVersion, Waiter},
};

/// What a single attempt needs to know about the connection it is trying to establish.
pub(crate) struct ConnectAttempt {
    pub(crate) origin: OriginKey,
    pub(crate) version: HttpVersion,
}

/// Receiver side of a connect attempt: whatever the queue looks like from the
/// connector's point of view. Implemented by [`crate::queue::OriginQueue`]; kept as a
/// trait here so this module doesn't need to know the queue's internals.
pub(crate) trait ConnectSink<Io: ConnectionIo>: Clone + 'static {
    fn on_handshake_success_tls(&self, waiter: Waiter<Io>, channel: Io, negotiated: NegotiatedAlpn);
    fn on_handshake_failure(&self, waiter: Waiter<Io>, cause: ConnectError);
    fn on_negotiated_h2(&self, waiter: Waiter<Io>, channel: Io);
    fn on_cleartext_upgrade_refused(&self, waiter: Waiter<Io>, channel: Io);
    fn on_plain_bind(&self, waiter: Waiter<Io>, channel: Io, version: HttpVersion);
}

/// Builds channels and drives TLS/ALPN or cleartext `h2c` upgrade, reporting the
/// outcome back into the origin's queue. Holds both a direct and a (optional) proxied
/// [`ChannelProvider`] and decides between them per attempt from `proxy_options`:
/// plaintext targets always dial direct (an HTTP proxy forwards a plaintext request by
/// address, not by tunnel — that rewrite happens above this layer), TLS targets go
/// through the proxied provider when one is configured.
pub(crate) struct Connector<Io: ConnectionIo> {
    direct_channel_provider: Rc<dyn ChannelProvider<Io>>,
    proxied_channel_provider: Option<Rc<dyn ChannelProvider<Io>>>,
    tls_helper: Option<Rc<dyn TlsHelper<Io>>>,
    cleartext_upgrade: Option<Rc<dyn CleartextUpgrade<Io>>>,
    config: Rc<ConnectorConfig>,
}

impl<Io: ConnectionIo> Connector<Io> {
    pub(crate) fn new(
        direct_channel_provider: Rc<dyn ChannelProvider<Io>>,
        proxied_channel_provider: Option<Rc<dyn ChannelProvider<Io>>>,
        tls_helper: Option<Rc<dyn TlsHelper<Io>>>,
        cleartext_upgrade: Option<Rc<dyn CleartextUpgrade<Io>>>,
        config: Rc<ConnectorConfig>,
    ) -> Self {
        Self {
            direct_channel_provider,
            proxied_channel_provider,
            tls_helper,
            cleartext_upgrade,
            config,
        }
    }

    /// Picks direct vs. proxied: TLS origins go through the proxied provider when
    /// `proxy_options` is set; plaintext always dials direct.
    fn channel_provider_for(&self, tls: bool) -> Rc<dyn ChannelProvider<Io>> {
        if tls {
            if let Some(proxied) = &self.proxied_channel_provider {
                if self.config.proxy_options.is_some() {
                    return proxied.clone();
                }
            }
        }
        self.direct_channel_provider.clone()
    }

    /// Spawns the attempt and returns its [`actix_rt::task::JoinHandle`] so the owning
    /// queue can await it during a graceful shutdown.
    pub(crate) fn connect<Sink: ConnectSink<Io>>(
        &self,
        attempt: ConnectAttempt,
        sink: Sink,
        waiter: Waiter<Io>,
    ) -> actix_rt::task::JoinHandle<()> {
        let dial_req = DialRequest {
            host: Rc::from(attempt.origin.host()),
            port: attempt.origin.port(),
            tls: attempt.origin.tls(),
            force_sni: self.config.force_sni,
            initial_settings: self.config.initial_settings,
        };
        let version = attempt.version;
        let use_upgrade = self.config.http2_clear_text_upgrade;
        let channel_provider = self.channel_provider_for(dial_req.tls);
        let tls_helper = self.tls_helper.clone();
        let cleartext_upgrade = self.cleartext_upgrade.clone();

        log::trace!("dialing {}:{} (tls={})", dial_req.host, dial_req.port, dial_req.tls);

        actix_rt::spawn(async move {
            let channel = match channel_provider.connect(dial_req.clone()).await {
                Ok(io) => io,
                Err(e) => {
                    log::debug!("dial to {}:{} failed: {}", dial_req.host, dial_req.port, e);
                    sink.on_handshake_failure(waiter, e);
                    return;
                }
            };

            if dial_req.tls {
                let Some(helper) = tls_helper else {
                    sink.on_handshake_failure(waiter, ConnectError::IllegalConfig);
                    return;
                };
                match helper.handshake(channel, &dial_req).await {
                    Ok((io, alpn)) => sink.on_handshake_success_tls(waiter, io, alpn),
                    Err(e) => sink.on_handshake_failure(waiter, e),
                }
                return;
            }

            if version == HttpVersion::H2 && use_upgrade {
                if let Some(upgrade) = cleartext_upgrade {
                    match upgrade.attempt(channel, &dial_req).await {
                        Ok(UpgradeOutcome::Upgraded(io)) => sink.on_negotiated_h2(waiter, io),
                        Ok(UpgradeOutcome::Refused(io)) => sink.on_cleartext_upgrade_refused(waiter, io),
                        Err(e) => sink.on_handshake_failure(waiter, e),
                    }
                    return;
                }
            }

            sink.on_plain_bind(waiter, channel, version);
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use futures_core::future::LocalBoxFuture;

    use super::*;
    use crate::{config::ProxyOptions, key::OriginKey, testutil::PendingIo};

    struct RecordingProvider {
        called: Rc<Cell<bool>>,
        alive: Rc<Cell<u32>>,
    }

    impl ChannelProvider<PendingIo> for RecordingProvider {
        fn connect(&self, _req: DialRequest) -> LocalBoxFuture<'static, Result<PendingIo, ConnectError>> {
            self.called.set(true);
            let io = PendingIo::new(self.alive.clone());
            Box::pin(async move { Ok(io) })
        }
    }

    #[derive(Clone)]
    struct DiscardingSink;

    impl ConnectSink<PendingIo> for DiscardingSink {
        fn on_handshake_success_tls(&self, waiter: Waiter<PendingIo>, _channel: PendingIo, _negotiated: NegotiatedAlpn) {
            waiter.fail(ConnectError::IllegalConfig);
        }
        fn on_handshake_failure(&self, waiter: Waiter<PendingIo>, cause: ConnectError) {
            waiter.fail(cause);
        }
        fn on_negotiated_h2(&self, waiter: Waiter<PendingIo>, _channel: PendingIo) {
            waiter.fail(ConnectError::IllegalConfig);
        }
        fn on_cleartext_upgrade_refused(&self, waiter: Waiter<PendingIo>, _channel: PendingIo) {
            waiter.fail(ConnectError::IllegalConfig);
        }
        fn on_plain_bind(&self, waiter: Waiter<PendingIo>, _channel: PendingIo, _version: HttpVersion) {
            waiter.fail(ConnectError::IllegalConfig);
        }
    }

    fn attempt(tls: bool) -> ConnectAttempt {
        ConnectAttempt {
            origin: OriginKey::new(tls, "example.com", if tls { 443 } else { 80 }),
            version: HttpVersion::Http11,
        }
    }

    #[actix_rt::test]
    async fn tls_attempt_with_proxy_options_uses_proxied_provider() {
        let alive = Rc::new(Cell::new(0));
        let direct_called = Rc::new(Cell::new(false));
        let proxied_called = Rc::new(Cell::new(false));
        let direct = Rc::new(RecordingProvider { called: direct_called.clone(), alive: alive.clone() });
        let proxied = Rc::new(RecordingProvider { called: proxied_called.clone(), alive });

        let config = Rc::new(ConnectorConfig::default().proxy_options(ProxyOptions::new("proxy.local", 3128)));
        let connector = Connector::new(direct, Some(proxied), None, None, config);

        let (waiter, _h) = Waiter::new(None, None, |_c| {}, |_s| {}, |_e| {});
        let handle = connector.connect(attempt(true), DiscardingSink, waiter);
        let _ = handle.await;

        assert!(proxied_called.get(), "a TLS origin with proxy_options configured dials through the proxied provider");
        assert!(!direct_called.get());
    }

    #[actix_rt::test]
    async fn plaintext_attempt_always_uses_direct_provider() {
        let alive = Rc::new(Cell::new(0));
        let direct_called = Rc::new(Cell::new(false));
        let proxied_called = Rc::new(Cell::new(false));
        let direct = Rc::new(RecordingProvider { called: direct_called.clone(), alive: alive.clone() });
        let proxied = Rc::new(RecordingProvider { called: proxied_called.clone(), alive });

        let config = Rc::new(ConnectorConfig::default().proxy_options(ProxyOptions::new("proxy.local", 3128)));
        let connector = Connector::new(direct, Some(proxied), None, None, config);

        let (waiter, _h) = Waiter::new(None, None, |_c| {}, |_s| {}, |_e| {});
        let handle = connector.connect(attempt(false), DiscardingSink, waiter);
        let _ = handle.await;

        assert!(direct_called.get(), "plaintext always dials direct, even with proxy_options configured");
        assert!(!proxied_called.get());
    }
}
