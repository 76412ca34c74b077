use std::time::Duration;

use crate::error::ConnectError;

const DEFAULT_H2_CONN_WINDOW: u32 = 1024 * 1024 * 2; // 2MiB
const DEFAULT_H2_STREAM_WINDOW: u32 = 1024 * 1024; // 1MiB

/// Sentinel meaning "unbounded" for `max_wait_queue_size` and, after clamping,
/// for `http2_multiplexing_limit`.
pub const UNBOUNDED: i64 = -1;

/// Upstream HTTP proxy to dial through instead of the origin directly.
///
/// Plaintext traffic through an HTTP proxy bypasses the proxied channel provider
/// entirely (the request is simply addressed to the proxy by the layer above this
/// core, rather than tunneled) — this config only changes which [`crate::transport::ChannelProvider`]
/// a [`crate::connector::Connector`] picks for TLS origins.
#[derive(Clone, Debug)]
pub struct ProxyOptions {
    pub host: Box<str>,
    pub port: u16,
}

impl ProxyOptions {
    pub fn new(host: impl Into<Box<str>>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

/// H2 SETTINGS advertised during the cleartext (`h2c`) upgrade request.
#[derive(Clone, Copy, Debug, Default)]
pub struct InitialSettings {
    pub header_table_size: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_concurrent_streams: Option<u32>,
}

/// Configuration for a [`crate::manager::ConnectionManager`].
///
/// Built with the same chained-setter idiom as the client crate's `Connector` builder.
#[derive(Clone, Debug)]
pub struct ConnectorConfig {
    pub(crate) keep_alive: bool,
    pub(crate) pipelining: bool,
    pub(crate) pipelining_limit: u32,
    pub(crate) max_pool_size: usize,
    pub(crate) max_wait_queue_size: i64,
    pub(crate) http2_max_pool_size: usize,
    pub(crate) http2_multiplexing_limit: i64,
    pub(crate) http2_connection_window_size: u32,
    pub(crate) http2_stream_window_size: u32,
    pub(crate) http2_clear_text_upgrade: bool,
    pub(crate) use_alpn: bool,
    pub(crate) force_sni: bool,
    pub(crate) try_use_compression: bool,
    pub(crate) log_activity: bool,
    pub(crate) idle_timeout: Duration,
    pub(crate) max_initial_line_length: usize,
    pub(crate) max_header_size: usize,
    pub(crate) max_chunk_size: usize,
    pub(crate) decoder_initial_buffer_size: usize,
    pub(crate) conn_keep_alive: Duration,
    pub(crate) conn_lifetime: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) handshake_timeout: Duration,
    pub(crate) proxy_options: Option<ProxyOptions>,
    pub(crate) initial_settings: InitialSettings,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            keep_alive: true,
            pipelining: false,
            pipelining_limit: 16,
            max_pool_size: 100,
            max_wait_queue_size: UNBOUNDED,
            http2_max_pool_size: 1,
            http2_multiplexing_limit: UNBOUNDED,
            http2_connection_window_size: DEFAULT_H2_CONN_WINDOW,
            http2_stream_window_size: DEFAULT_H2_STREAM_WINDOW,
            http2_clear_text_upgrade: true,
            use_alpn: true,
            force_sni: false,
            try_use_compression: true,
            log_activity: false,
            idle_timeout: Duration::ZERO,
            max_initial_line_length: 4096,
            max_header_size: 8192,
            max_chunk_size: 8192,
            decoder_initial_buffer_size: 8192,
            conn_keep_alive: Duration::from_secs(15),
            conn_lifetime: Duration::from_secs(75),
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            proxy_options: None,
            initial_settings: InitialSettings::default(),
        }
    }
}

impl ConnectorConfig {
    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.keep_alive = enabled;
        self
    }

    pub fn pipelining(mut self, enabled: bool) -> Self {
        self.pipelining = enabled;
        self
    }

    pub fn pipelining_limit(mut self, limit: u32) -> Self {
        self.pipelining_limit = limit;
        self
    }

    pub fn max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Negative ⇒ unbounded.
    pub fn max_wait_queue_size(mut self, size: i64) -> Self {
        self.max_wait_queue_size = size;
        self
    }

    pub fn http2_max_pool_size(mut self, size: usize) -> Self {
        self.http2_max_pool_size = size.max(1);
        self
    }

    /// A value `< 1` is treated as unbounded (use the peer's advertised SETTINGS value);
    /// see DESIGN.md for the reasoning.
    pub fn http2_multiplexing_limit(mut self, limit: i64) -> Self {
        self.http2_multiplexing_limit = limit;
        self
    }

    pub fn http2_connection_window_size(mut self, size: u32) -> Self {
        self.http2_connection_window_size = size;
        self
    }

    pub fn http2_stream_window_size(mut self, size: u32) -> Self {
        self.http2_stream_window_size = size;
        self
    }

    pub fn http2_clear_text_upgrade(mut self, enabled: bool) -> Self {
        self.http2_clear_text_upgrade = enabled;
        self
    }

    pub fn use_alpn(mut self, enabled: bool) -> Self {
        self.use_alpn = enabled;
        self
    }

    pub fn force_sni(mut self, enabled: bool) -> Self {
        self.force_sni = enabled;
        self
    }

    pub fn try_use_compression(mut self, enabled: bool) -> Self {
        self.try_use_compression = enabled;
        self
    }

    pub fn log_activity(mut self, enabled: bool) -> Self {
        self.log_activity = enabled;
        self
    }

    /// `Duration::ZERO` disables the idle sweep.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn max_initial_line_length(mut self, len: usize) -> Self {
        self.max_initial_line_length = len;
        self
    }

    pub fn max_header_size(mut self, len: usize) -> Self {
        self.max_header_size = len;
        self
    }

    pub fn max_chunk_size(mut self, len: usize) -> Self {
        self.max_chunk_size = len;
        self
    }

    pub fn decoder_initial_buffer_size(mut self, len: usize) -> Self {
        self.decoder_initial_buffer_size = len;
        self
    }

    pub fn conn_keep_alive(mut self, dur: Duration) -> Self {
        self.conn_keep_alive = dur;
        self
    }

    pub fn conn_lifetime(mut self, dur: Duration) -> Self {
        self.conn_lifetime = dur;
        self
    }

    pub fn connect_timeout(mut self, dur: Duration) -> Self {
        self.connect_timeout = dur;
        self
    }

    pub fn handshake_timeout(mut self, dur: Duration) -> Self {
        self.handshake_timeout = dur;
        self
    }

    /// Triggers the proxied channel provider for TLS origins; plaintext traffic always
    /// dials direct (see [`ProxyOptions`]).
    pub fn proxy_options(mut self, options: ProxyOptions) -> Self {
        self.proxy_options = Some(options);
        self
    }

    pub fn initial_settings(mut self, settings: InitialSettings) -> Self {
        self.initial_settings = settings;
        self
    }

    /// Rejects the illegal `pipelining && !keep_alive` combination.
    pub fn validate(&self) -> Result<(), ConnectError> {
        if self.pipelining && !self.keep_alive {
            return Err(ConnectError::IllegalConfig);
        }
        Ok(())
    }

    /// The effective per-connection concurrent-stream cap: the configured limit, or
    /// `u32::MAX` (meaning "defer to the peer's advertised SETTINGS value") when the
    /// configured value is `< 1`.
    pub(crate) fn effective_multiplexing_limit(&self) -> u32 {
        if self.http2_multiplexing_limit < 1 {
            u32::MAX
        } else {
            self.http2_multiplexing_limit as u32
        }
    }

    pub(crate) fn wait_queue_is_unbounded(&self) -> bool {
        self.max_wait_queue_size < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipelining_without_keep_alive_is_illegal() {
        let cfg = ConnectorConfig::default().keep_alive(false).pipelining(true);
        assert!(matches!(cfg.validate(), Err(ConnectError::IllegalConfig)));
    }

    #[test]
    fn pipelining_with_keep_alive_is_legal() {
        let cfg = ConnectorConfig::default().keep_alive(true).pipelining(true);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn multiplexing_limit_below_one_means_unbounded() {
        let cfg = ConnectorConfig::default().http2_multiplexing_limit(0);
        assert_eq!(cfg.effective_multiplexing_limit(), u32::MAX);

        let cfg = ConnectorConfig::default().http2_multiplexing_limit(-5);
        assert_eq!(cfg.effective_multiplexing_limit(), u32::MAX);

        let cfg = ConnectorConfig::default().http2_multiplexing_limit(50);
        assert_eq!(cfg.effective_multiplexing_limit(), 50);
    }

    #[test]
    fn proxy_options_defaults_to_none() {
        let cfg = ConnectorConfig::default();
        assert!(cfg.proxy_options.is_none());

        let cfg = cfg.proxy_options(ProxyOptions::new("proxy.local", 3128));
        let proxy = cfg.proxy_options.expect("set via the builder");
        assert_eq!(proxy.host.as_ref(), "proxy.local");
        assert_eq!(proxy.port, 3128);
    }

    #[test]
    fn wait_queue_is_unbounded_matches_the_sentinel() {
        assert!(ConnectorConfig::default().max_wait_queue_size(UNBOUNDED).wait_queue_is_unbounded());
        assert!(!ConnectorConfig::default().max_wait_queue_size(10).wait_queue_is_unbounded());
    }
}
