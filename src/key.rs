use std::fmt;

/// Identifies a remote HTTP origin: scheme (TLS or not), port, and peer host.
///
/// Two callers that resolve to the same `OriginKey` share one [`crate::queue::OriginQueue`]
/// and therefore the same pool of physical connections.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OriginKey {
    tls: bool,
    port: u16,
    host: Box<str>,
}

impl OriginKey {
    pub fn new(tls: bool, host: impl Into<Box<str>>, port: u16) -> Self {
        Self {
            tls,
            port,
            host: host.into(),
        }
    }

    pub fn tls(&self) -> bool {
        self.tls
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

impl fmt::Debug for OriginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}:{}",
            if self.tls { "https" } else { "http" },
            self.host,
            self.port
        )
    }
}

impl fmt::Display for OriginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_all_three_fields() {
        let a = OriginKey::new(true, "example.com", 443);
        let b = OriginKey::new(true, "example.com", 443);
        let c = OriginKey::new(false, "example.com", 443);
        let d = OriginKey::new(true, "example.com", 8443);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }
}
