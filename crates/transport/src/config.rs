pub const DEFAULT_TOR_SOCKS_ADDR: &str = "127.0.0.1:9050";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Clone, Debug)]
pub struct Config {
    /// SOCKS5 proxy address; `None` sends requests directly
    pub socks_addr: Option<String>,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socks_addr: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Route everything through the local Tor daemon.
    pub fn tor() -> Self {
        Self::default().with_socks_addr(DEFAULT_TOR_SOCKS_ADDR)
    }

    pub fn direct() -> Self {
        Self::default()
    }

    pub fn with_socks_addr(mut self, addr: &str) -> Self {
        self.socks_addr = Some(addr.to_string());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn is_proxied(&self) -> bool {
        self.socks_addr.is_some()
    }

    /// `socks5h` so hostnames are resolved by the proxy, not locally.
    pub fn proxy_url(&self) -> Option<String> {
        self.socks_addr
            .as_ref()
            .map(|addr| format!("socks5h://{}", addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_direct() {
        let config = Config::default();
        assert!(!config.is_proxied());
        assert_eq!(config.proxy_url(), None);
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_tor_uses_remote_dns() {
        let config = Config::tor().with_timeout(5);
        assert!(config.is_proxied());
        assert_eq!(
            config.proxy_url().as_deref(),
            Some("socks5h://127.0.0.1:9050")
        );
        assert_eq!(config.timeout_secs, 5);
    }
}
