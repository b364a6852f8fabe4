//! Configuration for the dispatcher

use std::time::Duration;

/// Standing configuration applied to every request the dispatcher handles.
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// Headers appended to each request, raw `"name: value"` per line.
    ///
    /// These win name conflicts with per-request headers.
    pub append_headers: Option<String>,

    /// Proxy base URL. When set, every outgoing URL is rewritten to
    /// `proxy + url` (with the original URL percent-encoded when
    /// [`proxy_encode_url`](Self::proxy_encode_url) is set, for proxies that
    /// take the target as a query parameter, e.g. `https://proxy.com/?url=`).
    pub proxy: Option<String>,

    /// Percent-encode the request URL before appending it to the proxy URL.
    pub proxy_encode_url: bool,

    /// User agent for the shared HTTP client.
    pub user_agent: Option<String>,

    /// Client-wide default timeout. Per-request timeouts override this.
    pub default_timeout: Option<Duration>,
}

impl DispatcherConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the appended header block.
    pub fn append_headers(mut self, headers: impl Into<String>) -> Self {
        self.append_headers = Some(headers.into());
        self
    }

    /// Set the proxy base URL and whether to percent-encode target URLs.
    pub fn proxy(mut self, proxy: impl Into<String>, encode_url: bool) -> Self {
        self.proxy = Some(proxy.into());
        self.proxy_encode_url = encode_url;
        self
    }

    /// Set the client user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the client-wide default timeout.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }
}
