//! Reachability probes

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::normalize_http_url;
use crate::error::{Error, Result};

/// Reports whether the remote store can currently be reached.
///
/// Never fails: any internal error counts as offline.
#[allow(async_fn_in_trait)]
pub trait ReachabilityProbe {
    async fn is_online(&self) -> bool;
}

/// Probe with a manually switched answer. Clones share the switch.
#[derive(Debug, Clone)]
pub struct StaticProbe {
    online: Arc<AtomicBool>,
}

impl StaticProbe {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl ReachabilityProbe for StaticProbe {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Probe that sends a `HEAD` request and treats any HTTP answer as online.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = normalize_http_url(&url.into())?
            .ok_or_else(|| Error::Config("probe_url must not be empty".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build probe HTTP client: {e}")))?;

        Ok(Self { url, client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ReachabilityProbe for HttpProbe {
    async fn is_online(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => {
                tracing::debug!("Probe {} answered {}", self.url, response.status());
                true
            }
            Err(error) => {
                tracing::debug!("Probe {} failed: {error}", self.url);
                false
            }
        }
    }
}

impl<P: ReachabilityProbe + ?Sized> ReachabilityProbe for Arc<P> {
    async fn is_online(&self) -> bool {
        (**self).is_online().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_static_probe_toggles() {
        let probe = StaticProbe::offline();
        let handle = probe.clone();
        assert!(!probe.is_online().await);

        handle.set_online(true);
        assert!(probe.is_online().await);
    }

    #[test]
    fn test_http_probe_rejects_invalid_urls() {
        assert!(HttpProbe::new("", Duration::from_secs(1)).is_err());
        assert!(HttpProbe::new("example.com", Duration::from_secs(1)).is_err());
        assert!(HttpProbe::new(" https://example.com ", Duration::from_secs(1))
            .is_ok_and(|probe| probe.url() == "https://example.com"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_probe_unreachable_host_is_offline() {
        // Port 9 (discard) on localhost is closed in test environments
        let probe = HttpProbe::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert!(!probe.is_online().await);
    }
}
