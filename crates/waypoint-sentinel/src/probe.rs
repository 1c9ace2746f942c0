//! Pulse probes
//!
//! A [`PulseProbe`] performs one synthetic request against a dependency and
//! reports the HTTP status it got back. The watchdog measures latency and
//! applies the timeout itself, so probes stay trivial.

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait PulseProbe: Send + Sync {
    /// Issue one probe request and return its HTTP status code
    async fn probe(&self) -> Result<u16>;
}

#[cfg(feature = "http")]
pub use http::HttpProbe;

#[cfg(feature = "http")]
mod http {
    use super::PulseProbe;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::time::Duration;

    /// GETs a health URL
    #[derive(Debug, Clone)]
    pub struct HttpProbe {
        client: reqwest::Client,
        url: String,
    }

    impl HttpProbe {
        pub fn new(url: impl Into<String>) -> Result<Self> {
            Self::with_timeout(url, Duration::from_secs(10))
        }

        pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
            let client = reqwest::Client::builder().timeout(timeout).build()?;
            Ok(Self {
                client,
                url: url.into(),
            })
        }

        pub fn url(&self) -> &str {
            &self.url
        }
    }

    #[async_trait]
    impl PulseProbe for HttpProbe {
        async fn probe(&self) -> Result<u16> {
            let response = self.client.get(&self.url).send().await?;
            Ok(response.status().as_u16())
        }
    }
}
