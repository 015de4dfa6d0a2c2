use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::DiscoveryError;

/// Minimal HTTP capability needed for discovery: a GET returning the body.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Fetch `url`; any status other than 2xx is an error.
    async fn get(&self, url: &Url) -> Result<Vec<u8>, DiscoveryError>;
}

/// [`HttpFetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    http: Client,
    timeout: Option<Duration>,
}

impl ReqwestFetcher {
    pub fn new(user_agent: &str, timeout: Option<Duration>) -> Result<Self, DiscoveryError> {
        let http = Client::builder().user_agent(user_agent).build()?;
        Ok(Self { http, timeout })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, url: &Url) -> Result<Vec<u8>, DiscoveryError> {
        let mut request = self.http.get(url.clone());
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DiscoveryError::HttpStatus {
                url: url.clone(),
                status,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}
