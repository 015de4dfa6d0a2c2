//! Homeserver → OIDC provider discovery via well-known documents.

mod fetcher;

use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::AppConfig;

pub use fetcher::{HttpFetcher, ReqwestFetcher};

const AUTHENTICATION_KEY: &str = "m.authentication";
const UNSTABLE_AUTHENTICATION_KEY: &str = "org.matrix.msc2965.authentication";

/// Errors raised while walking the discovery documents.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {status} from {url}")]
    HttpStatus { url: Url, status: StatusCode },
    #[error("malformed discovery document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("discovery document is not a JSON object")]
    NotAnObject,
    #[error("homeserver does not advertise an OIDC issuer")]
    MissingIssuer,
    #[error("provider configuration has no end_session_endpoint")]
    MissingEndSessionEndpoint,
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Endpoints advertised by an OIDC provider's configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: Option<Url>,
    pub token_endpoint: Option<Url>,
    pub end_session_endpoint: Option<Url>,
}

/// Resolves a homeserver address to its OIDC provider, one sequential fetch at a time.
#[derive(Clone)]
pub struct DiscoveryResolver {
    fetcher: Arc<dyn HttpFetcher>,
}

impl DiscoveryResolver {
    /// Resolver using `reqwest` with the configured user agent and timeout.
    pub fn new(config: &AppConfig) -> Result<Self, DiscoveryError> {
        let fetcher = ReqwestFetcher::new(&config.ascii_user_agent(), config.discovery_timeout())?;
        Ok(Self::with_fetcher(Arc::new(fetcher)))
    }

    pub fn with_fetcher(fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self { fetcher }
    }

    /// End-session URL for `homeserver`, or `None` if any discovery step fails.
    pub async fn resolve_logout_url(&self, homeserver: &str) -> Option<Url> {
        match self.try_resolve_logout_url(homeserver).await {
            Ok(url) => Some(url),
            Err(err) => {
                warn!(homeserver, error = %err, "failed to resolve end_session_endpoint");
                None
            }
        }
    }

    pub async fn try_resolve_logout_url(&self, homeserver: &str) -> Result<Url, DiscoveryError> {
        let issuer = self.resolve_issuer(homeserver).await?;
        let configuration = self.fetch_openid_configuration(&issuer).await?;
        let endpoint = configuration
            .get("end_session_endpoint")
            .and_then(Value::as_str)
            .ok_or(DiscoveryError::MissingEndSessionEndpoint)?;
        let url = Url::parse(endpoint)?;
        debug!(%url, "found end_session_endpoint");
        Ok(url)
    }

    /// Issuer advertised by the homeserver's client well-known document.
    pub async fn resolve_issuer(&self, homeserver: &str) -> Result<String, DiscoveryError> {
        let domain = normalize_homeserver(homeserver);
        let url = Url::parse(&format!("https://{domain}/.well-known/matrix/client"))?;
        let document = self.fetch_object(&url).await?;
        let issuer = issuer_from_client_well_known(&document).ok_or(DiscoveryError::MissingIssuer)?;
        debug!(%domain, issuer, "discovered OIDC issuer");
        Ok(issuer.to_owned())
    }

    /// Full provider metadata for `homeserver`.
    pub async fn resolve_provider(
        &self,
        homeserver: &str,
    ) -> Result<ProviderMetadata, DiscoveryError> {
        let issuer = self.resolve_issuer(homeserver).await?;
        let configuration = self.fetch_openid_configuration(&issuer).await?;
        Ok(ProviderMetadata {
            authorization_endpoint: endpoint_url(&configuration, "authorization_endpoint"),
            token_endpoint: endpoint_url(&configuration, "token_endpoint"),
            end_session_endpoint: endpoint_url(&configuration, "end_session_endpoint"),
            issuer,
        })
    }

    async fn fetch_openid_configuration(&self, issuer: &str) -> Result<Value, DiscoveryError> {
        let issuer = issuer.strip_suffix('/').unwrap_or(issuer);
        let url = Url::parse(&format!("{issuer}/.well-known/openid-configuration"))?;
        self.fetch_object(&url).await
    }

    async fn fetch_object(&self, url: &Url) -> Result<Value, DiscoveryError> {
        let body = self.fetcher.get(url).await?;
        let document: Value = serde_json::from_slice(&body)?;
        if !document.is_object() {
            return Err(DiscoveryError::NotAnObject);
        }
        Ok(document)
    }
}

/// Endpoint URL under `key`; absent, non-string and unparsable values all read as `None`.
fn endpoint_url(configuration: &Value, key: &str) -> Option<Url> {
    let raw = configuration.get(key)?.as_str()?;
    match Url::parse(raw) {
        Ok(url) => Some(url),
        Err(err) => {
            warn!(key, error = %err, "ignoring invalid provider endpoint");
            None
        }
    }
}

fn issuer_from_client_well_known(document: &Value) -> Option<&str> {
    [AUTHENTICATION_KEY, UNSTABLE_AUTHENTICATION_KEY]
        .into_iter()
        .find_map(|key| document.get(key)?.get("issuer")?.as_str())
}

/// Reduce a homeserver address to a bare domain.
///
/// Accepts full URLs as well as `host`, `host:port` and `scheme://host/path` forms.
pub fn normalize_homeserver(address: &str) -> String {
    let address = address.trim();
    if let Ok(url) = Url::parse(address) {
        if let Some(host) = url.host_str().filter(|host| !host.is_empty()) {
            return host.to_owned();
        }
    }

    let mut domain = address;
    if let Some((_, rest)) = domain.split_once("://") {
        domain = rest;
    }
    if let Some(index) = domain.find('/') {
        domain = &domain[..index];
    }
    if let Some(index) = domain.find(':') {
        domain = &domain[..index];
    }
    domain.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticFetcher;
    use httpmock::prelude::*;

    const CLIENT_WELL_KNOWN: &str = "https://example.org/.well-known/matrix/client";
    const OPENID_CONFIGURATION: &str =
        "https://auth.example.org/.well-known/openid-configuration";

    fn build(fetcher: StaticFetcher) -> (DiscoveryResolver, Arc<StaticFetcher>) {
        let fetcher = Arc::new(fetcher);
        (DiscoveryResolver::with_fetcher(fetcher.clone()), fetcher)
    }

    #[test]
    fn normalizes_homeserver_forms() {
        for input in [
            "example.org",
            "https://example.org",
            "example.org:8448",
            "https://example.org/path",
            "https://example.org:8448/_matrix",
            "matrix://example.org:8448/path",
        ] {
            assert_eq!(normalize_homeserver(input), "example.org", "input {input}");
        }
    }

    #[tokio::test]
    async fn resolves_logout_url_through_both_documents() {
        let (resolver, fetcher) = build(
            StaticFetcher::default()
                .with(
                    CLIENT_WELL_KNOWN,
                    r#"{"m.authentication":{"issuer":"https://auth.example.org/"}}"#,
                )
                .with(
                    OPENID_CONFIGURATION,
                    r#"{"end_session_endpoint":"https://auth.example.org/logout"}"#,
                ),
        );

        let url = resolver.resolve_logout_url("example.org").await;

        assert_eq!(url.unwrap().as_str(), "https://auth.example.org/logout");
        assert_eq!(fetcher.requests(), vec![CLIENT_WELL_KNOWN, OPENID_CONFIGURATION]);
    }

    #[tokio::test]
    async fn falls_back_to_unstable_authentication_key() {
        let (resolver, _) = build(
            StaticFetcher::default()
                .with(
                    CLIENT_WELL_KNOWN,
                    r#"{"org.matrix.msc2965.authentication":{"issuer":"https://auth.example.org"}}"#,
                )
                .with(
                    OPENID_CONFIGURATION,
                    r#"{"end_session_endpoint":"https://auth.example.org/logout"}"#,
                ),
        );

        let url = resolver.resolve_logout_url("https://example.org").await;
        assert_eq!(url.unwrap().as_str(), "https://auth.example.org/logout");
    }

    #[tokio::test]
    async fn missing_authentication_key_skips_second_fetch() {
        let (resolver, fetcher) = build(StaticFetcher::default().with(
            CLIENT_WELL_KNOWN,
            r#"{"m.homeserver":{"base_url":"https://matrix.example.org"}}"#,
        ));

        assert!(resolver.resolve_logout_url("example.org").await.is_none());
        assert_eq!(fetcher.requests(), vec![CLIENT_WELL_KNOWN]);

        let err = resolver
            .try_resolve_logout_url("example.org")
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::MissingIssuer));
    }

    #[tokio::test]
    async fn malformed_or_failed_documents_resolve_to_none() {
        let (resolver, _) = build(StaticFetcher::default().with(CLIENT_WELL_KNOWN, "<html>"));
        assert!(resolver.resolve_logout_url("example.org").await.is_none());

        let (resolver, _) = build(StaticFetcher::default().with(CLIENT_WELL_KNOWN, "[]"));
        assert!(matches!(
            resolver.try_resolve_logout_url("example.org").await,
            Err(DiscoveryError::NotAnObject)
        ));

        let (resolver, fetcher) = build(
            StaticFetcher::default()
                .with(
                    CLIENT_WELL_KNOWN,
                    r#"{"m.authentication":{"issuer":"https://auth.example.org/"}}"#,
                )
                .with_status(OPENID_CONFIGURATION, 500),
        );
        assert!(resolver.resolve_logout_url("example.org").await.is_none());
        assert_eq!(fetcher.requests().len(), 2);
    }

    #[tokio::test]
    async fn missing_or_invalid_end_session_endpoint() {
        let (resolver, _) = build(
            StaticFetcher::default()
                .with(
                    CLIENT_WELL_KNOWN,
                    r#"{"m.authentication":{"issuer":"https://auth.example.org/"}}"#,
                )
                .with(OPENID_CONFIGURATION, r#"{"issuer":"https://auth.example.org/"}"#),
        );
        assert!(matches!(
            resolver.try_resolve_logout_url("example.org").await,
            Err(DiscoveryError::MissingEndSessionEndpoint)
        ));

        let (resolver, _) = build(
            StaticFetcher::default()
                .with(
                    CLIENT_WELL_KNOWN,
                    r#"{"m.authentication":{"issuer":"https://auth.example.org/"}}"#,
                )
                .with(OPENID_CONFIGURATION, r#"{"end_session_endpoint":"not a url"}"#),
        );
        assert!(matches!(
            resolver.try_resolve_logout_url("example.org").await,
            Err(DiscoveryError::Url(_))
        ));
    }

    #[tokio::test]
    async fn provider_metadata_over_http() {
        let server = MockServer::start();
        let issuer = server.base_url();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/.well-known/openid-configuration");
            then.status(200).json_body_obj(&serde_json::json!({
                "issuer": issuer,
                "authorization_endpoint": format!("{issuer}/authorize"),
                "token_endpoint": format!("{issuer}/oauth2/token"),
                "end_session_endpoint": format!("{issuer}/logout"),
            }));
        });

        let fetcher = ReqwestFetcher::new("ketal-test", None).unwrap();
        let resolver = DiscoveryResolver::with_fetcher(Arc::new(fetcher));
        let configuration = resolver
            .fetch_openid_configuration(&format!("{issuer}/"))
            .await
            .unwrap();

        mock.assert();
        assert_eq!(
            configuration["token_endpoint"].as_str(),
            Some(format!("{issuer}/oauth2/token").as_str())
        );
        assert_eq!(
            configuration["end_session_endpoint"].as_str(),
            Some(format!("{issuer}/logout").as_str())
        );
    }

    #[tokio::test]
    async fn resolve_provider_parses_endpoints() {
        let (resolver, _) = build(
            StaticFetcher::default()
                .with(
                    CLIENT_WELL_KNOWN,
                    r#"{"m.authentication":{"issuer":"https://auth.example.org/"}}"#,
                )
                .with(
                    OPENID_CONFIGURATION,
                    r#"{
                        "authorization_endpoint":"https://auth.example.org/authorize",
                        "token_endpoint":"https://auth.example.org/oauth2/token"
                    }"#,
                ),
        );

        let metadata = resolver.resolve_provider("example.org:8448").await.unwrap();
        assert_eq!(metadata.issuer, "https://auth.example.org/");
        assert_eq!(
            metadata.authorization_endpoint.unwrap().as_str(),
            "https://auth.example.org/authorize"
        );
        assert_eq!(
            metadata.token_endpoint.unwrap().as_str(),
            "https://auth.example.org/oauth2/token"
        );
        assert!(metadata.end_session_endpoint.is_none());
    }

    #[tokio::test]
    async fn logout_lookup_ignores_unrelated_malformed_fields() {
        let (resolver, _) = build(
            StaticFetcher::default()
                .with(
                    CLIENT_WELL_KNOWN,
                    r#"{"m.authentication":{"issuer":"https://auth.example.org/"}}"#,
                )
                .with(
                    OPENID_CONFIGURATION,
                    r#"{
                        "end_session_endpoint":"https://auth.example.org/logout",
                        "token_endpoint":["a","b"],
                        "authorization_endpoint":42
                    }"#,
                ),
        );

        let url = resolver.try_resolve_logout_url("example.org").await.unwrap();
        assert_eq!(url.as_str(), "https://auth.example.org/logout");

        let metadata = resolver.resolve_provider("example.org").await.unwrap();
        assert!(metadata.authorization_endpoint.is_none());
        assert!(metadata.token_endpoint.is_none());
        assert_eq!(
            metadata.end_session_endpoint.unwrap().as_str(),
            "https://auth.example.org/logout"
        );
    }

    #[tokio::test]
    async fn non_string_end_session_endpoint_is_missing() {
        let (resolver, _) = build(
            StaticFetcher::default()
                .with(
                    CLIENT_WELL_KNOWN,
                    r#"{"m.authentication":{"issuer":"https://auth.example.org/"}}"#,
                )
                .with(OPENID_CONFIGURATION, r#"{"end_session_endpoint":{"url":"x"}}"#),
        );

        assert!(matches!(
            resolver.try_resolve_logout_url("example.org").await,
            Err(DiscoveryError::MissingEndSessionEndpoint)
        ));
    }
}
