use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::pkce::{random_state, PkcePair};
use super::{AuthError, AuthenticationService, AuthorizationAttempt, OidcError, UserSession};
use crate::config::{AppConfig, ConfigError};
use crate::discovery::ProviderMetadata;

const TOKEN_TIMEOUT: StdDuration = StdDuration::from_secs(30);
const STATE_LEN: usize = 32;

/// Client registration used for the authorization code grant.
#[derive(Debug, Clone)]
pub struct OidcClientConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl OidcClientConfig {
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scopes: vec![],
        }
    }

    pub fn from_app_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let client_id = config
            .client_id
            .clone()
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "client_id",
                reason: "no OIDC client id configured".into(),
            })?;
        Ok(Self::new(client_id, config.default_redirect_uri.clone())
            .with_scopes(config.scopes.iter().cloned()))
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }
}

/// Provider endpoints needed for the authorization code grant.
#[derive(Debug, Clone)]
pub struct OidcEndpoints {
    pub authorization_url: Url,
    pub token_url: Url,
}

impl OidcEndpoints {
    pub fn from_metadata(metadata: &ProviderMetadata) -> Option<Self> {
        Some(Self {
            authorization_url: metadata.authorization_endpoint.clone()?,
            token_url: metadata.token_endpoint.clone()?,
        })
    }
}

struct PendingAuthorization {
    state: String,
    pkce: PkcePair,
}

/// [`AuthenticationService`] performing the PKCE authorization code grant.
pub struct OidcTokenService {
    http: Client,
    config: OidcClientConfig,
    endpoints: OidcEndpoints,
    pending: Mutex<Option<PendingAuthorization>>,
}

impl OidcTokenService {
    pub fn new(
        config: OidcClientConfig,
        endpoints: OidcEndpoints,
        user_agent: &str,
    ) -> Result<Self, AuthError> {
        let http = Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            http,
            config,
            endpoints,
            pending: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &OidcClientConfig {
        &self.config
    }

    /// Prepare a new attempt, replacing any attempt still pending.
    pub fn start_authorization(&self) -> AuthorizationAttempt {
        let pkce = PkcePair::generate();
        let state = random_state(STATE_LEN);
        let url = self.authorization_url(&pkce, &state);
        *self.pending.lock() = Some(PendingAuthorization {
            state: state.clone(),
            pkce,
        });
        AuthorizationAttempt::new(url)
            .with_redirect_uri(self.config.redirect_uri.clone())
            .with_state(state)
    }

    fn authorization_url(&self, pkce: &PkcePair, state: &str) -> Url {
        let mut url = self.endpoints.authorization_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("response_type", "code");
            pairs.append_pair("client_id", &self.config.client_id);
            pairs.append_pair("redirect_uri", &self.config.redirect_uri);
            if !self.config.scopes.is_empty() {
                pairs.append_pair("scope", &self.config.scopes.join(" "));
            }
            pairs.append_pair("code_challenge", pkce.challenge());
            pairs.append_pair("code_challenge_method", PkcePair::METHOD);
            pairs.append_pair("state", state);
        }
        url
    }

    fn take_pending(&self) -> Option<PendingAuthorization> {
        self.pending.lock().take()
    }

    /// Drop the pending attempt unless it belongs to a newer authorization.
    fn discard_pending(&self, state: Option<&str>) {
        let mut pending = self.pending.lock();
        let matches = match (pending.as_ref(), state) {
            (Some(current), Some(state)) => current.state == state,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if matches {
            debug!("discarding pending OIDC authorization");
            *pending = None;
        }
    }

    async fn exchange_code(&self, code: &str, pkce: &PkcePair) -> Result<UserSession, AuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", pkce.verifier()),
            ("client_id", self.config.client_id.as_str()),
        ];

        let response = self
            .http
            .post(self.endpoints.token_url.clone())
            .form(&form)
            .timeout(TOKEN_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        let received_at = Utc::now();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpoint { status, body });
        }

        let payload: TokenResponse = response.json().await?;
        payload.into_session(received_at)
    }
}

#[async_trait]
impl AuthenticationService for OidcTokenService {
    type Session = UserSession;

    async fn abort_login(&self, attempt: &AuthorizationAttempt) {
        self.discard_pending(attempt.state());
    }

    async fn login_with_callback(&self, callback_url: &Url) -> Result<UserSession, AuthError> {
        let pending = self.take_pending().ok_or(OidcError::NoPendingAuthorization)?;
        let response = CallbackResponse::parse(callback_url)?;
        if response.state.as_deref() != Some(pending.state.as_str()) {
            return Err(OidcError::StateMismatch.into());
        }
        let session = self.exchange_code(&response.code, &pending.pkce).await?;
        info!(expires_at = ?session.expires_at, "OIDC token exchange completed");
        Ok(session)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CallbackResponse {
    code: String,
    state: Option<String>,
}

impl CallbackResponse {
    fn parse(url: &Url) -> Result<Self, OidcError> {
        let mut code = None;
        let mut state = None;
        let mut error = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                _ => {}
            }
        }

        match error.as_deref() {
            Some("access_denied") => return Err(OidcError::UserCancellation),
            Some(other) => return Err(OidcError::AccessDenied(other.to_owned())),
            None => {}
        }

        let code = code.ok_or(OidcError::MissingAuthorizationCode)?;
        Ok(Self { code, state })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    token_type: String,
    expires_in: Option<i64>,
    scope: Option<String>,
}

impl TokenResponse {
    fn into_session(self, received_at: DateTime<Utc>) -> Result<UserSession, AuthError> {
        if !self.token_type.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::InvalidTokenType(self.token_type));
        }

        let expires_at = self
            .expires_in
            .map(|seconds| received_at + Duration::seconds(seconds));

        let scope = self
            .scope
            .unwrap_or_default()
            .split_whitespace()
            .map(ToOwned::to_owned)
            .collect();

        Ok(UserSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            id_token: self.id_token,
            expires_at,
            scope,
            created_at: received_at,
        })
    }
}
