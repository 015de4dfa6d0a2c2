use async_trait::async_trait;
use url::Url;

use super::redirect::{redirect_uri_from_authorization_url, DEFAULT_REDIRECT_URI};
use super::AuthError;

/// Authorization data prepared before an interactive sign-in starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationAttempt {
    authorization_url: Url,
    redirect_uri: Option<String>,
    state: Option<String>,
}

impl AuthorizationAttempt {
    /// Attempt whose redirect URI is read from the authorization URL.
    pub fn new(authorization_url: Url) -> Self {
        Self {
            authorization_url,
            redirect_uri: None,
            state: None,
        }
    }

    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn authorization_url(&self) -> &Url {
        &self.authorization_url
    }

    /// Declared redirect URI, else the `redirect_uri` query parameter, else [`DEFAULT_REDIRECT_URI`].
    pub fn redirect_uri(&self) -> String {
        self.redirect_uri
            .clone()
            .or_else(|| redirect_uri_from_authorization_url(&self.authorization_url))
            .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_owned())
    }

    /// Opaque `state` value the provider echoes back, when known.
    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }
}

/// Token service completing or abandoning an interactive authorization.
#[async_trait]
pub trait AuthenticationService: Send + Sync + 'static {
    type Session: Send + 'static;

    /// Forget the in-flight attempt so it can never be completed.
    async fn abort_login(&self, attempt: &AuthorizationAttempt);

    /// Exchange the provider's redirect for a signed-in session.
    async fn login_with_callback(&self, callback_url: &Url) -> Result<Self::Session, AuthError>;
}
