use reqwest::StatusCode;
use thiserror::Error;

/// Errors surfaced by authentication routines and the token service.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token endpoint error {status}: {body}")]
    TokenEndpoint { status: StatusCode, body: String },
    #[error("invalid token type '{0}'")]
    InvalidTokenType(String),
    #[error(transparent)]
    Oidc(#[from] OidcError),
    #[error("input closed before a callback URL was provided")]
    InputClosed,
}

impl AuthError {
    /// Whether the error represents the user backing out of the authorization.
    pub fn is_user_cancellation(&self) -> bool {
        matches!(self, AuthError::Oidc(OidcError::UserCancellation))
    }
}

/// Protocol-level failures reported while completing an OIDC authorization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OidcError {
    #[error("authorization cancelled by the user")]
    UserCancellation,
    #[error("authorization request denied ({0})")]
    AccessDenied(String),
    #[error("authorization response missing code parameter")]
    MissingAuthorizationCode,
    #[error("authorization state mismatch")]
    StateMismatch,
    #[error("no authorization attempt is in progress")]
    NoPendingAuthorization,
}
