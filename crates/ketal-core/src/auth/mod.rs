mod bridge;
mod browser;
mod error;
mod indicator;
mod manual;
mod oidc;
mod pkce;
mod redirect;
mod service;
mod session;
mod sign_in;
mod sign_out;

pub use bridge::ResultSlot;
pub use browser::{
    BrowserSession, BrowserSessionProvider, BrowserSessionRequest, CompletionHandler,
    SessionError, SessionErrorCode, SESSION_ERROR_DOMAIN, USER_AGENT_HEADER,
};
pub use error::{AuthError, OidcError};
pub use indicator::{IndicatorKind, NoopIndicatorController, UserIndicator, UserIndicatorController};
pub use manual::ManualBrowserProvider;
pub use oidc::{OidcClientConfig, OidcEndpoints, OidcTokenService};
pub use pkce::PkcePair;
pub use redirect::{
    redirect_uri_from_authorization_url, CallbackPattern, RedirectUriError, DEFAULT_REDIRECT_URI,
};
pub use service::{AuthenticationService, AuthorizationAttempt};
pub use session::UserSession;
pub use sign_in::{SignInCoordinator, SignInParameters, SignInPhase, SignInResult};
pub use sign_out::{SignOutCoordinator, SignOutFailure, SignOutOutcome, SignOutPhase};
