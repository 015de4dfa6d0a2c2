use std::fmt;
use std::sync::Arc;

use url::Url;

use super::CallbackPattern;

/// Header carrying the application user agent on browser-session requests.
pub const USER_AGENT_HEADER: &str = "X-Element-User-Agent";

/// Error domain used for failures reported by browser sessions.
pub const SESSION_ERROR_DOMAIN: &str = "ketal.browser-session";

/// Everything a provider needs to open one interactive browser session.
#[derive(Debug, Clone)]
pub struct BrowserSessionRequest {
    pub url: Url,
    pub callback: CallbackPattern,
    pub headers: Vec<(String, String)>,
    /// When false the session shares the persistent cookie store with the
    /// user's regular browsing.
    pub ephemeral: bool,
}

impl BrowserSessionRequest {
    pub fn new(url: Url, callback: CallbackPattern) -> Self {
        Self {
            url,
            callback,
            headers: Vec::new(),
            ephemeral: false,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Codes a browser session can complete with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionErrorCode {
    /// The user dismissed the browser UI.
    CanceledLogin,
    PresentationContextNotProvided,
    PresentationContextInvalid,
    Other(i64),
}

/// Error delivered to a session's completion handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub domain: String,
    pub code: SessionErrorCode,
    pub reason: Option<String>,
}

impl SessionError {
    pub fn new(code: SessionErrorCode, reason: Option<String>) -> Self {
        Self {
            domain: SESSION_ERROR_DOMAIN.to_owned(),
            code,
            reason,
        }
    }

    pub fn canceled_login() -> Self {
        Self::new(SessionErrorCode::CanceledLogin, None)
    }

    /// The user cancelled and nothing else went wrong.
    pub fn is_user_cancellation(&self) -> bool {
        self.code == SessionErrorCode::CanceledLogin && self.reason.is_none()
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error {:?}", self.domain, self.code)?;
        if let Some(reason) = &self.reason {
            write!(f, ": {reason}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SessionError {}

/// One-shot completion handler. Providers may invoke it from any thread.
pub type CompletionHandler = Box<dyn FnOnce(Option<Url>, Option<SessionError>) + Send + 'static>;

/// A browser session opened by a [`BrowserSessionProvider`].
pub trait BrowserSession: Send + Sync {
    /// Present the browser UI. Returns false when it could not be presented,
    /// in which case the completion handler is never invoked.
    fn start(&self) -> bool;

    /// Dismiss the session. A started session completes with a
    /// [`SessionErrorCode::CanceledLogin`] error.
    fn cancel(&self);
}

/// Opens interactive browser sessions.
pub trait BrowserSessionProvider: Send + Sync {
    fn open(
        &self,
        request: BrowserSessionRequest,
        completion: CompletionHandler,
    ) -> Arc<dyn BrowserSession>;
}
