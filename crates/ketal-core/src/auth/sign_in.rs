use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use url::Url;

use super::indicator::LoadingGuard;
use super::{
    AuthenticationService, AuthorizationAttempt, BrowserSession, BrowserSessionProvider,
    BrowserSessionRequest, CallbackPattern, CompletionHandler, SessionError,
    UserIndicatorController, USER_AGENT_HEADER,
};

const LOADING_INDICATOR_ID: &str = "SignInCoordinator-Loading";
const LOADING_TITLE: &str = "Loading…";

/// Outcome observable by the screen that launched the sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInResult<S> {
    Success(S),
    Cancelled,
}

/// Lifecycle of a [`SignInCoordinator`]. Terminal phases are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInPhase {
    Idle,
    SessionActive,
    Succeeded,
    Cancelled,
    /// The token exchange failed; reported to the caller as a cancellation.
    Failed,
}

/// Collaborators for one interactive sign-in.
pub struct SignInParameters<S> {
    pub attempt: AuthorizationAttempt,
    pub service: Arc<S>,
    pub browser: Arc<dyn BrowserSessionProvider>,
    pub indicators: Arc<dyn UserIndicatorController>,
    pub user_agent: String,
}

type ResultCallback<T> = Box<dyn FnOnce(SignInResult<T>) + Send + 'static>;

/// Drives one browser-based OIDC authorization attempt.
///
/// The coordinator opens a browser session for the attempt's authorization
/// URL, waits for its single completion and exchanges the callback URL for a
/// session through the [`AuthenticationService`]. Use a new coordinator for
/// every attempt.
pub struct SignInCoordinator<S: AuthenticationService> {
    inner: Arc<Inner<S>>,
}

struct Inner<S: AuthenticationService> {
    attempt: AuthorizationAttempt,
    service: Arc<S>,
    browser: Arc<dyn BrowserSessionProvider>,
    indicators: Arc<dyn UserIndicatorController>,
    user_agent: String,
    state: Mutex<State<S::Session>>,
}

struct State<T> {
    phase: SignInPhase,
    session: Option<Arc<dyn BrowserSession>>,
    callback: Option<ResultCallback<T>>,
}

impl<S: AuthenticationService> SignInCoordinator<S> {
    pub fn new(parameters: SignInParameters<S>) -> Self {
        Self {
            inner: Arc::new(Inner {
                attempt: parameters.attempt,
                service: parameters.service,
                browser: parameters.browser,
                indicators: parameters.indicators,
                user_agent: parameters.user_agent,
                state: Mutex::new(State {
                    phase: SignInPhase::Idle,
                    session: None,
                    callback: None,
                }),
            }),
        }
    }

    /// Register the callback receiving the result. It is invoked at most once.
    pub fn callback<F>(&self, callback: F)
    where
        F: FnOnce(SignInResult<S::Session>) + Send + 'static,
    {
        self.inner.state.lock().callback = Some(Box::new(callback));
    }

    pub fn phase(&self) -> SignInPhase {
        self.inner.state.lock().phase
    }

    pub fn has_active_session(&self) -> bool {
        self.inner.state.lock().session.is_some()
    }

    /// Open the browser session. Must be called from within a tokio runtime;
    /// the session's completion is handled on that runtime.
    ///
    /// # Panics
    ///
    /// Panics if the attempt's redirect URI has neither an HTTPS host nor a scheme.
    pub fn start(&self) {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if state.phase != SignInPhase::Idle {
                warn!(phase = ?state.phase, "sign-in coordinator already started");
                return;
            }
            // Completions may arrive while the provider is still inside `open`.
            state.phase = SignInPhase::SessionActive;
        }

        let redirect_uri = inner.attempt.redirect_uri();
        let callback = CallbackPattern::for_redirect_uri(&redirect_uri);

        let Ok(runtime) = Handle::try_current() else {
            error!("sign-in started outside a tokio runtime");
            inner.finish(SignInPhase::Cancelled, SignInResult::Cancelled);
            return;
        };

        let url = inner.attempt.authorization_url().clone();
        info!(%url, ?callback, "starting OIDC browser session");
        let request = BrowserSessionRequest::new(url, callback)
            .with_header(USER_AGENT_HEADER, inner.user_agent.as_str());

        let weak = Arc::downgrade(inner);
        let completion: CompletionHandler = Box::new(move |callback_url, error| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            runtime.spawn(async move {
                inner.handle_auth_result(callback_url, error).await;
            });
        });

        let session = inner.browser.open(request, completion);
        {
            let mut state = inner.state.lock();
            if state.phase != SignInPhase::SessionActive {
                debug!(phase = ?state.phase, "browser session finished while opening");
                return;
            }
            state.session = Some(session.clone());
        }

        if !session.start() {
            error!("failed to start OIDC browser session");
            inner.state.lock().session = None;
            inner.finish(SignInPhase::Cancelled, SignInResult::Cancelled);
        }
    }

    /// Cancel any active session and drop the result callback. Idempotent.
    pub fn stop(&self) {
        let session = {
            let mut state = self.inner.state.lock();
            state.callback = None;
            state.session.take()
        };
        if let Some(session) = session {
            session.cancel();
        }
    }

    /// Start the attempt and wait for its result.
    ///
    /// Resolves to [`SignInResult::Cancelled`] if [`SignInCoordinator::stop`]
    /// discards the callback first.
    pub async fn run(&self) -> SignInResult<S::Session> {
        let (tx, rx) = oneshot::channel();
        self.callback(move |result| {
            let _ = tx.send(result);
        });
        self.start();
        rx.await.unwrap_or(SignInResult::Cancelled)
    }
}

impl<S: AuthenticationService> Inner<S> {
    async fn handle_auth_result(&self, callback_url: Option<Url>, error: Option<SessionError>) {
        if !self.clear_session() {
            return;
        }
        info!(
            has_callback = callback_url.is_some(),
            error = ?error,
            "OIDC browser session finished"
        );

        if error.as_ref().is_some_and(SessionError::is_user_cancellation) {
            self.service.abort_login(&self.attempt).await;
            self.finish(SignInPhase::Cancelled, SignInResult::Cancelled);
            return;
        }

        let Some(callback_url) = callback_url else {
            self.service.abort_login(&self.attempt).await;
            self.finish(SignInPhase::Cancelled, SignInResult::Cancelled);
            return;
        };

        let outcome = {
            let _loading =
                LoadingGuard::show(self.indicators.as_ref(), LOADING_INDICATOR_ID, LOADING_TITLE);
            self.service.login_with_callback(&callback_url).await
        };

        match outcome {
            Ok(session) => self.finish(SignInPhase::Succeeded, SignInResult::Success(session)),
            Err(err) if err.is_user_cancellation() => {
                info!("OIDC login cancelled by the user");
                self.finish(SignInPhase::Cancelled, SignInResult::Cancelled);
            }
            Err(err) => {
                error!(error = %err, "OIDC login failed");
                self.finish(SignInPhase::Failed, SignInResult::Cancelled);
            }
        }
    }

    /// Drop the session handle. Returns false if the attempt already finished.
    fn clear_session(&self) -> bool {
        let mut state = self.state.lock();
        state.session = None;
        if state.phase != SignInPhase::SessionActive {
            debug!(phase = ?state.phase, "ignoring repeated browser session completion");
            return false;
        }
        true
    }

    fn finish(&self, phase: SignInPhase, result: SignInResult<S::Session>) {
        let callback = {
            let mut state = self.state.lock();
            state.phase = phase;
            state.session = None;
            state.callback.take()
        };
        if let Some(callback) = callback {
            callback(result);
        }
    }
}
