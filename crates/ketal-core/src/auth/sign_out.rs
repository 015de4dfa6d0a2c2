use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use super::bridge::ResultSlot;
use super::{
    BrowserSession, BrowserSessionProvider, BrowserSessionRequest, CallbackPattern,
    CompletionHandler, SessionError, SessionErrorCode, USER_AGENT_HEADER,
};
use crate::config::AppConfig;
use crate::discovery::{DiscoveryError, DiscoveryResolver};

/// Why a sign-out did not complete.
#[derive(Debug, Error)]
pub enum SignOutFailure {
    #[error("end-session discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("browser session could not be started")]
    SessionStart,
    #[error("browser session failed: {0}")]
    Session(SessionError),
    #[error("browser session closed without completing")]
    SessionClosed,
    #[error("browser session timed out after {0:?}")]
    TimedOut(Duration),
}

/// Typed outcome of a sign-out attempt.
#[derive(Debug)]
pub enum SignOutOutcome {
    SignedOut,
    Cancelled,
    Failed(SignOutFailure),
}

impl SignOutOutcome {
    pub fn is_signed_out(&self) -> bool {
        matches!(self, SignOutOutcome::SignedOut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutPhase {
    Idle,
    Resolving,
    SessionActive,
    Succeeded,
    /// Cancelled or failed.
    Failed,
}

struct State {
    phase: SignOutPhase,
    session: Option<Arc<dyn BrowserSession>>,
}

/// Ends the provider-side login session for a homeserver before local teardown.
pub struct SignOutCoordinator {
    homeserver: String,
    resolver: DiscoveryResolver,
    browser: Arc<dyn BrowserSessionProvider>,
    user_agent: String,
    callback_scheme: String,
    timeout: Option<Duration>,
    state: Arc<Mutex<State>>,
}

impl SignOutCoordinator {
    pub fn new(
        homeserver: impl Into<String>,
        resolver: DiscoveryResolver,
        browser: Arc<dyn BrowserSessionProvider>,
        config: &AppConfig,
    ) -> Self {
        Self {
            homeserver: homeserver.into(),
            resolver,
            browser,
            user_agent: config.ascii_user_agent(),
            callback_scheme: config.sign_out_callback_scheme.clone(),
            timeout: config.sign_out_timeout(),
            state: Arc::new(Mutex::new(State {
                phase: SignOutPhase::Idle,
                session: None,
            })),
        }
    }

    /// Give up on the browser session after `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn phase(&self) -> SignOutPhase {
        self.state.lock().phase
    }

    pub fn has_active_session(&self) -> bool {
        self.state.lock().session.is_some()
    }

    /// Run the sign-out. Returns true only when the provider session completed
    /// without error; cancellation and failures both report false.
    pub async fn start(&self) -> bool {
        self.run().await.is_signed_out()
    }

    /// Run the sign-out, keeping the reason it did not succeed.
    pub async fn run(&self) -> SignOutOutcome {
        self.set_phase(SignOutPhase::Resolving);
        let logout_url = match self.resolver.try_resolve_logout_url(&self.homeserver).await {
            Ok(url) => url,
            Err(err) => {
                error!(homeserver = %self.homeserver, error = %err, "failed to discover end_session_endpoint");
                self.set_phase(SignOutPhase::Failed);
                return SignOutOutcome::Failed(err.into());
            }
        };
        info!(%logout_url, "found end_session_endpoint");

        let outcome = self.present(logout_url).await;
        self.set_phase(if outcome.is_signed_out() {
            SignOutPhase::Succeeded
        } else {
            SignOutPhase::Failed
        });
        outcome
    }

    /// Dismiss the active browser session, if any.
    pub fn cancel(&self) {
        let session = self.state.lock().session.take();
        if let Some(session) = session {
            session.cancel();
        }
    }

    async fn present(&self, logout_url: Url) -> SignOutOutcome {
        let (slot, rx) = ResultSlot::channel();

        let mut request = BrowserSessionRequest::new(
            logout_url,
            CallbackPattern::CustomScheme(self.callback_scheme.clone()),
        )
        .with_header(USER_AGENT_HEADER, self.user_agent.as_str());
        // The logout request must carry the cookies of the signed-in browser session.
        request.ephemeral = false;

        let completion: CompletionHandler = {
            let slot = Arc::clone(&slot);
            let state = Arc::downgrade(&self.state);
            Box::new(move |_callback_url, error| {
                if let Some(state) = state.upgrade() {
                    state.lock().session = None;
                }
                slot.resolve(outcome_for(error));
            })
        };

        let session = self.browser.open(request, completion);
        {
            let mut state = self.state.lock();
            state.session = Some(Arc::clone(&session));
            state.phase = SignOutPhase::SessionActive;
        }

        if !session.start() {
            error!("failed to start browser session for sign-out");
            self.state.lock().session = None;
            slot.resolve(SignOutOutcome::Failed(SignOutFailure::SessionStart));
        }

        let received = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    warn!(?limit, "sign-out browser session timed out");
                    self.cancel();
                    return SignOutOutcome::Failed(SignOutFailure::TimedOut(limit));
                }
            },
            None => rx.await,
        };
        received.unwrap_or(SignOutOutcome::Failed(SignOutFailure::SessionClosed))
    }

    fn set_phase(&self, phase: SignOutPhase) {
        self.state.lock().phase = phase;
    }
}

fn outcome_for(error: Option<SessionError>) -> SignOutOutcome {
    match error {
        None => {
            info!("logout session completed");
            SignOutOutcome::SignedOut
        }
        Some(err) if err.code == SessionErrorCode::CanceledLogin => {
            info!("user cancelled the logout session");
            SignOutOutcome::Cancelled
        }
        Some(err) => {
            error!(error = %err, "logout session failed");
            SignOutOutcome::Failed(SignOutFailure::Session(err))
        }
    }
}
