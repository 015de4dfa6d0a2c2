//! Recording fakes for the collaborators the coordinators depend on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use url::Url;

use crate::auth::{
    AuthError, AuthenticationService, AuthorizationAttempt, BrowserSession,
    BrowserSessionProvider, BrowserSessionRequest, CompletionHandler, OidcError, SessionError,
    UserIndicator, UserIndicatorController,
};
use crate::discovery::{DiscoveryError, HttpFetcher};

type Completion = (Option<Url>, Option<SessionError>);

/// Browser provider whose sessions complete only when the test says so.
#[derive(Default)]
pub(crate) struct FakeBrowser {
    fail_to_start: bool,
    auto_complete: Option<Completion>,
    complete_on_open: Option<Completion>,
    requests: Mutex<Vec<BrowserSessionRequest>>,
    pending: Arc<Mutex<Option<CompletionHandler>>>,
    cancels: Arc<AtomicUsize>,
}

impl FakeBrowser {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_to_start() -> Self {
        Self {
            fail_to_start: true,
            ..Self::default()
        }
    }

    /// Sessions complete from a foreign thread as soon as they start.
    pub(crate) fn completing_with(callback_url: Option<Url>, error: Option<SessionError>) -> Self {
        Self {
            auto_complete: Some((callback_url, error)),
            ..Self::default()
        }
    }

    /// Sessions complete from a foreign thread before `open` returns.
    pub(crate) fn completing_on_open(
        callback_url: Option<Url>,
        error: Option<SessionError>,
    ) -> Self {
        Self {
            complete_on_open: Some((callback_url, error)),
            ..Self::default()
        }
    }

    pub(crate) fn requests(&self) -> Vec<BrowserSessionRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Fire the pending completion from a foreign thread. Returns false if nothing was pending.
    pub(crate) fn complete(&self, callback_url: Option<Url>, error: Option<SessionError>) -> bool {
        let Some(completion) = self.pending.lock().take() else {
            return false;
        };
        std::thread::spawn(move || completion(callback_url, error))
            .join()
            .unwrap();
        true
    }
}

impl BrowserSessionProvider for FakeBrowser {
    fn open(
        &self,
        request: BrowserSessionRequest,
        completion: CompletionHandler,
    ) -> Arc<dyn BrowserSession> {
        self.requests.lock().push(request);
        let completion = match self.complete_on_open.clone() {
            Some((callback_url, error)) => {
                std::thread::spawn(move || completion(callback_url, error))
                    .join()
                    .unwrap();
                // Give a multi-threaded runtime the chance to handle the result first.
                std::thread::sleep(Duration::from_millis(20));
                None
            }
            None => Some(completion),
        };
        Arc::new(FakeSession {
            fail_to_start: self.fail_to_start,
            auto_complete: self.auto_complete.clone(),
            completed_on_open: completion.is_none(),
            completion: Mutex::new(completion),
            pending: self.pending.clone(),
            cancels: self.cancels.clone(),
        })
    }
}

struct FakeSession {
    fail_to_start: bool,
    auto_complete: Option<Completion>,
    completed_on_open: bool,
    completion: Mutex<Option<CompletionHandler>>,
    pending: Arc<Mutex<Option<CompletionHandler>>>,
    cancels: Arc<AtomicUsize>,
}

impl BrowserSession for FakeSession {
    fn start(&self) -> bool {
        if self.fail_to_start {
            return false;
        }
        if self.completed_on_open {
            return true;
        }
        let Some(completion) = self.completion.lock().take() else {
            return false;
        };
        match self.auto_complete.clone() {
            Some((callback_url, error)) => {
                std::thread::spawn(move || completion(callback_url, error));
            }
            None => *self.pending.lock() = Some(completion),
        }
        true
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if let Some(completion) = self.pending.lock().take() {
            completion(None, Some(SessionError::canceled_login()));
        }
    }
}

/// Scripted outcome of [`FakeService::login_with_callback`].
#[derive(Debug, Clone)]
pub(crate) enum LoginScript {
    Succeed(String),
    UserCancellation,
    Fail,
}

/// Token service that records calls and answers from a script.
pub(crate) struct FakeService {
    script: LoginScript,
    aborts: AtomicUsize,
    logins: Mutex<Vec<Url>>,
}

impl FakeService {
    pub(crate) fn new(script: LoginScript) -> Self {
        Self {
            script,
            aborts: AtomicUsize::new(0),
            logins: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub(crate) fn logins(&self) -> Vec<Url> {
        self.logins.lock().clone()
    }
}

#[async_trait]
impl AuthenticationService for FakeService {
    type Session = String;

    async fn abort_login(&self, _attempt: &AuthorizationAttempt) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }

    async fn login_with_callback(&self, callback_url: &Url) -> Result<String, AuthError> {
        self.logins.lock().push(callback_url.clone());
        match &self.script {
            LoginScript::Succeed(session) => Ok(session.clone()),
            LoginScript::UserCancellation => Err(OidcError::UserCancellation.into()),
            LoginScript::Fail => Err(OidcError::StateMismatch.into()),
        }
    }
}

/// Indicator controller recording `submit:<id>` / `retract:<id>` events.
#[derive(Default)]
pub(crate) struct RecordingIndicators {
    events: Mutex<Vec<String>>,
}

impl RecordingIndicators {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl UserIndicatorController for RecordingIndicators {
    fn submit_indicator(&self, indicator: UserIndicator) {
        self.events.lock().push(format!("submit:{}", indicator.id));
    }

    fn retract_indicator_with_id(&self, id: &str) {
        self.events.lock().push(format!("retract:{id}"));
    }
}

/// Serves canned bodies by URL and records every request.
#[derive(Default)]
pub(crate) struct StaticFetcher {
    responses: HashMap<String, Result<String, u16>>,
    requests: Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub(crate) fn with(mut self, url: &str, body: &str) -> Self {
        self.responses.insert(url.to_owned(), Ok(body.to_owned()));
        self
    }

    pub(crate) fn with_status(mut self, url: &str, status: u16) -> Self {
        self.responses.insert(url.to_owned(), Err(status));
        self
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpFetcher for StaticFetcher {
    async fn get(&self, url: &Url) -> Result<Vec<u8>, DiscoveryError> {
        self.requests.lock().push(url.to_string());
        match self.responses.get(url.as_str()) {
            Some(Ok(body)) => Ok(body.clone().into_bytes()),
            Some(Err(status)) => Err(DiscoveryError::HttpStatus {
                url: url.clone(),
                status: StatusCode::from_u16(*status).unwrap(),
            }),
            None => Err(DiscoveryError::HttpStatus {
                url: url.clone(),
                status: StatusCode::NOT_FOUND,
            }),
        }
    }
}

/// Poll `condition` until it holds, failing the test after one second.
pub(crate) async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
