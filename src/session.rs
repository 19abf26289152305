// Session module - authenticate / de-authenticate lifecycle for one invocation
//
// A session is acquired at the start of a collection and released on every
// exit path: normal completion, a failed command, or a panic inside the body.
// Stateless families (per-call Basic auth, CLI) yield `SessionToken::Stateless`
// and never trigger a logout.

use async_trait::async_trait;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{debug, warn};

use crate::error::{CollectorError, Result};
use crate::transport::ApiRequest;

/// Opaque authentication material produced by a login
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionToken {
    /// Token sent back in a request header on every call (e.g. X-DD-AUTH-TOKEN)
    Header { name: &'static str, value: String },

    /// Session cookie held by the transport's cookie jar, optionally with a
    /// CSRF token header required on authenticated calls
    Cookie { csrf: Option<(&'static str, String)> },

    /// No server-side session; nothing to invalidate
    Stateless,
}

impl SessionToken {
    /// Attaches the token to an outgoing request
    pub fn apply(&self, request: ApiRequest) -> ApiRequest {
        match self {
            SessionToken::Header { name, value } => request.header(name, value),
            SessionToken::Cookie {
                csrf: Some((name, value)),
            } => request.header(name, value),
            SessionToken::Cookie { csrf: None } | SessionToken::Stateless => request,
        }
    }

    /// Whether a server-side session exists that must be torn down
    pub fn needs_logout(&self) -> bool {
        !matches!(self, SessionToken::Stateless)
    }
}

/// Vendor-specific login/logout calls
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self) -> Result<SessionToken>;

    async fn logout(&self, token: &SessionToken) -> Result<()>;
}

/// Lifecycle states of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    DeAuthenticating,
    /// Terminal: the session was released
    Closed,
    /// Terminal: login failed, nothing to release
    AuthFailed,
}

/// Tracks one session against one server
pub struct Session<'a, A: Authenticator + ?Sized> {
    authenticator: &'a A,
    server_id: &'a str,
    state: SessionState,
    token: Option<SessionToken>,
}

impl<'a, A: Authenticator + ?Sized> Session<'a, A> {
    pub fn new(authenticator: &'a A, server_id: &'a str) -> Self {
        Session {
            authenticator,
            server_id,
            state: SessionState::Unauthenticated,
            token: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Logs in. May only be called once.
    pub async fn begin(&mut self) -> Result<&SessionToken> {
        if self.state != SessionState::Unauthenticated {
            return Err(CollectorError::Authentication(format!(
                "session for {} already used ({:?})",
                self.server_id, self.state
            )));
        }

        self.state = SessionState::Authenticating;
        match self.authenticator.login().await {
            Ok(token) => {
                debug!("[{}] Session established", self.server_id);
                self.state = SessionState::Authenticated;
                Ok(self.token.insert(token))
            }
            Err(e) => {
                self.state = SessionState::AuthFailed;
                Err(match e {
                    CollectorError::Authentication(_) => e,
                    other => CollectorError::Authentication(other.to_string()),
                })
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Logs out best-effort. No-op unless the session is active.
    pub async fn end(&mut self) {
        if !self.is_active() {
            return;
        }

        self.state = SessionState::DeAuthenticating;
        if let Some(token) = self.token.take() {
            if token.needs_logout() {
                match self.authenticator.logout(&token).await {
                    Ok(()) => debug!("[{}] Session closed", self.server_id),
                    Err(e) => warn!("[{}] Logout failed: {}", self.server_id, e),
                }
            }
        }
        self.state = SessionState::Closed;
    }
}

impl<A: Authenticator + ?Sized> Drop for Session<'_, A> {
    fn drop(&mut self) {
        // Only reachable when the owning future is cancelled mid-collection
        if self.is_active() {
            warn!(
                "[{}] Session dropped without logout; it will expire server-side",
                self.server_id
            );
        }
    }
}

/// Runs `body` inside an authenticated session.
///
/// Logout happens exactly once after a successful login, whatever `body`
/// does. A panic in `body` is re-raised after the logout. A failed login
/// returns `CollectorError::Authentication` without running `body`.
pub async fn with_session<A, F, Fut, T>(authenticator: &A, server_id: &str, body: F) -> Result<T>
where
    A: Authenticator + ?Sized,
    F: FnOnce(SessionToken) -> Fut,
    Fut: Future<Output = T>,
{
    let mut session = Session::new(authenticator, server_id);
    let token = session.begin().await?.clone();

    let outcome = AssertUnwindSafe(body(token)).catch_unwind().await;
    session.end().await;

    match outcome {
        Ok(value) => Ok(value),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
