use parking_lot::Mutex;
use std::fmt;
use tokio::sync::watch;

/// Portal role of the signed-in principal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Doctor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Doctor => write!(f, "doctor"),
        }
    }
}

/// Opaque bearer credential
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Accepts the raw token or a `Bearer `-prefixed one.
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        match token.strip_prefix("Bearer ") {
            Some(stripped) => Self(stripped.to_string()),
            None => Self(token),
        }
    }

    pub fn token(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

// Tokens never reach logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub credential: Credential,
    pub role: Role,
}

/// A login or logout, delivered to listeners in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn(Session),
    LoggedOut,
}

pub type SessionListener = Box<dyn Fn(&SessionEvent) + Send + Sync>;

/// Authentication state shared with the live layer.
///
/// Listeners registered with [`SessionProvider::on_change`] run inline, before
/// `login`/`logout` return, one transition at a time. [`SessionProvider::watch`]
/// only reports the latest state.
pub struct SessionProvider {
    state: watch::Sender<Option<Session>>,
    // held while a transition is applied and announced
    listeners: Mutex<Vec<SessionListener>>,
}

impl SessionProvider {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn login(&self, credential: Credential, role: Role) {
        let listeners = self.listeners.lock();
        tracing::info!("Session authenticated as {}", role);
        let session = Session { credential, role };
        self.state.send_replace(Some(session.clone()));
        let event = SessionEvent::LoggedIn(session);
        for listener in listeners.iter() {
            listener(&event);
        }
    }

    /// Clears the session; also used on credential expiry.
    pub fn logout(&self) {
        let listeners = self.listeners.lock();
        if self.state.send_replace(None).is_none() {
            return;
        }
        tracing::info!("Session ended");
        for listener in listeners.iter() {
            listener(&SessionEvent::LoggedOut);
        }
    }

    /// Register a listener for every later transition.
    ///
    /// Listeners must not call back into the provider.
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Box::new(listener));
    }

    pub fn current(&self) -> Option<Session> {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_some()
    }

    pub fn watch(&self) -> watch::Receiver<Option<Session>> {
        self.state.subscribe()
    }
}

impl Default for SessionProvider {
    fn default() -> Self {
        Self::new()
    }
}
