//! Auth gate
//!
//! The identity provider itself is external; this service tracks the
//! signed-in/signed-out state it reports and hands out a state stream.
//! Subscribers get the current state immediately on subscribe, which is
//! what lets callers wait for readiness without retry-with-delay loops.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

/// A signed-in user as the identity provider reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: String,
    pub username: Option<String>,
    pub email: Option<String>,
}

impl User {
    /// Display label: username first, email second, uid last.
    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .or_else(|| self.email.as_deref())
            .unwrap_or(&self.uid)
    }
}

/// Current authentication state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedOut,
    SignedIn(User),
}

/// Tracks auth state and notifies subscribers on every transition.
pub struct AuthService {
    state: Mutex<AuthState>,
    watchers: Mutex<Vec<Sender<AuthState>>>,
}

impl Default for AuthService {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AuthState::SignedOut),
            watchers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_user(user: User) -> Self {
        let service = Self::new();
        service.sign_in(user);
        service
    }

    pub fn state(&self) -> AuthState {
        self.state.lock().expect("auth lock").clone()
    }

    pub fn current_user(&self) -> Option<User> {
        match self.state() {
            AuthState::SignedIn(user) => Some(user),
            AuthState::SignedOut => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state(), AuthState::SignedIn(_))
    }

    pub fn sign_in(&self, user: User) {
        self.transition(AuthState::SignedIn(user));
    }

    pub fn sign_out(&self) {
        self.transition(AuthState::SignedOut);
    }

    /// Subscribe to state transitions. The current state is delivered
    /// immediately, so a subscriber never has to poll for readiness.
    pub fn subscribe(&self) -> Receiver<AuthState> {
        let (tx, rx) = channel();
        let current = self.state();
        // A dropped receiver is pruned on the next transition.
        let _ = tx.send(current);
        self.watchers.lock().expect("auth lock").push(tx);
        rx
    }

    fn transition(&self, next: AuthState) {
        {
            let mut state = self.state.lock().expect("auth lock");
            if *state == next {
                return;
            }
            *state = next.clone();
        }
        let mut watchers = self.watchers.lock().expect("auth lock");
        watchers.retain(|tx| tx.send(next.clone()).is_ok());
    }
}
