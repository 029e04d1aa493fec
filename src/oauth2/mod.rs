//! OAuth2 authorization-code support
//!
//! This module provides the low-level provider client, the CSRF state
//! stores and the authorization-code-grant strategy built on top of them.

pub mod client;
pub mod state;
pub mod strategy;

pub use client::{
    HttpTransport, OAuth2Client, ReqwestTransport, TokenResponse, TransportRequest,
    TransportResponse, DEFAULT_ACCESS_TOKEN_PATH, DEFAULT_AUTHORIZE_PATH,
};
pub use state::{
    generate_state_token, NullStateStore, SessionStateStore, StateStore, StateStoreMeta,
    StateVerification, STATE_TOKEN_BYTES,
};
pub use strategy::{
    AuthorizationCodeConfig, AuthorizationCodeStrategy, ProfileFetcher, VerifyFn, VerifyOutcome,
};

/// An OAuth2 scope: a single pre-joined string or a list joined with the
/// strategy's scope separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Single(String),
    List(Vec<String>),
}

impl Scope {
    /// Serialize for the `scope` query parameter: lists join with
    /// `separator`, strings pass through as-is.
    #[must_use]
    pub fn join(&self, separator: &str) -> String {
        match self {
            Scope::Single(scope) => scope.clone(),
            Scope::List(scopes) => scopes.join(separator),
        }
    }
}

impl From<&str> for Scope {
    fn from(scope: &str) -> Self {
        Scope::Single(scope.to_string())
    }
}

impl From<String> for Scope {
    fn from(scope: String) -> Self {
        Scope::Single(scope)
    }
}

impl From<Vec<String>> for Scope {
    fn from(scopes: Vec<String>) -> Self {
        Scope::List(scopes)
    }
}

impl From<&[&str]> for Scope {
    fn from(scopes: &[&str]) -> Self {
        Scope::List(scopes.iter().map(|s| (*s).to_string()).collect())
    }
}
