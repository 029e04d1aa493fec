//! CSRF state stores
//!
//! The authorization-code flow spans two HTTP requests; the state store
//! correlates them with an opaque single-use token. CSRF protection is
//! opt-in: the default [`NullStateStore`] does nothing, the session-backed
//! [`SessionStateStore`] enforces the full store/verify/consume lifecycle.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use log::debug;
use rand::RngCore;
use serde_json::{json, Value};

use crate::context::Context;
use crate::errors::Error;

/// Bytes of entropy in a state token. Base64url-encoded without padding
/// this yields exactly 32 URL-safe characters.
pub const STATE_TOKEN_BYTES: usize = 24;

const SESSION_REQUIRED: &str = "OAuth 2.0 authentication requires session support when using state. Did you forget to use session middleware?";

/// Generate a cryptographically random, URL-safe state token.
#[must_use]
pub fn generate_state_token() -> String {
    let mut bytes = [0u8; STATE_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Context handed to `store` for stores that want to persist flow metadata
/// alongside the token.
#[derive(Debug, Clone)]
pub struct StateStoreMeta {
    pub authorization_url: String,
    pub token_url: String,
    pub client_id: String,
}

/// Outcome of a state verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVerification {
    pub ok: bool,
    pub message: String,
}

impl StateVerification {
    #[must_use]
    pub fn success() -> Self {
        Self {
            ok: true,
            message: String::new(),
        }
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Generates and verifies the CSRF state for an OAuth2 flow. `store` must
/// run before the authorization redirect is sent; `verify` must run before
/// any token exchange.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Generate and persist a state token for the current request. An empty
    /// return value means "no state parameter".
    ///
    /// # Errors
    ///
    /// Implementations may require a session on the context.
    async fn store(
        &self,
        ctx: &mut Context,
        meta: Option<&StateStoreMeta>,
    ) -> Result<String, Error>;

    /// Check a provided state against the persisted one.
    ///
    /// # Errors
    ///
    /// Implementations may require a session on the context.
    async fn verify(
        &self,
        ctx: &mut Context,
        provided_state: &str,
    ) -> Result<StateVerification, Error>;
}

/// The no-CSRF default: stores nothing and verifies everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStateStore;

#[async_trait]
impl StateStore for NullStateStore {
    async fn store(
        &self,
        _ctx: &mut Context,
        _meta: Option<&StateStoreMeta>,
    ) -> Result<String, Error> {
        Ok(String::new())
    }

    async fn verify(
        &self,
        _ctx: &mut Context,
        _provided_state: &str,
    ) -> Result<StateVerification, Error> {
        Ok(StateVerification::success())
    }
}

/// Session-backed store: the token lives under a strategy-scoped session
/// key between the authorization redirect and the callback, and is consumed
/// by the first verification — matching or not.
pub struct SessionStateStore {
    key: String,
}

impl SessionStateStore {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[async_trait]
impl StateStore for SessionStateStore {
    async fn store(
        &self,
        ctx: &mut Context,
        _meta: Option<&StateStoreMeta>,
    ) -> Result<String, Error> {
        let token = generate_state_token();
        let Some(session) = ctx.session.as_mut() else {
            return Err(Error::Config(SESSION_REQUIRED.to_string()));
        };
        session.set(&self.key, json!({ "state": token }));
        Ok(token)
    }

    async fn verify(
        &self,
        ctx: &mut Context,
        provided_state: &str,
    ) -> Result<StateVerification, Error> {
        let Some(session) = ctx.session.as_mut() else {
            return Err(Error::Config(SESSION_REQUIRED.to_string()));
        };

        let stored = session
            .get(&self.key)
            .and_then(Value::as_object)
            .and_then(|fields| fields.get("state"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(stored) = stored else {
            return Ok(StateVerification::failure(
                "Unable to verify authorization request state.",
            ));
        };

        // The nonce is single-use: consume it whether or not it matches,
        // preserving any sibling fields under the entry.
        let entry_empty = session
            .get_mut(&self.key)
            .and_then(Value::as_object_mut)
            .map(|fields| {
                fields.remove("state");
                fields.is_empty()
            });
        if entry_empty == Some(true) {
            session.remove(&self.key);
        }

        if stored == provided_state {
            Ok(StateVerification::success())
        } else {
            debug!("authorization request state mismatch under session key {}", self.key);
            Ok(StateVerification::failure(
                "Invalid authorization request state.",
            ))
        }
    }
}
