//! Authentication strategies
//!
//! A strategy is one pluggable authentication method. Each invocation
//! produces exactly one [`AuthResult`]: pass the request along untouched,
//! fail it with a challenge, redirect the user agent elsewhere, or succeed
//! with an authenticated user.

use async_trait::async_trait;
use serde_json::Value;

use crate::authenticator::AuthenticateOptions;
use crate::context::{value_is_truthy, Context};
use crate::errors::Error;

/// The outcome of a single strategy invocation.
#[derive(Debug, Clone)]
pub enum AuthResult {
    /// No decision — proceed to the next strategy or the next middleware.
    Pass,
    /// The attempt was rejected. The status defaults to 401 when unset.
    Fail {
        challenge: Option<Value>,
        status: Option<u16>,
    },
    /// The user agent must be redirected (the OAuth2 authorization step).
    Redirect { url: String, status: u16 },
    /// Authentication succeeded.
    Success { user: Value, info: Option<Value> },
}

impl AuthResult {
    #[must_use]
    pub fn fail(challenge: Option<Value>, status: Option<u16>) -> Self {
        AuthResult::Fail { challenge, status }
    }

    /// Redirect with the default 302 status.
    #[must_use]
    pub fn redirect(url: impl Into<String>) -> Self {
        AuthResult::Redirect {
            url: url.into(),
            status: 302,
        }
    }

    #[must_use]
    pub fn redirect_with_status(url: impl Into<String>, status: u16) -> Self {
        AuthResult::Redirect {
            url: url.into(),
            status,
        }
    }

    #[must_use]
    pub fn success(user: Value, info: Option<Value>) -> Self {
        AuthResult::Success { user, info }
    }
}

/// One authentication method. Strategies are constructed once at startup and
/// shared across requests; any per-request state lives on the context.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// The name this strategy registers under by default.
    fn name(&self) -> &str;

    /// Authenticate the request.
    ///
    /// # Errors
    ///
    /// Configuration and protocol errors are returned as errors; rejected
    /// authentication attempts are `Ok(AuthResult::Fail { .. })`.
    async fn authenticate(
        &self,
        ctx: &mut Context,
        options: &AuthenticateOptions,
    ) -> Result<AuthResult, Error>;
}

/// Restores login state from the session. Registered automatically by the
/// authenticator under the name `session`.
///
/// This strategy never terminates the chain: it only populates the context
/// state from `session.passport.user` (clearing the slot when the
/// deserializer chain reports no user) and always passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionStrategy;

#[async_trait]
impl Strategy for SessionStrategy {
    fn name(&self) -> &str {
        "session"
    }

    async fn authenticate(
        &self,
        ctx: &mut Context,
        _options: &AuthenticateOptions,
    ) -> Result<AuthResult, Error> {
        let Some(passport) = ctx.passport.clone() else {
            return Err(Error::Config(
                "passport.initialize() middleware not in use".to_string(),
            ));
        };

        let stored = ctx
            .session
            .as_ref()
            .and_then(|session| session.get_nested(passport.session_key(), "user"))
            .cloned();
        let Some(stored) = stored else {
            return Ok(AuthResult::Pass);
        };

        // A literal 0 is a valid stored user key; only an absent value skips.
        if value_is_truthy(&stored) || stored == Value::from(0) {
            match passport.deserialize_user(&stored, ctx).await? {
                Some(user) => {
                    ctx.state
                        .insert(passport.user_property().to_string(), user);
                }
                None => {
                    if let Some(session) = ctx.session.as_mut() {
                        session.remove_nested(passport.session_key(), "user");
                    }
                }
            }
        }
        Ok(AuthResult::Pass)
    }
}
