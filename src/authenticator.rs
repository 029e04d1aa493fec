//! The orchestration core
//!
//! The [`Authenticator`] owns the strategy registry and the
//! serializer/deserializer/auth-info chains, and manufactures the
//! middlewares that drive them: [`Authenticator::authenticate`],
//! [`Authenticator::initialize`] and [`Authenticator::session`].
//!
//! Registration and execution of the chains are separate operations
//! (`add_serializer` registers, `serialize_user` runs) — two names instead
//! of the original dual-mode overload.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use log::debug;
use serde_json::Value;

use crate::context::{value_is_truthy, Context};
use crate::errors::{reason_phrase, Error};
use crate::middleware::{BoxFuture, Handler, Middleware};
use crate::oauth2::Scope;
use crate::strategy::{AuthResult, SessionStrategy, Strategy};

/// One link of a serializer, deserializer or auth-info chain.
///
/// Returning `None` means "no opinion, try the next link"; the chains give
/// the remaining return values different meanings (see the `Authenticator`
/// execution methods).
pub type ChainFn = Arc<
    dyn for<'a> Fn(&'a Value, &'a Context) -> BoxFuture<'a, Result<Option<Value>, Error>>
        + Send
        + Sync,
>;

/// What the authenticate middleware observed, delivered to a custom
/// callback. A callback takes full ownership of the outcome: the middleware
/// performs no session mutation, response writing or redirecting itself.
pub enum AuthEvent<'a> {
    /// A strategy succeeded.
    Success {
        user: &'a Value,
        info: Option<&'a Value>,
    },
    /// Every attempted strategy failed.
    Failure(&'a FailureReport),
    /// Downstream middleware (after an all-pass run) returned an error.
    Error(&'a Error),
}

/// Custom outcome handler for [`Authenticator::authenticate`].
pub type AuthCallback = Arc<
    dyn for<'a> Fn(&'a mut Context, AuthEvent<'a>) -> BoxFuture<'a, Result<(), Error>>
        + Send
        + Sync,
>;

/// The failures recorded across an authenticate run, in strategy order.
#[derive(Debug, Default, Clone)]
pub struct FailureReport {
    pub challenges: Vec<Option<Value>>,
    pub statuses: Vec<Option<u16>>,
}

impl FailureReport {
    /// When exactly one strategy was tried, its challenge and status.
    #[must_use]
    pub fn single(&self) -> Option<(Option<&Value>, Option<u16>)> {
        if self.challenges.len() == 1 {
            Some((
                self.challenges.first().and_then(Option::as_ref),
                self.statuses.first().copied().flatten(),
            ))
        } else {
            None
        }
    }

    /// The response status: the first recorded failure's status, defaulting
    /// to 401.
    #[must_use]
    pub fn first_status(&self) -> u16 {
        self.statuses.first().copied().flatten().unwrap_or(401)
    }
}

/// Options accepted by the authenticate middleware. Strategies also read
/// the OAuth2-flow fields (`callback_url`, `scope`, `state`).
#[derive(Clone, Default)]
pub struct AuthenticateOptions {
    /// On success, redirect here.
    pub success_redirect: Option<String>,
    /// On success, redirect to the session's `returnTo` target (consuming
    /// it) or to this default.
    pub success_return_to_or_redirect: Option<String>,
    /// On success, push `info.message` onto the session flash array
    /// `message.{info.type}`.
    pub success_message: bool,
    /// When every strategy fails, redirect here instead of responding.
    pub failure_redirect: Option<String>,
    /// With `failure_redirect`, push the first failure's message onto the
    /// session flash array `message.failed`.
    pub failure_message: bool,
    /// When every strategy fails, surface an `Authentication` error instead
    /// of responding.
    pub fail_with_error: bool,
    /// On success, assign the user to this state property and continue —
    /// skipping the session login entirely.
    pub assign_property: Option<String>,
    /// Suppress the auth-info transform with `Some(false)`; defaults to on.
    pub auth_info: Option<bool>,
    /// Per-invocation override of the OAuth2 callback URL.
    pub callback_url: Option<String>,
    /// Per-invocation override of the OAuth2 scope.
    pub scope: Option<Scope>,
    /// Literal OAuth2 state parameter (superseded by an active state store).
    pub state: Option<String>,
    /// Custom outcome handler; see [`AuthEvent`].
    pub callback: Option<AuthCallback>,
}

impl AuthenticateOptions {
    fn auth_info_enabled(&self) -> bool {
        self.auth_info.unwrap_or(true)
    }
}

/// The strategy registry and transform chains, shared across requests.
///
/// All mutation happens through `&self` behind locks so a single `Arc` can
/// be registered into middlewares and contexts; by convention everything is
/// registered at startup and only read per-request.
pub struct Authenticator {
    strategies: RwLock<HashMap<String, Arc<dyn Strategy>>>,
    serializers: RwLock<Vec<ChainFn>>,
    deserializers: RwLock<Vec<ChainFn>>,
    info_transformers: RwLock<Vec<ChainFn>>,
    user_property: String,
    session_key: String,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("user_property", &self.user_property)
            .field("session_key", &self.session_key)
            .finish_non_exhaustive()
    }
}

impl Default for Authenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl Authenticator {
    /// Create an authenticator with the built-in `session` strategy
    /// registered.
    #[must_use]
    pub fn new() -> Self {
        let mut strategies: HashMap<String, Arc<dyn Strategy>> = HashMap::new();
        strategies.insert("session".to_string(), Arc::new(SessionStrategy));
        Self {
            strategies: RwLock::new(strategies),
            serializers: RwLock::new(Vec::new()),
            deserializers: RwLock::new(Vec::new()),
            info_transformers: RwLock::new(Vec::new()),
            user_property: "user".to_string(),
            session_key: "passport".to_string(),
        }
    }

    /// Change the state property the authenticated user is exposed under.
    #[must_use]
    pub fn with_user_property(mut self, property: impl Into<String>) -> Self {
        self.user_property = property.into();
        self
    }

    /// Change the session key login state is stored under.
    #[must_use]
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = key.into();
        self
    }

    #[must_use]
    pub fn user_property(&self) -> &str {
        &self.user_property
    }

    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// Register a strategy under its self-reported name.
    ///
    /// # Errors
    ///
    /// Fails when the strategy reports an empty name.
    pub fn register(&self, strategy: Arc<dyn Strategy>) -> Result<&Self, Error> {
        let name = strategy.name().to_string();
        self.register_as(name, strategy)
    }

    /// Register a strategy under an explicit name.
    ///
    /// # Errors
    ///
    /// Fails when the name is empty.
    pub fn register_as(
        &self,
        name: impl Into<String>,
        strategy: Arc<dyn Strategy>,
    ) -> Result<&Self, Error> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Config(
                "Authentication strategies must have a name".to_string(),
            ));
        }
        self.strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, strategy);
        Ok(self)
    }

    /// Remove a strategy from the registry.
    pub fn unuse(&self, name: &str) -> &Self {
        self.strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        self
    }

    /// Look up a registered strategy. Resolution is lazy — middlewares
    /// resolve names per request, so strategies may be registered after the
    /// middleware was constructed.
    #[must_use]
    pub fn strategy(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Append a serializer to the chain.
    pub fn add_serializer<F>(&self, serializer: F)
    where
        F: for<'a> Fn(&'a Value, &'a Context) -> BoxFuture<'a, Result<Option<Value>, Error>>
            + Send
            + Sync
            + 'static,
    {
        self.serializers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(serializer));
    }

    /// Append a deserializer to the chain.
    pub fn add_deserializer<F>(&self, deserializer: F)
    where
        F: for<'a> Fn(&'a Value, &'a Context) -> BoxFuture<'a, Result<Option<Value>, Error>>
            + Send
            + Sync
            + 'static,
    {
        self.deserializers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(deserializer));
    }

    /// Append an auth-info transformer to the chain.
    pub fn add_auth_info_transformer<F>(&self, transformer: F)
    where
        F: for<'a> Fn(&'a Value, &'a Context) -> BoxFuture<'a, Result<Option<Value>, Error>>
            + Send
            + Sync
            + 'static,
    {
        self.info_transformers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(transformer));
    }

    /// Run the serializer chain over `user`.
    ///
    /// The first link returning anything other than "no opinion" (`None`),
    /// `null` or `false` wins — a literal `0` is a perfectly good session
    /// key.
    ///
    /// # Errors
    ///
    /// A link's error propagates; an exhausted chain is a hard
    /// [`Error::Serialization`].
    pub async fn serialize_user(&self, user: &Value, ctx: &Context) -> Result<Value, Error> {
        let serializers = self
            .serializers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for serializer in &serializers {
            match serializer(user, ctx).await? {
                None | Some(Value::Null | Value::Bool(false)) => {}
                Some(serialized) => return Ok(serialized),
            }
        }
        Err(Error::Serialization)
    }

    /// Run the deserializer chain over a stored session value.
    ///
    /// `None` ("no opinion") moves to the next link; `null` and `false` are
    /// terminal "no user" results (`Ok(None)`); anything else is the user.
    ///
    /// # Errors
    ///
    /// A link's error propagates; an exhausted chain is a hard
    /// [`Error::Deserialization`].
    pub async fn deserialize_user(
        &self,
        serialized: &Value,
        ctx: &Context,
    ) -> Result<Option<Value>, Error> {
        let deserializers = self
            .deserializers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for deserializer in &deserializers {
            match deserializer(serialized, ctx).await? {
                None => {}
                Some(Value::Null | Value::Bool(false)) => return Ok(None),
                Some(user) => return Ok(Some(user)),
            }
        }
        Err(Error::Deserialization)
    }

    /// Run the auth-info transform chain over `info`.
    ///
    /// The first link returning a value other than `None`/`null`/`false`
    /// wins; unlike the serializer chains, an exhausted (or empty) chain
    /// passes the original info through unchanged.
    ///
    /// # Errors
    ///
    /// A link's error propagates.
    pub async fn transform_auth_info(&self, info: &Value, ctx: &Context) -> Result<Value, Error> {
        let transformers = self
            .info_transformers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for transformer in &transformers {
            match transformer(info, ctx).await? {
                None | Some(Value::Null | Value::Bool(false)) => {}
                Some(transformed) => return Ok(transformed),
            }
        }
        Ok(info.clone())
    }

    /// Build the authenticate middleware for a single strategy.
    #[must_use]
    pub fn authenticate(
        self: &Arc<Self>,
        name: impl Into<String>,
        options: AuthenticateOptions,
    ) -> AuthenticateMiddleware {
        self.authenticate_all([name.into()], options)
    }

    /// Build the authenticate middleware for an ordered list of strategies.
    #[must_use]
    pub fn authenticate_all(
        self: &Arc<Self>,
        names: impl IntoIterator<Item = String>,
        options: AuthenticateOptions,
    ) -> AuthenticateMiddleware {
        AuthenticateMiddleware {
            authenticator: self.clone(),
            names: names.into_iter().collect(),
            options,
        }
    }

    /// Like [`Authenticator::authenticate`], but assigns the user to the
    /// `account` state property instead of logging in — for authorizing a
    /// secondary account on an already-authenticated request.
    #[must_use]
    pub fn authorize(
        self: &Arc<Self>,
        name: impl Into<String>,
        mut options: AuthenticateOptions,
    ) -> AuthenticateMiddleware {
        options.assign_property = Some("account".to_string());
        self.authenticate(name, options)
    }

    /// Build the initialize middleware: attaches this authenticator to the
    /// context and restores the session user through the deserializer chain.
    #[must_use]
    pub fn initialize(self: &Arc<Self>) -> InitializeMiddleware {
        InitializeMiddleware {
            authenticator: self.clone(),
        }
    }

    /// Convenience for `authenticate("session")`.
    #[must_use]
    pub fn session(self: &Arc<Self>) -> AuthenticateMiddleware {
        self.authenticate("session", AuthenticateOptions::default())
    }
}

/// Middleware that attaches the authenticator and restores any logged-in
/// user from the session.
pub struct InitializeMiddleware {
    authenticator: Arc<Authenticator>,
}

#[async_trait]
impl Middleware for InitializeMiddleware {
    async fn call(&self, ctx: &mut Context, next: &dyn Handler) -> Result<(), Error> {
        if ctx.session.is_none() {
            return Err(Error::Config(
                "Session middleware is needed with passport middleware!".to_string(),
            ));
        }
        ctx.passport = Some(self.authenticator.clone());

        let stored = ctx
            .session
            .as_ref()
            .and_then(|session| session.get_nested(self.authenticator.session_key(), "user"))
            .cloned();
        if let Some(stored) = stored {
            if value_is_truthy(&stored) || stored == Value::from(0) {
                match self.authenticator.deserialize_user(&stored, ctx).await? {
                    Some(user) => {
                        ctx.state
                            .insert(self.authenticator.user_property().to_string(), user);
                    }
                    None => {
                        if let Some(session) = ctx.session.as_mut() {
                            session.remove_nested(self.authenticator.session_key(), "user");
                        }
                    }
                }
            }
        }
        next.call(ctx).await
    }
}

/// The middleware produced by [`Authenticator::authenticate`].
pub struct AuthenticateMiddleware {
    authenticator: Arc<Authenticator>,
    names: Vec<String>,
    options: AuthenticateOptions,
}

#[async_trait]
impl Middleware for AuthenticateMiddleware {
    async fn call(&self, ctx: &mut Context, next: &dyn Handler) -> Result<(), Error> {
        let mut report = FailureReport::default();

        for name in &self.names {
            let strategy = self.authenticator.strategy(name).ok_or_else(|| {
                Error::Config(format!("Unknown authentication strategy \"{name}\""))
            })?;
            match strategy.authenticate(ctx, &self.options).await? {
                AuthResult::Pass => {}
                AuthResult::Fail { challenge, status } => {
                    debug!("strategy {name} failed (status {status:?})");
                    report.challenges.push(challenge);
                    report.statuses.push(status);
                }
                AuthResult::Redirect { url, status } => {
                    ctx.response.redirect(&url, status);
                    return Ok(());
                }
                AuthResult::Success { user, info } => {
                    return self.succeed(ctx, user, info, next).await;
                }
            }
        }

        if report.challenges.is_empty() {
            // Every strategy passed without a decision.
            return match next.call(ctx).await {
                Err(err) => match &self.options.callback {
                    Some(callback) => callback(ctx, AuthEvent::Error(&err)).await,
                    None => Err(err),
                },
                ok => ok,
            };
        }
        self.fail(ctx, &report).await
    }
}

impl AuthenticateMiddleware {
    async fn succeed(
        &self,
        ctx: &mut Context,
        user: Value,
        info: Option<Value>,
        next: &dyn Handler,
    ) -> Result<(), Error> {
        if let Some(callback) = &self.options.callback {
            let event = AuthEvent::Success {
                user: &user,
                info: info.as_ref(),
            };
            return callback(ctx, event).await;
        }

        let transformed = match &info {
            Some(info) if self.options.auth_info_enabled() => {
                Some(self.authenticator.transform_auth_info(info, ctx).await?)
            }
            _ => None,
        };

        if self.options.success_message {
            if let Some(fields) = info.as_ref().and_then(Value::as_object) {
                if let (Some(kind), Some(message)) = (
                    fields.get("type").and_then(Value::as_str),
                    fields.get("message"),
                ) {
                    let kind = kind.to_string();
                    let message = message.clone();
                    if let Some(session) = ctx.session.as_mut() {
                        session.push_message(&kind, message);
                    }
                }
            }
        }

        if let Some(property) = &self.options.assign_property {
            ctx.state.insert(property.clone(), user);
            return next.call(ctx).await;
        }

        ctx.login(user).await?;
        if let Some(transformed) = transformed {
            ctx.state.insert("authInfo".to_string(), transformed);
        }

        if let Some(default_url) = &self.options.success_return_to_or_redirect {
            let return_to = ctx
                .session
                .as_mut()
                .and_then(|session| session.remove("returnTo"))
                .and_then(|value| value.as_str().map(str::to_string));
            let url = return_to.unwrap_or_else(|| default_url.clone());
            ctx.response.redirect(&url, 302);
            return Ok(());
        }
        if let Some(url) = &self.options.success_redirect {
            ctx.response.redirect(url, 302);
            return Ok(());
        }
        next.call(ctx).await
    }

    async fn fail(&self, ctx: &mut Context, report: &FailureReport) -> Result<(), Error> {
        if let Some(callback) = &self.options.callback {
            return callback(ctx, AuthEvent::Failure(report)).await;
        }

        let status = report.first_status();
        if let Some(url) = &self.options.failure_redirect {
            if self.options.failure_message {
                if let Some(message) = report
                    .challenges
                    .first()
                    .and_then(|challenge| failure_message(challenge.as_ref()))
                {
                    if let Some(session) = ctx.session.as_mut() {
                        session.push_message("failed", Value::String(message));
                    }
                }
            }
            ctx.response.redirect(url, 302);
            return Ok(());
        }

        if self.options.fail_with_error {
            return Err(Error::Authentication {
                message: reason_phrase(status).to_string(),
                status,
            });
        }

        // Only string-typed challenges belong in the header; structured
        // challenges stay available to callbacks.
        for challenge in report.challenges.iter().flatten() {
            if let Value::String(challenge) = challenge {
                ctx.response.add_header("WWW-Authenticate", challenge.clone());
            }
        }
        ctx.response.end(status);
        Ok(())
    }
}

/// Extract the flash message carried by a failure challenge: a string
/// challenge as-is, or a challenge object's string `messages` field.
fn failure_message(challenge: Option<&Value>) -> Option<String> {
    match challenge? {
        Value::String(message) => Some(message.clone()),
        Value::Object(fields) => fields
            .get("messages")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}
