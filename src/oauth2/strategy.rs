//! The OAuth2 authorization-code-grant strategy
//!
//! Drives the three-legged handshake across two HTTP requests: the
//! authorization redirect, then the provider callback with its token
//! exchange, profile fetch and application verify call. CSRF correlation is
//! delegated to the configured [`StateStore`].

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::{Map, Value};
use url::Url;

use crate::authenticator::AuthenticateOptions;
use crate::context::{value_is_truthy, Context};
use crate::errors::Error;
use crate::middleware::BoxFuture;
use crate::oauth2::client::{HttpTransport, OAuth2Client, TokenResponse};
use crate::oauth2::state::{NullStateStore, SessionStateStore, StateStore, StateStoreMeta};
use crate::oauth2::Scope;

/// What the application's verify callback decided. A missing or falsy user
/// fails the attempt with `info` as the challenge.
#[derive(Debug, Clone, Default)]
pub struct VerifyOutcome {
    pub user: Option<Value>,
    pub info: Option<Value>,
}

/// The application-supplied verify callback: receives the token response
/// and the user profile, and produces the application user.
pub type VerifyFn = Arc<
    dyn Fn(TokenResponse, Value) -> BoxFuture<'static, Result<VerifyOutcome, Error>>
        + Send
        + Sync,
>;

/// Fetches the user profile for an access token. The default (no fetcher)
/// stands in an empty object.
#[async_trait]
pub trait ProfileFetcher: Send + Sync {
    /// Fetch and map the profile.
    ///
    /// # Errors
    ///
    /// Propagates fetch and mapping failures.
    async fn fetch(&self, client: &OAuth2Client, access_token: &str) -> Result<Value, Error>;
}

/// Static configuration for an [`AuthorizationCodeStrategy`].
#[derive(Debug, Clone)]
pub struct AuthorizationCodeConfig {
    pub client_id: String,
    pub client_secret: String,
    pub authorization_url: String,
    pub token_url: String,
    /// Where the provider redirects back to. Relative URLs are resolved
    /// against the request origin at authenticate time.
    pub callback_url: Option<String>,
    pub scope: Option<Scope>,
    pub scope_separator: String,
    /// Session key for the CSRF state entry; defaults to
    /// `oauth2:{authorization host}`.
    pub session_key: Option<String>,
    /// Skip the profile fetch and hand the verify callback an empty object.
    pub skip_user_profile: bool,
    pub custom_headers: Vec<(String, String)>,
}

impl AuthorizationCodeConfig {
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        authorization_url: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorization_url: authorization_url.into(),
            token_url: token_url.into(),
            callback_url: None,
            scope: None,
            scope_separator: " ".to_string(),
            session_key: None,
            skip_user_profile: false,
            custom_headers: Vec::new(),
        }
    }

    /// The effective session key for CSRF state.
    #[must_use]
    pub fn state_session_key(&self) -> String {
        if let Some(key) = &self.session_key {
            return key.clone();
        }
        let host = Url::parse(&self.authorization_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_default();
        format!("oauth2:{host}")
    }
}

/// Authorization-code-grant strategy. Registers as `oauth2` unless renamed.
pub struct AuthorizationCodeStrategy {
    name: String,
    config: AuthorizationCodeConfig,
    client: OAuth2Client,
    verify: VerifyFn,
    state_store: Arc<dyn StateStore>,
    profile_fetcher: Option<Arc<dyn ProfileFetcher>>,
}

impl std::fmt::Debug for AuthorizationCodeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationCodeStrategy")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AuthorizationCodeStrategy {
    #[must_use]
    pub fn new(config: AuthorizationCodeConfig, verify: VerifyFn) -> Self {
        let client = OAuth2Client::new(&config.client_id, &config.client_secret, "")
            .authorize_url(&config.authorization_url)
            .access_token_url(&config.token_url)
            .custom_headers(config.custom_headers.clone());
        Self {
            name: "oauth2".to_string(),
            config,
            client,
            verify,
            state_store: Arc::new(NullStateStore),
            profile_fetcher: None,
        }
    }

    /// Register under a different name (e.g. the provider's).
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Opt in to session-backed CSRF protection.
    #[must_use]
    pub fn with_session_state(mut self) -> Self {
        let key = self.config.state_session_key();
        self.state_store = Arc::new(SessionStateStore::new(key));
        self
    }

    /// Use a custom state store.
    #[must_use]
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = store;
        self
    }

    #[must_use]
    pub fn with_profile_fetcher(mut self, fetcher: Arc<dyn ProfileFetcher>) -> Self {
        self.profile_fetcher = Some(fetcher);
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.client = self.client.transport(transport);
        self
    }

    /// Mutable access to the underlying client for runtime reconfiguration
    /// (auth method, token field name, header-based GETs).
    pub fn client_mut(&mut self) -> &mut OAuth2Client {
        &mut self.client
    }

    /// The effective redirect URI for this request: the per-invocation
    /// option wins over the configured URL; relative values resolve against
    /// the request origin.
    fn effective_callback_url(
        &self,
        ctx: &Context,
        options: &AuthenticateOptions,
    ) -> Result<Option<String>, Error> {
        let configured = options
            .callback_url
            .as_ref()
            .or(self.config.callback_url.as_ref());
        let Some(raw) = configured else {
            return Ok(None);
        };
        if Url::parse(raw).is_ok() {
            return Ok(Some(raw.clone()));
        }
        let origin = ctx.request.origin();
        let resolved = Url::parse(&origin)
            .and_then(|base| base.join(raw))
            .map_err(|err| {
                Error::Config(format!("unable to resolve relative callback URL {raw}: {err}"))
            })?;
        Ok(Some(resolved.to_string()))
    }

    /// The callback leg: verify state, exchange the code, fetch the
    /// profile, run the application verify.
    async fn exchange_code(
        &self,
        ctx: &mut Context,
        options: &AuthenticateOptions,
        code: &str,
    ) -> Result<crate::strategy::AuthResult, Error> {
        use crate::strategy::AuthResult;

        let callback_url = self.effective_callback_url(ctx, options)?;

        let provided_state = ctx.query("state").unwrap_or_default().to_string();
        let verification = self.state_store.verify(ctx, &provided_state).await?;
        if !verification.ok {
            return Ok(AuthResult::fail(
                Some(Value::String(verification.message)),
                Some(403),
            ));
        }

        let mut extra: Vec<(String, String)> = Vec::new();
        if let Some(url) = callback_url {
            extra.push(("redirect_uri".to_string(), url));
        }
        let tokens = self
            .client
            .get_oauth_access_token(code, &extra)
            .await
            .map_err(wrap_token_error)?;

        let profile = if self.config.skip_user_profile {
            Value::Object(Map::new())
        } else {
            self.user_profile(&tokens.access_token).await?
        };

        let outcome = (self.verify)(tokens, profile).await?;
        match outcome.user {
            Some(user) if value_is_truthy(&user) => Ok(AuthResult::success(user, outcome.info)),
            _ => Ok(AuthResult::fail(outcome.info, None)),
        }
    }

    /// The authorization-request leg: build the authorize URL and redirect.
    async fn request_authorization(
        &self,
        ctx: &mut Context,
        options: &AuthenticateOptions,
    ) -> Result<crate::strategy::AuthResult, Error> {
        use crate::strategy::AuthResult;

        let mut params: Vec<(String, String)> =
            vec![("response_type".to_string(), "code".to_string())];
        if let Some(url) = self.effective_callback_url(ctx, options)? {
            params.push(("redirect_uri".to_string(), url));
        }
        if let Some(scope) = options.scope.as_ref().or(self.config.scope.as_ref()) {
            params.push((
                "scope".to_string(),
                scope.join(&self.config.scope_separator),
            ));
        }
        if let Some(state) = &options.state {
            params.push(("state".to_string(), state.clone()));
        }

        let meta = StateStoreMeta {
            authorization_url: self.config.authorization_url.clone(),
            token_url: self.config.token_url.clone(),
            client_id: self.config.client_id.clone(),
        };
        let token = self.state_store.store(ctx, Some(&meta)).await?;
        if !token.is_empty() {
            match params.iter_mut().find(|(name, _)| name == "state") {
                Some(entry) => entry.1 = token,
                None => params.push(("state".to_string(), token)),
            }
        }

        let url = self.client.get_authorize_url(&params);
        debug!("redirecting to authorization endpoint for strategy {}", self.name);
        Ok(AuthResult::redirect(url))
    }

    async fn user_profile(&self, access_token: &str) -> Result<Value, Error> {
        match &self.profile_fetcher {
            Some(fetcher) => fetcher.fetch(&self.client, access_token).await,
            None => Ok(Value::Object(Map::new())),
        }
    }
}

#[async_trait]
impl crate::strategy::Strategy for AuthorizationCodeStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(
        &self,
        ctx: &mut Context,
        options: &AuthenticateOptions,
    ) -> Result<crate::strategy::AuthResult, Error> {
        use crate::strategy::AuthResult;

        if let Some(error) = ctx.query("error").map(str::to_string) {
            let description = ctx.query("error_description").map(str::to_string);
            if error == "access_denied" {
                return Ok(AuthResult::fail(description.map(Value::String), None));
            }
            let uri = ctx.query("error_uri").map(str::to_string);
            return Err(Error::authorization(
                description.unwrap_or_default(),
                uri,
                Some(error),
                None,
            ));
        }

        if let Some(code) = ctx.query("code").map(str::to_string) {
            return self.exchange_code(ctx, options, &code).await;
        }
        self.request_authorization(ctx, options).await
    }
}

/// Translate a raw token-endpoint failure into the typed taxonomy: a
/// structured OAuth2 error body becomes a `Token` error, any other HTTP
/// failure stays an `OAuth2` error, and network failures stay `Transport` —
/// all prefixed so callers see what failed.
fn wrap_token_error(err: Error) -> Error {
    match err {
        Error::OAuth2 { message, status } => {
            if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(&message) {
                if let Some(code) = fields.get("error").and_then(Value::as_str) {
                    let description = fields
                        .get("error_description")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    return Error::Token {
                        message: format!("Failed to obtain access token:{description}"),
                        code: code.to_string(),
                        uri: fields
                            .get("error_uri")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        status,
                    };
                }
            }
            Error::OAuth2 {
                message: format!("Failed to obtain access token:{message}"),
                status,
            }
        }
        Error::Transport(message) => {
            Error::Transport(format!("Failed to obtain access token:{message}"))
        }
        other => other,
    }
}
