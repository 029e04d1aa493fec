//! Per-request context
//!
//! The host HTTP framework is an external collaborator: it owns sockets,
//! routing and response writing. This module defines the neutral per-request
//! surface the authentication core actually consumes — request metadata and
//! query parameters, an optional session map, the downstream-visible `state`
//! map and a response sketch the host translates back into its own types.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::authenticator::Authenticator;
use crate::errors::{reason_phrase, Error};

/// JavaScript-style truthiness for opaque JSON values. Used wherever the
/// authentication contract distinguishes "a user" from "no user".
#[must_use]
pub fn value_is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// The request-side inputs the core reads. Headers are stored with
/// lowercased names, the query string pre-parsed.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    pub host: String,
    pub protocol: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    /// Whether forwarded headers from a reverse proxy are trusted when
    /// resolving the request origin.
    pub trust_proxy: bool,
}

impl Default for RequestInfo {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            path: "/".to_string(),
            host: "localhost".to_string(),
            protocol: "http".to_string(),
            headers: HashMap::new(),
            query: HashMap::new(),
            trust_proxy: false,
        }
    }
}

impl RequestInfo {
    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// The effective origin (`protocol://host`) of this request.
    /// `x-forwarded-proto` and `x-forwarded-host` are honored only when the
    /// proxy is trusted; a comma-separated forwarded value uses its first
    /// entry.
    #[must_use]
    pub fn origin(&self) -> String {
        let protocol = if self.trust_proxy {
            self.header("x-forwarded-proto")
                .and_then(|v| v.split(',').next())
                .map(str::trim)
        } else {
            None
        };
        let protocol = protocol.unwrap_or(&self.protocol);

        let host = if self.trust_proxy {
            self.header("x-forwarded-host").or_else(|| self.header("host"))
        } else {
            self.header("host")
        };
        let host = host.unwrap_or(&self.host);

        format!("{protocol}://{host}")
    }
}

/// The session collaborator: an ordered key/value map owned exclusively by
/// the current request. Its presence or absence on the context is itself
/// meaningful — several operations refuse to run without one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    values: Map<String, Value>,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.values.get_mut(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Read a field of a nested object entry, e.g. `passport.user`.
    #[must_use]
    pub fn get_nested(&self, key: &str, field: &str) -> Option<&Value> {
        self.values.get(key)?.as_object()?.get(field)
    }

    /// Write a field of a nested object entry, creating (or replacing a
    /// non-object value under) the entry as needed.
    pub fn set_nested(&mut self, key: &str, field: &str, value: Value) {
        let entry = self
            .values
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Some(fields) = entry.as_object_mut() {
            fields.insert(field.to_string(), value);
        }
    }

    /// Remove a field of a nested object entry. The parent entry is left in
    /// place even when it becomes empty.
    pub fn remove_nested(&mut self, key: &str, field: &str) -> Option<Value> {
        self.values.get_mut(key)?.as_object_mut()?.remove(field)
    }

    /// Append a flash message under `message.{kind}`, preserving existing
    /// entries.
    pub fn push_message(&mut self, kind: &str, message: Value) {
        let entry = self
            .values
            .entry("message".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Some(buckets) = entry.as_object_mut() else {
            return;
        };
        let bucket = buckets
            .entry(kind.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if !bucket.is_array() {
            *bucket = Value::Array(Vec::new());
        }
        if let Some(items) = bucket.as_array_mut() {
            items.push(message);
        }
    }

    /// The raw underlying map.
    #[must_use]
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }
}

impl From<Map<String, Value>> for Session {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

/// The response sketch the core writes into. The host framework maps this
/// onto its own response type after the middleware stack completes.
#[derive(Debug, Default)]
pub struct Response {
    pub status: Option<u16>,
    /// Reason phrase for the status, when ended by the authenticator.
    pub message: Option<String>,
    pub body: Option<String>,
    headers: HashMap<String, Vec<String>>,
    /// Set once the authenticator has produced a terminal response; no
    /// downstream middleware should run.
    pub finished: bool,
}

impl Response {
    /// Append a header value (headers are multi-valued, names lowercased).
    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&[String]> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    /// Redirect to `url` with the given status.
    pub fn redirect(&mut self, url: &str, status: u16) {
        self.status = Some(status);
        self.headers
            .insert("location".to_string(), vec![url.to_string()]);
        self.body = Some(format!("Redirecting to {url}."));
        self.finished = true;
    }

    /// Terminate the response with a bare status and its reason phrase.
    pub fn end(&mut self, status: u16) {
        let phrase = reason_phrase(status);
        self.status = Some(status);
        self.message = Some(phrase.to_string());
        self.body = Some(phrase.to_string());
        self.finished = true;
    }
}

/// Options for [`Context::login_with`].
#[derive(Debug, Clone)]
pub struct LoginOptions {
    /// When false, the user is only assigned to the context state and the
    /// session is left untouched.
    pub session: bool,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self { session: true }
    }
}

/// The per-request context threaded through the middleware stack.
pub struct Context {
    pub request: RequestInfo,
    pub session: Option<Session>,
    /// Downstream-visible request state (the authenticated user lives here
    /// under the authenticator's user property).
    pub state: Map<String, Value>,
    pub response: Response,
    /// The authenticator, attached by its `initialize` middleware.
    pub passport: Option<Arc<Authenticator>>,
}

impl Context {
    #[must_use]
    pub fn new(request: RequestInfo) -> Self {
        Self {
            request,
            session: None,
            state: Map::new(),
            response: Response::default(),
            passport: None,
        }
    }

    /// Query-string parameter lookup.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<&str> {
        self.request.query.get(name).map(String::as_str)
    }

    /// Establish a login session for `user`.
    ///
    /// # Errors
    ///
    /// Fails when the authenticator middleware is not in use, when the
    /// serializer chain fails or exhausts, or when no session is present.
    pub async fn login(&mut self, user: Value) -> Result<(), Error> {
        self.login_with(user, LoginOptions::default()).await
    }

    /// Establish a login for `user`, optionally without a session write.
    ///
    /// The initialize-check strictly precedes the session-check: a missing
    /// authenticator is reported even when a session is present, and the
    /// serializer chain runs before the session is required at all.
    ///
    /// # Errors
    ///
    /// See [`Context::login`].
    pub async fn login_with(&mut self, user: Value, options: LoginOptions) -> Result<(), Error> {
        let Some(passport) = self.passport.clone() else {
            return Err(Error::Config(
                "passport.initialize() middleware not in use".to_string(),
            ));
        };
        let property = passport.user_property().to_string();

        if !options.session {
            self.state.insert(property, user);
            return Ok(());
        }

        self.state.insert(property.clone(), user.clone());
        let serialized = match passport.serialize_user(&user, self).await {
            Ok(serialized) => serialized,
            Err(err) => {
                self.state.insert(property, Value::Null);
                return Err(err);
            }
        };

        let session_key = passport.session_key().to_string();
        let Some(session) = self.session.as_mut() else {
            return Err(Error::Config(
                "Should use session middleware before passport middleware".to_string(),
            ));
        };
        session.set_nested(&session_key, "user", serialized);
        Ok(())
    }

    /// Terminate the login session. A no-op when the authenticator or the
    /// session middleware is not in use.
    pub fn logout(&mut self) {
        let Some(passport) = self.passport.clone() else {
            return;
        };
        if self.session.is_none() {
            return;
        }
        self.state
            .insert(passport.user_property().to_string(), Value::Null);
        if let Some(session) = self.session.as_mut() {
            session.remove_nested(passport.session_key(), "user");
        }
    }

    /// Whether a user is established on this request.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.passport.as_ref().is_some_and(|passport| {
            self.state
                .get(passport.user_property())
                .is_some_and(value_is_truthy)
        })
    }

    #[must_use]
    pub fn is_unauthenticated(&self) -> bool {
        !self.is_authenticated()
    }
}
