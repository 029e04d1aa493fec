//! Fluent builders for test contexts

use serde_json::Value;

use crate::context::{Context, RequestInfo, Session};

/// Builds a [`Context`] the way a host framework would hand one to the
/// middleware stack.
#[derive(Default)]
pub struct ContextBuilder {
    request: RequestInfo,
    session: Option<Session>,
}

impl ContextBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.request.path = path.into();
        self
    }

    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.query.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.request
            .headers
            .insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn trust_proxy(mut self) -> Self {
        self.request.trust_proxy = true;
        self
    }

    /// Attach an empty session, as the host's session middleware would.
    #[must_use]
    pub fn with_session(mut self) -> Self {
        self.session.get_or_insert_with(Session::new);
        self
    }

    /// Attach a session (if absent) and seed one value into it.
    #[must_use]
    pub fn session_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.session
            .get_or_insert_with(Session::new)
            .set(key, value);
        self
    }

    #[must_use]
    pub fn build(self) -> Context {
        let mut ctx = Context::new(self.request);
        ctx.session = self.session;
        ctx
    }
}
