//! Mock objects and fake implementations

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::authenticator::AuthenticateOptions;
use crate::context::Context;
use crate::errors::Error;
use crate::middleware::Handler;
use crate::oauth2::{HttpTransport, TransportRequest, TransportResponse};
use crate::strategy::{AuthResult, Strategy};

/// A scripted [`HttpTransport`]: canned responses are consumed in order and
/// every performed request is recorded for assertions. An empty queue
/// answers `200` with an empty body.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<TransportResponse, Error>>>,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response with the given status and body.
    pub fn push_response(&self, status: u16, body: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Ok(TransportResponse {
                status,
                body: body.into(),
            }));
    }

    /// Queue a JSON response.
    pub fn push_json(&self, status: u16, body: &Value) {
        self.push_response(status, body.to_string());
    }

    /// Queue a network-level failure.
    pub fn push_error(&self, message: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(Error::Transport(message.into())));
    }

    /// Every request performed so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn perform(&self, request: TransportRequest) -> Result<TransportResponse, Error> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| {
                Ok(TransportResponse {
                    status: 200,
                    body: String::new(),
                })
            })
    }
}

/// A strategy that always produces the same result.
pub struct MockStrategy {
    name: String,
    result: AuthResult,
}

impl MockStrategy {
    #[must_use]
    pub fn new(name: impl Into<String>, result: AuthResult) -> Self {
        Self {
            name: name.into(),
            result,
        }
    }

    #[must_use]
    pub fn passing(name: impl Into<String>) -> Self {
        Self::new(name, AuthResult::Pass)
    }

    #[must_use]
    pub fn failing(
        name: impl Into<String>,
        challenge: Option<Value>,
        status: Option<u16>,
    ) -> Self {
        Self::new(name, AuthResult::fail(challenge, status))
    }

    #[must_use]
    pub fn redirecting(name: impl Into<String>, url: impl Into<String>, status: u16) -> Self {
        Self::new(name, AuthResult::redirect_with_status(url, status))
    }

    #[must_use]
    pub fn succeeding(name: impl Into<String>, user: Value, info: Option<Value>) -> Self {
        Self::new(name, AuthResult::success(user, info))
    }
}

#[async_trait]
impl Strategy for MockStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(
        &self,
        _ctx: &mut Context,
        _options: &AuthenticateOptions,
    ) -> Result<AuthResult, Error> {
        Ok(self.result.clone())
    }
}

/// A downstream handler that counts its invocations.
#[derive(Default)]
pub struct CountingHandler {
    calls: AtomicUsize,
}

impl CountingHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for CountingHandler {
    async fn call(&self, _ctx: &mut Context) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A downstream handler that always errors, for exercising error routing.
pub struct FailingHandler {
    pub message: String,
}

impl FailingHandler {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl Handler for FailingHandler {
    async fn call(&self, _ctx: &mut Context) -> Result<(), Error> {
        Err(Error::Other(self.message.clone()))
    }
}
