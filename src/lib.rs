#![warn(clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)]

//! gatekit — a pluggable request-authentication middleware core
//!
//! An ordered list of authentication [`Strategy`] implementations runs
//! against each incoming request; the [`Authenticator`] handles their
//! success/failure/redirect/pass outcomes uniformly, serializes users into
//! the session through fallback chains, and exposes login state to
//! downstream handlers. The built-in OAuth2
//! [`AuthorizationCodeStrategy`] drives the three-legged
//! authorization-code handshake with opt-in CSRF state correlation.

/// Version of the gatekit crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod authenticator;
pub mod context;
pub mod errors;
pub mod middleware;
pub mod oauth2;
pub mod providers;
pub mod settings;
pub mod strategy;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use authenticator::{
    AuthCallback, AuthEvent, AuthenticateMiddleware, AuthenticateOptions, Authenticator, ChainFn,
    FailureReport, InitializeMiddleware,
};
pub use context::{Context, LoginOptions, RequestInfo, Response, Session};
pub use errors::Error;
pub use middleware::{run_stack, BoxFuture, FnHandler, Handler, Middleware, NoopHandler};
pub use oauth2::{
    AuthorizationCodeConfig, AuthorizationCodeStrategy, HttpTransport, NullStateStore,
    OAuth2Client, Scope, SessionStateStore, StateStore, StateStoreMeta, StateVerification,
    TokenResponse, VerifyFn, VerifyOutcome,
};
pub use providers::{strategy_from_provider, UserInfoProfileFetcher, UserProfile};
pub use settings::{GatekitSettings, ProviderSettings};
pub use strategy::{AuthResult, SessionStrategy, Strategy};
