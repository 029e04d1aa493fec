//! Unified testing utilities for gatekit
//!
//! This module consolidates the test helpers used by the unit tests and the
//! integration suites into one place.
//!
//! ## Organization
//!
//! - [`builders`] - Fluent builders for per-request contexts
//! - [`mock`] - Mock transport, strategies and handlers
//!
//! The module is compiled for unit tests and behind the `testing` feature
//! for the integration tests under `tests/`.

pub mod builders;
pub mod mock;

pub use builders::ContextBuilder;
pub use mock::{CountingHandler, FailingHandler, MockStrategy, MockTransport};

/// Common test constants
pub mod constants {
    /// Default test client id
    pub const TEST_CLIENT_ID: &str = "clientID";

    /// Default test client secret
    pub const TEST_CLIENT_SECRET: &str = "clientSecret";

    /// Default test authorization endpoint
    pub const TEST_AUTHORIZATION_URL: &str = "https://test.com/oauth/authorize";

    /// Default test token endpoint
    pub const TEST_TOKEN_URL: &str = "https://test.com/oauth/token";

    /// Default test access token (RFC 6749 example value)
    pub const TEST_ACCESS_TOKEN: &str = "2YotnFZFEjr1zCsicMWpAA";

    /// Default test refresh token (RFC 6749 example value)
    pub const TEST_REFRESH_TOKEN: &str = "tGzv3JOkF0XG5Qx2TlKWIA";

    /// Default test authorization code (RFC 6749 example value)
    pub const TEST_CODE: &str = "SplxlOBeZQQYbYS6WxSbIA";
}
