//! Error taxonomy for the authentication core
//!
//! Three families of errors flow through the crate: configuration errors
//! (programming mistakes in the host application, e.g. an unknown strategy
//! name or missing middleware), OAuth2 protocol errors raised during the
//! authorization-code handshake, and the fixed-message serialization errors
//! produced by an exhausted serializer/deserializer chain. Authentication
//! *outcomes* (a strategy failing, a CSRF mismatch) are not errors — they are
//! `AuthResult` values handled by the authenticator.

use thiserror::Error;

/// Errors produced by the authentication core.
#[derive(Debug, Error)]
pub enum Error {
    /// A programming error in the host application: unknown strategy name,
    /// missing middleware, nameless strategy registration, invalid settings.
    #[error("{0}")]
    Config(String),

    /// An authentication failure escalated to an error via the
    /// `fail_with_error` option. Carries the HTTP status of the first
    /// recorded failure.
    #[error("{message}")]
    Authentication { message: String, status: u16 },

    /// The authorization server returned an error code on the authorization
    /// leg (anything other than `access_denied`, which is a plain failure).
    #[error("{message}")]
    Authorization {
        message: String,
        code: String,
        uri: Option<String>,
        status: u16,
    },

    /// The token endpoint rejected the exchange with a structured OAuth2
    /// error body.
    #[error("{message}")]
    Token {
        message: String,
        code: String,
        uri: Option<String>,
        status: u16,
    },

    /// A non-2xx HTTP response without a structured OAuth2 error body.
    #[error("{message}")]
    OAuth2 { message: String, status: u16 },

    /// A network-level failure from the HTTP transport.
    #[error("{0}")]
    Transport(String),

    /// The serializer chain exhausted without producing a value.
    #[error("Failed to serialize user into session")]
    Serialization,

    /// The deserializer chain exhausted without producing a terminal value.
    #[error("Failed to deserialize user out of session")]
    Deserialization,

    /// An error supplied by application code (verify callbacks, custom
    /// serializers, profile mapping).
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build an authorization error as received from the provider's
    /// authorization endpoint. The status is derived from the error code
    /// (`access_denied` → 403, `server_error` → 502, `temporarily_unavailable`
    /// → 503, anything else → 500) unless an explicit status is given, which
    /// always wins. A missing code defaults to `server_error`.
    #[must_use]
    pub fn authorization(
        message: impl Into<String>,
        uri: Option<String>,
        code: Option<String>,
        status: Option<u16>,
    ) -> Self {
        let code = code.unwrap_or_else(|| "server_error".to_string());
        let status = status.unwrap_or_else(|| authorization_status(&code));
        Error::Authorization {
            message: message.into(),
            code,
            uri,
            status,
        }
    }

    /// Build a token-endpoint error. The code defaults to `invalid_request`
    /// and the status to 500.
    #[must_use]
    pub fn token(
        message: impl Into<String>,
        uri: Option<String>,
        code: Option<String>,
        status: Option<u16>,
    ) -> Self {
        Error::Token {
            message: message.into(),
            code: code.unwrap_or_else(|| "invalid_request".to_string()),
            uri,
            status: status.unwrap_or(500),
        }
    }

    /// The HTTP status carried by this error, when it has one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Authentication { status, .. }
            | Error::Authorization { status, .. }
            | Error::Token { status, .. }
            | Error::OAuth2 { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Map an OAuth2 authorization error code to an HTTP status.
fn authorization_status(code: &str) -> u16 {
    match code {
        "access_denied" => 403,
        "server_error" => 502,
        "temporarily_unavailable" => 503,
        _ => 500,
    }
}

/// Canonical reason phrase for the status codes the authenticator responds
/// with. Unknown codes fall back to a generic phrase.
#[must_use]
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        301 => "Moved Permanently",
        302 => "Found",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown Status",
    }
}
