//! Low-level OAuth2 HTTP client
//!
//! Wraps a provider's authorization, token and resource endpoints. The wire
//! layer sits behind the [`HttpTransport`] trait so tests (and embedders
//! with their own HTTP stack) can inject a fake; the default implementation
//! rides on `reqwest`.

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::{Map, Value};

use crate::errors::Error;

/// Default authorization endpoint path, relative to the base site.
pub const DEFAULT_AUTHORIZE_PATH: &str = "/oauth/authorize";

/// Default token endpoint path, relative to the base site.
pub const DEFAULT_ACCESS_TOKEN_PATH: &str = "/oauth/access_token";

const DEFAULT_USER_AGENT: &str = concat!("gatekit/", env!("CARGO_PKG_VERSION"));

/// A request handed to the transport. Headers are pre-merged; the body is
/// already encoded.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// What the transport got back, regardless of status.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// The pluggable wire layer. Implementations return every HTTP response
/// as-is (status classification happens in the client) and reserve errors
/// for network-level failures.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform one HTTP exchange.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] when the request cannot be performed at
    /// all (DNS, connect, TLS, read failures).
    async fn perform(&self, request: TransportRequest) -> Result<TransportResponse, Error>;
}

/// The default transport, backed by a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn perform(&self, request: TransportRequest) -> Result<TransportResponse, Error> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|err| Error::Transport(err.to_string()))?;
        let mut builder = self.client.request(method, request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;
        Ok(TransportResponse { status, body })
    }
}

/// A successful token-endpoint exchange. `params` carries every response
/// field other than the two named tokens.
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub params: Map<String, Value>,
}

/// OAuth2 provider client.
pub struct OAuth2Client {
    client_id: String,
    client_secret: String,
    base_site: String,
    authorize_url: String,
    access_token_url: String,
    custom_headers: Vec<(String, String)>,
    /// Name of the access-token field in token responses and GET query
    /// params. Mutable to allow runtime reconfiguration.
    pub access_token_name: String,
    /// Scheme used in the `Authorization` header for authenticated GETs.
    pub auth_method: String,
    /// Send the access token in an `Authorization` header instead of a
    /// query parameter.
    pub use_authorization_header_for_get: bool,
    transport: Arc<dyn HttpTransport>,
}

impl OAuth2Client {
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        base_site: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            base_site: base_site.into(),
            authorize_url: DEFAULT_AUTHORIZE_PATH.to_string(),
            access_token_url: DEFAULT_ACCESS_TOKEN_PATH.to_string(),
            custom_headers: Vec::new(),
            access_token_name: "access_token".to_string(),
            auth_method: "Bearer".to_string(),
            use_authorization_header_for_get: false,
            transport: Arc::new(ReqwestTransport::new()),
        }
    }

    #[must_use]
    pub fn authorize_url(mut self, url: impl Into<String>) -> Self {
        self.authorize_url = url.into();
        self
    }

    #[must_use]
    pub fn access_token_url(mut self, url: impl Into<String>) -> Self {
        self.access_token_url = url.into();
        self
    }

    /// Headers sent with every request (per-call headers win on conflict).
    #[must_use]
    pub fn custom_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.custom_headers = headers;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The `Authorization` header value for `access_token`.
    #[must_use]
    pub fn build_auth_header(&self, access_token: &str) -> String {
        format!("{} {}", self.auth_method, access_token)
    }

    /// Build the authorization-endpoint URL with the given query params.
    ///
    /// Query pairs templated into the configured authorize URL keep their
    /// position; call-site params override their values in place and append
    /// new keys after them. `client_id` is always merged in last.
    #[must_use]
    pub fn get_authorize_url(&self, params: &[(String, String)]) -> String {
        let full = format!("{}{}", self.base_site, self.authorize_url);
        let (base, mut merged) = match full.split_once('?') {
            Some((base, templated)) => (base.to_string(), parse_query(templated)),
            None => (full, Vec::new()),
        };
        for (name, value) in params {
            merge_pair(&mut merged, name, value.clone());
        }
        merge_pair(&mut merged, "client_id", self.client_id.clone());
        format!("{base}?{}", encode_query(&merged))
    }

    /// Exchange an authorization code (or, with `grant_type=refresh_token`,
    /// a refresh token) at the token endpoint.
    ///
    /// # Errors
    ///
    /// Propagates [`OAuth2Client::request`] failures unchanged. A 2xx
    /// response missing the configured access-token field is an
    /// [`Error::OAuth2`] with status 400 whose message is the JSON of the
    /// request credentials.
    pub async fn get_oauth_access_token(
        &self,
        code: &str,
        extra_params: &[(String, String)],
    ) -> Result<TokenResponse, Error> {
        let mut grant_type = "authorization_code".to_string();
        let mut extras: Vec<(String, String)> = Vec::new();
        for (name, value) in extra_params {
            if name == "grant_type" {
                grant_type = value.clone();
            } else {
                extras.push((name.clone(), value.clone()));
            }
        }

        let mut body: Vec<(String, String)> = vec![("grant_type".to_string(), grant_type.clone())];
        if grant_type == "refresh_token" {
            body.push(("refresh_token".to_string(), code.to_string()));
        } else {
            body.push(("code".to_string(), code.to_string()));
        }
        body.push(("client_id".to_string(), self.client_id.clone()));
        body.push(("client_secret".to_string(), self.client_secret.clone()));
        body.extend(extras);

        let url = format!("{}{}", self.base_site, self.access_token_url);
        debug!("exchanging {grant_type} grant at {url}");
        let headers = vec![(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        )];
        let response = self
            .request("POST", &url, &headers, Some(encode_query(&body)), None)
            .await?;

        let mut params = parse_token_body(&response.body);
        let access_token = match params.remove(&self.access_token_name) {
            Some(Value::String(token)) if !token.is_empty() => token,
            _ => {
                // Intentionally mirrors the historical contract: the message
                // is the JSON of the request credentials, secret included.
                let message = serde_json::to_string(&serde_json::json!({
                    "client_id": self.client_id,
                    "client_secret": self.client_secret,
                    "code": code,
                }))
                .unwrap_or_default();
                return Err(Error::OAuth2 {
                    message,
                    status: 400,
                });
            }
        };
        let refresh_token = match params.remove("refresh_token") {
            Some(Value::String(token)) => Some(token),
            Some(other) => Some(other.to_string()),
            None => None,
        };
        Ok(TokenResponse {
            access_token,
            refresh_token,
            params,
        })
    }

    /// Authenticated GET against a provider resource.
    ///
    /// # Errors
    ///
    /// See [`OAuth2Client::request`].
    pub async fn get(&self, url: &str, access_token: &str) -> Result<TransportResponse, Error> {
        if self.use_authorization_header_for_get {
            let headers = vec![(
                "Authorization".to_string(),
                self.build_auth_header(access_token),
            )];
            self.request("GET", url, &headers, None, None).await
        } else {
            self.request("GET", url, &[], None, Some(access_token)).await
        }
    }

    /// The common HTTP primitive: merges headers, optionally appends the
    /// access token as a query parameter, and classifies responses.
    ///
    /// # Errors
    ///
    /// A non-2xx response is an [`Error::OAuth2`] carrying the HTTP status
    /// and the raw body; network failures surface as [`Error::Transport`].
    pub async fn request(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: Option<String>,
        access_token: Option<&str>,
    ) -> Result<TransportResponse, Error> {
        let mut url = url.to_string();
        if let Some(token) = access_token {
            let pair = format!(
                "{}={}",
                urlencoding::encode(&self.access_token_name),
                urlencoding::encode(token)
            );
            url = if url.contains('?') {
                format!("{url}&{pair}")
            } else {
                format!("{url}?{pair}")
            };
        }

        let content_length = body.as_ref().map_or(0, String::len);
        let mut merged: Vec<(String, String)> = vec![
            ("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string()),
            ("Content-Length".to_string(), content_length.to_string()),
        ];
        for (name, value) in &self.custom_headers {
            merge_header(&mut merged, name, value.clone());
        }
        for (name, value) in headers {
            merge_header(&mut merged, name, value.clone());
        }

        let response = self
            .transport
            .perform(TransportRequest {
                method: method.to_string(),
                url,
                headers: merged,
                body,
            })
            .await?;
        if response.status < 200 || response.status >= 300 {
            return Err(Error::OAuth2 {
                message: response.body,
                status: response.status,
            });
        }
        Ok(response)
    }
}

/// Parse a token-endpoint response body: JSON object first, form-encoded
/// fallback.
fn parse_token_body(body: &str) -> Map<String, Value> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map,
        _ => parse_query(body)
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect(),
    }
}

/// Decode an `application/x-www-form-urlencoded` pair list.
fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(name), decode_component(value))
        })
        .collect()
}

fn decode_component(component: &str) -> String {
    urlencoding::decode(component)
        .map(std::borrow::Cow::into_owned)
        .unwrap_or_else(|_| component.to_string())
}

/// Encode a pair list as a query string (percent-style: space → `%20`).
fn encode_query(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(name, value)| {
            format!(
                "{}={}",
                urlencoding::encode(name),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Update a pair in place when the name exists, append otherwise.
fn merge_pair(pairs: &mut Vec<(String, String)>, name: &str, value: String) {
    match pairs.iter_mut().find(|(existing, _)| existing == name) {
        Some(entry) => entry.1 = value,
        None => pairs.push((name.to_string(), value)),
    }
}

/// Like [`merge_pair`] but case-insensitive, for HTTP headers.
fn merge_header(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    match headers
        .iter_mut()
        .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
    {
        Some(entry) => entry.1 = value,
        None => headers.push((name.to_string(), value)),
    }
}
