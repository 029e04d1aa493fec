//! Settings-driven provider strategies
//!
//! Builds [`AuthorizationCodeStrategy`] instances from
//! [`ProviderSettings`], wiring in a userinfo-endpoint profile fetcher when
//! one is configured. The profile shape follows the OIDC userinfo claims
//! the upstream learning platform exposes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Error;
use crate::oauth2::{
    AuthorizationCodeConfig, AuthorizationCodeStrategy, OAuth2Client, ProfileFetcher, Scope,
    VerifyFn,
};
use crate::settings::ProviderSettings;

/// A mapped user profile. `raw` and `json` carry the unmapped userinfo
/// payload for application code that needs more than the named claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub provider: String,
    pub raw: String,
    pub json: Value,
    pub email: Option<String>,
    pub username: Option<String>,
    pub sub: Option<String>,
    pub administrator: Option<Value>,
    pub locale: Option<String>,
    pub name: Option<String>,
    pub given_name: Option<String>,
}

impl UserProfile {
    /// Map a raw userinfo response body.
    ///
    /// # Errors
    ///
    /// Returns `Failed to parse user profile` when the body is not JSON.
    pub fn from_userinfo(provider: &str, raw: &str) -> Result<Self, Error> {
        let json: Value = serde_json::from_str(raw)
            .map_err(|_| Error::Other("Failed to parse user profile".to_string()))?;
        let text = |field: &str| {
            json.get(field)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Ok(Self {
            provider: provider.to_string(),
            raw: raw.to_string(),
            email: text("email"),
            username: text("preferred_username"),
            sub: text("sub"),
            administrator: json.get("administrator").cloned(),
            locale: text("locale"),
            name: text("name"),
            given_name: text("given_name"),
            json,
        })
    }
}

/// Fetches the profile from an OIDC-style userinfo endpoint with the access
/// token in the `Authorization` header.
pub struct UserInfoProfileFetcher {
    provider: String,
    url: String,
}

impl UserInfoProfileFetcher {
    #[must_use]
    pub fn new(provider: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ProfileFetcher for UserInfoProfileFetcher {
    async fn fetch(&self, client: &OAuth2Client, access_token: &str) -> Result<Value, Error> {
        let response = match client.get(&self.url, access_token).await {
            Ok(response) => response,
            Err(err) => {
                let message = err.to_string();
                // a structured provider error body carries its own message
                if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(&message) {
                    if fields.contains_key("error") {
                        if let Some(provider_message) =
                            fields.get("message").and_then(Value::as_str)
                        {
                            return Err(Error::Other(provider_message.to_string()));
                        }
                    }
                }
                return Err(Error::Other(format!(
                    "Failed to fetch user profile:{message}"
                )));
            }
        };
        let profile = UserProfile::from_userinfo(&self.provider, &response.body)?;
        serde_json::to_value(profile)
            .map_err(|_| Error::Other("Failed to parse user profile".to_string()))
    }
}

/// Build an authorization-code strategy for a configured provider. The
/// strategy registers under the provider's name and, when a userinfo
/// endpoint is configured, fetches profiles with header-based bearer auth.
///
/// # Errors
///
/// Returns a configuration error when the provider is missing its client id
/// or either endpoint.
pub fn strategy_from_provider(
    provider: &ProviderSettings,
    verify: VerifyFn,
) -> Result<AuthorizationCodeStrategy, Error> {
    let client_id = provider.resolved_client_id().ok_or_else(|| {
        Error::Config(format!("provider {} has no client_id configured", provider.name))
    })?;
    let client_secret = provider.resolved_client_secret().unwrap_or_default();
    let authorization_endpoint = provider.authorization_endpoint.clone().ok_or_else(|| {
        Error::Config(format!(
            "provider {} has no authorization_endpoint configured",
            provider.name
        ))
    })?;
    let token_endpoint = provider.token_endpoint.clone().ok_or_else(|| {
        Error::Config(format!(
            "provider {} has no token_endpoint configured",
            provider.name
        ))
    })?;

    let mut config = AuthorizationCodeConfig::new(
        client_id,
        client_secret,
        authorization_endpoint,
        token_endpoint,
    );
    config.callback_url = provider.callback_url.clone();
    if !provider.scopes.is_empty() {
        config.scope = Some(Scope::List(provider.scopes.clone()));
    }
    if let Some(separator) = &provider.scope_separator {
        config.scope_separator = separator.clone();
    }

    let mut strategy = AuthorizationCodeStrategy::new(config, verify).named(&provider.name);
    if let Some(userinfo) = &provider.userinfo_endpoint {
        strategy = strategy.with_profile_fetcher(Arc::new(UserInfoProfileFetcher::new(
            &provider.name,
            userinfo,
        )));
        strategy.client_mut().use_authorization_header_for_get = true;
    }
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, RequestInfo};
    use crate::oauth2::{HttpTransport, VerifyOutcome};
    use crate::strategy::{AuthResult, Strategy};
    use crate::testing::mock::MockTransport;
    use serde_json::json;

    fn provider_settings() -> ProviderSettings {
        ProviderSettings {
            name: "mooc".to_string(),
            display_name: Some("HKMOOC".to_string()),
            authorization_endpoint: Some("https://learn.example.org/oauth2/authorize/".to_string()),
            token_endpoint: Some("https://learn.example.org/oauth2/access_token/".to_string()),
            userinfo_endpoint: Some("https://learn.example.org/oauth2/user_info".to_string()),
            scopes: vec!["openid".to_string(), "profile".to_string()],
            scope_separator: None,
            callback_url: Some("https://app.example.org/oauth".to_string()),
            client_id: Some("clientID".to_string()),
            client_secret: Some("secret".to_string()),
            client_id_env: None,
            client_secret_env: None,
            enabled: true,
        }
    }

    #[test]
    fn profile_mapping_extracts_the_named_claims() {
        let raw = r#"{"email":"a@b.c","preferred_username":"ab","sub":"s1","administrator":false,"locale":"en","name":"A B","given_name":"A"}"#;
        let profile = UserProfile::from_userinfo("mooc", raw).unwrap();
        assert_eq!(profile.provider, "mooc");
        assert_eq!(profile.email.as_deref(), Some("a@b.c"));
        assert_eq!(profile.username.as_deref(), Some("ab"));
        assert_eq!(profile.sub.as_deref(), Some("s1"));
        assert_eq!(profile.administrator, Some(json!(false)));
        assert_eq!(profile.raw, raw);
        assert_eq!(profile.json["locale"], json!("en"));

        let err = UserProfile::from_userinfo("mooc", "not json").unwrap_err();
        assert_eq!(err.to_string(), "Failed to parse user profile");
    }

    #[test]
    fn missing_configuration_is_rejected() {
        let verify: VerifyFn = Arc::new(|_tokens, _profile| {
            Box::pin(async move { Ok(VerifyOutcome::default()) })
        });

        let mut settings = provider_settings();
        settings.client_id = None;
        let err = strategy_from_provider(&settings, verify.clone()).unwrap_err();
        assert!(err.to_string().contains("client_id"));

        let mut settings = provider_settings();
        settings.token_endpoint = None;
        let err = strategy_from_provider(&settings, verify).unwrap_err();
        assert!(err.to_string().contains("token_endpoint"));
    }

    #[tokio::test]
    async fn provider_strategy_fetches_the_profile_with_bearer_auth() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, &json!({"access_token": "at", "refresh_token": "rt"}));
        transport.push_json(
            200,
            &json!({"email": "a@b.c", "preferred_username": "ab", "sub": "s1"}),
        );

        let verify: VerifyFn = Arc::new(|tokens, profile| {
            Box::pin(async move {
                assert_eq!(tokens.access_token, "at");
                assert_eq!(profile["email"], json!("a@b.c"));
                assert_eq!(profile["provider"], json!("mooc"));
                Ok(VerifyOutcome {
                    user: Some(json!({"id": profile["email"]})),
                    info: None,
                })
            })
        });

        let strategy = strategy_from_provider(&provider_settings(), verify)
            .unwrap()
            .with_transport(transport.clone() as Arc<dyn HttpTransport>);
        assert_eq!(strategy.name(), "mooc");

        let mut request = RequestInfo::default();
        request.query.insert("code".to_string(), "abc".to_string());
        let mut ctx = Context::new(request);
        let result = strategy
            .authenticate(&mut ctx, &crate::authenticator::AuthenticateOptions::default())
            .await
            .unwrap();
        assert!(matches!(result, AuthResult::Success { .. }));

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        // the userinfo request authenticates via the Authorization header
        assert!(requests[1]
            .headers
            .iter()
            .any(|(name, value)| name == "Authorization" && value == "Bearer at"));
        assert!(!requests[1].url.contains("access_token="));
    }

    #[tokio::test]
    async fn profile_fetch_failures_are_reported() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, &json!({"access_token": "at"}));
        transport.push_response(500, "upstream broke");

        let verify: VerifyFn = Arc::new(|_tokens, _profile| {
            Box::pin(async move { Err(Error::Other("verify callback should not be called".into())) })
        });
        let strategy = strategy_from_provider(&provider_settings(), verify)
            .unwrap()
            .with_transport(transport as Arc<dyn HttpTransport>);

        let mut request = RequestInfo::default();
        request.query.insert("code".to_string(), "abc".to_string());
        let mut ctx = Context::new(request);
        let err = strategy
            .authenticate(&mut ctx, &crate::authenticator::AuthenticateOptions::default())
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Failed to fetch user profile:"));
        assert!(err.to_string().contains("upstream broke"));
    }
}
