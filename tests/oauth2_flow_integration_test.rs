//! Integration tests for the full OAuth2 authorization-code round trip,
//! driven through the authenticator middleware with a scripted transport.

use std::sync::Arc;

use serde_json::{json, Value};
use url::Url;

use gatekit::testing::constants::{
    TEST_ACCESS_TOKEN, TEST_AUTHORIZATION_URL, TEST_CLIENT_ID, TEST_CODE, TEST_REFRESH_TOKEN,
    TEST_TOKEN_URL,
};
use gatekit::testing::{ContextBuilder, CountingHandler, MockTransport};
use gatekit::{
    AuthenticateOptions, Authenticator, AuthorizationCodeConfig, AuthorizationCodeStrategy,
    BoxFuture, Context, Error, HttpTransport, Middleware, NoopHandler, VerifyFn, VerifyOutcome,
};

fn ser_id<'a>(user: &'a Value, _ctx: &'a Context) -> BoxFuture<'a, Result<Option<Value>, Error>> {
    Box::pin(async move { Ok(user.get("id").cloned()) })
}

fn verify_accepting() -> VerifyFn {
    Arc::new(|tokens, _profile| {
        Box::pin(async move {
            assert_eq!(tokens.access_token, TEST_ACCESS_TOKEN);
            Ok(VerifyOutcome {
                user: Some(json!({"id": "1234"})),
                info: Some(json!({"type": "login", "message": "Hello"})),
            })
        })
    })
}

fn flow_strategy(transport: &Arc<MockTransport>) -> AuthorizationCodeStrategy {
    let mut config = AuthorizationCodeConfig::new(
        TEST_CLIENT_ID,
        "qwer",
        TEST_AUTHORIZATION_URL,
        TEST_TOKEN_URL,
    );
    config.callback_url = Some("https://app.test.com/oauth/callback".to_string());
    config.skip_user_profile = true;
    AuthorizationCodeStrategy::new(config, verify_accepting())
        .with_session_state()
        .with_transport(transport.clone() as Arc<dyn HttpTransport>)
}

fn state_param(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(name, _)| name == "state")
                .map(|(_, value)| value.into_owned())
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn the_three_legged_flow_logs_the_user_in() {
    let transport = Arc::new(MockTransport::new());
    transport.push_json(
        200,
        &json!({"access_token": TEST_ACCESS_TOKEN, "refresh_token": TEST_REFRESH_TOKEN}),
    );

    let auth = Arc::new(Authenticator::new());
    auth.add_serializer(ser_id);
    auth.register(Arc::new(flow_strategy(&transport))).unwrap();

    // leg 1: no query params — the middleware responds with the
    // authorization redirect
    let middleware = auth.authenticate("oauth2", AuthenticateOptions::default());
    let mut ctx = ContextBuilder::new().with_session().build();
    auth.initialize().call(&mut ctx, &NoopHandler).await.unwrap();
    middleware.call(&mut ctx, &NoopHandler).await.unwrap();
    assert_eq!(ctx.response.status, Some(302));
    let location = ctx
        .response
        .header("Location")
        .and_then(|values| values.first().cloned())
        .unwrap_or_default();
    assert!(location.starts_with(TEST_AUTHORIZATION_URL));
    assert!(location.contains("response_type=code"));
    assert!(location.contains(&format!("client_id={TEST_CLIENT_ID}")));
    let state = state_param(&location);
    assert_eq!(state.len(), 32);

    // leg 2: the provider redirects back with code and state on a fresh
    // request carrying the same session
    let session = ctx.session.clone().unwrap();
    let mut callback_ctx = ContextBuilder::new()
        .query("code", TEST_CODE)
        .query("state", state)
        .build();
    callback_ctx.session = Some(session);
    auth.initialize()
        .call(&mut callback_ctx, &NoopHandler)
        .await
        .unwrap();
    let tail = CountingHandler::new();
    middleware.call(&mut callback_ctx, &tail).await.unwrap();

    assert_eq!(tail.calls(), 1);
    assert_eq!(callback_ctx.state.get("user"), Some(&json!({"id": "1234"})));
    assert_eq!(
        callback_ctx
            .session
            .as_ref()
            .and_then(|s| s.get_nested("passport", "user")),
        Some(&json!("1234"))
    );
    assert!(callback_ctx.is_authenticated());

    // the token exchange sent the code and redirect URI
    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url, TEST_TOKEN_URL);
    let body = requests[0].body.clone().unwrap_or_default();
    assert!(body.contains(&format!("code={TEST_CODE}")));
    assert!(body.contains("grant_type=authorization_code"));
    assert!(body.contains("redirect_uri=https%3A%2F%2Fapp.test.com%2Foauth%2Fcallback"));
}

#[tokio::test]
async fn the_csrf_state_is_single_use() {
    let transport = Arc::new(MockTransport::new());
    transport.push_json(200, &json!({"access_token": TEST_ACCESS_TOKEN}));
    transport.push_json(200, &json!({"access_token": TEST_ACCESS_TOKEN}));

    let auth = Arc::new(Authenticator::new());
    auth.add_serializer(ser_id);
    auth.register(Arc::new(flow_strategy(&transport))).unwrap();
    let middleware = auth.authenticate("oauth2", AuthenticateOptions::default());

    let mut ctx = ContextBuilder::new().with_session().build();
    auth.initialize().call(&mut ctx, &NoopHandler).await.unwrap();
    middleware.call(&mut ctx, &NoopHandler).await.unwrap();
    let location = ctx
        .response
        .header("Location")
        .and_then(|values| values.first().cloned())
        .unwrap_or_default();
    let state = state_param(&location);

    let session = ctx.session.clone().unwrap();
    let mut callback_ctx = ContextBuilder::new()
        .query("code", TEST_CODE)
        .query("state", state.clone())
        .build();
    callback_ctx.session = Some(session);
    auth.initialize()
        .call(&mut callback_ctx, &NoopHandler)
        .await
        .unwrap();
    middleware.call(&mut callback_ctx, &NoopHandler).await.unwrap();
    assert!(callback_ctx.is_authenticated());

    // replaying the same state against the same session fails with 403
    let session = callback_ctx.session.clone().unwrap();
    let mut replay_ctx = ContextBuilder::new()
        .query("code", TEST_CODE)
        .query("state", state)
        .build();
    replay_ctx.session = Some(session);
    middleware.call(&mut replay_ctx, &NoopHandler).await.unwrap();
    assert_eq!(replay_ctx.response.status, Some(403));
    assert!(replay_ctx.response.finished);
}

#[tokio::test]
async fn access_denied_can_redirect_to_the_failure_target() {
    let transport = Arc::new(MockTransport::new());
    let auth = Arc::new(Authenticator::new());
    auth.register(Arc::new(flow_strategy(&transport))).unwrap();

    let middleware = auth.authenticate(
        "oauth2",
        AuthenticateOptions {
            failure_redirect: Some("/login".to_string()),
            failure_message: true,
            ..AuthenticateOptions::default()
        },
    );

    let mut ctx = ContextBuilder::new()
        .query("error", "access_denied")
        .query("error_description", "user said no")
        .with_session()
        .build();
    middleware.call(&mut ctx, &NoopHandler).await.unwrap();
    assert_eq!(ctx.response.status, Some(302));
    assert!(ctx
        .response
        .body
        .as_deref()
        .is_some_and(|b| b.contains("/login")));
    let failed = ctx
        .session
        .as_ref()
        .and_then(|s| s.get_nested("message", "failed"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    assert_eq!(failed, vec![json!("user said no")]);
    // no token-endpoint call was made
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn provider_errors_escape_the_middleware() {
    let transport = Arc::new(MockTransport::new());
    let auth = Arc::new(Authenticator::new());
    auth.register(Arc::new(flow_strategy(&transport))).unwrap();
    let middleware = auth.authenticate("oauth2", AuthenticateOptions::default());

    let mut ctx = ContextBuilder::new()
        .query("error", "temporarily_unavailable")
        .with_session()
        .build();
    let err = middleware.call(&mut ctx, &NoopHandler).await.unwrap_err();
    match err {
        Error::Authorization { code, status, .. } => {
            assert_eq!(code, "temporarily_unavailable");
            assert_eq!(status, 503);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // the middleware did not translate the error into a response
    assert!(!ctx.response.finished);
}

#[tokio::test]
async fn success_redirect_consumes_the_session_return_target() {
    let transport = Arc::new(MockTransport::new());
    transport.push_json(200, &json!({"access_token": TEST_ACCESS_TOKEN}));

    let auth = Arc::new(Authenticator::new());
    auth.add_serializer(ser_id);
    auth.register(Arc::new(flow_strategy(&transport))).unwrap();
    let middleware = auth.authenticate(
        "oauth2",
        AuthenticateOptions {
            success_return_to_or_redirect: Some("/".to_string()),
            ..AuthenticateOptions::default()
        },
    );

    let mut ctx = ContextBuilder::new().with_session().build();
    auth.initialize().call(&mut ctx, &NoopHandler).await.unwrap();
    middleware.call(&mut ctx, &NoopHandler).await.unwrap();
    let state = state_param(
        &ctx.response
            .header("Location")
            .and_then(|values| values.first().cloned())
            .unwrap_or_default(),
    );

    let mut session = ctx.session.clone().unwrap();
    session.set("returnTo", json!("/course/42"));
    let mut callback_ctx = ContextBuilder::new()
        .query("code", TEST_CODE)
        .query("state", state)
        .build();
    callback_ctx.session = Some(session);
    auth.initialize()
        .call(&mut callback_ctx, &NoopHandler)
        .await
        .unwrap();
    middleware.call(&mut callback_ctx, &NoopHandler).await.unwrap();

    assert_eq!(callback_ctx.response.status, Some(302));
    assert!(callback_ctx
        .response
        .body
        .as_deref()
        .is_some_and(|b| b.contains("/course/42")));
    assert!(callback_ctx
        .session
        .as_ref()
        .is_some_and(|s| !s.contains("returnTo")));
}
