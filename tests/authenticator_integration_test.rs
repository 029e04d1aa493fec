//! Integration tests for the orchestration core: the middleware stack,
//! the context augmentation and custom outcome callbacks.

use std::sync::Arc;

use serde_json::{json, Value};

use gatekit::testing::{ContextBuilder, CountingHandler, FailingHandler, MockStrategy};
use gatekit::{
    run_stack, AuthEvent, AuthenticateOptions, Authenticator, BoxFuture, Context, Error,
    Middleware, NoopHandler,
};

fn ser_id<'a>(user: &'a Value, _ctx: &'a Context) -> BoxFuture<'a, Result<Option<Value>, Error>> {
    Box::pin(async move { Ok(user.get("id").cloned()) })
}

fn deser_wrap<'a>(
    serialized: &'a Value,
    _ctx: &'a Context,
) -> BoxFuture<'a, Result<Option<Value>, Error>> {
    Box::pin(async move { Ok(Some(json!({ "id": serialized }))) })
}

#[tokio::test]
async fn login_state_survives_across_requests_through_the_session() {
    let auth = Arc::new(Authenticator::new());
    auth.add_serializer(ser_id);
    auth.add_deserializer(deser_wrap);
    auth.register_as(
        "creds",
        Arc::new(MockStrategy::succeeding(
            "creds",
            json!({"id": 7, "username": "jared"}),
            None,
        )),
    )
    .unwrap();

    // first request: authenticate and log in
    let middlewares: Vec<Arc<dyn Middleware>> = vec![
        Arc::new(auth.initialize()),
        Arc::new(auth.authenticate("creds", AuthenticateOptions::default())),
    ];
    let tail = CountingHandler::new();
    let mut first = ContextBuilder::new().with_session().build();
    run_stack(&middlewares, &tail, &mut first).await.unwrap();
    assert_eq!(tail.calls(), 1);
    assert!(first.is_authenticated());
    let session_values = first.session.clone().unwrap();

    // second request: the session strategy restores the user
    let middlewares: Vec<Arc<dyn Middleware>> =
        vec![Arc::new(auth.initialize()), Arc::new(auth.session())];
    let mut second = ContextBuilder::new().build();
    second.session = Some(session_values);
    let tail = CountingHandler::new();
    run_stack(&middlewares, &tail, &mut second).await.unwrap();
    assert_eq!(tail.calls(), 1);
    assert_eq!(second.state.get("user"), Some(&json!({"id": 7})));
    assert!(second.is_authenticated());
}

#[tokio::test]
async fn context_login_enforces_middleware_ordering() {
    let auth = Arc::new(Authenticator::new());
    auth.add_serializer(ser_id);

    // no initialize: the initialize-check fires first even with a session
    let mut ctx = ContextBuilder::new().with_session().build();
    let err = ctx.login(json!({"id": 1})).await.unwrap_err();
    assert_eq!(err.to_string(), "passport.initialize() middleware not in use");

    // initialized but no session: the session-check fires after
    // serialization succeeded
    let mut ctx = ContextBuilder::new().build();
    ctx.passport = Some(auth.clone());
    let err = ctx.login(json!({"id": 1})).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Should use session middleware before passport middleware"
    );

    // both present: the serialized user lands in the session
    let mut ctx = ContextBuilder::new().with_session().build();
    ctx.passport = Some(auth);
    ctx.login(json!({"id": 1})).await.unwrap();
    assert_eq!(
        ctx.session
            .as_ref()
            .and_then(|s| s.get_nested("passport", "user")),
        Some(&json!(1))
    );
    assert!(ctx.is_authenticated());

    ctx.logout();
    assert!(ctx.is_unauthenticated());
    assert!(ctx
        .session
        .as_ref()
        .and_then(|s| s.get_nested("passport", "user"))
        .is_none());
}

#[tokio::test]
async fn logout_is_a_noop_without_middleware() {
    let mut ctx = ContextBuilder::new().build();
    ctx.logout();
    assert!(ctx.is_unauthenticated());
}

fn record_outcome<'a>(
    ctx: &'a mut Context,
    event: AuthEvent<'a>,
) -> BoxFuture<'a, Result<(), Error>> {
    Box::pin(async move {
        let record = match event {
            AuthEvent::Success { user, info } => json!({
                "kind": "success",
                "user": user.clone(),
                "info": info.cloned(),
            }),
            AuthEvent::Failure(report) => json!({
                "kind": "failure",
                "challenges": report.challenges.clone(),
                "statuses": report.statuses.clone(),
                "single": report.single().is_some(),
            }),
            AuthEvent::Error(err) => json!({
                "kind": "error",
                "message": err.to_string(),
            }),
        };
        ctx.state.insert("outcome".to_string(), record);
        Ok(())
    })
}

#[tokio::test]
async fn callbacks_own_failure_outcomes() {
    let auth = Arc::new(Authenticator::new());
    auth.register_as(
        "one",
        Arc::new(MockStrategy::failing(
            "one",
            Some(json!("strategy1 failed")),
            Some(400),
        )),
    )
    .unwrap();
    auth.register_as(
        "two",
        Arc::new(MockStrategy::failing(
            "two",
            Some(json!("strategy2 failed")),
            Some(401),
        )),
    )
    .unwrap();

    let options = AuthenticateOptions {
        callback: Some(Arc::new(record_outcome)),
        ..AuthenticateOptions::default()
    };

    // single strategy: the report is a bare scalar
    let middleware = auth.authenticate("one", options.clone());
    let mut ctx = ContextBuilder::new().with_session().build();
    let tail = CountingHandler::new();
    middleware.call(&mut ctx, &tail).await.unwrap();
    assert_eq!(tail.calls(), 0);
    assert_eq!(
        ctx.state.get("outcome"),
        Some(&json!({
            "kind": "failure",
            "challenges": ["strategy1 failed"],
            "statuses": [400],
            "single": true,
        }))
    );
    // the callback owns the response: nothing was written
    assert!(!ctx.response.finished);

    // both strategies: challenges and statuses aggregate in order
    let middleware = auth.authenticate_all(["one".to_string(), "two".to_string()], options);
    let mut ctx = ContextBuilder::new().with_session().build();
    middleware.call(&mut ctx, &NoopHandler).await.unwrap();
    assert_eq!(
        ctx.state.get("outcome"),
        Some(&json!({
            "kind": "failure",
            "challenges": ["strategy1 failed", "strategy2 failed"],
            "statuses": [400, 401],
            "single": false,
        }))
    );
}

#[tokio::test]
async fn callbacks_own_success_outcomes_without_session_writes() {
    let auth = Arc::new(Authenticator::new());
    let user = json!("foo");
    let info = json!({"type": "email", "message": "foo@example.com"});
    auth.register_as(
        "creds",
        Arc::new(MockStrategy::succeeding("creds", user.clone(), Some(info.clone()))),
    )
    .unwrap();

    let middleware = auth.authenticate(
        "creds",
        AuthenticateOptions {
            callback: Some(Arc::new(record_outcome)),
            ..AuthenticateOptions::default()
        },
    );
    let mut ctx = ContextBuilder::new().with_session().build();
    let tail = CountingHandler::new();
    middleware.call(&mut ctx, &tail).await.unwrap();
    assert_eq!(tail.calls(), 0);
    assert_eq!(
        ctx.state.get("outcome"),
        Some(&json!({"kind": "success", "user": user, "info": info}))
    );
    assert!(ctx
        .session
        .as_ref()
        .and_then(|s| s.get_nested("passport", "user"))
        .is_none());
}

#[tokio::test]
async fn downstream_errors_route_to_the_callback_after_an_all_pass_run() {
    let auth = Arc::new(Authenticator::new());
    let middleware = auth.authenticate(
        "session",
        AuthenticateOptions {
            callback: Some(Arc::new(record_outcome)),
            ..AuthenticateOptions::default()
        },
    );

    let mut ctx = ContextBuilder::new().with_session().build();
    ctx.passport = Some(auth.clone());
    let tail = FailingHandler::new("error in next2");
    middleware.call(&mut ctx, &tail).await.unwrap();
    assert_eq!(
        ctx.state.get("outcome"),
        Some(&json!({"kind": "error", "message": "error in next2"}))
    );

    // without a callback the error propagates
    let middleware = auth.authenticate("session", AuthenticateOptions::default());
    let mut ctx = ContextBuilder::new().with_session().build();
    ctx.passport = Some(auth);
    let err = middleware.call(&mut ctx, &tail).await.unwrap_err();
    assert_eq!(err.to_string(), "error in next2");
}

#[tokio::test]
async fn authorize_assigns_the_account_property_without_logging_in() {
    let auth = Arc::new(Authenticator::new());
    let account = json!({"id": "second"});
    auth.register_as(
        "link",
        Arc::new(MockStrategy::succeeding("link", account.clone(), None)),
    )
    .unwrap();

    let middleware = auth.authorize("link", AuthenticateOptions::default());
    let mut ctx = ContextBuilder::new().with_session().build();
    let tail = CountingHandler::new();
    middleware.call(&mut ctx, &tail).await.unwrap();
    assert_eq!(tail.calls(), 1);
    assert_eq!(ctx.state.get("account"), Some(&account));
    assert!(ctx
        .session
        .as_ref()
        .and_then(|s| s.get_nested("passport", "user"))
        .is_none());
}

#[tokio::test]
async fn mixed_pass_and_fail_still_aggregates_the_failure() {
    let auth = Arc::new(Authenticator::new());
    auth.register_as("quiet", Arc::new(MockStrategy::passing("quiet")))
        .unwrap();
    auth.register_as(
        "loud",
        Arc::new(MockStrategy::failing("loud", Some(json!("nope")), Some(400))),
    )
    .unwrap();

    let middleware = auth.authenticate_all(
        ["quiet".to_string(), "loud".to_string()],
        AuthenticateOptions::default(),
    );
    let mut ctx = ContextBuilder::new().with_session().build();
    let tail = CountingHandler::new();
    middleware.call(&mut ctx, &tail).await.unwrap();
    assert_eq!(tail.calls(), 0);
    assert_eq!(ctx.response.status, Some(400));
}
