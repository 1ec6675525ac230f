mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::StatusCode;
use tether::{AppError, GatewayPolicy, GenerationOptions, RemoteError};

use common::*;

fn auth_error() -> RemoteError {
    RemoteError::from_status(StatusCode::UNAUTHORIZED, "session expired", None)
}

fn server_error(status: StatusCode) -> RemoteError {
    RemoteError::from_status(status, "upstream trouble", None)
}

#[tokio::test]
async fn generates_with_an_acquired_session() {
    let dir = tempfile::tempdir().unwrap();
    let auth = Arc::new(FakeAuthenticator::new());
    let remote = Arc::new(ScriptedRemote::new());
    let gateway = gateway(&auth, &remote, vault_in(&dir), fast_gateway_policy());

    let result = gateway
        .generate("  a lighthouse at dusk ", GenerationOptions::default())
        .await
        .unwrap();

    assert_eq!(result.output.body, b"a lighthouse at dusk");
    assert_eq!(result.attempts, 1);
    assert_eq!(remote.credentials_seen(), vec!["cred-1".to_string()]);
    assert_eq!(auth.authentications(), 1);
}

#[tokio::test]
async fn invalid_prompts_fail_before_touching_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let auth = Arc::new(FakeAuthenticator::new());
    let remote = Arc::new(ScriptedRemote::new());
    let gateway = gateway(&auth, &remote, vault_in(&dir), fast_gateway_policy());

    let empty = gateway.generate("   ", GenerationOptions::default()).await;
    let too_long = gateway
        .generate(&"x".repeat(101), GenerationOptions::default())
        .await;

    assert!(matches!(empty, Err(AppError::InvalidInput(_))));
    assert!(matches!(too_long, Err(AppError::InvalidInput(_))));
    assert_eq!(auth.authentications(), 0);
    assert_eq!(remote.call_count(), 0);
}

#[tokio::test]
async fn one_auth_failure_is_resolved_by_reacquiring() {
    let dir = tempfile::tempdir().unwrap();
    let auth = Arc::new(FakeAuthenticator::new());
    let remote = Arc::new(ScriptedRemote::new().failing_with([auth_error()]));
    let gateway = gateway(&auth, &remote, vault_in(&dir), fast_gateway_policy());

    let result = gateway
        .generate("a red fox", GenerationOptions::default())
        .await
        .unwrap();

    assert_eq!(result.attempts, 2);
    assert_eq!(
        remote.credentials_seen(),
        vec!["cred-1".to_string(), "cred-2".to_string()]
    );
    assert_eq!(auth.authentications(), 2);
}

#[tokio::test]
async fn two_auth_failures_surface_authentication_required_after_one_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let auth = Arc::new(FakeAuthenticator::new());
    let remote = Arc::new(ScriptedRemote::new().failing_with([auth_error(), auth_error()]));
    let gateway = gateway(&auth, &remote, vault_in(&dir), fast_gateway_policy());

    let result = gateway
        .generate("a red fox", GenerationOptions::default())
        .await;

    assert!(matches!(result, Err(AppError::AuthenticationRequired(_))));
    assert_eq!(remote.call_count(), 2);
    assert_eq!(auth.authentications(), 2);
}

#[tokio::test]
async fn duplicate_requests_share_one_remote_call() {
    let dir = tempfile::tempdir().unwrap();
    let auth = Arc::new(FakeAuthenticator::new());
    let remote = Arc::new(ScriptedRemote::new().with_delay(Duration::from_millis(100)));
    let gateway = gateway(&auth, &remote, vault_in(&dir), fast_gateway_policy());

    let (a, b) = tokio::join!(
        gateway.generate("same prompt", GenerationOptions::default()),
        gateway.generate("same prompt", GenerationOptions::default())
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a, b);
    assert_eq!(remote.call_count(), 1);
}

#[tokio::test]
async fn distinct_requests_are_spaced() {
    let dir = tempfile::tempdir().unwrap();
    let auth = Arc::new(FakeAuthenticator::new());
    let remote = Arc::new(ScriptedRemote::new());
    let policy = GatewayPolicy {
        min_request_interval: Duration::from_millis(150),
        ..fast_gateway_policy()
    };
    let gateway = gateway(&auth, &remote, vault_in(&dir), policy);

    let started = Instant::now();
    let (a, b, c) = tokio::join!(
        gateway.generate("first", GenerationOptions::default()),
        gateway.generate("second", GenerationOptions::default()),
        gateway.generate("third", GenerationOptions::default())
    );

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_ne!(a.unwrap().request_id, b.unwrap().request_id);
    assert_eq!(remote.call_count(), 3);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn server_errors_are_retried_with_backoff() {
    let dir = tempfile::tempdir().unwrap();
    let auth = Arc::new(FakeAuthenticator::new());
    let remote = Arc::new(ScriptedRemote::new().failing_with([server_error(StatusCode::SERVICE_UNAVAILABLE)]));
    let gateway = gateway(&auth, &remote, vault_in(&dir), fast_gateway_policy());

    let result = gateway
        .generate("a red fox", GenerationOptions::default())
        .await
        .unwrap();

    assert_eq!(result.attempts, 2);
    assert_eq!(auth.authentications(), 1);
}

#[tokio::test]
async fn exhausted_server_retries_surface_the_remote_error() {
    let dir = tempfile::tempdir().unwrap();
    let auth = Arc::new(FakeAuthenticator::new());
    let remote = Arc::new(ScriptedRemote::new().failing_with([
        server_error(StatusCode::BAD_GATEWAY),
        server_error(StatusCode::BAD_GATEWAY),
        server_error(StatusCode::BAD_GATEWAY),
    ]));
    let gateway = gateway(&auth, &remote, vault_in(&dir), fast_gateway_policy());

    let result = gateway
        .generate("a red fox", GenerationOptions::default())
        .await;

    assert!(matches!(
        result,
        Err(AppError::RemoteService { status: Some(502), .. })
    ));
    assert_eq!(remote.call_count(), 3);
}

#[tokio::test]
async fn rate_limits_honour_the_retry_hint() {
    let dir = tempfile::tempdir().unwrap();
    let auth = Arc::new(FakeAuthenticator::new());
    let remote = Arc::new(ScriptedRemote::new().failing_with([RemoteError::from_status(
        StatusCode::TOO_MANY_REQUESTS,
        "slow down",
        Some(Duration::from_millis(120)),
    )]));
    let gateway = gateway(&auth, &remote, vault_in(&dir), fast_gateway_policy());

    let started = Instant::now();
    let result = gateway
        .generate("a red fox", GenerationOptions::default())
        .await
        .unwrap();

    assert_eq!(result.attempts, 2);
    assert!(started.elapsed() >= Duration::from_millis(120));
}

#[tokio::test]
async fn persistent_rate_limiting_surfaces_rate_limited() {
    let dir = tempfile::tempdir().unwrap();
    let auth = Arc::new(FakeAuthenticator::new());
    let throttled = || RemoteError::RateLimited { retry_after: None };
    let remote = Arc::new(ScriptedRemote::new().failing_with([throttled(), throttled(), throttled()]));
    let gateway = gateway(&auth, &remote, vault_in(&dir), fast_gateway_policy());

    let result = gateway
        .generate("a red fox", GenerationOptions::default())
        .await;

    assert_eq!(result.unwrap_err(), AppError::RateLimited { retry_after: None });
    assert_eq!(remote.call_count(), 3);
}

#[tokio::test]
async fn unpersistable_session_is_still_used() {
    let dir = tempfile::tempdir().unwrap();
    let auth = Arc::new(FakeAuthenticator::new());
    let remote = Arc::new(ScriptedRemote::new());
    let gateway = gateway(&auth, &remote, unwritable_vault(&dir), fast_gateway_policy());

    let result = gateway
        .generate("a red fox", GenerationOptions::default())
        .await;

    assert!(result.is_ok());
    assert_eq!(auth.authentications(), 1);
    assert_eq!(remote.call_count(), 1);
}

#[tokio::test]
async fn abandoned_request_does_not_block_others() {
    let dir = tempfile::tempdir().unwrap();
    let auth = Arc::new(FakeAuthenticator::new());
    let remote = Arc::new(ScriptedRemote::new());
    let policy = GatewayPolicy {
        min_request_interval: Duration::from_millis(300),
        ..fast_gateway_policy()
    };
    let gateway = gateway(&auth, &remote, vault_in(&dir), policy);

    gateway
        .generate("first", GenerationOptions::default())
        .await
        .unwrap();
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        gateway.generate("second", GenerationOptions::default()),
    )
    .await;
    assert!(abandoned.is_err());

    let third = tokio::time::timeout(
        Duration::from_secs(3),
        gateway.generate("third", GenerationOptions::default()),
    )
    .await
    .expect("request stayed blocked behind an abandoned one");

    assert_eq!(third.unwrap().output.body, b"third");
    assert_eq!(remote.call_count(), 3);
}

#[tokio::test]
async fn abandoned_request_is_joined_by_a_retry() {
    let dir = tempfile::tempdir().unwrap();
    let auth = Arc::new(FakeAuthenticator::new());
    let remote = Arc::new(ScriptedRemote::new().with_delay(Duration::from_millis(150)));
    let gateway = gateway(&auth, &remote, vault_in(&dir), fast_gateway_policy());

    let abandoned = tokio::time::timeout(
        Duration::from_millis(30),
        gateway.generate("same prompt", GenerationOptions::default()),
    )
    .await;
    assert!(abandoned.is_err());

    let result = gateway
        .generate("same prompt", GenerationOptions::default())
        .await
        .unwrap();

    assert_eq!(result.attempts, 1);
    assert_eq!(remote.call_count(), 1);
}
