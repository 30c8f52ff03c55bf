//! End-to-end behaviour of the breaker guarding the user service's calls.

use std::sync::Arc;
use std::time::Duration;
use user_relay::circuit_breaker::{CircuitState, Counts};
use user_relay::error_reason::{ErrorKind, FailureOrigin};
use user_relay::gateway::FaultCode;

mod common;
use common::{FakeGateway, Mode};

#[tokio::test(start_paused = true)]
async fn trip_short_circuit_probe_and_recover() {
    let gw = FakeGateway::new(Mode::Transport(FaultCode::Internal, "connection refused"));
    let svc = common::service(gw.clone());

    for _ in 0..3 {
        let err = svc.get_all_users().await.unwrap_err();
        assert_eq!((err.kind, err.origin), (ErrorKind::Internal, FailureOrigin::CallFailed));
    }
    assert_eq!(svc.breaker().state(), CircuitState::Open);

    // 4th call is rejected whatever it would have returned.
    gw.set(Mode::Ok);
    let err = svc.get_all_users().await.unwrap_err();
    assert_eq!((err.kind, err.origin), (ErrorKind::Unavailable, FailureOrigin::CircuitOpen));
    assert_eq!(gw.calls(), 3);

    tokio::time::advance(Duration::from_secs(30)).await;

    assert_eq!(svc.get_all_users().await.unwrap().len(), 2);
    assert_eq!(gw.calls(), 4);
    assert_eq!(svc.breaker().state(), CircuitState::HalfOpen);

    assert!(svc.get_user_by_id(1).await.is_ok());
    assert!(svc.get_user_by_id(2).await.is_ok());
    assert_eq!(svc.breaker().state(), CircuitState::Closed);
    assert_eq!(svc.breaker().counts(), Counts::default());

    let user = svc.get_user_by_id(3).await.unwrap();
    assert_eq!(user.id, 3);
    assert_eq!(gw.calls(), 7);
    // Sticky: still shows the last failure after recovery.
    assert_eq!(svc.last_error(), Some(ErrorKind::Unavailable));
}

#[tokio::test(start_paused = true)]
async fn failed_probe_restarts_the_open_timer() {
    let gw = FakeGateway::new(Mode::Transport(FaultCode::DeadlineExceeded, "no reply within 5000ms"));
    let svc = common::service(gw.clone());
    for _ in 0..3 {
        let _ = svc.delete_user(1).await;
    }
    tokio::time::advance(Duration::from_secs(30)).await;

    let err = svc.delete_user(1).await.unwrap_err();
    assert_eq!(err.origin, FailureOrigin::CallFailed);
    assert_eq!(svc.breaker().state(), CircuitState::Open);

    gw.set(Mode::Ok);
    tokio::time::advance(Duration::from_secs(20)).await;
    let err = svc.delete_user(1).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unavailable);
    assert_eq!(gw.calls(), 4);

    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(svc.delete_user(1).await.unwrap(), "user 1 deleted");
}

#[tokio::test(start_paused = true)]
async fn failures_spread_over_windows_do_not_trip() {
    let gw = FakeGateway::new(Mode::Transport(FaultCode::Internal, "boom"));
    let svc = common::service(gw.clone());
    for _ in 0..5 {
        let _ = svc.get_user_by_id(1).await;
        let _ = svc.get_user_by_id(1).await;
        tokio::time::advance(Duration::from_secs(10)).await;
    }
    assert_eq!(svc.breaker().state(), CircuitState::Closed);
    assert_eq!(gw.calls(), 10);
}

#[tokio::test(start_paused = true)]
async fn probe_quota_then_closed_traffic() {
    let gw = FakeGateway::new(Mode::Transport(FaultCode::Internal, "boom"));
    let svc = Arc::new(common::service(gw.clone()));
    for _ in 0..3 {
        let _ = svc.get_all_users().await;
    }
    tokio::time::advance(Duration::from_secs(30)).await;
    gw.set(Mode::Ok);

    // The fake never yields, so each call completes before the next is
    // polled: three probes close the breaker and the rest run closed.
    let results = futures::future::join_all((0..5).map(|_| {
        let svc = svc.clone();
        async move { svc.get_all_users().await }
    }))
    .await;
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(gw.calls(), 8);
    assert_eq!(svc.breaker().state(), CircuitState::Closed);
    assert_eq!(svc.breaker().counts().requests, 2);
}

#[tokio::test]
async fn classification_of_soft_errors() {
    let gw = FakeGateway::new(Mode::Soft("user not found"));
    let svc = common::service(gw.clone());
    let err = svc.get_user_by_id(42).await.unwrap_err();
    assert_eq!((err.kind, err.origin), (ErrorKind::NotFound, FailureOrigin::SoftError));

    gw.set(Mode::Soft("pq: duplicate key value violates unique constraint \"users_email_key\""));
    let err = svc.update_user(42, serde_json::from_str(r#"{"email":"x@y.z"}"#).unwrap()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::AlreadyExists);
    assert_eq!(err.message, "user with this email already exists");

    // Soft errors are successful calls as far as the breaker is concerned.
    assert_eq!(svc.breaker().state(), CircuitState::Closed);
    assert_eq!(svc.breaker().counts().total_failures, 0);
}
