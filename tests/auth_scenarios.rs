//! Bearer-token-gated surfaces: `/v2/priority/nearest` and
//! `/v2/platform/monitoring/{exp}/{svc}`.

mod common;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use common::{build_state, register, registration, router};
use locate::fleet::model::InstanceType;
use std::net::SocketAddr;
use tower::ServiceExt;

fn authed_get(uri: &str, token: &str) -> Request<Body> {
    let mut request = Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo("198.51.100.20:443".parse::<SocketAddr>().unwrap()));
    request
}

#[tokio::test]
async fn priority_nearest_rejects_missing_bearer_token() {
    let state = build_state();
    let mut request = Request::builder()
        .uri("/v2/priority/nearest/ndt/ndt7?lat=40.0&lon=-75.0")
        .body(Body::empty())
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo("198.51.100.20:443".parse::<SocketAddr>().unwrap()));

    let response = router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn priority_nearest_accepts_valid_token_and_returns_target() {
    let state = build_state();
    register(
        &state,
        registration("mlab1-lga00.mlab-sandbox.measurement-lab.org", "lga00", 40.7, -74.0, InstanceType::Physical, "ndt/ndt7"),
        1.0,
    )
    .await;
    let (token, _claims) = state.signer.sign("client", "mlab-sandbox", "locate");

    let request = authed_get("/v2/priority/nearest/ndt/ndt7?lat=40.0&lon=-75.0", &token);
    let response = router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn monitoring_handler_rejects_token_with_wrong_issuer() {
    let state = build_state();
    register(
        &state,
        registration("mlab1-lga00.mlab-sandbox.measurement-lab.org", "lga00", 40.7, -74.0, InstanceType::Physical, "ndt/ndt7"),
        1.0,
    )
    .await;
    // `signer.sign` stamps iss="client", but verify_monitoring requires "monitoring".
    let (token, _claims) = state.signer.sign("client", "mlab1-lga00.mlab-sandbox.measurement-lab.org", "locate");

    let request = authed_get("/v2/platform/monitoring/ndt/ndt7", &token);
    let response = router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
