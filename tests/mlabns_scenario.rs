//! The `/ndt` mlab-ns legacy compatibility surface.

mod common;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use common::{build_state, register, registration, router};
use locate::fleet::model::InstanceType;
use std::net::SocketAddr;
use tower::ServiceExt;

async fn get(app: axum::Router, uri: &str) -> axum::response::Response {
    let mut request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo("203.0.113.7:443".parse::<SocketAddr>().unwrap()));
    app.oneshot(request).await.unwrap()
}

#[tokio::test]
async fn unsupported_format_is_rejected_with_400() {
    let state = build_state();
    let response = get(router(state), "/ndt?format=bt").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn metro_policy_without_metro_param_is_rejected() {
    let state = build_state();
    let response = get(router(state), "/ndt?policy=metro").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn valid_json_request_returns_transcoded_mlabns_body() {
    let state = build_state();
    register(
        &state,
        registration("mlab1-lga00.mlab-sandbox.measurement-lab.org", "lga00", 40.7, -74.0, InstanceType::Physical, "ndt/ndt7"),
        1.0,
    )
    .await;

    let response = get(router(state), "/ndt?format=json&lat=40.7&lon=-74.0").await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["site"], "lga00");
    assert_eq!(body["fqdn"], "mlab1-lga00.mlab-sandbox.measurement-lab.org");
    assert_eq!(body["url"], "https://mlab1-lga00.mlab-sandbox.measurement-lab.org/");
}

#[tokio::test]
async fn empty_fleet_returns_no_content() {
    let state = build_state();
    let response = get(router(state), "/ndt?format=json&lat=40.7&lon=-74.0").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}
