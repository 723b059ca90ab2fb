// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    body::Body,
    http::{HeaderValue, Method, Request, Uri},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::Span;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    error::{ApiError, ErrorBody, ErrorCode},
    models::{
        ClaimDeviceRequest, ClaimDeviceResponse, Disposition, Location, RevokeDeviceRequest,
        RevokeDeviceResponse,
    },
    state::AppState,
    telemetry::{CallStats, MethodStats, MetricsSnapshot},
};

pub mod devices;
pub mod health;

pub const CLAIM_DEVICE_PATH: &str = "/twirp/decode.iot.devicereg.DeviceRegistration/ClaimDevice";
pub const REVOKE_DEVICE_PATH: &str = "/twirp/decode.iot.devicereg.DeviceRegistration/RevokeDevice";

const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn router(state: AppState) -> Router {
    let rpc_routes = Router::new()
        .route(
            CLAIM_DEVICE_PATH,
            post(devices::claim_device).fallback(unsupported_method),
        )
        .route(
            REVOKE_DEVICE_PATH,
            post(devices::revoke_device).fallback(unsupported_method),
        )
        .route("/pulse", get(health::pulse))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/metrics", get(health::metrics))
        .with_state(state);

    Router::new()
        .merge(rpc_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .fallback(no_handler)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http().make_span_with(request_span))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .layer(CorsLayer::permissive())
}

/// Tags each request with a random v4 uuid unless the caller sent one.
#[derive(Debug, Clone, Copy, Default)]
struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

fn request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    )
}

async fn no_handler(method: Method, uri: Uri) -> ApiError {
    ApiError::new(
        ErrorCode::BadRoute,
        format!("no handler for path {:?}", uri.path()),
    )
    .with_meta("twirp_invalid_route", format!("{method} {}", uri.path()))
}

async fn unsupported_method(method: Method, uri: Uri) -> ApiError {
    ApiError::new(
        ErrorCode::BadRoute,
        format!("unsupported method {:?} (only POST is allowed)", method.as_str()),
    )
    .with_meta("twirp_invalid_route", format!("{method} {}", uri.path()))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        devices::claim_device,
        devices::revoke_device,
        health::pulse,
        health::liveness,
        health::readiness,
        health::metrics
    ),
    components(
        schemas(
            ClaimDeviceRequest,
            ClaimDeviceResponse,
            RevokeDeviceRequest,
            RevokeDeviceResponse,
            Location,
            Disposition,
            ErrorBody,
            ErrorCode,
            health::HealthResponse,
            health::ReadyResponse,
            health::HealthChecks,
            MetricsSnapshot,
            MethodStats,
            CallStats
        )
    ),
    tags(
        (name = "DeviceRegistration", description = "Claim and revoke devices"),
        (name = "Health", description = "Probes and metrics")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Secp256k1KeyGenerator;
    use crate::provisioner::testing::RecordingProvisioner;
    use crate::registrar::DeviceRegistrar;
    use crate::storage::RedbDeviceStore;
    use crate::telemetry::ProvisionerMetrics;
    use axum::{body::to_bytes, http::StatusCode, response::Response};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app() -> (TempDir, Router) {
        let dir = TempDir::new().unwrap();
        let store = RedbDeviceStore::open(&dir.path().join("devicereg.redb"), "password").unwrap();
        let registrar = DeviceRegistrar::new(
            store,
            RecordingProvisioner::new(),
            Secp256k1KeyGenerator::new(),
            Arc::new(ProvisionerMetrics::new()),
        );
        (dir, router(AppState::new(registrar)))
    }

    fn post_json(path: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn claim_body(token: &str) -> Value {
        json!({
            "device_token": token,
            "user_uid": "alice",
            "location": {"longitude": 12.2, "latitude": 32.1},
            "disposition": "OUTDOOR",
            "broker": "tcp://mqtt:1883"
        })
    }

    #[tokio::test]
    async fn claim_then_revoke() {
        let (_dir, app) = app();

        let response = app
            .clone()
            .oneshot(post_json(CLAIM_DEVICE_PATH, &claim_body("abc123")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let claimed = json_body(response).await;
        let user_public_key = claimed["user_public_key"].as_str().unwrap().to_string();
        assert!(!claimed["user_private_key"].as_str().unwrap().is_empty());
        assert_ne!(claimed["device_public_key"], claimed["user_public_key"]);

        let response = app
            .clone()
            .oneshot(post_json(
                REVOKE_DEVICE_PATH,
                &json!({"device_token": "abc123", "user_public_key": user_public_key}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({}));

        let response = app.oneshot(get("/metrics")).await.unwrap();
        let metrics = json_body(response).await;
        assert_eq!(metrics["encoder_calls"][0]["method"], "CreateStream");
        assert_eq!(metrics["encoder_calls"][0]["count"], 1);
        assert_eq!(metrics["encoder_calls"][2]["count"], 1);
    }

    #[tokio::test]
    async fn missing_argument_is_invalid_argument() {
        let (_dir, app) = app();
        let mut body = claim_body("abc123");
        body["broker"] = json!("");

        let response = app.oneshot(post_json(CLAIM_DEVICE_PATH, &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await,
            json!({
                "code": "invalid_argument",
                "msg": "broker is required",
                "meta": {"argument": "broker"}
            })
        );
    }

    #[tokio::test]
    async fn unknown_device_is_internal() {
        let (_dir, app) = app();
        let response = app
            .oneshot(post_json(
                REVOKE_DEVICE_PATH,
                &json!({"device_token": "nope", "user_public_key": "key"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["code"], "internal");
        assert_eq!(body["msg"], "failed to delete device: device not found");
    }

    #[tokio::test]
    async fn undecodable_body_is_malformed() {
        let (_dir, app) = app();
        let request = Request::builder()
            .method(Method::POST)
            .uri(CLAIM_DEVICE_PATH)
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["code"], "malformed");
    }

    #[tokio::test]
    async fn unknown_paths_and_methods_are_bad_routes() {
        let (_dir, app) = app();

        let response = app
            .clone()
            .oneshot(post_json(
                "/twirp/decode.iot.devicereg.DeviceRegistration/Nope",
                &json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["code"], "bad_route");

        let response = app.oneshot(get(CLAIM_DEVICE_PATH)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["code"], "bad_route");
        assert_eq!(body["msg"], r#"unsupported method "GET" (only POST is allowed)"#);
    }

    #[tokio::test]
    async fn probes_answer() {
        let (_dir, app) = app();

        let response = app.clone().oneshot(get("/pulse")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ok");

        let response = app.clone().oneshot(get("/health/live")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/health/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["checks"]["store"], "ok");
    }

    #[tokio::test]
    async fn responses_carry_request_id() {
        let (_dir, app) = app();

        let response = app.clone().oneshot(get("/pulse")).await.unwrap();
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));

        let request = Request::builder()
            .uri("/pulse")
            .header(REQUEST_ID_HEADER, "caller-id")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "caller-id");
    }

    #[test]
    fn openapi_lists_rpc_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key(CLAIM_DEVICE_PATH));
        assert!(doc.paths.paths.contains_key(REVOKE_DEVICE_PATH));
    }
}
