//! Dispatch API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//! Routes are nested under `/api/`.
//!
//! Middleware stack (outermost → innermost):
//! provider routes: CORS → Cache-Control: no-store → Provider identity → Audit logger
//! gateway routes:  CORS → Audit logger

use std::sync::Arc;

use axum::http::{header, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::dispatch::DispatchService;

/// Build the dispatch API router.
///
/// Intake (`/api/triage`) and `/api/health` are open to channel gateways.
/// Everything else requires provider identity headers.
pub fn dispatch_api_router(service: Arc<DispatchService>) -> Router {
    let ctx = ApiContext::new(service);

    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let provider = Router::new()
        .route("/encounters", get(endpoints::encounters::list))
        .route(
            "/encounters/:id",
            get(endpoints::encounters::detail).patch(endpoints::encounters::update),
        )
        .route(
            "/encounters/:id/callback",
            post(endpoints::encounters::request_callback),
        )
        .route("/callbacks", get(endpoints::callbacks::list))
        .route("/callbacks/next", get(endpoints::callbacks::next))
        .route("/callbacks/claim", post(endpoints::callbacks::claim))
        .route("/callbacks/:id", get(endpoints::callbacks::detail))
        .route("/callbacks/:id/assign", post(endpoints::callbacks::assign))
        .route("/callbacks/:id/complete", post(endpoints::callbacks::complete))
        .route("/callbacks/:id/release", post(endpoints::callbacks::release))
        .route("/providers/:id/release", post(endpoints::providers::release))
        .with_state(ctx.clone())
        // Innermost first, outermost last:
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::middleware::from_fn(middleware::auth::require_provider))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ));

    let gateway = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/triage", post(endpoints::triage::submit))
        .with_state(ctx)
        .layer(axum::middleware::from_fn(middleware::audit::log_access));

    Router::new()
        .nest("/api", provider)
        .nest("/api", gateway)
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::DispatchConfig;
    use crate::db::SqliteStore;
    use crate::dispatch::DispatchStore;

    fn test_service() -> Arc<DispatchService> {
        let store: Arc<dyn DispatchStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        Arc::new(DispatchService::new(store, &DispatchConfig::default()).unwrap())
    }

    fn request(method: &str, uri: &str, provider: Option<(&str, &str)>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((id, role)) = provider {
            builder = builder
                .header("X-Provider-Id", id)
                .header("X-Provider-Role", role);
        }
        match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn submit_emergency(app: &Router, msisdn: &str) -> Value {
        let (status, json) = send(
            app,
            request(
                "POST",
                "/api/triage",
                None,
                Some(json!({
                    "channel": "ussd",
                    "chief_complaint": "high fever, convulsions",
                    "msisdn": msisdn,
                    "consent": true
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        json
    }

    const NURSE_A: Option<(&str, &str)> = Some(("nurse-a", "nurse"));
    const NURSE_B: Option<(&str, &str)> = Some(("nurse-b", "nurse"));
    const ADMIN: Option<(&str, &str)> = Some(("admin-1", "admin"));

    #[tokio::test]
    async fn health_is_open() {
        let app = dispatch_api_router(test_service());
        let (status, json) = send(&app, request("GET", "/api/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["queued"], 0);
    }

    #[tokio::test]
    async fn provider_routes_require_identity() {
        let app = dispatch_api_router(test_service());
        let (status, json) = send(&app, request("GET", "/api/callbacks", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["code"], "AUTH_REQUIRED");
    }

    #[tokio::test]
    async fn triage_creates_queued_callback() {
        let app = dispatch_api_router(test_service());
        let json = submit_emergency(&app, "+2348030000100").await;
        assert_eq!(json["encounter"]["urgency"], "critical");
        assert_eq!(json["encounter"]["risk_code"], "emergency");
        assert_eq!(json["callback"]["priority"], "urgent");
        assert_eq!(json["callback"]["status"], "queued");
        assert!(json["assessment"]["advice"].as_str().unwrap().starts_with("Emergency"));

        let (status, list) = send(
            &app,
            request("GET", "/api/callbacks?status=queued", NURSE_A, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);
        assert_eq!(list[0]["chief_complaint"], "high fever, convulsions");
        assert_eq!(list[0]["channel"], "ussd");
    }

    #[tokio::test]
    async fn triage_validation_errors_are_400() {
        let app = dispatch_api_router(test_service());
        let (status, json) = send(
            &app,
            request("POST", "/api/triage", None, Some(json!({ "channel": "ussd" }))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "VALIDATION_ERROR");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/triage")
                    .header("Content-Type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn assign_conflict_and_ownership() {
        let app = dispatch_api_router(test_service());
        let created = submit_emergency(&app, "+2348030000101").await;
        let id = created["callback"]["id"].as_str().unwrap().to_string();

        let (status, json) = send(
            &app,
            request("POST", &format!("/api/callbacks/{id}/assign"), NURSE_A, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "in_progress");
        assert_eq!(json["provider_id"], "nurse-a");

        let (status, json) = send(
            &app,
            request("POST", &format!("/api/callbacks/{id}/assign"), NURSE_B, None),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"]["code"], "ALREADY_ASSIGNED");

        let (status, json) = send(
            &app,
            request(
                "POST",
                &format!("/api/callbacks/{id}/complete"),
                NURSE_B,
                Some(json!({ "outcome": "advised" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"]["code"], "NOT_OWNER");

        let (status, json) = send(
            &app,
            request("POST", &format!("/api/callbacks/{id}/complete"), NURSE_A, Some(json!({}))),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["error"]["code"], "MISSING_OUTCOME");

        let (status, json) = send(
            &app,
            request(
                "POST",
                &format!("/api/callbacks/{id}/complete"),
                NURSE_A,
                Some(json!({ "outcome": "referred to clinic", "notes": "ORS given" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "done");

        let encounter_id = created["encounter"]["id"].as_str().unwrap();
        let (_, enc) = send(
            &app,
            request("GET", &format!("/api/encounters/{encounter_id}"), NURSE_A, None),
        )
        .await;
        assert_eq!(enc["status"], "completed");
    }

    #[tokio::test]
    async fn release_requires_admin() {
        let app = dispatch_api_router(test_service());
        let created = submit_emergency(&app, "+2348030000102").await;
        let id = created["callback"]["id"].as_str().unwrap().to_string();
        send(
            &app,
            request("POST", &format!("/api/callbacks/{id}/assign"), NURSE_A, None),
        )
        .await;

        let (status, _) = send(
            &app,
            request("POST", &format!("/api/callbacks/{id}/release"), NURSE_A, None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, json) = send(
            &app,
            request("POST", &format!("/api/callbacks/{id}/release"), ADMIN, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "queued");
        assert_eq!(json["release_count"], 1);
    }

    #[tokio::test]
    async fn provider_release_returns_their_work_to_the_queue() {
        let app = dispatch_api_router(test_service());
        let held = submit_emergency(&app, "+2348030000107").await;
        let other = submit_emergency(&app, "+2348030000108").await;
        let held_id = held["callback"]["id"].as_str().unwrap().to_string();
        let other_id = other["callback"]["id"].as_str().unwrap().to_string();
        send(&app, request("POST", &format!("/api/callbacks/{held_id}/assign"), NURSE_A, None)).await;
        send(&app, request("POST", &format!("/api/callbacks/{other_id}/assign"), NURSE_B, None)).await;

        let (status, _) = send(
            &app,
            request("POST", "/api/providers/nurse-a/release", NURSE_B, None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, json) = send(
            &app,
            request("POST", "/api/providers/nurse-a/release", ADMIN, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let released = json.as_array().unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0]["id"], held_id.as_str());
        assert_eq!(released[0]["status"], "queued");

        let (_, still_held) = send(
            &app,
            request("GET", &format!("/api/callbacks/{other_id}"), NURSE_B, None),
        )
        .await;
        assert_eq!(still_held["status"], "in_progress");
    }

    #[tokio::test]
    async fn malformed_callback_request_body_is_400() {
        let app = dispatch_api_router(test_service());
        let (_, created) = send(
            &app,
            request(
                "POST",
                "/api/triage",
                None,
                Some(json!({ "channel": "web", "chief_complaint": "rash", "msisdn": "+2348030000109" })),
            ),
        )
        .await;
        let id = created["encounter"]["id"].as_str().unwrap().to_string();
        let uri = format!("/api/encounters/{id}/callback");

        let (status, _) = send(
            &app,
            request("POST", &uri, NURSE_A, Some(json!({ "priority": 5 }))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(&uri)
                    .header("X-Provider-Id", "nurse-a")
                    .header("X-Provider-Role", "nurse")
                    .body(Body::from(r#"{"priority":"urgent"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Nothing was enqueued by the rejected bodies.
        let (status, json) = send(
            &app,
            request("POST", &uri, NURSE_A, Some(json!({ "priority": "urgent" }))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["priority"], "urgent");
    }

    #[tokio::test]
    async fn claim_and_next_follow_priority() {
        let app = dispatch_api_router(test_service());
        send(
            &app,
            request(
                "POST",
                "/api/triage",
                None,
                Some(json!({ "channel": "sms", "chief_complaint": "cough", "msisdn": "+2348030000103" })),
            ),
        )
        .await;
        let urgent = submit_emergency(&app, "+2348030000104").await;

        let (_, next) = send(&app, request("GET", "/api/callbacks/next", NURSE_A, None)).await;
        assert_eq!(next["callback"]["id"], urgent["callback"]["id"]);

        let (_, claimed) = send(&app, request("POST", "/api/callbacks/claim", NURSE_A, None)).await;
        assert_eq!(claimed["callback"]["id"], urgent["callback"]["id"]);
        let (_, claimed) = send(&app, request("POST", "/api/callbacks/claim", NURSE_B, None)).await;
        assert_eq!(claimed["callback"]["priority"], "medium");
        let (_, claimed) = send(&app, request("POST", "/api/callbacks/claim", NURSE_B, None)).await;
        assert!(claimed["callback"].is_null());
    }

    #[tokio::test]
    async fn bad_ids_and_filters_are_400() {
        let app = dispatch_api_router(test_service());
        let (status, _) = send(
            &app,
            request("POST", "/api/callbacks/not-a-uuid/assign", NURSE_A, None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, json) = send(
            &app,
            request("GET", "/api/callbacks?priority=asap", NURSE_A, None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "INVALID_PRIORITY");

        let (status, json) = send(
            &app,
            request(
                "POST",
                &format!("/api/callbacks/{}/assign", uuid::Uuid::new_v4()),
                NURSE_A,
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "UNKNOWN_CALLBACK");
    }

    #[tokio::test]
    async fn encounter_callback_request_is_idempotent() {
        let app = dispatch_api_router(test_service());
        let (_, created) = send(
            &app,
            request(
                "POST",
                "/api/triage",
                None,
                Some(json!({ "channel": "web", "chief_complaint": "rash", "msisdn": "+2348030000105" })),
            ),
        )
        .await;
        assert!(created["callback"].is_null());
        let id = created["encounter"]["id"].as_str().unwrap().to_string();

        let (status, _) = send(
            &app,
            request("POST", &format!("/api/encounters/{id}/callback"), NURSE_A, None),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, json) = send(
            &app,
            request("POST", &format!("/api/encounters/{id}/callback"), NURSE_A, None),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["error"]["code"], "DUPLICATE_WORK");
    }

    #[tokio::test]
    async fn encounter_patch_and_list() {
        let app = dispatch_api_router(test_service());
        let created = submit_emergency(&app, "+2348030000106").await;
        let id = created["encounter"]["id"].as_str().unwrap().to_string();

        let (status, json) = send(
            &app,
            request(
                "PATCH",
                &format!("/api/encounters/{id}"),
                NURSE_A,
                Some(json!({ "notes": "family informed" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["notes"], "family informed");

        let (status, list) = send(
            &app,
            request("GET", "/api/encounters?channel=ussd&limit=10", NURSE_A, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = dispatch_api_router(test_service());
        let response = app
            .oneshot(request("GET", "/nonexistent", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
