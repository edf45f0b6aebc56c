use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt;
use vetline_api::{router, AppState};
use vetline_core::{Config, GeoPoint, ResponderProfile};
use vetline_dispatch::DistanceEstimator;
use vetline_notify::NotificationHub;
use vetline_ratelimit::{Policies, RateLimiter};
use vetline_store::SqliteStore;

fn app_state() -> Arc<AppState> {
    let config = Config::default();
    let store = Arc::new(SqliteStore::open_in_memory(Duration::from_secs(5)).unwrap());
    let limiter = Arc::new(RateLimiter::in_memory(Policies::from_config(
        &config.rate_limit,
    )));
    Arc::new(AppState::from_parts(
        config,
        store,
        Arc::new(NotificationHub::new(16)),
        limiter,
        DistanceEstimator::haversine_only(2.0),
    ))
}

fn request(method: &str, uri: &str, who: Option<(&str, &str)>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", "198.51.100.20");
    if let Some((user, role)) = who {
        builder = builder.header("x-user-id", user).header("x-user-role", role);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn distress_body() -> Value {
    json!({
        "description": "Dog hit by car, bleeding from the leg",
        "location": {"coordinates": [77.59, 12.97]}
    })
}

#[tokio::test]
async fn health_is_public() {
    let app = router(app_state());
    let (status, body) = send(&app, request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let app = router(app_state());
    let (status, body) = send(&app, request("GET", "/distress/active", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let app = router(app_state());
    let (status, body) = send(
        &app,
        request(
            "POST",
            "/distress/call",
            Some(("alice", "user")),
            Some(json!({"location": "nowhere"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn distress_lifecycle_over_http() {
    let state = app_state();
    let mut vet = ResponderProfile::new("vet-a", Utc::now());
    vet.location = Some(GeoPoint::new(77.60, 12.97));
    vet.available = true;
    state.engine.register_responder(vet).await.unwrap();
    let app = router(Arc::clone(&state));
    let alice = Some(("alice", "user"));
    let vet_a = Some(("vet-a", "vet"));

    let (status, body) = send(&app, request("POST", "/distress/call", alice, Some(distress_body()))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nearby_vets_count"], 1);
    let id = body["distress"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, request("GET", "/distress/nearby", vet_a, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["distresses"][0]["id"], id.as_str());

    let (status, _) = send(
        &app,
        request(
            "POST",
            &format!("/distress/{}/respond", id),
            vet_a,
            Some(json!({"mode": "vet_coming", "message": "Five minutes away"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        request(
            "POST",
            &format!("/distress/{}/select", id),
            alice,
            Some(json!({"responder_id": "vet-a"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["distress"]["status"], "in_progress");
    assert_eq!(body["distress"]["response_mode"], "responder_coming");

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/location/update",
            vet_a,
            Some(json!({"distress_id": id, "coordinates": [77.595, 12.97]})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, request("GET", &format!("/location/poll/{}", id), alice, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["has_updates"], true);
    assert_eq!(body["locations"]["responder"]["coordinates"], json!([77.595, 12.97]));

    let (status, _) = send(&app, request("POST", &format!("/distress/{}/resolve", id), vet_a, None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, request("GET", "/distress/active", alice, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["distress"], Value::Null);
}

#[tokio::test]
async fn error_statuses_follow_the_taxonomy() {
    let state = app_state();
    let app = router(state);
    let alice = Some(("alice", "user"));

    let (status, _) = send(&app, request("GET", "/distress/missing", alice, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, request("POST", "/distress/call", alice, Some(distress_body()))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&app, request("POST", "/distress/call", alice, Some(distress_body()))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "You already have an active distress call");

    let (status, _) = send(&app, request("GET", "/distress/nearby", alice, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        request("GET", "/location/poll-nearby?since=yesterday", Some(("vet-a", "vet")), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn distress_calls_are_rate_limited_per_client() {
    let app = router(app_state());
    let alice = Some(("alice", "user"));

    let mut statuses = Vec::new();
    for _ in 0..3 {
        let (status, _) = send(&app, request("POST", "/distress/call", alice, Some(distress_body()))).await;
        statuses.push(status);
    }
    // the first call opens a case; the next two hit the active-case guard
    assert_eq!(
        statuses,
        vec![StatusCode::OK, StatusCode::CONFLICT, StatusCode::CONFLICT]
    );

    let response = app
        .clone()
        .oneshot(request("POST", "/distress/call", alice, Some(distress_body())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry_after));
}

#[tokio::test]
async fn rejected_distress_calls_still_count_against_the_limit() {
    let app = router(app_state());

    // no identity and a body that does not parse
    for _ in 0..3 {
        let (status, _) = send(
            &app,
            request("POST", "/distress/call", None, Some(json!({"description": 42}))),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, body) = send(
        &app,
        request("POST", "/distress/call", Some(("alice", "user")), Some(distress_body())),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        body["message"],
        "Too many distress calls. Please wait before creating another."
    );
}

#[tokio::test]
async fn ai_analysis_is_parsed_defensively() {
    let state = app_state();
    let app = router(Arc::clone(&state));
    let alice = Some(("alice", "user"));

    let (_, body) = send(&app, request("POST", "/distress/call", alice, Some(distress_body()))).await;
    let id = body["distress"]["id"].as_str().unwrap().to_string();

    let req = Request::builder()
        .method("PUT")
        .uri(format!("/distress/{}/ai-analysis", id))
        .header("x-user-id", "alice")
        .header("x-user-role", "user")
        .body(Body::from("this is not json"))
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ai_analysis"]["severity"], "medium");
    assert!(body["ai_analysis"]["immediate_steps"].as_array().unwrap().len() > 0);
}
