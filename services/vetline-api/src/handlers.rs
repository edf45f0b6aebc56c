use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use vetline_core::{Error, GeoPoint, ResponseMode};
use vetline_dispatch::NewCaseRequest;

use crate::error::ApiResult;
use crate::extract::{ApiJson, AuthCaller};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RespondBody {
    pub mode: ResponseMode,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectBody {
    #[serde(alias = "vet_id")]
    pub responder_id: String,
    #[serde(default)]
    pub mode: Option<ResponseMode>,
}

#[derive(Debug, Deserialize)]
pub struct LocationBody {
    pub distress_id: String,
    pub coordinates: GeoPoint,
}

#[derive(Debug, Deserialize)]
pub struct ResponderLocationBody {
    pub coordinates: GeoPoint,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityBody {
    pub available: bool,
}

#[derive(Debug, Deserialize)]
pub struct SinceQuery {
    #[serde(default)]
    pub since: Option<String>,
}

impl SinceQuery {
    fn parse(&self) -> Result<Option<DateTime<Utc>>, Error> {
        self.since
            .as_deref()
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|at| at.with_timezone(&Utc))
                    .map_err(|_| {
                        Error::InvalidInput("since must be an RFC 3339 timestamp".to_string())
                    })
            })
            .transpose()
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "vetline-api",
        "connections": state.hub.online_count(),
        "timestamp": Utc::now().to_rfc3339()
    }))
}

pub async fn create_distress(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    ApiJson(request): ApiJson<NewCaseRequest>,
) -> ApiResult<Json<Value>> {
    let created = state.engine.create_case(&caller, request).await?;
    Ok(Json(json!({
        "success": true,
        "distress": {
            "id": created.case_id,
            "status": created.status,
            "created_at": created.created_at,
        },
        "nearby_vets_count": created.candidate_count,
    })))
}

pub async fn active_distress(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
) -> ApiResult<Json<Value>> {
    let distress = state.engine.active_case(&caller).await?;
    Ok(Json(json!({ "success": true, "distress": distress })))
}

pub async fn nearby_distresses(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
) -> ApiResult<Json<Value>> {
    let distresses = state.engine.nearby_cases(&caller).await?;
    Ok(Json(json!({ "success": true, "distresses": distresses })))
}

pub async fn get_distress(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let distress = state.engine.case_detail(&caller, &id).await?;
    Ok(Json(json!({ "success": true, "distress": distress })))
}

pub async fn respond(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<RespondBody>,
) -> ApiResult<Json<Value>> {
    state
        .engine
        .submit_response(&caller, &id, body.mode, body.message)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Response submitted successfully",
    })))
}

pub async fn select(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<SelectBody>,
) -> ApiResult<Json<Value>> {
    let case = state
        .engine
        .select_responder(&caller, &id, &body.responder_id, body.mode)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Vet selected successfully",
        "distress": {
            "id": case.id,
            "status": case.status,
            "selected_responder_id": case.selected_responder_id,
            "response_mode": case.response_mode,
        },
    })))
}

pub async fn resolve(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.engine.resolve_case(&caller, &id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Distress resolved successfully",
    })))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.engine.cancel_case(&caller, &id).await?;
    Ok(Json(json!({ "success": true, "message": "Distress cancelled" })))
}

/// Raw assessment payload; parsed leniently, so no JSON extractor here.
pub async fn store_ai_analysis(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<String>,
    body: String,
) -> ApiResult<Json<Value>> {
    let case = state.engine.record_ai_analysis(&caller, &id, &body).await?;
    Ok(Json(json!({ "success": true, "ai_analysis": case.ai_analysis })))
}

pub async fn update_location(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    ApiJson(body): ApiJson<LocationBody>,
) -> ApiResult<Json<Value>> {
    state
        .relay
        .update_location(&caller, &body.distress_id, body.coordinates)
        .await?;
    Ok(Json(json!({ "success": true, "message": "Location updated" })))
}

pub async fn update_vet_location(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    ApiJson(body): ApiJson<ResponderLocationBody>,
) -> ApiResult<Json<Value>> {
    let profile = state
        .engine
        .update_responder_location(&caller, body.coordinates)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Location updated",
        "location": profile.location,
    })))
}

pub async fn set_availability(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    ApiJson(body): ApiJson<AvailabilityBody>,
) -> ApiResult<Json<Value>> {
    let profile = state
        .engine
        .set_responder_availability(&caller, body.available)
        .await?;
    Ok(Json(json!({ "success": true, "available": profile.available })))
}

pub async fn poll_updates(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    Path(id): Path<String>,
    Query(query): Query<SinceQuery>,
) -> ApiResult<Json<Value>> {
    let since = query.parse()?;
    let snapshot = state.relay.poll_updates(&caller, &id, since).await?;
    Ok(Json(json!({
        "success": true,
        "distress": snapshot.case,
        "locations": {
            "reporter": snapshot.reporter_location,
            "responder": snapshot.responder_location,
        },
        "has_updates": snapshot.has_updates,
        "server_time": snapshot.server_time,
    })))
}

pub async fn poll_nearby(
    State(state): State<Arc<AppState>>,
    AuthCaller(caller): AuthCaller,
    Query(query): Query<SinceQuery>,
) -> ApiResult<Json<Value>> {
    let since = query.parse()?;
    let poll = state.relay.poll_nearby(&caller, since).await?;
    Ok(Json(json!({
        "success": true,
        "distresses": poll.cases,
        "has_updates": poll.has_updates,
        "server_time": poll.server_time,
    })))
}
