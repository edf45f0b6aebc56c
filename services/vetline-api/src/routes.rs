use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use vetline_ratelimit::PolicyName;

use crate::error::ApiError;
use crate::extract::client_key;
use crate::handlers;
use crate::state::AppState;

/// Rate-limit key resolved once per request by [`general_limit`]
#[derive(Debug, Clone)]
pub struct ClientKey(pub String);

/// Apply the `general` policy to every route and stash the client key.
pub async fn general_limit(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = client_key(request.headers(), request.extensions());
    state.limiter.check(PolicyName::General, &key).await?;
    request.extensions_mut().insert(ClientKey(key));
    Ok(next.run(request).await)
}

/// State for a per-route policy gate
#[derive(Clone)]
pub struct PolicyGate {
    state: Arc<AppState>,
    policy: PolicyName,
}

/// Apply one named policy before the route's extractors run, so rejected or
/// malformed requests still count against it.
pub async fn policy_limit(
    State(gate): State<PolicyGate>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = match request.extensions().get::<ClientKey>() {
        Some(ClientKey(key)) => key.clone(),
        None => client_key(request.headers(), request.extensions()),
    };
    gate.state.limiter.check(gate.policy, &key).await?;
    Ok(next.run(request).await)
}

pub fn router(state: Arc<AppState>) -> Router {
    let gate = |policy| PolicyGate {
        state: Arc::clone(&state),
        policy,
    };

    let distress = Router::new()
        .route(
            "/call",
            post(handlers::create_distress).route_layer(middleware::from_fn_with_state(
                gate(PolicyName::DistressCall),
                policy_limit,
            )),
        )
        .route("/active", get(handlers::active_distress))
        .route("/nearby", get(handlers::nearby_distresses))
        .route("/:id", get(handlers::get_distress))
        .route("/:id/respond", post(handlers::respond))
        .route("/:id/select", post(handlers::select))
        .route("/:id/resolve", post(handlers::resolve))
        .route("/:id/cancel", post(handlers::cancel))
        .route(
            "/:id/ai-analysis",
            put(handlers::store_ai_analysis).route_layer(middleware::from_fn_with_state(
                gate(PolicyName::AiAssist),
                policy_limit,
            )),
        );

    let location = Router::new()
        .route("/update", post(handlers::update_location))
        .route("/vet-update", post(handlers::update_vet_location))
        .route("/availability", post(handlers::set_availability))
        .route("/poll/:id", get(handlers::poll_updates))
        .route("/poll-nearby", get(handlers::poll_nearby));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/distress", distress)
        .nest("/location", location)
        .layer(ServiceBuilder::new().layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            general_limit,
        )))
        .with_state(state)
}
