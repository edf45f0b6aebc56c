//! DispatchEngine: case lifecycle, responder candidate search and selection.
//!
//! Preconditions are checked against a fresh snapshot to produce precise
//! errors, then re-enforced by the store's conditional writes so concurrent
//! callers cannot both win. Notifications run in detached tasks under a
//! timeout; their failures are logged and never fail the request.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vetline_core::{
    haversine_km, CaseOrigin, CaseStatus, Caller, Config, DistressCase, Error, GeoPoint,
    ResponderProfile, Response, ResponseMode, Result, Role,
};
use vetline_geo::GeoIndex;
use vetline_notify::{HubEvent, NotificationHub};
use vetline_store::{DistressStore, NearbyCase, NewCase};

use crate::analysis::parse_ai_analysis;
use crate::distance::DistanceEstimator;

/// Shortest accepted description, in characters after trimming
pub const MIN_DESCRIPTION_CHARS: usize = 10;

/// Tunables for candidate search and notification delivery
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub search_radius_m: f64,
    pub max_candidates: usize,
    pub grid_cell_deg: f64,
    pub notify_timeout: Duration,
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            search_radius_m: config.dispatch.search_radius_m,
            max_candidates: config.dispatch.max_candidates,
            grid_cell_deg: config.dispatch.grid_cell_deg,
            notify_timeout: config.timeouts.notify(),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Body of a new distress call
#[derive(Debug, Clone, Deserialize)]
pub struct NewCaseRequest {
    pub description: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub location: Option<CaseOrigin>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CaseCreated {
    pub case_id: String,
    pub status: CaseStatus,
    pub created_at: DateTime<Utc>,
    /// Responders alerted about the case
    pub candidate_count: usize,
}

/// An open case as shown to a nearby responder
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NearbyCaseView {
    #[serde(flatten)]
    pub case: DistressCase,
    /// Spherical distance from the responder, rounded to 0.1 km
    pub distance_km: f64,
}

impl NearbyCaseView {
    pub(crate) fn from_nearby(nearby: NearbyCase, from: &GeoPoint) -> Self {
        let distance_km = round_tenth(haversine_km(from, &nearby.case.origin.coordinates));
        Self {
            case: nearby.case,
            distance_km,
        }
    }
}

pub(crate) fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Run `delivery` in the background, bounded by `limit`.
pub(crate) fn spawn_notify<F>(limit: Duration, what: &'static str, case_id: &str, delivery: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let case_id = case_id.to_string();
    tokio::spawn(async move {
        if tokio::time::timeout(limit, delivery).await.is_err() {
            warn!(case_id = %case_id, what, "Notification delivery timed out");
        }
    });
}

pub struct DispatchEngine {
    store: Arc<dyn DistressStore>,
    hub: Arc<NotificationHub>,
    geo: GeoIndex<ResponderProfile>,
    distance: DistanceEstimator,
    settings: DispatchSettings,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn DistressStore>,
        hub: Arc<NotificationHub>,
        distance: DistanceEstimator,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            geo: GeoIndex::new(settings.grid_cell_deg),
            store,
            hub,
            distance,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn geo(&self) -> &GeoIndex<ResponderProfile> {
        &self.geo
    }

    /// Load every located responder from the store into the geo index.
    pub async fn warm_index(&self) -> Result<usize> {
        let responders = self.store.located_responders().await?;
        let entries: Vec<_> = responders
            .into_iter()
            .filter_map(|profile| {
                let point = profile.location?;
                Some((profile.user_id.clone(), point, profile))
            })
            .collect();
        let count = entries.len();
        self.geo.populate(entries);
        info!(responders = count, "Responder index warmed");
        Ok(count)
    }

    fn sync_index(&self, profile: &ResponderProfile) {
        match profile.location {
            Some(point) => self.geo.upsert(&profile.user_id, point, profile.clone()),
            None => {
                self.geo.remove(&profile.user_id);
            }
        }
    }

    async fn load_case(&self, case_id: &str) -> Result<DistressCase> {
        self.store
            .get_case(case_id)
            .await?
            .ok_or_else(|| Error::NotFound("Distress call not found".to_string()))
    }

    /// The caller's profile if they are a registered responder
    async fn registered_responder(&self, caller: &Caller) -> Result<Option<ResponderProfile>> {
        if !caller.is_responder() {
            return Ok(None);
        }
        self.store.get_responder(&caller.user_id).await
    }

    pub async fn create_case(&self, caller: &Caller, request: NewCaseRequest) -> Result<CaseCreated> {
        if caller.role != Role::Reporter {
            return Err(Error::Forbidden(
                "Only reporters can create distress calls".to_string(),
            ));
        }

        let description = request.description.trim().to_string();
        if description.chars().count() < MIN_DESCRIPTION_CHARS {
            return Err(Error::InvalidInput(format!(
                "Description must be at least {} characters",
                MIN_DESCRIPTION_CHARS
            )));
        }
        let origin = request
            .location
            .ok_or_else(|| Error::InvalidInput("Location is required".to_string()))?;
        origin.coordinates.validate()?;

        let case = self
            .store
            .insert_case(NewCase {
                id: uuid::Uuid::new_v4().to_string(),
                reporter_id: caller.user_id.clone(),
                description,
                image_url: request.image_url.filter(|url| !url.trim().is_empty()),
                origin,
                created_at: Utc::now(),
            })
            .await?;

        let candidates = self.geo.find_nearby(
            &case.origin.coordinates,
            self.settings.search_radius_m,
            self.settings.max_candidates,
            |profile| profile.available && profile.user_id != case.reporter_id,
        );

        info!(
            case_id = %case.id,
            reporter_id = %case.reporter_id,
            candidates = candidates.len(),
            "Distress call created"
        );

        let hub = Arc::clone(&self.hub);
        let alerted_case = case.id.clone();
        let alerts: HashMap<String, HubEvent> = candidates
            .iter()
            .map(|candidate| {
                (
                    candidate.id.clone(),
                    HubEvent::NewDistress {
                        distress_id: case.id.clone(),
                        coordinates: case.origin.coordinates,
                        description: case.description.clone(),
                        distance_km: Some(round_tenth(candidate.distance_m / 1000.0)),
                    },
                )
            })
            .collect();
        spawn_notify(self.settings.notify_timeout, "new-distress", &case.id, async move {
            let local = hub.broadcast_responders(|responder_id| alerts.get(responder_id).cloned());
            // candidates without a socket here may be connected to another instance
            for (responder_id, event) in alerts {
                if !hub.is_online(&responder_id) {
                    hub.send_to(&responder_id, event).await;
                }
            }
            debug!(case_id = %alerted_case, delivered = local, "New distress alerts sent");
        });

        Ok(CaseCreated {
            case_id: case.id,
            status: case.status,
            created_at: case.created_at,
            candidate_count: candidates.len(),
        })
    }

    /// The caller's case in pending, responded or in_progress, if any
    pub async fn active_case(&self, caller: &Caller) -> Result<Option<DistressCase>> {
        self.store.active_case_for(&caller.user_id).await
    }

    pub async fn case_detail(&self, caller: &Caller, case_id: &str) -> Result<DistressCase> {
        let case = self.load_case(case_id).await?;

        let involved = case.is_reporter(&caller.user_id)
            || case.is_selected_responder(&caller.user_id)
            || case.has_response_from(&caller.user_id);
        if involved {
            return Ok(case);
        }

        // Registered responders may look at cases still open for responses.
        if case.status.is_open() && self.registered_responder(caller).await?.is_some() {
            return Ok(case);
        }

        Err(Error::Forbidden(
            "Not authorized to view this distress".to_string(),
        ))
    }

    /// Open cases near the calling responder, nearest first
    pub async fn nearby_cases(&self, caller: &Caller) -> Result<Vec<NearbyCaseView>> {
        let profile = self
            .registered_responder(caller)
            .await?
            .ok_or_else(|| Error::Forbidden("Only vets can view nearby distresses".to_string()))?;
        let location = profile.location.ok_or_else(|| {
            Error::InvalidInput("Set your location before searching for nearby cases".to_string())
        })?;

        let nearby = self
            .store
            .nearby_open_cases(
                location,
                self.settings.search_radius_m,
                self.settings.max_candidates,
            )
            .await?;

        Ok(nearby
            .into_iter()
            .map(|n| NearbyCaseView::from_nearby(n, &location))
            .collect())
    }

    pub async fn submit_response(
        &self,
        caller: &Caller,
        case_id: &str,
        mode: ResponseMode,
        message: Option<String>,
    ) -> Result<DistressCase> {
        let profile = self
            .registered_responder(caller)
            .await?
            .ok_or_else(|| {
                Error::Forbidden("Only vets can respond to distress calls".to_string())
            })?;

        let case = self.load_case(case_id).await?;
        if case.selected_responder_id.is_some() {
            return Err(Error::Conflict(
                "This distress has already been assigned".to_string(),
            ));
        }
        if !case.status.is_open() {
            return Err(Error::Conflict(format!(
                "Distress call is {} and no longer accepts responses",
                case.status
            )));
        }
        if case.has_response_from(&profile.user_id) {
            return Err(Error::Conflict(
                "You have already responded to this distress".to_string(),
            ));
        }

        let estimate = match profile.location {
            Some(location) => Some(
                self.distance
                    .estimate(location, case.origin.coordinates)
                    .await,
            ),
            None => None,
        };

        let response = Response {
            responder_id: profile.user_id.clone(),
            mode,
            distance_km: estimate.map(|e| round_tenth(e.distance_km)),
            estimated_minutes: estimate.map(|e| e.duration_minutes),
            message: message
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty()),
            responded_at: Utc::now(),
        };

        let updated = self.store.append_response(case_id, response.clone()).await?;
        info!(
            case_id,
            responder_id = %response.responder_id,
            responses = updated.responses.len(),
            "Response submitted"
        );

        let hub = Arc::clone(&self.hub);
        let reporter_id = updated.reporter_id.clone();
        let to_reporter = HubEvent::VetResponse {
            distress_id: updated.id.clone(),
            responder_id: response.responder_id,
            mode: response.mode,
            distance_km: response.distance_km,
            estimated_minutes: response.estimated_minutes,
            message: response.message,
        };
        let to_room = distress_updated(&updated);
        let room = updated.id.clone();
        spawn_notify(self.settings.notify_timeout, "vet-response", case_id, async move {
            hub.send_to(&reporter_id, to_reporter).await;
            hub.broadcast_room(&room, to_room).await;
        });

        Ok(updated)
    }

    /// Pick the winning responder. `mode` defaults to the mode the responder offered.
    pub async fn select_responder(
        &self,
        caller: &Caller,
        case_id: &str,
        responder_id: &str,
        mode: Option<ResponseMode>,
    ) -> Result<DistressCase> {
        let case = self.load_case(case_id).await?;
        if !case.is_reporter(&caller.user_id) {
            return Err(Error::Forbidden(
                "Only the owner can select a vet".to_string(),
            ));
        }
        if case.selected_responder_id.is_some() {
            return Err(Error::Conflict(
                "A responder has already been selected".to_string(),
            ));
        }
        let offered = case
            .response_from(responder_id)
            .ok_or_else(|| Error::NotFound("Response not found".to_string()))?;
        let mode = mode.unwrap_or(offered.mode);

        let updated = self
            .store
            .select_responder(case_id, responder_id, mode, Utc::now())
            .await?;
        info!(case_id, responder_id, mode = mode.as_str(), "Responder selected");

        let hub = Arc::clone(&self.hub);
        let winner = responder_id.to_string();
        let accepted = HubEvent::ResponseAccepted {
            distress_id: updated.id.clone(),
            mode,
            reporter_location: updated.reporter_location.as_ref().map(|s| s.coordinates),
        };
        let losers = updated.unselected_responders();
        let declined = HubEvent::ResponseDeclined {
            distress_id: updated.id.clone(),
            reason: "Another responder was selected".to_string(),
        };
        let to_room = distress_updated(&updated);
        let room = updated.id.clone();
        spawn_notify(self.settings.notify_timeout, "response-accepted", case_id, async move {
            hub.send_to(&winner, accepted).await;
            for loser in losers {
                hub.send_to(&loser, declined.clone()).await;
            }
            hub.broadcast_room(&room, to_room).await;
        });

        Ok(updated)
    }

    /// Close an in-progress case. Allowed for the reporter and the selected responder.
    pub async fn resolve_case(&self, caller: &Caller, case_id: &str) -> Result<DistressCase> {
        let case = self.load_case(case_id).await?;
        if !case.is_reporter(&caller.user_id) && !case.is_selected_responder(&caller.user_id) {
            return Err(Error::Forbidden(
                "Not authorized to resolve this distress".to_string(),
            ));
        }
        if case.status != CaseStatus::InProgress {
            return Err(Error::Conflict(format!(
                "Only in-progress cases can be resolved; this one is {}",
                case.status
            )));
        }

        let updated = self
            .store
            .close_case(case_id, CaseStatus::Resolved, Utc::now())
            .await?;
        info!(case_id, resolved_by = %caller.user_id, "Distress call resolved");

        let hub = Arc::clone(&self.hub);
        let event = HubEvent::DistressResolved {
            distress_id: updated.id.clone(),
            resolved_by: caller.user_id.clone(),
        };
        let room = updated.id.clone();
        spawn_notify(self.settings.notify_timeout, "distress-resolved", case_id, async move {
            hub.broadcast_room(&room, event).await;
        });

        Ok(updated)
    }

    /// Withdraw a case. Reporter only; every responder is told their offer lapsed.
    pub async fn cancel_case(&self, caller: &Caller, case_id: &str) -> Result<DistressCase> {
        let case = self.load_case(case_id).await?;
        if !case.is_reporter(&caller.user_id) {
            return Err(Error::Forbidden("Only the owner can cancel".to_string()));
        }
        if case.status.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "Distress call is already {}",
                case.status
            )));
        }

        let updated = self
            .store
            .close_case(case_id, CaseStatus::Cancelled, Utc::now())
            .await?;
        info!(case_id, "Distress call cancelled");

        let hub = Arc::clone(&self.hub);
        let responders: Vec<String> = updated
            .responses
            .iter()
            .map(|r| r.responder_id.clone())
            .collect();
        let cancelled = HubEvent::DistressCancelled {
            distress_id: updated.id.clone(),
        };
        let declined = HubEvent::ResponseDeclined {
            distress_id: updated.id.clone(),
            reason: "The distress call was cancelled".to_string(),
        };
        let room = updated.id.clone();
        spawn_notify(self.settings.notify_timeout, "distress-cancelled", case_id, async move {
            hub.broadcast_room(&room, cancelled).await;
            for responder in responders {
                hub.send_to(&responder, declined.clone()).await;
            }
        });

        Ok(updated)
    }

    /// Attach a triage payload from the assessment service. Reporter only.
    pub async fn record_ai_analysis(
        &self,
        caller: &Caller,
        case_id: &str,
        raw: &str,
    ) -> Result<DistressCase> {
        let case = self.load_case(case_id).await?;
        if !case.is_reporter(&caller.user_id) {
            return Err(Error::Forbidden(
                "Only the owner can attach an assessment".to_string(),
            ));
        }

        let analysis = parse_ai_analysis(raw);
        debug!(case_id, severity = ?analysis.severity, "Storing AI analysis");
        self.store
            .set_ai_analysis(case_id, analysis, Utc::now())
            .await
    }

    /// Create or replace a responder profile and index it.
    pub async fn register_responder(&self, profile: ResponderProfile) -> Result<ResponderProfile> {
        if profile.user_id.trim().is_empty() {
            return Err(Error::InvalidInput("Responder id is required".to_string()));
        }
        if let Some(location) = &profile.location {
            location.validate()?;
        }

        let stored = self.store.upsert_responder(profile).await?;
        self.sync_index(&stored);
        debug!(responder_id = %stored.user_id, available = stored.available, "Responder registered");
        Ok(stored)
    }

    pub async fn update_responder_location(
        &self,
        caller: &Caller,
        location: GeoPoint,
    ) -> Result<ResponderProfile> {
        if !caller.is_responder() {
            return Err(Error::Forbidden(
                "Only vets can update their location".to_string(),
            ));
        }
        location.validate()?;

        let profile = self
            .store
            .set_responder_location(&caller.user_id, location, Utc::now())
            .await?;
        self.sync_index(&profile);
        Ok(profile)
    }

    pub async fn set_responder_availability(
        &self,
        caller: &Caller,
        available: bool,
    ) -> Result<ResponderProfile> {
        if !caller.is_responder() {
            return Err(Error::Forbidden(
                "Only vets can change availability".to_string(),
            ));
        }

        let profile = self
            .store
            .set_responder_availability(&caller.user_id, available, Utc::now())
            .await?;
        self.sync_index(&profile);
        info!(responder_id = %caller.user_id, available, "Responder availability changed");
        Ok(profile)
    }
}

fn distress_updated(case: &DistressCase) -> HubEvent {
    HubEvent::DistressUpdated {
        distress_id: case.id.clone(),
        status: case.status,
        response_count: case.responses.len(),
        selected_responder_id: case.selected_responder_id.clone(),
    }
}
