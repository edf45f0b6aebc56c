//! Live location tracking between a reporter and the selected responder.
//!
//! Every update is written to the store first. Sockets get a push when the
//! counterpart is connected; clients without a socket poll the same state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use vetline_core::{Caller, DistressCase, Error, GeoPoint, LocationSlot, Result};
use vetline_notify::{HubEvent, NotificationHub};
use vetline_store::DistressStore;

use crate::engine::{spawn_notify, DispatchSettings, NearbyCaseView};

/// State returned to a polling participant
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PollSnapshot {
    pub case: DistressCase,
    pub reporter_location: Option<LocationSlot>,
    pub responder_location: Option<LocationSlot>,
    pub has_updates: bool,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NearbyPoll {
    pub cases: Vec<NearbyCaseView>,
    pub has_updates: bool,
    pub server_time: DateTime<Utc>,
}

pub struct LocationRelay {
    store: Arc<dyn DistressStore>,
    hub: Arc<NotificationHub>,
    search_radius_m: f64,
    max_cases: usize,
    notify_timeout: Duration,
}

impl LocationRelay {
    pub fn new(
        store: Arc<dyn DistressStore>,
        hub: Arc<NotificationHub>,
        settings: &DispatchSettings,
    ) -> Self {
        Self {
            store,
            hub,
            search_radius_m: settings.search_radius_m,
            max_cases: settings.max_candidates,
            notify_timeout: settings.notify_timeout,
        }
    }

    async fn load_case(&self, case_id: &str) -> Result<DistressCase> {
        self.store
            .get_case(case_id)
            .await?
            .ok_or_else(|| Error::NotFound("Distress call not found".to_string()))
    }

    /// Store the caller's position on the case and push it to the other party.
    pub async fn update_location(
        &self,
        caller: &Caller,
        case_id: &str,
        point: GeoPoint,
    ) -> Result<DistressCase> {
        point.validate()?;

        let case = self.load_case(case_id).await?;
        let party = case.party_of(&caller.user_id).ok_or_else(|| {
            Error::Forbidden("Not authorized to update location for this distress".to_string())
        })?;
        if case.status.is_terminal() {
            return Err(Error::Conflict(format!(
                "Distress call is {} and no longer tracked",
                case.status
            )));
        }

        let slot = LocationSlot {
            coordinates: point,
            updated_at: Utc::now(),
        };
        let updated = self
            .store
            .update_location(case_id, party, slot.clone())
            .await?;
        debug!(case_id, party = ?party, "Location stored");

        let Some(counterpart) = updated.participant(party.counterpart()).map(str::to_string) else {
            return Ok(updated);
        };
        if !self.hub.is_reachable(&counterpart).await {
            debug!(case_id, counterpart = %counterpart, "Counterpart offline, leaving update for polling");
            return Ok(updated);
        }

        let stored = updated.location_of(party).cloned().unwrap_or(slot);
        let event = HubEvent::LocationUpdated {
            distress_id: updated.id.clone(),
            party,
            user_id: caller.user_id.clone(),
            coordinates: stored.coordinates,
            updated_at: stored.updated_at,
        };
        let hub = Arc::clone(&self.hub);
        let room = updated.id.clone();
        spawn_notify(self.notify_timeout, "location-updated", case_id, async move {
            hub.send_to(&counterpart, event.clone()).await;
            hub.broadcast_room(&room, event).await;
        });

        Ok(updated)
    }

    /// Current case state for a participant. Without `since` there are always updates.
    pub async fn poll_updates(
        &self,
        caller: &Caller,
        case_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<PollSnapshot> {
        // taken before the read so a write racing this poll is reported next time
        let now = Utc::now();
        let case = self.load_case(case_id).await?;
        let allowed = case.is_reporter(&caller.user_id)
            || case.is_selected_responder(&caller.user_id)
            || case.has_response_from(&caller.user_id);
        if !allowed {
            return Err(Error::Forbidden(
                "Not authorized to poll this distress".to_string(),
            ));
        }

        if let Err(e) = self.store.record_poll(case_id, now).await {
            warn!(case_id, error = %e, "Failed to record poll");
        }

        let has_updates = since.map_or(true, |since| case.changed_since(since));
        Ok(PollSnapshot {
            reporter_location: case.reporter_location.clone(),
            responder_location: case.responder_location.clone(),
            case,
            has_updates,
            server_time: now,
        })
    }

    /// Open cases near the calling responder, newest first.
    pub async fn poll_nearby(
        &self,
        caller: &Caller,
        since: Option<DateTime<Utc>>,
    ) -> Result<NearbyPoll> {
        if !caller.is_responder() {
            return Err(Error::Forbidden(
                "Only vets can poll nearby distresses".to_string(),
            ));
        }
        let profile = self
            .store
            .get_responder(&caller.user_id)
            .await?
            .ok_or_else(|| Error::NotFound("Responder profile not found".to_string()))?;
        let location = profile.location.ok_or_else(|| {
            Error::InvalidInput("Set your location before polling for nearby cases".to_string())
        })?;

        let now = Utc::now();
        let cases: Vec<NearbyCaseView> = self
            .store
            .recent_open_cases(location, self.search_radius_m, since, self.max_cases)
            .await?
            .into_iter()
            .map(|n| NearbyCaseView::from_nearby(n, &location))
            .collect();

        Ok(NearbyPoll {
            has_updates: !cases.is_empty(),
            cases,
            server_time: now,
        })
    }
}
