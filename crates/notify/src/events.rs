//! Events pushed to connected clients.
//!
//! Serialized as `{"event": "<name>", "data": {...}}` text frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vetline_core::{CaseStatus, GeoPoint, Party, ResponseMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum HubEvent {
    /// A new case near a candidate responder
    NewDistress {
        distress_id: String,
        coordinates: GeoPoint,
        description: String,
        /// Geodesic distance from the responder, in kilometers
        distance_km: Option<f64>,
    },
    /// A responder offered help (sent to the reporter)
    VetResponse {
        distress_id: String,
        responder_id: String,
        mode: ResponseMode,
        distance_km: Option<f64>,
        estimated_minutes: Option<u32>,
        message: Option<String>,
    },
    /// The reporter picked this responder
    ResponseAccepted {
        distress_id: String,
        mode: ResponseMode,
        reporter_location: Option<GeoPoint>,
    },
    /// The case went to someone else or was withdrawn
    ResponseDeclined { distress_id: String, reason: String },
    DistressUpdated {
        distress_id: String,
        status: CaseStatus,
        response_count: usize,
        selected_responder_id: Option<String>,
    },
    DistressResolved {
        distress_id: String,
        resolved_by: String,
    },
    DistressCancelled { distress_id: String },
    LocationUpdated {
        distress_id: String,
        party: Party,
        user_id: String,
        coordinates: GeoPoint,
        updated_at: DateTime<Utc>,
    },
    /// Reply to a client socket message
    Ack {
        action: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        distress_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl HubEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            HubEvent::NewDistress { .. } => "new-distress",
            HubEvent::VetResponse { .. } => "vet-response",
            HubEvent::ResponseAccepted { .. } => "response-accepted",
            HubEvent::ResponseDeclined { .. } => "response-declined",
            HubEvent::DistressUpdated { .. } => "distress-updated",
            HubEvent::DistressResolved { .. } => "distress-resolved",
            HubEvent::DistressCancelled { .. } => "distress-cancelled",
            HubEvent::LocationUpdated { .. } => "location-updated",
            HubEvent::Ack { .. } => "ack",
        }
    }

    pub fn ack(action: impl Into<String>, distress_id: Option<String>) -> Self {
        HubEvent::Ack {
            action: action.into(),
            ok: true,
            distress_id,
            message: None,
        }
    }

    pub fn nack(action: impl Into<String>, message: impl Into<String>) -> Self {
        HubEvent::Ack {
            action: action.into(),
            ok: false,
            distress_id: None,
            message: Some(message.into()),
        }
    }
}

/// Name of the room for a case
pub fn room_name(case_id: &str) -> String {
    format!("distress:{}", case_id)
}
