//! Core dispatch types
//!
//! Cases, responses, responder profiles and the caller identity shared by
//! every crate in the workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::geodesy::GeoPoint;
use crate::Error;

/// Case lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// Case created, no responses yet
    Pending,
    /// At least one responder offered help
    Responded,
    /// Reporter selected a responder
    InProgress,
    /// Case closed successfully
    Resolved,
    /// Case withdrawn by the reporter
    Cancelled,
}

impl CaseStatus {
    /// All states, in lifecycle order
    pub const ALL: [CaseStatus; 5] = [
        CaseStatus::Pending,
        CaseStatus::Responded,
        CaseStatus::InProgress,
        CaseStatus::Resolved,
        CaseStatus::Cancelled,
    ];

    /// States counted against the one-active-case-per-reporter rule
    pub const ACTIVE: [CaseStatus; 3] = [
        CaseStatus::Pending,
        CaseStatus::Responded,
        CaseStatus::InProgress,
    ];

    /// Check if state is terminal (resolved or cancelled)
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseStatus::Resolved | CaseStatus::Cancelled)
    }

    /// Check if the case still accepts responses and a selection
    pub fn is_open(&self) -> bool {
        matches!(self, CaseStatus::Pending | CaseStatus::Responded)
    }

    /// Check if transition to new state is valid
    pub fn can_transition_to(&self, new_state: CaseStatus) -> bool {
        match (self, new_state) {
            // From Pending
            (CaseStatus::Pending, CaseStatus::Responded) => true,
            (CaseStatus::Pending, CaseStatus::InProgress) => true,
            (CaseStatus::Pending, CaseStatus::Cancelled) => true,
            // From Responded
            (CaseStatus::Responded, CaseStatus::InProgress) => true,
            (CaseStatus::Responded, CaseStatus::Cancelled) => true,
            // From InProgress
            (CaseStatus::InProgress, CaseStatus::Resolved) => true,
            (CaseStatus::InProgress, CaseStatus::Cancelled) => true,
            // Terminal states cannot transition
            (CaseStatus::Resolved, _) => false,
            (CaseStatus::Cancelled, _) => false,
            _ => false,
        }
    }

    /// States from which `target` is reachable in one step
    pub fn sources_of(target: CaseStatus) -> Vec<CaseStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(target))
            .collect()
    }

    /// Wire and storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Pending => "pending",
            CaseStatus::Responded => "responded",
            CaseStatus::InProgress => "in_progress",
            CaseStatus::Resolved => "resolved",
            CaseStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaseStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CaseStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown case status: {}", s)))
    }
}

/// How reporter and responder meet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    /// Responder travels to the animal
    #[serde(alias = "vet_coming")]
    ResponderComing,
    /// Reporter brings the animal to the responder
    #[serde(alias = "user_going")]
    ReporterGoing,
}

impl ResponseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseMode::ResponderComing => "responder_coming",
            ResponseMode::ReporterGoing => "reporter_going",
        }
    }
}

impl FromStr for ResponseMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "responder_coming" | "vet_coming" => Ok(ResponseMode::ResponderComing),
            "reporter_going" | "user_going" => Ok(ResponseMode::ReporterGoing),
            other => Err(Error::InvalidInput(format!("Invalid response mode: {}", other))),
        }
    }
}

/// Caller role as asserted by the authenticating gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Pet owner or passer-by reporting an emergency
    #[serde(alias = "user")]
    Reporter,
    /// Veterinary responder
    #[serde(alias = "vet")]
    Responder,
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reporter" | "user" => Ok(Role::Reporter),
            "responder" | "vet" => Ok(Role::Responder),
            other => Err(Error::Unauthorized(format!("Unknown role: {}", other))),
        }
    }
}

/// Authenticated caller identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: String,
    pub role: Role,
}

impl Caller {
    pub fn reporter(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Reporter,
        }
    }

    pub fn responder(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Responder,
        }
    }

    pub fn is_responder(&self) -> bool {
        self.role == Role::Responder
    }
}

/// Where the emergency was reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseOrigin {
    pub coordinates: GeoPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Latest known position of one party
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSlot {
    pub coordinates: GeoPoint,
    pub updated_at: DateTime<Utc>,
}

/// Which location slot of a case a write targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Reporter,
    Responder,
}

impl Party {
    pub fn counterpart(&self) -> Party {
        match self {
            Party::Reporter => Party::Responder,
            Party::Responder => Party::Reporter,
        }
    }
}

/// A responder's offer to help. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub responder_id: String,
    pub mode: ResponseMode,
    /// Travel distance in kilometers, informational only
    pub distance_km: Option<f64>,
    /// Travel time in minutes, informational only
    pub estimated_minutes: Option<u32>,
    pub message: Option<String>,
    pub responded_at: DateTime<Utc>,
}

/// Triage severity reported by the assessment collaborator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Advisory triage attached to a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAnalysis {
    pub severity: Severity,
    pub suggestions: Vec<String>,
    pub possible_conditions: Vec<String>,
    pub immediate_steps: Vec<String>,
    pub disclaimer: String,
}

/// One emergency report tracked from creation to resolution or cancellation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistressCase {
    pub id: String,
    pub reporter_id: String,
    pub description: String,
    pub image_url: Option<String>,
    pub origin: CaseOrigin,
    pub status: CaseStatus,
    /// Arrival order
    pub responses: Vec<Response>,
    pub selected_responder_id: Option<String>,
    pub response_mode: Option<ResponseMode>,
    pub reporter_location: Option<LocationSlot>,
    pub responder_location: Option<LocationSlot>,
    pub ai_analysis: Option<AiAnalysis>,
    pub created_at: DateTime<Utc>,
    /// Last change to the case itself; location writes and polls do not bump it
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl DistressCase {
    pub fn is_reporter(&self, user_id: &str) -> bool {
        self.reporter_id == user_id
    }

    pub fn is_selected_responder(&self, user_id: &str) -> bool {
        self.selected_responder_id.as_deref() == Some(user_id)
    }

    pub fn response_from(&self, responder_id: &str) -> Option<&Response> {
        self.responses
            .iter()
            .find(|r| r.responder_id == responder_id)
    }

    pub fn has_response_from(&self, responder_id: &str) -> bool {
        self.response_from(responder_id).is_some()
    }

    /// Responders that offered help but were not selected
    pub fn unselected_responders(&self) -> Vec<String> {
        self.responses
            .iter()
            .filter(|r| !self.is_selected_responder(&r.responder_id))
            .map(|r| r.responder_id.clone())
            .collect()
    }

    /// Which location slot `user_id` may write, if any
    pub fn party_of(&self, user_id: &str) -> Option<Party> {
        if self.is_reporter(user_id) {
            Some(Party::Reporter)
        } else if self.is_selected_responder(user_id) {
            Some(Party::Responder)
        } else {
            None
        }
    }

    pub fn location_of(&self, party: Party) -> Option<&LocationSlot> {
        match party {
            Party::Reporter => self.reporter_location.as_ref(),
            Party::Responder => self.responder_location.as_ref(),
        }
    }

    /// Identity holding the given slot, when known
    pub fn participant(&self, party: Party) -> Option<&str> {
        match party {
            Party::Reporter => Some(self.reporter_id.as_str()),
            Party::Responder => self.selected_responder_id.as_deref(),
        }
    }

    /// True iff the case or either location slot changed strictly after `since`
    pub fn changed_since(&self, since: DateTime<Utc>) -> bool {
        let slot_changed = [&self.reporter_location, &self.responder_location]
            .into_iter()
            .flatten()
            .any(|slot| slot.updated_at > since);
        slot_changed || self.updated_at > since
    }
}

/// Availability and base position of a responder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponderProfile {
    pub user_id: String,
    pub display_name: Option<String>,
    pub available: bool,
    pub location: Option<GeoPoint>,
    pub rating: f32,
    pub review_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl ResponderProfile {
    pub fn new(user_id: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            available: false,
            location: None,
            rating: 0.0,
            review_count: 0,
            updated_at,
        }
    }
}
