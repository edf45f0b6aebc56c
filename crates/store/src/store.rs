//! The durable store contract used by the dispatch engine and location relay.
//!
//! Every mutating operation is conditional: the predicate that makes it
//! legal is checked by the store in the same statement or transaction as
//! the write, so concurrent callers cannot both succeed where only one may.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use vetline_core::{
    AiAnalysis, CaseOrigin, CaseStatus, DistressCase, GeoPoint, LocationSlot, Party,
    ResponderProfile, Response, ResponseMode, Result,
};

/// Fields of a case supplied at creation
#[derive(Debug, Clone, PartialEq)]
pub struct NewCase {
    pub id: String,
    pub reporter_id: String,
    pub description: String,
    pub image_url: Option<String>,
    pub origin: CaseOrigin,
    pub created_at: DateTime<Utc>,
}

/// An open case together with its geodesic distance from a query point
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyCase {
    pub case: DistressCase,
    pub distance_m: f64,
}

#[async_trait]
pub trait DistressStore: Send + Sync {
    /// Insert a `pending` case. `Conflict` if the reporter already has an active case.
    async fn insert_case(&self, new_case: NewCase) -> Result<DistressCase>;

    async fn get_case(&self, case_id: &str) -> Result<Option<DistressCase>>;

    /// The reporter's case in `pending`, `responded` or `in_progress`, if any
    async fn active_case_for(&self, reporter_id: &str) -> Result<Option<DistressCase>>;

    /// Append a response and move `pending` to `responded`.
    ///
    /// `NotFound` if the case is absent; `Conflict` if a responder is already
    /// selected, the case is no longer open, or this responder already responded.
    async fn append_response(&self, case_id: &str, response: Response) -> Result<DistressCase>;

    /// Compare-and-set the selected responder and move the case to `in_progress`.
    ///
    /// `NotFound` if the case or the responder's response is absent;
    /// `Conflict` if a selection already exists or the case is closed.
    async fn select_responder(
        &self,
        case_id: &str,
        responder_id: &str,
        mode: ResponseMode,
        at: DateTime<Utc>,
    ) -> Result<DistressCase>;

    /// Move to `resolved` or `cancelled` from any status the transition table allows.
    ///
    /// `NotFound` if absent; `Conflict` if the current status does not allow it.
    async fn close_case(
        &self,
        case_id: &str,
        to: CaseStatus,
        at: DateTime<Utc>,
    ) -> Result<DistressCase>;

    /// Overwrite one party's location slot. Does not touch `updated_at`.
    ///
    /// The slot's timestamp is raised to the commit time if it is older, so a
    /// poll whose server time was taken before the read never misses the write.
    ///
    /// `NotFound` if absent; `Conflict` if the case is resolved or cancelled.
    async fn update_location(
        &self,
        case_id: &str,
        party: Party,
        slot: LocationSlot,
    ) -> Result<DistressCase>;

    /// Record a poll for diagnostics. Does not touch `updated_at`.
    async fn record_poll(&self, case_id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn set_ai_analysis(
        &self,
        case_id: &str,
        analysis: AiAnalysis,
        at: DateTime<Utc>,
    ) -> Result<DistressCase>;

    /// Open, unselected cases whose origin is within `radius_m`, nearest first.
    async fn nearby_open_cases(
        &self,
        center: GeoPoint,
        radius_m: f64,
        limit: usize,
    ) -> Result<Vec<NearbyCase>>;

    /// Open, unselected cases within `radius_m` created strictly after `since`,
    /// newest first. The limit applies after the time filter and ordering.
    async fn recent_open_cases(
        &self,
        center: GeoPoint,
        radius_m: f64,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<NearbyCase>>;

    /// Insert or replace a responder profile.
    async fn upsert_responder(&self, profile: ResponderProfile) -> Result<ResponderProfile>;

    async fn get_responder(&self, user_id: &str) -> Result<Option<ResponderProfile>>;

    /// `NotFound` if the responder is not registered.
    async fn set_responder_location(
        &self,
        user_id: &str,
        location: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<ResponderProfile>;

    /// `NotFound` if the responder is not registered.
    async fn set_responder_availability(
        &self,
        user_id: &str,
        available: bool,
        at: DateTime<Utc>,
    ) -> Result<ResponderProfile>;

    /// Every responder with a stored location, for warming the geo index
    async fn located_responders(&self) -> Result<Vec<ResponderProfile>>;
}
