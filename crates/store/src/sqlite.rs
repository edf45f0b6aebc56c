//! SQLite implementation of [`DistressStore`].
//!
//! One connection behind a mutex, driven from the blocking pool. Every call
//! is bounded by the configured store timeout.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use tracing::{debug, info, warn};
use vetline_core::{
    geodesic_distance_m, AiAnalysis, CaseOrigin, CaseStatus, DistressCase, GeoPoint,
    LocationSlot, Party, ResponderProfile, Response, ResponseMode, Result,
};
use vetline_geo::BoundingBox;

use crate::schema::{init_schema, live_sql, open_sql, sources_sql};
use crate::store::{DistressStore, NearbyCase, NewCase};
use crate::StoreError;

const CASE_COLUMNS: &str = "id, reporter_id, description, image_url, \
    origin_lon, origin_lat, origin_address, status, selected_responder_id, response_mode, \
    reporter_lon, reporter_lat, reporter_updated_at, \
    responder_lon, responder_lat, responder_updated_at, \
    ai_analysis, created_at, updated_at, resolved_at, cancelled_at, last_polled_at";

const RESPONDER_COLUMNS: &str =
    "user_id, display_name, available, lon, lat, rating, review_count, updated_at";

/// Store backed by a single SQLite connection
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    timeout: Duration,
}

impl SqliteStore {
    /// Open or create a database file in WAL mode.
    pub fn open(path: impl AsRef<Path>, timeout: Duration) -> std::result::Result<Self, StoreError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening distress store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Self::from_connection(conn, timeout)
    }

    /// Private in-memory database, for tests and demos
    pub fn open_in_memory(timeout: Duration) -> std::result::Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::from_connection(conn, timeout)
    }

    fn from_connection(conn: Connection, timeout: Duration) -> std::result::Result<Self, StoreError> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            timeout,
        })
    }

    /// Run `f` against the connection on the blocking pool.
    ///
    /// The store timeout bounds the wait for the connection. An operation that
    /// gets the connection in time runs to completion and reports its result;
    /// one that does not is never executed, so `Timeout` means nothing was written.
    async fn call<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> std::result::Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let deadline = Instant::now() + self.timeout;
        let task = tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            if Instant::now() > deadline {
                return Err(StoreError::Timeout(op));
            }
            f(&mut conn)
        });

        let outcome = match task.await {
            Ok(result) => result,
            Err(join_err) => Err(StoreError::Task(join_err.to_string())),
        };

        outcome.map_err(|e| {
            match &e {
                StoreError::NotFound(_) | StoreError::Conflict(_) => {
                    debug!(op, error = %e, "Store precondition not met")
                }
                _ => warn!(op, error = %e, "Store operation failed"),
            }
            e.into()
        })
    }
}

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(micros: i64) -> std::result::Result<DateTime<Utc>, StoreError> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", micros)))
}

fn opt_from_micros(micros: Option<i64>) -> std::result::Result<Option<DateTime<Utc>>, StoreError> {
    micros.map(from_micros).transpose()
}

fn parse_status(raw: &str) -> std::result::Result<CaseStatus, StoreError> {
    raw.parse().map_err(|e: vetline_core::Error| StoreError::Corrupt(e.to_string()))
}

fn parse_mode(raw: &str) -> std::result::Result<ResponseMode, StoreError> {
    raw.parse().map_err(|e: vetline_core::Error| StoreError::Corrupt(e.to_string()))
}

fn case_not_found() -> StoreError {
    StoreError::NotFound("Distress call not found".to_string())
}

/// Raw `cases` row, converted into a [`DistressCase`] once responses are loaded
struct CaseRow {
    id: String,
    reporter_id: String,
    description: String,
    image_url: Option<String>,
    origin_lon: f64,
    origin_lat: f64,
    origin_address: Option<String>,
    status: String,
    selected_responder_id: Option<String>,
    response_mode: Option<String>,
    reporter_slot: (Option<f64>, Option<f64>, Option<i64>),
    responder_slot: (Option<f64>, Option<f64>, Option<i64>),
    ai_analysis: Option<String>,
    created_at: i64,
    updated_at: i64,
    resolved_at: Option<i64>,
    cancelled_at: Option<i64>,
    last_polled_at: Option<i64>,
}

impl CaseRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            reporter_id: row.get(1)?,
            description: row.get(2)?,
            image_url: row.get(3)?,
            origin_lon: row.get(4)?,
            origin_lat: row.get(5)?,
            origin_address: row.get(6)?,
            status: row.get(7)?,
            selected_responder_id: row.get(8)?,
            response_mode: row.get(9)?,
            reporter_slot: (row.get(10)?, row.get(11)?, row.get(12)?),
            responder_slot: (row.get(13)?, row.get(14)?, row.get(15)?),
            ai_analysis: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
            resolved_at: row.get(19)?,
            cancelled_at: row.get(20)?,
            last_polled_at: row.get(21)?,
        })
    }

    fn origin(&self) -> GeoPoint {
        GeoPoint::new(self.origin_lon, self.origin_lat)
    }

    fn into_case(self, responses: Vec<Response>) -> std::result::Result<DistressCase, StoreError> {
        let ai_analysis = match self.ai_analysis.as_deref() {
            Some(raw) => Some(serde_json::from_str::<AiAnalysis>(raw)?),
            None => None,
        };

        Ok(DistressCase {
            origin: CaseOrigin {
                coordinates: self.origin(),
                address: self.origin_address,
            },
            status: parse_status(&self.status)?,
            response_mode: self.response_mode.as_deref().map(parse_mode).transpose()?,
            reporter_location: slot(self.reporter_slot)?,
            responder_location: slot(self.responder_slot)?,
            ai_analysis,
            created_at: from_micros(self.created_at)?,
            updated_at: from_micros(self.updated_at)?,
            resolved_at: opt_from_micros(self.resolved_at)?,
            cancelled_at: opt_from_micros(self.cancelled_at)?,
            last_polled_at: opt_from_micros(self.last_polled_at)?,
            id: self.id,
            reporter_id: self.reporter_id,
            description: self.description,
            image_url: self.image_url,
            responses,
            selected_responder_id: self.selected_responder_id,
        })
    }
}

fn slot(
    (lon, lat, at): (Option<f64>, Option<f64>, Option<i64>),
) -> std::result::Result<Option<LocationSlot>, StoreError> {
    match (lon, lat, at) {
        (Some(lon), Some(lat), Some(at)) => Ok(Some(LocationSlot {
            coordinates: GeoPoint::new(lon, lat),
            updated_at: from_micros(at)?,
        })),
        _ => Ok(None),
    }
}

fn load_responses(conn: &Connection, case_id: &str) -> std::result::Result<Vec<Response>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT responder_id, mode, distance_km, estimated_minutes, message, responded_at
         FROM responses WHERE case_id = ?1 ORDER BY seq",
    )?;
    let rows = stmt
        .query_map(params![case_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<f64>>(2)?,
                row.get::<_, Option<u32>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(
            |(responder_id, mode, distance_km, estimated_minutes, message, responded_at)| {
                Ok(Response {
                    responder_id,
                    mode: parse_mode(&mode)?,
                    distance_km,
                    estimated_minutes,
                    message,
                    responded_at: from_micros(responded_at)?,
                })
            },
        )
        .collect()
}

fn load_case(conn: &Connection, case_id: &str) -> std::result::Result<Option<DistressCase>, StoreError> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM cases WHERE id = ?1", CASE_COLUMNS),
            params![case_id],
            CaseRow::from_row,
        )
        .optional()?;

    match row {
        Some(row) => {
            let responses = load_responses(conn, &row.id)?;
            Ok(Some(row.into_case(responses)?))
        }
        None => Ok(None),
    }
}

fn require_case(conn: &Connection, case_id: &str) -> std::result::Result<DistressCase, StoreError> {
    load_case(conn, case_id)?.ok_or_else(case_not_found)
}

fn insert_case(conn: &mut Connection, new_case: NewCase) -> std::result::Result<DistressCase, StoreError> {
    let origin = new_case.origin.coordinates;
    let created_at = to_micros(new_case.created_at);

    conn.execute(
        "INSERT INTO cases (
            id, reporter_id, description, image_url,
            origin_lon, origin_lat, origin_address, status,
            reporter_lon, reporter_lat, reporter_updated_at,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        params![
            new_case.id,
            new_case.reporter_id,
            new_case.description,
            new_case.image_url,
            origin.lon,
            origin.lat,
            new_case.origin.address,
            CaseStatus::Pending.as_str(),
            origin.lon,
            origin.lat,
            created_at,
            created_at,
        ],
    )
    .map_err(|e| {
        let e = StoreError::from(e);
        if e.is_constraint_violation() {
            StoreError::Conflict("You already have an active distress call".to_string())
        } else {
            e
        }
    })?;

    debug!(case_id = %new_case.id, reporter_id = %new_case.reporter_id, "Case inserted");
    require_case(conn, &new_case.id)
}

fn active_case_for(conn: &Connection, reporter_id: &str) -> std::result::Result<Option<DistressCase>, StoreError> {
    let id: Option<String> = conn
        .query_row(
            &format!(
                "SELECT id FROM cases WHERE reporter_id = ?1 AND status IN ({}) LIMIT 1",
                live_sql()
            ),
            params![reporter_id],
            |row| row.get(0),
        )
        .optional()?;

    match id {
        Some(id) => load_case(conn, &id),
        None => Ok(None),
    }
}

fn append_response(
    conn: &mut Connection,
    case_id: &str,
    response: Response,
) -> std::result::Result<DistressCase, StoreError> {
    let tx = conn.transaction()?;

    let current: Option<(String, Option<String>)> = tx
        .query_row(
            "SELECT status, selected_responder_id FROM cases WHERE id = ?1",
            params![case_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (status, selected) = current.ok_or_else(case_not_found)?;
    if selected.is_some() {
        return Err(StoreError::Conflict(
            "This distress has already been assigned".to_string(),
        ));
    }
    let status = parse_status(&status)?;
    if !status.is_open() {
        return Err(StoreError::Conflict(format!(
            "Distress call is {} and no longer accepts responses",
            status
        )));
    }

    let responded_at = to_micros(response.responded_at);
    let inserted = tx
        .execute(
            &format!(
                "INSERT INTO responses (
                    case_id, responder_id, seq, mode, distance_km,
                    estimated_minutes, message, responded_at
                )
                SELECT ?1, ?2,
                    COALESCE((SELECT MAX(seq) FROM responses WHERE case_id = ?1), 0) + 1,
                    ?3, ?4, ?5, ?6, ?7
                WHERE EXISTS (
                    SELECT 1 FROM cases
                    WHERE id = ?1 AND selected_responder_id IS NULL AND status IN ({})
                )",
                open_sql()
            ),
            params![
                case_id,
                response.responder_id,
                response.mode.as_str(),
                response.distance_km,
                response.estimated_minutes,
                response.message,
                responded_at,
            ],
        )
        .map_err(|e| {
            let e = StoreError::from(e);
            if e.is_constraint_violation() {
                StoreError::Conflict("You have already responded to this distress".to_string())
            } else {
                e
            }
        })?;
    if inserted == 0 {
        return Err(StoreError::Conflict(
            "This distress has already been assigned".to_string(),
        ));
    }

    tx.execute(
        &format!(
            "UPDATE cases
             SET status = CASE WHEN status IN ({}) THEN ?2 ELSE status END,
                 updated_at = ?3
             WHERE id = ?1",
            sources_sql(CaseStatus::Responded)
        ),
        params![case_id, CaseStatus::Responded.as_str(), responded_at],
    )?;

    let case = require_case(&tx, case_id)?;
    tx.commit()?;

    debug!(case_id, responder_id = %response.responder_id, responses = case.responses.len(), "Response appended");
    Ok(case)
}

fn select_responder(
    conn: &mut Connection,
    case_id: &str,
    responder_id: &str,
    mode: ResponseMode,
    at: DateTime<Utc>,
) -> std::result::Result<DistressCase, StoreError> {
    let tx = conn.transaction()?;

    let changed = tx.execute(
        &format!(
            "UPDATE cases
             SET selected_responder_id = ?2, response_mode = ?3, status = ?4, updated_at = ?5
             WHERE id = ?1
               AND selected_responder_id IS NULL
               AND status IN ({})
               AND EXISTS (SELECT 1 FROM responses WHERE case_id = ?1 AND responder_id = ?2)",
            sources_sql(CaseStatus::InProgress)
        ),
        params![
            case_id,
            responder_id,
            mode.as_str(),
            CaseStatus::InProgress.as_str(),
            to_micros(at),
        ],
    )?;

    if changed == 0 {
        let case = require_case(&tx, case_id)?;
        if case.selected_responder_id.is_some() {
            return Err(StoreError::Conflict(
                "A responder has already been selected".to_string(),
            ));
        }
        if !case.has_response_from(responder_id) {
            return Err(StoreError::NotFound(
                "No response from this responder on the distress call".to_string(),
            ));
        }
        return Err(StoreError::Conflict(format!(
            "Distress call is {} and cannot be assigned",
            case.status
        )));
    }

    let case = require_case(&tx, case_id)?;
    tx.commit()?;
    Ok(case)
}

fn close_case(
    conn: &mut Connection,
    case_id: &str,
    to: CaseStatus,
    at: DateTime<Utc>,
) -> std::result::Result<DistressCase, StoreError> {
    let stamp_column = match to {
        CaseStatus::Resolved => "resolved_at",
        CaseStatus::Cancelled => "cancelled_at",
        other => {
            return Err(StoreError::Conflict(format!(
                "{} is not a closing status",
                other
            )))
        }
    };

    let tx = conn.transaction()?;
    let changed = tx.execute(
        &format!(
            "UPDATE cases SET status = ?2, {} = ?3, updated_at = ?3
             WHERE id = ?1 AND status IN ({})",
            stamp_column,
            sources_sql(to)
        ),
        params![case_id, to.as_str(), to_micros(at)],
    )?;

    let case = require_case(&tx, case_id)?;
    if changed == 0 {
        return Err(StoreError::Conflict(format!(
            "Cannot move distress call from {} to {}",
            case.status, to
        )));
    }
    tx.commit()?;
    Ok(case)
}

fn update_location(
    conn: &mut Connection,
    case_id: &str,
    party: Party,
    slot: LocationSlot,
) -> std::result::Result<DistressCase, StoreError> {
    // stamped under the connection lock so stamps follow commit order
    let updated_at = slot.updated_at.max(Utc::now());
    let (lon_col, lat_col, at_col) = match party {
        Party::Reporter => ("reporter_lon", "reporter_lat", "reporter_updated_at"),
        Party::Responder => ("responder_lon", "responder_lat", "responder_updated_at"),
    };

    let changed = conn.execute(
        &format!(
            "UPDATE cases SET {} = ?2, {} = ?3, {} = ?4 WHERE id = ?1 AND status IN ({})",
            lon_col,
            lat_col,
            at_col,
            live_sql()
        ),
        params![
            case_id,
            slot.coordinates.lon,
            slot.coordinates.lat,
            to_micros(updated_at),
        ],
    )?;

    let case = require_case(conn, case_id)?;
    if changed == 0 {
        return Err(StoreError::Conflict(format!(
            "Distress call is {}; location tracking has stopped",
            case.status
        )));
    }
    Ok(case)
}

/// Open, unselected cases within `radius_m` of `center`, optionally only
/// those created strictly after `since`. Unordered.
fn open_cases_within(
    conn: &Connection,
    center: GeoPoint,
    radius_m: f64,
    since: Option<DateTime<Utc>>,
) -> std::result::Result<Vec<NearbyCase>, StoreError> {
    let bbox = BoundingBox::around(&center, radius_m);
    let lon_clause = if bbox.wraps() {
        "(origin_lon >= ?3 OR origin_lon <= ?4)"
    } else {
        "origin_lon BETWEEN ?3 AND ?4"
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM cases
         WHERE status IN ({})
           AND selected_responder_id IS NULL
           AND origin_lat BETWEEN ?1 AND ?2
           AND {}
           AND created_at > ?5",
        CASE_COLUMNS,
        open_sql(),
        lon_clause
    ))?;
    let created_after = since.map_or(i64::MIN, to_micros);
    let rows = stmt
        .query_map(
            params![
                bbox.min_lat,
                bbox.max_lat,
                bbox.min_lon,
                bbox.max_lon,
                created_after
            ],
            CaseRow::from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut hits = Vec::new();
    for row in rows {
        let distance_m = geodesic_distance_m(&center, &row.origin());
        if distance_m > radius_m {
            continue;
        }
        let responses = load_responses(conn, &row.id)?;
        hits.push(NearbyCase {
            case: row.into_case(responses)?,
            distance_m,
        });
    }
    Ok(hits)
}

fn nearby_open_cases(
    conn: &Connection,
    center: GeoPoint,
    radius_m: f64,
    limit: usize,
) -> std::result::Result<Vec<NearbyCase>, StoreError> {
    let mut hits = open_cases_within(conn, center, radius_m, None)?;
    hits.sort_by(|a, b| {
        a.distance_m
            .total_cmp(&b.distance_m)
            .then_with(|| a.case.id.cmp(&b.case.id))
    });
    hits.truncate(limit);
    Ok(hits)
}

fn recent_open_cases(
    conn: &Connection,
    center: GeoPoint,
    radius_m: f64,
    since: Option<DateTime<Utc>>,
    limit: usize,
) -> std::result::Result<Vec<NearbyCase>, StoreError> {
    let mut hits = open_cases_within(conn, center, radius_m, since)?;
    hits.sort_by(|a, b| {
        b.case
            .created_at
            .cmp(&a.case.created_at)
            .then_with(|| a.case.id.cmp(&b.case.id))
    });
    hits.truncate(limit);
    Ok(hits)
}

/// Raw `responders` row
struct ResponderRow {
    user_id: String,
    display_name: Option<String>,
    available: bool,
    lon: Option<f64>,
    lat: Option<f64>,
    rating: f64,
    review_count: u32,
    updated_at: i64,
}

impl ResponderRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            display_name: row.get(1)?,
            available: row.get::<_, i64>(2)? != 0,
            lon: row.get(3)?,
            lat: row.get(4)?,
            rating: row.get(5)?,
            review_count: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_profile(self) -> std::result::Result<ResponderProfile, StoreError> {
        Ok(ResponderProfile {
            location: self.lon.zip(self.lat).map(|(lon, lat)| GeoPoint::new(lon, lat)),
            rating: self.rating as f32,
            updated_at: from_micros(self.updated_at)?,
            user_id: self.user_id,
            display_name: self.display_name,
            available: self.available,
            review_count: self.review_count,
        })
    }
}

fn load_responder(conn: &Connection, user_id: &str) -> std::result::Result<Option<ResponderProfile>, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM responders WHERE user_id = ?1", RESPONDER_COLUMNS),
        params![user_id],
        ResponderRow::from_row,
    )
    .optional()?
    .map(ResponderRow::into_profile)
    .transpose()
}

fn require_responder(conn: &Connection, user_id: &str) -> std::result::Result<ResponderProfile, StoreError> {
    load_responder(conn, user_id)?
        .ok_or_else(|| StoreError::NotFound("Responder profile not found".to_string()))
}

#[async_trait]
impl DistressStore for SqliteStore {
    async fn insert_case(&self, new_case: NewCase) -> Result<DistressCase> {
        self.call("insert_case", move |conn| insert_case(conn, new_case))
            .await
    }

    async fn get_case(&self, case_id: &str) -> Result<Option<DistressCase>> {
        let case_id = case_id.to_string();
        self.call("get_case", move |conn| load_case(conn, &case_id))
            .await
    }

    async fn active_case_for(&self, reporter_id: &str) -> Result<Option<DistressCase>> {
        let reporter_id = reporter_id.to_string();
        self.call("active_case_for", move |conn| {
            active_case_for(conn, &reporter_id)
        })
        .await
    }

    async fn append_response(&self, case_id: &str, response: Response) -> Result<DistressCase> {
        let case_id = case_id.to_string();
        self.call("append_response", move |conn| {
            append_response(conn, &case_id, response)
        })
        .await
    }

    async fn select_responder(
        &self,
        case_id: &str,
        responder_id: &str,
        mode: ResponseMode,
        at: DateTime<Utc>,
    ) -> Result<DistressCase> {
        let case_id = case_id.to_string();
        let responder_id = responder_id.to_string();
        self.call("select_responder", move |conn| {
            select_responder(conn, &case_id, &responder_id, mode, at)
        })
        .await
    }

    async fn close_case(
        &self,
        case_id: &str,
        to: CaseStatus,
        at: DateTime<Utc>,
    ) -> Result<DistressCase> {
        let case_id = case_id.to_string();
        self.call("close_case", move |conn| close_case(conn, &case_id, to, at))
            .await
    }

    async fn update_location(
        &self,
        case_id: &str,
        party: Party,
        slot: LocationSlot,
    ) -> Result<DistressCase> {
        let case_id = case_id.to_string();
        self.call("update_location", move |conn| {
            update_location(conn, &case_id, party, slot)
        })
        .await
    }

    async fn record_poll(&self, case_id: &str, at: DateTime<Utc>) -> Result<()> {
        let case_id = case_id.to_string();
        self.call("record_poll", move |conn| {
            let changed = conn.execute(
                "UPDATE cases SET last_polled_at = ?2 WHERE id = ?1",
                params![case_id, to_micros(at)],
            )?;
            if changed == 0 {
                return Err(case_not_found());
            }
            Ok(())
        })
        .await
    }

    async fn set_ai_analysis(
        &self,
        case_id: &str,
        analysis: AiAnalysis,
        at: DateTime<Utc>,
    ) -> Result<DistressCase> {
        let case_id = case_id.to_string();
        self.call("set_ai_analysis", move |conn| {
            let raw = serde_json::to_string(&analysis)?;
            let changed = conn.execute(
                "UPDATE cases SET ai_analysis = ?2, updated_at = ?3 WHERE id = ?1",
                params![case_id, raw, to_micros(at)],
            )?;
            if changed == 0 {
                return Err(case_not_found());
            }
            require_case(conn, &case_id)
        })
        .await
    }

    async fn nearby_open_cases(
        &self,
        center: GeoPoint,
        radius_m: f64,
        limit: usize,
    ) -> Result<Vec<NearbyCase>> {
        self.call("nearby_open_cases", move |conn| {
            nearby_open_cases(conn, center, radius_m, limit)
        })
        .await
    }

    async fn recent_open_cases(
        &self,
        center: GeoPoint,
        radius_m: f64,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<NearbyCase>> {
        self.call("recent_open_cases", move |conn| {
            recent_open_cases(conn, center, radius_m, since, limit)
        })
        .await
    }

    async fn upsert_responder(&self, profile: ResponderProfile) -> Result<ResponderProfile> {
        self.call("upsert_responder", move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO responders ({})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(user_id) DO UPDATE SET
                        display_name = excluded.display_name,
                        available = excluded.available,
                        lon = excluded.lon,
                        lat = excluded.lat,
                        rating = excluded.rating,
                        review_count = excluded.review_count,
                        updated_at = excluded.updated_at",
                    RESPONDER_COLUMNS
                ),
                params![
                    profile.user_id,
                    profile.display_name,
                    profile.available,
                    profile.location.map(|p| p.lon),
                    profile.location.map(|p| p.lat),
                    f64::from(profile.rating),
                    profile.review_count,
                    to_micros(profile.updated_at),
                ],
            )?;
            require_responder(conn, &profile.user_id)
        })
        .await
    }

    async fn get_responder(&self, user_id: &str) -> Result<Option<ResponderProfile>> {
        let user_id = user_id.to_string();
        self.call("get_responder", move |conn| load_responder(conn, &user_id))
            .await
    }

    async fn set_responder_location(
        &self,
        user_id: &str,
        location: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<ResponderProfile> {
        let user_id = user_id.to_string();
        self.call("set_responder_location", move |conn| {
            conn.execute(
                "UPDATE responders SET lon = ?2, lat = ?3, updated_at = ?4 WHERE user_id = ?1",
                params![user_id, location.lon, location.lat, to_micros(at)],
            )?;
            require_responder(conn, &user_id)
        })
        .await
    }

    async fn set_responder_availability(
        &self,
        user_id: &str,
        available: bool,
        at: DateTime<Utc>,
    ) -> Result<ResponderProfile> {
        let user_id = user_id.to_string();
        self.call("set_responder_availability", move |conn| {
            conn.execute(
                "UPDATE responders SET available = ?2, updated_at = ?3 WHERE user_id = ?1",
                params![user_id, available, to_micros(at)],
            )?;
            require_responder(conn, &user_id)
        })
        .await
    }

    async fn located_responders(&self) -> Result<Vec<ResponderProfile>> {
        self.call("located_responders", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM responders
                 WHERE lon IS NOT NULL AND lat IS NOT NULL
                 ORDER BY user_id",
                RESPONDER_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], ResponderRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(ResponderRow::into_profile).collect()
        })
        .await
    }
}
