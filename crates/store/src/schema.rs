//! SQLite schema and the status predicates derived from the case state machine.

use rusqlite::Connection;
use vetline_core::CaseStatus;

use crate::StoreError;

pub(crate) fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS cases (
            id TEXT PRIMARY KEY,
            reporter_id TEXT NOT NULL,
            description TEXT NOT NULL,
            image_url TEXT,
            origin_lon REAL NOT NULL,
            origin_lat REAL NOT NULL,
            origin_address TEXT,
            status TEXT NOT NULL,
            selected_responder_id TEXT,
            response_mode TEXT,
            reporter_lon REAL,
            reporter_lat REAL,
            reporter_updated_at INTEGER,
            responder_lon REAL,
            responder_lat REAL,
            responder_updated_at INTEGER,
            ai_analysis TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            resolved_at INTEGER,
            cancelled_at INTEGER,
            last_polled_at INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_cases_reporter ON cases(reporter_id);
        CREATE INDEX IF NOT EXISTS idx_cases_status ON cases(status);
        CREATE INDEX IF NOT EXISTS idx_cases_created_at ON cases(created_at);
        CREATE INDEX IF NOT EXISTS idx_cases_origin ON cases(origin_lat, origin_lon);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_cases_one_active
            ON cases(reporter_id)
            WHERE status IN ('pending', 'responded', 'in_progress');

        CREATE TABLE IF NOT EXISTS responses (
            case_id TEXT NOT NULL REFERENCES cases(id),
            responder_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            mode TEXT NOT NULL,
            distance_km REAL,
            estimated_minutes INTEGER,
            message TEXT,
            responded_at INTEGER NOT NULL,
            PRIMARY KEY (case_id, responder_id)
        );

        CREATE INDEX IF NOT EXISTS idx_responses_seq ON responses(case_id, seq);

        CREATE TABLE IF NOT EXISTS responders (
            user_id TEXT PRIMARY KEY,
            display_name TEXT,
            available INTEGER NOT NULL DEFAULT 0,
            lon REAL,
            lat REAL,
            rating REAL NOT NULL DEFAULT 0,
            review_count INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_responders_available ON responders(available);
        CREATE INDEX IF NOT EXISTS idx_responders_location ON responders(lat, lon);
        "#,
    )?;
    Ok(())
}

/// SQL list literal for a set of statuses, e.g. `'pending', 'responded'`
pub(crate) fn status_list(statuses: &[CaseStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Statuses from which `target` may be entered
pub(crate) fn sources_sql(target: CaseStatus) -> String {
    status_list(&CaseStatus::sources_of(target))
}

/// Statuses that still accept responses
pub(crate) fn open_sql() -> String {
    let open: Vec<CaseStatus> = CaseStatus::ALL
        .into_iter()
        .filter(|s| s.is_open())
        .collect();
    status_list(&open)
}

/// Statuses that are still being tracked
pub(crate) fn live_sql() -> String {
    status_list(&CaseStatus::ACTIVE)
}
