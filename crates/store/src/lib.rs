//! Durable storage for distress cases and responder profiles.
//!
//! [`DistressStore`] is the contract; [`SqliteStore`] implements it on
//! SQLite in WAL mode with the race guards (single active case, unique
//! responses, compare-and-set selection) enforced by the database.

pub mod error;
mod schema;
pub mod sqlite;
pub mod store;

pub use error::StoreError;
pub use sqlite::SqliteStore;
pub use store::{DistressStore, NearbyCase, NewCase};
