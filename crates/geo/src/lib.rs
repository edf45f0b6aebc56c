//! Geospatial candidate discovery for Vetline.
//!
//! [`GeoIndex`] keeps responder positions in a fixed-size lat/lon grid and
//! answers radius queries nearest-first using the WGS-84 geodesic distance.
//! [`BoundingBox`] is the conservative window both the index and the
//! store's SQL prefilter use before refining with the exact distance.

pub mod bbox;
pub mod cell;
pub mod index;

pub use bbox::BoundingBox;
pub use cell::GridCell;
pub use index::{GeoIndex, Nearby};
