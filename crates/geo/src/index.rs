//! GeoIndex: in-memory grid of point entries for radius search.
//!
//! # Thread Safety
//!
//! - Grid-level access goes through an `RwLock<Arc<_>>`; only `populate`
//!   takes the write side, to swap in a freshly built grid.
//! - Cell and entry maps are `DashMap`s (concurrent reads, per-shard write locks).
//! - Moving an entry between cells happens while its entry shard is locked,
//!   so concurrent upserts of the same id serialize.
//!
//! Readers see either the old or the new grid after a `populate`, never a mix.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use tracing::debug;
use vetline_core::{geodesic_distance_m, GeoPoint};

use crate::{BoundingBox, GridCell};

/// A point with its payload.
#[derive(Debug, Clone)]
struct IndexedEntry<T> {
    point: GeoPoint,
    cell: GridCell,
    payload: T,
}

struct Grid<T> {
    cells: DashMap<GridCell, HashSet<String>>,
    entries: DashMap<String, IndexedEntry<T>>,
}

impl<T> Grid<T> {
    fn empty() -> Self {
        Self {
            cells: DashMap::new(),
            entries: DashMap::new(),
        }
    }

    fn link(&self, cell: GridCell, id: &str) {
        self.cells.entry(cell).or_default().insert(id.to_string());
    }

    fn unlink(&self, cell: GridCell, id: &str) {
        if let MapEntry::Occupied(mut occupied) = self.cells.entry(cell) {
            occupied.get_mut().remove(id);
            if occupied.get().is_empty() {
                occupied.remove();
            }
        }
    }
}

/// Search hit returned by [`GeoIndex::find_nearby`].
#[derive(Debug, Clone, PartialEq)]
pub struct Nearby<T> {
    pub id: String,
    pub point: GeoPoint,
    /// Geodesic distance from the query point, in meters
    pub distance_m: f64,
    pub payload: T,
}

/// Grid-indexed point store keyed by id.
pub struct GeoIndex<T> {
    grid: RwLock<Arc<Grid<T>>>,
    cell_deg: f64,
}

impl<T: Clone + Send + Sync + 'static> GeoIndex<T> {
    /// Create an empty index with cells of `cell_deg` degrees on each side.
    pub fn new(cell_deg: f64) -> Self {
        Self {
            grid: RwLock::new(Arc::new(Grid::empty())),
            cell_deg,
        }
    }

    fn current(&self) -> Arc<Grid<T>> {
        Arc::clone(&self.grid.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn cell_deg(&self) -> f64 {
        self.cell_deg
    }

    /// Insert or move an entry.
    pub fn upsert(&self, id: &str, point: GeoPoint, payload: T) {
        let grid = self.grid.read().unwrap_or_else(PoisonError::into_inner);
        let cell = GridCell::containing(&point, self.cell_deg);

        match grid.entries.entry(id.to_string()) {
            MapEntry::Occupied(mut occupied) => {
                let previous = occupied.get().cell;
                if previous != cell {
                    grid.unlink(previous, id);
                    grid.link(cell, id);
                }
                occupied.insert(IndexedEntry {
                    point,
                    cell,
                    payload,
                });
            }
            MapEntry::Vacant(vacant) => {
                grid.link(cell, id);
                vacant.insert(IndexedEntry {
                    point,
                    cell,
                    payload,
                });
            }
        };
    }

    /// Remove an entry, returning its payload.
    pub fn remove(&self, id: &str) -> Option<T> {
        let grid = self.grid.read().unwrap_or_else(PoisonError::into_inner);
        let removed = match grid.entries.entry(id.to_string()) {
            MapEntry::Occupied(occupied) => {
                grid.unlink(occupied.get().cell, id);
                Some(occupied.remove().payload)
            }
            MapEntry::Vacant(_) => None,
        };
        removed
    }

    pub fn get(&self, id: &str) -> Option<(GeoPoint, T)> {
        self.current()
            .entries
            .get(id)
            .map(|entry| (entry.point, entry.payload.clone()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.current().entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.current().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomic bulk population, replacing every entry.
    ///
    /// The new grid is built outside the lock and swapped in with a brief
    /// write lock. Upserts racing with the swap may land in the old grid.
    pub fn populate(&self, entries: impl IntoIterator<Item = (String, GeoPoint, T)>) {
        let fresh = Grid::empty();
        for (id, point, payload) in entries {
            let cell = GridCell::containing(&point, self.cell_deg);
            if let Some(old) = fresh.entries.insert(
                id.clone(),
                IndexedEntry {
                    point,
                    cell,
                    payload,
                },
            ) {
                fresh.unlink(old.cell, &id);
            }
            fresh.link(cell, &id);
        }
        let count = fresh.entries.len();

        let mut grid = self.grid.write().unwrap_or_else(PoisonError::into_inner);
        *grid = Arc::new(fresh);
        debug!(entries = count, "Populated geo index");
    }

    /// Entries matching `filter` within `radius_m` geodesic meters of `center`,
    /// nearest first (ties broken by id), truncated to `limit`.
    pub fn find_nearby<F>(
        &self,
        center: &GeoPoint,
        radius_m: f64,
        limit: usize,
        filter: F,
    ) -> Vec<Nearby<T>>
    where
        F: Fn(&T) -> bool,
    {
        if limit == 0 || radius_m.is_nan() || radius_m < 0.0 {
            return Vec::new();
        }

        let grid = self.current();
        let bbox = BoundingBox::around(center, radius_m);

        // Wide windows over sparse grids are cheaper to scan directly.
        let candidate_ids: HashSet<String> =
            if GridCell::count_covering(&bbox, self.cell_deg) > grid.entries.len() {
                grid.entries.iter().map(|entry| entry.key().clone()).collect()
            } else {
                let mut ids = HashSet::new();
                for cell in GridCell::covering(&bbox, self.cell_deg) {
                    if let Some(members) = grid.cells.get(&cell) {
                        ids.extend(members.iter().cloned());
                    }
                }
                ids
            };

        let mut hits: Vec<Nearby<T>> = candidate_ids
            .into_iter()
            .filter_map(|id| {
                let entry = grid.entries.get(&id)?;
                if !bbox.contains(&entry.point) || !filter(&entry.payload) {
                    return None;
                }
                let distance_m = geodesic_distance_m(center, &entry.point);
                (distance_m <= radius_m).then(|| Nearby {
                    point: entry.point,
                    distance_m,
                    payload: entry.payload.clone(),
                    id,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance_m
                .total_cmp(&b.distance_m)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        hits
    }
}

impl<T: Clone + Send + Sync + 'static> Default for GeoIndex<T> {
    fn default() -> Self {
        Self::new(0.5)
    }
}
