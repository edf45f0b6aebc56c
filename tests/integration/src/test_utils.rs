//! Shared fixtures for the scenario tests

use std::sync::{Arc, Once};
use std::time::Duration;

use chrono::Utc;
use vetline_core::{CaseOrigin, Caller, GeoPoint, ResponderProfile};
use vetline_dispatch::{
    DispatchEngine, DispatchSettings, DistanceEstimator, LocationRelay, NewCaseRequest,
};
use vetline_notify::{HubEvent, NotificationHub, Subscription};
use vetline_store::{DistressStore, SqliteStore};

/// Scene of the reference scenario, in Bangalore
pub const SCENE: GeoPoint = GeoPoint::new(77.59, 12.97);

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness once per process
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("warn")
            .try_init();
    });
}

/// A complete dispatch core over an in-memory store
pub struct Harness {
    pub store: Arc<dyn DistressStore>,
    pub hub: Arc<NotificationHub>,
    pub engine: Arc<DispatchEngine>,
    pub relay: Arc<LocationRelay>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let store: Arc<dyn DistressStore> = Arc::new(
            SqliteStore::open_in_memory(Duration::from_secs(5)).expect("in-memory store"),
        );
        let hub = Arc::new(NotificationHub::new(64));
        let settings = DispatchSettings::default();
        let relay = Arc::new(LocationRelay::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            &settings,
        ));
        let engine = Arc::new(DispatchEngine::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            DistanceEstimator::haversine_only(2.0),
            settings,
        ));
        Self {
            store,
            hub,
            engine,
            relay,
        }
    }

    /// Register an available responder based at `point`.
    pub async fn register_vet(&self, id: &str, point: GeoPoint) {
        let mut profile = ResponderProfile::new(id, Utc::now());
        profile.location = Some(point);
        profile.available = true;
        self.engine
            .register_responder(profile)
            .await
            .expect("register responder");
    }

    /// Open a case for `reporter` at `point` and return its id.
    pub async fn report(&self, reporter: &str, point: GeoPoint) -> String {
        self.engine
            .create_case(&Caller::reporter(reporter), distress_request(point))
            .await
            .expect("create case")
            .case_id
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn distress_request(point: GeoPoint) -> NewCaseRequest {
    NewCaseRequest {
        description: "Dog hit by car, bleeding from the hind leg".to_string(),
        image_url: None,
        location: Some(CaseOrigin {
            coordinates: point,
            address: Some("MG Road".to_string()),
        }),
    }
}

/// Wait for the first event on `sub` matching `wanted`, skipping others.
pub async fn expect_event<F>(sub: &mut Subscription, wanted: F) -> HubEvent
where
    F: Fn(&HubEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match sub.receiver.recv().await {
                Some(event) if wanted(&event) => return event,
                Some(_) => continue,
                None => panic!("subscription closed for {}", sub.user_id),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no matching event for {}", sub.user_id))
}
