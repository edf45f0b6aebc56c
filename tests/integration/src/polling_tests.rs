//! Push and poll delivery of live locations over the same durable state

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use vetline_core::{Caller, GeoPoint, Party, ResponseMode};
use vetline_notify::HubEvent;

use crate::test_utils::{expect_event, Harness, SCENE};

async fn assigned(h: &Harness) -> String {
    h.register_vet("vet-a", GeoPoint::new(77.60, 12.97)).await;
    let case_id = h.report("owner", SCENE).await;
    h.engine
        .submit_response(&Caller::responder("vet-a"), &case_id, ResponseMode::ResponderComing, None)
        .await
        .unwrap();
    h.engine
        .select_responder(&Caller::reporter("owner"), &case_id, "vet-a", None)
        .await
        .unwrap();
    case_id
}

#[tokio::test]
async fn poll_reports_changes_after_since() {
    let h = Harness::new();
    let case_id = assigned(&h).await;
    let owner = Caller::reporter("owner");

    let baseline = h.relay.poll_updates(&owner, &case_id, None).await.unwrap();
    assert!(baseline.has_updates);
    let t = baseline.server_time;

    let idle = h.relay.poll_updates(&owner, &case_id, Some(t)).await.unwrap();
    assert!(!idle.has_updates, "nothing changed after {}", t);

    tokio::time::sleep(Duration::from_millis(5)).await;
    h.relay
        .update_location(&Caller::responder("vet-a"), &case_id, GeoPoint::new(77.595, 12.97))
        .await
        .unwrap();

    let moved = h.relay.poll_updates(&owner, &case_id, Some(t)).await.unwrap();
    assert!(moved.has_updates);
    let slot = moved.responder_location.unwrap();
    assert_eq!(slot.coordinates, GeoPoint::new(77.595, 12.97));
    assert!(slot.updated_at > t);

    // polling itself is not a change
    let again = h
        .relay
        .poll_updates(&owner, &case_id, Some(moved.server_time))
        .await
        .unwrap();
    assert!(!again.has_updates);
}

#[tokio::test]
async fn push_reaches_connected_counterpart_and_poll_sees_same_state() {
    let h = Harness::new();
    let case_id = assigned(&h).await;
    let mut vet_sub = h.hub.connect(&Caller::responder("vet-a"));

    let point = GeoPoint::new(77.591, 12.972);
    h.relay
        .update_location(&Caller::reporter("owner"), &case_id, point)
        .await
        .unwrap();

    let pushed = expect_event(&mut vet_sub, |e| matches!(e, HubEvent::LocationUpdated { .. })).await;
    let (party, pushed_at) = match pushed {
        HubEvent::LocationUpdated {
            party,
            coordinates,
            updated_at,
            ..
        } => {
            assert_eq!(coordinates, point);
            (party, updated_at)
        }
        _ => unreachable!(),
    };
    assert_eq!(party, Party::Reporter);

    let polled = h
        .relay
        .poll_updates(&Caller::responder("vet-a"), &case_id, None)
        .await
        .unwrap();
    let slot = polled.reporter_location.unwrap();
    assert_eq!(slot.coordinates, point);
    // both paths carry the same stored timestamp, up to storage precision
    assert!((slot.updated_at - pushed_at).num_milliseconds().abs() < 1);
}

#[tokio::test]
async fn offline_counterpart_still_gets_the_update_by_polling() {
    let h = Harness::new();
    let case_id = assigned(&h).await;

    h.relay
        .update_location(&Caller::responder("vet-a"), &case_id, GeoPoint::new(77.6, 12.971))
        .await
        .unwrap();

    let polled = h
        .relay
        .poll_updates(&Caller::reporter("owner"), &case_id, None)
        .await
        .unwrap();
    assert_eq!(
        polled.responder_location.unwrap().coordinates,
        GeoPoint::new(77.6, 12.971)
    );
}

#[tokio::test]
async fn nearby_poll_lists_new_open_cases() {
    let h = Harness::new();
    h.register_vet("vet-a", GeoPoint::new(77.60, 12.97)).await;
    let vet = Caller::responder("vet-a");

    let first = h.relay.poll_nearby(&vet, None).await.unwrap();
    assert!(!first.has_updates);

    let case_id = h.report("owner", SCENE).await;
    let second = h.relay.poll_nearby(&vet, Some(first.server_time)).await.unwrap();
    assert!(second.has_updates);
    assert_eq!(second.cases[0].case.id, case_id);
    assert!(second.cases[0].distance_km > 0.0);

    let third = h.relay.poll_nearby(&vet, Some(second.server_time)).await.unwrap();
    assert!(!third.has_updates);
}

#[tokio::test]
async fn nearby_poll_finds_new_case_behind_a_crowd_of_older_ones() {
    let h = Harness::new();
    h.register_vet("vet-a", SCENE).await;
    let vet = Caller::responder("vet-a");

    // more open cases right next to the vet than one poll returns
    for i in 0..20 {
        let offset = 0.0001 * (i % 5) as f64;
        h.report(&format!("owner-{}", i), GeoPoint::new(77.59 + offset, 12.97))
            .await;
    }
    let cutoff = Utc::now();
    tokio::time::sleep(Duration::from_millis(5)).await;

    // about 29 km north, inside the default 50 km radius
    let fresh = h.report("late-owner", GeoPoint::new(77.59, 13.23)).await;

    let poll = h.relay.poll_nearby(&vet, Some(cutoff)).await.unwrap();
    assert!(poll.has_updates);
    let ids: Vec<&str> = poll.cases.iter().map(|c| c.case.id.as_str()).collect();
    assert_eq!(ids, vec![fresh.as_str()]);

    let everything = h.relay.poll_nearby(&vet, None).await.unwrap();
    assert_eq!(everything.cases.len(), 20);
    assert_eq!(everything.cases[0].case.id, fresh);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_write_is_never_lost_between_polls() {
    let h = Harness::new();
    let case_id = assigned(&h).await;
    let owner = Caller::reporter("owner");

    for round in 0..25 {
        let point = GeoPoint::new(77.59 + 0.0001 * f64::from(round), 12.97);
        let relay = Arc::clone(&h.relay);
        let write_case = case_id.clone();
        let writer = tokio::spawn(async move {
            relay
                .update_location(&Caller::responder("vet-a"), &write_case, point)
                .await
        });
        let snapshot = h.relay.poll_updates(&owner, &case_id, None).await.unwrap();
        writer.await.unwrap().unwrap();

        let seen = snapshot
            .responder_location
            .as_ref()
            .map(|slot| slot.coordinates);
        if seen != Some(point) {
            let next = h
                .relay
                .poll_updates(&owner, &case_id, Some(snapshot.server_time))
                .await
                .unwrap();
            assert!(next.has_updates, "round {} lost the write", round);
            assert_eq!(next.responder_location.unwrap().coordinates, point);
        }
    }
}
