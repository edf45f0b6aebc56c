//! Full distress lifecycles through the engine, store and hub

use vetline_core::{CaseOrigin, CaseStatus, Caller, Error, GeoPoint, ResponseMode};
use vetline_dispatch::NewCaseRequest;
use vetline_notify::HubEvent;

use crate::test_utils::{expect_event, Harness, SCENE};

#[tokio::test]
async fn dog_hit_by_car_two_responders() {
    let h = Harness::new();
    // both within 10 km of the scene
    h.register_vet("vet-indiranagar", GeoPoint::new(77.64, 12.97)).await;
    h.register_vet("vet-jayanagar", GeoPoint::new(77.58, 12.93)).await;
    // well outside the search radius
    h.register_vet("vet-mysore", GeoPoint::new(76.64, 12.30)).await;

    let mut reporter_sub = h.hub.connect(&Caller::reporter("owner"));
    let mut first_sub = h.hub.connect(&Caller::responder("vet-indiranagar"));
    let mut second_sub = h.hub.connect(&Caller::responder("vet-jayanagar"));
    let mut far_sub = h.hub.connect(&Caller::responder("vet-mysore"));

    let created = h
        .engine
        .create_case(
            &Caller::reporter("owner"),
            NewCaseRequest {
                description: "Dog hit by car".to_string(),
                image_url: None,
                location: Some(CaseOrigin {
                    coordinates: SCENE,
                    address: None,
                }),
            },
        )
        .await
        .unwrap();
    assert_eq!(created.status, CaseStatus::Pending);
    assert_eq!(created.candidate_count, 2);
    let case_id = created.case_id;

    for sub in [&mut first_sub, &mut second_sub] {
        let event = expect_event(sub, |e| matches!(e, HubEvent::NewDistress { .. })).await;
        assert!(matches!(event, HubEvent::NewDistress { ref distress_id, .. } if *distress_id == case_id));
    }
    tokio::task::yield_now().await;
    assert!(far_sub.receiver.try_recv().is_err());

    h.engine
        .submit_response(
            &Caller::responder("vet-indiranagar"),
            &case_id,
            ResponseMode::ResponderComing,
            Some("Leaving the clinic now".to_string()),
        )
        .await
        .unwrap();
    let case = h
        .engine
        .submit_response(
            &Caller::responder("vet-jayanagar"),
            &case_id,
            ResponseMode::ReporterGoing,
            None,
        )
        .await
        .unwrap();
    assert_eq!(case.status, CaseStatus::Responded);
    assert_eq!(case.responses.len(), 2);
    assert!(case.responses.iter().all(|r| r.estimated_minutes.is_some()));

    let mut offers = Vec::new();
    for _ in 0..2 {
        match expect_event(&mut reporter_sub, |e| matches!(e, HubEvent::VetResponse { .. })).await {
            HubEvent::VetResponse { responder_id, .. } => offers.push(responder_id),
            _ => unreachable!(),
        }
    }
    offers.sort();
    assert_eq!(offers, vec!["vet-indiranagar", "vet-jayanagar"]);

    let case = h
        .engine
        .select_responder(&Caller::reporter("owner"), &case_id, "vet-indiranagar", None)
        .await
        .unwrap();
    assert_eq!(case.status, CaseStatus::InProgress);
    assert_eq!(case.selected_responder_id.as_deref(), Some("vet-indiranagar"));
    assert_eq!(case.response_mode, Some(ResponseMode::ResponderComing));

    expect_event(&mut first_sub, |e| matches!(e, HubEvent::ResponseAccepted { .. })).await;
    let declined = expect_event(&mut second_sub, |e| matches!(e, HubEvent::ResponseDeclined { .. })).await;
    assert!(matches!(declined, HubEvent::ResponseDeclined { ref distress_id, .. } if *distress_id == case_id));

    let err = h
        .engine
        .select_responder(&Caller::reporter("owner"), &case_id, "vet-jayanagar", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let resolved = h
        .engine
        .resolve_case(&Caller::responder("vet-indiranagar"), &case_id)
        .await
        .unwrap();
    assert_eq!(resolved.status, CaseStatus::Resolved);
    assert!(h
        .engine
        .active_case(&Caller::reporter("owner"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn room_members_follow_the_case() {
    let h = Harness::new();
    h.register_vet("vet-a", GeoPoint::new(77.60, 12.97)).await;
    let case_id = h.report("owner", SCENE).await;

    let mut watcher = h.hub.connect(&Caller::reporter("owner"));
    assert!(h.hub.join_room("owner", &case_id));

    h.engine
        .submit_response(&Caller::responder("vet-a"), &case_id, ResponseMode::ResponderComing, None)
        .await
        .unwrap();
    let update = expect_event(&mut watcher, |e| matches!(e, HubEvent::DistressUpdated { .. })).await;
    match update {
        HubEvent::DistressUpdated {
            status,
            response_count,
            ..
        } => {
            assert_eq!(status, CaseStatus::Responded);
            assert_eq!(response_count, 1);
        }
        _ => unreachable!(),
    }

    h.engine
        .cancel_case(&Caller::reporter("owner"), &case_id)
        .await
        .unwrap();
    expect_event(&mut watcher, |e| matches!(e, HubEvent::DistressCancelled { .. })).await;
}

#[tokio::test]
async fn closed_cases_reject_further_work() {
    let h = Harness::new();
    h.register_vet("vet-a", GeoPoint::new(77.60, 12.97)).await;
    let case_id = h.report("owner", SCENE).await;
    let owner = Caller::reporter("owner");

    h.engine.cancel_case(&owner, &case_id).await.unwrap();

    let err = h
        .engine
        .submit_response(&Caller::responder("vet-a"), &case_id, ResponseMode::ResponderComing, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    assert!(matches!(
        h.engine.resolve_case(&owner, &case_id).await,
        Err(Error::Conflict(_))
    ));
    assert!(matches!(
        h.engine.cancel_case(&owner, &case_id).await,
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        h.relay.update_location(&owner, &case_id, SCENE).await,
        Err(Error::Conflict(_))
    ));
}
