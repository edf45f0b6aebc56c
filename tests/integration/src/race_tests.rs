//! Races that must be settled by the store, not by read-then-write checks

use std::sync::Arc;

use proptest::prelude::*;
use tokio::sync::Barrier;
use vetline_core::{CaseStatus, Caller, Error, GeoPoint, ResponseMode};

use crate::test_utils::{distress_request, Harness, SCENE};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_selection_has_one_winner() {
    for round in 0..10 {
        let h = Harness::new();
        h.register_vet("vet-a", GeoPoint::new(77.60, 12.97)).await;
        h.register_vet("vet-b", GeoPoint::new(77.58, 12.97)).await;
        let reporter = format!("owner-{}", round);
        let case_id = h.report(&reporter, SCENE).await;
        for vet in ["vet-a", "vet-b"] {
            h.engine
                .submit_response(&Caller::responder(vet), &case_id, ResponseMode::ResponderComing, None)
                .await
                .unwrap();
        }

        let barrier = Arc::new(Barrier::new(2));
        let mut handles = Vec::new();
        for vet in ["vet-a", "vet-b"] {
            let engine = Arc::clone(&h.engine);
            let barrier = Arc::clone(&barrier);
            let case_id = case_id.clone();
            let reporter = Caller::reporter(reporter.clone());
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                engine.select_responder(&reporter, &case_id, vet, None).await
            }));
        }

        let mut winners = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(Error::Conflict(_)) => conflicts += 1,
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }
        assert_eq!((winners, conflicts), (1, 1), "round {}", round);

        let case = h.store.get_case(&case_id).await.unwrap().unwrap();
        assert_eq!(case.status, CaseStatus::InProgress);
        assert!(case.selected_responder_id.is_some());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_response_keeps_one_entry() {
    let h = Harness::new();
    h.register_vet("vet-a", GeoPoint::new(77.60, 12.97)).await;
    let case_id = h.report("owner", SCENE).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = Arc::clone(&h.engine);
        let case_id = case_id.clone();
        handles.push(tokio::spawn(async move {
            engine
                .submit_response(&Caller::responder("vet-a"), &case_id, ResponseMode::ResponderComing, None)
                .await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(Error::Conflict(_)) => {}
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }
    assert_eq!(accepted, 1);

    let case = h.store.get_case(&case_id).await.unwrap().unwrap();
    assert_eq!(case.responses.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_leave_one_active_case() {
    let h = Harness::new();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let engine = Arc::clone(&h.engine);
        handles.push(tokio::spawn(async move {
            engine
                .create_case(&Caller::reporter("owner"), distress_request(SCENE))
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(Error::Conflict(_)) => {}
            Err(other) => panic!("unexpected error {:?}", other),
        }
    }
    assert_eq!(created, 1);
    assert!(h
        .engine
        .active_case(&Caller::reporter("owner"))
        .await
        .unwrap()
        .is_some());
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Respond,
    Select,
    Resolve,
    Cancel,
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Respond),
        Just(Action::Select),
        Just(Action::Resolve),
        Just(Action::Cancel),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Any sequence of operations only ever moves along allowed transitions.
    #[test]
    fn lifecycle_follows_transition_table(actions in proptest::collection::vec(action(), 1..8)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let h = Harness::new();
            h.register_vet("vet-a", GeoPoint::new(77.60, 12.97)).await;
            let owner = Caller::reporter("owner");
            let vet = Caller::responder("vet-a");
            let case_id = h.report("owner", SCENE).await;
            let mut status = CaseStatus::Pending;

            for action in actions {
                let result = match action {
                    Action::Respond => h
                        .engine
                        .submit_response(&vet, &case_id, ResponseMode::ReporterGoing, None)
                        .await,
                    Action::Select => h.engine.select_responder(&owner, &case_id, "vet-a", None).await,
                    Action::Resolve => h.engine.resolve_case(&owner, &case_id).await,
                    Action::Cancel => h.engine.cancel_case(&owner, &case_id).await,
                };
                if let Ok(case) = result {
                    assert!(
                        status.can_transition_to(case.status) || status == case.status,
                        "{:?} -> {:?} via {:?}",
                        status,
                        case.status,
                        action
                    );
                    status = case.status;
                }
                if status.is_terminal() {
                    let again = h.engine.cancel_case(&owner, &case_id).await;
                    assert!(again.is_err());
                }
            }
        });
    }
}
