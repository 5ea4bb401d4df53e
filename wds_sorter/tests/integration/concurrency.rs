//! Integration test: many parcels at once, racing assignments, shutdown.

use super::*;
use std::thread;
use wds_common::types::{DiverterDirection, SensorTriggerEvent};
use wds_sorter::ManualClock;
use wds_sorter::plan::{AssignmentOutcome, ExceptionReason};
use wds_sorter::upstream::ChuteAssignment;

const CHUTES: [u32; 4] = [1, 2, 3, 4];

#[tokio::test(start_paused = true)]
async fn hundred_parcels_reach_their_chutes() {
    let h = Harness::new();
    let flows: Vec<_> = (1..=100).map(|parcel_id| (parcel_id, h.detect(parcel_id))).collect();
    settle().await;
    assert_eq!(h.service.stats().in_flight, 100);

    for (parcel_id, _) in &flows {
        let chute_id = CHUTES[(*parcel_id as usize) % CHUTES.len()];
        assert_eq!(
            h.service.handle_assignment(ChuteAssignment {
                parcel_id: *parcel_id,
                chute_id,
            }),
            Some(AssignmentOutcome::Accepted)
        );
    }

    for (parcel_id, flow) in flows {
        let result = flow.await.unwrap();
        assert!(result.is_success, "parcel {parcel_id}: {result:?}");
        assert_eq!(result.actual_chute_id, CHUTES[(parcel_id as usize) % CHUTES.len()]);
    }

    let stats = h.service.stats();
    assert_eq!(stats.detected, 100);
    assert_eq!(stats.sorted_to_target, 100);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.invariant_violations, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn assignments_racing_the_deadline_resolve_once() {
    let config = EngineConfig {
        assignment_timeout_ms: 40,
        ..engine_config()
    };
    let h = Harness::with(config, LoopbackUpstream::new(), Arc::new(TokioClock::new()));

    let mut tasks = Vec::new();
    for parcel_id in 1..=64u64 {
        let service = Arc::clone(&h.service);
        tasks.push(tokio::spawn(async move {
            let flow = {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.process_parcel(parcel_id, DETECTION_SENSOR).await })
            };
            // Spread assignments across the deadline.
            tokio::time::sleep(Duration::from_millis(25 + parcel_id % 30)).await;
            let chute_id = CHUTES[(parcel_id as usize) % CHUTES.len()];
            let outcome = service.handle_assignment(ChuteAssignment {
                parcel_id,
                chute_id,
            });
            (parcel_id, chute_id, outcome, flow.await.unwrap())
        }));
    }

    for task in tasks {
        let (parcel_id, chute_id, outcome, result) = task.await.unwrap();
        let plan = h.service.route_plan(parcel_id).unwrap();
        match outcome {
            Some(AssignmentOutcome::Accepted) => {
                assert_eq!(result.actual_chute_id, chute_id);
                assert_eq!(plan.effective_chute_id, Some(chute_id));
            }
            Some(_) => {
                assert_eq!(result.actual_chute_id, EXCEPTION_CHUTE);
                assert_eq!(plan.effective_chute_id, Some(EXCEPTION_CHUTE));
                assert_eq!(plan.exception_reason, Some(ExceptionReason::DeadlineExpired));
            }
            None => panic!("parcel {parcel_id}: plan missing"),
        }
        assert_eq!(plan.current_target_chute_id, chute_id);
    }
    assert_eq!(h.service.stats().invariant_violations, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn assignment_racing_passage_never_claims_an_unused_turn() {
    let h = Harness::new();

    for parcel_id in 1..=32u64 {
        let flow = h.detect(parcel_id);
        let queued_at_first = |h: &Harness| {
            h.service.queue_snapshot()[0]
                .tasks
                .iter()
                .any(|t| t.parcel_id == parcel_id)
        };
        let detected_at = loop {
            match h.service.route_plan(parcel_id) {
                Some(plan) if queued_at_first(&h) => break plan.created_at,
                _ => tokio::task::yield_now().await,
            }
        };

        // Chute 1 turns left at position 1; the provisional route goes straight.
        let assign = {
            let service = Arc::clone(&h.service);
            tokio::spawn(async move {
                service.handle_assignment(ChuteAssignment {
                    parcel_id,
                    chute_id: 1,
                })
            })
        };
        let pass = {
            let service = Arc::clone(&h.service);
            tokio::spawn(async move {
                service.handle_sensor_event(SensorTriggerEvent {
                    parcel_id,
                    sensor_id: 101,
                    timestamp: detected_at + 4615,
                })
            })
        };

        assert_eq!(assign.await.unwrap(), Some(AssignmentOutcome::Accepted));
        let report = pass.await.unwrap().unwrap();
        let matched = *report.outcome.task().unwrap();
        let result = flow.await.unwrap();

        if result.is_success && result.actual_chute_id == 1 {
            assert_eq!(
                matched.target_direction,
                DiverterDirection::Left,
                "parcel {parcel_id} passed straight but was reported at chute 1"
            );
        } else {
            assert_eq!(result.actual_chute_id, EXCEPTION_CHUTE);
            assert!(result.failure_reason.unwrap().contains("passed position 1"));
        }
        assert!(
            h.service.queue_snapshot()[0]
                .tasks
                .iter()
                .all(|t| t.parcel_id != parcel_id)
        );
    }
}

#[test]
fn path_preview_is_identical_across_threads() {
    let h = Harness::with(
        engine_config(),
        LoopbackUpstream::new(),
        Arc::new(ManualClock::new(0)),
    );
    let baseline: Vec<_> = CHUTES
        .iter()
        .chain(&[EXCEPTION_CHUTE])
        .map(|c| h.service.preview_path(*c).unwrap())
        .collect();

    thread::scope(|s| {
        for _ in 0..16 {
            s.spawn(|| {
                for _ in 0..200 {
                    for expected in &baseline {
                        let path = h.service.preview_path(expected.target_chute_id).unwrap();
                        assert_eq!(&path, expected);
                    }
                }
            });
        }
    });
    assert!(h.service.preview_path(12345).is_none());
}

// ── Shutdown ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn shutdown_drains_waiting_parcels() {
    let start = tokio::time::Instant::now();
    let h = Harness::new();
    let runner = tokio::spawn(Arc::clone(&h.service).run());
    let first = h.detect(1);
    let second = h.detect(2);
    settle().await;

    h.service.shutdown().await;
    assert!(h.service.is_stopping());
    assert!(start.elapsed() < Duration::from_millis(ASSIGNMENT_TIMEOUT_MS));
    assert_eq!(h.service.stats().in_flight, 0);
    runner.await.unwrap();

    for (parcel_id, flow) in [(1, first), (2, second)] {
        assert_eq!(flow.await.unwrap().actual_chute_id, EXCEPTION_CHUTE);
        let plan = h.service.route_plan(parcel_id).unwrap();
        assert_eq!(plan.exception_reason, Some(ExceptionReason::ShutdownRequested));
    }

    // Parcels detected after the stop go straight to the exception chute.
    let late = h.detect(3).await.unwrap();
    assert_eq!(late.actual_chute_id, EXCEPTION_CHUTE);
    assert_eq!(
        h.service.route_plan(3).unwrap().exception_reason,
        Some(ExceptionReason::ShutdownRequested)
    );
}
