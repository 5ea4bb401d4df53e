//! Integration test: position sensor triggers against the live queues.

use super::*;
use wds_common::types::{DiverterDirection, SensorTriggerEvent, UNIDENTIFIED_PARCEL};
use wds_sorter::plan::{ExceptionReason, RoutePlanState};
use wds_sorter::queue::TriggerOutcome;
use wds_sorter::upstream::ChuteAssignment;

fn trigger(parcel_id: u64, sensor_id: u32, timestamp: u64) -> SensorTriggerEvent {
    SensorTriggerEvent {
        parcel_id,
        sensor_id,
        timestamp,
    }
}

async fn sorted_to(h: &Harness, parcel_id: u64, chute_id: u32) {
    let flow = h.detect(parcel_id);
    settle().await;
    h.service.handle_assignment(ChuteAssignment {
        parcel_id,
        chute_id,
    });
    assert_eq!(flow.await.unwrap().actual_chute_id, chute_id);
}

fn queued(h: &Harness) -> usize {
    h.service.queue_snapshot().iter().map(|q| q.tasks.len()).sum()
}

// ── Classification ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn on_time_trigger_archives_the_plan() {
    let h = Harness::new();
    sorted_to(&h, 1, 2).await;
    assert_eq!(queued(&h), 1);

    let report = h.service.handle_sensor_event(trigger(1, 101, 4600)).unwrap();
    match report.outcome {
        TriggerOutcome::OnTime(task) => {
            assert_eq!(task.parcel_id, 1);
            assert_eq!(task.target_direction, DiverterDirection::Right);
        }
        other => panic!("expected on-time match, got {other:?}"),
    }
    assert!(report.displaced.is_empty());
    assert_eq!(queued(&h), 0);

    // Archived plans stay readable.
    let plan = h.service.route_plan(1).unwrap();
    assert_eq!(plan.state, RoutePlanState::Completed);
    assert_eq!(h.repository.len(), 1);
    assert_eq!(h.service.stats().triggers.on_time, 1);
}

#[tokio::test(start_paused = true)]
async fn window_bounds_are_inclusive() {
    let h = Harness::new();
    sorted_to(&h, 1, 3).await;
    sorted_to(&h, 2, 3).await;

    let first = h.service.handle_sensor_event(trigger(1, 101, 3915)).unwrap();
    assert!(matches!(first.outcome, TriggerOutcome::OnTime(_)));
    let second = h.service.handle_sensor_event(trigger(2, 101, 5315)).unwrap();
    assert!(matches!(second.outcome, TriggerOutcome::OnTime(_)));
}

#[tokio::test(start_paused = true)]
async fn early_trigger_is_matched_without_reroute() {
    let h = Harness::new();
    sorted_to(&h, 1, 3).await;

    let report = h.service.handle_sensor_event(trigger(1, 101, 3000)).unwrap();
    assert!(matches!(report.outcome, TriggerOutcome::Early(_)));
    assert_eq!(report.outcome.label(), "early");
    assert_eq!(h.service.stats().rerouted, 0);
    // Position 2 still expects the parcel.
    assert_eq!(queued(&h), 1);
}

#[tokio::test(start_paused = true)]
async fn late_trigger_reroutes_downstream_to_exception() {
    let h = Harness::new();
    let mut events = h.service.subscribe();
    sorted_to(&h, 1, 3).await;
    let executed = h.driver.actuations().len();

    let report = h.service.handle_sensor_event(trigger(1, 101, 5316)).unwrap();
    assert!(matches!(report.outcome, TriggerOutcome::Late(_)));

    let rerouted = next_event(&mut events, |e| matches!(e, SortingEvent::Rerouted { .. })).await;
    assert!(matches!(
        rerouted,
        SortingEvent::Rerouted {
            parcel_id: 1,
            position_index: 1,
            ..
        }
    ));
    assert_eq!(queued(&h), 0);
    assert_eq!(h.service.stats().rerouted, 1);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let downstream: Vec<_> = h.driver.actuations()[executed..]
        .iter()
        .map(|a| (a.diverter_id, a.direction))
        .collect();
    assert_eq!(
        downstream,
        vec![
            (2, DiverterDirection::Straight),
            (3, DiverterDirection::Straight)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn trigger_with_empty_queue_is_interference() {
    let h = Harness::new();

    let report = h.service.handle_sensor_event(trigger(1, 102, 100)).unwrap();
    assert!(matches!(report.outcome, TriggerOutcome::Interference));
    assert_eq!(h.service.stats().triggers.interference, 1);

    // Detection and unknown sensors are not position triggers.
    assert!(h.service.handle_sensor_event(trigger(1, 100, 100)).is_none());
    assert!(h.service.handle_sensor_event(trigger(1, 555, 100)).is_none());
}

#[tokio::test(start_paused = true)]
async fn unidentified_trigger_matches_the_head() {
    let h = Harness::new();
    sorted_to(&h, 1, 2).await;

    let report = h
        .service
        .handle_sensor_event(trigger(UNIDENTIFIED_PARCEL, 101, 4615))
        .unwrap();
    assert_eq!(report.outcome.task().map(|t| t.parcel_id), Some(1));
}

// ── Sequence violations ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn out_of_order_parcel_displaces_the_head() {
    let h = Harness::new();
    let first = h.detect(1);
    let second = h.detect(2);
    settle().await;

    let report = h.service.handle_sensor_event(trigger(2, 101, 4615)).unwrap();
    assert!(report.is_sequence_violation());
    assert_eq!(report.outcome.task().map(|t| t.parcel_id), Some(2));
    assert_eq!(
        report.displaced.iter().map(|t| t.parcel_id).collect::<Vec<_>>(),
        vec![1]
    );

    // The displaced parcel goes to the exception chute without waiting.
    let result = first.await.unwrap();
    assert_eq!(result.actual_chute_id, EXCEPTION_CHUTE);
    let plan = h.service.route_plan(1).unwrap();
    match plan.exception_reason {
        Some(ExceptionReason::TimingViolation(reason)) => {
            assert!(reason.contains("sequence violation"))
        }
        other => panic!("expected timing violation, got {other:?}"),
    }

    // The matched parcel passed position 1 straight and can still turn at 2.
    h.service.handle_assignment(ChuteAssignment {
        parcel_id: 2,
        chute_id: 3,
    });
    let result = second.await.unwrap();
    assert!(result.is_success);
    assert_eq!(result.actual_chute_id, 3);
}

#[tokio::test(start_paused = true)]
async fn no_reevaluation_budget_leaves_queue_alone() {
    let config = EngineConfig {
        max_sequence_reevaluations: 0,
        ..engine_config()
    };
    let h = Harness::with(config, LoopbackUpstream::new(), Arc::new(TokioClock::new()));
    let _first = h.detect(1);
    let _second = h.detect(2);
    settle().await;
    let before = h.service.queue_snapshot();

    let report = h.service.handle_sensor_event(trigger(2, 101, 4615)).unwrap();
    assert!(matches!(report.outcome, TriggerOutcome::Unmatched));
    assert!(report.displaced.is_empty());
    assert_eq!(h.service.queue_snapshot(), before);
    assert_eq!(h.service.stats().rerouted, 0);
}

// ── Replanning after passage ────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn assignment_after_passing_the_diverter_falls_back() {
    let h = Harness::new();
    let flow = h.detect(1);
    settle().await;

    // Parcel passes position 1 straight while still unassigned.
    let report = h.service.handle_sensor_event(trigger(1, 101, 4615)).unwrap();
    assert!(matches!(report.outcome, TriggerOutcome::OnTime(_)));

    h.service.handle_assignment(ChuteAssignment {
        parcel_id: 1,
        chute_id: 1,
    });
    let result = flow.await.unwrap();
    assert!(!result.is_success);
    assert_eq!(result.actual_chute_id, EXCEPTION_CHUTE);
    assert!(result.failure_reason.unwrap().contains("passed position 1"));
}

#[tokio::test(start_paused = true)]
async fn execution_skips_positions_already_passed() {
    let h = Harness::new();
    let flow = h.detect(1);
    settle().await;
    h.service.handle_sensor_event(trigger(1, 101, 4615)).unwrap();

    h.service.handle_assignment(ChuteAssignment {
        parcel_id: 1,
        chute_id: 4,
    });
    assert_eq!(flow.await.unwrap().actual_chute_id, 4);
    assert!(h.driver.actuations().iter().all(|a| a.diverter_id != 1));
}

#[tokio::test(start_paused = true)]
async fn late_parcel_still_waiting_is_actuated_once() {
    let h = Harness::new();
    let flow = h.detect(1);
    settle().await;

    let report = h.service.handle_sensor_event(trigger(1, 101, 5316)).unwrap();
    assert!(matches!(report.outcome, TriggerOutcome::Late(_)));

    let result = flow.await.unwrap();
    assert_eq!(result.actual_chute_id, EXCEPTION_CHUTE);
    assert_eq!(
        h.service.route_plan(1).unwrap().state,
        RoutePlanState::ExceptionRouted
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    let actuated: Vec<_> = h.driver.actuations().iter().map(|a| a.diverter_id).collect();
    assert_eq!(actuated, vec![2, 3]);
}

// ── Expiry ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn parcel_that_never_arrives_expires_and_is_archived() {
    let start = tokio::time::Instant::now();
    let h = Harness::new();
    let mut events = h.service.subscribe();
    let runner = tokio::spawn(Arc::clone(&h.service).run());
    sorted_to(&h, 1, 3).await;
    assert_eq!(queued(&h), 2);

    // Window at position 1 closes at 5315, plus the default 1000 ms grace.
    advance_to(start, 6_000).await;
    assert_eq!(queued(&h), 2);

    advance_to(start, 7_000).await;
    let rerouted = next_event(&mut events, |e| matches!(e, SortingEvent::Rerouted { .. })).await;
    match rerouted {
        SortingEvent::Rerouted {
            parcel_id,
            position_index,
            reason,
        } => {
            assert_eq!((parcel_id, position_index), (1, 1));
            assert!(reason.contains("missed window"));
        }
        other => panic!("expected reroute, got {other:?}"),
    }
    assert_eq!(queued(&h), 0);

    let stats = h.service.stats();
    assert_eq!(stats.triggers.expired, 1);
    assert_eq!(stats.triggers.late, 0);
    assert_eq!(stats.rerouted, 1);
    assert_eq!(h.repository.len(), 1);

    h.service.shutdown().await;
    runner.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stale_task_does_not_absorb_the_next_trigger() {
    let start = tokio::time::Instant::now();
    let h = Harness::new();
    sorted_to(&h, 1, 3).await;

    advance_to(start, 120_000).await;
    sorted_to(&h, 2, 3).await;
    let detected_at = h.service.route_plan(2).unwrap().created_at;

    let report = h
        .service
        .handle_sensor_event(trigger(UNIDENTIFIED_PARCEL, 101, detected_at + 4615))
        .unwrap();
    match report.outcome {
        TriggerOutcome::OnTime(task) => assert_eq!(task.parcel_id, 2),
        other => panic!("expected on-time match for parcel 2, got {other:?}"),
    }
    assert!(report.displaced.is_empty());

    let stats = h.service.stats();
    assert_eq!(stats.triggers.expired, 2);
    assert_eq!(stats.triggers.late, 0);
    assert_eq!(stats.rerouted, 1);
    // Parcel 2 is still expected at position 2.
    let pending: Vec<_> = h
        .service
        .queue_snapshot()
        .into_iter()
        .flat_map(|q| q.tasks)
        .map(|t| (t.parcel_id, t.position_index))
        .collect();
    assert_eq!(pending, vec![(2, 2)]);
}
