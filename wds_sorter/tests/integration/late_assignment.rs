//! Integration test: assignments racing the deadline.

use super::*;
use std::collections::HashMap;
use wds_common::types::SensorTriggerEvent;
use wds_sorter::ManualClock;
use wds_sorter::plan::{AssignmentOutcome, AuditAction, ExceptionReason, RoutePlanState};
use wds_sorter::upstream::ChuteAssignment;

#[tokio::test(start_paused = true)]
async fn assignment_after_expiry_keeps_the_fallback() {
    let start = tokio::time::Instant::now();
    let h = Harness::new();
    let flow = h.detect(1);

    advance_to(start, ASSIGNMENT_TIMEOUT_MS + 1).await;
    let outcome = h.service.handle_assignment(ChuteAssignment {
        parcel_id: 1,
        chute_id: 5,
    });
    assert_eq!(outcome, Some(AssignmentOutcome::IgnoredExceptionRouted));

    let result = flow.await.unwrap();
    assert_eq!(result.actual_chute_id, EXCEPTION_CHUTE);

    let plan = h.service.route_plan(1).unwrap();
    assert_eq!(plan.state, RoutePlanState::ExceptionRouted);
    assert_eq!(plan.current_target_chute_id, 5);
    assert_eq!(plan.effective_chute_id, Some(EXCEPTION_CHUTE));
    assert_eq!(plan.exception_reason, Some(ExceptionReason::DeadlineExpired));
}

#[tokio::test(start_paused = true)]
async fn assignment_past_deadline_before_expiry_is_rejected() {
    // Engine time is driven by hand, so the plan is still Created when the
    // assignment arrives one millisecond after its deadline.
    let clock = Arc::new(ManualClock::new(0));
    let h = Harness::with(engine_config(), LoopbackUpstream::new(), clock.clone());
    let flow = h.detect(1);
    settle().await;

    clock.set(ASSIGNMENT_TIMEOUT_MS + 1);
    let outcome = h.service.handle_assignment(ChuteAssignment {
        parcel_id: 1,
        chute_id: 5,
    });
    assert_eq!(outcome, Some(AssignmentOutcome::RejectedTooLate));

    let result = flow.await.unwrap();
    assert!(result.is_success);
    assert_eq!(result.actual_chute_id, EXCEPTION_CHUTE);

    let plan = h.service.route_plan(1).unwrap();
    assert_eq!(plan.state, RoutePlanState::ExceptionRouted);
    assert_eq!(plan.current_target_chute_id, 5);
    assert_eq!(plan.effective_chute_id, Some(EXCEPTION_CHUTE));
    assert_eq!(plan.resolved_at, Some(ASSIGNMENT_TIMEOUT_MS + 1));
    assert!(matches!(
        plan.audit.last().map(|e| &e.action),
        Some(AuditAction::Assignment(AssignmentOutcome::RejectedTooLate))
    ));
}

#[tokio::test(start_paused = true)]
async fn assignment_at_the_deadline_is_accepted() {
    let clock = Arc::new(ManualClock::new(0));
    let h = Harness::with(engine_config(), LoopbackUpstream::new(), clock.clone());
    let flow = h.detect(1);
    settle().await;

    clock.set(ASSIGNMENT_TIMEOUT_MS);
    assert_eq!(
        h.service.handle_assignment(ChuteAssignment {
            parcel_id: 1,
            chute_id: 2,
        }),
        Some(AssignmentOutcome::Accepted)
    );
    assert_eq!(flow.await.unwrap().actual_chute_id, 2);
}

#[tokio::test(start_paused = true)]
async fn auto_assignment_through_the_run_loop() {
    let h = Harness::with(
        engine_config(),
        LoopbackUpstream::with_auto_assign(vec![2, 4], Duration::from_millis(50)),
        Arc::new(TokioClock::new()),
    );
    let mut events = h.service.subscribe();
    let runner = tokio::spawn(Arc::clone(&h.service).run());
    settle().await;

    for parcel_id in [11, 12] {
        h.driver.inject_trigger(SensorTriggerEvent {
            parcel_id,
            sensor_id: DETECTION_SENSOR,
            timestamp: 0,
        });
    }

    let mut sorted = HashMap::new();
    while sorted.len() < 2 {
        if let SortingEvent::Sorted {
            parcel_id, result, ..
        } = next_event(&mut events, |e| matches!(e, SortingEvent::Sorted { .. })).await
        {
            sorted.insert(parcel_id, result.actual_chute_id);
        }
    }
    assert_eq!(sorted.get(&11), Some(&2));
    assert_eq!(sorted.get(&12), Some(&4));

    h.service.shutdown().await;
    runner.await.unwrap();
}
