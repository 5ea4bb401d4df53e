//! Integration test: detection → assignment → execution → completion report.

use super::*;
use wds_common::types::DiverterDirection;
use wds_hal::drivers::simulation::ActuationRecord;
use wds_sorter::plan::{AssignmentOutcome, ChangeChuteCommand, ExceptionReason, RoutePlanState};
use wds_sorter::upstream::{ChuteAssignment, UpstreamMessage};
use wds_sorter::{RoutePlanError, SorterError};

// ── Happy path ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn assigned_parcel_reaches_its_chute() {
    let start = tokio::time::Instant::now();
    let h = Harness::new();
    let mut events = h.service.subscribe();

    let flow = h.detect(1);
    settle().await;
    assert!(matches!(
        h.upstream.sent().as_slice(),
        [UpstreamMessage::ParcelDetected { parcel_id: 1, detected_at: 0 }]
    ));

    advance_to(start, 50).await;
    let outcome = h.service.handle_assignment(ChuteAssignment {
        parcel_id: 1,
        chute_id: 1,
    });
    assert_eq!(outcome, Some(AssignmentOutcome::Accepted));

    let result = flow.await.unwrap();
    assert!(result.is_success);
    assert_eq!(result.actual_chute_id, 1);
    assert_eq!(
        h.driver.actuations(),
        vec![ActuationRecord {
            diverter_id: 1,
            direction: DiverterDirection::Left
        }]
    );

    let plan = h.service.route_plan(1).unwrap();
    assert_eq!(plan.state, RoutePlanState::Completed);
    assert_eq!(plan.effective_chute_id, Some(1));
    assert_eq!(plan.resolved_at, Some(50));

    match h.upstream.sent().last() {
        Some(UpstreamMessage::SortingCompleted {
            parcel_id,
            actual_chute_id,
            is_success,
            ..
        }) => {
            assert_eq!(*parcel_id, 1);
            assert_eq!(*actual_chute_id, 1);
            assert!(*is_success);
        }
        other => panic!("expected completion report, got {other:?}"),
    }

    let sorted = next_event(&mut events, |e| matches!(e, SortingEvent::Sorted { .. })).await;
    assert!(matches!(
        sorted,
        SortingEvent::Sorted {
            parcel_id: 1,
            plan_state: RoutePlanState::Completed,
            ..
        }
    ));

    let stats = h.service.stats();
    assert_eq!(stats.detected, 1);
    assert_eq!(stats.sorted_to_target, 1);
    assert_eq!(stats.sorted_to_exception, 0);
}

#[tokio::test(start_paused = true)]
async fn queue_holds_assigned_route_until_the_parcel_passes() {
    let h = Harness::new();
    let flow = h.detect(1);
    settle().await;

    // Provisional route to the exception chute: straight at every position.
    let snapshot = h.service.queue_snapshot();
    assert_eq!(snapshot.iter().map(|q| q.tasks.len()).sum::<usize>(), 3);

    h.service.handle_assignment(ChuteAssignment {
        parcel_id: 1,
        chute_id: 3,
    });
    flow.await.unwrap();

    let snapshot = h.service.queue_snapshot();
    let queued: Vec<_> = snapshot
        .iter()
        .flat_map(|q| q.tasks.iter().map(|t| (t.position_index, t.target_direction)))
        .collect();
    assert_eq!(
        queued,
        vec![
            (1, DiverterDirection::Straight),
            (2, DiverterDirection::Left)
        ]
    );
}

// ── Fallbacks ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unassigned_parcel_falls_back_at_deadline() {
    let start = tokio::time::Instant::now();
    let h = Harness::new();
    let flow = h.detect(1);

    let result = flow.await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(ASSIGNMENT_TIMEOUT_MS));
    assert!(result.is_success);
    assert_eq!(result.actual_chute_id, EXCEPTION_CHUTE);

    let plan = h.service.route_plan(1).unwrap();
    assert_eq!(plan.state, RoutePlanState::ExceptionRouted);
    assert_eq!(plan.exception_reason, Some(ExceptionReason::DeadlineExpired));
    assert_eq!(plan.effective_chute_id, Some(EXCEPTION_CHUTE));
    assert!(
        h.driver
            .actuations()
            .iter()
            .all(|a| a.direction == DiverterDirection::Straight)
    );
}

#[tokio::test(start_paused = true)]
async fn unknown_chute_falls_back_without_panicking() {
    let h = Harness::new();
    let flow = h.detect(1);
    settle().await;

    assert_eq!(
        h.service.handle_assignment(ChuteAssignment {
            parcel_id: 1,
            chute_id: 12345,
        }),
        Some(AssignmentOutcome::Accepted)
    );

    let result = flow.await.unwrap();
    assert!(!result.is_success);
    assert_eq!(result.actual_chute_id, EXCEPTION_CHUTE);
    assert!(result.failure_reason.unwrap().contains("12345"));
    assert_eq!(h.service.stats().sorted_to_exception, 1);
}

#[tokio::test(start_paused = true)]
async fn disconnected_upstream_routes_to_exception_immediately() {
    let start = tokio::time::Instant::now();
    let h = Harness::new();
    h.upstream.set_connected(false);

    let result = h.detect(1).await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(result.actual_chute_id, EXCEPTION_CHUTE);
    assert!(h.upstream.sent().is_empty());

    let plan = h.service.route_plan(1).unwrap();
    assert_eq!(plan.exception_reason, Some(ExceptionReason::UpstreamDisconnected));
}

#[tokio::test(start_paused = true)]
async fn failed_send_routes_to_exception_immediately() {
    let h = Harness::new();
    h.upstream.set_fail_sends(true);

    let result = h.detect(1).await.unwrap();
    assert_eq!(result.actual_chute_id, EXCEPTION_CHUTE);

    let plan = h.service.route_plan(1).unwrap();
    assert!(matches!(
        plan.exception_reason,
        Some(ExceptionReason::UpstreamSendFailed(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn failing_diverter_reports_failure_to_fallback() {
    let h = Harness::new();
    h.driver.set_failing(1, true);
    let flow = h.detect(1);
    settle().await;

    h.service.handle_assignment(ChuteAssignment {
        parcel_id: 1,
        chute_id: 2,
    });
    let result = flow.await.unwrap();
    assert!(!result.is_success);
    assert_eq!(result.actual_chute_id, EXCEPTION_CHUTE);
    assert!(result.failure_reason.unwrap().contains("diverter 1"));
    assert_eq!(h.service.stats().execution_failures, 1);
}

// ── Assignments for unknown parcels ─────────────────────────────────

#[tokio::test(start_paused = true)]
async fn assignment_for_unknown_parcel_is_an_invariant_violation() {
    let h = Harness::new();
    let mut events = h.service.subscribe();

    assert_eq!(
        h.service.handle_assignment(ChuteAssignment {
            parcel_id: 42,
            chute_id: 1,
        }),
        None
    );
    let event = next_event(&mut events, |e| {
        matches!(e, SortingEvent::InvariantViolation { .. })
    })
    .await;
    assert_eq!(event.parcel_id(), Some(42));
    assert_eq!(h.service.stats().invariant_violations, 1);
}

#[tokio::test(start_paused = true)]
async fn duplicate_detection_is_rejected() {
    let h = Harness::new();
    let first = h.detect(1);
    settle().await;

    let second = h.detect(1).await.unwrap();
    assert!(!second.is_success);
    assert_eq!(second.actual_chute_id, EXCEPTION_CHUTE);
    assert_eq!(h.service.stats().detected, 1);

    h.service.handle_assignment(ChuteAssignment {
        parcel_id: 1,
        chute_id: 1,
    });
    assert_eq!(first.await.unwrap().actual_chute_id, 1);
}

// ── Manual override ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn manual_override_routes_parcel() {
    let h = Harness::new();
    let flow = h.detect(1);
    settle().await;

    let outcome = h
        .service
        .change_parcel_chute(ChangeChuteCommand {
            parcel_id: 1,
            chute_id: 4,
            requested_at: 20,
        })
        .unwrap();
    assert_eq!(outcome, AssignmentOutcome::Accepted);
    assert_eq!(flow.await.unwrap().actual_chute_id, 4);

    // Upstream answer after the override is ignored.
    assert_eq!(
        h.service.handle_assignment(ChuteAssignment {
            parcel_id: 1,
            chute_id: 2,
        }),
        Some(AssignmentOutcome::IgnoredAlreadyCompleted)
    );
    let plan = h.service.route_plan(1).unwrap();
    assert_eq!(plan.current_target_chute_id, 2);
    assert_eq!(plan.effective_chute_id, Some(4));
}

#[tokio::test(start_paused = true)]
async fn manual_override_rejects_unknown_chute_and_parcel() {
    let h = Harness::new();

    let err = h
        .service
        .change_parcel_chute(ChangeChuteCommand {
            parcel_id: 1,
            chute_id: 42,
            requested_at: 0,
        })
        .unwrap_err();
    assert!(matches!(err, SorterError::UnknownChute { chute_id: 42 }));

    let err = h
        .service
        .change_parcel_chute(ChangeChuteCommand {
            parcel_id: 77,
            chute_id: 2,
            requested_at: 0,
        })
        .unwrap_err();
    assert!(matches!(
        err,
        SorterError::Plan(RoutePlanError::PlanNotFound(77))
    ));
}

// ── Topology ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reload_changes_preview_but_not_queued_windows() {
    let h = Harness::new();
    let flow = h.detect(1);
    settle().await;
    h.service.handle_assignment(ChuteAssignment {
        parcel_id: 1,
        chute_id: 1,
    });
    flow.await.unwrap();
    let before = h.service.queue_snapshot();

    let mut faster = line();
    faster.segments[0].speed_mmps = 2000.0;
    assert_eq!(h.service.reload_topology(faster).unwrap(), 2);

    assert_eq!(h.service.queue_snapshot(), before);
    let preview = h.service.preview_path(1).unwrap();
    assert_eq!(preview.segments[0].ttl_milliseconds, 3000 + 700);

    let mut broken = line();
    broken.segments[0].speed_mmps = 0.0;
    assert!(matches!(
        h.service.reload_topology(broken),
        Err(SorterError::Config(_))
    ));
    assert_eq!(h.topology.version(), 2);
}

#[tokio::test(start_paused = true)]
async fn reload_must_keep_the_exception_chute() {
    let h = Harness::new();

    let mut without = line();
    without.chutes.retain(|c| c.chute_id != EXCEPTION_CHUTE);
    assert!(matches!(
        h.service.reload_topology(without),
        Err(SorterError::Config(_))
    ));

    let mut disabled = line();
    for chute in &mut disabled.chutes {
        if chute.chute_id == EXCEPTION_CHUTE {
            chute.enabled = false;
        }
    }
    assert!(matches!(
        h.service.reload_topology(disabled),
        Err(SorterError::Config(_))
    ));
    assert_eq!(h.topology.version(), 1);

    // Parcels still get their provisional exception route.
    let _flow = h.detect(1);
    settle().await;
    let queued: usize = h.service.queue_snapshot().iter().map(|q| q.tasks.len()).sum();
    assert_eq!(queued, 3);
    assert!(h.service.preview_path(EXCEPTION_CHUTE).is_some());
}

// ── Configuration directory ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn service_built_from_config_directory() {
    use std::fs;
    use wds_common::config::load_config_dir;
    use wds_common::driver::DiverterDriver;
    use wds_hal::DriverRegistry;
    use wds_sorter::plan::InMemoryRoutePlanRepository;

    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("sorter.toml"),
        r#"
[shared]
service_name = "wds-test"

[engine]
exception_chute_id = 999
assignment_timeout_ms = 500

[hal]
driver = "simulation"

[hal.driver_config.simulation]
actuation_latency_ms = 20

[upstream]
auto_assign_chutes = [3]
auto_assign_latency_ms = 10
"#,
    )
    .unwrap();
    fs::write(dir.path().join("topology.toml"), LINE).unwrap();

    let config = load_config_dir(dir.path()).unwrap();
    assert_eq!(config.sorter.engine.assignment_timeout_ms, 500);

    let topology = Arc::new(TopologyStore::new(config.topology.clone()).unwrap());
    let mut driver = DriverRegistry::with_builtin_drivers()
        .create_driver(&config.sorter.hal.driver)
        .unwrap();
    driver
        .init(
            &topology.current(),
            config.sorter.hal.driver_config.get("simulation"),
        )
        .unwrap();
    let driver: Arc<dyn DiverterDriver> = Arc::from(driver);

    let service = Arc::new(SortingService::new(
        config.sorter.engine.clone(),
        topology,
        Arc::clone(&driver),
        Arc::new(LoopbackUpstream::from_config(&config.sorter.upstream)),
        Arc::new(InMemoryRoutePlanRepository::new()),
        Arc::new(TokioClock::new()),
    ));
    let runner = tokio::spawn(Arc::clone(&service).run());
    settle().await;

    let result = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.process_parcel(5, DETECTION_SENSOR).await }
    })
    .await
    .unwrap();
    assert!(result.is_success);
    assert_eq!(result.actual_chute_id, 3);

    service.shutdown().await;
    runner.await.unwrap();
    driver.shutdown().unwrap();
}
