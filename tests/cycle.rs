//! Full update cycles against in-memory SQLite and a scripted query service.
//!
//! Run with: cargo test --test cycle --features sqlite

use std::sync::Arc;

mod common;

use common::{balance, FailingLauncher, Harness};
use govsync::config::FirePolicy;
use govsync::registry::{AlertDefinition, AlertMetadata, UpdateRegistry};
use govsync::services::{CycleKind, JobOutcome};
use govsync::storage::RelationalStore;

async fn add_whale_view_and_alert(harness: &mut Harness) {
    harness
        .store
        .create_materialized_view(
            "whales",
            "SELECT COUNT(*) AS n FROM balances WHERE balance > 100",
        )
        .await
        .unwrap();
    let registry = harness.cycle.registry_mut();
    registry.register_materialized_view("whales").await.unwrap();
    registry
        .register_alert(AlertDefinition::new(
            "whale_alert",
            "SELECT n > 0 FROM whales",
            AlertMetadata::default(),
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_alert_sees_data_refreshed_in_the_same_cycle() {
    let mut harness = Harness::new(FirePolicy::EveryCycle).await;
    harness
        .add_table("balances", vec![balance("a", 5.0), balance("b", 500.0)])
        .await;
    // View snapshot taken while the table is still empty
    add_whale_view_and_alert(&mut harness).await;

    let report = harness.cycle.run(CycleKind::Full).await;

    let updates = report.updates.as_ref().unwrap();
    assert_eq!(updates.jobs_failed(), 0);
    assert_eq!(updates.views_failed(), 0);
    assert_eq!(report.fired, vec!["whale_alert"]);
    assert_eq!(report.workers_joined, 1);
    assert_eq!(harness.handler.handled(), vec!["whale_alert"]);
}

#[tokio::test]
async fn test_alerts_only_cycle_skips_updates() {
    let mut harness = Harness::new(FirePolicy::EveryCycle).await;
    harness.add_table("balances", vec![balance("b", 500.0)]).await;
    add_whale_view_and_alert(&mut harness).await;

    let report = harness.cycle.run(CycleKind::AlertsOnly).await;

    assert!(report.updates.is_none());
    assert!(harness.service.submissions().is_empty());
    assert!(report.fired.is_empty());
    assert!(harness.handler.handled().is_empty());

    harness.cycle.run(CycleKind::Full).await;
    let report = harness.cycle.run(CycleKind::AlertsOnly).await;
    assert_eq!(report.fired, vec!["whale_alert"]);
}

#[tokio::test]
async fn test_failed_job_is_isolated() {
    let mut harness = Harness::new(FirePolicy::EveryCycle).await;
    let broken = harness.add_table("ledger", vec![balance("x", 1.0)]).await;
    harness
        .add_table("balances", vec![balance("b", 500.0)])
        .await;
    harness
        .service
        .fail_submit(&broken.update_query, "warehouse timeout");
    add_whale_view_and_alert(&mut harness).await;

    let report = harness.cycle.run(CycleKind::Full).await;

    let updates = report.updates.as_ref().unwrap();
    assert_eq!(updates.jobs.len(), 2);
    assert!(matches!(updates.jobs[0].outcome, JobOutcome::FetchFailed(_)));
    assert!(updates.jobs[1].outcome.is_success());
    assert_eq!(report.fired, vec!["whale_alert"]);
}

#[tokio::test]
async fn test_repeated_cycles_never_duplicate_rows() {
    let mut harness = Harness::new(FirePolicy::EveryCycle).await;
    harness
        .add_table(
            "balances",
            vec![balance("a", 1.0), balance("b", 2.0), balance("c", 3.0)],
        )
        .await;

    harness.cycle.run(CycleKind::Full).await;
    let report = harness.cycle.run(CycleKind::Full).await;

    match &report.updates.as_ref().unwrap().jobs[0].outcome {
        JobOutcome::Updated { fetched, upsert } => {
            assert_eq!(*fetched, 3);
            assert_eq!(upsert.inserted, 0);
            assert_eq!(upsert.ignored, 3);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    let rows = harness
        .store
        .fetch_rows("SELECT account FROM balances")
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn test_every_cycle_policy_refires() {
    let mut harness = Harness::new(FirePolicy::EveryCycle).await;
    harness.add_table("balances", vec![balance("b", 500.0)]).await;
    add_whale_view_and_alert(&mut harness).await;

    harness.cycle.run(CycleKind::Full).await;
    harness.cycle.run(CycleKind::Full).await;

    assert_eq!(harness.handler.handled(), vec!["whale_alert", "whale_alert"]);
}

#[tokio::test]
async fn test_fire_once_policy_suppresses_repeat() {
    let mut harness = Harness::new(FirePolicy::Once).await;
    harness.add_table("balances", vec![balance("b", 500.0)]).await;
    add_whale_view_and_alert(&mut harness).await;

    harness.cycle.run(CycleKind::Full).await;
    let second = harness.cycle.run(CycleKind::Full).await;

    assert!(second.fired.is_empty());
    assert_eq!(second.suppressed, vec!["whale_alert"]);
    assert_eq!(harness.handler.handled(), vec!["whale_alert"]);
}

#[tokio::test]
async fn test_cycle_picks_up_registrations_from_other_processes() {
    let mut harness = Harness::new(FirePolicy::EveryCycle).await;

    let mut other = UpdateRegistry::open(harness.registry_store.clone()).await;
    let metadata = AlertMetadata {
        ai_prompt_info: Some("Explain".to_string()),
        ..Default::default()
    };
    other
        .register_alert(AlertDefinition::new("always", "SELECT 1", metadata))
        .await
        .unwrap();

    let report = harness.cycle.run(CycleKind::AlertsOnly).await;

    assert_eq!(report.fired, vec!["always"]);
    assert_eq!(
        harness.cycle.registry().alert("always").unwrap().metadata.ai_prompt_info,
        Some("Explain".to_string())
    );
}

#[tokio::test]
async fn test_many_alerts_share_limited_cores() {
    let mut harness = Harness::new(FirePolicy::EveryCycle).await;
    for i in 0..5 {
        harness
            .cycle
            .registry_mut()
            .register_alert(AlertDefinition::new(
                format!("alert_{}", i),
                "SELECT 1",
                AlertMetadata::default(),
            ))
            .await
            .unwrap();
    }

    let report = harness.cycle.run(CycleKind::AlertsOnly).await;

    assert_eq!(report.fired.len(), 5);
    assert!(report.dispatch_failures.is_empty());
    let mut handled = harness.handler.handled();
    handled.sort();
    assert_eq!(
        handled,
        (0..5).map(|i| format!("alert_{}", i)).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_fire_once_alert_retries_after_failed_dispatch() {
    let mut harness = Harness::with_launcher(FirePolicy::Once, Arc::new(FailingLauncher)).await;
    harness
        .cycle
        .registry_mut()
        .register_alert(AlertDefinition::new("a", "SELECT 1", AlertMetadata::default()))
        .await
        .unwrap();

    for _ in 0..2 {
        let report = harness.cycle.run(CycleKind::AlertsOnly).await;
        assert!(report.fired.is_empty());
        assert!(report.suppressed.is_empty());
        assert_eq!(report.dispatch_failures, vec!["a"]);
        assert_eq!(report.workers_joined, 0);
    }
}
