use super::*;
use crate::alerts::{AlertHandler, TriggeredAlert};
use crate::registry::{AlertDefinition, AlertMetadata};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

/// Handler that blocks on a gate and tracks how many run at once.
struct GatedHandler {
    gate: Semaphore,
    running: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

impl GatedHandler {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        })
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

#[async_trait]
impl AlertHandler for GatedHandler {
    async fn handle(&self, _alert: TriggeredAlert) -> crate::alerts::Result<()> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Launcher whose every launch fails.
struct BrokenLauncher;

#[async_trait]
impl WorkerLauncher for BrokenLauncher {
    async fn launch(&self, _alert: &TriggeredAlert, _core_id: usize) -> Result<Box<dyn WorkerHandle>> {
        Err(DispatchError::Config("no worker binary".to_string()))
    }

    fn name(&self) -> &str {
        "broken"
    }
}

fn alert(name: &str) -> TriggeredAlert {
    TriggeredAlert::new(
        &AlertDefinition::new(name, "SELECT 1", AlertMetadata::default()),
        Utc::now(),
    )
}

fn manager(max_cores: usize, handler: Arc<dyn AlertHandler>) -> CoreTaskManager {
    CoreTaskManager::new(
        max_cores,
        Arc::new(TaskLauncher::new(handler)),
        Duration::from_millis(5),
    )
}

#[tokio::test]
async fn test_dispatch_uses_first_free_slot() {
    let handler = GatedHandler::new();
    let mut manager = manager(3, handler.clone());

    assert_eq!(manager.dispatch(alert("a")).await.unwrap(), 0);
    assert_eq!(manager.dispatch(alert("b")).await.unwrap(), 1);
    assert_eq!(manager.slots()[0].occupant(), Some("a"));
    assert_eq!(manager.slots()[1].occupant(), Some("b"));
    assert!(manager.slots()[2].is_empty());

    handler.release(2);
    assert_eq!(manager.join_all().await, 2);
    assert_eq!(manager.occupied(), 0);
}

#[tokio::test]
async fn test_third_dispatch_waits_for_free_slot() {
    let handler = GatedHandler::new();
    let mut manager = manager(2, handler.clone());

    manager.dispatch(alert("a")).await.unwrap();
    manager.dispatch(alert("b")).await.unwrap();

    // Both slots busy: the third dispatch cannot complete yet
    let blocked = tokio::time::timeout(Duration::from_millis(50), manager.dispatch(alert("c"))).await;
    assert!(blocked.is_err());
    assert_eq!(handler.completed.load(Ordering::SeqCst), 0);

    handler.release(1);
    let core_id = manager.dispatch(alert("c")).await.unwrap();
    assert!(core_id < 2);
    assert_eq!(handler.completed.load(Ordering::SeqCst), 1);

    handler.release(2);
    assert_eq!(manager.join_all().await, 2);
    assert_eq!(handler.completed.load(Ordering::SeqCst), 3);
    assert!(handler.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_freed_slot_is_reused() {
    let handler = GatedHandler::new();
    let mut manager = manager(1, handler.clone());

    for name in ["a", "b", "c"] {
        handler.release(1);
        assert_eq!(manager.dispatch(alert(name)).await.unwrap(), 0);
    }
    manager.join_all().await;

    assert_eq!(handler.completed.load(Ordering::SeqCst), 3);
    assert_eq!(handler.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_join_all_kills_overdue_worker() {
    let handler = GatedHandler::new();
    let mut manager =
        manager(1, handler.clone()).with_worker_timeout(Some(Duration::from_millis(50)));

    manager.dispatch(alert("hung")).await.unwrap();
    let joined = tokio::time::timeout(Duration::from_secs(5), manager.join_all())
        .await
        .unwrap();

    assert_eq!(joined, 1);
    assert_eq!(manager.occupied(), 0);
    assert_eq!(handler.completed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_watchdog_frees_slot_for_waiting_dispatch() {
    let handler = GatedHandler::new();
    let mut manager =
        manager(1, handler.clone()).with_worker_timeout(Some(Duration::from_millis(50)));

    manager.dispatch(alert("hung")).await.unwrap();
    let core_id = tokio::time::timeout(Duration::from_secs(5), manager.dispatch(alert("next")))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(core_id, 0);
    assert_eq!(manager.slots()[0].occupant(), Some("next"));

    handler.release(1);
    manager.join_all().await;
}

#[tokio::test]
async fn test_launch_failure_leaves_slot_empty() {
    let mut manager = CoreTaskManager::new(2, Arc::new(BrokenLauncher), Duration::from_millis(5));

    let result = manager.dispatch(alert("a")).await;

    assert!(matches!(result, Err(DispatchError::Config(_))));
    assert_eq!(manager.occupied(), 0);
    assert_eq!(manager.join_all().await, 0);
}

#[test]
fn test_zero_cores_still_gets_one_slot() {
    let handler: Arc<dyn AlertHandler> = GatedHandler::new();
    let manager = manager(0, handler);
    assert_eq!(manager.max_cores(), 1);
}

#[cfg(unix)]
mod process {
    use super::*;
    use crate::config::{AffinityMode, CORE_ID_ENV_VAR, TRIGGERED_ALERT_ENV_VAR};

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_worker_receives_alert_and_core_id() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("worker.out");
        let script = format!(
            "printf '%s\\n%s' \"${}\" \"${}\" > \"$OUT\"",
            CORE_ID_ENV_VAR, TRIGGERED_ALERT_ENV_VAR
        );
        let launcher = ProcessLauncher::new(sh(&script), AffinityMode::None)
            .unwrap()
            .with_env("OUT", out.to_string_lossy());
        let mut manager = CoreTaskManager::new(2, Arc::new(launcher), Duration::from_millis(5));

        manager.dispatch(alert("quorum")).await.unwrap();
        manager.join_all().await;

        let written = std::fs::read_to_string(&out).unwrap();
        let (core_id, json) = written.split_once('\n').unwrap();
        assert_eq!(core_id, "0");
        assert_eq!(TriggeredAlert::from_json(json).unwrap().alert_name, "quorum");
    }

    #[tokio::test]
    async fn test_pinned_worker_still_runs() {
        let launcher = ProcessLauncher::new(sh("exit 0"), AffinityMode::Pin).unwrap();
        let mut manager = CoreTaskManager::new(1, Arc::new(launcher), Duration::from_millis(5));

        manager.dispatch(alert("pinned")).await.unwrap();
        assert_eq!(manager.join_all().await, 1);
    }

    #[tokio::test]
    async fn test_hung_process_is_killed() {
        let launcher = ProcessLauncher::new(sh("sleep 30"), AffinityMode::None).unwrap();
        let mut manager = CoreTaskManager::new(1, Arc::new(launcher), Duration::from_millis(5))
            .with_worker_timeout(Some(Duration::from_millis(100)));

        manager.dispatch(alert("hung")).await.unwrap();
        let joined = tokio::time::timeout(Duration::from_secs(10), manager.join_all())
            .await
            .unwrap();

        assert_eq!(joined, 1);
        assert_eq!(manager.occupied(), 0);
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(
            ProcessLauncher::new(Vec::new(), AffinityMode::None),
            Err(DispatchError::Config(_))
        ));
    }
}
