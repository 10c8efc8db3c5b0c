//! Lifecycle tests for the supervisor, driven by the scripted platform.

use std::sync::Arc;
use std::time::{Duration, Instant};

use courier_channel::testing::{ConnectBehavior, ScriptedPlatform};
use courier_channel::{InboundEvent, MessageHandler};
use courier_daemon::state::{JsonStateStore, Settings};
use courier_daemon::supervisor::{HealthAction, Supervisor, SupervisorOptions};
use courier_types::{Phase, StopResult};

struct Noop;

#[async_trait::async_trait]
impl MessageHandler for Noop {
    async fn on_message(&self, _event: InboundEvent) {}
}

struct Harness {
    dir: tempfile::TempDir,
    platform: ScriptedPlatform,
    supervisor: Supervisor,
}

impl Harness {
    fn new(platform: ScriptedPlatform) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::with_state(dir, platform)
    }

    fn with_state(dir: tempfile::TempDir, platform: ScriptedPlatform) -> Self {
        let settings = Arc::new(Settings::load(JsonStateStore::new(
            dir.path().join("state.json"),
        )));
        let supervisor = Supervisor::new(
            Arc::new(platform.clone()),
            Arc::new(Noop),
            settings,
            SupervisorOptions {
                join_timeout: Duration::from_secs(2),
                settle: Duration::from_millis(300),
            },
        );
        Self {
            dir,
            platform,
            supervisor,
        }
    }

    fn persisted(&self) -> serde_json::Value {
        let raw = std::fs::read_to_string(self.dir.path().join("state.json")).unwrap();
        serde_json::from_str(&raw).unwrap()
    }
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn start_reports_running_after_settle() {
    let h = Harness::new(ScriptedPlatform::new());

    let result = h.supervisor.start(Some("tok"));
    assert!(result.ok);
    assert!(result.error.is_none());

    std::thread::sleep(Duration::from_millis(300));
    let report = h.supervisor.status();
    assert!(report.running);
    assert!(report.error.is_none());
    assert_eq!(report.phase, Phase::Running);
    assert_eq!(h.platform.live(), 1);
    assert_eq!(h.persisted()["credential"], "tok");
}

#[test]
fn rejected_credential_fails_the_start() {
    let h = Harness::new(ScriptedPlatform::with_default(ConnectBehavior::Reject(
        "4004".into(),
    )));

    let result = h.supervisor.start(Some("bad"));
    assert!(!result.ok);
    assert!(result.error.unwrap().contains("authentication failed"));

    let report = h.supervisor.status();
    assert!(!report.running);
    assert_eq!(report.phase, Phase::Crashed);
    assert!(report.error.is_some());
}

#[test]
fn stop_suppresses_watchdog_until_next_start() {
    let h = Harness::new(ScriptedPlatform::new());
    assert!(h.supervisor.start(Some("tok")).ok);

    let stopped = h.supervisor.stop();
    assert_eq!(
        stopped,
        StopResult {
            ok: true,
            was_running: true
        }
    );
    let report = h.supervisor.status();
    assert!(!report.running);
    assert_eq!(report.phase, Phase::ManuallyStopped);
    assert_eq!(h.platform.live(), 0);
    assert_eq!(h.persisted()["manually_stopped"], true);

    for _ in 0..3 {
        assert_eq!(h.supervisor.health_check().unwrap(), HealthAction::Suppressed);
    }
    assert_eq!(h.supervisor.status().phase, Phase::ManuallyStopped);
    assert_eq!(h.platform.connects(), 1);

    assert!(h.supervisor.start(None).ok);
    assert_eq!(h.supervisor.status().phase, Phase::Running);
    assert_eq!(h.persisted()["manually_stopped"], false);
}

#[test]
fn second_stop_reports_not_running() {
    let h = Harness::new(ScriptedPlatform::new());
    assert!(h.supervisor.start(Some("tok")).ok);

    assert!(h.supervisor.stop().was_running);
    let second = h.supervisor.stop();
    assert!(second.ok);
    assert!(!second.was_running);
}

#[test]
fn stop_while_idle_still_suppresses_restarts() {
    let h = Harness::new(ScriptedPlatform::new());
    let result = h.supervisor.stop();
    assert!(result.ok);
    assert!(!result.was_running);
    assert_eq!(h.supervisor.status().phase, Phase::ManuallyStopped);
}

#[test]
fn crash_is_recovered_by_next_tick() {
    let h = Harness::new(ScriptedPlatform::new());
    assert!(h.supervisor.start(Some("tok")).ok);

    assert!(h.platform.fail_active("connection reset"));
    wait_until("crash", || h.supervisor.status().phase == Phase::Crashed);
    let crashed = h.supervisor.status();
    assert!(!crashed.running);
    assert!(crashed.error.unwrap().contains("connection reset"));

    assert_eq!(h.supervisor.health_check().unwrap(), HealthAction::Restarted);
    let report = h.supervisor.status();
    assert_eq!(report.phase, Phase::Running);
    assert!(report.error.is_none());
    assert_eq!(report.restart_count, 1);

    wait_until("reconnect", || h.platform.live() == 1);
    assert_eq!(h.platform.connects(), 2);
    assert_eq!(h.platform.max_live(), 1);

    assert_eq!(h.supervisor.health_check().unwrap(), HealthAction::Healthy);
    assert_eq!(h.platform.connects(), 2);
}

#[test]
fn clean_exit_goes_idle_then_restarts() {
    let h = Harness::new(ScriptedPlatform::new());
    assert!(h.supervisor.start(Some("tok")).ok);

    assert!(h.platform.end_active());
    wait_until("idle", || h.supervisor.status().phase == Phase::Idle);
    assert!(h.supervisor.status().error.is_none());

    assert_eq!(h.supervisor.health_check().unwrap(), HealthAction::Restarted);
    assert_eq!(h.supervisor.status().phase, Phase::Running);
}

#[test]
fn repeated_starts_never_overlap_connections() {
    let h = Harness::new(ScriptedPlatform::new());

    assert!(h.supervisor.start(Some("tok-a")).ok);
    assert!(h.supervisor.start(Some("tok-b")).ok);
    h.supervisor.stop();
    assert!(h.supervisor.start(Some("tok-c")).ok);
    assert!(h.supervisor.health_check().is_ok());
    assert!(h.supervisor.start(Some("tok-c")).ok);

    assert_eq!(h.platform.max_live(), 1);
    assert_eq!(h.platform.live(), 1);
    assert_eq!(h.platform.credentials(), vec!["tok-a", "tok-b", "tok-c"]);
}

#[test]
fn concurrent_control_calls_keep_one_connection() {
    let h = Arc::new(Harness::new(ScriptedPlatform::new()));

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let h = Arc::clone(&h);
            std::thread::spawn(move || {
                for round in 0..5 {
                    match (i + round) % 3 {
                        0 => {
                            h.supervisor.start(Some(format!("tok-{i}").as_str()));
                        }
                        1 => {
                            h.supervisor.stop();
                        }
                        _ => {
                            let _ = h.supervisor.health_check();
                        }
                    }
                    let _ = h.supervisor.status();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    assert_eq!(h.platform.max_live(), 1);
    h.supervisor.stop();
    assert_eq!(h.platform.live(), 0);
}

#[test]
fn deployment_id_is_stable_for_the_process() {
    let h = Harness::new(ScriptedPlatform::new());
    let first = h.supervisor.status().deployment_id;

    h.supervisor.start(Some("tok"));
    h.supervisor.stop();
    h.supervisor.start(None);
    h.platform.fail_active("drop");
    wait_until("crash", || h.supervisor.status().phase == Phase::Crashed);
    h.supervisor.health_check().unwrap();

    assert_eq!(h.supervisor.status().deployment_id, first);
}

#[test]
fn persisted_credential_cold_starts_on_first_tick() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("state.json"),
        r#"{"credential": "abc", "manually_stopped": false}"#,
    )
    .unwrap();
    let h = Harness::with_state(dir, ScriptedPlatform::new());
    assert_eq!(h.supervisor.status().phase, Phase::Idle);

    assert_eq!(h.supervisor.health_check().unwrap(), HealthAction::Restarted);
    assert_eq!(h.supervisor.status().phase, Phase::Running);
    wait_until("connect", || h.platform.live() == 1);
    assert_eq!(h.platform.credentials(), vec!["abc"]);
}

#[test]
fn persisted_manual_stop_survives_restart_of_process() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("state.json"),
        r#"{"credential": "abc", "manually_stopped": true}"#,
    )
    .unwrap();
    let h = Harness::with_state(dir, ScriptedPlatform::new());

    let report = h.supervisor.status();
    assert_eq!(report.phase, Phase::Idle);
    assert!(report.manually_stopped);
    assert_eq!(h.supervisor.health_check().unwrap(), HealthAction::Suppressed);
    assert_eq!(h.platform.connects(), 0);
}

#[test]
fn failed_start_is_visible_to_the_next_status_read() {
    let h = Harness::new(ScriptedPlatform::with_default(ConnectBehavior::Reject(
        "4004".into(),
    )));

    for _ in 0..50 {
        let result = h.supervisor.start(Some("bad"));
        assert!(!result.ok);

        let report = h.supervisor.status();
        assert!(!report.running);
        assert_eq!(report.phase, Phase::Crashed);
        assert_eq!(report.error, result.error);
        assert_eq!(h.supervisor.health_check().unwrap(), HealthAction::Restarted);

        wait_until("crash", || h.supervisor.status().phase == Phase::Crashed);
    }
}

#[test]
fn auth_failures_are_retried_every_tick() {
    let h = Harness::new(ScriptedPlatform::with_default(ConnectBehavior::Reject(
        "4004".into(),
    )));
    assert!(!h.supervisor.start(Some("bad")).ok);

    for attempt in 2..=3 {
        assert_eq!(h.supervisor.health_check().unwrap(), HealthAction::Restarted);
        wait_until("crash", || h.supervisor.status().phase == Phase::Crashed);
        assert_eq!(h.platform.connects(), attempt);
    }
}

#[test]
fn stop_during_slow_connect_is_bounded() {
    let h = Harness::new(ScriptedPlatform::with_default(ConnectBehavior::Hang));

    // Still connecting when the settle window closes.
    assert!(h.supervisor.start(Some("tok")).ok);
    assert_eq!(h.supervisor.status().phase, Phase::Running);

    let begun = Instant::now();
    let result = h.supervisor.stop();
    assert!(result.was_running);
    assert!(begun.elapsed() < Duration::from_secs(2));
    assert_eq!(h.supervisor.status().phase, Phase::ManuallyStopped);
}

#[test]
fn stuck_close_is_abandoned_and_stop_still_wins() {
    let platform = ScriptedPlatform::new();
    platform.push(ConnectBehavior::StuckOnClose(Duration::from_secs(3)));
    let h = Harness::new(platform);
    assert!(h.supervisor.start(Some("tok")).ok);

    let begun = Instant::now();
    assert!(h.supervisor.stop().ok);
    assert!(begun.elapsed() < Duration::from_secs(3));

    // The abandoned runner eventually finishes; its exit report must not
    // overwrite the operator's stop.
    wait_until("abandoned runner", || h.platform.live() == 0);
    std::thread::sleep(Duration::from_millis(50));
    let report = h.supervisor.status();
    assert_eq!(report.phase, Phase::ManuallyStopped);
    assert!(report.error.is_none());
}

#[test]
fn runner_panic_becomes_crash_and_is_restarted() {
    let platform = ScriptedPlatform::new();
    platform.push(ConnectBehavior::PanicOnRun);
    let h = Harness::new(platform);

    h.supervisor.start(Some("tok"));
    wait_until("crash", || h.supervisor.status().phase == Phase::Crashed);
    assert!(h.supervisor.status().error.unwrap().contains("panic"));

    assert_eq!(h.supervisor.health_check().unwrap(), HealthAction::Restarted);
    wait_until("reconnect", || h.platform.live() == 1);
    assert_eq!(h.supervisor.status().phase, Phase::Running);
}
