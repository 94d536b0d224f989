use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::dispatcher::{trigger_probability, ResponseDispatcher};
use super::testing::{RecordingHost, RecordingScheduler};
use super::types::{DispatchOutcome, ResponsePolicy, ResponseType};
use crate::constants::{
    FLAG_CORRUPT_DATA, FLAG_FAKE_SCREEN, FLAG_FEATURES_DISABLED, FLAG_RESPONSE_DELAY_MS,
    MAX_DISPATCH_HISTORY,
};
use crate::logic::storage::{MasterKey, SecureStateStore};
use crate::logic::threat::{SecurityReport, ThreatSignal, ThreatType};

struct Fixture {
    dispatcher: ResponseDispatcher,
    store: Arc<SecureStateStore>,
    host: Arc<RecordingHost>,
    scheduler: Arc<RecordingScheduler>,
}

fn fixture_with_store(store: SecureStateStore, seed: u64) -> Fixture {
    let store = Arc::new(store);
    let host = Arc::new(RecordingHost::default());
    let scheduler = Arc::new(RecordingScheduler::default());
    let dispatcher = ResponseDispatcher::new(store.clone(), host.clone(), scheduler.clone())
        .with_seed(seed);
    Fixture {
        dispatcher,
        store,
        host,
        scheduler,
    }
}

fn fixture(seed: u64) -> Fixture {
    fixture_with_store(SecureStateStore::in_memory(&MasterKey::derive(b"dispatch-test")), seed)
}

fn always(response: ResponseType) -> ResponsePolicy {
    ResponsePolicy::new(response, false)
}

fn root_and_hooks() -> SecurityReport {
    SecurityReport::from_fn(|kind| match kind {
        ThreatType::Root => ThreatSignal::detected(kind, "su at /system/bin/su"),
        ThreatType::Hooks => ThreatSignal::detected(kind, "frida-agent loaded"),
        _ => ThreatSignal::clean(kind),
    })
}

fn clean_report() -> SecurityReport {
    SecurityReport::from_fn(ThreatSignal::clean)
}

// ============================================================================
// TRIGGER PROBABILITY
// ============================================================================

#[test]
fn test_trigger_probability_escalates_and_caps() {
    assert!((trigger_probability(0) - 0.6).abs() < 1e-9);
    assert!((trigger_probability(1) - 0.7).abs() < 1e-9);
    assert!((trigger_probability(2) - 0.8).abs() < 1e-9);
    assert!((trigger_probability(3) - 0.9).abs() < 1e-9);
    assert_eq!(trigger_probability(10), 0.9);
    assert_eq!(trigger_probability(u64::MAX), 0.9);
}

#[test]
fn test_suppression_uses_current_counter() {
    let f = fixture(42);
    let policy = ResponsePolicy::new(ResponseType::LogOnly, true);
    let report = SecurityReport::single(ThreatType::Debugger, "tracer pid 77");

    let mut executed = 0u64;
    let mut suppressed = 0u64;
    for _ in 0..500 {
        let before = f.store.recent_threat_count();
        match f.dispatcher.dispatch(&report, policy) {
            DispatchOutcome::Suppressed { probability, roll } => {
                assert_eq!(probability, trigger_probability(before));
                assert!(roll >= probability);
                assert_eq!(f.store.recent_threat_count(), before);
                suppressed += 1;
            }
            DispatchOutcome::Executed { .. } => {
                assert_eq!(f.store.recent_threat_count(), before + 1);
                executed += 1;
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert!(executed > 0 && suppressed > 0);
    assert_eq!(f.store.history().count(ThreatType::Debugger), executed);
    let stats = f.dispatcher.stats();
    assert_eq!(stats.executed as u64, executed);
    assert_eq!(stats.suppressed as u64, suppressed);
}

#[test]
fn test_without_randomized_trigger_every_dispatch_executes() {
    let f = fixture(1);
    for _ in 0..50 {
        assert!(f.dispatcher.dispatch(&root_and_hooks(), always(ResponseType::LogOnly)).is_executed());
    }
    assert_eq!(f.store.history().count(ThreatType::Root), 50);
    assert_eq!(f.store.history().count(ThreatType::Hooks), 50);
    assert_eq!(f.store.history().count(ThreatType::Debugger), 0);
}

// ============================================================================
// OUTCOMES
// ============================================================================

#[test]
fn test_clean_report_does_nothing() {
    let f = fixture(1);
    let outcome = f
        .dispatcher
        .dispatch(&clean_report(), always(ResponseType::ImmediateExit));
    assert_eq!(outcome, DispatchOutcome::NoThreats);
    assert_eq!(f.store.recent_threat_count(), 0);
    assert_eq!(f.scheduler.pending(), 0);
    assert!(f.host.calls().is_empty());
}

#[test]
fn test_every_response_type_executes() {
    for response in ResponseType::ALL {
        let f = fixture(9);
        let outcome = f.dispatcher.dispatch(&root_and_hooks(), always(response));
        match &outcome {
            DispatchOutcome::Executed {
                response: ran,
                threats,
                scheduled_delay_ms,
            } => {
                assert_eq!(*ran, response);
                assert_eq!(threats, &vec![ThreatType::Root, ThreatType::Hooks]);
                let terminal = response.delay_window_ms().is_some();
                assert_eq!(scheduled_delay_ms.is_some(), terminal, "{}", response);
                assert_eq!(f.scheduler.pending(), usize::from(terminal), "{}", response);
            }
            other => panic!("{}: unexpected outcome {:?}", response, other),
        }
    }
}

#[test]
fn test_immediate_exit_delay_window() {
    let f = fixture(3);
    for _ in 0..200 {
        let outcome = f
            .dispatcher
            .dispatch(&root_and_hooks(), always(ResponseType::ImmediateExit));
        let delay = outcome.scheduled_delay().unwrap();
        assert!(delay < Duration::from_millis(100), "{:?}", delay);
    }
    // one terminal action per dispatch, not per threat
    assert_eq!(f.scheduler.pending(), 200);
    for delay in f.scheduler.delays() {
        assert!(delay < Duration::from_millis(100));
    }
}

#[test]
fn test_delayed_terminal_windows() {
    for response in [ResponseType::DelayedExit, ResponseType::CrashApp, ResponseType::KillProcess] {
        let f = fixture(5);
        for _ in 0..100 {
            f.dispatcher.dispatch(&root_and_hooks(), always(response));
        }
        let delays = f.scheduler.delays();
        assert_eq!(delays.len(), 100);
        for delay in delays {
            assert!(
                delay >= Duration::from_millis(1000) && delay < Duration::from_millis(5000),
                "{}: {:?}",
                response,
                delay
            );
        }
    }
}

#[test]
fn test_terminal_actions_reach_host_only_when_run() {
    let cases = [
        (ResponseType::ImmediateExit, "exit(1)"),
        (ResponseType::DelayedExit, "exit(1)"),
        (ResponseType::CrashApp, "crash"),
        (ResponseType::KillProcess, "kill"),
    ];
    for (response, call) in cases {
        let f = fixture(11);
        f.dispatcher.dispatch(&root_and_hooks(), always(response));
        assert!(f.host.calls().is_empty());
        f.scheduler.run_pending();
        assert_eq!(f.host.calls(), vec![call.to_string()]);
    }
}

#[test]
fn test_restart_relaunches_then_exits() {
    let f = fixture(2);
    let outcome = f
        .dispatcher
        .dispatch(&root_and_hooks(), always(ResponseType::RestartApp));
    assert!(outcome.scheduled_delay().unwrap() < Duration::from_millis(100));
    f.scheduler.run_pending();
    assert_eq!(f.host.calls(), vec!["relaunch".to_string(), "exit(0)".to_string()]);
}

#[test]
fn test_restart_falls_back_to_kill() {
    let f = fixture(2);
    f.host.relaunch_fails.store(true, Ordering::SeqCst);
    f.dispatcher
        .dispatch(&root_and_hooks(), always(ResponseType::RestartApp));
    f.scheduler.run_pending();
    assert_eq!(f.host.calls(), vec!["kill".to_string()]);
}

#[test]
fn test_terminal_action_flushes_state_first() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let store = SecureStateStore::open(&path, &MasterKey::derive(b"dispatch-test")).unwrap();
    let f = fixture_with_store(store, 4);

    f.dispatcher
        .dispatch(&root_and_hooks(), always(ResponseType::KillProcess));
    assert!(!path.exists());

    f.scheduler.run_pending();
    assert!(path.exists());
    let reopened = SecureStateStore::open(&path, &MasterKey::derive(b"dispatch-test")).unwrap();
    assert_eq!(reopened.history().count(ThreatType::Root), 1);
    assert_eq!(reopened.history().count(ThreatType::Hooks), 1);
}

// ============================================================================
// DECEPTIVE AND ADVANCED RESPONSES
// ============================================================================

#[test]
fn test_deceptive_flags() {
    let cases = [
        (ResponseType::FakeScreen, FLAG_FAKE_SCREEN),
        (ResponseType::CorruptData, FLAG_CORRUPT_DATA),
        (ResponseType::DisableFeatures, FLAG_FEATURES_DISABLED),
    ];
    for (response, flag) in cases {
        let f = fixture(6);
        assert_eq!(f.store.get_bool(flag), None);
        f.dispatcher.dispatch(&root_and_hooks(), always(response));
        assert_eq!(f.store.get_bool(flag), Some(true), "{}", response);
        assert!(f.host.calls().is_empty());
    }
}

#[test]
fn test_random_behavior_picks_one_deception() {
    let mut seen = [false; 3];
    for seed in 0..64 {
        let f = fixture(seed);
        f.dispatcher
            .dispatch(&root_and_hooks(), always(ResponseType::RandomBehavior));

        let fake = f.store.get_bool(FLAG_FAKE_SCREEN) == Some(true);
        let corrupt = f.store.get_bool(FLAG_CORRUPT_DATA) == Some(true);
        let delay = f.store.get_int(FLAG_RESPONSE_DELAY_MS);
        if let Some(ms) = delay {
            assert!((1..=100).contains(&ms), "{}", ms);
        }
        let picked = [fake, corrupt, delay.is_some()];
        assert_eq!(picked.iter().filter(|p| **p).count(), 1, "seed {}", seed);
        for (slot, hit) in seen.iter_mut().zip(picked) {
            *slot |= hit;
        }
    }
    assert_eq!(seen, [true, true, true]);
}

#[test]
fn test_clear_data_wipes_store_then_counts() {
    let f = fixture(8);
    f.store.put_string("session.token", "abc").unwrap();
    f.store.record_threat(ThreatType::Emulator);

    f.dispatcher
        .dispatch(&root_and_hooks(), always(ResponseType::ClearData));

    assert_eq!(f.host.calls(), vec!["clear_data".to_string()]);
    assert_eq!(f.store.get_string("session.token"), None);
    assert_eq!(f.store.history().count(ThreatType::Emulator), 0);
    assert_eq!(f.store.history().count(ThreatType::Root), 1);
    assert_eq!(f.store.recent_threat_count(), 2);
}

#[test]
fn test_handle_threat_uses_dispatch_path() {
    let f = fixture(12);
    let outcome = f
        .dispatcher
        .handle_threat(ThreatType::Tampering, always(ResponseType::LogOnly));
    match outcome {
        DispatchOutcome::Executed { threats, .. } => assert_eq!(threats, vec![ThreatType::Tampering]),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(f.store.history().count(ThreatType::Tampering), 1);
}

// ============================================================================
// ISOLATION AND HISTORY
// ============================================================================

#[test]
fn test_panicking_host_is_contained() {
    let f = fixture(13);
    f.host.clear_panics.store(true, Ordering::SeqCst);

    let outcome = f
        .dispatcher
        .dispatch(&root_and_hooks(), always(ResponseType::ClearData));
    match outcome {
        DispatchOutcome::Failed(msg) => assert!(msg.contains("host clear_data exploded"), "{}", msg),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(f.dispatcher.stats().failed, 1);

    // the dispatcher stays usable
    assert!(f
        .dispatcher
        .dispatch(&root_and_hooks(), always(ResponseType::LogOnly))
        .is_executed());
}

#[test]
fn test_history_is_bounded() {
    let f = fixture(14);
    for _ in 0..(MAX_DISPATCH_HISTORY + 50) {
        f.dispatcher.dispatch(&clean_report(), always(ResponseType::LogOnly));
    }
    let report = root_and_hooks();
    f.dispatcher.dispatch(&report, always(ResponseType::LogOnly));

    let stats = f.dispatcher.stats();
    assert_eq!(stats.total, MAX_DISPATCH_HISTORY);
    assert_eq!(stats.executed, 1);
    assert_eq!(stats.no_threats, MAX_DISPATCH_HISTORY - 1);

    let recent = f.dispatcher.recent(3);
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[2].report_id, report.id());
    assert!(recent[2].outcome.is_executed());
    assert_eq!(f.dispatcher.recent(10_000).len(), MAX_DISPATCH_HISTORY);
}
