//! Response Dispatcher
//!
//! Maps a report and the active policy to one action:
//! 1. no detected threat: nothing to do
//! 2. randomized trigger: skip the cycle when `roll >= p`
//! 3. run the action, then bump the counter of every detected type
//!
//! Process-ending actions are handed to the `TerminalScheduler` with a
//! random delay; the dispatcher itself never blocks on them.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;

use super::host::HostController;
use super::scheduler::{draw_delay, TerminalAction, TerminalScheduler};
use super::types::{DispatchOutcome, DispatchRecord, DispatchStats, ResponsePolicy, ResponseType};
use crate::constants::{
    FLAG_CORRUPT_DATA, FLAG_FAKE_SCREEN, FLAG_FEATURES_DISABLED, FLAG_RESPONSE_DELAY_MS,
    MAX_DISPATCH_HISTORY, RESPONSE_DELAY_MS, TRIGGER_BASE_PROBABILITY, TRIGGER_MAX_PROBABILITY,
    TRIGGER_STEP_PROBABILITY,
};
use crate::logic::detection;
use crate::logic::storage::SecureStateStore;
use crate::logic::threat::{SecurityReport, ThreatType};

/// `min(0.6 + 0.1 × recent, 0.9)`
pub fn trigger_probability(recent_threats: u64) -> f64 {
    (TRIGGER_BASE_PROBABILITY + TRIGGER_STEP_PROBABILITY * recent_threats as f64)
        .min(TRIGGER_MAX_PROBABILITY)
}

pub struct ResponseDispatcher {
    store: Arc<SecureStateStore>,
    host: Arc<dyn HostController>,
    scheduler: Arc<dyn TerminalScheduler>,
    rng: Mutex<StdRng>,
    history: Mutex<VecDeque<DispatchRecord>>,
}

impl ResponseDispatcher {
    pub fn new(
        store: Arc<SecureStateStore>,
        host: Arc<dyn HostController>,
        scheduler: Arc<dyn TerminalScheduler>,
    ) -> Self {
        Self {
            store,
            host,
            scheduler,
            rng: Mutex::new(StdRng::from_entropy()),
            history: Mutex::new(VecDeque::with_capacity(MAX_DISPATCH_HISTORY)),
        }
    }

    /// Deterministic randomness for tests
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn host(&self) -> &Arc<dyn HostController> {
        &self.host
    }

    /// Dispatch for `report` under `policy`. Never panics, never returns an error.
    pub fn dispatch(&self, report: &SecurityReport, policy: ResponsePolicy) -> DispatchOutcome {
        let outcome = match detection::isolate(|| self.dispatch_inner(report, policy)) {
            Ok(outcome) => outcome,
            Err(msg) => {
                log::error!("Response dispatch panicked: {}", msg);
                DispatchOutcome::Failed(format!("dispatch panicked: {}", msg))
            }
        };
        self.record(report, policy, outcome.clone());
        outcome
    }

    /// Manual trigger for one threat type; same path as a real report
    pub fn handle_threat(&self, kind: ThreatType, policy: ResponsePolicy) -> DispatchOutcome {
        let report = SecurityReport::single(kind, "manual trigger");
        self.dispatch(&report, policy)
    }

    fn dispatch_inner(&self, report: &SecurityReport, policy: ResponsePolicy) -> DispatchOutcome {
        let threats = report.detected_types();
        if threats.is_empty() {
            return DispatchOutcome::NoThreats;
        }

        if policy.randomized_trigger {
            let probability = trigger_probability(self.store.recent_threat_count());
            let roll: f64 = self.rng.lock().gen();
            if roll >= probability {
                log::info!(
                    "Response suppressed this cycle (p={:.2}, roll={:.3}): {}",
                    probability,
                    roll,
                    report.summary()
                );
                return DispatchOutcome::Suppressed { probability, roll };
            }
        }

        let response = policy.response_type;
        let result = self.execute(response, report);

        for &kind in &threats {
            self.store.record_threat(kind);
        }

        match result {
            Ok(scheduled_delay_ms) => {
                log::info!("Response '{}' executed for {} threat(s)", response, threats.len());
                DispatchOutcome::Executed {
                    response,
                    threats,
                    scheduled_delay_ms,
                }
            }
            Err(msg) => {
                log::error!("Response '{}' failed: {}", response, msg);
                DispatchOutcome::Failed(msg)
            }
        }
    }

    /// Run one response. Returns the delay of a scheduled terminal action.
    fn execute(&self, response: ResponseType, report: &SecurityReport) -> Result<Option<u64>, String> {
        match response {
            ResponseType::SilentMonitor => {
                log::debug!("Silent monitor: {}", report.summary());
                Ok(None)
            }
            ResponseType::LogOnly => {
                log::warn!("Threats detected: {}", report.summary());
                Ok(None)
            }
            ResponseType::FakeScreen => self.set_flag(FLAG_FAKE_SCREEN).map(|_| None),
            ResponseType::CorruptData => self.set_flag(FLAG_CORRUPT_DATA).map(|_| None),
            ResponseType::RandomBehavior => self.random_behavior().map(|_| None),
            ResponseType::ImmediateExit | ResponseType::DelayedExit => {
                let host = Arc::clone(&self.host);
                Ok(Some(self.schedule_terminal(response, move || host.exit(1))))
            }
            ResponseType::CrashApp => {
                let host = Arc::clone(&self.host);
                Ok(Some(self.schedule_terminal(response, move || host.crash())))
            }
            ResponseType::KillProcess => {
                let host = Arc::clone(&self.host);
                Ok(Some(self.schedule_terminal(response, move || host.kill())))
            }
            ResponseType::RestartApp => {
                let host = Arc::clone(&self.host);
                Ok(Some(self.schedule_terminal(response, move || match host.relaunch() {
                    Ok(()) => host.exit(0),
                    Err(e) => {
                        log::error!("{}; falling back to kill", e);
                        host.kill();
                    }
                })))
            }
            ResponseType::ClearData => {
                self.host.clear_data().map_err(|e| e.to_string())?;
                self.store.clear();
                log::warn!("Application data cleared");
                Ok(None)
            }
            ResponseType::DisableFeatures => self.set_flag(FLAG_FEATURES_DISABLED).map(|_| None),
        }
    }

    fn set_flag(&self, key: &str) -> Result<(), String> {
        self.store.put_bool(key, true).map_err(|e| e.to_string())?;
        log::info!("Flag {} set", key);
        Ok(())
    }

    /// Pick one deceptive behavior at random
    fn random_behavior(&self) -> Result<(), String> {
        let (choice, delay_ms) = {
            let mut rng = self.rng.lock();
            let (lo, hi) = RESPONSE_DELAY_MS;
            (rng.gen_range(0..3u8), rng.gen_range(lo..=hi))
        };
        match choice {
            0 => self.set_flag(FLAG_FAKE_SCREEN),
            1 => self.set_flag(FLAG_CORRUPT_DATA),
            _ => {
                self.store
                    .put_int(FLAG_RESPONSE_DELAY_MS, delay_ms as i64)
                    .map_err(|e| e.to_string())?;
                log::info!("Response delay set to {}ms", delay_ms);
                Ok(())
            }
        }
    }

    /// Flush state, then hand the action to the scheduler. Returns the delay in ms.
    fn schedule_terminal(&self, response: ResponseType, action: impl FnOnce() + Send + 'static) -> u64 {
        let window = response.delay_window_ms().unwrap_or((0, 0));
        let delay = draw_delay(&mut *self.rng.lock(), window);
        let store = Arc::clone(&self.store);
        let job: TerminalAction = Box::new(move || {
            if let Err(e) = store.flush() {
                log::error!("Failed to flush state before '{}': {}", response, e);
            }
            action();
        });
        log::warn!("Scheduling '{}' in {}ms", response, delay.as_millis());
        self.scheduler.schedule(delay, job);
        delay.as_millis() as u64
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    fn record(&self, report: &SecurityReport, policy: ResponsePolicy, outcome: DispatchOutcome) {
        let mut history = self.history.lock();
        if history.len() >= MAX_DISPATCH_HISTORY {
            history.pop_front();
        }
        history.push_back(DispatchRecord {
            timestamp: Utc::now(),
            report_id: report.id(),
            policy,
            outcome,
        });
    }

    /// Last `limit` dispatch records, oldest first
    pub fn recent(&self, limit: usize) -> Vec<DispatchRecord> {
        let history = self.history.lock();
        let start = history.len().saturating_sub(limit);
        history.iter().skip(start).cloned().collect()
    }

    pub fn stats(&self) -> DispatchStats {
        let history = self.history.lock();
        let mut stats = DispatchStats {
            total: history.len(),
            ..DispatchStats::default()
        };
        for record in history.iter() {
            match record.outcome {
                DispatchOutcome::NoThreats => stats.no_threats += 1,
                DispatchOutcome::Suppressed { .. } => stats.suppressed += 1,
                DispatchOutcome::Executed { .. } => stats.executed += 1,
                DispatchOutcome::Failed(_) => stats.failed += 1,
            }
        }
        stats
    }
}
