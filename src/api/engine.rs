//! Engine
//!
//! The one object a host application owns. Wires the provider, detectors,
//! secure store, dispatcher and monitor together and guards every call
//! against use before `init`.
//!
//! ## Usage
//! ```ignore
//! let engine = Engine::new(EngineConfig::from_env());
//! engine.init(Arc::new(LinuxProvider::new()), true)?;
//! let report = engine.perform_security_check()?;
//! engine.cleanup();
//! ```

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use super::engine_status::EngineStatus;
use crate::constants::{ENGINE_NAME, ENGINE_VERSION};
use crate::logic::config::EngineConfig;
use crate::logic::detection::{self, BehaviorAssessment, EmulatorAssessment, HookReport};
use crate::logic::monitor::ContinuousMonitor;
use crate::logic::platform::{HardeningReport, PlatformIntrospectionProvider};
use crate::logic::response::{
    DispatchOutcome, DispatchRecord, DispatchStats, HostController, PolicyError,
    ProcessHostController, ResponseDispatcher, ResponsePolicy, ResponseType, TerminalScheduler,
    ThreadScheduler,
};
use crate::logic::storage::{MasterKey, SecureStateStore};
use crate::logic::threat::{Aggregator, SecurityReport, ThreatType};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("engine not initialized")]
    NotInitialized,

    #[error("engine already initialized")]
    AlreadyInitialized,
}

/// Check `policy` against what `host` can do
pub fn validate_policy(
    host: &dyn HostController,
    policy: ResponsePolicy,
) -> Result<ResponsePolicy, PolicyError> {
    if host.supports(policy.response_type) {
        Ok(policy)
    } else {
        Err(PolicyError::UnsupportedByHost(policy.response_type))
    }
}

fn effective_policy(host: &dyn HostController, policy: ResponsePolicy) -> ResponsePolicy {
    validate_policy(host, policy).unwrap_or_else(|e| {
        log::warn!("{}; falling back to silent monitoring", e);
        ResponsePolicy::silent()
    })
}

// ============================================================================
// CORE
// ============================================================================

/// Everything that exists between `init` and `cleanup`
struct EngineCore {
    provider: Arc<dyn PlatformIntrospectionProvider>,
    aggregator: Aggregator,
    store: Arc<SecureStateStore>,
    dispatcher: ResponseDispatcher,
    policy: RwLock<ResponsePolicy>,
    hardening: HardeningReport,
}

impl EngineCore {
    /// One full cycle: aggregate, then dispatch under the current policy
    fn check_and_respond(&self) -> SecurityReport {
        let report = self.aggregator.run(self.provider.as_ref());
        let policy = *self.policy.read();
        self.dispatcher.dispatch(&report, policy);
        report
    }

    fn signal(&self, kind: ThreatType) -> bool {
        self.aggregator
            .evaluate_one(kind, self.provider.as_ref())
            .detected
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct Engine {
    config: EngineConfig,
    host: Arc<dyn HostController>,
    scheduler: Arc<dyn TerminalScheduler>,
    seed: Option<u64>,
    core: RwLock<Option<Arc<EngineCore>>>,
    monitor: Mutex<Option<ContinuousMonitor>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            host: Arc::new(ProcessHostController::new()),
            scheduler: Arc::new(ThreadScheduler::new()),
            seed: None,
            core: RwLock::new(None),
            monitor: Mutex::new(None),
        }
    }

    /// Replace the process-level host (exit, kill, relaunch...)
    pub fn with_host(mut self, host: Arc<dyn HostController>) -> Self {
        self.host = host;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn TerminalScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Seed the dispatcher randomness
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn init(
        &self,
        provider: Arc<dyn PlatformIntrospectionProvider>,
        continuous_monitoring: bool,
    ) -> Result<(), EngineError> {
        let mut slot = self.core.write();
        if slot.is_some() {
            return Err(EngineError::AlreadyInitialized);
        }

        let hardening = self.harden(provider.as_ref());
        let key = self.state_key(provider.as_ref());
        let store = Arc::new(self.open_store(&key));

        let mut dispatcher =
            ResponseDispatcher::new(Arc::clone(&store), Arc::clone(&self.host), Arc::clone(&self.scheduler));
        if let Some(seed) = self.seed {
            dispatcher = dispatcher.with_seed(seed);
        }

        let policy = effective_policy(self.host.as_ref(), self.config.response);
        let core = Arc::new(EngineCore {
            provider,
            aggregator: Aggregator::new(&self.config.detection).with_hardening(&hardening),
            store,
            dispatcher,
            policy: RwLock::new(policy),
            hardening,
        });

        if continuous_monitoring {
            self.start_monitor(&core);
        }
        *slot = Some(core);

        log::info!(
            "{} v{} initialized (response: {}, randomized: {}, monitoring: {})",
            ENGINE_NAME,
            ENGINE_VERSION,
            policy.response_type,
            policy.randomized_trigger,
            continuous_monitoring
        );
        Ok(())
    }

    /// Apply provider hardening once; unsupported or failed calls yield an empty report
    fn harden(&self, provider: &dyn PlatformIntrospectionProvider) -> HardeningReport {
        if !self.config.harden_process {
            return HardeningReport::default();
        }
        let report = match detection::isolate(|| provider.harden_process()) {
            Ok(Ok(report)) => report,
            Ok(Err(e)) if e.is_unsupported() => {
                log::debug!("Process hardening unavailable: {}", e);
                return HardeningReport::default();
            }
            Ok(Err(e)) => {
                log::warn!("Process hardening failed: {}", e);
                return HardeningReport::default();
            }
            Err(msg) => {
                log::error!("Process hardening panicked: {}", msg);
                return HardeningReport::default();
            }
        };
        for step in &report.steps {
            log::info!("Hardening {}: {:?} ({})", step.name, step.status, step.detail);
        }
        if report.has_failures() {
            log::warn!("Hardening steps failed: {}", report.failed_step_names().join(", "));
        }
        report
    }

    fn state_key(&self, provider: &dyn PlatformIntrospectionProvider) -> MasterKey {
        if let Some(material) = &self.config.state_key {
            return MasterKey::derive(material.as_bytes());
        }
        let build = match detection::isolate(|| provider.get_build_identifiers()) {
            Ok(Ok(build)) => build,
            Ok(Err(e)) => {
                log::warn!("Build identifiers unavailable for state key: {}", e);
                HashMap::new()
            }
            Err(msg) => {
                log::warn!("Build identifiers lookup panicked: {}", msg);
                HashMap::new()
            }
        };
        MasterKey::from_device(&build)
    }

    fn open_store(&self, key: &MasterKey) -> SecureStateStore {
        let store = match &self.config.state_path {
            None => SecureStateStore::in_memory(key),
            Some(path) => SecureStateStore::open(path, key).unwrap_or_else(|e| {
                log::warn!("Secure state unavailable ({}), using in-memory store", e);
                SecureStateStore::in_memory(key)
            }),
        };
        store.with_recent_window(self.config.recent_threat_window())
    }

    fn start_monitor(&self, core: &Arc<EngineCore>) {
        let weak: Weak<EngineCore> = Arc::downgrade(core);
        let started = ContinuousMonitor::start(&self.config.monitor, move || {
            if let Some(core) = weak.upgrade() {
                core.check_and_respond();
            }
        });
        match started {
            Ok(monitor) => *self.monitor.lock() = Some(monitor),
            Err(e) => log::error!("Failed to start continuous monitoring: {}", e),
        }
    }

    /// Stop monitoring and flush state. Safe to call repeatedly and from any
    /// thread; scheduled terminal actions are left to run.
    pub fn cleanup(&self) {
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.stop();
        }
        let Some(core) = self.core.write().take() else {
            return;
        };
        if let Err(e) = core.store.flush() {
            log::error!("Failed to flush secure state: {}", e);
        }
        log::info!("RASP engine cleaned up");
    }

    pub fn is_initialized(&self) -> bool {
        self.core.read().is_some()
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .map(|m| m.is_running())
            .unwrap_or(false)
    }

    fn core(&self) -> Result<Arc<EngineCore>, EngineError> {
        self.core.read().clone().ok_or(EngineError::NotInitialized)
    }

    // ------------------------------------------------------------------
    // Checks
    // ------------------------------------------------------------------

    /// Run all six detectors and dispatch the active response
    pub fn perform_security_check(&self) -> Result<SecurityReport, EngineError> {
        Ok(self.core()?.check_and_respond())
    }

    pub fn is_debugger_attached(&self) -> Result<bool, EngineError> {
        Ok(self.core()?.signal(ThreatType::Debugger))
    }

    pub fn is_device_rooted(&self) -> Result<bool, EngineError> {
        Ok(self.core()?.signal(ThreatType::Root))
    }

    pub fn is_running_on_emulator(&self) -> Result<bool, EngineError> {
        Ok(self.core()?.signal(ThreatType::Emulator))
    }

    pub fn is_application_tampered(&self) -> Result<bool, EngineError> {
        Ok(self.core()?.signal(ThreatType::Tampering))
    }

    pub fn are_hooks_detected(&self) -> Result<bool, EngineError> {
        Ok(self.core()?.signal(ThreatType::Hooks))
    }

    pub fn is_suspicious_behavior(&self) -> Result<bool, EngineError> {
        Ok(self.core()?.signal(ThreatType::SuspiciousBehavior))
    }

    /// Weighted emulator score
    pub fn emulator_assessment(&self) -> Result<EmulatorAssessment, EngineError> {
        let core = self.core()?;
        Ok(core.aggregator.emulator_assessment(core.provider.as_ref()))
    }

    /// Which hook frameworks matched, and where
    pub fn hook_report(&self) -> Result<HookReport, EngineError> {
        let core = self.core()?;
        Ok(core.aggregator.hook_report(core.provider.as_ref()))
    }

    /// Weighted behavioral score
    pub fn behavior_assessment(&self) -> Result<BehaviorAssessment, EngineError> {
        let core = self.core()?;
        Ok(core.aggregator.behavior_assessment(core.provider.as_ref()))
    }

    // ------------------------------------------------------------------
    // Response
    // ------------------------------------------------------------------

    /// Replace the active policy. Returns the policy now in effect, which is
    /// silent monitoring when the host cannot carry out `policy`.
    pub fn configure_response(&self, policy: ResponsePolicy) -> Result<ResponsePolicy, EngineError> {
        let core = self.core()?;
        let policy = effective_policy(self.host.as_ref(), policy);
        *core.policy.write() = policy;
        log::info!(
            "Response policy set to {} (randomized: {})",
            policy.response_type,
            policy.randomized_trigger
        );
        Ok(policy)
    }

    /// `configure_response` for a response name such as `"delayed_exit"`
    pub fn configure_response_by_name(
        &self,
        name: &str,
        randomized_trigger: bool,
    ) -> Result<ResponsePolicy, EngineError> {
        let policy = match ResponseType::from_str(name) {
            Some(response_type) => ResponsePolicy::new(response_type, randomized_trigger),
            None => {
                log::warn!(
                    "{}; falling back to silent monitoring",
                    PolicyError::UnknownResponseType(name.to_string())
                );
                ResponsePolicy::silent()
            }
        };
        self.configure_response(policy)
    }

    pub fn response_policy(&self) -> Result<ResponsePolicy, EngineError> {
        Ok(*self.core()?.policy.read())
    }

    /// Manual trigger for `kind`, without running the detectors
    pub fn handle_threat(&self, kind: ThreatType) -> Result<DispatchOutcome, EngineError> {
        let core = self.core()?;
        let policy = *core.policy.read();
        Ok(core.dispatcher.handle_threat(kind, policy))
    }

    pub fn dispatch_history(&self, limit: usize) -> Result<Vec<DispatchRecord>, EngineError> {
        Ok(self.core()?.dispatcher.recent(limit))
    }

    pub fn dispatch_stats(&self) -> Result<DispatchStats, EngineError> {
        Ok(self.core()?.dispatcher.stats())
    }

    // ------------------------------------------------------------------
    // State
    // ------------------------------------------------------------------

    pub fn secure_store(&self) -> Result<Arc<SecureStateStore>, EngineError> {
        Ok(Arc::clone(&self.core()?.store))
    }

    /// Outcome of the hardening applied during `init`
    pub fn hardening_report(&self) -> Result<HardeningReport, EngineError> {
        Ok(self.core()?.hardening.clone())
    }

    pub fn status(&self) -> EngineStatus {
        let core = self.core.read().clone();
        EngineStatus {
            version: ENGINE_VERSION.to_string(),
            initialized: core.is_some(),
            monitoring: self.is_monitoring(),
            policy: core.as_ref().map(|c| *c.policy.read()),
            recent_threats: core
                .as_ref()
                .map(|c| c.store.recent_threat_count())
                .unwrap_or(0),
            persistent: core
                .as_ref()
                .map(|c| c.store.path().is_some())
                .unwrap_or(false),
            hardening_failures: core
                .as_ref()
                .map(|c| {
                    c.hardening
                        .failed_step_names()
                        .into_iter()
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            dispatch: core.map(|c| c.dispatcher.stats()).unwrap_or_default(),
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cleanup();
    }
}
