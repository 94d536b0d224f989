//! Detection Modules
//!
//! Six independent evaluators. Each one asks the platform provider for
//! primitive facts and turns them into a single `ThreatSignal`.
//!
//! # Components
//! - `debugger.rs`: tracer pid, platform query, ptrace attach, timing, debug ports, hardening
//! - `root.rs`: su binaries, root managers, writable system mounts, build props
//! - `emulator.rs`: build signatures, emulator files, NAT ranges, telephony (+ scored variant)
//! - `tamper.rs`: signing allow-list, segment hashes, rwx regions, core dumps, breakpoints, hardening
//! - `hook.rs`: instrumentation libraries, framework ports and processes, trampolines
//! - `behavioral.rs`: timing, analysis tools, ports, single-stepping, syscalls, resources (+ scored variant)
//! - `timing.rs`: shared timing statistics
//! - `indicators.rs`: indicator catalogues

pub mod behavioral;
pub mod debugger;
pub mod emulator;
pub mod hook;
pub mod indicators;
pub mod root;
pub mod tamper;
pub mod timing;

pub use behavioral::{BehaviorAssessment, BehaviorCategory, BehaviorIndicator, BehavioralDetector};
pub use debugger::DebuggerDetector;
pub use emulator::{EmulatorAssessment, EmulatorCategory, EmulatorDetector, EmulatorIndicator};
pub use hook::{HookDetector, HookFramework, HookMatch, HookReport, HookSource};
pub use root::RootDetector;
pub use tamper::TamperDetector;
pub use timing::{TimingAnomaly, TimingStats};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::logic::platform::{IntrospectionResult, PlatformIntrospectionProvider};
use crate::logic::threat::{ThreatSignal, ThreatType};

// ============================================================================
// DETECTOR CONTRACT
// ============================================================================

pub trait Detector: Send + Sync {
    fn kind(&self) -> ThreatType;

    /// Run every sub-check against the provider. Provider errors count as
    /// "not detected" for the sub-check that hit them.
    fn evaluate(&self, provider: &dyn PlatformIntrospectionProvider) -> ThreatSignal;
}

/// Run `f`, turning a panic into an error message
pub fn isolate<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Evaluate a detector without letting it take the caller down
pub fn guarded_evaluate(
    detector: &dyn Detector,
    provider: &dyn PlatformIntrospectionProvider,
) -> ThreatSignal {
    let kind = detector.kind();
    match isolate(|| detector.evaluate(provider)) {
        Ok(mut signal) => {
            signal.kind = kind;
            if signal.detected {
                log::warn!(
                    "[{}] threat detected: {}",
                    kind,
                    signal.evidence.as_deref().unwrap_or("no evidence")
                );
            }
            signal
        }
        Err(msg) => {
            log::error!("[{}] detector panicked: {}", kind, msg);
            ThreatSignal::failed(kind, format!("detector panicked: {}", msg))
        }
    }
}

// ============================================================================
// FINDINGS
// ============================================================================

/// Collects sub-check results for one evaluation
#[derive(Debug)]
pub(crate) struct Findings {
    kind: ThreatType,
    hits: Vec<String>,
    answered: usize,
    unavailable: Vec<&'static str>,
}

impl Findings {
    pub fn new(kind: ThreatType) -> Self {
        Self {
            kind,
            hits: Vec::new(),
            answered: 0,
            unavailable: Vec::new(),
        }
    }

    /// Unwrap a provider answer, recording the call as unavailable on error
    pub fn check<T>(&mut self, call: &'static str, result: IntrospectionResult<T>) -> Option<T> {
        match result {
            Ok(value) => {
                self.answered += 1;
                Some(value)
            }
            Err(e) => {
                log::debug!("[{}] {}", self.kind, e);
                if !self.unavailable.contains(&call) {
                    self.unavailable.push(call);
                }
                None
            }
        }
    }

    pub fn hit(&mut self, evidence: impl Into<String>) {
        self.hits.push(evidence.into());
    }

    pub fn is_hit(&self) -> bool {
        !self.hits.is_empty()
    }

    pub fn hits(&self) -> &[String] {
        &self.hits
    }

    /// Detected with the first hit as evidence. With no hits and no provider
    /// answer at all, the signal notes which calls were unavailable.
    pub fn into_signal(self) -> ThreatSignal {
        let extra = self.hits.len().saturating_sub(1);
        let mut hits = self.hits.into_iter();
        match hits.next() {
            Some(first) if extra > 0 => {
                ThreatSignal::detected(self.kind, format!("{} (+{} more)", first, extra))
            }
            Some(first) => ThreatSignal::detected(self.kind, first),
            None if self.answered == 0 && !self.unavailable.is_empty() => ThreatSignal::failed(
                self.kind,
                format!("introspection unavailable: {}", self.unavailable.join(", ")),
            ),
            None => ThreatSignal::clean(self.kind),
        }
    }
}
