//! Aggregator
//!
//! Runs the six detectors one after another and builds the report. Nothing
//! here writes state; the only side effects are provider calls.

use super::types::{SecurityReport, ThreatSignal, ThreatType};
use crate::logic::config::DetectionConfig;
use crate::logic::detection::{
    self, BehaviorAssessment, BehavioralDetector, DebuggerDetector, Detector, EmulatorAssessment,
    EmulatorDetector, HookDetector, HookReport, RootDetector, TamperDetector,
};
use crate::logic::platform::{HardeningReport, PlatformIntrospectionProvider};

pub struct Aggregator {
    debugger: DebuggerDetector,
    root: RootDetector,
    emulator: EmulatorDetector,
    tamper: TamperDetector,
    hook: HookDetector,
    behavioral: BehavioralDetector,
}

impl Aggregator {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            debugger: DebuggerDetector::new(config),
            root: RootDetector::new(),
            emulator: EmulatorDetector::new(config),
            tamper: TamperDetector::new(config),
            hook: HookDetector::new(),
            behavioral: BehavioralDetector::new(config),
        }
    }

    /// Carry failed init-time hardening steps into the debugger and tamper signals
    pub fn with_hardening(self, report: &HardeningReport) -> Self {
        Self {
            debugger: self.debugger.with_hardening(report),
            tamper: self.tamper.with_hardening(report),
            ..self
        }
    }

    fn detector(&self, kind: ThreatType) -> &dyn Detector {
        match kind {
            ThreatType::Debugger => &self.debugger,
            ThreatType::Root => &self.root,
            ThreatType::Emulator => &self.emulator,
            ThreatType::Tampering => &self.tamper,
            ThreatType::Hooks => &self.hook,
            ThreatType::SuspiciousBehavior => &self.behavioral,
        }
    }

    /// Full check: one signal per threat type, in fixed order
    pub fn run(&self, provider: &dyn PlatformIntrospectionProvider) -> SecurityReport {
        let report = SecurityReport::from_fn(|kind| self.evaluate_one(kind, provider));
        if report.has_threats() {
            log::warn!(
                "Security check {}: {} threat(s): {}",
                report.id(),
                report.threat_count(),
                report.summary()
            );
        } else {
            log::debug!("Security check {}: clean", report.id());
        }
        report
    }

    /// Single detector, isolated like in `run`
    pub fn evaluate_one(
        &self,
        kind: ThreatType,
        provider: &dyn PlatformIntrospectionProvider,
    ) -> ThreatSignal {
        detection::guarded_evaluate(self.detector(kind), provider)
    }

    // ------------------------------------------------------------------
    // Scored / detailed variants (diagnostics only)
    // ------------------------------------------------------------------

    pub fn emulator_assessment(&self, provider: &dyn PlatformIntrospectionProvider) -> EmulatorAssessment {
        detection::isolate(|| self.emulator.advanced_check(provider)).unwrap_or_else(|msg| {
            log::error!("[emulator] scored check panicked: {}", msg);
            EmulatorAssessment::default()
        })
    }

    pub fn hook_report(&self, provider: &dyn PlatformIntrospectionProvider) -> HookReport {
        detection::isolate(|| self.hook.advanced_check(provider)).unwrap_or_else(|msg| {
            log::error!("[hooks] detailed check panicked: {}", msg);
            HookReport::default()
        })
    }

    pub fn behavior_assessment(&self, provider: &dyn PlatformIntrospectionProvider) -> BehaviorAssessment {
        detection::isolate(|| self.behavioral.advanced_analysis(provider)).unwrap_or_else(|msg| {
            log::error!("[suspicious_behavior] scored analysis panicked: {}", msg);
            BehaviorAssessment::default()
        })
    }
}
