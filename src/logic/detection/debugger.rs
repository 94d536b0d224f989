//! Debugger Detection
//!
//! OR of independent checks; all of them run even after a hit:
//! - platform "debugger attached" query
//! - non-zero tracer pid
//! - a ptrace attach refused because a tracer already holds the process
//! - timing anomaly on the fixed workload
//! - remote debug ports listening locally
//! - debug environment flags
//! - the ptracer restriction failing at init

use super::indicators::{DEBUG_ENV_VARS, REMOTE_DEBUG_PORTS};
use super::timing;
use super::{Detector, Findings};
use crate::logic::config::{DetectionConfig, TimingThresholds};
use crate::logic::platform::{HardeningReport, PlatformIntrospectionProvider, HARDEN_PTRACER};
use crate::logic::threat::{ThreatSignal, ThreatType};

pub struct DebuggerDetector {
    samples: usize,
    thresholds: TimingThresholds,
    hardening_failure: Option<String>,
}

impl DebuggerDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            samples: config.timing_samples,
            thresholds: config.debugger_timing,
            hardening_failure: None,
        }
    }

    /// Report a failed ptracer restriction on every evaluation
    pub fn with_hardening(mut self, report: &HardeningReport) -> Self {
        self.hardening_failure = report
            .failure(HARDEN_PTRACER)
            .map(|step| format!("hardening step {} failed: {}", step.name, step.detail));
        self
    }
}

fn is_set(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "0" | "false" | "no" | "off")
}

impl Detector for DebuggerDetector {
    fn kind(&self) -> ThreatType {
        ThreatType::Debugger
    }

    fn evaluate(&self, provider: &dyn PlatformIntrospectionProvider) -> ThreatSignal {
        let mut findings = Findings::new(self.kind());

        if let Some(true) = findings.check("is_debugger_attached", provider.is_debugger_attached()) {
            findings.hit("platform reports a debugger attached");
        }

        if let Some(pid) = findings.check("tracer_status", provider.tracer_status()) {
            if pid != 0 {
                findings.hit(format!("tracer pid {}", pid));
            }
        }

        if let Some(true) = findings.check("ptrace_attach_denied", provider.ptrace_attach_denied()) {
            findings.hit("ptrace attach refused, process already traced");
        }

        if let Some(samples) = findings.check("sample_timing", provider.sample_timing(self.samples)) {
            if let Some(anomaly) = timing::analyze_samples(&samples, &self.thresholds) {
                findings.hit(format!("timing anomaly: {}", anomaly));
            }
        }

        for &port in REMOTE_DEBUG_PORTS {
            if let Some(true) = findings.check("probe_local_port", provider.probe_local_port(port)) {
                findings.hit(format!("remote debug port {} open", port));
            }
        }

        for &name in DEBUG_ENV_VARS {
            if let Some(Some(value)) =
                findings.check("get_environment_variable", provider.get_environment_variable(name))
            {
                if is_set(&value) {
                    findings.hit(format!("debug flag {} set", name));
                }
            }
        }

        if let Some(failure) = &self.hardening_failure {
            findings.hit(failure.clone());
        }

        findings.into_signal()
    }
}
