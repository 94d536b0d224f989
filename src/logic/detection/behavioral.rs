//! Behavioral Analysis
//!
//! Runtime anomalies that point to an analysis session rather than to a
//! specific tool. Like the emulator module it has an OR view (`evaluate`)
//! and a weighted view (`advanced_analysis`).
//!
//! The process-list scan is the expensive part, so it runs at most once per
//! configured interval; in between, the last result is reused.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::indicators::{ANALYSIS_TOOLS, SUSPICIOUS_PORTS, TRACE_SYSCALLS};
use super::timing;
use super::{Detector, Findings};
use crate::logic::config::{BehaviorWeights, DetectionConfig, SingleStepConfig, TimingThresholds};
use crate::logic::platform::PlatformIntrospectionProvider;
use crate::logic::threat::{ThreatSignal, ThreatType};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BehaviorCategory {
    Timing,
    Process,
    Ports,
    SingleStep,
    Syscalls,
    Memory,
    Cpu,
}

impl BehaviorCategory {
    pub fn weight(&self, weights: &BehaviorWeights) -> u32 {
        match self {
            BehaviorCategory::Timing => weights.timing,
            BehaviorCategory::Process => weights.process,
            BehaviorCategory::Ports => weights.ports,
            BehaviorCategory::SingleStep => weights.single_step,
            BehaviorCategory::Syscalls => weights.syscalls,
            BehaviorCategory::Memory => weights.memory,
            BehaviorCategory::Cpu => weights.cpu,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorIndicator {
    pub category: BehaviorCategory,
    pub weight: u32,
    pub evidence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorAssessment {
    pub score: u32,
    pub threshold: u32,
    pub indicators: Vec<BehaviorIndicator>,
    pub is_suspicious: bool,
}

/// Cached outcome of the rate-limited process scan
#[derive(Debug, Default)]
struct ProcessScan {
    last_run: Option<Instant>,
    last_result: Option<String>,
}

// ============================================================================
// DETECTOR
// ============================================================================

pub struct BehavioralDetector {
    samples: usize,
    timing: TimingThresholds,
    single_step: SingleStepConfig,
    process_interval: Duration,
    min_resident_ratio: f64,
    max_virtual_kb: u64,
    max_cpu_ticks: u64,
    weights: BehaviorWeights,
    process_scan: Mutex<ProcessScan>,
}

impl BehavioralDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            samples: config.timing_samples,
            timing: config.behavior_timing,
            single_step: config.single_step,
            process_interval: config.process_check_interval(),
            min_resident_ratio: config.min_resident_ratio,
            max_virtual_kb: config.max_virtual_kb,
            max_cpu_ticks: config.max_cpu_ticks,
            weights: config.behavior_weights,
            process_scan: Mutex::new(ProcessScan::default()),
        }
    }

    /// Weighted score over all categories
    pub fn advanced_analysis(&self, provider: &dyn PlatformIntrospectionProvider) -> BehaviorAssessment {
        let mut findings = Findings::new(ThreatType::SuspiciousBehavior);
        let indicators = self.collect(provider, &mut findings);
        let score = indicators.iter().map(|i| i.weight).sum();
        BehaviorAssessment {
            score,
            threshold: self.weights.threshold,
            is_suspicious: score >= self.weights.threshold,
            indicators,
        }
    }

    fn collect(
        &self,
        provider: &dyn PlatformIntrospectionProvider,
        findings: &mut Findings,
    ) -> Vec<BehaviorIndicator> {
        let checks = [
            (BehaviorCategory::Timing, self.timing_anomaly(provider, findings)),
            (BehaviorCategory::Process, self.analysis_process(provider, findings)),
            (BehaviorCategory::Ports, suspicious_port(provider, findings)),
            (BehaviorCategory::SingleStep, self.single_stepping(provider, findings)),
            (BehaviorCategory::Syscalls, traced_syscall(provider, findings)),
            (BehaviorCategory::Memory, self.memory_anomaly(provider, findings)),
            (BehaviorCategory::Cpu, self.cpu_anomaly(provider, findings)),
        ];

        checks
            .into_iter()
            .filter_map(|(category, evidence)| {
                evidence.map(|evidence| BehaviorIndicator {
                    category,
                    weight: category.weight(&self.weights),
                    evidence,
                })
            })
            .collect()
    }

    fn timing_anomaly(&self, provider: &dyn PlatformIntrospectionProvider, findings: &mut Findings) -> Option<String> {
        let samples = findings.check("sample_timing", provider.sample_timing(self.samples))?;
        timing::analyze_samples(&samples, &self.timing).map(|a| format!("timing anomaly: {}", a))
    }

    fn single_stepping(&self, provider: &dyn PlatformIntrospectionProvider, findings: &mut Findings) -> Option<String> {
        let samples = findings.check("sample_timing", provider.sample_timing(self.samples))?;
        timing::is_single_stepping(&samples, &self.single_step)
            .then(|| "uniformly slowed execution (single-stepping)".to_string())
    }

    fn analysis_process(&self, provider: &dyn PlatformIntrospectionProvider, findings: &mut Findings) -> Option<String> {
        let mut scan = self.process_scan.lock();
        if let Some(last) = scan.last_run {
            if last.elapsed() < self.process_interval {
                return scan.last_result.clone();
            }
        }

        let processes = findings.check("list_running_process_names", provider.list_running_process_names())?;
        let result = processes.iter().find_map(|name| {
            let lower = name.to_ascii_lowercase();
            ANALYSIS_TOOLS
                .iter()
                .any(|tool| lower == *tool)
                .then(|| format!("analysis tool {} running", name))
        });
        scan.last_run = Some(Instant::now());
        scan.last_result = result.clone();
        result
    }

    fn memory_anomaly(&self, provider: &dyn PlatformIntrospectionProvider, findings: &mut Findings) -> Option<String> {
        let memory = findings.check("get_memory_stats", provider.get_memory_stats())?;
        if memory.virtual_kb == 0 {
            return None;
        }
        if memory.virtual_kb > self.max_virtual_kb {
            return Some(format!("virtual size {} kB", memory.virtual_kb));
        }
        let ratio = memory.resident_kb as f64 / memory.virtual_kb as f64;
        (ratio < self.min_resident_ratio).then(|| format!("resident/virtual ratio {:.4}", ratio))
    }

    fn cpu_anomaly(&self, provider: &dyn PlatformIntrospectionProvider, findings: &mut Findings) -> Option<String> {
        let ticks = findings.check("get_cpu_ticks", provider.get_cpu_ticks())?;
        (ticks.total() > self.max_cpu_ticks).then(|| format!("cpu time {} ticks", ticks.total()))
    }
}

fn suspicious_port(provider: &dyn PlatformIntrospectionProvider, findings: &mut Findings) -> Option<String> {
    let mut found = None;
    for &port in SUSPICIOUS_PORTS {
        if let Some(true) = findings.check("probe_local_port", provider.probe_local_port(port)) {
            found.get_or_insert_with(|| format!("suspicious port {} open", port));
        }
    }
    found
}

fn traced_syscall(provider: &dyn PlatformIntrospectionProvider, findings: &mut Findings) -> Option<String> {
    let name = findings.check("get_last_syscall_name", provider.get_last_syscall_name())??;
    TRACE_SYSCALLS
        .iter()
        .any(|s| name == *s)
        .then(|| format!("last syscall {}", name))
}

impl Detector for BehavioralDetector {
    fn kind(&self) -> ThreatType {
        ThreatType::SuspiciousBehavior
    }

    fn evaluate(&self, provider: &dyn PlatformIntrospectionProvider) -> ThreatSignal {
        let mut findings = Findings::new(self.kind());
        for indicator in self.collect(provider, &mut findings) {
            findings.hit(indicator.evidence);
        }
        findings.into_signal()
    }
}
