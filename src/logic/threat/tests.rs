use super::aggregator::Aggregator;
use super::types::{SecurityReport, ThreatSignal, ThreatType};
use crate::logic::config::DetectionConfig;
use crate::logic::platform::{
    FakeProvider, FakeState, HardeningReport, HardeningStep, PlatformIntrospectionProvider,
    HARDEN_DUMPABLE, HARDEN_PTRACER,
};

fn aggregator() -> Aggregator {
    Aggregator::new(&DetectionConfig::default())
}

/// Panics inside a provider call
struct ExplodingProvider;

impl PlatformIntrospectionProvider for ExplodingProvider {
    fn tracer_status(&self) -> crate::logic::platform::IntrospectionResult<i64> {
        panic!("tracer_status exploded")
    }
    fn file_exists(&self, _path: &str) -> crate::logic::platform::IntrospectionResult<bool> {
        panic!("file_exists exploded")
    }
    fn list_loaded_modules(&self) -> crate::logic::platform::IntrospectionResult<Vec<String>> {
        panic!("list_loaded_modules exploded")
    }
    fn list_running_process_names(&self) -> crate::logic::platform::IntrospectionResult<Vec<String>> {
        panic!("list_running_process_names exploded")
    }
    fn probe_local_port(&self, _port: u16) -> crate::logic::platform::IntrospectionResult<bool> {
        panic!("probe_local_port exploded")
    }
    fn get_system_property(&self, _key: &str) -> crate::logic::platform::IntrospectionResult<Option<String>> {
        panic!("get_system_property exploded")
    }
    fn get_build_identifiers(
        &self,
    ) -> crate::logic::platform::IntrospectionResult<std::collections::HashMap<String, String>> {
        panic!("get_build_identifiers exploded")
    }
    fn get_memory_stats(&self) -> crate::logic::platform::IntrospectionResult<crate::logic::platform::MemoryStats> {
        panic!("get_memory_stats exploded")
    }
    fn get_cpu_ticks(&self) -> crate::logic::platform::IntrospectionResult<crate::logic::platform::CpuTicks> {
        panic!("get_cpu_ticks exploded")
    }
    fn sample_timing(&self, _count: usize) -> crate::logic::platform::IntrospectionResult<Vec<u64>> {
        panic!("sample_timing exploded")
    }
}

#[test]
fn test_clean_device_report_is_all_false() {
    let report = aggregator().run(&FakeProvider::clean());
    assert_eq!(report.signals().len(), 6);
    assert!(!report.has_threats());
    assert_eq!(report.threat_count(), 0);
    assert_eq!(report.summary(), "clean");
    for signal in report.signals() {
        assert_eq!(signal.evidence, None, "{:?}", signal);
    }
}

#[test]
fn test_signals_follow_fixed_order() {
    let report = aggregator().run(&FakeProvider::clean());
    let kinds: Vec<ThreatType> = report.signals().iter().map(|s| s.kind).collect();
    assert_eq!(kinds, ThreatType::ALL.to_vec());
}

#[test]
fn test_failing_provider_still_yields_six_signals() {
    let report = aggregator().run(&FakeProvider::failing());
    assert_eq!(report.signals().len(), 6);
    assert!(!report.has_threats());
    for signal in report.signals() {
        assert!(signal.evidence.as_deref().unwrap_or("").starts_with("check failed"));
    }
}

#[test]
fn test_panicking_provider_still_yields_six_signals() {
    let report = aggregator().run(&ExplodingProvider);
    assert_eq!(report.signals().len(), 6);
    assert_eq!(report.threat_count(), 0);
    assert!(report
        .signal(ThreatType::Debugger)
        .evidence
        .as_deref()
        .unwrap()
        .contains("panicked"));
}

#[test]
fn test_tracer_pid_flags_debugger_only() {
    let provider = FakeProvider::new(FakeState {
        tracer_pid: 1234,
        ..FakeState::clean()
    });
    let report = aggregator().run(&provider);
    assert!(report.is_detected(ThreatType::Debugger));
    assert_eq!(report.detected_types(), vec![ThreatType::Debugger]);
    assert_eq!(report.threat_count(), 1);
    assert!(report.has_threats());
}

#[test]
fn test_failed_hardening_steps_surface_in_report() {
    let report = HardeningReport {
        steps: vec![
            HardeningStep::failed(HARDEN_DUMPABLE, "PR_SET_DUMPABLE failed: Operation not permitted"),
            HardeningStep::failed(HARDEN_PTRACER, "PR_SET_PTRACER failed: Operation not permitted"),
        ],
    };
    let aggregator = aggregator().with_hardening(&report);
    let report = aggregator.run(&FakeProvider::clean());
    assert_eq!(
        report.detected_types(),
        vec![ThreatType::Debugger, ThreatType::Tampering]
    );
    assert!(report
        .signal(ThreatType::Tampering)
        .evidence
        .as_deref()
        .unwrap()
        .contains("prctl_dumpable"));
}

#[test]
fn test_multiple_threats_counted() {
    let provider = FakeProvider::clean();
    provider.update(|s| {
        s.files.insert("/sbin/su".to_string());
        s.loaded_modules.push("/data/local/tmp/frida-agent-64.so".to_string());
    });
    let report = aggregator().run(&provider);
    assert_eq!(report.detected_types(), vec![ThreatType::Root, ThreatType::Hooks]);
    assert!(report.summary().contains("root (root binary at /sbin/su)"));
}

#[test]
fn test_has_threats_matches_signals() {
    let clean = SecurityReport::from_fn(ThreatSignal::clean);
    assert!(!clean.has_threats());

    let single = SecurityReport::single(ThreatType::Emulator, "manual");
    assert!(single.has_threats());
    assert_eq!(single.threat_count(), 1);
    assert_eq!(single.signal(ThreatType::Emulator).evidence.as_deref(), Some("manual"));
}

#[test]
fn test_misfiled_signal_keeps_layout() {
    let report = SecurityReport::from_fn(|_| ThreatSignal::detected(ThreatType::Root, "x"));
    let kinds: Vec<ThreatType> = report.signals().iter().map(|s| s.kind).collect();
    assert_eq!(kinds, ThreatType::ALL.to_vec());
}

#[test]
fn test_report_serializes() {
    let report = SecurityReport::single(ThreatType::Hooks, "frida");
    let json = serde_json::to_string(&report).unwrap();
    let back: SecurityReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back, report);
}

#[test]
fn test_threat_type_names() {
    for kind in ThreatType::ALL {
        assert_eq!(ThreatType::from_str(kind.as_str()), Some(kind));
    }
    assert_eq!(ThreatType::from_str("SUSPICIOUS_BEHAVIOR"), Some(ThreatType::SuspiciousBehavior));
    assert_eq!(ThreatType::from_str("malware"), None);
}

#[test]
fn test_scored_variants_on_clean_device() {
    let provider = FakeProvider::clean();
    let aggregator = aggregator();
    assert!(!aggregator.emulator_assessment(&provider).is_emulator);
    assert!(!aggregator.hook_report(&provider).detected());
    assert!(!aggregator.behavior_assessment(&provider).is_suspicious);
}
