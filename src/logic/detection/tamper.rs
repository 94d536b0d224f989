//! Tamper Detection
//!
//! - signing certificate against an allow-list (skipped when the list is empty)
//! - SHA-256 of named code segments against expected digests
//! - too many writable+executable memory regions
//! - the OS refusing to disable core dumps
//! - a software breakpoint at the start of a known-good function
//! - the dumpable hardening step failing at init

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::{Detector, Findings};
use crate::logic::config::DetectionConfig;
use crate::logic::platform::{
    CodeArch, FunctionPrologue, HardeningReport, PlatformIntrospectionProvider, HARDEN_DUMPABLE,
};
use crate::logic::threat::{ThreatSignal, ThreatType};

pub struct TamperDetector {
    expected_signatures: Vec<String>,
    expected_segments: BTreeMap<String, String>,
    max_writable_exec_regions: usize,
    hardening_failure: Option<String>,
}

/// Lowercase hex without separators
fn normalize_fingerprint(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn le_word(bytes: &[u8]) -> Option<u32> {
    let word: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(word))
}

/// Breakpoint instruction at the first byte/word of the prologue
pub fn breakpoint_at_entry(prologue: &FunctionPrologue) -> Option<&'static str> {
    match prologue.arch {
        CodeArch::X86 | CodeArch::X86_64 => (prologue.bytes.first() == Some(&0xCC)).then_some("INT3"),
        // BKPT #imm16
        CodeArch::Arm => le_word(&prologue.bytes)
            .filter(|w| w & 0xFFF0_00F0 == 0xE120_0070)
            .map(|_| "BKPT"),
        // BRK #imm16
        CodeArch::Aarch64 => le_word(&prologue.bytes)
            .filter(|w| w & 0xFFE0_001F == 0xD420_0000)
            .map(|_| "BRK"),
        CodeArch::Other => None,
    }
}

impl TamperDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            expected_signatures: config
                .expected_signatures
                .iter()
                .map(|s| normalize_fingerprint(s))
                .filter(|s| !s.is_empty())
                .collect(),
            expected_segments: config
                .expected_segment_hashes
                .iter()
                .map(|(name, digest)| (name.clone(), digest.trim().to_ascii_lowercase()))
                .collect(),
            max_writable_exec_regions: config.max_writable_exec_regions,
            hardening_failure: None,
        }
    }

    pub fn with_hardening(mut self, report: &HardeningReport) -> Self {
        self.hardening_failure = report
            .failure(HARDEN_DUMPABLE)
            .map(|step| format!("hardening step {} failed: {}", step.name, step.detail));
        self
    }

    fn check_signature(&self, provider: &dyn PlatformIntrospectionProvider, findings: &mut Findings) {
        if self.expected_signatures.is_empty() {
            return;
        }
        let Some(fingerprints) =
            findings.check("get_signing_fingerprints", provider.get_signing_fingerprints())
        else {
            return;
        };
        if fingerprints.is_empty() {
            findings.hit("binary carries no signing certificate");
            return;
        }
        let trusted = fingerprints
            .iter()
            .map(|f| normalize_fingerprint(f))
            .any(|f| self.expected_signatures.contains(&f));
        if !trusted {
            findings.hit("signing certificate not in allow-list");
        }
    }

    fn check_segments(&self, provider: &dyn PlatformIntrospectionProvider, findings: &mut Findings) {
        for (name, expected) in &self.expected_segments {
            if let Some(bytes) = findings.check("read_code_segment", provider.read_code_segment(name)) {
                let actual = hex::encode(Sha256::digest(&bytes));
                if &actual != expected {
                    findings.hit(format!("code segment '{}' hash mismatch", name));
                }
            }
        }
    }
}

impl Detector for TamperDetector {
    fn kind(&self) -> ThreatType {
        ThreatType::Tampering
    }

    fn evaluate(&self, provider: &dyn PlatformIntrospectionProvider) -> ThreatSignal {
        let mut findings = Findings::new(self.kind());

        self.check_signature(provider, &mut findings);
        self.check_segments(provider, &mut findings);

        if let Some(regions) = findings.check("list_memory_regions", provider.list_memory_regions()) {
            let rwx = regions.iter().filter(|r| r.is_writable_executable()).count();
            if rwx > self.max_writable_exec_regions {
                findings.hit(format!("{} writable+executable regions", rwx));
            }
        }

        if let Some(false) = findings.check("disable_core_dumps", provider.disable_core_dumps()) {
            findings.hit("core dumps could not be disabled");
        }

        if let Some(prologue) = findings.check("read_function_prologue", provider.read_function_prologue()) {
            if let Some(instruction) = breakpoint_at_entry(&prologue) {
                findings.hit(format!("{} breakpoint at function entry", instruction));
            }
        }

        if let Some(failure) = &self.hardening_failure {
            findings.hit(failure.clone());
        }

        findings.into_signal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::platform::{FakeProvider, HardeningStep, MemoryRegion};

    const CERT: &str = "AB:CD:EF:01:23:45:67:89";

    fn detector_with(f: impl FnOnce(&mut DetectionConfig)) -> TamperDetector {
        let mut config = DetectionConfig::default();
        f(&mut config);
        TamperDetector::new(&config)
    }

    #[test]
    fn test_clean_device() {
        let signal = detector_with(|_| {}).evaluate(&FakeProvider::clean());
        assert!(!signal.detected, "{:?}", signal.evidence);
    }

    #[test]
    fn test_signature_allow_list() {
        let detector = detector_with(|c| c.expected_signatures = vec![CERT.to_string()]);
        let provider = FakeProvider::clean();

        provider.update(|s| s.fingerprints = vec!["abcdef0123456789".to_string()]);
        assert!(!detector.evaluate(&provider).detected);

        provider.update(|s| s.fingerprints = vec!["ffff".to_string()]);
        assert!(detector.evaluate(&provider).detected);

        provider.update(|s| s.fingerprints.clear());
        assert!(detector.evaluate(&provider).detected);
    }

    #[test]
    fn test_segment_hash_mismatch() {
        let code = vec![0x90u8; 64];
        let digest = hex::encode(Sha256::digest(&code));
        let detector = detector_with(|c| {
            c.expected_segment_hashes.insert("text".to_string(), digest.to_uppercase());
        });
        let provider = FakeProvider::clean();
        provider.update(|s| {
            s.segments.insert("text".to_string(), code.clone());
        });
        assert!(!detector.evaluate(&provider).detected);

        provider.update(|s| {
            s.segments.get_mut("text").unwrap()[3] = 0xCC;
        });
        let signal = detector.evaluate(&provider);
        assert_eq!(signal.evidence.as_deref(), Some("code segment 'text' hash mismatch"));
    }

    #[test]
    fn test_rwx_region_threshold() {
        let provider = FakeProvider::clean();
        provider.update(|s| s.regions = vec![MemoryRegion::new("rwxp", None); 5]);
        assert!(!detector_with(|_| {}).evaluate(&provider).detected);

        provider.update(|s| s.regions.push(MemoryRegion::new("rwxp", None)));
        let signal = detector_with(|_| {}).evaluate(&provider);
        assert_eq!(signal.evidence.as_deref(), Some("6 writable+executable regions"));
    }

    #[test]
    fn test_core_dump_refusal() {
        let provider = FakeProvider::clean();
        provider.update(|s| s.core_dump_disable_fails = true);
        assert!(detector_with(|_| {}).evaluate(&provider).detected);
    }

    #[test]
    fn test_failed_dumpable_hardening_is_tamper() {
        let report = HardeningReport {
            steps: vec![HardeningStep::failed(HARDEN_DUMPABLE, "PR_SET_DUMPABLE failed: Invalid argument")],
        };
        let detector = detector_with(|_| {}).with_hardening(&report);
        let signal = detector.evaluate(&FakeProvider::clean());
        assert_eq!(
            signal.evidence.as_deref(),
            Some("hardening step prctl_dumpable failed: PR_SET_DUMPABLE failed: Invalid argument")
        );
    }

    #[test]
    fn test_failing_provider_is_not_tamper() {
        assert!(!detector_with(|_| {}).evaluate(&FakeProvider::failing()).detected);
    }

    #[test]
    fn test_breakpoint_patterns() {
        let x86 = FunctionPrologue { arch: CodeArch::X86_64, bytes: vec![0xCC, 0x55, 0x48] };
        assert_eq!(breakpoint_at_entry(&x86), Some("INT3"));

        let x86_clean = FunctionPrologue { arch: CodeArch::X86_64, bytes: vec![0x55, 0x48, 0x89, 0xE5] };
        assert_eq!(breakpoint_at_entry(&x86_clean), None);

        // BKPT #0 = 0xE1200070
        let arm = FunctionPrologue { arch: CodeArch::Arm, bytes: vec![0x70, 0x00, 0x20, 0xE1] };
        assert_eq!(breakpoint_at_entry(&arm), Some("BKPT"));

        // BRK #0 = 0xD4200000
        let a64 = FunctionPrologue { arch: CodeArch::Aarch64, bytes: vec![0x00, 0x00, 0x20, 0xD4] };
        assert_eq!(breakpoint_at_entry(&a64), Some("BRK"));

        let short = FunctionPrologue { arch: CodeArch::Aarch64, bytes: vec![0x00] };
        assert_eq!(breakpoint_at_entry(&short), None);
    }
}
