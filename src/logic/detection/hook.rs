//! Hook Detection
//!
//! Four independent sources, OR-ed for the reported signal:
//! loaded modules against the blocklists, framework ports, framework
//! processes, and trampoline patterns in a known-good function prologue.
//! `advanced_check` returns every match with the framework it points to.

use serde::{Deserialize, Serialize};

use super::indicators::{
    find_token, HOOK_FRAMEWORK_PORTS, HOOK_PROCESSES, INLINE_HOOK_LIBS, INSTRUMENTATION_LIBS,
    SUBSTRATE_LIBS, XPOSED_LIBS,
};
use super::{Detector, Findings};
use crate::logic::platform::{CodeArch, FunctionPrologue, PlatformIntrospectionProvider};
use crate::logic::threat::{ThreatSignal, ThreatType};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HookFramework {
    Frida,
    Xposed,
    Substrate,
    InlineHook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookSource {
    Module,
    Port,
    Process,
    Prologue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookMatch {
    pub framework: HookFramework,
    pub source: HookSource,
    pub evidence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookReport {
    pub matches: Vec<HookMatch>,
}

impl HookReport {
    pub fn detected(&self) -> bool {
        !self.matches.is_empty()
    }

    /// Distinct frameworks, sorted
    pub fn frameworks(&self) -> Vec<HookFramework> {
        let mut frameworks: Vec<HookFramework> = self.matches.iter().map(|m| m.framework).collect();
        frameworks.sort();
        frameworks.dedup();
        frameworks
    }
}

// ============================================================================
// TRAMPOLINES
// ============================================================================

/// Jump or trampoline sequence at the start of the prologue
pub fn trampoline_pattern(prologue: &FunctionPrologue) -> Option<&'static str> {
    let b = &prologue.bytes;
    let word = |at: usize| -> Option<u32> {
        let raw: [u8; 4] = b.get(at..at + 4)?.try_into().ok()?;
        Some(u32::from_le_bytes(raw))
    };

    match prologue.arch {
        CodeArch::X86 | CodeArch::X86_64 => match b.as_slice() {
            [0xE9, ..] => Some("jmp rel32"),
            [0x68, ..] => Some("push imm32; ret"),
            [0xFF, 0x25, ..] => Some("jmp [rip+disp32]"),
            // movabs rax, imm64 ; jmp rax
            [0x48, 0xB8, _, _, _, _, _, _, _, _, 0xFF, 0xE0, ..] => Some("movabs rax; jmp rax"),
            _ => None,
        },
        // ldr pc, [pc, #-4]
        CodeArch::Arm => word(0).filter(|&w| w == 0xE51F_F004).map(|_| "ldr pc, [pc, #-4]"),
        // ldr x16|x17, #lit ; br x16|x17
        CodeArch::Aarch64 => {
            let ldr = word(0)?;
            let br = word(4)?;
            let ldr_literal = ldr & 0xFF00_001E == 0x5800_0010;
            let branch = br == 0xD61F_0200 || br == 0xD61F_0220;
            (ldr_literal && branch).then_some("ldr x16/x17; br")
        }
        CodeArch::Other => None,
    }
}

// ============================================================================
// DETECTOR
// ============================================================================

#[derive(Debug, Default)]
pub struct HookDetector;

impl HookDetector {
    pub fn new() -> Self {
        Self
    }

    /// Every match from every source
    pub fn advanced_check(&self, provider: &dyn PlatformIntrospectionProvider) -> HookReport {
        let mut findings = Findings::new(ThreatType::Hooks);
        HookReport {
            matches: self.collect(provider, &mut findings),
        }
    }

    fn collect(&self, provider: &dyn PlatformIntrospectionProvider, findings: &mut Findings) -> Vec<HookMatch> {
        let mut matches = Vec::new();

        if let Some(modules) = findings.check("list_loaded_modules", provider.list_loaded_modules()) {
            let blocklists: [(&[&str], HookFramework); 4] = [
                (INSTRUMENTATION_LIBS, HookFramework::Frida),
                (XPOSED_LIBS, HookFramework::Xposed),
                (SUBSTRATE_LIBS, HookFramework::Substrate),
                (INLINE_HOOK_LIBS, HookFramework::InlineHook),
            ];
            for module in &modules {
                for (list, framework) in blocklists {
                    if let Some(token) = find_token(module, list) {
                        matches.push(HookMatch {
                            framework,
                            source: HookSource::Module,
                            evidence: format!("module {} matches '{}'", module, token),
                        });
                    }
                }
            }
        }

        for &port in HOOK_FRAMEWORK_PORTS {
            if let Some(true) = findings.check("probe_local_port", provider.probe_local_port(port)) {
                matches.push(HookMatch {
                    framework: HookFramework::Frida,
                    source: HookSource::Port,
                    evidence: format!("framework port {} open", port),
                });
            }
        }

        if let Some(processes) =
            findings.check("list_running_process_names", provider.list_running_process_names())
        {
            for name in &processes {
                let lower = name.to_ascii_lowercase();
                if HOOK_PROCESSES.iter().any(|p| lower == *p) {
                    matches.push(HookMatch {
                        framework: HookFramework::Frida,
                        source: HookSource::Process,
                        evidence: format!("framework process {}", name),
                    });
                }
            }
        }

        if let Some(prologue) = findings.check("read_function_prologue", provider.read_function_prologue()) {
            if let Some(pattern) = trampoline_pattern(&prologue) {
                matches.push(HookMatch {
                    framework: HookFramework::InlineHook,
                    source: HookSource::Prologue,
                    evidence: format!("trampoline '{}' at function entry", pattern),
                });
            }
        }

        matches
    }
}

impl Detector for HookDetector {
    fn kind(&self) -> ThreatType {
        ThreatType::Hooks
    }

    fn evaluate(&self, provider: &dyn PlatformIntrospectionProvider) -> ThreatSignal {
        let mut findings = Findings::new(self.kind());
        for found in self.collect(provider, &mut findings) {
            findings.hit(found.evidence);
        }
        findings.into_signal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::platform::FakeProvider;

    #[test]
    fn test_clean_device() {
        let provider = FakeProvider::clean();
        assert!(!HookDetector::new().evaluate(&provider).detected);
        assert!(!HookDetector::new().advanced_check(&provider).detected());
    }

    #[test]
    fn test_frida_gadget_module() {
        let provider = FakeProvider::clean();
        provider.update(|s| {
            s.loaded_modules
                .push("/data/local/tmp/libfrida-gadget.so".to_string())
        });
        let report = HookDetector::new().advanced_check(&provider);
        assert_eq!(report.frameworks(), vec![HookFramework::Frida]);
        assert_eq!(report.matches[0].source, HookSource::Module);
    }

    #[test]
    fn test_multiple_frameworks_named() {
        let provider = FakeProvider::clean();
        provider.update(|s| {
            s.loaded_modules.push("/system/framework/XposedBridge.jar".to_string());
            s.loaded_modules.push("/data/app/lib/libdobby.so".to_string());
            s.open_ports.insert(27042);
            s.processes.push("frida-server".to_string());
        });
        let report = HookDetector::new().advanced_check(&provider);
        assert_eq!(
            report.frameworks(),
            vec![HookFramework::Frida, HookFramework::Xposed, HookFramework::InlineHook]
        );
        assert!(HookDetector::new().evaluate(&provider).detected);
    }

    #[test]
    fn test_trampoline_patterns() {
        let jmp = FunctionPrologue { arch: CodeArch::X86, bytes: vec![0xE9, 0x10, 0x20, 0x00, 0x00] };
        assert_eq!(trampoline_pattern(&jmp), Some("jmp rel32"));

        let mut movabs = vec![0x48, 0xB8];
        movabs.extend_from_slice(&[0x11; 8]);
        movabs.extend_from_slice(&[0xFF, 0xE0]);
        let movabs = FunctionPrologue { arch: CodeArch::X86_64, bytes: movabs };
        assert_eq!(trampoline_pattern(&movabs), Some("movabs rax; jmp rax"));

        let arm = FunctionPrologue { arch: CodeArch::Arm, bytes: 0xE51F_F004u32.to_le_bytes().to_vec() };
        assert!(trampoline_pattern(&arm).is_some());

        // ldr x17, #8 ; br x17
        let mut a64 = 0x5800_0051u32.to_le_bytes().to_vec();
        a64.extend_from_slice(&0xD61F_0220u32.to_le_bytes());
        let a64 = FunctionPrologue { arch: CodeArch::Aarch64, bytes: a64 };
        assert_eq!(trampoline_pattern(&a64), Some("ldr x16/x17; br"));

        let clean = FunctionPrologue {
            arch: CodeArch::Aarch64,
            bytes: vec![0xFD, 0x7B, 0xBF, 0xA9, 0xFD, 0x03, 0x00, 0x91],
        };
        assert_eq!(trampoline_pattern(&clean), None);
    }

    #[test]
    fn test_trampoline_in_prologue_detected() {
        let provider = FakeProvider::clean();
        provider.update(|s| {
            s.prologue = Some(FunctionPrologue { arch: CodeArch::X86_64, bytes: vec![0xFF, 0x25, 0, 0, 0, 0] })
        });
        let report = HookDetector::new().advanced_check(&provider);
        assert_eq!(report.frameworks(), vec![HookFramework::InlineHook]);
    }
}
