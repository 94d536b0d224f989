//! Platform Introspection Module
//!
//! The engine never touches the OS directly. Every primitive fact it needs
//! (tracer status, files, loaded modules, ports, properties...) comes from a
//! `PlatformIntrospectionProvider` supplied by the host.
//!
//! # Components
//! - `linux.rs`: procfs + sysinfo backed provider for Linux hosts
//! - `fake.rs`: scriptable provider for tests and host integration tests
//!
//! Besides reading facts, a provider may harden the process once at engine
//! init (`harden_process`). Failed steps are fed back into the debugger and
//! tamper detectors as evidence.

pub mod fake;
pub mod linux;

pub use fake::{FakeProvider, FakeState};
pub use linux::LinuxProvider;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

use crate::logic::detection::timing;

// ============================================================================
// ERRORS
// ============================================================================

/// A provider call failed or is not available on this platform
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntrospectionError {
    #[error("introspection call '{0}' is not supported on this platform")]
    Unsupported(&'static str),

    #[error("introspection call '{call}' failed: {detail}")]
    Failed { call: &'static str, detail: String },
}

impl IntrospectionError {
    pub fn failed(call: &'static str, detail: impl ToString) -> Self {
        Self::Failed {
            call,
            detail: detail.to_string(),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

pub type IntrospectionResult<T> = Result<T, IntrospectionError>;

// ============================================================================
// VALUE TYPES
// ============================================================================

/// Process memory footprint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub virtual_kb: u64,
    pub resident_kb: u64,
}

/// Process CPU time in clock ticks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTicks {
    pub user_ticks: u64,
    pub kernel_ticks: u64,
}

impl CpuTicks {
    pub fn total(&self) -> u64 {
        self.user_ticks.saturating_add(self.kernel_ticks)
    }
}

/// One mapped region of the process address space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    /// Permission string as printed by the OS, e.g. `r-xp`
    pub permissions: String,
    pub path: Option<String>,
}

impl MemoryRegion {
    pub fn new(permissions: &str, path: Option<&str>) -> Self {
        Self {
            permissions: permissions.to_string(),
            path: path.map(str::to_string),
        }
    }

    pub fn is_writable_executable(&self) -> bool {
        let bytes = self.permissions.as_bytes();
        bytes.get(1) == Some(&b'w') && bytes.get(2) == Some(&b'x')
    }
}

/// Device telephony identity, as far as the platform exposes it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelephonyIdentity {
    pub device_id: Option<String>,
    pub phone_number: Option<String>,
    pub operator_name: Option<String>,
}

/// Instruction set of the inspected code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeArch {
    X86,
    X86_64,
    Arm,
    Aarch64,
    Other,
}

impl CodeArch {
    /// Architecture this crate was compiled for
    pub fn host() -> Self {
        if cfg!(target_arch = "x86_64") {
            CodeArch::X86_64
        } else if cfg!(target_arch = "x86") {
            CodeArch::X86
        } else if cfg!(target_arch = "aarch64") {
            CodeArch::Aarch64
        } else if cfg!(target_arch = "arm") {
            CodeArch::Arm
        } else {
            CodeArch::Other
        }
    }
}

/// First bytes of a known-good function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionPrologue {
    pub arch: CodeArch,
    pub bytes: Vec<u8>,
}

// ============================================================================
// HARDENING
// ============================================================================

/// Process no longer dumpable (no core files, no same-uid attach)
pub const HARDEN_DUMPABLE: &str = "prctl_dumpable";
/// Only the process itself may be named as tracer
pub const HARDEN_PTRACER: &str = "prctl_ptracer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HardeningStatus {
    Applied,
    Skipped,
    Failed,
}

/// Outcome of one hardening step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HardeningStep {
    pub name: &'static str,
    pub status: HardeningStatus,
    pub detail: String,
}

impl HardeningStep {
    pub fn applied(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: HardeningStatus::Applied,
            detail: detail.into(),
        }
    }

    pub fn skipped(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: HardeningStatus::Skipped,
            detail: detail.into(),
        }
    }

    pub fn failed(name: &'static str, detail: impl ToString) -> Self {
        Self {
            name,
            status: HardeningStatus::Failed,
            detail: detail.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HardeningReport {
    pub steps: Vec<HardeningStep>,
}

impl HardeningReport {
    pub fn has_failures(&self) -> bool {
        self.steps
            .iter()
            .any(|step| step.status == HardeningStatus::Failed)
    }

    pub fn failed_step_names(&self) -> Vec<&'static str> {
        self.steps
            .iter()
            .filter(|step| step.status == HardeningStatus::Failed)
            .map(|step| step.name)
            .collect()
    }

    /// The named step, when it failed
    pub fn failure(&self, name: &str) -> Option<&HardeningStep> {
        self.steps
            .iter()
            .find(|step| step.name == name && step.status == HardeningStatus::Failed)
    }
}

// ============================================================================
// PROVIDER CONTRACT
// ============================================================================

/// Primitive OS-level facts consumed by the detection modules.
///
/// The first block is the core contract every provider implements. The
/// second block is optional: the default implementations report
/// `Unsupported`, which every detector treats as "not detected".
pub trait PlatformIntrospectionProvider: Send + Sync {
    /// Pid of the attached tracer, 0 when none
    fn tracer_status(&self) -> IntrospectionResult<i64>;

    fn file_exists(&self, path: &str) -> IntrospectionResult<bool>;

    fn list_loaded_modules(&self) -> IntrospectionResult<Vec<String>>;

    fn list_running_process_names(&self) -> IntrospectionResult<Vec<String>>;

    /// True when something accepts connections on the local port
    fn probe_local_port(&self, port: u16) -> IntrospectionResult<bool>;

    fn get_system_property(&self, key: &str) -> IntrospectionResult<Option<String>>;

    /// manufacturer / model / hardware / fingerprint / ...
    fn get_build_identifiers(&self) -> IntrospectionResult<HashMap<String, String>>;

    fn get_memory_stats(&self) -> IntrospectionResult<MemoryStats>;

    fn get_cpu_ticks(&self) -> IntrospectionResult<CpuTicks>;

    fn get_last_syscall_name(&self) -> IntrospectionResult<Option<String>> {
        Err(IntrospectionError::Unsupported("get_last_syscall_name"))
    }

    // ------------------------------------------------------------------
    // Optional
    // ------------------------------------------------------------------

    /// Platform "debugger connected" query (managed runtimes)
    fn is_debugger_attached(&self) -> IntrospectionResult<bool> {
        Err(IntrospectionError::Unsupported("is_debugger_attached"))
    }

    fn list_installed_packages(&self) -> IntrospectionResult<Vec<String>> {
        Err(IntrospectionError::Unsupported("list_installed_packages"))
    }

    /// Raw mount table lines (`device mountpoint fstype options ...`)
    fn read_mount_table(&self) -> IntrospectionResult<Vec<String>> {
        Err(IntrospectionError::Unsupported("read_mount_table"))
    }

    fn list_memory_regions(&self) -> IntrospectionResult<Vec<MemoryRegion>> {
        Err(IntrospectionError::Unsupported("list_memory_regions"))
    }

    /// SHA-256 hex fingerprints of the certificates the running binary is signed with
    fn get_signing_fingerprints(&self) -> IntrospectionResult<Vec<String>> {
        Err(IntrospectionError::Unsupported("get_signing_fingerprints"))
    }

    /// Raw bytes of a named critical code segment
    fn read_code_segment(&self, _name: &str) -> IntrospectionResult<Vec<u8>> {
        Err(IntrospectionError::Unsupported("read_code_segment"))
    }

    fn read_function_prologue(&self) -> IntrospectionResult<FunctionPrologue> {
        Err(IntrospectionError::Unsupported("read_function_prologue"))
    }

    /// Ask the OS to stop producing core dumps. `Ok(false)` means the OS refused.
    fn disable_core_dumps(&self) -> IntrospectionResult<bool> {
        Err(IntrospectionError::Unsupported("disable_core_dumps"))
    }

    /// Apply process-wide anti-debug settings. The engine calls this once,
    /// during `init`, and each step reports its own status.
    fn harden_process(&self) -> IntrospectionResult<HardeningReport> {
        Err(IntrospectionError::Unsupported("harden_process"))
    }

    /// Try to attach a tracer to this process. `Ok(true)` means the attach
    /// was refused because another tracer already holds it.
    fn ptrace_attach_denied(&self) -> IntrospectionResult<bool> {
        Err(IntrospectionError::Unsupported("ptrace_attach_denied"))
    }

    fn list_local_addresses(&self) -> IntrospectionResult<Vec<IpAddr>> {
        Err(IntrospectionError::Unsupported("list_local_addresses"))
    }

    fn get_telephony_identity(&self) -> IntrospectionResult<TelephonyIdentity> {
        Err(IntrospectionError::Unsupported("get_telephony_identity"))
    }

    fn get_sensor_count(&self) -> IntrospectionResult<usize> {
        Err(IntrospectionError::Unsupported("get_sensor_count"))
    }

    fn get_cpu_info(&self) -> IntrospectionResult<String> {
        Err(IntrospectionError::Unsupported("get_cpu_info"))
    }

    fn get_environment_variable(&self, _key: &str) -> IntrospectionResult<Option<String>> {
        Err(IntrospectionError::Unsupported("get_environment_variable"))
    }

    /// Durations (ns) of `count` runs of the fixed timing workload
    fn sample_timing(&self, count: usize) -> IntrospectionResult<Vec<u64>> {
        Ok(timing::measure_workload(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writable_executable_region() {
        assert!(MemoryRegion::new("rwxp", None).is_writable_executable());
        assert!(!MemoryRegion::new("r-xp", Some("/lib/libc.so")).is_writable_executable());
        assert!(!MemoryRegion::new("rw-p", None).is_writable_executable());
        assert!(!MemoryRegion::new("", None).is_writable_executable());
    }

    #[test]
    fn test_hardening_report_failures() {
        let report = HardeningReport {
            steps: vec![
                HardeningStep::applied(HARDEN_DUMPABLE, "set to 0"),
                HardeningStep::failed(HARDEN_PTRACER, "PR_SET_PTRACER failed: Operation not permitted"),
            ],
        };
        assert!(report.has_failures());
        assert_eq!(report.failed_step_names(), vec![HARDEN_PTRACER]);
        assert!(report.failure(HARDEN_DUMPABLE).is_none());
        assert!(report.failure(HARDEN_PTRACER).unwrap().detail.contains("not permitted"));
        assert!(!HardeningReport::default().has_failures());
    }

    #[test]
    fn test_cpu_ticks_total_saturates() {
        let ticks = CpuTicks { user_ticks: u64::MAX, kernel_ticks: 5 };
        assert_eq!(ticks.total(), u64::MAX);
    }
}
