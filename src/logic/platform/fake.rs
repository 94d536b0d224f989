//! Scriptable provider
//!
//! Every answer comes from a `FakeState` the caller controls. The state sits
//! behind a lock so tests can change the "device" while an engine holds the
//! provider.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};

use parking_lot::RwLock;

use super::{
    CodeArch, CpuTicks, FunctionPrologue, HardeningReport, HardeningStep, IntrospectionError,
    IntrospectionResult, MemoryRegion, MemoryStats, PlatformIntrospectionProvider,
    TelephonyIdentity, HARDEN_DUMPABLE, HARDEN_PTRACER,
};

/// Device description served by `FakeProvider`
#[derive(Debug, Clone, Default)]
pub struct FakeState {
    /// When set, every call fails with `IntrospectionError::Failed`
    pub fail_all: bool,
    pub tracer_pid: i64,
    pub debugger_attached: Option<bool>,
    pub files: HashSet<String>,
    pub loaded_modules: Vec<String>,
    pub processes: Vec<String>,
    pub open_ports: HashSet<u16>,
    pub properties: HashMap<String, String>,
    pub build: HashMap<String, String>,
    pub memory: MemoryStats,
    pub cpu: CpuTicks,
    pub last_syscall: Option<String>,
    pub packages: Vec<String>,
    pub mounts: Vec<String>,
    pub regions: Vec<MemoryRegion>,
    pub fingerprints: Vec<String>,
    pub segments: HashMap<String, Vec<u8>>,
    pub prologue: Option<FunctionPrologue>,
    /// The OS refuses to disable core dumps
    pub core_dump_disable_fails: bool,
    /// Served by `harden_process`; `None` = unsupported
    pub hardening: Option<HardeningReport>,
    /// Times `harden_process` was called
    pub harden_calls: usize,
    /// Served by `ptrace_attach_denied`; `None` = unsupported
    pub ptrace_denied: Option<bool>,
    pub addresses: Vec<IpAddr>,
    pub telephony: Option<TelephonyIdentity>,
    pub sensor_count: Option<usize>,
    pub cpu_info: Option<String>,
    pub env: HashMap<String, String>,
    pub timing_samples: Vec<u64>,
}

impl FakeState {
    /// An ordinary retail phone with no debugger, root, hooks or emulator traits
    pub fn clean() -> Self {
        let build = [
            ("manufacturer", "Samsung"),
            ("brand", "samsung"),
            ("model", "SM-G991B"),
            ("product", "o1sxeea"),
            ("device", "o1s"),
            ("hardware", "exynos2100"),
            ("fingerprint", "samsung/o1sxeea/o1s:13/TP1A.220624.014/G991BXXU5DVK1:user/release-keys"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let properties = [
            ("ro.debuggable", "0"),
            ("ro.secure", "1"),
            ("ro.build.type", "user"),
            ("ro.build.tags", "release-keys"),
            ("ro.hardware", "exynos2100"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            loaded_modules: vec![
                "/system/lib64/libc.so".to_string(),
                "/system/lib64/libart.so".to_string(),
                "/data/app/com.example.bank/lib/arm64/libapp.so".to_string(),
            ],
            processes: vec![
                "init".to_string(),
                "zygote64".to_string(),
                "surfaceflinger".to_string(),
                "com.example.bank".to_string(),
            ],
            properties,
            build,
            memory: MemoryStats {
                virtual_kb: 4_200_000,
                resident_kb: 180_000,
            },
            cpu: CpuTicks {
                user_ticks: 1_200,
                kernel_ticks: 300,
            },
            mounts: vec![
                "/dev/block/dm-0 / ext4 ro,seclabel,relatime 0 0".to_string(),
                "/dev/block/dm-1 /system ext4 ro,seclabel,relatime 0 0".to_string(),
                "/dev/block/dm-5 /data f2fs rw,lazytime,seclabel,nosuid 0 0".to_string(),
            ],
            regions: vec![
                MemoryRegion::new("r-xp", Some("/system/lib64/libc.so")),
                MemoryRegion::new("rw-p", None),
                MemoryRegion::new("r--p", Some("/system/lib64/libart.so")),
            ],
            prologue: Some(FunctionPrologue {
                arch: CodeArch::Aarch64,
                // stp x29, x30, [sp, #-16]! ; mov x29, sp
                bytes: vec![0xFD, 0x7B, 0xBF, 0xA9, 0xFD, 0x03, 0x00, 0x91],
            }),
            hardening: Some(HardeningReport {
                steps: vec![
                    HardeningStep::applied(HARDEN_DUMPABLE, "set to 0"),
                    HardeningStep::applied(HARDEN_PTRACER, "restricted to self (pid 0)"),
                ],
            }),
            ptrace_denied: Some(false),
            addresses: vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 23))],
            telephony: Some(TelephonyIdentity {
                device_id: Some("356938035643809".to_string()),
                phone_number: Some("+4915112345678".to_string()),
                operator_name: Some("Telekom.de".to_string()),
            }),
            sensor_count: Some(24),
            cpu_info: Some("Processor\t: AArch64 Processor rev 0 (aarch64)\nHardware\t: Exynos 2100".to_string()),
            timing_samples: vec![
                21_000, 20_500, 20_800, 21_200, 20_900, 21_100, 20_700, 21_000,
                20_600, 21_300, 20_950, 21_050, 20_850, 21_150, 20_750, 21_000,
            ],
            ..Self::default()
        }
    }

    /// A device on which every provider call fails
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }
}

/// Provider answering from a mutable `FakeState`
#[derive(Debug, Default)]
pub struct FakeProvider {
    state: RwLock<FakeState>,
}

impl FakeProvider {
    pub fn new(state: FakeState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn clean() -> Self {
        Self::new(FakeState::clean())
    }

    pub fn failing() -> Self {
        Self::new(FakeState::failing())
    }

    /// Mutate the served state in place
    pub fn update(&self, f: impl FnOnce(&mut FakeState)) {
        f(&mut *self.state.write());
    }

    pub fn snapshot(&self) -> FakeState {
        self.state.read().clone()
    }

    fn read<T>(
        &self,
        call: &'static str,
        f: impl FnOnce(&FakeState) -> IntrospectionResult<T>,
    ) -> IntrospectionResult<T> {
        let state = self.state.read();
        if state.fail_all {
            return Err(IntrospectionError::failed(call, "simulated provider failure"));
        }
        f(&*state)
    }
}

fn unsupported_if_none<T: Clone>(value: &Option<T>, call: &'static str) -> IntrospectionResult<T> {
    value.clone().ok_or(IntrospectionError::Unsupported(call))
}

impl PlatformIntrospectionProvider for FakeProvider {
    fn tracer_status(&self) -> IntrospectionResult<i64> {
        self.read("tracer_status", |s| Ok(s.tracer_pid))
    }

    fn file_exists(&self, path: &str) -> IntrospectionResult<bool> {
        self.read("file_exists", |s| Ok(s.files.contains(path)))
    }

    fn list_loaded_modules(&self) -> IntrospectionResult<Vec<String>> {
        self.read("list_loaded_modules", |s| Ok(s.loaded_modules.clone()))
    }

    fn list_running_process_names(&self) -> IntrospectionResult<Vec<String>> {
        self.read("list_running_process_names", |s| Ok(s.processes.clone()))
    }

    fn probe_local_port(&self, port: u16) -> IntrospectionResult<bool> {
        self.read("probe_local_port", |s| Ok(s.open_ports.contains(&port)))
    }

    fn get_system_property(&self, key: &str) -> IntrospectionResult<Option<String>> {
        self.read("get_system_property", |s| Ok(s.properties.get(key).cloned()))
    }

    fn get_build_identifiers(&self) -> IntrospectionResult<HashMap<String, String>> {
        self.read("get_build_identifiers", |s| Ok(s.build.clone()))
    }

    fn get_memory_stats(&self) -> IntrospectionResult<MemoryStats> {
        self.read("get_memory_stats", |s| Ok(s.memory))
    }

    fn get_cpu_ticks(&self) -> IntrospectionResult<CpuTicks> {
        self.read("get_cpu_ticks", |s| Ok(s.cpu))
    }

    fn get_last_syscall_name(&self) -> IntrospectionResult<Option<String>> {
        self.read("get_last_syscall_name", |s| Ok(s.last_syscall.clone()))
    }

    fn is_debugger_attached(&self) -> IntrospectionResult<bool> {
        self.read("is_debugger_attached", |s| {
            unsupported_if_none(&s.debugger_attached, "is_debugger_attached")
        })
    }

    fn list_installed_packages(&self) -> IntrospectionResult<Vec<String>> {
        self.read("list_installed_packages", |s| Ok(s.packages.clone()))
    }

    fn read_mount_table(&self) -> IntrospectionResult<Vec<String>> {
        self.read("read_mount_table", |s| Ok(s.mounts.clone()))
    }

    fn list_memory_regions(&self) -> IntrospectionResult<Vec<MemoryRegion>> {
        self.read("list_memory_regions", |s| Ok(s.regions.clone()))
    }

    fn get_signing_fingerprints(&self) -> IntrospectionResult<Vec<String>> {
        self.read("get_signing_fingerprints", |s| Ok(s.fingerprints.clone()))
    }

    fn read_code_segment(&self, name: &str) -> IntrospectionResult<Vec<u8>> {
        self.read("read_code_segment", |s| {
            s.segments
                .get(name)
                .cloned()
                .ok_or_else(|| IntrospectionError::failed("read_code_segment", format!("no segment '{}'", name)))
        })
    }

    fn read_function_prologue(&self) -> IntrospectionResult<FunctionPrologue> {
        self.read("read_function_prologue", |s| {
            unsupported_if_none(&s.prologue, "read_function_prologue")
        })
    }

    fn disable_core_dumps(&self) -> IntrospectionResult<bool> {
        self.read("disable_core_dumps", |s| Ok(!s.core_dump_disable_fails))
    }

    fn harden_process(&self) -> IntrospectionResult<HardeningReport> {
        let mut state = self.state.write();
        state.harden_calls += 1;
        if state.fail_all {
            return Err(IntrospectionError::failed("harden_process", "simulated provider failure"));
        }
        unsupported_if_none(&state.hardening, "harden_process")
    }

    fn ptrace_attach_denied(&self) -> IntrospectionResult<bool> {
        self.read("ptrace_attach_denied", |s| {
            unsupported_if_none(&s.ptrace_denied, "ptrace_attach_denied")
        })
    }

    fn list_local_addresses(&self) -> IntrospectionResult<Vec<IpAddr>> {
        self.read("list_local_addresses", |s| Ok(s.addresses.clone()))
    }

    fn get_telephony_identity(&self) -> IntrospectionResult<TelephonyIdentity> {
        self.read("get_telephony_identity", |s| {
            unsupported_if_none(&s.telephony, "get_telephony_identity")
        })
    }

    fn get_sensor_count(&self) -> IntrospectionResult<usize> {
        self.read("get_sensor_count", |s| unsupported_if_none(&s.sensor_count, "get_sensor_count"))
    }

    fn get_cpu_info(&self) -> IntrospectionResult<String> {
        self.read("get_cpu_info", |s| unsupported_if_none(&s.cpu_info, "get_cpu_info"))
    }

    fn get_environment_variable(&self, key: &str) -> IntrospectionResult<Option<String>> {
        self.read("get_environment_variable", |s| Ok(s.env.get(key).cloned()))
    }

    fn sample_timing(&self, count: usize) -> IntrospectionResult<Vec<u64>> {
        self.read("sample_timing", |s| {
            if s.timing_samples.is_empty() {
                return Err(IntrospectionError::Unsupported("sample_timing"));
            }
            Ok(s.timing_samples.iter().copied().cycle().take(count).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failing_provider_fails_every_call() {
        let provider = FakeProvider::failing();
        assert!(provider.tracer_status().is_err());
        assert!(provider.file_exists("/system/bin/su").is_err());
        assert!(provider.sample_timing(4).is_err());
        assert!(provider.disable_core_dumps().is_err());
        assert!(provider.harden_process().is_err());
        assert!(provider.ptrace_attach_denied().is_err());
    }

    #[test]
    fn test_harden_process_counts_calls() {
        let provider = FakeProvider::clean();
        let report = provider.harden_process().unwrap();
        assert!(!report.has_failures());
        assert_eq!(provider.snapshot().harden_calls, 1);

        provider.update(|s| s.hardening = None);
        assert!(provider.harden_process().unwrap_err().is_unsupported());
        assert_eq!(provider.snapshot().harden_calls, 2);
    }

    #[test]
    fn test_update_changes_answers() {
        let provider = FakeProvider::clean();
        assert_eq!(provider.tracer_status().unwrap(), 0);

        provider.update(|s| s.tracer_pid = 1234);
        assert_eq!(provider.tracer_status().unwrap(), 1234);
    }

    #[test]
    fn test_timing_samples_cycle_to_requested_count() {
        let provider = FakeProvider::new(FakeState {
            timing_samples: vec![1, 2, 3],
            ..FakeState::default()
        });
        assert_eq!(provider.sample_timing(5).unwrap(), vec![1, 2, 3, 1, 2]);
    }
}
