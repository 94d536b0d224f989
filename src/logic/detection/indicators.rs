//! Indicator catalogues shared by the detection modules
//!
//! Plain data. Matching against these tables is case-insensitive.

// ============================================================================
// PATTERN
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Exact(&'static str),
    Prefix(&'static str),
    Contains(&'static str),
}

impl Pattern {
    pub fn matches(&self, value: &str) -> bool {
        let value = value.to_ascii_lowercase();
        match self {
            Pattern::Exact(p) => value == *p,
            Pattern::Prefix(p) => value.starts_with(p),
            Pattern::Contains(p) => value.contains(p),
        }
    }
}

/// Case-insensitive substring search over a needle list
pub fn find_token<'a>(value: &str, tokens: &[&'a str]) -> Option<&'a str> {
    let lower = value.to_ascii_lowercase();
    tokens.iter().copied().find(|token| lower.contains(token))
}

// ============================================================================
// DEBUGGER
// ============================================================================

/// JDWP, Android Studio, DDMS and Node inspector
pub const REMOTE_DEBUG_PORTS: &[u16] = &[5005, 8600, 8700, 9229];

pub const DEBUG_ENV_VARS: &[&str] = &["DEBUG", "ANDROID_DEBUG"];

// ============================================================================
// ROOT
// ============================================================================

pub const SU_PATHS: &[&str] = &[
    "/system/bin/su",
    "/system/xbin/su",
    "/system/sbin/su",
    "/vendor/bin/su",
    "/sbin/su",
    "/su/bin/su",
    "/data/local/su",
    "/data/local/bin/su",
    "/data/local/xbin/su",
    "/system/bin/failsafe/su",
    "/system/app/Superuser.apk",
    "/data/adb/magisk",
];

pub const ROOT_PACKAGES: &[&str] = &[
    "com.topjohnwu.magisk",
    "eu.chainfire.supersu",
    "com.koushikdutta.superuser",
    "com.noshufou.android.su",
    "com.kingroot.kinguser",
    "com.thirdparty.superuser",
    "com.yellowes.su",
];

/// Mount points that are read-only on a stock device
pub const PROTECTED_MOUNTS: &[&str] = &["/system", "/system_root", "/vendor"];

/// (property, value pattern) pairs of engineering or test builds
pub const ROOT_PROPERTIES: &[(&str, Pattern)] = &[
    ("ro.debuggable", Pattern::Exact("1")),
    ("ro.secure", Pattern::Exact("0")),
    ("ro.build.tags", Pattern::Contains("test-keys")),
    ("ro.build.type", Pattern::Exact("eng")),
    ("ro.build.type", Pattern::Exact("userdebug")),
];

// ============================================================================
// EMULATOR
// ============================================================================

/// (build identifier, pattern)
pub const EMULATOR_BUILD_SIGNATURES: &[(&str, Pattern)] = &[
    ("manufacturer", Pattern::Exact("unknown")),
    ("manufacturer", Pattern::Contains("genymotion")),
    ("manufacturer", Pattern::Contains("qemu")),
    ("manufacturer", Pattern::Contains("innotek")),
    ("model", Pattern::Contains("google_sdk")),
    ("model", Pattern::Contains("emulator")),
    ("model", Pattern::Contains("android sdk built for")),
    ("model", Pattern::Contains("sdk_gphone")),
    ("model", Pattern::Contains("virtualbox")),
    ("hardware", Pattern::Exact("goldfish")),
    ("hardware", Pattern::Exact("ranchu")),
    ("hardware", Pattern::Exact("vbox86")),
    ("fingerprint", Pattern::Prefix("generic")),
    ("fingerprint", Pattern::Prefix("unknown")),
    ("fingerprint", Pattern::Contains("vbox")),
    ("product", Pattern::Exact("sdk")),
    ("product", Pattern::Exact("google_sdk")),
    ("product", Pattern::Contains("sdk_gphone")),
    ("product", Pattern::Contains("vbox86p")),
    ("brand", Pattern::Prefix("generic")),
    ("device", Pattern::Prefix("generic")),
];

pub const EMULATOR_FILES: &[&str] = &[
    "/dev/socket/qemud",
    "/dev/qemu_pipe",
    "/sys/qemu_trace",
    "/system/bin/qemu-props",
    "/system/xbin/qemu-props",
    "/system/lib/libc_malloc_debug_qemu.so",
    "/dev/socket/genyd",
    "/dev/socket/baseband_genyd",
];

/// (property, pattern); `None` means presence alone is the indicator
pub const EMULATOR_PROPERTIES: &[(&str, Option<Pattern>)] = &[
    ("ro.kernel.qemu", Some(Pattern::Exact("1"))),
    ("ro.boot.qemu", Some(Pattern::Exact("1"))),
    ("ro.hardware", Some(Pattern::Exact("goldfish"))),
    ("ro.hardware", Some(Pattern::Exact("ranchu"))),
    ("ro.product.device", Some(Pattern::Prefix("generic"))),
    ("ro.kernel.android.qemud", None),
    ("qemu.hw.mainkeys", None),
];

/// IPv4 /24 prefixes handed out by emulator NAT
pub const EMULATOR_SUBNETS: &[[u8; 3]] = &[[10, 0, 2], [10, 0, 3]];

pub const EMULATOR_DEVICE_IDS: &[&str] = &["000000000000000", "012345678912345", "e21833235b6eef10"];

pub const EMULATOR_PHONE_PREFIX: &str = "155552155";

pub const EMULATOR_OPERATOR: &str = "android";

pub const EMULATOR_CPU_TOKENS: &[&str] = &["goldfish", "ranchu", "qemu virtual cpu", "virtualbox"];

// ============================================================================
// HOOKS
// ============================================================================

/// Dynamic instrumentation
pub const INSTRUMENTATION_LIBS: &[&str] = &[
    "frida",
    "frida-gadget",
    "frida-agent",
    "libfrida",
    "gum-js-loop",
];

/// Method hooking: Xposed family
pub const XPOSED_LIBS: &[&str] = &["xposed", "lsposed", "edxposed", "libriru"];

/// Method hooking: Substrate family
pub const SUBSTRATE_LIBS: &[&str] = &["substrate", "cydia"];

/// Generic inline hook engines
pub const INLINE_HOOK_LIBS: &[&str] = &[
    "libhook",
    "libdobby",
    "libwhale",
    "libsandhook",
    "libshadowhook",
    "libinlinehook",
];

pub const HOOK_FRAMEWORK_PORTS: &[u16] = &[27042, 27043, 27047];

pub const HOOK_PROCESSES: &[&str] = &["frida-server", "frida-helper", "frida-portal", "re.frida.server"];

// ============================================================================
// BEHAVIOR
// ============================================================================

pub const ANALYSIS_TOOLS: &[&str] = &[
    "gdb",
    "gdbserver",
    "lldb",
    "lldb-server",
    "strace",
    "ltrace",
    "frida",
    "android_server",
    "ida",
    "radare2",
    "r2",
    "ghidra",
    "jdb",
    "objection",
];

/// ADB, IDA remote, netcat defaults
pub const SUSPICIOUS_PORTS: &[u16] = &[1234, 5037, 5555, 23946];

pub const TRACE_SYSCALLS: &[&str] = &[
    "ptrace",
    "process_vm_readv",
    "process_vm_writev",
    "perf_event_open",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_case_insensitive() {
        assert!(Pattern::Exact("goldfish").matches("GoldFish"));
        assert!(Pattern::Prefix("generic").matches("Generic_x86/sdk"));
        assert!(Pattern::Contains("sdk_gphone").matches("Pixel sdk_gphone64"));
        assert!(!Pattern::Exact("eng").matches("engineering"));
    }

    #[test]
    fn test_find_token() {
        assert_eq!(
            find_token("/data/local/tmp/LIBFRIDA-gadget.so", INSTRUMENTATION_LIBS),
            Some("frida")
        );
        assert_eq!(find_token("/system/lib64/libc.so", INSTRUMENTATION_LIBS), None);
    }
}
