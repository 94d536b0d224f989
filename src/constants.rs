//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! Every `RASP_*` environment variable read by the engine is listed here.

use std::time::Duration;

/// Engine version
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name
pub const ENGINE_NAME: &str = "RASP Core";

// ============================================
// Continuous monitor
// ============================================

/// Lower bound of the jittered monitor interval (seconds)
pub const DEFAULT_MONITOR_MIN_SECS: u64 = 5;

/// Upper bound of the jittered monitor interval (seconds)
pub const DEFAULT_MONITOR_MAX_SECS: u64 = 15;

// ============================================
// Response dispatch
// ============================================

/// Base trigger probability for randomized dispatch
pub const TRIGGER_BASE_PROBABILITY: f64 = 0.6;

/// Probability added per recorded past threat
pub const TRIGGER_STEP_PROBABILITY: f64 = 0.1;

/// Trigger probability cap
pub const TRIGGER_MAX_PROBABILITY: f64 = 0.9;

/// Delay window for `ImmediateExit` and `RestartApp` (ms, half-open)
pub const IMMEDIATE_DELAY_MS: (u64, u64) = (0, 100);

/// Delay window for `DelayedExit`, `CrashApp` and `KillProcess` (ms, half-open)
pub const DELAYED_DELAY_MS: (u64, u64) = (1000, 5000);

/// Host response delay picked by `RandomBehavior` (ms, inclusive)
pub const RESPONSE_DELAY_MS: (u64, u64) = (1, 100);

/// Dispatch records kept in memory
pub const MAX_DISPATCH_HISTORY: usize = 200;

/// Threat types last seen longer ago than this no longer raise the trigger probability
pub const RECENT_THREAT_WINDOW_SECS: u64 = 24 * 60 * 60;

// ============================================
// Secure state store
// ============================================

/// Directory under the local data dir holding the state file
pub const STATE_DIR_NAME: &str = "rasp-core";

/// State file name
pub const STATE_FILE_NAME: &str = "state.json";

/// Prefix mixed into the device-bound state key
pub const STATE_KEY_PREFIX: &str = "RASP_State_Store_v1_";

/// Store key: fake screen flag (bool)
pub const FLAG_FAKE_SCREEN: &str = "flags.fake_screen";

/// Store key: corrupt data flag (bool)
pub const FLAG_CORRUPT_DATA: &str = "flags.corrupt_data";

/// Store key: features disabled flag (bool)
pub const FLAG_FEATURES_DISABLED: &str = "flags.features_disabled";

/// Store key: artificial response delay the host should apply (int, ms)
pub const FLAG_RESPONSE_DELAY_MS: &str = "flags.response_delay_ms";

// ============================================
// Detection
// ============================================

/// Minimum interval between two process-list scans in the behavioral module
pub const DEFAULT_PROCESS_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Timed samples collected per timing analysis
pub const DEFAULT_TIMING_SAMPLES: usize = 16;

/// Loop iterations of the branch-free timing workload
pub const TIMING_WORKLOAD_ITERATIONS: u64 = 1000;

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Read a trimmed, non-empty string from the environment
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Read an unsigned integer from the environment or use the default
pub fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

/// Read a boolean flag from the environment or use the default
pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

/// Read a comma separated list from the environment
pub fn env_list(name: &str) -> Vec<String> {
    env_string(name)
        .map(|raw| {
            raw.split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
