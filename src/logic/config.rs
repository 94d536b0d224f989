//! Engine Configuration
//!
//! Thresholds, scoring weights and runtime settings. Everything here can be
//! loaded from a JSON document or from `RASP_*` environment variables, and
//! every field falls back to the defaults in `constants.rs`.
//!
//! The scoring weights are empirically chosen constants. They are kept as
//! plain configuration so a host can recalibrate them without a rebuild.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{self, env_bool, env_list, env_string, env_u64};
use crate::logic::response::{ResponsePolicy, ResponseType};

// ============================================================================
// TIMING
// ============================================================================

/// Limits for a set of timed workload samples (all in nanoseconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingThresholds {
    pub max_mean_ns: u64,
    pub max_stddev_ns: u64,
    /// A sample further than this many standard deviations from the mean is an outlier
    pub outlier_sigma: f64,
    /// Absolute deviation an outlier must also reach; 0 leaves the sigma rule alone
    pub outlier_min_deviation_ns: u64,
}

impl Default for TimingThresholds {
    fn default() -> Self {
        Self {
            max_mean_ns: 1_000_000,
            max_stddev_ns: 250_000,
            outlier_sigma: 3.0,
            outlier_min_deviation_ns: 0,
        }
    }
}

/// Single-stepping: every sample slower than `baseline_ns * slowdown_factor`
/// with a coefficient of variation below `max_variation`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SingleStepConfig {
    pub baseline_ns: u64,
    pub slowdown_factor: f64,
    pub max_variation: f64,
}

impl Default for SingleStepConfig {
    fn default() -> Self {
        Self {
            baseline_ns: 20_000,
            slowdown_factor: 10.0,
            max_variation: 0.1,
        }
    }
}

// ============================================================================
// SCORING WEIGHTS
// ============================================================================

/// Weights of the scored emulator check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorWeights {
    pub build_properties: u32,
    pub background_files: u32,
    pub properties: u32,
    pub network: u32,
    pub telephony: u32,
    pub cpu_info: u32,
    pub sensors: u32,
    /// Score at or above which the device is an emulator
    pub threshold: u32,
}

impl Default for EmulatorWeights {
    fn default() -> Self {
        Self {
            build_properties: 3,
            background_files: 3,
            properties: 2,
            network: 2,
            telephony: 2,
            cpu_info: 2,
            sensors: 1,
            threshold: 3,
        }
    }
}

/// Weights of the scored behavioral analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorWeights {
    pub timing: u32,
    pub process: u32,
    pub ports: u32,
    pub single_step: u32,
    pub syscalls: u32,
    pub memory: u32,
    pub cpu: u32,
    /// Score at or above which behavior is suspicious
    pub threshold: u32,
}

impl Default for BehaviorWeights {
    fn default() -> Self {
        Self {
            timing: 3,
            process: 2,
            ports: 2,
            single_step: 4,
            syscalls: 3,
            memory: 1,
            cpu: 1,
            threshold: 4,
        }
    }
}

// ============================================================================
// DETECTION CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Samples per timing analysis (10-20)
    pub timing_samples: usize,
    pub debugger_timing: TimingThresholds,
    pub behavior_timing: TimingThresholds,
    pub single_step: SingleStepConfig,
    /// Minimum seconds between two process-list scans (behavioral module)
    pub process_check_interval_secs: u64,
    /// Resident/virtual ratio below which memory looks instrumented
    pub min_resident_ratio: f64,
    pub max_virtual_kb: u64,
    /// User + kernel ticks above which CPU use looks instrumented
    pub max_cpu_ticks: u64,
    /// More writable+executable regions than this means tampering
    pub max_writable_exec_regions: usize,
    pub min_sensor_count: usize,
    /// Allowed signing certificate fingerprints (SHA-256 hex). Empty disables the check.
    pub expected_signatures: Vec<String>,
    /// Code segment name to expected SHA-256 hex. Empty disables the check.
    pub expected_segment_hashes: BTreeMap<String, String>,
    pub emulator_weights: EmulatorWeights,
    pub behavior_weights: BehaviorWeights,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            timing_samples: constants::DEFAULT_TIMING_SAMPLES,
            debugger_timing: TimingThresholds::default(),
            behavior_timing: TimingThresholds::default(),
            single_step: SingleStepConfig::default(),
            process_check_interval_secs: constants::DEFAULT_PROCESS_CHECK_INTERVAL.as_secs(),
            min_resident_ratio: 0.02,
            max_virtual_kb: 16 * 1024 * 1024 * 1024 / 1024,
            max_cpu_ticks: 100_000,
            max_writable_exec_regions: 5,
            min_sensor_count: 5,
            expected_signatures: Vec::new(),
            expected_segment_hashes: BTreeMap::new(),
            emulator_weights: EmulatorWeights::default(),
            behavior_weights: BehaviorWeights::default(),
        }
    }
}

impl DetectionConfig {
    pub fn process_check_interval(&self) -> Duration {
        Duration::from_secs(self.process_check_interval_secs)
    }
}

// ============================================================================
// MONITOR CONFIG
// ============================================================================

/// Jitter window of the continuous monitor (milliseconds, inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: constants::DEFAULT_MONITOR_MIN_SECS * 1000,
            max_interval_ms: constants::DEFAULT_MONITOR_MAX_SECS * 1000,
        }
    }
}

impl MonitorConfig {
    /// Bounds in ascending order
    pub fn bounds(&self) -> (Duration, Duration) {
        let lo = self.min_interval_ms.min(self.max_interval_ms);
        let hi = self.min_interval_ms.max(self.max_interval_ms);
        (Duration::from_millis(lo), Duration::from_millis(hi))
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub detection: DetectionConfig,
    pub monitor: MonitorConfig,
    /// Policy active right after `init`
    pub response: ResponsePolicy,
    /// State file; `None` keeps the secure store in memory only
    pub state_path: Option<PathBuf>,
    /// Key material for the store; `None` derives a device-bound key
    pub state_key: Option<String>,
    /// Apply provider hardening once during `init`
    pub harden_process: bool,
    /// Seconds a threat type keeps counting towards the trigger probability
    pub recent_threat_window_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            monitor: MonitorConfig::default(),
            response: ResponsePolicy::default(),
            state_path: None,
            state_key: None,
            harden_process: true,
            recent_threat_window_secs: constants::RECENT_THREAT_WINDOW_SECS,
        }
    }
}

impl EngineConfig {
    pub fn recent_threat_window(&self) -> Duration {
        Duration::from_secs(self.recent_threat_window_secs)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(name) = env_string("RASP_RESPONSE_TYPE") {
            config.response.response_type = ResponseType::from_str(&name).unwrap_or_else(|| {
                log::warn!("Unknown RASP_RESPONSE_TYPE '{}', falling back to silent monitoring", name);
                ResponseType::SilentMonitor
            });
        }
        config.response.randomized_trigger =
            env_bool("RASP_RANDOMIZED_TRIGGER", config.response.randomized_trigger);

        config.monitor.min_interval_ms =
            env_u64("RASP_MONITOR_MIN_SECS", constants::DEFAULT_MONITOR_MIN_SECS) * 1000;
        config.monitor.max_interval_ms =
            env_u64("RASP_MONITOR_MAX_SECS", constants::DEFAULT_MONITOR_MAX_SECS) * 1000;

        config.state_path = env_string("RASP_STATE_PATH")
            .map(PathBuf::from)
            .or_else(default_state_path);
        config.state_key = env_string("RASP_STATE_KEY");
        config.harden_process = env_bool("RASP_HARDEN_PROCESS", config.harden_process);
        config.recent_threat_window_secs =
            env_u64("RASP_RECENT_THREAT_WINDOW_SECS", config.recent_threat_window_secs);
        config.detection.expected_signatures = env_list("RASP_EXPECTED_SIGNATURES");

        config
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// `<local data dir>/rasp-core/state.json`
pub fn default_state_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| {
        dir.join(constants::STATE_DIR_NAME)
            .join(constants::STATE_FILE_NAME)
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights() {
        let emulator = EmulatorWeights::default();
        assert_eq!(emulator.build_properties, 3);
        assert_eq!(emulator.sensors, 1);
        assert_eq!(emulator.threshold, 3);

        let behavior = BehaviorWeights::default();
        assert_eq!(behavior.single_step, 4);
        assert_eq!(behavior.threshold, 4);
    }

    #[test]
    fn test_json_partial_override() {
        let config = EngineConfig::from_json_str(
            r#"{
                "detection": { "max_writable_exec_regions": 9, "behavior_weights": { "threshold": 6 } },
                "response": { "response_type": "DelayedExit", "randomized_trigger": true }
            }"#,
        )
        .unwrap();

        assert_eq!(config.detection.max_writable_exec_regions, 9);
        assert_eq!(config.detection.behavior_weights.threshold, 6);
        assert_eq!(config.detection.behavior_weights.timing, 3);
        assert_eq!(config.response.response_type, ResponseType::DelayedExit);
        assert!(config.response.randomized_trigger);
        assert_eq!(config.monitor, MonitorConfig::default());
        assert!(config.harden_process);
        assert_eq!(config.recent_threat_window(), Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn test_outlier_rule_has_no_absolute_floor_by_default() {
        let thresholds = TimingThresholds::default();
        assert_eq!(thresholds.outlier_sigma, 3.0);
        assert_eq!(thresholds.outlier_min_deviation_ns, 0);
        assert_eq!(DetectionConfig::default().behavior_timing, thresholds);
    }

    #[test]
    fn test_monitor_bounds_are_ordered() {
        let monitor = MonitorConfig {
            min_interval_ms: 900,
            max_interval_ms: 100,
        };
        let (lo, hi) = monitor.bounds();
        assert_eq!(lo, Duration::from_millis(100));
        assert_eq!(hi, Duration::from_millis(900));
    }
}
