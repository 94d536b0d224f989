//! Response Types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::constants::{DELAYED_DELAY_MS, IMMEDIATE_DELAY_MS};
use crate::logic::threat::ThreatType;

// ============================================================================
// RESPONSE TYPE
// ============================================================================

/// Intent group of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseCategory {
    Passive,
    Deceptive,
    Terminal,
    Advanced,
}

/// What the dispatcher does when threats are found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseType {
    // Passive
    SilentMonitor,
    LogOnly,

    // Deceptive
    FakeScreen,
    CorruptData,
    RandomBehavior,

    // Terminal
    ImmediateExit,
    DelayedExit,
    CrashApp,
    KillProcess,

    // Advanced
    RestartApp,
    ClearData,
    DisableFeatures,
}

impl ResponseType {
    pub const ALL: [ResponseType; 12] = [
        ResponseType::SilentMonitor,
        ResponseType::LogOnly,
        ResponseType::FakeScreen,
        ResponseType::CorruptData,
        ResponseType::RandomBehavior,
        ResponseType::ImmediateExit,
        ResponseType::DelayedExit,
        ResponseType::CrashApp,
        ResponseType::KillProcess,
        ResponseType::RestartApp,
        ResponseType::ClearData,
        ResponseType::DisableFeatures,
    ];

    pub fn category(&self) -> ResponseCategory {
        match self {
            ResponseType::SilentMonitor | ResponseType::LogOnly => ResponseCategory::Passive,
            ResponseType::FakeScreen | ResponseType::CorruptData | ResponseType::RandomBehavior => {
                ResponseCategory::Deceptive
            }
            ResponseType::ImmediateExit
            | ResponseType::DelayedExit
            | ResponseType::CrashApp
            | ResponseType::KillProcess => ResponseCategory::Terminal,
            ResponseType::RestartApp | ResponseType::ClearData | ResponseType::DisableFeatures => {
                ResponseCategory::Advanced
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::SilentMonitor => "silent_monitor",
            ResponseType::LogOnly => "log_only",
            ResponseType::FakeScreen => "fake_screen",
            ResponseType::CorruptData => "corrupt_data",
            ResponseType::RandomBehavior => "random_behavior",
            ResponseType::ImmediateExit => "immediate_exit",
            ResponseType::DelayedExit => "delayed_exit",
            ResponseType::CrashApp => "crash_app",
            ResponseType::KillProcess => "kill_process",
            ResponseType::RestartApp => "restart_app",
            ResponseType::ClearData => "clear_data",
            ResponseType::DisableFeatures => "disable_features",
        }
    }

    /// Accepts `delayed_exit`, `DelayedExit`, `DELAYED_EXIT`...
    pub fn from_str(s: &str) -> Option<Self> {
        let wanted: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().replace('_', "") == wanted)
    }

    pub fn is_terminal(&self) -> bool {
        self.category() == ResponseCategory::Terminal
    }

    /// Half-open delay window (ms) before a process-ending action runs
    pub fn delay_window_ms(&self) -> Option<(u64, u64)> {
        match self {
            ResponseType::ImmediateExit | ResponseType::RestartApp => Some(IMMEDIATE_DELAY_MS),
            ResponseType::DelayedExit | ResponseType::CrashApp | ResponseType::KillProcess => {
                Some(DELAYED_DELAY_MS)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for ResponseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// POLICY
// ============================================================================

/// The single active policy of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponsePolicy {
    pub response_type: ResponseType,
    /// Probabilistically skip dispatch to make reactions harder to correlate
    pub randomized_trigger: bool,
}

impl Default for ResponsePolicy {
    fn default() -> Self {
        Self {
            response_type: ResponseType::SilentMonitor,
            randomized_trigger: true,
        }
    }
}

impl ResponsePolicy {
    pub fn new(response_type: ResponseType, randomized_trigger: bool) -> Self {
        Self {
            response_type,
            randomized_trigger,
        }
    }

    /// Passive fallback used when a policy cannot be honoured
    pub fn silent() -> Self {
        Self::new(ResponseType::SilentMonitor, false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("unknown response type '{0}'")]
    UnknownResponseType(String),

    #[error("response '{0}' is not supported by this host")]
    UnsupportedByHost(ResponseType),
}

// ============================================================================
// DISPATCH RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DispatchOutcome {
    /// Report had nothing detected
    NoThreats,
    /// Randomized trigger skipped this cycle (`roll >= probability`)
    Suppressed { probability: f64, roll: f64 },
    Executed {
        response: ResponseType,
        threats: Vec<ThreatType>,
        /// Delay of the scheduled process-ending action, if any
        scheduled_delay_ms: Option<u64>,
    },
    /// Dispatch failed internally; nothing propagated to the caller
    Failed(String),
}

impl DispatchOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, DispatchOutcome::Executed { .. })
    }

    pub fn scheduled_delay(&self) -> Option<Duration> {
        match self {
            DispatchOutcome::Executed {
                scheduled_delay_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

/// One entry of the dispatch history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub timestamp: DateTime<Utc>,
    pub report_id: Uuid,
    pub policy: ResponsePolicy,
    pub outcome: DispatchOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub total: usize,
    pub executed: usize,
    pub suppressed: usize,
    pub no_threats: usize,
    pub failed: usize,
}
