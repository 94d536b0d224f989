//! Threat Types
//!
//! Core types for the security report. No detection logic here, only data
//! structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// THREAT TYPE
// ============================================================================

/// What a detection module looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ThreatType {
    Debugger,
    Root,
    Emulator,
    Tampering,
    Hooks,
    SuspiciousBehavior,
}

impl ThreatType {
    /// All threat types in report order
    pub const ALL: [ThreatType; 6] = [
        ThreatType::Debugger,
        ThreatType::Root,
        ThreatType::Emulator,
        ThreatType::Tampering,
        ThreatType::Hooks,
        ThreatType::SuspiciousBehavior,
    ];

    /// Position of this type inside a report
    pub fn index(&self) -> usize {
        match self {
            ThreatType::Debugger => 0,
            ThreatType::Root => 1,
            ThreatType::Emulator => 2,
            ThreatType::Tampering => 3,
            ThreatType::Hooks => 4,
            ThreatType::SuspiciousBehavior => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatType::Debugger => "debugger",
            ThreatType::Root => "root",
            ThreatType::Emulator => "emulator",
            ThreatType::Tampering => "tampering",
            ThreatType::Hooks => "hooks",
            ThreatType::SuspiciousBehavior => "suspicious_behavior",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl std::fmt::Display for ThreatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// THREAT SIGNAL
// ============================================================================

/// Verdict of one detection module for one check cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatSignal {
    pub kind: ThreatType,
    pub detected: bool,
    pub evidence: Option<String>,
}

impl ThreatSignal {
    pub fn clean(kind: ThreatType) -> Self {
        Self {
            kind,
            detected: false,
            evidence: None,
        }
    }

    pub fn detected(kind: ThreatType, evidence: impl Into<String>) -> Self {
        Self {
            kind,
            detected: true,
            evidence: Some(evidence.into()),
        }
    }

    /// Module could not produce a verdict
    pub fn failed(kind: ThreatType, detail: impl std::fmt::Display) -> Self {
        Self {
            kind,
            detected: false,
            evidence: Some(format!("check failed: {}", detail)),
        }
    }
}

// ============================================================================
// SECURITY REPORT
// ============================================================================

/// Immutable result of one full check: exactly one signal per `ThreatType`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityReport {
    id: Uuid,
    signals: [ThreatSignal; 6],
    timestamp: DateTime<Utc>,
}

impl SecurityReport {
    /// Build a report by asking `f` for each threat type in order
    pub fn from_fn(mut f: impl FnMut(ThreatType) -> ThreatSignal) -> Self {
        let signals = ThreatType::ALL.map(|kind| {
            let mut signal = f(kind);
            // a signal filed under the wrong type must not shift the layout
            signal.kind = kind;
            signal
        });
        Self {
            id: Uuid::new_v4(),
            signals,
            timestamp: Utc::now(),
        }
    }

    /// Report for a manual trigger: only `kind` is detected
    pub fn single(kind: ThreatType, evidence: impl Into<String>) -> Self {
        let evidence = evidence.into();
        Self::from_fn(|k| {
            if k == kind {
                ThreatSignal::detected(k, evidence.clone())
            } else {
                ThreatSignal::clean(k)
            }
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn signals(&self) -> &[ThreatSignal; 6] {
        &self.signals
    }

    pub fn signal(&self, kind: ThreatType) -> &ThreatSignal {
        &self.signals[kind.index()]
    }

    pub fn is_detected(&self, kind: ThreatType) -> bool {
        self.signal(kind).detected
    }

    pub fn has_threats(&self) -> bool {
        self.signals.iter().any(|s| s.detected)
    }

    pub fn threat_count(&self) -> usize {
        self.signals.iter().filter(|s| s.detected).count()
    }

    pub fn detected_types(&self) -> Vec<ThreatType> {
        self.signals
            .iter()
            .filter(|s| s.detected)
            .map(|s| s.kind)
            .collect()
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        if !self.has_threats() {
            return "clean".to_string();
        }
        self.signals
            .iter()
            .filter(|s| s.detected)
            .map(|s| match &s.evidence {
                Some(evidence) => format!("{} ({})", s.kind, evidence),
                None => s.kind.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}
