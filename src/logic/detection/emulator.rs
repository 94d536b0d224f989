//! Emulator Detection
//!
//! Two views over the same indicator set:
//! - `evaluate`: OR of build, file, property, network, telephony and sensor
//!   indicators (the reported signal)
//! - `advanced_check`: weighted score that also counts CPU info, positive at
//!   or above the configured threshold

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use super::indicators::{
    find_token, EMULATOR_BUILD_SIGNATURES, EMULATOR_CPU_TOKENS, EMULATOR_DEVICE_IDS,
    EMULATOR_FILES, EMULATOR_OPERATOR, EMULATOR_PHONE_PREFIX, EMULATOR_PROPERTIES,
    EMULATOR_SUBNETS,
};
use super::{Detector, Findings};
use crate::logic::config::{DetectionConfig, EmulatorWeights};
use crate::logic::platform::{PlatformIntrospectionProvider, TelephonyIdentity};
use crate::logic::threat::{ThreatSignal, ThreatType};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmulatorCategory {
    BuildProperties,
    BackgroundFiles,
    Properties,
    Network,
    Telephony,
    CpuInfo,
    Sensors,
}

impl EmulatorCategory {
    pub fn weight(&self, weights: &EmulatorWeights) -> u32 {
        match self {
            EmulatorCategory::BuildProperties => weights.build_properties,
            EmulatorCategory::BackgroundFiles => weights.background_files,
            EmulatorCategory::Properties => weights.properties,
            EmulatorCategory::Network => weights.network,
            EmulatorCategory::Telephony => weights.telephony,
            EmulatorCategory::CpuInfo => weights.cpu_info,
            EmulatorCategory::Sensors => weights.sensors,
        }
    }
}

/// One matched category with the first evidence found for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatorIndicator {
    pub category: EmulatorCategory,
    pub weight: u32,
    pub evidence: String,
}

/// Result of the scored check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmulatorAssessment {
    pub score: u32,
    pub threshold: u32,
    pub indicators: Vec<EmulatorIndicator>,
    pub is_emulator: bool,
}

// ============================================================================
// DETECTOR
// ============================================================================

pub struct EmulatorDetector {
    weights: EmulatorWeights,
    min_sensor_count: usize,
}

impl EmulatorDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            weights: config.emulator_weights,
            min_sensor_count: config.min_sensor_count,
        }
    }

    /// Weighted score over all categories, CPU info included
    pub fn advanced_check(&self, provider: &dyn PlatformIntrospectionProvider) -> EmulatorAssessment {
        let mut findings = Findings::new(ThreatType::Emulator);
        let indicators = self.collect(provider, &mut findings);
        let score = indicators.iter().map(|i| i.weight).sum();
        EmulatorAssessment {
            score,
            threshold: self.weights.threshold,
            is_emulator: score >= self.weights.threshold,
            indicators,
        }
    }

    /// One indicator per matched category
    fn collect(
        &self,
        provider: &dyn PlatformIntrospectionProvider,
        findings: &mut Findings,
    ) -> Vec<EmulatorIndicator> {
        let checks = [
            (EmulatorCategory::BuildProperties, build_signature(provider, findings)),
            (EmulatorCategory::BackgroundFiles, emulator_file(provider, findings)),
            (EmulatorCategory::Properties, emulator_property(provider, findings)),
            (EmulatorCategory::Network, emulator_network(provider, findings)),
            (EmulatorCategory::Telephony, fake_telephony(provider, findings)),
            (EmulatorCategory::CpuInfo, emulator_cpu(provider, findings)),
            (
                EmulatorCategory::Sensors,
                few_sensors(provider, findings, self.min_sensor_count),
            ),
        ];

        checks
            .into_iter()
            .filter_map(|(category, evidence)| {
                evidence.map(|evidence| EmulatorIndicator {
                    category,
                    weight: category.weight(&self.weights),
                    evidence,
                })
            })
            .collect()
    }
}

impl Detector for EmulatorDetector {
    fn kind(&self) -> ThreatType {
        ThreatType::Emulator
    }

    fn evaluate(&self, provider: &dyn PlatformIntrospectionProvider) -> ThreatSignal {
        let mut findings = Findings::new(self.kind());
        for indicator in self.collect(provider, &mut findings) {
            // CPU info only feeds the score
            if indicator.category != EmulatorCategory::CpuInfo {
                findings.hit(indicator.evidence);
            }
        }
        findings.into_signal()
    }
}

// ============================================================================
// INDICATORS
// ============================================================================

fn build_signature(provider: &dyn PlatformIntrospectionProvider, findings: &mut Findings) -> Option<String> {
    let build = findings.check("get_build_identifiers", provider.get_build_identifiers())?;
    EMULATOR_BUILD_SIGNATURES.iter().find_map(|(key, pattern)| {
        build
            .get(*key)
            .filter(|value| pattern.matches(value))
            .map(|value| format!("build {} '{}'", key, value))
    })
}

fn emulator_file(provider: &dyn PlatformIntrospectionProvider, findings: &mut Findings) -> Option<String> {
    let mut found = None;
    for &path in EMULATOR_FILES {
        if let Some(true) = findings.check("file_exists", provider.file_exists(path)) {
            found.get_or_insert_with(|| format!("emulator file {}", path));
        }
    }
    found
}

fn emulator_property(provider: &dyn PlatformIntrospectionProvider, findings: &mut Findings) -> Option<String> {
    let mut found = None;
    for (key, pattern) in EMULATOR_PROPERTIES {
        let Some(Some(value)) = findings.check("get_system_property", provider.get_system_property(key)) else {
            continue;
        };
        let matched = pattern.map_or(true, |p| p.matches(&value));
        if matched && found.is_none() {
            found = Some(format!("property {}={}", key, value));
        }
    }
    found
}

fn in_emulator_subnet(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            EMULATOR_SUBNETS.iter().any(|net| net[..] == o[..3])
        }
        IpAddr::V6(_) => false,
    }
}

fn emulator_network(provider: &dyn PlatformIntrospectionProvider, findings: &mut Findings) -> Option<String> {
    let addresses = findings.check("list_local_addresses", provider.list_local_addresses())?;
    addresses
        .iter()
        .find(|addr| in_emulator_subnet(addr))
        .map(|addr| format!("emulator NAT address {}", addr))
}

/// Missing, placeholder or well-known emulator telephony values
pub fn telephony_anomaly(identity: &TelephonyIdentity) -> Option<String> {
    match identity.device_id.as_deref().map(str::trim) {
        None | Some("") => return Some("no device id".to_string()),
        Some(id) if EMULATOR_DEVICE_IDS.iter().any(|known| *known == id) || id.chars().all(|c| c == '0') => {
            return Some(format!("placeholder device id {}", id))
        }
        _ => {}
    }
    if let Some(number) = identity.phone_number.as_deref() {
        let digits = number.trim_start_matches('+');
        if digits.starts_with(EMULATOR_PHONE_PREFIX) {
            return Some(format!("emulator phone number {}", number));
        }
    }
    if let Some(operator) = identity.operator_name.as_deref() {
        if operator.trim().eq_ignore_ascii_case(EMULATOR_OPERATOR) {
            return Some(format!("emulator operator '{}'", operator));
        }
    }
    None
}

fn fake_telephony(provider: &dyn PlatformIntrospectionProvider, findings: &mut Findings) -> Option<String> {
    let identity = findings.check("get_telephony_identity", provider.get_telephony_identity())?;
    telephony_anomaly(&identity)
}

fn emulator_cpu(provider: &dyn PlatformIntrospectionProvider, findings: &mut Findings) -> Option<String> {
    let cpu_info = findings.check("get_cpu_info", provider.get_cpu_info())?;
    find_token(&cpu_info, EMULATOR_CPU_TOKENS).map(|token| format!("cpu info mentions '{}'", token))
}

fn few_sensors(
    provider: &dyn PlatformIntrospectionProvider,
    findings: &mut Findings,
    minimum: usize,
) -> Option<String> {
    let count = findings.check("get_sensor_count", provider.get_sensor_count())?;
    (count < minimum).then(|| format!("only {} sensors", count))
}
