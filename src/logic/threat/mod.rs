//! Threat Module
//!
//! The per-check result model and the aggregator that produces it.
//!
//! ## Structure
//! - `types`: ThreatType, ThreatSignal, SecurityReport
//! - `aggregator`: runs all six detectors, isolating their failures
//!
//! ## Usage
//! ```ignore
//! use crate::logic::threat::Aggregator;
//!
//! let aggregator = Aggregator::new(&DetectionConfig::default());
//! let report = aggregator.run(provider.as_ref());
//! if report.has_threats() {
//!     log::warn!("{}", report.summary());
//! }
//! ```

pub mod aggregator;
pub mod types;
#[cfg(test)]
mod tests;

pub use aggregator::Aggregator;
pub use types::{SecurityReport, ThreatSignal, ThreatType};
