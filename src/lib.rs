//! RASP Core - Runtime Application Self-Protection Engine
//!
//! Detects debuggers, root, emulators, tampering, hooking frameworks and
//! analysis behavior from inside the protected process, and answers with a
//! configurable response.
//!
//! ## Structure
//! - `api`: `Engine` facade for host applications
//! - `logic`: detection, aggregation, response, storage, monitoring
//! - `constants`: defaults and environment lookups

pub mod api;
pub mod constants;
pub mod logic;

pub use api::{Engine, EngineError, EngineStatus};
pub use logic::config::{DetectionConfig, EngineConfig, MonitorConfig};
pub use logic::platform::{
    FakeProvider, FakeState, HardeningReport, LinuxProvider, PlatformIntrospectionProvider,
};
pub use logic::response::{DispatchOutcome, ResponsePolicy, ResponseType};
pub use logic::storage::SecureStateStore;
pub use logic::threat::{SecurityReport, ThreatSignal, ThreatType};
