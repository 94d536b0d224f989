//! API Module
//!
//! Public surface for host applications.
//!
//! Structure:
//! - engine.rs: `Engine` facade and `EngineError`
//! - engine_status.rs: serializable status snapshot
//!
//! Usage:
//! - `api::Engine::new(config)` then `init(provider, continuous)`

pub mod engine;
pub mod engine_status;

pub use engine::{validate_policy, Engine, EngineError};
pub use engine_status::EngineStatus;
