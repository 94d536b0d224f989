//! Logic Module
//!
//! # Components
//! - `config.rs`: engine, detection and monitor configuration
//! - `platform/`: introspection provider contract and implementations
//! - `detection/`: the six detection modules
//! - `threat/`: report model and aggregator
//! - `storage/`: encrypted state store and behavior history
//! - `response/`: response policy and dispatcher
//! - `monitor.rs`: continuous background checks

pub mod config;
pub mod detection;
pub mod monitor;
pub mod platform;
pub mod response;
pub mod storage;
pub mod threat;
