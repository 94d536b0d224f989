use serde::{Deserialize, Serialize};

use crate::logic::response::{DispatchStats, ResponsePolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub version: String,
    pub initialized: bool,
    pub monitoring: bool,
    pub policy: Option<ResponsePolicy>, // None before init
    pub recent_threats: u64,
    pub persistent: bool, // state file vs in-memory store
    pub hardening_failures: Vec<String>,
    pub dispatch: DispatchStats,
}
