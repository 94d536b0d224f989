//! Response Module
//!
//! Turns a `SecurityReport` into an action under the active policy.
//!
//! ## Structure
//! - `types`: ResponseType, ResponsePolicy, DispatchOutcome
//! - `host`: HostController seam for process-level actions
//! - `scheduler`: delayed execution of process-ending actions
//! - `dispatcher`: randomized trigger, action selection, escalation counters

pub mod dispatcher;
pub mod host;
pub mod scheduler;
pub mod types;
#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

pub use dispatcher::{trigger_probability, ResponseDispatcher};
pub use host::{HostActionError, HostController, ProcessHostController};
pub use scheduler::{draw_delay, TerminalAction, TerminalScheduler, ThreadScheduler};
pub use types::{
    DispatchOutcome, DispatchRecord, DispatchStats, PolicyError, ResponseCategory, ResponsePolicy,
    ResponseType,
};
