//! Host Controller
//!
//! The process-level side of a response. Everything that can end or restart
//! the process goes through this trait so it can be replaced in tests and by
//! hosts with their own lifecycle (e.g. a mobile runtime).

use std::process::Command;

use super::types::ResponseType;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("host action '{action}' failed: {reason}")]
pub struct HostActionError {
    pub action: &'static str,
    pub reason: String,
}

impl HostActionError {
    pub fn new(action: &'static str, reason: impl ToString) -> Self {
        Self {
            action,
            reason: reason.to_string(),
        }
    }
}

pub trait HostController: Send + Sync {
    /// Exit with `code`. Expected not to return.
    fn exit(&self, code: i32);

    /// Kill the current process without cleanup
    fn kill(&self);

    /// Crash the current process
    fn crash(&self);

    /// Start a fresh instance of the application
    fn relaunch(&self) -> Result<(), HostActionError>;

    /// Wipe application data owned by the host
    fn clear_data(&self) -> Result<(), HostActionError>;

    /// Whether this host can carry out `response`
    fn supports(&self, _response: ResponseType) -> bool {
        true
    }
}

/// Acts on the real current process
#[derive(Debug, Default)]
pub struct ProcessHostController;

impl ProcessHostController {
    pub fn new() -> Self {
        Self
    }
}

impl HostController for ProcessHostController {
    fn exit(&self, code: i32) {
        log::warn!("Exiting process (code {})", code);
        std::process::exit(code);
    }

    fn kill(&self) {
        let pid = std::process::id();
        log::warn!("Killing process {}", pid);
        let killed = Command::new("kill")
            .args(["-KILL", &pid.to_string()])
            .status()
            .map(|status| status.success())
            .unwrap_or(false);
        if !killed {
            std::process::abort();
        }
    }

    fn crash(&self) {
        log::warn!("Crashing process");
        std::process::abort();
    }

    fn relaunch(&self) -> Result<(), HostActionError> {
        let exe = std::env::current_exe().map_err(|e| HostActionError::new("relaunch", e))?;
        let args: Vec<String> = std::env::args().skip(1).collect();
        Command::new(&exe)
            .args(&args)
            .spawn()
            .map_err(|e| HostActionError::new("relaunch", e))?;
        log::info!("Relaunched {}", exe.display());
        Ok(())
    }

    fn clear_data(&self) -> Result<(), HostActionError> {
        // application data belongs to the host; only the engine state is wiped here
        Ok(())
    }

    fn supports(&self, response: ResponseType) -> bool {
        // no UI layer to render a fake screen
        response != ResponseType::FakeScreen
    }
}
