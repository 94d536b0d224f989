//! Recording doubles for the host and scheduler seams

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::host::{HostActionError, HostController};
use super::scheduler::{TerminalAction, TerminalScheduler};
use super::types::ResponseType;

/// Records every host call instead of acting on the process
#[derive(Default)]
pub(crate) struct RecordingHost {
    calls: Mutex<Vec<String>>,
    pub relaunch_fails: AtomicBool,
    pub clear_panics: AtomicBool,
    pub unsupported: Mutex<Vec<ResponseType>>,
}

impl RecordingHost {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn push(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

impl HostController for RecordingHost {
    fn exit(&self, code: i32) {
        self.push(format!("exit({})", code));
    }

    fn kill(&self) {
        self.push("kill");
    }

    fn crash(&self) {
        self.push("crash");
    }

    fn relaunch(&self) -> Result<(), HostActionError> {
        if self.relaunch_fails.load(Ordering::SeqCst) {
            return Err(HostActionError::new("relaunch", "no launcher"));
        }
        self.push("relaunch");
        Ok(())
    }

    fn clear_data(&self) -> Result<(), HostActionError> {
        if self.clear_panics.load(Ordering::SeqCst) {
            panic!("host clear_data exploded");
        }
        self.push("clear_data");
        Ok(())
    }

    fn supports(&self, response: ResponseType) -> bool {
        !self.unsupported.lock().contains(&response)
    }
}

/// Keeps scheduled actions until `run_pending` is called
#[derive(Default)]
pub(crate) struct RecordingScheduler {
    pending: Mutex<Vec<(Duration, TerminalAction)>>,
    delays: Mutex<Vec<Duration>>,
}

impl RecordingScheduler {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn run_pending(&self) {
        let actions: Vec<_> = self.pending.lock().drain(..).collect();
        for (_, action) in actions {
            action();
        }
    }
}

impl TerminalScheduler for RecordingScheduler {
    fn schedule(&self, delay: Duration, action: TerminalAction) {
        self.delays.lock().push(delay);
        self.pending.lock().push((delay, action));
    }
}
