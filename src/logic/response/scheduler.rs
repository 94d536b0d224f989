//! Terminal Action Scheduling
//!
//! Process-ending actions run off the calling path after a random delay.
//! Once scheduled they are not cancellable.

use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub type TerminalAction = Box<dyn FnOnce() + Send + 'static>;

pub trait TerminalScheduler: Send + Sync {
    fn schedule(&self, delay: Duration, action: TerminalAction);
}

/// Detached thread per action
#[derive(Debug, Default)]
pub struct ThreadScheduler;

impl ThreadScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl TerminalScheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, action: TerminalAction) {
        let slot = Arc::new(Mutex::new(Some(action)));
        let worker_slot = Arc::clone(&slot);
        let spawned = thread::Builder::new()
            .name("rasp-terminal".to_string())
            .spawn(move || {
                thread::sleep(delay);
                let action = worker_slot.lock().take();
                if let Some(action) = action {
                    action();
                }
            });
        if let Err(e) = spawned {
            // no thread available: run it here rather than drop it
            log::error!("Failed to spawn terminal action thread: {}", e);
            let action = slot.lock().take();
            if let Some(action) = action {
                action();
            }
        }
    }
}

/// Uniform draw from the half-open window `[lo, hi)` in milliseconds
pub fn draw_delay<R: Rng + ?Sized>(rng: &mut R, (lo, hi): (u64, u64)) -> Duration {
    if hi <= lo {
        return Duration::from_millis(lo);
    }
    Duration::from_millis(rng.gen_range(lo..hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::mpsc;

    #[test]
    fn test_draw_delay_stays_in_window() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let d = draw_delay(&mut rng, (1000, 5000));
            assert!(d >= Duration::from_millis(1000) && d < Duration::from_millis(5000));
        }
        assert_eq!(draw_delay(&mut rng, (50, 50)), Duration::from_millis(50));
    }

    #[test]
    fn test_thread_scheduler_runs_action() {
        let (tx, rx) = mpsc::channel();
        ThreadScheduler::new().schedule(
            Duration::from_millis(5),
            Box::new(move || {
                let _ = tx.send(42);
            }),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }
}
