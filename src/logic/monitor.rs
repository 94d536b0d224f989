//! Continuous Monitor
//!
//! Runs a check cycle on a background thread with a jittered interval, so
//! checks do not line up with a fixed period.
//!
//! ## Usage
//! ```ignore
//! let monitor = ContinuousMonitor::start(&MonitorConfig::default(), move || {
//!     engine_core.check_and_respond();
//! })?;
//! // ...
//! monitor.stop();
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::Notify;

use crate::logic::config::MonitorConfig;
use crate::logic::detection;

pub struct ContinuousMonitor {
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
    cycles: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl ContinuousMonitor {
    /// Spawn the monitor thread. The first cycle runs immediately.
    pub fn start<F>(config: &MonitorConfig, cycle: F) -> std::io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let wake = Arc::new(Notify::new());
        let cycles = Arc::new(AtomicU64::new(0));
        let (lo, hi) = config.bounds();

        let handle = {
            let running = Arc::clone(&running);
            let wake = Arc::clone(&wake);
            let cycles = Arc::clone(&cycles);
            thread::Builder::new()
                .name("rasp-monitor".to_string())
                .spawn(move || {
                    let rt = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(rt) => rt,
                        Err(e) => {
                            log::error!("Failed to create monitor runtime: {}", e);
                            running.store(false, Ordering::Release);
                            return;
                        }
                    };
                    rt.block_on(run_loop(running, wake, cycles, (lo, hi), cycle));
                })?
        };

        log::info!(
            "Continuous monitoring started (interval {}-{}ms)",
            lo.as_millis(),
            hi.as_millis()
        );

        Ok(Self {
            running,
            wake,
            cycles,
            handle: Some(handle),
        })
    }

    /// Request the loop to end. Returns without waiting; safe to call twice.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.wake.notify_one();
            log::info!("Continuous monitoring stopping");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Completed check cycles
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }

    /// Stop and wait for the thread to finish its current cycle
    pub fn join(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Monitor thread panicked");
            }
        }
    }
}

impl Drop for ContinuousMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop<F>(
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
    cycles: Arc<AtomicU64>,
    (lo, hi): (Duration, Duration),
    cycle: F,
) where
    F: Fn(),
{
    let mut rng = StdRng::from_entropy();

    while running.load(Ordering::Acquire) {
        if let Err(msg) = detection::isolate(|| cycle()) {
            log::error!("Monitor cycle panicked: {}", msg);
        }
        cycles.fetch_add(1, Ordering::AcqRel);

        if !running.load(Ordering::Acquire) {
            break;
        }

        let wait = jittered(&mut rng, lo, hi);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = wake.notified() => {}
        }
    }

    log::debug!("Monitor loop exited after {} cycle(s)", cycles.load(Ordering::Acquire));
}

/// Uniform draw from `[lo, hi]`
fn jittered<R: Rng + ?Sized>(rng: &mut R, lo: Duration, hi: Duration) -> Duration {
    let (lo, hi) = (lo.as_millis() as u64, hi.as_millis() as u64);
    Duration::from_millis(rng.gen_range(lo..=hi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    fn fast() -> MonitorConfig {
        MonitorConfig {
            min_interval_ms: 5,
            max_interval_ms: 15,
        }
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        let (lo, hi) = MonitorConfig::default().bounds();
        for _ in 0..1000 {
            let d = jittered(&mut rng, lo, hi);
            assert!(d >= Duration::from_secs(5) && d <= Duration::from_secs(15));
        }
        let same = Duration::from_millis(7);
        assert_eq!(jittered(&mut rng, same, same), same);
    }

    #[test]
    fn test_runs_cycles_until_stopped() {
        let (tx, rx) = mpsc::channel();
        let monitor = ContinuousMonitor::start(&fast(), move || {
            let _ = tx.send(());
        })
        .unwrap();

        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert!(monitor.is_running());
        assert!(wait_for(|| monitor.cycles() >= 3));

        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
        monitor.join();
    }

    #[test]
    fn test_stop_wakes_a_long_sleep() {
        let config = MonitorConfig {
            min_interval_ms: 60_000,
            max_interval_ms: 60_000,
        };
        let monitor = ContinuousMonitor::start(&config, || {}).unwrap();
        assert!(wait_for(|| monitor.cycles() == 1));

        let started = Instant::now();
        monitor.join();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_panicking_cycle_keeps_loop_alive() {
        let monitor = ContinuousMonitor::start(&fast(), || panic!("cycle exploded")).unwrap();
        assert!(wait_for(|| monitor.cycles() >= 3));
        assert!(monitor.is_running());
        monitor.join();
    }
}
