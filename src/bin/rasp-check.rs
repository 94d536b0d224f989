//! One-shot diagnostic run against the current host.
//!
//! Usage: `rasp-check [--watch <seconds>]`
//!
//! Prints the hardening outcome, the security report and the scored
//! assessments as JSON. With `--watch`, continuous monitoring runs for the
//! given time before the dispatch statistics are printed.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use rasp_core::logic::platform::LinuxProvider;
use rasp_core::{Engine, EngineConfig};

fn parse_watch() -> Result<Option<u64>, String> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => Ok(None),
        Some("--watch") => args
            .next()
            .and_then(|secs| secs.parse().ok())
            .map(Some)
            .ok_or_else(|| "--watch expects a number of seconds".to_string()),
        Some(other) => Err(format!("unknown argument '{}'", other)),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let watch = parse_watch()?;
    let engine = Engine::new(EngineConfig::from_env());
    engine.init(Arc::new(LinuxProvider::new()), watch.is_some())?;

    println!("{}", serde_json::to_string_pretty(&engine.hardening_report()?)?);
    let report = engine.perform_security_check()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("{}", serde_json::to_string_pretty(&engine.emulator_assessment()?)?);
    println!("{}", serde_json::to_string_pretty(&engine.hook_report()?)?);
    println!("{}", serde_json::to_string_pretty(&engine.behavior_assessment()?)?);

    if let Some(secs) = watch {
        log::info!("Monitoring for {}s...", secs);
        std::thread::sleep(Duration::from_secs(secs));
        println!("{}", serde_json::to_string_pretty(&engine.status())?);
    }

    engine.cleanup();
    Ok(())
}
