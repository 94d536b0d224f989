//! Timing Analysis
//!
//! Statistics over repeated runs of a fixed, branch-free workload. A traced
//! or single-stepped process runs the workload slower, with more jitter, or
//! with isolated spikes where a breakpoint was hit.

use std::hint::black_box;
use std::time::Instant;

use crate::constants::TIMING_WORKLOAD_ITERATIONS;
use crate::logic::config::{SingleStepConfig, TimingThresholds};

// ============================================================================
// WORKLOAD
// ============================================================================

/// Sum of squares; no branches besides the loop itself
#[inline(never)]
fn workload() -> u64 {
    let mut acc: u64 = 0;
    for i in 0..black_box(TIMING_WORKLOAD_ITERATIONS) {
        acc = acc.wrapping_add(i.wrapping_mul(i));
    }
    black_box(acc)
}

/// Duration in nanoseconds of `count` consecutive workload runs
pub fn measure_workload(count: usize) -> Vec<u64> {
    (0..count)
        .map(|_| {
            let start = Instant::now();
            black_box(workload());
            start.elapsed().as_nanos().min(u64::MAX as u128) as u64
        })
        .collect()
}

// ============================================================================
// STATISTICS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingStats {
    pub count: usize,
    pub mean_ns: f64,
    /// Population standard deviation
    pub stddev_ns: f64,
    pub min_ns: u64,
    pub max_ns: u64,
}

impl TimingStats {
    /// stddev / mean, 0 for an all-zero sample set
    pub fn variation(&self) -> f64 {
        if self.mean_ns > 0.0 {
            self.stddev_ns / self.mean_ns
        } else {
            0.0
        }
    }
}

pub fn compute_stats(samples: &[u64]) -> Option<TimingStats> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / n;
    let variance = samples
        .iter()
        .map(|&s| {
            let d = s as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;

    Some(TimingStats {
        count: samples.len(),
        mean_ns: mean,
        stddev_ns: variance.sqrt(),
        min_ns: samples.iter().copied().min().unwrap_or(0),
        max_ns: samples.iter().copied().max().unwrap_or(0),
    })
}

// ============================================================================
// ANOMALIES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimingAnomaly {
    SlowMean { mean_ns: f64 },
    HighVariance { stddev_ns: f64 },
    Outlier { sample_ns: u64, deviation_ns: f64 },
}

impl std::fmt::Display for TimingAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimingAnomaly::SlowMean { mean_ns } => write!(f, "mean {:.0}ns above limit", mean_ns),
            TimingAnomaly::HighVariance { stddev_ns } => {
                write!(f, "stddev {:.0}ns above limit", stddev_ns)
            }
            TimingAnomaly::Outlier {
                sample_ns,
                deviation_ns,
            } => write!(f, "outlier sample {}ns ({:.0}ns off mean)", sample_ns, deviation_ns),
        }
    }
}

/// First anomaly found, checked in order: mean, spread, outliers
pub fn analyze_samples(samples: &[u64], limits: &TimingThresholds) -> Option<TimingAnomaly> {
    let stats = compute_stats(samples)?;

    if stats.mean_ns > limits.max_mean_ns as f64 {
        return Some(TimingAnomaly::SlowMean {
            mean_ns: stats.mean_ns,
        });
    }
    if stats.stddev_ns > limits.max_stddev_ns as f64 {
        return Some(TimingAnomaly::HighVariance {
            stddev_ns: stats.stddev_ns,
        });
    }
    if stats.stddev_ns == 0.0 {
        return None;
    }

    let sigma_limit = limits.outlier_sigma * stats.stddev_ns;
    let floor = limits.outlier_min_deviation_ns as f64;
    samples.iter().find_map(|&sample| {
        let deviation = (sample as f64 - stats.mean_ns).abs();
        (deviation > sigma_limit && deviation >= floor).then_some(TimingAnomaly::Outlier {
            sample_ns: sample,
            deviation_ns: deviation,
        })
    })
}

/// Every sample slower than the stepped baseline, and uniformly so
pub fn is_single_stepping(samples: &[u64], config: &SingleStepConfig) -> bool {
    let Some(stats) = compute_stats(samples) else {
        return false;
    };
    let limit = config.baseline_ns as f64 * config.slowdown_factor;
    stats.min_ns as f64 > limit && stats.variation() < config.max_variation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tight_fast() -> Vec<u64> {
        vec![
            21_000, 20_500, 20_800, 21_200, 20_900, 21_100, 20_700, 21_000, 20_600, 21_300,
            20_950, 21_050, 20_850, 21_150, 20_750, 21_000,
        ]
    }

    #[test]
    fn test_tight_fast_samples_are_clean() {
        assert_eq!(analyze_samples(&tight_fast(), &TimingThresholds::default()), None);
        assert!(!is_single_stepping(&tight_fast(), &SingleStepConfig::default()));
    }

    #[test]
    fn test_high_variance_flagged() {
        let samples: Vec<u64> = (0..16)
            .map(|i| if i % 2 == 0 { 100_000 } else { 1_500_000 })
            .collect();
        match analyze_samples(&samples, &TimingThresholds::default()) {
            Some(TimingAnomaly::HighVariance { stddev_ns }) => {
                assert!((stddev_ns - 700_000.0).abs() < 1.0)
            }
            other => panic!("expected high variance, got {:?}", other),
        }
    }

    #[test]
    fn test_slow_mean_flagged() {
        let samples = vec![2_000_000; 12];
        assert!(matches!(
            analyze_samples(&samples, &TimingThresholds::default()),
            Some(TimingAnomaly::SlowMean { .. })
        ));
    }

    #[test]
    fn test_single_spike_is_outlier() {
        let mut samples = vec![20_000; 15];
        samples.push(1_000_000);
        assert_eq!(
            analyze_samples(&samples, &TimingThresholds::default()),
            Some(TimingAnomaly::Outlier {
                sample_ns: 1_000_000,
                deviation_ns: 918_750.0,
            })
        );
    }

    #[test]
    fn test_three_sigma_spike_is_outlier() {
        // mean 23_750, stddev ~14_524: the spike sits ~3.9 sigma out
        let mut samples = vec![20_000; 15];
        samples.push(80_000);
        assert_eq!(
            analyze_samples(&samples, &TimingThresholds::default()),
            Some(TimingAnomaly::Outlier {
                sample_ns: 80_000,
                deviation_ns: 56_250.0,
            })
        );
    }

    #[test]
    fn test_absolute_floor_is_opt_in() {
        let mut samples = vec![20_000; 15];
        samples.push(80_000);
        let limits = TimingThresholds {
            outlier_min_deviation_ns: 100_000,
            ..TimingThresholds::default()
        };
        assert_eq!(analyze_samples(&samples, &limits), None);
    }

    #[test]
    fn test_single_stepping_needs_slow_and_steady() {
        let config = SingleStepConfig::default();
        let steady_slow: Vec<u64> = (0..16).map(|i| 2_000_000 + (i % 3) * 10_000).collect();
        assert!(is_single_stepping(&steady_slow, &config));

        let jittery_slow: Vec<u64> = (0..16)
            .map(|i| if i % 2 == 0 { 300_000 } else { 3_000_000 })
            .collect();
        assert!(!is_single_stepping(&jittery_slow, &config));

        assert!(!is_single_stepping(&[], &config));
    }

    #[test]
    fn test_measure_workload_count() {
        let samples = measure_workload(5);
        assert_eq!(samples.len(), 5);
    }

    #[test]
    fn test_empty_samples() {
        assert!(compute_stats(&[]).is_none());
        assert_eq!(analyze_samples(&[], &TimingThresholds::default()), None);
    }
}
