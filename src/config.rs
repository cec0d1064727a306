use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Reasons a `VitalsConfig` is refused at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("window capacity must be at least 1 sample")]
    ZeroWindowCapacity,
    #[error("invalid beat interval range [{min:?}, {max:?}]: bounds must be positive and min < max")]
    InvalidIntervalRange { min: Duration, max: Duration },
    #[error("invalid BPM range [{min}, {max}]: bounds must be positive and min < max")]
    InvalidBpmRange { min: f64, max: f64 },
    #[error("noise floor must not be negative (got {0})")]
    NegativeNoiseFloor(i32),
    #[error("{0} history must hold at least 1 entry")]
    ZeroHistory(&'static str),
    #[error("min_accepted_intervals ({required}) must be between 1 and the interval history capacity ({capacity})")]
    MinIntervalsOutOfRange { required: usize, capacity: usize },
}

/// Tuning knobs for the vitals estimation core.
#[derive(Debug, Clone, PartialEq)]
pub struct VitalsConfig {
    /// Number of raw samples kept in the sliding window.
    pub window_capacity: usize,
    /// Minimum IR intensity for an extremum to count as a pulse.
    pub noise_floor: i32,
    /// Shortest admissible beat interval.
    pub min_interval: Duration,
    /// Longest admissible beat interval.
    pub max_interval: Duration,
    /// Accepted intervals required before a heart rate is reported.
    pub min_accepted_intervals: usize,
    /// Detected peaks (and valleys) remembered.
    pub peak_history: usize,
    /// Accepted beat intervals remembered.
    pub interval_history: usize,
}

impl Default for VitalsConfig {
    fn default() -> Self {
        Self {
            window_capacity: 50,
            noise_floor: 20_000,
            min_interval: Duration::from_millis(300),
            max_interval: Duration::from_millis(1500),
            min_accepted_intervals: 3,
            peak_history: 10,
            interval_history: 4,
        }
    }
}

impl VitalsConfig {
    /// Default configuration with the admissible interval range derived from
    /// a physiological BPM range.
    pub fn from_bpm_range(min_bpm: f64, max_bpm: f64) -> Result<Self, ConfigError> {
        let config = Self::default().with_bpm_range(min_bpm, max_bpm)?;
        config.validate()?;
        Ok(config)
    }

    /// Replace the interval range with `[60 / max_bpm, 60 / min_bpm]` seconds.
    pub fn with_bpm_range(mut self, min_bpm: f64, max_bpm: f64) -> Result<Self, ConfigError> {
        let invalid = ConfigError::InvalidBpmRange {
            min: min_bpm,
            max: max_bpm,
        };
        if !(min_bpm.is_finite() && max_bpm.is_finite()) || min_bpm <= 0.0 || min_bpm >= max_bpm {
            return Err(invalid);
        }
        self.min_interval =
            Duration::try_from_secs_f64(60.0 / max_bpm).map_err(|_| invalid.clone())?;
        self.max_interval = Duration::try_from_secs_f64(60.0 / min_bpm).map_err(|_| invalid)?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_capacity == 0 {
            return Err(ConfigError::ZeroWindowCapacity);
        }
        if self.min_interval.is_zero() || self.min_interval >= self.max_interval {
            return Err(ConfigError::InvalidIntervalRange {
                min: self.min_interval,
                max: self.max_interval,
            });
        }
        if self.noise_floor < 0 {
            return Err(ConfigError::NegativeNoiseFloor(self.noise_floor));
        }
        if self.peak_history == 0 {
            return Err(ConfigError::ZeroHistory("peak"));
        }
        if self.interval_history == 0 {
            return Err(ConfigError::ZeroHistory("interval"));
        }
        if self.min_accepted_intervals == 0 || self.min_accepted_intervals > self.interval_history {
            return Err(ConfigError::MinIntervalsOutOfRange {
                required: self.min_accepted_intervals,
                capacity: self.interval_history,
            });
        }
        Ok(())
    }
}

/// Estimate heart rate and SpO2 from a pulse-oximetry sample stream
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Replay samples from a CSV recording (timestamp_ms,ir,red)
    #[arg(long, conflicts_with = "simulate")]
    pub csv_input: Option<PathBuf>,

    /// Generate a synthetic PPG waveform instead of reading real samples (demo only)
    #[arg(long)]
    pub simulate: bool,

    /// Sampling period of the source in milliseconds
    #[arg(long, default_value = "10")]
    pub sample_period_ms: u64,

    /// Sliding window size in samples
    #[arg(long, default_value = "50")]
    pub window_capacity: usize,

    /// Minimum IR intensity for a peak to count as a pulse
    #[arg(long, default_value = "20000")]
    pub noise_floor: i32,

    /// Lowest admissible heart rate in BPM
    #[arg(long, default_value = "40.0")]
    pub min_bpm: f64,

    /// Highest admissible heart rate in BPM
    #[arg(long, default_value = "200.0")]
    pub max_bpm: f64,

    /// Accepted beat intervals required before a heart rate is reported
    #[arg(long, default_value = "3")]
    pub min_accepted_intervals: usize,

    /// Heart rate of the synthetic waveform in BPM
    #[arg(long, default_value = "75.0")]
    pub sim_bpm: f64,

    /// Red/IR intensity ratio of the synthetic waveform
    #[arg(long, default_value = "0.9")]
    pub sim_ratio: f64,

    /// Length of the synthetic recording in seconds
    #[arg(long, default_value = "30.0")]
    pub sim_seconds: f64,

    /// Fixed temperature reading merged into every telemetry message
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Write telemetry as JSON lines to this file instead of stdout
    #[arg(long)]
    pub json_output: Option<PathBuf>,

    /// Prefix each JSON line with this topic (e.g. health_metrics)
    #[arg(long)]
    pub topic: Option<String>,

    /// Also write every vitals sample to this CSV file
    #[arg(long)]
    pub csv_output: Option<PathBuf>,

    /// Pace the loop at the sampling period instead of running flat out
    #[arg(long)]
    pub realtime: bool,

    /// Run the estimator on its own thread fed by a bounded queue
    #[arg(long)]
    pub threaded: bool,

    /// Warn after this many consecutive ticks without any reading
    #[arg(long, default_value = "200")]
    pub warn_after: usize,

    /// Stop after this many samples
    #[arg(long)]
    pub max_samples: Option<usize>,
}

impl Args {
    pub fn vitals_config(&self) -> Result<VitalsConfig, ConfigError> {
        let config = VitalsConfig {
            window_capacity: self.window_capacity,
            noise_floor: self.noise_floor,
            min_accepted_intervals: self.min_accepted_intervals,
            ..VitalsConfig::default()
        }
        .with_bpm_range(self.min_bpm, self.max_bpm)?;
        config.validate()?;
        Ok(config)
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(VitalsConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_bpm_range_maps_to_interval_range() {
        let config = VitalsConfig::from_bpm_range(40.0, 200.0).unwrap();
        assert!((config.min_interval.as_secs_f64() - 0.3).abs() < 1e-6);
        assert_eq!(config.max_interval, Duration::from_millis(1500));
    }

    #[test]
    fn test_rejects_zero_window() {
        let config = VitalsConfig {
            window_capacity: 0,
            ..VitalsConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroWindowCapacity));
    }

    #[test]
    fn test_rejects_inverted_interval_range() {
        let config = VitalsConfig {
            min_interval: Duration::from_millis(1500),
            max_interval: Duration::from_millis(1500),
            ..VitalsConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidIntervalRange { .. })
        ));
        assert!(VitalsConfig::from_bpm_range(120.0, 60.0).is_err());
        assert!(VitalsConfig::from_bpm_range(0.0, 60.0).is_err());
        assert!(VitalsConfig::from_bpm_range(f64::NAN, 60.0).is_err());
    }

    #[test]
    fn test_rejects_unreachable_warm_up() {
        let config = VitalsConfig {
            min_accepted_intervals: 5,
            interval_history: 4,
            ..VitalsConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::MinIntervalsOutOfRange {
                required: 5,
                capacity: 4
            })
        );
    }

    #[test]
    fn test_args_map_to_config() {
        let args = Args::parse_from([
            "pulse-vitals",
            "--simulate",
            "--window-capacity",
            "80",
            "--min-bpm",
            "30",
            "--max-bpm",
            "240",
        ]);
        let config = args.vitals_config().unwrap();
        assert_eq!(config.window_capacity, 80);
        assert_eq!(config.min_interval, Duration::from_millis(250));
        assert_eq!(config.max_interval, Duration::from_secs(2));
    }
}
