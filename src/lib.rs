pub mod aggregator;
pub mod config;
pub mod data_loading;
pub mod heart_analysis;
pub mod output;
pub mod peak_detection;
pub mod sample_buffer;
pub mod spo2;

use std::time::Duration;

/// Lowest heart rate ever reported, in BPM.
pub const HEART_RATE_MIN_BPM: u32 = 40;
/// Highest heart rate ever reported, in BPM.
pub const HEART_RATE_MAX_BPM: u32 = 200;

/// One paired IR/red reading from the pulse-oximetry sensor.
///
/// `timestamp` is monotonic time since the start of the session. Intensities
/// are signed so that an out-of-range value from a misbehaving driver can be
/// represented and absorbed instead of rejected at the type boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    pub timestamp: Duration,
    pub ir: i32,
    pub red: i32,
}

impl RawSample {
    pub fn new(timestamp: Duration, ir: i32, red: i32) -> Self {
        Self { timestamp, ir, red }
    }

    /// Both channels carry a usable (strictly positive) intensity.
    pub fn has_signal(&self) -> bool {
        self.ir > 0 && self.red > 0
    }
}

/// The per-tick output of the vitals pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VitalsSample {
    pub timestamp: Duration,
    pub heart_rate_bpm: Option<u32>,
    pub spo2_percent: Option<f64>,
    pub valid: bool,
}

impl VitalsSample {
    pub fn new(timestamp: Duration, heart_rate_bpm: Option<u32>, spo2_percent: Option<f64>) -> Self {
        Self {
            timestamp,
            heart_rate_bpm,
            spo2_percent,
            valid: heart_rate_bpm.is_some() || spo2_percent.is_some(),
        }
    }
}
