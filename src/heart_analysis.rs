use crate::peak_detection::{PeakEvent, RollingHistory};
use crate::{HEART_RATE_MAX_BPM, HEART_RATE_MIN_BPM};
use log::debug;
use std::time::Duration;

/// What happened to the interval ending at a newly detected peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntervalOutcome {
    /// First peak seen; there is nothing to measure against yet.
    FirstPeak,
    Accepted(Duration),
    /// Outside the admissible range (or timestamps went backwards).
    Rejected(Option<Duration>),
}

/// Turns consecutive peaks into beat intervals and keeps the admissible ones.
///
/// Rejection is plain range clamping against `[min_interval, max_interval]`.
/// A missed beat that lands inside the range (e.g. 1.2s at 100 BPM) is accepted
/// and skews the mean; there is no statistical outlier test at this stage.
#[derive(Debug, Clone)]
pub struct IntervalEstimator {
    min_interval: Duration,
    max_interval: Duration,
    previous_peak: Option<Duration>,
    accepted: RollingHistory<Duration>,
    rejected_count: usize,
}

impl IntervalEstimator {
    pub fn new(min_interval: Duration, max_interval: Duration, history: usize) -> Self {
        Self {
            min_interval,
            max_interval,
            previous_peak: None,
            accepted: RollingHistory::new(history),
            rejected_count: 0,
        }
    }

    /// Measure the interval from the previous peak to `peak`.
    ///
    /// The reference always advances to `peak`, accepted or not, so a single
    /// glitch cannot stall interval measurement.
    pub fn on_peak(&mut self, peak: &PeakEvent) -> IntervalOutcome {
        let previous = self.previous_peak.replace(peak.timestamp);
        let Some(previous) = previous else {
            return IntervalOutcome::FirstPeak;
        };

        match peak.timestamp.checked_sub(previous) {
            Some(interval) if interval >= self.min_interval && interval <= self.max_interval => {
                debug!(
                    "interval accepted: {:.0}ms ({} in history)",
                    interval.as_secs_f64() * 1000.0,
                    self.accepted.len() + 1
                );
                self.accepted.push(interval);
                IntervalOutcome::Accepted(interval)
            }
            other => {
                self.rejected_count += 1;
                debug!(
                    "interval rejected: {:?} outside [{:?}, {:?}]",
                    other, self.min_interval, self.max_interval
                );
                IntervalOutcome::Rejected(other)
            }
        }
    }

    pub fn accepted(&self) -> &RollingHistory<Duration> {
        &self.accepted
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected_count
    }
}

/// Reduces the accepted interval history to a heart rate.
#[derive(Debug, Clone, Copy)]
pub struct HeartRateEstimator {
    min_intervals: usize,
}

impl HeartRateEstimator {
    pub fn new(min_intervals: usize) -> Self {
        Self {
            min_intervals: min_intervals.max(1),
        }
    }

    /// `60 / mean interval`, rounded and clamped to the reportable range, or
    /// `None` while fewer than the required intervals have been accepted.
    pub fn estimate(&self, intervals: &RollingHistory<Duration>) -> Option<u32> {
        if intervals.len() < self.min_intervals {
            return None;
        }

        let total: f64 = intervals.iter().map(Duration::as_secs_f64).sum();
        let mean = total / intervals.len() as f64;
        if mean <= 0.0 {
            return None;
        }

        let bpm = (60.0 / mean).round();
        let bpm = bpm.clamp(HEART_RATE_MIN_BPM as f64, HEART_RATE_MAX_BPM as f64) as u32;
        debug!("heart rate {} BPM from mean interval {:.3}s", bpm, mean);
        Some(bpm)
    }
}

/// Beat-to-beat variability over the accepted intervals, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalStats {
    pub mean_interval: f64,
    pub sdnn: f64,
    pub rmssd: f64,
}

impl IntervalStats {
    /// Needs at least two intervals.
    pub fn from_history(intervals: &RollingHistory<Duration>) -> Option<Self> {
        let rr: Vec<f64> = intervals
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        if rr.len() < 2 {
            return None;
        }

        let mean_interval = rr.iter().sum::<f64>() / rr.len() as f64;
        let sdnn = (rr
            .iter()
            .map(|&x| {
                let diff = x - mean_interval;
                diff * diff
            })
            .sum::<f64>()
            / (rr.len() - 1) as f64)
            .sqrt();

        let rr_sqdiff: Vec<f64> = rr.windows(2).map(|w| (w[1] - w[0]).powi(2)).collect();
        let rmssd = (rr_sqdiff.iter().sum::<f64>() / rr_sqdiff.len() as f64).sqrt();

        Some(IntervalStats {
            mean_interval,
            sdnn,
            rmssd,
        })
    }
}
