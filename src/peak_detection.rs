use crate::RawSample;
use log::{debug, trace};
use std::collections::VecDeque;
use std::time::Duration;

/// A strict local maximum of the IR channel above the noise floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeakEvent {
    pub timestamp: Duration,
    pub ir_value: i32,
}

/// A strict local minimum of the IR channel above the noise floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValleyEvent {
    pub timestamp: Duration,
    pub ir_value: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extremum {
    Peak(PeakEvent),
    Valley(ValleyEvent),
}

impl Extremum {
    pub fn timestamp(&self) -> Duration {
        match self {
            Extremum::Peak(p) => p.timestamp,
            Extremum::Valley(v) => v.timestamp,
        }
    }
}

/// Bounded rolling history, oldest entry evicted first.
#[derive(Debug, Clone)]
pub struct RollingHistory<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Copy> RollingHistory<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().copied().collect()
    }
}

/// Finds pulse peaks and valleys in the sample window.
///
/// Every sample position is judged exactly once, when its successor arrives.
/// Positions count pushes into the window rather than timestamps, so a clock
/// that jumps backwards does not hide later peaks.
#[derive(Debug, Clone)]
pub struct PeakValleyDetector {
    noise_floor: i32,
    peaks: RollingHistory<PeakEvent>,
    valleys: RollingHistory<ValleyEvent>,
    next_position: u64,
}

impl PeakValleyDetector {
    pub fn new(noise_floor: i32, history: usize) -> Self {
        Self {
            noise_floor,
            peaks: RollingHistory::new(history),
            valleys: RollingHistory::new(history),
            next_position: 1,
        }
    }

    /// Classify the middle of three consecutive samples.
    ///
    /// A sample without signal on either channel is a gap: it is never an
    /// extremum and never serves as a neighbour.
    fn extremum_at(&self, triple: &[RawSample]) -> Option<Extremum> {
        let (prev, cur, next) = (&triple[0], &triple[1], &triple[2]);
        if !(prev.has_signal() && cur.has_signal() && next.has_signal()) {
            return None;
        }
        if cur.ir <= self.noise_floor {
            return None;
        }
        if cur.ir > prev.ir && cur.ir > next.ir {
            Some(Extremum::Peak(PeakEvent {
                timestamp: cur.timestamp,
                ir_value: cur.ir,
            }))
        } else if cur.ir < prev.ir && cur.ir < next.ir {
            Some(Extremum::Valley(ValleyEvent {
                timestamp: cur.timestamp,
                ir_value: cur.ir,
            }))
        } else {
            None
        }
    }

    /// All strict extrema above the noise floor, in window order.
    ///
    /// The first and last samples are never extrema; fewer than three samples
    /// yields nothing.
    pub fn scan(&self, window: &[RawSample]) -> Vec<Extremum> {
        window
            .windows(3)
            .filter_map(|triple| self.extremum_at(triple))
            .collect()
    }

    /// Record the extrema at window positions not judged before and return the
    /// new peaks, oldest first.
    ///
    /// `first_position` is the push count of `window[0]` since the stream
    /// started (see `SampleBuffer::first_position`).
    pub fn update(&mut self, window: &[RawSample], first_position: u64) -> Vec<PeakEvent> {
        let mut new_peaks = Vec::new();
        if window.len() < 3 {
            return new_peaks;
        }

        let last_center = window.len() - 2;
        let first_center = usize::try_from(self.next_position.saturating_sub(first_position))
            .unwrap_or(usize::MAX)
            .max(1);

        for center in first_center..=last_center {
            match self.extremum_at(&window[center - 1..=center + 1]) {
                Some(Extremum::Peak(peak)) => {
                    debug!(
                        "peak at {:.3}s (ir={})",
                        peak.timestamp.as_secs_f64(),
                        peak.ir_value
                    );
                    self.peaks.push(peak);
                    new_peaks.push(peak);
                }
                Some(Extremum::Valley(valley)) => {
                    trace!(
                        "valley at {:.3}s (ir={})",
                        valley.timestamp.as_secs_f64(),
                        valley.ir_value
                    );
                    self.valleys.push(valley);
                }
                None => {}
            }
        }

        self.next_position = self
            .next_position
            .max(first_position + last_center as u64 + 1);
        new_peaks
    }

    pub fn peaks(&self) -> &RollingHistory<PeakEvent> {
        &self.peaks
    }

    pub fn valleys(&self) -> &RollingHistory<ValleyEvent> {
        &self.valleys
    }

    /// IR swing between the latest peak and the latest valley before it.
    pub fn pulse_amplitude(&self) -> Option<i32> {
        let peak = self.peaks.last()?;
        let valley = self
            .valleys
            .iter()
            .rev()
            .find(|v| v.timestamp < peak.timestamp)?;
        Some(peak.ir_value - valley.ir_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(values: &[i32]) -> Vec<RawSample> {
        values
            .iter()
            .enumerate()
            .map(|(i, &ir)| RawSample::new(Duration::from_millis(i as u64 * 10), ir, ir))
            .collect()
    }

    #[test]
    fn test_short_window_yields_nothing() {
        let detector = PeakValleyDetector::new(0, 10);
        assert!(detector.scan(&window(&[])).is_empty());
        assert!(detector.scan(&window(&[5, 9])).is_empty());
    }

    #[test]
    fn test_finds_strict_extrema() {
        let detector = PeakValleyDetector::new(0, 10);
        let events = detector.scan(&window(&[1, 5, 2, 2, 0, 3, 3]));
        assert_eq!(
            events,
            vec![Extremum::Peak(PeakEvent {
                timestamp: Duration::from_millis(10),
                ir_value: 5
            })]
        );

        let events = detector.scan(&window(&[4, 1, 4]));
        assert_eq!(
            events,
            vec![Extremum::Valley(ValleyEvent {
                timestamp: Duration::from_millis(10),
                ir_value: 1
            })]
        );
    }

    #[test]
    fn test_ignores_plateaus_and_ends() {
        let detector = PeakValleyDetector::new(0, 10);
        let events = detector.scan(&window(&[9, 1, 5, 5, 1, 9]));
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.timestamp() != Duration::ZERO));
        assert!(detector
            .scan(&window(&[9, 1, 5, 5, 1, 9]))
            .iter()
            .all(|e| !matches!(e, Extremum::Peak(_))));
    }

    #[test]
    fn test_noise_floor_suppresses_small_extrema() {
        let detector = PeakValleyDetector::new(100, 10);
        assert!(detector.scan(&window(&[10, 90, 10])).is_empty());
        assert_eq!(detector.scan(&window(&[10, 150, 10])).len(), 1);
    }

    #[test]
    fn test_update_reports_each_peak_once() {
        let mut detector = PeakValleyDetector::new(0, 10);
        let samples = window(&[1, 5, 2, 1, 2, 7, 3]);

        assert_eq!(detector.update(&samples[..3], 0).len(), 1);
        assert!(detector.update(&samples[..4], 0).is_empty());
        assert!(detector.update(&samples[..6], 0).is_empty());
        let new = detector.update(&samples, 0);
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].ir_value, 7);
        assert_eq!(detector.peaks().len(), 2);
        assert_eq!(detector.valleys().len(), 1);
        assert_eq!(detector.pulse_amplitude(), Some(6));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut detector = PeakValleyDetector::new(0, 2);
        let samples = window(&[1, 3, 1, 4, 1, 5, 1]);
        detector.update(&samples, 0);
        let values: Vec<i32> = detector.peaks().iter().map(|p| p.ir_value).collect();
        assert_eq!(values, vec![4, 5]);
        assert_eq!(detector.peaks().capacity(), 2);
        assert_eq!(detector.valleys().len(), 2);
    }

    #[test]
    fn test_non_positive_samples_never_peak() {
        let detector = PeakValleyDetector::new(0, 10);
        assert!(detector.scan(&window(&[-5, 0, -5])).is_empty());
        assert!(detector.scan(&window(&[0, 0, 0, 0])).is_empty());
    }

    #[test]
    fn test_gap_sample_is_not_a_neighbour() {
        let detector = PeakValleyDetector::new(0, 10);
        // 5 would be a peak next to the dropout if the dropout counted
        assert!(detector.scan(&window(&[4, 5, 0, 3])).is_empty());
        assert!(detector.scan(&window(&[3, 0, 5, 4])).is_empty());

        let mut samples = window(&[2, 6, 2]);
        samples[2].red = 0;
        assert!(detector.scan(&samples).is_empty());
    }

    #[test]
    fn test_new_extrema_follow_push_position_not_time() {
        let mut detector = PeakValleyDetector::new(0, 10);
        let mut samples = window(&[1, 5, 1]);
        assert_eq!(detector.update(&samples, 0).len(), 1);

        // the clock restarts but the stream keeps going
        samples.extend(window(&[2, 8, 2]));
        let new = detector.update(&samples, 0);
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].ir_value, 8);
        assert_eq!(new[0].timestamp, Duration::from_millis(10));

        // the same window slid by one: nothing new to judge
        assert!(detector.update(&samples[1..], 1).is_empty());
        assert_eq!(detector.peaks().len(), 2);
    }
}
