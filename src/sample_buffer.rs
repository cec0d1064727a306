use crate::RawSample;

/// Fixed-capacity FIFO window over the most recent raw samples.
///
/// Samples go into a `Vec` of twice the window size and the older half is
/// dropped in one drain when it fills up, so the window is always a single
/// slice and eviction is amortised O(1).
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: Vec<RawSample>,
    capacity: usize,
    pushed: u64,
}

impl SampleBuffer {
    /// `capacity` is validated by `VitalsConfig`; a zero capacity is bumped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity * 2),
            capacity,
            pushed: 0,
        }
    }

    /// Append at the tail, evicting the oldest sample when full.
    pub fn push(&mut self, sample: RawSample) {
        if self.samples.len() == self.capacity * 2 {
            self.samples.drain(..self.capacity);
        }
        self.samples.push(sample);
        self.pushed += 1;
    }

    /// Current window, oldest first.
    pub fn snapshot(&self) -> &[RawSample] {
        let start = self.samples.len().saturating_sub(self.capacity);
        &self.samples[start..]
    }

    pub fn len(&self) -> usize {
        self.samples.len().min(self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&RawSample> {
        self.samples.last()
    }

    /// Samples pushed since the buffer was created.
    pub fn pushed(&self) -> u64 {
        self.pushed
    }

    /// Stream position (0-based push count) of the first sample in `snapshot`.
    pub fn first_position(&self) -> u64 {
        self.pushed - self.len() as u64
    }
}
