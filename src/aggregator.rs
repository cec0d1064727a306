use crate::config::{ConfigError, VitalsConfig};
use crate::heart_analysis::{HeartRateEstimator, IntervalEstimator, IntervalStats};
use crate::peak_detection::PeakValleyDetector;
use crate::sample_buffer::SampleBuffer;
use crate::spo2::estimate_spo2;
use crate::{RawSample, VitalsSample};
use anyhow::{anyhow, Result};
use log::{debug, trace, warn};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Receives every vitals sample the pipeline produces.
pub trait Publisher {
    fn publish(&mut self, vitals: &VitalsSample) -> Result<()>;
}

impl<P: Publisher + ?Sized> Publisher for Box<P> {
    fn publish(&mut self, vitals: &VitalsSample) -> Result<()> {
        (**self).publish(vitals)
    }
}

impl Publisher for Vec<VitalsSample> {
    fn publish(&mut self, vitals: &VitalsSample) -> Result<()> {
        self.push(*vitals);
        Ok(())
    }
}

/// Where the aggregator is within one ingestion cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Buffering,
    PeakDetecting,
    IntervalUpdating,
    Reducing,
    Emitting,
}

/// Runs the whole estimation pipeline, one raw sample at a time.
#[derive(Debug, Clone)]
pub struct VitalsAggregator {
    buffer: SampleBuffer,
    detector: PeakValleyDetector,
    intervals: IntervalEstimator,
    heart_rate: HeartRateEstimator,
    stage: Stage,
    ingested: u64,
}

impl VitalsAggregator {
    pub fn new(config: &VitalsConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            buffer: SampleBuffer::new(config.window_capacity),
            detector: PeakValleyDetector::new(config.noise_floor, config.peak_history),
            intervals: IntervalEstimator::new(
                config.min_interval,
                config.max_interval,
                config.interval_history,
            ),
            heart_rate: HeartRateEstimator::new(config.min_accepted_intervals),
            stage: Stage::Idle,
            ingested: 0,
        })
    }

    fn enter(&mut self, stage: Stage) {
        trace!("{:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }

    /// Process one raw sample and produce its vitals.
    ///
    /// Samples with a non-positive channel are still buffered so the window
    /// keeps its time spacing, but carry no SpO2 for this tick.
    pub fn ingest(&mut self, sample: RawSample) -> VitalsSample {
        self.ingested += 1;
        if !sample.has_signal() {
            trace!(
                "no signal at {:.3}s (ir={}, red={})",
                sample.timestamp.as_secs_f64(),
                sample.ir,
                sample.red
            );
        }

        if let Some(previous) = self.buffer.latest() {
            if sample.timestamp < previous.timestamp {
                warn!(
                    "sample clock went backwards ({:.3}s -> {:.3}s)",
                    previous.timestamp.as_secs_f64(),
                    sample.timestamp.as_secs_f64()
                );
            }
        }

        self.enter(Stage::Buffering);
        self.buffer.push(sample);

        self.enter(Stage::PeakDetecting);
        let new_peaks = self
            .detector
            .update(self.buffer.snapshot(), self.buffer.first_position());

        if !new_peaks.is_empty() {
            self.enter(Stage::IntervalUpdating);
            for peak in &new_peaks {
                self.intervals.on_peak(peak);
            }
            if let Some(stats) = IntervalStats::from_history(self.intervals.accepted()) {
                debug!(
                    "intervals: mean {:.0}ms, sdnn {:.1}ms, rmssd {:.1}ms, amplitude {:?}",
                    stats.mean_interval,
                    stats.sdnn,
                    stats.rmssd,
                    self.detector.pulse_amplitude()
                );
            }
        }

        self.enter(Stage::Reducing);
        let heart_rate = self.heart_rate.estimate(self.intervals.accepted());
        let spo2 = estimate_spo2(sample.ir, sample.red);

        self.enter(Stage::Emitting);
        let vitals = VitalsSample::new(sample.timestamp, heart_rate, spo2);

        self.enter(Stage::Idle);
        vitals
    }

    /// `ingest`, then hand the result to `publisher`. A publish failure is
    /// logged and does not interrupt the pipeline.
    pub fn ingest_and_publish<P: Publisher + ?Sized>(
        &mut self,
        sample: RawSample,
        publisher: &mut P,
    ) -> VitalsSample {
        let vitals = self.ingest(sample);
        if let Err(e) = publisher.publish(&vitals) {
            warn!("failed to publish vitals: {:#}", e);
        }
        vitals
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn ingested(&self) -> u64 {
        self.ingested
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn detector(&self) -> &PeakValleyDetector {
        &self.detector
    }

    pub fn intervals(&self) -> &IntervalEstimator {
        &self.intervals
    }
}

/// The most recently completed vitals sample, shareable across threads.
#[derive(Debug, Clone, Default)]
pub struct LatestVitals(Arc<Mutex<Option<VitalsSample>>>);

impl LatestVitals {
    pub fn get(&self) -> Option<VitalsSample> {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, vitals: VitalsSample) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = Some(vitals);
    }
}

/// Runs a `VitalsAggregator` on its own thread, fed through a bounded queue.
///
/// The worker thread is the only writer to the pipeline state. Readers only
/// ever see whole `VitalsSample`s through `LatestVitals`.
pub struct VitalsWorker<P> {
    tx: Option<SyncSender<RawSample>>,
    handle: Option<JoinHandle<(VitalsAggregator, P)>>,
    latest: LatestVitals,
}

impl<P: Publisher + Send + 'static> VitalsWorker<P> {
    pub fn spawn(aggregator: VitalsAggregator, publisher: P, queue_capacity: usize) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(queue_capacity);
        let latest = LatestVitals::default();
        let worker_latest = latest.clone();

        let handle = thread::Builder::new()
            .name("vitals".to_string())
            .spawn(move || Self::run(rx, aggregator, publisher, worker_latest))?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            latest,
        })
    }

    fn run(
        rx: Receiver<RawSample>,
        mut aggregator: VitalsAggregator,
        mut publisher: P,
        latest: LatestVitals,
    ) -> (VitalsAggregator, P) {
        for sample in rx {
            let vitals = aggregator.ingest_and_publish(sample, &mut publisher);
            latest.set(vitals);
        }
        debug!("vitals worker drained after {} samples", aggregator.ingested());
        (aggregator, publisher)
    }

    /// Queue a sample, waiting while the queue is full.
    pub fn submit(&self, sample: RawSample) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow!("vitals worker already stopped"))?;
        tx.send(sample)
            .map_err(|_| anyhow!("vitals worker thread has exited"))
    }

    pub fn latest(&self) -> LatestVitals {
        self.latest.clone()
    }

    /// Close the queue, let the worker finish the samples already queued, and
    /// hand back the pipeline and publisher.
    pub fn stop(mut self) -> Result<(VitalsAggregator, P)> {
        self.tx.take();
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow!("vitals worker already joined"))?;
        handle
            .join()
            .map_err(|_| anyhow!("vitals worker thread panicked"))
    }
}

impl<P> Drop for VitalsWorker<P> {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
