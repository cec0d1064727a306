use crate::RawSample;
use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

/// Anything that produces raw sensor samples in arrival order.
pub trait SampleSource {
    /// The next sample, or `None` once the source is exhausted.
    fn next_sample(&mut self) -> Result<Option<RawSample>>;
}

/// Anything that produces an ambient temperature reading.
pub trait TemperatureSource {
    fn read_temperature(&mut self) -> Result<Option<f32>>;
}

/// One row of a recorded sample stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CsvSampleRow {
    pub timestamp_ms: u64,
    pub ir: i32,
    pub red: i32,
}

impl From<CsvSampleRow> for RawSample {
    fn from(row: CsvSampleRow) -> Self {
        RawSample::new(Duration::from_millis(row.timestamp_ms), row.ir, row.red)
    }
}

impl From<&RawSample> for CsvSampleRow {
    fn from(sample: &RawSample) -> Self {
        CsvSampleRow {
            timestamp_ms: sample.timestamp.as_millis() as u64,
            ir: sample.ir,
            red: sample.red,
        }
    }
}

/// Replays a recording with columns `timestamp_ms,ir,red`.
///
/// Rows that fail to parse are skipped with a warning.
pub struct CsvSampleSource<R: Read> {
    rows: csv::DeserializeRecordsIntoIter<R, CsvSampleRow>,
    skipped: usize,
}

impl CsvSampleSource<File> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open sample recording: {}", path.display()))?;
        Ok(Self::from_reader(file))
    }
}

impl<R: Read> CsvSampleSource<R> {
    pub fn from_reader(reader: R) -> Self {
        let rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        Self {
            rows: rdr.into_deserialize(),
            skipped: 0,
        }
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<R: Read> SampleSource for CsvSampleSource<R> {
    fn next_sample(&mut self) -> Result<Option<RawSample>> {
        for row in self.rows.by_ref() {
            match row {
                Ok(row) => return Ok(Some(row.into())),
                Err(e) => {
                    self.skipped += 1;
                    warn!("Skipping malformed sample row: {}", e);
                }
            }
        }
        Ok(None)
    }
}

/// Write samples in the format `CsvSampleSource` reads.
pub fn write_samples_csv(path: &Path, samples: &[RawSample]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create sample recording: {}", path.display()))?;
    for sample in samples {
        writer.serialize(CsvSampleRow::from(sample))?;
    }
    writer.flush()?;
    Ok(())
}

/// Synthetic PPG waveform for demos and tests. Never used implicitly: the host
/// only builds one when simulation is explicitly requested.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    period: Duration,
    total: usize,
    index: usize,
    bpm: f64,
    dc: f64,
    ac: f64,
    red_ratio: f64,
}

impl SyntheticSource {
    pub fn new(period: Duration, seconds: f64, bpm: f64, red_ratio: f64) -> Self {
        let total = if period.is_zero() {
            0
        } else {
            (seconds.max(0.0) / period.as_secs_f64()).round() as usize
        };
        debug!(
            "synthetic source: {} samples at {:?}, {} BPM, red/ir {}",
            total, period, bpm, red_ratio
        );
        Self {
            period,
            total,
            index: 0,
            bpm,
            dc: 60_000.0,
            ac: 2_000.0,
            red_ratio,
        }
    }

    /// Baseline and pulse amplitude of the IR channel.
    pub fn with_levels(mut self, dc: f64, ac: f64) -> Self {
        self.dc = dc;
        self.ac = ac;
        self
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn sample_at(&self, index: usize) -> RawSample {
        let timestamp = self.period * index as u32;
        let t = timestamp.as_secs_f64();
        let ir = self.dc + self.ac * (2.0 * PI * self.bpm / 60.0 * t).sin();
        let red = ir * self.red_ratio;
        RawSample::new(timestamp, ir.round() as i32, red.round() as i32)
    }
}

impl SampleSource for SyntheticSource {
    fn next_sample(&mut self) -> Result<Option<RawSample>> {
        Ok(self.next())
    }
}

impl Iterator for SyntheticSource {
    type Item = RawSample;

    fn next(&mut self) -> Option<RawSample> {
        if self.index >= self.total {
            return None;
        }
        let sample = self.sample_at(self.index);
        self.index += 1;
        Some(sample)
    }
}

/// A constant reading, or none at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedTemperature(pub Option<f32>);

impl TemperatureSource for FixedTemperature {
    fn read_temperature(&mut self) -> Result<Option<f32>> {
        Ok(self.0)
    }
}

/// Keeps reporting the last good reading while the inner source fails or
/// has nothing new.
#[derive(Debug, Clone)]
pub struct LastKnownTemperature<S> {
    inner: S,
    last: Option<f32>,
}

impl<S: TemperatureSource> LastKnownTemperature<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, last: None }
    }
}

impl<S: TemperatureSource> TemperatureSource for LastKnownTemperature<S> {
    fn read_temperature(&mut self) -> Result<Option<f32>> {
        match self.inner.read_temperature() {
            Ok(Some(t)) => self.last = Some(t),
            Ok(None) => {}
            Err(e) => warn!("Temperature read failed, keeping last reading: {:#}", e),
        }
        Ok(self.last)
    }
}
