use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{debug, info, warn};
use pulse_vitals::aggregator::{Publisher, VitalsAggregator, VitalsWorker};
use pulse_vitals::config::Args;
use pulse_vitals::data_loading::{
    CsvSampleSource, FixedTemperature, LastKnownTemperature, SampleSource, SyntheticSource,
};
use pulse_vitals::output::{CsvPublisher, FanOutPublisher, JsonLinePublisher};
use pulse_vitals::{RawSample, VitalsSample};
use std::fs::File;
use std::io::{self, BufWriter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Raised by Ctrl-C. The run loops check it between sample cycles so the
/// worker is joined and the summary still gets logged.
#[derive(Debug, Clone, Default)]
struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    fn install() -> Result<Self> {
        let signal = Self::default();
        let handler = signal.clone();
        ctrlc::set_handler(move || handler.stop()).context("Failed to install Ctrl-C handler")?;
        Ok(signal)
    }

    fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tracks how the run went and applies the "too long without a reading"
/// warning policy.
#[derive(Debug, Default)]
struct RunSummary {
    ticks: u64,
    valid: u64,
    with_heart_rate: u64,
    unavailable_streak: usize,
    warn_after: usize,
    last: Option<VitalsSample>,
}

impl RunSummary {
    fn new(warn_after: usize) -> Self {
        Self {
            warn_after,
            ..Self::default()
        }
    }

    fn record(&mut self, vitals: &VitalsSample) {
        self.ticks += 1;
        if vitals.heart_rate_bpm.is_some() {
            self.with_heart_rate += 1;
        }

        if vitals.valid {
            self.valid += 1;
            if self.warn_after > 0 && self.unavailable_streak >= self.warn_after {
                info!(
                    "Readings resumed after {} ticks without signal",
                    self.unavailable_streak
                );
            }
            self.unavailable_streak = 0;
        } else {
            self.unavailable_streak += 1;
            if self.warn_after > 0 && self.unavailable_streak == self.warn_after {
                warn!(
                    "No valid reading for {} consecutive ticks, please adjust sensor placement",
                    self.unavailable_streak
                );
            }
        }
        self.last = Some(*vitals);
    }

    fn log(&self) {
        let ratio = if self.ticks == 0 {
            0.0
        } else {
            self.valid as f64 / self.ticks as f64 * 100.0
        };
        info!(
            "Processed {} samples: {:.1}% valid, {} with heart rate",
            self.ticks, ratio, self.with_heart_rate
        );
        if let Some(last) = &self.last {
            info!(
                "Last reading: heart rate {}, SpO2 {}",
                last.heart_rate_bpm
                    .map(|v| format!("{} BPM", v))
                    .unwrap_or_else(|| "unavailable".to_string()),
                last.spo2_percent
                    .map(|v| format!("{:.1}%", v))
                    .unwrap_or_else(|| "unavailable".to_string()),
            );
        }
    }
}

/// Everything the host does with a finished vitals sample.
struct HostPublisher {
    outputs: FanOutPublisher,
    summary: RunSummary,
}

impl Publisher for HostPublisher {
    fn publish(&mut self, vitals: &VitalsSample) -> Result<()> {
        self.summary.record(vitals);
        self.outputs.publish(vitals)
    }
}

fn open_source(args: &Args) -> Result<Box<dyn SampleSource>> {
    if let Some(path) = &args.csv_input {
        info!("Replaying samples from {}", path.display());
        return Ok(Box::new(CsvSampleSource::open(path)?));
    }
    if args.simulate {
        warn!(
            "SIMULATION MODE: readings are synthetic ({} BPM, red/ir {}), not from a sensor",
            args.sim_bpm, args.sim_ratio
        );
        return Ok(Box::new(SyntheticSource::new(
            args.sample_period(),
            args.sim_seconds,
            args.sim_bpm,
            args.sim_ratio,
        )));
    }
    bail!("No sample source selected: pass --csv-input <file> or --simulate")
}

fn build_publisher(args: &Args) -> Result<HostPublisher> {
    let session_start = Utc::now();
    let temperature = LastKnownTemperature::new(FixedTemperature(args.temperature));
    let mut outputs = FanOutPublisher::new();

    match &args.json_output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create telemetry file: {}", path.display()))?;
            let mut json = JsonLinePublisher::new(BufWriter::new(file), temperature, session_start);
            if let Some(topic) = &args.topic {
                json = json.with_topic(topic.clone());
            }
            outputs.push(Box::new(json));
        }
        None => {
            let mut json = JsonLinePublisher::new(io::stdout(), temperature, session_start);
            if let Some(topic) = &args.topic {
                json = json.with_topic(topic.clone());
            }
            outputs.push(Box::new(json));
        }
    }

    if let Some(path) = &args.csv_output {
        info!("Writing vitals to {}", path.display());
        outputs.push(Box::new(CsvPublisher::create(path)?));
    }

    Ok(HostPublisher {
        outputs,
        summary: RunSummary::new(args.warn_after),
    })
}

/// Next sample, unless the sample limit has been reached or a stop was
/// requested.
fn next_sample(
    source: &mut dyn SampleSource,
    taken: usize,
    max_samples: Option<usize>,
    stop: &StopSignal,
) -> Result<Option<RawSample>> {
    if stop.is_stopped() {
        info!("Interrupted after {} samples", taken);
        return Ok(None);
    }
    if max_samples.is_some_and(|max| taken >= max) {
        return Ok(None);
    }
    source.next_sample()
}

fn pace(args: &Args, started: Instant, sample: &RawSample) {
    if !args.realtime {
        return;
    }
    if let Some(wait) = sample.timestamp.checked_sub(started.elapsed()) {
        thread::sleep(wait);
    }
}

fn run_inline(
    args: &Args,
    mut aggregator: VitalsAggregator,
    source: &mut dyn SampleSource,
    mut publisher: HostPublisher,
    stop: &StopSignal,
) -> Result<HostPublisher> {
    let started = Instant::now();
    let mut taken = 0;
    while let Some(sample) = next_sample(source, taken, args.max_samples, stop)? {
        taken += 1;
        pace(args, started, &sample);
        aggregator.ingest_and_publish(sample, &mut publisher);
    }
    debug!(
        "{} intervals rejected during the run",
        aggregator.intervals().rejected_count()
    );
    Ok(publisher)
}

fn run_threaded(
    args: &Args,
    aggregator: VitalsAggregator,
    source: &mut dyn SampleSource,
    publisher: HostPublisher,
    stop: &StopSignal,
) -> Result<HostPublisher> {
    let worker = VitalsWorker::spawn(aggregator, publisher, args.window_capacity.max(1))?;
    let started = Instant::now();
    let mut taken = 0;
    while let Some(sample) = next_sample(source, taken, args.max_samples, stop)? {
        taken += 1;
        pace(args, started, &sample);
        worker.submit(sample)?;
    }
    let (aggregator, publisher) = worker.stop()?;
    debug!(
        "{} intervals rejected during the run",
        aggregator.intervals().rejected_count()
    );
    Ok(publisher)
}

fn main() -> Result<()> {
    // Initialize logger
    env_logger::init();

    let args = Args::parse();
    let config = args.vitals_config()?;
    debug!("Vitals configuration: {:?}", config);
    let aggregator = VitalsAggregator::new(&config)?;

    let mut source = open_source(&args)?;
    let publisher = build_publisher(&args)?;
    let stop = StopSignal::install()?;

    info!("Starting vitals estimation");
    let publisher = if args.threaded {
        run_threaded(&args, aggregator, source.as_mut(), publisher, &stop)?
    } else {
        run_inline(&args, aggregator, source.as_mut(), publisher, &stop)?
    };

    publisher.summary.log();
    info!("Stopping vitals estimation");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_vitals::config::VitalsConfig;
    use std::time::Duration;

    /// Requests a stop once it has seen `after` samples.
    struct StopAfter {
        after: usize,
        seen: usize,
        stop: StopSignal,
    }

    impl Publisher for StopAfter {
        fn publish(&mut self, _vitals: &VitalsSample) -> Result<()> {
            self.seen += 1;
            if self.seen == self.after {
                self.stop.stop();
            }
            Ok(())
        }
    }

    fn host_publisher(stop: &StopSignal, after: usize) -> HostPublisher {
        let mut outputs = FanOutPublisher::new();
        outputs.push(Box::new(StopAfter {
            after,
            seen: 0,
            stop: stop.clone(),
        }));
        HostPublisher {
            outputs,
            summary: RunSummary::new(0),
        }
    }

    fn simulate_args() -> Args {
        Args::parse_from(["pulse-vitals", "--simulate"])
    }

    fn source() -> SyntheticSource {
        SyntheticSource::new(Duration::from_millis(10), 10.0, 75.0, 0.9)
    }

    #[test]
    fn test_inline_loop_stops_between_cycles() {
        let args = simulate_args();
        let stop = StopSignal::default();
        let aggregator = VitalsAggregator::new(&VitalsConfig::default()).unwrap();
        let publisher = host_publisher(&stop, 25);

        let publisher = run_inline(&args, aggregator, &mut source(), publisher, &stop).unwrap();
        assert_eq!(publisher.summary.ticks, 25);
        assert!(publisher.summary.last.is_some());
    }

    #[test]
    fn test_threaded_loop_drains_worker_after_stop() {
        let args = simulate_args();
        let stop = StopSignal::default();
        stop.stop();
        let aggregator = VitalsAggregator::new(&VitalsConfig::default()).unwrap();
        let publisher = host_publisher(&stop, usize::MAX);

        let publisher = run_threaded(&args, aggregator, &mut source(), publisher, &stop).unwrap();
        assert_eq!(publisher.summary.ticks, 0);
    }

    #[test]
    fn test_sample_limit() {
        let args = Args::parse_from(["pulse-vitals", "--simulate", "--max-samples", "40"]);
        let stop = StopSignal::default();
        let aggregator = VitalsAggregator::new(&VitalsConfig::default()).unwrap();
        let publisher = host_publisher(&stop, usize::MAX);

        let publisher = run_inline(&args, aggregator, &mut source(), publisher, &stop).unwrap();
        assert_eq!(publisher.summary.ticks, 40);
        assert!(!stop.is_stopped());
    }
}
