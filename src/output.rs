use crate::aggregator::Publisher;
use crate::data_loading::TemperatureSource;
use crate::VitalsSample;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// The message downstream consumers (dashboards, brokers) receive.
///
/// Missing readings are `null`, never a stand-in value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryMessage {
    pub temperature: Option<f32>,
    pub heartrate: Option<u32>,
    pub spo2: Option<f64>,
    pub timestamp: String,
}

impl TelemetryMessage {
    pub fn from_vitals(
        vitals: &VitalsSample,
        temperature: Option<f32>,
        session_start: DateTime<Utc>,
    ) -> Self {
        let offset = chrono::Duration::from_std(vitals.timestamp)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let wall_clock = session_start + offset;
        TelemetryMessage {
            temperature,
            heartrate: vitals.heart_rate_bpm,
            // Round to 2 decimal places for display
            spo2: vitals.spo2_percent.map(|v| (v * 100.0).round() / 100.0),
            timestamp: wall_clock.format("%H:%M:%S%.3f").to_string(),
        }
    }
}

/// Writes one JSON telemetry message per line, merging in the host's
/// temperature reading.
pub struct JsonLinePublisher<W: Write, T: TemperatureSource> {
    writer: W,
    temperature: T,
    session_start: DateTime<Utc>,
    topic: Option<String>,
}

impl<W: Write, T: TemperatureSource> JsonLinePublisher<W, T> {
    pub fn new(writer: W, temperature: T, session_start: DateTime<Utc>) -> Self {
        Self {
            writer,
            temperature,
            session_start,
            topic: None,
        }
    }

    /// Prefix every line with `topic` and a space.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write, T: TemperatureSource> Publisher for JsonLinePublisher<W, T> {
    fn publish(&mut self, vitals: &VitalsSample) -> Result<()> {
        let temperature = self.temperature.read_temperature()?;
        let message = TelemetryMessage::from_vitals(vitals, temperature, self.session_start);
        if let Some(topic) = &self.topic {
            write!(self.writer, "{} ", topic)?;
        }
        serde_json::to_writer(&mut self.writer, &message)?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct VitalsRow {
    timestamp_ms: u64,
    heart_rate_bpm: Option<u32>,
    spo2_percent: Option<f64>,
    valid: bool,
}

/// Writes every vitals sample as a CSV row.
pub struct CsvPublisher<W: Write> {
    writer: csv::Writer<W>,
}

impl CsvPublisher<File> {
    pub fn create(path: &Path) -> Result<Self> {
        let dir = path.parent().unwrap_or(Path::new("."));
        // Create directory if it doesn't exist
        std::fs::create_dir_all(dir)?;
        let writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create vitals CSV: {}", path.display()))?;
        Ok(Self { writer })
    }
}

impl<W: Write> CsvPublisher<W> {
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
        }
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush vitals CSV: {}", e.error()))
    }
}

impl<W: Write> Publisher for CsvPublisher<W> {
    fn publish(&mut self, vitals: &VitalsSample) -> Result<()> {
        self.writer.serialize(VitalsRow {
            timestamp_ms: vitals.timestamp.as_millis() as u64,
            heart_rate_bpm: vitals.heart_rate_bpm,
            spo2_percent: vitals.spo2_percent,
            valid: vitals.valid,
        })?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Forwards each sample to every inner publisher, reporting the first failure
/// only after all of them have been tried.
#[derive(Default)]
pub struct FanOutPublisher {
    publishers: Vec<Box<dyn Publisher + Send>>,
}

impl FanOutPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, publisher: Box<dyn Publisher + Send>) {
        self.publishers.push(publisher);
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

impl Publisher for FanOutPublisher {
    fn publish(&mut self, vitals: &VitalsSample) -> Result<()> {
        let mut first_error = None;
        for publisher in &mut self.publishers {
            if let Err(e) = publisher.publish(vitals) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_loading::FixedTemperature;
    use chrono::TimeZone;
    use std::time::Duration;

    fn session_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_missing_readings_serialize_as_null() {
        let vitals = VitalsSample::new(Duration::from_millis(1500), None, None);
        let message = TelemetryMessage::from_vitals(&vitals, None, session_start());
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "temperature": null,
                "heartrate": null,
                "spo2": null,
                "timestamp": "12:00:01.500"
            })
        );
    }

    #[test]
    fn test_json_lines_merge_temperature_and_topic() {
        let vitals = VitalsSample::new(Duration::from_secs(2), Some(75), Some(87.5));
        let mut publisher =
            JsonLinePublisher::new(Vec::new(), FixedTemperature(Some(36.6)), session_start())
                .with_topic("health_metrics");
        publisher.publish(&vitals).unwrap();
        publisher.publish(&vitals).unwrap();

        let text = String::from_utf8(publisher.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let payload = lines[0].strip_prefix("health_metrics ").unwrap();
        let json: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(json["heartrate"], 75);
        assert_eq!(json["spo2"], 87.5);
        assert_eq!(json["timestamp"], "12:00:02.000");
        assert!((json["temperature"].as_f64().unwrap() - 36.6).abs() < 1e-4);
    }

    #[test]
    fn test_csv_rows() {
        let mut publisher = CsvPublisher::from_writer(Vec::new());
        publisher
            .publish(&VitalsSample::new(Duration::from_millis(10), None, Some(87.5)))
            .unwrap();
        publisher
            .publish(&VitalsSample::new(Duration::from_millis(20), None, None))
            .unwrap();
        let text = String::from_utf8(publisher.into_inner().unwrap()).unwrap();
        assert_eq!(
            text,
            "timestamp_ms,heart_rate_bpm,spo2_percent,valid\n10,,87.5,true\n20,,,false\n"
        );
    }

    #[test]
    fn test_csv_file_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("vitals.csv");
        let mut publisher = CsvPublisher::create(&path).unwrap();
        publisher
            .publish(&VitalsSample::new(Duration::from_millis(10), Some(72), None))
            .unwrap();
        drop(publisher);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.ends_with("10,72,,true\n"));
    }

    struct Broken;

    impl Publisher for Broken {
        fn publish(&mut self, _vitals: &VitalsSample) -> Result<()> {
            anyhow::bail!("socket closed")
        }
    }

    #[test]
    fn test_fan_out_reaches_every_publisher() {
        let mut fan_out = FanOutPublisher::new();
        fan_out.push(Box::new(Broken));
        fan_out.push(Box::new(Vec::<VitalsSample>::new()));
        assert_eq!(fan_out.len(), 2);
        let vitals = VitalsSample::new(Duration::ZERO, None, Some(90.0));
        assert!(fan_out.publish(&vitals).is_err());
    }
}
