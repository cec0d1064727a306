use anyhow::{Context, Result};
use pulse_vitals::data_loading::{write_samples_csv, SyntheticSource};
use pulse_vitals::RawSample;
use std::path::Path;
use std::time::Duration;

fn parse_arg(args: &[String], idx: usize, default: f64) -> Result<f64> {
    match args.get(idx) {
        Some(s) => s
            .parse()
            .with_context(|| format!("Invalid number: {}", s)),
        None => Ok(default),
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.len() > 5 {
        println!("Usage: {} <output.csv> [bpm=75] [seconds=30] [red_ratio=0.9]", args[0]);
        std::process::exit(1);
    }

    let bpm = parse_arg(&args, 2, 75.0)?;
    let seconds = parse_arg(&args, 3, 30.0)?;
    let ratio = parse_arg(&args, 4, 0.9)?;

    let samples: Vec<RawSample> =
        SyntheticSource::new(Duration::from_millis(10), seconds, bpm, ratio).collect();
    write_samples_csv(Path::new(&args[1]), &samples)?;

    println!(
        "Wrote {} synthetic samples ({} BPM, red/ir {}) to {}",
        samples.len(),
        bpm,
        ratio,
        args[1]
    );
    Ok(())
}
