use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;

use fusion_ekf_rs::input::load_records;
use fusion_ekf_rs::replay;
use fusion_ekf_rs::{FusionConfig, FusionEkf};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Sensors {
    Laser,
    Radar,
    Both,
}

#[derive(Parser, Debug)]
#[command(name = "fusion_ekf")]
#[command(about = "Lidar/radar EKF tracker - replays a measurement log and scores it", long_about = None)]
struct Args {
    /// Measurement log (.txt or .txt.gz)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Tab-separated estimates output
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// JSON file overriding noise parameters
    #[arg(long)]
    config: Option<PathBuf>,

    /// Which sensors to fuse; overrides use_laser/use_radar from --config
    #[arg(long, value_enum)]
    sensors: Option<Sensors>,

    /// Write the run summary (final state, RMSE) as JSON
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

fn apply_sensor_selection(config: &mut FusionConfig, sensors: Sensors) {
    config.use_laser = sensors != Sensors::Radar;
    config.use_radar = sensors != Sensors::Laser;
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => FusionConfig::from_json_file(path)?,
        None => FusionConfig::default(),
    };
    if let Some(sensors) = args.sensors {
        apply_sensor_selection(&mut config, sensors);
    }

    info!("Input: {}", args.input.display());
    info!("Output: {}", args.output.display());
    info!("Sensors: laser={} radar={}", config.use_laser, config.use_radar);

    let records = load_records(&args.input)?;
    info!("Loaded {} measurements", records.len());

    let mut fusion = FusionEkf::new(config)?;
    let file = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let mut out = BufWriter::new(file);

    let summary = replay::run(&mut fusion, &records, &mut out)?;
    out.flush()?;

    println!("\n=== Final Stats ===");
    println!("Processed: {}", summary.processed);
    println!("Rejected: {}", summary.rejected);
    println!("Skipped: {}", summary.skipped);
    if let Some(state) = &summary.final_state {
        println!("Position: ({:.4}, {:.4}) m", state.position.0, state.position.1);
        println!("Velocity: ({:.4}, {:.4}) m/s", state.velocity.0, state.velocity.1);
    }
    match summary.rmse {
        Some(rmse) => println!(
            "RMSE: px={:.4} py={:.4} vx={:.4} vy={:.4}",
            rmse[0], rmse[1], rmse[2], rmse[3]
        ),
        None => println!("RMSE: n/a (no ground truth in input)"),
    }

    if let Some(path) = &args.summary_json {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        info!("Summary written to {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_flag_is_optional() {
        let args = Args::parse_from(["fusion_ekf", "in.txt", "out.txt"]);
        assert_eq!(args.sensors, None);

        let args = Args::parse_from(["fusion_ekf", "in.txt", "out.txt", "--sensors", "radar"]);
        assert_eq!(args.sensors, Some(Sensors::Radar));
    }

    #[test]
    fn test_config_flags_kept_without_sensor_flag() {
        let config: FusionConfig = serde_json::from_str(r#"{"use_radar": false}"#).unwrap();
        let args = Args::parse_from(["fusion_ekf", "in.txt", "out.txt"]);

        let mut applied = config.clone();
        if let Some(sensors) = args.sensors {
            apply_sensor_selection(&mut applied, sensors);
        }
        assert!(applied.use_laser);
        assert!(!applied.use_radar);

        apply_sensor_selection(&mut applied, Sensors::Both);
        assert!(applied.use_laser && applied.use_radar);
    }
}
