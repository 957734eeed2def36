//! Offline replay: run a recorded measurement log through the filter, write one
//! estimate row per measurement, and score against ground truth.

use std::io::Write;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::input::LogRecord;
use crate::sensor_fusion::{FusionEkf, FusionEvent, FusionState};
use crate::tools::calculate_rmse;
use crate::types::StateVec;

pub const OUTPUT_HEADER: &str =
    "est_px\test_py\test_vx\test_vy\tmeas_px\tmeas_py\tgt_px\tgt_py\tgt_vx\tgt_vy";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub processed: usize,
    pub rejected: usize,
    pub skipped: usize,

    /// RMSE of [px, py, vx, vy]; `None` without ground truth
    pub rmse: Option<[f64; 4]>,

    pub final_state: Option<FusionState>,
}

fn write_row<W: Write>(
    out: &mut W,
    estimate: &StateVec,
    record: &LogRecord,
) -> std::io::Result<()> {
    let (meas_px, meas_py) = record.package.measurement.to_cartesian();
    write!(
        out,
        "{}\t{}\t{}\t{}\t{}\t{}",
        estimate[0], estimate[1], estimate[2], estimate[3], meas_px, meas_py
    )?;
    match &record.ground_truth {
        Some(gt) => writeln!(out, "\t{}\t{}\t{}\t{}", gt.px, gt.py, gt.vx, gt.vy),
        None => writeln!(out, "\t\t\t\t"),
    }
}

/// Feed every record through `fusion`, writing estimates to `out`.
///
/// Measurements the filter rejects are logged and counted; they do not stop
/// the replay and produce no output row.
pub fn run<W: Write>(
    fusion: &mut FusionEkf,
    records: &[LogRecord],
    out: &mut W,
) -> anyhow::Result<ReplaySummary> {
    writeln!(out, "{OUTPUT_HEADER}")?;

    let mut estimations = Vec::new();
    let mut ground_truth = Vec::new();
    let mut processed = 0;
    let mut rejected = 0;
    let mut skipped = 0;

    for (idx, record) in records.iter().enumerate() {
        let sensor = record.package.sensor();
        match fusion.process_measurement(&record.package) {
            Ok(events) if events.iter().any(|e| matches!(e, FusionEvent::SensorSkipped { .. })) => {
                skipped += 1;
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    "Record {} ({} at t={}) rejected: {}",
                    idx + 1,
                    sensor,
                    record.package.timestamp,
                    e
                );
                rejected += 1;
                continue;
            }
        }
        processed += 1;

        let Some(estimate) = fusion.state().copied() else {
            continue;
        };
        write_row(out, &estimate, record)?;

        if let Some(gt) = &record.ground_truth {
            estimations.push(estimate);
            ground_truth.push(gt.as_state());
        }
    }

    let rmse = if estimations.is_empty() {
        None
    } else {
        let rmse = calculate_rmse(&estimations, &ground_truth)?;
        Some([rmse[0], rmse[1], rmse[2], rmse[3]])
    };

    Ok(ReplaySummary {
        processed,
        rejected,
        skipped,
        rmse,
        final_state: fusion.get_state(),
    })
}
