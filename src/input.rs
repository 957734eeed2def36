//! Measurement log ingestion.
//!
//! One record per line, whitespace separated:
//!
//! ```text
//! L  px  py  timestamp  [gt_px gt_py gt_vx gt_vy ...]
//! R  rho phi rho_dot  timestamp  [gt_px gt_py gt_vx gt_vy ...]
//! ```
//!
//! Ground truth is optional; any columns after it are ignored.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::Context;
use flate2::read::GzDecoder;

use crate::error::{FusionError, FusionResult};
use crate::types::{GroundTruth, MeasurementPackage, SensorKind};

const GROUND_TRUTH_COLUMNS: usize = 4;

/// A parsed log line
#[derive(Clone, Debug, PartialEq)]
pub struct LogRecord {
    pub package: MeasurementPackage,
    pub ground_truth: Option<GroundTruth>,
}

fn parse_f64(token: &str, what: &str) -> FusionResult<f64> {
    token
        .parse::<f64>()
        .map_err(|_| FusionError::InvalidRecord(format!("{what}: cannot parse '{token}'")))
}

/// Parse one line. Blank lines and `#` comments yield `Ok(None)`.
pub fn parse_line(line: &str) -> FusionResult<Option<LogRecord>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    let sensor: SensorKind = tokens[0].parse()?;
    let arity = sensor.arity();

    let ts_index = 1 + arity;
    let values = tokens.len() - 1;
    if values < arity {
        return Err(FusionError::DimensionMismatch {
            sensor,
            expected: arity,
            actual: values,
        });
    }
    if tokens.len() == ts_index {
        return Err(FusionError::InvalidRecord(format!(
            "{sensor} record has no timestamp"
        )));
    }

    let raw = tokens[1..ts_index]
        .iter()
        .map(|t| parse_f64(t, "measurement"))
        .collect::<FusionResult<Vec<f64>>>()?;

    let timestamp = tokens[ts_index].parse::<u64>().map_err(|_| {
        FusionError::InvalidRecord(format!("timestamp: cannot parse '{}'", tokens[ts_index]))
    })?;

    let package = MeasurementPackage::from_raw(sensor, &raw, timestamp)?;

    let rest = &tokens[ts_index + 1..];
    let ground_truth = match rest.len() {
        0 => None,
        n if n < GROUND_TRUTH_COLUMNS => {
            return Err(FusionError::InvalidRecord(format!(
                "ground truth needs {GROUND_TRUTH_COLUMNS} columns, found {n}"
            )));
        }
        _ => Some(GroundTruth {
            px: parse_f64(rest[0], "ground truth")?,
            py: parse_f64(rest[1], "ground truth")?,
            vx: parse_f64(rest[2], "ground truth")?,
            vy: parse_f64(rest[3], "ground truth")?,
        }),
    };

    Ok(Some(LogRecord {
        package,
        ground_truth,
    }))
}

/// Read every record from a reader, reporting the 1-based line of the first bad one.
pub fn read_records<R: BufRead>(reader: R) -> anyhow::Result<Vec<LogRecord>> {
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("reading line {line_no}"))?;
        if let Some(record) = parse_line(&line).with_context(|| format!("line {line_no}"))? {
            records.push(record);
        }
    }
    Ok(records)
}

/// Load a log file, transparently decompressing `.gz`.
pub fn load_records(path: &Path) -> anyhow::Result<Vec<LogRecord>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let records = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        read_records(BufReader::new(GzDecoder::new(file)))
    } else {
        read_records(BufReader::new(file))
    };
    records.with_context(|| format!("loading {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};

    const SAMPLE: &str = "\
# sensor values timestamp gt
L\t3.122427e-01\t5.803398e-01\t1477010443000000\t6.000000e-01\t6.000000e-01\t5.199937e+00\t0\t0\t6.911322e-03
R\t1.014892e+00\t5.543292e-01\t4.892807e+00\t1477010443050000\t8.599968e-01\t6.000449e-01\t5.199747e+00\t1.796856e-03

L 1.173848e+00 4.810729e-01 1477010443100000
";

    #[test]
    fn test_parse_laser_with_ground_truth() {
        let record = parse_line("L 0.31 0.58 1477010443000000 0.6 0.6 5.2 0.0")
            .unwrap()
            .unwrap();
        assert_eq!(record.package, MeasurementPackage::laser(1477010443000000, 0.31, 0.58));
        assert_eq!(
            record.ground_truth,
            Some(GroundTruth {
                px: 0.6,
                py: 0.6,
                vx: 5.2,
                vy: 0.0
            })
        );
    }

    #[test]
    fn test_parse_radar() {
        let record = parse_line("R 1.0 0.5 4.9 1477010443050000").unwrap().unwrap();
        assert_eq!(record.package, MeasurementPackage::radar(1477010443050000, 1.0, 0.5, 4.9));
        assert!(record.ground_truth.is_none());
    }

    #[test]
    fn test_skip_blank_and_comment() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(parse_line("# header").unwrap(), None);
    }

    #[test]
    fn test_unknown_sensor() {
        assert_eq!(
            parse_line("X 1.0 2.0 100"),
            Err(FusionError::UnknownSensor("x".to_string()))
        );
    }

    #[test]
    fn test_short_lines() {
        assert_eq!(
            parse_line("R 1.0 0.5"),
            Err(FusionError::DimensionMismatch {
                sensor: SensorKind::Radar,
                expected: 3,
                actual: 2
            })
        );
        assert_eq!(
            parse_line("L 1.0"),
            Err(FusionError::DimensionMismatch {
                sensor: SensorKind::Laser,
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            parse_line("L"),
            Err(FusionError::DimensionMismatch {
                sensor: SensorKind::Laser,
                expected: 2,
                actual: 0
            })
        );
    }

    #[test]
    fn test_missing_timestamp() {
        assert!(matches!(parse_line("L 1.0 2.0"), Err(FusionError::InvalidRecord(_))));
        assert!(matches!(parse_line("R 1.0 0.5 4.9"), Err(FusionError::InvalidRecord(_))));
    }

    #[test]
    fn test_bad_values() {
        assert!(matches!(parse_line("L 1.0 abc 100"), Err(FusionError::InvalidRecord(_))));
        assert!(matches!(parse_line("L 1.0 2.0 -5"), Err(FusionError::InvalidRecord(_))));
        assert!(matches!(parse_line("L 1.0 2.0 100 0.5 0.5"), Err(FusionError::InvalidRecord(_))));
        assert!(matches!(
            parse_line("L NaN 2.0 100"),
            Err(FusionError::NonFiniteMeasurement { .. })
        ));
    }

    #[test]
    fn test_read_records() {
        let records = read_records(Cursor::new(SAMPLE)).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].package.sensor(), SensorKind::Radar);
        assert!(records[2].ground_truth.is_none());
    }

    #[test]
    fn test_read_records_reports_line() {
        let err = read_records(Cursor::new("L 1 2 100\nQ 1 2 200\n")).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn test_load_gzip() {
        let path = std::env::temp_dir().join(format!("fusion_ekf_input_{}.txt.gz", std::process::id()));
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(SAMPLE.as_bytes()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let records = load_records(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(records.len(), 3);
    }
}
