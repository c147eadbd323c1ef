//! CSV export of a run.
//!
//! The file starts with `# key: value` comment lines carrying the run
//! metadata, followed by one header row and the records in
//! `sequence_index` order. Undefined values (no resistance, untagged loop or
//! cycle) are written as empty cells.

use anyhow::{Context, Result};
use serde::Serialize;
use smu_core::MeasurementRecord;
use smu_experiment::RunReport;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const COLUMNS: [&str; 9] = [
    "sequence_index",
    "timestamp_s",
    "phase",
    "source_value",
    "measured_value",
    "resistance_ohm",
    "loop_index",
    "cycle_index",
    "elapsed_since_program_s",
];

#[derive(Debug, Serialize)]
struct Row {
    sequence_index: u64,
    timestamp_s: f64,
    phase: &'static str,
    source_value: f64,
    measured_value: f64,
    resistance_ohm: Option<f64>,
    loop_index: Option<u32>,
    cycle_index: Option<u64>,
    elapsed_since_program_s: Option<f64>,
}

impl From<&MeasurementRecord> for Row {
    fn from(record: &MeasurementRecord) -> Self {
        Self {
            sequence_index: record.sequence_index,
            timestamp_s: record.timestamp.as_secs_f64(),
            phase: record.phase.as_str(),
            source_value: record.source_value,
            measured_value: record.measured_value,
            resistance_ohm: record.resistance,
            loop_index: record.loop_index,
            cycle_index: record.cycle_index,
            elapsed_since_program_s: record.since_programming.map(|d| d.as_secs_f64()),
        }
    }
}

/// `{kind}_{YYYYmmdd_HHMMSS}.csv` from the run start time.
pub fn default_file_name(report: &RunReport) -> String {
    format!(
        "{}_{}.csv",
        report.metadata.kind,
        report.metadata.started_at.format("%Y%m%d_%H%M%S")
    )
}

/// Write `report` to `out`.
pub fn write_csv<W: Write>(report: &RunReport, mut out: W) -> Result<()> {
    let meta = &report.metadata;
    let parameters = serde_json::to_string(&meta.config.parameters_json())
        .context("serializing run parameters")?;

    let mut header = vec![
        ("test_kind", meta.kind.to_string()),
        ("parameters", parameters),
        ("instrument", meta.identity.clone()),
        ("family", meta.family.to_string()),
        ("run_id", meta.run_id.to_string()),
        ("started_at", meta.started_at.to_rfc3339()),
    ];
    if let Some(finished) = report.finished_at {
        header.push(("finished_at", finished.to_rfc3339()));
    }
    header.push(("final_state", report.state.to_string()));
    if let Some(err) = &report.error {
        header.push(("error", err.to_string()));
    }
    header.push(("record_count", report.records.len().to_string()));

    for (key, value) in header {
        // Keep every header entry on a single comment line.
        let value = value.replace(['\r', '\n'], " ");
        writeln!(out, "# {key}: {value}").context("writing metadata header")?;
    }

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(out);
    writer.write_record(COLUMNS).context("writing column header")?;

    let mut records: Vec<&MeasurementRecord> = report.records.iter().collect();
    records.sort_by_key(|r| r.sequence_index);
    for record in records {
        writer
            .serialize(Row::from(record))
            .with_context(|| format!("writing record {}", record.sequence_index))?;
    }
    writer.flush().context("flushing CSV output")?;
    Ok(())
}

/// Write `report` to a file at `path`, creating parent directories.
pub fn export_csv(report: &RunReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_csv(report, BufWriter::new(file))?;
    tracing::info!(
        path = %path.display(),
        records = report.records.len(),
        run_id = %report.metadata.run_id,
        "run exported"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use smu_core::{
        InstrumentError, InstrumentFamily, MeasureRange, SmuError, SourceMode, SweepConfig,
        SweepShape, TestKind, TestPhase, TestRunConfig,
    };
    use smu_experiment::{RunMetadata, RunState};
    use std::time::Duration;

    fn record(index: u64, resistance: Option<f64>) -> MeasurementRecord {
        MeasurementRecord {
            sequence_index: index,
            timestamp: Duration::from_millis(100 * index),
            source_value: 0.25 * index as f64,
            measured_value: 2.5e-4 * index as f64,
            resistance,
            phase: TestPhase::SweepUp,
            loop_index: None,
            cycle_index: Some(index),
            since_programming: None,
        }
    }

    fn report(records: Vec<MeasurementRecord>) -> RunReport {
        let config = TestRunConfig::Sweep(SweepConfig {
            source: SourceMode::Voltage,
            start: 0.0,
            stop: 1.0,
            step: 0.25,
            shape: SweepShape::Linear,
            compliance: 1e-3,
            range: MeasureRange::Auto,
            settle: Duration::from_millis(10),
        });
        RunReport {
            metadata: RunMetadata {
                run_id: uuid::Uuid::new_v4(),
                kind: TestKind::Sweep,
                config,
                identity: "KEITHLEY INSTRUMENTS INC.,MODEL 2400,1234567,C30".to_string(),
                family: InstrumentFamily::Keithley2400,
                started_at: Utc::now(),
            },
            state: RunState::Completed,
            error: None,
            finished_at: Some(Utc::now()),
            records,
        }
    }

    fn data_lines(text: &str) -> Vec<&str> {
        text.lines().filter(|l| !l.starts_with('#')).collect()
    }

    #[test]
    fn header_then_rows_in_sequence_order() {
        let mut out = Vec::new();
        let records = vec![record(1, Some(1e3)), record(0, None), record(2, Some(1e3))];
        write_csv(&report(records), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("# test_kind: sweep\n"));
        assert!(text.contains("# instrument: KEITHLEY INSTRUMENTS INC.,MODEL 2400"));
        assert!(text.contains("# final_state: completed\n"));
        assert!(text.contains("# record_count: 3\n"));
        assert!(text.contains("\"step\":0.25"));

        let lines = data_lines(&text);
        assert_eq!(lines[0], COLUMNS.join(","));
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("0,0.0,SWEEP_UP,0.0,0.0,,,0,"));
        assert!(lines[2].starts_with("1,0.1,SWEEP_UP,0.25,"));
        assert!(lines[3].starts_with("2,"));
    }

    #[test]
    fn empty_run_still_has_column_header() {
        let mut out = Vec::new();
        write_csv(&report(Vec::new()), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(data_lines(&text), vec![COLUMNS.join(",")]);
    }

    #[test]
    fn failed_run_records_error() {
        let mut failed = report(vec![record(0, Some(1e3))]);
        failed.state = RunState::Failed;
        failed.error = Some(SmuError::Instrument(InstrumentError::timeout(
            "no response to `:READ?`\nwithin 30s",
        )));

        let mut out = Vec::new();
        write_csv(&failed, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("# final_state: failed\n"));
        assert!(text.contains("# error: instrument timeout error: no response to `:READ?` within 30s\n"));
        assert_eq!(data_lines(&text).len(), 2);
    }

    #[test]
    fn export_creates_file_readable_as_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("sweep.csv");
        export_csv(&report(vec![record(0, None), record(1, Some(1e3))]), &path).unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .from_path(&path)
            .unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), COLUMNS.to_vec());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][5], "");
        assert_eq!(rows[1][5].parse::<f64>().unwrap(), 1e3);
    }

    #[test]
    fn file_name_uses_kind_and_start_time() {
        let r = report(Vec::new());
        let name = default_file_name(&r);
        assert!(name.starts_with("sweep_"));
        assert!(name.ends_with(".csv"));
    }
}
