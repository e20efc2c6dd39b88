use crate::contingency::{CaseOutcome, ContingencySet};
use crate::debug::format_f64;
use crate::sweep::{CurveResult, SampleStatus};

use anyhow::{format_err, Result};
use csv::Writer;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub const SUMMARY_FILE: &str = "analysis_summary.csv";
pub const JSON_FILE: &str = "results.json";

#[derive(Serialize)]
struct CurveRow {
    power_mw: f64,
    lambda_mw: f64,
    voltage_pu: f64,
    status: SampleStatus,
}

#[derive(Serialize)]
struct SummaryRow {
    case: String,
    status: &'static str,
    nose_power_mw: Option<f64>,
    nose_voltage_pu: Option<f64>,
    power_margin_mw: Option<f64>,
    voltage_margin_pu: Option<f64>,
    samples: usize,
    stop_reason: Option<String>,
    note: String,
}

fn create(path: &Path) -> Result<File> {
    File::create(path).map_err(|err| format_err!("unable to create {}: {}", path.display(), err))
}

/// Writes the samples of one curve as CSV.
pub fn write_curve_csv(path: &Path, curve: &CurveResult) -> Result<()> {
    let mut writer = Writer::from_writer(create(path)?);
    for s in &curve.samples {
        writer.serialize(CurveRow {
            power_mw: s.power_mw,
            lambda_mw: s.lambda_mw,
            voltage_pu: s.voltage_pu,
            status: s.status,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes one summary row per case as CSV.
pub fn write_summary_csv(path: &Path, set: &ContingencySet) -> Result<()> {
    let mut writer = Writer::from_writer(create(path)?);
    for (key, outcome) in set.iter() {
        let curve = outcome.curve();
        let note = match outcome {
            CaseOutcome::Failed { error, .. } => error.to_string(),
            CaseOutcome::Skipped { reason } => reason.clone(),
            _ => String::new(),
        };
        writer.serialize(SummaryRow {
            case: key.to_string(),
            status: outcome.label(),
            nose_power_mw: curve.map(|c| c.nose().power_mw),
            nose_voltage_pu: curve.map(|c| c.nose().voltage_pu),
            power_margin_mw: curve.map(|c| c.power_margin),
            voltage_margin_pu: curve.map(|c| c.voltage_margin),
            samples: curve.map(|c| c.samples.len()).unwrap_or(0),
            stop_reason: curve.map(|c| format!("{:?}", c.stop_reason)),
            note,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the whole set as pretty printed JSON. Missing voltages are
/// written as `null`.
pub fn write_json(path: &Path, set: &ContingencySet) -> Result<()> {
    let writer = BufWriter::new(create(path)?);
    serde_json::to_writer_pretty(writer, set)?;
    Ok(())
}

/// Writes a CSV per completed case, the summary CSV and the JSON dump into
/// `dir`, creating it if needed. Returns the files written.
pub fn write_all(dir: &Path, set: &ContingencySet) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .map_err(|err| format_err!("unable to create {}: {}", dir.display(), err))?;

    let mut written = Vec::new();
    for (key, outcome) in set.iter() {
        if let Some(curve) = outcome.curve() {
            let path = dir.join(format!("{}_case_results.csv", key));
            write_curve_csv(&path, curve)?;
            written.push(path);
        }
    }
    let path = dir.join(SUMMARY_FILE);
    write_summary_csv(&path, set)?;
    written.push(path);

    let path = dir.join(JSON_FILE);
    write_json(&path, set)?;
    written.push(path);

    log::debug!("wrote {} files to {}", written.len(), dir.display());
    Ok(written)
}

/// Human readable summary of an analysis.
pub fn summary_text(set: &ContingencySet, critical: usize) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "{:<12} {:<10} {:>12} {:>10} {:>12}  stop", "case", "status", "nose MW", "nose pu", "margin MW");
    for (key, outcome) in set.iter() {
        match outcome.curve() {
            Some(c) => {
                let _ = writeln!(
                    s,
                    "{:<12} {:<10} {:>12} {:>10} {:>12}  {:?}",
                    key.to_string(),
                    outcome.label(),
                    format_f64(c.nose().power_mw),
                    format_f64(c.nose().voltage_pu),
                    format_f64(c.power_margin),
                    c.stop_reason
                );
            }
            None => {
                let _ = writeln!(s, "{:<12} {:<10}", key.to_string(), outcome.label());
            }
        }
    }

    let ranked = set.critical(critical);
    if !ranked.is_empty() {
        let _ = writeln!(s, "\nmost critical contingencies:");
        for (i, (key, c)) in ranked.iter().enumerate() {
            let _ = writeln!(
                s,
                "{:>3}. {:<12} margin {} MW at {} p.u.",
                i + 1,
                key.to_string(),
                format_f64(c.power_margin),
                format_f64(c.nose().voltage_pu)
            );
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contingency::CaseKey;
    use crate::error::CaseError;
    use crate::step::StopReason;
    use crate::sweep::Sample;

    fn curve() -> CurveResult {
        let sample = |step: usize, lambda: f64, voltage: f64, status| Sample {
            step,
            lambda_mw: lambda,
            power_mw: if status == SampleStatus::Failed { f64::NAN } else { lambda },
            voltage_pu: voltage,
            status,
        };
        CurveResult {
            samples: vec![
                sample(0, 0.0, 1.0, SampleStatus::Converged),
                sample(1, 100.0, 0.9, SampleStatus::Converged),
                sample(2, 200.0, f64::NAN, SampleStatus::Failed),
            ],
            nose_index: 1,
            power_margin: 100.0,
            voltage_margin: 0.0,
            stop_reason: StopReason::StepBelowMinimum,
            past_nose: false,
        }
    }

    fn set() -> anyhow::Result<ContingencySet> {
        Ok([
            (CaseKey::Base, CaseOutcome::Complete(curve())),
            (
                CaseKey::Outage("1_2".parse()?),
                CaseOutcome::Skipped {
                    reason: "no branch".to_string(),
                },
            ),
            (
                CaseKey::Outage("2_3".parse()?),
                CaseOutcome::Failed {
                    error: CaseError::BaseCaseInfeasible("diverged".to_string()),
                    samples: vec![],
                },
            ),
        ]
        .into_iter()
        .collect())
    }

    #[test]
    fn test_write_all() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let written = write_all(dir.path(), &set()?)?;
        assert_eq!(written.len(), 3);

        let curve_csv = fs::read_to_string(dir.path().join("base_case_results.csv"))?;
        let lines: Vec<&str> = curve_csv.lines().collect();
        assert_eq!(lines[0], "power_mw,lambda_mw,voltage_pu,status");
        assert_eq!(lines[2], "100.0,100.0,0.9,Converged");
        assert!(lines[3].ends_with("Failed"));

        let summary = fs::read_to_string(dir.path().join(SUMMARY_FILE))?;
        assert_eq!(summary.lines().count(), 4);
        assert!(summary.contains("1_2,skipped"));
        assert!(summary.contains("base case power flow did not converge: diverged"));

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(dir.path().join(JSON_FILE))?)?;
        assert_eq!(json["base"]["outcome"], "complete");
        assert_eq!(json["base"]["nose_index"], 1);
        assert!(json["base"]["samples"][2]["voltage_pu"].is_null());
        assert_eq!(json["1_2"]["outcome"], "skipped");
        Ok(())
    }

    #[test]
    fn test_summary_text() -> anyhow::Result<()> {
        let text = summary_text(&set()?, 5);
        assert!(text.contains("base"));
        assert!(text.contains("skipped"));
        assert!(!text.contains("most critical"));
        Ok(())
    }
}
