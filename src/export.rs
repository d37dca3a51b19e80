/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    data::{Phase, RunResult},
    runner::RunSetOutcome,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::info;

pub const CSV_HEADER: [&str; 16] = [
    "scenario",
    "n",
    "path",
    "name",
    "image",
    "flags",
    "readiness_mechanism",
    "readiness_ms",
    "first_request_s",
    "requests",
    "mean_s",
    "p50_s",
    "p95_s",
    "p99_s",
    "load_cpu_avg",
    "load_mem_max",
];

#[derive(Debug, Serialize)]
pub struct FailedRun {
    pub name: String,
    pub error: String,
}

/// Everything one invocation produced.
#[derive(Debug, Serialize)]
pub struct Dataset<'a> {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub results: &'a [RunResult],
    pub failures: Vec<FailedRun>,
}
impl<'a> Dataset<'a> {
    pub fn new(outcome: &'a RunSetOutcome, created_at: DateTime<Utc>) -> Self {
        Self {
            id: nanoid::nanoid!(),
            created_at,
            results: &outcome.results,
            failures: outcome
                .failures
                .iter()
                .map(|f| FailedRun {
                    name: f.name.clone(),
                    error: format!("{:#}", f.error),
                })
                .collect(),
        }
    }
}

/// Where the exports of one invocation were written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub json: PathBuf,
    pub csv: PathBuf,
}
impl ExportPaths {
    /// `<dir>/results-<timestamp>.json` and `.csv`.
    pub fn new(dir: &Path, created_at: &DateTime<Utc>) -> Self {
        let stem = format!("results-{}", created_at.format("%Y%m%d-%H%M%S"));
        Self {
            json: dir.join(format!("{}.json", stem)),
            csv: dir.join(format!("{}.csv", stem)),
        }
    }
}

/// One line of the CSV export. Field order matches [`CSV_HEADER`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvRow {
    pub scenario: String,
    pub n: u64,
    pub path: String,
    pub name: String,
    pub image: String,
    /// Empty for precompiled images.
    pub flags: Option<String>,
    pub readiness_mechanism: String,
    pub readiness_ms: u64,
    pub first_request_s: f64,
    pub requests: usize,
    pub mean_s: Option<f64>,
    pub p50_s: Option<f64>,
    pub p95_s: Option<f64>,
    pub p99_s: Option<f64>,
    pub load_cpu_avg: Option<f64>,
    pub load_mem_max: Option<f64>,
}
impl From<&RunResult> for CsvRow {
    fn from(run: &RunResult) -> Self {
        let latency = run.latency_summary();
        let load = run.phase_summary(Phase::Load);

        CsvRow {
            scenario: run.scenario.to_string(),
            n: run.n,
            path: run.workload_path.clone(),
            name: run.name.clone(),
            image: run.image.clone(),
            flags: run.effective_flags.clone(),
            readiness_mechanism: run.readiness.mechanism.to_string(),
            readiness_ms: run.readiness.elapsed_ms,
            first_request_s: run.first_request_secs,
            requests: run.latencies_secs.len(),
            mean_s: latency.map(|s| s.mean),
            p50_s: latency.map(|s| s.p50),
            p95_s: latency.map(|s| s.p95),
            p99_s: latency.map(|s| s.p99),
            load_cpu_avg: load.as_ref().map(|s| s.cpu_avg),
            load_mem_max: load.as_ref().map(|s| s.mem_percent_max),
        }
    }
}

/// Writes the header and one row per run. The header is written even without any runs.
pub fn write_csv<W: io::Write>(
    writer: &mut csv::Writer<W>,
    results: &[RunResult],
) -> anyhow::Result<()> {
    writer.write_record(CSV_HEADER)?;
    for run in results {
        writer.serialize(CsvRow::from(run))?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the JSON and CSV exports of a run set into `dir`, creating it if needed.
///
/// # Arguments
///
/// * outcome - The run set outcome to export
/// * dir - Output directory, e.g. `./bench-results`
///
/// # Returns
///
/// The paths of both files.
pub fn write_exports(outcome: &RunSetOutcome, dir: &Path) -> anyhow::Result<ExportPaths> {
    let created_at = Utc::now();
    let paths = ExportPaths::new(dir, &created_at);

    fs::create_dir_all(dir).context(format!("Unable to create {}", dir.display()))?;

    let dataset = Dataset::new(outcome, created_at);
    let json = serde_json::to_string_pretty(&dataset).context("Unable to serialize results")?;
    fs::write(&paths.json, json).context(format!("Unable to write {}", paths.json.display()))?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(&paths.csv)
        .context(format!("Unable to create {}", paths.csv.display()))?;
    write_csv(&mut writer, &outcome.results)
        .context(format!("Unable to write {}", paths.csv.display()))?;

    info!(
        "Exported dataset {} to {} and {}",
        dataset.id,
        paths.json.display(),
        paths.csv.display()
    );
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data::tests::run_result, runner::RunFailure};
    use chrono::TimeZone;

    fn read_rows(path: &Path) -> anyhow::Result<Vec<CsvRow>> {
        let mut reader = csv::Reader::from_path(path)?;
        let rows = reader.deserialize().collect::<Result<Vec<CsvRow>, _>>()?;
        Ok(rows)
    }

    #[test]
    fn quotes_separators_and_quotes_in_fields() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut run = run_result("say \"hi\"", Some("-Xmx512m,-Xss1m"), vec![0.01]);
        run.image = "demo:two\nlines".to_string();
        let outcome = RunSetOutcome {
            results: vec![run],
            ..RunSetOutcome::default()
        };

        let paths = write_exports(&outcome, dir.path())?;

        let raw = fs::read_to_string(&paths.csv)?;
        assert!(raw.contains("\"say \"\"hi\"\"\""));
        assert!(raw.contains("\"-Xmx512m,-Xss1m\""));

        let rows = read_rows(&paths.csv)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "say \"hi\"");
        assert_eq!(rows[0].image, "demo:two\nlines");
        assert_eq!(rows[0].flags.as_deref(), Some("-Xmx512m,-Xss1m"));
        Ok(())
    }

    #[test]
    fn names_files_after_the_timestamp() {
        let created_at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let paths = ExportPaths::new(Path::new("bench-results"), &created_at);

        assert_eq!(
            paths.json,
            PathBuf::from("bench-results/results-20240309-140507.json")
        );
        assert_eq!(
            paths.csv,
            PathBuf::from("bench-results/results-20240309-140507.csv")
        );
    }

    #[test]
    fn writes_one_row_per_run() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let outcome = RunSetOutcome {
            results: vec![
                run_result("coops-off", Some("-XX:-UseCompressedOops"), vec![0.01, 0.03]),
                run_result("native", None, vec![0.02]),
            ],
            ..RunSetOutcome::default()
        };

        let paths = write_exports(&outcome, dir.path())?;

        let raw = fs::read_to_string(&paths.csv)?;
        assert_eq!(raw.lines().next(), Some(CSV_HEADER.join(",").as_str()));
        // absent flags are an empty cell
        assert!(raw.contains(",native,demo:jvm,,GENERIC_HEALTH,"));

        let rows = read_rows(&paths.csv)?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], CsvRow::from(&outcome.results[0]));
        assert_eq!(rows[0].scenario, "PAYLOAD_HEAVY_JSON");
        assert_eq!(rows[0].path, "/json?n=1000");
        assert_eq!(rows[0].flags.as_deref(), Some("-XX:-UseCompressedOops"));
        assert_eq!(rows[0].readiness_ms, 1500);
        assert_eq!(rows[0].first_request_s, 0.25);
        assert_eq!(rows[0].requests, 2);
        assert_eq!(rows[0].p50_s, Some(0.01));
        assert_eq!(rows[0].p99_s, Some(0.03));
        assert_eq!(rows[0].load_cpu_avg, Some(70.0));
        assert_eq!(rows[0].load_mem_max, Some(30.0));
        assert_eq!(rows[1].flags, None);
        Ok(())
    }

    #[test]
    fn writes_the_header_without_runs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = write_exports(&RunSetOutcome::default(), dir.path())?;

        let raw = fs::read_to_string(&paths.csv)?;
        assert_eq!(raw, format!("{}\n", CSV_HEADER.join(",")));
        Ok(())
    }

    #[test]
    fn exports_json_and_csv() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let outcome = RunSetOutcome {
            results: vec![run_result("native", None, vec![0.02, 0.04])],
            failures: vec![RunFailure {
                name: "broken".to_string(),
                error: anyhow::anyhow!("Readiness timeout after 120s"),
            }],
            skipped: vec![],
        };

        let paths = write_exports(&outcome, &dir.path().join("bench-results"))?;

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&paths.json)?)?;
        assert_eq!(json["id"].as_str().map(str::len), Some(21));
        assert!(json["results"][0]["effective_flags"].is_null());
        assert_eq!(json["results"][0]["latencies_secs"][1], 0.04);
        assert_eq!(
            json["results"][0]["readiness"]["mechanism"],
            "GENERIC_HEALTH"
        );
        assert_eq!(json["failures"][0]["name"], "broken");

        let csv = fs::read_to_string(&paths.csv)?;
        assert_eq!(csv.lines().count(), 2);
        Ok(())
    }
}
