/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    data::{
        summary::{percentile, sorted, LatencySummary, PhaseSummary, Spread},
        Phase, RunResult,
    },
    runner::RunSetOutcome,
    workload::Scenario,
};
use colored::Colorize;
use itertools::Itertools;
use term_table::{row, row::Row, rows, table_cell::*, Table, TableStyle};
use textplots::{Chart, Plot, Shape};

/// Figures across every run of one scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioOverview {
    pub scenario: Scenario,
    pub runs: usize,
    pub readiness_ms: Spread,
    pub first_request_secs: Spread,
    /// Percentiles over the latencies of all runs pooled together.
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// One overview per scenario, in order of first appearance.
pub fn scenario_overviews(results: &[RunResult]) -> Vec<ScenarioOverview> {
    let scenarios: Vec<Scenario> = results.iter().map(|r| r.scenario).unique().collect();

    scenarios
        .into_iter()
        .filter_map(|scenario| {
            let runs = results
                .iter()
                .filter(|r| r.scenario == scenario)
                .collect_vec();

            let readiness = runs
                .iter()
                .map(|r| r.readiness.elapsed_ms as f64)
                .collect_vec();
            let first = runs.iter().map(|r| r.first_request_secs).collect_vec();
            let pooled = sorted(
                &runs
                    .iter()
                    .flat_map(|r| r.latencies_secs.iter().copied())
                    .collect_vec(),
            );

            Some(ScenarioOverview {
                scenario,
                runs: runs.len(),
                readiness_ms: Spread::of(&readiness)?,
                first_request_secs: Spread::of(&first)?,
                p50: percentile(&pooled, 0.50)?,
                p95: percentile(&pooled, 0.95)?,
                p99: percentile(&pooled, 0.99)?,
            })
        })
        .collect()
}

/// Runs ordered slowest first by p95. Runs without latencies go last.
pub fn by_p95_desc(results: &[RunResult]) -> Vec<&RunResult> {
    results
        .iter()
        .sorted_by(|a, b| {
            let a = a.latency_summary().map(|s| s.p95).unwrap_or(f64::NEG_INFINITY);
            let b = b.latency_summary().map(|s| s.p95).unwrap_or(f64::NEG_INFINITY);
            b.total_cmp(&a)
        })
        .collect()
}

fn fmt_ms(secs: f64) -> String {
    format!("{:.1}ms", secs * 1000.0)
}

fn fmt_mem(summary: &Option<PhaseSummary>) -> String {
    summary
        .as_ref()
        .map(|s| format!("{:.1}% / {:.1}%", s.mem_percent_avg, s.mem_percent_max))
        .unwrap_or("--".to_string())
}

fn fmt_load(summary: &Option<PhaseSummary>) -> String {
    summary
        .as_ref()
        .map(|s| {
            format!(
                "cpu {:.1}%\nmem {:.1}% / {:.1}%\n{}",
                s.cpu_avg, s.mem_percent_avg, s.mem_percent_max, s.mem_usage_at_max
            )
        })
        .unwrap_or("--".to_string())
}

fn overview_table(overview: &ScenarioOverview) -> Table {
    Table::builder()
        .rows(rows![
            row![
                TableCell::builder("Runs".bold()).build(),
                TableCell::builder("Readiness min/avg/max".bold()).build(),
                TableCell::builder("First request min/avg/max".bold()).build(),
                TableCell::builder("p50".bold()).build(),
                TableCell::builder("p95".bold()).build(),
                TableCell::builder("p99".bold()).build()
            ],
            row![
                TableCell::new(overview.runs),
                TableCell::new(format!(
                    "{:.0} / {:.0} / {:.0}ms",
                    overview.readiness_ms.min, overview.readiness_ms.avg, overview.readiness_ms.max
                )),
                TableCell::new(format!(
                    "{:.3} / {:.3} / {:.3}s",
                    overview.first_request_secs.min,
                    overview.first_request_secs.avg,
                    overview.first_request_secs.max
                )),
                TableCell::new(fmt_ms(overview.p50)),
                TableCell::new(fmt_ms(overview.p95)),
                TableCell::new(fmt_ms(overview.p99))
            ]
        ])
        .style(TableStyle::rounded())
        .build()
}

fn runs_table(runs: &[&RunResult]) -> Table {
    let mut rows: Vec<Row> = rows![row![
        TableCell::builder("Name".bold()).build(),
        TableCell::builder("Kind".bold()).build(),
        TableCell::builder("Ready".bold()).build(),
        TableCell::builder("First".bold()).build(),
        TableCell::builder("Median".bold()).build(),
        TableCell::builder("p95".bold()).build(),
        TableCell::builder("Mean".bold()).build(),
        TableCell::builder("Reqs".bold()).build(),
        TableCell::builder("LOAD".bold()).build(),
        TableCell::builder("IDLE mem".bold()).build(),
        TableCell::builder("POST mem".bold()).build()
    ]];

    for run in runs {
        let latency = run.latency_summary();
        let cell = |f: fn(&LatencySummary) -> f64| {
            latency
                .as_ref()
                .map(|s| fmt_ms(f(s)))
                .unwrap_or("--".to_string())
        };

        rows.push(row![
            TableCell::new(run.name.green()),
            TableCell::new(run.kind()),
            TableCell::new(format!(
                "{}ms\n{}",
                run.readiness.elapsed_ms, run.readiness.mechanism
            )),
            TableCell::new(format!("{:.3}s", run.first_request_secs)),
            TableCell::new(cell(|s| s.p50)),
            TableCell::new(cell(|s| s.p95)),
            TableCell::new(cell(|s| s.mean)),
            TableCell::new(run.latencies_secs.len()),
            TableCell::new(fmt_load(&run.phase_summary(Phase::Load))),
            TableCell::new(fmt_mem(&run.phase_summary(Phase::Idle))),
            TableCell::new(fmt_mem(&run.phase_summary(Phase::Post)))
        ]);
    }

    Table::builder()
        .rows(rows)
        .style(TableStyle::rounded())
        .build()
}

fn plot_latencies(run: &RunResult) {
    let points: Vec<(f32, f32)> = run
        .latencies_secs
        .iter()
        .enumerate()
        .map(|(i, secs)| (i as f32, (secs * 1000.0) as f32))
        .collect();
    if points.is_empty() {
        return;
    }

    println!("{} latency (ms) per request:", run.name.green());
    Chart::new(120, 40, 0.0, points.len() as f32)
        .lineplot(&Shape::Lines(&points))
        .display();
}

/// Prints the results of a run set to stdout.
///
/// # Arguments
///
/// * outcome - Results and failures of the run set
/// * plot - Also draw the latency series of every run
pub fn print_summary(outcome: &RunSetOutcome, plot: bool) {
    println!("\n{}", " Summary ".reversed().green());

    for overview in scenario_overviews(&outcome.results) {
        println!("{}:", overview.scenario.to_string().green());
        println!("{}", overview_table(&overview).render());

        let runs = by_p95_desc(&outcome.results)
            .into_iter()
            .filter(|r| r.scenario == overview.scenario)
            .collect_vec();
        println!("{}", runs_table(&runs).render());

        for run in runs.iter() {
            println!(
                "  {} flags: {} path: {}",
                run.name.green(),
                run.flags_display(),
                run.workload_path
            );
        }

        if plot {
            for run in runs {
                plot_latencies(run);
            }
        }
    }

    if !outcome.failures.is_empty() {
        println!("\n{}", " Failed ".reversed().red());
        for failure in outcome.failures.iter() {
            println!("  {}: {:#}", failure.name.red(), failure.error);
        }
    }

    if !outcome.skipped.is_empty() {
        println!(
            "{} {}",
            "Not run:".bright_black(),
            outcome.skipped.join(", ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tests::run_result;

    #[test]
    fn sorts_slowest_first() {
        let results = vec![
            run_result("fast", Some(""), vec![0.01, 0.02]),
            run_result("slow", Some("-XX:+UseZGC"), vec![0.30, 0.40]),
            run_result("empty", None, vec![]),
            run_result("medium", None, vec![0.10, 0.20]),
        ];

        let names = by_p95_desc(&results)
            .into_iter()
            .map(|r| r.name.as_str())
            .collect_vec();
        assert_eq!(names, vec!["slow", "medium", "fast", "empty"]);
    }

    #[test]
    fn pools_latencies_per_scenario() -> anyhow::Result<()> {
        let mut alloc = run_result("alloc", Some(""), vec![0.5]);
        alloc.scenario = Scenario::AllocHeavy;
        alloc.readiness.elapsed_ms = 900;
        let results = vec![
            run_result("a", Some(""), (1..=5).map(|i| i as f64).collect()),
            run_result("b", Some(""), (6..=10).map(|i| i as f64).collect()),
            alloc,
        ];

        let overviews = scenario_overviews(&results);
        assert_eq!(overviews.len(), 2);

        let payload = &overviews[0];
        assert_eq!(payload.scenario, Scenario::PayloadHeavy);
        assert_eq!(payload.runs, 2);
        assert_eq!(payload.p50, 5.0);
        assert_eq!(payload.p95, 10.0);
        assert_eq!(payload.readiness_ms.avg, 1500.0);

        let alloc = &overviews[1];
        assert_eq!(alloc.runs, 1);
        assert_eq!(alloc.p99, 0.5);
        assert_eq!(alloc.readiness_ms.max, 900.0);
        Ok(())
    }

    #[test]
    fn renders_tables_with_every_run() {
        let results = vec![
            run_result("baseline", Some(""), vec![0.01, 0.02]),
            run_result("native", None, vec![]),
        ];
        let rendered = runs_table(&by_p95_desc(&results)).render();

        assert!(rendered.contains("baseline"));
        assert!(rendered.contains("native"));
        assert!(rendered.contains("PRECOMPILED"));
        assert!(rendered.contains("GENERIC_HEALTH"));
    }
}
