use log::{error, info, Level};
use logging_timer::timer;
use serde::Serialize;

use crate::alerts::AlertEngine;
use crate::anomaly;
use crate::config::Config;
use crate::database::Database;
use crate::error::VendorPulseError;
use crate::forecast::{self, Forecast};
use crate::ingest;
use crate::inventory;
use crate::pricing;
use crate::scoring;
use crate::summary::VendorSummary;
use crate::validate;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Complete,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "R",
            RunStatus::Complete => "C",
            RunStatus::Failed => "F",
        }
    }
}

/// Per-run counts, stored as JSON on the `runs` row and rendered by the
/// reports module. Every stage contributes its processed/skipped numbers so
/// nothing is silently dropped.
#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub rows_loaded: usize,
    pub rows_skipped: usize,
    pub summary_rows: usize,
    pub validation_passed: bool,
    pub validation_failures: Vec<String>,
    pub vendors_scored: usize,
    pub overstocked: usize,
    pub understocked: usize,
    pub anomalies_flagged: usize,
    pub rows_priced: usize,
    pub pricing_skipped: usize,
    pub forecasts: usize,
    pub forecasts_insufficient: usize,
    pub alerts_generated: usize,
    pub alerts_critical: usize,
    pub errors: Vec<String>,
    /// Name of the stage that halted the run, if any
    pub halted_at: Option<String>,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: i64,
    pub status: RunStatus,
    pub report: RunReport,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Complete
    }
}

fn begin_run(db: &Database) -> Result<i64, VendorPulseError> {
    let run_id: i64 = db.conn().query_row(
        "INSERT INTO runs (started_at, status)
         VALUES (strftime('%s', 'now', 'utc'), 'R')
         RETURNING run_id",
        [],
        |row| row.get(0),
    )?;
    Ok(run_id)
}

fn end_run(
    db: &Database,
    run_id: i64,
    status: RunStatus,
    report: &RunReport,
) -> Result<(), VendorPulseError> {
    let summary_json = serde_json::to_string(report)
        .map_err(|e| VendorPulseError::Error(format!("Failed to serialize run report: {e}")))?;

    db.conn().execute(
        "UPDATE runs
         SET finished_at = strftime('%s', 'now', 'utc'), status = ?, summary = ?
         WHERE run_id = ?",
        rusqlite::params![status.as_str(), summary_json, run_id],
    )?;
    Ok(())
}

/// Executes one full pipeline run: ingest, aggregate, validate, the five
/// analytics stages, then alert generation. Stages run strictly in
/// sequence. A validation failure halts the run before any analytics stage
/// writes, leaving previously committed derived tables untouched; the run
/// is recorded as failed rather than returned as an error.
pub fn run(db: &mut Database, config: &Config, archive: bool) -> Result<RunOutcome, VendorPulseError> {
    let run_id = begin_run(db)?;
    info!("Pipeline run {run_id} started");

    match run_stages(db, config, run_id, archive) {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            // Best effort: record the failure before propagating
            error!("Pipeline run {run_id} failed: {e}");
            let mut report = RunReport::default();
            report.errors.push(e.to_string());
            let _ = end_run(db, run_id, RunStatus::Failed, &report);
            Err(e)
        }
    }
}

fn run_stages(
    db: &mut Database,
    config: &Config,
    run_id: i64,
    archive: bool,
) -> Result<RunOutcome, VendorPulseError> {
    let mut report = RunReport::default();

    {
        let _tmr = timer!(Level::Debug; "pipeline::ingest");
        let ingest_report = ingest::ingest_folder(db, &config.pipeline, Some(run_id), archive)?;
        report.files_processed = ingest_report.files_processed;
        report.files_skipped = ingest_report.files_skipped;
        report.rows_loaded = ingest_report.rows_loaded;
        report.rows_skipped = ingest_report.rows_skipped;
        report.errors.extend(ingest_report.errors);
    }

    {
        let _tmr = timer!(Level::Debug; "pipeline::aggregate");
        report.summary_rows = VendorSummary::rebuild(db)?;
    }

    let validation = {
        let _tmr = timer!(Level::Debug; "pipeline::validate");
        validate::validate_store(db, config.pipeline.min_rows)?
    };
    report.validation_passed = validation.passed();
    if !validation.passed() {
        report.validation_failures = validation
            .failures()
            .iter()
            .map(|check| format!("{}: {}", check.name, check.detail))
            .collect();
        report.halted_at = Some("validation".to_string());
        error!("Pipeline run {run_id} halted: validation failed");
        end_run(db, run_id, RunStatus::Failed, &report)?;
        return Ok(RunOutcome {
            run_id,
            status: RunStatus::Failed,
            report,
        });
    }

    let summaries = VendorSummary::load_all(db)?;

    let scores = {
        let _tmr = timer!(Level::Debug; "pipeline::scoring");
        let scores = scoring::rebuild_scores(db, &summaries)?;
        report.vendors_scored = scores.len();
        scores
    };

    let inventory_recs = {
        let _tmr = timer!(Level::Debug; "pipeline::inventory");
        let (recs, counts) =
            inventory::rebuild_recommendations(db, &summaries, config.analytics.lead_time_days)?;
        report.overstocked = counts.overstocked;
        report.understocked = counts.understocked;
        recs
    };

    let anomalies = {
        let _tmr = timer!(Level::Debug; "pipeline::anomaly");
        let anomalies = anomaly::rebuild_anomalies(db, &summaries, &config.analytics)?;
        report.anomalies_flagged = anomalies.len();
        anomalies
    };

    {
        let _tmr = timer!(Level::Debug; "pipeline::pricing");
        let pricing_report = pricing::rebuild_pricing(db, &summaries)?;
        report.rows_priced = pricing_report.recommendations.len();
        report.pricing_skipped = pricing_report.skipped;
    }

    {
        let _tmr = timer!(Level::Debug; "pipeline::forecast");
        let forecast_report = forecast::rebuild_forecasts(db, &config.analytics)?;
        report.forecasts = forecast_report
            .forecasts
            .iter()
            .filter(|(_, f)| matches!(f, Forecast::Projection(_)))
            .count();
        report.forecasts_insufficient = forecast_report.insufficient;
    }

    {
        let _tmr = timer!(Level::Debug; "pipeline::alerts");
        let batch = AlertEngine::new(&config.alerts).generate(
            db,
            Some(run_id),
            &summaries,
            &scores,
            &inventory_recs,
            &anomalies,
        )?;
        report.alerts_generated = batch.alerts.len();
        report.alerts_critical = batch.critical;
    }

    end_run(db, run_id, RunStatus::Complete, &report)?;
    info!("Pipeline run {run_id} complete");

    Ok(RunOutcome {
        run_id,
        status: RunStatus::Complete,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir, min_rows: u32) -> Config {
        let mut config = Config::default();
        config.pipeline.data_dir = dir.path().to_path_buf();
        config.pipeline.archive_dir = dir.path().join("archive");
        config.pipeline.min_rows = min_rows;
        config
    }

    fn write_csv(dir: &TempDir, name: &str, body: &str) {
        let mut f = fs::File::create(dir.path().join(name)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    fn seed_folder(dir: &TempDir) {
        let mut sales = String::from("VendorName,Description,Quantity,Dollars,SalesDate\n");
        let mut purchases = String::from("VendorName,Description,Quantity,Dollars\n");
        for i in 0..12 {
            sales.push_str(&format!(
                "Vendor {i},Widget,{},{},2024-01-{:02}\n",
                10 + i,
                100 + i * 10,
                i + 1
            ));
            purchases.push_str(&format!("Vendor {i},Widget,{},{}\n", 12 + i, 90 + i * 9));
        }
        write_csv(dir, "sales_jan.csv", &sales);
        write_csv(dir, "purchases_jan.csv", &purchases);
    }

    #[test]
    fn full_run_builds_every_derived_table() {
        let dir = TempDir::new().unwrap();
        seed_folder(&dir);
        let config = test_config(&dir, 10);

        let mut db = Database::open_in_memory().unwrap();
        let outcome = run(&mut db, &config, false).unwrap();

        assert!(outcome.succeeded());
        assert_eq!(outcome.report.summary_rows, 12);
        assert!(outcome.report.validation_passed);
        assert_eq!(outcome.report.vendors_scored, 12);

        for table in [
            "vendor_sales_summary",
            "vendor_performance_scores",
            "inventory_recommendations",
            "vendor_anomalies",
            "pricing_recommendations",
            "demand_forecasts",
            "active_alerts",
        ] {
            assert!(db.table_exists(table).unwrap(), "missing {table}");
        }

        let status: String = db
            .conn()
            .query_row("SELECT status FROM runs WHERE run_id = ?", [outcome.run_id], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(status, "C");

        let summary_json: String = db
            .conn()
            .query_row("SELECT summary FROM runs WHERE run_id = ?", [outcome.run_id], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(summary_json.contains("\"summary_rows\":12"));
    }

    #[test]
    fn validation_failure_halts_before_analytics() {
        let dir = TempDir::new().unwrap();
        seed_folder(&dir);
        // Threshold far above what the fixtures provide
        let config = test_config(&dir, 500);

        let mut db = Database::open_in_memory().unwrap();
        let outcome = run(&mut db, &config, false).unwrap();

        assert!(!outcome.succeeded());
        assert_eq!(outcome.report.halted_at.as_deref(), Some("validation"));
        assert!(!outcome.report.validation_failures.is_empty());

        // No analytics stage ran
        assert!(!db.table_exists("vendor_performance_scores").unwrap());
        assert!(!db.table_exists("active_alerts").unwrap());

        let status: String = db
            .conn()
            .query_row("SELECT status FROM runs WHERE run_id = ?", [outcome.run_id], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(status, "F");
    }

    #[test]
    fn failed_validation_leaves_previous_tables_untouched() {
        let dir = TempDir::new().unwrap();
        seed_folder(&dir);
        let config = test_config(&dir, 10);

        let mut db = Database::open_in_memory().unwrap();
        let first = run(&mut db, &config, false).unwrap();
        assert!(first.succeeded());
        let scores_before = db.row_count("vendor_performance_scores").unwrap();

        // Second run with an unreachable threshold fails validation
        let strict = test_config(&dir, 100_000);
        let second = run(&mut db, &strict, false).unwrap();
        assert!(!second.succeeded());

        assert_eq!(
            db.row_count("vendor_performance_scores").unwrap(),
            scores_before
        );
    }

    #[test]
    fn raw_rows_accumulate_across_runs() {
        let dir = TempDir::new().unwrap();
        seed_folder(&dir);
        let config = test_config(&dir, 10);

        let mut db = Database::open_in_memory().unwrap();
        run(&mut db, &config, false).unwrap();
        assert_eq!(db.row_count("sales").unwrap(), 12);

        // Files are still in place (not archived), so they re-ingest
        run(&mut db, &config, false).unwrap();
        assert_eq!(db.row_count("sales").unwrap(), 24);

        // But the summary is replaced, not accumulated
        assert_eq!(db.row_count("vendor_sales_summary").unwrap(), 12);
    }
}
